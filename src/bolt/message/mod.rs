//! Bolt message types.
//!
//! Requests declare their wire tag and serializer; responses are decoded
//! generically from the envelope and dispatched to the pending request they
//! answer. Within one connection, responses always arrive in request send
//! order.

pub mod request;
pub mod response;

pub use request::{AccessMode, Begin, Discard, Hello, Logon, Pull, Request, Route, Run};
pub use response::{FailureMessage, RecordMessage, Response, Success};

/// Message tags.
pub mod tag {
    /// HELLO (0x01)
    pub const HELLO: u8 = 0x01;
    /// GOODBYE (0x02)
    pub const GOODBYE: u8 = 0x02;
    /// RESET (0x0F)
    pub const RESET: u8 = 0x0F;
    /// RUN (0x10)
    pub const RUN: u8 = 0x10;
    /// BEGIN (0x11)
    pub const BEGIN: u8 = 0x11;
    /// COMMIT (0x12)
    pub const COMMIT: u8 = 0x12;
    /// ROLLBACK (0x13)
    pub const ROLLBACK: u8 = 0x13;
    /// DISCARD (0x2F)
    pub const DISCARD: u8 = 0x2F;
    /// PULL (0x3F)
    pub const PULL: u8 = 0x3F;
    /// ROUTE (0x66), Bolt 4.3+
    pub const ROUTE: u8 = 0x66;
    /// LOGON (0x6A), Bolt 5.x
    pub const LOGON: u8 = 0x6A;
    /// LOGOFF (0x6B), Bolt 5.x
    pub const LOGOFF: u8 = 0x6B;

    /// SUCCESS (0x70)
    pub const SUCCESS: u8 = 0x70;
    /// RECORD (0x71)
    pub const RECORD: u8 = 0x71;
    /// IGNORED (0x7E)
    pub const IGNORED: u8 = 0x7E;
    /// FAILURE (0x7F)
    pub const FAILURE: u8 = 0x7F;
}
