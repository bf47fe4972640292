//! # Bolt protocol layer
//!
//! Wire-level building blocks of the driver:
//!
//! - [`packstream`]: the binary value format (packer, unpacker, typed
//!   structure views)
//! - [`message`]: request/response message types
//! - [`handshake`]: version negotiation preamble
//! - [`codec`]: chunked message framing for async I/O
//! - [`version`]: protocol version capabilities
//! - [`error`]: wire-level errors
//!
//! Application code should use the [`crate::driver`] module; this layer is
//! exposed for tooling that needs raw protocol access.

pub mod codec;
pub mod error;
pub mod handshake;
pub mod message;
pub mod packstream;
pub mod version;

pub use codec::MessageCodec;
pub use error::{BoltError, BoltResult};
pub use handshake::{BOLT_MAGIC, HANDSHAKE_RESPONSE_SIZE, HANDSHAKE_SIZE};
pub use message::{
    AccessMode, Begin, Discard, FailureMessage, Hello, Logon, Pull, RecordMessage, Request,
    Response, Route, Run, Success,
};
pub use packstream::{
    Date, DateTime, Duration, LocalDateTime, LocalTime, Node, PackStreamError, Path, Point2D,
    Point3D, Relationship, StructCatalog, Structure, Time, UnboundRelationship, Value,
};
pub use version::BoltVersion;
