//! Bolt protocol versions.

use std::fmt;

/// A negotiated Bolt protocol version.
///
/// On the wire a version is a 4-byte big-endian word with the major version
/// in the second byte and the minor version in the third:
/// `[0x00, major, minor, range]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum BoltVersion {
    /// Bolt 4.0
    V4_0,
    /// Bolt 4.3: first version with the ROUTE message
    V4_3,
    /// Bolt 4.4
    V4_4,
    /// Bolt 5.0: element IDs, UTC datetimes, LOGON/LOGOFF
    V5_0,
}

impl BoltVersion {
    /// Versions the driver offers during the handshake, most preferred first.
    pub const SUPPORTED: [BoltVersion; 4] = [
        BoltVersion::V5_0,
        BoltVersion::V4_4,
        BoltVersion::V4_3,
        BoltVersion::V4_0,
    ];

    /// Major version number.
    pub fn major(self) -> u8 {
        match self {
            BoltVersion::V4_0 | BoltVersion::V4_3 | BoltVersion::V4_4 => 4,
            BoltVersion::V5_0 => 5,
        }
    }

    /// Minor version number.
    pub fn minor(self) -> u8 {
        match self {
            BoltVersion::V4_0 | BoltVersion::V5_0 => 0,
            BoltVersion::V4_3 => 3,
            BoltVersion::V4_4 => 4,
        }
    }

    /// Resolve a (major, minor) pair echoed by the server.
    pub fn from_pair(major: u8, minor: u8) -> Option<Self> {
        match (major, minor) {
            (4, 0) => Some(BoltVersion::V4_0),
            (4, 3) => Some(BoltVersion::V4_3),
            (4, 4) => Some(BoltVersion::V4_4),
            (5, 0) => Some(BoltVersion::V5_0),
            _ => None,
        }
    }

    /// The 4-byte wire form offered in the handshake.
    pub fn to_bytes(self) -> [u8; 4] {
        [0x00, self.major(), self.minor(), 0x00]
    }

    /// Parse the server's 4-byte handshake reply.
    pub fn from_bytes(bytes: [u8; 4]) -> Option<Self> {
        Self::from_pair(bytes[1], bytes[2])
    }

    /// Whether routing tables are fetched with the ROUTE message.
    pub fn supports_route(self) -> bool {
        self >= BoltVersion::V4_3
    }

    /// Whether the server sends UTC-based datetime structures and
    /// element-ID fields on graph entities.
    pub fn utc_datetimes(self) -> bool {
        self >= BoltVersion::V5_0
    }

    /// Whether authentication may be re-issued with LOGON.
    pub fn supports_logon(self) -> bool {
        self >= BoltVersion::V5_0
    }
}

impl fmt::Display for BoltVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major(), self.minor())
    }
}
