//! PackStream serialization.
//!
//! PackStream is the compact binary value format Bolt messages are written
//! in. The module provides the [`Value`] model, the [`Packer`]/[`Unpacker`]
//! pair, the version-dependent [`StructCatalog`] of structure tags, and typed
//! views over graph, temporal and spatial structures.
//!
//! Encoding always picks the shortest admissible wire form; decoding is
//! incremental and fails closed on truncation, unknown markers, unknown
//! structure tags and field-count mismatches.

pub mod catalog;
pub mod graph;
pub mod marker;
pub mod pack;
pub mod unpack;
pub mod value;

pub use catalog::StructCatalog;
pub use graph::{
    Date, DateTime, Duration, LocalDateTime, LocalTime, Node, Path, Point2D, Point3D,
    Relationship, Time, UnboundRelationship,
};
pub use pack::{pack, Packer};
pub use unpack::{unpack, Unpacker};
pub use value::{Structure, Value};

use std::fmt;

/// PackStream encode/decode errors.
#[derive(Debug, Clone, PartialEq)]
pub enum PackStreamError {
    /// Input ended inside a value
    UnexpectedEof,
    /// Marker byte outside the format
    UnknownMarker(u8),
    /// Structure tag not in the negotiated version's catalog
    UnknownStructTag {
        /// The offending tag byte
        tag: u8,
    },
    /// Structure field count does not match the catalog
    StructArityMismatch {
        /// The structure tag
        tag: u8,
        /// Admissible field counts
        expected: &'static [usize],
        /// Field count seen on the wire
        actual: usize,
    },
    /// String payload is not valid UTF-8
    InvalidUtf8(String),
    /// Map key was not a string
    InvalidMapKey(&'static str),
    /// Value exceeds the largest encodable size
    ValueTooLarge {
        /// What was being encoded
        kind: &'static str,
        /// Its size
        size: usize,
    },
    /// A decoded value had the wrong shape for the requested view
    UnexpectedType {
        /// What the caller expected
        expected: &'static str,
        /// What was found
        actual: &'static str,
    },
}

impl fmt::Display for PackStreamError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PackStreamError::UnexpectedEof => write!(f, "unexpected end of PackStream data"),
            PackStreamError::UnknownMarker(m) => write!(f, "unknown PackStream marker 0x{:02X}", m),
            PackStreamError::UnknownStructTag { tag } => {
                write!(f, "unknown structure tag 0x{:02X}", tag)
            }
            PackStreamError::StructArityMismatch { tag, expected, actual } => write!(
                f,
                "structure 0x{:02X} has {} fields, expected one of {:?}",
                tag, actual, expected
            ),
            PackStreamError::InvalidUtf8(e) => write!(f, "invalid UTF-8 in string: {}", e),
            PackStreamError::InvalidMapKey(t) => write!(f, "map key must be a string, got {}", t),
            PackStreamError::ValueTooLarge { kind, size } => {
                write!(f, "{} of size {} exceeds the wire format", kind, size)
            }
            PackStreamError::UnexpectedType { expected, actual } => {
                write!(f, "expected {}, got {}", expected, actual)
            }
        }
    }
}

impl std::error::Error for PackStreamError {}
