//! Wire-level Bolt errors.

use std::fmt;
use std::io;

use super::packstream::PackStreamError;

/// Result alias for wire-level operations.
pub type BoltResult<T> = Result<T, BoltError>;

/// Errors raised below the driver surface: socket faults, framing and
/// serialization problems, and handshake rejection. Every variant except
/// [`BoltError::UnsupportedProtocolVersion`] is fatal to its connection.
#[derive(Debug)]
pub enum BoltError {
    /// Socket-level failure
    Io(io::Error),

    /// Value serialization or deserialization failed
    PackStream(PackStreamError),

    /// The server rejected every offered protocol version
    UnsupportedProtocolVersion,

    /// The peer violated the protocol (bad frame, unexpected message)
    Protocol(String),

    /// A message exceeded the configured reassembly limit
    MessageTooLarge {
        /// Accumulated size
        size: usize,
        /// Configured maximum
        max: usize,
    },

    /// The peer closed the connection mid-exchange
    ConnectionClosed,
}

impl fmt::Display for BoltError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BoltError::Io(e) => write!(f, "I/O error: {}", e),
            BoltError::PackStream(e) => write!(f, "PackStream error: {}", e),
            BoltError::UnsupportedProtocolVersion => {
                write!(f, "server supports none of the offered Bolt versions")
            }
            BoltError::Protocol(msg) => write!(f, "protocol violation: {}", msg),
            BoltError::MessageTooLarge { size, max } => {
                write!(f, "message of {} bytes exceeds the {} byte limit", size, max)
            }
            BoltError::ConnectionClosed => write!(f, "connection closed by peer"),
        }
    }
}

impl std::error::Error for BoltError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            BoltError::Io(e) => Some(e),
            BoltError::PackStream(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for BoltError {
    fn from(err: io::Error) -> Self {
        BoltError::Io(err)
    }
}

impl From<PackStreamError> for BoltError {
    fn from(err: PackStreamError) -> Self {
        BoltError::PackStream(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn io_errors_convert() {
        let io_err = io::Error::new(io::ErrorKind::ConnectionRefused, "refused");
        let err: BoltError = io_err.into();
        assert!(matches!(err, BoltError::Io(_)));
        assert!(err.to_string().contains("refused"));
    }

    #[test]
    fn packstream_errors_convert() {
        let err: BoltError = PackStreamError::UnexpectedEof.into();
        assert!(matches!(err, BoltError::PackStream(_)));
    }

    #[test]
    fn display_names_the_limit() {
        let err = BoltError::MessageTooLarge { size: 200, max: 100 };
        let text = err.to_string();
        assert!(text.contains("200"));
        assert!(text.contains("100"));
    }
}
