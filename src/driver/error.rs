//! Driver error surface.
//!
//! One closed enum covers every failure the driver can raise. Retry
//! decisions never inspect error types at runtime: each error resolves to an
//! [`ErrorCategory`] (server failures through an immutable code table), and
//! the category alone decides retryability.

use std::collections::HashMap;
use std::fmt;

use thiserror::Error;

use crate::bolt::packstream::Value;
use crate::bolt::{BoltError, FailureMessage};

/// Result alias for driver operations.
pub type DriverResult<T> = Result<T, DriverError>;

/// Classification of a failure, the unit retry decisions are made on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Caller misuse or a client-side statement problem; never retried
    Client,
    /// Transient server-side condition (deadlock, busy database)
    Transient,
    /// Permanent server-side failure
    Database,
    /// Credential or trust failure other than plain bad credentials
    Security,
    /// Bad credentials
    Authentication,
    /// Authorization lapsed mid-session; a fresh connection may succeed
    AuthorizationExpired,
    /// Connectivity or cluster-state failure
    ServiceUnavailable,
    /// The server no longer serves the role this session needs
    SessionExpired,
    /// Wire-protocol violation; fatal to the connection
    Protocol,
    /// Connection pool lifecycle failure
    Pool,
}

impl ErrorCategory {
    /// Whether a failure of this category is worth retrying on a fresh
    /// connection.
    pub fn is_retryable(self) -> bool {
        matches!(
            self,
            ErrorCategory::Transient
                | ErrorCategory::ServiceUnavailable
                | ErrorCategory::SessionExpired
                | ErrorCategory::AuthorizationExpired
        )
    }
}

/// Code-to-category table, consulted exact-match first, then by prefix.
///
/// Built once into the binary; never mutated. `TokenExpired` and other
/// session-misuse codes deliberately stay in the coarse `Client` bucket.
const EXACT_CODES: &[(&str, ErrorCategory)] = &[
    ("Neo.ClientError.Cluster.NotALeader", ErrorCategory::SessionExpired),
    ("Neo.ClientError.General.ForbiddenOnReadOnlyDatabase", ErrorCategory::SessionExpired),
    ("Neo.ClientError.Security.AuthorizationExpired", ErrorCategory::AuthorizationExpired),
    ("Neo.ClientError.Security.Unauthorized", ErrorCategory::Authentication),
    ("Neo.ClientError.Security.TokenExpired", ErrorCategory::Client),
    ("Neo.ClientError.Request.Invalid", ErrorCategory::Protocol),
    ("Neo.ClientError.Request.InvalidFormat", ErrorCategory::Protocol),
];

const PREFIX_CODES: &[(&str, ErrorCategory)] = &[
    ("Neo.TransientError.", ErrorCategory::Transient),
    ("Neo.ClientError.Security.", ErrorCategory::Security),
    ("Neo.ClientError.", ErrorCategory::Client),
    ("Neo.DatabaseError.", ErrorCategory::Database),
];

/// Resolve a server error code to its category.
pub fn classify_code(code: &str) -> ErrorCategory {
    for (exact, category) in EXACT_CODES {
        if code == *exact {
            return *category;
        }
    }
    for (prefix, category) in PREFIX_CODES {
        if code.starts_with(prefix) {
            return *category;
        }
    }
    ErrorCategory::Database
}

/// A failure reported by the server, carrying the full structured payload.
#[derive(Debug, Clone, PartialEq)]
pub struct ServerError {
    /// Stable error code
    pub code: String,
    /// Human-readable message
    pub message: String,
    /// GQL status code, when provided
    pub gql_status: Option<String>,
    /// GQL status description, when provided
    pub gql_status_description: Option<String>,
    /// Classification string from the diagnostic record
    pub classification: Option<String>,
    /// Full diagnostic record
    pub diagnostic_record: HashMap<String, Value>,
    /// Nested cause, when provided
    pub cause: Option<Box<ServerError>>,
    category: ErrorCategory,
}

impl ServerError {
    /// Build from a decoded FAILURE payload.
    pub fn from_failure(failure: FailureMessage) -> Self {
        let category = classify_code(&failure.code);
        Self {
            category,
            code: failure.code,
            message: failure.message,
            gql_status: failure.gql_status,
            gql_status_description: failure.gql_status_description,
            classification: failure.classification,
            diagnostic_record: failure.diagnostic_record,
            cause: failure.cause.map(|c| Box::new(ServerError::from_failure(*c))),
        }
    }

    /// The resolved category.
    pub fn category(&self) -> ErrorCategory {
        self.category
    }

    /// Whether this failure is worth retrying.
    pub fn is_retryable(&self) -> bool {
        self.category.is_retryable()
    }
}

impl fmt::Display for ServerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

/// Everything the driver can fail with.
#[derive(Error, Debug)]
pub enum DriverError {
    /// Socket-level or connect-time failure
    #[error("connection error: {0}")]
    Connection(String),

    /// Credentials were rejected
    #[error("authentication error: {0}")]
    Authentication(String),

    /// The peer violated the protocol; the connection is defunct
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The server rejected every offered protocol version
    #[error("server supports none of the offered Bolt versions")]
    UnsupportedProtocolVersion,

    /// Structured failure reported by the server
    #[error("server error: {0}")]
    Server(ServerError),

    /// Caller misuse, raised before any wire traffic
    #[error("client error: {0}")]
    Client(String),

    /// Cannot reach any suitable server
    #[error("service unavailable: {0}")]
    ServiceUnavailable(String),

    /// The selected server no longer serves the required role
    #[error("session expired: {0}")]
    SessionExpired(String),

    /// No connection became available within the acquisition timeout
    #[error("connection pool exhausted: {0}")]
    PoolExhausted(String),

    /// Pool or driver lifecycle failure (e.g. acquiring after close)
    #[error("pool error: {0}")]
    Pool(String),

    /// Invalid driver configuration
    #[error("configuration error: {0}")]
    Configuration(String),

    /// A bounded operation ran out of time
    #[error("operation timed out: {0}")]
    Timeout(String),

    /// The retry deadline elapsed; carries the final failure
    #[error("transaction failed after {attempts} attempts: {last}")]
    RetriesExhausted {
        /// Attempts made, including the first
        attempts: u32,
        /// The last failure observed
        last: Box<DriverError>,
    },
}

impl DriverError {
    /// Shorthand constructors, mirroring the variant names.
    pub fn connection(msg: impl Into<String>) -> Self {
        Self::Connection(msg.into())
    }

    /// Authentication failure.
    pub fn authentication(msg: impl Into<String>) -> Self {
        Self::Authentication(msg.into())
    }

    /// Protocol violation.
    pub fn protocol(msg: impl Into<String>) -> Self {
        Self::Protocol(msg.into())
    }

    /// Caller misuse.
    pub fn client(msg: impl Into<String>) -> Self {
        Self::Client(msg.into())
    }

    /// No suitable server reachable.
    pub fn service_unavailable(msg: impl Into<String>) -> Self {
        Self::ServiceUnavailable(msg.into())
    }

    /// Pool lifecycle failure.
    pub fn pool(msg: impl Into<String>) -> Self {
        Self::Pool(msg.into())
    }

    /// Configuration problem.
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    /// Timeout.
    pub fn timeout(msg: impl Into<String>) -> Self {
        Self::Timeout(msg.into())
    }

    /// Wrap a decoded FAILURE payload.
    pub fn server(failure: FailureMessage) -> Self {
        Self::Server(ServerError::from_failure(failure))
    }

    /// The error's classification.
    pub fn category(&self) -> ErrorCategory {
        match self {
            DriverError::Connection(_) => ErrorCategory::ServiceUnavailable,
            DriverError::Authentication(_) => ErrorCategory::Authentication,
            DriverError::Protocol(_) | DriverError::UnsupportedProtocolVersion => {
                ErrorCategory::Protocol
            }
            DriverError::Server(e) => e.category(),
            DriverError::Client(_) | DriverError::Configuration(_) => ErrorCategory::Client,
            DriverError::ServiceUnavailable(_) => ErrorCategory::ServiceUnavailable,
            DriverError::SessionExpired(_) => ErrorCategory::SessionExpired,
            DriverError::PoolExhausted(_) | DriverError::Pool(_) => ErrorCategory::Pool,
            DriverError::Timeout(_) => ErrorCategory::ServiceUnavailable,
            DriverError::RetriesExhausted { last, .. } => last.category(),
        }
    }

    /// Whether a fresh attempt on a fresh connection may succeed.
    pub fn is_retryable(&self) -> bool {
        self.category().is_retryable()
    }

    /// The structured server payload, when this error carries one.
    pub fn server_error(&self) -> Option<&ServerError> {
        match self {
            DriverError::Server(e) => Some(e),
            DriverError::RetriesExhausted { last, .. } => last.server_error(),
            _ => None,
        }
    }
}

impl From<BoltError> for DriverError {
    fn from(err: BoltError) -> Self {
        match err {
            BoltError::Io(e) => DriverError::Connection(e.to_string()),
            BoltError::PackStream(e) => DriverError::Protocol(e.to_string()),
            BoltError::UnsupportedProtocolVersion => DriverError::UnsupportedProtocolVersion,
            BoltError::Protocol(msg) => DriverError::Protocol(msg),
            BoltError::MessageTooLarge { size, max } => DriverError::Protocol(format!(
                "message of {} bytes exceeds the {} byte limit",
                size, max
            )),
            BoltError::ConnectionClosed => {
                DriverError::Connection("connection closed by server".to_string())
            }
        }
    }
}
