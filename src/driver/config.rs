//! Driver configuration: addresses, authentication, TLS trust, tunables.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::bolt::packstream::Value;

use super::error::{DriverError, DriverResult};

/// Default Bolt port.
pub const DEFAULT_PORT: u16 = 7687;

/// Authentication token presented in HELLO/LOGON.
#[derive(Debug, Clone)]
pub enum AuthToken {
    /// No authentication
    None,
    /// Username/password
    Basic {
        /// Username
        username: String,
        /// Password
        password: String,
        /// Authentication realm
        realm: Option<String>,
    },
    /// Bearer token
    Bearer {
        /// The token
        token: String,
    },
    /// Kerberos ticket
    Kerberos {
        /// Base64-encoded ticket
        ticket: String,
    },
    /// Custom scheme
    Custom {
        /// Scheme name
        scheme: String,
        /// Principal
        principal: String,
        /// Credentials
        credentials: String,
        /// Realm
        realm: String,
        /// Additional scheme parameters
        parameters: HashMap<String, String>,
    },
}

impl AuthToken {
    /// No authentication.
    pub fn none() -> Self {
        Self::None
    }

    /// Username/password authentication.
    pub fn basic(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self::Basic {
            username: username.into(),
            password: password.into(),
            realm: None,
        }
    }

    /// Username/password with an explicit realm.
    pub fn basic_with_realm(
        username: impl Into<String>,
        password: impl Into<String>,
        realm: impl Into<String>,
    ) -> Self {
        Self::Basic {
            username: username.into(),
            password: password.into(),
            realm: Some(realm.into()),
        }
    }

    /// Bearer-token authentication.
    pub fn bearer(token: impl Into<String>) -> Self {
        Self::Bearer { token: token.into() }
    }

    /// Kerberos authentication.
    pub fn kerberos(ticket: impl Into<String>) -> Self {
        Self::Kerberos { ticket: ticket.into() }
    }

    /// Scheme name as sent on the wire.
    pub fn scheme(&self) -> &str {
        match self {
            Self::None => "none",
            Self::Basic { .. } => "basic",
            Self::Bearer { .. } => "bearer",
            Self::Kerberos { .. } => "kerberos",
            Self::Custom { scheme, .. } => scheme,
        }
    }

    /// Entries merged into the HELLO/LOGON auth map.
    pub fn to_wire_map(&self) -> HashMap<String, Value> {
        let mut map = HashMap::new();
        map.insert("scheme".to_string(), Value::from(self.scheme()));
        match self {
            Self::None => {}
            Self::Basic { username, password, realm } => {
                map.insert("principal".to_string(), Value::from(username.as_str()));
                map.insert("credentials".to_string(), Value::from(password.as_str()));
                if let Some(realm) = realm {
                    map.insert("realm".to_string(), Value::from(realm.as_str()));
                }
            }
            Self::Bearer { token } => {
                map.insert("credentials".to_string(), Value::from(token.as_str()));
            }
            Self::Kerberos { ticket } => {
                map.insert("credentials".to_string(), Value::from(ticket.as_str()));
            }
            Self::Custom { principal, credentials, realm, parameters, .. } => {
                map.insert("principal".to_string(), Value::from(principal.as_str()));
                map.insert("credentials".to_string(), Value::from(credentials.as_str()));
                map.insert("realm".to_string(), Value::from(realm.as_str()));
                for (k, v) in parameters {
                    map.insert(k.clone(), Value::from(v.as_str()));
                }
            }
        }
        map
    }
}

impl Default for AuthToken {
    fn default() -> Self {
        Self::None
    }
}

/// How server certificates are validated when encryption is on.
#[derive(Debug, Clone, Default)]
pub enum TrustStrategy {
    /// Trust the system CA store
    #[default]
    TrustSystemCas,
    /// Trust any certificate (development only)
    TrustAllCertificates,
    /// Trust only the given DER-encoded CA certificates
    TrustCustomCas {
        /// DER-encoded certificates
        certificates: Vec<Vec<u8>>,
    },
}

/// Opaque source of a client certificate for mutual TLS.
///
/// The driver never inspects the returned bytes; they are handed to the TLS
/// layer as-is when a connection is established.
pub trait CertificateSupplier: Send + Sync {
    /// The current client certificate, or `None` when not presenting one.
    fn certificate(&self) -> Option<Vec<u8>>;
}

/// A host/port pair identifying one server.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ServerAddress {
    /// Host name or address
    pub host: String,
    /// Port
    pub port: u16,
}

impl ServerAddress {
    /// Address from host and port.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self { host: host.into(), port }
    }

    /// Parse `host[:port]`, defaulting the port.
    pub fn parse(s: &str) -> DriverResult<Self> {
        let mut parts = s.split(':');
        let host = parts
            .next()
            .filter(|h| !h.is_empty())
            .ok_or_else(|| DriverError::configuration(format!("empty server address: {:?}", s)))?;
        let port = match parts.next() {
            None => DEFAULT_PORT,
            Some(p) => p
                .parse()
                .map_err(|_| DriverError::configuration(format!("invalid port in {:?}", s)))?,
        };
        if parts.next().is_some() {
            return Err(DriverError::configuration(format!("invalid server address: {:?}", s)));
        }
        Ok(Self::new(host, port))
    }

    /// Parse a single-host driver URI (`bolt://host:port` and variants).
    pub fn from_uri(uri: &str) -> DriverResult<Self> {
        Self::parse(strip_scheme(uri))
    }

    /// `host:port` form for the socket layer.
    pub fn to_socket_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl fmt::Display for ServerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

impl Default for ServerAddress {
    fn default() -> Self {
        Self::new("localhost", DEFAULT_PORT)
    }
}

/// Strip any recognized URI scheme prefix.
pub(crate) fn strip_scheme(uri: &str) -> &str {
    for scheme in [
        "bolt+ssc://",
        "bolt+s://",
        "bolt://",
        "tessera+ssc://",
        "tessera+s://",
        "tessera://",
    ] {
        if let Some(rest) = uri.strip_prefix(scheme) {
            return rest;
        }
    }
    uri
}

/// Whether the URI scheme requests encryption.
pub(crate) fn uri_encrypted(uri: &str) -> bool {
    uri.contains("+s://") || uri.contains("+ssc://")
}

/// Driver-wide configuration.
#[derive(Clone)]
pub struct DriverConfig {
    /// Initial server address
    pub address: ServerAddress,
    /// Authentication token
    pub auth: AuthToken,
    /// Whether connections are TLS-encrypted
    pub encrypted: bool,
    /// Server-certificate validation strategy
    pub trust_strategy: TrustStrategy,
    /// Client-certificate source for mutual TLS
    pub certificate_supplier: Option<Arc<dyn CertificateSupplier>>,
    /// Per-server cap on live connections
    pub max_connection_pool_size: usize,
    /// How long an acquire may wait on a full pool
    pub connection_acquisition_timeout: Duration,
    /// TCP connect + handshake deadline
    pub connection_timeout: Duration,
    /// Connections older than this are not reused
    pub max_connection_lifetime: Duration,
    /// Idle connections older than this are closed on next observation
    pub max_idle_time: Duration,
    /// Deadline for managed-transaction retries
    pub max_transaction_retry_time: Duration,
    /// User agent reported in HELLO
    pub user_agent: String,
    /// Records pulled per batch
    pub fetch_size: usize,
}

impl DriverConfig {
    /// Configuration for a URI and auth token, with defaults elsewhere.
    pub fn new(uri: &str, auth: AuthToken) -> DriverResult<Self> {
        Ok(Self {
            address: ServerAddress::from_uri(uri)?,
            auth,
            encrypted: uri_encrypted(uri),
            ..Self::default()
        })
    }

    /// Start building a configuration.
    pub fn builder(uri: &str, auth: AuthToken) -> DriverResult<DriverConfigBuilder> {
        Ok(DriverConfigBuilder { config: Self::new(uri, auth)? })
    }
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            address: ServerAddress::default(),
            auth: AuthToken::default(),
            encrypted: false,
            trust_strategy: TrustStrategy::default(),
            certificate_supplier: None,
            max_connection_pool_size: 100,
            connection_acquisition_timeout: Duration::from_secs(60),
            connection_timeout: Duration::from_secs(30),
            max_connection_lifetime: Duration::from_secs(3600),
            max_idle_time: Duration::from_secs(300),
            max_transaction_retry_time: Duration::from_secs(30),
            user_agent: format!("Tessera-Driver/{}", env!("CARGO_PKG_VERSION")),
            fetch_size: 1000,
        }
    }
}

impl fmt::Debug for DriverConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DriverConfig")
            .field("address", &self.address)
            .field("encrypted", &self.encrypted)
            .field("max_connection_pool_size", &self.max_connection_pool_size)
            .field("user_agent", &self.user_agent)
            .field("fetch_size", &self.fetch_size)
            .finish_non_exhaustive()
    }
}

/// Builder over [`DriverConfig`].
pub struct DriverConfigBuilder {
    config: DriverConfig,
}

impl DriverConfigBuilder {
    /// Force encryption on or off, overriding the URI scheme.
    pub fn with_encrypted(mut self, encrypted: bool) -> Self {
        self.config.encrypted = encrypted;
        self
    }

    /// Server-certificate validation strategy.
    pub fn with_trust_strategy(mut self, strategy: TrustStrategy) -> Self {
        self.config.trust_strategy = strategy;
        self
    }

    /// Client-certificate source for mutual TLS.
    pub fn with_certificate_supplier(mut self, supplier: Arc<dyn CertificateSupplier>) -> Self {
        self.config.certificate_supplier = Some(supplier);
        self
    }

    /// Per-server connection cap.
    pub fn with_max_connection_pool_size(mut self, size: usize) -> Self {
        self.config.max_connection_pool_size = size;
        self
    }

    /// Acquisition wait budget.
    pub fn with_connection_acquisition_timeout(mut self, timeout: Duration) -> Self {
        self.config.connection_acquisition_timeout = timeout;
        self
    }

    /// Connect + handshake deadline.
    pub fn with_connection_timeout(mut self, timeout: Duration) -> Self {
        self.config.connection_timeout = timeout;
        self
    }

    /// Maximum reusable connection age.
    pub fn with_max_connection_lifetime(mut self, lifetime: Duration) -> Self {
        self.config.max_connection_lifetime = lifetime;
        self
    }

    /// Maximum idle age before a pooled connection is closed.
    pub fn with_max_idle_time(mut self, idle: Duration) -> Self {
        self.config.max_idle_time = idle;
        self
    }

    /// Managed-transaction retry deadline.
    pub fn with_max_transaction_retry_time(mut self, time: Duration) -> Self {
        self.config.max_transaction_retry_time = time;
        self
    }

    /// User agent reported to the server.
    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.config.user_agent = user_agent.into();
        self
    }

    /// Records pulled per batch.
    pub fn with_fetch_size(mut self, size: usize) -> Self {
        self.config.fetch_size = size;
        self
    }

    /// Finish building.
    pub fn build(self) -> DriverConfig {
        self.config
    }
}
