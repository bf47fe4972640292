//! Direct (single-server) driver.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use crate::bolt::message::AccessMode;

use super::config::{AuthToken, DriverConfig, ServerAddress};
use super::error::{DriverError, DriverResult};
use super::pool::{ConnectionPool, PoolConfig, PoolMetrics, PooledConnection};
use super::routing::is_routing_uri;
use super::session::{ConnectionSource, Session, SessionConfig};

struct DirectSource {
    pool: Arc<ConnectionPool>,
}

#[async_trait]
impl ConnectionSource for DirectSource {
    async fn acquire(
        &self,
        _database: Option<&str>,
        _mode: AccessMode,
    ) -> DriverResult<PooledConnection> {
        self.pool.acquire().await
    }

    fn handle_server_failure(
        &self,
        address: &ServerAddress,
        _database: Option<&str>,
        error: &DriverError,
    ) {
        // One server only: connectivity loss makes every idle connection
        // suspect.
        debug!(server = %address, error = %error, "dropping idle connections");
        self.pool.invalidate();
    }
}

/// Driver for `bolt://` URIs: one server, one pool.
pub struct Driver {
    config: DriverConfig,
    source: Arc<DirectSource>,
}

impl Driver {
    /// Driver for a single-server URI.
    pub fn new(uri: &str, auth: AuthToken) -> DriverResult<Self> {
        if is_routing_uri(uri) {
            return Err(DriverError::configuration(
                "tessera:// URIs route across a cluster; use RoutingDriver",
            ));
        }
        Self::with_config(DriverConfig::new(uri, auth)?)
    }

    /// Driver over an explicit configuration.
    pub fn with_config(config: DriverConfig) -> DriverResult<Self> {
        let pool = ConnectionPool::new(config.address.clone(), PoolConfig::from_driver(&config));
        Ok(Self {
            config,
            source: Arc::new(DirectSource { pool }),
        })
    }

    /// Open a session.
    pub fn session(&self, config: SessionConfig) -> Session {
        Session::new(
            self.source.clone(),
            config,
            self.config.fetch_size,
            self.config.max_transaction_retry_time,
        )
    }

    /// Session with defaults.
    pub fn default_session(&self) -> Session {
        self.session(SessionConfig::default())
    }

    /// The driver configuration.
    pub fn config(&self) -> &DriverConfig {
        &self.config
    }

    /// Prove the server is reachable and credentials work.
    pub async fn verify_connectivity(&self) -> DriverResult<()> {
        self.source.pool.verify_connectivity().await
    }

    /// Close the pool; sessions keep working only until they need a new
    /// connection, which then fails terminally.
    pub async fn close(&self) {
        self.source.pool.close().await;
    }

    /// Pool counters.
    pub fn metrics(&self) -> PoolMetrics {
        self.source.pool.metrics()
    }
}

impl std::fmt::Debug for Driver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Driver")
            .field("address", &self.config.address)
            .finish()
    }
}
