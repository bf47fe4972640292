//! Cluster-aware driver: routed server selection over cached tables.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use tracing::{debug, warn};

use crate::bolt::message::{AccessMode, Route, Run};
use crate::bolt::packstream::Value;

use super::super::config::{AuthToken, DriverConfig, ServerAddress};
use super::super::error::{DriverError, DriverResult};
use super::super::pool::{ConnectionPool, PoolConfig, PooledConnection};
use super::super::session::{ConnectionSource, Session, SessionConfig};
use super::table::RoutingTable;

/// Whether a URI selects the routing driver.
pub fn is_routing_uri(uri: &str) -> bool {
    uri.starts_with("tessera://")
        || uri.starts_with("tessera+s://")
        || uri.starts_with("tessera+ssc://")
}

/// Parse the comma-separated router list of a routing URI.
pub fn parse_routing_uri(uri: &str) -> DriverResult<Vec<ServerAddress>> {
    let rest = super::super::config::strip_scheme(uri);
    let mut routers = Vec::new();
    for part in rest.split(',') {
        let part = part.trim();
        if part.is_empty() {
            continue;
        }
        routers.push(ServerAddress::parse(part)?);
    }
    if routers.is_empty() {
        return Err(DriverError::configuration(format!("no routers in URI {:?}", uri)));
    }
    Ok(routers)
}

/// Key used for the default database's table.
const DEFAULT_DB_KEY: &str = "";

/// Routing discovery for servers predating the ROUTE message (Bolt < 4.3):
/// a plain Run+Pull exchange against a fixed procedure.
const ROUTING_PROCEDURE: &str = "CALL dbms.routing.getRoutingTable($context, $database)";

/// Turn the routing procedure's single record back into the ROUTE metadata
/// shape so both discovery paths share one parser.
fn routing_record_to_metadata(
    keys: &[String],
    values: &[Value],
) -> DriverResult<HashMap<String, Value>> {
    let mut metadata = HashMap::new();
    for (key, value) in keys.iter().zip(values) {
        metadata.insert(key.clone(), value.clone());
    }
    if !metadata.contains_key("ttl") || !metadata.contains_key("servers") {
        return Err(DriverError::protocol(
            "routing procedure record is missing ttl or servers",
        ));
    }
    Ok(metadata)
}

/// Aggregated pool counters for a routing driver.
#[derive(Debug, Clone, Default)]
pub struct RoutingDriverMetrics {
    /// Per-server pools created so far
    pub pool_count: usize,
    /// Live connections across all pools
    pub total_size: usize,
    /// Idle connections across all pools
    pub total_idle: usize,
    /// Checked-out connections across all pools
    pub total_in_use: usize,
    /// Cached routing tables
    pub routing_table_count: usize,
}

pub(crate) struct RoutingCore {
    initial_routers: Vec<ServerAddress>,
    config: DriverConfig,
    routing_context: HashMap<String, Value>,
    tables: RwLock<HashMap<String, Arc<RoutingTable>>>,
    pools: RwLock<HashMap<ServerAddress, Arc<ConnectionPool>>>,
    open: AtomicBool,
    /// Single-flight gate so concurrent sessions trigger one refresh.
    refresh_gate: tokio::sync::Mutex<()>,
}

impl RoutingCore {
    fn table_key(database: Option<&str>) -> String {
        database.unwrap_or(DEFAULT_DB_KEY).to_string()
    }

    /// Serve a fresh-enough table, refreshing through a router when the
    /// cached one is absent or past its TTL.
    async fn ensure_fresh_table(&self, database: Option<&str>) -> DriverResult<Arc<RoutingTable>> {
        let key = Self::table_key(database);

        if let Some(table) = self.tables.read().get(&key) {
            if !table.is_expired() {
                return Ok(table.clone());
            }
        }

        let _gate = self.refresh_gate.lock().await;
        // Another task may have refreshed while we waited.
        if let Some(table) = self.tables.read().get(&key) {
            if !table.is_expired() {
                return Ok(table.clone());
            }
        }

        let table = Arc::new(self.fetch_table(database).await?);
        debug!(
            database = %key,
            readers = table.readers().len(),
            writers = table.writers().len(),
            ttl = ?table.ttl(),
            "routing table refreshed"
        );
        self.tables.write().insert(key, table.clone());
        Ok(table)
    }

    /// Run the routing procedure against each known router until one
    /// answers with a usable table.
    async fn fetch_table(&self, database: Option<&str>) -> DriverResult<RoutingTable> {
        let mut candidates: Vec<ServerAddress> = Vec::new();
        if let Some(existing) = self.tables.read().get(&Self::table_key(database)) {
            candidates.extend(existing.routers().iter().cloned());
        }
        for router in &self.initial_routers {
            if !candidates.contains(router) {
                candidates.push(router.clone());
            }
        }

        let mut last_error: Option<DriverError> = None;
        for router in candidates {
            match self.route_via(&router, database).await {
                Ok(table) => return Ok(table),
                Err(e) => {
                    warn!(router = %router, error = %e, "routing refresh failed, trying next");
                    last_error = Some(e);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| {
            DriverError::service_unavailable("no routers known for routing refresh")
        }))
    }

    async fn route_via(
        &self,
        router: &ServerAddress,
        database: Option<&str>,
    ) -> DriverResult<RoutingTable> {
        let pool = self.pool_for(router)?;
        let mut conn = pool.acquire().await?;

        let supports_route = conn
            .client()
            .version()
            .map(|v| v.supports_route())
            .unwrap_or(true);

        let outcome = if supports_route {
            let mut route = Route::new().with_routing(self.routing_context.clone());
            if let Some(db) = database {
                route = route.with_database(db);
            }
            conn.client_mut().route(route).await
        } else {
            self.route_via_procedure(&mut conn, database).await
        };

        conn.release();
        let metadata = outcome?;
        RoutingTable::from_route_metadata(database.unwrap_or(DEFAULT_DB_KEY), &metadata)
    }

    /// Pre-4.3 discovery: run the routing procedure and read its single
    /// record of `{ttl, servers}`.
    async fn route_via_procedure(
        &self,
        conn: &mut PooledConnection,
        database: Option<&str>,
    ) -> DriverResult<HashMap<String, Value>> {
        let mut parameters = HashMap::new();
        parameters.insert(
            "context".to_string(),
            Value::Map(self.routing_context.clone()),
        );
        parameters.insert(
            "database".to_string(),
            database.map(Value::from).unwrap_or(Value::Null),
        );

        let run = Run::new(ROUTING_PROCEDURE).with_parameters(parameters);
        let (header, batch) = conn.client_mut().run(run, -1).await?;
        let record = batch
            .records
            .first()
            .ok_or_else(|| DriverError::protocol("routing procedure returned no record"))?;
        routing_record_to_metadata(&header.keys, record)
    }

    fn pool_for(&self, address: &ServerAddress) -> DriverResult<Arc<ConnectionPool>> {
        if !self.open.load(Ordering::Acquire) {
            return Err(DriverError::pool("driver is closed"));
        }
        if let Some(pool) = self.pools.read().get(address) {
            return Ok(pool.clone());
        }

        let mut pools = self.pools.write();
        if let Some(pool) = pools.get(address) {
            return Ok(pool.clone());
        }
        let mut config = PoolConfig::from_driver(&self.config);
        config.routing_context = Some(self.routing_context.clone());
        let pool = ConnectionPool::new(address.clone(), config);
        pools.insert(address.clone(), pool.clone());
        Ok(pool)
    }

    async fn close(&self) {
        self.open.store(false, Ordering::Release);
        let pools: Vec<Arc<ConnectionPool>> = self.pools.read().values().cloned().collect();
        for pool in pools {
            pool.close().await;
        }
        self.tables.write().clear();
    }
}

#[async_trait]
impl ConnectionSource for RoutingCore {
    async fn acquire(
        &self,
        database: Option<&str>,
        mode: AccessMode,
    ) -> DriverResult<PooledConnection> {
        if !self.open.load(Ordering::Acquire) {
            return Err(DriverError::pool("driver is closed"));
        }

        let table = self.ensure_fresh_table(database).await?;
        let address = match mode {
            AccessMode::Read => table.next_reader(),
            AccessMode::Write => table.next_writer(),
        }
        .ok_or_else(|| {
            DriverError::service_unavailable(format!("no {:?} servers available", mode))
        })?;

        let pool = self.pool_for(&address)?;
        pool.acquire().await
    }

    fn handle_server_failure(
        &self,
        address: &ServerAddress,
        database: Option<&str>,
        error: &DriverError,
    ) {
        debug!(server = %address, error = %error, "invalidating routing state");
        self.tables.write().remove(&Self::table_key(database));
        if let Some(pool) = self.pools.read().get(address) {
            pool.invalidate();
        }
    }
}

/// Driver for `tessera://` URIs: selects readers and writers through the
/// cluster's routing tables.
pub struct RoutingDriver {
    core: Arc<RoutingCore>,
}

impl RoutingDriver {
    /// Driver for a routing URI (`tessera://host1:port1,host2:port2,...`).
    pub fn new(uri: &str, auth: AuthToken) -> DriverResult<Self> {
        let routers = parse_routing_uri(uri)?;
        let mut config = DriverConfig::new(uri, auth)?;
        config.address = routers[0].clone();
        Ok(Self::assemble(routers, config))
    }

    /// Driver over an explicit router list.
    pub fn with_routers(routers: Vec<ServerAddress>, config: DriverConfig) -> DriverResult<Self> {
        if routers.is_empty() {
            return Err(DriverError::configuration("at least one router is required"));
        }
        Ok(Self::assemble(routers, config))
    }

    fn assemble(routers: Vec<ServerAddress>, config: DriverConfig) -> Self {
        let mut routing_context = HashMap::new();
        routing_context.insert(
            "address".to_string(),
            Value::from(routers[0].to_socket_addr().as_str()),
        );
        Self {
            core: Arc::new(RoutingCore {
                initial_routers: routers,
                config,
                routing_context,
                tables: RwLock::new(HashMap::new()),
                pools: RwLock::new(HashMap::new()),
                open: AtomicBool::new(true),
                refresh_gate: tokio::sync::Mutex::new(()),
            }),
        }
    }

    /// Open a session.
    pub fn session(&self, config: SessionConfig) -> Session {
        Session::new(
            self.core.clone(),
            config,
            self.core.config.fetch_size,
            self.core.config.max_transaction_retry_time,
        )
    }

    /// Session with defaults.
    pub fn default_session(&self) -> Session {
        self.session(SessionConfig::default())
    }

    /// Prove at least one router is reachable.
    pub async fn verify_connectivity(&self) -> DriverResult<()> {
        let mut last_error = None;
        for router in &self.core.initial_routers {
            let pool = self.core.pool_for(router)?;
            match pool.verify_connectivity().await {
                Ok(()) => return Ok(()),
                Err(e) => last_error = Some(e),
            }
        }
        Err(last_error
            .unwrap_or_else(|| DriverError::service_unavailable("no routers configured")))
    }

    /// The cached table for a database, if one is held.
    pub fn routing_table(&self, database: Option<&str>) -> Option<Arc<RoutingTable>> {
        self.core
            .tables
            .read()
            .get(&RoutingCore::table_key(database))
            .cloned()
    }

    /// Initial router list.
    pub fn initial_routers(&self) -> &[ServerAddress] {
        &self.core.initial_routers
    }

    /// Close every pool; further sessions fail to acquire connections.
    pub async fn close(&self) {
        self.core.close().await;
    }

    /// Aggregated pool counters.
    pub fn metrics(&self) -> RoutingDriverMetrics {
        let pools = self.core.pools.read();
        let mut metrics = RoutingDriverMetrics {
            pool_count: pools.len(),
            routing_table_count: self.core.tables.read().len(),
            ..Default::default()
        };
        for pool in pools.values() {
            let m = pool.metrics();
            metrics.total_size += m.size;
            metrics.total_idle += m.idle;
            metrics.total_in_use += m.in_use;
        }
        metrics
    }
}

impl std::fmt::Debug for RoutingDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RoutingDriver")
            .field("initial_routers", &self.core.initial_routers)
            .field("open", &self.core.open.load(Ordering::Relaxed))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::testing::ScriptedServer;

    #[test]
    fn routing_uri_detection() {
        assert!(is_routing_uri("tessera://localhost:7687"));
        assert!(is_routing_uri("tessera+s://localhost"));
        assert!(is_routing_uri("tessera+ssc://localhost"));
        assert!(!is_routing_uri("bolt://localhost:7687"));
    }

    #[test]
    fn routing_uri_parsing() {
        let routers = parse_routing_uri("tessera://a:7687,b:7688,c").unwrap();
        assert_eq!(routers.len(), 3);
        assert_eq!(routers[1].port, 7688);
        assert_eq!(routers[2].port, 7687);

        assert!(parse_routing_uri("tessera://").is_err());
    }

    #[test]
    fn routing_procedure_record_converts_to_metadata() {
        let keys = vec!["ttl".to_string(), "servers".to_string()];
        let values = vec![Value::Integer(300), Value::List(vec![])];
        let metadata = routing_record_to_metadata(&keys, &values).unwrap();
        assert_eq!(metadata.get("ttl").unwrap().as_int(), Some(300));

        let err =
            routing_record_to_metadata(&["ttl".to_string()], &[Value::Integer(1)]).unwrap_err();
        assert!(matches!(err, DriverError::Protocol(_)));
    }

    #[test]
    fn empty_router_list_rejected() {
        let config = DriverConfig::default();
        assert!(RoutingDriver::with_routers(vec![], config).is_err());
    }

    async fn routed_driver_for(server: &ScriptedServer) -> RoutingDriver {
        let address = ServerAddress::parse(&server.address()).unwrap();
        let mut config = DriverConfig::default();
        config.address = address.clone();
        RoutingDriver::with_routers(vec![address], config).unwrap()
    }

    #[tokio::test]
    async fn refresh_populates_table_once_and_selects_round_robin() {
        // The scripted server routes everything back to itself so the
        // selected servers are reachable.
        let server = ScriptedServer::builder()
            .routing_table(300, vec!["w1:7687", "w2:7687", "w3:7687"], vec!["r1:7687"], vec!["x1:7687"])
            .spawn_configured()
            .await;
        let driver = routed_driver_for(&server).await;

        assert!(driver.routing_table(None).is_none());
        let table = driver.core.ensure_fresh_table(None).await.unwrap();
        assert_eq!(table.writers().len(), 3);
        assert!(driver.routing_table(None).is_some());

        // Second call serves the cached table without another ROUTE.
        let connections_after_first = server.connections_accepted();
        let _ = driver.core.ensure_fresh_table(None).await.unwrap();
        assert_eq!(server.connections_accepted(), connections_after_first);

        // Round robin over the 3 writers covers each exactly once.
        let mut picked: Vec<String> =
            (0..3).map(|_| table.next_writer().unwrap().to_string()).collect();
        picked.sort();
        assert_eq!(picked, vec!["w1:7687", "w2:7687", "w3:7687"]);
    }

    #[tokio::test]
    async fn expired_table_triggers_exactly_one_refresh() {
        let server = ScriptedServer::builder()
            .routing_table(0, vec!["w:7687"], vec!["r:7687"], vec!["x:7687"])
            .spawn_configured()
            .await;
        let driver = routed_driver_for(&server).await;

        // ttl=0: the first ensure refreshes, and because the parsed table is
        // instantly expired, the next ensure refreshes exactly once more.
        driver.core.ensure_fresh_table(None).await.unwrap();
        let after_first = server.connections_accepted();
        driver.core.ensure_fresh_table(None).await.unwrap();
        let after_second = server.connections_accepted();
        // The router connection is pooled, so refreshes reuse it; accepted
        // connections must not grow.
        assert_eq!(after_first, after_second);
    }

    #[tokio::test]
    async fn refresh_failure_surfaces_service_unavailable() {
        // Server without a routing table script: ROUTE answers FAILURE.
        let server = ScriptedServer::spawn().await;
        let driver = routed_driver_for(&server).await;

        let err = driver.core.ensure_fresh_table(None).await.unwrap_err();
        assert!(matches!(err, DriverError::Server(_)));
    }

    #[tokio::test]
    async fn failure_handling_invalidates_table_and_idle_connections() {
        let server = ScriptedServer::builder()
            .routing_table(300, vec!["w:7687"], vec!["r:7687"], vec!["x:7687"])
            .spawn_configured()
            .await;
        let driver = routed_driver_for(&server).await;
        driver.core.ensure_fresh_table(None).await.unwrap();
        assert!(driver.routing_table(None).is_some());

        let router = driver.initial_routers()[0].clone();
        driver.core.handle_server_failure(
            &router,
            None,
            &DriverError::service_unavailable("gone"),
        );
        assert!(driver.routing_table(None).is_none());
    }

    #[tokio::test]
    async fn closed_driver_refuses_acquisition() {
        let server = ScriptedServer::builder()
            .routing_table(300, vec!["w:7687"], vec!["r:7687"], vec!["x:7687"])
            .spawn_configured()
            .await;
        let driver = routed_driver_for(&server).await;
        driver.close().await;

        let err = driver
            .core
            .acquire(None, AccessMode::Write)
            .await
            .unwrap_err();
        assert!(matches!(err, DriverError::Pool(_)));
    }

    #[tokio::test]
    async fn verify_connectivity_reaches_a_router() {
        let server = ScriptedServer::spawn().await;
        let driver = routed_driver_for(&server).await;
        driver.verify_connectivity().await.unwrap();
    }
}
