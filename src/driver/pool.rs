//! Per-server connection pool.
//!
//! Capacity accounting: a checked-out connection holds a forgotten semaphore
//! permit; releasing it (to the idle set or by destruction) adds the permit
//! back. Acquirers therefore block while the pool is at its cap and wake as
//! soon as a connection is released, preferring the just-released connection
//! over creating a new one. Idle-set mutation is the only critical section;
//! connection establishment (TCP, handshake, HELLO) happens outside any
//! lock.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use parking_lot::{Mutex, RwLock};
use tokio::sync::Semaphore;
use tracing::{debug, warn};

use crate::bolt::packstream::Value;

use super::bolt::BoltClient;
use super::config::{AuthToken, DriverConfig, ServerAddress};
use super::error::{DriverError, DriverResult};

/// Pool tunables, derived from the driver configuration.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Cap on simultaneously live connections
    pub max_size: usize,
    /// How long an acquire may wait for a slot
    pub acquisition_timeout: Duration,
    /// TCP connect + handshake + HELLO deadline
    pub connection_timeout: Duration,
    /// Connections older than this are not reused
    pub max_lifetime: Duration,
    /// Idle connections older than this are closed on next observation
    pub max_idle_time: Duration,
    /// User agent for HELLO
    pub user_agent: String,
    /// Credentials for HELLO
    pub auth: AuthToken,
    /// Routing context announced in HELLO, for routed drivers
    pub routing_context: Option<HashMap<String, Value>>,
}

impl PoolConfig {
    /// Derive pool settings from a driver configuration.
    pub fn from_driver(config: &DriverConfig) -> Self {
        Self {
            max_size: config.max_connection_pool_size,
            acquisition_timeout: config.connection_acquisition_timeout,
            connection_timeout: config.connection_timeout,
            max_lifetime: config.max_connection_lifetime,
            max_idle_time: config.max_idle_time,
            user_agent: config.user_agent.clone(),
            auth: config.auth.clone(),
            routing_context: None,
        }
    }
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self::from_driver(&DriverConfig::default())
    }
}

struct IdleEntry {
    client: BoltClient,
    id: u64,
    created_at: Instant,
    idle_since: Instant,
}

/// Counters describing a pool's current and lifetime state.
#[derive(Debug, Clone, Default)]
pub struct PoolMetrics {
    /// Live connections (idle + checked out)
    pub size: usize,
    /// Idle connections
    pub idle: usize,
    /// Checked-out connections
    pub in_use: usize,
    /// Lifetime acquisitions
    pub total_acquisitions: u64,
    /// Lifetime connections created
    pub total_created: u64,
    /// Lifetime connections destroyed
    pub total_closed: u64,
}

/// Pool of connections to one server address.
pub struct ConnectionPool {
    address: ServerAddress,
    config: PoolConfig,
    idle: Mutex<VecDeque<IdleEntry>>,
    /// Permits = free capacity + idle connections.
    slots: Arc<Semaphore>,
    open: RwLock<bool>,
    size: AtomicUsize,
    in_use: AtomicUsize,
    next_id: AtomicU64,
    total_created: AtomicU64,
    total_acquisitions: AtomicU64,
    total_closed: AtomicU64,
}

impl ConnectionPool {
    /// Pool for `address`.
    pub fn new(address: ServerAddress, config: PoolConfig) -> Arc<Self> {
        let slots = Arc::new(Semaphore::new(config.max_size));
        Arc::new(Self {
            address,
            config,
            idle: Mutex::new(VecDeque::new()),
            slots,
            open: RwLock::new(true),
            size: AtomicUsize::new(0),
            in_use: AtomicUsize::new(0),
            next_id: AtomicU64::new(1),
            total_created: AtomicU64::new(0),
            total_acquisitions: AtomicU64::new(0),
            total_closed: AtomicU64::new(0),
        })
    }

    /// Check out a connection: an idle healthy one when available, a new one
    /// while under the cap, otherwise wait until a release frees a slot.
    /// Waiting beyond the acquisition timeout fails with
    /// [`DriverError::PoolExhausted`].
    pub async fn acquire(self: &Arc<Self>) -> DriverResult<PooledConnection> {
        if !*self.open.read() {
            return Err(DriverError::pool(format!("pool for {} is closed", self.address)));
        }

        let deadline = Instant::now() + self.config.acquisition_timeout;
        let remaining = deadline.saturating_duration_since(Instant::now());
        let permit = match tokio::time::timeout(remaining, self.slots.clone().acquire_owned()).await
        {
            Err(_) => {
                return Err(DriverError::PoolExhausted(format!(
                    "no connection to {} within {:?}",
                    self.address, self.config.acquisition_timeout
                )))
            }
            Ok(Err(_)) => {
                return Err(DriverError::pool(format!("pool for {} is closed", self.address)))
            }
            Ok(Ok(permit)) => permit,
        };

        // Prefer idle connections; each permit covers either one idle
        // connection or one unit of free capacity. A revival that destroys
        // its connection converts the permit into free capacity, so falling
        // through to creation stays within the cap.
        while let Some(entry) = self.pop_idle() {
            if let Some(conn) = self.revive(entry).await {
                permit.forget();
                self.on_handout();
                return Ok(conn);
            }
        }

        let conn = self.create(deadline).await?;
        permit.forget();
        self.on_handout();
        Ok(conn)
    }

    /// Drop every idle connection to this address (routing or security
    /// fault observed elsewhere).
    pub fn invalidate(&self) {
        let drained: Vec<IdleEntry> = self.idle.lock().drain(..).collect();
        for entry in &drained {
            debug!(address = %self.address, id = entry.id, "invalidating idle connection");
        }
        for _ in drained {
            self.on_destroyed(false);
        }
    }

    /// Close the pool: destroy idle connections and fail current and future
    /// acquisitions.
    pub async fn close(&self) {
        *self.open.write() = false;
        self.slots.close();
        let drained: Vec<IdleEntry> = self.idle.lock().drain(..).collect();
        for mut entry in drained {
            entry.client.close().await;
            self.on_destroyed(false);
        }
        debug!(address = %self.address, "pool closed");
    }

    /// Acquire and RESET one connection to prove the server is reachable.
    pub async fn verify_connectivity(self: &Arc<Self>) -> DriverResult<()> {
        let mut conn = self.acquire().await?;
        let outcome = conn.client_mut().reset().await;
        match outcome {
            Ok(()) => {
                conn.release();
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// The address this pool serves.
    pub fn address(&self) -> &ServerAddress {
        &self.address
    }

    /// Current and lifetime counters.
    pub fn metrics(&self) -> PoolMetrics {
        PoolMetrics {
            size: self.size.load(Ordering::Relaxed),
            idle: self.idle.lock().len(),
            in_use: self.in_use.load(Ordering::Relaxed),
            total_acquisitions: self.total_acquisitions.load(Ordering::Relaxed),
            total_created: self.total_created.load(Ordering::Relaxed),
            total_closed: self.total_closed.load(Ordering::Relaxed),
        }
    }

    /// Live connection count.
    pub fn size(&self) -> usize {
        self.size.load(Ordering::Relaxed)
    }

    /// Idle connection count.
    pub fn idle_count(&self) -> usize {
        self.idle.lock().len()
    }

    /// Checked-out connection count.
    pub fn in_use_count(&self) -> usize {
        self.in_use.load(Ordering::Relaxed)
    }

    fn pop_idle(&self) -> Option<IdleEntry> {
        self.idle.lock().pop_front()
    }

    /// Validate an idle connection and clear any pending failure state.
    /// Returns `None` when the connection had to be destroyed.
    async fn revive(self: &Arc<Self>, mut entry: IdleEntry) -> Option<PooledConnection> {
        let too_old = entry.created_at.elapsed() > self.config.max_lifetime;
        let idle_expired = entry.idle_since.elapsed() > self.config.max_idle_time;
        if too_old || idle_expired || !entry.client.is_healthy() {
            debug!(
                address = %self.address,
                id = entry.id,
                too_old,
                idle_expired,
                "retiring idle connection"
            );
            self.on_destroyed(false);
            return None;
        }

        // Defensive RESET for a connection released while in failure
        // recovery; the caller contract was already violated, the pool
        // repairs it before reuse.
        if entry.client.needs_reset() {
            if let Err(e) = entry.client.reset().await {
                warn!(address = %self.address, id = entry.id, error = %e, "reset on reuse failed");
                self.on_destroyed(false);
                return None;
            }
        }

        Some(PooledConnection::new(entry.id, entry.created_at, entry.client, Arc::downgrade(self)))
    }

    async fn create(self: &Arc<Self>, deadline: Instant) -> DriverResult<PooledConnection> {
        let remaining = deadline
            .saturating_duration_since(Instant::now())
            .min(self.config.connection_timeout);
        let address = self.address.to_socket_addr();

        let established = tokio::time::timeout(remaining, async {
            let mut client = BoltClient::connect(&address).await?;
            client
                .hello(
                    &self.config.user_agent,
                    self.config.auth.to_wire_map(),
                    self.config.routing_context.clone(),
                )
                .await?;
            Ok::<BoltClient, DriverError>(client)
        })
        .await
        .map_err(|_| {
            DriverError::timeout(format!("connecting to {} took too long", self.address))
        })??;

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.size.fetch_add(1, Ordering::Relaxed);
        self.total_created.fetch_add(1, Ordering::Relaxed);
        debug!(address = %self.address, id, "connection established");

        Ok(PooledConnection::new(id, Instant::now(), established, Arc::downgrade(self)))
    }

    fn on_handout(&self) {
        self.in_use.fetch_add(1, Ordering::Relaxed);
        self.total_acquisitions.fetch_add(1, Ordering::Relaxed);
    }

    fn on_destroyed(&self, was_checked_out: bool) {
        self.size.fetch_sub(1, Ordering::Relaxed);
        self.total_closed.fetch_add(1, Ordering::Relaxed);
        if was_checked_out {
            self.in_use.fetch_sub(1, Ordering::Relaxed);
            self.slots.add_permits(1);
        }
    }

    fn take_back(&self, id: u64, created_at: Instant, client: BoltClient) {
        self.in_use.fetch_sub(1, Ordering::Relaxed);

        let healthy = client.is_healthy()
            && created_at.elapsed() <= self.config.max_lifetime
            && *self.open.read();

        if healthy {
            self.idle.lock().push_back(IdleEntry {
                client,
                id,
                created_at,
                idle_since: Instant::now(),
            });
        } else {
            self.size.fetch_sub(1, Ordering::Relaxed);
            self.total_closed.fetch_add(1, Ordering::Relaxed);
            debug!(address = %self.address, id, "destroying released connection");
        }
        // Either way a slot opened: the idle connection is claimable, or
        // capacity was freed.
        self.slots.add_permits(1);
    }
}

impl std::fmt::Debug for ConnectionPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionPool")
            .field("address", &self.address)
            .field("size", &self.size())
            .field("idle", &self.idle_count())
            .field("in_use", &self.in_use_count())
            .finish()
    }
}

/// A checked-out connection.
///
/// Exclusively owned until [`release`](Self::release); dropping it without
/// releasing destroys the connection (a checkout abandoned mid-exchange
/// cannot be trusted).
pub struct PooledConnection {
    id: u64,
    created_at: Instant,
    client: Option<BoltClient>,
    pool: Weak<ConnectionPool>,
}

impl PooledConnection {
    fn new(id: u64, created_at: Instant, client: BoltClient, pool: Weak<ConnectionPool>) -> Self {
        Self { id, created_at, client: Some(client), pool }
    }

    /// Stable id for logs.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// The protocol client.
    pub fn client_mut(&mut self) -> &mut BoltClient {
        self.client.as_mut().expect("connection present until release")
    }

    /// Read-only protocol client.
    pub fn client(&self) -> &BoltClient {
        self.client.as_ref().expect("connection present until release")
    }

    /// Mark the connection defunct so it cannot be re-pooled.
    pub fn mark_defunct(&mut self) {
        if let Some(client) = self.client.as_mut() {
            client.mark_defunct();
        }
    }

    /// Hand the connection back to its pool. Healthy connections join the
    /// idle set; defunct or expired ones are destroyed.
    pub fn release(mut self) {
        if let (Some(client), Some(pool)) = (self.client.take(), self.pool.upgrade()) {
            pool.take_back(self.id, self.created_at, client);
        }
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        // Not released: the checkout died mid-flight (panic, cancellation,
        // abandoned cursor). Destroy rather than re-pool.
        if self.client.take().is_some() {
            if let Some(pool) = self.pool.upgrade() {
                pool.on_destroyed(true);
            }
        }
    }
}

impl std::fmt::Debug for PooledConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledConnection")
            .field("id", &self.id)
            .field("age", &self.created_at.elapsed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bolt::message::FailureMessage;
    use crate::bolt::message::Run;
    use crate::driver::testing::ScriptedServer;

    fn pool_for(server: &ScriptedServer, max_size: usize) -> Arc<ConnectionPool> {
        let address = ServerAddress::parse(&server.address()).unwrap();
        let config = PoolConfig {
            max_size,
            acquisition_timeout: Duration::from_millis(500),
            ..PoolConfig::default()
        };
        ConnectionPool::new(address, config)
    }

    #[tokio::test]
    async fn acquire_creates_then_reuses() {
        let server = ScriptedServer::spawn().await;
        let pool = pool_for(&server, 4);

        let conn = pool.acquire().await.unwrap();
        assert_eq!(pool.size(), 1);
        assert_eq!(pool.in_use_count(), 1);
        let first_id = conn.id();
        conn.release();

        assert_eq!(pool.idle_count(), 1);
        let conn = pool.acquire().await.unwrap();
        assert_eq!(conn.id(), first_id);
        assert_eq!(pool.size(), 1);
        assert_eq!(server.connections_accepted(), 1);
        conn.release();
    }

    #[tokio::test]
    async fn acquire_blocks_at_cap_and_takes_the_released_connection() {
        let server = ScriptedServer::spawn().await;
        let pool = pool_for(&server, 1);

        let held = pool.acquire().await.unwrap();
        let held_id = held.id();

        let waiter = {
            let pool = pool.clone();
            tokio::spawn(async move {
                let conn = pool.acquire().await.unwrap();
                let id = conn.id();
                conn.release();
                id
            })
        };

        // Give the waiter time to block on the full pool.
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!waiter.is_finished());

        held.release();
        let reused_id = waiter.await.unwrap();

        assert_eq!(reused_id, held_id);
        assert_eq!(server.connections_accepted(), 1);
        assert_eq!(pool.metrics().total_created, 1);
    }

    #[tokio::test]
    async fn exhausted_pool_times_out() {
        let server = ScriptedServer::spawn().await;
        let pool = pool_for(&server, 1);

        let _held = pool.acquire().await.unwrap();
        let err = pool.acquire().await.unwrap_err();
        assert!(matches!(err, DriverError::PoolExhausted(_)));
    }

    #[tokio::test]
    async fn dropped_checkout_is_destroyed_not_reused() {
        let server = ScriptedServer::spawn().await;
        let pool = pool_for(&server, 2);

        let conn = pool.acquire().await.unwrap();
        drop(conn);
        assert_eq!(pool.size(), 0);
        assert_eq!(pool.idle_count(), 0);

        let conn = pool.acquire().await.unwrap();
        assert_eq!(server.connections_accepted(), 2);
        conn.release();
    }

    #[tokio::test]
    async fn release_with_pending_failure_resets_before_reuse() {
        let server = ScriptedServer::builder()
            .fail_run(FailureMessage::new(
                "Neo.ClientError.Statement.SyntaxError",
                "boom",
            ))
            .spawn_configured()
            .await;
        let pool = pool_for(&server, 2);

        let mut conn = pool.acquire().await.unwrap();
        let err = conn.client_mut().run(Run::new("x"), 100).await.unwrap_err();
        assert!(matches!(err, DriverError::Server(_)));
        assert!(conn.client().needs_reset());
        conn.release();

        // The pool repairs the contract violation before handing it out.
        let conn = pool.acquire().await.unwrap();
        assert!(!conn.client().needs_reset());
        assert_eq!(server.connections_accepted(), 1);
        conn.release();
    }

    #[tokio::test]
    async fn defunct_connections_are_not_repooled() {
        let server = ScriptedServer::spawn().await;
        let pool = pool_for(&server, 2);

        let mut conn = pool.acquire().await.unwrap();
        conn.mark_defunct();
        conn.release();

        assert_eq!(pool.idle_count(), 0);
        assert_eq!(pool.size(), 0);
    }

    #[tokio::test]
    async fn idle_expiry_retires_connections_on_next_observation() {
        let server = ScriptedServer::spawn().await;
        let address = ServerAddress::parse(&server.address()).unwrap();
        let config = PoolConfig {
            max_size: 2,
            acquisition_timeout: Duration::from_millis(500),
            max_idle_time: Duration::from_millis(10),
            ..PoolConfig::default()
        };
        let pool = ConnectionPool::new(address, config);

        let conn = pool.acquire().await.unwrap();
        conn.release();
        tokio::time::sleep(Duration::from_millis(30)).await;

        let conn = pool.acquire().await.unwrap();
        assert_eq!(server.connections_accepted(), 2);
        conn.release();
    }

    #[tokio::test]
    async fn invalidate_drops_idle_connections() {
        let server = ScriptedServer::spawn().await;
        let pool = pool_for(&server, 4);

        let a = pool.acquire().await.unwrap();
        let b = pool.acquire().await.unwrap();
        a.release();
        b.release();
        assert_eq!(pool.idle_count(), 2);

        pool.invalidate();
        assert_eq!(pool.idle_count(), 0);
        assert_eq!(pool.size(), 0);
    }

    #[tokio::test]
    async fn closed_pool_fails_acquisition() {
        let server = ScriptedServer::spawn().await;
        let pool = pool_for(&server, 2);

        let conn = pool.acquire().await.unwrap();
        conn.release();
        pool.close().await;

        assert_eq!(pool.idle_count(), 0);
        let err = pool.acquire().await.unwrap_err();
        assert!(matches!(err, DriverError::Pool(_)));
    }

    #[tokio::test]
    async fn verify_connectivity_round_trips_a_reset() {
        let server = ScriptedServer::spawn().await;
        let pool = pool_for(&server, 2);
        pool.verify_connectivity().await.unwrap();
        assert_eq!(pool.idle_count(), 1);
    }

    #[tokio::test]
    async fn metrics_track_lifecycle() {
        let server = ScriptedServer::spawn().await;
        let pool = pool_for(&server, 4);

        let conn = pool.acquire().await.unwrap();
        let m = pool.metrics();
        assert_eq!(m.size, 1);
        assert_eq!(m.in_use, 1);
        assert_eq!(m.total_created, 1);
        assert_eq!(m.total_acquisitions, 1);

        conn.release();
        let m = pool.metrics();
        assert_eq!(m.in_use, 0);
        assert_eq!(m.idle, 1);
    }
}
