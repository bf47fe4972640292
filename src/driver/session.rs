//! Sessions: the unit of sequential work.
//!
//! A session runs auto-commit queries and explicit transactions one at a
//! time over connections borrowed from its driver, and chains bookmarks
//! between them for causal consistency. Auto-commit queries and open
//! transactions are mutually exclusive within a session.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;
use tracing::debug;

use crate::bolt::message::{AccessMode, Begin, Run};
use crate::bolt::packstream::Value;

use super::config::ServerAddress;
use super::error::{DriverError, DriverResult, ErrorCategory};
use super::pool::PooledConnection;
use super::record::{BookmarkSlot, ResultCursor};
use super::retry::RetryPolicy;
use super::transaction::{Transaction, TransactionConfig};

/// Where a session borrows connections from.
///
/// A direct driver resolves this to its single pool; a routing driver picks
/// a server by access mode against its routing table first.
#[async_trait]
pub trait ConnectionSource: Send + Sync {
    /// Borrow a connection suitable for `mode` against `database`.
    async fn acquire(
        &self,
        database: Option<&str>,
        mode: AccessMode,
    ) -> DriverResult<PooledConnection>;

    /// Note a failure observed on a connection to `address`, so routed
    /// drivers can invalidate stale cluster state.
    fn handle_server_failure(
        &self,
        address: &ServerAddress,
        database: Option<&str>,
        error: &DriverError,
    );
}

/// Opaque causal-consistency token.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Bookmark {
    value: String,
}

impl Bookmark {
    /// Bookmark from its wire string.
    pub fn new(value: impl Into<String>) -> Self {
        Self { value: value.into() }
    }

    /// The wire string.
    pub fn value(&self) -> &str {
        &self.value
    }
}

impl std::fmt::Display for Bookmark {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.value)
    }
}

impl From<&str> for Bookmark {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for Bookmark {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

/// A query with its parameters.
#[derive(Debug, Clone)]
pub struct Query {
    /// Opaque query text
    pub text: String,
    /// Named parameters
    pub parameters: HashMap<String, Value>,
}

impl Query {
    /// Query with no parameters.
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into(), parameters: HashMap::new() }
    }

    /// Add one parameter.
    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.parameters.insert(key.into(), value.into());
        self
    }

    /// Merge a parameter map.
    pub fn with_params(mut self, params: HashMap<String, Value>) -> Self {
        self.parameters.extend(params);
        self
    }
}

impl From<&str> for Query {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for Query {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

/// Per-session settings.
#[derive(Debug, Clone, Default)]
pub struct SessionConfig {
    /// Database to run against (server default when unset)
    pub database: Option<String>,
    /// Access mode used for auto-commit queries and routed acquisition
    pub default_access_mode: AccessMode,
    /// Bookmarks this session must observe
    pub bookmarks: Vec<Bookmark>,
    /// Per-session fetch-size override
    pub fetch_size: Option<usize>,
}

impl SessionConfig {
    /// Defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Start building a configuration.
    pub fn builder() -> SessionConfigBuilder {
        SessionConfigBuilder::default()
    }
}

/// Builder over [`SessionConfig`].
#[derive(Debug, Default)]
pub struct SessionConfigBuilder {
    config: SessionConfig,
}

impl SessionConfigBuilder {
    /// Target database.
    pub fn with_database(mut self, database: impl Into<String>) -> Self {
        self.config.database = Some(database.into());
        self
    }

    /// Route to readers.
    pub fn with_read_access(mut self) -> Self {
        self.config.default_access_mode = AccessMode::Read;
        self
    }

    /// Route to writers (the default).
    pub fn with_write_access(mut self) -> Self {
        self.config.default_access_mode = AccessMode::Write;
        self
    }

    /// Bookmarks to observe.
    pub fn with_bookmarks(mut self, bookmarks: Vec<Bookmark>) -> Self {
        self.config.bookmarks = bookmarks;
        self
    }

    /// Add one bookmark.
    pub fn with_bookmark(mut self, bookmark: Bookmark) -> Self {
        self.config.bookmarks.push(bookmark);
        self
    }

    /// Fetch-size override.
    pub fn with_fetch_size(mut self, size: usize) -> Self {
        self.config.fetch_size = Some(size);
        self
    }

    /// Finish building.
    pub fn build(self) -> SessionConfig {
        self.config
    }
}

/// RAII marker for the session's single-active-work invariant.
///
/// Held by the open transaction or streaming auto-commit cursor; cleared on
/// drop so the session accepts new work again.
pub(crate) struct ActivityGuard {
    flag: Arc<AtomicBool>,
}

impl ActivityGuard {
    fn try_claim(flag: &Arc<AtomicBool>) -> Option<Self> {
        if flag.swap(true, Ordering::AcqRel) {
            None
        } else {
            Some(Self { flag: flag.clone() })
        }
    }
}

impl Drop for ActivityGuard {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

/// A sequential context for queries and transactions.
pub struct Session {
    source: Arc<dyn ConnectionSource>,
    config: SessionConfig,
    fetch_size: i64,
    retry: RetryPolicy,
    last_bookmark: BookmarkSlot,
    busy: Arc<AtomicBool>,
    open: Arc<AtomicBool>,
}

impl Session {
    /// Session over a connection source. Built by the drivers.
    pub(crate) fn new(
        source: Arc<dyn ConnectionSource>,
        config: SessionConfig,
        default_fetch_size: usize,
        max_retry_time: Duration,
    ) -> Self {
        let fetch_size = config.fetch_size.unwrap_or(default_fetch_size) as i64;
        Self {
            source,
            config,
            fetch_size,
            retry: RetryPolicy::new(max_retry_time),
            last_bookmark: Arc::new(RwLock::new(None)),
            busy: Arc::new(AtomicBool::new(false)),
            open: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Run an auto-commit query, returning a lazily-pulled cursor.
    pub async fn run(
        &self,
        query: impl Into<Query>,
        params: Option<HashMap<String, Value>>,
    ) -> DriverResult<ResultCursor> {
        self.ensure_open()?;
        let guard = self.claim_activity()?;

        let mut query = query.into();
        if let Some(params) = params {
            query = query.with_params(params);
        }

        let mode = self.config.default_access_mode;
        let mut conn = self
            .source
            .acquire(self.config.database.as_deref(), mode)
            .await?;

        let mut run = Run::new(query.text.clone())
            .with_parameters(query.parameters.clone())
            .with_bookmarks(self.current_bookmarks())
            .with_mode(mode);
        if let Some(db) = &self.config.database {
            run = run.with_database(db);
        }

        match conn.client_mut().run(run, self.fetch_size).await {
            Ok((header, batch)) => Ok(ResultCursor::detached(
                header,
                batch,
                self.fetch_size,
                conn,
                self.last_bookmark.clone(),
                guard,
            )),
            Err(e) => {
                self.dispose_failed(conn, &e);
                Err(e)
            }
        }
    }

    /// Open an explicit transaction.
    pub async fn begin_transaction(
        &self,
        config: Option<TransactionConfig>,
    ) -> DriverResult<Transaction> {
        self.begin_with_mode(self.config.default_access_mode, config).await
    }

    /// Run a unit of work in a managed read transaction, retrying transient
    /// failures with backoff until the driver's retry deadline.
    pub async fn read_transaction<T, F>(&self, work: F) -> DriverResult<T>
    where
        F: for<'tx> FnMut(
            &'tx mut Transaction,
        ) -> Pin<Box<dyn Future<Output = DriverResult<T>> + Send + 'tx>>,
    {
        self.execute_with_retry(AccessMode::Read, work).await
    }

    /// Run a unit of work in a managed write transaction, retrying transient
    /// failures with backoff until the driver's retry deadline.
    pub async fn write_transaction<T, F>(&self, work: F) -> DriverResult<T>
    where
        F: for<'tx> FnMut(
            &'tx mut Transaction,
        ) -> Pin<Box<dyn Future<Output = DriverResult<T>> + Send + 'tx>>,
    {
        self.execute_with_retry(AccessMode::Write, work).await
    }

    /// The newest bookmark this session has observed or produced.
    pub fn last_bookmark(&self) -> Option<Bookmark> {
        self.last_bookmark.read().clone().map(Bookmark::new)
    }

    /// All bookmarks the next transaction will wait for.
    pub fn last_bookmarks(&self) -> Vec<Bookmark> {
        let mut bookmarks = self.config.bookmarks.clone();
        if let Some(last) = self.last_bookmark() {
            bookmarks.push(last);
        }
        bookmarks
    }

    /// Close the session; later work fails with a client error.
    pub fn close(&self) {
        self.open.store(false, Ordering::Release);
    }

    /// Session settings.
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    async fn begin_with_mode(
        &self,
        mode: AccessMode,
        config: Option<TransactionConfig>,
    ) -> DriverResult<Transaction> {
        self.ensure_open()?;
        let guard = self.claim_activity()?;
        let config = config.unwrap_or_default();

        let mut conn = self
            .source
            .acquire(self.config.database.as_deref(), mode)
            .await?;

        let mut begin = Begin::new()
            .with_bookmarks(self.current_bookmarks())
            .with_mode(mode)
            .with_metadata(config.metadata.clone());
        if let Some(db) = &self.config.database {
            begin = begin.with_database(db);
        }
        if let Some(timeout) = config.timeout {
            begin = begin.with_timeout(timeout);
        }

        match conn.client_mut().begin(begin).await {
            Ok(()) => Ok(Transaction::started(
                conn,
                guard,
                self.fetch_size,
                self.last_bookmark.clone(),
                self.source.clone(),
                self.config.database.clone(),
            )),
            Err(e) => {
                self.dispose_failed(conn, &e);
                Err(e)
            }
        }
    }

    async fn execute_with_retry<T, F>(&self, mode: AccessMode, mut work: F) -> DriverResult<T>
    where
        F: for<'tx> FnMut(
            &'tx mut Transaction,
        ) -> Pin<Box<dyn Future<Output = DriverResult<T>> + Send + 'tx>>,
    {
        let mut state = self.retry.start();
        loop {
            let attempt = async {
                let mut tx = self.begin_with_mode(mode, None).await?;
                match work(&mut tx).await {
                    Ok(value) => {
                        tx.commit().await?;
                        Ok(value)
                    }
                    Err(e) => {
                        let _ = tx.close().await;
                        Err(e)
                    }
                }
            };

            match attempt.await {
                Ok(value) => return Ok(value),
                Err(e) => match state.next_delay(&e) {
                    Some(delay) => {
                        debug!(error = %e, ?delay, "retrying transaction");
                        tokio::time::sleep(delay).await;
                    }
                    None => return Err(state.give_up(e)),
                },
            }
        }
    }

    /// Release a connection after a failed exchange and surface routing
    /// consequences of the failure.
    fn dispose_failed(&self, conn: PooledConnection, error: &DriverError) {
        let address = ServerAddress::parse(conn.client().address()).ok();
        if matches!(
            error.category(),
            ErrorCategory::ServiceUnavailable | ErrorCategory::SessionExpired
        ) {
            if let Some(address) = &address {
                self.source
                    .handle_server_failure(address, self.config.database.as_deref(), error);
            }
        }
        // The pool sorts healthy-but-failed from defunct on release.
        conn.release();
    }

    fn current_bookmarks(&self) -> Vec<String> {
        let mut bookmarks: Vec<String> = self
            .config
            .bookmarks
            .iter()
            .map(|b| b.value().to_string())
            .collect();
        if let Some(last) = self.last_bookmark.read().clone() {
            bookmarks.push(last);
        }
        bookmarks
    }

    fn claim_activity(&self) -> DriverResult<ActivityGuard> {
        ActivityGuard::try_claim(&self.busy).ok_or_else(|| {
            DriverError::client(
                "another transaction or streaming query is open in this session",
            )
        })
    }

    fn ensure_open(&self) -> DriverResult<()> {
        if self.open.load(Ordering::Acquire) {
            Ok(())
        } else {
            Err(DriverError::client("session is closed"))
        }
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("database", &self.config.database)
            .field("mode", &self.config.default_access_mode)
            .field("open", &self.open.load(Ordering::Relaxed))
            .finish()
    }
}
