//! Explicit transactions.
//!
//! A transaction exclusively owns one pooled connection from BEGIN until it
//! finishes. Outcome can be marked ahead of time with
//! [`success`](Transaction::success)/[`failure`](Transaction::failure) and is
//! applied by [`close`](Transaction::close), which commits when marked
//! successful and rolls back otherwise. That happens exactly once, is
//! idempotent, and sets the finished flag on every exit path. A database
//! error raised by
//! [`run`](Transaction::run) moves the transaction to `Failed` and defers
//! the rollback to `close`.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tracing::warn;

use crate::bolt::message::Run;
use crate::bolt::packstream::Value;

use super::config::ServerAddress;
use super::error::{DriverError, DriverResult, ErrorCategory};
use super::pool::PooledConnection;
use super::record::{BookmarkSlot, ResultCursor, ResultSummary};
use super::session::{ActivityGuard, ConnectionSource, Query};

/// Per-transaction settings.
#[derive(Debug, Clone, Default)]
pub struct TransactionConfig {
    /// Server-side transaction timeout
    pub timeout: Option<Duration>,
    /// Application metadata attached to the transaction
    pub metadata: HashMap<String, Value>,
}

impl TransactionConfig {
    /// Defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Server-side timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Attach one metadata entry.
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

/// Transaction lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    /// Running, outcome not yet marked
    Active,
    /// Running, will commit on close
    MarkedSuccess,
    /// Running, will roll back on close
    MarkedFailed,
    /// A statement failed; no further statements, rollback deferred to close
    Failed,
    /// Committed
    Succeeded,
    /// Rolled back
    RolledBack,
}

impl TransactionState {
    /// Whether the transaction has reached a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::RolledBack)
    }
}

/// An explicit transaction over one exclusively-owned connection.
pub struct Transaction {
    conn: Option<PooledConnection>,
    state: TransactionState,
    finished: bool,
    fetch_size: i64,
    bookmark_slot: BookmarkSlot,
    source: Arc<dyn ConnectionSource>,
    database: Option<String>,
    _guard: ActivityGuard,
}

impl Transaction {
    /// Wrap a connection on which BEGIN already succeeded.
    pub(crate) fn started(
        conn: PooledConnection,
        guard: ActivityGuard,
        fetch_size: i64,
        bookmark_slot: BookmarkSlot,
        source: Arc<dyn ConnectionSource>,
        database: Option<String>,
    ) -> Self {
        Self {
            conn: Some(conn),
            state: TransactionState::Active,
            finished: false,
            fetch_size,
            bookmark_slot,
            source,
            database,
            _guard: guard,
        }
    }

    /// Run a query inside the transaction.
    ///
    /// Fails with a client error, before any wire traffic, when a prior
    /// statement has already failed or the transaction is finished.
    pub async fn run(
        &mut self,
        query: impl Into<Query>,
        params: Option<HashMap<String, Value>>,
    ) -> DriverResult<ResultCursor> {
        self.ensure_runnable()?;

        let mut query = query.into();
        if let Some(params) = params {
            query = query.with_params(params);
        }
        let run = Run::new(query.text).with_parameters(query.parameters);

        let fetch_size = self.fetch_size;
        let conn = self.connection()?;
        match conn.client_mut().run(run, fetch_size).await {
            Ok((header, batch)) => Ok(ResultCursor::attached(header, batch, fetch_size)),
            Err(e) => {
                // The error is re-raised as-is; rollback waits for close.
                self.state = TransactionState::Failed;
                self.note_failure(&e);
                Err(e)
            }
        }
    }

    /// Pull the next batch into a cursor produced by [`run`](Self::run).
    /// Returns the number of records fetched.
    pub async fn fetch_more(&mut self, cursor: &mut ResultCursor) -> DriverResult<usize> {
        self.ensure_runnable()?;
        if !cursor.more_available() {
            return Ok(0);
        }

        let qid = cursor.qid();
        let n = cursor.fetch_size();
        let conn = self.connection()?;
        match conn.client_mut().pull(qid, n).await {
            Ok(batch) => {
                let fetched = batch.records.len();
                cursor.absorb(batch);
                Ok(fetched)
            }
            Err(e) => {
                self.state = TransactionState::Failed;
                self.note_failure(&e);
                Err(e)
            }
        }
    }

    /// Discard a cursor's remaining records, returning the stream summary.
    pub async fn consume(&mut self, mut cursor: ResultCursor) -> DriverResult<ResultSummary> {
        self.ensure_runnable()?;
        if !cursor.more_available() {
            return cursor.consume().await;
        }

        let qid = cursor.qid();
        let conn = self.connection()?;
        match conn.client_mut().discard(qid).await {
            Ok(success) => {
                cursor.absorb(super::bolt::PullBatch {
                    records: Vec::new(),
                    has_more: false,
                    summary: Some(success),
                });
                cursor.consume().await
            }
            Err(e) => {
                self.state = TransactionState::Failed;
                self.note_failure(&e);
                Err(e)
            }
        }
    }

    /// Mark the transaction to commit on close. No wire traffic.
    pub fn success(&mut self) {
        if self.state == TransactionState::Active {
            self.state = TransactionState::MarkedSuccess;
        }
    }

    /// Mark the transaction to roll back on close. No wire traffic.
    pub fn failure(&mut self) {
        if matches!(
            self.state,
            TransactionState::Active | TransactionState::MarkedSuccess
        ) {
            self.state = TransactionState::MarkedFailed;
        }
    }

    /// Apply the marked outcome: commit when marked successful, otherwise
    /// roll back. Runs at most once; repeated calls are no-ops. The
    /// finished flag is set whichever path runs and whether or not it
    /// succeeds.
    pub async fn close(&mut self) -> DriverResult<()> {
        if self.finished {
            return Ok(());
        }

        let outcome = match self.state {
            TransactionState::MarkedSuccess => self.send_commit().await,
            TransactionState::Active | TransactionState::MarkedFailed => {
                self.send_rollback().await
            }
            // A failed transaction sends nothing more; the pool's
            // release-time RESET clears the server side.
            TransactionState::Failed => Ok(()),
            TransactionState::Succeeded | TransactionState::RolledBack => Ok(()),
        };

        self.finish();
        outcome
    }

    /// Commit now. Equivalent to `success()` followed by `close()`.
    pub async fn commit(&mut self) -> DriverResult<()> {
        self.ensure_runnable()?;
        let outcome = self.send_commit().await;
        self.finish();
        outcome
    }

    /// Roll back now.
    pub async fn rollback(&mut self) -> DriverResult<()> {
        if self.finished || self.state.is_terminal() {
            return Ok(());
        }
        let outcome = if self.state == TransactionState::Failed {
            Ok(())
        } else {
            self.send_rollback().await
        };
        self.finish();
        outcome
    }

    /// Current state.
    pub fn state(&self) -> TransactionState {
        self.state
    }

    /// Whether close/commit/rollback has completed.
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Target database.
    pub fn database(&self) -> Option<&str> {
        self.database.as_deref()
    }

    async fn send_commit(&mut self) -> DriverResult<()> {
        let conn = self.connection()?;
        match conn.client_mut().commit().await {
            Ok(bookmark) => {
                if let Some(bookmark) = bookmark {
                    *self.bookmark_slot.write() = Some(bookmark);
                }
                self.state = TransactionState::Succeeded;
                Ok(())
            }
            Err(e) => {
                self.state = TransactionState::Failed;
                self.note_failure(&e);
                Err(e)
            }
        }
    }

    async fn send_rollback(&mut self) -> DriverResult<()> {
        let conn = self.connection()?;
        match conn.client_mut().rollback().await {
            Ok(()) => {
                self.state = TransactionState::RolledBack;
                Ok(())
            }
            Err(e) => {
                self.state = TransactionState::Failed;
                self.note_failure(&e);
                Err(e)
            }
        }
    }

    /// Release the connection and set the finished flag; runs on every
    /// close path exactly once.
    fn finish(&mut self) {
        self.finished = true;
        if let Some(conn) = self.conn.take() {
            conn.release();
        }
    }

    fn note_failure(&self, error: &DriverError) {
        if matches!(
            error.category(),
            ErrorCategory::ServiceUnavailable | ErrorCategory::SessionExpired
        ) {
            if let Some(conn) = &self.conn {
                if let Ok(address) = ServerAddress::parse(conn.client().address()) {
                    self.source
                        .handle_server_failure(&address, self.database.as_deref(), error);
                }
            }
        }
    }

    fn ensure_runnable(&self) -> DriverResult<()> {
        if self.finished {
            return Err(DriverError::client("transaction is closed"));
        }
        match self.state {
            TransactionState::Active
            | TransactionState::MarkedSuccess
            | TransactionState::MarkedFailed => Ok(()),
            TransactionState::Failed => Err(DriverError::client(
                "cannot run more statements: a previous statement failed in this transaction; \
                 close it and start a new one",
            )),
            TransactionState::Succeeded => {
                Err(DriverError::client("transaction already committed"))
            }
            TransactionState::RolledBack => {
                Err(DriverError::client("transaction already rolled back"))
            }
        }
    }

    fn connection(&mut self) -> DriverResult<&mut PooledConnection> {
        self.conn
            .as_mut()
            .ok_or_else(|| DriverError::client("transaction has no connection"))
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        // close() was never called: destroy the connection rather than
        // re-pool it with an open server-side transaction.
        if !self.finished {
            warn!(
                state = ?self.state,
                "transaction dropped without close(); its connection will not be reused"
            );
            if let Some(mut conn) = self.conn.take() {
                conn.mark_defunct();
            }
        }
    }
}

impl std::fmt::Debug for Transaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transaction")
            .field("state", &self.state)
            .field("finished", &self.finished)
            .field("database", &self.database)
            .finish()
    }
}
