//! Records, result cursors and result summaries.

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;

use crate::bolt::message::Success;
use crate::bolt::packstream::{Node, Path, Relationship, Value};

use super::bolt::{PullBatch, StreamHeader};
use super::error::{DriverError, DriverResult};
use super::pool::PooledConnection;
use super::session::ActivityGuard;

/// Shared slot a finished auto-commit stream writes its bookmark into.
pub(crate) type BookmarkSlot = Arc<RwLock<Option<String>>>;

/// One row of a result, with access by column name or position.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    keys: Arc<Vec<String>>,
    values: Vec<Value>,
}

impl Record {
    /// Record over shared column names.
    pub fn new(keys: Arc<Vec<String>>, values: Vec<Value>) -> Self {
        Self { keys, values }
    }

    /// Column names.
    pub fn keys(&self) -> &[String] {
        &self.keys
    }

    /// Row values in column order.
    pub fn values(&self) -> &[Value] {
        &self.values
    }

    /// Number of columns.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether the record has no columns.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Value by column name.
    pub fn get(&self, key: &str) -> Option<&Value> {
        let index = self.keys.iter().position(|k| k == key)?;
        self.values.get(index)
    }

    /// Value by column position.
    pub fn get_by_index(&self, index: usize) -> Option<&Value> {
        self.values.get(index)
    }

    /// Whether a column exists.
    pub fn contains_key(&self, key: &str) -> bool {
        self.keys.iter().any(|k| k == key)
    }

    /// Integer column, or a client error naming the problem.
    pub fn get_int(&self, key: &str) -> DriverResult<i64> {
        self.typed(key, Value::as_int, "integer")
    }

    /// Float column.
    pub fn get_float(&self, key: &str) -> DriverResult<f64> {
        self.typed(key, Value::as_float, "float")
    }

    /// Boolean column.
    pub fn get_bool(&self, key: &str) -> DriverResult<bool> {
        self.typed(key, Value::as_bool, "boolean")
    }

    /// String column.
    pub fn get_string(&self, key: &str) -> DriverResult<String> {
        self.typed(key, |v| v.as_str().map(str::to_string), "string")
    }

    /// Node column.
    pub fn get_node(&self, key: &str) -> DriverResult<Node> {
        let value = self.require(key)?;
        Node::from_value(value).map_err(|e| DriverError::client(e.to_string()))
    }

    /// Relationship column.
    pub fn get_relationship(&self, key: &str) -> DriverResult<Relationship> {
        let value = self.require(key)?;
        Relationship::from_value(value).map_err(|e| DriverError::client(e.to_string()))
    }

    /// Path column.
    pub fn get_path(&self, key: &str) -> DriverResult<Path> {
        let value = self.require(key)?;
        Path::from_value(value).map_err(|e| DriverError::client(e.to_string()))
    }

    /// The whole row as a map.
    pub fn to_map(&self) -> HashMap<String, Value> {
        self.keys.iter().cloned().zip(self.values.iter().cloned()).collect()
    }

    fn require(&self, key: &str) -> DriverResult<&Value> {
        self.get(key)
            .ok_or_else(|| DriverError::client(format!("no column named {:?}", key)))
    }

    fn typed<T>(
        &self,
        key: &str,
        view: impl Fn(&Value) -> Option<T>,
        wanted: &str,
    ) -> DriverResult<T> {
        let value = self.require(key)?;
        view(value).ok_or_else(|| {
            DriverError::client(format!(
                "column {:?} is {}, not {}",
                key,
                value.type_name(),
                wanted
            ))
        })
    }
}

impl fmt::Display for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let pairs: Vec<String> = self
            .keys
            .iter()
            .zip(self.values.iter())
            .map(|(k, v)| format!("{}: {}", k, v))
            .collect();
        write!(f, "{{{}}}", pairs.join(", "))
    }
}

/// Update counters from the final stream metadata.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Counters {
    /// Nodes created
    pub nodes_created: i64,
    /// Nodes deleted
    pub nodes_deleted: i64,
    /// Relationships created
    pub relationships_created: i64,
    /// Relationships deleted
    pub relationships_deleted: i64,
    /// Properties set
    pub properties_set: i64,
    /// Labels added
    pub labels_added: i64,
    /// Labels removed
    pub labels_removed: i64,
    /// Indexes added
    pub indexes_added: i64,
    /// Indexes removed
    pub indexes_removed: i64,
    /// Constraints added
    pub constraints_added: i64,
    /// Constraints removed
    pub constraints_removed: i64,
}

impl Counters {
    fn from_stats(stats: &HashMap<String, Value>) -> Self {
        let get = |key: &str| stats.get(key).and_then(Value::as_int).unwrap_or(0);
        Self {
            nodes_created: get("nodes-created"),
            nodes_deleted: get("nodes-deleted"),
            relationships_created: get("relationships-created"),
            relationships_deleted: get("relationships-deleted"),
            properties_set: get("properties-set"),
            labels_added: get("labels-added"),
            labels_removed: get("labels-removed"),
            indexes_added: get("indexes-added"),
            indexes_removed: get("indexes-removed"),
            constraints_added: get("constraints-added"),
            constraints_removed: get("constraints-removed"),
        }
    }

    /// Whether any data was changed.
    pub fn contains_updates(&self) -> bool {
        self.nodes_created > 0
            || self.nodes_deleted > 0
            || self.relationships_created > 0
            || self.relationships_deleted > 0
            || self.properties_set > 0
            || self.labels_added > 0
            || self.labels_removed > 0
    }

    /// Whether any schema objects were changed.
    pub fn contains_system_updates(&self) -> bool {
        self.indexes_added > 0
            || self.indexes_removed > 0
            || self.constraints_added > 0
            || self.constraints_removed > 0
    }
}

/// Metadata describing a completed result stream.
#[derive(Debug, Clone, Default)]
pub struct ResultSummary {
    /// The query text, when known
    pub query_text: Option<String>,
    /// Update counters
    pub counters: Counters,
    /// Time until the first record was available
    pub result_available_after: Option<Duration>,
    /// Time until the stream was consumed
    pub result_consumed_after: Option<Duration>,
    /// Database that served the query
    pub database: Option<String>,
    /// Bookmark produced by the stream, if any
    pub bookmark: Option<String>,
}

impl ResultSummary {
    pub(crate) fn from_success(success: &Success, t_first: Option<i64>) -> Self {
        Self {
            query_text: None,
            counters: success.stats().map(Counters::from_stats).unwrap_or_default(),
            result_available_after: t_first.map(|ms| Duration::from_millis(ms.max(0) as u64)),
            result_consumed_after: success
                .t_last()
                .map(|ms| Duration::from_millis(ms.max(0) as u64)),
            database: success.database().map(str::to_string),
            bookmark: success.bookmark().map(str::to_string),
        }
    }
}

/// A forward-only cursor over one result stream.
///
/// Records are buffered ahead of the consumer up to the fetch size; when the
/// buffer drains and the server holds more, the next batch is pulled. An
/// auto-commit cursor owns its pooled connection and returns it when the
/// stream completes; a transaction-bound cursor is replenished through
/// [`Transaction::fetch_more`](super::transaction::Transaction::fetch_more).
pub struct ResultCursor {
    keys: Arc<Vec<String>>,
    qid: Option<i64>,
    fetch_size: i64,
    t_first: Option<i64>,
    buffer: VecDeque<Record>,
    has_more: bool,
    summary: Option<ResultSummary>,
    conn: Option<PooledConnection>,
    bookmark_slot: Option<BookmarkSlot>,
    /// Holds the session's single-active-work claim until the stream
    /// completes (auto-commit cursors only).
    session_claim: Option<ActivityGuard>,
}

impl ResultCursor {
    /// Cursor whose further batches are fetched through its transaction.
    pub(crate) fn attached(header: StreamHeader, batch: PullBatch, fetch_size: i64) -> Self {
        let mut cursor = Self::empty(header, fetch_size);
        cursor.absorb(batch);
        cursor
    }

    /// Auto-commit cursor owning its pooled connection.
    pub(crate) fn detached(
        header: StreamHeader,
        batch: PullBatch,
        fetch_size: i64,
        conn: PooledConnection,
        bookmark_slot: BookmarkSlot,
        session_claim: ActivityGuard,
    ) -> Self {
        let mut cursor = Self::empty(header, fetch_size);
        cursor.conn = Some(conn);
        cursor.bookmark_slot = Some(bookmark_slot);
        cursor.session_claim = Some(session_claim);
        cursor.absorb(batch);
        cursor
    }

    fn empty(header: StreamHeader, fetch_size: i64) -> Self {
        Self {
            keys: Arc::new(header.keys),
            qid: header.qid,
            fetch_size,
            t_first: header.t_first,
            buffer: VecDeque::new(),
            has_more: false,
            summary: None,
            conn: None,
            bookmark_slot: None,
            session_claim: None,
        }
    }

    /// Fold a pulled batch into the buffer.
    pub(crate) fn absorb(&mut self, batch: PullBatch) {
        for values in batch.records {
            self.buffer.push_back(Record::new(self.keys.clone(), values));
        }
        self.has_more = batch.has_more;
        if let Some(success) = batch.summary {
            let summary = ResultSummary::from_success(&success, self.t_first);
            if let (Some(slot), Some(bookmark)) = (&self.bookmark_slot, &summary.bookmark) {
                *slot.write() = Some(bookmark.clone());
            }
            self.summary = Some(summary);
        }
        if !self.has_more && self.summary.is_some() {
            self.finish_connection();
        }
    }

    fn finish_connection(&mut self) {
        if let Some(conn) = self.conn.take() {
            conn.release();
        }
        self.session_claim.take();
    }

    /// Stream id used to address PULL/DISCARD for this cursor.
    pub(crate) fn qid(&self) -> Option<i64> {
        self.qid
    }

    /// Batch size used when replenishing.
    pub(crate) fn fetch_size(&self) -> i64 {
        self.fetch_size
    }

    /// Column names.
    pub fn keys(&self) -> &[String] {
        &self.keys
    }

    /// Whether the server still holds records beyond the buffer.
    pub fn more_available(&self) -> bool {
        self.has_more
    }

    /// Records currently buffered ahead of the consumer.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Final stream metadata, once the stream has completed.
    pub fn summary(&self) -> Option<&ResultSummary> {
        self.summary.as_ref()
    }

    /// Pop a buffered record without touching the network.
    pub fn next_buffered(&mut self) -> Option<Record> {
        self.buffer.pop_front()
    }

    /// Next record, pulling further batches over this cursor's own
    /// connection as needed. Only auto-commit cursors own a connection;
    /// a transaction-bound cursor must be replenished through its
    /// transaction.
    pub async fn next(&mut self) -> DriverResult<Option<Record>> {
        loop {
            if let Some(record) = self.buffer.pop_front() {
                return Ok(Some(record));
            }
            if !self.has_more {
                return Ok(None);
            }
            self.pull_next_batch().await?;
        }
    }

    /// Drain the rest of the stream into a vector.
    pub async fn collect(&mut self) -> DriverResult<Vec<Record>> {
        let mut records = Vec::with_capacity(self.buffer.len());
        while let Some(record) = self.next().await? {
            records.push(record);
        }
        Ok(records)
    }

    /// Exactly one record, or a client error.
    pub async fn single(&mut self) -> DriverResult<Record> {
        let first = self
            .next()
            .await?
            .ok_or_else(|| DriverError::client("expected a single record, got none"))?;
        if self.next().await?.is_some() {
            return Err(DriverError::client("expected a single record, got more"));
        }
        Ok(first)
    }

    /// Discard any remaining records and return the stream summary.
    ///
    /// For a transaction-bound cursor this only works once the stream is
    /// already complete; use
    /// [`Transaction::consume`](super::transaction::Transaction::consume)
    /// otherwise.
    pub async fn consume(mut self) -> DriverResult<ResultSummary> {
        if self.has_more {
            let mut conn = self.conn.take().ok_or_else(|| {
                DriverError::client("cursor is transaction-bound; consume it via the transaction")
            })?;
            let qid = self.qid;
            let success = match conn.client_mut().discard(qid).await {
                Ok(success) => success,
                // The broken connection is dropped, not re-pooled.
                Err(e) => return Err(e),
            };
            self.buffer.clear();
            self.has_more = false;
            self.conn = Some(conn);
            self.absorb(PullBatch {
                records: Vec::new(),
                has_more: false,
                summary: Some(success),
            });
        }
        self.buffer.clear();
        Ok(self.summary.clone().unwrap_or_default())
    }

    async fn pull_next_batch(&mut self) -> DriverResult<()> {
        let qid = self.qid;
        let fetch = self.fetch_size;
        let conn = self.conn.as_mut().ok_or_else(|| {
            DriverError::client(
                "cursor is transaction-bound; fetch further batches via the transaction",
            )
        })?;
        match conn.client_mut().pull(qid, fetch).await {
            Ok(batch) => {
                self.absorb(batch);
                Ok(())
            }
            Err(e) => {
                // A broken stream cannot be trusted; the connection is
                // dropped rather than re-pooled.
                self.conn.take();
                self.session_claim.take();
                self.has_more = false;
                Err(e)
            }
        }
    }
}

impl Drop for ResultCursor {
    fn drop(&mut self) {
        // Abandoning a half-streamed result leaves responses in flight; the
        // connection is destroyed, not reused.
        if let Some(mut conn) = self.conn.take() {
            if self.has_more {
                conn.mark_defunct();
            } else {
                conn.release();
            }
        }
    }
}

impl fmt::Debug for ResultCursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResultCursor")
            .field("keys", &self.keys)
            .field("buffered", &self.buffer.len())
            .field("has_more", &self.has_more)
            .field("detached", &self.conn.is_some())
            .finish()
    }
}
