//! Routing tables: per-database server roles with a TTL.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use crate::bolt::packstream::Value;

use super::super::config::ServerAddress;
use super::super::error::{DriverError, DriverResult};

/// Role a server plays for one database.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ServerRole {
    /// Serves read transactions
    Read,
    /// Serves write transactions
    Write,
    /// Serves routing-table requests
    Route,
}

impl ServerRole {
    /// Parse the wire form.
    pub fn from_wire(s: &str) -> Option<Self> {
        match s {
            "READ" => Some(Self::Read),
            "WRITE" => Some(Self::Write),
            "ROUTE" => Some(Self::Route),
            _ => None,
        }
    }

    /// The wire form.
    pub fn as_wire_str(&self) -> &'static str {
        match self {
            Self::Read => "READ",
            Self::Write => "WRITE",
            Self::Route => "ROUTE",
        }
    }
}

/// One database's cached view of the cluster.
///
/// Tables are immutable after parsing and swapped atomically in the cache;
/// only the per-role round-robin cursors mutate, and those are atomics so
/// concurrent selections interleave cleanly. Staleness is purely TTL-based.
#[derive(Debug)]
pub struct RoutingTable {
    /// Database the table describes
    pub database: String,
    ttl: Duration,
    refreshed_at: Instant,
    readers: Vec<ServerAddress>,
    writers: Vec<ServerAddress>,
    routers: Vec<ServerAddress>,
    reader_cursor: AtomicUsize,
    writer_cursor: AtomicUsize,
    router_cursor: AtomicUsize,
}

impl RoutingTable {
    /// Parse a ROUTE response's `rt` metadata map.
    ///
    /// A table with no readers or no writers is a routing failure: callers
    /// could never satisfy one of the two access modes, so the refresh must
    /// not be silently accepted.
    pub fn from_route_metadata(
        database: &str,
        metadata: &HashMap<String, Value>,
    ) -> DriverResult<Self> {
        let ttl_seconds = metadata
            .get("ttl")
            .and_then(Value::as_int)
            .ok_or_else(|| DriverError::protocol("routing table without a ttl"))?;

        let servers = metadata
            .get("servers")
            .and_then(Value::as_list)
            .ok_or_else(|| DriverError::protocol("routing table without a servers list"))?;

        let mut readers = Vec::new();
        let mut writers = Vec::new();
        let mut routers = Vec::new();

        for entry in servers {
            let entry = entry
                .as_map()
                .ok_or_else(|| DriverError::protocol("routing table server entry is not a map"))?;
            let role = entry
                .get("role")
                .and_then(Value::as_str)
                .and_then(ServerRole::from_wire);
            let addresses: Vec<ServerAddress> = entry
                .get("addresses")
                .and_then(Value::as_string_list)
                .unwrap_or_default()
                .iter()
                .filter_map(|a| ServerAddress::parse(a).ok())
                .collect();

            match role {
                Some(ServerRole::Read) => readers.extend(addresses),
                Some(ServerRole::Write) => writers.extend(addresses),
                Some(ServerRole::Route) => routers.extend(addresses),
                // Unknown roles are from a newer server; skip them.
                None => {}
            }
        }

        if readers.is_empty() || writers.is_empty() {
            return Err(DriverError::service_unavailable(format!(
                "routing table for database {:?} is incomplete: {} readers, {} writers",
                database,
                readers.len(),
                writers.len()
            )));
        }

        Ok(Self {
            database: database.to_string(),
            ttl: Duration::from_secs(ttl_seconds.max(0) as u64),
            refreshed_at: Instant::now(),
            readers,
            writers,
            routers,
            reader_cursor: AtomicUsize::new(0),
            writer_cursor: AtomicUsize::new(0),
            router_cursor: AtomicUsize::new(0),
        })
    }

    /// Whether the TTL has elapsed.
    pub fn is_expired(&self) -> bool {
        self.refreshed_at.elapsed() >= self.ttl
    }

    /// Time the table has left.
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Next reader, round-robin.
    pub fn next_reader(&self) -> Option<ServerAddress> {
        Self::next(&self.readers, &self.reader_cursor)
    }

    /// Next writer, round-robin.
    pub fn next_writer(&self) -> Option<ServerAddress> {
        Self::next(&self.writers, &self.writer_cursor)
    }

    /// Next router, round-robin.
    pub fn next_router(&self) -> Option<ServerAddress> {
        Self::next(&self.routers, &self.router_cursor)
    }

    /// Readers in table order.
    pub fn readers(&self) -> &[ServerAddress] {
        &self.readers
    }

    /// Writers in table order.
    pub fn writers(&self) -> &[ServerAddress] {
        &self.writers
    }

    /// Routers in table order.
    pub fn routers(&self) -> &[ServerAddress] {
        &self.routers
    }

    fn next(list: &[ServerAddress], cursor: &AtomicUsize) -> Option<ServerAddress> {
        if list.is_empty() {
            return None;
        }
        let index = cursor.fetch_add(1, Ordering::Relaxed) % list.len();
        Some(list[index].clone())
    }
}
