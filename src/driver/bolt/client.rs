//! High-level Bolt client over one connection.
//!
//! Drives the message exchanges (authentication, query streams, transaction
//! control, routing discovery) and tracks failure-recovery state: after a
//! FAILURE the server answers everything except RESET with IGNORED, so the
//! client refuses new work until [`reset`](BoltClient::reset) succeeds.

use std::collections::HashMap;

use tracing::debug;

use crate::bolt::message::{Begin, Discard, Hello, Logon, Pull, Request, Response, Route, Run, Success};
use crate::bolt::packstream::Value;
use crate::bolt::version::BoltVersion;

use super::super::error::{DriverError, DriverResult, ErrorCategory};
use super::connection::{BoltConnection, ConnectionState};

/// Column names and stream id announced by a RUN success.
#[derive(Debug, Clone, Default)]
pub struct StreamHeader {
    /// Result column names
    pub keys: Vec<String>,
    /// Stream id for PULL/DISCARD addressing, when provided
    pub qid: Option<i64>,
    /// Milliseconds until the first record was available
    pub t_first: Option<i64>,
}

/// One batch of records from a PULL, plus the trailing metadata.
#[derive(Debug, Default)]
pub struct PullBatch {
    /// Raw record rows
    pub records: Vec<Vec<Value>>,
    /// Whether the server holds more records for this stream
    pub has_more: bool,
    /// Final stream metadata (bookmark, counters), on the last batch only
    pub summary: Option<Success>,
}

/// Client-side protocol driver for one connection.
pub struct BoltClient {
    connection: BoltConnection,
    needs_reset: bool,
    server_agent: Option<String>,
    connection_id: Option<String>,
}

impl BoltClient {
    /// Connect and handshake, but do not authenticate.
    pub async fn connect(address: &str) -> DriverResult<Self> {
        let mut connection = BoltConnection::connect(address).await?;
        connection.handshake().await?;
        Ok(Self {
            connection,
            needs_reset: false,
            server_agent: None,
            connection_id: None,
        })
    }

    /// Authenticate with HELLO.
    pub async fn hello(
        &mut self,
        user_agent: &str,
        auth: HashMap<String, Value>,
        routing: Option<HashMap<String, Value>>,
    ) -> DriverResult<()> {
        let mut hello = Hello::new(user_agent).with_auth(auth);
        if let Some(routing) = routing {
            hello = hello.with_routing(routing);
        }

        let response = self.connection.request(&Request::Hello(hello)).await?;
        let success = self.expect_success(response, "HELLO").map_err(|e| {
            // A rejected HELLO leaves nothing worth keeping.
            self.connection.mark_defunct();
            match e.category() {
                ErrorCategory::Authentication => DriverError::authentication(e.to_string()),
                _ => e,
            }
        })?;

        self.server_agent = success.server_agent().map(str::to_string);
        self.connection_id = success.connection_id().map(str::to_string);
        self.connection.mark_authenticated();
        debug!(
            address = %self.connection.address(),
            server = self.server_agent.as_deref().unwrap_or("?"),
            "authenticated"
        );
        Ok(())
    }

    /// Re-authenticate with LOGON (Bolt 5.x).
    pub async fn logon(&mut self, auth: HashMap<String, Value>) -> DriverResult<()> {
        self.ensure_accepts_work()?;
        let response = self.connection.request(&Request::Logon(Logon::new(auth))).await?;
        self.expect_success(response, "LOGON")?;
        Ok(())
    }

    /// Drop authentication state (Bolt 5.x).
    pub async fn logoff(&mut self) -> DriverResult<()> {
        self.ensure_accepts_work()?;
        let response = self.connection.request(&Request::Logoff).await?;
        self.expect_success(response, "LOGOFF")?;
        Ok(())
    }

    /// Start a query stream and pull the first batch.
    ///
    /// RUN and PULL are pipelined: both are written before either response
    /// is read.
    pub async fn run(
        &mut self,
        run: Run,
        fetch_size: i64,
    ) -> DriverResult<(StreamHeader, PullBatch)> {
        self.ensure_accepts_work()?;

        self.connection.send(&Request::Run(run)).await?;
        self.connection.send(&Request::Pull(Pull::n(fetch_size))).await?;

        let header = match self.connection.recv().await? {
            Response::Success(success) => StreamHeader {
                keys: success.fields().unwrap_or_default(),
                qid: success.qid(),
                t_first: success.t_first(),
            },
            Response::Failure(failure) => {
                self.enter_failure_recovery();
                self.drain_pending().await?;
                return Err(DriverError::server(failure));
            }
            other => return Err(self.unexpected("RUN", &other)),
        };

        let batch = self.collect_batch().await?;
        Ok((header, batch))
    }

    /// Pull the next batch from an open stream.
    pub async fn pull(&mut self, qid: Option<i64>, n: i64) -> DriverResult<PullBatch> {
        self.ensure_accepts_work()?;
        let mut pull = Pull::n(n);
        if let Some(qid) = qid {
            pull = pull.with_qid(qid);
        }
        self.connection.send(&Request::Pull(pull)).await?;
        self.collect_batch().await
    }

    /// Discard the remainder of an open stream.
    pub async fn discard(&mut self, qid: Option<i64>) -> DriverResult<Success> {
        self.ensure_accepts_work()?;
        let mut discard = Discard::all();
        if let Some(qid) = qid {
            discard = discard.with_qid(qid);
        }
        let response = self.connection.request(&Request::Discard(discard)).await?;
        self.expect_success(response, "DISCARD")
    }

    /// Open an explicit transaction.
    pub async fn begin(&mut self, begin: Begin) -> DriverResult<()> {
        self.ensure_accepts_work()?;
        let response = self.connection.request(&Request::Begin(begin)).await?;
        self.expect_success(response, "BEGIN")?;
        Ok(())
    }

    /// Commit the open transaction, returning its bookmark.
    pub async fn commit(&mut self) -> DriverResult<Option<String>> {
        self.ensure_accepts_work()?;
        let response = self.connection.request(&Request::Commit).await?;
        let success = self.expect_success(response, "COMMIT")?;
        Ok(success.bookmark().map(str::to_string))
    }

    /// Roll back the open transaction.
    pub async fn rollback(&mut self) -> DriverResult<()> {
        self.ensure_accepts_work()?;
        let response = self.connection.request(&Request::Rollback).await?;
        self.expect_success(response, "ROLLBACK")?;
        Ok(())
    }

    /// Clear failure state and discard any server-side results.
    pub async fn reset(&mut self) -> DriverResult<()> {
        let response = self.connection.request(&Request::Reset).await?;
        match response {
            Response::Success(_) => {
                self.needs_reset = false;
                Ok(())
            }
            Response::Failure(failure) => {
                self.connection.mark_defunct();
                Err(DriverError::server(failure))
            }
            other => Err(self.unexpected("RESET", &other)),
        }
    }

    /// Fetch the routing table payload for `database`.
    pub async fn route(&mut self, route: Route) -> DriverResult<HashMap<String, Value>> {
        self.ensure_accepts_work()?;
        let response = self.connection.request(&Request::Route(route)).await?;
        let success = self.expect_success(response, "ROUTE")?;
        success
            .routing_table()
            .cloned()
            .ok_or_else(|| DriverError::protocol("ROUTE success without a routing table"))
    }

    /// Close gracefully.
    pub async fn close(&mut self) {
        self.connection.close().await;
    }

    /// Whether the connection can be reused by the pool.
    pub fn is_healthy(&self) -> bool {
        self.connection.is_usable()
    }

    /// Whether a FAILURE is pending a RESET.
    pub fn needs_reset(&self) -> bool {
        self.needs_reset
    }

    /// Terminal-fault marker; see [`ConnectionState::Defunct`].
    pub fn mark_defunct(&mut self) {
        self.connection.mark_defunct();
    }

    /// Connection lifecycle state.
    pub fn state(&self) -> ConnectionState {
        self.connection.state()
    }

    /// Negotiated protocol version.
    pub fn version(&self) -> Option<BoltVersion> {
        self.connection.version()
    }

    /// Server agent string from HELLO.
    pub fn server_agent(&self) -> Option<&str> {
        self.server_agent.as_deref()
    }

    /// Server-assigned connection id from HELLO.
    pub fn connection_id(&self) -> Option<&str> {
        self.connection_id.as_deref()
    }

    /// Remote address.
    pub fn address(&self) -> &str {
        self.connection.address()
    }

    /// Consume record/summary responses for one PULL.
    async fn collect_batch(&mut self) -> DriverResult<PullBatch> {
        let mut batch = PullBatch::default();
        loop {
            match self.connection.recv().await? {
                Response::Record(record) => batch.records.push(record.values),
                Response::Success(success) => {
                    batch.has_more = success.has_more();
                    if !batch.has_more {
                        batch.summary = Some(success);
                    }
                    return Ok(batch);
                }
                Response::Failure(failure) => {
                    self.enter_failure_recovery();
                    self.drain_pending().await?;
                    return Err(DriverError::server(failure));
                }
                other @ Response::Ignored => {
                    return Err(self.unexpected("PULL", &other));
                }
            }
        }
    }

    /// After a FAILURE, consume the IGNORED responses of any still-pending
    /// pipelined requests so the connection's ordering stays intact.
    async fn drain_pending(&mut self) -> DriverResult<()> {
        while self.connection.pending_responses() > 0 {
            match self.connection.recv().await? {
                Response::Ignored | Response::Record(_) => {}
                Response::Failure(_) => {}
                Response::Success(_) => {
                    return Err(DriverError::protocol(
                        "SUCCESS for a request sent after a FAILURE",
                    ));
                }
            }
        }
        Ok(())
    }

    fn enter_failure_recovery(&mut self) {
        self.needs_reset = true;
        debug!(address = %self.connection.address(), "entering failure recovery");
    }

    fn ensure_accepts_work(&self) -> DriverResult<()> {
        if self.needs_reset {
            return Err(DriverError::client(
                "connection is in failure recovery; RESET required before new work",
            ));
        }
        if !self.connection.is_usable() {
            return Err(DriverError::connection(format!(
                "connection to {} unusable in state {:?}",
                self.connection.address(),
                self.connection.state()
            )));
        }
        Ok(())
    }

    fn expect_success(&mut self, response: Response, context: &str) -> DriverResult<Success> {
        match response {
            Response::Success(success) => Ok(success),
            Response::Failure(failure) => {
                self.enter_failure_recovery();
                Err(DriverError::server(failure))
            }
            Response::Ignored => Err(DriverError::client(format!(
                "{} ignored; connection needs RESET",
                context
            ))),
            other => Err(self.unexpected(context, &other)),
        }
    }

    fn unexpected(&mut self, context: &str, response: &Response) -> DriverError {
        self.connection.mark_defunct();
        DriverError::protocol(format!("unexpected {} in response to {}", response.name(), context))
    }
}

impl std::fmt::Debug for BoltClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoltClient")
            .field("address", &self.connection.address())
            .field("state", &self.connection.state())
            .field("needs_reset", &self.needs_reset)
            .finish()
    }
}
