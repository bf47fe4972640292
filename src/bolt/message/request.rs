//! Request messages sent from the driver to the server.

use std::collections::HashMap;
use std::time::Duration;

use super::tag;
use crate::bolt::packstream::{Structure, Value};

/// Transaction access mode, carried in BEGIN/RUN metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AccessMode {
    /// Read-write (the default; omitted on the wire)
    #[default]
    Write,
    /// Read-only ("r" on the wire)
    Read,
}

impl AccessMode {
    /// Wire form of the mode.
    pub fn as_wire_str(&self) -> &'static str {
        match self {
            AccessMode::Read => "r",
            AccessMode::Write => "w",
        }
    }
}

/// Every request the driver can send.
#[derive(Debug, Clone)]
pub enum Request {
    /// Open and authenticate a connection
    Hello(Hello),
    /// Re-authenticate an open connection (Bolt 5.x)
    Logon(Logon),
    /// Drop authentication state (Bolt 5.x)
    Logoff,
    /// Execute a query
    Run(Run),
    /// Fetch records from an open result stream
    Pull(Pull),
    /// Drop remaining records from an open result stream
    Discard(Discard),
    /// Open an explicit transaction
    Begin(Begin),
    /// Commit the open transaction
    Commit,
    /// Roll back the open transaction
    Rollback,
    /// Clear failure state and discard pending results
    Reset,
    /// Close the connection gracefully
    Goodbye,
    /// Fetch the routing table (Bolt 4.3+)
    Route(Route),
}

impl Request {
    /// Wire tag of the message.
    pub fn tag(&self) -> u8 {
        match self {
            Request::Hello(_) => tag::HELLO,
            Request::Logon(_) => tag::LOGON,
            Request::Logoff => tag::LOGOFF,
            Request::Run(_) => tag::RUN,
            Request::Pull(_) => tag::PULL,
            Request::Discard(_) => tag::DISCARD,
            Request::Begin(_) => tag::BEGIN,
            Request::Commit => tag::COMMIT,
            Request::Rollback => tag::ROLLBACK,
            Request::Reset => tag::RESET,
            Request::Goodbye => tag::GOODBYE,
            Request::Route(_) => tag::ROUTE,
        }
    }

    /// Message name for logs.
    pub fn name(&self) -> &'static str {
        match self {
            Request::Hello(_) => "HELLO",
            Request::Logon(_) => "LOGON",
            Request::Logoff => "LOGOFF",
            Request::Run(_) => "RUN",
            Request::Pull(_) => "PULL",
            Request::Discard(_) => "DISCARD",
            Request::Begin(_) => "BEGIN",
            Request::Commit => "COMMIT",
            Request::Rollback => "ROLLBACK",
            Request::Reset => "RESET",
            Request::Goodbye => "GOODBYE",
            Request::Route(_) => "ROUTE",
        }
    }

    /// Whether a SUCCESS/FAILURE/IGNORED response is expected.
    ///
    /// GOODBYE is the one fire-and-forget message in the protocol.
    pub fn expects_response(&self) -> bool {
        !matches!(self, Request::Goodbye)
    }

    /// Serialize into the message envelope structure.
    pub fn to_structure(&self) -> Structure {
        match self {
            Request::Hello(msg) => msg.to_structure(),
            Request::Logon(msg) => msg.to_structure(),
            Request::Logoff => Structure::new(tag::LOGOFF, vec![]),
            Request::Run(msg) => msg.to_structure(),
            Request::Pull(msg) => msg.to_structure(),
            Request::Discard(msg) => msg.to_structure(),
            Request::Begin(msg) => msg.to_structure(),
            Request::Commit => Structure::new(tag::COMMIT, vec![]),
            Request::Rollback => Structure::new(tag::ROLLBACK, vec![]),
            Request::Reset => Structure::new(tag::RESET, vec![]),
            Request::Goodbye => Structure::new(tag::GOODBYE, vec![]),
            Request::Route(msg) => msg.to_structure(),
        }
    }
}

/// HELLO: connection initialization and (pre-5.x) authentication.
#[derive(Debug, Clone)]
pub struct Hello {
    /// Client identification string
    pub user_agent: String,
    /// Authentication entries merged into the extra map
    pub auth: HashMap<String, Value>,
    /// Routing context, when connected through a routing driver
    pub routing: Option<HashMap<String, Value>>,
}

impl Hello {
    /// HELLO with the given user agent.
    pub fn new(user_agent: impl Into<String>) -> Self {
        Self {
            user_agent: user_agent.into(),
            auth: HashMap::new(),
            routing: None,
        }
    }

    /// Attach authentication entries.
    pub fn with_auth(mut self, auth: HashMap<String, Value>) -> Self {
        self.auth = auth;
        self
    }

    /// Attach a routing context.
    pub fn with_routing(mut self, routing: HashMap<String, Value>) -> Self {
        self.routing = Some(routing);
        self
    }

    /// Serialize into the message envelope structure.
    pub fn to_structure(&self) -> Structure {
        let mut extra: HashMap<String, Value> = self.auth.clone();
        extra.insert("user_agent".to_string(), Value::from(self.user_agent.as_str()));
        if let Some(routing) = &self.routing {
            extra.insert("routing".to_string(), Value::Map(routing.clone()));
        }
        Structure::new(tag::HELLO, vec![Value::Map(extra)])
    }
}

/// LOGON: (re-)authentication on Bolt 5.x.
#[derive(Debug, Clone)]
pub struct Logon {
    /// Authentication entries
    pub auth: HashMap<String, Value>,
}

impl Logon {
    /// LOGON with the given authentication map.
    pub fn new(auth: HashMap<String, Value>) -> Self {
        Self { auth }
    }

    /// Serialize into the message envelope structure.
    pub fn to_structure(&self) -> Structure {
        Structure::new(tag::LOGON, vec![Value::Map(self.auth.clone())])
    }
}

/// RUN: query execution, in an explicit transaction or auto-commit.
#[derive(Debug, Clone)]
pub struct Run {
    /// Opaque query text
    pub query: String,
    /// Query parameters
    pub parameters: HashMap<String, Value>,
    /// Extra metadata (database, bookmarks, mode, timeout)
    pub extra: HashMap<String, Value>,
}

impl Run {
    /// RUN for the given query text.
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            parameters: HashMap::new(),
            extra: HashMap::new(),
        }
    }

    /// Attach parameters.
    pub fn with_parameters(mut self, parameters: HashMap<String, Value>) -> Self {
        self.parameters = parameters;
        self
    }

    /// Target database (auto-commit only).
    pub fn with_database(mut self, db: &str) -> Self {
        self.extra.insert("db".to_string(), Value::from(db));
        self
    }

    /// Bookmarks to wait for (auto-commit only).
    pub fn with_bookmarks(mut self, bookmarks: Vec<String>) -> Self {
        if !bookmarks.is_empty() {
            let list = bookmarks.into_iter().map(Value::String).collect();
            self.extra.insert("bookmarks".to_string(), Value::List(list));
        }
        self
    }

    /// Access mode (auto-commit only; write is the wire default).
    pub fn with_mode(mut self, mode: AccessMode) -> Self {
        if mode == AccessMode::Read {
            self.extra.insert("mode".to_string(), Value::from(mode.as_wire_str()));
        }
        self
    }

    /// Serialize into the message envelope structure.
    pub fn to_structure(&self) -> Structure {
        Structure::new(
            tag::RUN,
            vec![
                Value::from(self.query.as_str()),
                Value::Map(self.parameters.clone()),
                Value::Map(self.extra.clone()),
            ],
        )
    }
}

/// PULL: fetch up to `n` records (-1 for all) from a result stream.
#[derive(Debug, Clone, Copy)]
pub struct Pull {
    /// Record budget, -1 for the whole stream
    pub n: i64,
    /// Stream id, when several streams are open in one transaction
    pub qid: Option<i64>,
}

impl Pull {
    /// PULL the entire stream.
    pub fn all() -> Self {
        Self { n: -1, qid: None }
    }

    /// PULL a bounded batch.
    pub fn n(n: i64) -> Self {
        Self { n, qid: None }
    }

    /// Address a specific stream.
    pub fn with_qid(mut self, qid: i64) -> Self {
        self.qid = Some(qid);
        self
    }

    /// Serialize into the message envelope structure.
    pub fn to_structure(&self) -> Structure {
        Structure::new(tag::PULL, vec![Value::Map(stream_extra(self.n, self.qid))])
    }
}

/// DISCARD: drop up to `n` records (-1 for all) from a result stream.
#[derive(Debug, Clone, Copy)]
pub struct Discard {
    /// Record budget, -1 for the whole stream
    pub n: i64,
    /// Stream id
    pub qid: Option<i64>,
}

impl Discard {
    /// DISCARD the rest of the stream.
    pub fn all() -> Self {
        Self { n: -1, qid: None }
    }

    /// Address a specific stream.
    pub fn with_qid(mut self, qid: i64) -> Self {
        self.qid = Some(qid);
        self
    }

    /// Serialize into the message envelope structure.
    pub fn to_structure(&self) -> Structure {
        Structure::new(tag::DISCARD, vec![Value::Map(stream_extra(self.n, self.qid))])
    }
}

fn stream_extra(n: i64, qid: Option<i64>) -> HashMap<String, Value> {
    let mut extra = HashMap::new();
    extra.insert("n".to_string(), Value::Integer(n));
    if let Some(qid) = qid {
        extra.insert("qid".to_string(), Value::Integer(qid));
    }
    extra
}

/// BEGIN: open an explicit transaction.
#[derive(Debug, Clone, Default)]
pub struct Begin {
    /// Bookmarks to wait for
    pub bookmarks: Vec<String>,
    /// Server-side transaction timeout
    pub tx_timeout: Option<Duration>,
    /// Access mode
    pub mode: AccessMode,
    /// Target database
    pub database: Option<String>,
    /// Application-provided transaction metadata
    pub tx_metadata: HashMap<String, Value>,
}

impl Begin {
    /// Empty BEGIN.
    pub fn new() -> Self {
        Self::default()
    }

    /// Bookmarks to wait for.
    pub fn with_bookmarks(mut self, bookmarks: Vec<String>) -> Self {
        self.bookmarks = bookmarks;
        self
    }

    /// Server-side timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.tx_timeout = Some(timeout);
        self
    }

    /// Access mode.
    pub fn with_mode(mut self, mode: AccessMode) -> Self {
        self.mode = mode;
        self
    }

    /// Target database.
    pub fn with_database(mut self, db: &str) -> Self {
        self.database = Some(db.to_string());
        self
    }

    /// Transaction metadata.
    pub fn with_metadata(mut self, metadata: HashMap<String, Value>) -> Self {
        self.tx_metadata = metadata;
        self
    }

    /// Serialize into the message envelope structure.
    pub fn to_structure(&self) -> Structure {
        let mut extra = HashMap::new();
        if !self.bookmarks.is_empty() {
            let list = self.bookmarks.iter().map(|b| Value::from(b.as_str())).collect();
            extra.insert("bookmarks".to_string(), Value::List(list));
        }
        if let Some(timeout) = self.tx_timeout {
            extra.insert(
                "tx_timeout".to_string(),
                Value::Integer(timeout.as_millis() as i64),
            );
        }
        if self.mode == AccessMode::Read {
            extra.insert("mode".to_string(), Value::from(self.mode.as_wire_str()));
        }
        if let Some(db) = &self.database {
            extra.insert("db".to_string(), Value::from(db.as_str()));
        }
        if !self.tx_metadata.is_empty() {
            extra.insert("tx_metadata".to_string(), Value::Map(self.tx_metadata.clone()));
        }
        Structure::new(tag::BEGIN, vec![Value::Map(extra)])
    }
}

/// ROUTE: routing-table discovery.
#[derive(Debug, Clone, Default)]
pub struct Route {
    /// Routing context from the driver URI
    pub routing: HashMap<String, Value>,
    /// Bookmarks the table must be at least as fresh as
    pub bookmarks: Vec<String>,
    /// Database the table is for (null selects the default database)
    pub database: Option<String>,
}

impl Route {
    /// Empty ROUTE.
    pub fn new() -> Self {
        Self::default()
    }

    /// Routing context.
    pub fn with_routing(mut self, routing: HashMap<String, Value>) -> Self {
        self.routing = routing;
        self
    }

    /// Target database.
    pub fn with_database(mut self, db: &str) -> Self {
        self.database = Some(db.to_string());
        self
    }

    /// Serialize into the message envelope structure.
    pub fn to_structure(&self) -> Structure {
        let bookmarks = self.bookmarks.iter().map(|b| Value::from(b.as_str())).collect();
        let db = self
            .database
            .as_deref()
            .map(Value::from)
            .unwrap_or(Value::Null);
        Structure::new(
            tag::ROUTE,
            vec![Value::Map(self.routing.clone()), Value::List(bookmarks), db],
        )
    }
}
