//! Response messages received from the server.
//!
//! Responses are decoded generically from the envelope (tag + fields) and
//! handed back to the pending request they answer, in send order.

use std::collections::HashMap;
use std::fmt;

use super::tag;
use crate::bolt::packstream::{PackStreamError, StructCatalog, Structure, Unpacker, Value};

/// Every response the server can send.
#[derive(Debug, Clone)]
pub enum Response {
    /// The request completed; metadata attached
    Success(Success),
    /// One result record
    Record(RecordMessage),
    /// The request failed; the connection needs RESET before new work
    Failure(FailureMessage),
    /// The request was skipped because the connection is in failure recovery
    Ignored,
}

impl Response {
    /// Message name for logs.
    pub fn name(&self) -> &'static str {
        match self {
            Response::Success(_) => "SUCCESS",
            Response::Record(_) => "RECORD",
            Response::Failure(_) => "FAILURE",
            Response::Ignored => "IGNORED",
        }
    }

    /// Whether this is a SUCCESS.
    pub fn is_success(&self) -> bool {
        matches!(self, Response::Success(_))
    }

    /// Whether this is a FAILURE.
    pub fn is_failure(&self) -> bool {
        matches!(self, Response::Failure(_))
    }

    /// Decode a complete (reassembled) message body.
    ///
    /// The envelope structure is read directly; its fields are unpacked as
    /// values against `catalog`.
    pub fn from_bytes(data: &[u8], catalog: StructCatalog) -> Result<Self, PackStreamError> {
        let mut unpacker = Unpacker::new(data, catalog);
        let (tag, arity) = unpacker.unpack_struct_header()?;
        let mut fields = Vec::with_capacity(arity);
        for _ in 0..arity {
            fields.push(unpacker.unpack()?);
        }
        Self::from_parts(tag, fields)
    }

    /// Assemble a response from an already-decoded envelope.
    pub fn from_parts(tag: u8, fields: Vec<Value>) -> Result<Self, PackStreamError> {
        match tag {
            tag::SUCCESS => Ok(Response::Success(Success::from_fields(fields))),
            tag::RECORD => Ok(Response::Record(RecordMessage::from_fields(fields)?)),
            tag::FAILURE => Ok(Response::Failure(FailureMessage::from_fields(fields)?)),
            tag::IGNORED => Ok(Response::Ignored),
            other => Err(PackStreamError::UnknownStructTag { tag: other }),
        }
    }

    /// Serialize back into an envelope structure. Exercised by tests that
    /// play the server side of a connection.
    pub fn to_structure(&self) -> Structure {
        match self {
            Response::Success(msg) => {
                Structure::new(tag::SUCCESS, vec![Value::Map(msg.metadata.clone())])
            }
            Response::Record(msg) => {
                Structure::new(tag::RECORD, vec![Value::List(msg.values.clone())])
            }
            Response::Failure(msg) => {
                Structure::new(tag::FAILURE, vec![Value::Map(msg.to_metadata())])
            }
            Response::Ignored => Structure::new(tag::IGNORED, vec![]),
        }
    }
}

/// SUCCESS metadata with typed accessors for the fields the driver reads.
#[derive(Debug, Clone, Default)]
pub struct Success {
    /// Raw metadata map
    pub metadata: HashMap<String, Value>,
}

impl Success {
    /// Empty SUCCESS.
    pub fn new() -> Self {
        Self::default()
    }

    /// SUCCESS with the given metadata.
    pub fn with_metadata(metadata: HashMap<String, Value>) -> Self {
        Self { metadata }
    }

    fn from_fields(fields: Vec<Value>) -> Self {
        let metadata = fields
            .into_iter()
            .next()
            .and_then(|v| match v {
                Value::Map(m) => Some(m),
                _ => None,
            })
            .unwrap_or_default();
        Self { metadata }
    }

    /// Insert a metadata entry (test construction).
    pub fn set(&mut self, key: &str, value: Value) {
        self.metadata.insert(key.to_string(), value);
    }

    /// Raw metadata entry.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.metadata.get(key)
    }

    /// Server agent string (HELLO).
    pub fn server_agent(&self) -> Option<&str> {
        self.get("server").and_then(Value::as_str)
    }

    /// Connection id assigned by the server (HELLO).
    pub fn connection_id(&self) -> Option<&str> {
        self.get("connection_id").and_then(Value::as_str)
    }

    /// Result column names (RUN).
    pub fn fields(&self) -> Option<Vec<String>> {
        self.get("fields").and_then(Value::as_string_list)
    }

    /// Stream id (RUN, when several streams are open).
    pub fn qid(&self) -> Option<i64> {
        self.get("qid").and_then(Value::as_int)
    }

    /// Whether more records remain after a bounded PULL.
    pub fn has_more(&self) -> bool {
        self.get("has_more").and_then(Value::as_bool).unwrap_or(false)
    }

    /// Bookmark produced by a committed transaction or finished stream.
    pub fn bookmark(&self) -> Option<&str> {
        self.get("bookmark").and_then(Value::as_str)
    }

    /// Database that served the query.
    pub fn database(&self) -> Option<&str> {
        self.get("db").and_then(Value::as_str)
    }

    /// Milliseconds until the result was available (RUN).
    pub fn t_first(&self) -> Option<i64> {
        self.get("t_first").and_then(Value::as_int)
    }

    /// Milliseconds until the result was consumed (final PULL/DISCARD).
    pub fn t_last(&self) -> Option<i64> {
        self.get("t_last").and_then(Value::as_int)
    }

    /// Query counters map (final PULL/DISCARD).
    pub fn stats(&self) -> Option<&HashMap<String, Value>> {
        self.get("stats").and_then(Value::as_map)
    }

    /// Routing table payload (ROUTE).
    pub fn routing_table(&self) -> Option<&HashMap<String, Value>> {
        self.get("rt").and_then(Value::as_map)
    }
}

/// RECORD: one row of values.
#[derive(Debug, Clone, Default)]
pub struct RecordMessage {
    /// Row values, ordered like the RUN response's field names
    pub values: Vec<Value>,
}

impl RecordMessage {
    /// RECORD carrying `values`.
    pub fn new(values: Vec<Value>) -> Self {
        Self { values }
    }

    fn from_fields(fields: Vec<Value>) -> Result<Self, PackStreamError> {
        match fields.into_iter().next() {
            Some(Value::List(values)) => Ok(Self { values }),
            Some(other) => Err(PackStreamError::UnexpectedType {
                expected: "record value list",
                actual: other.type_name(),
            }),
            None => Ok(Self { values: Vec::new() }),
        }
    }
}

/// FAILURE: the structured error payload.
///
/// `code` and `message` are always present. Servers speaking the GQL status
/// extension additionally attach a status code, a human description, a
/// classification, a diagnostic record and optionally a nested cause; the
/// whole chain is preserved for the caller-facing error surface.
#[derive(Debug, Clone, PartialEq)]
pub struct FailureMessage {
    /// Stable error code, e.g. `Neo.TransientError.General.DatabaseUnavailable`
    pub code: String,
    /// Human-readable message
    pub message: String,
    /// GQL status code, when provided
    pub gql_status: Option<String>,
    /// GQL status description, when provided
    pub gql_status_description: Option<String>,
    /// Cooked classification from the diagnostic record
    pub classification: Option<String>,
    /// Raw classification string as sent by the server
    pub raw_classification: Option<String>,
    /// Full diagnostic record, when provided
    pub diagnostic_record: HashMap<String, Value>,
    /// Nested cause, when provided
    pub cause: Option<Box<FailureMessage>>,
}

impl FailureMessage {
    /// Failure with just a code and message.
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            gql_status: None,
            gql_status_description: None,
            classification: None,
            raw_classification: None,
            diagnostic_record: HashMap::new(),
            cause: None,
        }
    }

    fn from_fields(fields: Vec<Value>) -> Result<Self, PackStreamError> {
        let metadata = fields
            .into_iter()
            .next()
            .and_then(|v| match v {
                Value::Map(m) => Some(m),
                _ => None,
            })
            .ok_or(PackStreamError::UnexpectedType {
                expected: "failure metadata map",
                actual: "missing",
            })?;
        Ok(Self::from_metadata(&metadata))
    }

    /// Parse the failure payload from its metadata map.
    pub fn from_metadata(metadata: &HashMap<String, Value>) -> Self {
        let string = |key: &str| {
            metadata
                .get(key)
                .and_then(Value::as_str)
                .map(str::to_string)
        };

        let diagnostic_record = metadata
            .get("diagnostic_record")
            .and_then(Value::as_map)
            .cloned()
            .unwrap_or_default();

        let raw_classification = diagnostic_record
            .get("_classification")
            .and_then(Value::as_str)
            .map(str::to_string);

        let cause = metadata
            .get("cause")
            .and_then(Value::as_map)
            .map(|m| Box::new(Self::from_metadata(m)));

        Self {
            code: string("code").or_else(|| string("neo4j_code")).unwrap_or_else(|| {
                "Neo.DatabaseError.General.UnknownError".to_string()
            }),
            message: string("message").unwrap_or_else(|| "An unknown error occurred".to_string()),
            gql_status: string("gql_status"),
            gql_status_description: string("description"),
            classification: raw_classification.clone(),
            raw_classification,
            diagnostic_record,
            cause,
        }
    }

    /// Rebuild the metadata map (test construction).
    pub fn to_metadata(&self) -> HashMap<String, Value> {
        let mut metadata = HashMap::new();
        metadata.insert("code".to_string(), Value::from(self.code.as_str()));
        metadata.insert("message".to_string(), Value::from(self.message.as_str()));
        if let Some(status) = &self.gql_status {
            metadata.insert("gql_status".to_string(), Value::from(status.as_str()));
        }
        if let Some(desc) = &self.gql_status_description {
            metadata.insert("description".to_string(), Value::from(desc.as_str()));
        }
        if !self.diagnostic_record.is_empty() {
            metadata.insert(
                "diagnostic_record".to_string(),
                Value::Map(self.diagnostic_record.clone()),
            );
        }
        if let Some(cause) = &self.cause {
            metadata.insert("cause".to_string(), Value::Map(cause.to_metadata()));
        }
        metadata
    }

    /// Depth of the cause chain, including this failure.
    pub fn chain_len(&self) -> usize {
        1 + self.cause.as_ref().map_or(0, |c| c.chain_len())
    }
}

impl fmt::Display for FailureMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bolt::packstream::pack;
    use crate::bolt::version::BoltVersion;

    fn catalog() -> StructCatalog {
        StructCatalog::for_version(BoltVersion::V5_0)
    }

    fn round_trip(response: &Response) -> Response {
        let bytes = pack(&Value::Structure(response.to_structure())).unwrap();
        Response::from_bytes(&bytes, catalog()).unwrap()
    }

    #[test]
    fn success_round_trip_with_accessors() {
        let mut success = Success::new();
        success.set("server", Value::from("TesseraDB/1.2"));
        success.set("connection_id", Value::from("bolt-77"));
        success.set(
            "fields",
            Value::List(vec![Value::from("name"), Value::from("age")]),
        );
        success.set("has_more", Value::Boolean(true));
        success.set("t_first", Value::Integer(3));

        match round_trip(&Response::Success(success)) {
            Response::Success(s) => {
                assert_eq!(s.server_agent(), Some("TesseraDB/1.2"));
                assert_eq!(s.connection_id(), Some("bolt-77"));
                assert_eq!(s.fields().unwrap(), vec!["name", "age"]);
                assert!(s.has_more());
                assert_eq!(s.t_first(), Some(3));
                assert_eq!(s.bookmark(), None);
            }
            other => panic!("expected SUCCESS, got {}", other.name()),
        }
    }

    #[test]
    fn record_round_trip() {
        let record = RecordMessage::new(vec![Value::from("Ada"), Value::Integer(36)]);
        match round_trip(&Response::Record(record)) {
            Response::Record(r) => {
                assert_eq!(r.values.len(), 2);
                assert_eq!(r.values[0].as_str(), Some("Ada"));
            }
            other => panic!("expected RECORD, got {}", other.name()),
        }
    }

    #[test]
    fn failure_round_trip_minimal() {
        let failure = FailureMessage::new(
            "Neo.ClientError.Statement.SyntaxError",
            "unexpected token",
        );
        match round_trip(&Response::Failure(failure.clone())) {
            Response::Failure(f) => {
                assert_eq!(f.code, failure.code);
                assert_eq!(f.message, failure.message);
                assert_eq!(f.chain_len(), 1);
            }
            other => panic!("expected FAILURE, got {}", other.name()),
        }
    }

    #[test]
    fn failure_parses_gql_fields_and_cause() {
        let mut diag = HashMap::new();
        diag.insert("_classification".to_string(), Value::from("CLIENT_ERROR"));

        let mut inner = FailureMessage::new("Neo.ClientError.Schema.ConstraintValidationFailed", "dup");
        inner.gql_status = Some("22N41".to_string());

        let mut outer = FailureMessage::new("Neo.ClientError.Statement.ExecutionFailed", "failed");
        outer.gql_status = Some("50N00".to_string());
        outer.gql_status_description = Some("error: execution failed".to_string());
        outer.diagnostic_record = diag;
        outer.cause = Some(Box::new(inner));

        match round_trip(&Response::Failure(outer)) {
            Response::Failure(f) => {
                assert_eq!(f.gql_status.as_deref(), Some("50N00"));
                assert_eq!(f.raw_classification.as_deref(), Some("CLIENT_ERROR"));
                assert_eq!(f.chain_len(), 2);
                let cause = f.cause.unwrap();
                assert_eq!(cause.gql_status.as_deref(), Some("22N41"));
                assert!(cause.cause.is_none());
            }
            other => panic!("expected FAILURE, got {}", other.name()),
        }
    }

    #[test]
    fn ignored_round_trip() {
        assert!(matches!(round_trip(&Response::Ignored), Response::Ignored));
    }

    #[test]
    fn unknown_response_tag_is_rejected() {
        // Envelope with the RUN (request) tag
        let s = Structure::new(0x10, vec![]);
        let bytes = pack(&Value::Structure(s)).unwrap();
        let err = Response::from_bytes(&bytes, catalog()).unwrap_err();
        assert!(matches!(err, PackStreamError::UnknownStructTag { tag: 0x10 }));
    }

    #[test]
    fn record_with_graph_value() {
        use crate::bolt::packstream::Node;
        let node = Node::new(1, vec!["Person".into()], HashMap::new());
        let record = RecordMessage::new(vec![node.to_value()]);
        match round_trip(&Response::Record(record)) {
            Response::Record(r) => {
                let parsed = Node::from_value(&r.values[0]).unwrap();
                assert_eq!(parsed.id, 1);
            }
            other => panic!("expected RECORD, got {}", other.name()),
        }
    }

    #[test]
    fn failure_display() {
        let f = FailureMessage::new("Neo.ClientError.Security.Unauthorized", "bad credentials");
        assert_eq!(
            f.to_string(),
            "Neo.ClientError.Security.Unauthorized: bad credentials"
        );
    }
}
