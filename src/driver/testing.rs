//! In-process scripted Bolt server for tests.
//!
//! Speaks just enough of the protocol to exercise the driver end to end:
//! handshake (accepting or rejecting), chunked framing, and canned responses
//! per message tag, including the IGNORED-until-RESET discipline after a
//! scripted FAILURE.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::BytesMut;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Notify;

use crate::bolt::codec::write_chunked;
use crate::bolt::handshake::HANDSHAKE_SIZE;
use crate::bolt::message::{tag, FailureMessage, RecordMessage, Response, Success};
use crate::bolt::packstream::{pack, StructCatalog, Unpacker, Value};
use crate::bolt::version::BoltVersion;

/// Behaviour knobs for a scripted server.
#[derive(Clone, Default)]
pub struct ServerScript {
    reject_handshake: bool,
    close_after_handshake: bool,
    echo_run_fields: bool,
    fields: Vec<String>,
    records: Vec<Vec<Value>>,
    fail_hello: Option<FailureMessage>,
    fail_run: Option<FailureMessage>,
    commit_bookmark: Option<String>,
    route_table: Option<Value>,
}

/// Builder over [`ServerScript`].
#[derive(Default)]
pub struct ScriptBuilder {
    script: ServerScript,
}

impl ScriptBuilder {
    /// Reject the handshake with an all-zero reply.
    pub fn reject_handshake(mut self) -> Self {
        self.script.reject_handshake = true;
        self
    }

    /// Close the socket right after a successful handshake.
    pub fn close_after_handshake(mut self) -> Self {
        self.script.close_after_handshake = true;
        self
    }

    /// Answer RUN with `fields` echoing the query text.
    pub fn echo_run_fields(mut self) -> Self {
        self.script.echo_run_fields = true;
        self
    }

    /// Column names announced by RUN.
    pub fn fields(mut self, fields: Vec<String>) -> Self {
        self.script.fields = fields;
        self
    }

    /// Records served by PULL.
    pub fn records(mut self, records: Vec<Vec<Value>>) -> Self {
        self.script.records = records;
        self
    }

    /// Fail the first HELLO with this payload.
    pub fn fail_hello(mut self, failure: FailureMessage) -> Self {
        self.script.fail_hello = Some(failure);
        self
    }

    /// Fail the first RUN on each connection with this payload.
    pub fn fail_run(mut self, failure: FailureMessage) -> Self {
        self.script.fail_run = Some(failure);
        self
    }

    /// Bookmark returned by COMMIT.
    pub fn commit_bookmark(mut self, bookmark: &str) -> Self {
        self.script.commit_bookmark = Some(bookmark.to_string());
        self
    }

    /// Routing table returned by ROUTE.
    pub fn routing_table(
        mut self,
        ttl: i64,
        writers: Vec<&str>,
        readers: Vec<&str>,
        routers: Vec<&str>,
    ) -> Self {
        self.script.route_table = Some(routing_table_value(ttl, &writers, &readers, &routers));
        self
    }

    /// Bind and spawn the server.
    pub async fn spawn_configured(self) -> ScriptedServer {
        ScriptedServer::start(self.script).await
    }
}

/// Build a routing-table metadata value in the ROUTE response shape.
pub fn routing_table_value(ttl: i64, writers: &[&str], readers: &[&str], routers: &[&str]) -> Value {
    let entry = |role: &str, addrs: &[&str]| {
        let mut map = HashMap::new();
        map.insert("role".to_string(), Value::from(role));
        map.insert(
            "addresses".to_string(),
            Value::List(addrs.iter().map(|a| Value::from(*a)).collect()),
        );
        Value::Map(map)
    };
    let mut rt = HashMap::new();
    rt.insert("ttl".to_string(), Value::Integer(ttl));
    rt.insert("db".to_string(), Value::from("graph"));
    rt.insert(
        "servers".to_string(),
        Value::List(vec![
            entry("WRITE", writers),
            entry("READ", readers),
            entry("ROUTE", routers),
        ]),
    );
    Value::Map(rt)
}

/// A running scripted server.
pub struct ScriptedServer {
    address: String,
    connections: Arc<AtomicUsize>,
    extra_bytes: Arc<AtomicUsize>,
    rejected: Arc<Notify>,
}

impl ScriptedServer {
    /// Default well-behaved server: handshake to 5.0, HELLO succeeds, RUN
    /// echoes its query text as the field list.
    pub async fn spawn() -> Self {
        Self::builder().echo_run_fields().spawn_configured().await
    }

    /// Server that rejects every handshake.
    pub async fn spawn_rejecting() -> Self {
        Self::builder().reject_handshake().spawn_configured().await
    }

    /// Start configuring a server.
    pub fn builder() -> ScriptBuilder {
        ScriptBuilder::default()
    }

    async fn start(script: ServerScript) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind scripted server");
        let address = listener.local_addr().expect("local addr").to_string();
        let connections = Arc::new(AtomicUsize::new(0));
        let extra_bytes = Arc::new(AtomicUsize::new(0));
        let rejected = Arc::new(Notify::new());

        let accept_connections = connections.clone();
        let accept_extra = extra_bytes.clone();
        let accept_rejected = rejected.clone();
        tokio::spawn(async move {
            loop {
                let Ok((socket, _)) = listener.accept().await else {
                    break;
                };
                accept_connections.fetch_add(1, Ordering::SeqCst);
                let script = script.clone();
                let extra = accept_extra.clone();
                let rejected = accept_rejected.clone();
                tokio::spawn(async move {
                    let _ = serve_connection(socket, script, extra, rejected).await;
                });
            }
        });

        Self { address, connections, extra_bytes, rejected }
    }

    /// Address to connect to.
    pub fn address(&self) -> String {
        self.address.clone()
    }

    /// Connections accepted so far.
    pub fn connections_accepted(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }

    /// Bytes the client sent after a rejected handshake. Waits for the
    /// serving task to finish observing the socket.
    pub async fn bytes_after_handshake(&self) -> usize {
        self.rejected.notified().await;
        self.extra_bytes.load(Ordering::SeqCst)
    }
}

async fn serve_connection(
    mut socket: TcpStream,
    script: ServerScript,
    extra_bytes: Arc<AtomicUsize>,
    rejected: Arc<Notify>,
) -> std::io::Result<()> {
    // Handshake
    let mut preamble = [0u8; HANDSHAKE_SIZE];
    socket.read_exact(&mut preamble).await?;

    if script.reject_handshake {
        socket.write_all(&[0, 0, 0, 0]).await?;
        socket.flush().await?;
        // Count anything the client sends before hanging up.
        let mut count = 0usize;
        let mut buf = [0u8; 256];
        loop {
            match tokio::time::timeout(Duration::from_millis(100), socket.read(&mut buf)).await {
                Ok(Ok(0)) | Err(_) => break,
                Ok(Ok(n)) => count += n,
                Ok(Err(_)) => break,
            }
        }
        extra_bytes.store(count, Ordering::SeqCst);
        rejected.notify_one();
        return Ok(());
    }

    socket.write_all(&BoltVersion::V5_0.to_bytes()).await?;
    socket.flush().await?;

    if script.close_after_handshake {
        return Ok(());
    }

    let catalog = StructCatalog::for_version(BoltVersion::V5_0);
    let mut failed = false;
    let mut hello_failure = script.fail_hello.clone();
    let mut run_failure = script.fail_run.clone();
    let mut remaining: Vec<Vec<Value>> = script.records.clone();
    let mut cursor = 0usize;

    loop {
        let Some(body) = read_message(&mut socket).await? else {
            return Ok(());
        };
        let mut unpacker = Unpacker::new(&body, catalog);
        let (msg_tag, arity) = match unpacker.unpack_struct_header() {
            Ok(h) => h,
            Err(_) => return Ok(()),
        };
        let mut fields = Vec::with_capacity(arity);
        for _ in 0..arity {
            match unpacker.unpack() {
                Ok(v) => fields.push(v),
                Err(_) => return Ok(()),
            }
        }

        if msg_tag == tag::GOODBYE {
            return Ok(());
        }

        if failed && msg_tag != tag::RESET {
            write_response(&mut socket, &Response::Ignored).await?;
            continue;
        }

        match msg_tag {
            tag::HELLO => {
                if let Some(failure) = hello_failure.take() {
                    failed = true;
                    write_response(&mut socket, &Response::Failure(failure)).await?;
                } else {
                    let mut success = Success::new();
                    success.set("server", Value::from("TesseraDB/test"));
                    success.set("connection_id", Value::from("bolt-test-1"));
                    write_response(&mut socket, &Response::Success(success)).await?;
                }
            }
            tag::LOGON | tag::LOGOFF | tag::BEGIN | tag::ROLLBACK => {
                write_response(&mut socket, &Response::Success(Success::new())).await?;
            }
            tag::COMMIT => {
                let mut success = Success::new();
                if let Some(bookmark) = &script.commit_bookmark {
                    success.set("bookmark", Value::from(bookmark.as_str()));
                }
                write_response(&mut socket, &Response::Success(success)).await?;
            }
            tag::RESET => {
                failed = false;
                write_response(&mut socket, &Response::Success(Success::new())).await?;
            }
            tag::RUN => {
                if let Some(failure) = run_failure.take() {
                    failed = true;
                    write_response(&mut socket, &Response::Failure(failure)).await?;
                    continue;
                }
                let announced = if script.echo_run_fields {
                    fields
                        .first()
                        .and_then(Value::as_str)
                        .map(|q| vec![q.to_string()])
                        .unwrap_or_default()
                } else {
                    script.fields.clone()
                };
                remaining = script.records.clone();
                cursor = 0;
                let mut success = Success::new();
                success.set(
                    "fields",
                    Value::List(announced.into_iter().map(Value::String).collect()),
                );
                success.set("t_first", Value::Integer(1));
                write_response(&mut socket, &Response::Success(success)).await?;
            }
            tag::PULL => {
                let n = fields
                    .first()
                    .and_then(Value::as_map)
                    .and_then(|m| m.get("n"))
                    .and_then(Value::as_int)
                    .unwrap_or(-1);
                let left = remaining.len() - cursor;
                let take = if n < 0 { left } else { (n as usize).min(left) };
                for row in &remaining[cursor..cursor + take] {
                    write_response(&mut socket, &Response::Record(RecordMessage::new(row.clone())))
                        .await?;
                }
                cursor += take;
                let mut success = Success::new();
                if cursor < remaining.len() {
                    success.set("has_more", Value::Boolean(true));
                } else {
                    success.set("t_last", Value::Integer(1));
                }
                write_response(&mut socket, &Response::Success(success)).await?;
            }
            tag::DISCARD => {
                cursor = remaining.len();
                let mut success = Success::new();
                success.set("t_last", Value::Integer(1));
                write_response(&mut socket, &Response::Success(success)).await?;
            }
            tag::ROUTE => {
                match &script.route_table {
                    Some(table) => {
                        let mut success = Success::new();
                        success.set("rt", table.clone());
                        write_response(&mut socket, &Response::Success(success)).await?;
                    }
                    None => {
                        failed = true;
                        write_response(
                            &mut socket,
                            &Response::Failure(FailureMessage::new(
                                "Neo.ClientError.Procedure.ProcedureNotFound",
                                "routing not configured",
                            )),
                        )
                        .await?;
                    }
                }
            }
            _ => {
                failed = true;
                write_response(
                    &mut socket,
                    &Response::Failure(FailureMessage::new(
                        "Neo.ClientError.Request.Invalid",
                        "unexpected message",
                    )),
                )
                .await?;
            }
        }
    }
}

/// Read one chunked message; `None` on clean EOF between messages.
async fn read_message(socket: &mut TcpStream) -> std::io::Result<Option<Vec<u8>>> {
    let mut body = Vec::new();
    loop {
        let mut header = [0u8; 2];
        match socket.read_exact(&mut header).await {
            Ok(_) => {}
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof && body.is_empty() => {
                return Ok(None)
            }
            Err(e) => return Err(e),
        }
        let size = u16::from_be_bytes(header) as usize;
        if size == 0 {
            if body.is_empty() {
                continue; // NOOP
            }
            return Ok(Some(body));
        }
        let mut chunk = vec![0u8; size];
        socket.read_exact(&mut chunk).await?;
        body.extend_from_slice(&chunk);
    }
}

async fn write_response(socket: &mut TcpStream, response: &Response) -> std::io::Result<()> {
    let body = pack(&Value::Structure(response.to_structure())).expect("pack response");
    let mut framed = BytesMut::new();
    write_chunked(&body, &mut framed);
    socket.write_all(&framed).await?;
    socket.flush().await
}
