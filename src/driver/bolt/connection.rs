//! One physical Bolt connection.
//!
//! Owns the socket, performs the version handshake, and moves messages with
//! strict request/response pipelining: requests may be written back to back
//! without waiting, and responses are consumed in exactly the order their
//! requests were sent. The connection keeps a queue of pending-response
//! entries to enforce that discipline.
//!
//! Any I/O fault or protocol violation makes the connection [`Defunct`]:
//! a half-sent or half-received Bolt stream cannot be trusted, so a defunct
//! connection is never returned to the pool.
//!
//! [`Defunct`]: ConnectionState::Defunct

use std::collections::VecDeque;

use bytes::BytesMut;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_util::codec::{Decoder, Encoder};
use tracing::{debug, trace};

use crate::bolt::codec::MessageCodec;
use crate::bolt::handshake::{build_handshake, parse_handshake_response, HANDSHAKE_RESPONSE_SIZE};
use crate::bolt::message::{Request, Response};
use crate::bolt::packstream::StructCatalog;
use crate::bolt::version::BoltVersion;
use crate::bolt::{BoltError, BoltResult};

/// Connection lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// TCP connected, handshake not yet attempted
    Disconnected,
    /// Handshake in flight
    Handshaking,
    /// Version agreed, authentication not yet confirmed
    Authenticating,
    /// Authenticated and idle
    Ready,
    /// One or more responses outstanding
    Streaming,
    /// Closed cleanly
    Closed,
    /// Observed an I/O fault or protocol violation; terminal
    Defunct,
}

/// A physical connection to one Bolt server.
pub struct BoltConnection {
    stream: TcpStream,
    codec: Option<MessageCodec>,
    read_buf: BytesMut,
    write_buf: BytesMut,
    version: Option<BoltVersion>,
    state: ConnectionState,
    address: String,
    /// Names of requests whose responses have not yet been consumed,
    /// in send order.
    pending: VecDeque<&'static str>,
}

impl BoltConnection {
    /// Open a TCP connection. The handshake is a separate step.
    pub async fn connect(address: &str) -> BoltResult<Self> {
        let stream = TcpStream::connect(address).await?;
        stream.set_nodelay(true).ok();
        trace!(address, "tcp connection established");

        Ok(Self {
            stream,
            codec: None,
            read_buf: BytesMut::with_capacity(8192),
            write_buf: BytesMut::with_capacity(8192),
            version: None,
            state: ConnectionState::Disconnected,
            address: address.to_string(),
            pending: VecDeque::new(),
        })
    }

    /// Run the version handshake.
    ///
    /// Offers [`BoltVersion::SUPPORTED`] in preference order. The server
    /// must echo one of them; an all-zero reply fails the connection with
    /// [`BoltError::UnsupportedProtocolVersion`] before any authentication
    /// message is sent.
    pub async fn handshake(&mut self) -> BoltResult<BoltVersion> {
        if self.state != ConnectionState::Disconnected {
            return Err(self.fault(BoltError::Protocol(format!(
                "handshake attempted in state {:?}",
                self.state
            ))));
        }
        self.state = ConnectionState::Handshaking;

        let preamble = build_handshake(&BoltVersion::SUPPORTED);
        if let Err(e) = self.stream.write_all(&preamble).await {
            return Err(self.fault(e.into()));
        }

        let mut reply = [0u8; HANDSHAKE_RESPONSE_SIZE];
        if let Err(e) = self.stream.read_exact(&mut reply).await {
            return Err(self.fault(e.into()));
        }

        let version = match parse_handshake_response(reply, &BoltVersion::SUPPORTED) {
            Ok(v) => v,
            Err(e) => return Err(self.fault(e)),
        };

        self.codec = Some(MessageCodec::new(StructCatalog::for_version(version)));
        self.version = Some(version);
        self.state = ConnectionState::Authenticating;
        debug!(address = %self.address, %version, "bolt handshake complete");
        Ok(version)
    }

    /// Mark authentication as confirmed; the connection may carry work.
    pub fn mark_authenticated(&mut self) {
        if self.state == ConnectionState::Authenticating {
            self.state = ConnectionState::Ready;
        }
    }

    /// Write one request without waiting for its response.
    ///
    /// Pipelining entry point: callers may send several requests and then
    /// consume the responses in order with [`recv`](Self::recv).
    pub async fn send(&mut self, request: &Request) -> BoltResult<()> {
        self.ensure_usable()?;

        self.write_buf.clear();
        let codec = match self.codec.as_mut() {
            Some(c) => c,
            None => {
                return Err(self.fault(BoltError::Protocol("send before handshake".to_string())))
            }
        };
        if let Err(e) = codec.encode(request, &mut self.write_buf) {
            return Err(self.fault(e));
        }

        if let Err(e) = self.stream.write_all(&self.write_buf).await {
            return Err(self.fault(e.into()));
        }
        if let Err(e) = self.stream.flush().await {
            return Err(self.fault(e.into()));
        }

        trace!(address = %self.address, message = request.name(), "sent");
        if request.expects_response() {
            self.pending.push_back(request.name());
            if self.state == ConnectionState::Ready {
                self.state = ConnectionState::Streaming;
            }
        }
        Ok(())
    }

    /// Consume the next response, in request send order.
    ///
    /// A RECORD leaves its request pending (more responses follow); any
    /// other response retires the oldest pending request.
    pub async fn recv(&mut self) -> BoltResult<Response> {
        self.ensure_usable()?;
        if self.pending.is_empty() {
            return Err(self.fault(BoltError::Protocol(
                "receive with no request awaiting a response".to_string(),
            )));
        }

        loop {
            let codec = match self.codec.as_mut() {
                Some(c) => c,
                None => {
                    return Err(
                        self.fault(BoltError::Protocol("receive before handshake".to_string()))
                    )
                }
            };
            match codec.decode(&mut self.read_buf) {
                Ok(Some(response)) => {
                    if !matches!(response, Response::Record(_)) {
                        let request = self.pending.pop_front();
                        trace!(
                            address = %self.address,
                            request = request.unwrap_or("?"),
                            response = response.name(),
                            "response"
                        );
                        if self.pending.is_empty() && self.state == ConnectionState::Streaming {
                            self.state = ConnectionState::Ready;
                        }
                    }
                    return Ok(response);
                }
                Ok(None) => {
                    let n = match self.stream.read_buf(&mut self.read_buf).await {
                        Ok(n) => n,
                        Err(e) => return Err(self.fault(e.into())),
                    };
                    if n == 0 {
                        return Err(self.fault(BoltError::ConnectionClosed));
                    }
                }
                Err(e) => return Err(self.fault(e)),
            }
        }
    }

    /// Send one request and consume its single terminal response.
    pub async fn request(&mut self, request: &Request) -> BoltResult<Response> {
        self.send(request).await?;
        self.recv().await
    }

    /// Close gracefully: best-effort GOODBYE, then socket shutdown.
    pub async fn close(&mut self) {
        if matches!(self.state, ConnectionState::Ready | ConnectionState::Streaming) {
            let _ = self.send(&Request::Goodbye).await;
        }
        if self.state != ConnectionState::Defunct {
            self.state = ConnectionState::Closed;
        }
        let _ = self.stream.shutdown().await;
        debug!(address = %self.address, "connection closed");
    }

    /// Force the terminal defunct state.
    pub fn mark_defunct(&mut self) {
        self.state = ConnectionState::Defunct;
    }

    /// Responses not yet consumed.
    pub fn pending_responses(&self) -> usize {
        self.pending.len()
    }

    /// Negotiated protocol version.
    pub fn version(&self) -> Option<BoltVersion> {
        self.version
    }

    /// Lifecycle state.
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Remote address string.
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Whether the connection can carry further work.
    pub fn is_usable(&self) -> bool {
        matches!(
            self.state,
            ConnectionState::Authenticating | ConnectionState::Ready | ConnectionState::Streaming
        )
    }

    fn ensure_usable(&mut self) -> BoltResult<()> {
        if self.is_usable() {
            Ok(())
        } else {
            Err(BoltError::Protocol(format!(
                "connection to {} unusable in state {:?}",
                self.address, self.state
            )))
        }
    }

    /// Record a fault: the connection is defunct from here on.
    fn fault(&mut self, err: BoltError) -> BoltError {
        debug!(address = %self.address, error = %err, "connection fault");
        self.state = ConnectionState::Defunct;
        err
    }
}

impl std::fmt::Debug for BoltConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoltConnection")
            .field("address", &self.address)
            .field("state", &self.state)
            .field("version", &self.version)
            .field("pending", &self.pending.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bolt::message::{RecordMessage, Run};
    use crate::bolt::packstream::Value;
    use crate::driver::testing::ScriptedServer;

    #[tokio::test]
    async fn handshake_negotiates_preferred_version() {
        let server = ScriptedServer::spawn().await;
        let mut conn = BoltConnection::connect(&server.address()).await.unwrap();
        let version = conn.handshake().await.unwrap();
        assert_eq!(version, BoltVersion::V5_0);
        assert_eq!(conn.state(), ConnectionState::Authenticating);
    }

    #[tokio::test]
    async fn rejected_handshake_is_unsupported_version_and_sends_nothing_more() {
        let server = ScriptedServer::spawn_rejecting().await;
        let mut conn = BoltConnection::connect(&server.address()).await.unwrap();
        let err = conn.handshake().await.unwrap_err();
        assert!(matches!(err, BoltError::UnsupportedProtocolVersion));
        assert_eq!(conn.state(), ConnectionState::Defunct);

        // The server sees the socket close without a single message byte.
        assert_eq!(server.bytes_after_handshake().await, 0);
    }

    #[tokio::test]
    async fn pipelined_responses_arrive_in_send_order() {
        let server = ScriptedServer::spawn().await;
        let mut conn = BoltConnection::connect(&server.address()).await.unwrap();
        conn.handshake().await.unwrap();
        conn.mark_authenticated();

        // Two RUNs written before any read; the scripted server answers RUN
        // with SUCCESS{fields:[echo of the query]}.
        conn.send(&Request::Run(Run::new("first"))).await.unwrap();
        conn.send(&Request::Run(Run::new("second"))).await.unwrap();
        assert_eq!(conn.pending_responses(), 2);
        assert_eq!(conn.state(), ConnectionState::Streaming);

        let first = conn.recv().await.unwrap();
        let second = conn.recv().await.unwrap();
        match (first, second) {
            (Response::Success(a), Response::Success(b)) => {
                assert_eq!(a.fields().unwrap(), vec!["first"]);
                assert_eq!(b.fields().unwrap(), vec!["second"]);
            }
            other => panic!("expected two SUCCESS, got {:?}", (other.0.name(), other.1.name())),
        }
        assert_eq!(conn.pending_responses(), 0);
        assert_eq!(conn.state(), ConnectionState::Ready);
    }

    #[tokio::test]
    async fn records_do_not_retire_their_request() {
        let server = ScriptedServer::builder()
            .records(vec![vec![Value::Integer(1)], vec![Value::Integer(2)]])
            .spawn_configured()
            .await;
        let mut conn = BoltConnection::connect(&server.address()).await.unwrap();
        conn.handshake().await.unwrap();
        conn.mark_authenticated();

        conn.send(&Request::Pull(crate::bolt::message::Pull::all()))
            .await
            .unwrap();

        let mut records = Vec::new();
        loop {
            match conn.recv().await.unwrap() {
                Response::Record(RecordMessage { values }) => {
                    assert_eq!(conn.pending_responses(), 1);
                    records.push(values);
                }
                Response::Success(_) => break,
                other => panic!("unexpected {}", other.name()),
            }
        }
        assert_eq!(records.len(), 2);
        assert_eq!(conn.pending_responses(), 0);
    }

    #[tokio::test]
    async fn recv_without_pending_is_a_protocol_fault() {
        let server = ScriptedServer::spawn().await;
        let mut conn = BoltConnection::connect(&server.address()).await.unwrap();
        conn.handshake().await.unwrap();
        conn.mark_authenticated();

        let err = conn.recv().await.unwrap_err();
        assert!(matches!(err, BoltError::Protocol(_)));
        assert_eq!(conn.state(), ConnectionState::Defunct);
    }

    #[tokio::test]
    async fn defunct_connection_refuses_work() {
        let server = ScriptedServer::spawn().await;
        let mut conn = BoltConnection::connect(&server.address()).await.unwrap();
        conn.handshake().await.unwrap();
        conn.mark_authenticated();
        conn.mark_defunct();

        let err = conn.send(&Request::Reset).await.unwrap_err();
        assert!(matches!(err, BoltError::Protocol(_)));
    }

    #[tokio::test]
    async fn close_is_graceful() {
        let server = ScriptedServer::spawn().await;
        let mut conn = BoltConnection::connect(&server.address()).await.unwrap();
        conn.handshake().await.unwrap();
        conn.mark_authenticated();
        conn.close().await;
        assert_eq!(conn.state(), ConnectionState::Closed);
        assert!(!conn.is_usable());
    }

    #[tokio::test]
    async fn peer_eof_mid_exchange_is_fatal() {
        let server = ScriptedServer::builder().close_after_handshake().spawn_configured().await;
        let mut conn = BoltConnection::connect(&server.address()).await.unwrap();
        conn.handshake().await.unwrap();
        conn.mark_authenticated();

        // Depending on timing the fault shows up on the write or the read.
        let err = match conn.send(&Request::Reset).await {
            Ok(()) => conn.recv().await.unwrap_err(),
            Err(e) => e,
        };
        assert!(matches!(err, BoltError::ConnectionClosed | BoltError::Io(_)));
        assert_eq!(conn.state(), ConnectionState::Defunct);
    }
}
