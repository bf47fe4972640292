//! Chunked message framing.
//!
//! Each Bolt message is split into chunks of at most [`MAX_CHUNK_SIZE`]
//! bytes, each prefixed with a 2-byte big-endian length, and terminated by a
//! zero-length chunk. Chunking lets either side stream a message without
//! knowing its total size up front; a zero-length chunk with no accumulated
//! payload is a NOOP keep-alive and is skipped.

use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use super::error::BoltError;
use super::message::{Request, Response};
use super::packstream::{pack, StructCatalog, Value};

/// Largest chunk payload the codec emits.
pub const MAX_CHUNK_SIZE: usize = 16_384;

/// Default cap on a reassembled message.
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 16 * 1024 * 1024;

/// Write `payload` into `dst` as a chunked message with terminator.
pub fn write_chunked(payload: &[u8], dst: &mut BytesMut) {
    for chunk in payload.chunks(MAX_CHUNK_SIZE) {
        dst.put_u16(chunk.len() as u16);
        dst.put_slice(chunk);
    }
    dst.put_u16(0);
}

/// Client-side message codec: encodes requests, decodes responses.
///
/// The structure catalog is fixed by the negotiated protocol version, so a
/// codec is built per connection after the handshake.
#[derive(Debug)]
pub struct MessageCodec {
    catalog: StructCatalog,
    max_message_size: usize,
    assembly: BytesMut,
}

impl MessageCodec {
    /// Codec for a negotiated version's catalog.
    pub fn new(catalog: StructCatalog) -> Self {
        Self::with_max_size(catalog, DEFAULT_MAX_MESSAGE_SIZE)
    }

    /// Codec with a custom reassembly cap.
    pub fn with_max_size(catalog: StructCatalog, max_message_size: usize) -> Self {
        Self {
            catalog,
            max_message_size,
            assembly: BytesMut::with_capacity(4096),
        }
    }
}

impl Decoder for MessageCodec {
    type Item = Response;
    type Error = BoltError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Response>, BoltError> {
        loop {
            if src.len() < 2 {
                return Ok(None);
            }

            let chunk_size = u16::from_be_bytes([src[0], src[1]]) as usize;

            if chunk_size == 0 {
                src.advance(2);
                if self.assembly.is_empty() {
                    // NOOP keep-alive between messages
                    continue;
                }
                let body = self.assembly.split();
                let response = Response::from_bytes(&body, self.catalog)?;
                return Ok(Some(response));
            }

            if src.len() < 2 + chunk_size {
                return Ok(None);
            }

            if self.assembly.len() + chunk_size > self.max_message_size {
                return Err(BoltError::MessageTooLarge {
                    size: self.assembly.len() + chunk_size,
                    max: self.max_message_size,
                });
            }

            src.advance(2);
            self.assembly.extend_from_slice(&src[..chunk_size]);
            src.advance(chunk_size);
        }
    }
}

impl<'a> Encoder<&'a Request> for MessageCodec {
    type Error = BoltError;

    fn encode(&mut self, item: &'a Request, dst: &mut BytesMut) -> Result<(), BoltError> {
        let body = pack(&Value::Structure(item.to_structure()))?;
        write_chunked(&body, dst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bolt::message::{FailureMessage, RecordMessage, Run, Success};
    use crate::bolt::version::BoltVersion;

    fn codec() -> MessageCodec {
        MessageCodec::new(StructCatalog::for_version(BoltVersion::V5_0))
    }

    fn chunked_response(response: &Response) -> BytesMut {
        let body = pack(&Value::Structure(response.to_structure())).unwrap();
        let mut buf = BytesMut::new();
        write_chunked(&body, &mut buf);
        buf
    }

    #[test]
    fn decode_single_response() {
        let mut codec = codec();
        let mut buf = chunked_response(&Response::Record(RecordMessage::new(vec![
            Value::Integer(42),
        ])));

        let decoded = codec.decode(&mut buf).unwrap().unwrap();
        match decoded {
            Response::Record(r) => assert_eq!(r.values[0].as_int(), Some(42)),
            other => panic!("expected RECORD, got {}", other.name()),
        }
        assert!(codec.decode(&mut buf).unwrap().is_none());
    }

    #[test]
    fn decode_waits_for_complete_chunks() {
        let mut codec = codec();
        let full = chunked_response(&Response::Success(Success::new()));

        // Header only
        let mut partial = BytesMut::from(&full[..2]);
        assert!(codec.decode(&mut partial).unwrap().is_none());

        // Everything but the terminator
        let mut partial = BytesMut::from(&full[..full.len() - 1]);
        assert!(codec.decode(&mut partial).unwrap().is_none());

        let mut complete = full;
        assert!(codec.decode(&mut complete).unwrap().is_some());
    }

    #[test]
    fn decode_skips_noop() {
        let mut codec = codec();
        let mut buf = BytesMut::new();
        buf.put_u16(0); // NOOP
        buf.put_u16(0); // NOOP
        let tail = chunked_response(&Response::Ignored);
        buf.extend_from_slice(&tail);

        let decoded = codec.decode(&mut buf).unwrap().unwrap();
        assert!(matches!(decoded, Response::Ignored));
    }

    #[test]
    fn decode_reassembles_multi_chunk_messages() {
        let mut codec = codec();
        let big = "x".repeat(MAX_CHUNK_SIZE * 2 + 17);
        let record = Response::Record(RecordMessage::new(vec![Value::String(big.clone())]));
        let mut buf = chunked_response(&record);
        assert!(buf.len() > MAX_CHUNK_SIZE * 2);

        match codec.decode(&mut buf).unwrap().unwrap() {
            Response::Record(r) => assert_eq!(r.values[0].as_str(), Some(big.as_str())),
            other => panic!("expected RECORD, got {}", other.name()),
        }
    }

    #[test]
    fn decode_enforces_message_cap() {
        let mut codec =
            MessageCodec::with_max_size(StructCatalog::for_version(BoltVersion::V5_0), 64);
        let mut buf = BytesMut::new();
        buf.put_u16(128);
        buf.extend_from_slice(&[0u8; 128]);
        let err = codec.decode(&mut buf).unwrap_err();
        assert!(matches!(err, BoltError::MessageTooLarge { .. }));
    }

    #[test]
    fn decode_multiple_back_to_back() {
        let mut codec = codec();
        let mut buf = BytesMut::new();
        for i in 0..3 {
            buf.extend_from_slice(&chunked_response(&Response::Record(RecordMessage::new(
                vec![Value::Integer(i)],
            ))));
        }
        for i in 0..3 {
            match codec.decode(&mut buf).unwrap().unwrap() {
                Response::Record(r) => assert_eq!(r.values[0].as_int(), Some(i)),
                other => panic!("expected RECORD, got {}", other.name()),
            }
        }
        assert!(codec.decode(&mut buf).unwrap().is_none());
    }

    #[test]
    fn encode_request_is_chunked_and_terminated() {
        let mut codec = codec();
        let mut buf = BytesMut::new();
        codec
            .encode(&Request::Run(Run::new("RETURN 1")), &mut buf)
            .unwrap();

        let len = u16::from_be_bytes([buf[0], buf[1]]) as usize;
        assert_eq!(buf.len(), 2 + len + 2);
        assert_eq!(&buf[buf.len() - 2..], &[0, 0]);
    }

    #[test]
    fn failure_payload_survives_framing() {
        let mut codec = codec();
        let failure = FailureMessage::new("Neo.TransientError.General.DatabaseUnavailable", "busy");
        let mut buf = chunked_response(&Response::Failure(failure.clone()));
        match codec.decode(&mut buf).unwrap().unwrap() {
            Response::Failure(f) => assert_eq!(f, failure),
            other => panic!("expected FAILURE, got {}", other.name()),
        }
    }
}
