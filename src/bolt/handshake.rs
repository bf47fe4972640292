//! Client-side Bolt handshake.
//!
//! The client opens every connection with a 20-byte preamble: the 4-byte
//! magic followed by four version proposals in preference order (unused
//! slots zeroed). The server answers with the 4 bytes of the version it
//! picked, or all zeroes to reject the connection.

use super::error::BoltError;
use super::version::BoltVersion;

/// Bolt magic preamble.
pub const BOLT_MAGIC: [u8; 4] = [0x60, 0x60, 0xB0, 0x17];

/// Size of the client's handshake message.
pub const HANDSHAKE_SIZE: usize = 20;

/// Size of the server's reply.
pub const HANDSHAKE_RESPONSE_SIZE: usize = 4;

/// Build the client handshake from an ordered candidate list.
///
/// Only the first four versions fit the wire format; the driver's
/// [`BoltVersion::SUPPORTED`] list is exactly four entries.
pub fn build_handshake(versions: &[BoltVersion]) -> [u8; HANDSHAKE_SIZE] {
    let mut buf = [0u8; HANDSHAKE_SIZE];
    buf[0..4].copy_from_slice(&BOLT_MAGIC);
    for (slot, version) in versions.iter().take(4).enumerate() {
        let offset = 4 + slot * 4;
        buf[offset..offset + 4].copy_from_slice(&version.to_bytes());
    }
    buf
}

/// Interpret the server's 4-byte reply.
///
/// All-zero means the server supports none of the offered versions; any
/// other reply must echo one of the versions we proposed, otherwise the
/// server is off-protocol.
pub fn parse_handshake_response(
    reply: [u8; HANDSHAKE_RESPONSE_SIZE],
    offered: &[BoltVersion],
) -> Result<BoltVersion, BoltError> {
    if reply == [0, 0, 0, 0] {
        return Err(BoltError::UnsupportedProtocolVersion);
    }
    match BoltVersion::from_bytes(reply) {
        Some(version) if offered.contains(&version) => Ok(version),
        _ => Err(BoltError::Protocol(format!(
            "server chose unoffered version bytes {:02X?}",
            reply
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handshake_layout() {
        let buf = build_handshake(&BoltVersion::SUPPORTED);
        assert_eq!(&buf[0..4], &BOLT_MAGIC);
        assert_eq!(&buf[4..8], &[0x00, 0x05, 0x00, 0x00]); // 5.0 first
        assert_eq!(&buf[8..12], &[0x00, 0x04, 0x04, 0x00]); // 4.4
        assert_eq!(&buf[12..16], &[0x00, 0x04, 0x03, 0x00]); // 4.3
        assert_eq!(&buf[16..20], &[0x00, 0x04, 0x00, 0x00]); // 4.0
    }

    #[test]
    fn short_candidate_list_zero_fills() {
        let buf = build_handshake(&[BoltVersion::V5_0]);
        assert_eq!(&buf[8..20], &[0u8; 12]);
    }

    #[test]
    fn accepts_echoed_version() {
        let version =
            parse_handshake_response([0x00, 0x04, 0x04, 0x00], &BoltVersion::SUPPORTED).unwrap();
        assert_eq!(version, BoltVersion::V4_4);
    }

    #[test]
    fn all_zero_reply_is_unsupported_version() {
        let err = parse_handshake_response([0, 0, 0, 0], &BoltVersion::SUPPORTED).unwrap_err();
        assert!(matches!(err, BoltError::UnsupportedProtocolVersion));
    }

    #[test]
    fn unoffered_version_is_a_protocol_violation() {
        let err = parse_handshake_response([0x00, 0x03, 0x00, 0x00], &BoltVersion::SUPPORTED)
            .unwrap_err();
        assert!(matches!(err, BoltError::Protocol(_)));

        let err = parse_handshake_response([0x00, 0x05, 0x00, 0x00], &[BoltVersion::V4_0])
            .unwrap_err();
        assert!(matches!(err, BoltError::Protocol(_)));
    }
}
