//! Frame encoding/decoding
//!
//! Every message on the debug link starts with the fixed two-byte
//! prefix `AA 55` followed by one opcode byte. Requests are exactly
//! 3 bytes. Short replies are 3 bytes where the third byte is the
//! ack/nack marker; longer replies repeat the request opcode in the
//! third byte and append payload bytes.

use super::ProtocolError;

/// Fixed prefix carried by every frame, request and reply
pub const FRAME_PREFIX: [u8; 2] = [0xAA, 0x55];

/// Third byte of a positive short reply
pub const ACK_BYTE: u8 = 0xAA;

/// Third byte of a negative short reply
pub const NACK_BYTE: u8 = 0x55;

/// Length of a short (ack/nack) reply
pub const SHORT_REPLY_LEN: usize = 3;

/// Classification of a 3-byte short reply
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShortReply {
    /// Device acknowledged the request
    Ack,
    /// Device declined the request
    Nack,
    /// Prefix was valid but the marker byte is neither ack nor nack
    Other(u8),
}

/// Build a 3-byte request frame for the given opcode
pub fn encode(opcode: u8) -> [u8; 3] {
    [FRAME_PREFIX[0], FRAME_PREFIX[1], opcode]
}

/// Classify a short reply.
///
/// The reply must be exactly 3 bytes and carry the frame prefix;
/// anything else is a framing violation. The third byte is classified
/// as [`ShortReply::Ack`], [`ShortReply::Nack`] or [`ShortReply::Other`].
pub fn decode_short(reply: &[u8]) -> Result<ShortReply, ProtocolError> {
    if reply.len() != SHORT_REPLY_LEN {
        return Err(ProtocolError::FramingError(format!(
            "short reply has {} bytes, expected {}",
            reply.len(),
            SHORT_REPLY_LEN
        )));
    }
    if reply[..2] != FRAME_PREFIX {
        return Err(ProtocolError::FramingError(format!(
            "bad frame prefix {:02x} {:02x}",
            reply[0], reply[1]
        )));
    }
    Ok(match reply[2] {
        ACK_BYTE => ShortReply::Ack,
        NACK_BYTE => ShortReply::Nack,
        other => ShortReply::Other(other),
    })
}

/// Validate a tagged reply and return its payload.
///
/// The reply must be exactly `expected_len` bytes, start with the
/// frame prefix, and carry `opcode` in the third byte. Any mismatch is
/// a [`ProtocolError::FramingError`]; callers must treat it as fatal
/// to the session.
pub fn decode_tagged<'a>(
    reply: &'a [u8],
    opcode: u8,
    expected_len: usize,
) -> Result<&'a [u8], ProtocolError> {
    if reply.len() != expected_len {
        return Err(ProtocolError::FramingError(format!(
            "tagged reply has {} bytes, expected {}",
            reply.len(),
            expected_len
        )));
    }
    if reply[..2] != FRAME_PREFIX {
        return Err(ProtocolError::FramingError(format!(
            "bad frame prefix {:02x} {:02x}",
            reply[0], reply[1]
        )));
    }
    if reply[2] != opcode {
        return Err(ProtocolError::FramingError(format!(
            "reply tagged {:#04x}, expected opcode {:#04x}",
            reply[2], opcode
        )));
    }
    Ok(&reply[3..])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_carries_prefix() {
        assert_eq!(encode(0x01), [0xAA, 0x55, 0x01]);
        assert_eq!(encode(0x33), [0xAA, 0x55, 0x33]);
    }

    #[test]
    fn test_decode_short_classification() {
        assert_eq!(decode_short(&[0xAA, 0x55, 0xAA]).unwrap(), ShortReply::Ack);
        assert_eq!(decode_short(&[0xAA, 0x55, 0x55]).unwrap(), ShortReply::Nack);
        // Every other marker byte is Other, not an error
        for b in [0x00u8, 0x01, 0x42, 0xFF] {
            assert_eq!(decode_short(&[0xAA, 0x55, b]).unwrap(), ShortReply::Other(b));
        }
    }

    #[test]
    fn test_decode_short_rejects_bad_prefix_and_length() {
        assert!(decode_short(&[0x55, 0xAA, 0xAA]).is_err());
        assert!(decode_short(&[0xAA, 0x55]).is_err());
        assert!(decode_short(&[0xAA, 0x55, 0xAA, 0x00]).is_err());
    }

    #[test]
    fn test_decode_tagged_payload() {
        let reply = [0xAA, 0x55, 0x10, 0x02, 0x20, 0x00];
        let payload = decode_tagged(&reply, 0x10, 6).unwrap();
        assert_eq!(payload, &[0x02, 0x20, 0x00]);
    }

    #[test]
    fn test_decode_tagged_wrong_opcode() {
        let reply = [0xAA, 0x55, 0x11, 0x02];
        assert!(decode_tagged(&reply, 0x12, 4).is_err());
    }

    #[test]
    fn test_decode_tagged_wrong_length() {
        let reply = [0xAA, 0x55, 0x10, 0x02];
        assert!(decode_tagged(&reply, 0x10, 6).is_err());
    }
}
