//! Typed pkt-line framing: encode/decode of a single packet, plus a stream decoder that consumes
//! a byte buffer and returns whichever whole packets it contains, leaving the remainder for the
//! caller to feed back in once more bytes arrive.

use bytes::Bytes;

use crate::protocol::types::ProtocolError;

/// Maximum payload length a single pkt-line may carry (65520 total minus the 4-byte length
/// prefix minus header bytes git reserves).
pub const MAX_PAYLOAD_LEN: usize = 65516;
pub const FLUSH: &[u8; 4] = b"0000";
pub const DELIM: &[u8; 4] = b"0001";

/// The three Git sentinel lengths plus ordinary data packets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PacketKind {
    Data(Bytes),
    Flush,
    Delim,
}

/// Result of decoding one packet out of a buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedPacket {
    pub kind: PacketKind,
    pub bytes_consumed: usize,
}

/// Encode `payload` as a single pkt-line: a 4-hex-digit length prefix (including itself) then
/// the payload bytes.
pub fn encode(payload: &[u8]) -> Result<Vec<u8>, ProtocolError> {
    if payload.len() > MAX_PAYLOAD_LEN {
        return Err(ProtocolError::InvalidRequest(format!(
            "pkt-line payload of {} bytes exceeds the {} byte limit",
            payload.len(),
            MAX_PAYLOAD_LEN
        )));
    }
    let total_len = payload.len() + 4;
    let mut out = Vec::with_capacity(total_len);
    out.extend_from_slice(format!("{total_len:04x}").as_bytes());
    out.extend_from_slice(payload);
    Ok(out)
}

pub fn encode_flush() -> Vec<u8> {
    FLUSH.to_vec()
}

pub fn encode_delim() -> Vec<u8> {
    DELIM.to_vec()
}

/// Decode exactly one packet starting at the front of `buf`. Returns `Ok(None)` if `buf` does
/// not yet hold a complete packet (caller should wait for more bytes).
pub fn decode(buf: &[u8]) -> Result<Option<DecodedPacket>, ProtocolError> {
    if buf.len() < 4 {
        return Ok(None);
    }

    let len_str = std::str::from_utf8(&buf[0..4])
        .map_err(|_| ProtocolError::InvalidRequest("pkt-line length is not UTF-8".to_string()))?;
    let len = usize::from_str_radix(len_str, 16)
        .map_err(|_| ProtocolError::InvalidRequest(format!("invalid pkt-line length `{len_str}`")))?;

    if len > 65520 {
        return Err(ProtocolError::InvalidRequest(format!(
            "pkt-line length {len} exceeds maximum of 65520"
        )));
    }

    match len {
        0 => Ok(Some(DecodedPacket {
            kind: PacketKind::Flush,
            bytes_consumed: 4,
        })),
        1 => Ok(Some(DecodedPacket {
            kind: PacketKind::Delim,
            bytes_consumed: 4,
        })),
        n if n < 4 => Err(ProtocolError::InvalidRequest(format!(
            "pkt-line length {n} is shorter than the 4-byte prefix"
        ))),
        n => {
            if buf.len() < n {
                return Ok(None);
            }
            Ok(Some(DecodedPacket {
                kind: PacketKind::Data(Bytes::copy_from_slice(&buf[4..n])),
                bytes_consumed: n,
            }))
        }
    }
}

/// Decode every complete packet at the front of `buf`, returning the packets found plus the
/// unconsumed suffix (an incomplete trailing packet, if any).
pub fn decode_stream(buf: &[u8]) -> Result<(Vec<DecodedPacket>, &[u8]), ProtocolError> {
    let mut packets = Vec::new();
    let mut cursor = 0;
    loop {
        match decode(&buf[cursor..])? {
            Some(packet) => {
                cursor += packet.bytes_consumed;
                packets.push(packet);
            }
            None => break,
        }
    }
    Ok((packets, &buf[cursor..]))
}
