//! Stateless frame decoding and byte helpers.
//!
//! The second byte of a notification is ambiguous on the wire: it is either a
//! status/ack code or a length prefix. [`decode_frame`] resolves it the same
//! way for every opcode so the dispatcher can select on a stable sub-opcode.

use std::sync::Arc;

use crate::types::{Ack, AckType, Frame};

use super::opcodes::{ACK_ALT_HEAD, OP_AUDIO, STATUS_BUSY, STATUS_OK};

/// Decode one notification into a [`Frame`]. Returns `None` for empty input.
pub fn decode_frame(bytes: &[u8]) -> Option<Frame> {
    let (&opcode, rest) = bytes.split_first()?;
    let raw: Arc<[u8]> = Arc::from(bytes);
    let empty = || Arc::<[u8]>::from(&[][..]);

    if opcode == OP_AUDIO {
        let payload = if bytes.len() > 2 { Arc::from(&bytes[2..]) } else { empty() };
        return Some(Frame {
            opcode,
            length: None,
            sequence: rest.first().map(|&b| b as u16),
            status: None,
            payload,
            raw,
        });
    }

    let Some(&second) = rest.first() else {
        return Some(Frame { opcode, length: None, sequence: None, status: None, payload: empty(), raw });
    };

    let remaining = bytes.len() - 2;
    let is_status = second == STATUS_OK || second == STATUS_BUSY || second as usize > remaining;
    if is_status {
        let payload = if remaining > 0 { Arc::from(&bytes[2..]) } else { empty() };
        return Some(Frame { opcode, length: None, sequence: None, status: Some(second), payload, raw });
    }

    let length = second as usize;
    let (start, declared, sequence) = if length >= 2 && bytes.len() >= 4 {
        (4, length - 2, Some(u16::from_be_bytes([bytes[2], bytes[3]])))
    } else {
        (2, length, None)
    };
    let available = bytes.len().saturating_sub(start);
    let take = declared.min(available);
    let payload = if take > 0 { Arc::from(&bytes[start..start + take]) } else { empty() };

    Some(Frame { opcode, length: Some(second), sequence, status: None, payload, raw })
}

/// Recognise a low-level command acknowledgment.
///
/// A status byte decides when present. Otherwise the last non-zero payload
/// byte (or raw byte after the opcode) must be `0xC9`/`0xCA`.
pub fn detect_ack(frame: &Frame) -> Option<Ack> {
    let (code, payload) = match frame.status {
        Some(status) => (status, frame.payload.clone()),
        None => {
            let tail = frame
                .payload
                .iter()
                .rev()
                .find(|&&b| b != 0)
                .or_else(|| frame.raw.iter().skip(1).rev().find(|&&b| b != 0))?;
            (*tail, frame.payload.clone())
        }
    };
    let success = match code {
        STATUS_OK => true,
        STATUS_BUSY => false,
        _ => return None,
    };
    Some(Ack { code, success, busy: code == STATUS_BUSY, sequence: frame.sequence, payload })
}

/// Cheap check used by the transport to tag ack-looking notifications.
pub fn looks_like_ack(bytes: &[u8]) -> bool {
    match bytes.first() {
        Some(&STATUS_OK) | Some(&ACK_ALT_HEAD) => true,
        Some(_) => std::str::from_utf8(bytes).map(|s| s.trim() == "OK").unwrap_or(false),
        None => false,
    }
}

/// Outcome of a command as read from its reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reply {
    pub success: bool,
    /// The lens answered with the busy status.
    pub busy: bool,
    pub ack_type: AckType,
}

/// Match a notification against a command sent with `opcode`.
///
/// An ASCII `OK` answers any command. Otherwise the frame must echo the
/// opcode and carry an ack byte.
pub fn classify_reply(bytes: &[u8], opcode: u8) -> Option<Reply> {
    if std::str::from_utf8(bytes).is_ok_and(|s| s.trim_matches(|c: char| c.is_whitespace() || c == '\0') == "OK") {
        return Some(Reply { success: true, busy: false, ack_type: AckType::Textual });
    }
    let frame = decode_frame(bytes)?;
    if frame.opcode != opcode {
        return None;
    }
    detect_ack(&frame).map(|ack| Reply { success: ack.success, busy: ack.busy, ack_type: AckType::Binary })
}

/// Little-endian unsigned integer over `len` bytes starting at `start`.
/// `None` if the range is out of bounds or `len` is zero or above 8.
pub fn read_le(bytes: &[u8], start: usize, len: usize) -> Option<u64> {
    if len == 0 || len > 8 {
        return None;
    }
    let slice = bytes.get(start..start.checked_add(len)?)?;
    Some(slice.iter().enumerate().fold(0u64, |acc, (i, &b)| acc | (b as u64) << (8 * i)))
}

pub(crate) fn is_printable(byte: u8) -> bool {
    byte == b'\n' || byte == b'\r' || (0x20..=0x7E).contains(&byte)
}

/// Printable ASCII (plus CR/LF) decoded and trimmed of whitespace and NULs.
/// `None` when empty, when any byte is non-printable, or when nothing is left
/// after trimming.
pub fn decode_ascii(bytes: &[u8]) -> Option<String> {
    if bytes.is_empty() || !bytes.iter().all(|&b| is_printable(b)) {
        return None;
    }
    let text = String::from_utf8_lossy(bytes);
    let trimmed = text.trim_matches(|c: char| c <= ' ' || c == '\0');
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}
