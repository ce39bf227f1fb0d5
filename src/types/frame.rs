//! Frame types for inbound notification traffic

use std::fmt::Write as _;
use std::sync::Arc;

use super::Lens;

/// Raw notification payload as delivered by a transport client.
///
/// This is the unit that flows from a lens to the dispatcher. The bytes are
/// shared (zero-copy via Arc) between every broadcast receiver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawFrame {
    /// Lens that produced the notification
    pub lens: Lens,

    /// Receive timestamp in milliseconds
    pub timestamp: u64,

    /// Notification bytes
    pub bytes: Arc<[u8]>,
}

impl RawFrame {
    pub fn new(lens: Lens, timestamp: u64, bytes: impl Into<Arc<[u8]>>) -> Self {
        Self { lens, timestamp, bytes: bytes.into() }
    }
}

/// A decoded protocol frame.
///
/// Immutable once decoded. `status` and `length` are mutually exclusive: the
/// second byte is read either as a status/ack code or as a length prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub opcode: u8,
    pub length: Option<u8>,
    pub sequence: Option<u16>,
    pub status: Option<u8>,
    pub payload: Arc<[u8]>,
    pub raw: Arc<[u8]>,
}

impl Frame {
    /// Secondary selector used by the dispatch table.
    ///
    /// The status byte when present, otherwise the first payload byte.
    pub fn sub_opcode(&self) -> Option<u8> {
        self.status.or_else(|| self.payload.first().copied())
    }

    /// Uppercase hex rendering of the raw bytes.
    pub fn raw_hex(&self) -> String {
        to_hex(&self.raw)
    }
}

/// Uppercase hex without separators.
pub fn to_hex(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        let _ = write!(out, "{byte:02X}");
    }
    out
}
