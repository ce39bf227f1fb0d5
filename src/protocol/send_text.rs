//! `0x4E` send-text frames

use std::sync::atomic::{AtomicU8, Ordering};

use super::opcodes::OP_SEND_TEXT;

pub const HEADER_SIZE: usize = 9;

/// Screen status byte of a send-text frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ScreenStatus {
    EvenAiAutomatic,
    EvenAiComplete,
    EvenAiManual,
    EvenAiNetworkError,
    #[default]
    TextShow,
    Raw(u8),
}

impl ScreenStatus {
    pub fn code(self) -> u8 {
        match self {
            ScreenStatus::EvenAiAutomatic => 0x31,
            ScreenStatus::EvenAiComplete => 0x41,
            ScreenStatus::EvenAiManual => 0x51,
            ScreenStatus::EvenAiNetworkError => 0x61,
            ScreenStatus::TextShow => 0x71,
            ScreenStatus::Raw(code) => code,
        }
    }
}

/// Builds send-text frames with a rolling sequence byte.
///
/// Header layout: `[0x4E, seq, 0x01, 0x00, status, 0x00, 0x00, page, total]`
/// followed by the UTF-8 text.
#[derive(Debug, Default)]
pub struct SendTextBuilder {
    sequence: AtomicU8,
}

impl SendTextBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset_sequence(&self) {
        self.sequence.store(0, Ordering::Relaxed);
    }

    /// Page and total are clamped to `0..=255`.
    pub fn build(&self, page: usize, total: usize, status: ScreenStatus, text: &[u8]) -> Vec<u8> {
        let clamp = |value: usize| value.min(u8::MAX as usize) as u8;
        let mut frame = Vec::with_capacity(HEADER_SIZE + text.len());
        frame.extend_from_slice(&[
            OP_SEND_TEXT,
            self.sequence.fetch_add(1, Ordering::Relaxed),
            0x01,
            0x00,
            status.code(),
            0x00,
            0x00,
            clamp(page),
            clamp(total),
        ]);
        frame.extend_from_slice(text);
        frame
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_layout() {
        let builder = SendTextBuilder::new();
        let frame = builder.build(1, 3, ScreenStatus::default(), b"hi");
        assert_eq!(frame, vec![0x4E, 0x00, 0x01, 0x00, 0x71, 0x00, 0x00, 0x01, 0x03, b'h', b'i']);
    }

    #[test]
    fn sequence_increments_and_wraps() {
        let builder = SendTextBuilder::new();
        assert_eq!(builder.build(0, 1, ScreenStatus::TextShow, b"")[1], 0);
        assert_eq!(builder.build(0, 1, ScreenStatus::TextShow, b"")[1], 1);
        for _ in 0..254 {
            builder.build(0, 1, ScreenStatus::TextShow, b"");
        }
        assert_eq!(builder.build(0, 1, ScreenStatus::TextShow, b"")[1], 0);
        builder.reset_sequence();
        assert_eq!(builder.build(0, 1, ScreenStatus::TextShow, b"")[1], 0);
    }

    #[test]
    fn pages_clamp_to_byte_range() {
        let frame = SendTextBuilder::new().build(300, 1000, ScreenStatus::EvenAiManual, b"");
        assert_eq!(frame[4], 0x51);
        assert_eq!(frame[7], 0xFF);
        assert_eq!(frame[8], 0xFF);
    }
}
