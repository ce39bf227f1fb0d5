//! Outbound command builders

use std::sync::atomic::{AtomicU8, Ordering};

use crate::types::{Lens, PerLens};

use super::opcodes::{
    OP_BATTERY, OP_DISPLAY, OP_EXIT, OP_FRAME_SERIAL, OP_HEARTBEAT, OP_HELLO, OP_LENS_SERIAL,
    OP_MIC_CONTROL, OP_SYSTEM_COMMAND, SUB_FIRMWARE,
};

/// Session hello carrying the negotiated MTU (little-endian).
pub fn hello(mtu: u16) -> Vec<u8> {
    let [lo, hi] = mtu.to_le_bytes();
    vec![OP_HELLO, lo, hi]
}

pub fn battery_request() -> Vec<u8> {
    vec![OP_BATTERY, 0x01]
}

pub fn firmware_request() -> Vec<u8> {
    vec![OP_SYSTEM_COMMAND, SUB_FIRMWARE]
}

pub fn exit() -> Vec<u8> {
    vec![OP_EXIT]
}

pub fn mic_control(enabled: bool) -> Vec<u8> {
    vec![OP_MIC_CONTROL, enabled as u8]
}

pub fn lens_serial_request() -> Vec<u8> {
    vec![OP_LENS_SERIAL]
}

pub fn frame_serial_request() -> Vec<u8> {
    vec![OP_FRAME_SERIAL]
}

/// Display brightness; `level` is clamped to the lens range 0..=0x29.
pub fn display_brightness(level: u8, auto: bool) -> Vec<u8> {
    vec![OP_DISPLAY, 0x04, level.min(0x29), auto as u8]
}

/// HUD height (0..=8) and depth (1..=9), optionally as a preview.
pub fn display_height_depth(height: u16, depth: u16, preview: bool) -> Vec<u8> {
    let [h_lo, h_hi] = height.min(8).to_le_bytes();
    let [d_lo, d_hi] = depth.clamp(1, 9).to_le_bytes();
    vec![OP_DISPLAY, 0x02, h_lo, h_hi, d_lo, d_hi, preview as u8]
}

/// Heartbeat frames `[0x25, seq]` with an independent wrapping sequence per
/// lens.
#[derive(Debug, Default)]
pub struct HeartbeatSequencer {
    next: PerLens<AtomicU8>,
}

impl HeartbeatSequencer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the next heartbeat for `lens`, returning the frame and its
    /// sequence number.
    pub fn next_frame(&self, lens: Lens) -> (Vec<u8>, u8) {
        let sequence = self.next[lens].fetch_add(1, Ordering::Relaxed);
        (vec![OP_HEARTBEAT, sequence], sequence)
    }

    pub fn reset(&self, lens: Lens) {
        self.next[lens].store(0, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_commands() {
        assert_eq!(battery_request(), vec![0x2C, 0x01]);
        assert_eq!(firmware_request(), vec![0x23, 0x74]);
        assert_eq!(exit(), vec![0x18]);
        assert_eq!(mic_control(true), vec![0x0E, 0x01]);
        assert_eq!(mic_control(false), vec![0x0E, 0x00]);
        assert_eq!(hello(498), vec![0x4D, 0xF2, 0x01]);
    }

    #[test]
    fn display_commands_clamp() {
        assert_eq!(display_brightness(0x40, true), vec![0x26, 0x04, 0x29, 0x01]);
        assert_eq!(display_height_depth(12, 0, false), vec![0x26, 0x02, 8, 0, 1, 0, 0]);
    }

    #[test]
    fn heartbeat_sequence_is_per_lens_and_wraps() {
        let sequencer = HeartbeatSequencer::new();
        assert_eq!(sequencer.next_frame(Lens::Left), (vec![0x25, 0], 0));
        assert_eq!(sequencer.next_frame(Lens::Left).1, 1);
        assert_eq!(sequencer.next_frame(Lens::Right).1, 0);

        for _ in 0..254 {
            sequencer.next_frame(Lens::Left);
        }
        assert_eq!(sequencer.next_frame(Lens::Left).1, 0);

        sequencer.reset(Lens::Right);
        assert_eq!(sequencer.next_frame(Lens::Right).1, 0);
    }
}
