//! Pure decoders for individual reply families.
//!
//! Every function here takes a decoded [`Frame`] and returns `Option`/`Vec`;
//! none of them log, allocate channels or touch shared state.

use std::sync::Arc;

use crate::types::{
    Ack, AudioPacket, BatteryInfo, CaseUpdate, DeviceVitals, DisplaySettings, EnvironmentSnapshot,
    EvenAiEvent, F5EventType, Frame, SerialKind, SerialNumber, StateFlags, SystemCommand,
    SystemEvent,
};

use super::codec::{decode_ascii, is_printable, read_le};
use super::opcodes::{
    OP_EVENT, OP_LENS_SERIAL, STATUS_BUSY, STATUS_COMPLETE, STATUS_CONTINUE, STATUS_OK,
    SUB_BATTERY, SUB_CHARGING, SUB_FIRMWARE, environment_key,
};

fn percent(value: u8) -> Option<u8> {
    (value <= 100).then_some(value)
}

/// Battery payloads may start with a `0x01`/`0x02` subcommand echo.
fn battery_start(payload: &[u8]) -> usize {
    match payload.first() {
        Some(0x01) | Some(0x02) => 1,
        _ => 0,
    }
}

/// Lens and case battery percentages, falling back to `raw[2]`/`raw[3]`.
pub fn decode_battery(frame: &Frame) -> Option<(Option<u8>, Option<u8>)> {
    let payload = &frame.payload[..];
    let start = battery_start(payload);
    let (primary, case) = if payload.is_empty() {
        (None, None)
    } else {
        (
            payload.get(start).copied().and_then(percent),
            payload.get(start + 1).copied().and_then(percent),
        )
    };
    let primary = primary.or_else(|| frame.raw.get(2).copied().and_then(percent));
    let case = case.or_else(|| frame.raw.get(3).copied().and_then(percent));
    if primary.is_none() && case.is_none() {
        return None;
    }
    Some((primary, case))
}

/// Lens voltage block: little-endian millivolts followed by a charging flag.
pub fn decode_battery_info(frame: &Frame) -> Option<BatteryInfo> {
    let payload = &frame.payload[..];
    let body = payload.get(battery_start(payload)..)?;
    if body.len() < 2 {
        return None;
    }
    Some(BatteryInfo {
        voltage_mv: u16::from_le_bytes([body[0], body[1]]),
        charging: body.get(2) == Some(&1),
    })
}

/// Case percent, voltage (1000..=6000 mV) and charging flag.
pub fn decode_case_battery(frame: &Frame) -> Option<CaseUpdate> {
    let payload = &frame.payload[..];
    if payload.is_empty() {
        return None;
    }
    let start = battery_start(payload);
    let battery_percent = payload.get(start + 1).copied().and_then(percent);
    let voltage_mv = read_le(payload, start + 2, 2)
        .map(|v| v as u16)
        .filter(|v| (1_000..=6_000).contains(v));
    let charging = payload.get(start + 4).and_then(|&v| flag(v));
    let update = CaseUpdate { battery_percent, charging, voltage_mv, ..CaseUpdate::default() };
    (!update.is_empty()).then_some(update)
}

fn flag(value: u8) -> Option<bool> {
    match value {
        0 => Some(false),
        1 => Some(true),
        _ => None,
    }
}

/// Firmware string following the `0x74` subcommand.
pub fn decode_firmware(frame: &Frame) -> Option<String> {
    let body = if frame.status == Some(SUB_FIRMWARE) {
        &frame.payload[..]
    } else if frame.payload.first() == Some(&SUB_FIRMWARE) {
        &frame.payload[1..]
    } else {
        &frame.payload[..]
    };
    let text = String::from_utf8_lossy(body);
    let trimmed = text.trim_matches(|c: char| c <= ' ' || c == '\0');
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

/// Uptime in seconds, little-endian over at most four bytes.
pub fn decode_uptime(frame: &Frame) -> Option<u64> {
    if !frame.payload.is_empty() {
        return read_le(&frame.payload, 0, frame.payload.len().min(4));
    }
    let available = frame.raw.len().saturating_sub(2);
    read_le(&frame.raw, 2, available.min(4))
}

pub fn decode_state_flags(frame: &Frame) -> Option<StateFlags> {
    frame.payload.first().map(|&bits| StateFlags::from_bits(bits))
}

/// Device status flags plus the optional case TLV pairs that follow them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaseState {
    pub flags: Option<StateFlags>,
    pub silent_mode: Option<bool>,
    pub lid_open: Option<bool>,
}

pub fn decode_case_state(frame: &Frame) -> Option<CaseState> {
    let flags = decode_state_flags(frame);
    let payload = &frame.payload[..];
    if flags.is_none() && payload.is_empty() {
        return None;
    }
    let mut silent_mode = flags.map(|f| f.silent_mode);
    let mut lid_open = flags.map(|f| f.case_open);
    let mut index = 1;
    while index + 1 < payload.len() {
        let value = flag(payload[index + 1]);
        match payload[index] {
            0x0A => silent_mode = value.or(silent_mode),
            0x0B => lid_open = value.or(lid_open),
            _ => {}
        }
        index += 2;
    }
    Some(CaseState { flags, silent_mode, lid_open })
}

/// Wear state reported by a silent-mode reply (`2B 69 <silent> <state>`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SilentState {
    pub silent_mode: Option<bool>,
    pub flags: Option<StateFlags>,
    pub state_code: Option<u8>,
}

pub fn decode_silent_state(frame: &Frame) -> Option<SilentState> {
    let silent_mode = match frame.raw.get(2) {
        Some(0x0C) => Some(true),
        Some(0x0A) => Some(false),
        _ => None,
    };
    let state_code = frame.raw.get(3).copied();
    let wear = |wearing, in_cradle, case_open, charging| StateFlags {
        wearing,
        in_cradle,
        silent_mode: silent_mode.unwrap_or(false),
        case_open,
        charging,
    };
    let flags = match state_code {
        Some(0x06) => Some(wear(true, false, false, false)),
        Some(0x07) => Some(wear(false, false, false, false)),
        Some(0x08) => Some(wear(false, true, true, false)),
        Some(0x0A) => Some(wear(false, true, false, false)),
        Some(0x0B) => Some(wear(false, true, false, true)),
        _ => None,
    };
    if silent_mode.is_none() && flags.is_none() {
        return None;
    }
    Some(SilentState { silent_mode, flags, state_code })
}

/// Framed microphone audio: `len_lo len_hi channel` then up to `len` bytes.
pub fn decode_audio(frame: &Frame) -> Option<AudioPacket> {
    let payload = &frame.payload[..];
    if payload.len() < 3 {
        return None;
    }
    let declared = u16::from_le_bytes([payload[0], payload[1]]);
    let available = payload.len() - 3;
    let take = (declared as usize).min(available);
    Some(AudioPacket {
        sequence: frame.sequence,
        channel: Some(payload[2]),
        declared_length: Some(declared),
        data: Arc::from(&payload[3..3 + take]),
    })
}

fn is_ack_code(code: u8) -> bool {
    matches!(code, STATUS_OK | STATUS_BUSY | STATUS_COMPLETE | STATUS_CONTINUE)
}

/// System status ack (`0x39`): the status byte, else the last ack-looking
/// payload byte. Continue/complete count as success.
pub fn decode_system_ack(frame: &Frame) -> Option<Ack> {
    let code = frame
        .status
        .filter(|&s| is_ack_code(s))
        .or_else(|| frame.payload.iter().rev().copied().find(|&b| is_ack_code(b)))?;
    Some(Ack {
        code,
        success: code != STATUS_BUSY,
        busy: code == STATUS_BUSY,
        sequence: frame.sequence,
        payload: frame.payload.clone(),
    })
}

/// `0x32..=0x36` diagnostic reading: text when printable, else a number of
/// at most four little-endian bytes.
pub fn decode_environment(frame: &Frame) -> EnvironmentSnapshot {
    let key = environment_key(frame.opcode)
        .map(str::to_string)
        .unwrap_or_else(|| format!("opcode_{:02X}", frame.opcode));
    let text = decode_ascii(&frame.payload);
    let numeric = match (&text, frame.payload.len()) {
        (None, 1..=4) => read_le(&frame.payload, 0, frame.payload.len()),
        _ => None,
    };
    EnvironmentSnapshot { key, text, numeric, payload: frame.payload.clone() }
}

pub fn decode_system_command(frame: &Frame) -> SystemCommand {
    let payload = &frame.payload[..];
    if payload.is_empty() {
        return SystemCommand { subcommand: frame.status, text: None, payload: frame.payload.clone() };
    }
    match decode_ascii(payload) {
        Some(text) if text.len() == payload.len() => SystemCommand {
            subcommand: frame.status,
            text: Some(text),
            payload: frame.payload.clone(),
        },
        _ => SystemCommand {
            subcommand: Some(payload[0]),
            text: decode_ascii(&payload[1..]),
            payload: frame.payload.clone(),
        },
    }
}

pub fn decode_display(frame: &Frame) -> DisplaySettings {
    let payload = &frame.payload[..];
    let mut settings = DisplaySettings { payload: frame.payload.clone(), ..DisplaySettings::default() };
    let Some(&sub) = payload.first() else {
        return settings;
    };
    settings.subcommand = Some(sub);
    match sub {
        0x02 => {
            settings.height = read_le(payload, 1, 2).map(|v| v as u16);
            settings.depth = read_le(payload, 3, 2).map(|v| v as u16);
            settings.preview = payload.get(5).map(|&b| b & 0x01 == 0x01);
        }
        0x04 => settings.brightness = payload.get(1).copied(),
        0x05 | 0x07 => settings.action = payload.get(1).copied(),
        0x08 => settings.enabled = payload.get(1).and_then(|&b| flag(b)),
        _ => {}
    }
    settings
}

pub fn decode_serial(frame: &Frame) -> SerialNumber {
    let payload = &frame.payload[..];
    let serial = decode_ascii(payload).or_else(|| payload.get(1..).and_then(decode_ascii));
    let kind = if frame.opcode == OP_LENS_SERIAL { SerialKind::Lens } else { SerialKind::Frame };
    SerialNumber { kind, serial, payload: frame.payload.clone() }
}

/// Index of the value byte for an `0xF5` sub-code: 0 when the code sits in
/// the status position, 1 when it opens the payload.
pub fn f5_value_index(frame: &Frame, code: u8) -> Option<usize> {
    if frame.status == Some(code) {
        Some(0)
    } else if frame.payload.first() == Some(&code) {
        Some(1)
    } else {
        None
    }
}

fn f5_value(frame: &Frame, code: u8) -> Option<u8> {
    f5_value_index(frame, code).and_then(|i| frame.payload.get(i).copied())
}

fn f5_firmware_banner(payload: &[u8]) -> Option<String> {
    let body = match payload.first() {
        Some(0x09) | Some(0x0A) => &payload[1..],
        Some(_) => payload,
        None => return None,
    };
    if body.is_empty() || !body.iter().all(|&b| is_printable(b)) {
        return None;
    }
    let text = String::from_utf8_lossy(body);
    let trimmed = text.trim_matches(|c: char| c <= ' ');
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

/// Battery, charging or firmware banner carried by an `0xF5` frame.
pub fn decode_f5_vitals(frame: &Frame) -> Option<DeviceVitals> {
    let battery_percent = f5_value(frame, SUB_BATTERY).and_then(percent);
    let charging = f5_value(frame, SUB_CHARGING).and_then(flag);
    let firmware_version = if battery_percent.is_none() && charging.is_none() {
        f5_firmware_banner(&frame.payload)
    } else {
        None
    };
    if battery_percent.is_none() && charging.is_none() && firmware_version.is_none() {
        return None;
    }
    Some(DeviceVitals { battery_percent, charging, firmware_version, ..DeviceVitals::default() })
}

pub fn decode_even_ai(subcommand: u8) -> EvenAiEvent {
    match subcommand {
        0x17 | 0x23 => EvenAiEvent::ActivationRequested,
        0x24 => EvenAiEvent::RecordingStopped,
        0x00 => EvenAiEvent::ManualExit,
        0x01 => EvenAiEvent::ManualPaging,
        0x04 | 0x05 => EvenAiEvent::SilentModeToggle,
        other => EvenAiEvent::Unknown { subcommand: other },
    }
}

const SYSTEM_EVENT_CODES: &[u8] = &[0x06, 0x07, 0x08, 0x09, 0x0A, 0x0B, 0x11, 0x0E, 0x0F];
const CASE_EVENT_CODES: &[u8] = &[0x0E, 0x0F];

pub fn decode_system_event(frame: &Frame, code: u8) -> Option<SystemEvent> {
    if !SYSTEM_EVENT_CODES.contains(&code) {
        return None;
    }
    let value = f5_value(frame, code);
    let mut event = SystemEvent { code, ..SystemEvent::default() };
    match code {
        0x06 => event.wearing = Some(true),
        0x07 => event.wearing = Some(false),
        0x08 | 0x0B => event.in_case = Some(true),
        0x09 => event.charging = Some(value.map(|v| v != 0).unwrap_or(true)),
        0x0E => event.charging = value.map(|v| v == 1),
        0x0F => event.case_battery_percent = value.and_then(percent),
        0x11 => event.pairing_success = Some(true),
        _ => return None,
    }
    let populated = event.wearing.is_some()
        || event.in_case.is_some()
        || event.charging.is_some()
        || event.case_battery_percent.is_some()
        || event.pairing_success.is_some();
    populated.then_some(event)
}

pub fn decode_case_event(frame: &Frame, code: u8) -> Option<CaseUpdate> {
    if !CASE_EVENT_CODES.contains(&code) {
        return None;
    }
    let value = f5_value(frame, code);
    let update = match code {
        0x0E => CaseUpdate { charging: value.map(|v| v == 1), ..CaseUpdate::default() },
        _ => CaseUpdate { battery_percent: value.and_then(percent), ..CaseUpdate::default() },
    };
    (!update.is_empty()).then_some(update)
}

/// Gesture codes embedded in a raw buffer as `F5 <code>` pairs.
pub fn scan_gesture_codes(raw: &[u8]) -> Vec<u8> {
    let mut codes = Vec::new();
    let mut index = 0;
    while index < raw.len() {
        if raw[index] != OP_EVENT {
            index += 1;
            continue;
        }
        let Some(&code) = raw.get(index + 1) else { break };
        if F5EventType::classify(code) == F5EventType::Gesture {
            codes.push(code);
        }
        index += 2;
    }
    codes
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::codec::decode_frame;

    fn frame(bytes: &[u8]) -> Frame {
        decode_frame(bytes).unwrap()
    }

    #[test]
    fn battery_percentages_with_subcommand() {
        // status-form reply: subcommand 0x01, lens 80, case 55
        let f = frame(&[0x2C, 0x66, 0x01, 0x50, 0x37]);
        assert_eq!(decode_battery(&f), Some((Some(80), Some(55))));
    }

    #[test]
    fn battery_falls_back_to_raw_bytes() {
        let f = frame(&[0x2C, 0x01, 0x5A, 0x50]);
        assert_eq!(decode_battery(&f), Some((Some(90), Some(80))));
    }

    #[test]
    fn out_of_range_battery_is_none() {
        let f = frame(&[0x2C, 0x02, 0xC8, 0xFF]);
        assert_eq!(decode_battery(&f), None);
    }

    #[test]
    fn case_battery_voltage_window() {
        // status-form frame: sub 0x01, lens 90, case 60, 3900 mV, charging
        let f = frame(&[0x2C, 0x66, 0x01, 0x5A, 0x3C, 0x3C, 0x0F, 0x01]);
        let case = decode_case_battery(&f).unwrap();
        assert_eq!(case.battery_percent, Some(60));
        assert_eq!(case.voltage_mv, Some(3900));
        assert_eq!(case.charging, Some(true));

        let low = frame(&[0x2C, 0x66, 0x01, 0x5A, 0x3C, 0x10, 0x00]);
        assert_eq!(decode_case_battery(&low).unwrap().voltage_mv, None);
    }

    #[test]
    fn battery_info_reads_voltage() {
        let f = frame(&[0x2C, 0x66, 0x01, 0x74, 0x0E, 0x01]);
        let info = decode_battery_info(&f).unwrap();
        assert_eq!(info.voltage_mv, 0x0E74);
        assert!(info.charging);
    }

    #[test]
    fn firmware_after_subcommand() {
        let mut bytes = vec![0x23, 0x74];
        bytes.extend_from_slice(b" ver 1.6.3 \0");
        assert_eq!(decode_firmware(&frame(&bytes)).as_deref(), Some("ver 1.6.3"));
        assert_eq!(decode_firmware(&frame(&[0x23, 0x74])), None);
    }

    #[test]
    fn uptime_little_endian() {
        let f = frame(&[0x37, 0xFF, 0x88, 0x13, 0x00, 0x00]);
        assert_eq!(f.status, Some(0xFF));
        assert_eq!(decode_uptime(&f), Some(5000));
    }

    #[test]
    fn case_state_tlv_overrides_flags() {
        // flags say lid open; TLV 0x0B=0 says closed, 0x0A=1 silent on
        let f = frame(&[0x2B, 0x20, 0x08, 0x0B, 0x00, 0x0A, 0x01]);
        let state = decode_case_state(&f).unwrap();
        assert_eq!(state.lid_open, Some(false));
        assert_eq!(state.silent_mode, Some(true));
        assert!(state.flags.unwrap().case_open);
    }

    #[test]
    fn silent_state_reply() {
        let state = decode_silent_state(&frame(&[0x2B, 0x69, 0x0C, 0x08])).unwrap();
        assert_eq!(state.silent_mode, Some(true));
        let flags = state.flags.unwrap();
        assert!(flags.in_cradle && flags.case_open && flags.silent_mode);
        assert!(decode_silent_state(&frame(&[0x2B, 0x69, 0x00, 0x00])).is_none());
    }

    #[test]
    fn audio_is_clamped_to_available_bytes() {
        let f = frame(&[0xF1, 0x03, 0x10, 0x00, 0x01, 0xAA, 0xBB]);
        let audio = decode_audio(&f).unwrap();
        assert_eq!(audio.sequence, Some(3));
        assert_eq!(audio.declared_length, Some(16));
        assert_eq!(audio.channel, Some(1));
        assert_eq!(&audio.data[..], &[0xAA, 0xBB]);
        assert!(decode_audio(&frame(&[0xF1, 0x03, 0x10])).is_none());
    }

    #[test]
    fn system_ack_codes() {
        let busy = decode_system_ack(&frame(&[0x39, 0xCA])).unwrap();
        assert!(busy.busy && !busy.success);
        let complete = decode_system_ack(&frame(&[0x39, 0xC0])).unwrap();
        assert!(complete.success);
        assert!(decode_system_ack(&frame(&[0x39, 0x01, 0x05])).is_none());
    }

    #[test]
    fn environment_text_and_numbers() {
        let text = decode_environment(&frame(&[0x33, 0x10, b'S', b'N', b'4', b'2']));
        assert_eq!(text.key, "lens_serial");
        assert_eq!(text.text.as_deref(), Some("SN42"));
        assert_eq!(text.numeric, None);

        let number = decode_environment(&frame(&[0x35, 0x10, 0x10, 0x01]));
        assert_eq!(number.key, "esb_channel");
        assert_eq!(number.numeric, Some(0x0110));
    }

    #[test]
    fn system_command_forms() {
        let ascii = decode_system_command(&frame(&[0x23, 0x6C, b'o', b'k']));
        assert_eq!(ascii.subcommand, Some(0x6C));
        assert_eq!(ascii.text.as_deref(), Some("ok"));

        let binary = decode_system_command(&frame(&[0x23, 0xF0, 0x01, b'h', b'i']));
        assert_eq!(binary.subcommand, Some(0x01));
        assert_eq!(binary.text.as_deref(), Some("hi"));
    }

    #[test]
    fn display_height_depth() {
        let f = frame(&[0x26, 0xF0, 0x02, 0x05, 0x00, 0x03, 0x00, 0x01]);
        let settings = decode_display(&f);
        assert_eq!(settings.subcommand, Some(0x02));
        assert_eq!(settings.height, Some(5));
        assert_eq!(settings.depth, Some(3));
        assert_eq!(settings.preview, Some(true));
    }

    #[test]
    fn serial_skips_leading_binary_byte() {
        let f = frame(&[0x34, 0xF0, 0x01, b'F', b'R', b'1']);
        let serial = decode_serial(&f);
        assert_eq!(serial.kind, SerialKind::Frame);
        assert_eq!(serial.serial.as_deref(), Some("FR1"));
    }

    #[test]
    fn f5_battery_and_charging() {
        let battery = decode_f5_vitals(&frame(&[0xF5, 0x0A, 0x55])).unwrap();
        assert_eq!(battery.battery_percent, Some(85));
        assert_eq!(battery.firmware_version, None);

        let charging = decode_f5_vitals(&frame(&[0xF5, 0x09, 0x01])).unwrap();
        assert_eq!(charging.charging, Some(true));
    }

    #[test]
    fn f5_firmware_banner() {
        let mut bytes = vec![0xF5, 0x20];
        bytes.extend_from_slice(b"\x09v1.6.3");
        let vitals = decode_f5_vitals(&frame(&bytes)).unwrap();
        assert_eq!(vitals.firmware_version.as_deref(), Some("v1.6.3"));
    }

    #[test]
    fn f5_system_events() {
        let worn = decode_system_event(&frame(&[0xF5, 0x06]), 0x06).unwrap();
        assert_eq!(worn.wearing, Some(true));

        let charging = decode_system_event(&frame(&[0xF5, 0x09]), 0x09).unwrap();
        assert_eq!(charging.charging, Some(true));

        let case_battery = decode_system_event(&frame(&[0xF5, 0x0F, 0x40]), 0x0F).unwrap();
        assert_eq!(case_battery.case_battery_percent, Some(64));

        assert!(decode_system_event(&frame(&[0xF5, 0x0A]), 0x0A).is_none());
        assert!(decode_system_event(&frame(&[0xF5, 0x30]), 0x30).is_none());
    }

    #[test]
    fn f5_case_events() {
        let update = decode_case_event(&frame(&[0xF5, 0x0E, 0x01]), 0x0E).unwrap();
        assert_eq!(update.charging, Some(true));
        assert!(decode_case_event(&frame(&[0xF5, 0x0E]), 0x0E).is_none());
    }

    #[test]
    fn even_ai_mapping() {
        assert_eq!(decode_even_ai(0x17), EvenAiEvent::ActivationRequested);
        assert_eq!(decode_even_ai(0x24), EvenAiEvent::RecordingStopped);
        assert_eq!(decode_even_ai(0x05), EvenAiEvent::SilentModeToggle);
        assert_eq!(decode_even_ai(0x42), EvenAiEvent::Unknown { subcommand: 0x42 });
    }

    #[test]
    fn gesture_scan_finds_pairs() {
        assert_eq!(scan_gesture_codes(&[0xF5, 0x01, 0xF5, 0x02]), vec![0x01, 0x02]);
        assert_eq!(scan_gesture_codes(&[0xF5, 0x0A, 0x55]), Vec::<u8>::new());
        assert_eq!(scan_gesture_codes(&[0xF5]), Vec::<u8>::new());
    }
}
