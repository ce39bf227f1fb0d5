//! Free-form vitals replies.
//!
//! Older firmware answers status queries with human-readable text
//! (`BAT: 87, FW=1.4.2`), a JSON-like object, or a small binary TLV block.
//! [`decode_vitals`] tries those forms in that order and returns the first
//! that yields any field.

use crate::types::DeviceVitals;

use super::opcodes::VITALS_TLV_MAGIC;

const TAG_BATTERY: u8 = 0x10;
const TAG_FIRMWARE: u8 = 0x11;
const TAG_CASE_BATTERY: u8 = 0x12;
const TAG_SIGNAL: u8 = 0x13;
const TAG_DEVICE_ID: u8 = 0x14;
const TAG_STATE: u8 = 0x15;

pub fn decode_vitals(bytes: &[u8]) -> Option<DeviceVitals> {
    if bytes.is_empty() {
        return None;
    }
    let text = String::from_utf8_lossy(bytes);
    let text = text.trim();
    decode_text(text).or_else(|| decode_json(text)).or_else(|| decode_tlv(bytes))
}

fn non_empty(vitals: DeviceVitals) -> Option<DeviceVitals> {
    (!vitals.is_empty()).then_some(vitals)
}

fn clamp_percent(value: i64) -> u8 {
    value.clamp(0, 100) as u8
}

fn is_word(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

/// Find `KEY <ws> [:=] <ws> value` for any alias at a word boundary, where
/// `value` is the longest run accepted by `accept`.
fn keyed_value<'a>(
    text: &'a str,
    aliases: &[&str],
    accept: impl Fn(usize, char) -> bool,
) -> Option<&'a str> {
    let lower = text.to_ascii_lowercase();
    for (start, _) in text.char_indices() {
        if text[..start].chars().next_back().is_some_and(is_word) {
            continue;
        }
        for alias in aliases {
            if !lower[start..].starts_with(alias) {
                continue;
            }
            let rest = text[start + alias.len()..].trim_start();
            let Some(rest) = rest.strip_prefix([':', '=']) else { continue };
            let rest = rest.trim_start();
            let end = rest
                .char_indices()
                .find(|&(i, c)| !accept(i, c))
                .map(|(i, _)| i)
                .unwrap_or(rest.len());
            if end > 0 {
                return Some(&rest[..end]);
            }
        }
    }
    None
}

fn digits(max: usize) -> impl Fn(usize, char) -> bool {
    move |i, c| i < max && c.is_ascii_digit()
}

fn signed_digits(i: usize, c: char) -> bool {
    (i == 0 && c == '-') || (i < 4 && c.is_ascii_digit())
}

/// Parse a bounded digit run that must end at a word boundary.
fn bounded_number(text: &str, aliases: &[&str], max_digits: usize) -> Option<i64> {
    let value = keyed_value(text, aliases, digits(max_digits + 1))?;
    if value.len() > max_digits {
        return None;
    }
    value.parse().ok()
}

fn decode_text(text: &str) -> Option<DeviceVitals> {
    let battery_percent = bounded_number(text, &["battery", "bat"], 3).map(clamp_percent);
    let case_battery_percent = bounded_number(text, &["cradle", "case"], 3).map(clamp_percent);
    let firmware_version = keyed_value(text, &["firmware", "fw"], |_, c| {
        c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_')
    })
    .map(|v| v.trim_end_matches(|c: char| !c.is_ascii_alphanumeric()).to_string())
    .filter(|v| !v.is_empty());
    let signal_rssi = keyed_value(text, &["signal", "rssi"], signed_digits)
        .and_then(|v| v.parse::<i16>().ok());
    let device_id = keyed_value(text, &["device", "dev", "id"], |_, c| {
        c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | ':')
    })
    .map(str::to_string);
    let connection_state = keyed_value(text, &["status", "state"], |_, c| c.is_ascii_alphabetic())
        .map(str::to_ascii_uppercase);

    non_empty(DeviceVitals {
        battery_percent,
        case_battery_percent,
        firmware_version,
        signal_rssi,
        device_id,
        connection_state,
        ..DeviceVitals::default()
    })
    .or_else(|| decode_key_values(text))
}

/// `key=value` pairs separated by `,`, `;` or `|`; keys matched by substring.
fn decode_key_values(text: &str) -> Option<DeviceVitals> {
    let mut vitals = DeviceVitals::default();
    for entry in text.split([',', ';', '|']) {
        let Some((key, value)) = entry.trim().split_once('=') else { continue };
        let key = key.trim().to_ascii_lowercase();
        let value = value.trim();
        let owned = (!value.is_empty()).then(|| value.to_string());
        if key.contains("case") {
            vitals.case_battery_percent = value.parse::<i64>().ok().map(clamp_percent);
        } else if key.contains("bat") {
            vitals.battery_percent = value.parse::<i64>().ok().map(clamp_percent);
        } else if key.contains("fw") || key.contains("firm") {
            vitals.firmware_version = owned;
        } else if key.contains("rssi") || key.contains("signal") {
            vitals.signal_rssi = value.parse().ok();
        } else if key == "id" || key.contains("device") {
            vitals.device_id = owned;
        } else if key.contains("state") || key.contains("status") {
            vitals.connection_state = Some(value.to_ascii_uppercase());
        }
    }
    non_empty(vitals)
}

/// Value following `"key":` in a flat JSON-ish object.
fn json_field<'a>(text: &'a str, key: &str) -> Option<&'a str> {
    let needle = format!("\"{key}\"");
    let lower = text.to_ascii_lowercase();
    let at = lower.find(&needle)?;
    let rest = text[at + needle.len()..].trim_start().strip_prefix(':')?.trim_start();
    if let Some(quoted) = rest.strip_prefix('"') {
        let end = quoted.find('"')?;
        return (end > 0).then(|| &quoted[..end]);
    }
    let end = rest
        .char_indices()
        .find(|&(i, c)| !((i == 0 && c == '-') || c.is_ascii_digit()))
        .map(|(i, _)| i)
        .unwrap_or(rest.len());
    (end > 0).then(|| &rest[..end])
}

fn decode_json(text: &str) -> Option<DeviceVitals> {
    if !(text.starts_with('{') && text.ends_with('}')) {
        return None;
    }
    let number = |key| json_field(text, key).and_then(|v| v.parse::<i64>().ok());
    let string = |key| json_field(text, key).map(str::to_string);
    non_empty(DeviceVitals {
        battery_percent: number("bat").map(clamp_percent),
        case_battery_percent: number("case").map(clamp_percent),
        firmware_version: string("fw"),
        signal_rssi: number("rssi").and_then(|v| i16::try_from(v).ok()),
        device_id: string("id"),
        connection_state: string("state").map(|s| s.to_ascii_uppercase()),
        ..DeviceVitals::default()
    })
}

fn tlv_string(value: &[u8]) -> Option<String> {
    let text = String::from_utf8_lossy(value);
    (!text.trim().is_empty()).then(|| text.into_owned())
}

fn decode_tlv(bytes: &[u8]) -> Option<DeviceVitals> {
    if bytes.len() < 3 || bytes[0] != VITALS_TLV_MAGIC {
        return None;
    }
    let mut vitals = DeviceVitals::default();
    for (tag, value) in tlv_records(bytes) {
        match tag {
            TAG_BATTERY => vitals.battery_percent = value.first().map(|&b| b.min(100)),
            TAG_CASE_BATTERY => vitals.case_battery_percent = value.first().map(|&b| b.min(100)),
            TAG_FIRMWARE => vitals.firmware_version = tlv_string(value),
            TAG_SIGNAL => vitals.signal_rssi = value.first().map(|&b| b as i8 as i16),
            TAG_DEVICE_ID => vitals.device_id = tlv_string(value),
            TAG_STATE => vitals.connection_state = tlv_string(value),
            _ => {}
        }
    }
    non_empty(vitals)
}

/// Records after the magic byte; stops at the first truncated record.
fn tlv_records(bytes: &[u8]) -> impl Iterator<Item = (u8, &[u8])> {
    let mut index = 1;
    std::iter::from_fn(move || {
        if index + 1 >= bytes.len() {
            return None;
        }
        let tag = bytes[index];
        let start = index + 2;
        let end = start + bytes[index + 1] as usize;
        let value = bytes.get(start..end)?;
        index = end;
        Some((tag, value))
    })
}

/// True when `bytes` is a complete vitals TLV block: magic byte, only known
/// tags, and records that cover the buffer exactly.
///
/// Used to tell vitals apart from microphone audio, which shares the opcode.
pub fn is_strict_tlv(bytes: &[u8]) -> bool {
    if bytes.len() < 3 || bytes[0] != VITALS_TLV_MAGIC {
        return false;
    }
    let mut consumed = 1;
    for (tag, value) in tlv_records(bytes) {
        if !(TAG_BATTERY..=TAG_STATE).contains(&tag) {
            return false;
        }
        consumed += 2 + value.len();
    }
    consumed == bytes.len()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keyed_text_fields() {
        let vitals = decode_vitals(b"BAT: 87 CASE=40 FW: 1.4.2. RSSI=-61 ID: G1-L_01 State: connected").unwrap();
        assert_eq!(vitals.battery_percent, Some(87));
        assert_eq!(vitals.case_battery_percent, Some(40));
        assert_eq!(vitals.firmware_version.as_deref(), Some("1.4.2"));
        assert_eq!(vitals.signal_rssi, Some(-61));
        assert_eq!(vitals.device_id.as_deref(), Some("G1-L_01"));
        assert_eq!(vitals.connection_state.as_deref(), Some("CONNECTED"));
    }

    #[test]
    fn percent_is_clamped_and_long_numbers_rejected() {
        assert_eq!(decode_vitals(b"Battery: 150").unwrap().battery_percent, Some(100));
        assert!(decode_vitals(b"Battery: 1500").is_none());
    }

    #[test]
    fn key_needs_word_boundary() {
        assert!(decode_vitals(b"XBAT: 50").is_none());
    }

    #[test]
    fn key_value_pairs() {
        let vitals = decode_vitals(b"left_battery=77;fw_rev=2.0|device_name=lens").unwrap();
        assert_eq!(vitals.battery_percent, Some(77));
        assert_eq!(vitals.firmware_version.as_deref(), Some("2.0"));
        assert_eq!(vitals.device_id.as_deref(), Some("lens"));
    }

    #[test]
    fn json_like_object() {
        let vitals =
            decode_vitals(br#"{"bat": 64, "case": 12, "fw": "1.6.0", "rssi": -70, "state": "idle"}"#)
                .unwrap();
        assert_eq!(vitals.battery_percent, Some(64));
        assert_eq!(vitals.case_battery_percent, Some(12));
        assert_eq!(vitals.firmware_version.as_deref(), Some("1.6.0"));
        assert_eq!(vitals.signal_rssi, Some(-70));
        assert_eq!(vitals.connection_state.as_deref(), Some("IDLE"));
    }

    #[test]
    fn binary_tlv() {
        let bytes = [0xF1, 0x10, 0x01, 0x50, 0x13, 0x01, 0xC4, 0x11, 0x03, b'1', b'.', b'2'];
        assert!(is_strict_tlv(&bytes));
        let vitals = decode_vitals(&bytes).unwrap();
        assert_eq!(vitals.battery_percent, Some(80));
        assert_eq!(vitals.signal_rssi, Some(-60));
        assert_eq!(vitals.firmware_version.as_deref(), Some("1.2"));
    }

    #[test]
    fn strict_tlv_rejects_audio_like_buffers() {
        assert!(!is_strict_tlv(&[0xF1, 0x03, 0x10, 0x00, 0x01, 0xAA]));
        assert!(!is_strict_tlv(&[0xF1, 0x10, 0x05, 0x50]));
        assert!(!is_strict_tlv(&[0xF1, 0x10, 0x01]));
    }

    #[test]
    fn unrelated_bytes_yield_nothing() {
        assert!(decode_vitals(&[]).is_none());
        assert!(decode_vitals(b"hello world").is_none());
        assert!(decode_vitals(&[0x00, 0x01, 0x02]).is_none());
    }
}
