//! Decoded telemetry values carried by events

use std::sync::Arc;

/// Device status bit flags reported by `0x2B` frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StateFlags {
    pub wearing: bool,
    pub in_cradle: bool,
    pub silent_mode: bool,
    pub case_open: bool,
    pub charging: bool,
}

impl StateFlags {
    pub const IN_CRADLE: u8 = 0x01;
    pub const WEARING: u8 = 0x02;
    pub const SILENT: u8 = 0x04;
    pub const CASE_OPEN: u8 = 0x08;
    pub const CHARGING: u8 = 0x10;

    pub fn from_bits(bits: u8) -> Self {
        Self {
            wearing: bits & Self::WEARING != 0,
            in_cradle: bits & Self::IN_CRADLE != 0,
            silent_mode: bits & Self::SILENT != 0,
            case_open: bits & Self::CASE_OPEN != 0,
            charging: bits & Self::CHARGING != 0,
        }
    }
}

/// Lens battery voltage block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatteryInfo {
    pub voltage_mv: u16,
    pub charging: bool,
}

/// Partial update to the charging case state. `None` fields are unknown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CaseUpdate {
    pub battery_percent: Option<u8>,
    pub charging: Option<bool>,
    pub lid_open: Option<bool>,
    pub silent_mode: Option<bool>,
    pub voltage_mv: Option<u16>,
}

impl CaseUpdate {
    pub fn is_empty(&self) -> bool {
        self.battery_percent.is_none()
            && self.charging.is_none()
            && self.lid_open.is_none()
            && self.silent_mode.is_none()
            && self.voltage_mv.is_none()
    }
}

/// Touch gesture reported through the `0xF5` event family.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Gesture {
    pub code: u8,
    pub name: String,
}

impl Gesture {
    pub fn from_code(code: u8) -> Self {
        let name = match code {
            0x01 => "Single".to_string(),
            0x02 => "Double".to_string(),
            0x03 => "Triple".to_string(),
            0x04 => "Hold".to_string(),
            other => format!("Gesture 0x{other:02X}"),
        };
        Self { code, name }
    }
}

/// Framed microphone audio. The payload is passed through undecoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioPacket {
    pub sequence: Option<u16>,
    pub channel: Option<u8>,
    pub declared_length: Option<u16>,
    pub data: Arc<[u8]>,
}

/// Vitals recovered by one of the free-form decoders.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DeviceVitals {
    pub battery_percent: Option<u8>,
    pub case_battery_percent: Option<u8>,
    pub firmware_version: Option<String>,
    pub signal_rssi: Option<i16>,
    pub device_id: Option<String>,
    pub connection_state: Option<String>,
    pub wearing: Option<bool>,
    pub in_cradle: Option<bool>,
    pub charging: Option<bool>,
    pub silent_mode: Option<bool>,
    pub case_open: Option<bool>,
}

impl DeviceVitals {
    pub fn is_empty(&self) -> bool {
        *self == DeviceVitals::default()
    }
}

/// Low-level acknowledgment of a command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ack {
    /// Ack/status byte that decided the outcome
    pub code: u8,
    pub success: bool,
    /// The device reported it is busy (`0xCA`)
    pub busy: bool,
    pub sequence: Option<u16>,
    /// Residual payload after the status byte
    pub payload: Arc<[u8]>,
}

/// How an ack was recognised.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckType {
    /// Status byte in a binary frame
    Binary,
    /// ASCII `OK` reply
    Textual,
}

/// Classification of `0xF5` sub-opcodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum F5EventType {
    Gesture,
    System,
    Case,
    Unknown,
}

impl F5EventType {
    pub fn classify(code: u8) -> Self {
        match code {
            0x00..=0x05 | 0x1E..=0x20 => F5EventType::Gesture,
            0x08 | 0x09 | 0x0E | 0x0F => F5EventType::Case,
            0x06..=0x0B => F5EventType::System,
            _ => F5EventType::Unknown,
        }
    }
}

/// Physical state change announced through `0xF5`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SystemEvent {
    pub code: u8,
    pub wearing: Option<bool>,
    pub in_case: Option<bool>,
    pub case_open: Option<bool>,
    pub charging: Option<bool>,
    pub case_battery_percent: Option<u8>,
    pub pairing_success: Option<bool>,
}

/// Assistant trigger events raised by lens gestures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EvenAiEvent {
    ActivationRequested,
    RecordingStopped,
    ManualExit,
    ManualPaging,
    SilentModeToggle,
    Unknown { subcommand: u8 },
}

/// Diagnostic reading from the `0x32..=0x36` range.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvironmentSnapshot {
    pub key: String,
    pub text: Option<String>,
    pub numeric: Option<u64>,
    pub payload: Arc<[u8]>,
}

/// Reply to a `0x23` system command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SystemCommand {
    pub subcommand: Option<u8>,
    pub text: Option<String>,
    pub payload: Arc<[u8]>,
}

/// Reply to a `0x26` display settings command.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DisplaySettings {
    pub subcommand: Option<u8>,
    pub height: Option<u16>,
    pub depth: Option<u16>,
    pub preview: Option<bool>,
    pub brightness: Option<u8>,
    pub action: Option<u8>,
    pub enabled: Option<bool>,
    pub payload: Arc<[u8]>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SerialKind {
    Lens,
    Frame,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SerialNumber {
    pub kind: SerialKind,
    pub serial: Option<String>,
    pub payload: Arc<[u8]>,
}
