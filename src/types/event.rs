//! Typed telemetry events produced by the dispatcher

use std::sync::Arc;

use super::telemetry::{
    Ack, AudioPacket, BatteryInfo, CaseUpdate, DeviceVitals, DisplaySettings, EnvironmentSnapshot,
    EvenAiEvent, Gesture, SerialNumber, StateFlags, SystemCommand, SystemEvent,
};
use super::{Lens, to_hex};

/// One decoded occurrence from a lens.
///
/// Every event carries the lens, the receive timestamp (ms), the opcode that
/// produced it and the raw notification bytes; the decoded values live in
/// [`EventKind`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TelemetryEvent {
    pub lens: Lens,
    pub timestamp: u64,
    pub opcode: u8,
    pub raw: Arc<[u8]>,
    pub kind: EventKind,
}

impl TelemetryEvent {
    pub fn raw_hex(&self) -> String {
        to_hex(&self.raw)
    }

    /// Short variant name, used in log lines.
    pub fn label(&self) -> &'static str {
        self.kind.label()
    }

    pub fn is_ack(&self) -> bool {
        matches!(self.kind, EventKind::Ack(_))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventKind {
    /// Device status flags (`0x2B`), or a silent-mode state reply
    State { flags: StateFlags, silent_state: Option<u8> },
    Battery {
        battery_percent: Option<u8>,
        case_battery_percent: Option<u8>,
        info: Option<BatteryInfo>,
    },
    Case(CaseUpdate),
    Uptime { seconds: u64 },
    Gesture(Gesture),
    Audio(AudioPacket),
    Vitals(DeviceVitals),
    Ack(Ack),
    System(SystemEvent),
    EvenAi(EvenAiEvent),
    Environment(EnvironmentSnapshot),
    SystemCommand(SystemCommand),
    Display(DisplaySettings),
    Serial(SerialNumber),
}

impl EventKind {
    pub fn label(&self) -> &'static str {
        match self {
            EventKind::State { .. } => "state",
            EventKind::Battery { .. } => "battery",
            EventKind::Case(_) => "case",
            EventKind::Uptime { .. } => "uptime",
            EventKind::Gesture(_) => "gesture",
            EventKind::Audio(_) => "audio",
            EventKind::Vitals(_) => "vitals",
            EventKind::Ack(_) => "ack",
            EventKind::System(_) => "system",
            EventKind::EvenAi(_) => "even_ai",
            EventKind::Environment(_) => "environment",
            EventKind::SystemCommand(_) => "system_command",
            EventKind::Display(_) => "display",
            EventKind::Serial(_) => "serial",
        }
    }
}

/// Operator-facing diagnostic line (heartbeat skips, validator warnings).
///
/// Published alongside the `tracing` output so a UI can render it without
/// scraping logs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsoleLine {
    pub tag: &'static str,
    pub lens: Option<Lens>,
    pub message: String,
    pub timestamp: u64,
}

impl ConsoleLine {
    pub fn new(tag: &'static str, lens: Option<Lens>, message: impl Into<String>, timestamp: u64) -> Self {
        Self { tag, lens, message: message.into(), timestamp }
    }
}

impl std::fmt::Display for ConsoleLine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.lens {
            Some(lens) => write!(f, "[{}][{}] {}", self.tag, lens.short_label(), self.message),
            None => write!(f, "[{}] {}", self.tag, self.message),
        }
    }
}
