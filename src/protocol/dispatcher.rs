//! Opcode dispatch from raw notifications to typed events.
//!
//! [`DispatchTable`] is an explicit lookup from `(opcode, sub_opcode)` to a
//! pure decode function. An exact sub-opcode route wins over the
//! opcode-only wildcard. [`Dispatcher`] wraps the table with the little
//! per-lens state dispatch needs (gesture dedupe) and stamps every decoded
//! value with its lens, timestamp and raw bytes.

use std::collections::HashMap;

use tracing::trace;

use crate::types::{
    CaseUpdate, DeviceVitals, EventKind, Frame, Gesture, Lens, PerLens, RawFrame, TelemetryEvent,
    to_hex,
};

use super::codec::{decode_frame, detect_ack};
use super::decoders::{
    decode_audio, decode_battery, decode_battery_info, decode_case_battery, decode_case_event,
    decode_case_state, decode_display, decode_environment, decode_even_ai, decode_f5_vitals,
    decode_firmware, decode_serial, decode_silent_state, decode_system_ack, decode_system_command,
    decode_system_event, decode_uptime, scan_gesture_codes,
};
use super::opcodes::{
    ACKED_COMMANDS, OP_AUDIO, OP_BATTERY, OP_DEVICE_STATUS, OP_DISPLAY, OP_ENV_FIRST, OP_ENV_LAST,
    OP_EVENT, OP_FRAME_SERIAL, OP_LENS_SERIAL, OP_SYSTEM_COMMAND, OP_SYSTEM_STATUS, OP_UPTIME,
    STATUS_BUSY, STATUS_OK, SUB_FIRMWARE, SUB_SILENT_STATE,
};
use super::vitals::{decode_vitals, is_strict_tlv};

/// A pure decode function for one route.
pub type Decoder = fn(&Frame) -> Vec<EventKind>;

/// Route key: opcode plus an optional sub-opcode (`None` is the wildcard).
pub type RouteKey = (u8, Option<u8>);

#[derive(Debug, Clone)]
pub struct DispatchTable {
    routes: HashMap<RouteKey, Decoder>,
}

impl Default for DispatchTable {
    fn default() -> Self {
        Self::standard()
    }
}

impl DispatchTable {
    pub fn empty() -> Self {
        Self { routes: HashMap::new() }
    }

    /// The full lens protocol.
    pub fn standard() -> Self {
        let mut table = Self::empty();

        for &op in ACKED_COMMANDS {
            table.insert((op, Some(STATUS_OK)), ack);
            table.insert((op, Some(STATUS_BUSY)), ack);
            table.insert((op, None), ack);
        }
        table.insert((OP_DISPLAY, None), display);

        table.insert((OP_DEVICE_STATUS, None), device_status);
        table.insert((OP_DEVICE_STATUS, Some(SUB_SILENT_STATE)), silent_state);
        table.insert((OP_BATTERY, None), battery);
        for op in OP_ENV_FIRST..=OP_ENV_LAST {
            table.insert((op, None), environment);
        }
        table.insert((OP_UPTIME, None), uptime);
        table.insert((OP_SYSTEM_STATUS, None), system_ack);
        table.insert((OP_SYSTEM_COMMAND, None), system_command);
        table.insert((OP_SYSTEM_COMMAND, Some(SUB_FIRMWARE)), firmware);
        table.insert((OP_AUDIO, None), audio_or_vitals);
        table.insert((OP_EVENT, None), event_family);

        table
    }

    /// Register or replace a route.
    pub fn insert(&mut self, key: RouteKey, decoder: Decoder) {
        self.routes.insert(key, decoder);
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    /// Exact `(opcode, sub)` route first, then the opcode wildcard.
    pub fn route(&self, frame: &Frame) -> Option<Decoder> {
        frame
            .sub_opcode()
            .and_then(|sub| self.routes.get(&(frame.opcode, Some(sub))))
            .or_else(|| self.routes.get(&(frame.opcode, None)))
            .copied()
    }

    /// Decode `frame` through its route. `None` when no route matches.
    pub fn decode(&self, frame: &Frame) -> Option<Vec<EventKind>> {
        self.route(frame).map(|decoder| decoder(frame))
    }
}

fn ack(frame: &Frame) -> Vec<EventKind> {
    detect_ack(frame).map(EventKind::Ack).into_iter().collect()
}

fn display(frame: &Frame) -> Vec<EventKind> {
    vec![EventKind::Display(decode_display(frame))]
}

fn device_status(frame: &Frame) -> Vec<EventKind> {
    let Some(state) = decode_case_state(frame) else {
        return Vec::new();
    };
    let Some(flags) = state.flags else {
        return Vec::new();
    };
    let mut events = vec![EventKind::State { flags, silent_state: None }];
    if state.lid_open.is_some() || state.silent_mode.is_some() {
        events.push(EventKind::Case(CaseUpdate {
            lid_open: state.lid_open,
            silent_mode: state.silent_mode,
            ..CaseUpdate::default()
        }));
    }
    events
}

/// `2B 69 <silent> <state>`; a length-form `0x69` payload is ordinary status.
fn silent_state(frame: &Frame) -> Vec<EventKind> {
    if frame.status != Some(SUB_SILENT_STATE) {
        return device_status(frame);
    }
    let Some(state) = decode_silent_state(frame) else {
        return Vec::new();
    };
    let mut events = Vec::new();
    if let Some(flags) = state.flags {
        events.push(EventKind::State { flags, silent_state: state.state_code });
    }
    let update = CaseUpdate {
        silent_mode: state.silent_mode,
        lid_open: state.flags.map(|f| f.case_open),
        charging: state.flags.map(|f| f.charging),
        ..CaseUpdate::default()
    };
    if !update.is_empty() {
        events.push(EventKind::Case(update));
    }
    events
}

fn battery(frame: &Frame) -> Vec<EventKind> {
    let status = decode_battery(frame);
    let info = decode_battery_info(frame);
    let case = decode_case_battery(frame);
    let case_percent = status
        .and_then(|(_, case_percent)| case_percent)
        .or_else(|| case.and_then(|c| c.battery_percent));

    let mut events = Vec::new();
    if status.is_some() || info.is_some() {
        events.push(EventKind::Battery {
            battery_percent: status.and_then(|(primary, _)| primary),
            case_battery_percent: case_percent,
            info,
        });
    }
    let charging = case.and_then(|c| c.charging);
    let voltage_mv = case.and_then(|c| c.voltage_mv);
    if case_percent.is_some() || charging.is_some() || voltage_mv.is_some() {
        events.push(EventKind::Case(CaseUpdate {
            battery_percent: case_percent,
            charging,
            voltage_mv,
            ..CaseUpdate::default()
        }));
    }
    events
}

fn environment(frame: &Frame) -> Vec<EventKind> {
    let mut events = vec![EventKind::Environment(decode_environment(frame))];
    if frame.opcode == OP_LENS_SERIAL || frame.opcode == OP_FRAME_SERIAL {
        events.push(EventKind::Serial(decode_serial(frame)));
    }
    events
}

fn uptime(frame: &Frame) -> Vec<EventKind> {
    decode_uptime(frame).map(|seconds| EventKind::Uptime { seconds }).into_iter().collect()
}

fn system_ack(frame: &Frame) -> Vec<EventKind> {
    decode_system_ack(frame).map(EventKind::Ack).into_iter().collect()
}

fn system_command(frame: &Frame) -> Vec<EventKind> {
    vec![EventKind::SystemCommand(decode_system_command(frame))]
}

fn firmware(frame: &Frame) -> Vec<EventKind> {
    decode_firmware(frame)
        .map(|version| {
            EventKind::Vitals(DeviceVitals {
                firmware_version: Some(version),
                ..Default::default()
            })
        })
        .into_iter()
        .collect()
}

/// `0xF1` carries both microphone audio and binary vitals blocks.
fn audio_or_vitals(frame: &Frame) -> Vec<EventKind> {
    if is_strict_tlv(&frame.raw) {
        if let Some(vitals) = decode_vitals(&frame.raw) {
            return vec![EventKind::Vitals(vitals)];
        }
    }
    decode_audio(frame).map(EventKind::Audio).into_iter().collect()
}

/// Non-gesture half of the `0xF5` family; gestures need dedupe state and are
/// handled by [`Dispatcher`].
fn event_family(frame: &Frame) -> Vec<EventKind> {
    let mut events = Vec::new();
    let vitals = decode_f5_vitals(frame);
    let sub = frame.sub_opcode();
    match (vitals, sub) {
        (Some(vitals), _) => events.push(EventKind::Vitals(vitals)),
        (None, Some(code)) => events.push(EventKind::EvenAi(decode_even_ai(code))),
        (None, None) => {}
    }
    if let Some(code) = sub {
        if let Some(update) = decode_case_event(frame, code) {
            events.push(EventKind::Case(update));
        }
        if let Some(system) = decode_system_event(frame, code) {
            events.push(EventKind::System(system));
        }
    }
    events
}

/// Turns raw notifications into [`TelemetryEvent`]s.
///
/// Owned by a single pump task; not shared.
#[derive(Debug)]
pub struct Dispatcher {
    table: DispatchTable,
    gesture_window_ms: u64,
    last_gesture: PerLens<Option<(u8, u64)>>,
}

impl Dispatcher {
    pub fn new(gesture_window_ms: u64) -> Self {
        Self::with_table(DispatchTable::standard(), gesture_window_ms)
    }

    pub fn with_table(table: DispatchTable, gesture_window_ms: u64) -> Self {
        Self { table, gesture_window_ms, last_gesture: PerLens::default() }
    }

    pub fn table(&self) -> &DispatchTable {
        &self.table
    }

    /// Forget gesture history for `lens` (on disconnect).
    pub fn reset(&mut self, lens: Lens) {
        self.last_gesture[lens] = None;
    }

    pub fn dispatch(&mut self, raw: &RawFrame) -> Vec<TelemetryEvent> {
        let Some(frame) = decode_frame(&raw.bytes) else {
            return Vec::new();
        };

        let mut kinds = Vec::new();
        if frame.opcode == OP_EVENT {
            for code in scan_gesture_codes(&raw.bytes) {
                if self.accept_gesture(raw.lens, code, raw.timestamp) {
                    kinds.push(EventKind::Gesture(Gesture::from_code(code)));
                }
            }
        }

        match self.table.decode(&frame) {
            Some(decoded) => kinds.extend(decoded),
            None => match decode_vitals(&raw.bytes) {
                Some(vitals) => kinds.push(EventKind::Vitals(vitals)),
                None => trace!(
                    lens = %raw.lens,
                    opcode = format_args!("{:#04x}", frame.opcode),
                    hex = %to_hex(&raw.bytes),
                    "No route for frame"
                ),
            },
        }

        if kinds.is_empty() {
            trace!(lens = %raw.lens, hex = %to_hex(&raw.bytes), "Frame produced no events");
        }

        kinds
            .into_iter()
            .map(|kind| TelemetryEvent {
                lens: raw.lens,
                timestamp: raw.timestamp,
                opcode: frame.opcode,
                raw: raw.bytes.clone(),
                kind,
            })
            .collect()
    }

    /// Same code on the same lens within the window is a repeat.
    fn accept_gesture(&mut self, lens: Lens, code: u8, timestamp: u64) -> bool {
        if let Some((last_code, last_at)) = self.last_gesture[lens] {
            if last_code == code && timestamp.saturating_sub(last_at) <= self.gesture_window_ms {
                return false;
            }
        }
        self.last_gesture[lens] = Some((code, timestamp));
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{EvenAiEvent, SerialKind};

    fn raw(lens: Lens, ts: u64, bytes: &[u8]) -> RawFrame {
        RawFrame::new(lens, ts, bytes.to_vec())
    }

    fn kinds(events: &[TelemetryEvent]) -> Vec<&'static str> {
        events.iter().map(TelemetryEvent::label).collect()
    }

    #[test]
    fn exact_sub_route_beats_wildcard() {
        let table = DispatchTable::standard();
        let ok = decode_frame(&[0x26, 0xC9]).unwrap();
        let settings = decode_frame(&[0x26, 0xF0, 0x04, 0x10]).unwrap();
        assert!(matches!(table.decode(&ok).unwrap()[0], EventKind::Ack(_)));
        assert!(matches!(table.decode(&settings).unwrap()[0], EventKind::Display(_)));
    }

    #[test]
    fn unknown_opcode_has_no_route() {
        let table = DispatchTable::standard();
        let frame = decode_frame(&[0x7A, 0xF0, 0x01]).unwrap();
        assert!(table.route(&frame).is_none());
        let mut dispatcher = Dispatcher::new(120);
        assert!(dispatcher.dispatch(&raw(Lens::Left, 0, &[0x7A, 0xF0, 0x01])).is_empty());
    }

    #[test]
    fn acks_and_nacks() {
        let mut dispatcher = Dispatcher::new(120);
        let ok = dispatcher.dispatch(&raw(Lens::Left, 5, &[0x4E, 0xC9]));
        assert_eq!(ok.len(), 1);
        match &ok[0].kind {
            EventKind::Ack(ack) => {
                assert!(ack.success);
                assert!(ack.payload.is_empty());
            }
            other => panic!("unexpected {other:?}"),
        }

        let busy = dispatcher.dispatch(&raw(Lens::Right, 6, &[0x4E, 0xCA]));
        match &busy[0].kind {
            EventKind::Ack(ack) => assert!(!ack.success && ack.busy),
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(busy[0].lens, Lens::Right);
        assert_eq!(busy[0].timestamp, 6);
        assert_eq!(busy[0].opcode, 0x4E);
    }

    #[test]
    fn battery_reply_emits_battery_and_case() {
        let mut dispatcher = Dispatcher::new(120);
        let events = dispatcher.dispatch(&raw(Lens::Left, 0, &[0x2C, 0x66, 0x01, 0x50, 0x37]));
        assert_eq!(kinds(&events), vec!["battery", "case"]);
        match &events[0].kind {
            EventKind::Battery { battery_percent, case_battery_percent, .. } => {
                assert_eq!(*battery_percent, Some(80));
                assert_eq!(*case_battery_percent, Some(55));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn silent_state_reply_sets_wear_flags() {
        let mut dispatcher = Dispatcher::new(120);
        let events = dispatcher.dispatch(&raw(Lens::Left, 0, &[0x2B, 0x69, 0x0C, 0x06]));
        assert_eq!(kinds(&events), vec!["state", "case"]);
        match &events[0].kind {
            EventKind::State { flags, silent_state } => {
                assert!(flags.wearing);
                assert!(flags.silent_mode);
                assert_eq!(*silent_state, Some(0x06));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn device_status_with_lid_pair() {
        let mut dispatcher = Dispatcher::new(120);
        let events = dispatcher.dispatch(&raw(Lens::Right, 0, &[0x2B, 0x20, 0x01, 0x0B, 0x01]));
        assert_eq!(kinds(&events), vec!["state", "case"]);
        match &events[1].kind {
            EventKind::Case(update) => assert_eq!(update.lid_open, Some(true)),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn serial_opcodes_emit_environment_and_serial() {
        let mut bytes = vec![0x33, 0xF0];
        bytes.extend_from_slice(b"S110LABC");
        let mut dispatcher = Dispatcher::new(120);
        let events = dispatcher.dispatch(&raw(Lens::Left, 0, &bytes));
        assert_eq!(kinds(&events), vec!["environment", "serial"]);
        match &events[1].kind {
            EventKind::Serial(serial) => {
                assert_eq!(serial.kind, SerialKind::Lens);
                assert_eq!(serial.serial.as_deref(), Some("S110LABC"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn firmware_reply_becomes_vitals() {
        let mut bytes = vec![0x23, 0x74];
        bytes.extend_from_slice(b"ver 1.6.3");
        let mut dispatcher = Dispatcher::new(120);
        let events = dispatcher.dispatch(&raw(Lens::Left, 0, &bytes));
        match &events[0].kind {
            EventKind::Vitals(vitals) => {
                assert_eq!(vitals.firmware_version.as_deref(), Some("ver 1.6.3"))
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn gestures_are_deduplicated_per_lens() {
        let mut dispatcher = Dispatcher::new(120);
        let first = dispatcher.dispatch(&raw(Lens::Left, 1_000, &[0xF5, 0x01]));
        assert!(first.iter().any(|e| matches!(&e.kind, EventKind::Gesture(g) if g.name == "Single")));

        let repeat = dispatcher.dispatch(&raw(Lens::Left, 1_100, &[0xF5, 0x01]));
        assert!(!repeat.iter().any(|e| matches!(e.kind, EventKind::Gesture(_))));

        let other_lens = dispatcher.dispatch(&raw(Lens::Right, 1_100, &[0xF5, 0x01]));
        assert!(other_lens.iter().any(|e| matches!(e.kind, EventKind::Gesture(_))));

        let later = dispatcher.dispatch(&raw(Lens::Left, 1_300, &[0xF5, 0x01]));
        assert!(later.iter().any(|e| matches!(e.kind, EventKind::Gesture(_))));
    }

    #[test]
    fn event_family_even_ai_and_system() {
        let mut dispatcher = Dispatcher::new(120);
        let activation = dispatcher.dispatch(&raw(Lens::Left, 0, &[0xF5, 0x17]));
        assert!(
            activation
                .iter()
                .any(|e| e.kind == EventKind::EvenAi(EvenAiEvent::ActivationRequested))
        );

        let worn = dispatcher.dispatch(&raw(Lens::Left, 0, &[0xF5, 0x06]));
        assert!(worn.iter().any(|e| matches!(&e.kind, EventKind::System(s) if s.wearing == Some(true))));
    }

    #[test]
    fn event_family_battery_vitals_suppress_even_ai() {
        let mut dispatcher = Dispatcher::new(120);
        let events = dispatcher.dispatch(&raw(Lens::Left, 0, &[0xF5, 0x0A, 0x42]));
        assert!(events.iter().any(
            |e| matches!(&e.kind, EventKind::Vitals(v) if v.battery_percent == Some(0x42))
        ));
        assert!(!events.iter().any(|e| matches!(e.kind, EventKind::EvenAi(_))));
    }

    #[test]
    fn unrouted_text_falls_back_to_vitals() {
        let mut dispatcher = Dispatcher::new(120);
        let events = dispatcher.dispatch(&raw(Lens::Left, 0, b"BATTERY: 77"));
        match &events[..] {
            [event] => match &event.kind {
                EventKind::Vitals(v) => assert_eq!(v.battery_percent, Some(77)),
                other => panic!("unexpected {other:?}"),
            },
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn reset_clears_gesture_history() {
        let mut dispatcher = Dispatcher::new(120);
        dispatcher.dispatch(&raw(Lens::Left, 0, &[0xF5, 0x02]));
        dispatcher.reset(Lens::Left);
        let again = dispatcher.dispatch(&raw(Lens::Left, 10, &[0xF5, 0x02]));
        assert!(again.iter().any(|e| matches!(e.kind, EventKind::Gesture(_))));
    }
}
