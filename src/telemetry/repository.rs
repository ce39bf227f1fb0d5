//! Per-lens and merged telemetry state.
//!
//! [`TelemetryRepository`] is owned by one writer (the event pump). Every
//! update produces a fresh [`Snapshot`] behind an `Arc`; readers never see a
//! partially applied event.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::types::{CaseUpdate, DeviceVitals, EventKind, Lens, PerLens, StateFlags, SystemEvent, TelemetryEvent};

/// Vitals older than this no longer count as evidence of a sleeping lens.
pub const VITALS_SLEEP_TIMEOUT_MS: u64 = 3_000;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LensTelemetry {
    pub battery_percent: Option<u8>,
    pub case_battery_percent: Option<u8>,
    pub battery_voltage_mv: Option<u16>,
    pub case_voltage_mv: Option<u16>,
    pub charging: Option<bool>,
    pub rssi: Option<i16>,
    pub firmware_version: Option<String>,
    pub uptime_seconds: Option<u64>,
    pub last_ping_at: Option<u64>,
    pub last_ack_at: Option<u64>,
    pub missed_heartbeats: u32,
    pub case_open: Option<bool>,
    pub in_case: Option<bool>,
    pub wearing: Option<bool>,
    /// Temples folded; `Some(true)` while cradled, `Some(false)` while worn
    pub fold_state: Option<bool>,
    pub silent_mode: Option<bool>,
    pub last_vitals_at: Option<u64>,
    pub last_updated: Option<u64>,
}

impl LensTelemetry {
    fn with_shared(mut self, shared: &Shared) -> Self {
        self.case_open = self.case_open.or(shared.case_open);
        self.in_case = self.in_case.or(shared.in_case);
        self.fold_state = self.fold_state.or(shared.fold_state);
        self.last_vitals_at = self.last_vitals_at.or(shared.last_vitals_at);
        self
    }

    fn apply_flags(&mut self, flags: &StateFlags) {
        self.wearing = Some(flags.wearing);
        self.in_case = Some(flags.in_cradle);
        self.case_open = Some(flags.case_open);
        self.silent_mode = Some(flags.silent_mode);
        self.charging = Some(flags.charging);
        self.apply_fold(Some(flags.in_cradle), Some(flags.wearing));
    }

    fn apply_fold(&mut self, in_case: Option<bool>, wearing: Option<bool>) {
        if in_case == Some(true) {
            self.fold_state = Some(true);
        } else if wearing == Some(true) {
            self.fold_state = Some(false);
        }
    }

    fn apply_vitals(&mut self, vitals: &DeviceVitals) {
        overwrite(&mut self.battery_percent, vitals.battery_percent);
        overwrite(&mut self.case_battery_percent, vitals.case_battery_percent);
        overwrite(&mut self.firmware_version, vitals.firmware_version.clone());
        overwrite(&mut self.rssi, vitals.signal_rssi);
        overwrite(&mut self.wearing, vitals.wearing);
        overwrite(&mut self.in_case, vitals.in_cradle);
        overwrite(&mut self.charging, vitals.charging);
        overwrite(&mut self.silent_mode, vitals.silent_mode);
        overwrite(&mut self.case_open, vitals.case_open);
        self.apply_fold(vitals.in_cradle, vitals.wearing);
    }

    fn apply_system(&mut self, event: &SystemEvent) {
        overwrite(&mut self.wearing, event.wearing);
        overwrite(&mut self.in_case, event.in_case);
        overwrite(&mut self.case_open, event.case_open);
        overwrite(&mut self.charging, event.charging);
        overwrite(&mut self.case_battery_percent, event.case_battery_percent);
        self.apply_fold(event.in_case, event.wearing);
    }

    fn apply_case(&mut self, update: &CaseUpdate) {
        overwrite(&mut self.case_battery_percent, update.battery_percent);
        overwrite(&mut self.case_voltage_mv, update.voltage_mv);
        overwrite(&mut self.case_open, update.lid_open);
        overwrite(&mut self.silent_mode, update.silent_mode);
    }
}

fn overwrite<T>(slot: &mut Option<T>, value: Option<T>) {
    if value.is_some() {
        *slot = value;
    }
}

/// Charging case state. Fields merge: a `None` in an update keeps the
/// previous value.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaseStatus {
    pub battery_percent: Option<u8>,
    pub charging: Option<bool>,
    pub lid_open: Option<bool>,
    pub silent_mode: Option<bool>,
    pub voltage_mv: Option<u16>,
    pub updated_at: Option<u64>,
}

impl CaseStatus {
    fn merge(&mut self, update: &CaseUpdate, timestamp: u64) {
        overwrite(&mut self.battery_percent, update.battery_percent);
        overwrite(&mut self.charging, update.charging);
        overwrite(&mut self.lid_open, update.lid_open);
        overwrite(&mut self.silent_mode, update.silent_mode);
        overwrite(&mut self.voltage_mv, update.voltage_mv);
        self.updated_at = Some(timestamp);
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum SleepPhase {
    #[default]
    Unknown,
    Awake,
    Sleeping,
}

/// Values shared across lenses and pushed down into lenses that lack them.
#[derive(Debug, Clone, Copy, Default)]
struct Shared {
    case_open: Option<bool>,
    in_case: Option<bool>,
    fold_state: Option<bool>,
    last_vitals_at: Option<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    pub lenses: PerLens<LensTelemetry>,
    pub case: CaseStatus,
    pub uptime_seconds: Option<u64>,
    pub last_lens: Option<Lens>,
    pub last_frame_hex: Option<String>,
    pub firmware_version: Option<String>,
    pub sleep_phase: SleepPhase,
    /// True when either lens reports the case open
    pub case_open: Option<bool>,
    pub in_case: Option<bool>,
    pub fold_state: Option<bool>,
    pub last_vitals_at: Option<u64>,
    pub recorded_at: Option<u64>,
    /// Bumped each time every lens has disconnected and telemetry reset
    #[serde(default)]
    pub session: u64,
}

impl Snapshot {
    pub fn lens(&self, lens: Lens) -> &LensTelemetry {
        &self.lenses[lens]
    }

    /// No event has been applied since creation or the last reset.
    pub fn is_empty(&self) -> bool {
        self.recorded_at.is_none()
    }

    fn resolved(&self, lens: Lens) -> (Option<bool>, Option<bool>, Option<bool>, Option<u64>) {
        let telemetry = &self.lenses[lens];
        (
            telemetry.case_open.or(self.case_open),
            telemetry.in_case.or(self.in_case),
            telemetry.fold_state.or(self.fold_state),
            telemetry.last_vitals_at.or(self.last_vitals_at),
        )
    }

    /// Folded in a closed case with fresh vitals.
    pub fn is_sleeping(&self, lens: Lens, now: u64) -> bool {
        let (Some(case_open), Some(in_case), Some(folded), Some(vitals_at)) = self.resolved(lens) else {
            return false;
        };
        !case_open && in_case && folded && now.saturating_sub(vitals_at) <= VITALS_SLEEP_TIMEOUT_MS
    }

    pub fn is_awake(&self, lens: Lens, now: u64) -> bool {
        let (case_open, in_case, folded, vitals_at) = self.resolved(lens);
        if case_open.is_none() && in_case.is_none() && folded.is_none() && vitals_at.is_none() {
            return false;
        }
        if case_open == Some(true) || in_case == Some(false) || folded == Some(false) {
            return true;
        }
        vitals_at.is_none_or(|at| now.saturating_sub(at) > VITALS_SLEEP_TIMEOUT_MS)
    }

    pub fn is_headset_sleeping(&self, now: u64) -> bool {
        Lens::ALL.iter().all(|&lens| self.is_sleeping(lens, now))
    }

    pub fn sleep_phase_at(&self, now: u64) -> SleepPhase {
        if self.is_headset_sleeping(now) {
            SleepPhase::Sleeping
        } else if Lens::ALL.iter().any(|&lens| self.is_awake(lens, now)) {
            SleepPhase::Awake
        } else {
            SleepPhase::Unknown
        }
    }
}

/// Single-writer telemetry store.
#[derive(Debug, Clone, Default)]
pub struct TelemetryRepository {
    snapshot: Arc<Snapshot>,
    connected: PerLens<bool>,
}

impl TelemetryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> Arc<Snapshot> {
        self.snapshot.clone()
    }

    /// Fold one event into a new snapshot.
    pub fn apply(&mut self, event: &TelemetryEvent) -> Arc<Snapshot> {
        let lens = event.lens;
        let ts = event.timestamp;
        let mut next = (*self.snapshot).clone();
        let mut telemetry = next.lenses[lens].clone();
        telemetry.last_updated = Some(ts);

        let mut vitals = true;
        match &event.kind {
            EventKind::State { flags, .. } => telemetry.apply_flags(flags),
            EventKind::Battery { battery_percent, case_battery_percent, info } => {
                overwrite(&mut telemetry.battery_percent, *battery_percent);
                overwrite(&mut telemetry.case_battery_percent, *case_battery_percent);
                if let Some(info) = info {
                    telemetry.battery_voltage_mv = Some(info.voltage_mv);
                    telemetry.charging = Some(info.charging);
                }
            }
            EventKind::Case(update) => {
                telemetry.apply_case(update);
                next.case.merge(update, ts);
            }
            EventKind::Uptime { seconds } => {
                telemetry.uptime_seconds = Some(*seconds);
                next.uptime_seconds = Some(*seconds);
            }
            EventKind::Vitals(device) => telemetry.apply_vitals(device),
            EventKind::System(system) => telemetry.apply_system(system),
            EventKind::Ack(_) => {
                telemetry.last_ack_at = Some(ts);
                vitals = false;
            }
            _ => vitals = false,
        }
        if vitals {
            telemetry.last_vitals_at = telemetry.last_vitals_at.max(Some(ts));
        }
        if let Some(version) = &telemetry.firmware_version {
            next.firmware_version = Some(version.clone());
        }

        next.last_lens = Some(lens);
        next.last_frame_hex = Some(event.raw_hex());
        next.recorded_at = Some(ts);
        self.commit(next, lens, telemetry, ts)
    }

    pub fn set_rssi(&mut self, lens: Lens, rssi: Option<i16>, timestamp: u64) -> Arc<Snapshot> {
        self.update_lens(lens, timestamp, |t| t.rssi = rssi)
    }

    /// Heartbeat bookkeeping. Zero timestamps mean "never".
    pub fn update_heartbeat(
        &mut self,
        lens: Lens,
        last_ping_at: u64,
        last_ack_at: u64,
        missed: u32,
        timestamp: u64,
    ) -> Arc<Snapshot> {
        self.update_lens(lens, timestamp, |t| {
            t.last_ping_at = (last_ping_at > 0).then_some(last_ping_at);
            t.last_ack_at = (last_ack_at > 0).then_some(last_ack_at).or(t.last_ack_at);
            t.missed_heartbeats = missed;
        })
    }

    /// Track link state. Once every lens has gone down, the snapshot resets.
    pub fn set_connected(&mut self, lens: Lens, connected: bool) -> Option<Arc<Snapshot>> {
        let was_any = self.connected.iter().any(|(_, c)| *c);
        self.connected[lens] = connected;
        let is_any = self.connected.iter().any(|(_, c)| *c);
        if was_any && !is_any {
            self.reset();
            return Some(self.snapshot());
        }
        None
    }

    /// Clear all telemetry and start a new session.
    pub fn reset(&mut self) {
        let session = self.snapshot.session.wrapping_add(1);
        self.snapshot = Arc::new(Snapshot { session, ..Snapshot::default() });
    }

    fn update_lens(&mut self, lens: Lens, timestamp: u64, edit: impl FnOnce(&mut LensTelemetry)) -> Arc<Snapshot> {
        let mut next = (*self.snapshot).clone();
        let mut telemetry = next.lenses[lens].clone();
        edit(&mut telemetry);
        telemetry.last_updated = Some(timestamp);
        next.recorded_at = Some(timestamp);
        self.commit(next, lens, telemetry, timestamp)
    }

    fn commit(&mut self, mut next: Snapshot, lens: Lens, telemetry: LensTelemetry, now: u64) -> Arc<Snapshot> {
        let other = next.lenses[lens.other()].clone();
        let case_open = match (telemetry.case_open, other.case_open) {
            (Some(true), _) | (_, Some(true)) => Some(true),
            (own, theirs) => own.or(theirs).or(next.case_open),
        };
        let shared = Shared {
            case_open,
            in_case: telemetry.in_case.or(other.in_case).or(next.in_case),
            fold_state: telemetry.fold_state.or(other.fold_state).or(next.fold_state),
            last_vitals_at: telemetry.last_vitals_at.max(other.last_vitals_at).max(next.last_vitals_at),
        };

        next.lenses[lens] = telemetry.with_shared(&shared);
        next.lenses[lens.other()] = other.with_shared(&shared);
        next.case_open = shared.case_open;
        next.in_case = shared.in_case;
        next.fold_state = shared.fold_state;
        next.last_vitals_at = shared.last_vitals_at;
        next.sleep_phase = next.sleep_phase_at(now);

        self.snapshot = Arc::new(next);
        self.snapshot.clone()
    }
}
