//! Periodic sanity checks over telemetry snapshots.
//!
//! Each check latches once it warns and unlatches when the condition clears,
//! so a persistent problem produces one console line rather than one per
//! tick. Latches and history are cleared when the snapshot starts a new
//! session, so a reconnect gets fresh warnings.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, watch};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::repository::Snapshot;
use crate::config::ValidatorConfig;
use crate::types::{Clock, ConsoleLine, Lens, PerLens};

const TAG: &str = "WARN";

/// Checker state carried between ticks.
#[derive(Debug, Clone)]
pub struct ConsistencyValidator {
    config: ValidatorConfig,
    drift_started_at: Option<u64>,
    drift_warned: bool,
    case_percent_warned: bool,
    lens_percent_warned: PerLens<bool>,
    last_lid_open: Option<bool>,
    lid_toggles: VecDeque<u64>,
    flap_warned: bool,
    last_uptime: PerLens<Option<u64>>,
    uptime_warned: PerLens<bool>,
    session: u64,
}

impl ConsistencyValidator {
    pub fn new(config: ValidatorConfig) -> Self {
        Self {
            config,
            drift_started_at: None,
            drift_warned: false,
            case_percent_warned: false,
            lens_percent_warned: PerLens::default(),
            last_lid_open: None,
            lid_toggles: VecDeque::new(),
            flap_warned: false,
            last_uptime: PerLens::default(),
            uptime_warned: PerLens::default(),
            session: 0,
        }
    }

    /// Forget latched warnings and tracked history.
    pub fn reset(&mut self) {
        *self = Self { session: self.session, ..Self::new(self.config.clone()) };
    }

    /// Run every check against `snapshot`, returning new warnings.
    pub fn check(&mut self, now: u64, snapshot: &Snapshot) -> Vec<ConsoleLine> {
        let mut lines = Vec::new();
        if snapshot.session != self.session {
            debug!(session = snapshot.session, "Telemetry session changed, validator reset");
            self.reset();
            self.session = snapshot.session;
        }
        if snapshot.lenses.iter().all(|(_, t)| t.last_updated.is_none()) {
            return lines;
        }
        self.check_voltage_drift(now, snapshot, &mut lines);
        self.check_case_percent(now, snapshot, &mut lines);
        self.check_lid_flapping(now, snapshot, &mut lines);
        self.check_uptime(now, snapshot, &mut lines);
        lines
    }

    fn check_voltage_drift(&mut self, now: u64, snapshot: &Snapshot, lines: &mut Vec<ConsoleLine>) {
        let left = snapshot.lens(Lens::Left).battery_voltage_mv;
        let right = snapshot.lens(Lens::Right).battery_voltage_mv;
        let drifting = match (left, right) {
            (Some(l), Some(r)) => u32::from(l.abs_diff(r)) > self.config.voltage_drift_mv,
            _ => false,
        };
        if !drifting {
            self.drift_started_at = None;
            self.drift_warned = false;
            return;
        }
        let started = *self.drift_started_at.get_or_insert(now);
        if !self.drift_warned && now.saturating_sub(started) > self.config.drift_duration_ms {
            let message = format!("[VITALS] voltage drift > {} mV", self.config.voltage_drift_mv);
            lines.push(ConsoleLine::new(TAG, None, message, now));
            self.drift_warned = true;
        }
    }

    fn check_case_percent(&mut self, now: u64, snapshot: &Snapshot, lines: &mut Vec<ConsoleLine>) {
        let invalid = |percent: Option<u8>| percent.is_some_and(|p| p > 100);

        if invalid(snapshot.case.battery_percent) {
            if !self.case_percent_warned {
                lines.push(ConsoleLine::new(TAG, None, "[CASE] invalid percent", now));
                self.case_percent_warned = true;
            }
        } else {
            self.case_percent_warned = false;
        }

        for lens in Lens::ALL {
            if invalid(snapshot.lens(lens).case_battery_percent) {
                if !self.lens_percent_warned[lens] {
                    lines.push(ConsoleLine::new(TAG, Some(lens), "[CASE] invalid percent", now));
                    self.lens_percent_warned[lens] = true;
                }
            } else {
                self.lens_percent_warned[lens] = false;
            }
        }
    }

    fn check_lid_flapping(&mut self, now: u64, snapshot: &Snapshot, lines: &mut Vec<ConsoleLine>) {
        let Some(lid_open) = snapshot.case.lid_open else {
            self.lid_toggles.clear();
            self.last_lid_open = None;
            self.flap_warned = false;
            return;
        };
        if self.last_lid_open.is_some_and(|last| last != lid_open) {
            self.lid_toggles.push_back(now);
            while self.lid_toggles.len() > self.config.flap_history {
                self.lid_toggles.pop_front();
            }
        }
        self.last_lid_open = Some(lid_open);
        while self.lid_toggles.front().is_some_and(|&at| now.saturating_sub(at) > self.config.flap_window_ms) {
            self.lid_toggles.pop_front();
        }

        if self.lid_toggles.len() >= self.config.flap_threshold {
            if !self.flap_warned {
                lines.push(ConsoleLine::new(TAG, None, "[CASE] unstable lid state", now));
                self.flap_warned = true;
            }
        } else {
            self.flap_warned = false;
        }
    }

    fn check_uptime(&mut self, now: u64, snapshot: &Snapshot, lines: &mut Vec<ConsoleLine>) {
        for lens in Lens::ALL {
            let Some(uptime) = snapshot.lens(lens).uptime_seconds else {
                continue;
            };
            match self.last_uptime[lens] {
                Some(last) if uptime < last => {
                    if !self.uptime_warned[lens] {
                        lines.push(ConsoleLine::new(TAG, Some(lens), "[VITALS] uptime reset", now));
                        self.uptime_warned[lens] = true;
                    }
                }
                Some(last) if uptime > last => self.uptime_warned[lens] = false,
                _ => {}
            }
            self.last_uptime[lens] = Some(uptime);
        }
    }
}

/// Handle to the periodic validator task. Dropping it stops the task.
#[derive(Debug)]
pub struct ValidatorHandle {
    cancel: CancellationToken,
}

impl ValidatorHandle {
    /// Check the latest snapshot every `check_interval_ms` and publish
    /// warnings on `console`.
    pub fn spawn(
        config: ValidatorConfig,
        snapshots: watch::Receiver<Arc<Snapshot>>,
        clock: Arc<dyn Clock>,
        console: broadcast::Sender<ConsoleLine>,
    ) -> Self {
        let cancel = CancellationToken::new();
        let period = Duration::from_millis(config.check_interval_ms.max(1));
        let mut validator = ConsistencyValidator::new(config);
        let token = cancel.clone();

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {}
                }
                let snapshot = snapshots.borrow().clone();
                for line in validator.check(clock.now_millis(), &snapshot) {
                    warn!(lens = ?line.lens, "{}", line.message);
                    let _ = console.send(line);
                }
            }
            debug!("consistency validator stopped");
        });

        Self { cancel }
    }

    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    pub fn is_running(&self) -> bool {
        !self.cancel.is_cancelled()
    }
}

impl Drop for ValidatorHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
