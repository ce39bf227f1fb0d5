//! Per-lens heartbeat bookkeeping.
//!
//! [`HeartbeatSchedule`] is plain state with no I/O. The supervisor loop owns
//! one and is its only writer: it feeds link/case changes in, asks
//! [`HeartbeatSchedule::plan`] what is due, sends, and reports the result back
//! through [`HeartbeatSchedule::record`].

use std::fmt;

use crate::config::HeartbeatConfig;
use crate::types::{AckType, Lens, PerLens};

/// Outcome of one heartbeat write as reported by the sender.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeartbeatResult {
    pub sequence: u8,
    pub success: bool,
    /// When the reply landed; the tick time is used when absent
    pub timestamp: Option<u64>,
    pub latency_ms: Option<u64>,
    pub ack_type: Option<AckType>,
}

/// Why a lens is not being pinged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateReason {
    LidClosed,
    InCase,
}

impl fmt::Display for GateReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GateReason::LidClosed => f.write_str("lid closed"),
            GateReason::InCase => f.write_str("in case"),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LensHeartbeatState {
    pub connected: bool,
    pub in_case: Option<bool>,
    /// `None` on an eligible connected lens means due now
    pub next_due_at: Option<u64>,
    pub last_success_at: Option<u64>,
    pub last_ack_at: Option<u64>,
    pub last_ack_type: Option<AckType>,
    /// Saturates at the rebond threshold
    pub miss_count: u32,
}

/// Something the supervisor reports after a tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HeartbeatEvent {
    Success {
        lens: Lens,
        sequence: u8,
        timestamp: u64,
        latency_ms: Option<u64>,
        ack_type: AckType,
        /// Time since the previous success, or the base interval for the first
        elapsed_ms: u64,
    },
    Miss {
        lens: Lens,
        timestamp: u64,
        miss_count: u32,
        /// The miss count reached the rebond threshold
        rebond_needed: bool,
    },
    Skipped { lens: Lens, reason: GateReason, timestamp: u64 },
}

impl HeartbeatEvent {
    pub fn lens(&self) -> Lens {
        match self {
            HeartbeatEvent::Success { lens, .. }
            | HeartbeatEvent::Miss { lens, .. }
            | HeartbeatEvent::Skipped { lens, .. } => *lens,
        }
    }
}

/// What one tick should do.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickPlan {
    /// Lenses to ping now, left first
    pub due: Vec<Lens>,
    /// Skip reports for gated lenses that were due
    pub skipped: Vec<HeartbeatEvent>,
    /// How long to sleep when nothing is due; `None` when no lens is
    /// connected and the loop should wait for a state change
    pub wait_ms: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct HeartbeatSchedule {
    config: HeartbeatConfig,
    lid_open: Option<bool>,
    lenses: PerLens<LensHeartbeatState>,
}

impl HeartbeatSchedule {
    pub fn new(config: HeartbeatConfig) -> Self {
        Self { config, lid_open: None, lenses: PerLens::default() }
    }

    pub fn config(&self) -> &HeartbeatConfig {
        &self.config
    }

    pub fn lens(&self, lens: Lens) -> &LensHeartbeatState {
        &self.lenses[lens]
    }

    pub fn lenses(&self) -> &PerLens<LensHeartbeatState> {
        &self.lenses
    }

    pub fn lid_open(&self) -> Option<bool> {
        self.lid_open
    }

    /// Returns `false` when nothing changed.
    pub fn set_connected(&mut self, lens: Lens, connected: bool) -> bool {
        let state = &mut self.lenses[lens];
        if state.connected == connected {
            return false;
        }
        state.connected = connected;
        if connected {
            state.next_due_at = if state.in_case == Some(true) { None } else { Some(0) };
        } else {
            state.next_due_at = None;
            state.miss_count = 0;
            state.last_success_at = None;
        }
        true
    }

    /// Shared case lid state. Opening the lid makes every connected lens due.
    pub fn set_lid_open(&mut self, value: Option<bool>) -> bool {
        if self.lid_open == value {
            return false;
        }
        self.lid_open = value;
        if value == Some(true) {
            for (_, state) in self.lenses.iter_mut() {
                if state.connected && state.in_case != Some(true) {
                    state.next_due_at = Some(0);
                }
            }
        }
        true
    }

    pub fn set_in_case(&mut self, lens: Lens, value: Option<bool>) -> bool {
        let state = &mut self.lenses[lens];
        if state.in_case == value {
            return false;
        }
        state.in_case = value;
        if value == Some(true) {
            state.next_due_at = None;
        } else if state.connected {
            state.next_due_at = Some(0);
        }
        true
    }

    /// Record a low-level ack, independent of the heartbeat cycle.
    pub fn on_ack(&mut self, lens: Lens, timestamp: u64, ack_type: AckType) {
        let state = &mut self.lenses[lens];
        state.last_ack_at = Some(timestamp);
        state.last_ack_type = Some(ack_type);
    }

    pub fn gate(&self, lens: Lens) -> Option<GateReason> {
        if self.lid_open == Some(false) {
            return Some(GateReason::LidClosed);
        }
        if self.lenses[lens].in_case == Some(true) {
            return Some(GateReason::InCase);
        }
        None
    }

    /// Evaluate gating and due times at `now`.
    ///
    /// `link_up` reports whether the transport for a lens can carry a write;
    /// lenses whose link is down are left untouched.
    pub fn plan(&mut self, now: u64, link_up: impl Fn(Lens) -> bool) -> TickPlan {
        let idle_poll = self.config.idle_poll_ms;
        let mut plan = TickPlan::default();
        let mut any_connected = false;
        let mut wait: Option<u64> = None;

        for lens in Lens::ALL {
            let gate = self.gate(lens);
            let state = &mut self.lenses[lens];
            if !state.connected || !link_up(lens) {
                continue;
            }
            any_connected = true;

            if let Some(reason) = gate {
                if state.next_due_at.is_some_and(|due| now >= due) {
                    plan.skipped.push(HeartbeatEvent::Skipped { lens, reason, timestamp: now });
                    state.miss_count = 0;
                }
                state.next_due_at = None;
                continue;
            }

            match state.next_due_at {
                Some(due) if now < due => {
                    let remaining = (due - now).max(idle_poll);
                    wait = Some(wait.map_or(remaining, |w| w.min(remaining)));
                }
                _ => plan.due.push(lens),
            }
        }

        plan.wait_ms = any_connected.then(|| wait.unwrap_or(idle_poll));
        plan
    }

    /// `base ± jitter`, floored at the idle poll period.
    pub fn interval_ms(&self, jitter_offset: i64) -> u64 {
        let base = self.config.base_interval_ms as i64;
        (base.saturating_add(jitter_offset)).max(self.config.idle_poll_ms as i64) as u64
    }

    /// Apply the result of a heartbeat sent at tick time `now`. `None` means
    /// no write was possible and counts as a miss.
    pub fn record(
        &mut self,
        lens: Lens,
        now: u64,
        result: Option<HeartbeatResult>,
        jitter_offset: i64,
    ) -> HeartbeatEvent {
        let interval = self.interval_ms(jitter_offset);
        let threshold = self.config.rebond_threshold;
        let base = self.config.base_interval_ms;
        let state = &mut self.lenses[lens];
        let timestamp = result.and_then(|r| r.timestamp).unwrap_or(now);
        state.next_due_at = Some(timestamp + interval);

        match result {
            Some(result) if result.success => {
                state.miss_count = 0;
                let elapsed_ms = state
                    .last_success_at
                    .and_then(|last| timestamp.checked_sub(last))
                    .unwrap_or(base);
                state.last_success_at = Some(timestamp);
                HeartbeatEvent::Success {
                    lens,
                    sequence: result.sequence,
                    timestamp,
                    latency_ms: result.latency_ms,
                    ack_type: result.ack_type.unwrap_or(AckType::Binary),
                    elapsed_ms,
                }
            }
            _ => {
                state.miss_count = (state.miss_count + 1).min(threshold);
                HeartbeatEvent::Miss {
                    lens,
                    timestamp,
                    miss_count: state.miss_count,
                    rebond_needed: state.miss_count >= threshold,
                }
            }
        }
    }

    /// Forget everything, including the lid state.
    pub fn reset(&mut self) {
        self.lid_open = None;
        self.lenses = PerLens::default();
    }
}
