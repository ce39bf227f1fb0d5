//! Engine configuration.
//!
//! Every section has working defaults, so an empty YAML document is a valid
//! configuration. Durations are expressed in milliseconds.
//!
//! ```rust
//! use lenslink::EngineConfig;
//!
//! let config = EngineConfig::from_yaml_str("heartbeat:\n  base_interval_ms: 8000\n").unwrap();
//! assert_eq!(config.heartbeat.base_interval_ms, 8000);
//! assert_eq!(config.burst.chunk_size, 180);
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::burst::MAX_CHUNK_SIZE;
use crate::types::UpdateRate;
use crate::{LinkError, Result};

/// Top-level configuration for a [`crate::LensLink`] engine.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub transport: TransportConfig,
    pub heartbeat: HeartbeatConfig,
    pub paginator: PaginatorConfig,
    pub burst: BurstConfig,
    pub validator: ValidatorConfig,
    pub events: EventConfig,
}

impl EngineConfig {
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let config: EngineConfig = if yaml.trim().is_empty() {
            EngineConfig::default()
        } else {
            serde_yaml_ng::from_str(yaml)?
        };
        config.validate()?;
        Ok(config)
    }

    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let yaml = std::fs::read_to_string(path)
            .map_err(|source| LinkError::ConfigFile { path: path.to_path_buf(), source })?;
        Self::from_yaml_str(&yaml)
    }

    /// Reject values that would stall a loop or allocate nothing.
    pub fn validate(&self) -> Result<()> {
        fn positive(name: &str, value: u64) -> Result<()> {
            if value == 0 {
                return Err(LinkError::invalid_config(format!("{name} must be greater than zero")));
            }
            Ok(())
        }

        positive("transport.frame_capacity", self.transport.frame_capacity as u64)?;
        positive("transport.arm_timeout_ms", self.transport.arm_timeout_ms)?;
        positive("transport.desired_mtu", self.transport.desired_mtu as u64)?;
        positive("heartbeat.base_interval_ms", self.heartbeat.base_interval_ms)?;
        positive("heartbeat.idle_poll_ms", self.heartbeat.idle_poll_ms)?;
        positive("heartbeat.rebond_threshold", self.heartbeat.rebond_threshold as u64)?;
        positive("paginator.target_width_px", self.paginator.target_width_px as u64)?;
        positive("paginator.font_size_px", self.paginator.font_size_px as u64)?;
        positive("burst.chunk_size", self.burst.chunk_size as u64)?;
        if self.burst.chunk_size > MAX_CHUNK_SIZE {
            return Err(LinkError::invalid_config(format!(
                "burst.chunk_size must be at most {MAX_CHUNK_SIZE}"
            )));
        }
        positive("burst.queue_capacity", self.burst.queue_capacity as u64)?;
        positive("validator.check_interval_ms", self.validator.check_interval_ms)?;
        positive("validator.flap_window_ms", self.validator.flap_window_ms)?;
        positive("events.capacity", self.events.capacity as u64)?;
        positive("events.ack_timeout_ms", self.events.ack_timeout_ms)?;
        if self.heartbeat.jitter_ms >= self.heartbeat.base_interval_ms {
            return Err(LinkError::invalid_config(
                "heartbeat.jitter_ms must be smaller than heartbeat.base_interval_ms",
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    pub desired_mtu: u16,
    /// Pause between bring-up steps (MTU request, notification arming)
    pub step_delay_ms: u64,
    pub arm_timeout_ms: u64,
    /// Extra arming attempts after the first pair of encodings fails
    pub arm_retries: u32,
    pub arm_retry_delay_ms: u64,
    /// Write `ver\n` once after arming
    pub warm_up: bool,
    /// Broadcast capacity for raw inbound frames
    pub frame_capacity: usize,
    /// RSSI polling period; `None` disables polling
    pub rssi_poll_interval_ms: Option<u64>,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            desired_mtu: 498,
            step_delay_ms: 200,
            arm_timeout_ms: 1_000,
            arm_retries: 3,
            arm_retry_delay_ms: 300,
            warm_up: false,
            frame_capacity: 64,
            rssi_poll_interval_ms: None,
        }
    }
}

impl TransportConfig {
    pub fn step_delay(&self) -> Duration {
        Duration::from_millis(self.step_delay_ms)
    }

    pub fn arm_timeout(&self) -> Duration {
        Duration::from_millis(self.arm_timeout_ms)
    }

    pub fn arm_retry_delay(&self) -> Duration {
        Duration::from_millis(self.arm_retry_delay_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HeartbeatConfig {
    pub base_interval_ms: u64,
    /// Symmetric jitter applied to every interval (`base ± jitter`)
    pub jitter_ms: u64,
    /// Floor for every wait, and the poll period when nothing is scheduled
    pub idle_poll_ms: u64,
    /// Miss count at which the lens is reported as needing a rebond
    pub rebond_threshold: u32,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self { base_interval_ms: 5_000, jitter_ms: 0, idle_poll_ms: 1_000, rebond_threshold: 3 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PaginatorConfig {
    pub target_width_px: u32,
    pub font_size_px: u32,
    /// Slot count per packet part; each screen holds their sum
    pub lines_per_screen: Vec<usize>,
}

impl Default for PaginatorConfig {
    fn default() -> Self {
        Self { target_width_px: 488, font_size_px: 21, lines_per_screen: vec![3, 2] }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BurstConfig {
    /// Payload bytes per chunk
    pub chunk_size: usize,
    pub inter_chunk_delay_ms: u64,
    pub queue_capacity: usize,
}

impl Default for BurstConfig {
    fn default() -> Self {
        Self { chunk_size: 180, inter_chunk_delay_ms: 30, queue_capacity: 16 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidatorConfig {
    pub check_interval_ms: u64,
    pub voltage_drift_mv: u32,
    /// The drift must persist strictly longer than this before warning
    pub drift_duration_ms: u64,
    pub flap_window_ms: u64,
    pub flap_threshold: usize,
    pub flap_history: usize,
}

impl Default for ValidatorConfig {
    fn default() -> Self {
        Self {
            check_interval_ms: 10_000,
            voltage_drift_mv: 200,
            drift_duration_ms: 30_000,
            flap_window_ms: 5_000,
            flap_threshold: 2,
            flap_history: 10,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EventConfig {
    /// Broadcast capacity for typed events and console lines
    pub capacity: usize,
    /// How long request helpers wait for a matching reply
    pub ack_timeout_ms: u64,
    /// Same gesture code on the same lens inside this window is dropped
    pub gesture_dedupe_ms: u64,
    pub snapshot_rate: UpdateRate,
}

impl Default for EventConfig {
    fn default() -> Self {
        Self {
            capacity: 256,
            ack_timeout_ms: 2_000,
            gesture_dedupe_ms: 120,
            snapshot_rate: UpdateRate::Native,
        }
    }
}

impl EventConfig {
    pub fn ack_timeout(&self) -> Duration {
        Duration::from_millis(self.ack_timeout_ms)
    }
}
