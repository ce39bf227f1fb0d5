//! Update rate control for snapshot streams

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Update rate for snapshot streams.
///
/// Snapshots are produced per inbound event, so there is no fixed source
/// frequency. `Max(hz)` caps delivery; `Max(0)` is treated as uncapped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdateRate {
    /// Every snapshot, as soon as it is published
    #[default]
    Native,

    /// At most this many snapshots per second (latest wins)
    Max(u32),
}

impl UpdateRate {
    /// Collapse degenerate caps to `Native`.
    pub fn normalize(self) -> Self {
        match self {
            UpdateRate::Max(0) => UpdateRate::Native,
            other => other,
        }
    }

    pub fn needs_throttle(self) -> bool {
        matches!(self.normalize(), UpdateRate::Max(_))
    }

    /// Minimum spacing between delivered snapshots, if capped.
    pub fn throttle_interval(self) -> Option<Duration> {
        match self.normalize() {
            UpdateRate::Native => None,
            UpdateRate::Max(hz) => Some(Duration::from_secs_f64(1.0 / hz as f64)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_cap_is_native() {
        assert_eq!(UpdateRate::Max(0).normalize(), UpdateRate::Native);
        assert!(!UpdateRate::Max(0).needs_throttle());
        assert_eq!(UpdateRate::Max(0).throttle_interval(), None);
    }

    #[test]
    fn capped_rate_yields_interval() {
        assert!(UpdateRate::Max(4).needs_throttle());
        assert_eq!(UpdateRate::Max(4).throttle_interval(), Some(Duration::from_millis(250)));
        assert_eq!(UpdateRate::Native.throttle_interval(), None);
    }

    #[test]
    fn native_parses_from_plain_scalar() {
        let rate: UpdateRate = serde_yaml_ng::from_str("native").unwrap();
        assert_eq!(rate, UpdateRate::Native);
    }
}
