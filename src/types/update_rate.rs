//! Publication rate for snapshot subscribers

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// How often a subscriber wants rating snapshots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdateRate {
    /// Every snapshot the telemetry loop publishes.
    Native,

    /// At most this many snapshots per second, latest wins.
    /// Rates at or above the telemetry send rate collapse to `Native`.
    Max(u32),
}

impl Default for UpdateRate {
    fn default() -> Self {
        UpdateRate::Max(10)
    }
}

impl UpdateRate {
    /// Normalize against the telemetry send rate.
    pub fn normalize(self, source_hz: f64) -> Self {
        match self {
            UpdateRate::Native => UpdateRate::Native,
            UpdateRate::Max(0) => UpdateRate::Native,
            UpdateRate::Max(hz) if f64::from(hz) >= source_hz => UpdateRate::Native,
            UpdateRate::Max(hz) => UpdateRate::Max(hz),
        }
    }

    pub fn throttle_interval(self, source_hz: f64) -> Option<Duration> {
        match self.normalize(source_hz) {
            UpdateRate::Native => None,
            UpdateRate::Max(hz) => Some(Duration::from_secs_f64(1.0 / f64::from(hz))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rates_above_source_collapse_to_native() {
        assert_eq!(UpdateRate::Max(60).normalize(20.0), UpdateRate::Native);
        assert_eq!(UpdateRate::Max(10).normalize(20.0), UpdateRate::Max(10));
        assert_eq!(UpdateRate::Max(0).normalize(20.0), UpdateRate::Native);
    }

    #[test]
    fn interval_matches_rate() {
        assert_eq!(UpdateRate::Max(10).throttle_interval(60.0), Some(Duration::from_millis(100)));
        assert_eq!(UpdateRate::Native.throttle_interval(60.0), None);
    }
}
