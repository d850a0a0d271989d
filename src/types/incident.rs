//! Incident classification and per-kind counters

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Incident classes recognised by the rating engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IncidentKind {
    OffTrack,
    Spin,
    Collision,
}

impl IncidentKind {
    pub const ALL: [IncidentKind; 3] =
        [IncidentKind::OffTrack, IncidentKind::Spin, IncidentKind::Collision];

    /// Severity weight added to the corner bucket.
    pub fn weight(self) -> f64 {
        match self {
            IncidentKind::OffTrack => 1.0,
            IncidentKind::Spin => 2.0,
            IncidentKind::Collision => 4.0,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            IncidentKind::OffTrack => "off_track",
            IncidentKind::Spin => "spin",
            IncidentKind::Collision => "collision",
        }
    }
}

impl fmt::Display for IncidentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for IncidentKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "off_track" => Ok(IncidentKind::OffTrack),
            "spin" => Ok(IncidentKind::Spin),
            "collision" => Ok(IncidentKind::Collision),
            other => Err(format!("unknown incident kind '{other}'")),
        }
    }
}

/// A detected incident. Always owned by the session open when it was detected.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Incident {
    pub session_id: String,
    pub kind: IncidentKind,
    pub weight: f64,
    pub timestamp: DateTime<Utc>,
    /// Session corner count at detection.
    pub corner_index: u64,
}

/// Incident totals broken down by kind.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IncidentCounts {
    pub off_track: u32,
    pub spin: u32,
    pub collision: u32,
}

impl IncidentCounts {
    pub fn record(&mut self, kind: IncidentKind) {
        match kind {
            IncidentKind::OffTrack => self.off_track += 1,
            IncidentKind::Spin => self.spin += 1,
            IncidentKind::Collision => self.collision += 1,
        }
    }

    pub fn get(&self, kind: IncidentKind) -> u32 {
        match kind {
            IncidentKind::OffTrack => self.off_track,
            IncidentKind::Spin => self.spin,
            IncidentKind::Collision => self.collision,
        }
    }

    pub fn total(&self) -> u32 {
        self.off_track + self.spin + self.collision
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn weights_follow_severity() {
        assert_eq!(IncidentKind::OffTrack.weight(), 1.0);
        assert_eq!(IncidentKind::Spin.weight(), 2.0);
        assert_eq!(IncidentKind::Collision.weight(), 4.0);
    }

    #[test]
    fn kind_names_parse_back() {
        for kind in IncidentKind::ALL {
            assert_eq!(kind.as_str().parse::<IncidentKind>(), Ok(kind));
        }
        assert!("wall".parse::<IncidentKind>().is_err());
    }

    #[test]
    fn counts_track_each_kind() {
        let mut counts = IncidentCounts::default();
        counts.record(IncidentKind::OffTrack);
        counts.record(IncidentKind::OffTrack);
        counts.record(IncidentKind::Collision);
        assert_eq!(counts.get(IncidentKind::OffTrack), 2);
        assert_eq!(counts.get(IncidentKind::Spin), 0);
        assert_eq!(counts.total(), 3);
    }
}
