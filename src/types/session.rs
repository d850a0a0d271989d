//! Race session records

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::IncidentCounts;

/// Why a session was closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndReason {
    /// The game left the race session type (back to menus, qualifying, ...).
    SessionTypeChanged,
    /// Session time stopped advancing for longer than the stall timeout.
    Stalled,
    /// A result event or a classified result status was observed.
    ResultObserved,
    /// A different session uid started streaming.
    SessionUidChanged,
    /// The process is shutting down.
    Shutdown,
}

impl EndReason {
    pub fn as_str(self) -> &'static str {
        match self {
            EndReason::SessionTypeChanged => "session_type_changed",
            EndReason::Stalled => "stalled",
            EndReason::ResultObserved => "result_observed",
            EndReason::SessionUidChanged => "session_uid_changed",
            EndReason::Shutdown => "shutdown",
        }
    }
}

impl fmt::Display for EndReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EndReason {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "session_type_changed" => Ok(EndReason::SessionTypeChanged),
            "stalled" => Ok(EndReason::Stalled),
            "result_observed" => Ok(EndReason::ResultObserved),
            "session_uid_changed" => Ok(EndReason::SessionUidChanged),
            "shutdown" => Ok(EndReason::Shutdown),
            other => Err(format!("unknown end reason '{other}'")),
        }
    }
}

/// One race session as persisted and served by the read API.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionRecord {
    /// Hex form of the telemetry session uid.
    pub id: String,
    pub track_id: i8,
    pub session_type: u8,
    pub started_at: DateTime<Utc>,
    /// `None` while the session is open.
    pub ended_at: Option<DateTime<Utc>>,
    pub corners: u64,
    pub incidents: IncidentCounts,
    pub start_rating: f64,
    /// Latest rating while open, final rating once closed.
    pub end_rating: Option<f64>,
    /// Metres driven during the session.
    pub distance_m: f64,
    pub end_reason: Option<EndReason>,
}

impl SessionRecord {
    pub fn is_open(&self) -> bool {
        self.ended_at.is_none()
    }

    /// Corners per incident. `None` when the session had no incidents.
    pub fn cpi(&self) -> Option<f64> {
        corners_per_incident(self.corners, self.incidents.total())
    }

    pub fn rating_delta(&self) -> Option<f64> {
        self.end_rating.map(|end| end - self.start_rating)
    }
}

fn corners_per_incident(corners: u64, incidents: u32) -> Option<f64> {
    (incidents > 0).then(|| corners as f64 / f64::from(incidents))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(corners: u64, incidents: IncidentCounts) -> SessionRecord {
        SessionRecord {
            id: "00000000000000ff".into(),
            track_id: 0,
            session_type: 10,
            started_at: Utc::now(),
            ended_at: None,
            corners,
            incidents,
            start_rating: 2.5,
            end_rating: Some(2.6),
            distance_m: 0.0,
            end_reason: None,
        }
    }

    #[test]
    fn cpi_divides_corners_by_incidents() {
        let counts = IncidentCounts { off_track: 2, spin: 0, collision: 2 };
        assert_eq!(record(40, counts).cpi(), Some(10.0));
        assert_eq!(record(40, IncidentCounts::default()).cpi(), None);
    }

    #[test]
    fn rating_delta_uses_end_rating() {
        let delta = record(0, IncidentCounts::default()).rating_delta().unwrap();
        assert!((delta - 0.1).abs() < 1e-9);
    }

    #[test]
    fn end_reasons_parse_back() {
        for reason in [
            EndReason::SessionTypeChanged,
            EndReason::Stalled,
            EndReason::ResultObserved,
            EndReason::SessionUidChanged,
            EndReason::Shutdown,
        ] {
            assert_eq!(reason.as_str().parse::<EndReason>(), Ok(reason));
        }
    }
}
