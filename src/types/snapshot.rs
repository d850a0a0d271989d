//! Immutable rating snapshots published by the telemetry loop

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{IncidentCounts, LicenseClass};

/// Live progress of the open session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionProgress {
    pub session_id: String,
    pub track_id: i8,
    pub track_name: Option<String>,
    pub started_at: DateTime<Utc>,
    pub corners: u64,
    pub incidents: IncidentCounts,
    pub start_rating: f64,
    /// Corners per incident; `None` while incident free.
    pub cpi: Option<f64>,
}

/// Read-only view of the engine at one revision.
///
/// Published atomically after every mutation; readers never see a half-applied update.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RatingSnapshot {
    pub rating: f64,
    pub license: LicenseClass,
    pub actual_rate: f64,
    pub window_len: usize,
    pub window_capacity: usize,
    pub total_corners: u64,
    pub total_incidents: u64,
    pub session: Option<SessionProgress>,
    pub revision: u64,
    pub updated_at: DateTime<Utc>,
}
