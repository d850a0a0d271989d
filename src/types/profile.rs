use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::LicenseClass;

/// Lifetime driver profile, stored as a single row.
///
/// `window` and `revision` double as the engine checkpoint used for crash recovery.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserProfile {
    pub rating: f64,
    pub total_distance_m: f64,
    pub total_corners: u64,
    pub total_incidents: u64,
    pub races_completed: u64,
    /// Rolling window buckets, oldest first.
    pub window: Vec<f64>,
    pub revision: u64,
    pub updated_at: DateTime<Utc>,
}

impl UserProfile {
    pub fn license(&self) -> LicenseClass {
        LicenseClass::from_rating(self.rating)
    }
}

/// Engine state written with every profile sync.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RatingCheckpoint {
    pub rating: f64,
    pub window: Vec<f64>,
    pub total_corners: u64,
    pub total_incidents: u64,
    pub revision: u64,
}

impl From<&UserProfile> for RatingCheckpoint {
    fn from(profile: &UserProfile) -> Self {
        RatingCheckpoint {
            rating: profile.rating,
            window: profile.window.clone(),
            total_corners: profile.total_corners,
            total_incidents: profile.total_incidents,
            revision: profile.revision,
        }
    }
}
