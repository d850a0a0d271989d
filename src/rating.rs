//! Incremental safety rating engine.
//!
//! The engine keeps a rolling window of per-corner incident weights. The back bucket
//! belongs to the corner currently being driven: incidents add to it, and a corner
//! boundary pushes a fresh zero bucket (evicting the oldest at capacity) and recomputes
//! the rating from the window.
//!
//! ```text
//! actual_rate = Σ window / len(window)
//! rating      = clamp(base + (target - actual_rate) × sensitivity, 0.00, 4.99)
//! ```
//!
//! The engine is owned by the telemetry loop. Every mutation bumps [`RatingEngine::revision`],
//! the logical clock used to order store writes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use tracing::{debug, warn};

use crate::error::{Result, SrError};
use crate::types::{
    IncidentCounts, IncidentKind, LicenseClass, RatingCheckpoint, RatingSnapshot, SessionProgress,
};

pub const MIN_RATING: f64 = 0.0;
pub const MAX_RATING: f64 = 4.99;
pub const BASE_RATING: f64 = 2.50;

/// Tunables for the rating formula.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RatingConfig {
    /// Corners kept in the rolling window.
    pub window_capacity: usize,
    /// Incident weight per corner that keeps the rating at `base_rating`.
    pub target_rate: f64,
    pub sensitivity: f64,
    pub base_rating: f64,
}

impl Default for RatingConfig {
    fn default() -> Self {
        Self { window_capacity: 100, target_rate: 0.4, sensitivity: 0.4, base_rating: BASE_RATING }
    }
}

impl RatingConfig {
    pub fn validate(&self) -> Result<()> {
        if self.window_capacity == 0 {
            return Err(SrError::config("rating.window_capacity must be at least 1"));
        }
        if !self.target_rate.is_finite() || self.target_rate < 0.0 {
            return Err(SrError::config("rating.target_rate must be a non-negative number"));
        }
        if !self.sensitivity.is_finite() || self.sensitivity <= 0.0 {
            return Err(SrError::config("rating.sensitivity must be positive"));
        }
        if !(MIN_RATING..=MAX_RATING).contains(&self.base_rating) {
            return Err(SrError::config(format!(
                "rating.base_rating must be within [{MIN_RATING}, {MAX_RATING}]"
            )));
        }
        Ok(())
    }
}

fn clamp_rating(value: f64) -> f64 {
    if value.is_nan() { BASE_RATING } else { value.clamp(MIN_RATING, MAX_RATING) }
}

#[derive(Debug, Clone, Copy, Default)]
struct SessionCounters {
    corners: u64,
    incidents: IncidentCounts,
}

#[derive(Debug, Clone)]
pub struct RatingEngine {
    config: RatingConfig,
    rating: f64,
    window: VecDeque<f64>,
    total_corners: u64,
    total_incidents: u64,
    session: SessionCounters,
    revision: u64,
    updated_at: DateTime<Utc>,
}

impl RatingEngine {
    pub fn new(config: RatingConfig) -> Self {
        Self {
            rating: clamp_rating(config.base_rating),
            window: VecDeque::with_capacity(config.window_capacity),
            config,
            total_corners: 0,
            total_incidents: 0,
            session: SessionCounters::default(),
            revision: 0,
            updated_at: Utc::now(),
        }
    }

    /// Rebuild the engine from a persisted checkpoint.
    ///
    /// Out-of-range ratings are clamped and oversized windows keep their newest buckets.
    pub fn restore(config: RatingConfig, checkpoint: &RatingCheckpoint) -> Self {
        let mut engine = Self::new(config);
        engine.rating = clamp_rating(checkpoint.rating);
        if engine.rating != checkpoint.rating {
            warn!(stored = checkpoint.rating, clamped = engine.rating, "stored rating out of range");
        }
        let skip = checkpoint.window.len().saturating_sub(config.window_capacity);
        engine.window = checkpoint
            .window
            .iter()
            .skip(skip)
            .map(|w| if w.is_finite() && *w >= 0.0 { *w } else { 0.0 })
            .collect();
        engine.total_corners = checkpoint.total_corners;
        engine.total_incidents = checkpoint.total_incidents;
        engine.revision = checkpoint.revision;
        debug!(
            rating = engine.rating,
            window = engine.window.len(),
            revision = engine.revision,
            "rating engine restored"
        );
        engine
    }

    /// Add `weight` to the current corner's bucket.
    ///
    /// The rating moves at the next corner boundary, not here.
    pub fn register_incident(&mut self, kind: IncidentKind, weight: f64) {
        let weight = if weight.is_finite() && weight > 0.0 { weight } else { 0.0 };
        match self.window.back_mut() {
            Some(bucket) => *bucket += weight,
            None => self.window.push_back(weight),
        }
        self.total_incidents += 1;
        self.session.incidents.record(kind);
        self.touch();
        debug!(%kind, weight, revision = self.revision, "incident registered");
    }

    /// Corner boundary: open a new bucket and recompute.
    pub fn register_clean_corner(&mut self) {
        if self.window.len() == self.config.window_capacity {
            self.window.pop_front();
        }
        self.window.push_back(0.0);
        self.total_corners += 1;
        self.session.corners += 1;
        self.recompute();
        self.touch();
    }

    /// Back to the base rating with an empty window. Lifetime totals are kept.
    pub fn reset(&mut self) {
        self.rating = clamp_rating(self.config.base_rating);
        self.window.clear();
        self.touch();
        debug!(revision = self.revision, "rating reset");
    }

    /// Zero the per-session counters. The lifetime rating is untouched.
    pub fn begin_session(&mut self) {
        self.session = SessionCounters::default();
        self.touch();
    }

    pub fn current_rating(&self) -> f64 {
        self.rating
    }

    pub fn current_license_class(&self) -> LicenseClass {
        LicenseClass::from_rating(self.rating)
    }

    /// Incident weight per corner over the window; `0.0` when empty.
    pub fn actual_rate(&self) -> f64 {
        if self.window.is_empty() {
            0.0
        } else {
            self.window.iter().sum::<f64>() / self.window.len() as f64
        }
    }

    pub fn window_len(&self) -> usize {
        self.window.len()
    }

    pub fn window(&self) -> impl Iterator<Item = f64> + '_ {
        self.window.iter().copied()
    }

    pub fn config(&self) -> &RatingConfig {
        &self.config
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn total_corners(&self) -> u64 {
        self.total_corners
    }

    pub fn total_incidents(&self) -> u64 {
        self.total_incidents
    }

    pub fn session_corners(&self) -> u64 {
        self.session.corners
    }

    pub fn session_incidents(&self) -> IncidentCounts {
        self.session.incidents
    }

    pub fn checkpoint(&self) -> RatingCheckpoint {
        RatingCheckpoint {
            rating: self.rating,
            window: self.window.iter().copied().collect(),
            total_corners: self.total_corners,
            total_incidents: self.total_incidents,
            revision: self.revision,
        }
    }

    pub fn snapshot(&self, session: Option<SessionProgress>) -> RatingSnapshot {
        RatingSnapshot {
            rating: self.rating,
            license: self.current_license_class(),
            actual_rate: self.actual_rate(),
            window_len: self.window.len(),
            window_capacity: self.config.window_capacity,
            total_corners: self.total_corners,
            total_incidents: self.total_incidents,
            session,
            revision: self.revision,
            updated_at: self.updated_at,
        }
    }

    fn recompute(&mut self) {
        let delta = (self.config.target_rate - self.actual_rate()) * self.config.sensitivity;
        self.rating = clamp_rating(self.config.base_rating + delta);
    }

    fn touch(&mut self) {
        self.revision += 1;
        self.updated_at = Utc::now();
    }
}

impl Default for RatingEngine {
    fn default() -> Self {
        Self::new(RatingConfig::default())
    }
}
