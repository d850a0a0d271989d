//! Durable storage for sessions, incidents and the lifetime profile.
//!
//! The [`Store`] trait is the persistence seam. Every write call is atomic; reads see
//! committed state only. [`SqliteStore`] is the production implementation.

mod schema;
mod sqlite;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::StoreError;
use crate::types::{Incident, IncidentCounts, RatingCheckpoint, SessionRecord, UserProfile};

pub use sqlite::SqliteStore;

/// One atomic sync write.
///
/// The writer fills `checkpoint` only when its revision is newer than the last
/// committed one, so a stale rating never overwrites a newer one.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SyncBatch {
    pub session: Option<SessionRecord>,
    pub checkpoint: Option<RatingCheckpoint>,
    /// Set once, on session close, to fold the race into lifetime aggregates.
    pub completed_race: Option<CompletedRace>,
    /// Session row to delete along with its incidents; the race was too short to keep.
    pub discarded_session: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CompletedRace {
    pub distance_m: f64,
}

/// A session with its incidents.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionDetail {
    pub session: SessionRecord,
    pub incidents: Vec<Incident>,
    /// Incident counts by kind, computed from the incident rows.
    pub breakdown: IncidentCounts,
}

/// One point of the rating time series: the rating a session ended on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RatingPoint {
    pub session_id: String,
    pub at: DateTime<Utc>,
    pub rating: f64,
}

/// Aggregates over closed sessions on one track.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackStats {
    pub track_id: i8,
    pub track_name: Option<String>,
    pub races: u64,
    pub mean_incidents: f64,
    pub mean_rating_delta: f64,
}

/// Persistence operations used by the sync writer and the read API.
///
/// Implementations block; async callers run them on the blocking pool.
pub trait Store: Send + Sync + 'static {
    /// Insert or replace a session row.
    fn upsert_session(&self, session: &SessionRecord) -> Result<(), StoreError>;

    /// Append an incident. The owning session row must already exist.
    fn append_incident(&self, incident: &Incident) -> Result<(), StoreError>;

    /// Apply a [`SyncBatch`] in one transaction.
    fn write_sync(&self, batch: &SyncBatch) -> Result<(), StoreError>;

    fn load_profile(&self) -> Result<Option<UserProfile>, StoreError>;

    /// Sessions by start time, newest first.
    fn recent_sessions(&self, limit: u32, offset: u32) -> Result<Vec<SessionRecord>, StoreError>;

    fn session_detail(&self, id: &str) -> Result<Option<SessionDetail>, StoreError>;

    /// The latest `limit` closed sessions' final ratings, oldest first.
    fn rating_series(&self, limit: u32) -> Result<Vec<RatingPoint>, StoreError>;

    fn track_stats(&self) -> Result<Vec<TrackStats>, StoreError>;

    /// Delete closed sessions that ended before `cutoff`, with their incidents.
    fn prune_before(&self, cutoff: DateTime<Utc>) -> Result<usize, StoreError>;
}
