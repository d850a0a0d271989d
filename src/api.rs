//! Read API over committed store state.
//!
//! Queries run on the blocking pool and never touch the telemetry loop. The one command,
//! [`ReadApi::reset_rating`], goes through the loop so it is ordered with periodic syncs.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, info};

use crate::driver::Command;
use crate::error::{ApiError, SrError, StoreError};
use crate::store::{RatingPoint, SessionDetail, Store, TrackStats};
use crate::types::{LicenseClass, RatingSnapshot, SessionRecord, lookup_track};

pub const DEFAULT_PAGE_SIZE: u32 = 20;
pub const MAX_PAGE_SIZE: u32 = 200;
pub const DEFAULT_SERIES_LEN: u32 = 100;
/// How long a reset may wait for the loop and the store.
pub const COMMAND_TIMEOUT: Duration = Duration::from_secs(10);

/// Lifetime statistics as committed to the store, plus the live engine view.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stats {
    pub rating: f64,
    pub license: LicenseClass,
    pub total_distance_m: f64,
    pub total_corners: u64,
    pub total_incidents: u64,
    pub races_completed: u64,
    /// Lifetime corners per incident; `None` without incidents.
    pub cpi: Option<f64>,
    /// When the stored profile was last written.
    pub updated_at: DateTime<Utc>,
    pub live: RatingSnapshot,
}

/// A history row with display fields resolved.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    #[serde(flatten)]
    pub session: SessionRecord,
    pub track_name: Option<String>,
    pub cpi: Option<f64>,
    pub rating_delta: Option<f64>,
}

impl From<SessionRecord> for HistoryEntry {
    fn from(session: SessionRecord) -> Self {
        Self {
            track_name: lookup_track(session.track_id).map(|t| t.name.to_string()),
            cpi: session.cpi(),
            rating_delta: session.rating_delta(),
            session,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page {
    pub limit: u32,
    pub offset: u32,
}

impl Default for Page {
    fn default() -> Self {
        Self { limit: DEFAULT_PAGE_SIZE, offset: 0 }
    }
}

impl Page {
    pub fn new(limit: Option<u32>, offset: Option<u32>) -> Result<Self, ApiError> {
        let limit = limit.unwrap_or(DEFAULT_PAGE_SIZE);
        if limit == 0 || limit > MAX_PAGE_SIZE {
            return Err(ApiError::bad_request(format!(
                "limit must be between 1 and {MAX_PAGE_SIZE}"
            )));
        }
        Ok(Self { limit, offset: offset.unwrap_or(0) })
    }
}

/// Cheap to clone; every handler gets its own copy.
#[derive(Clone)]
pub struct ReadApi {
    store: Arc<dyn Store>,
    snapshots: watch::Receiver<Arc<RatingSnapshot>>,
    commands: mpsc::Sender<Command>,
    timeout: Duration,
}

impl ReadApi {
    pub fn new(
        store: Arc<dyn Store>,
        snapshots: watch::Receiver<Arc<RatingSnapshot>>,
        commands: mpsc::Sender<Command>,
    ) -> Self {
        Self { store, snapshots, commands, timeout: COMMAND_TIMEOUT }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Latest engine snapshot, without touching the store.
    pub fn snapshot(&self) -> Arc<RatingSnapshot> {
        Arc::clone(&self.snapshots.borrow())
    }

    pub async fn stats(&self) -> Result<Stats, ApiError> {
        let profile = self.query("load_profile", |store| store.load_profile()).await?;
        let profile = profile.ok_or_else(|| ApiError::not_found("profile"))?;
        let cpi = (profile.total_incidents > 0)
            .then(|| profile.total_corners as f64 / profile.total_incidents as f64);
        Ok(Stats {
            rating: profile.rating,
            license: profile.license(),
            total_distance_m: profile.total_distance_m,
            total_corners: profile.total_corners,
            total_incidents: profile.total_incidents,
            races_completed: profile.races_completed,
            cpi,
            updated_at: profile.updated_at,
            live: (*self.snapshot()).clone(),
        })
    }

    /// Sessions newest first.
    pub async fn history(&self, page: Page) -> Result<Vec<HistoryEntry>, ApiError> {
        let sessions = self
            .query("recent_sessions", move |store| store.recent_sessions(page.limit, page.offset))
            .await?;
        Ok(sessions.into_iter().map(HistoryEntry::from).collect())
    }

    pub async fn session(&self, id: &str) -> Result<SessionDetail, ApiError> {
        let key = id.to_string();
        self.query("session_detail", move |store| store.session_detail(&key))
            .await?
            .ok_or_else(|| ApiError::not_found(format!("session {id}")))
    }

    /// Ratings at session end, oldest first.
    pub async fn rating_series(&self, limit: Option<u32>) -> Result<Vec<RatingPoint>, ApiError> {
        let limit = limit.unwrap_or(DEFAULT_SERIES_LEN).clamp(1, MAX_PAGE_SIZE * 5);
        self.query("rating_series", move |store| store.rating_series(limit)).await
    }

    pub async fn track_stats(&self) -> Result<Vec<TrackStats>, ApiError> {
        self.query("track_stats", |store| store.track_stats()).await
    }

    /// Reset the rating in the engine and the store before returning.
    pub async fn reset_rating(&self) -> Result<Arc<RatingSnapshot>, ApiError> {
        let (reply, response) = oneshot::channel();
        let exchange = async {
            self.commands
                .send(Command::ResetRating { reply })
                .await
                .map_err(|_| SrError::loop_unavailable("reset"))?;
            response.await.map_err(|_| SrError::loop_unavailable("reset reply"))?
        };
        match tokio::time::timeout(self.timeout, exchange).await {
            Ok(result) => result?,
            Err(_) => return Err(SrError::Timeout { duration: self.timeout }.into()),
        }
        info!("rating reset via read API");
        Ok(self.snapshot())
    }

    async fn query<T, F>(&self, operation: &'static str, f: F) -> Result<T, ApiError>
    where
        T: Send + 'static,
        F: FnOnce(&dyn Store) -> Result<T, StoreError> + Send + 'static,
    {
        let store = Arc::clone(&self.store);
        let result = tokio::task::spawn_blocking(move || f(store.as_ref()))
            .await
            .map_err(|e| ApiError::Internal { reason: format!("{operation}: {e}") })?;
        result.map_err(|e| {
            debug!(operation, error = %e, "read API query failed");
            ApiError::from(e)
        })
    }
}
