//! Race session lifecycle state machine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::time::Duration;
use tracing::{debug, info};

use super::detector::{
    CornerTracker, DEFAULT_COLLISION_THRESHOLD, IncidentDetector, default_detectors, lap_sample,
};
use crate::error::{Result, SrError};
use crate::types::{
    EndReason, FramePayload, IncidentCounts, IncidentKind, SessionData, TelemetryFrame,
    is_race_session,
};

/// Session manager tunables.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Receipt-time window without session-time progress before a session is closed.
    pub stall_timeout_secs: u64,
    pub collision_threshold: f32,
    /// Clear the rolling window whenever a race starts.
    pub reset_window_on_session_start: bool,
    /// Races shorter than this much session time are discarded instead of recorded.
    /// Shutdown keeps whatever was driven.
    pub min_race_secs: f32,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            stall_timeout_secs: 30,
            collision_threshold: DEFAULT_COLLISION_THRESHOLD,
            reset_window_on_session_start: false,
            min_race_secs: 60.0,
        }
    }
}

impl SessionConfig {
    pub fn stall_timeout(&self) -> Duration {
        Duration::from_secs(self.stall_timeout_secs)
    }

    pub fn validate(&self) -> Result<()> {
        if self.stall_timeout_secs == 0 {
            return Err(SrError::config("session.stall_timeout_secs must be positive"));
        }
        if !self.collision_threshold.is_finite() || self.collision_threshold < 0.0 {
            return Err(SrError::config("session.collision_threshold must be non-negative"));
        }
        if !self.min_race_secs.is_finite() || self.min_race_secs < 0.0 {
            return Err(SrError::config("session.min_race_secs must be non-negative"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionState {
    Idle,
    Active,
}

/// Lifecycle and detection events, in frame order.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    Started {
        session_id: String,
        track_id: i8,
        session_type: u8,
        started_at: DateTime<Utc>,
    },
    CornerCompleted {
        session_id: String,
        /// Session corner count after this boundary.
        corner_index: u64,
    },
    IncidentDetected {
        session_id: String,
        kind: IncidentKind,
        corner_index: u64,
        detected_at: DateTime<Utc>,
    },
    Ended {
        session_id: String,
        ended_at: DateTime<Utc>,
        reason: EndReason,
        corners: u64,
        incidents: IncidentCounts,
        distance_m: f64,
    },
    /// The race ended before `min_race_secs` of session time and is not kept.
    Discarded {
        session_id: String,
        reason: EndReason,
        duration_secs: f32,
    },
}

pub fn session_id_for(uid: u64) -> String {
    format!("{uid:016x}")
}

struct ActiveSession {
    uid: u64,
    id: String,
    start_session_time: f32,
    last_session_time: f32,
    last_progress_at: DateTime<Utc>,
    corners: u64,
    incidents: IncidentCounts,
    first_distance: Option<f32>,
    last_distance: f32,
    tracker: CornerTracker,
}

impl ActiveSession {
    fn duration_secs(&self) -> f32 {
        (self.last_session_time - self.start_session_time).max(0.0)
    }

    fn distance_m(&self) -> f64 {
        self.first_distance
            .map_or(0.0, |first| f64::from((self.last_distance - first).max(0.0)))
    }
}

/// Decides when race sessions start and end and forwards corner and incident events
/// while one is open.
///
/// Pure: time comes in with every call, nothing here touches the engine or the store.
pub struct SessionManager {
    config: SessionConfig,
    active: Option<ActiveSession>,
    detectors: Vec<Box<dyn IncidentDetector>>,
    closed: HashSet<u64>,
    last_conflict: Option<u64>,
}

impl SessionManager {
    pub fn new(config: SessionConfig) -> Self {
        let detectors = default_detectors(config.collision_threshold);
        Self::with_detectors(config, detectors)
    }

    pub fn with_detectors(
        config: SessionConfig,
        detectors: Vec<Box<dyn IncidentDetector>>,
    ) -> Self {
        Self { config, active: None, detectors, closed: HashSet::new(), last_conflict: None }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn state(&self) -> SessionState {
        if self.active.is_some() { SessionState::Active } else { SessionState::Idle }
    }

    pub fn active_session_id(&self) -> Option<&str> {
        self.active.as_ref().map(|s| s.id.as_str())
    }

    /// Fold one frame received at `received_at` into the state machine.
    pub fn on_frame(
        &mut self,
        frame: &TelemetryFrame,
        received_at: DateTime<Utc>,
    ) -> Vec<SessionEvent> {
        let mut events = Vec::new();

        if let Some(active) = &self.active
            && active.uid != frame.session_uid()
        {
            events.extend(self.close(received_at, EndReason::SessionUidChanged));
        }

        if let Some(ended) = self.check_stall(received_at) {
            events.push(ended);
            return events;
        }

        match self.state() {
            SessionState::Idle => {
                if let FramePayload::Session(data) = &frame.payload {
                    match self.try_start(frame, data, received_at) {
                        Ok(Some(started)) => events.push(started),
                        Ok(None) => {}
                        Err(conflict) => {
                            if self.last_conflict != Some(frame.session_uid()) {
                                debug!(error = %conflict, "ignoring session start");
                                self.last_conflict = Some(frame.session_uid());
                            }
                        }
                    }
                }
            }
            SessionState::Active => self.on_active_frame(frame, received_at, &mut events),
        }
        events
    }

    /// Close the session if session time has not advanced within the stall timeout.
    ///
    /// Called on idle ticks so a quit game still ends the race.
    pub fn on_tick(&mut self, now: DateTime<Utc>) -> Option<SessionEvent> {
        self.check_stall(now)
    }

    /// Force-close the open session, if any.
    pub fn shutdown(&mut self, now: DateTime<Utc>) -> Option<SessionEvent> {
        self.close(now, EndReason::Shutdown)
    }

    fn try_start(
        &mut self,
        frame: &TelemetryFrame,
        data: &SessionData,
        received_at: DateTime<Utc>,
    ) -> Result<Option<SessionEvent>> {
        if !is_race_session(data.session_type) || frame.session_time() <= 0.0 {
            return Ok(None);
        }
        let uid = frame.session_uid();
        let id = session_id_for(uid);
        if self.active.is_some() {
            return Err(SrError::transition_conflict(format!(
                "start of {id} while a session is open"
            )));
        }
        if self.closed.contains(&uid) {
            return Err(SrError::transition_conflict(format!("session {id} already closed")));
        }

        for detector in &mut self.detectors {
            detector.reset();
        }
        self.active = Some(ActiveSession {
            uid,
            id: id.clone(),
            start_session_time: frame.session_time(),
            last_session_time: frame.session_time(),
            last_progress_at: received_at,
            corners: 0,
            incidents: IncidentCounts::default(),
            first_distance: None,
            last_distance: 0.0,
            tracker: CornerTracker::new(data.track_id, data.track_length),
        });
        info!(
            session_id = %id,
            track_id = data.track_id,
            session_type = data.session_type,
            "race session started"
        );
        Ok(Some(SessionEvent::Started {
            session_id: id,
            track_id: data.track_id,
            session_type: data.session_type,
            started_at: received_at,
        }))
    }

    fn on_active_frame(
        &mut self,
        frame: &TelemetryFrame,
        received_at: DateTime<Utc>,
        events: &mut Vec<SessionEvent>,
    ) {
        let Some(active) = self.active.as_mut() else {
            return;
        };
        if frame.session_time() > active.last_session_time {
            active.last_session_time = frame.session_time();
            active.last_progress_at = received_at;
        }

        let end_reason = match &frame.payload {
            FramePayload::Session(data) if !is_race_session(data.session_type) => {
                Some(EndReason::SessionTypeChanged)
            }
            FramePayload::Event(code) if code.is_session_result() => Some(EndReason::ResultObserved),
            _ => None,
        };
        if let Some(reason) = end_reason {
            events.extend(self.close(received_at, reason));
            return;
        }

        for detector in &mut self.detectors {
            if detector.observe(frame) {
                active.incidents.record(detector.kind());
                events.push(SessionEvent::IncidentDetected {
                    session_id: active.id.clone(),
                    kind: detector.kind(),
                    corner_index: active.corners,
                    detected_at: received_at,
                });
            }
        }

        if let Some(lap) = lap_sample(frame) {
            if lap.total_distance > 0.0 {
                active.first_distance.get_or_insert(lap.total_distance);
                active.last_distance = active.last_distance.max(lap.total_distance);
            }
            for _ in 0..active.tracker.observe(lap) {
                active.corners += 1;
                events.push(SessionEvent::CornerCompleted {
                    session_id: active.id.clone(),
                    corner_index: active.corners,
                });
            }
            if lap.has_result() {
                events.extend(self.close(received_at, EndReason::ResultObserved));
            }
        }
    }

    fn check_stall(&mut self, now: DateTime<Utc>) -> Option<SessionEvent> {
        let active = self.active.as_ref()?;
        let idle_for = (now - active.last_progress_at).to_std().unwrap_or_default();
        if idle_for > self.config.stall_timeout() {
            return self.close(now, EndReason::Stalled);
        }
        None
    }

    fn close(&mut self, now: DateTime<Utc>, reason: EndReason) -> Option<SessionEvent> {
        let active = self.active.take()?;
        self.closed.insert(active.uid);
        let duration_secs = active.duration_secs();
        if reason != EndReason::Shutdown && duration_secs < self.config.min_race_secs {
            info!(
                session_id = %active.id,
                %reason,
                duration_secs,
                "race too short, discarded"
            );
            return Some(SessionEvent::Discarded { session_id: active.id, reason, duration_secs });
        }
        info!(
            session_id = %active.id,
            %reason,
            corners = active.corners,
            incidents = active.incidents.total(),
            "race session ended"
        );
        Some(SessionEvent::Ended {
            distance_m: active.distance_m(),
            session_id: active.id,
            ended_at: now,
            reason,
            corners: active.corners,
            incidents: active.incidents,
        })
    }
}

impl Default for SessionManager {
    fn default() -> Self {
        Self::new(SessionConfig::default())
    }
}
