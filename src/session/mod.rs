//! Session lifecycle and incident detection.
//!
//! [`SessionManager`] is a two-state machine (`Idle`, `Active`) over decoded frames. It
//! emits [`SessionEvent`]s; the pipeline applies them to the rating engine and the
//! session record.

mod detector;
mod manager;

pub use detector::{
    CollisionDetector, CornerTracker, DEFAULT_COLLISION_THRESHOLD, IncidentDetector,
    OffTrackDetector, SpinDetector, default_detectors,
};
pub use manager::{SessionConfig, SessionEvent, SessionManager, SessionState, session_id_for};
