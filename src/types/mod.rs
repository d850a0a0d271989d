//! Core types shared across the pipeline.
//!
//! - [`TelemetryFrame`] is one decoded datagram reduced to the tracked car
//! - [`Incident`] and [`IncidentCounts`] describe what the detectors found
//! - [`SessionRecord`] is a race session as the store and read API see it
//! - [`RatingSnapshot`] is the immutable engine view published to readers
//! - [`UserProfile`] is the lifetime singleton row
//! - [`TRACKS`] is the static track reference used for corner detection

mod frame;
mod incident;
mod license;
mod profile;
mod session;
mod snapshot;
mod track;
mod update_rate;

pub use frame::{
    DamageSample, EventCode, FramePayload, LapSample, PacketHeader, PacketKind, SessionData,
    TelemetryFrame,
};
pub use incident::{Incident, IncidentCounts, IncidentKind};
pub use license::LicenseClass;
pub use profile::{RatingCheckpoint, UserProfile};
pub use session::{EndReason, SessionRecord};
pub use snapshot::{RatingSnapshot, SessionProgress};
pub use track::{TRACKS, TrackInfo, lookup_track};
pub use update_rate::UpdateRate;

/// Session type codes that count as races (R and R2).
pub const RACE_SESSION_TYPES: [u8; 2] = [10, 11];

pub fn is_race_session(session_type: u8) -> bool {
    RACE_SESSION_TYPES.contains(&session_type)
}
