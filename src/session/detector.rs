//! Corner and incident detection over successive frames.

use tracing::trace;

use crate::types::{FramePayload, IncidentKind, LapSample, TelemetryFrame, lookup_track};

/// Damage delta (sum of wing percentages) between two status frames that counts as a collision.
pub const DEFAULT_COLLISION_THRESHOLD: f32 = 5.0;

/// A per-frame incident detector.
///
/// Detectors see every frame of the active session in order and are reset when a
/// new session starts. The first observation after a reset only sets the baseline.
pub trait IncidentDetector: Send {
    fn kind(&self) -> IncidentKind;

    fn observe(&mut self, frame: &TelemetryFrame) -> bool;

    fn reset(&mut self);
}

/// Off-track: rising edge of the current-lap-invalid flag.
#[derive(Debug, Default)]
pub struct OffTrackDetector {
    previous: Option<bool>,
}

impl IncidentDetector for OffTrackDetector {
    fn kind(&self) -> IncidentKind {
        IncidentKind::OffTrack
    }

    fn observe(&mut self, frame: &TelemetryFrame) -> bool {
        let Some(invalid) = frame.lap_invalid() else {
            return false;
        };
        let rising = self.previous == Some(false) && invalid;
        self.previous = Some(invalid);
        rising
    }

    fn reset(&mut self) {
        self.previous = None;
    }
}

/// Collision: cumulative wing damage rose by more than the threshold since the last status frame.
#[derive(Debug)]
pub struct CollisionDetector {
    threshold: f32,
    last_damage: Option<f32>,
}

impl CollisionDetector {
    pub fn new(threshold: f32) -> Self {
        Self { threshold, last_damage: None }
    }
}

impl Default for CollisionDetector {
    fn default() -> Self {
        Self::new(DEFAULT_COLLISION_THRESHOLD)
    }
}

impl IncidentDetector for CollisionDetector {
    fn kind(&self) -> IncidentKind {
        IncidentKind::Collision
    }

    fn observe(&mut self, frame: &TelemetryFrame) -> bool {
        let Some(damage) = frame.cumulative_damage() else {
            return false;
        };
        let hit = self.last_damage.is_some_and(|last| damage - last > self.threshold);
        if hit {
            trace!(damage, last = ?self.last_damage, "damage jump");
        }
        self.last_damage = Some(damage);
        hit
    }

    fn reset(&mut self) {
        self.last_damage = None;
    }
}

/// Spin detection slot. The weight exists but nothing in the 2019 feed is reliable
/// enough to detect a spin, so this never fires.
#[derive(Debug, Default)]
pub struct SpinDetector;

impl IncidentDetector for SpinDetector {
    fn kind(&self) -> IncidentKind {
        IncidentKind::Spin
    }

    fn observe(&mut self, _frame: &TelemetryFrame) -> bool {
        false
    }

    fn reset(&mut self) {}
}

/// The standard detector set.
pub fn default_detectors(collision_threshold: f32) -> Vec<Box<dyn IncidentDetector>> {
    vec![
        Box::new(OffTrackDetector::default()),
        Box::new(SpinDetector),
        Box::new(CollisionDetector::new(collision_threshold)),
    ]
}

/// Turns lap distance progress into corner boundaries.
///
/// With a known track the lap is split into `corners` equal segments and each forward
/// segment step (including the wrap at a new lap) is one boundary. Without track data
/// every lap change counts as one corner.
#[derive(Debug, Default)]
pub struct CornerTracker {
    geometry: Option<(f32, u16)>,
    last_position: Option<u64>,
}

impl CornerTracker {
    pub fn new(track_id: i8, track_length: u16) -> Self {
        let geometry = lookup_track(track_id)
            .filter(|track| track_length > 0 && track.corners > 0)
            .map(|track| (f32::from(track_length), track.corners));
        Self { geometry, last_position: None }
    }

    pub fn corners_per_lap(&self) -> Option<u16> {
        self.geometry.map(|(_, corners)| corners)
    }

    /// Corners crossed since the previous lap sample.
    pub fn observe(&mut self, lap: &LapSample) -> u64 {
        if lap.lap_distance < 0.0 {
            return 0;
        }
        let position = self.position(lap);
        let crossed = match self.last_position {
            Some(last) if position > last => {
                let cap = self.corners_per_lap().map_or(1, u64::from);
                (position - last).min(cap)
            }
            Some(_) => return 0,
            None => 0,
        };
        self.last_position = Some(position);
        crossed
    }

    fn position(&self, lap: &LapSample) -> u64 {
        let lap_num = u64::from(lap.current_lap_num);
        match self.geometry {
            Some((length, corners)) => {
                let fraction = (lap.lap_distance / length).clamp(0.0, 1.0);
                let index = ((fraction * f32::from(corners)) as u64).min(u64::from(corners) - 1);
                lap_num * u64::from(corners) + index
            }
            None => lap_num,
        }
    }
}

/// Extract the lap sample from a frame, if it carries one.
pub(crate) fn lap_sample(frame: &TelemetryFrame) -> Option<&LapSample> {
    match &frame.payload {
        FramePayload::LapData(lap) => Some(lap),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{PacketBuilder, decoded, wing_damage};

    fn lap(distance: f32, lap_num: u8) -> LapSample {
        LapSample {
            last_lap_time: 0.0,
            current_lap_time: 0.0,
            lap_distance: distance,
            total_distance: distance,
            car_position: 1,
            current_lap_num: lap_num,
            sector: 0,
            lap_invalid: false,
            result_status: 2,
        }
    }

    #[test]
    fn off_track_fires_on_rising_edge_only() {
        let b = PacketBuilder::new(1);
        let mut detector = OffTrackDetector::default();
        assert!(!detector.observe(&decoded(&b.lap_data(1.0, 0, 10.0, 1, false))));
        assert!(detector.observe(&decoded(&b.lap_data(1.1, 0, 20.0, 1, true))));
        assert!(!detector.observe(&decoded(&b.lap_data(1.2, 0, 30.0, 1, true))));
        assert!(!detector.observe(&decoded(&b.lap_data(1.3, 0, 40.0, 2, false))));
        assert!(detector.observe(&decoded(&b.lap_data(1.4, 0, 50.0, 2, true))));
    }

    #[test]
    fn off_track_baseline_is_not_an_incident() {
        let b = PacketBuilder::new(1);
        let mut detector = OffTrackDetector::default();
        assert!(!detector.observe(&decoded(&b.lap_data(1.0, 0, 10.0, 1, true))));
    }

    #[test]
    fn collision_needs_jump_above_threshold() {
        let b = PacketBuilder::new(1);
        let mut detector = CollisionDetector::default();
        assert!(!detector.observe(&decoded(&b.car_status(1.0, 0, wing_damage(0)))));
        assert!(!detector.observe(&decoded(&b.car_status(1.1, 0, wing_damage(5)))));
        assert!(detector.observe(&decoded(&b.car_status(1.2, 0, wing_damage(11)))));
        assert!(!detector.observe(&decoded(&b.car_status(1.3, 0, wing_damage(11)))));
    }

    #[test]
    fn spin_detector_never_fires() {
        let b = PacketBuilder::new(1);
        let mut detector = SpinDetector;
        assert!(!detector.observe(&decoded(&b.lap_data(1.0, 0, 10.0, 1, true))));
    }

    #[test]
    fn corners_follow_lap_distance_segments() {
        // Monza: 11 corners
        let mut tracker = CornerTracker::new(11, 5500);
        assert_eq!(tracker.observe(&lap(0.0, 1)), 0);
        assert_eq!(tracker.observe(&lap(400.0, 1)), 0);
        assert_eq!(tracker.observe(&lap(600.0, 1)), 1);
        assert_eq!(tracker.observe(&lap(1600.0, 1)), 2);
        assert_eq!(tracker.observe(&lap(5400.0, 1)), 7);
        assert_eq!(tracker.observe(&lap(10.0, 2)), 1);
    }

    #[test]
    fn backwards_and_pre_line_samples_are_ignored() {
        let mut tracker = CornerTracker::new(11, 5500);
        assert_eq!(tracker.observe(&lap(-50.0, 0)), 0);
        assert_eq!(tracker.observe(&lap(1000.0, 1)), 0);
        assert_eq!(tracker.observe(&lap(600.0, 1)), 0);
        assert_eq!(tracker.observe(&lap(1100.0, 1)), 0);
        assert_eq!(tracker.observe(&lap(1600.0, 1)), 1);
    }

    #[test]
    fn unknown_track_counts_lap_changes() {
        let mut tracker = CornerTracker::new(-1, 0);
        assert_eq!(tracker.corners_per_lap(), None);
        assert_eq!(tracker.observe(&lap(10.0, 1)), 0);
        assert_eq!(tracker.observe(&lap(3000.0, 1)), 0);
        assert_eq!(tracker.observe(&lap(5.0, 2)), 1);
    }
}
