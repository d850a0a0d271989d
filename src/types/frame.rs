//! Decoded telemetry frame representation

use serde::{Deserialize, Serialize};
use std::fmt;

/// Packet kinds carried by the 2019 UDP format, keyed by the header's packet id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PacketKind {
    Motion,
    Session,
    LapData,
    Event,
    Participants,
    CarSetups,
    CarTelemetry,
    CarStatus,
}

impl PacketKind {
    pub const ALL: [PacketKind; 8] = [
        PacketKind::Motion,
        PacketKind::Session,
        PacketKind::LapData,
        PacketKind::Event,
        PacketKind::Participants,
        PacketKind::CarSetups,
        PacketKind::CarTelemetry,
        PacketKind::CarStatus,
    ];

    pub fn from_id(id: u8) -> Option<Self> {
        Self::ALL.get(id as usize).copied()
    }

    pub fn id(self) -> u8 {
        match self {
            PacketKind::Motion => 0,
            PacketKind::Session => 1,
            PacketKind::LapData => 2,
            PacketKind::Event => 3,
            PacketKind::Participants => 4,
            PacketKind::CarSetups => 5,
            PacketKind::CarTelemetry => 6,
            PacketKind::CarStatus => 7,
        }
    }

    /// Exact datagram size the game sends for this kind.
    pub fn expected_size(self) -> usize {
        match self {
            PacketKind::Motion => 1343,
            PacketKind::Session => 149,
            PacketKind::LapData => 843,
            PacketKind::Event => 32,
            PacketKind::Participants => 1104,
            PacketKind::CarSetups => 843,
            PacketKind::CarTelemetry => 1347,
            PacketKind::CarStatus => 1143,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            PacketKind::Motion => "Motion",
            PacketKind::Session => "Session",
            PacketKind::LapData => "LapData",
            PacketKind::Event => "Event",
            PacketKind::Participants => "Participants",
            PacketKind::CarSetups => "CarSetups",
            PacketKind::CarTelemetry => "CarTelemetry",
            PacketKind::CarStatus => "CarStatus",
        }
    }
}

impl fmt::Display for PacketKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Fixed 23-byte header shared by every packet.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PacketHeader {
    pub packet_format: u16,
    pub game_major_version: u8,
    pub game_minor_version: u8,
    pub packet_version: u8,
    pub packet_id: u8,
    pub session_uid: u64,
    pub session_time: f32,
    pub frame_identifier: u32,
    pub player_car_index: u8,
}

/// Four-character event codes from the Event packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventCode {
    SessionStarted,
    SessionEnded,
    FastestLap,
    Retirement,
    DrsEnabled,
    DrsDisabled,
    TeamMateInPits,
    ChequeredFlag,
    RaceWinner,
    Other([u8; 4]),
}

impl EventCode {
    pub fn from_bytes(code: [u8; 4]) -> Self {
        match &code {
            b"SSTA" => EventCode::SessionStarted,
            b"SEND" => EventCode::SessionEnded,
            b"FTLP" => EventCode::FastestLap,
            b"RTMT" => EventCode::Retirement,
            b"DRSE" => EventCode::DrsEnabled,
            b"DRSD" => EventCode::DrsDisabled,
            b"TMPT" => EventCode::TeamMateInPits,
            b"CHQF" => EventCode::ChequeredFlag,
            b"RCWN" => EventCode::RaceWinner,
            _ => EventCode::Other(code),
        }
    }

    /// Events after which the race result is final.
    pub fn is_session_result(self) -> bool {
        matches!(self, EventCode::SessionEnded | EventCode::ChequeredFlag)
    }
}

/// Session-wide state from the Session packet.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SessionData {
    pub weather: u8,
    pub track_temperature: i8,
    pub air_temperature: i8,
    pub total_laps: u8,
    /// Metres.
    pub track_length: u16,
    pub session_type: u8,
    /// `-1` when the game does not know the track.
    pub track_id: i8,
    pub session_time_left: u16,
    pub session_duration: u16,
    pub game_paused: bool,
    pub network_game: bool,
}

/// Lap record of the tracked car.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LapSample {
    pub last_lap_time: f32,
    pub current_lap_time: f32,
    /// Metres around the current lap; negative before crossing the line.
    pub lap_distance: f32,
    pub total_distance: f32,
    pub car_position: u8,
    pub current_lap_num: u8,
    pub sector: u8,
    pub lap_invalid: bool,
    pub result_status: u8,
}

impl LapSample {
    /// Finished, disqualified, not classified or retired.
    pub fn has_result(&self) -> bool {
        self.result_status >= 3
    }
}

/// Damage percentages of the tracked car from the CarStatus packet.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DamageSample {
    pub front_left_wing: u8,
    pub front_right_wing: u8,
    pub rear_wing: u8,
    pub engine: u8,
    pub gearbox: u8,
}

impl DamageSample {
    /// Sum of the three wing damage percentages.
    pub fn cumulative(&self) -> f32 {
        f32::from(self.front_left_wing) + f32::from(self.front_right_wing) + f32::from(self.rear_wing)
    }
}

/// Kind-specific content of a frame.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum FramePayload {
    Session(SessionData),
    LapData(LapSample),
    Event(EventCode),
    CarStatus(DamageSample),
    /// Validated but not needed for rating.
    Ignored,
}

/// One decoded datagram, reduced to the car of interest.
///
/// Frames are immutable and dropped once the session manager has folded them in.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TelemetryFrame {
    pub kind: PacketKind,
    pub header: PacketHeader,
    pub car_index: u8,
    pub payload: FramePayload,
}

impl TelemetryFrame {
    pub fn session_uid(&self) -> u64 {
        self.header.session_uid
    }

    /// Seconds since the session began.
    pub fn session_time(&self) -> f32 {
        self.header.session_time
    }

    pub fn frame_identifier(&self) -> u32 {
        self.header.frame_identifier
    }

    pub fn session_type(&self) -> Option<u8> {
        match &self.payload {
            FramePayload::Session(s) => Some(s.session_type),
            _ => None,
        }
    }

    pub fn lap_invalid(&self) -> Option<bool> {
        match &self.payload {
            FramePayload::LapData(lap) => Some(lap.lap_invalid),
            _ => None,
        }
    }

    pub fn cumulative_damage(&self) -> Option<f32> {
        match &self.payload {
            FramePayload::CarStatus(damage) => Some(damage.cumulative()),
            _ => None,
        }
    }
}
