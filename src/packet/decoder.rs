//! Datagram → [`TelemetryFrame`] decoding.

use tracing::trace;

use super::format::{
    ByteReader, HEADER_SIZE, MAX_CARS, PACKET_FORMAT_2019, car_record_offset, car_status, event,
    lap_data, session,
};
use crate::error::DecodeError;
use crate::types::{
    DamageSample, EventCode, FramePayload, LapSample, PacketHeader, PacketKind, SessionData,
    TelemetryFrame,
};

/// Stateless packet decoder.
///
/// Holds only the car index override; decoding itself is a pure function of the bytes.
#[derive(Debug, Clone, Copy, Default)]
pub struct Decoder {
    car_index: Option<u8>,
}

impl Decoder {
    /// `car_index` overrides the header's player car index when set.
    pub fn new(car_index: Option<u8>) -> Self {
        Self { car_index }
    }

    pub fn car_index(&self) -> Option<u8> {
        self.car_index
    }

    pub fn decode(&self, buf: &[u8]) -> Result<TelemetryFrame, DecodeError> {
        decode(buf, self.car_index)
    }
}

/// Parse and validate the 23-byte header.
pub fn parse_header(buf: &[u8]) -> Result<PacketHeader, DecodeError> {
    if buf.len() < HEADER_SIZE {
        return Err(DecodeError::truncated("header", HEADER_SIZE, buf.len()));
    }
    let mut r = ByteReader::new(buf, "header");
    let header = PacketHeader {
        packet_format: r.u16_le()?,
        game_major_version: r.u8()?,
        game_minor_version: r.u8()?,
        packet_version: r.u8()?,
        packet_id: r.u8()?,
        session_uid: r.u64_le()?,
        session_time: r.f32_le()?,
        frame_identifier: r.u32_le()?,
        player_car_index: r.u8()?,
    };

    if header.packet_format != PACKET_FORMAT_2019 {
        return Err(DecodeError::header_mismatch(format!(
            "packet format {} is not {}",
            header.packet_format, PACKET_FORMAT_2019
        )));
    }
    if header.player_car_index as usize >= MAX_CARS {
        return Err(DecodeError::header_mismatch(format!(
            "player car index {} out of range (max {})",
            header.player_car_index,
            MAX_CARS - 1
        )));
    }
    Ok(header)
}

/// Decode one datagram for the car at `car_index`, or the player's car when `None`.
///
/// Rejects datagrams whose length differs from the fixed size of their kind.
pub fn decode(buf: &[u8], car_index: Option<u8>) -> Result<TelemetryFrame, DecodeError> {
    let header = parse_header(buf)?;
    let kind = PacketKind::from_id(header.packet_id)
        .ok_or(DecodeError::UnknownPacketKind { id: header.packet_id })?;

    let expected = kind.expected_size();
    if buf.len() < expected {
        return Err(DecodeError::truncated(kind.name(), expected, buf.len()));
    }
    if buf.len() > expected {
        return Err(DecodeError::size_mismatch(kind, expected, buf.len()));
    }

    let car_index = car_index.unwrap_or(header.player_car_index);
    if car_index as usize >= MAX_CARS {
        return Err(DecodeError::header_mismatch(format!(
            "car index {} out of range (max {})",
            car_index,
            MAX_CARS - 1
        )));
    }

    let payload = match kind {
        PacketKind::Session => FramePayload::Session(parse_session(buf)?),
        PacketKind::LapData => FramePayload::LapData(parse_lap_sample(buf, car_index)?),
        PacketKind::Event => FramePayload::Event(parse_event(buf)?),
        PacketKind::CarStatus => FramePayload::CarStatus(parse_damage(buf, car_index)?),
        PacketKind::Motion
        | PacketKind::Participants
        | PacketKind::CarSetups
        | PacketKind::CarTelemetry => FramePayload::Ignored,
    };

    trace!(kind = %kind, frame = header.frame_identifier, car_index, "decoded packet");
    Ok(TelemetryFrame { kind, header, car_index, payload })
}

fn parse_session(buf: &[u8]) -> Result<SessionData, DecodeError> {
    let mut r = ByteReader::at(buf, session::WEATHER, "Session");
    let weather = r.u8()?;
    r.seek(session::TRACK_TEMPERATURE);
    let track_temperature = r.i8()?;
    r.seek(session::AIR_TEMPERATURE);
    let air_temperature = r.i8()?;
    r.seek(session::TOTAL_LAPS);
    let total_laps = r.u8()?;
    r.seek(session::TRACK_LENGTH);
    let track_length = r.u16_le()?;
    r.seek(session::SESSION_TYPE);
    let session_type = r.u8()?;
    r.seek(session::TRACK_ID);
    let track_id = r.i8()?;
    r.seek(session::SESSION_TIME_LEFT);
    let session_time_left = r.u16_le()?;
    r.seek(session::SESSION_DURATION);
    let session_duration = r.u16_le()?;
    r.seek(session::GAME_PAUSED);
    let game_paused = r.u8()? != 0;
    r.seek(session::NETWORK_GAME);
    let network_game = r.u8()? != 0;

    Ok(SessionData {
        weather,
        track_temperature,
        air_temperature,
        total_laps,
        track_length,
        session_type,
        track_id,
        session_time_left,
        session_duration,
        game_paused,
        network_game,
    })
}

fn parse_lap_sample(buf: &[u8], car_index: u8) -> Result<LapSample, DecodeError> {
    let base = car_record_offset(car_index, lap_data::CAR_RECORD_SIZE);
    let mut r = ByteReader::at(buf, base + lap_data::LAST_LAP_TIME, "LapData");
    let last_lap_time = r.f32_le()?;
    r.seek(base + lap_data::CURRENT_LAP_TIME);
    let current_lap_time = r.f32_le()?;
    r.seek(base + lap_data::LAP_DISTANCE);
    let lap_distance = r.f32_le()?;
    r.seek(base + lap_data::TOTAL_DISTANCE);
    let total_distance = r.f32_le()?;
    r.seek(base + lap_data::CAR_POSITION);
    let car_position = r.u8()?;
    r.seek(base + lap_data::CURRENT_LAP_NUM);
    let current_lap_num = r.u8()?;
    r.seek(base + lap_data::SECTOR);
    let sector = r.u8()?;
    r.seek(base + lap_data::CURRENT_LAP_INVALID);
    let lap_invalid = r.u8()? != 0;
    r.seek(base + lap_data::RESULT_STATUS);
    let result_status = r.u8()?;

    Ok(LapSample {
        last_lap_time,
        current_lap_time,
        lap_distance,
        total_distance,
        car_position,
        current_lap_num,
        sector,
        lap_invalid,
        result_status,
    })
}

fn parse_event(buf: &[u8]) -> Result<EventCode, DecodeError> {
    ByteReader::at(buf, event::CODE, "Event").code().map(EventCode::from_bytes)
}

fn parse_damage(buf: &[u8], car_index: u8) -> Result<DamageSample, DecodeError> {
    let base = car_record_offset(car_index, car_status::CAR_RECORD_SIZE);
    let mut r = ByteReader::at(buf, base + car_status::FRONT_LEFT_WING_DAMAGE, "CarStatus");
    let front_left_wing = r.u8()?;
    r.seek(base + car_status::FRONT_RIGHT_WING_DAMAGE);
    let front_right_wing = r.u8()?;
    r.seek(base + car_status::REAR_WING_DAMAGE);
    let rear_wing = r.u8()?;
    r.seek(base + car_status::ENGINE_DAMAGE);
    let engine = r.u8()?;
    r.seek(base + car_status::GEARBOX_DAMAGE);
    let gearbox = r.u8()?;

    Ok(DamageSample { front_left_wing, front_right_wing, rear_wing, engine, gearbox })
}
