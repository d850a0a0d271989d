//! Datagram builders shared by unit tests and benchmarks.
//!
//! [`PacketBuilder`] writes byte-exact 2019-format packets so tests exercise the real
//! decoder instead of hand-constructed frames.

#![cfg(any(test, feature = "benchmark"))]

use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicBool, Ordering};

use crate::error::StoreError;
use crate::packet::decode;
use crate::packet::format::{
    HEADER_SIZE, PACKET_FORMAT_2019, car_record_offset, car_status, event, lap_data, session,
};
use crate::store::{RatingPoint, SessionDetail, SqliteStore, Store, SyncBatch, TrackStats};
use crate::types::{
    DamageSample, Incident, LapSample, PacketKind, SessionRecord, TelemetryFrame, UserProfile,
};

/// Builds datagrams for one session uid.
#[derive(Debug, Clone, Copy)]
pub struct PacketBuilder {
    session_uid: u64,
    player_car_index: u8,
}

impl PacketBuilder {
    pub fn new(session_uid: u64) -> Self {
        Self { session_uid, player_car_index: 0 }
    }

    pub fn player_car(mut self, index: u8) -> Self {
        self.player_car_index = index;
        self
    }

    pub fn session_uid(&self) -> u64 {
        self.session_uid
    }

    /// Zeroed packet of `kind` with a valid header.
    pub fn blank(&self, kind: PacketKind, session_time: f32) -> Vec<u8> {
        let mut buf = vec![0u8; kind.expected_size()];
        buf[0..2].copy_from_slice(&PACKET_FORMAT_2019.to_le_bytes());
        buf[2] = 1;
        buf[3] = 22;
        buf[4] = 1;
        buf[5] = kind.id();
        buf[6..14].copy_from_slice(&self.session_uid.to_le_bytes());
        buf[14..18].copy_from_slice(&session_time.to_le_bytes());
        let frame_identifier = (session_time.max(0.0) * 60.0) as u32;
        buf[18..22].copy_from_slice(&frame_identifier.to_le_bytes());
        buf[HEADER_SIZE - 1] = self.player_car_index;
        buf
    }

    pub fn session(
        &self,
        session_time: f32,
        session_type: u8,
        track_id: i8,
        track_length: u16,
    ) -> Vec<u8> {
        let mut buf = self.blank(PacketKind::Session, session_time);
        buf[session::TOTAL_LAPS] = 5;
        buf[session::TRACK_LENGTH..session::TRACK_LENGTH + 2]
            .copy_from_slice(&track_length.to_le_bytes());
        buf[session::SESSION_TYPE] = session_type;
        buf[session::TRACK_ID] = track_id as u8;
        buf
    }

    pub fn paused_session(
        &self,
        session_time: f32,
        session_type: u8,
        track_id: i8,
        track_length: u16,
    ) -> Vec<u8> {
        let mut buf = self.session(session_time, session_type, track_id, track_length);
        buf[session::GAME_PAUSED] = 1;
        buf
    }

    /// Lap data where only `car` carries meaningful values.
    pub fn lap_data(
        &self,
        session_time: f32,
        car: u8,
        lap_distance: f32,
        lap_num: u8,
        lap_invalid: bool,
    ) -> Vec<u8> {
        self.lap(
            session_time,
            car,
            &LapSample {
                last_lap_time: 0.0,
                current_lap_time: 0.0,
                lap_distance,
                total_distance: lap_distance.max(0.0),
                car_position: 1,
                current_lap_num: lap_num,
                sector: 0,
                lap_invalid,
                result_status: 2,
            },
        )
    }

    pub fn lap(&self, session_time: f32, car: u8, sample: &LapSample) -> Vec<u8> {
        let mut buf = self.blank(PacketKind::LapData, session_time);
        let base = car_record_offset(car, lap_data::CAR_RECORD_SIZE);
        let put_f32 = |buf: &mut Vec<u8>, offset: usize, v: f32| {
            buf[base + offset..base + offset + 4].copy_from_slice(&v.to_le_bytes());
        };
        put_f32(&mut buf, lap_data::LAST_LAP_TIME, sample.last_lap_time);
        put_f32(&mut buf, lap_data::CURRENT_LAP_TIME, sample.current_lap_time);
        put_f32(&mut buf, lap_data::LAP_DISTANCE, sample.lap_distance);
        put_f32(&mut buf, lap_data::TOTAL_DISTANCE, sample.total_distance);
        buf[base + lap_data::CAR_POSITION] = sample.car_position;
        buf[base + lap_data::CURRENT_LAP_NUM] = sample.current_lap_num;
        buf[base + lap_data::SECTOR] = sample.sector;
        buf[base + lap_data::CURRENT_LAP_INVALID] = u8::from(sample.lap_invalid);
        buf[base + lap_data::RESULT_STATUS] = sample.result_status;
        buf
    }

    pub fn car_status(&self, session_time: f32, car: u8, damage: DamageSample) -> Vec<u8> {
        let mut buf = self.blank(PacketKind::CarStatus, session_time);
        let base = car_record_offset(car, car_status::CAR_RECORD_SIZE);
        buf[base + car_status::FRONT_LEFT_WING_DAMAGE] = damage.front_left_wing;
        buf[base + car_status::FRONT_RIGHT_WING_DAMAGE] = damage.front_right_wing;
        buf[base + car_status::REAR_WING_DAMAGE] = damage.rear_wing;
        buf[base + car_status::ENGINE_DAMAGE] = damage.engine;
        buf[base + car_status::GEARBOX_DAMAGE] = damage.gearbox;
        buf
    }

    pub fn event(&self, session_time: f32, code: [u8; 4]) -> Vec<u8> {
        let mut buf = self.blank(PacketKind::Event, session_time);
        buf[event::CODE..event::CODE + 4].copy_from_slice(&code);
        buf
    }
}

/// Decode a datagram that is known to be valid.
pub fn decoded(buf: &[u8]) -> TelemetryFrame {
    match decode(buf, None) {
        Ok(frame) => frame,
        Err(err) => panic!("test datagram failed to decode: {err}"),
    }
}

/// Wing damage of `front_left` percent, everything else intact.
pub fn wing_damage(front_left: u8) -> DamageSample {
    DamageSample { front_left_wing: front_left, ..DamageSample::default() }
}

/// Datagrams for a clean race on Monza (11 corners, 5793 m): a session packet, then one
/// lap data packet every 100 m and 1.25 s of session time for `laps` laps.
pub fn clean_race(builder: &PacketBuilder, laps: u8) -> Vec<Vec<u8>> {
    const LENGTH: u16 = 5793;
    let mut out = Vec::new();
    let mut t = 1.0f32;
    out.push(builder.session(t, 10, 11, LENGTH));
    for lap in 1..=laps {
        let mut d = 0.0f32;
        while d < f32::from(LENGTH) {
            t += 1.25;
            out.push(builder.lap_data(t, 0, d, lap, false));
            d += 100.0;
        }
    }
    out
}

/// In-memory store whose reads and writes can be made to fail on demand.
pub struct FlakyStore {
    inner: SqliteStore,
    fail_writes: AtomicBool,
    fail_reads: AtomicBool,
}

impl FlakyStore {
    pub fn new() -> Self {
        match SqliteStore::open_in_memory() {
            Ok(inner) => Self {
                inner,
                fail_writes: AtomicBool::new(false),
                fail_reads: AtomicBool::new(false),
            },
            Err(err) => panic!("in-memory store failed to open: {err}"),
        }
    }

    pub fn inner(&self) -> &SqliteStore {
        &self.inner
    }

    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub fn fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    fn check_write(&self, operation: &str) -> Result<(), StoreError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::write(operation, "injected write failure"));
        }
        Ok(())
    }

    fn check_read(&self, operation: &str) -> Result<(), StoreError> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(StoreError::read(operation, "injected read failure"));
        }
        Ok(())
    }
}

impl Default for FlakyStore {
    fn default() -> Self {
        Self::new()
    }
}

impl Store for FlakyStore {
    fn upsert_session(&self, session: &SessionRecord) -> Result<(), StoreError> {
        self.check_write("upsert_session")?;
        self.inner.upsert_session(session)
    }

    fn append_incident(&self, incident: &Incident) -> Result<(), StoreError> {
        self.check_write("append_incident")?;
        self.inner.append_incident(incident)
    }

    fn write_sync(&self, batch: &SyncBatch) -> Result<(), StoreError> {
        self.check_write("write_sync")?;
        self.inner.write_sync(batch)
    }

    fn load_profile(&self) -> Result<Option<UserProfile>, StoreError> {
        self.check_read("load_profile")?;
        self.inner.load_profile()
    }

    fn recent_sessions(&self, limit: u32, offset: u32) -> Result<Vec<SessionRecord>, StoreError> {
        self.check_read("recent_sessions")?;
        self.inner.recent_sessions(limit, offset)
    }

    fn session_detail(&self, id: &str) -> Result<Option<SessionDetail>, StoreError> {
        self.check_read("session_detail")?;
        self.inner.session_detail(id)
    }

    fn rating_series(&self, limit: u32) -> Result<Vec<RatingPoint>, StoreError> {
        self.check_read("rating_series")?;
        self.inner.rating_series(limit)
    }

    fn track_stats(&self) -> Result<Vec<TrackStats>, StoreError> {
        self.check_read("track_stats")?;
        self.inner.track_stats()
    }

    fn prune_before(&self, cutoff: DateTime<Utc>) -> Result<usize, StoreError> {
        self.check_write("prune_before")?;
        self.inner.prune_before(cutoff)
    }
}
