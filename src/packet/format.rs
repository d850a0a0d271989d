//! 2019 UDP packet layout.
//!
//! Every datagram starts with the same 23-byte little-endian header, followed by a
//! kind-specific body of fixed size:
//!
//! | id | kind          | bytes | per-car record |
//! |----|---------------|-------|----------------|
//! | 0  | Motion        | 1343  | 60             |
//! | 1  | Session       | 149   | -              |
//! | 2  | LapData       | 843   | 41             |
//! | 3  | Event         | 32    | -              |
//! | 4  | Participants  | 1104  | 54             |
//! | 5  | CarSetups     | 843   | 41             |
//! | 6  | CarTelemetry  | 1347  | 66             |
//! | 7  | CarStatus     | 1143  | 56             |
//!
//! Only the offsets the rating pipeline reads are named here.

use crate::error::DecodeError;

pub const PACKET_FORMAT_2019: u16 = 2019;
pub const HEADER_SIZE: usize = 23;
pub const MAX_CARS: usize = 20;
/// Largest datagram the game sends, used to size receive buffers.
pub const MAX_PACKET_BYTES: usize = 2048;
pub const DEFAULT_PORT: u16 = 20777;

pub(crate) mod session {
    pub const WEATHER: usize = 23;
    pub const TRACK_TEMPERATURE: usize = 24;
    pub const AIR_TEMPERATURE: usize = 25;
    pub const TOTAL_LAPS: usize = 26;
    pub const TRACK_LENGTH: usize = 27;
    pub const SESSION_TYPE: usize = 29;
    pub const TRACK_ID: usize = 30;
    pub const SESSION_TIME_LEFT: usize = 32;
    pub const SESSION_DURATION: usize = 34;
    pub const GAME_PAUSED: usize = 37;
    pub const NETWORK_GAME: usize = 148;
}

pub(crate) mod lap_data {
    pub const CAR_RECORD_SIZE: usize = 41;
    pub const LAST_LAP_TIME: usize = 0;
    pub const CURRENT_LAP_TIME: usize = 4;
    pub const LAP_DISTANCE: usize = 20;
    pub const TOTAL_DISTANCE: usize = 24;
    pub const CAR_POSITION: usize = 32;
    pub const CURRENT_LAP_NUM: usize = 33;
    pub const SECTOR: usize = 35;
    pub const CURRENT_LAP_INVALID: usize = 36;
    pub const RESULT_STATUS: usize = 40;
}

pub(crate) mod event {
    pub const CODE: usize = 23;
}

pub(crate) mod car_status {
    pub const CAR_RECORD_SIZE: usize = 56;
    pub const FRONT_LEFT_WING_DAMAGE: usize = 33;
    pub const FRONT_RIGHT_WING_DAMAGE: usize = 34;
    pub const REAR_WING_DAMAGE: usize = 35;
    pub const ENGINE_DAMAGE: usize = 36;
    pub const GEARBOX_DAMAGE: usize = 37;
}

/// Byte offset of a car's record inside a per-car array.
pub(crate) fn car_record_offset(car_index: u8, record_size: usize) -> usize {
    HEADER_SIZE + car_index as usize * record_size
}

/// Cursor-style little-endian reader.
///
/// Every read is bounds checked and reports [`DecodeError::TruncatedPacket`] instead of
/// panicking, so a lying length check upstream can never crash the loop.
pub struct ByteReader<'a> {
    data: &'a [u8],
    pos: usize,
    context: &'static str,
}

impl<'a> ByteReader<'a> {
    pub fn new(data: &'a [u8], context: &'static str) -> Self {
        Self { data, pos: 0, context }
    }

    pub fn at(data: &'a [u8], offset: usize, context: &'static str) -> Self {
        Self { data, pos: offset, context }
    }

    fn take<const N: usize>(&mut self) -> Result<[u8; N], DecodeError> {
        let end = self.pos + N;
        let bytes = self
            .data
            .get(self.pos..end)
            .ok_or_else(|| DecodeError::truncated(self.context, end, self.data.len()))?;
        let mut out = [0u8; N];
        out.copy_from_slice(bytes);
        self.pos = end;
        Ok(out)
    }

    #[inline]
    pub fn u8(&mut self) -> Result<u8, DecodeError> {
        self.take::<1>().map(|[b]| b)
    }

    #[inline]
    pub fn i8(&mut self) -> Result<i8, DecodeError> {
        self.u8().map(|v| v as i8)
    }

    #[inline]
    pub fn u16_le(&mut self) -> Result<u16, DecodeError> {
        self.take().map(u16::from_le_bytes)
    }

    #[inline]
    pub fn u32_le(&mut self) -> Result<u32, DecodeError> {
        self.take().map(u32::from_le_bytes)
    }

    #[inline]
    pub fn u64_le(&mut self) -> Result<u64, DecodeError> {
        self.take().map(u64::from_le_bytes)
    }

    /// Non-finite values read as `0.0`.
    #[inline]
    pub fn f32_le(&mut self) -> Result<f32, DecodeError> {
        self.take().map(f32::from_le_bytes).map(|v| if v.is_finite() { v } else { 0.0 })
    }

    pub fn code(&mut self) -> Result<[u8; 4], DecodeError> {
        self.take()
    }

    pub fn seek(&mut self, offset: usize) {
        self.pos = offset;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_little_endian_fields_in_order() {
        let mut data = Vec::new();
        data.extend_from_slice(&2019u16.to_le_bytes());
        data.push(7);
        data.extend_from_slice(&(-3i8).to_le_bytes());
        data.extend_from_slice(&42.5f32.to_le_bytes());
        data.extend_from_slice(&0xdead_beef_u64.to_le_bytes());

        let mut r = ByteReader::new(&data, "test");
        assert_eq!(r.u16_le().unwrap(), 2019);
        assert_eq!(r.u8().unwrap(), 7);
        assert_eq!(r.i8().unwrap(), -3);
        assert_eq!(r.f32_le().unwrap(), 42.5);
        assert_eq!(r.u64_le().unwrap(), 0xdead_beef);
    }

    #[test]
    fn out_of_bounds_reads_are_truncation_errors() {
        let data = [1u8, 2, 3];
        let mut r = ByteReader::at(&data, 2, "Event");
        assert!(matches!(
            r.u32_le(),
            Err(DecodeError::TruncatedPacket { expected: 6, actual: 3, .. })
        ));
    }

    #[test]
    fn non_finite_floats_read_as_zero() {
        let data = f32::NAN.to_le_bytes();
        assert_eq!(ByteReader::new(&data, "test").f32_le().unwrap(), 0.0);
    }

    #[test]
    fn car_records_fit_inside_their_packets() {
        let last = MAX_CARS as u8 - 1;
        assert!(car_record_offset(last, lap_data::CAR_RECORD_SIZE) + lap_data::CAR_RECORD_SIZE <= 843);
        assert!(
            car_record_offset(last, car_status::CAR_RECORD_SIZE) + car_status::CAR_RECORD_SIZE
                <= 1143
        );
    }
}
