//! Wire-level datagram builders for integration tests.
//!
//! These write 2019-format packets byte by byte, independent of the crate's own layout
//! constants, so the tests double as a check on the documented wire format.

#![allow(dead_code)]

const HEADER: usize = 23;

pub struct Packets {
    uid: u64,
}

impl Packets {
    pub fn new(uid: u64) -> Self {
        Self { uid }
    }

    fn blank(&self, id: u8, size: usize, session_time: f32) -> Vec<u8> {
        let mut buf = vec![0u8; size];
        buf[0..2].copy_from_slice(&2019u16.to_le_bytes());
        buf[2] = 1;
        buf[3] = 22;
        buf[4] = 1;
        buf[5] = id;
        buf[6..14].copy_from_slice(&self.uid.to_le_bytes());
        buf[14..18].copy_from_slice(&session_time.to_le_bytes());
        buf[18..22].copy_from_slice(&((session_time * 20.0) as u32).to_le_bytes());
        buf[22] = 0;
        buf
    }

    pub fn session(&self, session_time: f32, session_type: u8, track_id: i8, length: u16) -> Vec<u8> {
        let mut buf = self.blank(1, 149, session_time);
        buf[26] = 5;
        buf[27..29].copy_from_slice(&length.to_le_bytes());
        buf[29] = session_type;
        buf[30] = track_id as u8;
        buf
    }

    pub fn lap(&self, session_time: f32, lap_distance: f32, total: f32, lap_num: u8) -> Vec<u8> {
        let mut buf = self.blank(2, 843, session_time);
        let base = HEADER;
        buf[base + 20..base + 24].copy_from_slice(&lap_distance.to_le_bytes());
        buf[base + 24..base + 28].copy_from_slice(&total.to_le_bytes());
        buf[base + 32] = 1;
        buf[base + 33] = lap_num;
        buf[base + 40] = 2;
        buf
    }

    pub fn off_track(&self, session_time: f32, lap_distance: f32, total: f32, lap_num: u8) -> Vec<u8> {
        let mut buf = self.lap(session_time, lap_distance, total, lap_num);
        buf[HEADER + 36] = 1;
        buf
    }

    pub fn wing_damage(&self, session_time: f32, front_left: u8) -> Vec<u8> {
        let mut buf = self.blank(7, 1143, session_time);
        buf[HEADER + 33] = front_left;
        buf
    }

    pub fn event(&self, session_time: f32, code: &[u8; 4]) -> Vec<u8> {
        let mut buf = self.blank(3, 32, session_time);
        buf[23..27].copy_from_slice(code);
        buf
    }
}

/// A race on Monza (track 11, 5793 m, 11 corners): session packet, `laps` laps of lap
/// data every 100 m, and a chequered flag.
pub fn monza_race(packets: &Packets, laps: u8) -> Vec<Vec<u8>> {
    const LENGTH: f32 = 5793.0;
    let mut out = vec![packets.session(1.0, 10, 11, 5793)];
    let mut t = 1.0;
    for lap in 1..=laps {
        let mut d = 0.0;
        while d < LENGTH {
            t += 1.25;
            let total = f32::from(lap - 1) * LENGTH + d;
            out.push(packets.lap(t, d, total, lap));
            d += 100.0;
        }
    }
    out.push(packets.event(t + 1.0, b"CHQF"));
    out
}
