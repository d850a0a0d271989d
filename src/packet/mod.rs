//! F1 2019 UDP packet decoding.
//!
//! [`decode`] is a pure function from one datagram to a [`TelemetryFrame`](crate::TelemetryFrame)
//! or a [`DecodeError`](crate::DecodeError). It never performs I/O and never panics; callers drop
//! rejected datagrams and carry on.

mod decoder;
pub mod format;

pub use decoder::{Decoder, decode, parse_header};
pub use format::{DEFAULT_PORT, MAX_PACKET_BYTES};
