//! Telemetry sources.
//!
//! A [`TelemetrySource`] yields raw datagrams in arrival order. The telemetry loop owns
//! exactly one source and never cares whether it is a live socket or a capture file.

mod capture;
mod replay;
mod udp;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::time::Instant;
use tracing::warn;

use crate::error::Result;

pub use capture::{CAPTURE_MAGIC, CaptureWriter, CapturedDatagram, parse_capture, read_capture};
pub use replay::{Pacing, ReplaySource};
pub use udp::UdpSource;

/// One received datagram.
#[derive(Debug, Clone, PartialEq)]
pub struct Datagram {
    pub bytes: Vec<u8>,
    pub received_at: DateTime<Utc>,
    /// Monotonic receipt time, used for sync scheduling.
    pub instant: Instant,
}

impl Datagram {
    pub fn now(bytes: Vec<u8>) -> Self {
        Self { bytes, received_at: Utc::now(), instant: Instant::now() }
    }
}

#[async_trait]
pub trait TelemetrySource: Send + 'static {
    /// Wait for the next datagram.
    ///
    /// - `Ok(Some(datagram))` - a datagram arrived
    /// - `Ok(None)` - the source is exhausted (replays only)
    /// - `Err(e)` - transient receive error; the loop backs off and keeps reading
    async fn next_datagram(&mut self) -> Result<Option<Datagram>>;

    fn describe(&self) -> String;

    /// Datagrams per second the source is expected to deliver per packet kind.
    fn send_rate_hz(&self) -> f64;
}

/// Tees every datagram of `inner` into a capture file.
pub struct Recording<S> {
    inner: S,
    writer: CaptureWriter,
}

impl<S: TelemetrySource> Recording<S> {
    pub fn new(inner: S, writer: CaptureWriter) -> Self {
        Self { inner, writer }
    }
}

#[async_trait]
impl<S: TelemetrySource> TelemetrySource for Recording<S> {
    async fn next_datagram(&mut self) -> Result<Option<Datagram>> {
        let datagram = self.inner.next_datagram().await?;
        if let Some(d) = &datagram
            && let Err(e) = self.writer.record(&d.bytes, d.instant)
        {
            warn!(error = %e, "failed to record datagram");
        }
        if datagram.is_none() {
            self.writer.flush()?;
        }
        Ok(datagram)
    }

    fn describe(&self) -> String {
        format!("{} (recording)", self.inner.describe())
    }

    fn send_rate_hz(&self) -> f64 {
        self.inner.send_rate_hz()
    }
}
