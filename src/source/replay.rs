//! Replay of recorded telemetry captures.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::path::Path;
use tokio::time::{Instant, sleep_until};
use tracing::{debug, info};

use super::capture::{CapturedDatagram, read_capture};
use super::udp::DEFAULT_SEND_RATE_HZ;
use super::{Datagram, TelemetrySource};
use crate::error::Result;

/// How a replay is paced.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Pacing {
    /// Honour recorded offsets, scaled by `speed` (2.0 plays twice as fast).
    Realtime { speed: f64 },
    /// Deliver datagrams as fast as the consumer reads them.
    Unpaced,
}

impl Pacing {
    pub fn realtime(speed: f64) -> Self {
        Pacing::Realtime { speed: speed.clamp(0.1, 100.0) }
    }
}

pub struct ReplaySource {
    label: String,
    datagrams: VecDeque<CapturedDatagram>,
    total: usize,
    pacing: Pacing,
    started: Option<Instant>,
}

impl ReplaySource {
    /// Load a capture file written by [`CaptureWriter`](super::CaptureWriter).
    pub fn open(path: impl AsRef<Path>, pacing: Pacing) -> Result<Self> {
        let path = path.as_ref();
        let datagrams = read_capture(path)?;
        info!(path = %path.display(), datagrams = datagrams.len(), "opened telemetry capture");
        Ok(Self::from_captured(format!("replay://{}", path.display()), datagrams, pacing))
    }

    pub fn from_captured(
        label: impl Into<String>,
        datagrams: Vec<CapturedDatagram>,
        pacing: Pacing,
    ) -> Self {
        let total = datagrams.len();
        Self { label: label.into(), datagrams: datagrams.into(), total, pacing, started: None }
    }

    /// Unpaced replay of raw datagrams.
    pub fn from_datagrams(datagrams: Vec<Vec<u8>>) -> Self {
        let captured = datagrams
            .into_iter()
            .map(|bytes| CapturedDatagram { offset: std::time::Duration::ZERO, bytes })
            .collect();
        Self::from_captured("replay://memory", captured, Pacing::Unpaced)
    }

    pub fn remaining(&self) -> usize {
        self.datagrams.len()
    }

    pub fn total(&self) -> usize {
        self.total
    }
}

#[async_trait]
impl TelemetrySource for ReplaySource {
    async fn next_datagram(&mut self) -> Result<Option<Datagram>> {
        let Some(offset) = self.datagrams.front().map(|d| d.offset) else {
            debug!(total = self.total, "replay finished");
            return Ok(None);
        };

        // Only pop after the wait so a cancelled read loses nothing.
        match self.pacing {
            Pacing::Realtime { speed } => {
                let started = *self.started.get_or_insert_with(Instant::now);
                sleep_until(started + offset.div_f64(speed)).await;
            }
            Pacing::Unpaced => tokio::task::yield_now().await,
        }

        Ok(self.datagrams.pop_front().map(|next| Datagram::now(next.bytes)))
    }

    fn describe(&self) -> String {
        self.label.clone()
    }

    fn send_rate_hz(&self) -> f64 {
        match self.pacing {
            Pacing::Realtime { speed } => DEFAULT_SEND_RATE_HZ * speed,
            Pacing::Unpaced => DEFAULT_SEND_RATE_HZ,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn unpaced_replay_yields_in_order_then_ends() {
        let mut source = ReplaySource::from_datagrams(vec![vec![1], vec![2], vec![3]]);
        assert_eq!(source.total(), 3);

        let mut seen = Vec::new();
        while let Some(d) = source.next_datagram().await.unwrap() {
            seen.push(d.bytes[0]);
        }
        assert_eq!(seen, vec![1, 2, 3]);
        assert_eq!(source.remaining(), 0);
        assert!(source.next_datagram().await.unwrap().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn realtime_replay_honours_offsets_and_speed() {
        let captured = vec![
            CapturedDatagram { offset: Duration::ZERO, bytes: vec![1] },
            CapturedDatagram { offset: Duration::from_secs(2), bytes: vec![2] },
        ];
        let mut source = ReplaySource::from_captured("test", captured, Pacing::realtime(2.0));

        let start = Instant::now();
        source.next_datagram().await.unwrap().unwrap();
        let second = source.next_datagram().await.unwrap().unwrap();
        assert_eq!(second.bytes, vec![2]);
        assert_eq!(start.elapsed(), Duration::from_secs(1));
    }

    #[test]
    fn speed_is_clamped() {
        assert_eq!(Pacing::realtime(0.0), Pacing::Realtime { speed: 0.1 });
        assert_eq!(Pacing::realtime(1000.0), Pacing::Realtime { speed: 100.0 });
    }
}
