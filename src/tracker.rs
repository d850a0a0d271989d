//! Owned handle to a running tracker.

use futures::StreamExt;
use futures::stream::BoxStream;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_stream::wrappers::WatchStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::api::ReadApi;
use crate::driver::{Command, Driver, LoopConfig, LoopSummary};
use crate::error::{Result, SrError};
use crate::source::{Pacing, ReplaySource, TelemetrySource, UdpSource};
use crate::store::Store;
use crate::stream::ThrottleExt;
use crate::types::{RatingSnapshot, UpdateRate};

/// A running telemetry loop plus everything needed to read from it.
///
/// Dropping the tracker cancels the loop; the open session, if any, is closed and
/// flushed before the loop task exits.
pub struct Tracker {
    snapshots: watch::Receiver<Arc<RatingSnapshot>>,
    commands: mpsc::Sender<Command>,
    store: Arc<dyn Store>,
    source_hz: f64,
    cancel: CancellationToken,
    task: Option<JoinHandle<LoopSummary>>,
}

impl Tracker {
    pub async fn start<S>(source: S, store: Arc<dyn Store>, config: LoopConfig) -> Result<Self>
    where
        S: TelemetrySource,
    {
        info!(source = %source.describe(), "starting tracker");
        let channels = Driver::spawn(source, Arc::clone(&store), config).await?;
        Ok(Self {
            snapshots: channels.snapshots,
            commands: channels.commands,
            store,
            source_hz: channels.source_hz,
            cancel: channels.cancel,
            task: Some(channels.task),
        })
    }

    /// Listen for live telemetry on `addr`.
    pub async fn listen(addr: SocketAddr, store: Arc<dyn Store>, config: LoopConfig) -> Result<Self> {
        let source = UdpSource::bind(addr).await?;
        Self::start(source, store, config).await
    }

    /// Replay a capture file.
    pub async fn replay(
        path: impl AsRef<Path>,
        pacing: Pacing,
        store: Arc<dyn Store>,
        config: LoopConfig,
    ) -> Result<Self> {
        let source = ReplaySource::open(path, pacing)?;
        Self::start(source, store, config).await
    }

    /// The latest published snapshot.
    pub fn current(&self) -> Arc<RatingSnapshot> {
        Arc::clone(&self.snapshots.borrow())
    }

    /// Snapshots as they are published, at most `rate` per second.
    ///
    /// Yields the current snapshot first and ends when the loop stops.
    pub fn subscribe(&self, rate: UpdateRate) -> BoxStream<'static, Arc<RatingSnapshot>> {
        let snapshots = WatchStream::new(self.snapshots.clone());
        match rate.throttle_interval(self.source_hz) {
            None => snapshots.boxed(),
            Some(period) => snapshots.throttle(period).boxed(),
        }
    }

    pub fn api(&self) -> ReadApi {
        ReadApi::new(Arc::clone(&self.store), self.snapshots.clone(), self.commands.clone())
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn source_hz(&self) -> f64 {
        self.source_hz
    }

    /// Wait for the loop to stop on its own (end of a replay, or cancellation).
    ///
    /// Cancel safe: dropping the future before it completes leaves the loop joinable.
    pub async fn finished(&mut self) -> Result<LoopSummary> {
        let task = self.task.as_mut().ok_or_else(|| SrError::loop_unavailable("already joined"))?;
        let joined = task.await;
        self.task = None;
        joined.map_err(|e| SrError::loop_unavailable(format!("loop task failed: {e}")))
    }

    /// Stop the loop, closing any open session, and wait for the final write.
    pub async fn shutdown(mut self) -> Result<LoopSummary> {
        self.cancel.cancel();
        self.finished().await
    }
}

impl Drop for Tracker {
    fn drop(&mut self) {
        debug!("dropping tracker");
        self.cancel.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::SqliteStore;
    use crate::test_utils::{PacketBuilder, clean_race};
    use std::time::Duration;

    fn store() -> Arc<dyn Store> {
        Arc::new(SqliteStore::open_in_memory().unwrap())
    }

    #[tokio::test]
    async fn subscription_ends_with_the_loop() {
        let builder = PacketBuilder::new(5);
        let source = ReplaySource::from_datagrams(clean_race(&builder, 1));
        let mut tracker = Tracker::start(source, store(), LoopConfig::default()).await.unwrap();

        let summary = tracker.finished().await.unwrap();
        assert_eq!(summary.sessions_closed, 1);

        let seen: Vec<_> = tracker.subscribe(UpdateRate::Max(5)).collect().await;
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].revision, tracker.current().revision);
        assert!(tracker.finished().await.is_err());
    }

    #[tokio::test]
    async fn shutdown_closes_the_open_race() {
        let builder = PacketBuilder::new(6);
        let udp = UdpSource::bind("127.0.0.1:0".parse().unwrap()).await.unwrap();
        let addr = udp.local_addr();
        let db = store();
        let tracker = Tracker::start(udp, Arc::clone(&db), LoopConfig::default()).await.unwrap();

        let sender = tokio::net::UdpSocket::bind("127.0.0.1:0").await.unwrap();
        for datagram in clean_race(&builder, 1) {
            sender.send_to(&datagram, addr).await.unwrap();
        }
        let mut live = tracker.subscribe(UpdateRate::Native);
        tokio::time::timeout(Duration::from_secs(5), async {
            while let Some(snapshot) = live.next().await {
                if snapshot.session.as_ref().is_some_and(|s| s.corners > 0) {
                    break;
                }
            }
        })
        .await
        .unwrap();

        let summary = tracker.shutdown().await.unwrap();
        assert_eq!(summary.sessions_closed, 1);
        let sessions = db.recent_sessions(5, 0).unwrap();
        assert_eq!(sessions.len(), 1);
        assert!(sessions[0].ended_at.is_some());
    }
}
