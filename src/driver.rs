//! The telemetry loop.
//!
//! [`Driver::spawn`] restores the rating engine from the store, starts the sync writer and
//! then runs one sequential task that owns the source, decoder, session manager, engine
//! and scheduler. Everything else sees the engine through the published
//! [`RatingSnapshot`] or talks to the loop through [`Command`]s.

use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use crate::error::{Result, SrError};
use crate::packet::Decoder;
use crate::packet::format::MAX_CARS;
use crate::rating::{RatingConfig, RatingEngine};
use crate::session::{SessionConfig, SessionEvent, SessionManager};
use crate::source::{Datagram, TelemetrySource};
use crate::store::Store;
use crate::sync::{SyncConfig, SyncScheduler, SyncWriter, WriteKind, WriteOp, WriteOutcome};
use crate::types::{
    Incident, IncidentCounts, RatingCheckpoint, RatingSnapshot, SessionProgress, SessionRecord,
    lookup_track,
};

/// How often the loop services the scheduler and stall detection without frames.
pub const TICK_INTERVAL: Duration = Duration::from_millis(250);
const COMMAND_BUFFER: usize = 16;

/// Everything the loop needs to know at startup.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct LoopConfig {
    pub rating: RatingConfig,
    pub session: SessionConfig,
    pub sync: SyncConfig,
    /// Track this car instead of the player car from the header.
    pub car_index: Option<u8>,
    /// Reset the rating before the first frame is processed.
    pub reset_on_start: bool,
}

impl LoopConfig {
    pub fn validate(&self) -> Result<()> {
        self.rating.validate()?;
        self.session.validate()?;
        self.sync.validate()?;
        if let Some(index) = self.car_index
            && usize::from(index) >= MAX_CARS
        {
            return Err(SrError::config(format!(
                "car index {index} out of range (0..{MAX_CARS})"
            )));
        }
        Ok(())
    }
}

/// Requests served by the loop.
#[derive(Debug)]
pub enum Command {
    /// Reset the rating. Replies once the store write has been attempted.
    ResetRating { reply: oneshot::Sender<Result<()>> },
}

/// Counters reported when the loop stops.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoopSummary {
    pub datagrams: u64,
    pub frames: u64,
    pub decode_errors: u64,
    pub sessions_closed: u64,
    /// Races that ended too short to keep.
    pub sessions_discarded: u64,
}

/// Handles to a running loop.
pub struct DriverChannels {
    pub snapshots: watch::Receiver<Arc<RatingSnapshot>>,
    pub commands: mpsc::Sender<Command>,
    pub cancel: CancellationToken,
    pub task: JoinHandle<LoopSummary>,
    /// Send rate reported by the source, used to normalize subscriber rates.
    pub source_hz: f64,
}

pub struct Driver;

impl Driver {
    /// Restore state from `store` and start the loop over `source`.
    ///
    /// Fails only on startup problems: invalid configuration or an unreadable profile.
    pub async fn spawn<S>(
        source: S,
        store: Arc<dyn Store>,
        config: LoopConfig,
    ) -> Result<DriverChannels>
    where
        S: TelemetrySource,
    {
        config.validate()?;

        if let Some(days) = config.sync.retention_days {
            let cutoff = Utc::now() - chrono::Duration::days(i64::from(days));
            let pruning = Arc::clone(&store);
            match tokio::task::spawn_blocking(move || pruning.prune_before(cutoff)).await {
                Ok(Ok(pruned)) => info!(pruned, retention_days = days, "pruned old sessions"),
                Ok(Err(e)) => warn!(error = %e, "session pruning failed"),
                Err(e) => warn!(error = %e, "session pruning task failed"),
            }
        }

        let loading = Arc::clone(&store);
        let profile = tokio::task::spawn_blocking(move || loading.load_profile())
            .await
            .map_err(|e| SrError::loop_unavailable(format!("profile load task: {e}")))??;
        let (engine, committed) = match profile {
            Some(profile) => {
                let checkpoint = RatingCheckpoint::from(&profile);
                (RatingEngine::restore(config.rating, &checkpoint), profile.revision)
            }
            None => (RatingEngine::new(config.rating), 0),
        };

        let writer = SyncWriter::new(store, committed, config.sync.interval());
        let (ops_tx, ops_rx) = mpsc::unbounded_channel();
        let (outcome_tx, outcome_rx) = mpsc::unbounded_channel();
        let writer_task = writer.spawn(ops_rx, outcome_tx);

        let (snapshot_tx, snapshot_rx) = watch::channel(Arc::new(engine.snapshot(None)));
        let (command_tx, command_rx) = mpsc::channel(COMMAND_BUFFER);
        let cancel = CancellationToken::new();
        let source_hz = source.send_rate_hz();

        let mut state = LoopState {
            decoder: Decoder::new(config.car_index),
            sessions: SessionManager::new(config.session),
            engine,
            scheduler: SyncScheduler::new(config.sync.interval()),
            open: None,
            ops: ops_tx,
            snapshots: snapshot_tx,
            published: None,
            summary: LoopSummary::default(),
        };
        if config.reset_on_start {
            info!("resetting rating at startup");
            state.reset(None);
        }
        state.publish();

        let cancel_loop = cancel.clone();
        let task = tokio::spawn(async move {
            state.run(source, command_rx, outcome_rx, writer_task, cancel_loop).await
        });

        Ok(DriverChannels { snapshots: snapshot_rx, commands: command_tx, cancel, task, source_hz })
    }
}

struct LoopState {
    decoder: Decoder,
    sessions: SessionManager,
    engine: RatingEngine,
    scheduler: SyncScheduler,
    /// Row of the open race, kept current as events arrive.
    open: Option<SessionRecord>,
    ops: mpsc::UnboundedSender<WriteOp>,
    snapshots: watch::Sender<Arc<RatingSnapshot>>,
    published: Option<(u64, bool)>,
    summary: LoopSummary,
}

impl LoopState {
    async fn run<S: TelemetrySource>(
        mut self,
        mut source: S,
        mut commands: mpsc::Receiver<Command>,
        mut outcomes: mpsc::UnboundedReceiver<WriteOutcome>,
        writer: JoinHandle<()>,
        cancel: CancellationToken,
    ) -> LoopSummary {
        info!(source = %source.describe(), "telemetry loop started");
        let mut ticker = interval(TICK_INTERVAL);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut error_count = 0u32;

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    info!("telemetry loop cancelled");
                    break;
                }
                Some(command) = commands.recv() => self.on_command(command),
                Some(outcome) = outcomes.recv() => self.on_outcome(outcome),
                _ = ticker.tick() => self.on_tick(Instant::now()),
                result = source.next_datagram() => match result {
                    Ok(Some(datagram)) => {
                        error_count = 0;
                        self.on_datagram(datagram);
                    }
                    Ok(None) => {
                        info!(datagrams = self.summary.datagrams, "telemetry source ended");
                        break;
                    }
                    Err(e) => {
                        // Receive errors never end the loop.
                        error_count = error_count.saturating_add(1);
                        warn!(error = %e, errors = error_count, "telemetry source error");
                        let backoff = Duration::from_millis(50 * (1 << error_count.min(5)));
                        tokio::time::sleep(backoff).await;
                    }
                },
            }
        }

        self.shutdown(writer, outcomes).await
    }

    fn on_datagram(&mut self, datagram: Datagram) {
        self.summary.datagrams += 1;
        let frame = match self.decoder.decode(&datagram.bytes) {
            Ok(frame) => frame,
            Err(e) => {
                self.summary.decode_errors += 1;
                debug!(error = %e, len = datagram.bytes.len(), "dropping datagram");
                return;
            }
        };
        self.summary.frames += 1;
        trace!(kind = %frame.kind, frame = frame.frame_identifier(), "frame");

        for event in self.sessions.on_frame(&frame, datagram.received_at) {
            self.apply(event, datagram.instant);
        }
        if self.scheduler.poll(datagram.instant) {
            self.submit_sync();
        }
        self.publish();
    }

    fn on_tick(&mut self, now: Instant) {
        if let Some(event) = self.sessions.on_tick(Utc::now()) {
            self.apply(event, now);
        }
        if self.scheduler.poll(now) {
            self.submit_sync();
        }
        self.publish();
    }

    fn on_command(&mut self, command: Command) {
        match command {
            Command::ResetRating { reply } => {
                info!("rating reset requested");
                self.reset(Some(reply));
            }
        }
    }

    fn on_outcome(&mut self, outcome: WriteOutcome) {
        match (outcome.kind, outcome.success) {
            (WriteKind::Sync, true) => self.scheduler.record_success(outcome.at),
            (WriteKind::Sync, false) => self.scheduler.record_failure(),
            (kind, success) => trace!(?kind, success, revision = ?outcome.revision, "write outcome"),
        }
    }

    fn apply(&mut self, event: SessionEvent, now: Instant) {
        match event {
            SessionEvent::Started { session_id, track_id, session_type, started_at } => {
                if self.sessions.config().reset_window_on_session_start {
                    self.engine.reset();
                }
                self.engine.begin_session();
                let rating = self.engine.current_rating();
                let record = SessionRecord {
                    id: session_id,
                    track_id,
                    session_type,
                    started_at,
                    ended_at: None,
                    corners: 0,
                    incidents: IncidentCounts::default(),
                    start_rating: rating,
                    end_rating: Some(rating),
                    distance_m: 0.0,
                    end_reason: None,
                };
                self.submit(WriteOp::OpenSession(record.clone()));
                self.open = Some(record);
                self.scheduler.activate(now);
            }
            SessionEvent::CornerCompleted { session_id, corner_index } => {
                self.engine.register_clean_corner();
                if let Some(open) = self.open.as_mut().filter(|open| open.id == session_id) {
                    open.corners = corner_index;
                }
            }
            SessionEvent::IncidentDetected { session_id, kind, corner_index, detected_at } => {
                let weight = kind.weight();
                self.engine.register_incident(kind, weight);
                if let Some(open) = self.open.as_mut().filter(|open| open.id == session_id) {
                    open.incidents.record(kind);
                }
                info!(%session_id, %kind, corner_index, "incident");
                self.submit(WriteOp::AppendIncident(Incident {
                    session_id,
                    kind,
                    weight,
                    timestamp: detected_at,
                    corner_index,
                }));
            }
            SessionEvent::Ended { session_id, ended_at, reason, corners, incidents, distance_m } => {
                self.scheduler.deactivate();
                let Some(mut record) = self.open.take() else {
                    warn!(%session_id, "session ended without an open record");
                    return;
                };
                record.ended_at = Some(ended_at);
                record.corners = corners;
                record.incidents = incidents;
                record.end_rating = Some(self.engine.current_rating());
                record.distance_m = distance_m;
                record.end_reason = Some(reason);
                info!(
                    session_id = %record.id,
                    %reason,
                    corners,
                    incidents = incidents.total(),
                    rating = self.engine.current_rating(),
                    "race recorded"
                );
                self.summary.sessions_closed += 1;
                self.submit(WriteOp::CloseSession {
                    session: record,
                    checkpoint: self.engine.checkpoint(),
                    distance_m,
                });
            }
            SessionEvent::Discarded { session_id, reason, duration_secs } => {
                self.scheduler.deactivate();
                if self.open.take().is_none() {
                    warn!(%session_id, "session discarded without an open record");
                }
                info!(%session_id, %reason, duration_secs, "short race dropped from history");
                self.summary.sessions_discarded += 1;
                self.submit(WriteOp::DiscardSession {
                    session_id,
                    checkpoint: self.engine.checkpoint(),
                });
            }
        }
    }

    /// Publishes the reset snapshot before queueing the write; a reset reply never
    /// precedes its snapshot.
    fn reset(&mut self, reply: Option<oneshot::Sender<Result<()>>>) {
        self.engine.reset();
        if let Some(open) = self.open.as_mut() {
            open.end_rating = Some(self.engine.current_rating());
        }
        self.publish();
        let op = WriteOp::Reset { checkpoint: self.engine.checkpoint(), reply };
        if let Err(mpsc::error::SendError(op)) = self.ops.send(op) {
            error!("sync writer is gone, reset not persisted");
            if let WriteOp::Reset { reply: Some(reply), .. } = op {
                let _ = reply.send(Err(SrError::loop_unavailable("sync writer stopped")));
            }
        }
    }

    fn submit_sync(&mut self) {
        if let Some(open) = self.open.as_mut() {
            open.end_rating = Some(self.engine.current_rating());
        }
        let op = WriteOp::Sync { session: self.open.clone(), checkpoint: self.engine.checkpoint() };
        if !self.submit(op) {
            self.scheduler.record_failure();
        }
    }

    fn submit(&mut self, op: WriteOp) -> bool {
        let kind = op.kind();
        if self.ops.send(op).is_err() {
            error!(?kind, "sync writer is gone, write dropped");
            return false;
        }
        true
    }

    /// Publish a fresh snapshot when the engine or the open session changed.
    fn publish(&mut self) {
        let key = (self.engine.revision(), self.open.is_some());
        if self.published == Some(key) {
            return;
        }
        self.published = Some(key);
        let progress = self.open.as_ref().map(|open| SessionProgress {
            session_id: open.id.clone(),
            track_id: open.track_id,
            track_name: lookup_track(open.track_id).map(|track| track.name.to_string()),
            started_at: open.started_at,
            corners: open.corners,
            incidents: open.incidents,
            start_rating: open.start_rating,
            cpi: open.cpi(),
        });
        self.snapshots.send_replace(Arc::new(self.engine.snapshot(progress)));
    }

    async fn shutdown(
        mut self,
        writer: JoinHandle<()>,
        outcomes: mpsc::UnboundedReceiver<WriteOutcome>,
    ) -> LoopSummary {
        if let Some(event) = self.sessions.shutdown(Utc::now()) {
            self.apply(event, Instant::now());
        }
        self.publish();

        let summary = self.summary;
        // Closing the op channel lets the writer drain its backlog and exit.
        drop(self);
        drop(outcomes);
        if let Err(e) = writer.await {
            error!(error = %e, "sync writer task failed");
        }
        info!(
            datagrams = summary.datagrams,
            frames = summary.frames,
            decode_errors = summary.decode_errors,
            sessions = summary.sessions_closed,
            discarded = summary.sessions_discarded,
            "telemetry loop stopped"
        );
        summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::ReplaySource;
    use crate::store::SqliteStore;
    use crate::test_utils::{FlakyStore, PacketBuilder, clean_race, wing_damage};
    use crate::types::{EndReason, LicenseClass};

    fn memory_store() -> Arc<SqliteStore> {
        Arc::new(SqliteStore::open_in_memory().unwrap())
    }

    async fn run_to_end(
        datagrams: Vec<Vec<u8>>,
        store: Arc<dyn Store>,
        config: LoopConfig,
    ) -> (LoopSummary, Arc<RatingSnapshot>) {
        let channels =
            Driver::spawn(ReplaySource::from_datagrams(datagrams), store, config).await.unwrap();
        let summary = channels.task.await.unwrap();
        let snapshot = channels.snapshots.borrow().clone();
        (summary, snapshot)
    }

    #[tokio::test]
    async fn clean_race_is_recorded_and_raises_rating() {
        let builder = PacketBuilder::new(0xfeed);
        let mut datagrams = clean_race(&builder, 2);
        datagrams.push(builder.event(200.0, *b"SEND"));

        let store = memory_store();
        let (summary, snapshot) = run_to_end(datagrams, store.clone(), LoopConfig::default()).await;

        assert_eq!(summary.sessions_closed, 1);
        assert_eq!(summary.decode_errors, 0);
        assert!(snapshot.rating > 2.5);
        assert!(snapshot.session.is_none());

        let sessions = store.recent_sessions(10, 0).unwrap();
        assert_eq!(sessions.len(), 1);
        let race = &sessions[0];
        assert_eq!(race.id, "000000000000feed");
        assert_eq!(race.track_id, 11);
        assert_eq!(race.corners, 21);
        assert_eq!(race.end_reason, Some(EndReason::ResultObserved));
        assert!((race.end_rating.unwrap() - snapshot.rating).abs() < 1e-6);

        let profile = store.load_profile().unwrap().unwrap();
        assert!((profile.rating - snapshot.rating).abs() < 1e-6);
        assert_eq!(profile.races_completed, 1);
        assert_eq!(profile.total_corners, 21);
    }

    #[tokio::test]
    async fn collision_is_persisted_with_its_session() {
        let builder = PacketBuilder::new(7);
        let mut datagrams = clean_race(&builder, 1);
        datagrams.push(builder.car_status(100.0, 0, wing_damage(0)));
        datagrams.push(builder.car_status(100.5, 0, wing_damage(30)));
        datagrams.push(builder.lap_data(101.0, 0, 0.0, 2, false));
        datagrams.push(builder.event(102.0, *b"CHQF"));

        let store = memory_store();
        let (_, snapshot) = run_to_end(datagrams, store.clone(), LoopConfig::default()).await;

        let detail = store.session_detail(&crate::session::session_id_for(7)).unwrap().unwrap();
        assert_eq!(detail.incidents.len(), 1);
        assert_eq!(detail.session.incidents.collision, 1);
        assert_eq!(snapshot.total_incidents, 1);
        assert!(snapshot.actual_rate > 0.0);
    }

    #[tokio::test]
    async fn source_end_force_closes_open_race() {
        let builder = PacketBuilder::new(99);
        let store = memory_store();
        let (summary, _) =
            run_to_end(clean_race(&builder, 1), store.clone(), LoopConfig::default()).await;

        assert_eq!(summary.sessions_closed, 1);
        let sessions = store.recent_sessions(10, 0).unwrap();
        assert_eq!(sessions[0].end_reason, Some(EndReason::Shutdown));
        assert!(sessions[0].ended_at.is_some());
    }

    #[tokio::test]
    async fn garbage_is_dropped_without_stopping_the_loop() {
        let builder = PacketBuilder::new(3);
        let mut datagrams = vec![vec![0u8; 5], vec![0xff; 149]];
        datagrams.extend(clean_race(&builder, 1));

        let store = memory_store();
        let (summary, _) = run_to_end(datagrams, store.clone(), LoopConfig::default()).await;
        assert_eq!(summary.decode_errors, 2);
        assert_eq!(summary.sessions_closed, 1);
    }

    #[tokio::test]
    async fn profile_is_restored_on_startup() {
        let builder = PacketBuilder::new(1);
        let store = memory_store();
        let (_, first) =
            run_to_end(clean_race(&builder, 1), store.clone(), LoopConfig::default()).await;

        let (_, second) = run_to_end(Vec::new(), store.clone(), LoopConfig::default()).await;
        assert!((second.rating - first.rating).abs() < 1e-9);
        assert_eq!(second.window_len, first.window_len);
        assert_eq!(second.total_corners, first.total_corners);
    }

    #[tokio::test]
    async fn reset_on_start_returns_to_base_rating() {
        let builder = PacketBuilder::new(1);
        let store = memory_store();
        run_to_end(clean_race(&builder, 2), store.clone(), LoopConfig::default()).await;

        let config = LoopConfig { reset_on_start: true, ..LoopConfig::default() };
        let (_, snapshot) = run_to_end(Vec::new(), store.clone(), config).await;
        assert_eq!(snapshot.rating, 2.5);
        assert_eq!(snapshot.license, LicenseClass::C);
        assert_eq!(store.load_profile().unwrap().unwrap().rating, 2.5);
    }

    #[tokio::test]
    async fn reset_command_replies_after_the_store_write() {
        let store = memory_store();
        let (tx, rx) = mpsc::unbounded_channel::<Vec<u8>>();
        let source = ChannelSource(rx);
        let channels = Driver::spawn(source, store.clone(), LoopConfig::default()).await.unwrap();

        let (reply, response) = oneshot::channel();
        channels.commands.send(Command::ResetRating { reply }).await.unwrap();
        response.await.unwrap().unwrap();
        assert_eq!(store.load_profile().unwrap().unwrap().rating, 2.5);
        let live = channels.snapshots.borrow().clone();
        assert_eq!(live.revision, store.load_profile().unwrap().unwrap().revision);

        drop(tx);
        channels.task.await.unwrap();
    }

    #[tokio::test]
    async fn short_race_is_dropped_from_history() {
        let builder = PacketBuilder::new(0x5107);
        let mut datagrams = vec![builder.session(1.0, 10, 11, 5793)];
        for (i, d) in [0.0f32, 600.0, 1200.0].into_iter().enumerate() {
            datagrams.push(builder.lap_data(1.5 + i as f32 * 0.5, 0, d, 1, false));
        }
        datagrams.push(builder.event(3.0, *b"SEND"));

        let store = memory_store();
        let (summary, snapshot) = run_to_end(datagrams, store.clone(), LoopConfig::default()).await;
        assert_eq!(summary.sessions_closed, 0);
        assert_eq!(summary.sessions_discarded, 1);
        assert!(snapshot.session.is_none());

        assert!(store.recent_sessions(10, 0).unwrap().is_empty());
        assert!(store.track_stats().unwrap().is_empty());
        let profile = store.load_profile().unwrap().unwrap();
        assert_eq!(profile.races_completed, 0);
        assert_eq!(profile.total_distance_m, 0.0);
        // the corners still count toward the rating
        assert!(snapshot.total_corners > 0);
        assert_eq!(profile.total_corners, snapshot.total_corners);
        assert_eq!(profile.revision, snapshot.revision);
    }

    #[tokio::test]
    async fn race_at_minimum_length_is_recorded() {
        let builder = PacketBuilder::new(0x5108);
        let datagrams = vec![
            builder.session(1.0, 10, 11, 5793),
            builder.lap_data(30.0, 0, 600.0, 1, false),
            builder.event(61.0, *b"SEND"),
        ];

        let store = memory_store();
        let (summary, _) = run_to_end(datagrams, store.clone(), LoopConfig::default()).await;
        assert_eq!((summary.sessions_closed, summary.sessions_discarded), (1, 0));
        assert_eq!(store.load_profile().unwrap().unwrap().races_completed, 1);
        assert_eq!(store.track_stats().unwrap()[0].races, 1);
    }

    async fn eventually(what: &str, mut check: impl FnMut() -> bool) {
        let reached = tokio::time::timeout(Duration::from_secs(5), async {
            while !check() {
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        })
        .await;
        assert!(reached.is_ok(), "timed out waiting for {what}");
    }

    #[tokio::test]
    async fn store_follows_the_open_race_and_keeps_a_mid_race_reset() {
        let builder = PacketBuilder::new(0x1a9);
        let store = memory_store();
        let (tx, rx) = mpsc::unbounded_channel::<Vec<u8>>();
        let config = LoopConfig {
            sync: SyncConfig { interval_ms: 200, ..SyncConfig::default() },
            ..LoopConfig::default()
        };
        let channels = Driver::spawn(ChannelSource(rx), store.clone(), config).await.unwrap();
        let session_id = crate::session::session_id_for(0x1a9);

        for datagram in clean_race(&builder, 1) {
            tx.send(datagram).unwrap();
        }

        // periodic syncs catch the store up with the live snapshot while the race is open
        let snapshots = channels.snapshots.clone();
        eventually("a periodic sync of the full lap", || {
            let live = snapshots.borrow().clone();
            let stored = store.load_profile().unwrap().unwrap();
            live.session.as_ref().is_some_and(|s| s.corners == 10) && stored.revision == live.revision
        })
        .await;
        let live = channels.snapshots.borrow().clone();
        assert!(live.rating > 2.5);
        let stored = store.load_profile().unwrap().unwrap();
        assert!((stored.rating - live.rating).abs() < 1e-9);
        assert_eq!(stored.total_corners, live.total_corners);
        let row = store.session_detail(&session_id).unwrap().unwrap().session;
        assert!(row.ended_at.is_none());
        assert_eq!(Some(row.corners), live.session.as_ref().map(|s| s.corners));
        assert!((row.end_rating.unwrap() - live.rating).abs() < 1e-9);

        let (reply, response) = oneshot::channel();
        channels.commands.send(Command::ResetRating { reply }).await.unwrap();
        response.await.unwrap().unwrap();
        let reset = channels.snapshots.borrow().clone();
        assert_eq!(reset.rating, 2.5);
        assert!(reset.session.is_some());

        // later periodic syncs carry the reset state, never the older rating
        tokio::time::sleep(Duration::from_millis(700)).await;
        let stored = store.load_profile().unwrap().unwrap();
        assert_eq!(stored.rating, 2.5);
        assert_eq!(stored.revision, channels.snapshots.borrow().revision);
        let row = store.session_detail(&session_id).unwrap().unwrap().session;
        assert!(row.ended_at.is_none());
        assert_eq!(row.end_rating, Some(2.5));

        drop(tx);
        let summary = channels.task.await.unwrap();
        assert_eq!(summary.sessions_closed, 1);
        assert_eq!(store.load_profile().unwrap().unwrap().rating, 2.5);
    }

    #[tokio::test]
    async fn unreadable_profile_fails_startup() {
        let store = Arc::new(FlakyStore::new());
        store.fail_reads(true);
        let result =
            Driver::spawn(ReplaySource::from_datagrams(Vec::new()), store, LoopConfig::default())
                .await;
        assert!(matches!(result, Err(SrError::Store(_))));
    }

    #[test]
    fn car_index_is_validated() {
        let config = LoopConfig { car_index: Some(20), ..LoopConfig::default() };
        assert!(config.validate().is_err());
        let config = LoopConfig { car_index: Some(19), ..LoopConfig::default() };
        assert!(config.validate().is_ok());
    }

    /// Source fed by a test through a channel; ends when the sender drops.
    struct ChannelSource(mpsc::UnboundedReceiver<Vec<u8>>);

    #[async_trait::async_trait]
    impl TelemetrySource for ChannelSource {
        async fn next_datagram(&mut self) -> Result<Option<Datagram>> {
            Ok(self.0.recv().await.map(Datagram::now))
        }

        fn describe(&self) -> String {
            "channel".to_string()
        }

        fn send_rate_hz(&self) -> f64 {
            20.0
        }
    }
}
