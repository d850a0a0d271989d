//! Store synchronization: when to write, and how writes are ordered.
//!
//! [`SyncScheduler`] is pure timing logic owned by the telemetry loop. [`SyncWriter`] is a
//! single background task that applies [`WriteOp`]s in order on the blocking pool,
//! holding the [`WriteToken`] for each one. The token remembers the last committed engine
//! revision, so a profile write older than what is already stored is dropped.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::error::{Result, SrError, StoreError};
use crate::store::{CompletedRace, Store, SyncBatch};
use crate::types::{Incident, RatingCheckpoint, SessionRecord};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Minimum spacing of periodic writes while a session is open.
    pub interval_ms: u64,
    /// Closed sessions older than this are pruned at startup. `None` keeps everything.
    pub retention_days: Option<u32>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self { interval_ms: 2000, retention_days: None }
    }
}

impl SyncConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn validate(&self) -> Result<()> {
        if self.interval_ms == 0 {
            return Err(SrError::config("sync.interval_ms must be positive"));
        }
        Ok(())
    }
}

/// Decides when the loop should hand a periodic snapshot to the writer.
#[derive(Debug, Clone)]
pub struct SyncScheduler {
    interval: Duration,
    active: bool,
    last_write: Option<Instant>,
    in_flight: bool,
}

impl SyncScheduler {
    pub fn new(interval: Duration) -> Self {
        Self { interval, active: false, last_write: None, in_flight: false }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Session opened; its opening write counts as the first write.
    pub fn activate(&mut self, now: Instant) {
        self.active = true;
        self.last_write = Some(now);
    }

    pub fn deactivate(&mut self) {
        self.active = false;
    }

    pub fn is_due(&self, now: Instant) -> bool {
        self.active
            && !self.in_flight
            && self.last_write.is_none_or(|last| now.saturating_duration_since(last) >= self.interval)
    }

    /// Returns true and marks a write in flight when one is due.
    pub fn poll(&mut self, now: Instant) -> bool {
        if self.is_due(now) {
            self.in_flight = true;
            true
        } else {
            false
        }
    }

    pub fn record_success(&mut self, at: Instant) {
        self.in_flight = false;
        self.last_write = Some(at);
    }

    /// Leaves the last write time alone so the next tick is due again.
    pub fn record_failure(&mut self) {
        self.in_flight = false;
    }
}

/// Serializes store writes by engine revision.
#[derive(Debug)]
pub struct WriteToken {
    committed: Mutex<u64>,
}

impl WriteToken {
    pub fn new(committed_revision: u64) -> Self {
        Self { committed: Mutex::new(committed_revision) }
    }

    pub async fn committed_revision(&self) -> u64 {
        *self.committed.lock().await
    }
}

/// One unit of work for the writer.
#[derive(Debug)]
pub enum WriteOp {
    OpenSession(SessionRecord),
    AppendIncident(Incident),
    /// Periodic snapshot. `session` is `None` outside races.
    Sync { session: Option<SessionRecord>, checkpoint: RatingCheckpoint },
    CloseSession { session: SessionRecord, checkpoint: RatingCheckpoint, distance_m: f64 },
    /// Remove a race that ended too short to keep; the rating it moved is still saved.
    DiscardSession { session_id: String, checkpoint: RatingCheckpoint },
    Reset { checkpoint: RatingCheckpoint, reply: Option<oneshot::Sender<Result<()>>> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteKind {
    OpenSession,
    AppendIncident,
    Sync,
    CloseSession,
    DiscardSession,
    Reset,
}

impl WriteOp {
    pub fn kind(&self) -> WriteKind {
        match self {
            WriteOp::OpenSession(_) => WriteKind::OpenSession,
            WriteOp::AppendIncident(_) => WriteKind::AppendIncident,
            WriteOp::Sync { .. } => WriteKind::Sync,
            WriteOp::CloseSession { .. } => WriteKind::CloseSession,
            WriteOp::DiscardSession { .. } => WriteKind::DiscardSession,
            WriteOp::Reset { .. } => WriteKind::Reset,
        }
    }

    fn checkpoint(&self) -> Option<&RatingCheckpoint> {
        match self {
            WriteOp::Sync { checkpoint, .. }
            | WriteOp::CloseSession { checkpoint, .. }
            | WriteOp::DiscardSession { checkpoint, .. }
            | WriteOp::Reset { checkpoint, .. } => Some(checkpoint),
            WriteOp::OpenSession(_) | WriteOp::AppendIncident(_) => None,
        }
    }
}

/// Result of one write attempt, reported back to the loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteOutcome {
    pub kind: WriteKind,
    pub revision: Option<u64>,
    pub success: bool,
    pub at: Instant,
}

/// Applies write operations against a [`Store`] in submission order.
#[derive(Clone)]
pub struct SyncWriter {
    store: Arc<dyn Store>,
    token: Arc<WriteToken>,
    retry_interval: Duration,
}

impl SyncWriter {
    pub fn new(store: Arc<dyn Store>, committed_revision: u64, retry_interval: Duration) -> Self {
        Self { store, token: Arc::new(WriteToken::new(committed_revision)), retry_interval }
    }

    pub fn token(&self) -> Arc<WriteToken> {
        Arc::clone(&self.token)
    }

    /// Apply one operation under the write token.
    ///
    /// Replies to a pending reset whether the write succeeds or not. A failed reset is
    /// turned into a plain profile sync so the retry no longer carries the reply.
    pub async fn apply(&self, op: &mut WriteOp) -> std::result::Result<(), StoreError> {
        let mut committed = self.token.committed.lock().await;

        let checkpoint = op.checkpoint().filter(|cp| {
            let fresh = cp.revision >= *committed;
            if !fresh {
                debug!(
                    revision = cp.revision,
                    committed = *committed,
                    "dropping stale profile write"
                );
            }
            fresh
        });
        let revision = checkpoint.map(|cp| cp.revision);

        let store = Arc::clone(&self.store);
        let call = match &*op {
            WriteOp::OpenSession(session) => WriteCall::Session(session.clone()),
            WriteOp::AppendIncident(incident) => WriteCall::Incident(incident.clone()),
            WriteOp::Sync { session, .. } => WriteCall::Batch(SyncBatch {
                session: session.clone(),
                checkpoint: checkpoint.cloned(),
                completed_race: None,
                discarded_session: None,
            }),
            WriteOp::CloseSession { session, distance_m, .. } => WriteCall::Batch(SyncBatch {
                session: Some(session.clone()),
                checkpoint: checkpoint.cloned(),
                completed_race: Some(CompletedRace { distance_m: *distance_m }),
                discarded_session: None,
            }),
            WriteOp::DiscardSession { session_id, .. } => WriteCall::Batch(SyncBatch {
                session: None,
                checkpoint: checkpoint.cloned(),
                completed_race: None,
                discarded_session: Some(session_id.clone()),
            }),
            WriteOp::Reset { .. } => WriteCall::Batch(SyncBatch {
                session: None,
                checkpoint: checkpoint.cloned(),
                completed_race: None,
                discarded_session: None,
            }),
        };

        let result = tokio::task::spawn_blocking(move || call.run(store.as_ref()))
            .await
            .unwrap_or_else(|join| Err(StoreError::write("writer task", join.to_string())));

        if result.is_ok()
            && let Some(revision) = revision
        {
            *committed = revision;
        }
        drop(committed);

        let mut retry_as = None;
        if let WriteOp::Reset { checkpoint, reply } = &mut *op {
            if let Some(reply) = reply.take() {
                let response = match &result {
                    Ok(()) => Ok(()),
                    Err(e) => Err(SrError::store_write("reset", e.to_string())),
                };
                let _ = reply.send(response);
            }
            if result.is_err() {
                retry_as = Some(WriteOp::Sync { session: None, checkpoint: checkpoint.clone() });
            }
        }
        if let Some(retry) = retry_as {
            *op = retry;
        }
        result
    }

    /// Run the writer until `ops` closes, then make one last attempt at anything still queued.
    pub fn spawn(
        self,
        ops: mpsc::UnboundedReceiver<WriteOp>,
        outcomes: mpsc::UnboundedSender<WriteOutcome>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move { self.run(ops, outcomes).await })
    }

    async fn run(
        self,
        mut ops: mpsc::UnboundedReceiver<WriteOp>,
        outcomes: mpsc::UnboundedSender<WriteOutcome>,
    ) {
        info!("sync writer started");
        let mut backlog: VecDeque<WriteOp> = VecDeque::new();
        let mut retry_at: Option<Instant> = None;
        let mut open = true;

        while open || !backlog.is_empty() {
            if open {
                let deadline = retry_at;
                let wait = async move {
                    match deadline {
                        Some(at) => tokio::time::sleep_until(at).await,
                        None => std::future::pending().await,
                    }
                };
                tokio::select! {
                    op = ops.recv() => match op {
                        Some(op) => enqueue(&mut backlog, op),
                        None => {
                            open = false;
                            retry_at = None;
                        }
                    },
                    _ = wait => retry_at = None,
                }
                while let Ok(op) = ops.try_recv() {
                    enqueue(&mut backlog, op);
                }
            }
            if retry_at.is_some() {
                continue;
            }

            while let Some(mut op) = backlog.pop_front() {
                let kind = op.kind();
                let revision = op.checkpoint().map(|cp| cp.revision);
                let result = self.apply(&mut op).await;
                let _ = outcomes.send(WriteOutcome {
                    kind,
                    revision,
                    success: result.is_ok(),
                    at: Instant::now(),
                });
                if let Err(e) = result {
                    if open {
                        warn!(?kind, error = %e, "store write failed, will retry");
                        backlog.push_front(op);
                        retry_at = Some(Instant::now() + self.retry_interval);
                    } else {
                        error!(?kind, error = %e, "store write failed during shutdown, dropped");
                    }
                    break;
                }
            }
        }
        info!("sync writer stopped");
    }
}

/// Queue an op, dropping older periodic syncs the new one supersedes.
fn enqueue(backlog: &mut VecDeque<WriteOp>, op: WriteOp) {
    if matches!(op, WriteOp::Sync { .. }) {
        backlog.retain(|queued| !matches!(queued, WriteOp::Sync { .. }));
    }
    backlog.push_back(op);
}

enum WriteCall {
    Session(SessionRecord),
    Incident(Incident),
    Batch(SyncBatch),
}

impl WriteCall {
    fn run(self, store: &dyn Store) -> std::result::Result<(), StoreError> {
        match self {
            WriteCall::Session(session) => store.upsert_session(&session),
            WriteCall::Incident(incident) => store.append_incident(&incident),
            WriteCall::Batch(batch) => store.write_sync(&batch),
        }
    }
}
