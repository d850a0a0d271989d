//! Console overlay.
//!
//! A stand-in for an in-game overlay: consumes the throttled snapshot stream and logs a
//! one-line summary whenever what it would display changes.

use chrono::Utc;
use futures::{Stream, StreamExt};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::types::RatingSnapshot;

/// What the overlay shows for one snapshot.
pub fn render(snapshot: &RatingSnapshot) -> String {
    let mut line = format!("SR {:.2} {}", snapshot.rating, snapshot.license);
    if let Some(session) = &snapshot.session {
        let track = session.track_name.as_deref().unwrap_or("unknown track");
        let cpi = session.cpi.map_or_else(|| "-".to_string(), |cpi| format!("{cpi:.1}"));
        line.push_str(&format!(
            " | {track} | corners {} | incidents {} | CPI {cpi}",
            session.corners,
            session.incidents.total()
        ));
    }
    line
}

/// Log overlay lines until `updates` ends or `cancel` fires. Returns the number of lines
/// logged.
pub fn spawn<S>(updates: S, cancel: CancellationToken) -> JoinHandle<u64>
where
    S: Stream<Item = Arc<RatingSnapshot>> + Send + Unpin + 'static,
{
    tokio::spawn(run(updates, cancel))
}

async fn run<S>(mut updates: S, cancel: CancellationToken) -> u64
where
    S: Stream<Item = Arc<RatingSnapshot>> + Unpin,
{
    let mut last_line = String::new();
    let mut lines = 0u64;
    loop {
        let snapshot = tokio::select! {
            _ = cancel.cancelled() => break,
            next = updates.next() => match next {
                Some(snapshot) => snapshot,
                None => break,
            },
        };
        let line = render(&snapshot);
        if line != last_line {
            let age_ms = (Utc::now() - snapshot.updated_at).num_milliseconds().max(0);
            info!(target: "srtrack::overlay", revision = snapshot.revision, age_ms, "{line}");
            last_line = line;
            lines += 1;
        }
    }
    debug!(lines, "overlay stopped");
    lines
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rating::RatingEngine;
    use crate::types::{IncidentCounts, IncidentKind, SessionProgress};

    fn progress(corners: u64, incidents: IncidentCounts) -> SessionProgress {
        SessionProgress {
            session_id: "00000000000000aa".to_string(),
            track_id: 11,
            track_name: Some("Monza".to_string()),
            started_at: Utc::now(),
            corners,
            incidents,
            start_rating: 2.5,
            cpi: (incidents.total() > 0).then(|| corners as f64 / f64::from(incidents.total())),
        }
    }

    #[test]
    fn renders_rating_and_session() {
        let engine = RatingEngine::default();
        assert_eq!(render(&engine.snapshot(None)), "SR 2.50 C");

        let mut incidents = IncidentCounts::default();
        incidents.record(IncidentKind::OffTrack);
        incidents.record(IncidentKind::OffTrack);
        let line = render(&engine.snapshot(Some(progress(21, incidents))));
        assert_eq!(line, "SR 2.50 C | Monza | corners 21 | incidents 2 | CPI 10.5");

        let line = render(&engine.snapshot(Some(progress(4, IncidentCounts::default()))));
        assert!(line.ends_with("CPI -"));
    }

    #[tokio::test]
    async fn logs_only_changes() {
        let mut engine = RatingEngine::default();
        let first = Arc::new(engine.snapshot(None));
        let repeat = Arc::new(engine.snapshot(None));
        for _ in 0..10 {
            engine.register_clean_corner();
        }
        let moved = Arc::new(engine.snapshot(None));

        let updates = futures::stream::iter(vec![first, repeat, moved]);
        let lines = spawn(updates, CancellationToken::new()).await.unwrap();
        assert_eq!(lines, 2);
    }
}
