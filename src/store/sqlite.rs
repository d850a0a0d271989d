//! SQLite store backed by `rusqlite`.

use chrono::{DateTime, SecondsFormat, Utc};
use parking_lot::Mutex;
use rusqlite::{Connection, OptionalExtension, Row, params};
use std::path::Path;
use tracing::{debug, info};

use super::schema::{PRAGMAS, migrate};
use super::{RatingPoint, SessionDetail, Store, SyncBatch, TrackStats};
use crate::error::StoreError;
use crate::rating::BASE_RATING;
use crate::types::{
    EndReason, Incident, IncidentCounts, IncidentKind, SessionRecord, UserProfile,
};

/// SQLite implementation of [`Store`].
///
/// File databases get a second read-only connection so API reads never queue behind
/// the writer; WAL lets both proceed. In-memory databases share one connection.
pub struct SqliteStore {
    writer: Mutex<Connection>,
    reader: Option<Mutex<Connection>>,
}

impl SqliteStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| StoreError::write("create_dir", e))?;
        }
        let writer = Connection::open(path).map_err(|e| StoreError::write("open", e))?;
        writer.execute_batch(PRAGMAS).map_err(|e| StoreError::write("pragmas", e))?;
        migrate(&writer).map_err(|e| StoreError::write("migrate", e))?;

        let reader = Connection::open(path).map_err(|e| StoreError::read("open", e))?;
        reader
            .execute_batch("PRAGMA busy_timeout = 5000; PRAGMA query_only = ON;")
            .map_err(|e| StoreError::read("pragmas", e))?;

        let store = Self { writer: Mutex::new(writer), reader: Some(Mutex::new(reader)) };
        store.seed_profile()?;
        info!(path = %path.display(), "history database opened");
        Ok(store)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory().map_err(|e| StoreError::write("open", e))?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")
            .map_err(|e| StoreError::write("pragmas", e))?;
        migrate(&conn).map_err(|e| StoreError::write("migrate", e))?;
        let store = Self { writer: Mutex::new(conn), reader: None };
        store.seed_profile()?;
        Ok(store)
    }

    fn seed_profile(&self) -> Result<(), StoreError> {
        let conn = self.writer.lock();
        conn.execute(
            "INSERT OR IGNORE INTO user_profile(id, rating, updated_at) VALUES (1, ?1, ?2)",
            params![BASE_RATING, format_ts(Utc::now())],
        )
        .map_err(|e| StoreError::write("seed_profile", e))?;
        Ok(())
    }

    fn with_reader<T>(
        &self,
        operation: &'static str,
        f: impl FnOnce(&Connection) -> rusqlite::Result<T>,
    ) -> Result<T, StoreError> {
        let lock = self.reader.as_ref().unwrap_or(&self.writer);
        let conn = lock.lock();
        f(&conn).map_err(|e| StoreError::read(operation, e))
    }
}

fn format_ts(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

fn conversion_error(
    idx: usize,
    ty: rusqlite::types::Type,
    message: String,
) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(
        idx,
        ty,
        Box::new(std::io::Error::new(std::io::ErrorKind::InvalidData, message)),
    )
}

fn parse_ts(raw: &str, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| conversion_error(idx, rusqlite::types::Type::Text, format!("invalid timestamp {raw}: {e}")))
}

fn non_negative(value: i64, idx: usize) -> rusqlite::Result<u64> {
    u64::try_from(value).map_err(|_| {
        conversion_error(idx, rusqlite::types::Type::Integer, format!("negative counter {value}"))
    })
}

const SESSION_COLUMNS: &str = "id, track_id, session_type, started_at, ended_at, corners, \
     off_track, spin, collision, start_rating, end_rating, distance_m, end_reason";

fn parse_session_row(row: &Row<'_>) -> rusqlite::Result<SessionRecord> {
    let started_at: String = row.get(3)?;
    let ended_at: Option<String> = row.get(4)?;
    let end_reason: Option<String> = row.get(12)?;
    Ok(SessionRecord {
        id: row.get(0)?,
        track_id: row.get(1)?,
        session_type: row.get(2)?,
        started_at: parse_ts(&started_at, 3)?,
        ended_at: ended_at.as_deref().map(|raw| parse_ts(raw, 4)).transpose()?,
        corners: non_negative(row.get(5)?, 5)?,
        incidents: IncidentCounts { off_track: row.get(6)?, spin: row.get(7)?, collision: row.get(8)? },
        start_rating: row.get(9)?,
        end_rating: row.get(10)?,
        distance_m: row.get(11)?,
        end_reason: end_reason
            .as_deref()
            .map(|raw| {
                raw.parse::<EndReason>()
                    .map_err(|e| conversion_error(12, rusqlite::types::Type::Text, e))
            })
            .transpose()?,
    })
}

fn parse_incident_row(row: &Row<'_>) -> rusqlite::Result<Incident> {
    let kind: String = row.get(1)?;
    let occurred_at: String = row.get(3)?;
    Ok(Incident {
        session_id: row.get(0)?,
        kind: kind
            .parse::<IncidentKind>()
            .map_err(|e| conversion_error(1, rusqlite::types::Type::Text, e))?,
        weight: row.get(2)?,
        timestamp: parse_ts(&occurred_at, 3)?,
        corner_index: non_negative(row.get(4)?, 4)?,
    })
}

fn upsert_session_row(conn: &Connection, s: &SessionRecord) -> rusqlite::Result<usize> {
    conn.execute(
        "INSERT INTO sessions(id, track_id, session_type, started_at, ended_at, corners,
                              off_track, spin, collision, start_rating, end_rating, distance_m, end_reason)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
         ON CONFLICT(id) DO UPDATE SET
             ended_at = excluded.ended_at,
             corners = excluded.corners,
             off_track = excluded.off_track,
             spin = excluded.spin,
             collision = excluded.collision,
             end_rating = excluded.end_rating,
             distance_m = excluded.distance_m,
             end_reason = excluded.end_reason",
        params![
            s.id,
            s.track_id,
            s.session_type,
            format_ts(s.started_at),
            s.ended_at.map(format_ts),
            s.corners as i64,
            s.incidents.off_track,
            s.incidents.spin,
            s.incidents.collision,
            s.start_rating,
            s.end_rating,
            s.distance_m,
            s.end_reason.map(EndReason::as_str),
        ],
    )
}

impl Store for SqliteStore {
    fn upsert_session(&self, session: &SessionRecord) -> Result<(), StoreError> {
        let conn = self.writer.lock();
        upsert_session_row(&conn, session).map_err(|e| StoreError::write("upsert_session", e))?;
        Ok(())
    }

    fn append_incident(&self, incident: &Incident) -> Result<(), StoreError> {
        let conn = self.writer.lock();
        conn.execute(
            "INSERT INTO incidents(session_id, kind, weight, occurred_at, corner_index)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                incident.session_id,
                incident.kind.as_str(),
                incident.weight,
                format_ts(incident.timestamp),
                incident.corner_index as i64,
            ],
        )
        .map_err(|e| StoreError::write("append_incident", e))?;
        Ok(())
    }

    fn write_sync(&self, batch: &SyncBatch) -> Result<(), StoreError> {
        let mut conn = self.writer.lock();
        let tx = conn.transaction().map_err(|e| StoreError::write("write_sync", e))?;
        let now = format_ts(Utc::now());

        if let Some(session) = &batch.session {
            upsert_session_row(&tx, session).map_err(|e| StoreError::write("write_sync", e))?;
        }

        if let Some(checkpoint) = &batch.checkpoint {
            let window_json = serde_json::to_string(&checkpoint.window)
                .map_err(|e| StoreError::write("write_sync", e))?;
            tx.execute(
                "UPDATE user_profile SET
                     rating = ?1,
                     total_corners = ?2,
                     total_incidents = ?3,
                     window_json = ?4,
                     revision = ?5,
                     updated_at = ?6
                 WHERE id = 1 AND revision <= ?5",
                params![
                    checkpoint.rating,
                    checkpoint.total_corners as i64,
                    checkpoint.total_incidents as i64,
                    window_json,
                    checkpoint.revision as i64,
                    now,
                ],
            )
            .map_err(|e| StoreError::write("write_sync", e))?;
        }

        if let Some(race) = &batch.completed_race {
            tx.execute(
                "UPDATE user_profile SET
                     total_distance_m = total_distance_m + ?1,
                     races_completed = races_completed + 1,
                     updated_at = ?2
                 WHERE id = 1",
                params![race.distance_m, now],
            )
            .map_err(|e| StoreError::write("write_sync", e))?;
        }

        if let Some(id) = &batch.discarded_session {
            tx.execute("DELETE FROM sessions WHERE id = ?1", params![id])
                .map_err(|e| StoreError::write("write_sync", e))?;
        }

        tx.commit().map_err(|e| StoreError::write("write_sync", e))?;
        debug!(
            session = batch.session.as_ref().map(|s| s.id.as_str()),
            revision = batch.checkpoint.as_ref().map(|c| c.revision),
            completed = batch.completed_race.is_some(),
            discarded = batch.discarded_session.as_deref(),
            "sync batch committed"
        );
        Ok(())
    }

    fn load_profile(&self) -> Result<Option<UserProfile>, StoreError> {
        let row = self.with_reader("load_profile", |conn| {
            conn.query_row(
                "SELECT rating, total_distance_m, total_corners, total_incidents, races_completed,
                        window_json, revision, updated_at
                 FROM user_profile WHERE id = 1",
                [],
                |row| {
                    let updated_at: String = row.get(7)?;
                    let window_json: String = row.get(5)?;
                    Ok((
                        UserProfile {
                            rating: row.get(0)?,
                            total_distance_m: row.get(1)?,
                            total_corners: non_negative(row.get(2)?, 2)?,
                            total_incidents: non_negative(row.get(3)?, 3)?,
                            races_completed: non_negative(row.get(4)?, 4)?,
                            window: Vec::new(),
                            revision: non_negative(row.get(6)?, 6)?,
                            updated_at: parse_ts(&updated_at, 7)?,
                        },
                        window_json,
                    ))
                },
            )
            .optional()
        })?;

        row.map(|(mut profile, window_json)| {
            profile.window = serde_json::from_str(&window_json)
                .map_err(|e| StoreError::corrupt("user_profile.window_json", e.to_string()))?;
            Ok(profile)
        })
        .transpose()
    }

    fn recent_sessions(&self, limit: u32, offset: u32) -> Result<Vec<SessionRecord>, StoreError> {
        self.with_reader("recent_sessions", |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {SESSION_COLUMNS} FROM sessions ORDER BY started_at DESC LIMIT ?1 OFFSET ?2"
            ))?;
            let rows = stmt.query_map(params![limit, offset], parse_session_row)?;
            rows.collect()
        })
    }

    fn session_detail(&self, id: &str) -> Result<Option<SessionDetail>, StoreError> {
        self.with_reader("session_detail", |conn| {
            // one read transaction so the session and its incidents agree
            conn.execute_batch("BEGIN")?;
            let result = (|| -> rusqlite::Result<Option<SessionDetail>> {
                let session = conn
                    .query_row(
                        &format!("SELECT {SESSION_COLUMNS} FROM sessions WHERE id = ?1"),
                        params![id],
                        parse_session_row,
                    )
                    .optional()?;
                let Some(session) = session else {
                    return Ok(None);
                };
                let mut stmt = conn.prepare(
                    "SELECT session_id, kind, weight, occurred_at, corner_index
                     FROM incidents WHERE session_id = ?1 ORDER BY id ASC",
                )?;
                let incidents = stmt
                    .query_map(params![id], parse_incident_row)?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                let mut breakdown = IncidentCounts::default();
                for incident in &incidents {
                    breakdown.record(incident.kind);
                }
                Ok(Some(SessionDetail { session, incidents, breakdown }))
            })();
            conn.execute_batch("COMMIT")?;
            result
        })
    }

    fn rating_series(&self, limit: u32) -> Result<Vec<RatingPoint>, StoreError> {
        let mut points = self.with_reader("rating_series", |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, ended_at, end_rating FROM sessions
                 WHERE ended_at IS NOT NULL AND end_rating IS NOT NULL
                 ORDER BY ended_at DESC LIMIT ?1",
            )?;
            let rows = stmt.query_map(params![limit], |row| {
                let ended_at: String = row.get(1)?;
                Ok(RatingPoint { session_id: row.get(0)?, at: parse_ts(&ended_at, 1)?, rating: row.get(2)? })
            })?;
            rows.collect::<rusqlite::Result<Vec<_>>>()
        })?;
        points.reverse();
        Ok(points)
    }

    fn track_stats(&self) -> Result<Vec<TrackStats>, StoreError> {
        self.with_reader("track_stats", |conn| {
            let mut stmt = conn.prepare(
                "SELECT s.track_id, t.name, COUNT(*),
                        COALESCE(AVG(s.off_track + s.spin + s.collision), 0.0),
                        COALESCE(AVG(s.end_rating - s.start_rating), 0.0)
                 FROM sessions s LEFT JOIN tracks t ON t.id = s.track_id
                 WHERE s.ended_at IS NOT NULL
                 GROUP BY s.track_id
                 ORDER BY COUNT(*) DESC, s.track_id ASC",
            )?;
            let rows = stmt.query_map([], |row| {
                Ok(TrackStats {
                    track_id: row.get(0)?,
                    track_name: row.get(1)?,
                    races: non_negative(row.get(2)?, 2)?,
                    mean_incidents: row.get(3)?,
                    mean_rating_delta: row.get(4)?,
                })
            })?;
            rows.collect()
        })
    }

    fn prune_before(&self, cutoff: DateTime<Utc>) -> Result<usize, StoreError> {
        let conn = self.writer.lock();
        let removed = conn
            .execute(
                "DELETE FROM sessions WHERE ended_at IS NOT NULL AND ended_at < ?1",
                params![format_ts(cutoff)],
            )
            .map_err(|e| StoreError::write("prune_before", e))?;
        if removed > 0 {
            info!(removed, cutoff = %cutoff, "pruned old sessions");
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::CompletedRace;
    use crate::types::RatingCheckpoint;
    use chrono::TimeDelta;

    fn session(id: &str, track_id: i8, started_at: DateTime<Utc>) -> SessionRecord {
        SessionRecord {
            id: id.into(),
            track_id,
            session_type: 10,
            started_at,
            ended_at: None,
            corners: 0,
            incidents: IncidentCounts::default(),
            start_rating: 2.5,
            end_rating: None,
            distance_m: 0.0,
            end_reason: None,
        }
    }

    fn closed(mut s: SessionRecord, end_rating: f64, incidents: IncidentCounts) -> SessionRecord {
        s.ended_at = Some(s.started_at + TimeDelta::minutes(30));
        s.end_rating = Some(end_rating);
        s.incidents = incidents;
        s.corners = 100;
        s.end_reason = Some(EndReason::ResultObserved);
        s
    }

    fn checkpoint(rating: f64, revision: u64) -> RatingCheckpoint {
        RatingCheckpoint {
            rating,
            window: vec![0.0, 4.0, 0.0],
            total_corners: 3,
            total_incidents: 1,
            revision,
        }
    }

    #[test]
    fn fresh_store_has_base_profile_and_tracks() {
        let store = SqliteStore::open_in_memory().unwrap();
        let profile = store.load_profile().unwrap().unwrap();
        assert_eq!(profile.rating, BASE_RATING);
        assert!(profile.window.is_empty());
        assert_eq!(profile.revision, 0);
    }

    #[test]
    fn session_round_trips_with_nanosecond_timestamps() {
        let store = SqliteStore::open_in_memory().unwrap();
        let started = DateTime::parse_from_rfc3339("2026-03-01T12:00:00.123456789Z")
            .unwrap()
            .with_timezone(&Utc);
        let record = closed(
            session("00000000000000aa", 7, started),
            2.612345678,
            IncidentCounts { off_track: 1, spin: 0, collision: 1 },
        );
        store.upsert_session(&record).unwrap();

        let detail = store.session_detail("00000000000000aa").unwrap().unwrap();
        assert_eq!(detail.session, record);
        assert!(store.session_detail("missing").unwrap().is_none());
    }

    #[test]
    fn incidents_require_their_session() {
        let store = SqliteStore::open_in_memory().unwrap();
        let orphan = Incident {
            session_id: "nope".into(),
            kind: IncidentKind::OffTrack,
            weight: 1.0,
            timestamp: Utc::now(),
            corner_index: 0,
        };
        let err = store.append_incident(&orphan).unwrap_err();
        assert!(err.is_write());
    }

    #[test]
    fn detail_breakdown_counts_incident_rows() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.upsert_session(&session("s1", 0, Utc::now())).unwrap();
        for (kind, corner) in
            [(IncidentKind::OffTrack, 1), (IncidentKind::Collision, 4), (IncidentKind::OffTrack, 9)]
        {
            store
                .append_incident(&Incident {
                    session_id: "s1".into(),
                    kind,
                    weight: kind.weight(),
                    timestamp: Utc::now(),
                    corner_index: corner,
                })
                .unwrap();
        }
        let detail = store.session_detail("s1").unwrap().unwrap();
        assert_eq!(detail.incidents.len(), 3);
        assert_eq!(detail.breakdown, IncidentCounts { off_track: 2, spin: 0, collision: 1 });
        assert_eq!(detail.incidents[1].corner_index, 4);
    }

    #[test]
    fn stale_checkpoints_do_not_overwrite_newer_ones() {
        let store = SqliteStore::open_in_memory().unwrap();
        store
            .write_sync(&SyncBatch { checkpoint: Some(checkpoint(3.1, 10)), ..Default::default() })
            .unwrap();
        store
            .write_sync(&SyncBatch { checkpoint: Some(checkpoint(1.2, 4)), ..Default::default() })
            .unwrap();

        let profile = store.load_profile().unwrap().unwrap();
        assert_eq!(profile.rating, 3.1);
        assert_eq!(profile.revision, 10);
        assert_eq!(profile.window, vec![0.0, 4.0, 0.0]);
    }

    #[test]
    fn completed_race_updates_lifetime_aggregates() {
        let store = SqliteStore::open_in_memory().unwrap();
        let record = closed(session("s1", 3, Utc::now()), 2.7, IncidentCounts::default());
        let batch = SyncBatch {
            session: Some(record),
            checkpoint: Some(checkpoint(2.7, 2)),
            completed_race: Some(CompletedRace { distance_m: 5400.0 }),
            discarded_session: None,
        };
        store.write_sync(&batch).unwrap();

        let profile = store.load_profile().unwrap().unwrap();
        assert_eq!(profile.races_completed, 1);
        assert_eq!(profile.total_distance_m, 5400.0);
        assert_eq!(profile.rating, 2.7);
    }

    #[test]
    fn discarded_session_leaves_no_trace_but_keeps_the_rating() {
        let store = SqliteStore::open_in_memory().unwrap();
        let short = session("short", 11, Utc::now());
        store.upsert_session(&short).unwrap();
        store
            .append_incident(&Incident {
                session_id: "short".into(),
                kind: IncidentKind::OffTrack,
                weight: 1.0,
                timestamp: short.started_at,
                corner_index: 0,
            })
            .unwrap();

        store
            .write_sync(&SyncBatch {
                checkpoint: Some(checkpoint(2.4, 3)),
                discarded_session: Some("short".into()),
                ..Default::default()
            })
            .unwrap();

        assert!(store.session_detail("short").unwrap().is_none());
        assert!(store.recent_sessions(10, 0).unwrap().is_empty());
        assert!(store.track_stats().unwrap().is_empty());
        let profile = store.load_profile().unwrap().unwrap();
        assert_eq!(profile.races_completed, 0);
        assert_eq!(profile.rating, 2.4);
    }

    #[test]
    fn history_series_and_track_aggregates() {
        let store = SqliteStore::open_in_memory().unwrap();
        let t0 = Utc::now() - TimeDelta::days(3);
        let sessions = [
            closed(session("a", 11, t0), 2.6, IncidentCounts { off_track: 2, spin: 0, collision: 0 }),
            closed(
                session("b", 11, t0 + TimeDelta::hours(1)),
                2.4,
                IncidentCounts { off_track: 0, spin: 0, collision: 2 },
            ),
            closed(session("c", 5, t0 + TimeDelta::hours(2)), 2.9, IncidentCounts::default()),
        ];
        for s in &sessions {
            store.upsert_session(s).unwrap();
        }
        store.upsert_session(&session("open", 5, t0 + TimeDelta::hours(3))).unwrap();

        let recent = store.recent_sessions(2, 0).unwrap();
        assert_eq!(recent.iter().map(|s| s.id.as_str()).collect::<Vec<_>>(), ["open", "c"]);
        let page2 = store.recent_sessions(2, 2).unwrap();
        assert_eq!(page2.iter().map(|s| s.id.as_str()).collect::<Vec<_>>(), ["b", "a"]);

        let series = store.rating_series(2).unwrap();
        assert_eq!(series.iter().map(|p| p.session_id.as_str()).collect::<Vec<_>>(), ["b", "c"]);

        let stats = store.track_stats().unwrap();
        assert_eq!(stats.len(), 2);
        let monza = &stats[0];
        assert_eq!(monza.track_id, 11);
        assert_eq!(monza.track_name.as_deref(), Some("Monza"));
        assert_eq!(monza.races, 2);
        assert!((monza.mean_incidents - 2.0).abs() < 1e-9);
        assert!((monza.mean_rating_delta - 0.0).abs() < 1e-9);
    }

    #[test]
    fn prune_removes_old_closed_sessions_and_their_incidents() {
        let store = SqliteStore::open_in_memory().unwrap();
        let old = closed(session("old", 0, Utc::now() - TimeDelta::days(400)), 2.5, IncidentCounts::default());
        store.upsert_session(&old).unwrap();
        store
            .append_incident(&Incident {
                session_id: "old".into(),
                kind: IncidentKind::Collision,
                weight: 4.0,
                timestamp: old.started_at,
                corner_index: 1,
            })
            .unwrap();
        store.upsert_session(&session("live", 0, Utc::now() - TimeDelta::days(400))).unwrap();

        let removed = store.prune_before(Utc::now() - TimeDelta::days(365)).unwrap();
        assert_eq!(removed, 1);
        assert!(store.session_detail("old").unwrap().is_none());
        assert!(store.session_detail("live").unwrap().is_some());
    }

    #[test]
    fn file_store_reads_through_separate_connection() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("history.db");
        let store = SqliteStore::open(&path).unwrap();
        store.upsert_session(&session("s1", 1, Utc::now())).unwrap();
        assert_eq!(store.recent_sessions(10, 0).unwrap().len(), 1);
        drop(store);

        let reopened = SqliteStore::open(&path).unwrap();
        assert_eq!(reopened.recent_sessions(10, 0).unwrap().len(), 1);
    }
}
