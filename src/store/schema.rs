use rusqlite::{Connection, params};

use crate::types::TRACKS;

pub(crate) const SCHEMA_V1: &str = "
CREATE TABLE IF NOT EXISTS tracks (
    id INTEGER PRIMARY KEY,
    name TEXT NOT NULL,
    corners INTEGER NOT NULL CHECK (corners > 0)
);

CREATE TABLE IF NOT EXISTS sessions (
    id TEXT PRIMARY KEY,
    track_id INTEGER NOT NULL,
    session_type INTEGER NOT NULL,
    started_at TEXT NOT NULL,
    ended_at TEXT,
    corners INTEGER NOT NULL DEFAULT 0,
    off_track INTEGER NOT NULL DEFAULT 0,
    spin INTEGER NOT NULL DEFAULT 0,
    collision INTEGER NOT NULL DEFAULT 0,
    start_rating REAL NOT NULL,
    end_rating REAL,
    distance_m REAL NOT NULL DEFAULT 0,
    end_reason TEXT
);

CREATE INDEX IF NOT EXISTS idx_sessions_started_at ON sessions(started_at);
CREATE INDEX IF NOT EXISTS idx_sessions_track ON sessions(track_id);

CREATE TABLE IF NOT EXISTS incidents (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    session_id TEXT NOT NULL REFERENCES sessions(id) ON DELETE CASCADE,
    kind TEXT NOT NULL,
    weight REAL NOT NULL,
    occurred_at TEXT NOT NULL,
    corner_index INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_incidents_session ON incidents(session_id);

CREATE TABLE IF NOT EXISTS user_profile (
    id INTEGER PRIMARY KEY CHECK (id = 1),
    rating REAL NOT NULL,
    total_distance_m REAL NOT NULL DEFAULT 0,
    total_corners INTEGER NOT NULL DEFAULT 0,
    total_incidents INTEGER NOT NULL DEFAULT 0,
    races_completed INTEGER NOT NULL DEFAULT 0,
    window_json TEXT NOT NULL DEFAULT '[]',
    revision INTEGER NOT NULL DEFAULT 0,
    updated_at TEXT NOT NULL
);
";

pub(crate) const PRAGMAS: &str = "
PRAGMA journal_mode = WAL;
PRAGMA foreign_keys = ON;
PRAGMA busy_timeout = 5000;
";

pub(crate) fn migrate(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(SCHEMA_V1)?;
    let mut stmt =
        conn.prepare("INSERT OR IGNORE INTO tracks(id, name, corners) VALUES (?1, ?2, ?3)")?;
    for track in &TRACKS {
        stmt.execute(params![track.id, track.name, track.corners])?;
    }
    Ok(())
}
