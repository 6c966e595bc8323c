//! Base store layout and read-only store classification.
//!
//! The base layout is the oldest shape a store can have (the pre-versioning
//! baseline). Everything newer is added by `migrations`.

use anyhow::Result;
use rusqlite::{Connection, OpenFlags};
use serde::Serialize;
use std::path::Path;

use super::migrations::CURRENT_VERSION;

/// Tables without which a file is not a usable store.
pub const REQUIRED_TABLES: &[&str] = &["sessions", "recordings", "segments", "bats"];

pub(crate) const BASE_SCHEMA: &str = r#"
    CREATE TABLE IF NOT EXISTS sessions (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        session_tag TEXT NOT NULL UNIQUE,
        title TEXT,
        location TEXT,
        latitude REAL,
        longitude REAL,
        start_date TEXT NOT NULL,
        start_time TEXT,
        end_date TEXT,
        end_time TEXT,
        operator TEXT,
        equipment TEXT,
        microphone TEXT,
        weather TEXT,
        notes TEXT,
        original_file_path TEXT
    );

    CREATE INDEX IF NOT EXISTS idx_sessions_start_date ON sessions(start_date);

    CREATE TABLE IF NOT EXISTS recordings (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        session_id INTEGER NOT NULL,
        recording_name TEXT NOT NULL,
        recording_date TEXT,
        start_time TEXT,
        end_time TEXT,
        latitude REAL,
        longitude REAL,
        notes TEXT,
        FOREIGN KEY (session_id) REFERENCES sessions(id)
    );

    CREATE INDEX IF NOT EXISTS idx_recordings_session ON recordings(session_id);

    CREATE TABLE IF NOT EXISTS segments (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        recording_id INTEGER NOT NULL,
        start_offset_ms INTEGER NOT NULL DEFAULT 0,
        end_offset_ms INTEGER NOT NULL DEFAULT 0,
        comment TEXT NOT NULL DEFAULT '',
        FOREIGN KEY (recording_id) REFERENCES recordings(id)
    );

    CREATE INDEX IF NOT EXISTS idx_segments_recording ON segments(recording_id);

    CREATE TABLE IF NOT EXISTS bats (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        name TEXT NOT NULL,
        genus TEXT NOT NULL DEFAULT '',
        species TEXT NOT NULL DEFAULT '',
        notes TEXT
    );

    CREATE TABLE IF NOT EXISTS bat_tags (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        bat_id INTEGER NOT NULL,
        tag TEXT NOT NULL,
        sort_index INTEGER NOT NULL DEFAULT 0,
        FOREIGN KEY (bat_id) REFERENCES bats(id)
    );

    CREATE INDEX IF NOT EXISTS idx_bat_tags_bat ON bat_tags(bat_id);

    -- Image attachments
    CREATE TABLE IF NOT EXISTS images (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        data BLOB NOT NULL,
        description TEXT NOT NULL DEFAULT ''
    );

    CREATE TABLE IF NOT EXISTS bat_segment_links (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        segment_id INTEGER NOT NULL,
        bat_id INTEGER NOT NULL,
        FOREIGN KEY (segment_id) REFERENCES segments(id),
        FOREIGN KEY (bat_id) REFERENCES bats(id)
    );

    CREATE INDEX IF NOT EXISTS idx_bat_segment_segment ON bat_segment_links(segment_id);
    CREATE INDEX IF NOT EXISTS idx_bat_segment_bat ON bat_segment_links(bat_id);

    CREATE TABLE IF NOT EXISTS segment_images (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        segment_id INTEGER NOT NULL,
        image_id INTEGER NOT NULL,
        FOREIGN KEY (segment_id) REFERENCES segments(id),
        FOREIGN KEY (image_id) REFERENCES images(id)
    );

    CREATE INDEX IF NOT EXISTS idx_segment_images_segment ON segment_images(segment_id);
"#;

/// Read-only classification of a candidate store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreStatus {
    Ok,
    /// Usable, but needs migrating before use.
    Old,
    /// Missing or not a store at all.
    Bad,
}

/// Classify the store at `path` without modifying it.
pub fn validate_store(path: &Path) -> StoreStatus {
    if !path.is_file() {
        log::warn!("Store {} does not exist", path.display());
        return StoreStatus::Bad;
    }
    let conn = match Connection::open_with_flags(path, OpenFlags::SQLITE_OPEN_READ_ONLY) {
        Ok(conn) => conn,
        Err(e) => {
            log::warn!("Store {} could not be opened: {}", path.display(), e);
            return StoreStatus::Bad;
        }
    };
    match classify(&conn) {
        Ok(status) => status,
        Err(e) => {
            log::warn!("Store {} could not be inspected: {}", path.display(), e);
            StoreStatus::Bad
        }
    }
}

pub(crate) fn classify(conn: &Connection) -> Result<StoreStatus> {
    for table in REQUIRED_TABLES {
        if !table_exists(conn, table)? {
            log::info!("Store is missing required table '{}'", table);
            return Ok(StoreStatus::Bad);
        }
    }
    match super::migrations::read_version(conn)? {
        Some(v) if v == CURRENT_VERSION => Ok(StoreStatus::Ok),
        _ => Ok(StoreStatus::Old),
    }
}

pub(crate) fn table_exists(conn: &Connection, table: &str) -> Result<bool> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
        [table],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

pub(crate) fn column_exists(conn: &Connection, table: &str, column: &str) -> Result<bool> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM pragma_table_info(?1) WHERE name = ?2",
        [table, column],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}
