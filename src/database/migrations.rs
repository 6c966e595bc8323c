//! Versioned, additive schema migrations.
//!
//! A single-row `version` table holds the store's schema version. Stores
//! written before versioning existed have no such table and are treated as
//! being at [`BASELINE_VERSION`].
//!
//! # Migration guidelines
//!
//! 1. Never modify an existing step; users upgrade from every older version.
//! 2. Steps only add: new columns, new tables, backfill inserts.
//! 3. Every step must be idempotent so a half-applied upgrade can be re-run.

use anyhow::{Context, Result};
use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;

use super::schema::{column_exists, table_exists};

/// Schema version this build reads and writes.
pub const CURRENT_VERSION: f64 = 6.2;

/// Version assumed for stores that predate the version marker.
pub const BASELINE_VERSION: f64 = 5.0;

pub struct Migration {
    pub version: f64,
    pub name: &'static str,
    apply: fn(&Connection) -> Result<()>,
}

/// Applied in order; a step runs when the stored version is below its own.
pub static MIGRATIONS: &[Migration] = &[
    Migration {
        version: 5.2,
        name: "species sort order and image types",
        apply: migrate_5_2,
    },
    Migration {
        version: 5.31,
        name: "call parameter tables",
        apply: migrate_5_31,
    },
    Migration {
        version: 6.0,
        name: "species-recording links",
        apply: migrate_6_0,
    },
    Migration {
        version: 6.1,
        name: "species-session links and image owners",
        apply: migrate_6_1,
    },
];

#[derive(Debug, Clone, Default, Serialize)]
pub struct MigrationReport {
    pub from_version: f64,
    pub to_version: f64,
    pub applied: Vec<f64>,
    pub failed: Vec<(f64, String)>,
}

/// Stored schema version, or `None` when the store predates versioning.
pub fn read_version(conn: &Connection) -> Result<Option<f64>> {
    if !table_exists(conn, "version")? {
        return Ok(None);
    }
    let version = conn
        .query_row("SELECT version FROM version WHERE id = 1", [], |row| {
            row.get::<_, f64>(0)
        })
        .optional()?;
    Ok(version)
}

pub(crate) fn write_version(conn: &Connection, version: f64) -> Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS version (
            id INTEGER PRIMARY KEY CHECK (id = 1),
            version REAL NOT NULL
        )",
        [],
    )?;
    conn.execute(
        "INSERT OR REPLACE INTO version (id, version) VALUES (1, ?1)",
        params![version],
    )?;
    Ok(())
}

/// Bring the store up to [`CURRENT_VERSION`].
///
/// Each step's failure is logged and recorded in the report; later steps
/// still get their chance to run.
pub fn run_migrations(conn: &Connection) -> Result<MigrationReport> {
    let stored = match read_version(conn)? {
        Some(v) => v,
        None => {
            log::info!(
                "Store has no version marker, assuming baseline v{}",
                BASELINE_VERSION
            );
            write_version(conn, BASELINE_VERSION)?;
            BASELINE_VERSION
        }
    };

    let mut report = MigrationReport {
        from_version: stored,
        to_version: stored,
        ..Default::default()
    };

    if stored == CURRENT_VERSION {
        log::info!("Store schema is up to date (v{})", stored);
        return Ok(report);
    }
    if stored > CURRENT_VERSION {
        log::warn!(
            "Store schema version ({}) is newer than this build ({}), leaving it untouched",
            stored,
            CURRENT_VERSION
        );
        return Ok(report);
    }

    log::info!("Migrating store: v{} -> v{}", stored, CURRENT_VERSION);

    for step in MIGRATIONS.iter().filter(|m| stored < m.version) {
        match (step.apply)(conn) {
            Ok(()) => {
                log::info!("Migration v{} ({}) completed", step.version, step.name);
                report.applied.push(step.version);
            }
            Err(e) => {
                log::error!("Migration v{} ({}) failed: {:#}", step.version, step.name, e);
                report.failed.push((step.version, format!("{:#}", e)));
            }
        }
    }

    write_version(conn, CURRENT_VERSION)?;
    report.to_version = CURRENT_VERSION;
    Ok(report)
}

fn add_column_if_missing(conn: &Connection, table: &str, column: &str, decl: &str) -> Result<()> {
    if column_exists(conn, table, column)? {
        return Ok(());
    }
    conn.execute(&format!("ALTER TABLE {} ADD COLUMN {} {}", table, column, decl), [])
        .with_context(|| format!("adding {}.{}", table, column))?;
    log::info!("Added column {}.{}", table, column);
    Ok(())
}

fn migrate_5_2(conn: &Connection) -> Result<()> {
    add_column_if_missing(conn, "bats", "sort_index", "INTEGER NOT NULL DEFAULT 0")?;
    add_column_if_missing(conn, "images", "image_type", "TEXT NOT NULL DEFAULT 'BMP'")?;
    // Keep existing species in their insertion order.
    conn.execute("UPDATE bats SET sort_index = id WHERE sort_index = 0", [])?;
    Ok(())
}

fn migrate_5_31(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS calls (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            start_frequency REAL,
            start_frequency_variation REAL,
            end_frequency REAL,
            end_frequency_variation REAL,
            peak_frequency REAL,
            peak_frequency_variation REAL,
            pulse_duration REAL,
            pulse_duration_variation REAL,
            pulse_interval REAL,
            pulse_interval_variation REAL,
            call_type TEXT,
            call_function TEXT,
            notes TEXT
        );

        -- Uniqueness per segment is enforced by the update pipeline
        CREATE TABLE IF NOT EXISTS segment_calls (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            segment_id INTEGER NOT NULL,
            call_id INTEGER NOT NULL,
            FOREIGN KEY (segment_id) REFERENCES segments(id),
            FOREIGN KEY (call_id) REFERENCES calls(id)
        );

        CREATE INDEX IF NOT EXISTS idx_segment_calls_segment ON segment_calls(segment_id);
        "#,
    )
    .context("creating call tables")?;
    Ok(())
}

fn migrate_6_0(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS bat_recording_links (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            recording_id INTEGER NOT NULL,
            bat_id INTEGER NOT NULL,
            FOREIGN KEY (recording_id) REFERENCES recordings(id),
            FOREIGN KEY (bat_id) REFERENCES bats(id)
        );

        CREATE INDEX IF NOT EXISTS idx_bat_recording_recording ON bat_recording_links(recording_id);
        "#,
    )
    .context("creating bat_recording_links")?;

    let added = conn
        .execute(
            "INSERT INTO bat_recording_links (recording_id, bat_id)
             SELECT DISTINCT s.recording_id, l.bat_id
             FROM bat_segment_links l
             JOIN segments s ON s.id = l.segment_id
             WHERE NOT EXISTS (
                SELECT 1 FROM bat_recording_links x
                WHERE x.recording_id = s.recording_id AND x.bat_id = l.bat_id
             )",
            [],
        )
        .context("backfilling bat_recording_links")?;
    log::info!("Backfilled {} species-recording links", added);
    Ok(())
}

fn migrate_6_1(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS bat_session_links (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            session_id INTEGER NOT NULL,
            bat_id INTEGER NOT NULL,
            FOREIGN KEY (session_id) REFERENCES sessions(id),
            FOREIGN KEY (bat_id) REFERENCES bats(id)
        );

        CREATE INDEX IF NOT EXISTS idx_bat_session_session ON bat_session_links(session_id);

        CREATE TABLE IF NOT EXISTS bat_images (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            bat_id INTEGER NOT NULL,
            image_id INTEGER NOT NULL,
            FOREIGN KEY (bat_id) REFERENCES bats(id),
            FOREIGN KEY (image_id) REFERENCES images(id)
        );

        CREATE TABLE IF NOT EXISTS call_images (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            call_id INTEGER NOT NULL,
            image_id INTEGER NOT NULL,
            FOREIGN KEY (call_id) REFERENCES calls(id),
            FOREIGN KEY (image_id) REFERENCES images(id)
        );
        "#,
    )
    .context("creating species-session and image owner tables")?;

    let added = conn
        .execute(
            "INSERT INTO bat_session_links (session_id, bat_id)
             SELECT DISTINCT r.session_id, l.bat_id
             FROM bat_recording_links l
             JOIN recordings r ON r.id = l.recording_id
             WHERE NOT EXISTS (
                SELECT 1 FROM bat_session_links x
                WHERE x.session_id = r.session_id AND x.bat_id = l.bat_id
             )",
            [],
        )
        .context("backfilling bat_session_links")?;
    log::info!("Backfilled {} species-session links", added);
    Ok(())
}

/// Lay down a store exactly as it looked at `version`: the base layout plus
/// every step up to and including it.
pub(crate) fn build_at_version(conn: &Connection, version: f64) -> Result<()> {
    conn.execute_batch(super::schema::BASE_SCHEMA)?;
    for step in MIGRATIONS.iter().filter(|m| m.version <= version) {
        (step.apply)(conn)?;
    }
    if version > BASELINE_VERSION {
        write_version(conn, version)?;
    }
    Ok(())
}
