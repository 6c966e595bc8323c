pub mod lifecycle;
pub mod links;
pub mod migrations;
pub mod models;
pub mod schema;

#[cfg(test)]
mod tests;

use anyhow::{Context, Result};
use chrono::NaiveDate;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::{Path, PathBuf};

use crate::error::AppError;
use lifecycle::{Lifecycle, StoreState};
use migrations::MigrationReport;
use schema::StoreStatus;

pub use models::*;

/// Handle to one open store. Every engine operation takes it explicitly.
pub struct Database {
    conn: Connection,
    path: PathBuf,
    lifecycle: Lifecycle,
    migration: MigrationReport,
}

impl Database {
    /// Open an existing store, upgrading its schema first when it is old.
    pub fn open(db_path: &Path) -> Result<Self> {
        let mut lifecycle = Lifecycle::default();
        lifecycle.advance(StoreState::Validating)?;

        let status = schema::validate_store(db_path);
        if status == StoreStatus::Bad {
            lifecycle.advance(StoreState::Closed)?;
            return Err(AppError::Validation(format!(
                "{} is not a valid survey store",
                db_path.display()
            ))
            .into());
        }

        let conn = Connection::open(db_path)
            .with_context(|| format!("opening store {}", db_path.display()))?;
        configure(&conn)?;

        lifecycle.advance(StoreState::Migrating)?;
        let migration = if status == StoreStatus::Old {
            migrations::run_migrations(&conn)?
        } else {
            MigrationReport {
                from_version: migrations::CURRENT_VERSION,
                to_version: migrations::CURRENT_VERSION,
                ..Default::default()
            }
        };
        lifecycle.advance(StoreState::Open)?;

        let db = Self {
            conn,
            path: db_path.to_path_buf(),
            lifecycle,
            migration,
        };
        db.ensure_placeholder_bat()?;
        log::info!("Opened store {}", db_path.display());
        Ok(db)
    }

    /// Create a new, empty store at the current schema version.
    pub fn create(db_path: &Path) -> Result<Self> {
        if db_path.exists() {
            return Err(AppError::Validation(format!(
                "{} already exists",
                db_path.display()
            ))
            .into());
        }
        let mut lifecycle = Lifecycle::default();
        lifecycle.advance(StoreState::Validating)?;

        let conn = Connection::open(db_path)
            .with_context(|| format!("creating store {}", db_path.display()))?;
        configure(&conn)?;
        conn.execute_batch(schema::BASE_SCHEMA)?;

        lifecycle.advance(StoreState::Migrating)?;
        let migration = migrations::run_migrations(&conn)?;
        lifecycle.advance(StoreState::Open)?;

        let db = Self {
            conn,
            path: db_path.to_path_buf(),
            lifecycle,
            migration,
        };
        db.ensure_placeholder_bat()?;
        log::info!("Created store {}", db_path.display());
        Ok(db)
    }

    pub fn close(mut self) -> Result<()> {
        self.lifecycle.advance(StoreState::Closed)?;
        let path = self.path.clone();
        self.conn.close().map_err(|(_, e)| {
            anyhow::Error::new(e).context(format!("closing {}", path.display()))
        })?;
        log::info!("Closed store {}", path.display());
        Ok(())
    }

    pub fn state(&self) -> StoreState {
        self.lifecycle.state()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// What the schema migrator did when this handle was opened.
    pub fn migration_report(&self) -> &MigrationReport {
        &self.migration
    }

    // =========================================================================
    // Sessions
    // =========================================================================

    /// Insert a session, or update the one with the same id or tag.
    pub fn merge_session(&self, session: &Session) -> Result<i64> {
        let tag: String = session.tag.trim().chars().take(SESSION_TAG_MAX_LEN).collect();
        if tag.is_empty() {
            return Err(AppError::Validation("Session tag is required".into()).into());
        }

        let existing = if !is_unassigned(session.id) && self.get_session(session.id)?.is_some() {
            Some(session.id)
        } else {
            self.get_session_by_tag(&tag)?.map(|s| s.id)
        };

        if let Some(id) = existing {
            self.conn.execute(
                "UPDATE sessions SET session_tag = ?1, title = ?2, location = ?3, latitude = ?4,
                    longitude = ?5, start_date = ?6, start_time = ?7, end_date = ?8, end_time = ?9,
                    operator = ?10, equipment = ?11, microphone = ?12, weather = ?13, notes = ?14,
                    original_file_path = ?15
                 WHERE id = ?16",
                params![
                    tag,
                    session.title,
                    session.location,
                    session.latitude,
                    session.longitude,
                    session.start_date,
                    session.start_time,
                    session.end_date,
                    session.end_time,
                    session.operator,
                    session.equipment,
                    session.microphone,
                    session.weather,
                    session.notes,
                    session.original_file_path,
                    id
                ],
            )?;
            Ok(id)
        } else {
            self.conn.execute(
                "INSERT INTO sessions (session_tag, title, location, latitude, longitude, start_date,
                    start_time, end_date, end_time, operator, equipment, microphone, weather, notes,
                    original_file_path)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)",
                params![
                    tag,
                    session.title,
                    session.location,
                    session.latitude,
                    session.longitude,
                    session.start_date,
                    session.start_time,
                    session.end_date,
                    session.end_time,
                    session.operator,
                    session.equipment,
                    session.microphone,
                    session.weather,
                    session.notes,
                    session.original_file_path
                ],
            )?;
            Ok(self.conn.last_insert_rowid())
        }
    }

    pub fn get_session(&self, id: i64) -> Result<Option<Session>> {
        let sql = format!("SELECT {} FROM sessions WHERE id = ?1", SESSION_COLUMNS);
        Ok(self.conn.query_row(&sql, [id], session_from_row).optional()?)
    }

    pub fn get_session_by_tag(&self, tag: &str) -> Result<Option<Session>> {
        let sql = format!("SELECT {} FROM sessions WHERE session_tag = ?1", SESSION_COLUMNS);
        Ok(self.conn.query_row(&sql, [tag], session_from_row).optional()?)
    }

    /// One page of sessions, newest first, plus the total session count.
    pub fn list_sessions(&self, limit: i64, offset: i64) -> Result<(Vec<SessionSummary>, i64)> {
        let total: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM sessions", [], |row| row.get(0))?;

        let mut stmt = self.conn.prepare(
            "SELECT s.id, s.session_tag, s.location, s.start_date,
                    (SELECT COUNT(*) FROM recordings r WHERE r.session_id = s.id)
             FROM sessions s
             ORDER BY s.start_date DESC, s.id DESC
             LIMIT ?1 OFFSET ?2",
        )?;
        let sessions = stmt
            .query_map(params![limit, offset], |row| {
                Ok(SessionSummary {
                    id: row.get(0)?,
                    tag: row.get(1)?,
                    location: row.get(2)?,
                    start_date: row.get(3)?,
                    recording_count: row.get(4)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok((sessions, total))
    }

    /// Sessions whose date window overlaps `[from, to]`.
    pub fn sessions_in_date_range(&self, from: NaiveDate, to: NaiveDate) -> Result<Vec<Session>> {
        let sql = format!(
            "SELECT {} FROM sessions
             WHERE start_date <= ?2 AND COALESCE(end_date, start_date) >= ?1
             ORDER BY start_date, id",
            SESSION_COLUMNS
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let sessions = stmt
            .query_map(params![from, to], session_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(sessions)
    }

    pub(crate) fn delete_session_row(&self, id: i64) -> Result<()> {
        self.conn.execute("DELETE FROM sessions WHERE id = ?1", [id])?;
        Ok(())
    }

    // =========================================================================
    // Recordings
    // =========================================================================

    /// Insert a recording, or update the one with the same id or the same
    /// file name within the session.
    pub fn merge_recording(&self, recording: &Recording) -> Result<i64> {
        if recording.name.trim().is_empty() {
            return Err(AppError::Validation("Recording file name is required".into()).into());
        }
        if !recording.has_media_extension() {
            return Err(AppError::Validation(format!(
                "{} is not a recognised audio file",
                recording.name
            ))
            .into());
        }
        if self.get_session(recording.session_id)?.is_none() {
            return Err(AppError::NotFound(format!("session {}", recording.session_id)).into());
        }

        let known = !is_unassigned(recording.id) && self.get_recording(recording.id)?.is_some();
        let existing = if known {
            Some(recording.id)
        } else {
            self.conn
                .query_row(
                    "SELECT id FROM recordings WHERE session_id = ?1 AND recording_name = ?2",
                    params![recording.session_id, recording.name],
                    |row| row.get(0),
                )
                .optional()?
        };

        if let Some(id) = existing {
            self.conn.execute(
                "UPDATE recordings SET session_id = ?1, recording_name = ?2, recording_date = ?3,
                    start_time = ?4, end_time = ?5, latitude = ?6, longitude = ?7, notes = ?8
                 WHERE id = ?9",
                params![
                    recording.session_id,
                    recording.name,
                    recording.date,
                    recording.start_time,
                    recording.end_time,
                    recording.latitude,
                    recording.longitude,
                    recording.notes,
                    id
                ],
            )?;
            Ok(id)
        } else {
            self.conn.execute(
                "INSERT INTO recordings (session_id, recording_name, recording_date, start_time,
                    end_time, latitude, longitude, notes)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    recording.session_id,
                    recording.name,
                    recording.date,
                    recording.start_time,
                    recording.end_time,
                    recording.latitude,
                    recording.longitude,
                    recording.notes
                ],
            )?;
            Ok(self.conn.last_insert_rowid())
        }
    }

    pub fn get_recording(&self, id: i64) -> Result<Option<Recording>> {
        let sql = format!("SELECT {} FROM recordings WHERE id = ?1", RECORDING_COLUMNS);
        Ok(self.conn.query_row(&sql, [id], recording_from_row).optional()?)
    }

    pub fn recordings_for_session(&self, session_id: i64) -> Result<Vec<Recording>> {
        let sql = format!(
            "SELECT {} FROM recordings WHERE session_id = ?1 ORDER BY id",
            RECORDING_COLUMNS
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let recordings = stmt
            .query_map([session_id], recording_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(recordings)
    }

    pub(crate) fn delete_recording_row(&self, id: i64) -> Result<()> {
        self.conn.execute("DELETE FROM recordings WHERE id = ?1", [id])?;
        Ok(())
    }

    // =========================================================================
    // Segments
    // =========================================================================

    pub fn insert_segment(
        &self,
        recording_id: i64,
        start_ms: i64,
        end_ms: i64,
        comment: &str,
    ) -> Result<i64> {
        self.conn.execute(
            "INSERT INTO segments (recording_id, start_offset_ms, end_offset_ms, comment)
             VALUES (?1, ?2, ?3, ?4)",
            params![recording_id, start_ms, end_ms, comment],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    pub fn update_segment_fields(
        &self,
        id: i64,
        start_ms: i64,
        end_ms: i64,
        comment: &str,
    ) -> Result<()> {
        self.conn.execute(
            "UPDATE segments SET start_offset_ms = ?1, end_offset_ms = ?2, comment = ?3
             WHERE id = ?4",
            params![start_ms, end_ms, comment, id],
        )?;
        Ok(())
    }

    pub fn get_segment(&self, id: i64) -> Result<Option<Segment>> {
        Ok(self
            .conn
            .query_row(
                "SELECT id, recording_id, start_offset_ms, end_offset_ms, comment
                 FROM segments WHERE id = ?1",
                [id],
                segment_from_row,
            )
            .optional()?)
    }

    /// All segments of a recording in ascending id order.
    pub fn segments_for_recording(&self, recording_id: i64) -> Result<Vec<Segment>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, recording_id, start_offset_ms, end_offset_ms, comment
             FROM segments WHERE recording_id = ?1 ORDER BY id",
        )?;
        let segments = stmt
            .query_map([recording_id], segment_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(segments)
    }

    pub(crate) fn delete_segment_row(&self, id: i64) -> Result<()> {
        self.conn.execute("DELETE FROM segments WHERE id = ?1", [id])?;
        Ok(())
    }

    // =========================================================================
    // Bats
    // =========================================================================

    /// All species with their tags, in sort order.
    pub fn get_bats(&self) -> Result<Vec<Bat>> {
        let sql = format!("SELECT {} FROM bats ORDER BY sort_index, id", BAT_COLUMNS);
        let mut stmt = self.conn.prepare(&sql)?;
        let mut bats = stmt
            .query_map([], bat_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        for bat in &mut bats {
            bat.tags = self.bat_tags(bat.id)?;
        }
        Ok(bats)
    }

    pub fn get_bat(&self, id: i64) -> Result<Option<Bat>> {
        let sql = format!("SELECT {} FROM bats WHERE id = ?1", BAT_COLUMNS);
        let bat = self.conn.query_row(&sql, [id], bat_from_row).optional()?;
        match bat {
            Some(mut bat) => {
                bat.tags = self.bat_tags(bat.id)?;
                Ok(Some(bat))
            }
            None => Ok(None),
        }
    }

    pub fn find_bat_id_by_name(&self, name: &str) -> Result<Option<i64>> {
        Ok(self
            .conn
            .query_row(
                "SELECT id FROM bats WHERE name = ?1 COLLATE NOCASE ORDER BY id LIMIT 1",
                [name],
                |row| row.get(0),
            )
            .optional()?)
    }

    fn find_bat_id_by_binomial(&self, genus: &str, species: &str) -> Result<Option<i64>> {
        Ok(self
            .conn
            .query_row(
                "SELECT id FROM bats
                 WHERE genus = ?1 COLLATE NOCASE AND species = ?2 COLLATE NOCASE
                 ORDER BY id LIMIT 1",
                params![genus, species],
                |row| row.get(0),
            )
            .optional()?)
    }

    fn bat_tags(&self, bat_id: i64) -> Result<Vec<String>> {
        let mut stmt = self
            .conn
            .prepare("SELECT tag FROM bat_tags WHERE bat_id = ?1 ORDER BY sort_index, id")?;
        let tags = stmt
            .query_map([bat_id], |row| row.get(0))?
            .collect::<Result<Vec<String>, _>>()?;
        Ok(tags)
    }

    /// Insert a species, or update the one with the same genus and species.
    /// The stored tag list is diffed against `bat.tags`.
    pub fn merge_bat(&self, bat: &Bat) -> Result<i64> {
        let name = bat.name.trim();
        if name.is_empty() {
            return Err(AppError::Validation("Species name is required".into()).into());
        }

        let existing = if !is_unassigned(bat.id) && self.get_bat(bat.id)?.is_some() {
            Some(bat.id)
        } else if bat.genus.is_empty() && bat.species.is_empty() {
            self.find_bat_id_by_name(name)?
        } else {
            self.find_bat_id_by_binomial(&bat.genus, &bat.species)?
        };

        let id = match existing {
            Some(id) => {
                self.conn.execute(
                    "UPDATE bats SET name = ?1, genus = ?2, species = ?3, notes = ?4,
                        sort_index = CASE WHEN ?5 > 0 THEN ?5 ELSE sort_index END
                     WHERE id = ?6",
                    params![name, bat.genus, bat.species, bat.notes, bat.sort_index, id],
                )?;
                id
            }
            None => {
                let sort_index = if bat.sort_index > 0 {
                    bat.sort_index
                } else {
                    self.conn.query_row(
                        "SELECT COALESCE(MAX(sort_index), 0) + 1 FROM bats",
                        [],
                        |row| row.get(0),
                    )?
                };
                self.conn.execute(
                    "INSERT INTO bats (name, genus, species, notes, sort_index) VALUES (?1, ?2, ?3, ?4, ?5)",
                    params![name, bat.genus, bat.species, bat.notes, sort_index],
                )?;
                self.conn.last_insert_rowid()
            }
        };

        self.merge_bat_tags(id, &bat.tags)?;
        Ok(id)
    }

    fn merge_bat_tags(&self, bat_id: i64, tags: &[String]) -> Result<()> {
        let mut wanted: Vec<&str> = Vec::new();
        for tag in tags.iter().map(|t| t.trim()).filter(|t| !t.is_empty()) {
            if !wanted.contains(&tag) {
                wanted.push(tag);
            }
        }

        let current = self.bat_tags(bat_id)?;
        for stale in current.iter().filter(|t| !wanted.contains(&t.as_str())) {
            self.conn.execute(
                "DELETE FROM bat_tags WHERE bat_id = ?1 AND tag = ?2",
                params![bat_id, stale],
            )?;
        }
        for (index, tag) in wanted.iter().enumerate() {
            if current.iter().any(|t| t == tag) {
                self.conn.execute(
                    "UPDATE bat_tags SET sort_index = ?1 WHERE bat_id = ?2 AND tag = ?3",
                    params![index as i64, bat_id, tag],
                )?;
            } else {
                self.conn.execute(
                    "INSERT INTO bat_tags (bat_id, tag, sort_index) VALUES (?1, ?2, ?3)",
                    params![bat_id, tag, index as i64],
                )?;
            }
        }
        Ok(())
    }

    /// Id of the reserved "No Bats" species, creating it when missing.
    pub fn ensure_placeholder_bat(&self) -> Result<i64> {
        if let Some(id) = self.find_bat_id_by_name(NO_BATS)? {
            return Ok(id);
        }
        log::info!("Creating placeholder species '{}'", NO_BATS);
        self.merge_bat(&Bat::placeholder())
    }

    pub(crate) fn delete_bat_row(&self, id: i64) -> Result<()> {
        self.conn.execute("DELETE FROM bat_tags WHERE bat_id = ?1", [id])?;
        self.conn.execute("DELETE FROM bats WHERE id = ?1", [id])?;
        Ok(())
    }

    // =========================================================================
    // Calls
    // =========================================================================

    pub fn insert_call(&self, call: &Call) -> Result<i64> {
        self.conn.execute(
            "INSERT INTO calls (start_frequency, start_frequency_variation, end_frequency,
                end_frequency_variation, peak_frequency, peak_frequency_variation, pulse_duration,
                pulse_duration_variation, pulse_interval, pulse_interval_variation, call_type,
                call_function, notes)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
            params![
                call.start_frequency,
                call.start_frequency_variation,
                call.end_frequency,
                call.end_frequency_variation,
                call.peak_frequency,
                call.peak_frequency_variation,
                call.pulse_duration,
                call.pulse_duration_variation,
                call.pulse_interval,
                call.pulse_interval_variation,
                call.call_type,
                call.call_function,
                call.notes
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    /// Overwrite the parameters of an existing call in place.
    pub fn update_call(&self, id: i64, call: &Call) -> Result<()> {
        self.conn.execute(
            "UPDATE calls SET start_frequency = ?1, start_frequency_variation = ?2,
                end_frequency = ?3, end_frequency_variation = ?4, peak_frequency = ?5,
                peak_frequency_variation = ?6, pulse_duration = ?7, pulse_duration_variation = ?8,
                pulse_interval = ?9, pulse_interval_variation = ?10, call_type = ?11,
                call_function = ?12, notes = ?13
             WHERE id = ?14",
            params![
                call.start_frequency,
                call.start_frequency_variation,
                call.end_frequency,
                call.end_frequency_variation,
                call.peak_frequency,
                call.peak_frequency_variation,
                call.pulse_duration,
                call.pulse_duration_variation,
                call.pulse_interval,
                call.pulse_interval_variation,
                call.call_type,
                call.call_function,
                call.notes,
                id
            ],
        )?;
        Ok(())
    }

    pub fn get_call(&self, id: i64) -> Result<Option<Call>> {
        Ok(self
            .conn
            .query_row(
                "SELECT id, start_frequency, start_frequency_variation, end_frequency,
                    end_frequency_variation, peak_frequency, peak_frequency_variation,
                    pulse_duration, pulse_duration_variation, pulse_interval,
                    pulse_interval_variation, call_type, call_function, notes
                 FROM calls WHERE id = ?1",
                [id],
                |row| {
                    Ok(Call {
                        id: row.get(0)?,
                        start_frequency: row.get(1)?,
                        start_frequency_variation: row.get(2)?,
                        end_frequency: row.get(3)?,
                        end_frequency_variation: row.get(4)?,
                        peak_frequency: row.get(5)?,
                        peak_frequency_variation: row.get(6)?,
                        pulse_duration: row.get(7)?,
                        pulse_duration_variation: row.get(8)?,
                        pulse_interval: row.get(9)?,
                        pulse_interval_variation: row.get(10)?,
                        call_type: row.get(11)?,
                        call_function: row.get(12)?,
                        notes: row.get(13)?,
                    })
                },
            )
            .optional()?)
    }

    pub(crate) fn delete_call_row(&self, id: i64) -> Result<()> {
        self.conn.execute("DELETE FROM calls WHERE id = ?1", [id])?;
        Ok(())
    }

    // =========================================================================
    // Images
    // =========================================================================

    pub fn insert_image(&self, image: &BinaryImage) -> Result<i64> {
        self.conn.execute(
            "INSERT INTO images (data, description, image_type) VALUES (?1, ?2, ?3)",
            params![image.data, image.description, image.image_type],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    pub fn get_image(&self, id: i64) -> Result<Option<BinaryImage>> {
        Ok(self
            .conn
            .query_row(
                "SELECT id, data, description, image_type FROM images WHERE id = ?1",
                [id],
                |row| {
                    Ok(BinaryImage {
                        id: row.get(0)?,
                        data: row.get(1)?,
                        description: row.get(2)?,
                        image_type: row.get(3)?,
                    })
                },
            )
            .optional()?)
    }

    pub fn update_image_description(&self, id: i64, description: &str) -> Result<()> {
        self.conn.execute(
            "UPDATE images SET description = ?1 WHERE id = ?2",
            params![description, id],
        )?;
        Ok(())
    }

    /// Delete the image bytes if no segment, species or call still owns them.
    pub fn delete_image_if_orphaned(&self, id: i64) -> Result<bool> {
        if self.image_owner_count(id)? > 0 {
            return Ok(false);
        }
        let deleted = self.conn.execute("DELETE FROM images WHERE id = ?1", [id])?;
        Ok(deleted > 0)
    }

    // =========================================================================
    // Derived-link support
    // =========================================================================

    /// Every base species link with the recording and session it reaches.
    pub fn bat_segment_reach(&self) -> Result<Vec<(i64, i64, i64)>> {
        let mut stmt = self.conn.prepare(
            "SELECT l.bat_id, s.recording_id, r.session_id
             FROM bat_segment_links l
             JOIN segments s ON s.id = l.segment_id
             JOIN recordings r ON r.id = s.recording_id
             ORDER BY l.id",
        )?;
        let rows = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Per species, how many base links justify its link to the recording.
    pub fn bat_segment_counts_for_recording(&self, recording_id: i64) -> Result<Vec<(i64, i64)>> {
        let mut stmt = self.conn.prepare(
            "SELECT l.bat_id, COUNT(*)
             FROM bat_segment_links l
             JOIN segments s ON s.id = l.segment_id
             WHERE s.recording_id = ?1
             GROUP BY l.bat_id",
        )?;
        let rows = stmt
            .query_map([recording_id], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Per species, how many recording links justify its link to the session.
    pub fn bat_recording_counts_for_session(&self, session_id: i64) -> Result<Vec<(i64, i64)>> {
        let mut stmt = self.conn.prepare(
            "SELECT l.bat_id, COUNT(DISTINCT l.recording_id)
             FROM bat_recording_links l
             JOIN recordings r ON r.id = l.recording_id
             WHERE r.session_id = ?1
             GROUP BY l.bat_id",
        )?;
        let rows = stmt
            .query_map([session_id], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    // =========================================================================
    // Statistics
    // =========================================================================

    /// Sessions, recordings and segments in which each species was identified.
    pub fn get_bat_stats(&self) -> Result<Vec<BatStats>> {
        let mut stmt = self.conn.prepare(
            "SELECT b.id, b.name,
                    (SELECT COUNT(DISTINCT session_id) FROM bat_session_links WHERE bat_id = b.id),
                    (SELECT COUNT(DISTINCT recording_id) FROM bat_recording_links WHERE bat_id = b.id),
                    (SELECT COUNT(DISTINCT segment_id) FROM bat_segment_links WHERE bat_id = b.id)
             FROM bats b
             ORDER BY b.sort_index, b.id",
        )?;
        let stats = stmt
            .query_map([], |row| {
                Ok(BatStats {
                    bat_id: row.get(0)?,
                    name: row.get(1)?,
                    sessions: row.get(2)?,
                    recordings: row.get(3)?,
                    segments: row.get(4)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(stats)
    }
}

fn configure(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        PRAGMA foreign_keys=ON;
        PRAGMA journal_mode=WAL;
        PRAGMA synchronous=NORMAL;
        PRAGMA temp_store=MEMORY;
    ",
    )?;
    Ok(())
}

const SESSION_COLUMNS: &str = "id, session_tag, title, location, latitude, longitude, start_date,
    start_time, end_date, end_time, operator, equipment, microphone, weather, notes,
    original_file_path";

fn session_from_row(row: &Row) -> rusqlite::Result<Session> {
    Ok(Session {
        id: row.get(0)?,
        tag: row.get(1)?,
        title: row.get(2)?,
        location: row.get(3)?,
        latitude: row.get(4)?,
        longitude: row.get(5)?,
        start_date: row.get(6)?,
        start_time: row.get(7)?,
        end_date: row.get(8)?,
        end_time: row.get(9)?,
        operator: row.get(10)?,
        equipment: row.get(11)?,
        microphone: row.get(12)?,
        weather: row.get(13)?,
        notes: row.get(14)?,
        original_file_path: row.get(15)?,
    })
}

const RECORDING_COLUMNS: &str = "id, session_id, recording_name, recording_date, start_time,
    end_time, latitude, longitude, notes";

fn recording_from_row(row: &Row) -> rusqlite::Result<Recording> {
    Ok(Recording {
        id: row.get(0)?,
        session_id: row.get(1)?,
        name: row.get(2)?,
        date: row.get(3)?,
        start_time: row.get(4)?,
        end_time: row.get(5)?,
        latitude: row.get(6)?,
        longitude: row.get(7)?,
        notes: row.get(8)?,
    })
}

fn segment_from_row(row: &Row) -> rusqlite::Result<Segment> {
    Ok(Segment {
        id: row.get(0)?,
        recording_id: row.get(1)?,
        start_ms: row.get(2)?,
        end_ms: row.get(3)?,
        comment: row.get(4)?,
    })
}

const BAT_COLUMNS: &str = "id, name, genus, species, sort_index, notes";

fn bat_from_row(row: &Row) -> rusqlite::Result<Bat> {
    Ok(Bat {
        id: row.get(0)?,
        name: row.get(1)?,
        genus: row.get(2)?,
        species: row.get(3)?,
        tags: Vec::new(),
        sort_index: row.get(4)?,
        notes: row.get(5)?,
    })
}
