//! Cascading deletes and derived-link repair.
//!
//! `bat_recording_links` and `bat_session_links` are caches of what
//! `bat_segment_links` implies. The update pipeline only ever adds to them;
//! removal happens here, driven by a [`DerivedLinkIndex`] that counts how many
//! base links still justify each derived one.

use anyhow::Result;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashSet};

use super::delete_call_if_orphaned;
use crate::database::links::{self, LinkTable};
use crate::database::{Database, Segment, NO_BATS};
use crate::error::AppError;

/// Derived links a change of base links affects.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Released {
    pub recording: bool,
    pub session: bool,
}

/// Justification counts for derived links.
///
/// `recordings[(recording, bat)]` counts species-segment links within the
/// recording. `sessions[(session, bat)]` counts recordings of the session
/// linked to the species.
#[derive(Debug, Default)]
pub struct DerivedLinkIndex {
    recordings: BTreeMap<(i64, i64), i64>,
    sessions: BTreeMap<(i64, i64), i64>,
    loaded_recordings: HashSet<i64>,
    loaded_sessions: HashSet<i64>,
}

impl DerivedLinkIndex {
    /// Full index computed from every base link in the store.
    pub fn build(db: &Database) -> Result<Self> {
        let mut index = Self::default();
        for (bat, recording, session) in db.bat_segment_reach()? {
            index.increment(recording, session, bat);
        }
        Ok(index)
    }

    /// Count one more base link. Returns which derived links it newly justifies.
    pub fn increment(&mut self, recording: i64, session: i64, bat: i64) -> Released {
        let count = self.recordings.entry((recording, bat)).or_insert(0);
        *count += 1;
        let mut added = Released::default();
        if *count == 1 {
            added.recording = true;
            let sessions = self.sessions.entry((session, bat)).or_insert(0);
            *sessions += 1;
            added.session = *sessions == 1;
        }
        added
    }

    /// Count one base link fewer. Returns true when the recording link lost
    /// its last justification.
    ///
    /// The session count is left alone; call [`Self::release_recording`] once
    /// the recording link row is really gone.
    pub fn decrement(&mut self, recording: i64, bat: i64) -> bool {
        let count = self.recordings.entry((recording, bat)).or_insert(0);
        *count -= 1;
        if *count <= 0 {
            self.recordings.remove(&(recording, bat));
            return true;
        }
        false
    }

    /// A recording's link to `bat` went away. Returns true when the session
    /// link lost its last justification.
    pub fn release_recording(&mut self, session: i64, bat: i64) -> bool {
        let count = self.sessions.entry((session, bat)).or_insert(0);
        *count -= 1;
        if *count <= 0 {
            self.sessions.remove(&(session, bat));
            return true;
        }
        false
    }

    pub fn recording_count(&self, recording: i64, bat: i64) -> i64 {
        self.recordings.get(&(recording, bat)).copied().unwrap_or(0)
    }

    pub fn session_count(&self, session: i64, bat: i64) -> i64 {
        self.sessions.get(&(session, bat)).copied().unwrap_or(0)
    }

    /// Load the counts one recording and its session contribute, once each.
    fn load_recording(&mut self, db: &Database, recording: i64, session: i64) -> Result<()> {
        if self.loaded_recordings.insert(recording) {
            for (bat, count) in db.bat_segment_counts_for_recording(recording)? {
                self.recordings.insert((recording, bat), count);
            }
        }
        if self.loaded_sessions.insert(session) {
            for (bat, count) in db.bat_recording_counts_for_session(session)? {
                self.sessions.insert((session, bat), count);
            }
        }
        Ok(())
    }
}

/// What a cascading delete removed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CascadeReport {
    pub segments: usize,
    pub recordings: usize,
    pub sessions: usize,
    pub derived_links: usize,
    pub calls: usize,
}

pub fn delete_segment(db: &Database, segment_id: i64) -> Result<CascadeReport> {
    let segment = db
        .get_segment(segment_id)?
        .ok_or_else(|| AppError::NotFound(format!("segment {}", segment_id)))?;
    let session = db
        .get_recording(segment.recording_id)?
        .map(|r| r.session_id)
        .ok_or_else(|| AppError::NotFound(format!("recording {}", segment.recording_id)))?;

    let mut index = DerivedLinkIndex::default();
    index.load_recording(db, segment.recording_id, session)?;
    let mut report = CascadeReport::default();
    remove_segment(db, &segment, session, &mut index, &mut report)?;
    log::info!("Deleted segment {}: {:?}", segment_id, report);
    Ok(report)
}

pub fn delete_recording(db: &Database, recording_id: i64) -> Result<CascadeReport> {
    let mut index = DerivedLinkIndex::default();
    let mut report = CascadeReport::default();
    remove_recording(db, recording_id, &mut index, &mut report)?;
    log::info!("Deleted recording {}: {:?}", recording_id, report);
    Ok(report)
}

pub fn delete_session(db: &Database, session_id: i64) -> Result<CascadeReport> {
    if db.get_session(session_id)?.is_none() {
        return Err(AppError::NotFound(format!("session {}", session_id)).into());
    }

    let mut index = DerivedLinkIndex::default();
    let mut report = CascadeReport::default();
    for recording in db.recordings_for_session(session_id)? {
        remove_recording(db, recording.id, &mut index, &mut report)?;
    }

    report.derived_links += db.remove_links_for_owner(links::BAT_SESSION, session_id)?;
    db.delete_session_row(session_id)?;
    report.sessions += 1;
    log::info!("Deleted session {}: {:?}", session_id, report);
    Ok(report)
}

/// Remove a species with its tags, every link to it and any image only it
/// owned. The placeholder species cannot be deleted.
pub fn delete_bat(db: &Database, bat_id: i64) -> Result<()> {
    let bat = db
        .get_bat(bat_id)?
        .ok_or_else(|| AppError::NotFound(format!("species {}", bat_id)))?;
    if bat.name == NO_BATS {
        return Err(AppError::Validation(format!("'{}' cannot be deleted", NO_BATS)).into());
    }

    for link in [links::BAT_SEGMENT, links::BAT_RECORDING, links::BAT_SESSION] {
        db.remove_links_for_member(link, bat_id)?;
    }
    let images = db.linked_members(links::BAT_IMAGE, bat_id)?;
    db.remove_links_for_owner(links::BAT_IMAGE, bat_id)?;
    for image in images {
        db.delete_image_if_orphaned(image)?;
    }
    db.delete_bat_row(bat_id)?;
    log::info!("Deleted species {} ({})", bat.name, bat_id);
    Ok(())
}

fn remove_recording(
    db: &Database,
    recording_id: i64,
    index: &mut DerivedLinkIndex,
    report: &mut CascadeReport,
) -> Result<()> {
    let recording = db
        .get_recording(recording_id)?
        .ok_or_else(|| AppError::NotFound(format!("recording {}", recording_id)))?;
    let session = recording.session_id;
    index.load_recording(db, recording_id, session)?;

    for segment in db.segments_for_recording(recording_id)? {
        remove_segment(db, &segment, session, index, report)?;
    }

    // Anything still linked to the recording was never justified.
    for bat in db.linked_members(links::BAT_RECORDING, recording_id)? {
        release_recording_link(db, recording_id, session, bat, index, report)?;
    }

    db.delete_recording_row(recording_id)?;
    report.recordings += 1;
    Ok(())
}

/// Drop the recording link to `bat`, and the session link with it when no
/// other recording of the session still has one. A missing recording row
/// releases nothing.
fn release_recording_link(
    db: &Database,
    recording: i64,
    session: i64,
    bat: i64,
    index: &mut DerivedLinkIndex,
    report: &mut CascadeReport,
) -> Result<()> {
    let removed = db.remove_link(links::BAT_RECORDING, recording, bat)?;
    if removed == 0 {
        log::warn!("Recording {} had no link to species {} to release", recording, bat);
        return Ok(());
    }
    report.derived_links += removed;
    if index.release_recording(session, bat) {
        report.derived_links += db.remove_link(links::BAT_SESSION, session, bat)?;
    }
    Ok(())
}

fn remove_segment(
    db: &Database,
    segment: &Segment,
    session: i64,
    index: &mut DerivedLinkIndex,
    report: &mut CascadeReport,
) -> Result<()> {
    let recording = segment.recording_id;

    for bat in db.linked_members(links::BAT_SEGMENT, segment.id)? {
        let removed = db.remove_link(links::BAT_SEGMENT, segment.id, bat)?;
        for _ in 0..removed {
            if index.decrement(recording, bat) {
                release_recording_link(db, recording, session, bat, index, report)?;
            }
        }
    }

    let calls = db.linked_members(links::SEGMENT_CALL, segment.id)?;
    db.remove_links_for_owner(links::SEGMENT_CALL, segment.id)?;
    for call in calls {
        if delete_call_if_orphaned(db, call)? {
            report.calls += 1;
        }
    }

    let images = db.linked_members(links::SEGMENT_IMAGE, segment.id)?;
    db.remove_links_for_owner(links::SEGMENT_IMAGE, segment.id)?;
    for image in images {
        db.delete_image_if_orphaned(image)?;
    }

    db.delete_segment_row(segment.id)?;
    report.segments += 1;
    Ok(())
}

// ============================================================================
// Repair
// ============================================================================

/// Changes made by [`repair_derived_links`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RepairReport {
    pub recording_links_added: usize,
    pub recording_links_removed: usize,
    pub session_links_added: usize,
    pub session_links_removed: usize,
    pub duplicates_removed: usize,
}

impl RepairReport {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// Rebuild both derived link tables from the base species-segment links.
///
/// Unjustified and duplicate rows are deleted, missing ones are added. Base
/// data is never touched, so running it again changes nothing.
pub fn repair_derived_links(db: &Database) -> Result<RepairReport> {
    let index = DerivedLinkIndex::build(db)?;
    let mut report = RepairReport::default();

    let justified: BTreeSet<(i64, i64)> = index.recordings.keys().copied().collect();
    let (added, removed, duplicates) = sync_derived(db, links::BAT_RECORDING, &justified)?;
    report.recording_links_added = added;
    report.recording_links_removed = removed;
    report.duplicates_removed += duplicates;

    let justified: BTreeSet<(i64, i64)> = index.sessions.keys().copied().collect();
    let (added, removed, duplicates) = sync_derived(db, links::BAT_SESSION, &justified)?;
    report.session_links_added = added;
    report.session_links_removed = removed;
    report.duplicates_removed += duplicates;

    if report.is_empty() {
        log::info!("Derived links are consistent");
    } else {
        log::warn!("Repaired derived links: {:?}", report);
    }
    Ok(report)
}

/// Make `link`'s rows exactly `justified`. Returns (added, removed, duplicates).
fn sync_derived(
    db: &Database,
    link: LinkTable,
    justified: &BTreeSet<(i64, i64)>,
) -> Result<(usize, usize, usize)> {
    let mut seen = BTreeSet::new();
    let (mut removed, mut duplicates) = (0, 0);

    for (row, owner, member) in db.link_rows(link)? {
        if !justified.contains(&(owner, member)) {
            db.remove_link_row(link, row)?;
            removed += 1;
        } else if !seen.insert((owner, member)) {
            db.remove_link_row(link, row)?;
            duplicates += 1;
        }
    }

    let mut added = 0;
    for &(owner, member) in justified.difference(&seen) {
        db.insert_link(link, owner, member)?;
        added += 1;
    }
    Ok((added, removed, duplicates))
}
