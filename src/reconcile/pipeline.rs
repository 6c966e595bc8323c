//! Applies an edited recording and its segments to the store.

use anyhow::Result;
use serde::Serialize;

use super::cascade::delete_segment;
use super::matcher::match_segment;
use super::{reconcile_links, BatSegments, LinkDiff, SegmentCalls, SEGMENT_IMAGES};
use crate::annotation::{parse_comment, Vocabulary};
use crate::database::links;
use crate::database::{
    is_unassigned, BinaryImage, Call, Database, Recording, RecordingUpdate, SegmentEdit,
    UNASSIGNED_ID,
};
use crate::error::AppError;
use crate::temporal::{normalize_recording, FileTimes};

/// What [`update_segment`] did to one segment.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SegmentOutcome {
    pub segment_id: i64,
    pub created: bool,
    pub comment_changed: bool,
    pub bats: LinkDiff,
    pub call_id: Option<i64>,
    pub images: LinkDiff,
}

/// Save one edited segment of `recording_id` with its species, call and images.
///
/// Species links are only reconciled when the comment changed (or the segment
/// is new). Derived recording and session links are added as needed but never
/// removed here; see [`super::cascade`].
pub fn update_segment(
    db: &Database,
    edit: &SegmentEdit,
    recording_id: i64,
    vocabulary: &Vocabulary,
) -> Result<SegmentOutcome> {
    apply_segment(db, edit, recording_id, vocabulary, &[])
}

/// [`update_segment`] within a batch: segments in `claimed` already belong to
/// earlier edits and cannot be matched again.
fn apply_segment(
    db: &Database,
    edit: &SegmentEdit,
    recording_id: i64,
    vocabulary: &Vocabulary,
    claimed: &[i64],
) -> Result<SegmentOutcome> {
    let recording = db
        .get_recording(recording_id)?
        .ok_or_else(|| AppError::NotFound(format!("recording {}", recording_id)))?;

    let mut outcome = SegmentOutcome::default();

    // 1. Find or create the segment
    let matched = match match_segment(db, edit, recording_id, claimed)? {
        Some(id) => db.get_segment(id)?,
        None => None,
    };
    match matched {
        Some(segment) => {
            outcome.segment_id = segment.id;
            outcome.comment_changed = segment.comment != edit.comment;
            db.update_segment_fields(segment.id, edit.start_ms, edit.end_ms, &edit.comment)?;
        }
        None => {
            outcome.segment_id =
                db.insert_segment(recording_id, edit.start_ms, edit.end_ms, &edit.comment)?;
            outcome.created = true;
            outcome.comment_changed = true;
        }
    }
    let segment_id = outcome.segment_id;
    let parsed = parse_comment(&edit.comment, vocabulary);

    // 2. Species
    if outcome.comment_changed {
        let target = edit.bats.as_deref().unwrap_or(&parsed.bats);
        outcome.bats = reconcile_links(db, &BatSegments, segment_id, target)?;

        for bat in db.linked_members(links::BAT_SEGMENT, segment_id)? {
            db.insert_link_if_absent(links::BAT_RECORDING, recording_id, bat)?;
            db.insert_link_if_absent(links::BAT_SESSION, recording.session_id, bat)?;
        }
    }

    // 3. Call
    let existing = db.linked_members(links::SEGMENT_CALL, segment_id)?;
    let target: Vec<Call> = match (parsed.call, existing.first()) {
        (None, _) => Vec::new(),
        (Some(mut call), Some(&call_id)) => {
            call.id = call_id;
            let stored = db.get_call(call_id)?;
            if !stored.map_or(false, |s| s.same_parameters(&call)) {
                db.update_call(call_id, &call)?;
            }
            vec![call]
        }
        (Some(mut call), None) => {
            call.id = UNASSIGNED_ID;
            vec![call]
        }
    };
    reconcile_links(db, &SegmentCalls, segment_id, &target)?;
    outcome.call_id = db.linked_members(links::SEGMENT_CALL, segment_id)?.first().copied();

    // 4. Images
    outcome.images = reconcile_images(db, segment_id, &edit.images)?;

    log::debug!("Saved segment {}: {:?}", segment_id, outcome);
    Ok(outcome)
}

/// Reconcile a segment's images and bring existing captions up to date.
fn reconcile_images(db: &Database, segment_id: i64, images: &[BinaryImage]) -> Result<LinkDiff> {
    let diff = reconcile_links(db, &SEGMENT_IMAGES, segment_id, images)?;
    for image in images.iter().filter(|i| !is_unassigned(i.id)) {
        if let Some(stored) = db.get_image(image.id)? {
            if stored.description != image.description {
                db.update_image_description(image.id, &image.description)?;
            }
        }
    }
    Ok(diff)
}

/// Id of the recording's zero segment, creating it when there is none.
pub fn ensure_zero_segment(db: &Database, recording_id: i64) -> Result<i64> {
    let segments = db.segments_for_recording(recording_id)?;
    if let Some(zero) = segments.iter().find(|s| s.is_zero()) {
        return Ok(zero.id);
    }
    log::debug!("Creating zero segment for recording {}", recording_id);
    db.insert_segment(recording_id, 0, 0, "")
}

/// Save a recording together with its complete segment list.
///
/// The recording's times are normalized against its session before it is
/// stored. Each segment is saved independently; failures are logged and
/// reported without stopping the rest. Once every segment saved, stored
/// segments the list no longer mentions are deleted. Each stored segment is
/// matched by at most one edit. `recording_images` belong to the recording as
/// a whole and live on its zero segment, next to any images a zero edit in
/// the list carries.
pub fn update_recording(
    db: &Database,
    recording: &Recording,
    edits: &[SegmentEdit],
    recording_images: &[BinaryImage],
    vocabulary: &Vocabulary,
    files: &dyn FileTimes,
) -> Result<RecordingUpdate> {
    let session = db
        .get_session(recording.session_id)?
        .ok_or_else(|| AppError::NotFound(format!("session {}", recording.session_id)))?;

    let mut recording = recording.clone();
    normalize_recording(&mut recording, &session, files);
    let recording_id = db.merge_recording(&recording)?;

    let mut update = RecordingUpdate {
        recording_id,
        ..Default::default()
    };

    for edit in edits {
        match apply_segment(db, edit, recording_id, vocabulary, &update.segment_ids) {
            Ok(outcome) => update.segment_ids.push(outcome.segment_id),
            Err(e) => {
                let message = format!(
                    "Segment {}-{} ms of {}: {:#}",
                    edit.start_ms, edit.end_ms, recording.name, e
                );
                log::error!("{}", message);
                update.failures.push(message);
            }
        }
    }

    let zero = db
        .segments_for_recording(recording_id)?
        .into_iter()
        .find(|s| s.is_zero())
        .map(|s| s.id);
    if zero.is_some() || !recording_images.is_empty() {
        let zero = match zero {
            Some(id) => id,
            None => ensure_zero_segment(db, recording_id)?,
        };
        let mut target = Vec::new();
        if edits.iter().any(|e| e.is_zero()) {
            // The zero edit's images are already saved; keep them.
            for id in db.linked_members(links::SEGMENT_IMAGE, zero)? {
                if recording_images.iter().any(|i| i.id == id) {
                    continue;
                }
                if let Some(image) = db.get_image(id)? {
                    target.push(image);
                }
            }
        }
        target.extend(recording_images.iter().cloned());
        reconcile_images(db, zero, &target)?;
        if !update.segment_ids.contains(&zero) {
            update.segment_ids.push(zero);
        }
    }

    if update.failures.is_empty() {
        for segment in db.segments_for_recording(recording_id)? {
            if segment.is_zero() || update.segment_ids.contains(&segment.id) {
                continue;
            }
            delete_segment(db, segment.id)?;
            update.removed_segments.push(segment.id);
        }
    } else {
        log::warn!(
            "{} of {} segments failed for {}; keeping unmatched segments",
            update.failures.len(),
            edits.len(),
            recording.name
        );
    }

    log::info!(
        "Updated recording {} ({}): {} segments, {} removed",
        recording.name,
        recording_id,
        update.segment_ids.len(),
        update.removed_segments.len()
    );
    Ok(update)
}
