use serde::Serialize;

use crate::annotation::Vocabulary;
use crate::database::{BinaryImage, Database, Recording, RecordingUpdate, Segment, SegmentEdit};
use crate::error::AppError;
use crate::reconcile::cascade::{self, CascadeReport};
use crate::reconcile::pipeline::{self, SegmentOutcome};
use crate::temporal::{DiskFileTimes, FileTimes};

#[derive(Debug, Serialize)]
pub struct RecordingDetail {
    pub recording: Recording,
    pub segments: Vec<Segment>,
}

pub fn get_recordings(db: &Database, session_id: i64) -> Result<Vec<Recording>, AppError> {
    db.recordings_for_session(session_id).map_err(AppError::from)
}

pub fn get_recording(db: &Database, id: i64) -> Result<RecordingDetail, AppError> {
    let recording = db
        .get_recording(id)?
        .ok_or_else(|| AppError::NotFound(format!("recording {}", id)))?;
    let segments = db.segments_for_recording(id)?;
    Ok(RecordingDetail {
        recording,
        segments,
    })
}

/// Save a recording and its full segment list, reading file creation times
/// from disk
pub fn save_recording(
    db: &Database,
    recording: &Recording,
    segments: &[SegmentEdit],
    images: &[BinaryImage],
) -> Result<RecordingUpdate, AppError> {
    save_recording_with(db, recording, segments, images, &DiskFileTimes)
}

pub fn save_recording_with(
    db: &Database,
    recording: &Recording,
    segments: &[SegmentEdit],
    images: &[BinaryImage],
    files: &dyn FileTimes,
) -> Result<RecordingUpdate, AppError> {
    log::info!(
        "Saving recording {} with {} segments",
        recording.name,
        segments.len()
    );
    let vocabulary = Vocabulary::new(&db.get_bats()?);
    pipeline::update_recording(db, recording, segments, images, &vocabulary, files)
        .map_err(AppError::from)
}

/// Save a single segment of an existing recording
pub fn save_segment(
    db: &Database,
    recording_id: i64,
    segment: &SegmentEdit,
) -> Result<SegmentOutcome, AppError> {
    let vocabulary = Vocabulary::new(&db.get_bats()?);
    pipeline::update_segment(db, segment, recording_id, &vocabulary).map_err(AppError::from)
}

pub fn delete_recording(db: &Database, id: i64) -> Result<CascadeReport, AppError> {
    log::info!("Deleting recording {}", id);
    cascade::delete_recording(db, id).map_err(AppError::from)
}

pub fn delete_segment(db: &Database, id: i64) -> Result<CascadeReport, AppError> {
    log::info!("Deleting segment {}", id);
    cascade::delete_segment(db, id).map_err(AppError::from)
}
