//! Date/time repair for sessions and recordings.
//!
//! Recorders often write files with bad timestamps (flat clock battery,
//! copies that reset the modification date). A recording dated after its
//! session ended is treated as corrupted and re-dated from the best evidence
//! available, then every recording is clamped into its session's window.

use chrono::{DateTime, Duration, Local, NaiveDate, NaiveDateTime, NaiveTime};
use regex::Regex;
use std::path::{Path, PathBuf};

use crate::database::models::{Recording, Session};

/// Length assumed for a recording that has no end time.
pub const DEFAULT_RECORDING_MINUTES: i64 = 4;

fn noon() -> NaiveTime {
    NaiveTime::from_hms_opt(12, 0, 0).unwrap_or(NaiveTime::MIN)
}

fn default_session_start() -> NaiveTime {
    NaiveTime::from_hms_opt(18, 0, 0).unwrap_or(NaiveTime::MIN)
}

fn default_session_end() -> NaiveTime {
    NaiveTime::from_hms_opt(23, 59, 59).unwrap_or(NaiveTime::MIN)
}

/// Source of file creation times.
pub trait FileTimes {
    fn created(&self, path: &Path) -> Option<NaiveDateTime>;
}

/// Reads creation times from the filesystem, in local time.
pub struct DiskFileTimes;

impl FileTimes for DiskFileTimes {
    fn created(&self, path: &Path) -> Option<NaiveDateTime> {
        let created = std::fs::metadata(path).ok()?.created().ok()?;
        let local: DateTime<Local> = created.into();
        Some(local.naive_local())
    }
}

/// Reports the same creation time, or none, for every file.
pub struct FixedFileTimes(pub Option<NaiveDateTime>);

impl FileTimes for FixedFileTimes {
    fn created(&self, _path: &Path) -> Option<NaiveDateTime> {
        self.0
    }
}

/// Start and end instants of a normalized recording.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordingTimes {
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
}

/// Fill in missing session times and dates and put the window the right way
/// round. Returns true if anything changed.
pub fn normalize_session(session: &mut Session) -> bool {
    let before = session.clone();

    let start_time = *session.start_time.get_or_insert_with(default_session_start);
    let end_time = *session.end_time.get_or_insert_with(default_session_end);
    let end_date = *session.end_date.get_or_insert(session.start_date);

    let start = session.start_date.and_time(start_time);
    let end = end_date.and_time(end_time);
    if start > end {
        log::info!("Session {} window is inverted, swapping start and end", session.tag);
        session.start_date = end.date();
        session.start_time = Some(end.time());
        session.end_date = Some(start.date());
        session.end_time = Some(start.time());
    }

    *session != before
}

/// Date and time embedded in a file name as `YYYY MM DD [sep] HH MM SS`,
/// e.g. `PIP_20210714_223000_001.wav`.
pub fn datetime_from_filename(name: &str) -> Option<NaiveDateTime> {
    let re = Regex::new(
        r"(?:^|[^0-9])(\d{4})[-_ ]?(\d{2})[-_ ]?(\d{2})[-_ T]?(\d{2})[-_ :.]?(\d{2})[-_ :.]?(\d{2})(?:[^0-9]|$)",
    )
    .ok()?;
    for caps in re.captures_iter(name) {
        let field = |i: usize| caps.get(i).and_then(|m| m.as_str().parse::<u32>().ok());
        let year = caps.get(1).and_then(|m| m.as_str().parse::<i32>().ok());
        let date = match (year, field(2), field(3)) {
            (Some(y), Some(m), Some(d)) => NaiveDate::from_ymd_opt(y, m, d),
            _ => None,
        };
        let time = match (field(4), field(5), field(6)) {
            (Some(h), Some(m), Some(s)) => NaiveTime::from_hms_opt(h, m, s),
            _ => None,
        };
        if let (Some(date), Some(time)) = (date, time) {
            return Some(date.and_time(time));
        }
    }
    None
}

fn clamp(instant: NaiveDateTime, low: NaiveDateTime, high: NaiveDateTime) -> NaiveDateTime {
    instant.max(low).min(high)
}

/// Where the recording's file is expected to live on disk.
fn recording_path(recording: &Recording, session: &Session) -> PathBuf {
    match &session.original_file_path {
        Some(folder) => Path::new(folder).join(&recording.name),
        None => PathBuf::from(&recording.name),
    }
}

/// Repair the recording's date when it lies after the session, derive its
/// start and end instants and clamp both into the session window.
///
/// The recording's date and times are rewritten in place; the resulting
/// instants are returned.
pub fn normalize_recording(
    recording: &mut Recording,
    session: &Session,
    files: &dyn FileTimes,
) -> RecordingTimes {
    let mut session = session.clone();
    normalize_session(&mut session);
    let (window_start, window_end) = session.window();

    let mut date = recording.date;
    let mut start_time = recording.start_time;

    let corrupted = date.map_or(true, |d| d > window_end.date());
    if corrupted {
        let path = recording_path(recording, &session);
        let repaired = if let Some(created) = files
            .created(&path)
            .filter(|c| *c >= window_start && *c <= window_end)
        {
            log::debug!("Re-dating {} from file creation time", recording.name);
            start_time = Some(created.time());
            created.date()
        } else if let Some(stamp) = datetime_from_filename(&recording.name) {
            log::debug!("Re-dating {} from its file name", recording.name);
            start_time = Some(stamp.time());
            stamp.date()
        } else if start_time.map_or(false, |t| t < noon()) {
            // Small hours belong to the night that began the day before.
            window_end.date()
        } else {
            window_start.date()
        };
        log::info!(
            "Recording {} dated {:?} lies outside session {}, using {}",
            recording.name,
            recording.date,
            session.tag,
            repaired
        );
        date = Some(repaired);
    }

    let date = date.unwrap_or(window_start.date());
    let start_time = start_time.unwrap_or(window_start.time());
    let start = date.and_time(start_time);

    let end = match recording.end_time {
        Some(end_time) => {
            let crosses_midnight = start_time >= noon() && end_time < noon();
            let end_date = if crosses_midnight {
                date.succ_opt().unwrap_or(date)
            } else {
                date
            };
            end_date.and_time(end_time)
        }
        None => start + Duration::minutes(DEFAULT_RECORDING_MINUTES),
    };

    let (start, end) = if start > end { (end, start) } else { (start, end) };
    let times = RecordingTimes {
        start: clamp(start, window_start, window_end),
        end: clamp(end, window_start, window_end),
    };

    recording.date = Some(times.start.date());
    recording.start_time = Some(times.start.time());
    recording.end_time = Some(times.end.time());
    times
}
