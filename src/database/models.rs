use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};

/// Identity carried by entities that have not been persisted yet.
/// Any negative id is treated the same way by the reconciler.
pub const UNASSIGNED_ID: i64 = -1;

/// Common name of the reserved placeholder species.
pub const NO_BATS: &str = "No Bats";

pub const SESSION_TAG_MAX_LEN: usize = 120;

/// Recording files must carry one of these extensions (compared case-insensitively).
pub const MEDIA_EXTENSIONS: &[&str] = &["wav"];

pub fn is_unassigned(id: i64) -> bool {
    id < 0
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub id: i64,
    pub tag: String,
    pub title: Option<String>,
    pub location: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub start_date: NaiveDate,
    pub start_time: Option<NaiveTime>,
    pub end_date: Option<NaiveDate>,
    pub end_time: Option<NaiveTime>,
    pub operator: Option<String>,
    pub equipment: Option<String>,
    pub microphone: Option<String>,
    pub weather: Option<String>,
    pub notes: Option<String>,
    /// Folder the session's recordings were imported from.
    pub original_file_path: Option<String>,
}

impl Session {
    pub fn new(tag: &str, start_date: NaiveDate) -> Self {
        Self {
            id: UNASSIGNED_ID,
            tag: tag.to_string(),
            title: None,
            location: None,
            latitude: None,
            longitude: None,
            start_date,
            start_time: None,
            end_date: None,
            end_time: None,
            operator: None,
            equipment: None,
            microphone: None,
            weather: None,
            notes: None,
            original_file_path: None,
        }
    }

    /// Session window as instants. Only meaningful after normalization,
    /// missing parts fall back to midnight.
    pub fn window(&self) -> (NaiveDateTime, NaiveDateTime) {
        let start = self
            .start_date
            .and_time(self.start_time.unwrap_or(NaiveTime::MIN));
        let end = self
            .end_date
            .unwrap_or(self.start_date)
            .and_time(self.end_time.unwrap_or(NaiveTime::MIN));
        (start, end)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recording {
    pub id: i64,
    pub session_id: i64,
    /// File name of the recording, e.g. `PIP_20210714_223000.wav`
    pub name: String,
    pub date: Option<NaiveDate>,
    pub start_time: Option<NaiveTime>,
    pub end_time: Option<NaiveTime>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub notes: Option<String>,
}

impl Recording {
    pub fn new(session_id: i64, name: &str) -> Self {
        Self {
            id: UNASSIGNED_ID,
            session_id,
            name: name.to_string(),
            date: None,
            start_time: None,
            end_time: None,
            latitude: None,
            longitude: None,
            notes: None,
        }
    }

    pub fn has_media_extension(&self) -> bool {
        std::path::Path::new(&self.name)
            .extension()
            .and_then(|e| e.to_str())
            .map(|ext| MEDIA_EXTENSIONS.iter().any(|m| m.eq_ignore_ascii_case(ext)))
            .unwrap_or(false)
    }
}

/// A time-bounded region of a recording. Offsets are milliseconds from the
/// start of the recording.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Segment {
    pub id: i64,
    pub recording_id: i64,
    pub start_ms: i64,
    pub end_ms: i64,
    pub comment: String,
}

impl Segment {
    /// The placeholder that holds recording-level attachments.
    pub fn is_zero(&self) -> bool {
        self.start_ms == 0 && self.end_ms == 0
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bat {
    pub id: i64,
    pub name: String,
    pub genus: String,
    pub species: String,
    /// Free-text tags matched against comments, in sort order.
    pub tags: Vec<String>,
    pub sort_index: i64,
    pub notes: Option<String>,
}

impl Bat {
    pub fn new(name: &str, genus: &str, species: &str) -> Self {
        Self {
            id: UNASSIGNED_ID,
            name: name.to_string(),
            genus: genus.to_string(),
            species: species.to_string(),
            tags: Vec::new(),
            sort_index: 0,
            notes: None,
        }
    }

    pub fn with_tags(mut self, tags: &[&str]) -> Self {
        self.tags = tags.iter().map(|t| t.to_string()).collect();
        self
    }

    pub fn placeholder() -> Self {
        Self::new(NO_BATS, "None", "None")
    }
}

/// Acoustic parameters of a call. Frequencies in kHz, durations and
/// intervals in ms.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Call {
    pub id: i64,
    pub start_frequency: Option<f64>,
    pub start_frequency_variation: Option<f64>,
    pub end_frequency: Option<f64>,
    pub end_frequency_variation: Option<f64>,
    pub peak_frequency: Option<f64>,
    pub peak_frequency_variation: Option<f64>,
    pub pulse_duration: Option<f64>,
    pub pulse_duration_variation: Option<f64>,
    pub pulse_interval: Option<f64>,
    pub pulse_interval_variation: Option<f64>,
    pub call_type: Option<String>,
    pub call_function: Option<String>,
    pub notes: Option<String>,
}

impl Call {
    pub fn new() -> Self {
        Self {
            id: UNASSIGNED_ID,
            ..Default::default()
        }
    }

    /// True when every parameter is equal, ignoring identity.
    pub fn same_parameters(&self, other: &Call) -> bool {
        Call { id: 0, ..self.clone() } == Call { id: 0, ..other.clone() }
    }
}

/// Image attachment. `description` holds caption and description text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BinaryImage {
    pub id: i64,
    pub data: Vec<u8>,
    pub description: String,
    pub image_type: String,
}

impl BinaryImage {
    pub fn new(data: Vec<u8>, description: &str) -> Self {
        Self {
            id: UNASSIGNED_ID,
            data,
            description: description.to_string(),
            image_type: "PNG".to_string(),
        }
    }
}

/// A segment as edited by the caller, with the species and images the caller
/// wants attached to it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SegmentEdit {
    /// Identity assigned by an earlier save, if any.
    pub id: Option<i64>,
    pub start_ms: i64,
    pub end_ms: i64,
    pub comment: String,
    /// Species to link. `None` lets the comment parser decide.
    pub bats: Option<Vec<Bat>>,
    pub images: Vec<BinaryImage>,
}

impl SegmentEdit {
    pub fn new(start_ms: i64, end_ms: i64, comment: &str) -> Self {
        Self {
            id: None,
            start_ms,
            end_ms,
            comment: comment.to_string(),
            bats: None,
            images: Vec::new(),
        }
    }

    pub fn is_zero(&self) -> bool {
        self.start_ms == 0 && self.end_ms == 0
    }
}

/// Outcome of updating a recording together with its segment list.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RecordingUpdate {
    pub recording_id: i64,
    pub segment_ids: Vec<i64>,
    pub removed_segments: Vec<i64>,
    /// One message per segment that could not be saved.
    pub failures: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatStats {
    pub bat_id: i64,
    pub name: String,
    pub sessions: i64,
    pub recordings: i64,
    pub segments: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSummary {
    pub id: i64,
    pub tag: String,
    pub location: Option<String>,
    pub start_date: NaiveDate,
    pub recording_count: i64,
}
