use std::{
    fmt,
    str::FromStr,
    time::{SystemTime, UNIX_EPOCH},
};

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{de, Deserialize, Deserializer, Serialize};

use crate::validate::FileCandidate;

/// A video picked for upload, before it is handed to the server.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct VideoFile {
    /// Local token (time-ordered, random suffix). The server assigns its own id.
    pub id: String,
    pub name: String,
    pub size: u64,
    #[serde(rename = "type")]
    pub content_type: String,
    /// Milliseconds since the Unix epoch.
    pub last_modified: u64,
    /// `data:image/jpeg;base64,...` thumbnail, attached once generated.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preview: Option<String>,
}

impl VideoFile {
    pub fn new(candidate: &FileCandidate, last_modified: SystemTime) -> Self {
        let last_modified = last_modified
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);
        Self {
            id: uuidv7::create(),
            name: candidate.name.clone(),
            size: candidate.size,
            content_type: candidate.declared_type.clone(),
            last_modified,
            preview: None,
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum AnalysisStatus {
    /// Queued on the server; nothing has happened yet.
    Pending,
    /// The analysis is running. The record may carry a progress percentage.
    Processing,
    /// The analysis finished and the record carries its output.
    Completed,
    /// The analysis failed and the record carries the reason.
    Error,
}

impl AnalysisStatus {
    pub const ALL: [AnalysisStatus; 4] = [
        AnalysisStatus::Pending,
        AnalysisStatus::Processing,
        AnalysisStatus::Completed,
        AnalysisStatus::Error,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Error => "error",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Error)
    }

    fn rank(self) -> u8 {
        match self {
            Self::Pending => 0,
            Self::Processing => 1,
            Self::Completed | Self::Error => 2,
        }
    }

    /// Statuses only move forward: pending, processing, then completed or error.
    pub fn can_advance_to(self, next: Self) -> bool {
        if self.is_terminal() {
            return self == next;
        }
        next.rank() >= self.rank()
    }
}

impl fmt::Display for AnalysisStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AnalysisStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|status| status.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| format!("unknown analysis status \"{s}\""))
    }
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Sentiment {
    Positive,
    Negative,
    Neutral,
}

impl fmt::Display for Sentiment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Positive => write!(f, "positive"),
            Self::Negative => write!(f, "negative"),
            Self::Neutral => write!(f, "neutral"),
        }
    }
}

/// Output of a completed analysis.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Analysis {
    pub summary: String,
    #[serde(default)]
    pub key_points: Vec<String>,
    pub sentiment: Sentiment,
    /// Length of the analysed video in seconds.
    pub duration: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
}

impl Analysis {
    /// Duration as `m:ss`.
    pub fn formatted_duration(&self) -> String {
        let total = if self.duration.is_finite() && self.duration > 0.0 {
            self.duration.floor() as u64
        } else {
            0
        };
        format!("{}:{:02}", total / 60, total % 60)
    }
}

/// Server-owned record describing one analysis of an uploaded video.
///
/// `analysis` is only ever present on completed records and `error` only on
/// failed ones; decoding enforces this, so the accessors can be trusted.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase", try_from = "AnalysisResultWire")]
pub struct AnalysisResult {
    pub(crate) id: String,
    pub(crate) video_id: String,
    pub(crate) status: AnalysisStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) progress: Option<f64>,
    #[serde(rename = "result", skip_serializing_if = "Option::is_none")]
    pub(crate) analysis: Option<Analysis>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) error: Option<String>,
    pub(crate) created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) completed_at: Option<DateTime<Utc>>,
}

impl AnalysisResult {
    fn new(id: String, video_id: String, status: AnalysisStatus, created_at: DateTime<Utc>) -> Self {
        Self {
            id,
            video_id,
            status,
            progress: None,
            analysis: None,
            error: None,
            created_at,
            completed_at: None,
        }
    }

    pub fn pending(id: String, video_id: String, created_at: DateTime<Utc>) -> Self {
        Self::new(id, video_id, AnalysisStatus::Pending, created_at)
    }

    pub fn processing(
        id: String,
        video_id: String,
        created_at: DateTime<Utc>,
        progress: Option<f64>,
    ) -> Self {
        Self {
            progress,
            ..Self::new(id, video_id, AnalysisStatus::Processing, created_at)
        }
    }

    pub fn completed(
        id: String,
        video_id: String,
        created_at: DateTime<Utc>,
        completed_at: Option<DateTime<Utc>>,
        analysis: Analysis,
    ) -> Self {
        Self {
            progress: Some(100.0),
            analysis: Some(analysis),
            completed_at,
            ..Self::new(id, video_id, AnalysisStatus::Completed, created_at)
        }
    }

    pub fn failed(
        id: String,
        video_id: String,
        created_at: DateTime<Utc>,
        completed_at: Option<DateTime<Utc>>,
        error: String,
    ) -> Self {
        Self {
            error: Some(error),
            completed_at,
            ..Self::new(id, video_id, AnalysisStatus::Error, created_at)
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn video_id(&self) -> &str {
        &self.video_id
    }

    pub fn status(&self) -> AnalysisStatus {
        self.status
    }

    pub fn progress(&self) -> Option<f64> {
        self.progress
    }

    pub fn analysis(&self) -> Option<&Analysis> {
        self.analysis.as_ref()
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn completed_at(&self) -> Option<DateTime<Utc>> {
        self.completed_at
    }
}

/// RFC 3339, or a bare ISO 8601 date-time which is taken to be UTC.
fn parse_timestamp(s: &str) -> Result<DateTime<Utc>, chrono::ParseError> {
    DateTime::parse_from_rfc3339(s)
        .map(|t| t.with_timezone(&Utc))
        .or_else(|_| s.parse::<NaiveDateTime>().map(|t| t.and_utc()))
}

fn timestamp<'de, D: Deserializer<'de>>(deserializer: D) -> Result<DateTime<Utc>, D::Error> {
    let s = String::deserialize(deserializer)?;
    parse_timestamp(&s).map_err(|e| de::Error::custom(format!("bad timestamp \"{s}\": {e}")))
}

fn optional_timestamp<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<Option<DateTime<Utc>>, D::Error> {
    match Option::<String>::deserialize(deserializer)? {
        Some(s) => parse_timestamp(&s)
            .map(Some)
            .map_err(|e| de::Error::custom(format!("bad timestamp \"{s}\": {e}"))),
        None => Ok(None),
    }
}

/// The record as the server sends it, before the status/payload pairing is checked.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AnalysisResultWire {
    id: String,
    video_id: String,
    status: AnalysisStatus,
    #[serde(default)]
    progress: Option<f64>,
    // Kept loose: servers fill placeholders like `{}` into unfinished records.
    #[serde(default)]
    result: Option<serde_json::Value>,
    #[serde(default)]
    error: Option<String>,
    #[serde(deserialize_with = "timestamp")]
    created_at: DateTime<Utc>,
    #[serde(default, deserialize_with = "optional_timestamp")]
    completed_at: Option<DateTime<Utc>>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RecordError(String);

impl fmt::Display for RecordError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid analysis record: {}", self.0)
    }
}

impl std::error::Error for RecordError {}

impl TryFrom<AnalysisResultWire> for AnalysisResult {
    type Error = RecordError;

    fn try_from(wire: AnalysisResultWire) -> Result<Self, Self::Error> {
        let mut record = Self::new(wire.id, wire.video_id, wire.status, wire.created_at);
        record.progress = wire.progress;
        record.completed_at = wire.completed_at;
        match wire.status {
            AnalysisStatus::Completed => {
                let value = wire
                    .result
                    .filter(|v| !v.is_null())
                    .ok_or_else(|| RecordError(format!("completed record {} has no result", record.id)))?;
                let analysis = serde_json::from_value(value)
                    .map_err(|e| RecordError(format!("result of {}: {e}", record.id)))?;
                record.analysis = Some(analysis);
            }
            AnalysisStatus::Error => {
                let error = wire
                    .error
                    .ok_or_else(|| RecordError(format!("failed record {} has no error", record.id)))?;
                record.error = Some(error);
            }
            AnalysisStatus::Pending | AnalysisStatus::Processing => {}
        }
        Ok(record)
    }
}
