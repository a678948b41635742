use serde::{Deserialize, Serialize};

// Response payloads

/// Acknowledgment of `POST /api/videos/upload`.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct UploadResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub video_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl UploadResponse {
    /// The server-assigned video id, or the reason the upload was refused.
    /// A success without an id counts as a refusal.
    pub fn into_result(self) -> Result<String, String> {
        match (self.success, self.video_id) {
            (true, Some(id)) => Ok(id),
            _ => Err(self.error.unwrap_or_else(|| "Upload failed".to_string())),
        }
    }
}

// Request payloads

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisOptions {
    /// Language hint, e.g. `en`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub include_transcript: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub include_sentiment: Option<bool>,
}

impl AnalysisOptions {
    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }
}

/// Body of `POST /api/videos/analyze`.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisRequest {
    pub video_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<AnalysisOptions>,
}

impl AnalysisRequest {
    pub fn new(video_id: impl Into<String>, options: AnalysisOptions) -> Self {
        Self {
            video_id: video_id.into(),
            options: (!options.is_empty()).then_some(options),
        }
    }
}
