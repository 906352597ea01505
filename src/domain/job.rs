//! Transcription job types.
//!
//! A job is created by uploading audio and advances only forward:
//! pending → processing → {completed, failed}. The client never persists
//! job state locally; it is fetched on demand.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Status of a transcription job on the remote API.
///
/// Statuses the client does not recognize deserialize to `Unknown`, which
/// is treated as non-terminal so polling continues across server-side
/// status additions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", from = "String")]
pub enum JobStatus {
    /// Accepted, not yet picked up
    Pending,

    /// Transcription in progress
    Processing,

    /// Transcript is ready
    Completed,

    /// Transcription failed on the server
    Failed,

    /// Unrecognized status string
    Unknown,
}

impl From<String> for JobStatus {
    fn from(status: String) -> Self {
        match status.as_str() {
            "pending" => Self::Pending,
            "processing" => Self::Processing,
            "completed" => Self::Completed,
            "failed" => Self::Failed,
            _ => Self::Unknown,
        }
    }
}

impl JobStatus {
    /// Terminal states end polling.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Unknown => "unknown",
        };
        write!(f, "{}", s)
    }
}

/// Full job detail from `GET /transcripts/{id}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptDetail {
    /// Job id assigned by the remote API
    #[serde(alias = "transcript_id")]
    pub id: String,

    /// Current status
    pub status: JobStatus,

    /// When the job was created (if the server reports it)
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,

    /// Transcription result, present once completed
    #[serde(default)]
    pub result: Option<TranscriptResult>,
}

/// The transcript text and its timed segments.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptResult {
    #[serde(default)]
    pub text: String,

    #[serde(default)]
    pub segments: Vec<TranscriptSegment>,
}

/// A single timed span of the transcript.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptSegment {
    /// Start offset in seconds
    pub start: f64,

    /// End offset in seconds
    pub end: f64,

    #[serde(default)]
    pub text: String,
}
