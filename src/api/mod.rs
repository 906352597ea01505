//! Remote transcription API gateway.
//!
//! `ApiClient` is the single HTTP wrapper for the remote API; everything
//! that consumes it (sync agent, status poller) depends on the
//! `TranscriptApi` trait instead, so tests can substitute in-memory fakes.
//!
//! The gateway never retries. Retry policy lives with the callers: the
//! sync agent retries by leaving failed entries queued, the poller retries
//! bounded transient transport errors.

pub mod client;
pub mod credentials;

use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

use crate::domain::{JobStatus, TranscriptDetail};

// Re-export key types
pub use client::ApiClient;
pub use credentials::{parse_provisioning, ApiCredentials, CredentialStore};

/// Errors from the remote API gateway
#[derive(Debug, Error)]
pub enum ApiError {
    /// No credentials have been configured
    #[error("API credentials not configured")]
    NotConfigured,

    /// The server rejected our credentials (401/403)
    #[error("Authentication rejected (HTTP {0})")]
    Auth(u16),

    /// Any other non-2xx response
    #[error("HTTP {status}: {message}")]
    Http { status: u16, message: String },

    /// The transport layer could not complete the request
    #[error("Network error: {0}")]
    Network(String),

    /// Malformed provisioning payload, persisted state, or response body
    #[error("Invalid data: {0}")]
    InvalidData(String),
}

impl From<reqwest::Error> for ApiError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            Self::InvalidData(err.to_string())
        } else {
            Self::Network(err.to_string())
        }
    }
}

/// The remote API surface the rest of the client depends on.
#[async_trait]
pub trait TranscriptApi: Send + Sync {
    /// Upload audio for transcription, returning the new job id.
    async fn upload_audio(
        &self,
        payload: Vec<u8>,
        file_name: &str,
        dedup_token: Uuid,
    ) -> Result<String, ApiError>;

    /// Fetch the current status of a job.
    async fn transcript_status(&self, transcript_id: &str) -> Result<JobStatus, ApiError>;

    /// Fetch the full job detail (including the result, once completed).
    async fn transcript(&self, transcript_id: &str) -> Result<TranscriptDetail, ApiError>;

    /// List all transcript ids known to the server.
    async fn list_transcripts(&self) -> Result<Vec<String>, ApiError>;
}
