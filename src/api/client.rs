//! HTTP client for the remote transcription API.
//!
//! Endpoints:
//! - `POST {base}/transcripts` (multipart, field `audio`) → new job
//! - `GET  {base}/transcripts` → array of job ids
//! - `GET  {base}/transcripts/{id}` → full job detail
//! - `GET  {base}/transcripts/{id}/status` → current status
//!
//! Every request carries a Basic auth header from the credential store.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::AUTHORIZATION;
use reqwest::multipart::{Form, Part};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use uuid::Uuid;

use crate::domain::{JobStatus, TranscriptDetail};

use super::{ApiError, CredentialStore, TranscriptApi};

/// Header carrying the queue entry's dedup token, so a duplicate drain
/// cannot double-submit an upload the server already accepted.
const IDEMPOTENCY_HEADER: &str = "Idempotency-Key";

/// Response to an audio upload
#[derive(Debug, Deserialize)]
struct UploadResponse {
    transcript_id: String,
}

/// Response from the status endpoint
#[derive(Debug, Deserialize)]
struct StatusResponse {
    status: JobStatus,
}

/// Error body the server may attach to non-2xx responses
#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: String,
}

/// Remote API client.
pub struct ApiClient {
    credentials: Arc<CredentialStore>,
    http: reqwest::Client,
}

impl ApiClient {
    /// Create a client with the default request timeout.
    pub fn new(credentials: Arc<CredentialStore>) -> Result<Self, ApiError> {
        Self::with_timeout(credentials, Duration::from_secs(30))
    }

    /// Create a client with an explicit per-request timeout.
    ///
    /// Every call goes through this client, so a hung server cannot hang
    /// an await forever.
    pub fn with_timeout(
        credentials: Arc<CredentialStore>,
        timeout: Duration,
    ) -> Result<Self, ApiError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ApiError::Network(e.to_string()))?;

        Ok(Self { credentials, http })
    }

    /// Build a full endpoint URL.
    async fn endpoint(&self, path: &str) -> Result<String, ApiError> {
        let creds = self.credentials.get().await.ok_or(ApiError::NotConfigured)?;
        Ok(format!("{}{}", creds.base_url(), path))
    }

    /// Turn a response into a decoded body or a taxonomy error.
    async fn decode<T: DeserializeOwned>(response: reqwest::Response) -> Result<T, ApiError> {
        let status = response.status();

        if status.as_u16() == 401 || status.as_u16() == 403 {
            return Err(ApiError::Auth(status.as_u16()));
        }

        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<ErrorBody>(&text)
                .map(|b| b.error)
                .unwrap_or(text);

            return Err(ApiError::Http {
                status: status.as_u16(),
                message,
            });
        }

        response
            .json::<T>()
            .await
            .map_err(|e| ApiError::InvalidData(format!("Malformed response body: {}", e)))
    }

    /// Authenticated GET returning a decoded JSON body.
    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        let url = self.endpoint(path).await?;
        let auth = self.credentials.auth_header().await?;

        let response = self
            .http
            .get(&url)
            .header(AUTHORIZATION, auth)
            .send()
            .await?;

        Self::decode(response).await
    }

    /// API root information. Used as the connection test.
    pub async fn api_info(&self) -> Result<serde_json::Value, ApiError> {
        self.get_json("").await
    }

    /// Whether the configured server answers an authenticated request.
    pub async fn test_connection(&self) -> bool {
        match self.api_info().await {
            Ok(_) => true,
            Err(e) => {
                tracing::debug!("Connection test failed: {}", e);
                false
            }
        }
    }
}

#[async_trait]
impl TranscriptApi for ApiClient {
    async fn upload_audio(
        &self,
        payload: Vec<u8>,
        file_name: &str,
        dedup_token: Uuid,
    ) -> Result<String, ApiError> {
        let url = self.endpoint("/transcripts").await?;
        let auth = self.credentials.auth_header().await?;

        let file_name = if file_name.is_empty() {
            "recording.wav".to_string()
        } else {
            file_name.to_string()
        };

        let part = Part::bytes(payload)
            .file_name(file_name)
            .mime_str("audio/wav")
            .map_err(|e| ApiError::InvalidData(e.to_string()))?;
        let form = Form::new().part("audio", part);

        let response = self
            .http
            .post(&url)
            .header(AUTHORIZATION, auth)
            .header(IDEMPOTENCY_HEADER, dedup_token.to_string())
            .multipart(form)
            .send()
            .await?;

        let body: UploadResponse = Self::decode(response).await?;
        Ok(body.transcript_id)
    }

    async fn transcript_status(&self, transcript_id: &str) -> Result<JobStatus, ApiError> {
        let body: StatusResponse = self
            .get_json(&format!("/transcripts/{}/status", transcript_id))
            .await?;
        Ok(body.status)
    }

    async fn transcript(&self, transcript_id: &str) -> Result<TranscriptDetail, ApiError> {
        self.get_json(&format!("/transcripts/{}", transcript_id))
            .await
    }

    async fn list_transcripts(&self) -> Result<Vec<String>, ApiError> {
        self.get_json("/transcripts").await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::ApiCredentials;
    use tempfile::TempDir;

    async fn configured_client() -> (ApiClient, TempDir) {
        let temp = TempDir::new().unwrap();
        let store = CredentialStore::open(&temp.path().join("credentials.json"))
            .await
            .unwrap();
        store
            .configure(ApiCredentials {
                url: "http://h:1/api/v1/".to_string(),
                username: "a".to_string(),
                password: "b".to_string(),
            })
            .await
            .unwrap();

        (ApiClient::new(Arc::new(store)).unwrap(), temp)
    }

    #[tokio::test]
    async fn test_endpoint_joins_without_double_slash() {
        let (client, _temp) = configured_client().await;

        assert_eq!(
            client.endpoint("/transcripts").await.unwrap(),
            "http://h:1/api/v1/transcripts"
        );
        assert_eq!(client.endpoint("").await.unwrap(), "http://h:1/api/v1");
    }

    #[tokio::test]
    async fn test_unconfigured_client_fails_fast() {
        let temp = TempDir::new().unwrap();
        let store = CredentialStore::open(&temp.path().join("credentials.json"))
            .await
            .unwrap();
        let client = ApiClient::new(Arc::new(store)).unwrap();

        assert!(matches!(
            client.transcript_status("t-1").await,
            Err(ApiError::NotConfigured)
        ));
        assert!(matches!(
            client
                .upload_audio(vec![1, 2, 3], "r.wav", Uuid::new_v4())
                .await,
            Err(ApiError::NotConfigured)
        ));
    }

    #[test]
    fn test_status_response_parses() {
        let body: StatusResponse = serde_json::from_str(r#"{"status":"processing"}"#).unwrap();
        assert_eq!(body.status, JobStatus::Processing);
    }

    #[test]
    fn test_upload_response_parses() {
        let body: UploadResponse = serde_json::from_str(r#"{"transcript_id":"t-9"}"#).unwrap();
        assert_eq!(body.transcript_id, "t-9");
    }
}
