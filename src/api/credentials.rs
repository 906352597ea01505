//! API credentials and out-of-band provisioning.
//!
//! Credentials arrive as a small JSON-like payload (in the original
//! system, scanned from a QR code): `{url, username, password}`. The
//! payload commonly uses single quotes, so quotes are normalized before
//! parsing. Parsed credentials persist to `credentials.json` under the
//! app home until explicitly cleared.

use std::path::{Path, PathBuf};

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use super::ApiError;

/// Connection details for the remote API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiCredentials {
    /// Base URL, e.g. `http://host:port/api/v1`
    pub url: String,
    pub username: String,
    pub password: String,
}

impl ApiCredentials {
    /// Base URL without a trailing slash.
    pub fn base_url(&self) -> &str {
        self.url.trim_end_matches('/')
    }

    /// `Basic base64(username:password)` header value.
    pub fn auth_header(&self) -> String {
        let encoded = BASE64.encode(format!("{}:{}", self.username, self.password));
        format!("Basic {}", encoded)
    }
}

/// Parse a provisioning payload into credentials.
///
/// Accepts the single-quote variant by normalizing quotes before parsing.
/// Any missing or empty field is an error.
pub fn parse_provisioning(payload: &str) -> Result<ApiCredentials, ApiError> {
    let normalized = payload.trim().replace('\'', "\"");

    let value: serde_json::Value = serde_json::from_str(&normalized)
        .map_err(|e| ApiError::InvalidData(format!("Malformed provisioning payload: {}", e)))?;

    let field = |name: &str| -> Result<String, ApiError> {
        value
            .get(name)
            .and_then(|v| v.as_str())
            .filter(|s| !s.is_empty())
            .map(|s| s.to_string())
            .ok_or_else(|| {
                ApiError::InvalidData(format!("Provisioning payload missing field `{}`", name))
            })
    };

    Ok(ApiCredentials {
        url: field("url")?,
        username: field("username")?,
        password: field("password")?,
    })
}

/// Holder for the current credentials, persisted to a JSON file.
///
/// Constructed explicitly and passed to the client at construction; there
/// is no process-wide credential singleton.
pub struct CredentialStore {
    path: PathBuf,
    current: RwLock<Option<ApiCredentials>>,
}

impl CredentialStore {
    /// Open the store, loading any previously persisted credentials.
    ///
    /// A malformed credentials file is an `InvalidData` error rather than
    /// being silently discarded.
    pub async fn open(path: &Path) -> Result<Self, ApiError> {
        let current = if path.exists() {
            let content = tokio::fs::read_to_string(path)
                .await
                .map_err(|e| ApiError::InvalidData(format!("Failed to read credentials: {}", e)))?;

            Some(serde_json::from_str(&content).map_err(|e| {
                ApiError::InvalidData(format!("Malformed credentials file: {}", e))
            })?)
        } else {
            None
        };

        Ok(Self {
            path: path.to_path_buf(),
            current: RwLock::new(current),
        })
    }

    /// Open the store at the configured credentials path.
    pub async fn open_default() -> anyhow::Result<Self> {
        let path = crate::config::credentials_path()?;

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        Ok(Self::open(&path).await?)
    }

    /// Whether credentials are currently set.
    pub async fn is_configured(&self) -> bool {
        self.current.read().await.is_some()
    }

    /// Current credentials, if set.
    pub async fn get(&self) -> Option<ApiCredentials> {
        self.current.read().await.clone()
    }

    /// Set and persist credentials.
    ///
    /// The file is written atomically: a temp file in the same directory
    /// is persisted over the target, so a crash never leaves a truncated
    /// credentials file behind.
    pub async fn configure(&self, credentials: ApiCredentials) -> Result<(), ApiError> {
        let json = serde_json::to_string_pretty(&credentials)
            .map_err(|e| ApiError::InvalidData(e.to_string()))?;

        let dir = self
            .path
            .parent()
            .map(|p| p.to_path_buf())
            .unwrap_or_else(|| PathBuf::from("."));

        let tmp = tempfile::NamedTempFile::new_in(&dir)
            .map_err(|e| ApiError::InvalidData(format!("Failed to write credentials: {}", e)))?;
        std::fs::write(tmp.path(), json)
            .map_err(|e| ApiError::InvalidData(format!("Failed to write credentials: {}", e)))?;
        tmp.persist(&self.path)
            .map_err(|e| ApiError::InvalidData(format!("Failed to persist credentials: {}", e)))?;

        *self.current.write().await = Some(credentials);
        tracing::info!("API credentials saved");

        Ok(())
    }

    /// Clear credentials and remove the persisted file.
    pub async fn clear(&self) -> Result<(), ApiError> {
        *self.current.write().await = None;

        if self.path.exists() {
            tokio::fs::remove_file(&self.path)
                .await
                .map_err(|e| ApiError::InvalidData(format!("Failed to remove credentials: {}", e)))?;
        }

        tracing::info!("API credentials cleared");
        Ok(())
    }

    /// `Authorization` header value for the current credentials.
    pub async fn auth_header(&self) -> Result<String, ApiError> {
        self.current
            .read()
            .await
            .as_ref()
            .map(|c| c.auth_header())
            .ok_or(ApiError::NotConfigured)
    }
}
