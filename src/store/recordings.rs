//! Durable store of saved recordings.
//!
//! Unlike queue entries, recordings are kept until the user deletes them.
//! The layout mirrors the upload queue: JSONL log, blob directory, and a
//! lifetime advisory lock.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::fs;

use super::{append_jsonl, payload_checksum, read_jsonl, StoreError, StoreLock};

/// A record in the recordings log
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordingRecord {
    pub timestamp: DateTime<Utc>,
    pub recording_id: u64,
    pub op: RecordingOp,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordingOp {
    Saved,
    Deleted,
}

/// A saved recording
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Recording {
    /// Store-assigned id, unique and ascending
    pub id: u64,

    /// Original file name
    pub file_name: String,

    /// Payload size in bytes
    pub size_bytes: u64,

    /// Recording length in seconds
    pub duration_secs: f64,

    /// SHA256 prefix of the payload
    pub checksum: String,

    /// When the recording was saved
    pub recorded_at: DateTime<Utc>,
}

impl Recording {
    fn blob_name(&self) -> String {
        format!("{:08}-{}.bin", self.id, self.checksum)
    }
}

/// Durable recording store.
pub struct RecordingStore {
    log_path: PathBuf,
    blobs_dir: PathBuf,
    _lock: StoreLock,
}

impl RecordingStore {
    /// Open (or create) the store rooted at `dir`.
    pub async fn open(dir: &Path) -> Result<Self, StoreError> {
        let blobs_dir = dir.join("recordings");
        fs::create_dir_all(&blobs_dir).await?;

        let lock = StoreLock::acquire(&dir.join("recordings.lock"))?;

        Ok(Self {
            log_path: dir.join("recordings.jsonl"),
            blobs_dir,
            _lock: lock,
        })
    }

    /// Open the store in the configured store directory.
    pub async fn open_default() -> anyhow::Result<Self> {
        let dir = crate::config::store_dir()?;
        Ok(Self::open(&dir).await?)
    }

    async fn replay(&self) -> Result<(BTreeMap<u64, Recording>, u64), StoreError> {
        let mut recordings: BTreeMap<u64, Recording> = BTreeMap::new();
        let mut max_id = 0u64;

        let records: Vec<RecordingRecord> = read_jsonl(&self.log_path).await?;

        for record in records {
            max_id = max_id.max(record.recording_id);

            match record.op {
                RecordingOp::Saved => {
                    if let Some(data) = record.data {
                        if let Ok(recording) = serde_json::from_value::<Recording>(data) {
                            recordings.insert(record.recording_id, recording);
                        }
                    }
                }
                RecordingOp::Deleted => {
                    recordings.remove(&record.recording_id);
                }
            }
        }

        Ok((recordings, max_id))
    }

    /// Save a recording, assigning the next ascending id.
    pub async fn save(
        &self,
        payload: &[u8],
        file_name: &str,
        duration_secs: f64,
    ) -> Result<Recording, StoreError> {
        let (_, max_id) = self.replay().await?;
        let id = max_id + 1;

        let recording = Recording {
            id,
            file_name: file_name.to_string(),
            size_bytes: payload.len() as u64,
            duration_secs,
            checksum: payload_checksum(payload),
            recorded_at: Utc::now(),
        };

        fs::write(self.blobs_dir.join(recording.blob_name()), payload).await?;

        let record = RecordingRecord {
            timestamp: Utc::now(),
            recording_id: id,
            op: RecordingOp::Saved,
            data: Some(serde_json::to_value(&recording)?),
        };
        append_jsonl(&self.log_path, &record).await?;

        Ok(recording)
    }

    /// All recordings in insertion order.
    pub async fn list(&self) -> Result<Vec<Recording>, StoreError> {
        let (recordings, _) = self.replay().await?;
        Ok(recordings.into_values().collect())
    }

    /// Get a recording by id.
    pub async fn get(&self, id: u64) -> Result<Option<Recording>, StoreError> {
        let (recordings, _) = self.replay().await?;
        Ok(recordings.get(&id).cloned())
    }

    /// Read the payload bytes for a recording.
    pub async fn payload(&self, id: u64) -> Result<Vec<u8>, StoreError> {
        let recording = self.get(id).await?.ok_or(StoreError::NotFound(id))?;
        Ok(fs::read(self.blobs_dir.join(recording.blob_name())).await?)
    }

    /// Delete a recording. Idempotent.
    pub async fn delete(&self, id: u64) -> Result<bool, StoreError> {
        let (recordings, _) = self.replay().await?;

        let recording = match recordings.get(&id) {
            Some(recording) => recording.clone(),
            None => return Ok(false),
        };

        let record = RecordingRecord {
            timestamp: Utc::now(),
            recording_id: id,
            op: RecordingOp::Deleted,
            data: None,
        };
        append_jsonl(&self.log_path, &record).await?;

        if let Err(e) = fs::remove_file(self.blobs_dir.join(recording.blob_name())).await {
            tracing::warn!("Failed to delete blob for recording {}: {}", id, e);
        }

        Ok(true)
    }
}
