//! Durable queue of pending audio uploads.
//!
//! Each entry is one not-yet-confirmed upload. Removal is the only signal
//! of confirmed delivery: the sync agent removes an entry exactly when the
//! remote API has acknowledged the upload. Entry ids are strictly ascending
//! and never reused, even across removals and process restarts.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::fs;
use uuid::Uuid;

use super::{append_jsonl, payload_checksum, read_jsonl, StoreError, StoreLock};

/// A record in the queue log (append-only)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueRecord {
    /// When this record was written
    pub timestamp: DateTime<Utc>,

    /// The entry this record applies to
    pub entry_id: u64,

    /// What happened
    pub op: QueueOp,

    /// Entry data (present for `added`)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

/// Queue log operations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueOp {
    /// Entry added to the queue
    Added,

    /// Entry removed after a confirmed upload (or explicit discard)
    Removed,
}

/// A pending upload. Immutable after creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueEntry {
    /// Store-assigned id, unique and strictly ascending
    pub id: u64,

    /// Token sent with the upload so a duplicate drain cannot double-submit
    pub dedup_token: Uuid,

    /// Original file name, used as the multipart filename
    pub file_name: String,

    /// Payload size in bytes
    pub size_bytes: u64,

    /// SHA256 prefix of the payload
    pub checksum: String,

    /// When the entry was enqueued
    pub created_at: DateTime<Utc>,
}

impl QueueEntry {
    /// Blob file name for this entry
    fn blob_name(&self) -> String {
        format!("{:08}-{}.bin", self.id, self.checksum)
    }
}

/// Durable upload queue: JSONL log + blob directory.
pub struct UploadQueue {
    log_path: PathBuf,
    blobs_dir: PathBuf,
    _lock: StoreLock,
}

impl UploadQueue {
    /// Open (or create) the queue rooted at `dir`.
    ///
    /// Fails with `StoreError::Locked` if another handle already holds the
    /// queue open.
    pub async fn open(dir: &Path) -> Result<Self, StoreError> {
        let blobs_dir = dir.join("uploads");
        fs::create_dir_all(&blobs_dir).await?;

        let lock = StoreLock::acquire(&dir.join("upload_queue.lock"))?;

        Ok(Self {
            log_path: dir.join("upload_queue.jsonl"),
            blobs_dir,
            _lock: lock,
        })
    }

    /// Open the queue in the configured store directory.
    pub async fn open_default() -> anyhow::Result<Self> {
        let dir = crate::config::store_dir()?;
        Ok(Self::open(&dir).await?)
    }

    /// Path to the queue log file
    pub fn log_path(&self) -> &Path {
        &self.log_path
    }

    /// Replay the log: live entries keyed by id, plus the highest id ever
    /// issued (including removed entries).
    async fn replay(&self) -> Result<(BTreeMap<u64, QueueEntry>, u64), StoreError> {
        let mut entries: BTreeMap<u64, QueueEntry> = BTreeMap::new();
        let mut max_id = 0u64;

        let records: Vec<QueueRecord> = read_jsonl(&self.log_path).await?;

        for record in records {
            max_id = max_id.max(record.entry_id);

            match record.op {
                QueueOp::Added => {
                    if let Some(data) = record.data {
                        if let Ok(entry) = serde_json::from_value::<QueueEntry>(data) {
                            entries.insert(record.entry_id, entry);
                        }
                    }
                }
                QueueOp::Removed => {
                    entries.remove(&record.entry_id);
                }
            }
        }

        Ok((entries, max_id))
    }

    /// Enqueue a payload, assigning the next ascending id.
    pub async fn enqueue(&self, payload: &[u8], file_name: &str) -> Result<QueueEntry, StoreError> {
        self.enqueue_with_token(payload, file_name, Uuid::new_v4())
            .await
    }

    /// Enqueue with a caller-supplied dedup token.
    ///
    /// Used when an immediate upload was already attempted with the token,
    /// so a later drain presents the same identity to the server.
    pub async fn enqueue_with_token(
        &self,
        payload: &[u8],
        file_name: &str,
        dedup_token: Uuid,
    ) -> Result<QueueEntry, StoreError> {
        let (_, max_id) = self.replay().await?;
        let id = max_id + 1;

        let entry = QueueEntry {
            id,
            dedup_token,
            file_name: file_name.to_string(),
            size_bytes: payload.len() as u64,
            checksum: payload_checksum(payload),
            created_at: Utc::now(),
        };

        // Blob first, then the log record; an orphan blob is harmless, a
        // log entry pointing at a missing blob is not.
        fs::write(self.blobs_dir.join(entry.blob_name()), payload).await?;

        let record = QueueRecord {
            timestamp: Utc::now(),
            entry_id: id,
            op: QueueOp::Added,
            data: Some(serde_json::to_value(&entry)?),
        };
        append_jsonl(&self.log_path, &record).await?;

        Ok(entry)
    }

    /// All pending entries in insertion order.
    pub async fn list_all(&self) -> Result<Vec<QueueEntry>, StoreError> {
        let (entries, _) = self.replay().await?;
        Ok(entries.into_values().collect())
    }

    /// Number of pending entries.
    pub async fn len(&self) -> Result<usize, StoreError> {
        let (entries, _) = self.replay().await?;
        Ok(entries.len())
    }

    /// Whether the queue is empty.
    pub async fn is_empty(&self) -> Result<bool, StoreError> {
        Ok(self.len().await? == 0)
    }

    /// Get a single entry by id.
    pub async fn get(&self, id: u64) -> Result<Option<QueueEntry>, StoreError> {
        let (entries, _) = self.replay().await?;
        Ok(entries.get(&id).cloned())
    }

    /// Read the payload bytes for an entry.
    pub async fn payload(&self, id: u64) -> Result<Vec<u8>, StoreError> {
        let entry = self.get(id).await?.ok_or(StoreError::NotFound(id))?;
        Ok(fs::read(self.blobs_dir.join(entry.blob_name())).await?)
    }

    /// Remove an entry. Idempotent: removing an absent id is a no-op.
    ///
    /// Returns whether an entry was actually removed.
    pub async fn remove(&self, id: u64) -> Result<bool, StoreError> {
        let (entries, _) = self.replay().await?;

        let entry = match entries.get(&id) {
            Some(entry) => entry.clone(),
            None => return Ok(false),
        };

        let record = QueueRecord {
            timestamp: Utc::now(),
            entry_id: id,
            op: QueueOp::Removed,
            data: None,
        };
        append_jsonl(&self.log_path, &record).await?;

        // Best effort: the log already says the entry is gone
        if let Err(e) = fs::remove_file(self.blobs_dir.join(entry.blob_name())).await {
            tracing::warn!("Failed to delete blob for entry {}: {}", id, e);
        }

        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn create_test_queue() -> (UploadQueue, TempDir) {
        let temp = TempDir::new().unwrap();
        let queue = UploadQueue::open(temp.path()).await.unwrap();
        (queue, temp)
    }

    #[tokio::test]
    async fn test_enqueue_assigns_ascending_ids() {
        let (queue, _temp) = create_test_queue().await;

        let a = queue.enqueue(b"first", "a.wav").await.unwrap();
        let b = queue.enqueue(b"second", "b.wav").await.unwrap();
        let c = queue.enqueue(b"third", "c.wav").await.unwrap();

        assert_eq!(a.id, 1);
        assert_eq!(b.id, 2);
        assert_eq!(c.id, 3);
    }

    #[tokio::test]
    async fn test_list_all_insertion_order() {
        let (queue, _temp) = create_test_queue().await;

        queue.enqueue(b"one", "1.wav").await.unwrap();
        queue.enqueue(b"two", "2.wav").await.unwrap();
        queue.enqueue(b"three", "3.wav").await.unwrap();

        let entries = queue.list_all().await.unwrap();
        let ids: Vec<u64> = entries.iter().map(|e| e.id).collect();
        assert_eq!(ids, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_payload_round_trip() {
        let (queue, _temp) = create_test_queue().await;

        let entry = queue.enqueue(b"pcm pcm pcm", "take.wav").await.unwrap();
        assert_eq!(entry.size_bytes, 11);

        let bytes = queue.payload(entry.id).await.unwrap();
        assert_eq!(bytes, b"pcm pcm pcm");
    }

    #[tokio::test]
    async fn test_remove_is_idempotent() {
        let (queue, _temp) = create_test_queue().await;

        let keep = queue.enqueue(b"keep", "keep.wav").await.unwrap();
        let gone = queue.enqueue(b"gone", "gone.wav").await.unwrap();

        assert!(queue.remove(gone.id).await.unwrap());
        assert!(!queue.remove(gone.id).await.unwrap());

        // The other entry is untouched
        let entries = queue.list_all().await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].id, keep.id);
    }

    #[tokio::test]
    async fn test_remove_absent_id_is_noop() {
        let (queue, _temp) = create_test_queue().await;
        assert!(!queue.remove(999).await.unwrap());
    }

    #[tokio::test]
    async fn test_ids_not_reused_after_removal() {
        let (queue, _temp) = create_test_queue().await;

        let first = queue.enqueue(b"a", "a.wav").await.unwrap();
        queue.remove(first.id).await.unwrap();

        let second = queue.enqueue(b"b", "b.wav").await.unwrap();
        assert_eq!(second.id, first.id + 1);
    }

    #[tokio::test]
    async fn test_survives_reopen() {
        let temp = TempDir::new().unwrap();

        {
            let queue = UploadQueue::open(temp.path()).await.unwrap();
            queue.enqueue(b"persisted", "p.wav").await.unwrap();
        }

        let queue = UploadQueue::open(temp.path()).await.unwrap();
        let entries = queue.list_all().await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].file_name, "p.wav");
        assert_eq!(queue.payload(entries[0].id).await.unwrap(), b"persisted");

        // Ids stay monotonic across the reopen
        let next = queue.enqueue(b"next", "n.wav").await.unwrap();
        assert_eq!(next.id, 2);
    }

    #[tokio::test]
    async fn test_second_open_is_rejected() {
        let temp = TempDir::new().unwrap();
        let _queue = UploadQueue::open(temp.path()).await.unwrap();

        match UploadQueue::open(temp.path()).await {
            Err(StoreError::Locked(_)) => {}
            other => panic!("expected Locked, got {:?}", other.map(|_| ())),
        }
    }

    #[tokio::test]
    async fn test_dedup_token_is_stable() {
        let (queue, _temp) = create_test_queue().await;

        let token = Uuid::new_v4();
        let entry = queue
            .enqueue_with_token(b"x", "x.wav", token)
            .await
            .unwrap();
        assert_eq!(entry.dedup_token, token);

        let listed = queue.list_all().await.unwrap();
        assert_eq!(listed[0].dedup_token, token);
    }
}
