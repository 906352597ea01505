//! Durable local storage for pending uploads and saved recordings.
//!
//! Both stores follow the same pattern: an append-only JSONL log is the
//! source of truth, current state is derived by replaying the log, and
//! payload bytes live in a blob directory next to it. An exclusive advisory
//! lock is held for the lifetime of an open store, so a second process (or
//! a second handle in the same process) cannot interleave writes.

pub mod queue;
pub mod recordings;

use std::path::{Path, PathBuf};

use fs2::FileExt;
use serde::de::DeserializeOwned;
use serde::Serialize;
use sha2::{Digest, Sha256};
use thiserror::Error;
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

// Re-export key types
pub use queue::{QueueEntry, UploadQueue};
pub use recordings::{Recording, RecordingStore};

/// Errors that can occur in the durable stores
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Entry not found: {0}")]
    NotFound(u64),

    #[error("Store is locked by another writer: {0}")]
    Locked(PathBuf),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Guard holding the exclusive lock on a store directory.
///
/// The lock file stays on disk; the advisory lock is released when the
/// guard is dropped.
#[derive(Debug)]
pub(crate) struct StoreLock {
    _file: std::fs::File,
}

impl StoreLock {
    /// Acquire the lock, failing fast if another writer holds it.
    pub(crate) fn acquire(lock_path: &Path) -> Result<Self, StoreError> {
        let file = std::fs::OpenOptions::new()
            .create(true)
            .write(true)
            .open(lock_path)?;

        file.try_lock_exclusive()
            .map_err(|_| StoreError::Locked(lock_path.to_path_buf()))?;

        Ok(Self { _file: file })
    }
}

/// Append one record as a JSON line, flushing before returning.
pub(crate) async fn append_jsonl<T: Serialize>(path: &Path, record: &T) -> Result<(), StoreError> {
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await?;

    let json = serde_json::to_string(record)?;
    file.write_all(format!("{}\n", json).as_bytes()).await?;
    file.flush().await?;

    Ok(())
}

/// Read every record from a JSONL log, skipping blank lines.
pub(crate) async fn read_jsonl<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>, StoreError> {
    let mut records = Vec::new();

    if !path.exists() {
        return Ok(records);
    }

    let file = File::open(path).await?;
    let reader = BufReader::new(file);
    let mut lines = reader.lines();

    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }

        records.push(serde_json::from_str(&line)?);
    }

    Ok(records)
}

/// Compute the SHA256 checksum of a payload (first 12 hex chars).
pub(crate) fn payload_checksum(payload: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(payload);
    let digest = hasher.finalize();

    hex::encode(&digest)[..12].to_string()
}
