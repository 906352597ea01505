//! Drop-folder watcher.
//!
//! Watches a directory for new audio files and enqueues them into the
//! upload queue once their size has been stable long enough (partially
//! copied files must not be uploaded). Consumed files are moved into an
//! `ingested/` subdirectory so a rescan does not enqueue them again.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use chrono::{DateTime, Utc};
use notify::RecursiveMode;
use notify_debouncer_mini::new_debouncer;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::config::WatchSettings;
use crate::store::UploadQueue;

/// Name of the subdirectory consumed files are moved into
const INGESTED_DIR: &str = "ingested";

/// Errors that can occur with the watcher
#[derive(Debug, Error)]
pub enum WatcherError {
    #[error("Watch directory does not exist: {0}")]
    DirectoryNotFound(PathBuf),

    #[error("Notify error: {0}")]
    Notify(#[from] notify::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Event emitted when an audio file has been enqueued
#[derive(Debug, Clone)]
pub struct QueuedFileEvent {
    /// Where the file was found
    pub path: PathBuf,

    /// The queue entry it became
    pub entry_id: u64,

    /// File size in bytes
    pub size: u64,

    /// When the file was picked up
    pub detected_at: DateTime<Utc>,
}

/// Result of a directory scan
#[derive(Debug, Clone, Default)]
pub struct ScanReport {
    /// Files enqueued and moved to `ingested/`
    pub enqueued: usize,

    /// Files skipped (wrong extension, directories)
    pub skipped: usize,

    /// Files that could not be read or enqueued
    pub errors: usize,
}

/// Drop-folder watcher with stability checking.
pub struct DropFolderWatcher {
    settings: WatchSettings,
}

impl DropFolderWatcher {
    pub fn new(settings: WatchSettings) -> Self {
        Self { settings }
    }

    /// Current settings.
    pub fn settings(&self) -> &WatchSettings {
        &self.settings
    }

    fn validate(&self) -> Result<(), WatcherError> {
        if !self.settings.path.exists() {
            return Err(WatcherError::DirectoryNotFound(self.settings.path.clone()));
        }
        Ok(())
    }

    /// Check if a path has one of the configured audio extensions
    fn is_audio_file(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| {
                self.settings
                    .extensions
                    .iter()
                    .any(|e| e.eq_ignore_ascii_case(ext))
            })
            .unwrap_or(false)
    }

    /// Enqueue one file and move it into `ingested/`.
    async fn consume(&self, queue: &UploadQueue, path: &Path) -> Result<QueuedFileEvent> {
        let payload = tokio::fs::read(path).await?;
        let file_name = path
            .file_name()
            .unwrap_or_default()
            .to_string_lossy()
            .to_string();

        let entry = queue.enqueue(&payload, &file_name).await?;

        let ingested_dir = self.settings.path.join(INGESTED_DIR);
        tokio::fs::create_dir_all(&ingested_dir).await?;
        if let Err(e) = tokio::fs::rename(path, ingested_dir.join(&file_name)).await {
            tracing::warn!(
                "Enqueued {} but could not move it aside: {}",
                path.display(),
                e
            );
        }

        Ok(QueuedFileEvent {
            path: path.to_path_buf(),
            entry_id: entry.id,
            size: entry.size_bytes,
            detected_at: Utc::now(),
        })
    }

    /// Scan the directory once and enqueue any audio files already there.
    pub async fn scan_once(&self, queue: &UploadQueue) -> Result<ScanReport> {
        self.validate().map_err(|e| anyhow::anyhow!("{}", e))?;

        let mut report = ScanReport::default();

        let mut entries = tokio::fs::read_dir(&self.settings.path).await?;

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();

            let metadata = match tokio::fs::metadata(&path).await {
                Ok(m) => m,
                Err(_) => continue,
            };

            if !metadata.is_file() || !self.is_audio_file(&path) {
                report.skipped += 1;
                continue;
            }

            match self.consume(queue, &path).await {
                Ok(event) => {
                    tracing::info!(
                        "Queued {} as entry {}",
                        path.display(),
                        event.entry_id
                    );
                    report.enqueued += 1;
                }
                Err(e) => {
                    tracing::warn!("Failed to enqueue {}: {}", path.display(), e);
                    report.errors += 1;
                }
            }
        }

        Ok(report)
    }

    /// Watch the directory and enqueue new stable files until stopped.
    pub async fn watch(
        &self,
        queue: Arc<UploadQueue>,
    ) -> Result<(mpsc::Receiver<QueuedFileEvent>, WatchHandle)> {
        self.validate().map_err(|e| anyhow::anyhow!("{}", e))?;

        let (event_tx, event_rx) = mpsc::channel::<QueuedFileEvent>(100);
        let (stop_tx, mut stop_rx) = mpsc::channel::<()>(1);

        let watcher = DropFolderWatcher {
            settings: self.settings.clone(),
        };

        let handle = tokio::spawn(async move {
            if let Err(e) = run_watcher(watcher, queue, event_tx, &mut stop_rx).await {
                tracing::error!("Watcher error: {}", e);
            }
        });

        Ok((
            event_rx,
            WatchHandle {
                stop_tx,
                task: handle,
            },
        ))
    }
}

/// Handle to control the watcher
pub struct WatchHandle {
    stop_tx: mpsc::Sender<()>,
    task: tokio::task::JoinHandle<()>,
}

impl WatchHandle {
    /// Stop the watcher
    pub async fn stop(self) -> Result<()> {
        let _ = self.stop_tx.send(()).await;
        self.task.await?;
        Ok(())
    }
}

/// Internal watcher loop
async fn run_watcher(
    watcher: DropFolderWatcher,
    queue: Arc<UploadQueue>,
    event_tx: mpsc::Sender<QueuedFileEvent>,
    stop_rx: &mut mpsc::Receiver<()>,
) -> Result<()> {
    // Track files being stabilized (path -> (size, last change))
    let mut pending: HashMap<PathBuf, (u64, Instant)> = HashMap::new();

    let (tx, rx) = std::sync::mpsc::channel();

    let mut debouncer = new_debouncer(Duration::from_secs(2), tx)?;
    debouncer
        .watcher()
        .watch(&watcher.settings.path, RecursiveMode::NonRecursive)?;

    let stability_delay = Duration::from_secs(watcher.settings.stability_delay_secs);

    tracing::info!(
        "Watching {} for audio files",
        watcher.settings.path.display()
    );

    loop {
        if stop_rx.try_recv().is_ok() {
            tracing::info!("Watcher stopping...");
            break;
        }

        match rx.recv_timeout(Duration::from_millis(500)) {
            Ok(Ok(events)) => {
                for event in events {
                    let path = event.path;

                    if !watcher.is_audio_file(&path) {
                        continue;
                    }

                    if let Ok(metadata) = std::fs::metadata(&path) {
                        if metadata.is_file() {
                            pending.insert(path, (metadata.len(), Instant::now()));
                        }
                    }
                }
            }
            Ok(Err(e)) => {
                tracing::warn!("Watcher error: {:?}", e);
            }
            Err(std::sync::mpsc::RecvTimeoutError::Timeout) => {
                // Expected - continue to stability check
            }
            Err(std::sync::mpsc::RecvTimeoutError::Disconnected) => {
                tracing::error!("Watcher channel disconnected");
                break;
            }
        }

        // Collect files whose size has held steady long enough
        let now = Instant::now();
        let mut stable_files = Vec::new();

        for (path, (last_size, last_seen)) in pending.iter() {
            if now.duration_since(*last_seen) >= stability_delay {
                if let Ok(metadata) = std::fs::metadata(path) {
                    if metadata.len() == *last_size && metadata.len() > 0 {
                        stable_files.push(path.clone());
                    }
                }
            }
        }

        for path in stable_files {
            pending.remove(&path);

            match watcher.consume(&queue, &path).await {
                Ok(event) => {
                    tracing::info!("Queued {} as entry {}", path.display(), event.entry_id);
                    let _ = event_tx.send(event).await;
                }
                Err(e) => {
                    tracing::warn!("Failed to enqueue {}: {}", path.display(), e);
                }
            }
        }

        tokio::time::sleep(Duration::from_millis(100)).await;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn test_settings(path: &Path) -> WatchSettings {
        WatchSettings {
            path: path.to_path_buf(),
            stability_delay_secs: 1,
            extensions: vec!["wav".to_string(), "m4a".to_string()],
        }
    }

    #[test]
    fn test_extension_filter() {
        let temp = TempDir::new().unwrap();
        let watcher = DropFolderWatcher::new(test_settings(temp.path()));

        assert!(watcher.is_audio_file(Path::new("take.wav")));
        assert!(watcher.is_audio_file(Path::new("take.M4A")));
        assert!(!watcher.is_audio_file(Path::new("notes.txt")));
        assert!(!watcher.is_audio_file(Path::new("noext")));
    }

    #[tokio::test]
    async fn test_scan_once_enqueues_and_moves_aside() {
        let temp = TempDir::new().unwrap();
        let inbox = temp.path().join("inbox");
        tokio::fs::create_dir_all(&inbox).await.unwrap();

        tokio::fs::write(inbox.join("one.wav"), b"audio 1").await.unwrap();
        tokio::fs::write(inbox.join("two.m4a"), b"audio 2").await.unwrap();
        tokio::fs::write(inbox.join("skip.txt"), b"not audio").await.unwrap();

        let store_dir = temp.path().join("store");
        tokio::fs::create_dir_all(&store_dir).await.unwrap();
        let queue = UploadQueue::open(&store_dir).await.unwrap();

        let watcher = DropFolderWatcher::new(test_settings(&inbox));
        let report = watcher.scan_once(&queue).await.unwrap();

        assert_eq!(report.enqueued, 2);
        assert_eq!(report.errors, 0);
        assert_eq!(queue.len().await.unwrap(), 2);

        // Files were moved aside
        assert!(!inbox.join("one.wav").exists());
        assert!(inbox.join(INGESTED_DIR).join("one.wav").exists());

        // Rescan finds nothing new
        let report2 = watcher.scan_once(&queue).await.unwrap();
        assert_eq!(report2.enqueued, 0);
        assert_eq!(queue.len().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_scan_missing_directory_fails() {
        let temp = TempDir::new().unwrap();
        let store_dir = temp.path().join("store");
        tokio::fs::create_dir_all(&store_dir).await.unwrap();
        let queue = UploadQueue::open(&store_dir).await.unwrap();

        let watcher = DropFolderWatcher::new(test_settings(&temp.path().join("absent")));
        assert!(watcher.scan_once(&queue).await.is_err());
    }
}
