//! Queue drain logic.

use std::sync::Arc;

use tokio::sync::Mutex;
use uuid::Uuid;

use crate::api::{ApiError, TranscriptApi};
use crate::store::{QueueEntry, StoreError, UploadQueue};

/// Result of a drain trigger.
#[derive(Debug)]
pub enum DrainOutcome {
    /// The drain ran; see the report.
    Completed(DrainReport),

    /// Another drain was already in flight; this trigger coalesced into it.
    AlreadyRunning,
}

/// What one drain pass did.
#[derive(Debug, Default)]
pub struct DrainReport {
    /// Entries uploaded and removed from the queue, in queue order
    pub uploaded: Vec<UploadedEntry>,

    /// Entries whose upload failed and which remain queued
    pub failed: usize,

    /// Entries left in the queue after the pass
    pub remaining: usize,
}

/// A successfully drained entry and its new remote job.
#[derive(Debug, Clone)]
pub struct UploadedEntry {
    pub entry_id: u64,
    pub transcript_id: String,
}

/// Result of submitting new audio.
#[derive(Debug)]
pub enum Submission {
    /// Uploaded immediately; poll this job.
    Uploaded { transcript_id: String },

    /// Upload failed; the payload is queued for a later drain.
    Queued { entry: QueueEntry, reason: String },
}

/// Drains the upload queue through the remote API.
pub struct SyncAgent {
    queue: Arc<UploadQueue>,
    api: Arc<dyn TranscriptApi>,
    drain_guard: Mutex<()>,
}

impl SyncAgent {
    pub fn new(queue: Arc<UploadQueue>, api: Arc<dyn TranscriptApi>) -> Self {
        Self {
            queue,
            api,
            drain_guard: Mutex::new(()),
        }
    }

    /// The queue this agent drains.
    pub fn queue(&self) -> &UploadQueue {
        &self.queue
    }

    /// A shared handle to the queue, for wiring up a watcher without a
    /// second store open (the store lock is per-open).
    pub fn queue_handle(&self) -> Arc<UploadQueue> {
        self.queue.clone()
    }

    /// Run one drain pass.
    ///
    /// Reads all entries in insertion order and attempts each upload. A
    /// successful upload removes the entry; a failed one stays queued for
    /// the next trigger and does not abort the pass. If a drain is already
    /// running, returns `AlreadyRunning` without touching the queue.
    pub async fn drain(&self) -> Result<DrainOutcome, StoreError> {
        let _guard = match self.drain_guard.try_lock() {
            Ok(guard) => guard,
            Err(_) => {
                tracing::debug!("Drain already in progress, coalescing trigger");
                return Ok(DrainOutcome::AlreadyRunning);
            }
        };

        let entries = self.queue.list_all().await?;
        let mut report = DrainReport::default();

        for entry in entries {
            let payload = match self.queue.payload(entry.id).await {
                Ok(payload) => payload,
                Err(e) => {
                    tracing::warn!("Skipping entry {}: {}", entry.id, e);
                    report.failed += 1;
                    continue;
                }
            };

            match self
                .api
                .upload_audio(payload, &entry.file_name, entry.dedup_token)
                .await
            {
                Ok(transcript_id) => {
                    self.queue.remove(entry.id).await?;
                    tracing::info!(
                        "Uploaded entry {} as transcript {}",
                        entry.id,
                        transcript_id
                    );
                    report.uploaded.push(UploadedEntry {
                        entry_id: entry.id,
                        transcript_id,
                    });
                }
                Err(e) => {
                    tracing::warn!("Upload failed for entry {}, leaving queued: {}", entry.id, e);
                    report.failed += 1;
                }
            }
        }

        report.remaining = self.queue.len().await?;
        Ok(DrainOutcome::Completed(report))
    }

    /// Submit new audio: try an immediate upload, fall back to the queue.
    ///
    /// The dedup token is generated once and reused by the queued entry,
    /// so a retry after a half-finished upload presents the same identity
    /// to the server. `NotConfigured` propagates instead of queueing,
    /// since without credentials the entry could never drain.
    pub async fn submit(&self, payload: Vec<u8>, file_name: &str) -> anyhow::Result<Submission> {
        let dedup_token = Uuid::new_v4();

        match self
            .api
            .upload_audio(payload.clone(), file_name, dedup_token)
            .await
        {
            Ok(transcript_id) => Ok(Submission::Uploaded { transcript_id }),
            Err(ApiError::NotConfigured) => Err(ApiError::NotConfigured.into()),
            Err(e) => {
                tracing::warn!("Immediate upload failed, queueing: {}", e);
                let entry = self
                    .queue
                    .enqueue_with_token(&payload, file_name, dedup_token)
                    .await?;
                Ok(Submission::Queued {
                    entry,
                    reason: e.to_string(),
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{JobStatus, TranscriptDetail};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use tempfile::TempDir;

    /// Fake API that counts uploads and can be toggled to fail.
    #[derive(Default)]
    struct FakeApi {
        uploads: AtomicUsize,
        fail_uploads: AtomicBool,
        gate: Option<tokio::sync::Semaphore>,
    }

    impl FakeApi {
        fn gated() -> Self {
            Self {
                gate: Some(tokio::sync::Semaphore::new(0)),
                ..Self::default()
            }
        }
    }

    #[async_trait]
    impl TranscriptApi for FakeApi {
        async fn upload_audio(
            &self,
            _payload: Vec<u8>,
            _file_name: &str,
            _dedup_token: Uuid,
        ) -> Result<String, ApiError> {
            if let Some(gate) = &self.gate {
                let _permit = gate.acquire().await.unwrap();
            }

            if self.fail_uploads.load(Ordering::SeqCst) {
                return Err(ApiError::Network("connection refused".to_string()));
            }

            let n = self.uploads.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(format!("t-{}", n))
        }

        async fn transcript_status(&self, _id: &str) -> Result<JobStatus, ApiError> {
            Ok(JobStatus::Pending)
        }

        async fn transcript(&self, id: &str) -> Result<TranscriptDetail, ApiError> {
            Ok(TranscriptDetail {
                id: id.to_string(),
                status: JobStatus::Completed,
                created_at: None,
                result: None,
            })
        }

        async fn list_transcripts(&self) -> Result<Vec<String>, ApiError> {
            Ok(Vec::new())
        }
    }

    async fn create_agent(api: Arc<FakeApi>) -> (SyncAgent, TempDir) {
        let temp = TempDir::new().unwrap();
        let queue = Arc::new(UploadQueue::open(temp.path()).await.unwrap());
        (SyncAgent::new(queue, api), temp)
    }

    #[tokio::test]
    async fn test_drain_empties_queue_one_upload_each() {
        let api = Arc::new(FakeApi::default());
        let (agent, _temp) = create_agent(api.clone()).await;

        agent.queue().enqueue(b"a", "a.wav").await.unwrap();
        agent.queue().enqueue(b"b", "b.wav").await.unwrap();
        agent.queue().enqueue(b"c", "c.wav").await.unwrap();

        let outcome = agent.drain().await.unwrap();
        let report = match outcome {
            DrainOutcome::Completed(report) => report,
            DrainOutcome::AlreadyRunning => panic!("unexpected coalesce"),
        };

        assert_eq!(report.uploaded.len(), 3);
        assert_eq!(report.failed, 0);
        assert_eq!(report.remaining, 0);
        assert_eq!(api.uploads.load(Ordering::SeqCst), 3);
        assert!(agent.queue().is_empty().await.unwrap());

        // Uploads happened in insertion order
        let ids: Vec<u64> = report.uploaded.iter().map(|u| u.entry_id).collect();
        assert_eq!(ids, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_failed_drain_leaves_entries() {
        let api = Arc::new(FakeApi::default());
        api.fail_uploads.store(true, Ordering::SeqCst);
        let (agent, _temp) = create_agent(api.clone()).await;

        agent.queue().enqueue(b"a", "a.wav").await.unwrap();
        agent.queue().enqueue(b"b", "b.wav").await.unwrap();

        let outcome = agent.drain().await.unwrap();
        let report = match outcome {
            DrainOutcome::Completed(report) => report,
            DrainOutcome::AlreadyRunning => panic!("unexpected coalesce"),
        };

        assert_eq!(report.uploaded.len(), 0);
        assert_eq!(report.failed, 2);
        assert_eq!(report.remaining, 2);

        // Next trigger succeeds and drains everything
        api.fail_uploads.store(false, Ordering::SeqCst);
        let outcome = agent.drain().await.unwrap();
        match outcome {
            DrainOutcome::Completed(report) => {
                assert_eq!(report.uploaded.len(), 2);
                assert_eq!(report.remaining, 0);
            }
            DrainOutcome::AlreadyRunning => panic!("unexpected coalesce"),
        }
    }

    #[tokio::test]
    async fn test_one_failure_does_not_abort_pass() {
        // One entry's blob is missing; the rest of the pass must still run
        let api = Arc::new(FakeApi::default());
        let (agent, temp) = create_agent(api.clone()).await;

        let broken = agent.queue().enqueue(b"broken", "x.wav").await.unwrap();
        agent.queue().enqueue(b"fine", "y.wav").await.unwrap();

        // Delete the first entry's blob out from under the store
        let blob = temp
            .path()
            .join("uploads")
            .join(format!("{:08}-{}.bin", broken.id, broken.checksum));
        tokio::fs::remove_file(blob).await.unwrap();

        let outcome = agent.drain().await.unwrap();
        match outcome {
            DrainOutcome::Completed(report) => {
                assert_eq!(report.uploaded.len(), 1);
                assert_eq!(report.failed, 1);
                assert_eq!(report.remaining, 1);
            }
            DrainOutcome::AlreadyRunning => panic!("unexpected coalesce"),
        }
    }

    #[tokio::test]
    async fn test_concurrent_drain_coalesces() {
        let api = Arc::new(FakeApi::gated());
        let (agent, _temp) = create_agent(api.clone()).await;
        let agent = Arc::new(agent);

        agent.queue().enqueue(b"a", "a.wav").await.unwrap();

        // First drain parks inside the gated upload
        let first = {
            let agent = agent.clone();
            tokio::spawn(async move { agent.drain().await.unwrap() })
        };
        tokio::task::yield_now().await;

        // Give the first drain time to take the guard
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        // Second trigger must coalesce, not double-submit
        let second = agent.drain().await.unwrap();
        assert!(matches!(second, DrainOutcome::AlreadyRunning));

        // Release the gate and let the first drain finish
        api.gate.as_ref().unwrap().add_permits(1);
        let outcome = first.await.unwrap();
        match outcome {
            DrainOutcome::Completed(report) => assert_eq!(report.uploaded.len(), 1),
            DrainOutcome::AlreadyRunning => panic!("first drain should have run"),
        }

        assert_eq!(api.uploads.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_submit_uploads_when_api_healthy() {
        let api = Arc::new(FakeApi::default());
        let (agent, _temp) = create_agent(api.clone()).await;

        match agent.submit(b"hello".to_vec(), "r.wav").await.unwrap() {
            Submission::Uploaded { transcript_id } => assert_eq!(transcript_id, "t-1"),
            Submission::Queued { .. } => panic!("should have uploaded"),
        }

        assert!(agent.queue().is_empty().await.unwrap());
    }

    #[tokio::test]
    async fn test_submit_queues_on_failure() {
        let api = Arc::new(FakeApi::default());
        api.fail_uploads.store(true, Ordering::SeqCst);
        let (agent, _temp) = create_agent(api.clone()).await;

        match agent.submit(b"hello".to_vec(), "r.wav").await.unwrap() {
            Submission::Queued { entry, .. } => assert_eq!(entry.file_name, "r.wav"),
            Submission::Uploaded { .. } => panic!("should have queued"),
        }

        assert_eq!(agent.queue().len().await.unwrap(), 1);
    }
}
