//! Poll a transcription job until it reaches a terminal state.
//!
//! Each poll runs as a spawned task owned by a `PollHandle`. The task
//! checks status immediately, then on a fixed interval. Distinct statuses
//! are delivered once each on the update channel; repeats are not
//! re-emitted. On `completed` the full transcript is fetched exactly once;
//! on `failed` the poll resolves with an error and fetches nothing.
//!
//! Transport errors are tolerated up to a bounded number of consecutive
//! attempts; anything else terminates the poll immediately.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

use crate::api::{ApiError, TranscriptApi};
use crate::domain::{JobStatus, TranscriptDetail};

/// Errors that end a poll without a transcript
#[derive(Debug, Error)]
pub enum PollError {
    /// The job reached the `failed` state on the server
    #[error("Transcription job {0} failed")]
    JobFailed(String),

    /// The API call that ended the poll
    #[error(transparent)]
    Api(#[from] ApiError),

    /// The poll task itself died
    #[error("Poll task panicked or was aborted: {0}")]
    Task(String),
}

/// How a poll ended
#[derive(Debug)]
pub enum PollOutcome {
    /// The job completed; the full transcript was fetched once.
    Completed(TranscriptDetail),

    /// The poll was cancelled before a terminal state.
    Cancelled,
}

/// Poller tunables
#[derive(Debug, Clone)]
pub struct PollerSettings {
    /// Time between status checks
    pub interval: Duration,

    /// Consecutive transport failures tolerated before giving up
    pub transient_retries: u32,
}

impl Default for PollerSettings {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(3000),
            transient_retries: 3,
        }
    }
}

impl PollerSettings {
    /// Settings from the resolved configuration.
    pub fn from_config(api: &crate::config::ApiSettings) -> Self {
        Self {
            interval: Duration::from_millis(api.poll_interval_ms),
            transient_retries: api.transient_retries,
        }
    }
}

/// Spawns poll tasks against the remote API.
pub struct StatusPoller {
    api: Arc<dyn TranscriptApi>,
    settings: PollerSettings,
}

impl StatusPoller {
    pub fn new(api: Arc<dyn TranscriptApi>, settings: PollerSettings) -> Self {
        Self { api, settings }
    }

    /// Start polling a job.
    ///
    /// Returns the status update channel and a handle. Dropping the
    /// receiver is fine; the poll keeps running until a terminal state,
    /// an error, or cancellation through the handle.
    pub fn spawn(&self, transcript_id: &str) -> (mpsc::Receiver<JobStatus>, PollHandle) {
        let (status_tx, status_rx) = mpsc::channel::<JobStatus>(16);
        let (stop_tx, stop_rx) = oneshot::channel::<()>();

        let api = self.api.clone();
        let settings = self.settings.clone();
        let id = transcript_id.to_string();

        let task = tokio::spawn(run_poll(api, settings, id, status_tx, stop_rx));

        (status_rx, PollHandle { stop_tx, task })
    }
}

/// Handle to a running poll task.
pub struct PollHandle {
    stop_tx: oneshot::Sender<()>,
    task: tokio::task::JoinHandle<Result<PollOutcome, PollError>>,
}

impl PollHandle {
    /// Cancel the poll and wait for it to wind down.
    pub async fn cancel(self) -> Result<PollOutcome, PollError> {
        let _ = self.stop_tx.send(());
        self.task
            .await
            .map_err(|e| PollError::Task(e.to_string()))?
    }

    /// Wait for the poll to reach a terminal state.
    pub async fn join(self) -> Result<PollOutcome, PollError> {
        let Self { stop_tx, task } = self;
        let result = task.await.map_err(|e| PollError::Task(e.to_string()))?;
        // Kept alive until here so the task never sees a dropped stop
        // channel as a cancellation
        drop(stop_tx);
        result
    }
}

/// The poll loop itself.
async fn run_poll(
    api: Arc<dyn TranscriptApi>,
    settings: PollerSettings,
    transcript_id: String,
    status_tx: mpsc::Sender<JobStatus>,
    mut stop_rx: oneshot::Receiver<()>,
) -> Result<PollOutcome, PollError> {
    let mut last_emitted: Option<JobStatus> = None;
    let mut transient_failures = 0u32;

    loop {
        match api.transcript_status(&transcript_id).await {
            Ok(status) => {
                transient_failures = 0;

                if last_emitted != Some(status) {
                    let _ = status_tx.send(status).await;
                    last_emitted = Some(status);
                }

                match status {
                    JobStatus::Completed => {
                        let detail = api.transcript(&transcript_id).await?;
                        return Ok(PollOutcome::Completed(detail));
                    }
                    JobStatus::Failed => {
                        return Err(PollError::JobFailed(transcript_id));
                    }
                    // pending / processing / unknown: keep polling
                    _ => {}
                }
            }
            Err(ApiError::Network(message)) => {
                transient_failures += 1;
                if transient_failures > settings.transient_retries {
                    return Err(PollError::Api(ApiError::Network(message)));
                }
                tracing::warn!(
                    "Transient poll error for {} (attempt {}/{}): {}",
                    transcript_id,
                    transient_failures,
                    settings.transient_retries,
                    message
                );
            }
            Err(e) => return Err(PollError::Api(e)),
        }

        tokio::select! {
            _ = tokio::time::sleep(settings.interval) => {}
            _ = &mut stop_rx => {
                tracing::debug!("Poll for {} cancelled", transcript_id);
                return Ok(PollOutcome::Cancelled);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use uuid::Uuid;

    /// Fake API that walks through a scripted status sequence.
    struct ScriptedApi {
        script: Mutex<Vec<Result<JobStatus, ApiError>>>,
        result_fetches: AtomicUsize,
    }

    impl ScriptedApi {
        fn new(script: Vec<Result<JobStatus, ApiError>>) -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(script),
                result_fetches: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl TranscriptApi for ScriptedApi {
        async fn upload_audio(
            &self,
            _payload: Vec<u8>,
            _file_name: &str,
            _dedup_token: Uuid,
        ) -> Result<String, ApiError> {
            unimplemented!("not used by the poller")
        }

        async fn transcript_status(&self, _id: &str) -> Result<JobStatus, ApiError> {
            let mut script = self.script.lock().unwrap();
            if script.len() > 1 {
                script.remove(0)
            } else {
                // Hold the final scripted status
                match &script[0] {
                    Ok(status) => Ok(*status),
                    Err(ApiError::Network(m)) => Err(ApiError::Network(m.clone())),
                    Err(_) => Err(ApiError::NotConfigured),
                }
            }
        }

        async fn transcript(&self, id: &str) -> Result<TranscriptDetail, ApiError> {
            self.result_fetches.fetch_add(1, Ordering::SeqCst);
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

    fn fast_settings() -> PollerSettings {
        PollerSettings {
            interval: Duration::from_millis(10),
            transient_retries: 3,
        }
    }

    async fn collect(mut rx: mpsc::Receiver<JobStatus>) -> Vec<JobStatus> {
        let mut seen = Vec::new();
        while let Some(status) = rx.recv().await {
            seen.push(status);
        }
        seen
    }

    #[tokio::test]
    async fn test_poll_to_completion() {
        let api = ScriptedApi::new(vec![
            Ok(JobStatus::Pending),
            Ok(JobStatus::Processing),
            Ok(JobStatus::Completed),
        ]);
        let poller = StatusPoller::new(api.clone(), fast_settings());

        let (rx, handle) = poller.spawn("t-1");
        let outcome = handle.join().await.unwrap();

        match outcome {
            PollOutcome::Completed(detail) => assert_eq!(detail.id, "t-1"),
            PollOutcome::Cancelled => panic!("should have completed"),
        }

        // One update per distinct status, one result fetch
        let updates = collect(rx).await;
        assert_eq!(
            updates,
            vec![JobStatus::Pending, JobStatus::Processing, JobStatus::Completed]
        );
        assert_eq!(api.result_fetches.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_repeated_status_emitted_once() {
        let api = ScriptedApi::new(vec![
            Ok(JobStatus::Pending),
            Ok(JobStatus::Pending),
            Ok(JobStatus::Processing),
            Ok(JobStatus::Processing),
            Ok(JobStatus::Completed),
        ]);
        let poller = StatusPoller::new(api.clone(), fast_settings());

        let (rx, handle) = poller.spawn("t-2");
        handle.join().await.unwrap();

        let updates = collect(rx).await;
        assert_eq!(
            updates,
            vec![JobStatus::Pending, JobStatus::Processing, JobStatus::Completed]
        );
    }

    #[tokio::test]
    async fn test_failed_job_skips_result_fetch() {
        let api = ScriptedApi::new(vec![
            Ok(JobStatus::Pending),
            Ok(JobStatus::Failed),
        ]);
        let poller = StatusPoller::new(api.clone(), fast_settings());

        let (_rx, handle) = poller.spawn("t-3");
        let err = handle.join().await.unwrap_err();

        assert!(matches!(err, PollError::JobFailed(id) if id == "t-3"));
        assert_eq!(api.result_fetches.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_transient_errors_below_cap_are_retried() {
        let api = ScriptedApi::new(vec![
            Ok(JobStatus::Pending),
            Err(ApiError::Network("blip".to_string())),
            Err(ApiError::Network("blip".to_string())),
            Ok(JobStatus::Completed),
        ]);
        let poller = StatusPoller::new(api.clone(), fast_settings());

        let (_rx, handle) = poller.spawn("t-4");
        let outcome = handle.join().await.unwrap();

        assert!(matches!(outcome, PollOutcome::Completed(_)));
    }

    #[tokio::test]
    async fn test_persistent_transport_error_kills_poll() {
        let api = ScriptedApi::new(vec![Err(ApiError::Network("down".to_string()))]);
        let poller = StatusPoller::new(api.clone(), fast_settings());

        let (_rx, handle) = poller.spawn("t-5");
        let err = handle.join().await.unwrap_err();

        assert!(matches!(err, PollError::Api(ApiError::Network(_))));
        assert_eq!(api.result_fetches.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_auth_error_terminates_immediately() {
        let api = ScriptedApi::new(vec![Err(ApiError::NotConfigured)]);
        let poller = StatusPoller::new(api, fast_settings());

        let (_rx, handle) = poller.spawn("t-6");
        let err = handle.join().await.unwrap_err();

        assert!(matches!(err, PollError::Api(ApiError::NotConfigured)));
    }

    #[tokio::test]
    async fn test_cancellation() {
        // A job that never leaves pending
        let api = ScriptedApi::new(vec![Ok(JobStatus::Pending)]);
        let poller = StatusPoller::new(api.clone(), fast_settings());

        let (_rx, handle) = poller.spawn("t-7");
        tokio::time::sleep(Duration::from_millis(30)).await;

        let outcome = handle.cancel().await.unwrap();
        assert!(matches!(outcome, PollOutcome::Cancelled));
        assert_eq!(api.result_fetches.load(Ordering::SeqCst), 0);
    }
}
