//! Transcription job status polling.

pub mod poller;

// Re-export key types
pub use poller::{PollError, PollHandle, PollOutcome, PollerSettings, StatusPoller};
