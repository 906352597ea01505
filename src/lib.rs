//! iscribe - offline-first speech-to-text upload client
//!
//! A CLI client for a remote transcription API. Audio uploads that cannot
//! be delivered are parked in a durable local queue and drained on the
//! next trigger; accepted jobs are polled until they reach a terminal
//! state.
//!
//! # Architecture
//!
//! - All pending work lives in an append-only JSONL log + blob directory;
//!   current state is derived by replaying the log
//! - Removal from the queue is the only signal of confirmed delivery
//! - The drain routine is reentrancy-guarded; overlapping triggers coalesce
//!
//! # Modules
//!
//! - `api`: Remote API gateway (HTTP client, credentials, provisioning)
//! - `store`: Durable upload queue and recording store
//! - `sync`: Upload sync agent and drop-folder watcher
//! - `poll`: Job status polling
//! - `cli`: Command-line interface
//!
//! # Usage
//!
//! ```bash
//! # Provision credentials from a scanned payload
//! iscribe connect "{'url':'http://host:1234/api/v1','username':'u','password':'p'}"
//!
//! # Upload a file (queued automatically if the server is unreachable)
//! iscribe add memo.wav
//!
//! # Drain the queue and follow the new jobs
//! iscribe sync --follow
//! ```

pub mod api;
pub mod cli;
pub mod config;
pub mod domain;
pub mod poll;
pub mod store;
pub mod sync;

// Re-export main types at crate root for convenience
pub use api::{ApiClient, ApiError, ApiCredentials, CredentialStore, TranscriptApi};
pub use domain::{JobStatus, TranscriptDetail};
pub use poll::{PollError, PollHandle, PollOutcome, StatusPoller};
pub use store::{QueueEntry, Recording, RecordingStore, StoreError, UploadQueue};
pub use sync::{DrainOutcome, DrainReport, DropFolderWatcher, SyncAgent};
