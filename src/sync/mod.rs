//! Upload synchronization.
//!
//! The sync agent drains the durable upload queue against the remote API.
//! Triggers are external: an explicit `sync` command, the drop-folder
//! watcher noticing a new file, or the `add` command falling back to the
//! queue. Overlapping triggers coalesce: a drain already in progress is
//! never restarted.

pub mod agent;
pub mod watcher;

// Re-export key types
pub use agent::{DrainOutcome, DrainReport, Submission, SyncAgent, UploadedEntry};
pub use watcher::{DropFolderWatcher, QueuedFileEvent, ScanReport, WatchHandle};
