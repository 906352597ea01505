//! Domain types shared across the client.
//!
//! - Job: transcription job status and transcript payload shapes
//!   as returned by the remote API

pub mod job;

// Re-export commonly used types
pub use job::{JobStatus, TranscriptDetail, TranscriptResult, TranscriptSegment};
