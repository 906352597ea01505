//! Saved-recordings CLI commands.
//!
//! - `iscribe recordings list` - Show saved recordings
//! - `iscribe recordings save <file>` - Save an audio file locally
//! - `iscribe recordings upload <id>` - Submit a saved recording
//! - `iscribe recordings export <id> <out>` - Copy a recording out
//! - `iscribe recordings delete <id>` - Delete a recording

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Subcommand;

use crate::store::RecordingStore;
use crate::sync::Submission;

/// Saved-recordings subcommands
#[derive(Subcommand, Debug)]
pub enum RecordingCommands {
    /// List saved recordings
    List {
        /// Maximum number of recordings to show
        #[arg(short, long, default_value = "20")]
        limit: usize,
    },

    /// Save an audio file into the recording store
    Save {
        /// Audio file to save
        file: PathBuf,

        /// Recording length in seconds, if known
        #[arg(short, long, default_value = "0")]
        duration: f64,
    },

    /// Upload a saved recording (queues it if the upload fails)
    Upload {
        /// Recording ID
        id: u64,
    },

    /// Copy a recording's audio out of the store
    Export {
        /// Recording ID
        id: u64,

        /// Destination file
        output: PathBuf,
    },

    /// Delete a recording
    Delete {
        /// Recording ID
        id: u64,
    },
}

/// Execute a recordings command
pub async fn execute(command: RecordingCommands) -> Result<()> {
    match command {
        RecordingCommands::List { limit } => execute_list(limit).await,
        RecordingCommands::Save { file, duration } => execute_save(file, duration).await,
        RecordingCommands::Upload { id } => execute_upload(id).await,
        RecordingCommands::Export { id, output } => execute_export(id, output).await,
        RecordingCommands::Delete { id } => execute_delete(id).await,
    }
}

async fn execute_list(limit: usize) -> Result<()> {
    let store = RecordingStore::open_default().await?;
    let recordings = store.list().await?;

    if recordings.is_empty() {
        println!("No saved recordings");
        return Ok(());
    }

    println!();
    println!(
        "{:<6} {:<30} {:<10} {:<10} {:<20}",
        "ID", "FILE", "SIZE", "DURATION", "RECORDED"
    );
    println!("{}", "-".repeat(80));

    for recording in recordings.iter().take(limit) {
        let file_name = if recording.file_name.len() > 28 {
            format!("{}...", &recording.file_name[..25])
        } else {
            recording.file_name.clone()
        };

        let duration = if recording.duration_secs > 0.0 {
            format!("{:.1}s", recording.duration_secs)
        } else {
            "?".to_string()
        };

        println!(
            "{:<6} {:<30} {:<10} {:<10} {:<20}",
            recording.id,
            file_name,
            recording.size_bytes,
            duration,
            recording.recorded_at.format("%Y-%m-%d %H:%M:%S")
        );
    }

    if recordings.len() > limit {
        println!();
        println!("  (showing {} of {} recordings)", limit, recordings.len());
    }

    Ok(())
}

async fn execute_save(file: PathBuf, duration: f64) -> Result<()> {
    let payload = tokio::fs::read(&file)
        .await
        .with_context(|| format!("Failed to read audio file: {}", file.display()))?;
    let file_name = file
        .file_name()
        .unwrap_or_default()
        .to_string_lossy()
        .to_string();

    let store = RecordingStore::open_default().await?;
    let recording = store.save(&payload, &file_name, duration).await?;

    println!("💾 Saved {} as recording {}", file_name, recording.id);

    Ok(())
}

async fn execute_upload(id: u64) -> Result<()> {
    let store = RecordingStore::open_default().await?;
    let recording = store
        .get(id)
        .await?
        .with_context(|| format!("No recording with id {}", id))?;
    let payload = store.payload(id).await?;
    drop(store);

    let (agent, _client) = super::open_agent().await?;

    match agent.submit(payload, &recording.file_name).await? {
        Submission::Uploaded { transcript_id } => {
            println!(
                "📤 Uploaded recording {} as transcript {}",
                id, transcript_id
            );
            println!("   Run `iscribe poll {}` to follow it", transcript_id);
        }
        Submission::Queued { entry, reason } => {
            println!(
                "📥 Upload failed ({}), queued as entry {}",
                reason, entry.id
            );
        }
    }

    Ok(())
}

async fn execute_export(id: u64, output: PathBuf) -> Result<()> {
    let store = RecordingStore::open_default().await?;
    let payload = store.payload(id).await?;

    tokio::fs::write(&output, payload)
        .await
        .with_context(|| format!("Failed to write {}", output.display()))?;

    println!("💾 Exported recording {} to {}", id, output.display());

    Ok(())
}

async fn execute_delete(id: u64) -> Result<()> {
    let store = RecordingStore::open_default().await?;

    if store.delete(id).await? {
        println!("🗑️  Deleted recording {}", id);
    } else {
        println!("ℹ️  No recording with id {}", id);
    }

    Ok(())
}
