//! Command-line interface for iscribe.
//!
//! Provides commands for provisioning credentials, queueing and syncing
//! uploads, watching a drop folder, and inspecting transcripts.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use crate::api::{parse_provisioning, ApiClient, CredentialStore, TranscriptApi};
use crate::config;
use crate::poll::{PollerSettings, PollOutcome, StatusPoller};
use crate::store::{RecordingStore, UploadQueue};
use crate::sync::{DrainOutcome, Submission, SyncAgent};

pub mod recordings;

/// iscribe - offline-first speech-to-text upload client
#[derive(Parser, Debug)]
#[command(name = "iscribe")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Provision API credentials from an out-of-band payload
    Connect {
        /// Provisioning payload, e.g. {'url':'...','username':'...','password':'...'}
        payload: Option<String>,

        /// Read the payload from a file instead
        #[arg(short, long)]
        file: Option<PathBuf>,
    },

    /// Clear stored API credentials
    Disconnect,

    /// Show connection and queue status
    Status,

    /// Upload an audio file, queueing it if the upload fails
    Add {
        /// Audio file to upload
        file: PathBuf,

        /// Queue without attempting an immediate upload
        #[arg(long)]
        queue_only: bool,

        /// Poll the job to completion after a successful upload
        #[arg(long)]
        follow: bool,
    },

    /// Drain the pending upload queue once
    Sync {
        /// Poll each new job to completion after the drain
        #[arg(long)]
        follow: bool,
    },

    /// List pending uploads
    Queue {
        /// Maximum number of entries to show
        #[arg(short, long, default_value = "20")]
        limit: usize,
    },

    /// Watch the drop folder and sync new audio files
    Watch {
        /// Directory to watch (defaults to the configured drop folder)
        #[arg(short, long)]
        path: Option<String>,

        /// Scan once and exit
        #[arg(long)]
        once: bool,
    },

    /// List transcripts known to the server
    Transcripts,

    /// Show a transcript
    Show {
        /// Transcript ID
        transcript_id: String,

        /// Include timed segments
        #[arg(short, long)]
        full: bool,
    },

    /// Poll a transcription job until it finishes
    Poll {
        /// Transcript ID
        transcript_id: String,

        /// Poll interval in milliseconds
        #[arg(long)]
        interval_ms: Option<u64>,
    },

    /// Manage saved recordings
    Recordings {
        #[command(subcommand)]
        command: recordings::RecordingCommands,
    },

    /// Show resolved configuration
    Config,
}

impl Cli {
    pub async fn execute(self) -> Result<()> {
        match self.command {
            Commands::Connect { payload, file } => execute_connect(payload, file).await,
            Commands::Disconnect => execute_disconnect().await,
            Commands::Status => execute_status().await,
            Commands::Add {
                file,
                queue_only,
                follow,
            } => execute_add(file, queue_only, follow).await,
            Commands::Sync { follow } => execute_sync(follow).await,
            Commands::Queue { limit } => execute_queue(limit).await,
            Commands::Watch { path, once } => execute_watch(path, once).await,
            Commands::Transcripts => execute_transcripts().await,
            Commands::Show {
                transcript_id,
                full,
            } => execute_show(&transcript_id, full).await,
            Commands::Poll {
                transcript_id,
                interval_ms,
            } => execute_poll(&transcript_id, interval_ms).await,
            Commands::Recordings { command } => recordings::execute(command).await,
            Commands::Config => execute_config().await,
        }
    }
}

/// Open the credential store and an API client over it.
pub(crate) async fn open_api() -> Result<(Arc<CredentialStore>, Arc<ApiClient>)> {
    let credentials = Arc::new(CredentialStore::open_default().await?);
    let timeout = Duration::from_secs(config::config()?.api.request_timeout_secs);
    let client = Arc::new(ApiClient::with_timeout(credentials.clone(), timeout)?);
    Ok((credentials, client))
}

/// Open the upload queue and a sync agent over it.
pub(crate) async fn open_agent() -> Result<(Arc<SyncAgent>, Arc<ApiClient>)> {
    let (_, client) = open_api().await?;
    let queue = Arc::new(UploadQueue::open_default().await?);
    let agent = Arc::new(SyncAgent::new(queue, client.clone() as Arc<dyn TranscriptApi>));
    Ok((agent, client))
}

/// Provision credentials
async fn execute_connect(payload: Option<String>, file: Option<PathBuf>) -> Result<()> {
    let raw = match (payload, file) {
        (Some(p), _) => p,
        (None, Some(path)) => tokio::fs::read_to_string(&path)
            .await
            .with_context(|| format!("Failed to read payload file: {}", path.display()))?,
        (None, None) => anyhow::bail!("Provide a provisioning payload or --file"),
    };

    let credentials = parse_provisioning(&raw)?;
    let url = credentials.url.clone();
    let username = credentials.username.clone();

    let store = Arc::new(CredentialStore::open_default().await?);
    store.configure(credentials).await?;

    println!("🔑 Connected to {} as {}", url, username);

    let timeout = Duration::from_secs(config::config()?.api.request_timeout_secs);
    let client = ApiClient::with_timeout(store, timeout)?;

    if client.test_connection().await {
        println!("✅ Connection test passed");
    } else {
        println!("⚠️  Credentials saved, but the server did not answer.");
        println!("    Queued uploads will sync once it is reachable.");
    }

    Ok(())
}

/// Clear credentials
async fn execute_disconnect() -> Result<()> {
    let store = CredentialStore::open_default().await?;

    if !store.is_configured().await {
        println!("ℹ️  No credentials stored");
        return Ok(());
    }

    store.clear().await?;
    println!("✅ Credentials cleared");

    Ok(())
}

/// Show connection and queue status
async fn execute_status() -> Result<()> {
    let cfg = config::config()?;
    let store = CredentialStore::open_default().await?;

    println!();
    println!("iscribe Status");
    println!("══════════════════════════════════════════════════════════════");
    println!();
    println!("Home:        {}", cfg.home.display());

    match store.get().await {
        Some(credentials) => {
            println!("Server:      {}", credentials.url);
            println!("User:        {}", credentials.username);
        }
        None => {
            println!("Server:      (not connected - run `iscribe connect`)");
        }
    }

    println!();

    let queue = UploadQueue::open_default().await?;
    let pending = queue.list_all().await?;
    println!("Pending uploads: {}", pending.len());
    for entry in pending.iter().take(5) {
        println!(
            "  [{:>4}] {} ({} bytes, queued {})",
            entry.id,
            entry.file_name,
            entry.size_bytes,
            entry.created_at.format("%Y-%m-%d %H:%M:%S")
        );
    }
    drop(queue);

    let recordings = RecordingStore::open_default().await?;
    println!("Saved recordings: {}", recordings.list().await?.len());

    println!();

    Ok(())
}

/// Upload or queue a single audio file
async fn execute_add(file: PathBuf, queue_only: bool, follow: bool) -> Result<()> {
    let payload = tokio::fs::read(&file)
        .await
        .with_context(|| format!("Failed to read audio file: {}", file.display()))?;
    let file_name = file
        .file_name()
        .unwrap_or_default()
        .to_string_lossy()
        .to_string();

    let (agent, client) = open_agent().await?;

    if queue_only {
        let entry = agent.queue().enqueue(&payload, &file_name).await?;
        println!("📥 Queued {} as entry {}", file_name, entry.id);
        return Ok(());
    }

    match agent.submit(payload, &file_name).await? {
        Submission::Uploaded { transcript_id } => {
            println!("📤 Uploaded {} as transcript {}", file_name, transcript_id);

            if follow {
                follow_job(client, &transcript_id).await?;
            } else {
                println!("   Run `iscribe poll {}` to follow it", transcript_id);
            }
        }
        Submission::Queued { entry, reason } => {
            println!("📥 Upload failed ({}), queued as entry {}", reason, entry.id);
            println!("   Run `iscribe sync` when the server is reachable");
        }
    }

    Ok(())
}

/// Drain the queue once
async fn execute_sync(follow: bool) -> Result<()> {
    let (agent, client) = open_agent().await?;

    println!("🔄 Draining upload queue...");

    let report = match agent.drain().await? {
        DrainOutcome::Completed(report) => report,
        DrainOutcome::AlreadyRunning => {
            println!("ℹ️  A drain is already in progress");
            return Ok(());
        }
    };

    println!();
    println!("Sync Results:");
    println!("  Uploaded:  {}", report.uploaded.len());
    println!("  Failed:    {}", report.failed);
    println!("  Remaining: {}", report.remaining);

    for uploaded in &report.uploaded {
        println!(
            "  ✅ entry {} → transcript {}",
            uploaded.entry_id, uploaded.transcript_id
        );
    }

    if follow {
        for uploaded in &report.uploaded {
            println!();
            follow_job(client.clone(), &uploaded.transcript_id).await?;
        }
    }

    Ok(())
}

/// List pending uploads
async fn execute_queue(limit: usize) -> Result<()> {
    let queue = UploadQueue::open_default().await?;
    let entries = queue.list_all().await?;

    if entries.is_empty() {
        println!("✅ No pending uploads");
        return Ok(());
    }

    println!();
    println!("{:<6} {:<30} {:<10} {:<20}", "ID", "FILE", "SIZE", "QUEUED");
    println!("{}", "-".repeat(70));

    for entry in entries.iter().take(limit) {
        let file_name = if entry.file_name.len() > 28 {
            format!("{}...", &entry.file_name[..25])
        } else {
            entry.file_name.clone()
        };

        println!(
            "{:<6} {:<30} {:<10} {:<20}",
            entry.id,
            file_name,
            entry.size_bytes,
            entry.created_at.format("%Y-%m-%d %H:%M:%S")
        );
    }

    if entries.len() > limit {
        println!();
        println!("  (showing {} of {} entries)", limit, entries.len());
    }

    Ok(())
}

/// Watch the drop folder
async fn execute_watch(path: Option<String>, once: bool) -> Result<()> {
    let mut settings = config::config()?.watch.clone();
    if let Some(p) = path {
        settings.path = p.into();
    }

    tokio::fs::create_dir_all(&settings.path).await?;

    let watcher = crate::sync::DropFolderWatcher::new(settings.clone());
    let (agent, _client) = open_agent().await?;

    // Pick up anything already in the folder
    println!("📂 Scanning: {}", settings.path.display());
    let report = watcher.scan_once(agent.queue()).await?;
    if report.enqueued > 0 {
        println!("📥 Queued {} file(s)", report.enqueued);
    }

    if !agent.queue().is_empty().await? {
        sync_and_report(&agent).await?;
    }

    if once {
        return Ok(());
    }

    println!("👁️  Watching: {}", settings.path.display());
    println!("    Press Ctrl+C to stop");
    println!();

    // The agent already holds the store lock; the watcher shares its
    // queue handle rather than opening the store a second time
    let queue = agent.queue_handle();
    let (mut event_rx, handle) = watcher.watch(queue).await?;

    let (stop_tx, mut stop_rx) = tokio::sync::oneshot::channel::<()>();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        let _ = stop_tx.send(());
    });

    loop {
        tokio::select! {
            Some(event) = event_rx.recv() => {
                println!(
                    "📥 New audio: {} (entry {})",
                    event.path.file_name().unwrap_or_default().to_string_lossy(),
                    event.entry_id
                );
                sync_and_report(&agent).await?;
            }
            _ = &mut stop_rx => {
                println!();
                println!("🛑 Stopping watcher...");
                handle.stop().await?;
                break;
            }
        }
    }

    Ok(())
}

/// Drain and print a one-line summary
async fn sync_and_report(agent: &SyncAgent) -> Result<()> {
    match agent.drain().await? {
        DrainOutcome::Completed(report) => {
            if !report.uploaded.is_empty() || report.failed > 0 {
                println!(
                    "🔄 Sync: {} uploaded, {} failed, {} remaining",
                    report.uploaded.len(),
                    report.failed,
                    report.remaining
                );
            }
        }
        DrainOutcome::AlreadyRunning => {}
    }
    Ok(())
}

/// List transcripts on the server
async fn execute_transcripts() -> Result<()> {
    let (_, client) = open_api().await?;
    let ids = client.list_transcripts().await?;

    if ids.is_empty() {
        println!("No transcripts on the server");
        return Ok(());
    }

    println!();
    println!("Transcripts ({})", ids.len());
    for id in ids {
        println!("  {}", id);
    }

    Ok(())
}

/// Show one transcript
async fn execute_show(transcript_id: &str, full: bool) -> Result<()> {
    let (_, client) = open_api().await?;
    let detail = client.transcript(transcript_id).await?;

    println!();
    println!("Transcript {}", detail.id);
    println!("  Status:  {}", detail.status);
    if let Some(created_at) = detail.created_at {
        println!("  Created: {}", created_at.format("%Y-%m-%d %H:%M:%S"));
    }

    match detail.result {
        Some(result) => {
            println!();
            println!("{}", result.text);

            if full && !result.segments.is_empty() {
                println!();
                for segment in &result.segments {
                    println!(
                        "  [{:>7.1}s - {:>7.1}s] {}",
                        segment.start, segment.end, segment.text
                    );
                }
            }
        }
        None => {
            println!();
            println!("(no transcript text yet)");
        }
    }

    Ok(())
}

/// Poll a job to completion
async fn execute_poll(transcript_id: &str, interval_ms: Option<u64>) -> Result<()> {
    let (_, client) = open_api().await?;

    let mut settings = PollerSettings::from_config(&config::config()?.api);
    if let Some(ms) = interval_ms {
        settings.interval = Duration::from_millis(ms);
    }

    follow_job_with_settings(client, transcript_id, settings).await
}

/// Follow a job with configured settings
async fn follow_job(client: Arc<ApiClient>, transcript_id: &str) -> Result<()> {
    let settings = PollerSettings::from_config(&config::config()?.api);
    follow_job_with_settings(client, transcript_id, settings).await
}

async fn follow_job_with_settings(
    client: Arc<ApiClient>,
    transcript_id: &str,
    settings: PollerSettings,
) -> Result<()> {
    let poller = StatusPoller::new(client as Arc<dyn TranscriptApi>, settings);
    let (mut status_rx, handle) = poller.spawn(transcript_id);

    println!("⏳ Polling transcript {}...", transcript_id);

    // Print status updates while waiting; Ctrl+C cancels the poll
    enum Next {
        Finished,
        Interrupted,
    }

    let next = loop {
        tokio::select! {
            status = status_rx.recv() => {
                match status {
                    Some(status) => println!("   status: {}", status),
                    None => break Next::Finished,
                }
            }
            _ = tokio::signal::ctrl_c() => break Next::Interrupted,
        }
    };

    let outcome = match next {
        Next::Finished => handle.join().await,
        Next::Interrupted => {
            println!();
            println!("🛑 Cancelling poll...");
            handle.cancel().await
        }
    };

    match outcome? {
        PollOutcome::Completed(detail) => {
            println!("✅ Transcription completed");
            if let Some(result) = detail.result {
                println!();
                println!("{}", result.text);
            }
        }
        PollOutcome::Cancelled => {
            println!("ℹ️  Poll cancelled; the job keeps running on the server");
        }
    }

    Ok(())
}

/// Show configuration
async fn execute_config() -> Result<()> {
    let cfg = config::config()?;

    println!();
    println!("iscribe Configuration");
    println!("══════════════════════════════════════════════════════════════");
    println!();
    println!("Home:              {}", cfg.home.display());
    println!("Store:             {}", config::store_dir()?.display());
    println!("Credentials:       {}", config::credentials_path()?.display());
    match &cfg.config_file {
        Some(path) => println!("Config file:       {}", path.display()),
        None => println!("Config file:       (none found)"),
    }
    println!();
    println!("Poll interval:     {} ms", cfg.api.poll_interval_ms);
    println!("Request timeout:   {} s", cfg.api.request_timeout_secs);
    println!("Transient retries: {}", cfg.api.transient_retries);
    println!();
    println!("Watch path:        {}", cfg.watch.path.display());
    println!("Stability delay:   {} seconds", cfg.watch.stability_delay_secs);
    println!("Extensions:        {:?}", cfg.watch.extensions);
    println!();

    Ok(())
}
