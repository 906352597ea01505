//! Configuration for iscribe paths and tunables.
//!
//! Configuration sources (highest priority first):
//! 1. Environment variables (ISCRIBE_HOME)
//! 2. Config file (.iscribe/config.yaml)
//! 3. Defaults (~/.iscribe)
//!
//! Config file discovery:
//! - Searches current directory and parents for .iscribe/config.yaml
//! - Paths in config file are relative to the config file's parent directory

use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use anyhow::{Context, Result};
use serde::Deserialize;

/// Global cached configuration (stores Result to handle init errors)
static CONFIG: OnceLock<Result<ResolvedConfig, String>> = OnceLock::new();

/// Raw config file schema (matches YAML structure)
#[derive(Debug, Clone, Deserialize)]
pub struct ConfigFile {
    pub version: String,
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub api: Option<ApiConfig>,
    #[serde(default)]
    pub watch: Option<WatchConfig>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PathsConfig {
    /// State directory (relative to config file)
    pub home: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    pub poll_interval_ms: Option<u64>,
    pub request_timeout_secs: Option<u64>,
    pub transient_retries: Option<u32>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WatchConfig {
    pub path: Option<String>,
    pub stability_delay_secs: Option<u64>,
    pub extensions: Option<Vec<String>>,
}

/// Resolved configuration with absolute paths
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    /// Absolute path to iscribe home (durable state)
    pub home: PathBuf,
    /// API client settings
    pub api: ApiSettings,
    /// Drop-folder watcher settings
    pub watch: WatchSettings,
    /// Path to config file (if found)
    pub config_file: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct ApiSettings {
    /// Status poll interval in milliseconds
    pub poll_interval_ms: u64,
    /// Per-request timeout for all HTTP calls
    pub request_timeout_secs: u64,
    /// Consecutive transport failures tolerated while polling
    pub transient_retries: u32,
}

impl Default for ApiSettings {
    fn default() -> Self {
        Self {
            poll_interval_ms: 3000,
            request_timeout_secs: 30,
            transient_retries: 3,
        }
    }
}

#[derive(Debug, Clone)]
pub struct WatchSettings {
    /// Directory watched for new audio files
    pub path: PathBuf,
    /// How long a file must be stable before it is enqueued (seconds)
    pub stability_delay_secs: u64,
    /// File extensions treated as audio
    pub extensions: Vec<String>,
}

impl WatchSettings {
    fn default_for_home(home: &Path) -> Self {
        Self {
            path: home.join("inbox"),
            stability_delay_secs: 5,
            extensions: default_extensions(),
        }
    }
}

fn default_extensions() -> Vec<String> {
    ["wav", "m4a", "mp3", "ogg", "webm"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

/// Find config file by searching current directory and parents
fn find_config_file() -> Option<PathBuf> {
    let mut current = std::env::current_dir().ok()?;

    loop {
        let config_path = current.join(".iscribe").join("config.yaml");
        if config_path.exists() {
            return Some(config_path);
        }

        if !current.pop() {
            break;
        }
    }

    None
}

/// Load and parse config file
fn load_config_file(path: &Path) -> Result<ConfigFile> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    serde_yaml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))
}

/// Resolve a path that may be relative to the config file's parent
fn resolve_path(base: &Path, path_str: &str) -> PathBuf {
    let path = PathBuf::from(path_str);
    if path.is_absolute() {
        path
    } else {
        base.join(path)
            .canonicalize()
            .unwrap_or_else(|_| base.join(path_str))
    }
}

/// Load configuration from all sources
fn load_config() -> Result<ResolvedConfig> {
    // Default home directory
    let default_home = dirs::home_dir()
        .context("Failed to determine home directory")?
        .join(".iscribe");

    // Check for config file
    let config_file = find_config_file();

    let (home, api, watch) = if let Some(ref config_path) = config_file {
        let config = load_config_file(config_path)?;

        // Base directory is the parent of .iscribe/ (i.e., grandparent of config.yaml)
        let base_dir = config_path
            .parent() // .iscribe/
            .and_then(|p| p.parent()) // project root
            .unwrap_or(Path::new("."));

        // Resolve home path
        let home = if let Ok(env_home) = std::env::var("ISCRIBE_HOME") {
            PathBuf::from(env_home)
        } else if let Some(ref home_path) = config.paths.home {
            // home is relative to .iscribe/ directory
            let iscribe_dir = config_path.parent().unwrap_or(Path::new("."));
            resolve_path(iscribe_dir, home_path)
        } else {
            default_home.clone()
        };

        let api = ApiSettings {
            poll_interval_ms: config
                .api
                .as_ref()
                .and_then(|a| a.poll_interval_ms)
                .unwrap_or(3000),
            request_timeout_secs: config
                .api
                .as_ref()
                .and_then(|a| a.request_timeout_secs)
                .unwrap_or(30),
            transient_retries: config
                .api
                .as_ref()
                .and_then(|a| a.transient_retries)
                .unwrap_or(3),
        };

        let defaults = WatchSettings::default_for_home(&home);
        let watch = WatchSettings {
            path: config
                .watch
                .as_ref()
                .and_then(|w| w.path.as_deref())
                .map(|p| resolve_path(base_dir, p))
                .unwrap_or(defaults.path),
            stability_delay_secs: config
                .watch
                .as_ref()
                .and_then(|w| w.stability_delay_secs)
                .unwrap_or(defaults.stability_delay_secs),
            extensions: config
                .watch
                .as_ref()
                .and_then(|w| w.extensions.clone())
                .unwrap_or(defaults.extensions),
        };

        (home, api, watch)
    } else {
        // No config file - use env vars or defaults
        let home = std::env::var("ISCRIBE_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| default_home.clone());

        let watch = WatchSettings::default_for_home(&home);

        (home, ApiSettings::default(), watch)
    };

    Ok(ResolvedConfig {
        home,
        api,
        watch,
        config_file,
    })
}

/// Get the global configuration (loads once, then cached)
pub fn config() -> Result<&'static ResolvedConfig> {
    let result = CONFIG.get_or_init(|| load_config().map_err(|e| e.to_string()));

    match result {
        Ok(config) => Ok(config),
        Err(e) => anyhow::bail!("{}", e),
    }
}

/// Force reload configuration (useful for testing)
pub fn reload_config() -> Result<ResolvedConfig> {
    load_config()
}

// ============================================================================
// Convenience functions
// ============================================================================

/// Get the iscribe home directory (durable state).
pub fn iscribe_home() -> Result<PathBuf> {
    Ok(config()?.home.clone())
}

/// Get the durable store directory ($ISCRIBE_HOME/store)
pub fn store_dir() -> Result<PathBuf> {
    Ok(config()?.home.join("store"))
}

/// Get the credentials path ($ISCRIBE_HOME/credentials.json)
pub fn credentials_path() -> Result<PathBuf> {
    Ok(config()?.home.join("credentials.json"))
}
