//! Configuration types for mediadl

use serde::{Deserialize, Serialize};
use std::{path::PathBuf, time::Duration};

/// Download behavior configuration (directories, templates)
///
/// Groups settings related to where fetched files land and how output
/// filenames are derived. Used as a nested sub-config within [`Config`].
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DownloadConfig {
    /// Download directory (default: "./downloads")
    #[serde(default = "default_download_dir")]
    pub download_dir: PathBuf,

    /// Output filename template passed to the fetch tool (default: "%(title)s.%(ext)s")
    #[serde(default = "default_output_template")]
    pub output_template: String,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            download_dir: default_download_dir(),
            output_template: default_output_template(),
        }
    }
}

/// External fetch tool configuration
///
/// Groups settings for locating and supervising the external binary.
/// Used as a nested sub-config within [`Config`].
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ToolConfig {
    /// Path to the fetch tool executable (auto-detected if None)
    #[serde(default)]
    pub tool_path: Option<PathBuf>,

    /// Name of the fetch tool binary to search for in PATH (default: "yt-dlp")
    #[serde(default = "default_tool_name")]
    pub tool_name: String,

    /// Whether to search PATH for the binary if no explicit path is set (default: true)
    #[serde(default = "default_true")]
    pub search_path: bool,

    /// Executable names matched by the orphan sweep (default: yt-dlp, ffmpeg, ffprobe)
    ///
    /// The sweep kills processes with these names whose parent is the
    /// current process, catching children the tool spawned itself.
    #[serde(default = "default_sweep_names")]
    pub sweep_process_names: Vec<String>,

    /// Grace period before a terminated child is force-killed (default: 3 seconds)
    #[serde(default = "default_kill_grace", with = "duration_serde")]
    pub kill_grace: Duration,

    /// Interval at which a running child is polled for cancellation (default: 50 ms)
    #[serde(default = "default_cancel_poll_ms")]
    pub cancel_poll_ms: u64,
}

impl Default for ToolConfig {
    fn default() -> Self {
        Self {
            tool_path: None,
            tool_name: default_tool_name(),
            search_path: true,
            sweep_process_names: default_sweep_names(),
            kill_grace: default_kill_grace(),
            cancel_poll_ms: default_cancel_poll_ms(),
        }
    }
}

/// Fallback backoff configuration
///
/// Controls the delay applied between strategy attempts in the fallback
/// chain. The delay scales with the number of strategies already tried.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Base delay before switching to a fallback strategy (default: 1 second)
    #[serde(default = "default_base_delay", with = "duration_serde")]
    pub base_delay: Duration,

    /// Maximum delay between strategy attempts (default: 15 seconds)
    #[serde(default = "default_max_delay", with = "duration_serde")]
    pub max_delay: Duration,

    /// Add random jitter to delays (default: true)
    #[serde(default = "default_true")]
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            base_delay: default_base_delay(),
            max_delay: default_max_delay(),
            jitter: true,
        }
    }
}

/// Circuit breaker configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BreakerConfig {
    /// Consecutive failures per mode before the breaker opens (default: 3)
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
        }
    }
}

/// Credential provisioning configuration
///
/// Groups settings for the canonical cookie artifact and its refresh
/// behavior. Used as a nested sub-config within [`Config`].
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CredentialConfig {
    /// Canonical cookie file path (default: "./state/cookies.txt")
    #[serde(default = "default_artifact_path")]
    pub artifact_path: PathBuf,

    /// Configured credential source identifier (e.g., "firefox", "file"); None disables provisioning
    #[serde(default)]
    pub source: Option<String>,

    /// Path of the source cookie file for the file-based provider
    #[serde(default)]
    pub source_file: Option<PathBuf>,

    /// Age after which the artifact is considered stale (default: 30 minutes)
    #[serde(default = "default_stale_after", with = "duration_serde")]
    pub stale_after: Duration,

    /// Caller-visible timeout for a forced refresh (default: 30 seconds)
    #[serde(default = "default_refresh_timeout", with = "duration_serde")]
    pub refresh_timeout: Duration,
}

impl Default for CredentialConfig {
    fn default() -> Self {
        Self {
            artifact_path: default_artifact_path(),
            source: None,
            source_file: None,
            stale_after: default_stale_after(),
            refresh_timeout: default_refresh_timeout(),
        }
    }
}

/// Resume persistence configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PersistenceConfig {
    /// Path of the resume store document (default: "./state/resume_tasks.json")
    #[serde(default = "default_store_path")]
    pub store_path: PathBuf,

    /// Minimum interval between debounced store writes (default: 5 seconds)
    ///
    /// Terminal state transitions always write immediately regardless of
    /// this interval.
    #[serde(default = "default_save_interval", with = "duration_serde")]
    pub save_interval: Duration,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            store_path: default_store_path(),
            save_interval: default_save_interval(),
        }
    }
}

/// Main configuration for [`FetchManager`](crate::FetchManager)
///
/// Fields are organized into logical sub-configs for maintainability:
/// - [`download`](DownloadConfig) — directories and output templates
/// - [`tool`](ToolConfig) — external binary location and supervision
/// - [`retry`](RetryConfig) — fallback backoff behavior
/// - [`breaker`](BreakerConfig) — circuit breaker thresholds
/// - [`credentials`](CredentialConfig) — cookie artifact and refresh
/// - [`persistence`](PersistenceConfig) — resume store location
///
/// All sub-config fields are flattened for backward-compatible
/// serialization, meaning the JSON/TOML format stays flat (no nesting).
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Config {
    /// Download directories and output templates
    #[serde(flatten)]
    pub download: DownloadConfig,

    /// External tool location and process supervision
    #[serde(flatten)]
    pub tool: ToolConfig,

    /// Fallback backoff behavior
    #[serde(flatten)]
    pub retry: RetryConfig,

    /// Circuit breaker thresholds
    #[serde(flatten)]
    pub breaker: BreakerConfig,

    /// Credential artifact and refresh settings
    #[serde(flatten)]
    pub credentials: CredentialConfig,

    /// Resume store settings
    #[serde(flatten)]
    pub persistence: PersistenceConfig,
}

// Convenience accessors — allow call sites to use `config.download_dir()` etc.
// without reaching through the sub-config structs.
impl Config {
    /// Download directory
    pub fn download_dir(&self) -> &PathBuf {
        &self.download.download_dir
    }

    /// Resume store document path
    pub fn store_path(&self) -> &PathBuf {
        &self.persistence.store_path
    }
}

fn default_download_dir() -> PathBuf {
    PathBuf::from("./downloads")
}

fn default_output_template() -> String {
    "%(title)s.%(ext)s".to_string()
}

fn default_tool_name() -> String {
    "yt-dlp".to_string()
}

fn default_sweep_names() -> Vec<String> {
    vec![
        "yt-dlp".to_string(),
        "yt-dlp.exe".to_string(),
        "ffmpeg".to_string(),
        "ffmpeg.exe".to_string(),
        "ffprobe".to_string(),
        "ffprobe.exe".to_string(),
    ]
}

fn default_true() -> bool {
    true
}

fn default_kill_grace() -> Duration {
    Duration::from_secs(3)
}

fn default_cancel_poll_ms() -> u64 {
    50
}

fn default_base_delay() -> Duration {
    Duration::from_secs(1)
}

fn default_max_delay() -> Duration {
    Duration::from_secs(15)
}

fn default_failure_threshold() -> u32 {
    3
}

fn default_artifact_path() -> PathBuf {
    PathBuf::from("./state/cookies.txt")
}

fn default_stale_after() -> Duration {
    Duration::from_secs(30 * 60)
}

fn default_refresh_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_store_path() -> PathBuf {
    PathBuf::from("./state/resume_tasks.json")
}

fn default_save_interval() -> Duration {
    Duration::from_secs(5)
}

// Duration serialization helper (seconds as u64)
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}
