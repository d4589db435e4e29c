//! Core types for mediadl

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

use crate::error::{Error, Result};

/// Unique identifier for a fetch job
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub i64);

impl JobId {
    /// Create a new JobId
    pub fn new(id: i64) -> Self {
        Self(id)
    }

    /// Get the inner i64 value
    pub fn get(&self) -> i64 {
        self.0
    }
}

impl From<i64> for JobId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

impl From<JobId> for i64 {
    fn from(id: JobId) -> Self {
        id.0
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for JobId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self(s.parse()?))
    }
}

/// Job status
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    /// Submitted and waiting for a worker
    Pending,
    /// Currently executing (possibly cycling through fallback strategies)
    #[serde(rename = "downloading")]
    Running,
    /// Paused by the caller; resumable
    Paused,
    /// Successfully completed
    Completed,
    /// Failed with error
    Failed,
    /// Cancelled by the caller
    Cancelled,
}

impl Status {
    /// The string stored in resume records for this status
    pub fn as_record_str(&self) -> &'static str {
        match self {
            Status::Pending => "pending",
            Status::Running => "downloading",
            Status::Paused => "paused",
            Status::Completed => "completed",
            Status::Failed => "failed",
            Status::Cancelled => "cancelled",
        }
    }

    /// Returns true for states a job can never leave
    pub fn is_terminal(&self) -> bool {
        matches!(self, Status::Completed | Status::Failed | Status::Cancelled)
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_record_str())
    }
}

/// Abstract fetch mode chosen by the caller
///
/// A mode names an intent (fast, resilient, paranoid, or automatic); the
/// strategy resolver maps it to a concrete [`Strategy`](crate::Strategy),
/// consulting the circuit breaker for the initial pick.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// Maximum concurrency, large buffers
    Speed,
    /// Single-threaded, high fault tolerance
    Stable,
    /// Aggressive throttling, extreme fault tolerance
    Harsh,
    /// Resolver picks based on breaker state
    Auto,
}

impl std::fmt::Display for Mode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Mode::Speed => "speed",
            Mode::Stable => "stable",
            Mode::Harsh => "harsh",
            Mode::Auto => "auto",
        };
        f.write_str(s)
    }
}

/// Typed fetch options passed with a job
///
/// Replaces free-form option dictionaries: every recognized option is a
/// named, typed field, and [`FetchOptions::from_pairs`] rejects unknown
/// keys at construction time instead of silently ignoring them.
///
/// The `cookie_file` slot must be empty at submission; the executor fills
/// it from the credential service before each attempt.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchOptions {
    /// Format selector forwarded to the tool (e.g., "bv*+ba")
    #[serde(default)]
    pub format: Option<String>,

    /// Output filename template override
    #[serde(default)]
    pub output_template: Option<String>,

    /// Proxy URL for the fetch
    #[serde(default)]
    pub proxy: Option<String>,

    /// Rate limit forwarded to the tool (e.g., "2M")
    #[serde(default)]
    pub rate_limit: Option<String>,

    /// Continue partially downloaded files (default: true)
    #[serde(default = "default_true")]
    pub continue_partial: bool,

    /// Cookie file injected by the executor; must be None at submission
    #[serde(default)]
    pub cookie_file: Option<PathBuf>,
}

fn default_true() -> bool {
    true
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self {
            format: None,
            output_template: None,
            proxy: None,
            rate_limit: None,
            continue_partial: default_true(),
            cookie_file: None,
        }
    }
}

impl FetchOptions {
    /// Build options from string key/value pairs, rejecting unknown keys
    ///
    /// Recognized keys: `format`, `output_template`, `proxy`, `rate_limit`,
    /// `continue_partial`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] for an unrecognized key or an invalid
    /// boolean value.
    pub fn from_pairs<'a, I>(pairs: I) -> Result<Self>
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let mut options = Self::default();
        for (key, value) in pairs {
            match key {
                "format" => options.format = Some(value.to_string()),
                "output_template" => options.output_template = Some(value.to_string()),
                "proxy" => options.proxy = Some(value.to_string()),
                "rate_limit" => options.rate_limit = Some(value.to_string()),
                "continue_partial" => {
                    options.continue_partial = value.parse().map_err(|_| Error::Config {
                        message: format!("invalid boolean '{value}' for continue_partial"),
                        key: Some(key.to_string()),
                    })?;
                }
                other => {
                    return Err(Error::Config {
                        message: format!("unrecognized option '{other}'"),
                        key: Some(other.to_string()),
                    });
                }
            }
        }
        Ok(options)
    }

    /// Serialize into the string map stored in resume records
    pub fn to_record_map(&self) -> BTreeMap<String, String> {
        let mut map = BTreeMap::new();
        if let Some(ref v) = self.format {
            map.insert("format".to_string(), v.clone());
        }
        if let Some(ref v) = self.output_template {
            map.insert("output_template".to_string(), v.clone());
        }
        if let Some(ref v) = self.proxy {
            map.insert("proxy".to_string(), v.clone());
        }
        if let Some(ref v) = self.rate_limit {
            map.insert("rate_limit".to_string(), v.clone());
        }
        map.insert(
            "continue_partial".to_string(),
            self.continue_partial.to_string(),
        );
        map
    }

    /// Rebuild options from a resume record's string map
    ///
    /// Unknown keys are skipped: records written by newer versions must
    /// still load.
    pub fn from_record_map(map: &BTreeMap<String, String>) -> Self {
        let mut options = Self::default();
        for (key, value) in map {
            match key.as_str() {
                "format" => options.format = Some(value.clone()),
                "output_template" => options.output_template = Some(value.clone()),
                "proxy" => options.proxy = Some(value.clone()),
                "rate_limit" => options.rate_limit = Some(value.clone()),
                "continue_partial" => {
                    options.continue_partial = value.parse().unwrap_or(true);
                }
                _ => {}
            }
        }
        options
    }
}

/// Outcome of a single strategy attempt
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttemptOutcome {
    /// The attempt produced a valid output
    Success,
    /// The attempt failed with the given message
    Failed(String),
    /// The attempt was cancelled mid-flight
    Cancelled,
}

/// One entry in a job's attempt history
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttemptRecord {
    /// Label of the strategy that was attempted
    pub strategy: String,
    /// How the attempt ended
    pub outcome: AttemptOutcome,
}

/// A fetch job being driven to completion
///
/// Created at submission, mutated only by the executor, removed from
/// persistence when the caller discards it.
#[derive(Clone, Debug)]
pub struct Job {
    /// Unique job identifier
    pub id: JobId,
    /// Target URL
    pub url: String,
    /// Display title (best-effort; falls back to the URL)
    pub title: String,
    /// Abstract mode requested by the caller
    pub mode: Mode,
    /// Resolved fetch options (credential slot empty at submission)
    pub options: FetchOptions,
    /// Current status
    pub status: Status,
    /// Label of the strategy currently executing, if any
    pub active_strategy: Option<String>,
    /// History of attempted strategies and their outcomes
    pub attempts: Vec<AttemptRecord>,
    /// Output paths observed during execution (best-effort)
    pub output_paths: Vec<PathBuf>,
}

impl Job {
    /// Create a new pending job
    pub fn new(id: JobId, url: String, title: String, mode: Mode, options: FetchOptions) -> Self {
        Self {
            id,
            url,
            title,
            mode,
            options,
            status: Status::Pending,
            active_strategy: None,
            attempts: Vec::new(),
            output_paths: Vec::new(),
        }
    }
}

/// Events emitted on the broadcast channel
///
/// Subscribers receive every event independently; events are dropped
/// silently when nobody is listening.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum Event {
    /// A job was accepted and queued
    Queued {
        /// The job that was queued
        id: JobId,
    },
    /// A strategy attempt started
    Started {
        /// The job being executed
        id: JobId,
        /// Label of the strategy in use
        strategy: String,
    },
    /// Byte-level progress from the external tool
    Progress {
        /// The job reporting progress
        id: JobId,
        /// Bytes fetched so far
        downloaded_bytes: u64,
        /// Total bytes, when the tool knows it
        total_bytes: Option<u64>,
        /// Current transfer speed in bytes/second, when known
        speed_bps: Option<u64>,
        /// Estimated seconds remaining, when known
        eta_secs: Option<u64>,
    },
    /// Free-form status message from the tool
    StatusMessage {
        /// The job the message belongs to
        id: JobId,
        /// The message text
        message: String,
    },
    /// An output path was observed
    PathDiscovered {
        /// The job the path belongs to
        id: JobId,
        /// The discovered path
        path: PathBuf,
    },
    /// The executor moved to a fallback strategy
    StrategySwitched {
        /// The job switching strategies
        id: JobId,
        /// Label of the strategy that failed
        from: String,
        /// Label of the fallback now in use
        to: String,
    },
    /// The job completed successfully
    Completed {
        /// The completed job
        id: JobId,
        /// Final output paths
        outputs: Vec<PathBuf>,
    },
    /// The job failed after exhausting its options
    Failed {
        /// The failed job
        id: JobId,
        /// Human-readable error message
        error: String,
    },
    /// The job was cancelled by the caller
    Cancelled {
        /// The cancelled job
        id: JobId,
    },
    /// The job was paused by the caller
    Paused {
        /// The paused job
        id: JobId,
    },
    /// The credential service fell back to a previously valid artifact
    CredentialFallback {
        /// Human-readable warning describing the fallback
        warning: String,
    },
    /// The manager is shutting down
    Shutdown,
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_id_display_and_parse_round_trip() {
        let id = JobId::new(42);
        assert_eq!(id.to_string(), "42");
        assert_eq!("42".parse::<JobId>().unwrap(), id);
    }

    #[test]
    fn running_status_serializes_as_downloading() {
        let json = serde_json::to_string(&Status::Running).unwrap();
        assert_eq!(json, "\"downloading\"");
        let parsed: Status = serde_json::from_str("\"downloading\"").unwrap();
        assert_eq!(parsed, Status::Running);
    }

    #[test]
    fn terminal_states_are_terminal() {
        assert!(Status::Completed.is_terminal());
        assert!(Status::Failed.is_terminal());
        assert!(Status::Cancelled.is_terminal());
        assert!(!Status::Running.is_terminal());
        assert!(!Status::Paused.is_terminal());
        assert!(!Status::Pending.is_terminal());
    }

    #[test]
    fn from_pairs_accepts_recognized_keys() {
        let options = FetchOptions::from_pairs([
            ("format", "bv*+ba"),
            ("proxy", "socks5://127.0.0.1:1080"),
            ("continue_partial", "false"),
        ])
        .unwrap();

        assert_eq!(options.format.as_deref(), Some("bv*+ba"));
        assert_eq!(options.proxy.as_deref(), Some("socks5://127.0.0.1:1080"));
        assert!(!options.continue_partial);
        assert!(options.cookie_file.is_none());
    }

    #[test]
    fn from_pairs_rejects_unknown_key() {
        let result = FetchOptions::from_pairs([("fromat", "best")]);
        match result {
            Err(Error::Config { key, .. }) => assert_eq!(key.as_deref(), Some("fromat")),
            other => panic!("expected Config error, got {other:?}"),
        }
    }

    #[test]
    fn from_pairs_rejects_invalid_boolean() {
        let result = FetchOptions::from_pairs([("continue_partial", "yes")]);
        assert!(matches!(result, Err(Error::Config { .. })));
    }

    #[test]
    fn record_map_round_trip_preserves_options() {
        let options = FetchOptions {
            format: Some("best".into()),
            output_template: Some("%(id)s.%(ext)s".into()),
            proxy: None,
            rate_limit: Some("2M".into()),
            continue_partial: false,
            cookie_file: None,
        };

        let map = options.to_record_map();
        let restored = FetchOptions::from_record_map(&map);
        assert_eq!(restored, options);
    }

    #[test]
    fn record_map_skips_unknown_keys() {
        let mut map = BTreeMap::new();
        map.insert("format".to_string(), "best".to_string());
        map.insert("future_option".to_string(), "whatever".to_string());

        let options = FetchOptions::from_record_map(&map);
        assert_eq!(options.format.as_deref(), Some("best"));
    }

    #[test]
    fn new_job_starts_pending_with_empty_history() {
        let job = Job::new(
            JobId::new(1),
            "https://example.com/watch?v=abc".into(),
            "abc".into(),
            Mode::Auto,
            FetchOptions::default(),
        );
        assert_eq!(job.status, Status::Pending);
        assert!(job.attempts.is_empty());
        assert!(job.active_strategy.is_none());
    }
}
