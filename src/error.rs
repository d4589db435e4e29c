//! Error types for mediadl
//!
//! This module provides error handling for the library, including:
//! - Domain-specific error types (Job, Credential, Process)
//! - A failure-class taxonomy driving the fallback loop (transient,
//!   authentication, fatal, cancellation)
//! - Text-signature classification of external tool output

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for mediadl operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for mediadl
///
/// This is the primary error type used throughout the library. Each variant includes
/// contextual information to help diagnose issues.
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error with context about which setting is invalid
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable error message describing the configuration issue
        message: String,
        /// The configuration key that caused the error (e.g., "download_dir")
        key: Option<String>,
    },

    /// Job execution error
    #[error("job error: {0}")]
    Job(#[from] JobError),

    /// Credential provisioning error
    #[error("credential error: {0}")]
    Credential(#[from] CredentialError),

    /// Process management error
    #[error("process error: {0}")]
    Process(#[from] ProcessError),

    /// External tool execution failed; carries the tail of the tool's output
    #[error("tool error: {0}")]
    Tool(String),

    /// The external tool binary could not be located
    #[error("fetch tool not found: {0}")]
    ToolMissing(String),

    /// Invalid target URL
    #[error("invalid URL: {0}")]
    InvalidUrl(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Job or record not found
    #[error("not found: {0}")]
    NotFound(String),

    /// Shutdown in progress - not accepting new jobs
    #[error("shutdown in progress: not accepting new jobs")]
    ShuttingDown,

    /// Other error
    #[error("{0}")]
    Other(String),
}

/// Job execution errors
#[derive(Debug, Error)]
pub enum JobError {
    /// The job was cancelled by the caller
    #[error("job cancelled")]
    Cancelled,

    /// Every strategy in the fallback chain failed
    #[error("all strategies exhausted ({}): {last}", .attempted.join(", "))]
    StrategiesExhausted {
        /// Labels of the strategies that were attempted, in order
        attempted: Vec<String>,
        /// The last concrete error message
        last: String,
    },

    /// Cannot perform operation in the job's current state
    #[error("cannot {operation} job {id} in state {current_state}")]
    InvalidState {
        /// The job ID that is in an invalid state for the operation
        id: i64,
        /// The operation that was attempted (e.g., "pause", "resume")
        operation: String,
        /// The current state that prevents the operation
        current_state: String,
    },
}

/// Credential provisioning errors
#[derive(Debug, Error)]
pub enum CredentialError {
    /// A refresh is already running; callers get this instead of queueing
    #[error("refresh already in progress")]
    RefreshBusy,

    /// The provider failed to produce a usable artifact
    #[error("refresh failed: {0}")]
    RefreshFailed(String),

    /// The refresh did not complete within its caller-visible timeout
    #[error("refresh timed out after {seconds}s")]
    RefreshTimeout {
        /// The timeout that elapsed, in seconds
        seconds: u64,
    },

    /// No credential source is configured
    #[error("no credential source configured")]
    NoSource,
}

/// Process management errors
#[derive(Debug, Error)]
pub enum ProcessError {
    /// Spawning the child process failed
    #[error("failed to spawn {program}: {reason}")]
    SpawnFailed {
        /// The program that could not be started
        program: PathBuf,
        /// The underlying OS error message
        reason: String,
    },

    /// The OS refused the termination request
    #[error("access denied terminating pid {pid}")]
    AccessDenied {
        /// The process ID that could not be terminated
        pid: u32,
    },
}

/// Failure class of an error, as seen by the fallback loop
///
/// The executor recovers differently per class: transient failures walk the
/// strategy fallback chain, authentication failures force a credential
/// refresh first, fatal failures propagate immediately, and cancellation is
/// a terminal state that never counts against the circuit breaker.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorClass {
    /// Transient/network failure — retried via the fallback chain
    Transient,
    /// Authentication/credential failure — refresh credentials, then retry
    Auth,
    /// Resource/environment failure — fatal, no retry
    Fatal,
    /// Caller-initiated cancellation — terminal, not a reliability signal
    Cancelled,
}

/// Output signatures indicating an authentication/credential failure
///
/// Matched case-insensitively against the external tool's output.
const AUTH_SIGNATURES: &[&str] = &[
    "sign in to confirm your age",
    "sign in to confirm you're not a bot",
    "http error 403",
    " 403 ",
    "forbidden",
    "private video",
    "members-only",
    "this video is only available to registered users",
    "requires authentication",
    "login required",
];

/// Output signatures indicating a fatal resource/environment failure
const FATAL_SIGNATURES: &[&str] = &[
    "no space left on device",
    "disk full",
    "permission denied",
    "access is denied",
    "read-only file system",
    "executable file not found",
];

/// Returns true if the text matches a known authentication-failure signature
pub fn is_auth_signature(text: &str) -> bool {
    let lower = text.to_lowercase();
    AUTH_SIGNATURES.iter().any(|sig| lower.contains(sig))
}

/// Returns true if the text matches a known fatal resource-failure signature
pub fn is_fatal_signature(text: &str) -> bool {
    let lower = text.to_lowercase();
    FATAL_SIGNATURES.iter().any(|sig| lower.contains(sig))
}

/// Extract the first `ERROR:` line from tool output, if any
///
/// The external tool prefixes hard failures with `ERROR:`; surfacing that
/// line alone gives callers a readable message without the whole tail.
pub fn extract_error_line(output: &str) -> Option<String> {
    // Compiled per call: this only runs on the failure path
    let re = regex::Regex::new(r"(?im)^\s*ERROR:\s*(.+)$").ok()?;
    re.captures(output)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().trim().to_string())
}

impl Error {
    /// Classify this error for the fallback loop
    pub fn class(&self) -> ErrorClass {
        match self {
            Error::Job(JobError::Cancelled) => ErrorClass::Cancelled,
            Error::Tool(msg) => {
                if is_auth_signature(msg) {
                    ErrorClass::Auth
                } else if is_fatal_signature(msg) {
                    ErrorClass::Fatal
                } else {
                    ErrorClass::Transient
                }
            }
            // Missing binary needs user action, not another strategy
            Error::ToolMissing(_) => ErrorClass::Fatal,
            Error::Io(e) => match e.kind() {
                std::io::ErrorKind::TimedOut
                | std::io::ErrorKind::ConnectionRefused
                | std::io::ErrorKind::ConnectionReset
                | std::io::ErrorKind::ConnectionAborted
                | std::io::ErrorKind::NotConnected
                | std::io::ErrorKind::BrokenPipe
                | std::io::ErrorKind::Interrupted => ErrorClass::Transient,
                _ => ErrorClass::Fatal,
            },
            Error::Credential(_) => ErrorClass::Auth,
            _ => ErrorClass::Fatal,
        }
    }

    /// Returns true if this error represents caller-initiated cancellation
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Job(JobError::Cancelled))
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancellation_classifies_as_cancelled() {
        assert_eq!(
            Error::Job(JobError::Cancelled).class(),
            ErrorClass::Cancelled
        );
    }

    #[test]
    fn tool_403_classifies_as_auth() {
        let err = Error::Tool("ERROR: unable to download video data: HTTP Error 403".into());
        assert_eq!(err.class(), ErrorClass::Auth);
    }

    #[test]
    fn tool_sign_in_prompt_classifies_as_auth() {
        let err = Error::Tool("Sign in to confirm you're not a bot".into());
        assert_eq!(err.class(), ErrorClass::Auth);
    }

    #[test]
    fn tool_disk_full_classifies_as_fatal() {
        let err = Error::Tool("ERROR: No space left on device".into());
        assert_eq!(err.class(), ErrorClass::Fatal);
    }

    #[test]
    fn tool_connection_reset_classifies_as_transient() {
        let err = Error::Tool("ERROR: Connection reset by peer".into());
        assert_eq!(err.class(), ErrorClass::Transient);
    }

    #[test]
    fn missing_binary_classifies_as_fatal() {
        assert_eq!(
            Error::ToolMissing("yt-dlp".into()).class(),
            ErrorClass::Fatal
        );
    }

    #[test]
    fn io_timeout_is_transient_but_not_found_is_fatal() {
        let timeout = Error::Io(std::io::Error::new(std::io::ErrorKind::TimedOut, "timeout"));
        assert_eq!(timeout.class(), ErrorClass::Transient);

        let not_found = Error::Io(std::io::Error::new(std::io::ErrorKind::NotFound, "gone"));
        assert_eq!(not_found.class(), ErrorClass::Fatal);
    }

    #[test]
    fn credential_errors_classify_as_auth() {
        let err = Error::Credential(CredentialError::RefreshFailed("browser locked".into()));
        assert_eq!(err.class(), ErrorClass::Auth);
    }

    #[test]
    fn extract_error_line_finds_first_error() {
        let output = "[download] 42% of 10MiB\nERROR: fragment 3 not found\nretrying...";
        assert_eq!(extract_error_line(output).unwrap(), "fragment 3 not found");
    }

    #[test]
    fn extract_error_line_none_without_marker() {
        assert!(extract_error_line("[download] 100% done").is_none());
    }

    #[test]
    fn auth_signature_matching_is_case_insensitive() {
        assert!(is_auth_signature("LOGIN REQUIRED to view this"));
        assert!(is_auth_signature("Private Video"));
        assert!(!is_auth_signature("[download] 50% of 3MiB"));
    }

    #[test]
    fn strategies_exhausted_message_lists_attempts() {
        let err = JobError::StrategiesExhausted {
            attempted: vec!["speed".into(), "stable".into(), "harsh".into()],
            last: "HTTP Error 500".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("speed, stable, harsh"));
        assert!(msg.contains("HTTP Error 500"));
    }
}
