//! Credential (cookie) provisioning and refresh
//!
//! Maintains one canonical cookie artifact plus a JSON sidecar recording
//! where it came from. Refresh is strictly "refresh then swap": a new
//! artifact is fully written to a scratch path and renamed over the old
//! one only on success, so a failed refresh can never delete or truncate
//! a previously valid artifact. When extraction fails but an older
//! artifact survives, the service enters a Fallback state and surfaces a
//! warning instead of hiding the degradation.
//!
//! Only one refresh runs at a time; a second caller gets an immediate
//! busy result rather than queueing behind the first.

mod netscape;
mod provider;

pub use netscape::{Cookie, parse as parse_cookie_file, serialize as serialize_cookie_file};
pub use provider::{CredentialProvider, FileCredentialProvider};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::config::CredentialConfig;
use crate::error::{CredentialError, Error, Result, is_auth_signature};
use crate::types::Event;

/// Sidecar metadata written next to the artifact
///
/// Part of the artifact's identity: source-consistency checks compare
/// this against the currently configured source.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ArtifactMeta {
    /// Identifier of the provider that produced the artifact
    pub source: String,
    /// When the artifact was extracted
    pub extracted_at: DateTime<Utc>,
    /// Number of cookies in the artifact
    pub cookie_count: usize,
}

/// Lifecycle state of the credential artifact
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CredentialState {
    /// Artifact exists, matches the configured source, under the age threshold
    Fresh,
    /// Artifact exists but is over the age threshold
    Stale,
    /// Refresh failed; a previously valid artifact is being reused
    Fallback,
    /// No artifact on disk
    Unavailable,
}

/// Snapshot of the credential service for callers
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CredentialStatus {
    /// Derived lifecycle state
    pub state: CredentialState,
    /// Canonical artifact path
    pub path: PathBuf,
    /// Whether the artifact exists on disk
    pub exists: bool,
    /// Artifact age in minutes, when it exists
    pub age_minutes: Option<f64>,
    /// Whether the artifact is over the age threshold
    pub is_stale: bool,
    /// The source the caller configured, if any
    pub configured_source: Option<String>,
    /// The source recorded in the sidecar, if any
    pub actual_source: Option<String>,
    /// Whether configured and actual sources disagree
    pub source_mismatch: bool,
    /// Warning describing an active fallback, if any
    pub fallback_warning: Option<String>,
    /// Cookie count recorded in the sidecar
    pub cookie_count: usize,
}

/// Canonical credential artifact owner
///
/// Constructed once by the composition root and shared; it is the only
/// code allowed to write the artifact or its sidecar.
pub struct CredentialService {
    artifact_path: PathBuf,
    meta_path: PathBuf,
    configured_source: Option<String>,
    stale_after: Duration,
    refresh_timeout: Duration,
    provider: Option<Arc<dyn CredentialProvider>>,
    refresh_lock: tokio::sync::Mutex<()>,
    fallback_warning: std::sync::Mutex<Option<String>>,
    event_tx: tokio::sync::broadcast::Sender<Event>,
}

impl CredentialService {
    /// Create the service from configuration
    ///
    /// `provider` is the extraction backend; None disables refreshing
    /// (an existing artifact is still served).
    pub fn new(
        config: &CredentialConfig,
        provider: Option<Arc<dyn CredentialProvider>>,
        event_tx: tokio::sync::broadcast::Sender<Event>,
    ) -> Self {
        let meta_path = PathBuf::from(format!("{}.meta", config.artifact_path.display()));
        Self {
            artifact_path: config.artifact_path.clone(),
            meta_path,
            configured_source: config.source.clone(),
            stale_after: config.stale_after,
            refresh_timeout: config.refresh_timeout,
            provider,
            refresh_lock: tokio::sync::Mutex::new(()),
            fallback_warning: std::sync::Mutex::new(None),
            event_tx,
        }
    }

    /// Path of a usable artifact, or None when no artifact exists
    ///
    /// A stale or fallback artifact is still usable — degraded beats
    /// nothing, and the degradation is visible via [`status`](Self::status).
    pub fn artifact_path(&self) -> Option<PathBuf> {
        self.artifact_path.exists().then(|| self.artifact_path.clone())
    }

    /// Whether the artifact exists on disk
    pub fn exists(&self) -> bool {
        self.artifact_path.exists()
    }

    /// Artifact age, when it exists
    pub fn age(&self) -> Option<Duration> {
        let modified = std::fs::metadata(&self.artifact_path)
            .and_then(|m| m.modified())
            .ok()?;
        modified.elapsed().ok()
    }

    /// Whether the artifact is over the configured age threshold
    pub fn is_stale(&self) -> bool {
        match self.age() {
            Some(age) => age > self.stale_after,
            None => true,
        }
    }

    /// The source recorded in the sidecar, if readable
    pub fn actual_source(&self) -> Option<String> {
        self.load_meta().map(|m| m.source)
    }

    /// Compare the sidecar's source against the caller's expectation
    ///
    /// Returns `(consistent, actual_source)`. A missing artifact counts
    /// as consistent; an artifact without a sidecar does not. This only
    /// reports — deleting a mismatched artifact is a caller decision.
    pub fn validate_source_consistency(&self, expected: &str) -> (bool, Option<String>) {
        if !self.exists() {
            return (true, None);
        }
        match self.actual_source() {
            None => {
                tracing::debug!("artifact has no source metadata");
                (false, None)
            }
            Some(actual) if actual != expected => {
                tracing::debug!(%actual, %expected, "artifact source mismatch");
                (false, Some(actual))
            }
            Some(actual) => (true, Some(actual)),
        }
    }

    /// Kick off a background best-effort refresh; never blocks
    ///
    /// Used at startup and between jobs. Failures are logged; a previous
    /// artifact is kept and the service enters Fallback. If a refresh is
    /// already running this silently does nothing.
    pub fn silent_refresh(self: &Arc<Self>) {
        let service = Arc::clone(self);
        tokio::spawn(async move {
            match service.run_refresh().await {
                Ok(message) => {
                    tracing::info!(%message, "silent credential refresh succeeded");
                }
                Err(Error::Credential(CredentialError::RefreshBusy)) => {
                    tracing::debug!("silent refresh skipped: refresh already running");
                }
                Err(e) => {
                    tracing::warn!(error = %e, "silent credential refresh failed");
                }
            }
        });
    }

    /// Refresh now, returning a caller-visible outcome message
    ///
    /// # Errors
    ///
    /// - [`CredentialError::RefreshBusy`] when another refresh holds the lock
    /// - [`CredentialError::NoSource`] when no provider is configured
    /// - [`CredentialError::RefreshTimeout`] when the provider overruns
    /// - [`CredentialError::RefreshFailed`] when extraction fails; a
    ///   previously valid artifact is kept and Fallback state is entered
    pub async fn force_refresh(&self) -> Result<String> {
        self.run_refresh().await
    }

    /// Detect whether tool output indicates an expired/missing credential
    pub fn detect_auth_error(&self, tool_output: &str) -> bool {
        is_auth_signature(tool_output)
    }

    /// Current status snapshot
    pub fn status(&self) -> CredentialStatus {
        let exists = self.exists();
        let meta = self.load_meta();
        let actual_source = meta.as_ref().map(|m| m.source.clone());
        let fallback_warning = self.current_fallback();
        let source_mismatch = match (&self.configured_source, &actual_source) {
            (Some(configured), Some(actual)) => configured != actual,
            _ => false,
        };

        let state = if !exists {
            CredentialState::Unavailable
        } else if fallback_warning.is_some() {
            CredentialState::Fallback
        } else if self.is_stale() {
            CredentialState::Stale
        } else {
            CredentialState::Fresh
        };

        CredentialStatus {
            state,
            path: self.artifact_path.clone(),
            exists,
            age_minutes: self.age().map(|a| a.as_secs_f64() / 60.0),
            is_stale: self.is_stale(),
            configured_source: self.configured_source.clone(),
            actual_source,
            source_mismatch,
            fallback_warning,
            cookie_count: meta.map(|m| m.cookie_count).unwrap_or(0),
        }
    }

    /// The refresh sequence shared by silent and forced refreshes
    async fn run_refresh(&self) -> Result<String> {
        let _guard = self
            .refresh_lock
            .try_lock()
            .map_err(|_| Error::Credential(CredentialError::RefreshBusy))?;

        let provider = self
            .provider
            .as_ref()
            .ok_or(Error::Credential(CredentialError::NoSource))?;

        let scratch = self.artifact_path.with_extension("txt.new");
        let outcome =
            tokio::time::timeout(self.refresh_timeout, provider.extract(&scratch)).await;

        match outcome {
            Ok(Ok(count)) => {
                // Swap only now that a complete replacement exists
                tokio::fs::rename(&scratch, &self.artifact_path).await?;
                let meta = ArtifactMeta {
                    source: provider.source_id().to_string(),
                    extracted_at: Utc::now(),
                    cookie_count: count,
                };
                self.save_meta(&meta).await;
                self.clear_fallback();
                let message =
                    format!("credentials updated from {} ({count} cookies)", meta.source);
                tracing::info!(source = %meta.source, count, "credential artifact replaced");
                Ok(message)
            }
            Ok(Err(e)) => {
                let _ = tokio::fs::remove_file(&scratch).await;
                self.enter_fallback(&format!("{e}"));
                Err(e)
            }
            Err(_) => {
                let _ = tokio::fs::remove_file(&scratch).await;
                let seconds = self.refresh_timeout.as_secs();
                self.enter_fallback(&format!("timed out after {seconds}s"));
                Err(Error::Credential(CredentialError::RefreshTimeout { seconds }))
            }
        }
    }

    /// Record (and announce) that an old artifact is covering for a failed refresh
    fn enter_fallback(&self, reason: &str) {
        if !self.exists() {
            return;
        }
        let configured = self
            .configured_source
            .clone()
            .unwrap_or_else(|| "unknown".to_string());
        let actual = self.actual_source().unwrap_or_else(|| "unknown".to_string());
        let warning = format!(
            "refresh from '{configured}' failed ({reason}); reusing previous artifact from '{actual}'"
        );
        tracing::warn!(%warning, "credential service entering fallback");
        match self.fallback_warning.lock() {
            Ok(mut guard) => *guard = Some(warning.clone()),
            Err(poisoned) => *poisoned.into_inner() = Some(warning.clone()),
        }
        self.event_tx.send(Event::CredentialFallback { warning }).ok();
    }

    fn clear_fallback(&self) {
        match self.fallback_warning.lock() {
            Ok(mut guard) => *guard = None,
            Err(poisoned) => *poisoned.into_inner() = None,
        }
    }

    fn current_fallback(&self) -> Option<String> {
        match self.fallback_warning.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    fn load_meta(&self) -> Option<ArtifactMeta> {
        let contents = std::fs::read_to_string(&self.meta_path).ok()?;
        match serde_json::from_str(&contents) {
            Ok(meta) => Some(meta),
            Err(e) => {
                tracing::warn!(error = %e, "unreadable artifact sidecar");
                None
            }
        }
    }

    /// Sidecar write failures are logged, not raised: the artifact itself
    /// is already in place and usable.
    async fn save_meta(&self, meta: &ArtifactMeta) {
        let json = match serde_json::to_string_pretty(meta) {
            Ok(json) => json,
            Err(e) => {
                tracing::warn!(error = %e, "failed to serialize artifact sidecar");
                return;
            }
        };
        if let Err(e) = tokio::fs::write(&self.meta_path, json).await {
            tracing::warn!(error = %e, path = %self.meta_path.display(), "failed to write artifact sidecar");
        }
    }
}

/// Build the provider named by the configuration, if any
pub fn provider_from_config(config: &CredentialConfig) -> Option<Arc<dyn CredentialProvider>> {
    let source_file = config.source_file.as_ref()?;
    let source_id = config.source.clone().unwrap_or_else(|| "file".to_string());
    Some(Arc::new(FileCredentialProvider::new(
        source_file.clone(),
        source_id,
    )))
}
