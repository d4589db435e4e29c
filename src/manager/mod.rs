//! Top-level fetch manager, split into focused submodules.
//!
//! The `FetchManager` struct and its methods are organized by domain:
//! - [`control`] - Job lifecycle control (pause/resume/cancel/discard)
//! - [`lifecycle`] - Shutdown coordination
//!
//! The manager is the composition root: it constructs and owns every
//! service (circuit breaker, process manager, credential service, resume
//! store, tool adapter, executor) and passes references explicitly —
//! there are no process-wide singletons.

mod control;
mod lifecycle;


use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};

use crate::breaker::CircuitBreaker;
use crate::config::Config;
use crate::credentials::{CredentialService, CredentialStatus, provider_from_config};
use crate::error::{Error, Result};
use crate::executor::{JobControl, JobExecutor};
use crate::process::{ProcessManager, ProcessRecord};
use crate::resume::{ResumeRecord, ResumeStore};
use crate::tool::ToolAdapter;
use crate::types::{Event, FetchOptions, Job, JobId, Mode};

/// Tracking of currently running job workers
#[derive(Clone)]
pub(crate) struct JobTable {
    /// Controls of active jobs, for pause/cancel operations
    pub(crate) active: Arc<tokio::sync::Mutex<HashMap<JobId, Arc<JobControl>>>>,
    /// Whether new jobs are accepted (false during shutdown)
    pub(crate) accepting_new: Arc<AtomicBool>,
    /// Next job id, seeded above the highest persisted id
    pub(crate) next_id: Arc<AtomicI64>,
}

/// Main fetch manager instance (cloneable - all fields are Arc-wrapped)
#[derive(Clone)]
pub struct FetchManager {
    /// Configuration (wrapped in Arc for sharing across tasks)
    pub(crate) config: Arc<Config>,
    /// Event broadcast channel sender (multiple subscribers supported)
    pub(crate) event_tx: tokio::sync::broadcast::Sender<Event>,
    /// Shared per-mode circuit breaker
    pub(crate) breaker: Arc<CircuitBreaker>,
    /// Child process registry and terminator
    pub(crate) processes: Arc<ProcessManager>,
    /// Credential artifact owner
    pub(crate) credentials: Arc<CredentialService>,
    /// Resume persistence store
    pub(crate) store: Arc<ResumeStore>,
    /// Job executor shared by all workers
    pub(crate) executor: Arc<JobExecutor>,
    /// Active job tracking
    pub(crate) jobs: JobTable,
}

impl FetchManager {
    /// Create a new FetchManager instance
    ///
    /// This initializes all core components:
    /// - Creates the download and state directories
    /// - Resolves the external fetch tool binary
    /// - Loads the resume store
    /// - Sets up the event broadcast channel
    /// - Kicks off a silent best-effort credential refresh
    ///
    /// # Errors
    ///
    /// Returns an error if directories cannot be created or the fetch
    /// tool binary cannot be located.
    pub async fn new(config: Config) -> Result<Self> {
        tokio::fs::create_dir_all(&config.download.download_dir)
            .await
            .map_err(|e| {
                Error::Io(std::io::Error::new(
                    e.kind(),
                    format!(
                        "Failed to create download directory '{}': {}",
                        config.download.download_dir.display(),
                        e
                    ),
                ))
            })?;
        if let Some(parent) = config.persistence.store_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        if let Some(parent) = config.credentials.artifact_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        // Buffer of 1000 events; subscribers that lag further get Lagged
        let (event_tx, _rx) = tokio::sync::broadcast::channel(1000);

        let breaker = Arc::new(CircuitBreaker::new(&config.breaker));
        let processes = Arc::new(ProcessManager::new(
            config.tool.kill_grace,
            config.tool.sweep_process_names.clone(),
        ));

        let provider = provider_from_config(&config.credentials);
        let credentials = Arc::new(CredentialService::new(
            &config.credentials,
            provider,
            event_tx.clone(),
        ));

        let store = Arc::new(
            ResumeStore::open(
                config.persistence.store_path.clone(),
                config.persistence.save_interval,
            )
            .await,
        );
        let next_id = store.max_id().await + 1;

        let tool = Arc::new(ToolAdapter::from_config(
            &config.tool,
            Arc::clone(&processes),
        )?);
        tracing::info!(binary = %tool.binary().display(), "fetch tool resolved");

        let config = Arc::new(config);
        let executor = Arc::new(JobExecutor::new(
            Arc::clone(&config),
            Arc::clone(&breaker),
            tool,
            Arc::clone(&credentials),
            Arc::clone(&store),
            event_tx.clone(),
        ));

        // Startup refresh: best-effort, off the construction path
        credentials.silent_refresh();

        Ok(Self {
            config,
            event_tx,
            breaker,
            processes,
            credentials,
            store,
            executor,
            jobs: JobTable {
                active: Arc::new(tokio::sync::Mutex::new(HashMap::new())),
                accepting_new: Arc::new(AtomicBool::new(true)),
                next_id: Arc::new(AtomicI64::new(next_id)),
            },
        })
    }

    /// Subscribe to job events
    ///
    /// Multiple subscribers are supported. Each subscriber receives all
    /// events independently; a subscriber more than 1000 events behind
    /// receives a `Lagged` error.
    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<Event> {
        self.event_tx.subscribe()
    }

    /// Get the current configuration
    pub fn get_config(&self) -> Arc<Config> {
        Arc::clone(&self.config)
    }

    /// Submit a fetch job; returns its id
    ///
    /// The job runs on its own worker task. Progress, state changes, and
    /// discovered paths arrive on the event channel.
    ///
    /// # Errors
    ///
    /// - [`Error::ShuttingDown`] after shutdown started
    /// - [`Error::InvalidUrl`] for an unparseable target
    /// - [`Error::Config`] when the options carry a pre-filled credential
    ///   slot (it is filled internally)
    pub async fn submit(&self, url: &str, mode: Mode, options: FetchOptions) -> Result<JobId> {
        if !self.jobs.accepting_new.load(Ordering::SeqCst) {
            return Err(Error::ShuttingDown);
        }

        let parsed = url::Url::parse(url).map_err(|e| Error::InvalidUrl(format!("{url}: {e}")))?;
        if options.cookie_file.is_some() {
            return Err(Error::Config {
                message: "cookie_file is filled internally and must be empty at submission"
                    .to_string(),
                key: Some("cookie_file".to_string()),
            });
        }

        let id = JobId::new(self.jobs.next_id.fetch_add(1, Ordering::SeqCst));
        let title = derive_title(&parsed);
        let job = Job::new(id, url.to_string(), title, mode, options);

        self.store
            .create(
                &job,
                self.config.download_dir(),
                &self.config.download.output_template,
            )
            .await?;
        self.emit(Event::Queued { id });
        tracing::info!(job_id = id.0, url, %mode, "job submitted");

        self.spawn_worker(job).await;
        Ok(id)
    }

    /// Resumable records from the store, excluding currently active jobs
    pub async fn list_resumable(&self) -> Vec<ResumeRecord> {
        let active = self.jobs.active.lock().await;
        self.store
            .scan_resumable()
            .await
            .into_iter()
            .filter(|r| !active.contains_key(&JobId::new(r.id)))
            .collect()
    }

    /// Current credential service snapshot
    pub fn credential_status(&self) -> CredentialStatus {
        self.credentials.status()
    }

    /// Force a credential refresh now; returns the outcome message
    pub async fn force_credential_refresh(&self) -> Result<String> {
        self.credentials.force_refresh().await
    }

    /// Compare the artifact's recorded source against `expected`
    pub fn validate_credential_source(&self, expected: &str) -> (bool, Option<String>) {
        self.credentials.validate_source_consistency(expected)
    }

    /// Diagnostics: registered child processes that are still alive
    pub fn process_diagnostics(&self) -> Vec<ProcessRecord> {
        self.processes.list_active()
    }

    /// Diagnostics: whether a mode's circuit breaker is currently open
    pub fn mode_degraded(&self, mode: Mode) -> bool {
        self.breaker.is_degraded(mode)
    }

    /// Spawn the worker task that drives a job to a terminal state
    pub(crate) async fn spawn_worker(&self, mut job: Job) {
        let control = Arc::new(JobControl::new());
        self.jobs
            .active
            .lock()
            .await
            .insert(job.id, Arc::clone(&control));

        let manager = self.clone();
        tokio::spawn(async move {
            let id = job.id;
            if let Err(e) = manager.executor.execute(&mut job, &control).await {
                if e.is_cancelled() {
                    tracing::debug!(job_id = id.0, "worker stopped by control request");
                } else {
                    tracing::warn!(job_id = id.0, error = %e, "worker finished with error");
                }
            }
            manager.jobs.active.lock().await.remove(&id);
        });
    }

    pub(crate) fn emit(&self, event: Event) {
        // send() returns Err when there are no receivers; events are
        // droppable by design
        self.event_tx.send(event).ok();
    }
}

/// Best-effort display title for a URL
///
/// Prefers the `v` query parameter (the common watch-page shape), then
/// the last path segment, then the host.
fn derive_title(url: &url::Url) -> String {
    if let Some((_, v)) = url.query_pairs().find(|(k, _)| k == "v")
        && !v.is_empty()
    {
        return v.to_string();
    }
    if let Some(segment) = url
        .path_segments()
        .and_then(|mut segments| segments.next_back().map(str::to_string))
        && !segment.is_empty()
    {
        return segment;
    }
    url.host_str().unwrap_or("download").to_string()
}
