//! Job execution: the strategy fallback loop
//!
//! Drives one job through configure → execute → (fallback loop) →
//! terminal state. Each attempt runs the external tool under the current
//! strategy; failures are classified and either walk the fallback chain
//! (transient), force a credential refresh first (authentication),
//! or abort immediately (fatal). Cancellation is terminal and is never
//! reported to the circuit breaker.

use rand::Rng;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::breaker::{CircuitBreaker, StrategyResolver};
use crate::config::Config;
use crate::credentials::CredentialService;
use crate::error::{Error, ErrorClass, JobError, Result};
use crate::resume::ResumeStore;
use crate::tool::ToolAdapter;
use crate::types::{AttemptOutcome, AttemptRecord, Event, Job, Mode, Status};

/// Interval at which progress is checkpointed to the resume store
///
/// The store applies its own debounce on top; this only bounds how often
/// the checkpoint task wakes up.
const CHECKPOINT_INTERVAL: Duration = Duration::from_secs(1);

/// Cancellation and pause signaling for one running job
///
/// Pause and cancel both stop the child through the same token; the flag
/// records which terminal state the job should land in.
pub struct JobControl {
    cancel: CancellationToken,
    pause: AtomicBool,
}

impl JobControl {
    /// Create an unsignaled control
    pub fn new() -> Self {
        Self {
            cancel: CancellationToken::new(),
            pause: AtomicBool::new(false),
        }
    }

    /// Request cancellation (terminal state: Cancelled)
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Request a pause (terminal state: Paused, resumable later)
    pub fn request_pause(&self) {
        self.pause.store(true, Ordering::SeqCst);
        self.cancel.cancel();
    }

    /// Whether the stop was a pause rather than a cancel
    pub fn is_pause_requested(&self) -> bool {
        self.pause.load(Ordering::SeqCst)
    }

    /// The underlying cancellation token
    pub fn token(&self) -> &CancellationToken {
        &self.cancel
    }
}

impl Default for JobControl {
    fn default() -> Self {
        Self::new()
    }
}

/// Executes jobs against the shared services
///
/// One executor is constructed by the composition root and shared by all
/// job workers; it owns no per-job state.
pub struct JobExecutor {
    config: Arc<Config>,
    breaker: Arc<CircuitBreaker>,
    tool: Arc<ToolAdapter>,
    credentials: Arc<CredentialService>,
    store: Arc<ResumeStore>,
    event_tx: tokio::sync::broadcast::Sender<Event>,
}

impl JobExecutor {
    /// Wire an executor over the shared services
    pub fn new(
        config: Arc<Config>,
        breaker: Arc<CircuitBreaker>,
        tool: Arc<ToolAdapter>,
        credentials: Arc<CredentialService>,
        store: Arc<ResumeStore>,
        event_tx: tokio::sync::broadcast::Sender<Event>,
    ) -> Self {
        Self {
            config,
            breaker,
            tool,
            credentials,
            store,
            event_tx,
        }
    }

    /// Drive a job to a terminal state; returns its output paths
    ///
    /// # Errors
    ///
    /// - [`JobError::Cancelled`] when the control was signaled (the job
    ///   lands in Paused or Cancelled depending on the request)
    /// - [`JobError::StrategiesExhausted`] when every strategy in the
    ///   chain failed
    /// - Fatal-class errors (missing binary, disk full, ...) verbatim
    pub async fn execute(&self, job: &mut Job, control: &JobControl) -> Result<Vec<PathBuf>> {
        job.status = Status::Running;
        self.store.set_status(job.id, Status::Running, None).await;

        let resolver = StrategyResolver::new(&self.breaker);
        let mut strategy = resolver.resolve(job.mode);
        // Auto jobs report under the mode they actually entered at
        let report_mode = if job.mode == Mode::Auto {
            strategy.mode
        } else {
            job.mode
        };

        // Progress flows through atomics: the tool callbacks are sync,
        // while store checkpoints are async. A background task bridges
        // the two (the store applies its own debounce).
        let downloaded = Arc::new(AtomicU64::new(0));
        let total = Arc::new(AtomicU64::new(0));
        let has_progress = Arc::new(AtomicBool::new(false));
        let checkpoint_stop = CancellationToken::new();
        let checkpoint = self.spawn_checkpoint_task(
            job.id,
            Arc::clone(&downloaded),
            Arc::clone(&total),
            Arc::clone(&has_progress),
            checkpoint_stop.clone(),
        );

        let result = self
            .fallback_loop(job, control, &resolver, &mut strategy, report_mode, &downloaded, &total, &has_progress)
            .await;

        checkpoint_stop.cancel();
        let _ = checkpoint.await;
        if has_progress.load(Ordering::Relaxed) {
            let total_bytes = total.load(Ordering::Relaxed);
            self.store
                .update_progress(
                    job.id,
                    downloaded.load(Ordering::Relaxed),
                    (total_bytes > 0).then_some(total_bytes),
                )
                .await;
        }

        match result {
            Ok(outputs) => {
                job.status = Status::Completed;
                self.store.set_status(job.id, Status::Completed, None).await;
                self.emit(Event::Completed {
                    id: job.id,
                    outputs: outputs.clone(),
                });
                tracing::info!(job_id = job.id.0, outputs = outputs.len(), "job completed");
                Ok(outputs)
            }
            Err(e) if e.is_cancelled() => {
                if control.is_pause_requested() {
                    job.status = Status::Paused;
                    self.store.set_status(job.id, Status::Paused, None).await;
                    self.emit(Event::Paused { id: job.id });
                    tracing::info!(job_id = job.id.0, "job paused");
                } else {
                    job.status = Status::Cancelled;
                    self.store.set_status(job.id, Status::Cancelled, None).await;
                    self.emit(Event::Cancelled { id: job.id });
                    tracing::info!(job_id = job.id.0, "job cancelled");
                }
                Err(e)
            }
            Err(e) => {
                let message = e.to_string();
                job.status = Status::Failed;
                self.store
                    .set_status(job.id, Status::Failed, Some(&message))
                    .await;
                self.emit(Event::Failed {
                    id: job.id,
                    error: message,
                });
                tracing::warn!(job_id = job.id.0, error = %e, "job failed");
                Err(e)
            }
        }
    }

    /// The attempt loop: try strategies until success, exhaustion, or a
    /// fatal/cancel stop
    #[allow(clippy::too_many_arguments)]
    async fn fallback_loop(
        &self,
        job: &mut Job,
        control: &JobControl,
        resolver: &StrategyResolver<'_>,
        strategy: &mut &'static crate::strategy::Strategy,
        report_mode: Mode,
        downloaded: &Arc<AtomicU64>,
        total: &Arc<AtomicU64>,
        has_progress: &Arc<AtomicBool>,
    ) -> Result<Vec<PathBuf>> {
        let mut refresh_failure: Option<String> = None;

        loop {
            // Credential injection happens per attempt: a refresh between
            // attempts must be visible to the next one.
            job.options.cookie_file = self.credentials.artifact_path();

            job.active_strategy = Some(strategy.label.to_string());
            self.emit(Event::Started {
                id: job.id,
                strategy: strategy.label.to_string(),
            });
            tracing::info!(job_id = job.id.0, strategy = strategy.label, "attempt starting");

            let outcome = self.run_attempt(job, control, strategy, downloaded, total, has_progress).await;

            match outcome {
                Ok(outputs) => {
                    job.attempts.push(AttemptRecord {
                        strategy: strategy.label.to_string(),
                        outcome: AttemptOutcome::Success,
                    });
                    // Happens-after the terminal determination of the attempt
                    self.breaker.report_outcome(report_mode, true);
                    return Ok(outputs);
                }
                Err(e) if e.is_cancelled() => {
                    job.attempts.push(AttemptRecord {
                        strategy: strategy.label.to_string(),
                        outcome: AttemptOutcome::Cancelled,
                    });
                    // Cancellation is not a reliability signal: no report
                    return Err(e);
                }
                Err(e) => {
                    let message = e.to_string();
                    job.attempts.push(AttemptRecord {
                        strategy: strategy.label.to_string(),
                        outcome: AttemptOutcome::Failed(message.clone()),
                    });
                    self.breaker.report_outcome(report_mode, false);

                    let class = e.class();
                    if class == ErrorClass::Fatal {
                        tracing::error!(job_id = job.id.0, error = %e, "fatal error, no retry");
                        return Err(e);
                    }

                    let next = resolver.fallback(strategy);

                    if class == ErrorClass::Auth && next.is_some() {
                        tracing::warn!(
                            job_id = job.id.0,
                            "authentication failure detected, forcing credential refresh"
                        );
                        match self.credentials.force_refresh().await {
                            Ok(message) => {
                                tracing::info!(%message, "credential refresh succeeded");
                                refresh_failure = None;
                            }
                            Err(refresh_err) => {
                                tracing::warn!(error = %refresh_err, "credential refresh failed");
                                refresh_failure = Some(refresh_err.to_string());
                            }
                        }
                    }

                    match next {
                        Some(fallback) => {
                            self.emit(Event::StrategySwitched {
                                id: job.id,
                                from: strategy.label.to_string(),
                                to: fallback.label.to_string(),
                            });
                            tracing::warn!(
                                job_id = job.id.0,
                                from = strategy.label,
                                to = fallback.label,
                                error = %e,
                                "strategy failed, falling back"
                            );
                            self.backoff(job.attempts.len() as u32, control).await?;
                            *strategy = fallback;
                        }
                        None => {
                            let attempted: Vec<String> =
                                job.attempts.iter().map(|a| a.strategy.clone()).collect();
                            let last = match (&refresh_failure, class) {
                                (Some(refresh), ErrorClass::Auth) => format!(
                                    "credentials exhausted (refresh failed: {refresh}): {message}"
                                ),
                                // Prefer the tool's own ERROR line over the raw tail
                                _ => crate::error::extract_error_line(&message)
                                    .unwrap_or(message),
                            };
                            return Err(Error::Job(JobError::StrategiesExhausted {
                                attempted,
                                last,
                            }));
                        }
                    }
                }
            }
        }
    }

    /// Run the tool once under the current strategy
    async fn run_attempt(
        &self,
        job: &mut Job,
        control: &JobControl,
        strategy: &crate::strategy::Strategy,
        downloaded: &Arc<AtomicU64>,
        total: &Arc<AtomicU64>,
        has_progress: &Arc<AtomicBool>,
    ) -> Result<Vec<PathBuf>> {
        let args = self.tool.build_args(
            &job.url,
            &job.options,
            strategy,
            self.config.download_dir(),
            &self.config.download.output_template,
        );

        let discovered: std::sync::Mutex<Vec<PathBuf>> = std::sync::Mutex::new(Vec::new());
        let event_tx = self.event_tx.clone();
        let id = job.id;

        let run_result = self
            .tool
            .run(
                id,
                args,
                control.token(),
                |progress| {
                    downloaded.store(progress.downloaded_bytes, Ordering::Relaxed);
                    if let Some(t) = progress.total_bytes {
                        total.store(t, Ordering::Relaxed);
                    }
                    has_progress.store(true, Ordering::Relaxed);
                    event_tx
                        .send(Event::Progress {
                            id,
                            downloaded_bytes: progress.downloaded_bytes,
                            total_bytes: progress.total_bytes,
                            speed_bps: progress.speed_bps,
                            eta_secs: progress.eta_secs,
                        })
                        .ok();
                },
                |status| {
                    event_tx
                        .send(Event::StatusMessage {
                            id,
                            message: status.to_string(),
                        })
                        .ok();
                },
                |path| {
                    event_tx
                        .send(Event::PathDiscovered {
                            id,
                            path: path.to_path_buf(),
                        })
                        .ok();
                    match discovered.lock() {
                        Ok(mut guard) => guard.push(path.to_path_buf()),
                        Err(poisoned) => poisoned.into_inner().push(path.to_path_buf()),
                    }
                },
            )
            .await;

        // Record observed paths whatever the outcome: partials matter for
        // resume cleanup precisely when the attempt did not finish.
        let paths = match discovered.into_inner() {
            Ok(paths) => paths,
            Err(poisoned) => poisoned.into_inner(),
        };
        for path in &paths {
            job.output_paths.push(path.clone());
            self.store.add_temp_file(id, path).await;
        }

        let outcome = run_result?;
        let mut outputs = Vec::new();
        if let Some(path) = outcome.output_path {
            outputs.push(path);
        }
        for path in outcome.dest_paths {
            if !outputs.contains(&path) {
                outputs.push(path);
            }
        }
        Ok(outputs)
    }

    /// Delay before the next strategy, scaled by attempts so far
    ///
    /// Cancellation is honored during the wait.
    async fn backoff(&self, attempts: u32, control: &JobControl) -> Result<()> {
        let base = self.config.retry.base_delay.saturating_mul(attempts.max(1));
        let capped = base.min(self.config.retry.max_delay);
        let delay = if self.config.retry.jitter {
            add_jitter(capped)
        } else {
            capped
        };

        tracing::debug!(delay_ms = delay.as_millis() as u64, "backoff before fallback");
        tokio::select! {
            _ = tokio::time::sleep(delay) => Ok(()),
            _ = control.token().cancelled() => Err(Error::Job(JobError::Cancelled)),
        }
    }

    fn spawn_checkpoint_task(
        &self,
        id: crate::types::JobId,
        downloaded: Arc<AtomicU64>,
        total: Arc<AtomicU64>,
        has_progress: Arc<AtomicBool>,
        stop: CancellationToken,
    ) -> tokio::task::JoinHandle<()> {
        let store = Arc::clone(&self.store);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(CHECKPOINT_INTERVAL);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        if has_progress.load(Ordering::Relaxed) {
                            let total_bytes = total.load(Ordering::Relaxed);
                            store
                                .update_progress(
                                    id,
                                    downloaded.load(Ordering::Relaxed),
                                    (total_bytes > 0).then_some(total_bytes),
                                )
                                .await;
                        }
                    }
                    _ = stop.cancelled() => break,
                }
            }
        })
    }

    fn emit(&self, event: Event) {
        // send() errs when nobody subscribes, which is fine
        self.event_tx.send(event).ok();
    }
}

/// Add random jitter: uniformly between the delay and twice the delay
fn add_jitter(delay: Duration) -> Duration {
    let mut rng = rand::thread_rng();
    let factor: f64 = rng.gen_range(0.0..=1.0);
    Duration::from_secs_f64(delay.as_secs_f64() * (1.0 + factor))
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{BreakerConfig, Config};
    use crate::credentials::{CredentialProvider, CredentialService};
    use crate::process::ProcessManager;
    use crate::types::{FetchOptions, JobId};
    use async_trait::async_trait;
    use std::path::Path;
    use std::sync::atomic::AtomicUsize;
    use tempfile::TempDir;

    /// Provider that counts refreshes and writes a minimal artifact
    struct CountingProvider {
        calls: Arc<AtomicUsize>,
        fail: bool,
    }

    #[async_trait]
    impl CredentialProvider for CountingProvider {
        async fn extract(&self, dest: &Path) -> Result<usize> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(Error::Credential(
                    crate::error::CredentialError::RefreshFailed("simulated".into()),
                ));
            }
            tokio::fs::write(dest, "# Netscape HTTP Cookie File\n").await?;
            Ok(0)
        }

        fn source_id(&self) -> &str {
            "mock"
        }

        fn name(&self) -> &'static str {
            "counting"
        }
    }

    struct Harness {
        executor: JobExecutor,
        breaker: Arc<CircuitBreaker>,
        refresh_calls: Arc<AtomicUsize>,
        _dir: TempDir,
    }

    #[cfg(unix)]
    fn write_script(dir: &Path, body: &str) -> PathBuf {
        use std::os::unix::fs::PermissionsExt;
        let path = dir.join("fake-tool");
        std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    async fn harness(dir: TempDir, tool_binary: PathBuf, provider_fails: bool) -> Harness {
        let mut config = Config::default();
        config.download.download_dir = dir.path().to_path_buf();
        config.persistence.store_path = dir.path().join("resume_tasks.json");
        config.credentials.artifact_path = dir.path().join("cookies.txt");
        config.credentials.source = Some("mock".into());
        // Tests care about loop structure, not wall-clock waits
        config.retry.base_delay = Duration::from_millis(10);
        config.retry.max_delay = Duration::from_millis(50);
        config.retry.jitter = false;
        let config = Arc::new(config);

        let (event_tx, _) = tokio::sync::broadcast::channel(256);
        let breaker = Arc::new(CircuitBreaker::new(&BreakerConfig {
            failure_threshold: 3,
        }));
        let processes = Arc::new(ProcessManager::new(
            Duration::from_secs(2),
            vec!["no-such-tool".to_string()],
        ));
        let tool = Arc::new(ToolAdapter::new(tool_binary, processes));
        let refresh_calls = Arc::new(AtomicUsize::new(0));
        let provider = Arc::new(CountingProvider {
            calls: Arc::clone(&refresh_calls),
            fail: provider_fails,
        });
        let credentials = Arc::new(CredentialService::new(
            &config.credentials,
            Some(provider),
            event_tx.clone(),
        ));
        let store = Arc::new(
            ResumeStore::open(config.store_path().clone(), Duration::from_secs(0)).await,
        );

        let executor = JobExecutor::new(
            Arc::clone(&config),
            Arc::clone(&breaker),
            tool,
            credentials,
            Arc::clone(&store),
            event_tx,
        );

        Harness {
            executor,
            breaker,
            refresh_calls,
            _dir: dir,
        }
    }

    fn job(id: i64, mode: Mode) -> Job {
        Job::new(
            JobId::new(id),
            "https://example.com/watch?v=test".into(),
            "test".into(),
            mode,
            FetchOptions::default(),
        )
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn first_strategy_fails_second_succeeds_with_exact_history() {
        let dir = TempDir::new().unwrap();
        let output = dir.path().join("video.mkv");
        std::fs::write(&output, "payload").unwrap();
        // The speed strategy is the only one that passes --http-chunk-size;
        // failing on it makes attempt one fail and attempt two succeed.
        let script = write_script(
            dir.path(),
            &format!(
                r#"case "$*" in
  *--http-chunk-size*) echo 'ERROR: connection reset by peer'; exit 1 ;;
  *) echo '[download] Destination: {}'; exit 0 ;;
esac"#,
                output.display()
            ),
        );
        let h = harness(dir, script, false).await;

        let mut job = job(1, Mode::Speed);
        let control = JobControl::new();
        let outputs = h.executor.execute(&mut job, &control).await.unwrap();

        assert_eq!(job.status, Status::Completed);
        assert_eq!(outputs[0], output);
        assert_eq!(job.attempts.len(), 2);
        assert_eq!(job.attempts[0].strategy, "speed");
        assert!(matches!(job.attempts[0].outcome, AttemptOutcome::Failed(_)));
        assert_eq!(job.attempts[1].strategy, "stable");
        assert_eq!(job.attempts[1].outcome, AttemptOutcome::Success);
        // One failure then a success: counter back at zero
        assert_eq!(h.breaker.consecutive_failures(Mode::Speed), 0);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn exhausted_chain_fails_with_attempted_strategies() {
        let dir = TempDir::new().unwrap();
        let script = write_script(dir.path(), "echo 'ERROR: connection timed out'; exit 1");
        let h = harness(dir, script, false).await;

        let mut job = job(2, Mode::Speed);
        let control = JobControl::new();
        let result = h.executor.execute(&mut job, &control).await;

        match result {
            Err(Error::Job(JobError::StrategiesExhausted { attempted, last })) => {
                assert_eq!(attempted, vec!["speed", "stable", "harsh"]);
                assert!(last.contains("timed out"));
            }
            other => panic!("expected StrategiesExhausted, got {other:?}"),
        }
        assert_eq!(job.status, Status::Failed);
        assert_eq!(h.breaker.consecutive_failures(Mode::Speed), 3);
        assert!(h.breaker.is_degraded(Mode::Speed));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn cancellation_is_terminal_and_never_reaches_the_breaker() {
        let dir = TempDir::new().unwrap();
        let script = write_script(dir.path(), "echo started\nsleep 300");
        let h = harness(dir, script, false).await;

        let mut job = job(3, Mode::Stable);
        let control = Arc::new(JobControl::new());
        let control_trigger = Arc::clone(&control);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(300)).await;
            control_trigger.cancel();
        });

        let result = h.executor.execute(&mut job, &control).await;
        assert!(matches!(result, Err(Error::Job(JobError::Cancelled))));
        assert_eq!(job.status, Status::Cancelled);
        assert_eq!(job.attempts.len(), 1);
        assert_eq!(job.attempts[0].outcome, AttemptOutcome::Cancelled);
        assert_eq!(
            h.breaker.consecutive_failures(Mode::Stable),
            0,
            "cancellation must not count as a failure"
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn pause_request_lands_in_paused_state() {
        let dir = TempDir::new().unwrap();
        let script = write_script(dir.path(), "echo started\nsleep 300");
        let h = harness(dir, script, false).await;

        let mut job = job(4, Mode::Stable);
        let control = Arc::new(JobControl::new());
        let control_trigger = Arc::clone(&control);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(300)).await;
            control_trigger.request_pause();
        });

        let result = h.executor.execute(&mut job, &control).await;
        assert!(matches!(result, Err(Error::Job(JobError::Cancelled))));
        assert_eq!(job.status, Status::Paused);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn auth_error_forces_credential_refresh_before_fallback() {
        let dir = TempDir::new().unwrap();
        let script = write_script(dir.path(), "echo 'ERROR: HTTP Error 403: Forbidden'; exit 1");
        let h = harness(dir, script, false).await;

        let mut job = job(5, Mode::Stable);
        let control = JobControl::new();
        let result = h.executor.execute(&mut job, &control).await;

        assert!(result.is_err());
        // stable failed (auth) → refresh → harsh failed (auth, no fallback)
        assert_eq!(
            h.refresh_calls.load(Ordering::SeqCst),
            1,
            "exactly one forced refresh before the retry"
        );
        assert_eq!(job.attempts.len(), 2);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn failed_refresh_surfaces_credential_exhaustion() {
        let dir = TempDir::new().unwrap();
        let script = write_script(dir.path(), "echo 'ERROR: HTTP Error 403: Forbidden'; exit 1");
        let h = harness(dir, script, true).await;

        let mut job = job(6, Mode::Stable);
        let control = JobControl::new();
        let result = h.executor.execute(&mut job, &control).await;

        match result {
            Err(Error::Job(JobError::StrategiesExhausted { last, .. })) => {
                assert!(
                    last.contains("credentials exhausted"),
                    "message should name the credential failure: {last}"
                );
            }
            other => panic!("expected StrategiesExhausted, got {other:?}"),
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn fatal_error_aborts_without_walking_the_chain() {
        let dir = TempDir::new().unwrap();
        let script = write_script(dir.path(), "echo 'ERROR: No space left on device'; exit 1");
        let h = harness(dir, script, false).await;

        let mut job = job(7, Mode::Speed);
        let control = JobControl::new();
        let result = h.executor.execute(&mut job, &control).await;

        assert!(result.is_err());
        assert_eq!(job.status, Status::Failed);
        assert_eq!(job.attempts.len(), 1, "no fallback after a fatal error");
    }

    #[test]
    fn jitter_stays_within_bounds() {
        let delay = Duration::from_millis(100);
        for _ in 0..100 {
            let jittered = add_jitter(delay);
            assert!(jittered >= delay);
            assert!(jittered <= delay * 2);
        }
    }
}
