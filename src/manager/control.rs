//! Job lifecycle control — pause, resume, cancel, discard.

use crate::error::{Error, JobError, Result};
use crate::types::{FetchOptions, Job, JobId, Mode, Status};

use super::FetchManager;

impl FetchManager {
    /// Pause a job
    ///
    /// A running job is stopped (its child process terminated) and
    /// recorded as Paused so it can be resumed later with
    /// [`resume_job`](Self::resume_job). Pausing an already-paused job is
    /// a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`JobError::InvalidState`] when the job is already in a
    /// terminal state, or [`Error::NotFound`] for an unknown id.
    pub async fn pause(&self, id: JobId) -> Result<()> {
        // Actively running: signal the worker, which records Paused
        {
            let active = self.jobs.active.lock().await;
            if let Some(control) = active.get(&id) {
                control.request_pause();
                return Ok(());
            }
        }

        let record = self
            .store
            .get(id)
            .await
            .ok_or_else(|| Error::NotFound(format!("job {id}")))?;

        match record.status.as_str() {
            "paused" => Ok(()),
            "pending" | "downloading" => {
                // Not actively running (e.g., restored state): just mark it
                self.store.set_status(id, Status::Paused, None).await;
                Ok(())
            }
            terminal => Err(Error::Job(JobError::InvalidState {
                id: id.get(),
                operation: "pause".to_string(),
                current_state: terminal.to_string(),
            })),
        }
    }

    /// Cancel a job
    ///
    /// A running job's child process is terminated and the job lands in
    /// Cancelled. Cancellation is never reported to the circuit breaker.
    ///
    /// # Errors
    ///
    /// Returns [`JobError::InvalidState`] when the job already completed
    /// or failed, or [`Error::NotFound`] for an unknown id.
    pub async fn cancel(&self, id: JobId) -> Result<()> {
        {
            let active = self.jobs.active.lock().await;
            if let Some(control) = active.get(&id) {
                control.cancel();
                return Ok(());
            }
        }

        let record = self
            .store
            .get(id)
            .await
            .ok_or_else(|| Error::NotFound(format!("job {id}")))?;

        match record.status.as_str() {
            "cancelled" => Ok(()),
            "pending" | "downloading" | "paused" => {
                self.store.set_status(id, Status::Cancelled, None).await;
                Ok(())
            }
            terminal => Err(Error::Job(JobError::InvalidState {
                id: id.get(),
                operation: "cancel".to_string(),
                current_state: terminal.to_string(),
            })),
        }
    }

    /// Resume a job from its resume record
    ///
    /// Reconstructs the job from persisted state and spawns a fresh
    /// worker. The tool continues from partial files on disk where the
    /// options allow it. Resuming a job that is already running is a
    /// no-op.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] for an unknown id and
    /// [`JobError::InvalidState`] for a record in a terminal state.
    pub async fn resume_job(&self, id: JobId) -> Result<JobId> {
        if !self
            .jobs
            .accepting_new
            .load(std::sync::atomic::Ordering::SeqCst)
        {
            return Err(Error::ShuttingDown);
        }

        {
            let active = self.jobs.active.lock().await;
            if active.contains_key(&id) {
                return Ok(id);
            }
        }

        let record = self
            .store
            .get(id)
            .await
            .ok_or_else(|| Error::NotFound(format!("job {id}")))?;

        if !record.is_resumable() {
            return Err(Error::Job(JobError::InvalidState {
                id: id.get(),
                operation: "resume".to_string(),
                current_state: record.status.clone(),
            }));
        }

        let options = FetchOptions::from_record_map(&record.options);
        // Mode is not persisted per record; resumed jobs re-enter through
        // Auto so the resolver applies current breaker knowledge.
        let job = Job::new(id, record.url.clone(), record.title.clone(), Mode::Auto, options);

        self.store.set_status(id, Status::Pending, None).await;
        self.emit(crate::types::Event::Queued { id });
        tracing::info!(job_id = id.0, "resuming job from persisted state");

        self.spawn_worker(job).await;
        Ok(id)
    }

    /// Discard a job: drop its record and optionally its files
    ///
    /// A running job is cancelled first. With `clean_files`, recorded
    /// temp files and matching stray partials are deleted (best-effort).
    pub async fn discard(&self, id: JobId, clean_files: bool) -> Result<()> {
        let control = {
            let active = self.jobs.active.lock().await;
            active.get(&id).cloned()
        };
        if let Some(control) = control {
            control.cancel();
            // Give the worker a moment to tear down so its final
            // checkpoint does not resurrect the record
            let deadline = tokio::time::Instant::now() + std::time::Duration::from_secs(5);
            while tokio::time::Instant::now() < deadline {
                if !self.jobs.active.lock().await.contains_key(&id) {
                    break;
                }
                tokio::time::sleep(std::time::Duration::from_millis(50)).await;
            }
        }

        self.store.remove(id, clean_files).await;
        Ok(())
    }
}
