//! Shutdown coordination.

use crate::types::Event;

use super::FetchManager;

/// How long shutdown waits for workers to wind down before proceeding
const SHUTDOWN_WAIT: std::time::Duration = std::time::Duration::from_secs(30);

impl FetchManager {
    /// Gracefully shut down the manager
    ///
    /// The shutdown sequence:
    /// 1. Stops accepting new jobs
    /// 2. Signals every active job to pause (so it stays resumable)
    /// 3. Waits for workers to wind down, with a bounded timeout
    /// 4. Flushes the resume store
    /// 5. Terminates any surviving child processes and sweeps orphans
    ///
    /// Every step is best-effort: a failing step is logged and the
    /// sequence continues, so cleanup always runs to the end.
    pub async fn shutdown(&self) {
        tracing::info!("initiating graceful shutdown");

        self.jobs
            .accepting_new
            .store(false, std::sync::atomic::Ordering::SeqCst);

        // Pause rather than cancel: interrupted jobs should be offered
        // for resume on the next start
        {
            let active = self.jobs.active.lock().await;
            tracing::debug!(active = active.len(), "signaling pause to active jobs");
            for (id, control) in active.iter() {
                tracing::debug!(job_id = id.0, "requesting pause for shutdown");
                control.request_pause();
            }
        }

        match tokio::time::timeout(SHUTDOWN_WAIT, self.wait_for_workers()).await {
            Ok(()) => {
                tracing::info!("all workers stopped");
            }
            Err(_) => {
                tracing::warn!("timeout waiting for workers, proceeding with shutdown");
            }
        }

        self.store.flush().await;
        tracing::info!("resume store flushed");

        let killed = self.processes.kill_all().await;
        if killed > 0 {
            tracing::warn!(killed, "terminated processes that outlived their workers");
        }

        self.emit(Event::Shutdown);
        tracing::info!("graceful shutdown complete");
    }

    /// Wait until no workers remain in the active table
    async fn wait_for_workers(&self) {
        loop {
            let active_count = self.jobs.active.lock().await.len();
            if active_count == 0 {
                return;
            }
            tracing::debug!(active_count, "waiting for workers to stop");
            tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        }
    }
}
