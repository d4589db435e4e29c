//! Child process lifecycle management
//!
//! Every pid spawned anywhere in the system is registered here so that no
//! child outlives its job or the application. Shutdown runs registered
//! pre-cleanup callbacks, terminates every registered pid (graceful with
//! a bounded wait, then forceful), and finishes with an orphan sweep that
//! matches known tool executable names against processes whose parent is
//! the current process — catching grandchildren the tool spawned itself.
//!
//! Everything here is best-effort by contract: failures are logged and
//! counted, never raised past the caller.

mod group;

pub use group::{NoopProcessGroup, ProcessGroup, platform_process_group};
#[cfg(unix)]
pub use group::UnixProcessGroup;

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// A tracked child process, as reported by diagnostics
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProcessRecord {
    /// OS process id
    pub pid: u32,
    /// Display name recorded at registration
    pub name: String,
    /// Observed status ("running", "zombie", "unknown")
    pub status: String,
}

type CleanupCallback = Box<dyn Fn() + Send + Sync>;

/// Registry and terminator for spawned child processes
///
/// The registry is in-memory only and rebuilt fresh each process start;
/// orphans from a prior crash are found by the name + parent-pid sweep,
/// not by persisted state.
pub struct ProcessManager {
    registry: Mutex<HashMap<u32, String>>,
    callbacks: Mutex<Vec<CleanupCallback>>,
    group: Arc<dyn ProcessGroup>,
    kill_grace: Duration,
    sweep_names: Vec<String>,
}

impl ProcessManager {
    /// Create a manager using the platform's strongest process grouping
    pub fn new(kill_grace: Duration, sweep_names: Vec<String>) -> Self {
        Self {
            registry: Mutex::new(HashMap::new()),
            callbacks: Mutex::new(Vec::new()),
            group: platform_process_group(),
            kill_grace,
            sweep_names,
        }
    }

    /// The process-group implementation children should be spawned under
    pub fn process_group(&self) -> Arc<dyn ProcessGroup> {
        Arc::clone(&self.group)
    }

    /// Register a spawned child pid
    pub fn register(&self, pid: u32, name: &str) {
        self.lock_registry().insert(pid, name.to_string());
        tracing::debug!(pid, name, "registered child process");
    }

    /// Unregister a pid after the child is confirmed dead
    pub fn unregister(&self, pid: u32) {
        self.lock_registry().remove(&pid);
        tracing::debug!(pid, "unregistered child process");
    }

    /// Number of currently registered pids
    pub fn registered_count(&self) -> usize {
        self.lock_registry().len()
    }

    /// Register a callback to run before shutdown cleanup
    pub fn on_cleanup(&self, callback: impl Fn() + Send + Sync + 'static) {
        match self.callbacks.lock() {
            Ok(mut guard) => guard.push(Box::new(callback)),
            Err(poisoned) => poisoned.into_inner().push(Box::new(callback)),
        }
    }

    /// Terminate every registered child, then sweep for orphans
    ///
    /// Returns the number of processes confirmed terminated. Never fails:
    /// individual kill errors are logged and skipped so the shutdown
    /// sequence always completes.
    pub async fn kill_all(&self) -> usize {
        let callbacks = match self.callbacks.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        for callback in callbacks.iter() {
            callback();
        }
        drop(callbacks);

        let pids: Vec<u32> = self.lock_registry().keys().copied().collect();
        let mut killed = 0;
        for pid in pids {
            if self.kill_by_pid(pid).await {
                killed += 1;
            }
        }

        killed += self.sweep_orphans().await;

        if killed > 0 {
            tracing::info!(killed, "terminated child processes");
        }
        killed
    }

    /// Terminate one pid: graceful signal, bounded wait, then force-kill
    ///
    /// Idempotent — returns false (and never panics) for pids that are
    /// already dead or were never registered with the OS.
    pub async fn kill_by_pid(&self, pid: u32) -> bool {
        if !process_alive(pid) {
            self.lock_registry().remove(&pid);
            return false;
        }

        // Prefer the group signal so grandchildren die with the leader;
        // fall back to a direct signal when the pid leads no group.
        if !self.group.signal_group(pid, false) && !signal_process(pid, false) {
            tracing::warn!(pid, "could not deliver termination signal");
            self.lock_registry().remove(&pid);
            return false;
        }

        if self.wait_for_death(pid, self.kill_grace).await {
            self.lock_registry().remove(&pid);
            return true;
        }

        tracing::warn!(pid, grace = ?self.kill_grace, "graceful termination timed out, force-killing");
        self.group.signal_group(pid, true);
        signal_process(pid, true);

        let died = self.wait_for_death(pid, Duration::from_secs(1)).await;
        if !died {
            tracing::error!(pid, "process survived force-kill");
        }
        self.lock_registry().remove(&pid);
        died
    }

    /// Snapshot of registered children that are still alive
    ///
    /// Dead entries encountered along the way are pruned from the
    /// registry.
    pub fn list_active(&self) -> Vec<ProcessRecord> {
        let mut registry = self.lock_registry();
        let mut records = Vec::new();
        registry.retain(|&pid, name| {
            match process_status(pid) {
                Some(status) => {
                    records.push(ProcessRecord {
                        pid,
                        name: name.clone(),
                        status,
                    });
                    true
                }
                None => false,
            }
        });
        records
    }

    /// Kill same-named orphans whose parent is this process
    ///
    /// Secondary pass for children that were spawned but never registered
    /// (e.g., a helper the tool launched itself). Matches a fixed set of
    /// known executable names AND requires the parent pid to equal the
    /// current process, so unrelated processes are never touched.
    async fn sweep_orphans(&self) -> usize {
        #[cfg(target_os = "linux")]
        {
            let my_pid = std::process::id();
            let mut killed = 0;

            let entries = match std::fs::read_dir("/proc") {
                Ok(entries) => entries,
                Err(e) => {
                    tracing::warn!(error = %e, "orphan sweep could not read /proc");
                    return 0;
                }
            };

            for entry in entries.flatten() {
                let Some(pid) = entry
                    .file_name()
                    .to_str()
                    .and_then(|s| s.parse::<u32>().ok())
                else {
                    continue;
                };
                let Some((comm, _state, ppid)) = proc_stat(pid) else {
                    continue;
                };
                if ppid != my_pid {
                    continue;
                }
                // /proc comm is truncated to 15 chars; match by prefix
                let matches_name = self
                    .sweep_names
                    .iter()
                    .any(|name| name.eq_ignore_ascii_case(&comm) || name.to_lowercase().starts_with(&comm.to_lowercase()));
                if !matches_name {
                    continue;
                }

                tracing::info!(pid, name = %comm, "orphan sweep terminating unregistered child");
                if self.kill_by_pid(pid).await {
                    killed += 1;
                }
            }
            killed
        }
        #[cfg(not(target_os = "linux"))]
        {
            // No portable process enumeration here; the registry and the
            // OS process group carry the guarantee on these platforms.
            0
        }
    }

    /// Poll until the pid is gone (or a zombie) or the timeout elapses
    async fn wait_for_death(&self, pid: u32, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        while tokio::time::Instant::now() < deadline {
            if !process_alive(pid) {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        !process_alive(pid)
    }

    fn lock_registry(&self) -> std::sync::MutexGuard<'_, HashMap<u32, String>> {
        match self.registry.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

/// Deliver a signal to a single process; true if it was delivered
fn signal_process(pid: u32, force: bool) -> bool {
    #[cfg(unix)]
    {
        let sig = if force { libc::SIGKILL } else { libc::SIGTERM };
        // SAFETY: kill(2) with a validated signal constant; only delivers
        // a signal.
        unsafe { libc::kill(pid as libc::pid_t, sig) == 0 }
    }
    #[cfg(not(unix))]
    {
        let _ = (pid, force);
        false
    }
}

/// Whether the pid names a live (non-zombie) process
fn process_alive(pid: u32) -> bool {
    match process_status(pid) {
        Some(status) => status != "zombie",
        None => false,
    }
}

/// Observed status of a pid, or None when it does not exist
fn process_status(pid: u32) -> Option<String> {
    #[cfg(target_os = "linux")]
    {
        let (_comm, state, _ppid) = proc_stat(pid)?;
        Some(match state {
            'Z' => "zombie".to_string(),
            'S' | 'R' | 'D' | 'I' => "running".to_string(),
            'T' => "stopped".to_string(),
            other => other.to_string(),
        })
    }
    #[cfg(all(unix, not(target_os = "linux")))]
    {
        // SAFETY: signal 0 performs only an existence/permission check.
        let exists = unsafe { libc::kill(pid as libc::pid_t, 0) == 0 };
        exists.then(|| "running".to_string())
    }
    #[cfg(not(unix))]
    {
        let _ = pid;
        None
    }
}

/// Parse `/proc/<pid>/stat` into (comm, state, ppid)
#[cfg(target_os = "linux")]
fn proc_stat(pid: u32) -> Option<(String, char, u32)> {
    let contents = std::fs::read_to_string(format!("/proc/{pid}/stat")).ok()?;
    // Format: pid (comm) state ppid ... — comm may contain spaces and
    // parentheses, so split around the last ')'
    let open = contents.find('(')?;
    let close = contents.rfind(')')?;
    let comm = contents.get(open + 1..close)?.to_string();
    let mut rest = contents.get(close + 1..)?.split_whitespace();
    let state = rest.next()?.chars().next()?;
    let ppid = rest.next()?.parse().ok()?;
    Some((comm, state, ppid))
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    // Sweep names that match nothing: tests in this binary run in
    // parallel and all spawn `sleep`, so a sweeping manager here would
    // kill children belonging to other tests.
    fn manager() -> ProcessManager {
        ProcessManager::new(Duration::from_secs(3), vec!["no-such-tool".to_string()])
    }

    #[cfg(unix)]
    fn spawn_sleeper() -> std::process::Child {
        std::process::Command::new("sleep")
            .arg("300")
            .spawn()
            .expect("sleep should spawn")
    }

    #[test]
    fn register_unregister_updates_count() {
        let mgr = manager();
        mgr.register(1234, "fake-tool");
        mgr.register(5678, "fake-tool");
        assert_eq!(mgr.registered_count(), 2);
        mgr.unregister(1234);
        assert_eq!(mgr.registered_count(), 1);
        // Unregistering an unknown pid is a no-op
        mgr.unregister(99);
        assert_eq!(mgr.registered_count(), 1);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn kill_by_pid_terminates_registered_child() {
        let mgr = manager();
        let mut child = spawn_sleeper();
        let pid = child.id();
        mgr.register(pid, "sleep");

        assert!(mgr.kill_by_pid(pid).await, "live child should be killed");
        assert_eq!(mgr.registered_count(), 0);

        child.wait().unwrap();
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn kill_by_pid_twice_on_dead_pid_is_false_and_never_panics() {
        let mgr = manager();
        let mut child = spawn_sleeper();
        let pid = child.id();
        child.kill().unwrap();
        child.wait().unwrap();

        assert!(!mgr.kill_by_pid(pid).await);
        assert!(!mgr.kill_by_pid(pid).await);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn kill_all_terminates_every_registered_child() {
        let mgr = manager();
        let mut children: Vec<_> = (0..3).map(|_| spawn_sleeper()).collect();
        for child in &children {
            mgr.register(child.id(), "sleep");
        }

        let killed = mgr.kill_all().await;
        assert!(killed >= 3, "expected at least 3 kills, got {killed}");
        assert_eq!(mgr.registered_count(), 0);

        for child in &mut children {
            child.wait().unwrap();
        }
    }

    #[tokio::test]
    async fn kill_all_runs_cleanup_callbacks_first() {
        let mgr = manager();
        let ran = Arc::new(AtomicBool::new(false));
        let ran_clone = Arc::clone(&ran);
        mgr.on_cleanup(move || {
            ran_clone.store(true, Ordering::SeqCst);
        });

        mgr.kill_all().await;
        assert!(ran.load(Ordering::SeqCst));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn list_active_reports_live_children_and_prunes_dead() {
        let mgr = manager();
        let mut live = spawn_sleeper();
        let mut dead = spawn_sleeper();
        mgr.register(live.id(), "sleep-live");
        mgr.register(dead.id(), "sleep-dead");

        dead.kill().unwrap();
        dead.wait().unwrap();

        let active = mgr.list_active();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].pid, live.id());
        assert_eq!(active[0].name, "sleep-live");
        assert_eq!(mgr.registered_count(), 1);

        live.kill().unwrap();
        live.wait().unwrap();
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    #[ignore] // Sweeps every `sleep` child of the test process; run alone
    async fn sweep_kills_unregistered_same_named_children() {
        let mgr = ProcessManager::new(Duration::from_secs(3), vec!["sleep".to_string()]);
        // Spawned but deliberately never registered
        let mut orphan = spawn_sleeper();
        let pid = orphan.id();

        let killed = mgr.kill_all().await;
        assert!(killed >= 1, "sweep should have caught the orphan");

        orphan.wait().unwrap();
        assert!(!process_alive(pid));
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn proc_stat_parses_own_entry() {
        let me = std::process::id();
        let (comm, state, _ppid) = proc_stat(me).unwrap();
        assert!(!comm.is_empty());
        assert_ne!(state, 'Z');
    }
}
