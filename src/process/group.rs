//! Platform process-group abstraction
//!
//! On platforms with a native grouping primitive, children are placed in
//! their own OS-level group at spawn so the OS can cascade termination to
//! grandchildren even if userspace cleanup is bypassed. Elsewhere a no-op
//! implementation degrades gracefully and cleanup relies on the
//! registry + orphan sweep alone.

use std::sync::Arc;
use tokio::process::Command;

/// Trait for OS-level process grouping
///
/// Implementations configure a command so the spawned child roots its own
/// group, and deliver signals to the whole group at once.
pub trait ProcessGroup: Send + Sync {
    /// Configure a command so its child becomes a group leader
    fn configure(&self, command: &mut Command);

    /// Signal the whole group rooted at `pid`
    ///
    /// With `force`, the non-catchable kill signal is used instead of the
    /// polite termination request. Returns true if a signal was delivered
    /// to at least the group leader.
    fn signal_group(&self, pid: u32, force: bool) -> bool;

    /// Human-readable name for logging
    fn name(&self) -> &'static str;
}

/// Unix implementation backed by setpgid/killpg
///
/// The child is made leader of a fresh process group at spawn; group
/// signals then reach every descendant that did not detach itself.
#[cfg(unix)]
pub struct UnixProcessGroup;

#[cfg(unix)]
impl ProcessGroup for UnixProcessGroup {
    fn configure(&self, command: &mut Command) {
        // pgid 0: the child becomes leader of a group with its own pid
        command.process_group(0);
    }

    fn signal_group(&self, pid: u32, force: bool) -> bool {
        let sig = if force { libc::SIGKILL } else { libc::SIGTERM };
        // SAFETY: killpg with a validated signal constant; the call only
        // delivers a signal and touches no memory.
        let rc = unsafe { libc::killpg(pid as libc::pid_t, sig) };
        if rc != 0 {
            tracing::debug!(pid, force, "killpg failed: {}", std::io::Error::last_os_error());
        }
        rc == 0
    }

    fn name(&self) -> &'static str {
        "unix-pgroup"
    }
}

/// No-op implementation for platforms without a grouping primitive
///
/// Grandchild processes are then only caught by the registry and the
/// name + parent-pid orphan sweep.
pub struct NoopProcessGroup;

impl ProcessGroup for NoopProcessGroup {
    fn configure(&self, _command: &mut Command) {}

    fn signal_group(&self, _pid: u32, _force: bool) -> bool {
        false
    }

    fn name(&self) -> &'static str {
        "noop"
    }
}

/// The strongest process-group implementation available on this platform
pub fn platform_process_group() -> Arc<dyn ProcessGroup> {
    #[cfg(unix)]
    {
        Arc::new(UnixProcessGroup)
    }
    #[cfg(not(unix))]
    {
        Arc::new(NoopProcessGroup)
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn noop_group_reports_nothing_delivered() {
        let group = NoopProcessGroup;
        assert!(!group.signal_group(1, false));
        assert!(!group.signal_group(1, true));
        assert_eq!(group.name(), "noop");
    }

    #[cfg(unix)]
    #[test]
    fn unix_group_signal_to_dead_group_is_false() {
        use std::os::unix::process::CommandExt;

        let group = UnixProcessGroup;
        // Spawn a short-lived group leader and let it exit
        let mut child = std::process::Command::new("true")
            .process_group(0)
            .spawn()
            .unwrap();
        let pid = child.id();
        child.wait().unwrap();

        assert!(
            !group.signal_group(pid, false),
            "signalling a reaped group should fail"
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn unix_group_terminates_leader_and_descendants() {
        let group = UnixProcessGroup;

        // sh spawns a grandchild sleep; killing the group must reach both
        let mut command = Command::new("sh");
        command.arg("-c").arg("sleep 300 & wait");
        group.configure(&mut command);
        let mut child = command.spawn().unwrap();
        let pid = child.id().unwrap();

        // Give the shell a moment to fork the sleep
        tokio::time::sleep(std::time::Duration::from_millis(200)).await;

        assert!(group.signal_group(pid, false));
        let status = tokio::time::timeout(std::time::Duration::from_secs(5), child.wait())
            .await
            .expect("group leader should die promptly")
            .unwrap();
        assert!(!status.success());
    }

    #[cfg(unix)]
    #[test]
    fn platform_group_is_unix_on_unix() {
        assert_eq!(platform_process_group().name(), "unix-pgroup");
    }
}
