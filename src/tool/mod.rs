//! External fetch tool adapter
//!
//! Treats the tool as a black box: build an argument list, spawn the
//! process, stream its textual progress, collect the exit code. Every
//! spawned pid is registered with the process manager and placed in the
//! platform process group; cancellation is checked continuously while the
//! child runs and honored by terminating it (gracefully, then forcefully).

mod progress;

pub use progress::{ParsedLine, Progress, parse_line, progress_args};

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

use crate::config::ToolConfig;
use crate::error::{Error, JobError, ProcessError, Result};
use crate::process::ProcessManager;
use crate::strategy::Strategy;
use crate::types::{FetchOptions, JobId};

/// Number of trailing output lines kept for error context
const OUTPUT_TAIL_LINES: usize = 120;

/// Result of one completed tool invocation
#[derive(Clone, Debug)]
pub struct ToolOutcome {
    /// The primary output path, when one was observed
    pub output_path: Option<PathBuf>,
    /// Every path the tool touched (fragments, intermediates, finals)
    pub dest_paths: Vec<PathBuf>,
    /// The tool's exit code
    pub exit_code: i32,
}

/// Spawns and supervises the external fetch tool
pub struct ToolAdapter {
    binary: PathBuf,
    processes: Arc<ProcessManager>,
    cancel_poll: Duration,
}

impl ToolAdapter {
    /// Resolve the tool binary from configuration
    ///
    /// Uses the explicit path when configured, otherwise searches PATH
    /// via the `which` crate.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ToolMissing`] when no binary can be located —
    /// a fatal resource error, not a retryable one.
    pub fn from_config(config: &ToolConfig, processes: Arc<ProcessManager>) -> Result<Self> {
        let binary = if let Some(ref path) = config.tool_path {
            path.clone()
        } else if config.search_path {
            which::which(&config.tool_name)
                .map_err(|_| Error::ToolMissing(config.tool_name.clone()))?
        } else {
            return Err(Error::ToolMissing(config.tool_name.clone()));
        };

        Ok(Self {
            binary,
            processes,
            cancel_poll: Duration::from_millis(config.cancel_poll_ms.max(10)),
        })
    }

    /// Create an adapter with an explicit binary path (used by tests)
    pub fn new(binary: PathBuf, processes: Arc<ProcessManager>) -> Self {
        Self {
            binary,
            processes,
            cancel_poll: Duration::from_millis(50),
        }
    }

    /// The resolved tool binary
    pub fn binary(&self) -> &Path {
        &self.binary
    }

    /// Build the full argument list for one attempt
    pub fn build_args(
        &self,
        url: &str,
        options: &FetchOptions,
        strategy: &Strategy,
        download_dir: &Path,
        output_template: &str,
    ) -> Vec<String> {
        let mut args = vec![
            "--ignore-config".to_string(),
            "--no-warnings".to_string(),
            "--no-color".to_string(),
            "-q".to_string(),
        ];
        args.extend(progress_args());

        args.push("-P".to_string());
        args.push(download_dir.display().to_string());
        args.push("-o".to_string());
        args.push(
            options
                .output_template
                .clone()
                .unwrap_or_else(|| output_template.to_string()),
        );

        if let Some(ref format) = options.format {
            args.push("-f".to_string());
            args.push(format.clone());
        }
        if let Some(ref proxy) = options.proxy {
            args.push("--proxy".to_string());
            args.push(proxy.clone());
        }
        if let Some(ref limit) = options.rate_limit {
            args.push("--limit-rate".to_string());
            args.push(limit.clone());
        }
        if options.continue_partial {
            args.push("--continue".to_string());
        } else {
            args.push("--no-continue".to_string());
        }
        if let Some(ref cookie_file) = options.cookie_file {
            args.push("--cookies".to_string());
            args.push(cookie_file.display().to_string());
        }

        strategy.apply_args(&mut args);

        args.push(url.to_string());
        args
    }

    /// Execute one tool invocation, streaming progress until exit
    ///
    /// Cancellation is observed while the child runs; on cancel the child
    /// is terminated (graceful, then forced) and
    /// [`JobError::Cancelled`] is returned.
    ///
    /// A non-zero exit with a valid non-empty output file is tolerated as
    /// success — the tool sometimes fails only on temp-file cleanup after
    /// the payload is fully written.
    pub async fn run(
        &self,
        id: JobId,
        args: Vec<String>,
        cancel: &CancellationToken,
        mut on_progress: impl FnMut(&Progress),
        mut on_status: impl FnMut(&str),
        mut on_path: impl FnMut(&Path),
    ) -> Result<ToolOutcome> {
        tracing::debug!(job_id = id.0, binary = %self.binary.display(), "spawning fetch tool");

        let mut command = Command::new(&self.binary);
        command
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        self.processes.process_group().configure(&mut command);

        let mut child = command.spawn().map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                Error::ToolMissing(self.binary.display().to_string())
            } else {
                Error::Process(ProcessError::SpawnFailed {
                    program: self.binary.clone(),
                    reason: e.to_string(),
                })
            }
        })?;

        let pid = child.id().ok_or_else(|| {
            Error::Process(ProcessError::SpawnFailed {
                program: self.binary.clone(),
                reason: "child exited before pid was available".to_string(),
            })
        })?;
        self.processes.register(pid, &self.binary.display().to_string());

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let mut out_lines = stdout.map(|s| BufReader::new(s).lines());
        let mut err_lines = stderr.map(|s| BufReader::new(s).lines());

        let mut tail: VecDeque<String> = VecDeque::with_capacity(OUTPUT_TAIL_LINES);
        let mut output_path: Option<PathBuf> = None;
        let mut dest_paths: Vec<PathBuf> = Vec::new();
        let mut poll = tokio::time::interval(self.cancel_poll);
        poll.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        let mut out_done = out_lines.is_none();
        let mut err_done = err_lines.is_none();

        while !(out_done && err_done) {
            let next_out = async {
                match out_lines.as_mut() {
                    Some(lines) => lines.next_line().await,
                    None => Ok(None),
                }
            };
            let next_err = async {
                match err_lines.as_mut() {
                    Some(lines) => lines.next_line().await,
                    None => Ok(None),
                }
            };

            tokio::select! {
                _ = cancel.cancelled() => {
                    self.terminate(&mut child, pid).await;
                    return Err(Error::Job(JobError::Cancelled));
                }
                _ = poll.tick() => {
                    if cancel.is_cancelled() {
                        self.terminate(&mut child, pid).await;
                        return Err(Error::Job(JobError::Cancelled));
                    }
                }
                line = next_out, if !out_done => {
                    match line {
                        Ok(Some(line)) => self.handle_line(
                            &line, &mut tail, &mut output_path, &mut dest_paths,
                            &mut on_progress, &mut on_status, &mut on_path,
                        ),
                        Ok(None) => out_done = true,
                        Err(e) => {
                            tracing::debug!(job_id = id.0, error = %e, "stdout read error");
                            out_done = true;
                        }
                    }
                }
                line = next_err, if !err_done => {
                    match line {
                        Ok(Some(line)) => self.handle_line(
                            &line, &mut tail, &mut output_path, &mut dest_paths,
                            &mut on_progress, &mut on_status, &mut on_path,
                        ),
                        Ok(None) => err_done = true,
                        Err(e) => {
                            tracing::debug!(job_id = id.0, error = %e, "stderr read error");
                            err_done = true;
                        }
                    }
                }
            }
        }

        let status = child.wait().await;
        self.processes.unregister(pid);

        // Cancellation may have landed after the last output line
        if cancel.is_cancelled() {
            return Err(Error::Job(JobError::Cancelled));
        }

        let status = status?;
        let exit_code = status.code().unwrap_or(-1);

        if !status.success() {
            let valid_output = output_path
                .as_deref()
                .and_then(|p| std::fs::metadata(p).ok())
                .is_some_and(|m| m.len() > 0);
            if valid_output {
                tracing::warn!(
                    job_id = id.0,
                    exit_code,
                    "tool exited non-zero but output is valid, ignoring"
                );
            } else {
                let context: Vec<String> = tail.into_iter().collect();
                return Err(Error::Tool(format!(
                    "exit code {exit_code}:\n{}",
                    context.join("\n")
                )));
            }
        }

        Ok(ToolOutcome {
            output_path,
            dest_paths,
            exit_code,
        })
    }

    #[allow(clippy::too_many_arguments)]
    fn handle_line(
        &self,
        line: &str,
        tail: &mut VecDeque<String>,
        output_path: &mut Option<PathBuf>,
        dest_paths: &mut Vec<PathBuf>,
        on_progress: &mut impl FnMut(&Progress),
        on_status: &mut impl FnMut(&str),
        on_path: &mut impl FnMut(&Path),
    ) {
        if tail.len() == OUTPUT_TAIL_LINES {
            tail.pop_front();
        }
        tail.push_back(line.to_string());

        match parse_line(line) {
            ParsedLine::Progress(progress) => {
                if let Some(ref filename) = progress.filename {
                    if !dest_paths.contains(filename) {
                        dest_paths.push(filename.clone());
                        on_path(filename);
                    }
                    if output_path.is_none() {
                        *output_path = Some(filename.clone());
                    }
                }
                on_progress(&progress);
            }
            ParsedLine::Destination(path) => {
                if !dest_paths.contains(&path) {
                    dest_paths.push(path.clone());
                    on_path(&path);
                }
                if output_path.is_none() {
                    *output_path = Some(path);
                }
            }
            ParsedLine::Merge(path) => {
                // The merged file supersedes any intermediate as the output
                if !dest_paths.contains(&path) {
                    dest_paths.push(path.clone());
                }
                on_path(&path);
                *output_path = Some(path);
            }
            ParsedLine::Info(message) => {
                if !message.is_empty() {
                    on_status(&message);
                }
            }
        }
    }

    /// Terminate the running child after a cancellation
    async fn terminate(&self, child: &mut tokio::process::Child, pid: u32) {
        tracing::info!(pid, "terminating fetch tool after cancellation");
        self.processes.kill_by_pid(pid).await;
        // Reap so the pid does not linger as a zombie
        if let Err(e) = child.wait().await {
            tracing::warn!(pid, error = %e, "failed to reap cancelled child");
        }
        self.processes.unregister(pid);
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::strategy::STABLE;
    use tempfile::TempDir;

    fn manager() -> Arc<ProcessManager> {
        Arc::new(ProcessManager::new(
            Duration::from_secs(2),
            vec!["no-such-tool".to_string()],
        ))
    }

    #[cfg(unix)]
    fn write_script(dir: &TempDir, name: &str, body: &str) -> PathBuf {
        use std::os::unix::fs::PermissionsExt;
        let path = dir.path().join(name);
        std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    fn collecting_run(
        adapter: &ToolAdapter,
        args: Vec<String>,
    ) -> impl std::future::Future<Output = (Result<ToolOutcome>, Vec<Progress>, Vec<PathBuf>)> + '_
    {
        async move {
            let cancel = CancellationToken::new();
            let mut progresses = Vec::new();
            let mut paths = Vec::new();
            let result = adapter
                .run(
                    JobId::new(1),
                    args,
                    &cancel,
                    |p| progresses.push(p.clone()),
                    |_status| {},
                    |p| paths.push(p.to_path_buf()),
                )
                .await;
            (result, progresses, paths)
        }
    }

    #[test]
    fn build_args_places_url_last_and_applies_options() {
        let dir = TempDir::new().unwrap();
        let adapter = ToolAdapter::new(PathBuf::from("/bin/true"), manager());
        let options = FetchOptions {
            format: Some("bv*+ba".into()),
            proxy: Some("socks5://127.0.0.1:1080".into()),
            cookie_file: Some(dir.path().join("cookies.txt")),
            ..FetchOptions::default()
        };

        let args = adapter.build_args(
            "https://example.com/watch?v=abc",
            &options,
            &STABLE,
            dir.path(),
            "%(title)s.%(ext)s",
        );

        assert_eq!(args.last().unwrap(), "https://example.com/watch?v=abc");
        let joined = args.join(" ");
        assert!(joined.contains("-f bv*+ba"));
        assert!(joined.contains("--proxy socks5://127.0.0.1:1080"));
        assert!(joined.contains("--cookies"));
        assert!(joined.contains("--continue"));
        assert!(joined.contains("--force-ipv4"), "stable strategy args applied");
    }

    #[test]
    fn from_config_errors_when_search_disabled_and_no_path() {
        let config = ToolConfig {
            tool_path: None,
            search_path: false,
            ..ToolConfig::default()
        };
        let result = ToolAdapter::from_config(&config, manager());
        assert!(matches!(result, Err(Error::ToolMissing(_))));
    }

    #[tokio::test]
    async fn run_with_missing_binary_is_tool_missing() {
        let adapter = ToolAdapter::new(PathBuf::from("/nonexistent/fetch-tool"), manager());
        let (result, _, _) = collecting_run(&adapter, vec![]).await;
        assert!(matches!(result, Err(Error::ToolMissing(_))));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn run_parses_progress_and_paths_from_output() {
        let dir = TempDir::new().unwrap();
        let script = write_script(
            &dir,
            "fake-tool",
            r#"echo '[download] Destination: /tmp/video.f137.mp4'
printf '%s\n' 'MEDIADL|progress|512|1024|100.0|5|/tmp/video.f137.mp4'
printf '%s\n' 'MEDIADL|progress|1024|1024|100.0|0|/tmp/video.f137.mp4'
echo '[Merger] Merging formats into "/tmp/video.mkv"'"#,
        );
        let adapter = ToolAdapter::new(script, manager());

        let (result, progresses, paths) = collecting_run(&adapter, vec![]).await;
        let outcome = result.unwrap();

        assert_eq!(outcome.exit_code, 0);
        assert_eq!(outcome.output_path, Some(PathBuf::from("/tmp/video.mkv")));
        assert_eq!(progresses.len(), 2);
        assert_eq!(progresses[1].downloaded_bytes, 1024);
        assert!(paths.contains(&PathBuf::from("/tmp/video.f137.mp4")));
        assert!(paths.contains(&PathBuf::from("/tmp/video.mkv")));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn run_surfaces_failure_output_in_error() {
        let dir = TempDir::new().unwrap();
        let script = write_script(
            &dir,
            "fake-tool",
            "echo 'ERROR: unable to download: HTTP Error 500'\nexit 1",
        );
        let adapter = ToolAdapter::new(script, manager());

        let (result, _, _) = collecting_run(&adapter, vec![]).await;
        match result {
            Err(Error::Tool(msg)) => {
                assert!(msg.contains("exit code 1"));
                assert!(msg.contains("HTTP Error 500"));
            }
            other => panic!("expected Tool error, got {other:?}"),
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn nonzero_exit_with_valid_output_is_tolerated() {
        let dir = TempDir::new().unwrap();
        let output = dir.path().join("video.mkv");
        std::fs::write(&output, "payload").unwrap();
        let script = write_script(
            &dir,
            "fake-tool",
            &format!(
                "echo '[download] Destination: {}'\necho 'ERROR: unable to delete temp file'\nexit 1",
                output.display()
            ),
        );
        let adapter = ToolAdapter::new(script, manager());

        let (result, _, _) = collecting_run(&adapter, vec![]).await;
        let outcome = result.unwrap();
        assert_eq!(outcome.exit_code, 1);
        assert_eq!(outcome.output_path, Some(output));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn cancellation_terminates_the_child_promptly() {
        let dir = TempDir::new().unwrap();
        let script = write_script(&dir, "fake-tool", "echo started\nsleep 300");
        let adapter = ToolAdapter::new(script, manager());

        let cancel = CancellationToken::new();
        let cancel_trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(200)).await;
            cancel_trigger.cancel();
        });

        let start = std::time::Instant::now();
        let result = adapter
            .run(JobId::new(1), vec![], &cancel, |_| {}, |_| {}, |_| {})
            .await;

        assert!(
            matches!(result, Err(Error::Job(JobError::Cancelled))),
            "cancellation must surface as Cancelled, got {result:?}"
        );
        assert!(
            start.elapsed() < Duration::from_secs(10),
            "child must be torn down promptly, took {:?}",
            start.elapsed()
        );
    }
}
