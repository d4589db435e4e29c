//! Shared fixtures for integration tests.

#![allow(dead_code)]

use mediadl::{Config, Event, FetchManager};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tempfile::TempDir;

/// Write an executable shell script standing in for the fetch tool
#[cfg(unix)]
pub fn write_fake_tool(dir: &Path, body: &str) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;
    let path = dir.join("fake-tool");
    std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).expect("write fake tool");
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755))
        .expect("chmod fake tool");
    path
}

/// Config sandboxed into a temp directory, pointed at the given tool
pub fn sandbox_config(dir: &TempDir, tool: PathBuf) -> Config {
    let mut config = Config::default();
    config.download.download_dir = dir.path().join("downloads");
    config.persistence.store_path = dir.path().join("state/resume_tasks.json");
    config.persistence.save_interval = Duration::from_secs(0);
    config.credentials.artifact_path = dir.path().join("state/cookies.txt");
    config.tool.tool_path = Some(tool);
    config.retry.base_delay = Duration::from_millis(10);
    config.retry.max_delay = Duration::from_millis(50);
    config.retry.jitter = false;
    config
}

/// Build a manager over a sandbox with the given fake tool body
#[cfg(unix)]
pub async fn sandbox_manager(dir: &TempDir, tool_body: &str) -> FetchManager {
    let tool = write_fake_tool(dir.path(), tool_body);
    FetchManager::new(sandbox_config(dir, tool))
        .await
        .expect("manager should construct")
}

/// Wait for an event matching the predicate, with a generous timeout
pub async fn wait_for_event(
    rx: &mut tokio::sync::broadcast::Receiver<Event>,
    mut predicate: impl FnMut(&Event) -> bool,
) -> Event {
    tokio::time::timeout(Duration::from_secs(20), async {
        loop {
            match rx.recv().await {
                Ok(event) if predicate(&event) => return event,
                Ok(_) => {}
                Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => {}
                Err(e) => panic!("event channel closed: {e}"),
            }
        }
    })
    .await
    .expect("timed out waiting for event")
}
