//! Resumable-task persistence
//!
//! Job state is persisted as a single JSON document so interrupted jobs
//! can be rediscovered and resumed after a restart. The document is
//! rewritten wholesale on each save; saves are debounced to at most one
//! per configured interval, except terminal state transitions which
//! always write immediately. Every write goes to a temp file first and is
//! renamed into place, so a crash can never leave a partial document.
//!
//! Loading is best-effort: a missing or corrupt file yields an empty
//! store rather than failing startup.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use crate::error::Result;
use crate::types::{Job, JobId, Status};

/// Current resume store document version
const STORE_VERSION: u32 = 1;

/// Durable snapshot of a job, sufficient to reconstruct and continue it
///
/// Readers tolerate missing fields (defaults apply) and ignore unknown
/// ones, so documents written by other versions still load.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ResumeRecord {
    /// Job identifier
    #[serde(default)]
    pub id: i64,
    /// Target URL
    #[serde(default)]
    pub url: String,
    /// Display title
    #[serde(default)]
    pub title: String,
    /// Directory the job downloads into
    #[serde(default)]
    pub download_dir: String,
    /// Output filename template
    #[serde(default)]
    pub output_template: String,
    /// Serialized fetch options
    #[serde(default)]
    pub options: BTreeMap<String, String>,
    /// Total size in bytes, when known
    #[serde(default)]
    pub total_bytes: u64,
    /// Bytes downloaded so far
    #[serde(default)]
    pub downloaded_bytes: u64,
    /// Status string (pending/downloading/paused/completed/failed/cancelled)
    #[serde(default)]
    pub status: String,
    /// Last error message, if the job failed
    #[serde(default)]
    pub error_message: String,
    /// Known temporary/partial file paths
    #[serde(default)]
    pub temp_files: Vec<PathBuf>,
    /// Creation time (unix seconds)
    #[serde(default)]
    pub created_at: i64,
    /// Last update time (unix seconds)
    #[serde(default)]
    pub updated_at: i64,
}

impl ResumeRecord {
    /// Returns true if this record represents a job worth resuming
    pub fn is_resumable(&self) -> bool {
        matches!(self.status.as_str(), "pending" | "downloading" | "paused")
    }
}

/// On-disk document shape: `{version, tasks: {id: record}}`
#[derive(Debug, Default, Serialize, Deserialize)]
struct StoreDocument {
    #[serde(default)]
    version: u32,
    #[serde(default)]
    tasks: BTreeMap<String, ResumeRecord>,
}

struct StoreState {
    tasks: BTreeMap<i64, ResumeRecord>,
    last_save: Option<Instant>,
    dirty: bool,
}

/// Debounced, crash-safe store of [`ResumeRecord`]s
///
/// All mutation goes through one async mutex, so writes for any given job
/// are never reordered and the debounce timer cannot race a terminal
/// write.
pub struct ResumeStore {
    path: PathBuf,
    save_interval: Duration,
    state: tokio::sync::Mutex<StoreState>,
}

impl ResumeStore {
    /// Open the store at `path`, loading any existing document
    ///
    /// A missing or corrupt document logs a warning and yields an empty
    /// store — persistence problems must never block startup.
    pub async fn open(path: PathBuf, save_interval: Duration) -> Self {
        let tasks = match tokio::fs::read_to_string(&path).await {
            Ok(contents) => match serde_json::from_str::<StoreDocument>(&contents) {
                Ok(doc) => {
                    let mut tasks = BTreeMap::new();
                    for (key, record) in doc.tasks {
                        match key.parse::<i64>() {
                            Ok(id) => {
                                tasks.insert(id, record);
                            }
                            Err(_) => {
                                tracing::warn!(%key, "skipping resume record with bad id");
                            }
                        }
                    }
                    tracing::info!(count = tasks.len(), path = %path.display(), "loaded resume store");
                    tasks
                }
                Err(e) => {
                    tracing::warn!(error = %e, path = %path.display(), "corrupt resume store, starting empty");
                    BTreeMap::new()
                }
            },
            Err(_) => BTreeMap::new(),
        };

        Self {
            path,
            save_interval,
            state: tokio::sync::Mutex::new(StoreState {
                tasks,
                last_save: None,
                dirty: false,
            }),
        }
    }

    /// Highest job id present in the store (0 when empty)
    ///
    /// Used to seed the id counter so restarts never reuse an id.
    pub async fn max_id(&self) -> i64 {
        let state = self.state.lock().await;
        state.tasks.keys().next_back().copied().unwrap_or(0)
    }

    /// Create a record for a newly submitted job and persist immediately
    pub async fn create(&self, job: &Job, download_dir: &Path, output_template: &str) -> Result<ResumeRecord> {
        let now = chrono::Utc::now().timestamp();
        let record = ResumeRecord {
            id: job.id.get(),
            url: job.url.clone(),
            title: job.title.clone(),
            download_dir: download_dir.display().to_string(),
            output_template: output_template.to_string(),
            options: job.options.to_record_map(),
            total_bytes: 0,
            downloaded_bytes: 0,
            status: Status::Pending.as_record_str().to_string(),
            error_message: String::new(),
            temp_files: Vec::new(),
            created_at: now,
            updated_at: now,
        };

        let mut state = self.state.lock().await;
        state.tasks.insert(job.id.get(), record.clone());
        self.save_locked(&mut state, true).await;
        Ok(record)
    }

    /// Update byte progress for a job (debounced write)
    pub async fn update_progress(&self, id: JobId, downloaded: u64, total: Option<u64>) {
        let mut state = self.state.lock().await;
        let Some(record) = state.tasks.get_mut(&id.get()) else {
            return;
        };
        record.downloaded_bytes = downloaded;
        if let Some(total) = total {
            record.total_bytes = total;
        }
        record.status = Status::Running.as_record_str().to_string();
        record.updated_at = chrono::Utc::now().timestamp();
        self.save_locked(&mut state, false).await;
    }

    /// Record a temporary/partial file observed during execution
    pub async fn add_temp_file(&self, id: JobId, path: &Path) {
        let mut state = self.state.lock().await;
        let Some(record) = state.tasks.get_mut(&id.get()) else {
            return;
        };
        if !record.temp_files.iter().any(|p| p == path) {
            record.temp_files.push(path.to_path_buf());
            record.updated_at = chrono::Utc::now().timestamp();
            state.dirty = true;
        }
    }

    /// Transition a job's record to a new status
    ///
    /// Terminal statuses (and pauses) are flushed immediately; others ride
    /// the debounce.
    pub async fn set_status(&self, id: JobId, status: Status, error: Option<&str>) {
        let force = status.is_terminal() || status == Status::Paused;
        let mut state = self.state.lock().await;
        let Some(record) = state.tasks.get_mut(&id.get()) else {
            return;
        };
        record.status = status.as_record_str().to_string();
        if let Some(error) = error {
            record.error_message = error.to_string();
        }
        record.updated_at = chrono::Utc::now().timestamp();
        self.save_locked(&mut state, force).await;
    }

    /// Fetch a record by id
    pub async fn get(&self, id: JobId) -> Option<ResumeRecord> {
        let state = self.state.lock().await;
        state.tasks.get(&id.get()).cloned()
    }

    /// Records worth offering for resume (pending/downloading/paused)
    pub async fn scan_resumable(&self) -> Vec<ResumeRecord> {
        let state = self.state.lock().await;
        state
            .tasks
            .values()
            .filter(|r| r.is_resumable())
            .cloned()
            .collect()
    }

    /// Remove a record, optionally deleting its files (persists immediately)
    ///
    /// With `clean_files`, every recorded temp file is deleted, and
    /// `*.part` files in the job's download directory whose names contain
    /// the job's title or id are removed as well. The `.part` match is a
    /// filename-substring heuristic — best-effort only, and a known
    /// fragility with colliding names.
    pub async fn remove(&self, id: JobId, clean_files: bool) {
        let mut state = self.state.lock().await;
        let Some(record) = state.tasks.remove(&id.get()) else {
            return;
        };

        if clean_files {
            for path in &record.temp_files {
                match tokio::fs::remove_file(path).await {
                    Ok(()) => {
                        tracing::info!(path = %path.display(), "removed temp file");
                    }
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                    Err(e) => {
                        tracing::warn!(path = %path.display(), error = %e, "failed to remove temp file");
                    }
                }
            }
            remove_stray_partials(Path::new(&record.download_dir), &record.title, record.id).await;
        }

        self.save_locked(&mut state, true).await;
        tracing::info!(job_id = id.0, clean_files, "removed resume record");
    }

    /// Purge completed records older than `max_age`; returns the count removed
    pub async fn cleanup_completed(&self, max_age: Duration) -> usize {
        let cutoff = chrono::Utc::now().timestamp() - max_age.as_secs() as i64;
        let mut state = self.state.lock().await;
        let before = state.tasks.len();
        state
            .tasks
            .retain(|_, r| !(r.status == "completed" && r.updated_at < cutoff));
        let removed = before - state.tasks.len();
        if removed > 0 {
            self.save_locked(&mut state, true).await;
            tracing::info!(removed, "purged old completed records");
        }
        removed
    }

    /// Force any pending changes to disk (used during shutdown)
    pub async fn flush(&self) {
        let mut state = self.state.lock().await;
        if state.dirty {
            self.save_locked(&mut state, true).await;
        }
    }

    /// Write the document if forced or the debounce interval elapsed
    ///
    /// Persistence failures are logged, never propagated: losing a
    /// checkpoint must not fail the job that triggered it.
    async fn save_locked(&self, state: &mut StoreState, force: bool) {
        let due = match state.last_save {
            Some(last) => last.elapsed() >= self.save_interval,
            None => true,
        };
        if !force && !due {
            state.dirty = true;
            return;
        }

        let doc = StoreDocument {
            version: STORE_VERSION,
            tasks: state
                .tasks
                .iter()
                .map(|(id, record)| (id.to_string(), record.clone()))
                .collect(),
        };

        match self.write_document(&doc).await {
            Ok(()) => {
                state.last_save = Some(Instant::now());
                state.dirty = false;
            }
            Err(e) => {
                tracing::error!(error = %e, path = %self.path.display(), "failed to save resume store");
            }
        }
    }

    /// Serialize and atomically replace the store file
    async fn write_document(&self, doc: &StoreDocument) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let json = serde_json::to_string_pretty(doc)?;
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, json.as_bytes()).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}

/// Delete `*.part` files under `dir` whose names contain the title or id
///
/// Heuristic cleanup for partials the tool left behind under names we
/// never observed. Errors are logged and swallowed.
async fn remove_stray_partials(dir: &Path, title: &str, id: i64) {
    let id_str = id.to_string();
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(_) => return,
    };

    while let Ok(Some(entry)) = entries.next_entry().await {
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        if !name.ends_with(".part") {
            continue;
        }
        let matches_job =
            (!title.is_empty() && name.contains(title)) || name.contains(&id_str);
        if !matches_job {
            continue;
        }
        match tokio::fs::remove_file(entry.path()).await {
            Ok(()) => {
                tracing::info!(path = %entry.path().display(), "removed stray partial");
            }
            Err(e) => {
                tracing::warn!(path = %entry.path().display(), error = %e, "failed to remove stray partial");
            }
        }
    }
}
