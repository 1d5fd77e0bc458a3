//! Persisted diff-job table.

use super::job::{DiffJobKey, SnapshotDiffJob};
use crate::error::Result;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{BufReader, BufWriter, Write as IoWrite};
use std::path::{Path, PathBuf};

/// Storage for diff jobs, keyed by job key.
///
/// Read in full by a node assuming leadership to decide which jobs to resume.
pub trait DiffJobStore: Send + Sync {
    /// Load one job.
    fn load(&self, key: &DiffJobKey) -> Result<Option<SnapshotDiffJob>>;

    /// Insert or replace a job.
    fn save(&self, job: &SnapshotDiffJob) -> Result<()>;

    /// Remove a job. Missing keys are ignored.
    fn remove(&self, key: &DiffJobKey) -> Result<()>;

    /// Every stored job.
    fn load_all(&self) -> Result<Vec<SnapshotDiffJob>>;
}

/// Volatile store for tests and single-process use.
#[derive(Debug, Default)]
pub struct MemoryDiffJobStore {
    jobs: Mutex<HashMap<DiffJobKey, SnapshotDiffJob>>,
}

impl MemoryDiffJobStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

impl DiffJobStore for MemoryDiffJobStore {
    fn load(&self, key: &DiffJobKey) -> Result<Option<SnapshotDiffJob>> {
        Ok(self.jobs.lock().get(key).cloned())
    }

    fn save(&self, job: &SnapshotDiffJob) -> Result<()> {
        self.jobs.lock().insert(job.key.clone(), job.clone());
        Ok(())
    }

    fn remove(&self, key: &DiffJobKey) -> Result<()> {
        self.jobs.lock().remove(key);
        Ok(())
    }

    fn load_all(&self) -> Result<Vec<SnapshotDiffJob>> {
        Ok(self.jobs.lock().values().cloned().collect())
    }
}

/// JSON file store.
///
/// The whole table is rewritten on every change through a temp file, fsync
/// and rename, so a crash leaves either the old or the new table.
#[derive(Debug)]
pub struct FileDiffJobStore {
    path: PathBuf,
    jobs: Mutex<HashMap<DiffJobKey, SnapshotDiffJob>>,
}

impl FileDiffJobStore {
    /// Open (or create) the store at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let mut jobs = HashMap::new();
        if path.exists() {
            let reader = BufReader::new(File::open(&path)?);
            let stored: Vec<SnapshotDiffJob> = serde_json::from_reader(reader)?;
            for job in stored {
                jobs.insert(job.key.clone(), job);
            }
        }
        tracing::debug!(path = %path.display(), jobs = jobs.len(), "Opened diff job table");

        Ok(Self {
            path,
            jobs: Mutex::new(jobs),
        })
    }

    fn flush(&self, jobs: &HashMap<DiffJobKey, SnapshotDiffJob>) -> Result<()> {
        let mut rows: Vec<&SnapshotDiffJob> = jobs.values().collect();
        rows.sort_by(|a, b| a.key.cmp(&b.key));

        let temp_path = self.path.with_extension("json.tmp");
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&temp_path)?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer(&mut writer, &rows)?;
        writer.flush()?;
        writer.get_ref().sync_all()?;

        fs::rename(&temp_path, &self.path)?;
        Ok(())
    }
}

impl DiffJobStore for FileDiffJobStore {
    fn load(&self, key: &DiffJobKey) -> Result<Option<SnapshotDiffJob>> {
        Ok(self.jobs.lock().get(key).cloned())
    }

    fn save(&self, job: &SnapshotDiffJob) -> Result<()> {
        let mut jobs = self.jobs.lock();
        jobs.insert(job.key.clone(), job.clone());
        self.flush(&jobs).inspect_err(|e| {
            tracing::error!(key = %job.key, error = %e, "Failed to persist diff job");
        })
    }

    fn remove(&self, key: &DiffJobKey) -> Result<()> {
        let mut jobs = self.jobs.lock();
        if jobs.remove(key).is_some() {
            self.flush(&jobs)?;
        }
        Ok(())
    }

    fn load_all(&self) -> Result<Vec<SnapshotDiffJob>> {
        Ok(self.jobs.lock().values().cloned().collect())
    }
}
