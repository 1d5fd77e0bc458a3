//! Snapshot diff jobs.

use super::report::DiffEntry;
use crate::types::{ObjectId, SnapshotId};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Diff computation flags. Part of the job key.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DiffOptions {
    /// Compare every object even if a shortcut is available.
    pub force_full_diff: bool,
    /// Do not use storage-native diffing.
    pub disable_native_diff: bool,
}

/// Identity of one diff computation, used for request deduplication.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DiffJobKey {
    /// Volume.
    pub volume: String,
    /// Bucket.
    pub bucket: String,
    /// Older snapshot.
    pub from_snapshot: SnapshotId,
    /// Newer snapshot.
    pub to_snapshot: SnapshotId,
    /// Computation flags.
    pub options: DiffOptions,
}

impl fmt::Display for DiffJobKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "/{}/{}/{}..{}/full={},native={}",
            self.volume,
            self.bucket,
            self.from_snapshot,
            self.to_snapshot,
            self.options.force_full_diff,
            !self.options.disable_native_diff
        )
    }
}

/// Job lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    /// Accepted, waiting for a worker.
    Queued,
    /// A worker is computing.
    InProgress,
    /// Finished; the report is available.
    Done,
    /// Finished with an error.
    Failed,
    /// Stopped on request.
    Cancelled,
    /// Not accepted because the queue is full. Never stored.
    Rejected,
}

impl JobStatus {
    /// Whether a worker still has to run.
    #[must_use]
    pub const fn is_active(&self) -> bool {
        matches!(self, Self::Queued | Self::InProgress)
    }

    /// Whether the job reached an end state.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Failed | Self::Cancelled)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Queued => "QUEUED",
            Self::InProgress => "IN_PROGRESS",
            Self::Done => "DONE",
            Self::Failed => "FAILED",
            Self::Cancelled => "CANCELLED",
            Self::Rejected => "REJECTED",
        };
        f.write_str(s)
    }
}

/// A persisted diff job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotDiffJob {
    /// Job identity.
    pub key: DiffJobKey,
    /// Older snapshot name, for reports.
    pub from_name: String,
    /// Newer snapshot name, for reports.
    pub to_name: String,
    /// Lifecycle status.
    pub status: JobStatus,
    /// Last object id whose comparison is included in `entries`.
    pub cursor: Option<ObjectId>,
    /// Changes found so far.
    pub entries: Vec<DiffEntry>,
    /// Failure reason.
    pub reason: Option<String>,
    /// Creation time in ms.
    pub created_at_ms: u64,
    /// Last update in ms.
    pub updated_at_ms: u64,
}

impl SnapshotDiffJob {
    /// New queued job.
    pub fn new(key: DiffJobKey, from_name: String, to_name: String, now_ms: u64) -> Self {
        Self {
            key,
            from_name,
            to_name,
            status: JobStatus::Queued,
            cursor: None,
            entries: Vec::new(),
            reason: None,
            created_at_ms: now_ms,
            updated_at_ms: now_ms,
        }
    }

    /// Whether some progress was persisted.
    #[must_use]
    pub fn has_progress(&self) -> bool {
        self.cursor.is_some()
    }

    /// Drop progress and start over.
    pub fn restart(&mut self, now_ms: u64) {
        self.cursor = None;
        self.entries.clear();
        self.reason = None;
        self.status = JobStatus::InProgress;
        self.updated_at_ms = now_ms;
    }

    /// Summary without entries.
    pub fn summary(&self) -> DiffJobSummary {
        DiffJobSummary {
            key: self.key.clone(),
            from_name: self.from_name.clone(),
            to_name: self.to_name.clone(),
            status: self.status,
            entries_found: self.entries.len(),
            reason: self.reason.clone(),
            created_at_ms: self.created_at_ms,
        }
    }
}

/// Listing view of a job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffJobSummary {
    /// Job identity.
    pub key: DiffJobKey,
    /// Older snapshot name.
    pub from_name: String,
    /// Newer snapshot name.
    pub to_name: String,
    /// Lifecycle status.
    pub status: JobStatus,
    /// Entries found so far.
    pub entries_found: usize,
    /// Failure reason.
    pub reason: Option<String>,
    /// Creation time in ms.
    pub created_at_ms: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn status_classes() {
        assert!(JobStatus::Queued.is_active());
        assert!(JobStatus::InProgress.is_active());
        assert!(JobStatus::Done.is_terminal());
        assert!(!JobStatus::Rejected.is_active());
        assert!(!JobStatus::Rejected.is_terminal());
        assert_eq!(JobStatus::InProgress.to_string(), "IN_PROGRESS");
    }

    #[test]
    fn options_distinguish_keys() {
        let key = |force| DiffJobKey {
            volume: "v".into(),
            bucket: "b".into(),
            from_snapshot: SnapshotId::from_uuid(Uuid::from_u64_pair(0, 1)),
            to_snapshot: SnapshotId::from_uuid(Uuid::from_u64_pair(0, 2)),
            options: DiffOptions {
                force_full_diff: force,
                disable_native_diff: false,
            },
        };
        assert_ne!(key(true), key(false));
        assert!(key(true).to_string().contains("full=true"));
    }

    #[test]
    fn restart_clears_progress() {
        let key = DiffJobKey {
            volume: "v".into(),
            bucket: "b".into(),
            from_snapshot: SnapshotId::from_uuid(Uuid::from_u64_pair(0, 1)),
            to_snapshot: SnapshotId::from_uuid(Uuid::from_u64_pair(0, 2)),
            options: DiffOptions::default(),
        };
        let mut job = SnapshotDiffJob::new(key, "a".into(), "b".into(), 10);
        job.cursor = Some(ObjectId::new(4));
        job.entries.push(DiffEntry::create("k"));
        job.restart(20);
        assert!(!job.has_progress());
        assert!(job.entries.is_empty());
        assert_eq!(job.status, JobStatus::InProgress);
    }
}
