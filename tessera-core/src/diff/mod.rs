//! Snapshot diffs.
//!
//! [`compute`] compares two bucket checkpoints deterministically and in
//! resumable batches. [`SnapshotDiffEngine`] turns that into deduplicated,
//! persisted background jobs that clients poll.

mod catalog;
pub mod compute;
mod engine;
mod job;
mod report;
mod store;

pub use catalog::SnapshotCatalog;
pub use engine::{DiffEngineConfig, SnapshotDiffEngine, SnapshotDiffRequest, SnapshotDiffResponse};
pub use job::{DiffJobKey, DiffJobSummary, DiffOptions, JobStatus, SnapshotDiffJob};
pub use report::{DiffEntry, DiffType, SnapshotDiffReport};
pub use store::{DiffJobStore, FileDiffJobStore, MemoryDiffJobStore};
