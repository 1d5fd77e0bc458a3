//! Durable Raft log storage.
//!
//! ## Storage Layout
//!
//! ```text
//! raft/
//! ├── meta.json           # last purged log id, committed log id
//! ├── vote.json           # current vote
//! └── segments/
//!     ├── seg_00000000000000000000.log  # entries 0-999
//!     └── seg_00000000000000001000.log  # entries 1000-1999 (active)
//! ```
//!
//! Segments are newline-delimited JSON. Appends go to the active segment and
//! are fsynced before the append is acknowledged; purge deletes whole
//! segments; truncate rewrites the one segment containing the cut.

mod segment;

pub use segment::SEGMENT_MAX_ENTRIES;

use crate::durable::{read_json, write_json};
use crate::types::{ClusterEntry, ClusterLogId, ClusterStorageError, ClusterVote, TypeConfig};
use openraft::storage::{LogFlushed, RaftLogStorage};
use openraft::{LogState, RaftLogReader, StorageIOError};
use segment::SegmentedLog;
use serde::{Deserialize, Serialize};
use std::fmt::Debug;
use std::ops::RangeBounds;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Persisted log metadata.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct LogMeta {
    last_purged_log_id: Option<ClusterLogId>,
    committed: Option<ClusterLogId>,
}

struct LogStoreInner {
    dir: PathBuf,
    log: SegmentedLog,
    meta: LogMeta,
    vote: Option<ClusterVote>,
}

impl LogStoreInner {
    fn save_meta(&self) -> std::io::Result<()> {
        write_json(&self.dir.join("meta.json"), &self.meta)
    }
}

/// Persistent storage for the Raft log and vote.
#[derive(Clone)]
pub struct LogStore {
    inner: Arc<RwLock<LogStoreInner>>,
}

impl LogStore {
    /// Create or open log storage in `dir`.
    pub fn open(dir: PathBuf) -> Result<Self, std::io::Error> {
        Self::open_with_segment_len(dir, SEGMENT_MAX_ENTRIES)
    }

    /// Open with a custom number of entries per segment.
    pub fn open_with_segment_len(dir: PathBuf, segment_len: u64) -> Result<Self, std::io::Error> {
        std::fs::create_dir_all(&dir)?;
        let meta: LogMeta = read_json(&dir.join("meta.json"))?.unwrap_or_default();
        let vote: Option<ClusterVote> = read_json(&dir.join("vote.json"))?;

        let mut log = SegmentedLog::open(dir.join("segments"), segment_len)?;
        if let Some(purged) = meta.last_purged_log_id {
            log.forget_through(purged.index);
        }
        tracing::debug!(
            dir = %dir.display(),
            last_log = ?log.last_log_id(),
            committed = ?meta.committed,
            "Opened raft log"
        );

        Ok(Self {
            inner: Arc::new(RwLock::new(LogStoreInner {
                dir,
                log,
                meta,
                vote,
            })),
        })
    }
}

impl RaftLogReader<TypeConfig> for LogStore {
    async fn try_get_log_entries<RB: RangeBounds<u64> + Clone + Debug>(
        &mut self,
        range: RB,
    ) -> Result<Vec<ClusterEntry>, ClusterStorageError> {
        Ok(self.inner.read().await.log.range(range))
    }
}

impl RaftLogStorage<TypeConfig> for LogStore {
    type LogReader = Self;

    async fn get_log_state(&mut self) -> Result<LogState<TypeConfig>, ClusterStorageError> {
        let inner = self.inner.read().await;
        let last_purged_log_id = inner.meta.last_purged_log_id;
        Ok(LogState {
            last_purged_log_id,
            last_log_id: inner.log.last_log_id().or(last_purged_log_id),
        })
    }

    async fn save_committed(
        &mut self,
        committed: Option<ClusterLogId>,
    ) -> Result<(), ClusterStorageError> {
        let mut inner = self.inner.write().await;
        inner.meta.committed = committed;
        inner.save_meta().map_err(|e| StorageIOError::write_logs(&e))?;
        Ok(())
    }

    async fn read_committed(&mut self) -> Result<Option<ClusterLogId>, ClusterStorageError> {
        Ok(self.inner.read().await.meta.committed)
    }

    async fn save_vote(&mut self, vote: &ClusterVote) -> Result<(), ClusterStorageError> {
        let mut inner = self.inner.write().await;
        write_json(&inner.dir.join("vote.json"), vote).map_err(|e| StorageIOError::write_vote(&e))?;
        inner.vote = Some(*vote);
        Ok(())
    }

    async fn read_vote(&mut self) -> Result<Option<ClusterVote>, ClusterStorageError> {
        Ok(self.inner.read().await.vote)
    }

    async fn append<I>(
        &mut self,
        entries: I,
        callback: LogFlushed<TypeConfig>,
    ) -> Result<(), ClusterStorageError>
    where
        I: IntoIterator<Item = ClusterEntry>,
    {
        let mut inner = self.inner.write().await;
        let result = inner.log.append(entries);
        match result {
            Ok(()) => {
                callback.log_io_completed(Ok(()));
                Ok(())
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to append raft log entries");
                let err = StorageIOError::write_logs(&e);
                callback.log_io_completed(Err(e));
                Err(err.into())
            }
        }
    }

    async fn truncate(&mut self, log_id: ClusterLogId) -> Result<(), ClusterStorageError> {
        let mut inner = self.inner.write().await;
        inner
            .log
            .truncate_from(log_id.index)
            .map_err(|e| StorageIOError::write_logs(&e))?;
        Ok(())
    }

    async fn purge(&mut self, log_id: ClusterLogId) -> Result<(), ClusterStorageError> {
        let mut inner = self.inner.write().await;
        inner.meta.last_purged_log_id = Some(log_id);
        inner.save_meta().map_err(|e| StorageIOError::write_logs(&e))?;
        inner
            .log
            .purge_through(log_id.index)
            .map_err(|e| StorageIOError::write_logs(&e))?;
        Ok(())
    }

    async fn get_log_reader(&mut self) -> Self::LogReader {
        self.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use openraft::CommittedLeaderId;
    use std::io::Write;
    use tempfile::TempDir;

    fn log_id(term: u64, index: u64) -> ClusterLogId {
        ClusterLogId::new(CommittedLeaderId::new(term, 0), index)
    }

    fn blank_entries(term: u64, range: std::ops::RangeInclusive<u64>) -> Vec<ClusterEntry> {
        range
            .map(|i| ClusterEntry {
                log_id: log_id(term, i),
                payload: openraft::EntryPayload::Blank,
            })
            .collect()
    }

    async fn append(store: &LogStore, entries: Vec<ClusterEntry>) {
        store
            .inner
            .write()
            .await
            .log
            .append(entries)
            .expect("append should succeed");
    }

    async fn segment_count(store: &LogStore) -> usize {
        store.inner.read().await.log.segment_count()
    }

    #[tokio::test]
    async fn test_read_back_appended_entries() {
        let dir = TempDir::new().expect("create temp dir");
        let mut store = LogStore::open(dir.path().to_path_buf()).expect("open storage");

        append(&store, blank_entries(1, 1..=10)).await;

        let entries = store.try_get_log_entries(1..=10).await.expect("read entries");
        assert_eq!(entries.len(), 10);
        let state = store.get_log_state().await.expect("log state");
        assert_eq!(state.last_log_id, Some(log_id(1, 10)));
    }

    #[tokio::test]
    async fn test_segments_rotate() {
        let dir = TempDir::new().expect("create temp dir");
        let mut store =
            LogStore::open_with_segment_len(dir.path().to_path_buf(), 100).expect("open storage");

        append(&store, blank_entries(1, 1..=350)).await;

        assert_eq!(segment_count(&store).await, 4);
        let entries = store.try_get_log_entries(1..=350).await.expect("read entries");
        assert_eq!(entries.len(), 350);
    }

    #[tokio::test]
    async fn test_purge_survives_reopen() {
        let dir = TempDir::new().expect("create temp dir");
        {
            let mut store = LogStore::open_with_segment_len(dir.path().to_path_buf(), 100)
                .expect("open storage");
            append(&store, blank_entries(1, 1..=250)).await;
            store.purge(log_id(1, 150)).await.expect("purge");

            assert!(store.try_get_log_entries(1..=150).await.unwrap().is_empty());
            assert_eq!(segment_count(&store).await, 2);
        }

        let mut store =
            LogStore::open_with_segment_len(dir.path().to_path_buf(), 100).expect("reopen storage");
        assert!(store.try_get_log_entries(..=150).await.unwrap().is_empty());
        assert_eq!(store.try_get_log_entries(151..).await.unwrap().len(), 100);
        let state = store.get_log_state().await.expect("log state");
        assert_eq!(state.last_purged_log_id, Some(log_id(1, 150)));
    }

    #[tokio::test]
    async fn test_truncate_rewrites_segment() {
        let dir = TempDir::new().expect("create temp dir");
        {
            let mut store = LogStore::open_with_segment_len(dir.path().to_path_buf(), 100)
                .expect("open storage");
            append(&store, blank_entries(1, 1..=250)).await;
            store.truncate(log_id(1, 120)).await.expect("truncate");
            append(&store, blank_entries(2, 120..=125)).await;
        }

        let mut store =
            LogStore::open_with_segment_len(dir.path().to_path_buf(), 100).expect("reopen storage");
        let entries = store.try_get_log_entries(1..).await.expect("read entries");
        assert_eq!(entries.len(), 125);
        assert_eq!(entries[118].log_id, log_id(1, 119));
        assert_eq!(entries[119].log_id, log_id(2, 120));
    }

    #[tokio::test]
    async fn test_vote_and_committed_persist() {
        let dir = TempDir::new().expect("create temp dir");
        {
            let mut store = LogStore::open(dir.path().to_path_buf()).expect("open storage");
            let mut vote = ClusterVote::new(5, 3);
            vote.commit();
            store.save_vote(&vote).await.expect("save vote");
            store
                .save_committed(Some(log_id(5, 42)))
                .await
                .expect("save committed");
        }

        let mut store = LogStore::open(dir.path().to_path_buf()).expect("reopen storage");
        let vote = store.read_vote().await.expect("read vote").expect("vote stored");
        assert_eq!(vote.leader_id().term, 5);
        assert_eq!(vote.leader_id().node_id, 3);
        assert!(vote.is_committed());
        assert_eq!(store.read_committed().await.unwrap(), Some(log_id(5, 42)));
    }

    #[tokio::test]
    async fn test_torn_tail_is_dropped() {
        let dir = TempDir::new().expect("create temp dir");
        {
            let store = LogStore::open(dir.path().to_path_buf()).expect("open storage");
            append(&store, blank_entries(1, 1..=5)).await;
        }
        let segment = dir.path().join("segments").join("seg_00000000000000000000.log");
        let mut file = std::fs::OpenOptions::new()
            .append(true)
            .open(&segment)
            .expect("open segment");
        file.write_all(b"{\"log_id\":").expect("write torn line");

        let mut store = LogStore::open(dir.path().to_path_buf()).expect("reopen storage");
        let entries = store.try_get_log_entries(1..).await.expect("read entries");
        assert_eq!(entries.len(), 5);

        append(&store, blank_entries(1, 6..=7)).await;
        drop(store);
        let mut store = LogStore::open(dir.path().to_path_buf()).expect("reopen storage");
        let entries = store.try_get_log_entries(1..).await.expect("read entries");
        assert_eq!(entries.len(), 7);
    }
}
