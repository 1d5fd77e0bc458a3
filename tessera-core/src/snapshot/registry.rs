//! Replicated snapshot state of one replica.

use super::chain::SnapshotChainManager;
use super::checkpoint::BucketCheckpoint;
use super::info::{SnapshotInfo, table_key};
use super::table::SnapshotTable;
use crate::error::{Result, TesseraError};
use crate::types::SnapshotId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Snapshot table, bucket checkpoints and the chains derived from them.
///
/// Only the table and checkpoints are serialized. The chain is volatile and
/// is rebuilt from the table by [`SnapshotRegistry::restore_chain`] whenever
/// the registry is loaded.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SnapshotRegistry {
    table: SnapshotTable,
    checkpoints: BTreeMap<SnapshotId, BucketCheckpoint>,
    #[serde(skip)]
    chain: SnapshotChainManager,
}

impl SnapshotRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild the chain from the table.
    pub fn restore_chain(&mut self) {
        self.chain = SnapshotChainManager::rebuild(&self.table);
    }

    /// Apply a replicated create at log position `log_index`.
    ///
    /// Fills the creation sequence and both backpointers from the current
    /// chain heads, then records the row, the checkpoint and the chain link.
    /// Checks here depend only on replicated state so every replica reaches
    /// the same verdict.
    pub fn apply_create(
        &mut self,
        mut info: SnapshotInfo,
        log_index: u64,
        mut checkpoint: BucketCheckpoint,
    ) -> Result<SnapshotInfo> {
        let key = info.table_key();
        if self.table.contains(&key) || self.table.get_by_id(&info.snapshot_id).is_some() {
            return Err(TesseraError::SnapshotExists { table_key: key });
        }

        info.creation_sequence = log_index;
        info.global_prev_id = self.chain.latest_global().map(|s| s.snapshot_id);
        info.path_prev_id = self
            .chain
            .latest_path(&info.volume, &info.bucket)
            .map(|s| s.snapshot_id);

        self.table.insert(info.clone())?;
        self.chain.link(info.clone())?;
        checkpoint.snapshot_id = Some(info.snapshot_id);
        self.checkpoints.insert(info.snapshot_id, checkpoint);

        tracing::debug!(
            snapshot_id = %info.snapshot_id,
            table_key = %key,
            creation_sequence = log_index,
            "Linked snapshot"
        );
        Ok(info)
    }

    /// Whether `name` is taken in `volume`/`bucket`.
    #[must_use]
    pub fn name_taken(&self, volume: &str, bucket: &str, name: &str) -> bool {
        self.table.contains(&table_key(volume, bucket, name))
    }

    /// Snapshot by name.
    pub fn resolve(&self, volume: &str, bucket: &str, name: &str) -> Result<SnapshotInfo> {
        let key = table_key(volume, bucket, name);
        self.table
            .get(&key)
            .cloned()
            .ok_or(TesseraError::SnapshotNotFound { table_key: key })
    }

    /// Snapshot by id.
    pub fn get_by_id(&self, id: &SnapshotId) -> Option<&SnapshotInfo> {
        self.table.get_by_id(id)
    }

    /// Checkpoint captured by a snapshot.
    pub fn checkpoint(&self, id: &SnapshotId) -> Result<BucketCheckpoint> {
        self.checkpoints
            .get(id)
            .cloned()
            .ok_or_else(|| TesseraError::SnapshotNotFound {
                table_key: id.to_string(),
            })
    }

    /// Snapshots of a bucket in name order.
    pub fn list(&self, volume: &str, bucket: &str) -> Vec<SnapshotInfo> {
        self.table.list_bucket(volume, bucket)
    }

    /// The persisted table.
    pub fn table(&self) -> &SnapshotTable {
        &self.table
    }

    /// The chains.
    pub fn chain(&self) -> &SnapshotChainManager {
        &self.chain
    }

    /// Whether the chains are corrupted.
    pub fn is_chain_corrupted(&self) -> bool {
        self.chain.is_chain_corrupted()
    }
}
