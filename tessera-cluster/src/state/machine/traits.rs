//! Trait implementations for OpenRaft integration and the diff engine.

use crate::types::{
    ClusterLogId, ClusterSnapshot, ClusterSnapshotMeta, ClusterStorageError,
    ClusterStoredMembership, TypeConfig,
};
use openraft::storage::RaftStateMachine;
use openraft::{
    EntryPayload, RaftSnapshotBuilder, RaftTypeConfig, StorageIOError, StoredMembership,
};
use std::io::Cursor;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use tessera_core::diff::SnapshotCatalog;
use tessera_core::error::Result as CoreResult;
use tessera_core::snapshot::{BucketCheckpoint, SnapshotInfo};
use tessera_core::types::SnapshotId;

use super::ClusterStateMachine;
use super::apply::apply_command;
use super::state::ClusterState;
use super::types::{ClusterResponse, StoredSnapshot};

impl ClusterStateMachine {
    /// Serialize the current state into a new stored snapshot.
    async fn snapshot_current(&self) -> Result<ClusterSnapshot, ClusterStorageError> {
        let (data, last_applied_log, last_membership) = {
            let state = self.state.read();
            let data =
                serde_json::to_vec(&*state).map_err(|e| StorageIOError::read_state_machine(&e))?;
            // Logs up to this snapshot may be purged, so the state file must cover it.
            self.persist(&state)
                .map_err(|e| StorageIOError::write_state_machine(&e))?;
            (data, state.last_applied_log, state.last_membership.clone())
        };

        let snapshot_idx = self.snapshot_idx.fetch_add(1, Ordering::Relaxed) + 1;
        let snapshot_id = match last_applied_log {
            Some(last) => format!("{}-{}-{}", last.leader_id, last.index, snapshot_idx),
            None => format!("--{snapshot_idx}"),
        };
        let meta = ClusterSnapshotMeta {
            last_log_id: last_applied_log,
            last_membership,
            snapshot_id,
        };
        tracing::info!(snapshot_id = %meta.snapshot_id, size = data.len(), "Built raft snapshot");

        *self.current_snapshot.write().await = Some(StoredSnapshot {
            meta: meta.clone(),
            data: data.clone(),
        });

        Ok(ClusterSnapshot {
            meta,
            snapshot: Box::new(Cursor::new(data)),
        })
    }
}

impl RaftSnapshotBuilder<TypeConfig> for Arc<ClusterStateMachine> {
    async fn build_snapshot(&mut self) -> Result<ClusterSnapshot, ClusterStorageError> {
        self.snapshot_current().await
    }
}

/// Applies committed log entries to the cluster state.
///
/// The whole batch is applied under one write lock. The state file is
/// rewritten every `flush_entries` entries; an acknowledged entry newer than
/// the file is still in the committed log and is applied again on restart.
impl RaftStateMachine<TypeConfig> for Arc<ClusterStateMachine> {
    type SnapshotBuilder = Self;

    async fn applied_state(
        &mut self,
    ) -> Result<(Option<ClusterLogId>, ClusterStoredMembership), ClusterStorageError> {
        let state = self.state.read();
        Ok((state.last_applied_log, state.last_membership.clone()))
    }

    async fn apply<I>(&mut self, entries: I) -> Result<Vec<ClusterResponse>, ClusterStorageError>
    where
        I: IntoIterator<Item = openraft::Entry<TypeConfig>> + Send,
    {
        let mut responses = Vec::new();
        let mut state = self.state.write();

        for entry in entries {
            tracing::debug!(%entry.log_id, "applying to state machine");
            state.last_applied_log = Some(entry.log_id);

            match entry.payload {
                EntryPayload::Blank => responses.push(ClusterResponse::ok()),
                EntryPayload::Normal(cmd) => {
                    responses.push(apply_command(&mut state, cmd, entry.log_id.index));
                }
                EntryPayload::Membership(membership) => {
                    state.last_membership = StoredMembership::new(Some(entry.log_id), membership);
                    responses.push(ClusterResponse::ok());
                }
            }
        }

        if !responses.is_empty() {
            self.persist_after(&state, responses.len() as u64)
                .map_err(|e| StorageIOError::write_state_machine(&e))?;
        }
        Ok(responses)
    }

    async fn get_snapshot_builder(&mut self) -> Self::SnapshotBuilder {
        Arc::clone(self)
    }

    async fn begin_receiving_snapshot(
        &mut self,
    ) -> Result<Box<<TypeConfig as RaftTypeConfig>::SnapshotData>, ClusterStorageError> {
        Ok(Box::new(Cursor::new(Vec::new())))
    }

    async fn install_snapshot(
        &mut self,
        meta: &ClusterSnapshotMeta,
        snapshot: Box<<TypeConfig as RaftTypeConfig>::SnapshotData>,
    ) -> Result<(), ClusterStorageError> {
        let data = snapshot.into_inner();
        tracing::info!(snapshot_id = %meta.snapshot_id, size = data.len(), "Installing raft snapshot");

        let mut new_state = ClusterState::decode(&data, &self.ledger)
            .map_err(|e| StorageIOError::read_snapshot(Some(meta.signature()), &e))?;
        new_state.last_applied_log = meta.last_log_id;
        new_state.last_membership = meta.last_membership.clone();

        {
            let mut state = self.state.write();
            self.persist(&new_state)
                .map_err(|e| StorageIOError::write_state_machine(&e))?;
            *state = new_state;
        }

        *self.current_snapshot.write().await = Some(StoredSnapshot {
            meta: meta.clone(),
            data,
        });
        Ok(())
    }

    async fn get_current_snapshot(
        &mut self,
    ) -> Result<Option<ClusterSnapshot>, ClusterStorageError> {
        if let Some(snapshot) = &*self.current_snapshot.read().await {
            return Ok(Some(ClusterSnapshot {
                meta: snapshot.meta.clone(),
                snapshot: Box::new(Cursor::new(snapshot.data.clone())),
            }));
        }
        // After a restart the applied state on disk is the latest snapshot.
        let restored = self.state.read().last_applied_log.is_some();
        if restored {
            return self.snapshot_current().await.map(Some);
        }
        Ok(None)
    }
}

/// Snapshot lookups for the diff engine, against this replica's applied state.
impl SnapshotCatalog for ClusterStateMachine {
    fn resolve(&self, volume: &str, bucket: &str, name: &str) -> CoreResult<SnapshotInfo> {
        self.state.read().snapshots.resolve(volume, bucket, name)
    }

    fn checkpoint(&self, snapshot_id: &SnapshotId) -> CoreResult<BucketCheckpoint> {
        self.state.read().snapshots.checkpoint(snapshot_id)
    }
}
