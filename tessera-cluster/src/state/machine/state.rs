//! The replicated cluster state.

use crate::types::{ClusterLogId, ClusterStoredMembership};
use serde::{Deserialize, Serialize};
use tessera_core::container::{ContainerStateMachine, LedgerConfig};
use tessera_core::namespace::KeyNamespace;
use tessera_core::snapshot::SnapshotRegistry;

/// Everything a replica derives from the committed log.
///
/// This is what `state.json` and Raft snapshots contain. Volatile parts (the
/// snapshot chain, live idempotency ledgers) are not serialized; call
/// [`ClusterState::restore`] after decoding.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct ClusterState {
    /// Containers and their idempotency ledgers.
    pub containers: ContainerStateMachine,
    /// Bucket keys.
    pub namespace: KeyNamespace,
    /// Snapshot table and bucket checkpoints.
    pub snapshots: SnapshotRegistry,
    /// Last applied log ID.
    pub last_applied_log: Option<ClusterLogId>,
    /// Last membership configuration.
    pub last_membership: ClusterStoredMembership,
}

impl ClusterState {
    /// Decode a serialized state and rebuild its volatile parts.
    pub fn decode(data: &[u8], ledger: &LedgerConfig) -> serde_json::Result<Self> {
        let mut state: ClusterState = serde_json::from_slice(data)?;
        state.restore(ledger);
        Ok(state)
    }

    /// Rebuild the snapshot chain from the table and apply the ledger bound.
    pub fn restore(&mut self, ledger: &LedgerConfig) {
        self.snapshots.restore_chain();
        self.containers.set_config(ledger.clone());
        if self.snapshots.is_chain_corrupted() {
            tracing::warn!(
                snapshots = self.snapshots.table().len(),
                "Snapshot chain is corrupted after restore"
            );
        }
    }
}
