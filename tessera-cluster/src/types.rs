//! OpenRaft type configuration for Tessera.
//!
//! Log entries carry [`ClusterCommand`]s and applying one yields a
//! [`ClusterResponse`]. Members are plain [`BasicNode`]s whose address names
//! the node on the in-process router.

use crate::command::ClusterCommand;
use crate::state::ClusterResponse;
use openraft::BasicNode;
use openraft::error::{ClientWriteError, RaftError};
use std::io::Cursor;

/// Node ID type for the cluster.
pub type ClusterNodeId = u64;

openraft::declare_raft_types!(
    /// OpenRaft type configuration for Tessera.
    pub TypeConfig:
        D = ClusterCommand,
        R = ClusterResponse,
);

/// Raft instance of one node.
pub type ClusterRaft = openraft::Raft<TypeConfig>;

/// Replicated log entry.
pub type ClusterEntry = openraft::Entry<TypeConfig>;

/// Persisted vote.
pub type ClusterVote = openraft::Vote<ClusterNodeId>;

/// Log position.
pub type ClusterLogId = openraft::LogId<ClusterNodeId>;

/// Membership as recorded by the state machine.
pub type ClusterStoredMembership = openraft::StoredMembership<ClusterNodeId, BasicNode>;

/// Raft snapshot metadata.
pub type ClusterSnapshotMeta = openraft::SnapshotMeta<ClusterNodeId, BasicNode>;

/// Raft snapshot with its serialized state.
pub type ClusterSnapshot = openraft::storage::Snapshot<TypeConfig>;

/// Error raised by log or state machine storage.
pub type ClusterStorageError = openraft::StorageError<ClusterNodeId>;

/// Metrics published by a node.
pub type ClusterMetrics = openraft::RaftMetrics<ClusterNodeId, BasicNode>;

/// Error returned by `client_write`.
pub type ClusterRaftWriteError =
    RaftError<ClusterNodeId, ClientWriteError<ClusterNodeId, BasicNode>>;

/// Membership entry for `node_id`, addressed on the local router.
pub fn member(node_id: ClusterNodeId) -> BasicNode {
    BasicNode {
        addr: format!("local://{node_id}"),
    }
}

/// The leader a rejected write should be retried on, if one is known.
pub fn forward_target(error: &ClusterRaftWriteError) -> Option<ClusterNodeId> {
    match error {
        RaftError::APIError(ClientWriteError::ForwardToLeader(forward)) => forward.leader_id,
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use openraft::error::ForwardToLeader;

    #[test]
    fn forward_target_needs_a_known_leader() {
        let known: ClusterRaftWriteError = RaftError::APIError(ClientWriteError::ForwardToLeader(
            ForwardToLeader::new(3, member(3)),
        ));
        assert_eq!(forward_target(&known), Some(3));

        let unknown: ClusterRaftWriteError =
            RaftError::APIError(ClientWriteError::ForwardToLeader(ForwardToLeader::empty()));
        assert_eq!(forward_target(&unknown), None);
    }

    #[test]
    fn members_are_addressed_by_id() {
        assert_eq!(member(7).addr, "local://7");
    }
}
