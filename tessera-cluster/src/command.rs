//! Cluster commands - operations that go through Raft consensus.
//!
//! Every replicated mutation is one of these commands. Commands are
//! serialized into the Raft log and applied to each node's state machine in
//! log order, so anything a command needs that is not deterministic (snapshot
//! ids, creation times, generated names) is minted by the leader before the
//! command is proposed.

use serde::{Deserialize, Serialize};
use tessera_core::container::ContainerCommand;
use tessera_core::snapshot::SnapshotInfo;
use tessera_core::types::ContainerId;

/// Commands that are replicated through Raft consensus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ClusterCommand {
    // ==================== Container Operations ====================
    /// A container mutation, deduplicated by its command id.
    Container(ContainerCommand),

    // ==================== Namespace Operations ====================
    /// Create a bucket. Creating an existing bucket is a no-op.
    CreateBucket {
        /// Volume name.
        volume: String,
        /// Bucket name.
        bucket: String,
    },

    /// Create or overwrite a key.
    PutKey {
        /// Volume name.
        volume: String,
        /// Bucket name.
        bucket: String,
        /// Key name.
        key: String,
        /// Object size in bytes.
        size: u64,
        /// Content checksum.
        checksum: String,
    },

    /// Delete a key.
    DeleteKey {
        /// Volume name.
        volume: String,
        /// Bucket name.
        bucket: String,
        /// Key name.
        key: String,
    },

    /// Rename a key within its bucket.
    RenameKey {
        /// Volume name.
        volume: String,
        /// Bucket name.
        bucket: String,
        /// Current key name.
        from: String,
        /// New key name.
        to: String,
    },

    // ==================== Snapshot Operations ====================
    /// Record a snapshot whose identity was minted by the leader.
    ///
    /// Replicas store `info` as given; only the creation sequence and chain
    /// backpointers are filled at apply time from replicated state.
    CreateSnapshot {
        /// Leader-minted snapshot identity.
        info: SnapshotInfo,
    },
}

impl ClusterCommand {
    /// Get a human-readable name for this command type.
    pub fn name(&self) -> &'static str {
        match self {
            ClusterCommand::Container(cmd) => cmd.name(),
            ClusterCommand::CreateBucket { .. } => "CreateBucket",
            ClusterCommand::PutKey { .. } => "PutKey",
            ClusterCommand::DeleteKey { .. } => "DeleteKey",
            ClusterCommand::RenameKey { .. } => "RenameKey",
            ClusterCommand::CreateSnapshot { .. } => "CreateSnapshot",
        }
    }

    /// Get the container ID if this is a container command.
    pub fn container_id(&self) -> Option<ContainerId> {
        match self {
            ClusterCommand::Container(cmd) => Some(cmd.container_id),
            _ => None,
        }
    }

    /// Get the `(volume, bucket)` this command touches, if any.
    pub fn bucket(&self) -> Option<(&str, &str)> {
        match self {
            ClusterCommand::Container(_) => None,
            ClusterCommand::CreateBucket { volume, bucket }
            | ClusterCommand::PutKey { volume, bucket, .. }
            | ClusterCommand::DeleteKey { volume, bucket, .. }
            | ClusterCommand::RenameKey { volume, bucket, .. } => Some((volume, bucket)),
            ClusterCommand::CreateSnapshot { info } => Some((&info.volume, &info.bucket)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_names() {
        let cmd = ClusterCommand::Container(ContainerCommand::create(ContainerId::new(1)));
        assert_eq!(cmd.name(), "CreateContainer");
        assert_eq!(cmd.container_id(), Some(ContainerId::new(1)));
        assert_eq!(cmd.bucket(), None);

        let cmd = ClusterCommand::PutKey {
            volume: "vol".to_string(),
            bucket: "bkt".to_string(),
            key: "k".to_string(),
            size: 3,
            checksum: "abc".to_string(),
        };
        assert_eq!(cmd.name(), "PutKey");
        assert_eq!(cmd.bucket(), Some(("vol", "bkt")));
    }

    #[test]
    fn commands_survive_the_log_encoding() {
        let cmd = ClusterCommand::RenameKey {
            volume: "vol".to_string(),
            bucket: "bkt".to_string(),
            from: "a".to_string(),
            to: "b".to_string(),
        };
        let json = serde_json::to_vec(&cmd).unwrap();
        let back: ClusterCommand = serde_json::from_slice(&json).unwrap();
        assert_eq!(back.name(), "RenameKey");
        assert_eq!(back.bucket(), Some(("vol", "bkt")));
    }
}
