//! Error types for Tessera.
//!
//! Every error carries the identifiers needed to act on it (container id,
//! snapshot table key, diff job key). Errors are `Clone` and serializable so
//! that a rejection can be remembered by the idempotency ledger and carried
//! back to the caller inside a replicated response.

use crate::container::ContainerState;
use crate::types::{BlockId, ContainerId};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The main error type for Tessera operations.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TesseraError {
    // =========================================================================
    // Container Errors (E100-E199)
    // =========================================================================
    /// The container does not exist on this replica.
    #[error("E101: Container {container_id} not found")]
    ContainerNotFound {
        /// The missing container.
        container_id: ContainerId,
    },

    /// A write reached a container that no longer accepts writes.
    #[error("E102: Container {container_id} is not open (state {state})")]
    ContainerNotOpen {
        /// The container that rejected the write.
        container_id: ContainerId,
        /// The state the container was in.
        state: ContainerState,
    },

    /// A chunk with different content already exists and overwrite was not requested.
    #[error("E103: Chunk '{chunk_name}' of block {block_id} already exists with different content")]
    ChunkAlreadyExists {
        /// The block owning the chunk.
        block_id: BlockId,
        /// The chunk name.
        chunk_name: String,
    },

    /// Chunk payload does not match its declared length or checksum.
    #[error("E104: Checksum mismatch for chunk '{chunk_name}' of block {block_id}: {cause}")]
    ChecksumMismatch {
        /// The block owning the chunk.
        block_id: BlockId,
        /// The chunk name.
        chunk_name: String,
        /// What did not match.
        cause: String,
    },

    /// The container was marked unhealthy and rejects every mutation.
    #[error("E105: Container {container_id} is unhealthy: {reason}")]
    ContainerUnhealthy {
        /// The unhealthy container.
        container_id: ContainerId,
        /// Why the container was marked unhealthy.
        reason: String,
    },

    /// A block referenced by a command is not present.
    #[error("E106: Block {block_id} not found")]
    BlockNotFound {
        /// The missing block.
        block_id: BlockId,
    },

    // =========================================================================
    // Snapshot Errors (E200-E299)
    // =========================================================================
    /// A snapshot with this table key already exists.
    #[error("E201: Snapshot {table_key} already exists")]
    SnapshotExists {
        /// Table key of the existing snapshot.
        table_key: String,
    },

    /// No snapshot is stored under this table key.
    #[error("E202: Snapshot {table_key} not found")]
    SnapshotNotFound {
        /// Table key that was looked up.
        table_key: String,
    },

    /// The snapshot chain failed validation.
    #[error("E203: Snapshot chain corrupted: {cause}")]
    SnapshotChainCorrupted {
        /// Description of the violated chain property.
        cause: String,
    },

    /// The snapshot name violates naming rules.
    #[error("E204: Invalid snapshot name '{name}': {cause}")]
    InvalidSnapshotName {
        /// The rejected name.
        name: String,
        /// Which rule was violated.
        cause: String,
    },

    /// The bucket does not exist.
    #[error("E205: Bucket /{volume}/{bucket} not found")]
    BucketNotFound {
        /// Volume name.
        volume: String,
        /// Bucket name.
        bucket: String,
    },

    /// A key operation referenced a missing key.
    #[error("E206: Key '{key}' not found in /{volume}/{bucket}")]
    KeyNotFound {
        /// Volume name.
        volume: String,
        /// Bucket name.
        bucket: String,
        /// Key name.
        key: String,
    },

    /// A key operation would replace an existing key.
    #[error("E207: Key '{key}' already exists in /{volume}/{bucket}")]
    KeyExists {
        /// Volume name.
        volume: String,
        /// Bucket name.
        bucket: String,
        /// Key name.
        key: String,
    },

    /// A volume or bucket name violates naming rules.
    #[error("E208: Invalid bucket name /{volume}/{bucket}: {cause}")]
    InvalidBucketName {
        /// Volume name.
        volume: String,
        /// Bucket name.
        bucket: String,
        /// Which rule was violated.
        cause: String,
    },

    // =========================================================================
    // Snapshot Diff Errors (E300-E399)
    // =========================================================================
    /// The diff request itself is invalid.
    #[error("E301: Invalid snapshot diff request: {cause}")]
    InvalidDiffRequest {
        /// Why the request was rejected.
        cause: String,
    },

    /// A diff job failed while computing.
    #[error("E302: Snapshot diff job {job_key} failed: {reason}")]
    DiffJobFailed {
        /// The job key.
        job_key: String,
        /// Failure reason.
        reason: String,
    },

    /// No diff job exists for the key.
    #[error("E303: Snapshot diff job {job_key} not found")]
    DiffJobNotFound {
        /// The job key.
        job_key: String,
    },

    /// The paging token could not be parsed.
    #[error("E304: Invalid snapshot diff page token '{token}'")]
    InvalidPageToken {
        /// The token as received.
        token: String,
    },

    // =========================================================================
    // Leadership Errors (E400-E499)
    // =========================================================================
    /// The node is not the leader.
    #[error("E401: Not the leader, leader is node {leader:?}")]
    NotLeader {
        /// The current leader if known.
        leader: Option<u64>,
    },

    /// Leadership changed before the command committed.
    #[error("E402: Leadership lost before commit: {cause}")]
    LeadershipLost {
        /// What interrupted the command.
        cause: String,
    },

    // =========================================================================
    // Configuration Errors (E800-E899)
    // =========================================================================
    /// Invalid configuration value.
    #[error("E801: Invalid configuration: {cause}")]
    Config {
        /// Description of the invalid value.
        cause: String,
    },

    // =========================================================================
    // Storage Errors (E900-E999)
    // =========================================================================
    /// Filesystem failure.
    #[error("E901: IO error: {cause}")]
    Io {
        /// Description of the IO failure.
        cause: String,
    },

    /// Encoding or decoding failure.
    #[error("E902: Serialization error: {0}")]
    Serialization(String),
}

impl TesseraError {
    /// Get the error code (e.g., "E101").
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::ContainerNotFound { .. } => "E101",
            Self::ContainerNotOpen { .. } => "E102",
            Self::ChunkAlreadyExists { .. } => "E103",
            Self::ChecksumMismatch { .. } => "E104",
            Self::ContainerUnhealthy { .. } => "E105",
            Self::BlockNotFound { .. } => "E106",
            Self::SnapshotExists { .. } => "E201",
            Self::SnapshotNotFound { .. } => "E202",
            Self::SnapshotChainCorrupted { .. } => "E203",
            Self::InvalidSnapshotName { .. } => "E204",
            Self::BucketNotFound { .. } => "E205",
            Self::KeyNotFound { .. } => "E206",
            Self::KeyExists { .. } => "E207",
            Self::InvalidBucketName { .. } => "E208",
            Self::InvalidDiffRequest { .. } => "E301",
            Self::DiffJobFailed { .. } => "E302",
            Self::DiffJobNotFound { .. } => "E303",
            Self::InvalidPageToken { .. } => "E304",
            Self::NotLeader { .. } => "E401",
            Self::LeadershipLost { .. } => "E402",
            Self::Config { .. } => "E801",
            Self::Io { .. } => "E901",
            Self::Serialization(_) => "E902",
        }
    }

    /// Check if the caller may retry the same request.
    #[must_use]
    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            Self::NotLeader { .. } | Self::LeadershipLost { .. } | Self::Io { .. }
        )
    }

    /// Check if this error rejects a command that violates container structure.
    #[must_use]
    pub fn is_structural(&self) -> bool {
        matches!(
            self,
            Self::ContainerNotOpen { .. }
                | Self::ChunkAlreadyExists { .. }
                | Self::ChecksumMismatch { .. }
                | Self::ContainerUnhealthy { .. }
                | Self::ContainerNotFound { .. }
                | Self::BlockNotFound { .. }
        )
    }
}

impl From<std::io::Error> for TesseraError {
    fn from(e: std::io::Error) -> Self {
        TesseraError::Io {
            cause: e.to_string(),
        }
    }
}

impl From<serde_json::Error> for TesseraError {
    fn from(e: serde_json::Error) -> Self {
        TesseraError::Serialization(e.to_string())
    }
}

/// Result type alias using `TesseraError`.
pub type Result<T> = std::result::Result<T, TesseraError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_codes_are_correct() {
        let err = TesseraError::ContainerNotOpen {
            container_id: ContainerId::new(7),
            state: ContainerState::Closed,
        };
        assert_eq!(err.code(), "E102");

        let err = TesseraError::SnapshotChainCorrupted {
            cause: "dangling".to_string(),
        };
        assert_eq!(err.code(), "E203");
    }

    #[test]
    fn error_display() {
        let err = TesseraError::ContainerNotOpen {
            container_id: ContainerId::new(5),
            state: ContainerState::Closing,
        };
        let msg = format!("{}", err);
        assert!(msg.contains("E102"));
        assert!(msg.contains("container_5"));
        assert!(msg.contains("CLOSING"));
    }

    #[test]
    fn retriable_errors() {
        assert!(TesseraError::NotLeader { leader: Some(2) }.is_retriable());
        assert!(
            TesseraError::LeadershipLost {
                cause: "term changed".to_string()
            }
            .is_retriable()
        );
        assert!(
            !TesseraError::ChunkAlreadyExists {
                block_id: BlockId::new(ContainerId::new(1), 1),
                chunk_name: "c0".to_string(),
            }
            .is_retriable()
        );
    }

    #[test]
    fn structural_errors() {
        assert!(
            TesseraError::ContainerNotOpen {
                container_id: ContainerId::new(1),
                state: ContainerState::Closed,
            }
            .is_structural()
        );
        assert!(
            !TesseraError::SnapshotExists {
                table_key: "/v/b/s".to_string()
            }
            .is_structural()
        );
    }

    #[test]
    fn errors_survive_serialization() {
        let err = TesseraError::ChecksumMismatch {
            block_id: BlockId::new(ContainerId::new(3), 9),
            chunk_name: "chunk_0".to_string(),
            cause: "length".to_string(),
        };
        let json = serde_json::to_string(&err).expect("serialize");
        let back: TesseraError = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(err, back);
    }
}
