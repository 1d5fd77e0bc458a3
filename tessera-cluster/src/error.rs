//! Error types for cluster operations.

use crate::types::ClusterNodeId;
use openraft::BasicNode;
use tessera_core::error::TesseraError;
use thiserror::Error;

/// Result type for cluster operations.
pub type ClusterResult<T> = std::result::Result<T, ClusterError>;

/// Type alias for OpenRaft Raft errors.
pub type RaftError<E = openraft::error::Infallible> = openraft::error::RaftError<ClusterNodeId, E>;

/// Type alias for OpenRaft RPC errors.
pub type RPCError<E = openraft::error::Infallible> =
    openraft::error::RPCError<ClusterNodeId, BasicNode, RaftError<E>>;

/// Type alias for client write errors.
pub type ClientWriteError = openraft::error::ClientWriteError<ClusterNodeId, BasicNode>;

/// Type alias for initialize errors.
pub type InitializeError = openraft::error::InitializeError<ClusterNodeId, BasicNode>;

/// Errors that can occur in cluster operations.
#[derive(Debug, Error)]
pub enum ClusterError {
    /// Raft consensus error.
    #[error("Raft error: {0}")]
    Raft(Box<RaftError>),

    /// Client write could not be committed.
    #[error("Raft write error: {0}")]
    RaftWrite(Box<RaftError<ClientWriteError>>),

    /// Cluster bootstrap failed.
    #[error("Raft initialize error: {0}")]
    Initialize(Box<RaftError<InitializeError>>),

    /// OpenRaft stopped or hit an unrecoverable error.
    #[error("Raft fatal error: {0}")]
    Fatal(String),

    /// A peer could not be reached through the router.
    #[error("Node {0} is unreachable")]
    Unreachable(u64),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Storage error.
    #[error("Storage error: {0}")]
    Storage(String),

    /// Not the leader - includes leader hint if known.
    #[error("Not the leader, leader is node {leader:?}")]
    NotLeader {
        /// The current leader if known.
        leader: Option<u64>,
    },

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Tessera domain error, including typed rejections returned by the
    /// replicated state machine.
    #[error("Tessera error: {0}")]
    Core(#[from] TesseraError),
}

impl ClusterError {
    /// Check if the caller may retry the request, possibly on another node.
    #[must_use]
    pub fn is_retriable(&self) -> bool {
        match self {
            Self::NotLeader { .. } | Self::Unreachable(_) | Self::RaftWrite(_) => true,
            Self::Core(e) => e.is_retriable(),
            _ => false,
        }
    }

    /// The domain error, if this wraps one.
    pub fn as_core(&self) -> Option<&TesseraError> {
        match self {
            Self::Core(e) => Some(e),
            _ => None,
        }
    }
}

impl From<RaftError> for ClusterError {
    fn from(e: RaftError) -> Self {
        ClusterError::Raft(Box::new(e))
    }
}

impl From<RaftError<ClientWriteError>> for ClusterError {
    fn from(e: RaftError<ClientWriteError>) -> Self {
        ClusterError::RaftWrite(Box::new(e))
    }
}

impl From<RaftError<InitializeError>> for ClusterError {
    fn from(e: RaftError<InitializeError>) -> Self {
        ClusterError::Initialize(Box::new(e))
    }
}

impl From<serde_json::Error> for ClusterError {
    fn from(e: serde_json::Error) -> Self {
        ClusterError::Serialization(e.to_string())
    }
}
