//! Container commands and their results.
//!
//! A command is immutable once issued. Every retry, network duplicate and log
//! replay of the same logical command carries the same `CommandId`, which is
//! what the idempotency ledger keys on.

use super::types::{BlockData, ChunkInfo, ContainerState};
use crate::types::{BlockId, CommandId, ContainerId};
use serde::{Deserialize, Serialize};

/// A command addressed to one container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerCommand {
    /// Identity shared by every delivery of this command.
    pub command_id: CommandId,
    /// Target container.
    pub container_id: ContainerId,
    /// What to do.
    pub kind: CommandKind,
}

/// The closed set of container operations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CommandKind {
    // ==================== Lifecycle ====================
    /// Create the container in OPEN.
    CreateContainer,

    /// Move an OPEN container to CLOSING.
    MarkContainerClosing,

    /// Seal the container.
    CloseContainer,

    /// Mark the container as corrupted.
    MarkContainerUnhealthy {
        /// What was detected.
        reason: String,
    },

    // ==================== Data ====================
    /// Store chunk bytes for a block.
    WriteChunk {
        /// Block owning the chunk.
        block_id: BlockId,
        /// Descriptor; length and checksum must match `data`.
        chunk: ChunkInfo,
        /// Chunk bytes.
        data: Vec<u8>,
        /// Replace existing content unconditionally.
        overwrite: bool,
    },

    /// Commit block metadata at a block commit sequence id.
    PutBlock {
        /// The block metadata to commit.
        block: BlockData,
    },
}

impl CommandKind {
    /// Get the command kind name for logging.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::CreateContainer => "CreateContainer",
            Self::MarkContainerClosing => "MarkContainerClosing",
            Self::CloseContainer => "CloseContainer",
            Self::MarkContainerUnhealthy { .. } => "MarkContainerUnhealthy",
            Self::WriteChunk { .. } => "WriteChunk",
            Self::PutBlock { .. } => "PutBlock",
        }
    }
}

impl ContainerCommand {
    /// Build a command with a fresh command id.
    pub fn new(container_id: ContainerId, kind: CommandKind) -> Self {
        Self {
            command_id: CommandId::new(),
            container_id,
            kind,
        }
    }

    /// `CreateContainer` for `container_id`.
    pub fn create(container_id: ContainerId) -> Self {
        Self::new(container_id, CommandKind::CreateContainer)
    }

    /// `WriteChunk` of `data` described by `chunk`.
    pub fn write_chunk(block_id: BlockId, chunk: ChunkInfo, data: Vec<u8>, overwrite: bool) -> Self {
        Self::new(
            block_id.container_id,
            CommandKind::WriteChunk {
                block_id,
                chunk,
                data,
                overwrite,
            },
        )
    }

    /// `PutBlock` committing `block`.
    pub fn put_block(block: BlockData) -> Self {
        Self::new(block.block_id.container_id, CommandKind::PutBlock { block })
    }

    /// `MarkContainerClosing` for `container_id`.
    pub fn mark_closing(container_id: ContainerId) -> Self {
        Self::new(container_id, CommandKind::MarkContainerClosing)
    }

    /// `CloseContainer` for `container_id`.
    pub fn close(container_id: ContainerId) -> Self {
        Self::new(container_id, CommandKind::CloseContainer)
    }

    /// `MarkContainerUnhealthy` for `container_id`.
    pub fn mark_unhealthy(container_id: ContainerId, reason: impl Into<String>) -> Self {
        Self::new(
            container_id,
            CommandKind::MarkContainerUnhealthy {
                reason: reason.into(),
            },
        )
    }

    /// Same command with an explicit command id.
    #[must_use]
    pub fn with_command_id(mut self, command_id: CommandId) -> Self {
        self.command_id = command_id;
        self
    }

    /// Get the command kind name for logging.
    #[must_use]
    pub fn name(&self) -> &'static str {
        self.kind.name()
    }
}

/// Successful outcome of a container command.
///
/// Carries no "was duplicate" marker: a replay returns exactly what the first
/// application returned.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CommandResult {
    /// Lifecycle command outcome.
    Container {
        /// The container.
        container_id: ContainerId,
        /// State after the command.
        state: ContainerState,
    },
    /// Chunk stored (or already present with identical content).
    Chunk {
        /// Block owning the chunk.
        block_id: BlockId,
        /// Descriptor of the stored chunk.
        chunk: ChunkInfo,
    },
    /// Block metadata as stored after the command.
    Block(BlockData),
}
