//! Prelude for convenient imports.
//!
//! This module re-exports the most commonly used types and traits.
//!
//! # Example
//!
//! ```ignore
//! use tessera_core::prelude::*;
//! ```

// Core types
pub use crate::types::{Bcsid, BlockId, CommandId, ContainerId, ObjectId, SnapshotId};

// Error handling
pub use crate::error::{Result, TesseraError};

// Leadership
pub use crate::leadership::LeadershipContext;

// Containers
pub use crate::container::{
    BlockData, ChunkInfo, CommandKind, CommandResult, ContainerCommand, ContainerState,
    ContainerStateMachine, LedgerConfig, ScrubReport,
};

// Snapshots
pub use crate::namespace::KeyNamespace;
pub use crate::snapshot::{
    BucketCheckpoint, SnapshotChainManager, SnapshotInfo, SnapshotManager, SnapshotRegistry,
    SnapshotTable,
};

// Diffs
pub use crate::diff::{
    DiffEngineConfig, DiffEntry, DiffJobKey, DiffJobStore, DiffOptions, DiffType,
    FileDiffJobStore, JobStatus, MemoryDiffJobStore, SnapshotCatalog, SnapshotDiffEngine,
    SnapshotDiffReport, SnapshotDiffRequest, SnapshotDiffResponse,
};

// Providers
pub use crate::providers::{Clock, IdProvider, MockClock, RandomIds, SequentialIds, SystemClock};
