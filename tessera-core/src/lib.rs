//! Tessera Core Library
//!
//! Replication-independent logic of the Tessera metadata service.
//!
//! # Key Components
//!
//! - **Container**: idempotent container state machine; every command is
//!   applied at most once per replica no matter how often it is delivered
//! - **Snapshot**: leader-minted snapshot identities, the append-only snapshot
//!   table and the global / per-bucket snapshot chains
//! - **Diff**: deterministic checkpoint comparison and the asynchronous,
//!   deduplicated diff job engine
//! - **Leadership**: explicit leadership context passed into leader-only calls
//!
//! # Example
//!
//! ```ignore
//! use tessera_core::prelude::*;
//!
//! let containers = ContainerStateMachine::default();
//! let create = ContainerCommand::create(ContainerId::new(1));
//! let first = containers.apply(&create);
//! assert_eq!(containers.apply(&create), first);
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod container;
pub mod diff;
pub mod error;
pub mod leadership;
pub mod namespace;
pub mod prelude;
pub mod providers;
pub mod snapshot;
pub mod types;

pub use container::{ContainerCommand, ContainerState, ContainerStateMachine};
pub use diff::{SnapshotDiffEngine, SnapshotDiffRequest, SnapshotDiffResponse};
pub use error::{Result, TesseraError};
pub use leadership::LeadershipContext;
pub use snapshot::{SnapshotChainManager, SnapshotInfo, SnapshotManager, SnapshotRegistry};
pub use types::{BlockId, CommandId, ContainerId, ObjectId, SnapshotId};
