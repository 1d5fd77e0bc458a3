//! Core types for Tessera.
//!
//! This module provides the identifiers shared by every component:
//! - `ContainerId` / `BlockId`: storage container and block addressing
//! - `CommandId`: identity of one logical client command across retries
//! - `SnapshotId`: globally unique snapshot identity minted by the leader
//! - `ObjectId`: stable identity of a bucket key across renames

mod ids;

pub use ids::{BlockId, CommandId, ContainerId, ObjectId, SnapshotId};

/// Block commit sequence id stamped on `PutBlock`.
pub type Bcsid = u64;
