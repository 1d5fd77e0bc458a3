//! Snapshot lifecycle.
//!
//! - [`SnapshotManager`] mints identities and names on the leader.
//! - [`SnapshotRegistry`] applies replicated creates: the append-only
//!   [`SnapshotTable`], per-snapshot [`BucketCheckpoint`]s and the
//!   [`SnapshotChainManager`] rebuilt from the table on restart.

mod chain;
mod checkpoint;
mod info;
mod manager;
pub mod name;
mod registry;
mod table;

pub use chain::{PathIter, SnapshotChainManager};
pub use checkpoint::{BucketCheckpoint, KeyInfo};
pub use info::{SnapshotInfo, SnapshotStatus, bucket_prefix, table_key};
pub use manager::SnapshotManager;
pub use registry::SnapshotRegistry;
pub use table::SnapshotTable;
