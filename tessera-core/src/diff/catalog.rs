//! Read access to applied snapshot state.

use crate::error::Result;
use crate::snapshot::{BucketCheckpoint, SnapshotInfo, SnapshotRegistry};
use crate::types::SnapshotId;
use parking_lot::RwLock;

/// What the diff engine needs to know about snapshots.
///
/// Implemented over whatever holds the replica's applied state. Reads must be
/// consistent with the committed log prefix that state reflects.
pub trait SnapshotCatalog: Send + Sync {
    /// Snapshot by bucket and name.
    fn resolve(&self, volume: &str, bucket: &str, name: &str) -> Result<SnapshotInfo>;

    /// Checkpoint captured by a snapshot.
    fn checkpoint(&self, snapshot_id: &SnapshotId) -> Result<BucketCheckpoint>;
}

impl SnapshotCatalog for RwLock<SnapshotRegistry> {
    fn resolve(&self, volume: &str, bucket: &str, name: &str) -> Result<SnapshotInfo> {
        self.read().resolve(volume, bucket, name)
    }

    fn checkpoint(&self, snapshot_id: &SnapshotId) -> Result<BucketCheckpoint> {
        self.read().checkpoint(snapshot_id)
    }
}
