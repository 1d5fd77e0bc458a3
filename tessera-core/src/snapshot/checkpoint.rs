//! Frozen bucket contents captured by a snapshot.

use crate::types::{ObjectId, SnapshotId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One key of a bucket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyInfo {
    /// Stable identity, kept across renames.
    pub object_id: ObjectId,
    /// Current key name.
    pub name: String,
    /// Object size in bytes.
    pub size: u64,
    /// Content checksum.
    pub checksum: String,
    /// Log index of the last write to this key.
    pub update_index: u64,
}

impl KeyInfo {
    /// Whether size or checksum differ.
    #[must_use]
    pub fn content_differs(&self, other: &KeyInfo) -> bool {
        self.size != other.size || self.checksum != other.checksum
    }
}

/// Immutable copy of a bucket's keys at snapshot time, by object id.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BucketCheckpoint {
    /// Snapshot that owns this checkpoint.
    pub snapshot_id: Option<SnapshotId>,
    /// Keys ordered by object id.
    pub objects: BTreeMap<ObjectId, KeyInfo>,
}

impl BucketCheckpoint {
    /// Number of keys.
    #[must_use]
    pub fn len(&self) -> usize {
        self.objects.len()
    }

    /// Whether the bucket was empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }
}
