//! Snapshot metadata record.

use crate::types::SnapshotId;
use serde::{Deserialize, Serialize};

/// Lifecycle status of a snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SnapshotStatus {
    /// Live and readable.
    Active,
}

/// Metadata of one snapshot.
///
/// The leader fills identity, name and creation time when the create command
/// is issued. `creation_sequence` and the two previous-id backpointers are set
/// while the command is applied, from the log position and the chain heads at
/// that point, so every replica computes the same values.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotInfo {
    /// Globally unique identity.
    pub snapshot_id: SnapshotId,
    /// Name, unique within its bucket.
    pub name: String,
    /// Volume of the snapshotted bucket.
    pub volume: String,
    /// Snapshotted bucket.
    pub bucket: String,
    /// Wall-clock creation time on the leader, in ms since the epoch.
    pub creation_time_ms: u64,
    /// Log index of the applied create entry.
    pub creation_sequence: u64,
    /// Previous snapshot in the cluster-wide chain.
    pub global_prev_id: Option<SnapshotId>,
    /// Previous snapshot of the same bucket.
    pub path_prev_id: Option<SnapshotId>,
    /// Lifecycle status.
    pub status: SnapshotStatus,
}

impl SnapshotInfo {
    /// A freshly minted, not yet linked snapshot.
    pub fn new(
        snapshot_id: SnapshotId,
        volume: impl Into<String>,
        bucket: impl Into<String>,
        name: impl Into<String>,
        creation_time_ms: u64,
    ) -> Self {
        Self {
            snapshot_id,
            name: name.into(),
            volume: volume.into(),
            bucket: bucket.into(),
            creation_time_ms,
            creation_sequence: 0,
            global_prev_id: None,
            path_prev_id: None,
            status: SnapshotStatus::Active,
        }
    }

    /// Metadata table key, `/{volume}/{bucket}/{name}`.
    #[must_use]
    pub fn table_key(&self) -> String {
        table_key(&self.volume, &self.bucket, &self.name)
    }

    /// Whether this snapshot belongs to `volume`/`bucket`.
    #[must_use]
    pub fn is_in(&self, volume: &str, bucket: &str) -> bool {
        self.volume == volume && self.bucket == bucket
    }
}

/// Metadata table key of a snapshot.
#[must_use]
pub fn table_key(volume: &str, bucket: &str, name: &str) -> String {
    format!("{}{}", bucket_prefix(volume, bucket), name)
}

/// Iteration prefix covering every snapshot of a bucket.
///
/// The trailing slash keeps `/vol/b` from matching `/vol/bucket2`.
#[must_use]
pub fn bucket_prefix(volume: &str, bucket: &str) -> String {
    format!("/{}/{}/", volume, bucket)
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn table_key_format() {
        let info = SnapshotInfo::new(SnapshotId::from_uuid(Uuid::nil()), "vol1", "bucket1", "snap1", 0);
        assert_eq!(info.table_key(), "/vol1/bucket1/snap1");
        assert!(info.table_key().starts_with(&bucket_prefix("vol1", "bucket1")));
        assert!(!info.table_key().starts_with(&bucket_prefix("vol1", "bucket")));
    }
}
