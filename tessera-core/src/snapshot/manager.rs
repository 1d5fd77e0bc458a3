//! Leader-side snapshot minting.

use super::info::SnapshotInfo;
use super::name::{generated_name, unique_name, validate_bucket_path, validate_name};
use super::registry::SnapshotRegistry;
use crate::error::{Result, TesseraError};
use crate::leadership::LeadershipContext;
use crate::providers::{Clock, IdProvider, RandomIds, SystemClock};
use crate::types::SnapshotId;
use std::sync::Arc;

/// Mints snapshot identities on the leader.
///
/// The id, the name (generated when the caller gave none) and the creation
/// time are decided here, once, and travel inside the replicated create
/// entry. Replicas never derive any of them.
#[derive(Clone)]
pub struct SnapshotManager {
    clock: Arc<dyn Clock>,
    ids: Arc<dyn IdProvider>,
}

impl std::fmt::Debug for SnapshotManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SnapshotManager").finish_non_exhaustive()
    }
}

impl Default for SnapshotManager {
    fn default() -> Self {
        Self::new(Arc::new(SystemClock), Arc::new(RandomIds))
    }
}

impl SnapshotManager {
    /// Create a manager over the given providers.
    pub fn new(clock: Arc<dyn Clock>, ids: Arc<dyn IdProvider>) -> Self {
        Self { clock, ids }
    }

    /// Prepare the `SnapshotInfo` to replicate for a create request.
    ///
    /// Fails with `NotLeader` off the leader, with `InvalidBucketName` for a
    /// malformed volume or bucket and with `SnapshotChainCorrupted` while the
    /// local chain is corrupted.
    pub fn prepare(
        &self,
        ctx: &LeadershipContext,
        registry: &SnapshotRegistry,
        volume: &str,
        bucket: &str,
        name: &str,
    ) -> Result<SnapshotInfo> {
        ctx.require_leader()?;
        validate_bucket_path(volume, bucket)?;
        registry.chain().ensure_valid()?;

        let name = if name.is_empty() {
            let base = generated_name(self.clock.now_utc());
            unique_name(&base, |candidate| {
                registry.name_taken(volume, bucket, candidate)
            })
        } else {
            validate_name(name)?;
            if registry.name_taken(volume, bucket, name) {
                return Err(TesseraError::SnapshotExists {
                    table_key: super::info::table_key(volume, bucket, name),
                });
            }
            name.to_string()
        };

        let info = SnapshotInfo::new(
            SnapshotId::from_uuid(self.ids.mint()),
            volume,
            bucket,
            name,
            self.clock.now_millis(),
        );
        tracing::info!(
            snapshot_id = %info.snapshot_id,
            table_key = %info.table_key(),
            term = ctx.term,
            "Minted snapshot"
        );
        Ok(info)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::{MockClock, SequentialIds};
    use crate::snapshot::BucketCheckpoint;
    use uuid::Uuid;

    fn manager() -> SnapshotManager {
        SnapshotManager::new(
            Arc::new(MockClock::fixed("2024-01-15T10:30:00Z")),
            Arc::new(SequentialIds::new()),
        )
    }

    #[test]
    fn followers_cannot_mint() {
        let err = manager()
            .prepare(
                &LeadershipContext::follower(2, Some(1), 3),
                &SnapshotRegistry::new(),
                "vol",
                "b",
                "snap",
            )
            .unwrap_err();
        assert_eq!(err, TesseraError::NotLeader { leader: Some(1) });
    }

    #[test]
    fn generated_names_avoid_collisions() {
        let mgr = manager();
        let ctx = LeadershipContext::leader(1, 1);
        let mut reg = SnapshotRegistry::new();

        let first = mgr.prepare(&ctx, &reg, "vol", "b", "").unwrap();
        assert_eq!(first.name, "s20240115-103000.000");
        reg.apply_create(first, 1, BucketCheckpoint::default()).unwrap();

        // Same clock reading, so the generated base collides.
        let second = mgr.prepare(&ctx, &reg, "vol", "b", "").unwrap();
        assert_eq!(second.name, "s20240115-103000.000-1");
        assert_ne!(second.snapshot_id.as_uuid(), Uuid::nil());
    }

    #[test]
    fn explicit_names_are_checked() {
        let mgr = manager();
        let ctx = LeadershipContext::leader(1, 1);
        let mut reg = SnapshotRegistry::new();
        assert_eq!(
            mgr.prepare(&ctx, &reg, "vol", "b", "Bad_Name").unwrap_err().code(),
            "E204"
        );
        assert_eq!(
            mgr.prepare(&ctx, &reg, "vol", "b/x", "snap").unwrap_err().code(),
            "E208"
        );
        let info = mgr.prepare(&ctx, &reg, "vol", "b", "snap").unwrap();
        reg.apply_create(info, 1, BucketCheckpoint::default()).unwrap();
        assert_eq!(
            mgr.prepare(&ctx, &reg, "vol", "b", "snap").unwrap_err().code(),
            "E201"
        );
    }
}
