//! Command application logic.

use crate::command::ClusterCommand;
use tessera_core::error::Result;
use tessera_core::snapshot::SnapshotInfo;

use super::state::ClusterState;
use super::types::{ClusterResponse, ResponseData};

/// Apply a command committed at `log_index` to the cluster state.
///
/// Everything here depends only on the state and the entry, so every
/// replica produces the same response.
pub fn apply_command(state: &mut ClusterState, cmd: ClusterCommand, log_index: u64) -> ClusterResponse {
    let name = cmd.name();
    let container_id = cmd.container_id();
    let scope = cmd.bucket().map(|(volume, bucket)| format!("/{volume}/{bucket}"));
    let result = match cmd {
        ClusterCommand::Container(command) => state
            .containers
            .apply(&command)
            .map(ResponseData::Container),

        ClusterCommand::CreateBucket { volume, bucket } => {
            state.namespace.create_bucket(&volume, &bucket).map(|created| {
                if created {
                    tracing::info!(%volume, %bucket, "Created bucket");
                }
                ResponseData::Bucket { created }
            })
        }

        ClusterCommand::PutKey {
            volume,
            bucket,
            key,
            size,
            checksum,
        } => state
            .namespace
            .put_key(&volume, &bucket, &key, size, &checksum, log_index)
            .map(ResponseData::Key),

        ClusterCommand::DeleteKey { volume, bucket, key } => state
            .namespace
            .delete_key(&volume, &bucket, &key)
            .map(ResponseData::Key),

        ClusterCommand::RenameKey {
            volume,
            bucket,
            from,
            to,
        } => state
            .namespace
            .rename_key(&volume, &bucket, &from, &to, log_index)
            .map(ResponseData::Key),

        ClusterCommand::CreateSnapshot { info } => apply_create_snapshot(state, info, log_index),
    };

    match result {
        Ok(data) => ClusterResponse::with_data(data),
        Err(e) if e.is_structural() => {
            tracing::warn!(
                log_index,
                command = name,
                container_id = ?container_id,
                code = e.code(),
                error = %e,
                "Container command rejected"
            );
            ClusterResponse::err(e)
        }
        Err(e) => {
            tracing::debug!(
                log_index,
                command = name,
                bucket = scope.as_deref(),
                code = e.code(),
                error = %e,
                "Command rejected"
            );
            ClusterResponse::err(e)
        }
    }
}

fn apply_create_snapshot(
    state: &mut ClusterState,
    info: SnapshotInfo,
    log_index: u64,
) -> Result<ResponseData> {
    let checkpoint = state.namespace.checkpoint(&info.volume, &info.bucket)?;
    let info = state.snapshots.apply_create(info, log_index, checkpoint)?;
    tracing::info!(
        snapshot_id = %info.snapshot_id,
        table_key = %info.table_key(),
        creation_sequence = info.creation_sequence,
        objects = state
            .snapshots
            .checkpoint(&info.snapshot_id)
            .map(|c| c.len())
            .unwrap_or_default(),
        "Created snapshot"
    );
    Ok(ResponseData::Snapshot(info))
}
