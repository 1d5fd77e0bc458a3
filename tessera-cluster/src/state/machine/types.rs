//! Types for cluster state management.

use crate::types::ClusterSnapshotMeta;
use serde::{Deserialize, Serialize};
use tessera_core::container::CommandResult;
use tessera_core::error::TesseraError;
use tessera_core::snapshot::{KeyInfo, SnapshotInfo};

/// Response from applying a command to the state machine.
///
/// Rejections are part of the replicated outcome: every replica produces the
/// same typed error for the same entry.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ClusterResponse {
    /// Whether the operation succeeded.
    pub success: bool,
    /// Rejection, if the command failed.
    pub error: Option<TesseraError>,
    /// What the command produced.
    pub data: Option<ResponseData>,
}

/// Payload of a successful response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResponseData {
    /// Outcome of a container command.
    Container(CommandResult),
    /// Whether a bucket was newly created.
    Bucket {
        /// False when the bucket already existed.
        created: bool,
    },
    /// Key after a put, delete or rename.
    Key(KeyInfo),
    /// Stored snapshot, with sequence and backpointers filled in.
    Snapshot(SnapshotInfo),
}

impl ClusterResponse {
    /// Create a success response.
    pub fn ok() -> Self {
        Self {
            success: true,
            error: None,
            data: None,
        }
    }

    /// Create an error response.
    pub fn err(error: TesseraError) -> Self {
        Self {
            success: false,
            error: Some(error),
            data: None,
        }
    }

    /// Create a success response with data.
    pub fn with_data(data: ResponseData) -> Self {
        Self {
            success: true,
            error: None,
            data: Some(data),
        }
    }

    /// Turn the response back into a result.
    pub fn into_result(self) -> Result<Option<ResponseData>, TesseraError> {
        match self.error {
            Some(error) => Err(error),
            None => Ok(self.data),
        }
    }
}

/// Stored snapshot data.
#[derive(Debug)]
pub struct StoredSnapshot {
    /// Snapshot metadata.
    pub meta: ClusterSnapshotMeta,
    /// Serialized state data.
    pub data: Vec<u8>,
}
