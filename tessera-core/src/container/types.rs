//! Container metadata types.

use crate::types::{Bcsid, BlockId, ContainerId};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;

/// Lifecycle state of a container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ContainerState {
    /// Accepting chunk writes and block commits.
    Open,
    /// Draining before close; new writes are rejected.
    Closing,
    /// Sealed. Terminal for writes.
    Closed,
    /// Corruption detected. Terminal.
    Unhealthy,
}

impl ContainerState {
    /// Whether new chunk data may be written.
    #[must_use]
    pub const fn accepts_writes(&self) -> bool {
        matches!(self, Self::Open)
    }
}

impl fmt::Display for ContainerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Open => "OPEN",
            Self::Closing => "CLOSING",
            Self::Closed => "CLOSED",
            Self::Unhealthy => "UNHEALTHY",
        };
        f.write_str(s)
    }
}

/// Hex-encoded SHA-256 of `data`.
#[must_use]
pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

/// Descriptor of one chunk of a block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkInfo {
    /// Chunk name, unique within its block.
    pub chunk_name: String,
    /// Offset of the chunk within the block.
    pub offset: u64,
    /// Length in bytes.
    pub len: u64,
    /// Hex SHA-256 of the chunk bytes.
    pub checksum: String,
}

impl ChunkInfo {
    /// Describe `data` as a chunk at `offset`.
    pub fn for_data(chunk_name: impl Into<String>, offset: u64, data: &[u8]) -> Self {
        Self {
            chunk_name: chunk_name.into(),
            offset,
            len: data.len() as u64,
            checksum: sha256_hex(data),
        }
    }

    /// Same offset, length and checksum.
    #[must_use]
    pub fn same_content(&self, other: &ChunkInfo) -> bool {
        self.offset == other.offset && self.len == other.len && self.checksum == other.checksum
    }
}

/// Committed block metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockData {
    /// The block.
    pub block_id: BlockId,
    /// Block commit sequence id of this version.
    pub bcsid: Bcsid,
    /// Chunks making up the block, in offset order.
    pub chunks: Vec<ChunkInfo>,
}

impl BlockData {
    /// Create block metadata.
    pub fn new(block_id: BlockId, bcsid: Bcsid, chunks: Vec<ChunkInfo>) -> Self {
        Self {
            block_id,
            bcsid,
            chunks,
        }
    }

    /// Sum of chunk lengths.
    #[must_use]
    pub fn size(&self) -> u64 {
        self.chunks.iter().map(|c| c.len).sum()
    }
}

/// Chunk bytes together with their descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredChunk {
    /// Descriptor as written.
    pub info: ChunkInfo,
    /// Chunk bytes.
    pub data: Vec<u8>,
}

/// Counters of side effects performed on a container.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerStats {
    /// Number of chunk writes that stored bytes.
    pub chunk_writes: u64,
    /// Total bytes stored by those writes.
    pub bytes_written: u64,
    /// Number of block commits that changed metadata.
    pub block_commits: u64,
}

/// A storage container as held by one replica.
///
/// Maps are ordered so that the serialized form is identical on every
/// replica that applied the same log prefix.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Container {
    /// Container identity.
    pub id: ContainerId,
    /// Lifecycle state.
    pub state: ContainerState,
    /// Highest block commit sequence id committed into this container.
    pub bcsid: Bcsid,
    /// Reason recorded when the container became unhealthy.
    pub unhealthy_reason: Option<String>,
    /// Committed blocks by container-local id.
    pub blocks: BTreeMap<u64, BlockData>,
    /// Stored chunks by container-local block id, then chunk name.
    pub chunks: BTreeMap<u64, BTreeMap<String, StoredChunk>>,
    /// Side-effect counters.
    pub stats: ContainerStats,
}

impl Container {
    /// A fresh, empty, open container.
    pub fn new(id: ContainerId) -> Self {
        Self {
            id,
            state: ContainerState::Open,
            bcsid: 0,
            unhealthy_reason: None,
            blocks: BTreeMap::new(),
            chunks: BTreeMap::new(),
            stats: ContainerStats::default(),
        }
    }

    /// Look up a committed block.
    pub fn block(&self, block_id: &BlockId) -> Option<&BlockData> {
        self.blocks.get(&block_id.local_id)
    }

    /// Look up a stored chunk.
    pub fn chunk(&self, block_id: &BlockId, chunk_name: &str) -> Option<&StoredChunk> {
        self.chunks
            .get(&block_id.local_id)
            .and_then(|chunks| chunks.get(chunk_name))
    }

    /// Number of stored chunks across all blocks.
    #[must_use]
    pub fn chunk_count(&self) -> usize {
        self.chunks.values().map(BTreeMap::len).sum()
    }

    /// Metadata view used for cross-replica comparison (no chunk bytes).
    pub fn metadata(&self) -> ContainerMetadata {
        ContainerMetadata {
            id: self.id,
            state: self.state,
            bcsid: self.bcsid,
            unhealthy_reason: self.unhealthy_reason.clone(),
            blocks: self.blocks.values().cloned().collect(),
            chunks: self
                .chunks
                .iter()
                .flat_map(|(local, chunks)| {
                    chunks.values().map(move |c| (*local, c.info.clone()))
                })
                .collect(),
        }
    }
}

/// Container metadata without chunk bytes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerMetadata {
    /// Container identity.
    pub id: ContainerId,
    /// Lifecycle state.
    pub state: ContainerState,
    /// Highest committed BCSID.
    pub bcsid: Bcsid,
    /// Reason for an unhealthy state.
    pub unhealthy_reason: Option<String>,
    /// Committed blocks in id order.
    pub blocks: Vec<BlockData>,
    /// Chunk descriptors as (local block id, descriptor) in key order.
    pub chunks: Vec<(u64, ChunkInfo)>,
}
