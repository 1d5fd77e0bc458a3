//! Snapshot chain manager.
//!
//! Keeps two orderings over snapshots on every replica: the cluster-wide
//! creation chain and one chain per bucket. Both are stored in a single arena
//! of nodes whose previous links are arena indices, so validation is a
//! bounded pass over an array and rebuilding from the durable table is a
//! load-then-link pass.

use super::info::SnapshotInfo;
use super::table::SnapshotTable;
use crate::error::{Result, TesseraError};
use crate::types::SnapshotId;
use std::collections::HashMap;

/// A previous-snapshot link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Link {
    /// First snapshot of its chain.
    Head,
    /// Arena index of the previous node.
    Resolved(usize),
    /// Points at an id that is not in the arena.
    Dangling(SnapshotId),
}

#[derive(Debug, Clone)]
struct ChainNode {
    info: SnapshotInfo,
    global_prev: Link,
    path_prev: Link,
}

type PathKey = (String, String);

/// Global and per-bucket snapshot chains of one replica.
#[derive(Debug, Clone, Default)]
pub struct SnapshotChainManager {
    nodes: Vec<ChainNode>,
    index: HashMap<SnapshotId, usize>,
    global_latest: Option<usize>,
    path_latest: HashMap<PathKey, usize>,
    /// First inconsistency seen while linking (fork or reordering).
    link_fault: Option<String>,
}

impl SnapshotChainManager {
    /// Create an empty chain.
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild both chains from the persisted table.
    ///
    /// Nodes are loaded in creation-sequence order and links resolved by id
    /// afterwards, so a backpointer to a missing or later snapshot shows up as
    /// corruption instead of being silently repaired.
    pub fn rebuild(table: &SnapshotTable) -> Self {
        let mut infos: Vec<SnapshotInfo> = table.iter().cloned().collect();
        infos.sort_by_key(|info| info.creation_sequence);

        let mut chain = Self::new();
        for info in infos {
            let idx = chain.nodes.len();
            chain.index.insert(info.snapshot_id, idx);
            chain.global_latest = Some(idx);
            chain
                .path_latest
                .insert((info.volume.clone(), info.bucket.clone()), idx);
            chain.nodes.push(ChainNode {
                info,
                global_prev: Link::Head,
                path_prev: Link::Head,
            });
        }
        for idx in 0..chain.nodes.len() {
            let global = chain.resolve(chain.nodes[idx].info.global_prev_id);
            let path = chain.resolve(chain.nodes[idx].info.path_prev_id);
            chain.nodes[idx].global_prev = global;
            chain.nodes[idx].path_prev = path;
        }

        if let Err(cause) = chain.validate() {
            tracing::warn!(%cause, snapshots = chain.len(), "Snapshot chain corrupted after rebuild");
        } else {
            tracing::info!(snapshots = chain.len(), "Snapshot chain rebuilt");
        }
        chain
    }

    fn resolve(&self, id: Option<SnapshotId>) -> Link {
        match id {
            None => Link::Head,
            Some(id) => self
                .index
                .get(&id)
                .map_or(Link::Dangling(id), |idx| Link::Resolved(*idx)),
        }
    }

    /// Link an applied snapshot as the newest of both of its chains.
    ///
    /// The backpointers in `info` must name the current heads; anything else
    /// is recorded as a link fault and reported by [`Self::is_chain_corrupted`].
    pub fn link(&mut self, info: SnapshotInfo) -> Result<()> {
        if let Some(existing) = self.index.get(&info.snapshot_id) {
            if self.nodes[*existing].info == info {
                return Ok(());
            }
            return Err(TesseraError::SnapshotExists {
                table_key: info.table_key(),
            });
        }

        let path_key = (info.volume.clone(), info.bucket.clone());
        let expected_global = self.global_latest.map(|idx| self.nodes[idx].info.snapshot_id);
        let expected_path = self
            .path_latest
            .get(&path_key)
            .map(|idx| self.nodes[*idx].info.snapshot_id);

        if self.link_fault.is_none() {
            if info.global_prev_id != expected_global {
                self.link_fault = Some(format!(
                    "snapshot {} links to global previous {:?}, head is {:?}",
                    info.snapshot_id, info.global_prev_id, expected_global
                ));
            } else if info.path_prev_id != expected_path {
                self.link_fault = Some(format!(
                    "snapshot {} links to path previous {:?}, head is {:?}",
                    info.snapshot_id, info.path_prev_id, expected_path
                ));
            }
        }

        let node = ChainNode {
            global_prev: self.resolve(info.global_prev_id),
            path_prev: self.resolve(info.path_prev_id),
            info,
        };
        let idx = self.nodes.len();
        self.index.insert(node.info.snapshot_id, idx);
        self.nodes.push(node);
        self.global_latest = Some(idx);
        self.path_latest.insert(path_key, idx);
        Ok(())
    }

    /// Whether any chain property is violated.
    pub fn is_chain_corrupted(&self) -> bool {
        self.validate().is_err()
    }

    /// Description of the first violated property, if any.
    pub fn corruption_cause(&self) -> Option<String> {
        self.validate().err()
    }

    /// Fail with `SnapshotChainCorrupted` if the chain is corrupted.
    pub fn ensure_valid(&self) -> Result<()> {
        self.validate()
            .map_err(|cause| TesseraError::SnapshotChainCorrupted { cause })
    }

    /// Bounded validation pass.
    ///
    /// Checks that every link resolves, points to a node of the right bucket
    /// with a smaller creation sequence, and that walking any chain from its
    /// head terminates within `len()` steps and covers the expected nodes.
    fn validate(&self) -> std::result::Result<(), String> {
        if let Some(fault) = &self.link_fault {
            return Err(fault.clone());
        }

        for node in &self.nodes {
            let info = &node.info;
            for (kind, link) in [("global", node.global_prev), ("path", node.path_prev)] {
                match link {
                    Link::Head => {}
                    Link::Dangling(id) => {
                        return Err(format!(
                            "{kind} previous {id} of snapshot {} does not exist",
                            info.snapshot_id
                        ));
                    }
                    Link::Resolved(prev) => {
                        let prev = &self.nodes[prev].info;
                        if prev.creation_sequence >= info.creation_sequence {
                            return Err(format!(
                                "{kind} previous {} of snapshot {} is not older ({} >= {})",
                                prev.snapshot_id,
                                info.snapshot_id,
                                prev.creation_sequence,
                                info.creation_sequence
                            ));
                        }
                        if kind == "path" && !prev.is_in(&info.volume, &info.bucket) {
                            return Err(format!(
                                "path previous {} of snapshot {} is in another bucket",
                                prev.snapshot_id, info.snapshot_id
                            ));
                        }
                    }
                }
            }
        }

        let global_len = self.walk(self.global_latest, |n| n.global_prev)?;
        if global_len != self.nodes.len() {
            return Err(format!(
                "global chain reaches {} of {} snapshots",
                global_len,
                self.nodes.len()
            ));
        }

        let mut path_total = 0;
        for head in self.path_latest.values() {
            path_total += self.walk(Some(*head), |n| n.path_prev)?;
        }
        if path_total != self.nodes.len() {
            return Err(format!(
                "bucket chains reach {} of {} snapshots",
                path_total,
                self.nodes.len()
            ));
        }
        Ok(())
    }

    /// Length of the chain starting at `head`, failing on a cycle.
    fn walk(
        &self,
        head: Option<usize>,
        prev: impl Fn(&ChainNode) -> Link,
    ) -> std::result::Result<usize, String> {
        let mut steps = 0;
        let mut cursor = head;
        while let Some(idx) = cursor {
            steps += 1;
            if steps > self.nodes.len() {
                return Err(format!(
                    "cycle through snapshot {}",
                    self.nodes[idx].info.snapshot_id
                ));
            }
            cursor = match prev(&self.nodes[idx]) {
                Link::Resolved(p) => Some(p),
                Link::Head | Link::Dangling(_) => None,
            };
        }
        Ok(steps)
    }

    /// Newest snapshot in the cluster.
    pub fn latest_global(&self) -> Option<&SnapshotInfo> {
        self.global_latest.map(|idx| &self.nodes[idx].info)
    }

    /// Newest snapshot of a bucket.
    pub fn latest_path(&self, volume: &str, bucket: &str) -> Option<&SnapshotInfo> {
        self.path_latest
            .get(&(volume.to_string(), bucket.to_string()))
            .map(|idx| &self.nodes[*idx].info)
    }

    /// Snapshot by id.
    pub fn get(&self, id: &SnapshotId) -> Option<&SnapshotInfo> {
        self.index.get(id).map(|idx| &self.nodes[*idx].info)
    }

    /// Previous snapshot in the global chain.
    pub fn previous_global(&self, id: &SnapshotId) -> Result<Option<&SnapshotInfo>> {
        self.previous(id, |n| n.global_prev)
    }

    /// Previous snapshot of the same bucket.
    pub fn previous_path(&self, id: &SnapshotId) -> Result<Option<&SnapshotInfo>> {
        self.previous(id, |n| n.path_prev)
    }

    fn previous(
        &self,
        id: &SnapshotId,
        prev: impl Fn(&ChainNode) -> Link,
    ) -> Result<Option<&SnapshotInfo>> {
        let idx = self
            .index
            .get(id)
            .ok_or_else(|| TesseraError::SnapshotNotFound {
                table_key: id.to_string(),
            })?;
        match prev(&self.nodes[*idx]) {
            Link::Head => Ok(None),
            Link::Resolved(p) => Ok(Some(&self.nodes[p].info)),
            Link::Dangling(missing) => Err(TesseraError::SnapshotChainCorrupted {
                cause: format!("previous {missing} of snapshot {id} does not exist"),
            }),
        }
    }

    /// Snapshots of a bucket, newest first.
    pub fn path_iter(&self, volume: &str, bucket: &str) -> PathIter<'_> {
        let start = self
            .path_latest
            .get(&(volume.to_string(), bucket.to_string()))
            .copied();
        PathIter {
            chain: self,
            cursor: start,
            remaining: self.nodes.len(),
        }
    }

    /// Number of linked snapshots.
    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Whether no snapshot is linked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

/// Newest-first walk of one bucket chain.
///
/// Stops after `len()` steps even if the links form a cycle.
pub struct PathIter<'a> {
    chain: &'a SnapshotChainManager,
    cursor: Option<usize>,
    remaining: usize,
}

impl<'a> Iterator for PathIter<'a> {
    type Item = &'a SnapshotInfo;

    fn next(&mut self) -> Option<Self::Item> {
        let idx = self.cursor?;
        if self.remaining == 0 {
            return None;
        }
        self.remaining -= 1;
        let node = &self.chain.nodes[idx];
        self.cursor = match node.path_prev {
            Link::Resolved(p) => Some(p),
            Link::Head | Link::Dangling(_) => None,
        };
        Some(&node.info)
    }
}
