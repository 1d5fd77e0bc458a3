//! Explicit leadership context.
//!
//! Components never consult a global "who is leader" value. The cluster layer
//! observes consensus metrics and hands a `LeadershipContext` to every call that
//! is only legal on the leader.

use crate::error::{Result, TesseraError};
use serde::{Deserialize, Serialize};

/// A node's view of cluster leadership at one instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeadershipContext {
    /// The node holding this view.
    pub node_id: u64,
    /// The leader as known by this node.
    pub leader_id: Option<u64>,
    /// The consensus term the view was taken in.
    pub term: u64,
}

impl LeadershipContext {
    /// View of a node that currently leads `term`.
    #[must_use]
    pub const fn leader(node_id: u64, term: u64) -> Self {
        Self {
            node_id,
            leader_id: Some(node_id),
            term,
        }
    }

    /// View of a node following `leader_id` (if known).
    #[must_use]
    pub const fn follower(node_id: u64, leader_id: Option<u64>, term: u64) -> Self {
        Self {
            node_id,
            leader_id,
            term,
        }
    }

    /// Whether this node is the leader.
    #[must_use]
    pub fn is_leader(&self) -> bool {
        self.leader_id == Some(self.node_id)
    }

    /// Fail with `NotLeader` unless this node leads.
    pub fn require_leader(&self) -> Result<()> {
        if self.is_leader() {
            Ok(())
        } else {
            Err(TesseraError::NotLeader {
                leader: self.leader_id,
            })
        }
    }
}
