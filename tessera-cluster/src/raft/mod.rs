//! Raft integration module.
//!
//! This module provides the ClusterNode which ties together:
//! - Log storage (RaftLogStorage)
//! - State machine (ClusterStateMachine)
//! - Network (LocalRouter)
//! - The Raft instance itself

mod node;
mod storage;

pub use node::ClusterNode;
pub use storage::{LogStore, SEGMENT_MAX_ENTRIES};
