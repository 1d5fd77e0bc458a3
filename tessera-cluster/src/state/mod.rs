//! Raft state machine implementation.
//!
//! The state machine receives committed log entries (ClusterCommands) and
//! applies them to the replicated metadata: containers, bucket keys and the
//! snapshot table. All nodes apply the same commands in the same order,
//! ensuring consistent state.

mod machine;

pub use machine::{ClusterResponse, ClusterState, ClusterStateMachine, ResponseData};
