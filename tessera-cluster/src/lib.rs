//! Replicated metadata service for Tessera.
//!
//! This crate replicates container commands, bucket keys and snapshot
//! metadata across nodes using the Raft consensus algorithm via OpenRaft,
//! and runs snapshot diff jobs on the leader.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    Tessera Cluster                          │
//! │                                                             │
//! │  ┌─────────────┐   ┌─────────────┐   ┌─────────────┐       │
//! │  │   Node 1    │   │   Node 2    │   │   Node 3    │       │
//! │  │  (Leader)   │   │ (Follower)  │   │ (Follower)  │       │
//! │  │ ┌─────────┐ │   │ ┌─────────┐ │   │ ┌─────────┐ │       │
//! │  │ │  Raft   │◄┼───┼─┤  Raft   │◄┼───┼─┤  Raft   │ │       │
//! │  │ └────┬────┘ │   │ └────┬────┘ │   │ └────┬────┘ │       │
//! │  │ ┌────▼────┐ │   │ ┌────▼────┐ │   │ ┌────▼────┐ │       │
//! │  │ │  State  │ │   │ │  State  │ │   │ │  State  │ │       │
//! │  │ │ Machine │ │   │ │ Machine │ │   │ │ Machine │ │       │
//! │  │ └─────────┘ │   │ └─────────┘ │   │ └─────────┘ │       │
//! │  │ ┌─────────┐ │   │             │   │             │       │
//! │  │ │  Diff   │ │   │  (idle)     │   │  (idle)     │       │
//! │  │ │ Engine  │ │   │             │   │             │       │
//! │  │ └─────────┘ │   │             │   │             │       │
//! │  └─────────────┘   └─────────────┘   └─────────────┘       │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use tessera_cluster::{ClusterConfig, ClusterNode, LocalRouter};
//!
//! let router = LocalRouter::new();
//! let config = ClusterConfig::builder()
//!     .node_id(1)
//!     .data_dir("/var/lib/tessera/1")
//!     .build()?;
//!
//! let node = ClusterNode::start(config, &router).await?;
//! node.initialize().await?;
//!
//! node.create_bucket("vol", "photos").await?;
//! let snap = node.create_snapshot("vol", "photos", "").await?;
//! ```

pub mod command;
pub mod config;
mod durable;
pub mod error;
pub mod network;
pub mod raft;
pub mod state;
pub mod types;

// Re-export main types
pub use command::ClusterCommand;
pub use config::ClusterConfig;
pub use error::{ClusterError, ClusterResult};
pub use network::LocalRouter;
pub use raft::ClusterNode;
pub use state::{ClusterResponse, ClusterState, ClusterStateMachine, ResponseData};
pub use types::{ClusterNodeId, TypeConfig};
