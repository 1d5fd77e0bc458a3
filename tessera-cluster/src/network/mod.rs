//! In-process network for Raft RPC.
//!
//! Every node of a process registers its Raft handle with a shared
//! [`LocalRouter`]; RPCs are delivered by calling the target's handle
//! directly. Unknown or isolated targets report `Unreachable`, which OpenRaft
//! treats like a dropped connection and retries with backoff.

use crate::error::{ClusterError, RPCError};
use crate::types::{ClusterNodeId, ClusterRaft, TypeConfig};
use openraft::BasicNode;
use openraft::error::{InstallSnapshotError, RemoteError, Unreachable};
use openraft::network::{RPCOption, RaftNetwork, RaftNetworkFactory};
use openraft::raft::{
    AppendEntriesRequest, AppendEntriesResponse, InstallSnapshotRequest, InstallSnapshotResponse,
    VoteRequest, VoteResponse,
};
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

#[derive(Default)]
struct RouterInner {
    nodes: HashMap<ClusterNodeId, ClusterRaft>,
    isolated: HashSet<ClusterNodeId>,
}

/// Routes Raft RPCs and forwarded client writes between nodes of one process.
#[derive(Clone, Default)]
pub struct LocalRouter {
    inner: Arc<RwLock<RouterInner>>,
}

impl std::fmt::Debug for LocalRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.read();
        let mut nodes: Vec<_> = inner.nodes.keys().copied().collect();
        nodes.sort_unstable();
        f.debug_struct("LocalRouter")
            .field("nodes", &nodes)
            .field("isolated", &inner.isolated)
            .finish()
    }
}

impl LocalRouter {
    /// Create an empty router.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make a node reachable.
    pub fn register(&self, node_id: ClusterNodeId, raft: ClusterRaft) {
        self.inner.write().nodes.insert(node_id, raft);
        tracing::debug!(node_id, "Registered node with router");
    }

    /// Remove a node, e.g. when it shuts down.
    pub fn unregister(&self, node_id: ClusterNodeId) {
        self.inner.write().nodes.remove(&node_id);
        tracing::debug!(node_id, "Unregistered node from router");
    }

    /// Cut a node off: RPCs to and from it fail as unreachable.
    pub fn isolate(&self, node_id: ClusterNodeId) {
        self.inner.write().isolated.insert(node_id);
    }

    /// Undo [`LocalRouter::isolate`].
    pub fn heal(&self, node_id: ClusterNodeId) {
        self.inner.write().isolated.remove(&node_id);
    }

    /// Raft handle of a reachable node.
    pub fn raft(&self, node_id: ClusterNodeId) -> Option<ClusterRaft> {
        let inner = self.inner.read();
        if inner.isolated.contains(&node_id) {
            return None;
        }
        inner.nodes.get(&node_id).cloned()
    }

    /// Raft handle of `target` as seen from `source`.
    pub fn route(
        &self,
        source: ClusterNodeId,
        target: ClusterNodeId,
    ) -> Result<ClusterRaft, ClusterError> {
        let inner = self.inner.read();
        if inner.isolated.contains(&source) || inner.isolated.contains(&target) {
            return Err(ClusterError::Unreachable(target));
        }
        inner
            .nodes
            .get(&target)
            .cloned()
            .ok_or(ClusterError::Unreachable(target))
    }

    /// Network factory for the node `source`.
    pub fn network(&self, source: ClusterNodeId) -> LocalNetwork {
        LocalNetwork {
            source,
            router: self.clone(),
        }
    }
}

/// Network factory handed to one node's Raft instance.
#[derive(Clone)]
pub struct LocalNetwork {
    source: ClusterNodeId,
    router: LocalRouter,
}

impl RaftNetworkFactory<TypeConfig> for LocalNetwork {
    type Network = LocalConnection;

    async fn new_client(&mut self, target: ClusterNodeId, _node: &BasicNode) -> Self::Network {
        LocalConnection {
            source: self.source,
            target,
            router: self.router.clone(),
        }
    }
}

/// A connection from one node to another.
pub struct LocalConnection {
    source: ClusterNodeId,
    target: ClusterNodeId,
    router: LocalRouter,
}

impl LocalConnection {
    fn target<E: std::error::Error>(&self) -> Result<ClusterRaft, RPCError<E>> {
        self.router
            .route(self.source, self.target)
            .map_err(|e| openraft::error::RPCError::Unreachable(Unreachable::new(&e)))
    }
}

impl RaftNetwork<TypeConfig> for LocalConnection {
    async fn append_entries(
        &mut self,
        req: AppendEntriesRequest<TypeConfig>,
        _option: RPCOption,
    ) -> Result<AppendEntriesResponse<ClusterNodeId>, RPCError> {
        let raft = self.target()?;
        raft.append_entries(req)
            .await
            .map_err(|e| openraft::error::RPCError::RemoteError(RemoteError::new(self.target, e)))
    }

    async fn install_snapshot(
        &mut self,
        req: InstallSnapshotRequest<TypeConfig>,
        _option: RPCOption,
    ) -> Result<InstallSnapshotResponse<ClusterNodeId>, RPCError<InstallSnapshotError>> {
        let raft = self.target()?;
        raft.install_snapshot(req)
            .await
            .map_err(|e| openraft::error::RPCError::RemoteError(RemoteError::new(self.target, e)))
    }

    async fn vote(
        &mut self,
        req: VoteRequest<ClusterNodeId>,
        _option: RPCOption,
    ) -> Result<VoteResponse<ClusterNodeId>, RPCError> {
        let raft = self.target()?;
        raft.vote(req)
            .await
            .map_err(|e| openraft::error::RPCError::RemoteError(RemoteError::new(self.target, e)))
    }
}
