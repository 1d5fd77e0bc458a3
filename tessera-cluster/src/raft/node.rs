//! ClusterNode - the main entry point for cluster operations.

use crate::command::ClusterCommand;
use crate::config::ClusterConfig;
use crate::error::{ClusterError, ClusterResult};
use crate::network::LocalRouter;
use crate::raft::storage::LogStore;
use crate::state::{ClusterResponse, ClusterStateMachine, ResponseData};
use crate::types::{
    ClusterMetrics, ClusterNodeId, ClusterRaft, ClusterRaftWriteError, forward_target, member,
};
use openraft::error::{CheckIsLeaderError, ClientWriteError, RaftError};
use openraft::{Config, Raft};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tessera_core::container::{CommandResult, ContainerCommand, ScrubReport};
use tessera_core::diff::{
    DiffJobSummary, FileDiffJobStore, JobStatus, SnapshotCatalog, SnapshotDiffEngine,
    SnapshotDiffRequest, SnapshotDiffResponse,
};
use tessera_core::error::TesseraError;
use tessera_core::leadership::LeadershipContext;
use tessera_core::providers::{Clock, IdProvider, RandomIds, SystemClock};
use tessera_core::snapshot::{KeyInfo, SnapshotInfo, SnapshotManager};
use tessera_core::types::ContainerId;
use tokio::sync::{Mutex, oneshot, watch};
use tokio::task::JoinHandle;

/// How often the leader purges expired diff jobs.
const DIFF_PURGE_INTERVAL: Duration = Duration::from_secs(60);

/// A node in the Tessera cluster.
///
/// Owns the Raft instance, the durable state machine and the diff engine,
/// and exposes the metadata operations. Writes go through consensus and
/// are forwarded to the leader when issued on a follower; snapshot creation
/// and diff requests are leader-only.
pub struct ClusterNode {
    /// This node's ID.
    node_id: ClusterNodeId,
    /// The Raft instance.
    raft: ClusterRaft,
    /// The state machine (for read-only queries).
    state_machine: Arc<ClusterStateMachine>,
    /// Router used for forwarding writes to the leader.
    router: LocalRouter,
    /// Mints snapshot identities while leading.
    snapshots: SnapshotManager,
    /// Per-bucket locks held from minting a snapshot until its create entry
    /// is applied, so a generated name is checked against every earlier
    /// create of that bucket.
    snapshot_locks: parking_lot::Mutex<HashMap<(String, String), Arc<Mutex<()>>>>,
    /// Snapshot diff jobs, active only while leading.
    diff_engine: Arc<SnapshotDiffEngine>,
    /// Leadership monitor task.
    monitor: Option<JoinHandle<()>>,
    /// Shutdown signal for the monitor.
    shutdown_tx: Option<oneshot::Sender<()>>,
}

impl std::fmt::Debug for ClusterNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClusterNode")
            .field("node_id", &self.node_id)
            .field("diff_engine", &self.diff_engine)
            .finish_non_exhaustive()
    }
}

impl ClusterNode {
    /// Start a node with the system clock and random snapshot ids.
    pub async fn start(config: ClusterConfig, router: &LocalRouter) -> ClusterResult<Self> {
        Self::start_with_providers(config, router, Arc::new(SystemClock), Arc::new(RandomIds)).await
    }

    /// Start a node with explicit time and id sources.
    pub async fn start_with_providers(
        config: ClusterConfig,
        router: &LocalRouter,
        clock: Arc<dyn Clock>,
        ids: Arc<dyn IdProvider>,
    ) -> ClusterResult<Self> {
        config.validate().map_err(ClusterError::Config)?;
        let node_id = config.node_id;

        let log_store = LogStore::open(config.data_dir.join("raft"))?;
        let state_machine = Arc::new(
            ClusterStateMachine::open(&config.data_dir.join("state"), config.containers.clone())?
                .with_flush_entries(config.snapshot.state_flush_entries),
        );

        let raft_config = Config {
            cluster_name: config.cluster_name.clone(),
            election_timeout_min: config.raft.election_timeout_ms.0,
            election_timeout_max: config.raft.election_timeout_ms.1,
            heartbeat_interval: config.raft.heartbeat_interval_ms,
            max_payload_entries: config.raft.max_entries_per_append,
            snapshot_policy: openraft::SnapshotPolicy::LogsSinceLast(
                config.snapshot.snapshot_threshold,
            ),
            max_in_snapshot_log_to_keep: config.snapshot.max_log_entries,
            ..Default::default()
        };
        let raft_config = Arc::new(
            raft_config
                .validate()
                .map_err(|e| ClusterError::Config(e.to_string()))?,
        );

        let raft = Raft::new(
            node_id,
            raft_config,
            router.network(node_id),
            log_store,
            Arc::clone(&state_machine),
        )
        .await
        .map_err(|e| ClusterError::Fatal(e.to_string()))?;
        router.register(node_id, raft.clone());

        let store = FileDiffJobStore::open(config.diff_jobs_path())?;
        let catalog: Arc<dyn SnapshotCatalog> = state_machine.clone();
        let diff_engine = SnapshotDiffEngine::new(
            config.diff.clone(),
            catalog,
            Arc::new(store),
            Arc::clone(&clock),
        );

        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let monitor = tokio::spawn(monitor_leadership(
            node_id,
            raft.metrics(),
            Arc::clone(&diff_engine),
            clock.clone(),
            shutdown_rx,
        ));

        tracing::info!(
            node_id,
            cluster = %config.cluster_name,
            data_dir = %config.data_dir.display(),
            "Cluster node started"
        );

        Ok(Self {
            node_id,
            raft,
            state_machine,
            router: router.clone(),
            snapshots: SnapshotManager::new(clock, ids),
            snapshot_locks: parking_lot::Mutex::new(HashMap::new()),
            diff_engine,
            monitor: Some(monitor),
            shutdown_tx: Some(shutdown_tx),
        })
    }

    /// Initialize a new cluster (call on first node only).
    ///
    /// This makes this node the initial leader with itself as the only member.
    pub async fn initialize(&self) -> ClusterResult<()> {
        let mut members = BTreeMap::new();
        members.insert(self.node_id, member(self.node_id));
        self.raft.initialize(members).await?;

        tracing::info!(node_id = self.node_id, "Cluster initialized");
        Ok(())
    }

    /// Add a node as a learner and wait until it has caught up.
    ///
    /// This must be called on the current leader.
    pub async fn add_learner(&self, node_id: ClusterNodeId) -> ClusterResult<()> {
        self.raft
            .add_learner(node_id, member(node_id), true)
            .await?;

        tracing::info!(node_id, "Added learner to cluster");
        Ok(())
    }

    /// Set the voting members.
    ///
    /// After adding nodes as learners, call this to make them voting members.
    pub async fn change_membership(
        &self,
        members: impl IntoIterator<Item = ClusterNodeId>,
    ) -> ClusterResult<()> {
        let member_set: BTreeSet<_> = members.into_iter().collect();
        self.raft.change_membership(member_set.clone(), false).await?;

        tracing::info!(members = ?member_set, "Membership changed");
        Ok(())
    }

    /// Execute a command through Raft consensus.
    ///
    /// Waits for the command to be committed and applied. If this node is not
    /// the leader, the command is forwarded to the leader through the router.
    pub async fn execute(&self, cmd: ClusterCommand) -> ClusterResult<ClusterResponse> {
        match self.raft.client_write(cmd.clone()).await {
            Ok(resp) => Ok(resp.data),
            Err(e) => match forward_target(&e) {
                Some(leader_id) if leader_id != self.node_id => {
                    self.forward_to_leader(leader_id, cmd).await
                }
                _ => Err(write_error(e)),
            },
        }
    }

    async fn forward_to_leader(
        &self,
        leader_id: ClusterNodeId,
        cmd: ClusterCommand,
    ) -> ClusterResult<ClusterResponse> {
        tracing::debug!(node_id = self.node_id, leader_id, command = cmd.name(), "Forwarding command to leader");
        let leader = self.router.route(self.node_id, leader_id)?;
        leader
            .client_write(cmd)
            .await
            .map(|resp| resp.data)
            .map_err(write_error)
    }

    async fn execute_for<T>(
        &self,
        cmd: ClusterCommand,
        extract: impl FnOnce(ResponseData) -> Option<T>,
    ) -> ClusterResult<T> {
        let name = cmd.name();
        let data = self.execute(cmd).await?.into_result()?;
        data.and_then(extract).ok_or_else(|| {
            ClusterError::Serialization(format!("unexpected response to {name}"))
        })
    }

    // ==================== Containers ====================

    /// Replicate a container command and return its outcome.
    ///
    /// Retrying with the same command id is safe: the replicated ledger
    /// returns the first outcome.
    pub async fn apply_container_command(
        &self,
        command: ContainerCommand,
    ) -> ClusterResult<CommandResult> {
        self.execute_for(ClusterCommand::Container(command), |data| match data {
            ResponseData::Container(result) => Some(result),
            _ => None,
        })
        .await
    }

    /// Re-verify the stored chunks of a container on this replica.
    pub fn scrub_container(&self, container_id: ContainerId) -> ClusterResult<ScrubReport> {
        Ok(self.state_machine.state().containers.scrub(container_id)?)
    }

    // ==================== Buckets and keys ====================

    /// Create a bucket. Returns false if it already existed.
    pub async fn create_bucket(&self, volume: &str, bucket: &str) -> ClusterResult<bool> {
        let cmd = ClusterCommand::CreateBucket {
            volume: volume.to_string(),
            bucket: bucket.to_string(),
        };
        self.execute_for(cmd, |data| match data {
            ResponseData::Bucket { created } => Some(created),
            _ => None,
        })
        .await
    }

    /// Create or overwrite a key.
    pub async fn put_key(
        &self,
        volume: &str,
        bucket: &str,
        key: &str,
        size: u64,
        checksum: &str,
    ) -> ClusterResult<KeyInfo> {
        let cmd = ClusterCommand::PutKey {
            volume: volume.to_string(),
            bucket: bucket.to_string(),
            key: key.to_string(),
            size,
            checksum: checksum.to_string(),
        };
        self.execute_for(cmd, key_info).await
    }

    /// Delete a key.
    pub async fn delete_key(&self, volume: &str, bucket: &str, key: &str) -> ClusterResult<KeyInfo> {
        let cmd = ClusterCommand::DeleteKey {
            volume: volume.to_string(),
            bucket: bucket.to_string(),
            key: key.to_string(),
        };
        self.execute_for(cmd, key_info).await
    }

    /// Rename a key within its bucket.
    pub async fn rename_key(
        &self,
        volume: &str,
        bucket: &str,
        from: &str,
        to: &str,
    ) -> ClusterResult<KeyInfo> {
        let cmd = ClusterCommand::RenameKey {
            volume: volume.to_string(),
            bucket: bucket.to_string(),
            from: from.to_string(),
            to: to.to_string(),
        };
        self.execute_for(cmd, key_info).await
    }

    // ==================== Snapshots ====================

    /// Create a snapshot of a bucket.
    ///
    /// Leader only. An empty `name` asks for a generated one. The snapshot id
    /// and name are minted here and replicated as-is; the returned info
    /// carries the creation sequence and chain backpointers assigned at apply.
    /// Concurrent creates for one bucket are serialized on the leader.
    pub async fn create_snapshot(
        &self,
        volume: &str,
        bucket: &str,
        name: &str,
    ) -> ClusterResult<SnapshotInfo> {
        let lock = self.snapshot_lock(volume, bucket);
        let result = {
            let _creating = lock.lock().await;
            self.create_snapshot_locked(volume, bucket, name).await
        };
        self.release_snapshot_lock(volume, bucket, lock);
        result
    }

    fn snapshot_lock(&self, volume: &str, bucket: &str) -> Arc<Mutex<()>> {
        let mut locks = self.snapshot_locks.lock();
        Arc::clone(
            locks
                .entry((volume.to_string(), bucket.to_string()))
                .or_default(),
        )
    }

    fn release_snapshot_lock(&self, volume: &str, bucket: &str, lock: Arc<Mutex<()>>) {
        let mut locks = self.snapshot_locks.lock();
        // Only the map and `lock` left: nobody else is waiting.
        if Arc::strong_count(&lock) == 2 {
            locks.remove(&(volume.to_string(), bucket.to_string()));
        }
    }

    async fn create_snapshot_locked(
        &self,
        volume: &str,
        bucket: &str,
        name: &str,
    ) -> ClusterResult<SnapshotInfo> {
        let ctx = self.leader_context().await?;
        let info = {
            let state = self.state_machine.state();
            self.snapshots
                .prepare(&ctx, &state.snapshots, volume, bucket, name)?
        };

        let cmd = ClusterCommand::CreateSnapshot { info };
        let resp = match self.raft.client_write(cmd).await {
            Ok(resp) => resp.data,
            Err(RaftError::APIError(ClientWriteError::ForwardToLeader(forward))) => {
                tracing::warn!(
                    node_id = self.node_id,
                    leader = ?forward.leader_id,
                    "Lost leadership while creating snapshot"
                );
                return Err(TesseraError::LeadershipLost {
                    cause: format!("leader is now {:?}", forward.leader_id),
                }
                .into());
            }
            Err(e) => return Err(e.into()),
        };

        match resp.into_result()? {
            Some(ResponseData::Snapshot(info)) => Ok(info),
            _ => Err(ClusterError::Serialization(
                "unexpected response to CreateSnapshot".to_string(),
            )),
        }
    }

    /// Snapshot by name, from this replica's applied state.
    pub fn snapshot_info(&self, volume: &str, bucket: &str, name: &str) -> ClusterResult<SnapshotInfo> {
        Ok(self
            .state_machine
            .state()
            .snapshots
            .resolve(volume, bucket, name)?)
    }

    /// Snapshots of a bucket in name order.
    pub fn list_snapshots(&self, volume: &str, bucket: &str) -> Vec<SnapshotInfo> {
        self.state_machine.state().snapshots.list(volume, bucket)
    }

    /// Whether this replica's snapshot chain failed validation.
    pub fn is_snapshot_chain_corrupted(&self) -> bool {
        self.state_machine.state().snapshots.is_chain_corrupted()
    }

    // ==================== Snapshot diff ====================

    /// Submit or poll a snapshot diff. Leader only.
    pub async fn snapshot_diff(
        &self,
        request: &SnapshotDiffRequest,
    ) -> ClusterResult<SnapshotDiffResponse> {
        let ctx = self.leader_context().await?;
        Ok(self.diff_engine.request_diff(&ctx, request)?)
    }

    /// Cancel a snapshot diff job. Leader only.
    pub async fn cancel_snapshot_diff(&self, request: &SnapshotDiffRequest) -> ClusterResult<JobStatus> {
        let ctx = self.leader_context().await?;
        Ok(self.diff_engine.cancel_diff(&ctx, request)?)
    }

    /// Diff jobs recorded on this node for a bucket.
    pub fn list_snapshot_diff_jobs(
        &self,
        volume: &str,
        bucket: &str,
        status: Option<JobStatus>,
    ) -> ClusterResult<Vec<DiffJobSummary>> {
        Ok(self.diff_engine.list_jobs(volume, bucket, status)?)
    }

    // ==================== Leadership ====================

    /// This node's current view of leadership.
    pub fn leadership_context(&self) -> LeadershipContext {
        let metrics = self.raft.metrics();
        let metrics = metrics.borrow();
        LeadershipContext {
            node_id: self.node_id,
            leader_id: metrics.current_leader,
            term: metrics.current_term,
        }
    }

    /// Confirm leadership with a quorum and wait until this replica has
    /// applied everything committed before the call.
    async fn leader_context(&self) -> ClusterResult<LeadershipContext> {
        let ctx = self.leadership_context();
        if !ctx.is_leader() {
            return Err(ClusterError::NotLeader {
                leader: ctx.leader_id,
            });
        }
        match self.raft.ensure_linearizable().await {
            Ok(_) => Ok(self.leadership_context()),
            Err(RaftError::APIError(CheckIsLeaderError::ForwardToLeader(forward))) => {
                Err(ClusterError::NotLeader {
                    leader: forward.leader_id,
                })
            }
            Err(RaftError::APIError(CheckIsLeaderError::QuorumNotEnough(e))) => {
                Err(TesseraError::LeadershipLost {
                    cause: e.to_string(),
                }
                .into())
            }
            Err(e) => Err(ClusterError::Fatal(e.to_string())),
        }
    }

    /// Get the current leader's node ID.
    pub async fn leader(&self) -> Option<ClusterNodeId> {
        self.raft.current_leader().await
    }

    /// Check if this node is the leader.
    pub async fn is_leader(&self) -> bool {
        self.raft.current_leader().await == Some(self.node_id)
    }

    /// Get this node's ID.
    pub fn node_id(&self) -> ClusterNodeId {
        self.node_id
    }

    /// Get a reference to the state machine for read-only queries.
    ///
    /// Reads reflect the committed prefix applied on this replica.
    pub fn state_machine(&self) -> &ClusterStateMachine {
        &self.state_machine
    }

    /// The diff engine of this node.
    pub fn diff_engine(&self) -> &Arc<SnapshotDiffEngine> {
        &self.diff_engine
    }

    /// Get cluster metrics.
    pub fn metrics(&self) -> ClusterMetrics {
        self.raft.metrics().borrow().clone()
    }

    /// Trigger a Raft snapshot (log compaction).
    pub async fn trigger_snapshot(&self) -> ClusterResult<()> {
        self.raft
            .trigger()
            .snapshot()
            .await
            .map_err(|e| ClusterError::Fatal(e.to_string()))?;
        Ok(())
    }

    /// Shutdown the node gracefully.
    ///
    /// Diff workers stop; their persisted progress stays in the job table.
    pub async fn shutdown(&mut self) -> ClusterResult<()> {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(monitor) = self.monitor.take() {
            let _ = monitor.await;
        }
        self.diff_engine.on_leadership_lost();
        self.router.unregister(self.node_id);

        self.raft
            .shutdown()
            .await
            .map_err(|e| ClusterError::Fatal(format!("shutdown: {e}")))?;
        self.state_machine.flush()?;

        tracing::info!(node_id = self.node_id, "Cluster node shutdown");
        Ok(())
    }
}

impl Drop for ClusterNode {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
    }
}

fn key_info(data: ResponseData) -> Option<KeyInfo> {
    match data {
        ResponseData::Key(info) => Some(info),
        _ => None,
    }
}

fn write_error(e: ClusterRaftWriteError) -> ClusterError {
    match e {
        RaftError::APIError(ClientWriteError::ForwardToLeader(forward)) => ClusterError::NotLeader {
            leader: forward.leader_id,
        },
        other => other.into(),
    }
}

/// Translate Raft metrics into leadership hooks for the diff engine.
async fn monitor_leadership(
    node_id: ClusterNodeId,
    mut metrics: watch::Receiver<ClusterMetrics>,
    engine: Arc<SnapshotDiffEngine>,
    clock: Arc<dyn Clock>,
    mut shutdown: oneshot::Receiver<()>,
) {
    let mut leading_term: Option<u64> = None;
    let mut purge = tokio::time::interval(DIFF_PURGE_INTERVAL);

    loop {
        let ctx = {
            let m = metrics.borrow_and_update();
            LeadershipContext {
                node_id,
                leader_id: m.current_leader,
                term: m.current_term,
            }
        };

        if ctx.is_leader() {
            if leading_term != Some(ctx.term) {
                match engine.on_leadership_acquired(&ctx) {
                    Ok(_) => leading_term = Some(ctx.term),
                    Err(e) => {
                        tracing::error!(node_id, term = ctx.term, error = %e, "Failed to take over diff jobs");
                    }
                }
            }
        } else if leading_term.take().is_some() {
            engine.on_leadership_lost();
        }

        tokio::select! {
            changed = metrics.changed() => {
                if changed.is_err() {
                    break;
                }
            }
            _ = purge.tick() => {
                if leading_term.is_some() {
                    if let Err(e) = engine.purge_expired(clock.now_millis()) {
                        tracing::warn!(node_id, error = %e, "Failed to purge diff jobs");
                    }
                }
            }
            _ = &mut shutdown => break,
        }
    }

    engine.on_leadership_lost();
    tracing::debug!(node_id, "Leadership monitor stopped");
}
