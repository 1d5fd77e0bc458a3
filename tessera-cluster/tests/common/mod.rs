//! Common test utilities for tessera-cluster tests.

use std::sync::Arc;
use std::time::{Duration, Instant};
use tempfile::TempDir;
use tessera_cluster::{ClusterConfig, ClusterNode, LocalRouter};
use tessera_core::diff::{JobStatus, SnapshotDiffRequest, SnapshotDiffResponse};
use tessera_core::providers::{Clock, RandomIds, SystemClock};

/// Install a log subscriber honoring `RUST_LOG`, once per test binary.
#[allow(dead_code)]
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Configuration for node `node_id` storing its data in `dir`.
pub fn node_config(node_id: u64, dir: &TempDir) -> ClusterConfig {
    ClusterConfig::builder()
        .node_id(node_id)
        .cluster_name("tessera-test")
        .data_dir(dir.path())
        .build()
        .expect("Invalid config")
}

/// Test context that holds temp directories, the router and nodes.
#[allow(dead_code)]
pub struct TestCluster {
    /// Temp directories for each node (kept alive for the test duration).
    temp_dirs: Vec<TempDir>,
    /// In-process network shared by all nodes.
    pub router: LocalRouter,
    /// Cluster nodes; node `i` has id `i + 1`.
    pub nodes: Vec<ClusterNode>,
    /// Clock every node reads, kept for restarts.
    clock: Arc<dyn Clock>,
}

#[allow(dead_code)]
impl TestCluster {
    /// Create a new test cluster with the specified number of nodes.
    pub async fn new(node_count: usize) -> Self {
        Self::with_clock(node_count, Arc::new(SystemClock)).await
    }

    /// Create a new test cluster whose nodes all read `clock`.
    pub async fn with_clock(node_count: usize, clock: Arc<dyn Clock>) -> Self {
        init_tracing();
        let router = LocalRouter::new();
        let mut temp_dirs = Vec::with_capacity(node_count);
        let mut nodes = Vec::with_capacity(node_count);

        for i in 0..node_count {
            let temp_dir = TempDir::new().expect("Failed to create temp dir");
            let config = node_config(i as u64 + 1, &temp_dir);
            let node =
                ClusterNode::start_with_providers(config, &router, clock.clone(), Arc::new(RandomIds))
                    .await
                    .expect("Failed to start node");
            temp_dirs.push(temp_dir);
            nodes.push(node);
        }

        Self {
            temp_dirs,
            router,
            nodes,
            clock,
        }
    }

    /// Start a cluster, initialize it on node 1 and add every other node as
    /// a voter.
    pub async fn started(node_count: usize) -> Self {
        let cluster = Self::new(node_count).await;
        cluster.initialize().await;
        cluster
            .wait_for_leader(5000)
            .await
            .expect("No leader elected");
        cluster.add_all_nodes().await;
        cluster
    }

    /// Initialize the cluster (call on first node).
    pub async fn initialize(&self) {
        self.nodes[0]
            .initialize()
            .await
            .expect("Failed to initialize cluster");
    }

    /// Add remaining nodes to the cluster.
    pub async fn add_all_nodes(&self) {
        for i in 1..self.nodes.len() {
            self.nodes[0]
                .add_learner(i as u64 + 1)
                .await
                .expect("Failed to add learner");
        }

        let all_ids: Vec<u64> = (1..=self.nodes.len() as u64).collect();
        self.nodes[0]
            .change_membership(all_ids)
            .await
            .expect("Failed to change membership");
    }

    /// Wait until some node confirms it leads; returns its index.
    pub async fn wait_for_leader(&self, timeout_ms: u64) -> Option<usize> {
        self.wait_for_leader_except(None, timeout_ms).await
    }

    async fn wait_for_leader_except(&self, skip: Option<usize>, timeout_ms: u64) -> Option<usize> {
        let start = Instant::now();
        let timeout = Duration::from_millis(timeout_ms);

        while start.elapsed() < timeout {
            for (i, node) in self.nodes.iter().enumerate() {
                if Some(i) != skip && node.is_leader().await {
                    return Some(i);
                }
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }

        None
    }

    /// The current leader.
    pub async fn leader(&self) -> &ClusterNode {
        let index = self.wait_for_leader(5000).await.expect("No leader elected");
        &self.nodes[index]
    }

    /// A node that is not the leader.
    pub async fn follower(&self) -> &ClusterNode {
        let leader = self.wait_for_leader(5000).await.expect("No leader elected");
        &self.nodes[(leader + 1) % self.nodes.len()]
    }

    /// Wait until every node has applied what the leader has applied.
    pub async fn wait_for_replication(&self, timeout_ms: u64) {
        let target = self.leader().await.metrics().last_applied;
        let start = Instant::now();
        let timeout = Duration::from_millis(timeout_ms);

        while start.elapsed() < timeout {
            if self
                .nodes
                .iter()
                .all(|n| n.metrics().last_applied.map(|l| l.index) >= target.map(|l| l.index))
            {
                return;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("Replication did not reach {target:?} within {timeout_ms}ms");
    }

    /// Stop node `index`, wait for the others to elect a leader when there
    /// are any, and start it again on the same data directory.
    pub async fn restart(&mut self, index: usize) {
        self.nodes[index]
            .shutdown()
            .await
            .expect("Failed to shutdown node");

        if self.nodes.len() > 1 {
            self.wait_for_leader_except(Some(index), 10_000)
                .await
                .expect("Survivors did not elect a leader");
        }

        let config = node_config(index as u64 + 1, &self.temp_dirs[index]);
        self.nodes[index] = ClusterNode::start_with_providers(
            config,
            &self.router,
            self.clock.clone(),
            Arc::new(RandomIds),
        )
        .await
        .expect("Failed to restart node");
    }

    /// Index of node `node`.
    pub fn index_of(&self, node: &ClusterNode) -> usize {
        (node.node_id() - 1) as usize
    }

    /// Poll the leader for a diff until it finishes, following leadership
    /// changes and retrying transient errors.
    pub async fn poll_diff(
        &self,
        request: &SnapshotDiffRequest,
        timeout_ms: u64,
    ) -> SnapshotDiffResponse {
        let start = Instant::now();
        let timeout = Duration::from_millis(timeout_ms);

        while start.elapsed() < timeout {
            let leader = self.leader().await;
            match leader.snapshot_diff(request).await {
                Ok(resp) if resp.job_status == JobStatus::Done => return resp,
                Ok(resp) => {
                    assert!(
                        matches!(resp.job_status, JobStatus::Queued | JobStatus::InProgress),
                        "Unexpected diff status: {resp:?}"
                    );
                    let wait = resp.wait_time_ms.clamp(10, 100);
                    tokio::time::sleep(Duration::from_millis(wait)).await;
                }
                Err(e) if e.is_retriable() => {
                    tokio::time::sleep(Duration::from_millis(50)).await;
                }
                Err(e) => panic!("Diff request failed: {e}"),
            }
        }
        panic!("Diff did not finish within {timeout_ms}ms");
    }

    /// Shutdown all nodes.
    pub async fn shutdown(&mut self) {
        for node in &mut self.nodes {
            let _ = node.shutdown().await;
        }
    }
}
