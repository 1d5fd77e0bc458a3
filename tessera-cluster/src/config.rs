//! Cluster configuration.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tessera_core::container::LedgerConfig;
use tessera_core::diff::DiffEngineConfig;

/// Configuration for a cluster node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterConfig {
    /// This node's unique ID in the cluster (1-based).
    pub node_id: u64,

    /// Cluster name, used by OpenRaft and in logs.
    pub cluster_name: String,

    /// Directory for the Raft log, applied state and the diff job table.
    pub data_dir: PathBuf,

    /// Raft timing configuration.
    pub raft: RaftConfig,

    /// Raft snapshot configuration.
    pub snapshot: SnapshotConfig,

    /// Container idempotency ledger bounds.
    pub containers: LedgerConfig,

    /// Snapshot diff engine tuning.
    pub diff: DiffEngineConfig,
}

/// Raft timing configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RaftConfig {
    /// Election timeout range (min, max) in milliseconds.
    /// A random value in this range is chosen for each election.
    pub election_timeout_ms: (u64, u64),

    /// Heartbeat interval in milliseconds.
    pub heartbeat_interval_ms: u64,

    /// Maximum entries per AppendEntries RPC.
    pub max_entries_per_append: u64,
}

/// Raft snapshot (log compaction) configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotConfig {
    /// Build a state machine snapshot after this many log entries.
    pub snapshot_threshold: u64,

    /// Maximum number of log entries to keep after snapshot.
    pub max_log_entries: u64,

    /// Rewrite the applied state on disk after this many applied entries.
    /// Entries applied since the last write are replayed from the log on
    /// restart.
    pub state_flush_entries: u64,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            node_id: 1,
            cluster_name: "tessera".to_string(),
            data_dir: PathBuf::from("./tessera-data"),
            raft: RaftConfig::default(),
            snapshot: SnapshotConfig::default(),
            containers: LedgerConfig::default(),
            diff: DiffEngineConfig::default(),
        }
    }
}

impl Default for RaftConfig {
    fn default() -> Self {
        Self {
            election_timeout_ms: (150, 300),
            heartbeat_interval_ms: 50,
            max_entries_per_append: 100,
        }
    }
}

impl Default for SnapshotConfig {
    fn default() -> Self {
        Self {
            snapshot_threshold: 10_000,
            max_log_entries: 1_000,
            state_flush_entries: 128,
        }
    }
}

impl ClusterConfig {
    /// Create a new configuration builder.
    pub fn builder() -> ClusterConfigBuilder {
        ClusterConfigBuilder::default()
    }

    /// Get the election timeout as a Duration range.
    pub fn election_timeout(&self) -> (Duration, Duration) {
        (
            Duration::from_millis(self.raft.election_timeout_ms.0),
            Duration::from_millis(self.raft.election_timeout_ms.1),
        )
    }

    /// Get the heartbeat interval as a Duration.
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.raft.heartbeat_interval_ms)
    }

    /// Path of the node-local diff job table.
    pub fn diff_jobs_path(&self) -> PathBuf {
        self.data_dir.join("diff_jobs.json")
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), String> {
        if self.node_id == 0 {
            return Err("node_id must be > 0".to_string());
        }

        if self.cluster_name.is_empty() {
            return Err("cluster_name is required".to_string());
        }

        let (min_election, max_election) = self.raft.election_timeout_ms;
        if min_election > max_election {
            return Err(format!(
                "election_timeout_ms range is inverted ({min_election} > {max_election})"
            ));
        }
        // Heartbeat should be much less than election timeout
        if self.raft.heartbeat_interval_ms >= min_election / 2 {
            return Err(format!(
                "heartbeat_interval_ms ({}) should be << election_timeout_ms ({})",
                self.raft.heartbeat_interval_ms, min_election
            ));
        }

        if self.containers.max_records_per_container == 0 {
            return Err("containers.max_records_per_container must be > 0".to_string());
        }

        if self.snapshot.state_flush_entries == 0 {
            return Err("snapshot.state_flush_entries must be > 0".to_string());
        }

        self.diff.validate().map_err(|e| e.to_string())
    }
}

/// Builder for ClusterConfig.
#[derive(Debug, Default)]
pub struct ClusterConfigBuilder {
    config: ClusterConfig,
}

impl ClusterConfigBuilder {
    /// Set the node ID.
    pub fn node_id(mut self, id: u64) -> Self {
        self.config.node_id = id;
        self
    }

    /// Set the cluster name.
    pub fn cluster_name(mut self, name: impl Into<String>) -> Self {
        self.config.cluster_name = name.into();
        self
    }

    /// Set the data directory.
    pub fn data_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.data_dir = path.into();
        self
    }

    /// Set election timeout range in milliseconds.
    pub fn election_timeout_ms(mut self, min: u64, max: u64) -> Self {
        self.config.raft.election_timeout_ms = (min, max);
        self
    }

    /// Set heartbeat interval in milliseconds.
    pub fn heartbeat_interval_ms(mut self, ms: u64) -> Self {
        self.config.raft.heartbeat_interval_ms = ms;
        self
    }

    /// Set snapshot threshold.
    pub fn snapshot_threshold(mut self, entries: u64) -> Self {
        self.config.snapshot.snapshot_threshold = entries;
        self
    }

    /// Set how many applied entries may stay unwritten to the state file.
    pub fn state_flush_entries(mut self, entries: u64) -> Self {
        self.config.snapshot.state_flush_entries = entries;
        self
    }

    /// Set the per-container idempotency ledger bound.
    pub fn ledger_max_records(mut self, records: usize) -> Self {
        self.config.containers.max_records_per_container = records;
        self
    }

    /// Set the diff engine configuration.
    pub fn diff(mut self, diff: DiffEngineConfig) -> Self {
        self.config.diff = diff;
        self
    }

    /// Build the configuration.
    pub fn build(self) -> Result<ClusterConfig, String> {
        self.config.validate()?;
        Ok(self.config)
    }
}
