//! Raft state machine for Tessera cluster state.
//!
//! The state machine is the core of the cluster's replicated state. It:
//! - Receives committed log entries (commands)
//! - Applies them deterministically to produce consistent state
//! - Persists the applied state every `flush_entries` applied entries; the
//!   committed log tail past the last write is replayed on restart
//! - Supports snapshots for log compaction and state transfer
//!
//! ## Module Structure
//!
//! - `types`: Response types and stored snapshots
//! - `state`: The replicated ClusterState and its restore path
//! - `apply`: Command application logic
//! - `traits`: OpenRaft and snapshot catalog trait implementations

mod apply;
mod state;
mod traits;
mod types;

pub use state::ClusterState;
pub use types::{ClusterResponse, ResponseData, StoredSnapshot};

use crate::durable::{read_json, write_json};
use parking_lot::{RwLock, RwLockReadGuard};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tessera_core::container::LedgerConfig;

/// The Raft state machine.
///
/// This struct holds the replicated cluster state and provides
/// thread-safe access for reads and applies.
#[derive(Debug, Default)]
pub struct ClusterStateMachine {
    /// The replicated state.
    state: RwLock<ClusterState>,
    /// Idempotency ledger bound applied after every restore.
    ledger: LedgerConfig,
    /// Where the applied state is persisted; `None` keeps it in memory.
    state_path: Option<PathBuf>,
    /// Applied entries allowed between two writes of the state file.
    flush_entries: u64,
    /// Entries applied since the state file was last written.
    unflushed: AtomicU64,
    /// Snapshot index counter.
    snapshot_idx: AtomicU64,
    /// Current snapshot.
    current_snapshot: tokio::sync::RwLock<Option<StoredSnapshot>>,
}

impl ClusterStateMachine {
    /// Create an in-memory state machine.
    pub fn new(ledger: LedgerConfig) -> Self {
        let mut state = ClusterState::default();
        state.restore(&ledger);
        Self {
            state: RwLock::new(state),
            ledger,
            flush_entries: 1,
            ..Default::default()
        }
    }

    /// Open the state machine persisted in `dir`, or start empty.
    ///
    /// The snapshot chain is rebuilt from the persisted snapshot table.
    pub fn open(dir: &Path, ledger: LedgerConfig) -> std::io::Result<Self> {
        std::fs::create_dir_all(dir)?;
        let state_path = dir.join("state.json");
        let mut state: ClusterState = read_json(&state_path)?.unwrap_or_default();
        state.restore(&ledger);
        tracing::info!(
            path = %state_path.display(),
            last_applied = ?state.last_applied_log,
            snapshots = state.snapshots.table().len(),
            containers = state.containers.container_ids().len(),
            "Opened state machine"
        );
        Ok(Self {
            state: RwLock::new(state),
            ledger,
            state_path: Some(state_path),
            flush_entries: 1,
            ..Default::default()
        })
    }

    /// Write the state file only every `entries` applied entries.
    #[must_use]
    pub fn with_flush_entries(mut self, entries: u64) -> Self {
        self.flush_entries = entries.max(1);
        self
    }

    /// Get a read-only view of the current state.
    ///
    /// This reflects the committed prefix applied on this replica. Do not
    /// hold the guard across an await point.
    pub fn state(&self) -> RwLockReadGuard<'_, ClusterState> {
        self.state.read()
    }

    /// Write any applied entries not yet in the state file.
    pub fn flush(&self) -> std::io::Result<()> {
        if self.unflushed.load(Ordering::Acquire) == 0 {
            return Ok(());
        }
        let state = self.state.read();
        self.persist(&state)
    }

    /// Count `applied` entries and write the state file once enough are pending.
    fn persist_after(&self, state: &ClusterState, applied: u64) -> std::io::Result<()> {
        let pending = self.unflushed.fetch_add(applied, Ordering::AcqRel) + applied;
        if pending >= self.flush_entries {
            self.persist(state)?;
        }
        Ok(())
    }

    fn persist(&self, state: &ClusterState) -> std::io::Result<()> {
        match &self.state_path {
            Some(path) => {
                write_json(path, state).inspect_err(|e| {
                    tracing::error!(path = %path.display(), error = %e, "Failed to persist state machine");
                })?;
                self.unflushed.store(0, Ordering::Release);
                Ok(())
            }
            None => Ok(()),
        }
    }
}
