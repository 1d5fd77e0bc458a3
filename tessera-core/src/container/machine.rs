//! Container state machine with idempotency resolution.

use super::command::{CommandKind, ContainerCommand};
use super::ledger::{CommandLedger, LedgerConfig, LedgerRecord, Outcome};
use super::transition::{Effect, transition};
use super::types::{
    BlockData, Container, ContainerMetadata, ContainerState, sha256_hex,
};
use crate::error::{Result, TesseraError};
use crate::types::{BlockId, ContainerId};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeMap;
use std::sync::Arc;

/// One container together with its ledger.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct ContainerSlot {
    id: ContainerId,
    container: Option<Container>,
    ledger: Vec<LedgerRecord>,
    #[serde(skip)]
    live_ledger: Option<CommandLedger>,
}

impl ContainerSlot {
    fn empty(id: ContainerId, max_records: usize) -> Self {
        Self {
            id,
            container: None,
            ledger: Vec::new(),
            live_ledger: Some(CommandLedger::new(max_records)),
        }
    }

    /// The live ledger, rebuilt from serialized records on first use.
    fn ledger_mut(&mut self, max_records: usize) -> &mut CommandLedger {
        if self.live_ledger.is_none() {
            let records = std::mem::take(&mut self.ledger);
            self.live_ledger = Some(CommandLedger::from_records(max_records, records));
        }
        self.live_ledger
            .get_or_insert_with(|| CommandLedger::new(max_records))
    }
}

/// Result of re-verifying every stored chunk of a container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScrubReport {
    /// Scrubbed container.
    pub container_id: ContainerId,
    /// Chunks whose checksum was recomputed.
    pub chunks_checked: usize,
    /// Chunks whose bytes no longer match their checksum.
    pub corrupted: Vec<(BlockId, String)>,
    /// State after the scrub.
    pub state: ContainerState,
}

impl ScrubReport {
    /// Whether every chunk verified.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.corrupted.is_empty()
    }
}

/// Applies container commands exactly once per replica.
///
/// Locking is per container: the outer map lock is only held to find or
/// insert a slot, and each slot has its own mutex, so commands for different
/// containers never contend.
pub struct ContainerStateMachine {
    config: RwLock<LedgerConfig>,
    containers: RwLock<BTreeMap<ContainerId, Arc<Mutex<ContainerSlot>>>>,
}

impl Default for ContainerStateMachine {
    fn default() -> Self {
        Self::new(LedgerConfig::default())
    }
}

impl std::fmt::Debug for ContainerStateMachine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContainerStateMachine")
            .field("containers", &self.containers.read().len())
            .finish()
    }
}

impl ContainerStateMachine {
    /// Create an empty state machine.
    pub fn new(config: LedgerConfig) -> Self {
        Self {
            config: RwLock::new(config),
            containers: RwLock::new(BTreeMap::new()),
        }
    }

    /// Replace the ledger configuration, resizing existing ledgers.
    pub fn set_config(&self, config: LedgerConfig) {
        let max = config.max_records_per_container;
        *self.config.write() = config;
        for slot in self.containers.read().values() {
            slot.lock().ledger_mut(max).set_max_records(max);
        }
    }

    fn max_records(&self) -> usize {
        self.config.read().max_records_per_container
    }

    fn slot(&self, container_id: ContainerId) -> Option<Arc<Mutex<ContainerSlot>>> {
        self.containers.read().get(&container_id).cloned()
    }

    /// Apply a command.
    ///
    /// A command id already in the container's ledger returns the remembered
    /// outcome without touching state. Otherwise the per-kind transition
    /// decides, and its outcome (success or rejection) is recorded.
    pub fn apply(&self, command: &ContainerCommand) -> Outcome {
        let container_id = command.container_id;
        let max_records = self.max_records();

        let slot = match self.slot(container_id) {
            Some(slot) => slot,
            None if matches!(command.kind, CommandKind::CreateContainer) => self
                .containers
                .write()
                .entry(container_id)
                .or_insert_with(|| Arc::new(Mutex::new(ContainerSlot::empty(container_id, max_records))))
                .clone(),
            None => return Err(TesseraError::ContainerNotFound { container_id }),
        };

        let mut slot = slot.lock();
        if let Some(outcome) = slot.ledger_mut(max_records).lookup(&command.command_id) {
            tracing::warn!(
                command_id = %command.command_id,
                container_id = %container_id,
                kind = command.name(),
                "Absorbed replayed command"
            );
            return outcome.clone();
        }

        let decided = transition(container_id, slot.container.as_ref(), &command.kind);
        let outcome = match decided {
            Ok(t) => {
                if t.is_noop() {
                    tracing::warn!(
                        command_id = %command.command_id,
                        container_id = %container_id,
                        kind = command.name(),
                        "Absorbed duplicate command from container state"
                    );
                } else {
                    tracing::debug!(
                        command_id = %command.command_id,
                        container_id = %container_id,
                        kind = command.name(),
                        "Applied container command"
                    );
                }
                match t.effect {
                    Effect::Create => slot.container = Some(Container::new(container_id)),
                    effect => {
                        if let Some(container) = slot.container.as_mut() {
                            container.apply_effect(effect);
                        }
                    }
                }
                Ok(t.result)
            }
            Err(e) => {
                tracing::debug!(
                    command_id = %command.command_id,
                    container_id = %container_id,
                    kind = command.name(),
                    error = %e,
                    "Rejected container command"
                );
                Err(e)
            }
        };

        slot.ledger_mut(max_records)
            .record(command.command_id, outcome.clone());
        outcome
    }

    /// Snapshot of one container.
    pub fn container(&self, container_id: ContainerId) -> Option<Container> {
        self.slot(container_id)
            .and_then(|slot| slot.lock().container.clone())
    }

    /// State of one container.
    pub fn state(&self, container_id: ContainerId) -> Option<ContainerState> {
        self.slot(container_id)
            .and_then(|slot| slot.lock().container.as_ref().map(|c| c.state))
    }

    /// Ids of all existing containers, ascending.
    pub fn container_ids(&self) -> Vec<ContainerId> {
        self.containers
            .read()
            .iter()
            .filter(|(_, slot)| slot.lock().container.is_some())
            .map(|(id, _)| *id)
            .collect()
    }

    /// Committed metadata of a block.
    pub fn block(&self, block_id: BlockId) -> Result<BlockData> {
        let container = self.require(block_id.container_id)?;
        container
            .block(&block_id)
            .cloned()
            .ok_or(TesseraError::BlockNotFound { block_id })
    }

    /// Stored bytes of a chunk.
    pub fn read_chunk(&self, block_id: BlockId, chunk_name: &str) -> Result<Vec<u8>> {
        let container = self.require(block_id.container_id)?;
        container
            .chunk(&block_id, chunk_name)
            .map(|c| c.data.clone())
            .ok_or(TesseraError::BlockNotFound { block_id })
    }

    /// SHA-256 over the canonical JSON of a container's metadata.
    ///
    /// Identical on every replica that applied the same log prefix.
    pub fn metadata_digest(&self, container_id: ContainerId) -> Result<String> {
        let metadata: ContainerMetadata = self.require(container_id)?.metadata();
        let bytes = serde_json::to_vec(&metadata)?;
        Ok(sha256_hex(&bytes))
    }

    /// Recompute the checksum of every stored chunk.
    ///
    /// Any mismatch moves the container to UNHEALTHY on this replica.
    pub fn scrub(&self, container_id: ContainerId) -> Result<ScrubReport> {
        let slot = self
            .slot(container_id)
            .ok_or(TesseraError::ContainerNotFound { container_id })?;
        let mut slot = slot.lock();
        let container = slot
            .container
            .as_mut()
            .ok_or(TesseraError::ContainerNotFound { container_id })?;

        let mut chunks_checked = 0;
        let mut corrupted = Vec::new();
        for (local_id, chunks) in &container.chunks {
            for (name, chunk) in chunks {
                chunks_checked += 1;
                if sha256_hex(&chunk.data) != chunk.info.checksum {
                    corrupted.push((BlockId::new(container_id, *local_id), name.clone()));
                }
            }
        }

        if !corrupted.is_empty() && container.state != ContainerState::Unhealthy {
            let reason = format!("scrub found {} corrupted chunk(s)", corrupted.len());
            tracing::warn!(container_id = %container_id, %reason, "Container marked unhealthy");
            container.apply_effect(Effect::SetState {
                state: ContainerState::Unhealthy,
                reason: Some(reason),
            });
        }

        Ok(ScrubReport {
            container_id,
            chunks_checked,
            corrupted,
            state: container.state,
        })
    }

    fn require(&self, container_id: ContainerId) -> Result<Container> {
        self.container(container_id)
            .ok_or(TesseraError::ContainerNotFound { container_id })
    }

    fn to_slots(&self) -> Vec<ContainerSlot> {
        let max_records = self.max_records();
        self.containers
            .read()
            .values()
            .map(|slot| {
                let mut slot = slot.lock();
                let records = slot.ledger_mut(max_records).records();
                ContainerSlot {
                    id: slot.id,
                    container: slot.container.clone(),
                    ledger: records,
                    live_ledger: None,
                }
            })
            .collect()
    }

    fn from_slots(config: LedgerConfig, slots: Vec<ContainerSlot>) -> Self {
        let containers = slots
            .into_iter()
            .map(|slot| (slot.id, Arc::new(Mutex::new(slot))))
            .collect();
        Self {
            config: RwLock::new(config),
            containers: RwLock::new(containers),
        }
    }

    /// Test hook: flip bytes of a stored chunk without updating its checksum.
    #[cfg(test)]
    fn corrupt_chunk(&self, block_id: BlockId, chunk_name: &str) {
        if let Some(slot) = self.slot(block_id.container_id) {
            let mut slot = slot.lock();
            if let Some(chunk) = slot
                .container
                .as_mut()
                .and_then(|c| c.chunks.get_mut(&block_id.local_id))
                .and_then(|chunks| chunks.get_mut(chunk_name))
            {
                for byte in &mut chunk.data {
                    *byte = !*byte;
                }
            }
        }
    }
}

impl Serialize for ContainerStateMachine {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        self.to_slots().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for ContainerStateMachine {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let slots = Vec::<ContainerSlot>::deserialize(deserializer)?;
        Ok(Self::from_slots(LedgerConfig::default(), slots))
    }
}

impl Clone for ContainerStateMachine {
    fn clone(&self) -> Self {
        Self::from_slots(self.config.read().clone(), self.to_slots())
    }
}
