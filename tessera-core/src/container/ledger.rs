//! Bounded per-container idempotency ledger.
//!
//! Remembers the outcome of the most recent commands applied to one container,
//! keyed by command id. A remembered command is answered from the ledger with
//! no side effect. Once a record is evicted, duplicates are still detected from
//! container state by the per-kind transition rules.

use super::command::CommandResult;
use crate::error::TesseraError;
use crate::types::CommandId;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};

/// Outcome of applying one command, success or typed rejection.
pub type Outcome = Result<CommandResult, TesseraError>;

/// Ledger sizing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerConfig {
    /// Records kept per container before the oldest is evicted.
    pub max_records_per_container: usize,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            max_records_per_container: 1024,
        }
    }
}

/// Serialized ledger entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerRecord {
    /// The command.
    pub command_id: CommandId,
    /// What applying it produced.
    pub outcome: Outcome,
}

/// FIFO map of command id to outcome.
#[derive(Debug, Clone, Default)]
pub struct CommandLedger {
    max_records: usize,
    outcomes: HashMap<CommandId, Outcome>,
    order: VecDeque<CommandId>,
}

impl CommandLedger {
    /// Create an empty ledger holding at most `max_records` entries.
    pub fn new(max_records: usize) -> Self {
        Self {
            max_records,
            outcomes: HashMap::new(),
            order: VecDeque::new(),
        }
    }

    /// The remembered outcome for `command_id`.
    pub fn lookup(&self, command_id: &CommandId) -> Option<&Outcome> {
        self.outcomes.get(command_id)
    }

    /// Remember an outcome. Returns false if the command was already recorded.
    pub fn record(&mut self, command_id: CommandId, outcome: Outcome) -> bool {
        if self.outcomes.contains_key(&command_id) {
            return false;
        }
        self.outcomes.insert(command_id, outcome);
        self.order.push_back(command_id);
        self.evict();
        true
    }

    /// Number of remembered commands.
    #[must_use]
    pub fn len(&self) -> usize {
        self.outcomes.len()
    }

    /// Whether nothing is remembered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }

    /// Change the bound, evicting immediately if it shrank.
    pub fn set_max_records(&mut self, max_records: usize) {
        self.max_records = max_records;
        self.evict();
    }

    /// Records oldest first.
    pub fn records(&self) -> Vec<LedgerRecord> {
        self.order
            .iter()
            .filter_map(|id| {
                self.outcomes.get(id).map(|outcome| LedgerRecord {
                    command_id: *id,
                    outcome: outcome.clone(),
                })
            })
            .collect()
    }

    /// Rebuild from serialized records.
    pub fn from_records(max_records: usize, records: Vec<LedgerRecord>) -> Self {
        let mut ledger = Self::new(max_records);
        for record in records {
            ledger.record(record.command_id, record.outcome);
        }
        ledger
    }

    fn evict(&mut self) {
        while self.outcomes.len() > self.max_records {
            let Some(oldest) = self.order.pop_front() else {
                break;
            };
            self.outcomes.remove(&oldest);
            tracing::trace!(command_id = %oldest, "Evicted idempotency record");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::ContainerState;
    use crate::types::ContainerId;

    fn ok() -> Outcome {
        Ok(CommandResult::Container {
            container_id: ContainerId::new(1),
            state: ContainerState::Open,
        })
    }

    #[test]
    fn record_once() {
        let mut ledger = CommandLedger::new(4);
        let id = CommandId::new();
        assert!(ledger.record(id, ok()));
        assert!(!ledger.record(id, Err(TesseraError::NotLeader { leader: None })));
        assert_eq!(ledger.lookup(&id), Some(&ok()));
    }

    #[test]
    fn oldest_evicted_first() {
        let mut ledger = CommandLedger::new(2);
        let ids: Vec<_> = (0..3).map(|_| CommandId::new()).collect();
        for id in &ids {
            ledger.record(*id, ok());
        }
        assert_eq!(ledger.len(), 2);
        assert!(ledger.lookup(&ids[0]).is_none());
        assert!(ledger.lookup(&ids[2]).is_some());
    }

    #[test]
    fn records_preserve_order() {
        let mut ledger = CommandLedger::new(8);
        let a = CommandId::new();
        let b = CommandId::new();
        ledger.record(a, ok());
        ledger.record(b, ok());
        let rebuilt = CommandLedger::from_records(8, ledger.records());
        assert_eq!(
            rebuilt.records().iter().map(|r| r.command_id).collect::<Vec<_>>(),
            vec![a, b]
        );
    }

    #[test]
    fn shrinking_evicts() {
        let mut ledger = CommandLedger::new(8);
        for _ in 0..5 {
            ledger.record(CommandId::new(), ok());
        }
        ledger.set_max_records(2);
        assert_eq!(ledger.len(), 2);
    }
}
