//! Storage containers under log replication.
//!
//! Commands reach every replica in log order and may be delivered more than
//! once. [`ContainerStateMachine`] guarantees that each distinct command has
//! its side effect at most once per replica:
//!
//! - the bounded [`CommandLedger`] answers recently seen command ids with the
//!   remembered outcome;
//! - the pure functions in [`transition`] recognise duplicates from container
//!   state when the ledger no longer holds the id.

mod command;
mod ledger;
mod machine;
pub mod transition;
mod types;

pub use command::{CommandKind, CommandResult, ContainerCommand};
pub use ledger::{CommandLedger, LedgerConfig, LedgerRecord, Outcome};
pub use machine::{ContainerStateMachine, ScrubReport};
pub use transition::{Effect, Transition};
pub use types::{
    BlockData, ChunkInfo, Container, ContainerMetadata, ContainerState, ContainerStats,
    StoredChunk, sha256_hex,
};
