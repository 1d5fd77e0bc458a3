//! Pure per-kind transition functions.
//!
//! Each function inspects the current container (if any) and returns the
//! result to hand back together with the effect to perform. Nothing here
//! mutates state; `Container::apply_effect` does that, so a duplicate that
//! yields `Effect::None` provably performs no side effect.

use super::command::{CommandKind, CommandResult};
use super::types::{BlockData, ChunkInfo, Container, ContainerState, StoredChunk, sha256_hex};
use crate::error::{Result, TesseraError};
use crate::types::{BlockId, ContainerId};

/// Side effect requested by a transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    /// Nothing to do; the command was already reflected in state.
    None,
    /// Create the container.
    Create,
    /// Change lifecycle state.
    SetState {
        /// New state.
        state: ContainerState,
        /// Reason, for UNHEALTHY.
        reason: Option<String>,
    },
    /// Store chunk bytes.
    StoreChunk {
        /// Block owning the chunk.
        block_id: BlockId,
        /// Chunk descriptor and bytes.
        chunk: StoredChunk,
    },
    /// Store block metadata.
    StoreBlock(BlockData),
}

/// Result and effect of one command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    /// What the caller gets back.
    pub result: CommandResult,
    /// What to perform on the container.
    pub effect: Effect,
}

impl Transition {
    fn new(result: CommandResult, effect: Effect) -> Self {
        Self { result, effect }
    }

    fn noop(result: CommandResult) -> Self {
        Self::new(result, Effect::None)
    }

    /// Whether this transition absorbs a duplicate.
    #[must_use]
    pub fn is_noop(&self) -> bool {
        self.effect == Effect::None
    }
}

/// Dispatch `kind` against `container`.
pub fn transition(
    container_id: ContainerId,
    container: Option<&Container>,
    kind: &CommandKind,
) -> Result<Transition> {
    if let CommandKind::CreateContainer = kind {
        return Ok(create_container(container_id, container));
    }

    let container = container.ok_or(TesseraError::ContainerNotFound { container_id })?;
    match kind {
        CommandKind::CreateContainer => Ok(create_container(container_id, Some(container))),
        CommandKind::MarkContainerClosing => mark_closing(container),
        CommandKind::CloseContainer => close_container(container),
        CommandKind::MarkContainerUnhealthy { reason } => Ok(mark_unhealthy(container, reason)),
        CommandKind::WriteChunk {
            block_id,
            chunk,
            data,
            overwrite,
        } => write_chunk(container, *block_id, chunk, data, *overwrite),
        CommandKind::PutBlock { block } => put_block(container, block),
    }
}

fn lifecycle(container_id: ContainerId, state: ContainerState) -> CommandResult {
    CommandResult::Container {
        container_id,
        state,
    }
}

fn unhealthy(container: &Container) -> TesseraError {
    TesseraError::ContainerUnhealthy {
        container_id: container.id,
        reason: container
            .unhealthy_reason
            .clone()
            .unwrap_or_else(|| "unknown".to_string()),
    }
}

/// Existing containers absorb the create regardless of their state.
pub fn create_container(container_id: ContainerId, container: Option<&Container>) -> Transition {
    match container {
        Some(existing) => Transition::noop(lifecycle(container_id, existing.state)),
        None => Transition::new(lifecycle(container_id, ContainerState::Open), Effect::Create),
    }
}

/// OPEN -> CLOSING. CLOSING and CLOSED absorb the command.
pub fn mark_closing(container: &Container) -> Result<Transition> {
    let result = |state| lifecycle(container.id, state);
    match container.state {
        ContainerState::Open => Ok(Transition::new(
            result(ContainerState::Closing),
            Effect::SetState {
                state: ContainerState::Closing,
                reason: None,
            },
        )),
        ContainerState::Closing | ContainerState::Closed => {
            Ok(Transition::noop(result(container.state)))
        }
        ContainerState::Unhealthy => Err(unhealthy(container)),
    }
}

/// OPEN/CLOSING -> CLOSED exactly once.
pub fn close_container(container: &Container) -> Result<Transition> {
    match container.state {
        ContainerState::Open | ContainerState::Closing => Ok(Transition::new(
            lifecycle(container.id, ContainerState::Closed),
            Effect::SetState {
                state: ContainerState::Closed,
                reason: None,
            },
        )),
        ContainerState::Closed => Ok(Transition::noop(lifecycle(
            container.id,
            ContainerState::Closed,
        ))),
        ContainerState::Unhealthy => Err(unhealthy(container)),
    }
}

/// Any state -> UNHEALTHY. The first reason sticks.
pub fn mark_unhealthy(container: &Container, reason: &str) -> Transition {
    let result = lifecycle(container.id, ContainerState::Unhealthy);
    if container.state == ContainerState::Unhealthy {
        return Transition::noop(result);
    }
    Transition::new(
        result,
        Effect::SetState {
            state: ContainerState::Unhealthy,
            reason: Some(reason.to_string()),
        },
    )
}

/// Store a chunk, absorbing identical rewrites.
pub fn write_chunk(
    container: &Container,
    block_id: BlockId,
    chunk: &ChunkInfo,
    data: &[u8],
    overwrite: bool,
) -> Result<Transition> {
    if container.state == ContainerState::Unhealthy {
        return Err(unhealthy(container));
    }
    if !container.state.accepts_writes() {
        return Err(TesseraError::ContainerNotOpen {
            container_id: container.id,
            state: container.state,
        });
    }

    verify_payload(block_id, chunk, data)?;

    let result = CommandResult::Chunk {
        block_id,
        chunk: chunk.clone(),
    };
    if let Some(existing) = container.chunk(&block_id, &chunk.chunk_name) {
        if !overwrite {
            if existing.info.same_content(chunk) {
                return Ok(Transition::noop(result));
            }
            return Err(TesseraError::ChunkAlreadyExists {
                block_id,
                chunk_name: chunk.chunk_name.clone(),
            });
        }
    }

    Ok(Transition::new(
        result,
        Effect::StoreChunk {
            block_id,
            chunk: StoredChunk {
                info: chunk.clone(),
                data: data.to_vec(),
            },
        },
    ))
}

fn verify_payload(block_id: BlockId, chunk: &ChunkInfo, data: &[u8]) -> Result<()> {
    let mismatch = |cause: String| TesseraError::ChecksumMismatch {
        block_id,
        chunk_name: chunk.chunk_name.clone(),
        cause,
    };
    if data.len() as u64 != chunk.len {
        return Err(mismatch(format!(
            "declared length {} but payload has {} bytes",
            chunk.len,
            data.len()
        )));
    }
    let actual = sha256_hex(data);
    if actual != chunk.checksum {
        return Err(mismatch(format!(
            "declared checksum {} but payload hashes to {}",
            chunk.checksum, actual
        )));
    }
    Ok(())
}

/// Commit block metadata; BCSID only moves forward.
pub fn put_block(container: &Container, block: &BlockData) -> Result<Transition> {
    if container.state == ContainerState::Unhealthy {
        return Err(unhealthy(container));
    }
    if let Some(stored) = container.block(&block.block_id) {
        if block.bcsid <= stored.bcsid {
            return Ok(Transition::noop(CommandResult::Block(stored.clone())));
        }
    }
    if !container.state.accepts_writes() {
        return Err(TesseraError::ContainerNotOpen {
            container_id: container.id,
            state: container.state,
        });
    }
    Ok(Transition::new(
        CommandResult::Block(block.clone()),
        Effect::StoreBlock(block.clone()),
    ))
}

impl Container {
    /// Perform a transition's effect.
    pub fn apply_effect(&mut self, effect: Effect) {
        match effect {
            Effect::None | Effect::Create => {}
            Effect::SetState { state, reason } => {
                self.state = state;
                if reason.is_some() {
                    self.unhealthy_reason = reason;
                }
            }
            Effect::StoreChunk { block_id, chunk } => {
                self.stats.chunk_writes += 1;
                self.stats.bytes_written += chunk.data.len() as u64;
                self.chunks
                    .entry(block_id.local_id)
                    .or_default()
                    .insert(chunk.info.chunk_name.clone(), chunk);
            }
            Effect::StoreBlock(block) => {
                self.stats.block_commits += 1;
                self.bcsid = self.bcsid.max(block.bcsid);
                self.blocks.insert(block.block_id.local_id, block);
            }
        }
    }
}
