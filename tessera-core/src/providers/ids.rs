//! Identity minting.

use std::sync::atomic::{AtomicU64, Ordering};
use uuid::Uuid;

/// Source of fresh UUIDs for snapshot and job identities.
pub trait IdProvider: Send + Sync {
    /// Mint a new UUID.
    fn mint(&self) -> Uuid;
}

/// Random v4 UUIDs.
#[derive(Debug, Clone, Copy, Default)]
pub struct RandomIds;

impl IdProvider for RandomIds {
    fn mint(&self) -> Uuid {
        Uuid::new_v4()
    }
}

/// Sequential UUIDs for tests (00000000-0000-0000-0000-000000000001, ...).
#[derive(Debug)]
pub struct SequentialIds {
    next: AtomicU64,
}

impl SequentialIds {
    /// Start the sequence at 1.
    pub fn new() -> Self {
        Self::starting_at(1)
    }

    /// Start the sequence at `start`.
    pub fn starting_at(start: u64) -> Self {
        Self {
            next: AtomicU64::new(start),
        }
    }
}

impl Default for SequentialIds {
    fn default() -> Self {
        Self::new()
    }
}

impl IdProvider for SequentialIds {
    fn mint(&self) -> Uuid {
        let n = self.next.fetch_add(1, Ordering::SeqCst);
        Uuid::from_u64_pair(0, n)
    }
}
