//! Retained state persistence
//!
//! This module handles:
//! - Loading the retained record at wake, with first-boot defaults
//! - Repairing records whose invariants no longer hold
//! - Writing the record back before power-down

mod file;
mod memory;

pub use file::FileStore;
pub use memory::MemoryStore;

use anyhow::Result;
use ldr_shared::{RetainedRecord, RetainedState};
use tracing::warn;

/// A medium that keeps the retained record across power-down
pub trait RetainedStore {
    /// Load the retained state; never fails, falling back to defaults
    fn load(&mut self) -> RetainedState;

    /// Persist the retained state
    fn save(&mut self, state: &RetainedState) -> Result<()>;
}

/// Build state from a persisted record, logging any repairs
fn restore(record: RetainedRecord) -> RetainedState {
    let (state, repairs) = RetainedState::from_record(record);
    for repair in repairs {
        warn!("Retained record invalid: {}", repair);
    }
    state
}
