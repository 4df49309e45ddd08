//! Volatile retained store

use super::{restore, RetainedStore};
use anyhow::Result;
use ldr_shared::{RetainedRecord, RetainedState};

/// Keeps the record in memory; loses it with the process
#[derive(Debug, Default)]
pub struct MemoryStore {
    record: Option<RetainedRecord>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the store with a raw record
    #[cfg(test)]
    pub fn with_record(record: RetainedRecord) -> Self {
        Self {
            record: Some(record),
        }
    }
}

impl RetainedStore for MemoryStore {
    fn load(&mut self) -> RetainedState {
        match &self.record {
            Some(record) => restore(record.clone()),
            None => RetainedState::default(),
        }
    }

    fn save(&mut self, state: &RetainedState) -> Result<()> {
        self.record = Some(state.to_record());
        Ok(())
    }
}
