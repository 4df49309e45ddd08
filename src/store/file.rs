//! File-backed retained store

use super::{restore, RetainedStore};
use anyhow::{Context, Result};
use ldr_shared::{RetainedRecord, RetainedState};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Keeps the prost-encoded record in a single file
#[derive(Debug, Clone)]
pub struct FileStore {
    path: PathBuf,
}

impl FileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self.path.as_os_str().to_owned();
        name.push(".tmp");
        PathBuf::from(name)
    }
}

impl RetainedStore for FileStore {
    fn load(&mut self) -> RetainedState {
        let bytes = match fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                info!("No retained state at {}, first boot", self.path.display());
                return RetainedState::default();
            }
            Err(e) => {
                warn!("Failed to read retained state {}: {}", self.path.display(), e);
                return RetainedState::default();
            }
        };

        match RetainedRecord::decode_from(&bytes) {
            Ok(record) => restore(record),
            Err(e) => {
                warn!("Retained state corrupt, using defaults: {}", e);
                RetainedState::default()
            }
        }
    }

    fn save(&mut self, state: &RetainedState) -> Result<()> {
        let bytes = state.to_record().encode_to_bytes()?;
        let temp = self.temp_path();

        // Write then rename so a power loss never leaves a torn record
        fs::write(&temp, &bytes)
            .with_context(|| format!("writing {}", temp.display()))?;
        fs::rename(&temp, &self.path)
            .with_context(|| format!("replacing {}", self.path.display()))?;
        Ok(())
    }
}
