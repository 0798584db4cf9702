//! Persistence for device state.
//!
//! The entry cache and the journal directory are stored together in
//! `<data-dir>/device_state.json` so a restart picks up pending edits,
//! drafts and the known shared journals.

use anyhow::{Context, Result};
use journal_sync::{CacheSnapshot, JournalMeta};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

const STATE_FILE: &str = "device_state.json";

/// Everything a device keeps between runs.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DeviceState {
    pub cache: CacheSnapshot,
    /// Directory mirror of the shared journals this device belongs to.
    pub journals: Vec<JournalMeta>,
}

/// Storage for `DeviceState`.
pub struct DeviceStorage {
    path: PathBuf,
}

impl DeviceStorage {
    pub fn new(data_dir: &Path) -> Self {
        Self {
            path: data_dir.join(STATE_FILE),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load saved state. A missing file is an empty state.
    pub fn load(&self) -> Result<DeviceState> {
        if !self.path.exists() {
            debug!("No saved state at {:?}", self.path);
            return Ok(DeviceState::default());
        }

        let contents = fs::read_to_string(&self.path)
            .with_context(|| format!("reading {:?}", self.path))?;
        let state = serde_json::from_str(&contents)
            .with_context(|| format!("parsing {:?}", self.path))?;
        Ok(state)
    }

    pub fn save(&self, state: &DeviceState) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }

        let contents = serde_json::to_string_pretty(state)?;
        let temp = self.path.with_extension("json.tmp");
        fs::write(&temp, contents)?;
        fs::rename(&temp, &self.path)?;
        debug!("Saved device state to {:?}", self.path);
        Ok(())
    }
}
