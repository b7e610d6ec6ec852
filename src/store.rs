//! Persistence of totals across runs.

use crate::error::{Error, Result};
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Where the lifetime total lives between runs.
///
/// Implementations swallow their own I/O failures: a broken store falls
/// back to zero on load and logs on save.
pub trait CarbonStore {
    fn load_lifetime_carbon(&self) -> f64;
    fn save_lifetime_carbon(&mut self, grams: f64);
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PersistedState {
    pub lifetime_carbon_grams: f64,
    pub average_discharge_rate_mw: i64,
}

/// JSON state file, by default `$XDG_DATA_HOME/leafprint/state.json`.
#[derive(Debug, Clone)]
pub struct StateFile {
    path: PathBuf,
    state: PersistedState,
}

impl StateFile {
    pub fn default_path() -> Option<PathBuf> {
        dirs::data_dir().map(|d| d.join("leafprint").join("state.json"))
    }

    /// Open the state file, treating a missing or corrupt file as empty.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let state = match Self::read(&path) {
            Ok(Some(state)) => state,
            Ok(None) => {
                debug!("No state file at {}, starting fresh", path.display());
                PersistedState::default()
            }
            Err(e) => {
                warn!("{}, starting fresh", e);
                PersistedState::default()
            }
        };
        Self { path, state }
    }

    fn read(path: &Path) -> Result<Option<PersistedState>> {
        if !path.exists() {
            return Ok(None);
        }
        let data = std::fs::read_to_string(path)
            .map_err(|e| Error::State(format!("failed to read state file: {}", e)))?;
        let state = serde_json::from_str(&data)
            .map_err(|e| Error::State(format!("failed to parse state file: {}", e)))?;
        Ok(Some(state))
    }

    pub fn write(&self) -> Result<()> {
        if let Some(dir) = self.path.parent() {
            std::fs::create_dir_all(dir)
                .map_err(|e| Error::State(format!("failed to create state dir: {}", e)))?;
        }
        let data = serde_json::to_string_pretty(&self.state)
            .map_err(|e| Error::State(format!("failed to serialize state: {}", e)))?;
        std::fs::write(&self.path, data)
            .map_err(|e| Error::State(format!("failed to write state file: {}", e)))?;
        Ok(())
    }

    fn write_logged(&self) {
        if let Err(e) = self.write() {
            warn!("{} ({})", e, self.path.display());
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn state(&self) -> PersistedState {
        self.state
    }

    pub fn average_discharge_rate_mw(&self) -> i64 {
        self.state.average_discharge_rate_mw.max(0)
    }

    /// Clear the lifetime total, reporting a failed write.
    pub fn reset(&mut self) -> Result<()> {
        self.state.lifetime_carbon_grams = 0.0;
        self.write()
    }

    pub fn save_average_discharge_rate(&mut self, rate_mw: i64) {
        self.state.average_discharge_rate_mw = rate_mw.max(0);
        self.write_logged();
    }
}

impl CarbonStore for StateFile {
    fn load_lifetime_carbon(&self) -> f64 {
        let grams = self.state.lifetime_carbon_grams;
        if !grams.is_finite() || grams < 0.0 {
            warn!("Stored lifetime carbon {} is invalid, using 0", grams);
            return 0.0;
        }
        grams
    }

    fn save_lifetime_carbon(&mut self, grams: f64) {
        self.state.lifetime_carbon_grams = grams;
        self.write_logged();
    }
}
