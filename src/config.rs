use log::warn;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Top-level leafprint configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LeafConfig {
    pub accounting: AccountingConfig,
    pub power: PowerConfig,
    pub region: RegionConfig,
    pub provider: ProviderConfig,
    pub storage: StorageConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AccountingConfig {
    /// Seconds between accounting ticks.
    pub tick_interval_secs: u64,
}

impl Default for AccountingConfig {
    fn default() -> Self {
        Self {
            tick_interval_secs: 60,
        }
    }
}

impl AccountingConfig {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs(self.tick_interval_secs.max(1))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PowerConfig {
    /// Minutes between discharge rate recalibrations.
    pub recalibration_interval_mins: u32,
    /// Watts assumed when the machine has no battery to measure.
    pub no_battery_watts: f64,
}

impl Default for PowerConfig {
    fn default() -> Self {
        Self {
            recalibration_interval_mins: 5,
            no_battery_watts: 60.0,
        }
    }
}

impl PowerConfig {
    pub fn recalibration_interval(&self) -> Duration {
        Duration::from_secs(u64::from(self.recalibration_interval_mins.max(1)) * 60)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RegionConfig {
    /// ISO 3166 country code selecting the intensity provider.
    pub country: String,
    /// Provider-specific region identifier.
    pub region_id: String,
}

impl Default for RegionConfig {
    fn default() -> Self {
        Self {
            country: "GB".to_string(),
            region_id: "13".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    /// Upper bound for a single provider request.
    pub timeout_secs: u64,
    /// Static intensity values, replacing the network provider.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fixed: Option<FixedIntensityConfig>,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 5,
            fixed: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FixedIntensityConfig {
    pub now: i32,
    /// Defaults to `now`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next: Option<i32>,
    /// Defaults to `now`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub later: Option<i32>,
    #[serde(default = "default_valid_minutes")]
    pub valid_minutes: u32,
}

const fn default_valid_minutes() -> u32 {
    30
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Override for the state file location.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state_file: Option<PathBuf>,
}

const SYSTEM_CONFIG: &str = "/etc/leafprint/config.toml";

/// Load the system config file if it exists.
fn load_system() -> Option<toml::Value> {
    let content = std::fs::read_to_string(SYSTEM_CONFIG).ok()?;
    parse_value(Path::new(SYSTEM_CONFIG), &content)
}

/// Load the user config file (~/.config/leafprint/config.toml) if it exists.
fn load_user() -> Option<toml::Value> {
    let path = dirs::config_dir()?.join("leafprint").join("config.toml");
    let content = std::fs::read_to_string(&path).ok()?;
    parse_value(&path, &content)
}

fn parse_value(path: &Path, content: &str) -> Option<toml::Value> {
    toml::from_str(content)
        .map_err(|e| warn!("ignoring malformed config at {}: {}", path.display(), e))
        .ok()
}

/// Recursively merge two TOML values. Tables are merged key-by-key;
/// all other types in `overlay` replace `base`.
fn merge_values(base: toml::Value, overlay: toml::Value) -> toml::Value {
    match (base, overlay) {
        (toml::Value::Table(mut base_table), toml::Value::Table(overlay_table)) => {
            for (key, overlay_val) in overlay_table {
                let merged = match base_table.remove(&key) {
                    Some(base_val) => merge_values(base_val, overlay_val),
                    None => overlay_val,
                };
                base_table.insert(key, merged);
            }
            toml::Value::Table(base_table)
        }
        (_, overlay) => overlay,
    }
}

/// Load config from a specific path, ignoring system/user files.
fn load_from_path(path: &Path) -> LeafConfig {
    match std::fs::read_to_string(path) {
        Ok(content) => toml::from_str(&content).unwrap_or_else(|e| {
            warn!("failed to parse config at {}: {}", path.display(), e);
            LeafConfig::default()
        }),
        Err(e) => {
            warn!("failed to read config at {}: {}", path.display(), e);
            LeafConfig::default()
        }
    }
}

/// Load the merged config: system defaults, then user overrides.
/// If `override_path` is provided, use only that file instead.
pub fn load(override_path: Option<&PathBuf>) -> LeafConfig {
    if let Some(path) = override_path {
        return load_from_path(path);
    }

    let merged = match (load_system(), load_user()) {
        (Some(s), Some(u)) => Some(merge_values(s, u)),
        (Some(v), None) | (None, Some(v)) => Some(v),
        (None, None) => None,
    };

    match merged {
        Some(value) => value.try_into().unwrap_or_else(|e| {
            warn!("failed to deserialize config: {}", e);
            LeafConfig::default()
        }),
        None => LeafConfig::default(),
    }
}
