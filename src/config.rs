use anyhow::{anyhow, ensure, Result};
use serde::Deserialize;
use std::{path::Path, time::Duration};

const DEFAULT_TICK_INTERVAL_SECS: u64 = 60;
const DEFAULT_CLOCK_TOLERANCE_MS: u64 = 2000;

/// Runtime settings, read from an optional JSON file
#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Bluetooth adapter name (e.g. "hci0"), the default adapter if unset
    pub adapter: Option<String>,
    /// Name included in advertisements
    pub local_name: Option<String>,
    /// Power the adapter on at startup if it's off
    pub power_on: bool,
    /// Interval between clock samples and time notifications
    pub tick_interval_secs: u64,
    /// How far the wall clock may drift between two samples
    /// before it counts as manually changed
    pub clock_tolerance_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            adapter: None,
            local_name: None,
            power_on: true,
            tick_interval_secs: DEFAULT_TICK_INTERVAL_SECS,
            clock_tolerance_ms: DEFAULT_CLOCK_TOLERANCE_MS,
        }
    }
}

impl Config {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)
            .map_err(|error| anyhow!("Failed to read {}: {}", path.display(), error))?;
        Self::from_json(&json)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|error| anyhow!("Invalid config: {}", error))?;
        ensure!(config.tick_interval_secs > 0, "tick_interval_secs must be positive");
        Ok(config)
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs(self.tick_interval_secs)
    }

    pub fn clock_tolerance(&self) -> Duration {
        Duration::from_millis(self.clock_tolerance_ms)
    }
}
