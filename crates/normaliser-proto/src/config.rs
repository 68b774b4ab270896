use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use super::platform;
use crate::state::RefreshMode;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub processor: ProcessorConfig,
    #[serde(default)]
    pub timing: TimingConfig,
}

/// Where the two persistence tiers live on disk.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Cross-device tier (settings, presets, last curve).
    #[serde(default = "default_sync_file")]
    pub sync_file: PathBuf,
    /// Device-local tier (most recent curve only).
    #[serde(default = "default_local_file")]
    pub local_file: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessorConfig {
    #[serde(default = "default_processor_address")]
    pub address: String,
    /// Upper bound on a single request/response round trip.
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

/// Debounce windows and meter cadence, in milliseconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimingConfig {
    #[serde(default = "default_local_debounce_ms")]
    pub local_debounce_ms: u64,
    #[serde(default = "default_sync_debounce_ms")]
    pub sync_debounce_ms: u64,
    #[serde(default = "default_fast_meter_ms")]
    pub fast_meter_ms: u64,
    #[serde(default = "default_eco_meter_ms")]
    pub eco_meter_ms: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            sync_file: default_sync_file(),
            local_file: default_local_file(),
        }
    }
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            address: default_processor_address(),
            request_timeout_ms: default_request_timeout_ms(),
        }
    }
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            local_debounce_ms: default_local_debounce_ms(),
            sync_debounce_ms: default_sync_debounce_ms(),
            fast_meter_ms: default_fast_meter_ms(),
            eco_meter_ms: default_eco_meter_ms(),
        }
    }
}

impl ProcessorConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

impl TimingConfig {
    pub fn local_debounce(&self) -> Duration {
        Duration::from_millis(self.local_debounce_ms)
    }

    pub fn sync_debounce(&self) -> Duration {
        Duration::from_millis(self.sync_debounce_ms)
    }

    pub fn meter_delay(&self, mode: RefreshMode) -> Duration {
        match mode {
            RefreshMode::Fast => Duration::from_millis(self.fast_meter_ms),
            RefreshMode::Eco => Duration::from_millis(self.eco_meter_ms),
        }
    }
}

fn default_sync_file() -> PathBuf {
    platform::data_dir().join("sync.json")
}

fn default_local_file() -> PathBuf {
    platform::data_dir().join("local.json")
}

fn default_processor_address() -> String {
    platform::processor_address()
}

fn default_request_timeout_ms() -> u64 {
    1000
}

fn default_local_debounce_ms() -> u64 {
    120
}

fn default_sync_debounce_ms() -> u64 {
    600
}

fn default_fast_meter_ms() -> u64 {
    RefreshMode::Fast.meter_delay().as_millis() as u64
}

fn default_eco_meter_ms() -> u64 {
    RefreshMode::Eco.meter_delay().as_millis() as u64
}

impl Config {
    pub fn load() -> anyhow::Result<Self> {
        let config_path = Self::config_path();

        if !config_path.exists() {
            let config = Self::default();
            config.save()?;
            tracing::info!("wrote default config to {}", config_path.display());
            return Ok(config);
        }

        let content = std::fs::read_to_string(&config_path)?;
        toml::from_str(&content).with_context(|| format!("parsing {}", config_path.display()))
    }

    pub fn save(&self) -> anyhow::Result<()> {
        let config_path = Self::config_path();
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(&config_path, content)?;
        Ok(())
    }

    pub fn config_path() -> PathBuf {
        platform::config_dir().join("config.toml")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.processor.address, "127.0.0.1:9877");
        assert_eq!(config.processor.request_timeout(), Duration::from_secs(1));
        assert_eq!(config.timing.local_debounce(), Duration::from_millis(120));
        assert_eq!(config.timing.sync_debounce(), Duration::from_millis(600));
        assert_eq!(
            config.timing.meter_delay(RefreshMode::Eco),
            Duration::from_millis(300)
        );
        assert!(config.storage.sync_file.ends_with("normaliser/sync.json"));
        assert!(config.storage.local_file.ends_with("normaliser/local.json"));
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config: Config = toml::from_str(
            r#"
            [timing]
            sync_debounce_ms = 900
            "#,
        )
        .unwrap();
        assert_eq!(config.timing.sync_debounce_ms, 900);
        assert_eq!(config.timing.local_debounce_ms, 120);
        assert_eq!(config.processor.request_timeout_ms, 1000);
    }
}
