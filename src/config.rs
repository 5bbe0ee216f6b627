use crate::models::{
    DEFAULT_INTERVAL_MS, INTERVAL_CEILING_MS, INTERVAL_FLOOR_MS, SamplerSettings, SourceKind,
};
use serde::Deserialize;
use std::path::PathBuf;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub sampler: SamplingConfig,
    #[serde(default)]
    pub hub: HubConfig,
    #[serde(default)]
    pub settings: SettingsFileConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

fn default_host() -> String {
    "127.0.0.1".into()
}

fn default_port() -> u16 {
    8888
}

#[derive(Debug, Clone, Deserialize)]
pub struct SamplingConfig {
    /// Initial sample interval; the settings API can change it at runtime.
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,
    /// Sources enabled at startup (cpu, memory, disk, gpu).
    #[serde(default = "default_enabled_sources")]
    pub enabled_sources: Vec<SourceKind>,
    /// Time budget for one tick's adapter calls; stragglers count as unavailable.
    #[serde(default = "default_adapter_timeout_ms")]
    pub adapter_timeout_ms: u64,
    /// How often to log sampler stats at INFO level.
    #[serde(default = "default_stats_log_interval_secs")]
    pub stats_log_interval_secs: u64,
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_interval_ms(),
            enabled_sources: default_enabled_sources(),
            adapter_timeout_ms: default_adapter_timeout_ms(),
            stats_log_interval_secs: default_stats_log_interval_secs(),
        }
    }
}

fn default_interval_ms() -> u64 {
    DEFAULT_INTERVAL_MS
}

fn default_enabled_sources() -> Vec<SourceKind> {
    SourceKind::ALL.to_vec()
}

fn default_adapter_timeout_ms() -> u64 {
    750
}

fn default_stats_log_interval_secs() -> u64 {
    60
}

#[derive(Debug, Clone, Deserialize)]
pub struct HubConfig {
    /// Frames buffered per subscriber before the oldest is dropped.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            queue_capacity: default_queue_capacity(),
        }
    }
}

fn default_queue_capacity() -> usize {
    16
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SettingsFileConfig {
    /// JSON file holding persisted runtime settings. Unset = updates live in memory only.
    pub path: Option<PathBuf>,
}

impl AppConfig {
    /// Reads `CONFIG_FILE` (default `config.toml`). A missing file means all defaults.
    pub fn load() -> anyhow::Result<Self> {
        let path = std::env::var("CONFIG_FILE").unwrap_or_else(|_| "config.toml".into());
        match std::fs::read_to_string(&path) {
            Ok(s) => Self::load_from_str(&s),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = %path, "config file not found, using defaults");
                let config = Self::default();
                config.validate()?;
                Ok(config)
            }
            Err(e) => Err(anyhow::anyhow!("reading {}: {}", path, e)),
        }
    }

    /// Parse and validate config from a string (e.g. for tests).
    pub fn load_from_str(s: &str) -> anyhow::Result<Self> {
        let config: AppConfig = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    /// Runtime settings to start with when no settings file overrides them.
    pub fn initial_settings(&self) -> SamplerSettings {
        SamplerSettings {
            enabled_sources: self.sampler.enabled_sources.iter().copied().collect(),
            interval_ms: self.sampler.interval_ms,
            ..SamplerSettings::default()
        }
    }

    fn validate(&self) -> anyhow::Result<()> {
        anyhow::ensure!(
            self.server.port > 0,
            "server.port must be between 1 and 65535, got {}",
            self.server.port
        );
        anyhow::ensure!(
            !self.server.host.is_empty(),
            "server.host must be non-empty"
        );
        anyhow::ensure!(
            (INTERVAL_FLOOR_MS..=INTERVAL_CEILING_MS).contains(&self.sampler.interval_ms),
            "sampler.interval_ms must be between {} and {}, got {}",
            INTERVAL_FLOOR_MS,
            INTERVAL_CEILING_MS,
            self.sampler.interval_ms
        );
        anyhow::ensure!(
            self.sampler.adapter_timeout_ms > 0,
            "sampler.adapter_timeout_ms must be > 0, got {}",
            self.sampler.adapter_timeout_ms
        );
        anyhow::ensure!(
            self.sampler.stats_log_interval_secs > 0,
            "sampler.stats_log_interval_secs must be > 0, got {}",
            self.sampler.stats_log_interval_secs
        );
        anyhow::ensure!(
            self.hub.queue_capacity > 0,
            "hub.queue_capacity must be > 0, got {}",
            self.hub.queue_capacity
        );
        if let Some(path) = &self.settings.path {
            anyhow::ensure!(
                !path.as_os_str().is_empty(),
                "settings.path must be non-empty when set"
            );
        }
        Ok(())
    }
}
