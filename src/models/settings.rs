// Runtime sampler configuration models

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Lowest accepted sample interval.
pub const INTERVAL_FLOOR_MS: u64 = 100;
/// Highest accepted sample interval.
pub const INTERVAL_CEILING_MS: u64 = 300_000;
pub const DEFAULT_INTERVAL_MS: u64 = 1_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    Cpu,
    Memory,
    Disk,
    Gpu,
}

impl SourceKind {
    pub const ALL: [SourceKind; 4] = [
        SourceKind::Cpu,
        SourceKind::Memory,
        SourceKind::Disk,
        SourceKind::Gpu,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            SourceKind::Cpu => "cpu",
            SourceKind::Memory => "memory",
            SourceKind::Disk => "disk",
            SourceKind::Gpu => "gpu",
        }
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SourceKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "cpu" => Ok(SourceKind::Cpu),
            // "ram" is what older settings panels send
            "memory" | "ram" => Ok(SourceKind::Memory),
            "disk" | "hdd" => Ok(SourceKind::Disk),
            "gpu" => Ok(SourceKind::Gpu),
            _ => Err(s.to_string()),
        }
    }
}

/// The user-editable part of the configuration. Also the persisted settings file format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SamplerSettings {
    pub enabled_sources: BTreeSet<SourceKind>,
    pub interval_ms: u64,
    /// Mount points to sample. Empty = all detected.
    #[serde(default)]
    pub selected_disks: Vec<String>,
    /// GPU indices to sample. Empty = all detected.
    #[serde(default)]
    pub selected_gpu_indices: Vec<u32>,
}

impl Default for SamplerSettings {
    fn default() -> Self {
        Self {
            enabled_sources: SourceKind::ALL.into_iter().collect(),
            interval_ms: DEFAULT_INTERVAL_MS,
            selected_disks: Vec::new(),
            selected_gpu_indices: Vec::new(),
        }
    }
}

impl SamplerSettings {
    /// Forces the interval into [floor, ceiling]. Used for values that did not come through
    /// the validated update path (persisted file, programmatic construction).
    pub fn clamped(mut self) -> Self {
        self.interval_ms = self.interval_ms.clamp(INTERVAL_FLOOR_MS, INTERVAL_CEILING_MS);
        self
    }
}

/// A published, immutable configuration generation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Configuration {
    pub version: u64,
    #[serde(flatten)]
    pub settings: SamplerSettings,
}

impl Default for Configuration {
    fn default() -> Self {
        Self {
            version: 1,
            settings: SamplerSettings::default(),
        }
    }
}

impl Configuration {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.settings.interval_ms)
    }

    pub fn is_enabled(&self, kind: SourceKind) -> bool {
        self.settings.enabled_sources.contains(&kind)
    }

    pub fn disk_selected(&self, mount: &str) -> bool {
        self.settings.selected_disks.is_empty()
            || self.settings.selected_disks.iter().any(|d| d == mount)
    }

    pub fn gpu_selected(&self, index: u32) -> bool {
        self.settings.selected_gpu_indices.is_empty()
            || self.settings.selected_gpu_indices.contains(&index)
    }
}

/// Partial update sent by the settings UI. Omitted fields keep their current value.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ConfigurationUpdate {
    pub enabled_sources: Option<Vec<String>>,
    pub interval_ms: Option<u64>,
    pub selected_disks: Option<Vec<String>>,
    pub selected_gpu_indices: Option<Vec<u32>>,
    /// Write the resulting settings to the settings file.
    pub persist: bool,
}
