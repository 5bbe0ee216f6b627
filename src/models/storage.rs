// Storage / disk models

use serde::{Deserialize, Serialize};

/// One mounted volume as read on a single tick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiskReading {
    pub mount: String,
    pub name: String,
    pub filesystem: String,
    pub total_space: u64,
    pub used_space: u64,
    pub available_space: u64,
    pub usage_percent: f64,
}

/// A volume the disk adapter can currently see (settings UI picks from these).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VolumeInfo {
    pub mount: String,
    pub name: String,
    pub filesystem: String,
}
