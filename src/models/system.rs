// CPU, memory, GPU readings and the per-tick snapshot

use serde::{Deserialize, Serialize};

use super::{DiskReading, SourceKind};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LoadAverage {
    pub one: f64,
    pub five: f64,
    pub fifteen: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CpuReading {
    pub model: String,
    pub usage_percent: f64,
    pub per_core_percent: Vec<f64>,
    pub physical_cores: u32,
    pub logical_cores: u32,
    pub frequency_mhz: u64,
    pub load_average: LoadAverage,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryReading {
    pub total: u64,
    pub used: u64,
    pub available: u64,
    pub usage_percent: f64,
    pub swap_total: u64,
    pub swap_used: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GpuReading {
    pub index: u32,
    pub name: String,
    pub utilization_percent: f64,
    pub vram_total: u64,
    pub vram_used: u64,
    pub vram_usage_percent: f64,
    /// Absent when the sensor could not be read this tick.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature_c: Option<u32>,
}

/// A GPU the backend can currently see.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GpuDevice {
    pub index: u32,
    pub name: String,
}

/// One immutable bundle of readings produced per tick.
///
/// A `None` source means "not sampled this tick" (disabled, excluded or failed) and is
/// omitted from the wire form entirely. It never means zero.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    pub sequence: u64,
    /// Sample start, Unix epoch milliseconds.
    pub taken_at: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpu: Option<CpuReading>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory: Option<MemoryReading>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub disks: Option<Vec<DiskReading>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gpus: Option<Vec<GpuReading>>,
}

impl Snapshot {
    pub fn empty(sequence: u64, taken_at: u64) -> Self {
        Self {
            sequence,
            taken_at,
            cpu: None,
            memory: None,
            disks: None,
            gpus: None,
        }
    }

    /// Sources that carry a reading in this snapshot.
    pub fn sources_present(&self) -> Vec<SourceKind> {
        let mut present = Vec::with_capacity(4);
        if self.cpu.is_some() {
            present.push(SourceKind::Cpu);
        }
        if self.memory.is_some() {
            present.push(SourceKind::Memory);
        }
        if self.disks.is_some() {
            present.push(SourceKind::Disk);
        }
        if self.gpus.is_some() {
            present.push(SourceKind::Gpu);
        }
        present
    }
}

/// Everything a settings UI can choose from right now.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceInventory {
    pub volumes: Vec<super::VolumeInfo>,
    pub gpus: Vec<GpuDevice>,
}
