// Domain models

mod diagnostics;
mod settings;
mod storage;
mod system;

pub use diagnostics::{
    Diagnostics, SamplerDiagnostics, SamplerState, SubscriberDiagnostics, SubscriberState,
};
pub use settings::{
    Configuration, ConfigurationUpdate, DEFAULT_INTERVAL_MS, INTERVAL_CEILING_MS,
    INTERVAL_FLOOR_MS, SamplerSettings, SourceKind,
};
pub use storage::{DiskReading, VolumeInfo};
pub use system::{
    CpuReading, DeviceInventory, GpuDevice, GpuReading, LoadAverage, MemoryReading, Snapshot,
};
