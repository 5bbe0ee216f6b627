// Shared test helpers: fake adapters, a fake GPU backend and reading builders
#![allow(dead_code)]

use futures_util::future::BoxFuture;
use resmon::models::*;
use resmon::sources::{GpuBackend, Reading, SourceAdapter, SourceError};
use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::time::{Duration, Instant};

pub fn cpu_reading() -> CpuReading {
    CpuReading {
        model: "Test CPU".into(),
        usage_percent: 12.5,
        per_core_percent: vec![10.0, 15.0],
        physical_cores: 1,
        logical_cores: 2,
        frequency_mhz: 3000,
        load_average: LoadAverage::default(),
    }
}

pub fn memory_reading() -> MemoryReading {
    MemoryReading {
        total: 100,
        used: 50,
        available: 50,
        usage_percent: 50.0,
        swap_total: 0,
        swap_used: 0,
    }
}

pub fn disk_reading(mount: &str) -> DiskReading {
    DiskReading {
        mount: mount.into(),
        name: "sda1".into(),
        filesystem: "ext4".into(),
        total_space: 1000,
        used_space: 250,
        available_space: 750,
        usage_percent: 25.0,
    }
}

pub fn gpu_reading(index: u32) -> GpuReading {
    GpuReading {
        index,
        name: format!("Test GPU {index}"),
        utilization_percent: 40.0,
        vram_total: 8192,
        vram_used: 2048,
        vram_usage_percent: 25.0,
        temperature_c: Some(55),
    }
}

pub fn config_with(sources: &[SourceKind], interval_ms: u64) -> Arc<Configuration> {
    Arc::new(Configuration {
        version: 1,
        settings: SamplerSettings {
            enabled_sources: sources.iter().copied().collect(),
            interval_ms,
            ..SamplerSettings::default()
        },
    })
}

/// Adapter returning a fixed reading. Each call pops the next scripted delay (zero once the
/// script runs out) and records the (tokio) instant it started.
pub struct FakeAdapter {
    reading: Reading,
    delays: Mutex<VecDeque<Duration>>,
    fail: AtomicBool,
    calls: Mutex<Vec<Instant>>,
}

impl FakeAdapter {
    pub fn new(reading: Reading) -> Self {
        Self {
            reading,
            delays: Mutex::new(VecDeque::new()),
            fail: AtomicBool::new(false),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn cpu() -> Self {
        Self::new(Reading::Cpu(cpu_reading()))
    }

    pub fn memory() -> Self {
        Self::new(Reading::Memory(memory_reading()))
    }

    pub fn disk() -> Self {
        Self::new(Reading::Disks(vec![disk_reading("/")]))
    }

    pub fn gpu() -> Self {
        Self::new(Reading::Gpus(vec![gpu_reading(0)]))
    }

    pub fn with_delays(self, delays: impl IntoIterator<Item = Duration>) -> Self {
        self.delays.lock().unwrap().extend(delays);
        self
    }

    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn calls(&self) -> Vec<Instant> {
        self.calls.lock().unwrap().clone()
    }
}

impl SourceAdapter for FakeAdapter {
    fn kind(&self) -> SourceKind {
        self.reading.kind()
    }

    fn sample<'a>(
        &'a self,
        _config: &'a Configuration,
    ) -> BoxFuture<'a, Result<Reading, SourceError>> {
        Box::pin(async move {
            self.calls.lock().unwrap().push(Instant::now());
            let delay = self.delays.lock().unwrap().pop_front().unwrap_or_default();
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            if self.fail.load(Ordering::SeqCst) {
                return Err(SourceError::Unavailable(self.kind(), "fake outage".into()));
            }
            Ok(self.reading.clone())
        })
    }
}

pub fn all_fakes() -> Vec<Arc<dyn SourceAdapter>> {
    vec![
        Arc::new(FakeAdapter::cpu()),
        Arc::new(FakeAdapter::memory()),
        Arc::new(FakeAdapter::disk()),
        Arc::new(FakeAdapter::gpu()),
    ]
}

/// GPU backend with `count` devices; indices in `failing` error on every read.
pub struct FakeGpuBackend {
    pub count: u32,
    pub failing: Vec<u32>,
    pub available: bool,
}

impl FakeGpuBackend {
    pub fn with_devices(count: u32) -> Self {
        Self {
            count,
            failing: vec![],
            available: true,
        }
    }
}

impl GpuBackend for FakeGpuBackend {
    fn device_count(&self) -> Result<u32, SourceError> {
        if !self.available {
            return Err(SourceError::Unavailable(SourceKind::Gpu, "no driver".into()));
        }
        Ok(self.count)
    }

    fn read_device(&self, index: u32) -> Result<GpuReading, SourceError> {
        if index >= self.count || self.failing.contains(&index) {
            return Err(SourceError::Failed(
                SourceKind::Gpu,
                format!("device {index} lost"),
            ));
        }
        Ok(gpu_reading(index))
    }
}
