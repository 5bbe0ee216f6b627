// GPU utilization, VRAM and temperature (NVML)

use super::{InFlight, Reading, SourceAdapter, SourceError, run_exclusive, usage_percent};
use crate::models::{Configuration, GpuDevice, GpuReading, SourceKind};
use futures_util::future::{BoxFuture, join_all};
use nvml_wrapper::Nvml;
use nvml_wrapper::enum_wrappers::device::TemperatureSensor;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tracing::instrument;

/// Device-level access to a GPU driver. Every call is blocking and may fail per device.
pub trait GpuBackend: Send + Sync + 'static {
    fn device_count(&self) -> Result<u32, SourceError>;

    fn read_device(&self, index: u32) -> Result<GpuReading, SourceError>;

    fn describe(&self, index: u32) -> Result<GpuDevice, SourceError> {
        self.read_device(index).map(|r| GpuDevice {
            index: r.index,
            name: r.name,
        })
    }
}

/// NVIDIA driver access. When the driver library cannot be loaded the backend stays usable
/// but reports the source as unavailable.
pub struct NvmlBackend {
    nvml: Option<Nvml>,
}

impl NvmlBackend {
    pub fn init() -> Self {
        match Nvml::init() {
            Ok(nvml) => {
                match nvml.sys_driver_version() {
                    Ok(v) => tracing::info!(driver_version = %v, "NVML initialized"),
                    Err(_) => tracing::info!("NVML initialized"),
                }
                Self { nvml: Some(nvml) }
            }
            Err(e) => {
                tracing::info!(error = %e, "NVML not available; GPU readings disabled");
                Self { nvml: None }
            }
        }
    }

    fn nvml(&self) -> Result<&Nvml, SourceError> {
        self.nvml
            .as_ref()
            .ok_or_else(|| SourceError::Unavailable(SourceKind::Gpu, "NVML not loaded".into()))
    }
}

fn driver_error(index: u32, e: impl std::fmt::Display) -> SourceError {
    SourceError::Failed(SourceKind::Gpu, format!("device {index}: {e}"))
}

impl GpuBackend for NvmlBackend {
    fn device_count(&self) -> Result<u32, SourceError> {
        self.nvml()?
            .device_count()
            .map_err(|e| SourceError::Failed(SourceKind::Gpu, e.to_string()))
    }

    fn read_device(&self, index: u32) -> Result<GpuReading, SourceError> {
        let device = self
            .nvml()?
            .device_by_index(index)
            .map_err(|e| driver_error(index, e))?;
        let name = device.name().map_err(|e| driver_error(index, e))?;
        let utilization = device
            .utilization_rates()
            .map_err(|e| driver_error(index, e))?;
        let memory = device.memory_info().map_err(|e| driver_error(index, e))?;
        // Some boards expose no sensor; keep the rest of the reading.
        let temperature_c = device.temperature(TemperatureSensor::Gpu).ok();
        Ok(GpuReading {
            index,
            name,
            utilization_percent: f64::from(utilization.gpu).clamp(0.0, 100.0),
            vram_total: memory.total,
            vram_used: memory.used,
            vram_usage_percent: usage_percent(memory.used, memory.total),
            temperature_c,
        })
    }

    fn describe(&self, index: u32) -> Result<GpuDevice, SourceError> {
        let device = self
            .nvml()?
            .device_by_index(index)
            .map_err(|e| driver_error(index, e))?;
        let name = device.name().map_err(|e| driver_error(index, e))?;
        Ok(GpuDevice { index, name })
    }
}

pub struct GpuAdapter<B: GpuBackend = NvmlBackend> {
    backend: Arc<B>,
    unavailable_logged: AtomicBool,
    listing: InFlight,
    detecting: InFlight,
    /// One slot per device index, so a hung device only blocks itself.
    devices: Mutex<HashMap<u32, InFlight>>,
}

impl<B: GpuBackend> GpuAdapter<B> {
    pub fn new(backend: B) -> Self {
        Self {
            backend: Arc::new(backend),
            unavailable_logged: AtomicBool::new(false),
            listing: InFlight::default(),
            detecting: InFlight::default(),
            devices: Mutex::new(HashMap::new()),
        }
    }

    fn device_slot(&self, index: u32) -> InFlight {
        let mut devices = self.devices.lock().unwrap_or_else(|e| e.into_inner());
        devices.entry(index).or_default().clone()
    }

    /// Reads all selected devices concurrently. Devices that error, or whose previous read has
    /// not returned yet, are omitted; the call only fails when the device list itself cannot be
    /// obtained.
    #[instrument(skip(self, config), fields(source = "gpu", operation = "sample_gpus"))]
    pub async fn read(&self, config: &Configuration) -> Result<Vec<GpuReading>, SourceError> {
        let backend = self.backend.clone();
        let listed = run_exclusive(SourceKind::Gpu, &self.listing, move || backend.device_count());
        let count = match listed.await {
            Ok(n) => {
                self.unavailable_logged.store(false, Ordering::Relaxed);
                n
            }
            Err(e) => {
                if !self.unavailable_logged.swap(true, Ordering::Relaxed) {
                    tracing::warn!(error = %e, "GPU device list unavailable");
                }
                return Err(e);
            }
        };

        let reads = (0..count).filter(|i| config.gpu_selected(*i)).map(|index| {
            let backend = self.backend.clone();
            let slot = self.device_slot(index);
            async move {
                run_exclusive(SourceKind::Gpu, &slot, move || backend.read_device(index)).await
            }
        });

        let readings = join_all(reads)
            .await
            .into_iter()
            .filter_map(|r| match r {
                Ok(reading) => Some(reading),
                Err(e) => {
                    tracing::debug!(error = %e, "GPU device read failed, omitted this tick");
                    None
                }
            })
            .collect();
        Ok(readings)
    }

    pub async fn detect(&self) -> Result<Vec<GpuDevice>, SourceError> {
        let backend = self.backend.clone();
        run_exclusive(SourceKind::Gpu, &self.detecting, move || {
            let count = backend.device_count()?;
            Ok((0..count)
                .filter_map(|i| backend.describe(i).ok())
                .collect())
        })
        .await
    }
}

impl<B: GpuBackend> SourceAdapter for GpuAdapter<B> {
    fn kind(&self) -> SourceKind {
        SourceKind::Gpu
    }

    fn sample<'a>(
        &'a self,
        config: &'a Configuration,
    ) -> BoxFuture<'a, Result<Reading, SourceError>> {
        Box::pin(async move { self.read(config).await.map(Reading::Gpus) })
    }
}
