// Source adapters: one per hardware domain, each independently fallible

mod cpu;
mod disk;
mod gpu;
mod linux;
mod memory;

pub use cpu::CpuAdapter;
pub use disk::{DiskAdapter, is_virtual_mount};
pub use gpu::{GpuAdapter, GpuBackend, NvmlBackend};
pub use memory::MemoryAdapter;

use crate::models::{
    Configuration, CpuReading, DeviceInventory, DiskReading, GpuReading, MemoryReading,
    SourceKind,
};
use futures_util::future::BoxFuture;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

#[derive(Debug, Clone, thiserror::Error)]
pub enum SourceError {
    #[error("{0} source unavailable: {1}")]
    Unavailable(SourceKind, String),
    #[error("{0} sampling failed: {1}")]
    Failed(SourceKind, String),
    #[error("{0} sampling task did not complete: {1}")]
    Join(SourceKind, String),
    #[error("{0} exceeded its time budget")]
    Timeout(SourceKind),
}

impl SourceError {
    pub fn kind(&self) -> SourceKind {
        match self {
            SourceError::Unavailable(k, _)
            | SourceError::Failed(k, _)
            | SourceError::Join(k, _)
            | SourceError::Timeout(k) => *k,
        }
    }
}

/// The partial result of one adapter call.
#[derive(Debug, Clone, PartialEq)]
pub enum Reading {
    Cpu(CpuReading),
    Memory(MemoryReading),
    Disks(Vec<DiskReading>),
    Gpus(Vec<GpuReading>),
}

impl Reading {
    pub fn kind(&self) -> SourceKind {
        match self {
            Reading::Cpu(_) => SourceKind::Cpu,
            Reading::Memory(_) => SourceKind::Memory,
            Reading::Disks(_) => SourceKind::Disk,
            Reading::Gpus(_) => SourceKind::Gpu,
        }
    }
}

/// Samples one hardware domain.
///
/// Implementations must not panic on bad hardware readings and should push blocking OS or
/// driver calls onto `spawn_blocking`. The aggregator bounds every call with its own timeout,
/// so an adapter that hangs only loses its own reading.
pub trait SourceAdapter: Send + Sync {
    fn kind(&self) -> SourceKind;

    fn sample<'a>(
        &'a self,
        config: &'a Configuration,
    ) -> BoxFuture<'a, Result<Reading, SourceError>>;
}

/// Runs `f` on the blocking pool and maps join failures to a source error.
pub(crate) async fn run_blocking<T, F>(kind: SourceKind, f: F) -> Result<T, SourceError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, SourceError> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| SourceError::Join(kind, e.to_string()))?
}

/// Marks a blocking call as running until the closure that holds the claim returns.
///
/// A timed-out `spawn_blocking` call cannot be cancelled. Sources check this before starting
/// another call, so a hung OS or driver call holds one blocking thread instead of one per tick.
#[derive(Debug, Clone, Default)]
pub(crate) struct InFlight(Arc<AtomicBool>);

struct InFlightClaim(Arc<AtomicBool>);

impl InFlight {
    fn try_claim(&self) -> Option<InFlightClaim> {
        self.0
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| InFlightClaim(self.0.clone()))
    }

    #[cfg(test)]
    fn is_busy(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

impl Drop for InFlightClaim {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Like [`run_blocking`], but fails with [`SourceError::Timeout`] while the previous call
/// guarded by `in_flight` is still running.
pub(crate) async fn run_exclusive<T, F>(
    kind: SourceKind,
    in_flight: &InFlight,
    f: F,
) -> Result<T, SourceError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, SourceError> + Send + 'static,
{
    let Some(claim) = in_flight.try_claim() else {
        tracing::debug!(source = %kind, "previous blocking call still running, skipped");
        return Err(SourceError::Timeout(kind));
    };
    run_blocking(kind, move || {
        let _claim = claim;
        f()
    })
    .await
}

pub(crate) fn usage_percent(used: u64, total: u64) -> f64 {
    if total > 0 {
        (used as f64 / total as f64) * 100.0
    } else {
        0.0
    }
}

/// The adapters backed by this host's real hardware.
pub struct HostSources {
    pub cpu: Arc<CpuAdapter>,
    pub memory: Arc<MemoryAdapter>,
    pub disk: Arc<DiskAdapter>,
    pub gpu: Arc<GpuAdapter<NvmlBackend>>,
}

impl Default for HostSources {
    fn default() -> Self {
        Self::new()
    }
}

impl HostSources {
    pub fn new() -> Self {
        Self {
            cpu: Arc::new(CpuAdapter::new()),
            memory: Arc::new(MemoryAdapter::new()),
            disk: Arc::new(DiskAdapter::new()),
            gpu: Arc::new(GpuAdapter::new(NvmlBackend::init())),
        }
    }

    pub fn adapters(&self) -> Vec<Arc<dyn SourceAdapter>> {
        vec![
            self.cpu.clone(),
            self.memory.clone(),
            self.disk.clone(),
            self.gpu.clone(),
        ]
    }

    /// Currently detected volumes and GPUs. Detection failures yield empty lists.
    pub async fn inventory(&self) -> DeviceInventory {
        let volumes = match self.disk.detect().await {
            Ok(v) => v,
            Err(e) => {
                tracing::debug!(error = %e, operation = "detect_volumes", "volume detection failed");
                vec![]
            }
        };
        let gpus = match self.gpu.detect().await {
            Ok(g) => g,
            Err(e) => {
                tracing::debug!(error = %e, operation = "detect_gpus", "GPU detection failed");
                vec![]
            }
        };
        DeviceInventory { volumes, gpus }
    }
}
