// CPU utilization via sysinfo

use super::{InFlight, Reading, SourceAdapter, SourceError, linux, run_exclusive};
use crate::models::{Configuration, CpuReading, LoadAverage, SourceKind};
use futures_util::future::BoxFuture;
use std::sync::{Arc, Mutex};
use std::time::Instant;
use sysinfo::System;
use tracing::instrument;

struct CpuState {
    sys: System,
    last_refresh: Instant,
    model: String,
}

pub struct CpuAdapter {
    state: Arc<Mutex<CpuState>>,
    in_flight: InFlight,
}

impl Default for CpuAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl CpuAdapter {
    pub fn new() -> Self {
        let mut sys = System::new();
        // Baseline for the first usage delta
        sys.refresh_cpu_all();
        let model = linux::read_cpu_model_linux()
            .or_else(|| {
                sys.cpus()
                    .first()
                    .map(|c| c.brand().trim().to_string())
                    .filter(|s| !s.is_empty() && s != "cpu0")
            })
            .unwrap_or_else(|| "Unknown".into());
        Self {
            state: Arc::new(Mutex::new(CpuState {
                sys,
                last_refresh: Instant::now(),
                model,
            })),
            in_flight: InFlight::default(),
        }
    }

    /// Usage is only recomputed once `MINIMUM_CPU_UPDATE_INTERVAL` has passed since the last
    /// refresh; faster callers get the previous values instead of a blocking sleep.
    #[instrument(skip(self), fields(source = "cpu", operation = "sample_cpu"))]
    pub async fn read(&self) -> Result<CpuReading, SourceError> {
        let state = self.state.clone();
        run_exclusive(SourceKind::Cpu, &self.in_flight, move || {
            let mut guard = state
                .lock()
                .map_err(|e| SourceError::Failed(SourceKind::Cpu, format!("lock poisoned: {e}")))?;
            let now = Instant::now();
            if now.duration_since(guard.last_refresh) >= sysinfo::MINIMUM_CPU_UPDATE_INTERVAL {
                guard.sys.refresh_cpu_all();
                guard.last_refresh = now;
            }

            let cpus = guard.sys.cpus();
            if cpus.is_empty() {
                return Err(SourceError::Unavailable(
                    SourceKind::Cpu,
                    "no CPUs reported".into(),
                ));
            }
            let per_core_percent: Vec<f64> = cpus
                .iter()
                .map(|c| (c.cpu_usage() as f64).clamp(0.0, 100.0))
                .collect();
            let frequency_mhz = cpus.first().map(|c| c.frequency()).unwrap_or(0);
            let logical = cpus.len() as u32;
            let usage = guard.sys.global_cpu_usage() as f64;
            let load = System::load_average();

            Ok(CpuReading {
                model: guard.model.clone(),
                usage_percent: usage.clamp(0.0, 100.0),
                per_core_percent,
                physical_cores: System::physical_core_count().unwrap_or(0) as u32,
                logical_cores: logical,
                frequency_mhz,
                load_average: LoadAverage {
                    one: load.one,
                    five: load.five,
                    fifteen: load.fifteen,
                },
            })
        })
        .await
    }
}

impl SourceAdapter for CpuAdapter {
    fn kind(&self) -> SourceKind {
        SourceKind::Cpu
    }

    fn sample<'a>(
        &'a self,
        _config: &'a Configuration,
    ) -> BoxFuture<'a, Result<Reading, SourceError>> {
        Box::pin(async move { self.read().await.map(Reading::Cpu) })
    }
}
