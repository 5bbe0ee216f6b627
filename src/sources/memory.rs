// Memory and swap via sysinfo

use super::{InFlight, Reading, SourceAdapter, SourceError, run_exclusive, usage_percent};
use crate::models::{Configuration, MemoryReading, SourceKind};
use futures_util::future::BoxFuture;
use std::sync::{Arc, Mutex};
use sysinfo::System;
use tracing::instrument;

pub struct MemoryAdapter {
    sys: Arc<Mutex<System>>,
    in_flight: InFlight,
}

impl Default for MemoryAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryAdapter {
    pub fn new() -> Self {
        Self {
            sys: Arc::new(Mutex::new(System::new())),
            in_flight: InFlight::default(),
        }
    }

    #[instrument(skip(self), fields(source = "memory", operation = "sample_memory"))]
    pub async fn read(&self) -> Result<MemoryReading, SourceError> {
        let sys = self.sys.clone();
        run_exclusive(SourceKind::Memory, &self.in_flight, move || {
            let mut sys = sys.lock().map_err(|e| {
                SourceError::Failed(SourceKind::Memory, format!("lock poisoned: {e}"))
            })?;
            sys.refresh_memory();

            let total = sys.total_memory();
            if total == 0 {
                return Err(SourceError::Unavailable(
                    SourceKind::Memory,
                    "total memory reported as 0".into(),
                ));
            }
            let available = sys.available_memory();
            let used = total.saturating_sub(available);

            Ok(MemoryReading {
                total,
                used,
                available,
                usage_percent: usage_percent(used, total),
                swap_total: sys.total_swap(),
                swap_used: sys.used_swap(),
            })
        })
        .await
    }
}

impl SourceAdapter for MemoryAdapter {
    fn kind(&self) -> SourceKind {
        SourceKind::Memory
    }

    fn sample<'a>(
        &'a self,
        _config: &'a Configuration,
    ) -> BoxFuture<'a, Result<Reading, SourceError>> {
        Box::pin(async move { self.read().await.map(Reading::Memory) })
    }
}
