// Snapshot aggregation: run enabled adapters concurrently, merge what arrives in time.

use crate::models::{Configuration, Snapshot, SourceKind};
use crate::sources::{Reading, SourceAdapter, SourceError};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::instrument;

/// Wall clock in Unix milliseconds; 0 (with a warning) if the clock is before the epoch.
pub fn now_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_else(|e| {
            tracing::warn!(error = %e, operation = "get_timestamp", "system time error");
            0
        })
}

pub struct Aggregator {
    adapters: Vec<Arc<dyn SourceAdapter>>,
    budget: Duration,
    next_sequence: AtomicU64,
    /// Sources whose last call failed; used to log transitions instead of every tick.
    failing: Mutex<HashSet<SourceKind>>,
}

impl Aggregator {
    /// `budget` bounds each tick's adapter calls; adapters still running at the deadline are
    /// aborted and their source is absent from that snapshot.
    pub fn new(adapters: Vec<Arc<dyn SourceAdapter>>, budget: Duration) -> Self {
        Self {
            adapters,
            budget,
            next_sequence: AtomicU64::new(1),
            failing: Mutex::new(HashSet::new()),
        }
    }

    pub fn budget(&self) -> Duration {
        self.budget
    }

    /// Sequence the next snapshot will carry.
    pub fn next_sequence(&self) -> u64 {
        self.next_sequence.load(Ordering::Relaxed)
    }

    /// Produces one snapshot for `config`. Never fails: sources that error or time out are
    /// simply absent. With nothing enabled the snapshot is empty but still sequenced.
    #[instrument(skip_all, fields(config_version = config.version))]
    pub async fn collect(&self, config: &Arc<Configuration>) -> Snapshot {
        let taken_at = now_millis();
        let deadline = Instant::now() + self.budget;

        let mut set = JoinSet::new();
        let mut task_kinds = HashMap::new();
        for adapter in self.adapters.iter().filter(|a| config.is_enabled(a.kind())) {
            let adapter = adapter.clone();
            let config = config.clone();
            let kind = adapter.kind();
            let handle = set.spawn(async move { adapter.sample(&config).await });
            task_kinds.insert(handle.id(), kind);
        }

        let mut snapshot = Snapshot::empty(0, taken_at);
        while !task_kinds.is_empty() {
            match tokio::time::timeout_at(deadline, set.join_next_with_id()).await {
                Ok(Some(Ok((id, result)))) => {
                    let Some(kind) = task_kinds.remove(&id) else {
                        continue;
                    };
                    match result {
                        Ok(reading) if reading.kind() == kind => {
                            self.note_success(kind);
                            merge(&mut snapshot, reading);
                        }
                        Ok(reading) => {
                            self.note_failure(&SourceError::Failed(
                                kind,
                                format!("adapter returned a {} reading", reading.kind()),
                            ));
                        }
                        Err(e) => self.note_failure(&e),
                    }
                }
                Ok(Some(Err(join_err))) => {
                    if let Some(kind) = task_kinds.remove(&join_err.id()) {
                        self.note_failure(&SourceError::Join(kind, join_err.to_string()));
                    }
                }
                Ok(None) => break,
                Err(_) => {
                    for kind in task_kinds.values() {
                        self.note_failure(&SourceError::Timeout(*kind));
                    }
                    set.abort_all();
                    break;
                }
            }
        }

        snapshot.sequence = self.next_sequence.fetch_add(1, Ordering::Relaxed);
        snapshot
    }

    fn note_success(&self, kind: SourceKind) {
        let mut failing = self.failing.lock().unwrap_or_else(|e| e.into_inner());
        if failing.remove(&kind) {
            tracing::info!(source = %kind, "source recovered");
        }
    }

    fn note_failure(&self, error: &SourceError) {
        let mut failing = self.failing.lock().unwrap_or_else(|e| e.into_inner());
        if failing.insert(error.kind()) {
            tracing::warn!(error = %error, source = %error.kind(), "source unavailable this tick");
        } else {
            tracing::debug!(error = %error, source = %error.kind(), "source still unavailable");
        }
    }
}

fn merge(snapshot: &mut Snapshot, reading: Reading) {
    match reading {
        Reading::Cpu(r) => snapshot.cpu = Some(r),
        Reading::Memory(r) => snapshot.memory = Some(r),
        Reading::Disks(r) => snapshot.disks = Some(r),
        Reading::Gpus(r) => snapshot.gpus = Some(r),
    }
}
