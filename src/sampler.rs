// Sampler loop: ticks, collects a snapshot per tick, publishes it, swaps in new configuration
// generations between ticks.

use crate::aggregator::Aggregator;
use crate::hub::BroadcastHub;
use crate::models::{Configuration, SamplerDiagnostics, SamplerState};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tokio::sync::{oneshot, watch};
use tokio::time::{Duration, Instant, Interval, MissedTickBehavior, interval, interval_at};
use tracing::Instrument;

/// Rate limit for the "no subscribers" message.
const NO_SUBSCRIBERS_LOG_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Debug, thiserror::Error)]
pub enum SamplerError {
    #[error("sampler loop died: {0}")]
    Fatal(String),
}

/// Counters exposed for status display.
#[derive(Debug, Default)]
pub struct SamplerStats {
    running: AtomicBool,
    ticks: AtomicU64,
    slow_ticks: AtomicU64,
    last_tick_micros: AtomicU64,
}

impl SamplerStats {
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub fn ticks(&self) -> u64 {
        self.ticks.load(Ordering::Relaxed)
    }

    pub fn slow_ticks(&self) -> u64 {
        self.slow_ticks.load(Ordering::Relaxed)
    }

    pub fn last_tick(&self) -> Duration {
        Duration::from_micros(self.last_tick_micros.load(Ordering::Relaxed))
    }

    pub fn diagnostics(&self) -> SamplerDiagnostics {
        SamplerDiagnostics {
            state: if self.is_running() {
                SamplerState::Running
            } else {
                SamplerState::Stopped
            },
            ticks: self.ticks(),
            slow_ticks: self.slow_ticks(),
            last_tick_micros: self.last_tick_micros.load(Ordering::Relaxed),
        }
    }

    fn record_tick(&self, elapsed: Duration, slow: bool) {
        self.ticks.fetch_add(1, Ordering::Relaxed);
        self.last_tick_micros
            .store(elapsed.as_micros().min(u64::MAX as u128) as u64, Ordering::Relaxed);
        if slow {
            self.slow_ticks.fetch_add(1, Ordering::Relaxed);
        }
    }
}

/// Sets `running` for as long as it lives, so the flag also clears when the loop panics or is
/// cancelled.
struct RunningFlag(Arc<SamplerStats>);

impl RunningFlag {
    fn raise(stats: Arc<SamplerStats>) -> Self {
        stats.running.store(true, Ordering::Release);
        Self(stats)
    }
}

impl Drop for RunningFlag {
    fn drop(&mut self) {
        self.0.running.store(false, Ordering::Release);
    }
}

/// What the loop runs against.
pub struct SamplerDeps {
    pub aggregator: Aggregator,
    pub hub: Arc<BroadcastHub>,
    pub config_rx: watch::Receiver<Arc<Configuration>>,
    pub stats: Arc<SamplerStats>,
}

pub struct SamplerConfig {
    /// How often to log sampler stats at INFO level (real seconds).
    pub stats_log_interval_secs: u64,
}

/// Owner's side of a running sampler loop.
pub struct SamplerHandle {
    shutdown_tx: Option<oneshot::Sender<()>>,
    join: tokio::task::JoinHandle<()>,
    stats: Arc<SamplerStats>,
}

impl SamplerHandle {
    pub fn stats(&self) -> Arc<SamplerStats> {
        self.stats.clone()
    }

    /// Stops the loop and waits for it. No snapshot is published after this returns.
    pub async fn stop(mut self) -> Result<(), SamplerError> {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        (&mut self.join)
            .await
            .map_err(|e| SamplerError::Fatal(e.to_string()))
    }

    /// Resolves only if the loop ends without being asked to, which means no more snapshots
    /// can be produced.
    pub async fn failed(&mut self) -> SamplerError {
        match (&mut self.join).await {
            Ok(()) => SamplerError::Fatal("sampler loop exited unexpectedly".into()),
            Err(e) => SamplerError::Fatal(e.to_string()),
        }
    }
}

fn tick_interval(period: Duration, start_now: bool) -> Interval {
    let mut tick = if start_now {
        interval(period)
    } else {
        interval_at(Instant::now() + period, period)
    };
    tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
    tick
}

pub fn spawn(deps: SamplerDeps, config: SamplerConfig) -> SamplerHandle {
    let (shutdown_tx, shutdown_rx) = oneshot::channel();
    let stats = deps.stats.clone();
    let running = RunningFlag::raise(stats.clone());
    let span = tracing::debug_span!(
        "sampler",
        budget_ms = deps.aggregator.budget().as_millis() as u64
    );
    let join = tokio::spawn(run(deps, config, shutdown_rx, running).instrument(span));
    SamplerHandle {
        shutdown_tx: Some(shutdown_tx),
        join,
        stats,
    }
}

async fn run(
    deps: SamplerDeps,
    config: SamplerConfig,
    mut shutdown_rx: oneshot::Receiver<()>,
    running: RunningFlag,
) {
    let SamplerDeps {
        aggregator,
        hub,
        mut config_rx,
        stats,
    } = deps;

    let mut current = config_rx.borrow_and_update().clone();
    let mut tick = tick_interval(current.interval(), true);
    let mut stats_log_tick = tick_interval(
        Duration::from_secs(config.stats_log_interval_secs.max(1)),
        false,
    );
    let mut config_open = true;
    let mut last_no_subscribers_log: Option<Instant> = None;

    tracing::info!(
        version = current.version,
        interval_ms = current.settings.interval_ms,
        "sampler started"
    );

    loop {
        let scheduled = tokio::select! {
            biased;
            _ = &mut shutdown_rx => break,
            changed = config_rx.changed(), if config_open => {
                if changed.is_err() {
                    tracing::debug!("settings store dropped; keeping current configuration");
                    config_open = false;
                    continue;
                }
                let next = config_rx.borrow_and_update().clone();
                if next.version <= current.version {
                    tracing::debug!(
                        current = current.version,
                        offered = next.version,
                        "ignoring stale configuration"
                    );
                    continue;
                }
                if next.interval() != current.interval() {
                    tick = tick_interval(next.interval(), false);
                }
                tracing::info!(
                    from = current.version,
                    to = next.version,
                    interval_ms = next.settings.interval_ms,
                    "configuration applied"
                );
                current = next;
                continue;
            }
            _ = stats_log_tick.tick() => {
                tracing::info!(
                    subscribers = hub.subscriber_count(),
                    ticks = stats.ticks(),
                    slow_ticks = stats.slow_ticks(),
                    last_tick_ms = stats.last_tick().as_millis() as u64,
                    config_version = current.version,
                    "sampler stats"
                );
                continue;
            }
            scheduled = tick.tick() => scheduled,
        };

        // `current` is fixed for the whole tick; a newer generation waits for the next one.
        let started = Instant::now();
        let snapshot = tokio::select! {
            biased;
            _ = &mut shutdown_rx => break,
            snapshot = aggregator.collect(&current) => snapshot,
        };
        let elapsed = started.elapsed();
        let slow = elapsed > current.interval();
        stats.record_tick(elapsed, slow);
        if slow {
            // Ticks that fell due during the aggregation are dropped, not fired late.
            let period = current.interval();
            let behind = Instant::now().saturating_duration_since(scheduled);
            let missed = (behind.as_nanos() / period.as_nanos().max(1)).min(u32::MAX as u128);
            tick.reset_at(scheduled + period * (missed as u32).saturating_add(1));
            tracing::warn!(
                sequence = snapshot.sequence,
                elapsed_ms = elapsed.as_millis() as u64,
                interval_ms = current.settings.interval_ms,
                "slow tick; next tick skipped"
            );
        }

        if hub.publish(&snapshot) == 0 {
            let should_log = last_no_subscribers_log
                .is_none_or(|t| t.elapsed() >= NO_SUBSCRIBERS_LOG_INTERVAL);
            if should_log {
                tracing::debug!(
                    operation = "publish_snapshot",
                    "No active subscribers; snapshot not delivered"
                );
                last_no_subscribers_log = Some(Instant::now());
            }
        }
    }

    drop(running);
    // Dropping the aggregator releases the adapters (and any driver handles they hold).
    drop(aggregator);
    tracing::info!("sampler stopped");
}
