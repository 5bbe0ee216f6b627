use anyhow::Result;
use resmon::*;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::time::FormatTime;

/// How long connection tasks get to flush queued frames after the hub starts draining.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: tikv_jemallocator::Jemalloc = tikv_jemallocator::Jemalloc;

struct LocalTimer;

impl FormatTime for LocalTimer {
    fn format_time(&self, w: &mut tracing_subscriber::fmt::format::Writer<'_>) -> std::fmt::Result {
        write!(
            w,
            "{}",
            chrono::Local::now().format("%Y-%m-%dT%H:%M:%S%.3f%:z")
        )
    }
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        let mut sigterm =
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(s) => s,
                Err(_) => {
                    let _ = tokio::signal::ctrl_c().await;
                    return;
                }
            };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_timer(LocalTimer)
        .with_env_filter(filter)
        .init();

    let app_config = config::AppConfig::load()?;
    tracing::info!(name = version::NAME, version = version::VERSION, "starting");

    let settings = Arc::new(settings::SettingsStore::load(
        app_config.settings.path.clone(),
        app_config.initial_settings(),
    ));
    let sources = Arc::new(sources::HostSources::new());
    let hub = Arc::new(hub::BroadcastHub::new(app_config.hub.queue_capacity));
    let stats = Arc::new(sampler::SamplerStats::default());

    let mut sampler_handle = sampler::spawn(
        sampler::SamplerDeps {
            aggregator: aggregator::Aggregator::new(
                sources.adapters(),
                Duration::from_millis(app_config.sampler.adapter_timeout_ms),
            ),
            hub: hub.clone(),
            config_rx: settings.subscribe(),
            stats: stats.clone(),
        },
        sampler::SamplerConfig {
            stats_log_interval_secs: app_config.sampler.stats_log_interval_secs,
        },
    );

    let app = routes::app(hub.clone(), settings, stats, sources);
    let addr = format!("{}:{}", app_config.server.host, app_config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Listening on http://{}", addr);

    tokio::select! {
        result = axum::serve(listener, app) => {
            result?;
        }
        err = sampler_handle.failed() => {
            tracing::error!(error = %err, "sampler failed; exiting");
            hub.shutdown();
            return Err(err.into());
        }
        _ = shutdown_signal() => {
            tracing::info!("Received shutdown signal");
            // Stop producing first so no snapshot is published after subscribers start draining.
            if let Err(e) = sampler_handle.stop().await {
                tracing::warn!(error = %e, "sampler did not stop cleanly");
            }
            hub.shutdown();
            let deadline = tokio::time::Instant::now() + SHUTDOWN_GRACE;
            while hub.subscriber_count() > 0 && tokio::time::Instant::now() < deadline {
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
        }
    }

    Ok(())
}
