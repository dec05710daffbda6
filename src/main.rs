use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::sync::Notify;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use camstreamd::config::AppConfig;
use camstreamd::frame_cache::{FrameCache, FrameCacheConfig};
use camstreamd::reachability::{PingConfig, PingMonitor};
use camstreamd::scheduler::{Scheduler, SchedulerConfig};
use camstreamd::sensor::{PatternSensor, Sensor};
use camstreamd::state::AppState;
use camstreamd::stream_registry::{StreamConfig, StreamRegistry};
use camstreamd::web_api;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = AppConfig::load()?;

    // TODO: swap in the hardware sensor driver once the CSI bindings land
    let sensor: Arc<dyn Sensor> = Arc::new(PatternSensor::new());
    let cache = Arc::new(FrameCache::new(sensor, FrameCacheConfig::default()));
    cache.initialize()?;

    let registry = Arc::new(StreamRegistry::new(StreamConfig::default()));
    let wake = Arc::new(Notify::new());
    let state = AppState {
        cache: cache.clone(),
        registry: registry.clone(),
        wake: wake.clone(),
    };

    let monitor = match config.ping_host.as_deref() {
        Some(host) => Some(PingMonitor::open(host, PingConfig::default())?),
        None => {
            tracing::info!("Reachability monitor disabled, no ping host configured");
            None
        }
    };

    let scheduler = Scheduler::new(
        cache,
        registry.clone(),
        wake,
        SchedulerConfig {
            restart_on_unreachable: config.restart_on_unreachable,
        },
    );
    let mut scheduler_task = tokio::spawn(async move { scheduler.run(monitor).await });

    let listener = TcpListener::bind(&config.bind_addr).await?;
    tracing::info!(addr = %config.bind_addr, "camstreamd listening");

    let app = web_api::router(state.clone());

    tokio::select! {
        result = web_api::acceptor::serve(listener, state, app) => {
            result?;
        }
        result = &mut scheduler_task => {
            result??;
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Shutting down");
            scheduler_task.abort();
            registry.purge()?;
        }
    }

    Ok(())
}
