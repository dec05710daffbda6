//! Scheduler - cooperative polling loop
//!
//! ## Responsibilities
//!
//! - Drive the stream registry and the reachability monitor in turn
//! - Sleep for the shortest wake-hint either subsystem returns
//! - Wake early when a new stream client is registered
//!
//! The loop owns no state beyond the minimum-wake computation. Fatal
//! errors from either subsystem end the loop and surface to the caller,
//! which is expected to exit and let the supervisor restart the daemon.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;

use crate::error::{Error, Result};
use crate::frame_cache::FrameCache;
use crate::reachability::{IcmpTransport, PingMonitor, PingStatus};
use crate::stream_registry::StreamRegistry;

/// Scheduler policy
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Treat reachability escalation as fatal, forcing a restart
    pub restart_on_unreachable: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            restart_on_unreachable: true,
        }
    }
}

/// Cooperative loop driving stream fan-out and reachability probing
pub struct Scheduler {
    cache: Arc<FrameCache>,
    registry: Arc<StreamRegistry>,
    wake: Arc<Notify>,
    config: SchedulerConfig,
}

impl Scheduler {
    pub fn new(
        cache: Arc<FrameCache>,
        registry: Arc<StreamRegistry>,
        wake: Arc<Notify>,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            cache,
            registry,
            wake,
            config,
        }
    }

    /// Run until a subsystem fails or reachability escalates
    pub async fn run<T: IcmpTransport>(&self, mut monitor: Option<PingMonitor<T>>) -> Result<()> {
        loop {
            let now = tokio::time::Instant::now().into_std();

            let mut hint = self.registry.process(&self.cache, now)?;

            if let Some(mon) = monitor.as_mut() {
                let (status, ping_hint) = mon.process(now)?;
                if status == PingStatus::TimedOut {
                    if self.config.restart_on_unreachable {
                        self.registry.purge()?;
                        return Err(Error::Unreachable(
                            "reachability target stopped answering".into(),
                        ));
                    }
                    tracing::error!("Reachability target stopped answering, continuing");
                }
                hint = hint.min(ping_hint);
            }

            tokio::select! {
                _ = tokio::time::sleep(sleep_floor(hint)) => {}
                _ = self.wake.notified() => {}
            }
        }
    }
}

/// Never spin on a zero hint
fn sleep_floor(hint: Duration) -> Duration {
    hint.max(Duration::from_millis(1))
}
