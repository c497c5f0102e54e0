//! Periodic refresh scheduler
//!
//! Fires a refresh cycle every interval until shutdown. A tick that lands
//! while a cycle is still running is skipped by the engine, not queued.

use crate::engine::{CycleOutcome, InsightEngine};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info};

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Time between refresh cycles (default: 5 minutes)
    pub interval: Duration,
    /// Run a cycle as soon as the scheduler starts
    pub run_immediately: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(300),
            run_immediately: false,
        }
    }
}

/// Background task driving refresh cycles
pub struct RefreshScheduler {
    engine: Arc<InsightEngine>,
    config: SchedulerConfig,
}

impl RefreshScheduler {
    pub fn new(engine: Arc<InsightEngine>, config: SchedulerConfig) -> Self {
        Self { engine, config }
    }

    /// Run until a shutdown signal arrives
    ///
    /// Each tick spawns its cycle, so a slow cycle never delays the ticker and
    /// the overlap check stays with the engine.
    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        info!(
            interval_secs = self.config.interval.as_secs(),
            "Starting refresh scheduler"
        );

        let start = if self.config.run_immediately {
            Instant::now()
        } else {
            Instant::now() + self.config.interval
        };
        let mut ticker = interval_at(start, self.config.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut ticks = 0u64;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    ticks += 1;
                    let engine = Arc::clone(&self.engine);
                    tokio::spawn(async move {
                        let outcome = engine.refresh("scheduler").await;
                        if let CycleOutcome::Completed { generation, duration_ms, .. } = outcome {
                            debug!(generation, duration_ms, "Scheduled refresh complete");
                        }
                    });
                }
                _ = shutdown.recv() => {
                    info!(ticks, "Shutting down refresh scheduler");
                    break;
                }
            }
        }
    }
}
