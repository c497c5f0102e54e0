//! FinOps insights service
//!
//! Refreshes insights from Prometheus, OpenCost and the cluster API on a
//! fixed interval and serves them as a REST API and Prometheus metrics.

use anyhow::{Context, Result};
use finops_api::{api, config::AppConfig};
use finops_lib::{
    upstream::{CostHistorySource, CostSource, InventorySource, KubeInventory, OpenCostClient, PrometheusClient},
    EngineSources, HealthRegistry, InsightEngine, RefreshScheduler, SnapshotStore, StructuredLogger,
};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const SERVICE_VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with JSON output and env filter
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().json())
        .init();

    let config = AppConfig::load()?;
    info!(
        cluster = %config.cluster_name,
        prometheus = %config.prometheus_url,
        opencost = %config.opencost_url,
        refresh_interval_secs = config.refresh_interval_secs,
        "FinOps API configured"
    );

    let prometheus = Arc::new(
        PrometheusClient::new(&config.prometheus_url, config.request_timeout(), config.hourly_rates())
            .context("invalid Prometheus URL")?,
    );
    let opencost = Arc::new(
        OpenCostClient::new(&config.opencost_url, config.request_timeout())
            .context("invalid OpenCost URL")?,
    );

    let inventory: Option<Arc<dyn InventorySource>> = if config.inventory_enabled {
        match KubeInventory::try_default(config.inventory_pricing()).await {
            Ok(inventory) => Some(Arc::new(inventory)),
            Err(e) => {
                warn!(error = %e, "Cluster API unavailable, idle resource detection disabled");
                None
            }
        }
    } else {
        None
    };

    let sources = EngineSources {
        usage: prometheus.clone(),
        costs: vec![
            opencost as Arc<dyn CostSource>,
            prometheus.clone() as Arc<dyn CostSource>,
        ],
        history: Some(prometheus as Arc<dyn CostHistorySource>),
        inventory,
    };

    let health = HealthRegistry::new();
    let logger = StructuredLogger::new(&config.cluster_name);
    let engine = Arc::new(InsightEngine::new(
        sources,
        config.engine_config()?,
        Arc::new(SnapshotStore::new()),
        health.clone(),
        logger.clone(),
    ));
    engine.register_health().await;

    logger.log_startup(SERVICE_VERSION, config.api_port);

    let (shutdown_tx, _) = broadcast::channel::<()>(1);

    // First cycle in the background so probes answer immediately
    let startup = Arc::clone(&engine);
    tokio::spawn(async move {
        startup.refresh("startup").await;
    });

    let scheduler = RefreshScheduler::new(Arc::clone(&engine), config.scheduler_config());
    let scheduler_handle = tokio::spawn(scheduler.run(shutdown_tx.subscribe()));

    let state = Arc::new(api::AppState::new(
        Arc::clone(&engine),
        health,
        config.max_snapshot_age_secs(),
    ));
    let mut server_shutdown = shutdown_tx.subscribe();
    let server_handle = tokio::spawn(api::serve(config.api_port, state, async move {
        let _ = server_shutdown.recv().await;
    }));

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    logger.log_shutdown("SIGINT received");

    let _ = shutdown_tx.send(());
    let _ = scheduler_handle.await;
    match server_handle.await {
        Ok(Err(e)) => warn!(error = %e, "API server exited with error"),
        Err(e) => warn!(error = %e, "API server task panicked"),
        Ok(Ok(())) => {}
    }

    Ok(())
}
