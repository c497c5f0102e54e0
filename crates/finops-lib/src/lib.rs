//! FinOps insights library
//!
//! This crate provides the core functionality for:
//! - Fetching usage and cost from Prometheus, OpenCost and the cluster API
//! - Efficiency, waste and utilization scoring
//! - Cost anomaly detection and forecasting
//! - Optimization recommendations with pending-age tracking
//! - Snapshot caching, Prometheus exposition, health and observability

pub mod cache;
pub mod engine;
pub mod error;
pub mod exporter;
pub mod health;
pub mod models;
pub mod observability;
pub mod scheduler;
pub mod thresholds;
pub mod upstream;

pub use cache::SnapshotStore;
pub use engine::{CycleOutcome, EngineConfig, EngineSources, InsightEngine};
pub use error::{FinopsError, Result};
pub use health::{
    ComponentHealth, ComponentStatus, HealthRegistry, HealthResponse, ReadinessResponse,
};
pub use models::*;
pub use observability::{FinopsMetrics, StructuredLogger};
pub use scheduler::{RefreshScheduler, SchedulerConfig};
pub use thresholds::{AlertThresholds, Severity};
