//! Health check infrastructure for the insights service
//!
//! Tracks upstream and refresh-cycle health and folds snapshot freshness into
//! the status reported by `/health` and `/readyz`.

use crate::error::FinopsError;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Health status of a component, ordered from best to worst
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComponentStatus {
    Healthy,
    /// Serving, but from carried-forward or aging data
    Degraded,
    Unhealthy,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentHealth {
    pub status: ComponentStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub last_check_timestamp: i64,
}

impl ComponentHealth {
    fn with_status(status: ComponentStatus, message: Option<String>) -> Self {
        Self {
            status,
            message,
            last_check_timestamp: Utc::now().timestamp(),
        }
    }

    pub fn healthy() -> Self {
        Self::with_status(ComponentStatus::Healthy, None)
    }

    pub fn degraded(message: impl Into<String>) -> Self {
        Self::with_status(ComponentStatus::Degraded, Some(message.into()))
    }

    pub fn unhealthy(message: impl Into<String>) -> Self {
        Self::with_status(ComponentStatus::Unhealthy, Some(message.into()))
    }
}

/// Body of `/health`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    /// Worst status among all components
    pub status: ComponentStatus,
    pub components: HashMap<String, ComponentHealth>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub snapshot_generation: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub snapshot_age_seconds: Option<i64>,
}

impl HealthResponse {
    fn from_components(components: HashMap<String, ComponentHealth>) -> Self {
        let status = components
            .values()
            .map(|c| c.status)
            .max()
            .unwrap_or(ComponentStatus::Healthy);
        Self {
            status,
            components,
            snapshot_generation: None,
            snapshot_age_seconds: None,
        }
    }
}

/// Body of `/readyz`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadinessResponse {
    pub ready: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Component names for health tracking
pub mod components {
    pub const PROMETHEUS: &str = "prometheus";
    pub const OPENCOST: &str = "opencost";
    pub const INVENTORY: &str = "kubernetes";
    pub const REFRESH: &str = "refresh";
    pub const SNAPSHOT: &str = "snapshot";
}

/// Freshness of the served snapshot
///
/// Missing or older than `max_age_secs` is degraded, never unhealthy: the
/// service keeps answering from whatever it has.
pub fn snapshot_health(age_secs: Option<i64>, max_age_secs: i64) -> ComponentHealth {
    match age_secs {
        None => ComponentHealth::degraded("No snapshot computed yet"),
        Some(age) if age > max_age_secs => {
            ComponentHealth::degraded(FinopsError::SnapshotStale { age_secs: age }.to_string())
        }
        Some(_) => ComponentHealth::healthy(),
    }
}

/// Shared, cloneable view of component health and readiness
#[derive(Debug, Clone, Default)]
pub struct HealthRegistry {
    components: Arc<RwLock<HashMap<String, ComponentHealth>>>,
    /// Set once the first snapshot is published
    ready: Arc<RwLock<bool>>,
}

impl HealthRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start tracking `name` as healthy
    pub async fn register(&self, name: &str) {
        self.update(name, ComponentHealth::healthy()).await;
    }

    pub async fn update(&self, name: &str, health: ComponentHealth) {
        self.components
            .write()
            .await
            .insert(name.to_string(), health);
    }

    pub async fn set_healthy(&self, name: &str) {
        self.update(name, ComponentHealth::healthy()).await;
    }

    pub async fn set_degraded(&self, name: &str, message: impl Into<String>) {
        self.update(name, ComponentHealth::degraded(message)).await;
    }

    pub async fn set_unhealthy(&self, name: &str, message: impl Into<String>) {
        self.update(name, ComponentHealth::unhealthy(message)).await;
    }

    pub async fn set_ready(&self, ready: bool) {
        *self.ready.write().await = ready;
    }

    pub async fn health(&self) -> HealthResponse {
        HealthResponse::from_components(self.components.read().await.clone())
    }

    /// Health including the freshness of the current snapshot
    pub async fn health_with_snapshot(
        &self,
        generation: u64,
        age_secs: Option<i64>,
        max_age_secs: i64,
    ) -> HealthResponse {
        let mut components = self.components.read().await.clone();
        components.insert(
            components::SNAPSHOT.to_string(),
            snapshot_health(age_secs, max_age_secs),
        );
        HealthResponse {
            snapshot_generation: Some(generation),
            snapshot_age_seconds: age_secs,
            ..HealthResponse::from_components(components)
        }
    }

    pub async fn readiness(&self) -> ReadinessResponse {
        let reason = if !*self.ready.read().await {
            Some("No insight snapshot published yet")
        } else if self.health().await.status == ComponentStatus::Unhealthy {
            Some("Critical component unhealthy")
        } else {
            None
        };

        ReadinessResponse {
            ready: reason.is_none(),
            reason: reason.map(str::to_string),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_empty_registry_is_healthy() {
        let health = HealthRegistry::new().health().await;

        assert_eq!(health.status, ComponentStatus::Healthy);
        assert!(health.components.is_empty());
    }

    #[tokio::test]
    async fn test_worst_component_wins() {
        let registry = HealthRegistry::new();
        registry.register(components::PROMETHEUS).await;
        registry.register(components::OPENCOST).await;
        registry.register(components::REFRESH).await;

        registry
            .set_degraded(components::OPENCOST, "carried forward")
            .await;
        assert_eq!(registry.health().await.status, ComponentStatus::Degraded);

        registry
            .set_unhealthy(components::REFRESH, "all upstreams unavailable")
            .await;
        assert_eq!(registry.health().await.status, ComponentStatus::Unhealthy);

        registry.set_healthy(components::REFRESH).await;
        registry.set_healthy(components::OPENCOST).await;
        assert_eq!(registry.health().await.status, ComponentStatus::Healthy);
    }

    #[test]
    fn test_snapshot_health_thresholds() {
        assert_eq!(snapshot_health(None, 900).status, ComponentStatus::Degraded);
        assert_eq!(snapshot_health(Some(100), 900).status, ComponentStatus::Healthy);

        let stale = snapshot_health(Some(901), 900);
        assert_eq!(stale.status, ComponentStatus::Degraded);
        assert!(stale.message.unwrap().contains("901s"));
    }

    #[tokio::test]
    async fn test_stale_snapshot_degrades_health() {
        let registry = HealthRegistry::new();
        registry.register(components::PROMETHEUS).await;

        let health = registry.health_with_snapshot(4, Some(3600), 900).await;
        assert_eq!(health.status, ComponentStatus::Degraded);
        assert_eq!(health.snapshot_generation, Some(4));
        assert_eq!(health.snapshot_age_seconds, Some(3600));
        assert!(health.components.contains_key(components::SNAPSHOT));

        // the snapshot entry is computed per request, never stored
        assert!(!registry.health().await.components.contains_key(components::SNAPSHOT));
    }

    #[tokio::test]
    async fn test_readiness_waits_for_first_snapshot() {
        let registry = HealthRegistry::new();
        let readiness = registry.readiness().await;

        assert!(!readiness.ready);
        assert_eq!(readiness.reason.as_deref(), Some("No insight snapshot published yet"));
    }

    #[tokio::test]
    async fn test_readiness_not_ready_when_unhealthy() {
        let registry = HealthRegistry::new();
        registry.register(components::REFRESH).await;
        registry.set_ready(true).await;
        assert!(registry.readiness().await.ready);

        registry.set_unhealthy(components::REFRESH, "Failed").await;
        assert!(!registry.readiness().await.ready);
    }
}
