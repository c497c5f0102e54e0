//! Insight refresh cycle
//!
//! One cycle fetches from every upstream concurrently, each fetch bounded by
//! the fetch budget, then runs scoring, anomaly detection, recommendations and
//! forecasting in that order, and publishes the result as a single new
//! [`InsightSnapshot`] generation.
//!
//! Cycles never overlap. All cross-cycle state (carried-forward samples,
//! anomaly baselines, recommendation identity) lives behind one mutex; a
//! cycle works on a clone and commits it only when the snapshot is published,
//! so an abandoned cycle leaves no trace.

pub mod anomaly;
pub mod forecast;
pub mod recommendations;
pub mod scoring;

#[cfg(test)]
mod tests;

use crate::cache::SnapshotStore;
use crate::error::{FinopsError, Result};
use crate::health::{components, ComponentHealth, HealthRegistry};
use crate::models::{
    AnomalyResult, CostForecast, IdleResource, InsightSnapshot, NamespaceCost, Recommendation,
    RecommendationType, ResourceSample, ResourceType,
};
use crate::observability::{FinopsMetrics, StructuredLogger};
use crate::thresholds::{AlertThresholds, Severity};
use crate::upstream::{
    with_retry, CostHistorySource, CostSource, InventorySource, RetryPolicy, UsageSource, Window,
};
use anomaly::{AnomalyConfig, AnomalyDetector};
use chrono::{DateTime, Utc};
use futures::future::join_all;
use recommendations::{RecommendationConfig, RecommendationTracker};
use scoring::ScoringConfig;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Tuning for one refresh cycle
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub usage_window: Window,
    pub cost_window: Window,
    /// Days of daily cost history fed to the forecast
    pub forecast_days: u32,
    pub retry: RetryPolicy,
    /// Time every upstream fetch, retries included, must finish within;
    /// a fetch still running then is treated as failed
    pub fetch_budget: Duration,
    /// A cycle running longer than this is abandoned
    pub deadline: Duration,
    /// Consecutive total outages before the refresh component turns unhealthy
    pub unhealthy_after_outages: u32,
    pub scoring: ScoringConfig,
    pub anomaly: AnomalyConfig,
    pub recommendations: RecommendationConfig,
    pub thresholds: AlertThresholds,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            usage_window: Window::ONE_HOUR,
            cost_window: Window::ONE_HOUR,
            forecast_days: 30,
            retry: RetryPolicy::default(),
            fetch_budget: Duration::from_secs(20),
            deadline: Duration::from_secs(30),
            unhealthy_after_outages: 3,
            scoring: ScoringConfig::default(),
            anomaly: AnomalyConfig::default(),
            recommendations: RecommendationConfig::default(),
            thresholds: AlertThresholds::default(),
        }
    }
}

/// Upstreams a cycle reads from
#[derive(Clone)]
pub struct EngineSources {
    pub usage: Arc<dyn UsageSource>,
    /// Tried in order until one answers
    pub costs: Vec<Arc<dyn CostSource>>,
    pub history: Option<Arc<dyn CostHistorySource>>,
    pub inventory: Option<Arc<dyn InventorySource>>,
}

/// Result of a refresh attempt
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum CycleOutcome {
    Completed {
        generation: u64,
        generated_at: DateTime<Utc>,
        duration_ms: u64,
        #[serde(skip_serializing_if = "Vec::is_empty")]
        degraded_sources: Vec<String>,
    },
    /// Another cycle was already running
    Skipped,
    Failed { reason: String },
}

impl CycleOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, CycleOutcome::Completed { .. })
    }
}

#[derive(Debug, Clone, Default)]
struct EngineState {
    samples: Vec<ResourceSample>,
    costs: Vec<NamespaceCost>,
    idle: Vec<IdleResource>,
    forecasts: Vec<CostForecast>,
    detector: AnomalyDetector,
    tracker: RecommendationTracker,
    generation: u64,
}

/// Upstream health observed during a cycle; `None` is healthy
type UpstreamHealth = BTreeMap<String, Option<String>>;

fn record_health(health: &mut UpstreamHealth, component: &str, failure: Option<String>) {
    match health.get(component) {
        // keep the first failure seen for a component
        Some(Some(_)) => {}
        _ => {
            health.insert(component.to_string(), failure);
        }
    }
}

#[derive(Debug, Default)]
struct CycleReport {
    upstreams: UpstreamHealth,
    degraded: Vec<String>,
    anomalies: Vec<AnomalyResult>,
    opened: Vec<Recommendation>,
    resolved: Vec<(String, RecommendationType)>,
}

/// Failure of a whole cycle, with whatever upstream health it observed
struct CycleFailure {
    error: FinopsError,
    upstreams: UpstreamHealth,
}

/// Drives refresh cycles and owns all cross-cycle state
pub struct InsightEngine {
    sources: EngineSources,
    config: EngineConfig,
    store: Arc<SnapshotStore>,
    health: HealthRegistry,
    metrics: FinopsMetrics,
    logger: StructuredLogger,
    state: Mutex<EngineState>,
    /// Cycles in a row that found every upstream down
    outages: AtomicU32,
}

impl InsightEngine {
    pub fn new(
        sources: EngineSources,
        mut config: EngineConfig,
        store: Arc<SnapshotStore>,
        health: HealthRegistry,
        logger: StructuredLogger,
    ) -> Self {
        // rightsizing opens at the waste level the alert warns at
        config.recommendations.waste_threshold_pct = config.thresholds.waste_warning_pct;
        let state = EngineState {
            detector: AnomalyDetector::new(config.anomaly.clone()),
            tracker: RecommendationTracker::new(config.recommendations.clone()),
            ..Default::default()
        };

        Self {
            sources,
            config,
            store,
            health,
            metrics: FinopsMetrics::new(),
            logger,
            state: Mutex::new(state),
            outages: AtomicU32::new(0),
        }
    }

    pub fn store(&self) -> &Arc<SnapshotStore> {
        &self.store
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Register the health components this engine reports on
    pub async fn register_health(&self) {
        self.health.register(components::REFRESH).await;
        self.health.register(self.sources.usage.name()).await;
        for source in &self.sources.costs {
            self.health.register(source.name()).await;
        }
        if let Some(inventory) = &self.sources.inventory {
            self.health.register(inventory.name()).await;
        }
    }

    /// Run one refresh cycle unless one is already in flight
    ///
    /// `trigger` names what asked for the cycle (`scheduler`, `api`, `startup`).
    pub async fn refresh(&self, trigger: &str) -> CycleOutcome {
        let Ok(mut state) = self.state.try_lock() else {
            self.metrics.inc_refresh_skipped();
            self.logger.log_refresh_skipped(trigger);
            return CycleOutcome::Skipped;
        };

        let started = Instant::now();
        let working = state.clone();
        let result = tokio::time::timeout(self.config.deadline, self.run_cycle(working)).await;
        let elapsed = started.elapsed();

        let failure = match result {
            Ok(Ok((next, snapshot, report))) => match self.store.publish(snapshot) {
                Ok(published) => {
                    *state = next;
                    drop(state);
                    return self.complete(published, report, elapsed).await;
                }
                Err(err) => CycleFailure {
                    error: err,
                    upstreams: report.upstreams,
                },
            },
            Ok(Err(failure)) => failure,
            Err(_) => CycleFailure {
                error: FinopsError::DeadlineExceeded(self.config.deadline),
                upstreams: UpstreamHealth::new(),
            },
        };
        drop(state);

        self.apply_upstream_health(&failure.upstreams).await;
        let outages = match failure.error {
            FinopsError::AllUpstreamsUnavailable => self.outages.fetch_add(1, Ordering::SeqCst) + 1,
            _ => self.outages.load(Ordering::SeqCst),
        };
        if outages >= self.config.unhealthy_after_outages.max(1) {
            self.health
                .set_unhealthy(
                    components::REFRESH,
                    format!("{} ({} consecutive outages)", failure.error, outages),
                )
                .await;
        } else {
            self.health
                .set_degraded(components::REFRESH, failure.error.to_string())
                .await;
        }
        self.metrics.observe_refresh(elapsed.as_secs_f64(), "failed");
        self.logger.log_refresh_failed(&failure.error.to_string());

        CycleOutcome::Failed {
            reason: failure.error.to_string(),
        }
    }

    async fn complete(
        &self,
        snapshot: Arc<InsightSnapshot>,
        report: CycleReport,
        elapsed: Duration,
    ) -> CycleOutcome {
        self.outages.store(0, Ordering::SeqCst);
        self.apply_upstream_health(&report.upstreams).await;
        self.health.set_healthy(components::REFRESH).await;
        self.health.set_ready(true).await;

        for anomaly in &report.anomalies {
            let severity = self.config.thresholds.anomaly_severity(anomaly.anomaly_score);
            if severity != Severity::None {
                self.logger.log_anomaly(anomaly, severity.as_str());
            }
        }
        for recommendation in &report.opened {
            self.logger.log_recommendation_opened(recommendation);
        }
        for (namespace, recommendation_type) in &report.resolved {
            self.logger
                .log_recommendation_resolved(namespace, *recommendation_type);
        }

        let duration_ms = elapsed.as_millis() as u64;
        self.metrics.observe_refresh(elapsed.as_secs_f64(), "completed");
        self.logger.log_refresh_completed(
            snapshot.generation,
            duration_ms,
            snapshot.namespace_scores.len(),
            snapshot.recommendations.len(),
            &snapshot.degraded_sources,
        );

        CycleOutcome::Completed {
            generation: snapshot.generation,
            generated_at: snapshot.generated_at.unwrap_or_else(Utc::now),
            duration_ms,
            degraded_sources: snapshot.degraded_sources.clone(),
        }
    }

    async fn apply_upstream_health(&self, upstreams: &UpstreamHealth) {
        for (component, failure) in upstreams {
            let health = match failure {
                None => ComponentHealth::healthy(),
                Some(message) => ComponentHealth::degraded(message.clone()),
            };
            self.health.update(component, health).await;
        }
    }

    async fn run_cycle(
        &self,
        mut state: EngineState,
    ) -> std::result::Result<(EngineState, InsightSnapshot, CycleReport), CycleFailure> {
        let now = Utc::now();
        let mut report = CycleReport::default();

        // every fetch is cut off here, leaving the rest of the deadline for scoring
        let cutoff = Instant::now() + self.config.fetch_budget;
        let (usage, costs, idle, history) = tokio::join!(
            self.fetch_usage(cutoff),
            self.fetch_costs(cutoff),
            self.fetch_inventory(cutoff),
            self.fetch_history(cutoff),
        );

        let usage_ok = self.apply_usage(&mut state, &mut report, usage);
        let costs_ok = self.apply_costs(&mut state, &mut report, costs);
        if !usage_ok && !costs_ok {
            return Err(CycleFailure {
                error: FinopsError::AllUpstreamsUnavailable,
                upstreams: report.upstreams,
            });
        }
        self.apply_inventory(&mut state, &mut report, idle);
        self.apply_history(&mut state, &mut report, history);

        let namespace_scores = scoring::score_all(&state.samples, &self.config.scoring, now);
        let anomalies = state.detector.observe_all(&state.costs);
        let candidates = recommendations::build_candidates(
            &namespace_scores,
            &state.samples,
            &state.idle,
            &self.config.recommendations,
        );
        let tracked = state.tracker.update(candidates, now);

        state.generation += 1;
        report.degraded.sort();
        report.degraded.dedup();

        let snapshot = InsightSnapshot {
            generation: state.generation,
            generated_at: Some(now),
            namespace_scores,
            anomalies: anomalies.clone(),
            recommendations: tracked.recommendations,
            forecasts: state.forecasts.clone(),
            degraded_sources: report.degraded.clone(),
        };

        report.anomalies = anomalies;
        report.opened = tracked.opened;
        report.resolved = tracked.resolved;

        Ok((state, snapshot, report))
    }

    /// Retry `call` until `until`; running out of time counts as exhausted retries
    async fn fetch<T, F, Fut>(&self, until: Instant, upstream: &str, operation: &str, call: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        match tokio::time::timeout_at(until, with_retry(&self.config.retry, operation, call)).await {
            Ok(result) => result,
            Err(_) => Err(FinopsError::unavailable(
                upstream,
                format!("{} still running at the fetch deadline", operation),
            )),
        }
    }

    /// Fetch every resource type concurrently
    async fn fetch_usage(&self, until: Instant) -> Vec<(ResourceType, Result<Vec<ResourceSample>>)> {
        let source = &self.sources.usage;
        let window = self.config.usage_window;

        join_all(ResourceType::ALL.into_iter().map(|resource| async move {
            let operation = format!("{}:{}", source.name(), resource);
            let fetched = self
                .fetch(until, source.name(), &operation, || source.fetch_usage(resource, window))
                .await;
            (resource, fetched)
        }))
        .await
    }

    /// A failed resource type keeps last cycle's samples, marked stale
    fn apply_usage(
        &self,
        state: &mut EngineState,
        report: &mut CycleReport,
        fetched: Vec<(ResourceType, Result<Vec<ResourceSample>>)>,
    ) -> bool {
        let upstream = self.sources.usage.name();
        let mut any_ok = false;
        let mut samples = Vec::new();

        for (resource, result) in fetched {
            match result {
                Ok(fresh) => {
                    any_ok = true;
                    record_health(&mut report.upstreams, upstream, None);
                    samples.extend(fresh);
                }
                Err(err) => {
                    let carried = carry_forward_samples(&state.samples, resource);
                    warn!(
                        upstream = %upstream,
                        resource = %resource,
                        carried_namespaces = carried.len(),
                        error = %err,
                        "Usage fetch failed, carrying forward previous values"
                    );
                    self.metrics.inc_upstream_error(upstream);
                    self.metrics.inc_carried_forward(upstream);
                    record_health(&mut report.upstreams, upstream, Some(err.to_string()));
                    report.degraded.push(format!("{}:{}", upstream, resource));
                    samples.extend(carried);
                }
            }
        }

        state.samples = samples;
        any_ok
    }

    /// Try cost sources in order, each getting an even share of the time left
    async fn fetch_costs(&self, until: Instant) -> Vec<(&str, Result<Vec<NamespaceCost>>)> {
        let window = self.config.cost_window;
        let total = self.sources.costs.len();
        let mut attempts = Vec::with_capacity(total);

        for (tried, source) in self.sources.costs.iter().enumerate() {
            let now = Instant::now();
            let share = until.saturating_duration_since(now) / (total - tried) as u32;
            let fetched = self
                .fetch(now + share, source.name(), source.name(), || {
                    source.fetch_allocation_cost(window)
                })
                .await;
            let answered = fetched.is_ok();
            attempts.push((source.name(), fetched));
            if answered {
                break;
            }
        }
        attempts
    }

    /// If no cost source answered, keep last cycle's costs, marked stale
    fn apply_costs(
        &self,
        state: &mut EngineState,
        report: &mut CycleReport,
        attempts: Vec<(&str, Result<Vec<NamespaceCost>>)>,
    ) -> bool {
        for (upstream, result) in attempts {
            match result {
                Ok(costs) => {
                    record_health(&mut report.upstreams, upstream, None);
                    state.costs = costs;
                    return true;
                }
                Err(err) => {
                    warn!(upstream = %upstream, error = %err, "Cost fetch failed");
                    self.metrics.inc_upstream_error(upstream);
                    record_health(&mut report.upstreams, upstream, Some(err.to_string()));
                    report.degraded.push(upstream.to_string());
                }
            }
        }

        if !self.sources.costs.is_empty() {
            debug!(namespaces = state.costs.len(), "Carrying forward previous costs");
            self.metrics.inc_carried_forward("cost");
        }
        for cost in &mut state.costs {
            cost.stale = true;
        }
        false
    }

    async fn fetch_inventory(&self, until: Instant) -> Option<Result<Vec<IdleResource>>> {
        let source = self.sources.inventory.as_ref()?;
        Some(
            self.fetch(until, source.name(), source.name(), || source.fetch_idle_resources())
                .await,
        )
    }

    fn apply_inventory(
        &self,
        state: &mut EngineState,
        report: &mut CycleReport,
        fetched: Option<Result<Vec<IdleResource>>>,
    ) {
        let (Some(result), Some(source)) = (fetched, &self.sources.inventory) else {
            return;
        };

        match result {
            Ok(idle) => {
                record_health(&mut report.upstreams, source.name(), None);
                state.idle = idle;
            }
            Err(err) => {
                // keep last cycle's idle set so their recommendations stay open
                warn!(upstream = %source.name(), error = %err, "Inventory fetch failed");
                self.metrics.inc_upstream_error(source.name());
                self.metrics.inc_carried_forward(source.name());
                record_health(&mut report.upstreams, source.name(), Some(err.to_string()));
                report.degraded.push(source.name().to_string());
            }
        }
    }

    async fn fetch_history(&self, until: Instant) -> Option<Result<HashMap<String, Vec<f64>>>> {
        let source = self.sources.history.as_ref()?;
        let days = self.config.forecast_days;
        let operation = format!("{}:history", source.name());
        Some(
            self.fetch(until, source.name(), &operation, || source.fetch_daily_costs(days))
                .await,
        )
    }

    /// Forecast from fresh history, or mark last cycle's forecasts stale
    fn apply_history(
        &self,
        state: &mut EngineState,
        report: &mut CycleReport,
        fetched: Option<Result<HashMap<String, Vec<f64>>>>,
    ) {
        let (Some(result), Some(source)) = (fetched, &self.sources.history) else {
            state.forecasts = forecast::forecast_all(&state.costs, &HashMap::new());
            return;
        };

        match result {
            Ok(history) => {
                state.forecasts = forecast::forecast_all(&state.costs, &history);
            }
            Err(err) => {
                warn!(upstream = %source.name(), error = %err, "Cost history fetch failed");
                self.metrics.inc_upstream_error(source.name());
                self.metrics.inc_carried_forward(source.name());
                report.degraded.push(format!("{}:history", source.name()));
                for forecast in &mut state.forecasts {
                    forecast.stale = true;
                }
            }
        }
    }
}

fn carry_forward_samples(previous: &[ResourceSample], resource: ResourceType) -> Vec<ResourceSample> {
    previous
        .iter()
        .filter(|s| s.resource_type == resource)
        .map(|s| ResourceSample {
            stale: true,
            ..s.clone()
        })
        .collect()
}
