//! Refresh cycle scenarios against mock upstreams

use super::*;
use crate::error::Result;
use crate::models::IdleKind;
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex as StdMutex;

struct MockUsage {
    samples: StdMutex<Vec<ResourceSample>>,
    fail_cpu: AtomicBool,
    fail_all: AtomicBool,
    delay: StdMutex<Duration>,
    /// Extra time every CPU fetch takes before answering
    cpu_delay: StdMutex<Duration>,
    calls: AtomicUsize,
}

impl MockUsage {
    fn new(samples: Vec<ResourceSample>) -> Arc<Self> {
        Arc::new(Self {
            samples: StdMutex::new(samples),
            fail_cpu: AtomicBool::new(false),
            fail_all: AtomicBool::new(false),
            delay: StdMutex::new(Duration::ZERO),
            cpu_delay: StdMutex::new(Duration::ZERO),
            calls: AtomicUsize::new(0),
        })
    }

    fn set_samples(&self, samples: Vec<ResourceSample>) {
        *self.samples.lock().unwrap() = samples;
    }

    fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = delay;
    }
}

#[async_trait]
impl UsageSource for MockUsage {
    fn name(&self) -> &str {
        "prometheus"
    }

    async fn fetch_usage(&self, resource: ResourceType, _window: Window) -> Result<Vec<ResourceSample>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let mut delay = *self.delay.lock().unwrap();
        if resource == ResourceType::Cpu {
            delay += *self.cpu_delay.lock().unwrap();
        }
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if self.fail_all.load(Ordering::SeqCst)
            || (resource == ResourceType::Cpu && self.fail_cpu.load(Ordering::SeqCst))
        {
            return Err(FinopsError::unavailable("prometheus", "timeout"));
        }
        Ok(self
            .samples
            .lock()
            .unwrap()
            .iter()
            .filter(|s| s.resource_type == resource)
            .cloned()
            .collect())
    }
}

struct MockCost {
    name: &'static str,
    costs: StdMutex<Vec<NamespaceCost>>,
    fail: AtomicBool,
    delay: StdMutex<Duration>,
}

impl MockCost {
    fn new(name: &'static str, costs: Vec<NamespaceCost>) -> Arc<Self> {
        Arc::new(Self {
            name,
            costs: StdMutex::new(costs),
            fail: AtomicBool::new(false),
            delay: StdMutex::new(Duration::ZERO),
        })
    }
}

#[async_trait]
impl CostSource for MockCost {
    fn name(&self) -> &str {
        self.name
    }

    async fn fetch_allocation_cost(&self, _window: Window) -> Result<Vec<NamespaceCost>> {
        let delay = *self.delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if self.fail.load(Ordering::SeqCst) {
            return Err(FinopsError::unavailable(self.name, "connection refused"));
        }
        Ok(self.costs.lock().unwrap().clone())
    }
}

struct MockInventory {
    idle: Vec<IdleResource>,
    fail: AtomicBool,
}

#[async_trait]
impl InventorySource for MockInventory {
    fn name(&self) -> &str {
        "kubernetes"
    }

    async fn fetch_idle_resources(&self) -> Result<Vec<IdleResource>> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(FinopsError::unavailable("kubernetes", "forbidden"));
        }
        Ok(self.idle.clone())
    }
}

fn sample(ns: &str, resource: ResourceType, requested: f64, used: f64) -> ResourceSample {
    ResourceSample {
        namespace: ns.to_string(),
        resource_type: resource,
        requested,
        used,
        limit: Some(requested),
        node_hourly_rate: 0.04,
        stale: false,
    }
}

fn cost(ns: &str, hourly: f64) -> NamespaceCost {
    NamespaceCost {
        namespace: ns.to_string(),
        window_cost: hourly,
        hourly_cost: hourly,
        stale: false,
    }
}

fn test_config() -> EngineConfig {
    EngineConfig {
        retry: RetryPolicy {
            max_attempts: 2,
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(2),
        },
        recommendations: RecommendationConfig {
            sustain: Duration::ZERO,
            ..Default::default()
        },
        ..Default::default()
    }
}

struct Harness {
    engine: InsightEngine,
    usage: Arc<MockUsage>,
    opencost: Arc<MockCost>,
    fallback: Arc<MockCost>,
    health: HealthRegistry,
}

fn harness(config: EngineConfig, inventory: Option<Arc<MockInventory>>) -> Harness {
    let usage = MockUsage::new(vec![
        sample("team-a", ResourceType::Cpu, 10.0, 2.0),
        sample("team-a", ResourceType::Memory, 8.0, 8.0),
        sample("team-c", ResourceType::Cpu, 4.0, 1.0),
        sample("team-c", ResourceType::Memory, 2.0, 2.0),
    ]);
    let opencost = MockCost::new("opencost", vec![cost("team-a", 2.0), cost("team-c", 1.0)]);
    let fallback = MockCost::new("prometheus", vec![cost("team-a", 1.5), cost("team-c", 0.5)]);
    let health = HealthRegistry::new();

    let sources = EngineSources {
        usage: usage.clone(),
        costs: vec![
            opencost.clone() as Arc<dyn CostSource>,
            fallback.clone() as Arc<dyn CostSource>,
        ],
        history: None,
        inventory: inventory.map(|i| i as Arc<dyn InventorySource>),
    };
    let engine = InsightEngine::new(
        sources,
        config,
        Arc::new(SnapshotStore::new()),
        health.clone(),
        StructuredLogger::new("test"),
    );

    Harness {
        engine,
        usage,
        opencost,
        fallback,
        health,
    }
}

fn cpu_waste(snapshot: &InsightSnapshot, ns: &str) -> Option<f64> {
    snapshot
        .namespace_scores
        .iter()
        .find(|s| s.namespace == ns)
        .and_then(|s| s.waste_pct_by_resource.get(&ResourceType::Cpu).copied())
}

#[tokio::test]
async fn test_first_cycle_publishes_generation_one() {
    let h = harness(test_config(), None);
    assert_eq!(h.engine.store().generation(), 0);

    let outcome = h.engine.refresh("startup").await;
    assert!(outcome.is_completed());

    let snapshot = h.engine.store().load();
    assert_eq!(snapshot.generation, 1);
    assert!(snapshot.generated_at.is_some());
    assert_eq!(snapshot.namespace_scores.len(), 2);
    assert!((snapshot.namespace_scores[0].efficiency_score - 60.0).abs() < 1e-9);
    assert_eq!(snapshot.anomalies.len(), 2);
    assert_eq!(snapshot.forecasts.len(), 2);
    assert!(snapshot.degraded_sources.is_empty());
    assert!(h.health.readiness().await.ready);
}

#[tokio::test]
async fn test_cpu_outage_carries_forward_without_zero_spike() {
    let h = harness(test_config(), None);
    h.engine.refresh("scheduler").await;
    assert_eq!(cpu_waste(&h.engine.store().load(), "team-c"), Some(75.0));

    h.usage.fail_cpu.store(true, Ordering::SeqCst);
    for _ in 0..2 {
        let outcome = h.engine.refresh("scheduler").await;
        assert!(outcome.is_completed());

        let snapshot = h.engine.store().load();
        assert_eq!(cpu_waste(&snapshot, "team-c"), Some(75.0));
        let team_c = snapshot
            .namespace_scores
            .iter()
            .find(|s| s.namespace == "team-c")
            .unwrap();
        assert_eq!(team_c.stale_resources, vec![ResourceType::Cpu]);
        assert!(snapshot
            .degraded_sources
            .contains(&"prometheus:cpu".to_string()));
    }

    let health = h.health.health().await;
    assert_eq!(health.components["prometheus"].status, crate::ComponentStatus::Degraded);

    h.usage.fail_cpu.store(false, Ordering::SeqCst);
    h.usage.set_samples(vec![
        sample("team-c", ResourceType::Cpu, 4.0, 2.0),
        sample("team-c", ResourceType::Memory, 2.0, 2.0),
    ]);
    h.engine.refresh("scheduler").await;

    let snapshot = h.engine.store().load();
    assert_eq!(snapshot.generation, 4);
    assert_eq!(cpu_waste(&snapshot, "team-c"), Some(50.0));
    assert!(snapshot.namespace_scores[0].stale_resources.is_empty());
    assert!(snapshot.degraded_sources.is_empty());
}

#[tokio::test]
async fn test_cpu_failure_without_history_excludes_cpu() {
    let h = harness(test_config(), None);
    h.usage.fail_cpu.store(true, Ordering::SeqCst);

    h.engine.refresh("startup").await;

    let snapshot = h.engine.store().load();
    assert_eq!(cpu_waste(&snapshot, "team-a"), None);
    // memory alone: fully used, so no waste
    assert_eq!(snapshot.namespace_scores[0].efficiency_score, 100.0);
}

#[tokio::test]
async fn test_total_outage_keeps_previous_snapshot() {
    let h = harness(test_config(), None);
    h.engine.refresh("startup").await;
    let before = h.engine.store().load();

    h.usage.fail_all.store(true, Ordering::SeqCst);
    h.opencost.fail.store(true, Ordering::SeqCst);
    h.fallback.fail.store(true, Ordering::SeqCst);

    let outcome = h.engine.refresh("scheduler").await;
    assert!(matches!(outcome, CycleOutcome::Failed { .. }));

    let after = h.engine.store().load();
    assert_eq!(after.generation, 1);
    assert_eq!(after.generated_at, before.generated_at);
    assert!(Arc::ptr_eq(&before, &after));
}

#[tokio::test]
async fn test_opencost_outage_falls_back_to_prometheus_costs() {
    let h = harness(test_config(), None);
    h.opencost.fail.store(true, Ordering::SeqCst);

    h.engine.refresh("startup").await;

    let snapshot = h.engine.store().load();
    let team_a = snapshot.anomalies.iter().find(|a| a.namespace == "team-a").unwrap();
    assert_eq!(team_a.observed_cost, 1.5 * 24.0);
    assert!(!team_a.stale);
    assert_eq!(snapshot.degraded_sources, vec!["opencost".to_string()]);
}

#[tokio::test]
async fn test_all_cost_sources_down_marks_costs_stale() {
    let h = harness(test_config(), None);
    h.engine.refresh("startup").await;

    h.opencost.fail.store(true, Ordering::SeqCst);
    h.fallback.fail.store(true, Ordering::SeqCst);
    let outcome = h.engine.refresh("scheduler").await;
    assert!(outcome.is_completed());

    let snapshot = h.engine.store().load();
    assert!(snapshot.anomalies.iter().all(|a| a.stale));
    assert!(snapshot.forecasts.iter().all(|f| f.stale));
    assert_eq!(
        snapshot.anomalies.iter().find(|a| a.namespace == "team-a").unwrap().observed_cost,
        48.0
    );
}

#[tokio::test]
async fn test_overlapping_refresh_is_skipped() {
    let h = harness(test_config(), None);
    h.usage.set_delay(Duration::from_millis(100));

    let (first, second) = tokio::join!(h.engine.refresh("scheduler"), h.engine.refresh("api"));

    assert!(first.is_completed());
    assert_eq!(second, CycleOutcome::Skipped);
    assert_eq!(h.engine.store().generation(), 1);
}

#[tokio::test]
async fn test_deadline_discards_partial_cycle() {
    let config = EngineConfig {
        deadline: Duration::from_millis(50),
        ..test_config()
    };
    let h = harness(config, None);
    h.usage.set_delay(Duration::from_millis(200));

    let outcome = h.engine.refresh("scheduler").await;
    assert!(matches!(outcome, CycleOutcome::Failed { .. }));
    assert_eq!(h.engine.store().generation(), 0);
    assert!(!h.health.readiness().await.ready);

    h.usage.set_delay(Duration::ZERO);
    h.engine.refresh("scheduler").await;
    // the abandoned cycle never committed its generation bump
    assert_eq!(h.engine.store().generation(), 1);
}

#[tokio::test]
async fn test_recommendation_identity_survives_cycles() {
    let h = harness(test_config(), None);
    h.engine.refresh("startup").await;
    let first = h.engine.store().load();
    let rightsizing = |s: &InsightSnapshot| {
        s.recommendations
            .iter()
            .find(|r| r.namespace == "team-a" && r.recommendation_type == RecommendationType::Rightsizing)
            .cloned()
    };
    let opened = rightsizing(&first).unwrap();

    tokio::time::sleep(Duration::from_millis(10)).await;
    h.engine.refresh("scheduler").await;
    let second = h.engine.store().load();

    assert_eq!(rightsizing(&second).unwrap().first_seen_at, opened.first_seen_at);
    assert_eq!(second.generation, 2);
}

#[tokio::test]
async fn test_inventory_outage_keeps_idle_recommendations() {
    let inventory = Arc::new(MockInventory {
        idle: vec![IdleResource {
            namespace: "team-a".into(),
            name: "orphan".into(),
            kind: IdleKind::PersistentVolumeClaim,
            monthly_cost: 2.0,
        }],
        fail: AtomicBool::new(false),
    });
    let h = harness(test_config(), Some(inventory.clone()));
    h.engine.refresh("startup").await;
    let first_seen = h
        .engine
        .store()
        .load()
        .recommendations
        .iter()
        .find(|r| r.recommendation_type == RecommendationType::IdlePvc)
        .map(|r| r.first_seen_at)
        .unwrap();

    inventory.fail.store(true, Ordering::SeqCst);
    h.engine.refresh("scheduler").await;

    let snapshot = h.engine.store().load();
    let idle = snapshot
        .recommendations
        .iter()
        .find(|r| r.recommendation_type == RecommendationType::IdlePvc)
        .unwrap();
    assert_eq!(idle.first_seen_at, first_seen);
    assert!(snapshot.degraded_sources.contains(&"kubernetes".to_string()));
}

#[tokio::test]
async fn test_snapshot_sections_share_one_generation() {
    let h = harness(test_config(), None);
    let store = Arc::clone(h.engine.store());

    for cycle in 1..=3u64 {
        h.usage.set_samples(vec![sample("team-a", ResourceType::Cpu, 10.0, cycle as f64)]);
        *h.opencost.costs.lock().unwrap() = vec![cost("team-a", cycle as f64)];
        h.engine.refresh("scheduler").await;

        let snapshot = store.load();
        assert_eq!(snapshot.generation, cycle);
        let expected_waste = (10.0 - cycle as f64) / 10.0 * 100.0;
        assert!((cpu_waste(&snapshot, "team-a").unwrap() - expected_waste).abs() < 1e-9);
        assert_eq!(snapshot.anomalies[0].observed_cost, cycle as f64 * 24.0);
        assert_eq!(snapshot.forecasts[0].current_monthly_cost, cycle as f64 * 730.0);
    }
}

#[tokio::test(start_paused = true)]
async fn test_timing_out_cpu_fetch_degrades_within_default_deadline() {
    let h = harness(EngineConfig::default(), None);
    h.engine.refresh("startup").await;
    assert_eq!(cpu_waste(&h.engine.store().load(), "team-c"), Some(75.0));

    // every CPU attempt hangs for a full request timeout, then fails
    *h.usage.cpu_delay.lock().unwrap() = Duration::from_secs(10);
    h.usage.fail_cpu.store(true, Ordering::SeqCst);

    match h.engine.refresh("scheduler").await {
        CycleOutcome::Completed {
            generation,
            duration_ms,
            degraded_sources,
            ..
        } => {
            assert_eq!(generation, 2);
            assert!(duration_ms < EngineConfig::default().deadline.as_millis() as u64);
            assert_eq!(degraded_sources, vec!["prometheus:cpu".to_string()]);
        }
        other => panic!("expected a completed cycle, got {:?}", other),
    }

    let snapshot = h.engine.store().load();
    assert_eq!(cpu_waste(&snapshot, "team-c"), Some(75.0));
    let team_c = snapshot
        .namespace_scores
        .iter()
        .find(|s| s.namespace == "team-c")
        .unwrap();
    assert_eq!(team_c.stale_resources, vec![ResourceType::Cpu]);
}

#[tokio::test(start_paused = true)]
async fn test_hung_primary_cost_source_leaves_time_for_fallback() {
    let h = harness(EngineConfig::default(), None);
    *h.opencost.delay.lock().unwrap() = Duration::from_secs(60);

    let outcome = h.engine.refresh("startup").await;
    assert!(outcome.is_completed(), "{:?}", outcome);

    let snapshot = h.engine.store().load();
    let team_a = snapshot.anomalies.iter().find(|a| a.namespace == "team-a").unwrap();
    assert_eq!(team_a.observed_cost, 1.5 * 24.0);
    assert!(!team_a.stale);
    assert_eq!(snapshot.degraded_sources, vec!["opencost".to_string()]);
}

#[tokio::test]
async fn test_repeated_total_outage_turns_refresh_unhealthy() {
    let h = harness(test_config(), None);
    h.engine.register_health().await;
    h.engine.refresh("startup").await;

    h.usage.fail_all.store(true, Ordering::SeqCst);
    h.opencost.fail.store(true, Ordering::SeqCst);
    h.fallback.fail.store(true, Ordering::SeqCst);

    for _ in 0..2 {
        h.engine.refresh("scheduler").await;
        let health = h.health.health().await;
        assert_eq!(health.components[components::REFRESH].status, crate::ComponentStatus::Degraded);
        assert!(h.health.readiness().await.ready);
    }

    h.engine.refresh("scheduler").await;
    let health = h.health.health().await;
    assert_eq!(health.status, crate::ComponentStatus::Unhealthy);
    let readiness = h.health.readiness().await;
    assert!(!readiness.ready);
    assert_eq!(readiness.reason.as_deref(), Some("Critical component unhealthy"));

    h.usage.fail_all.store(false, Ordering::SeqCst);
    h.opencost.fail.store(false, Ordering::SeqCst);
    assert!(h.engine.refresh("scheduler").await.is_completed());
    assert_eq!(h.health.health().await.status, crate::ComponentStatus::Healthy);

    // the outage count starts over after a good cycle
    h.usage.fail_all.store(true, Ordering::SeqCst);
    h.opencost.fail.store(true, Ordering::SeqCst);
    h.engine.refresh("scheduler").await;
    let health = h.health.health().await;
    assert_eq!(health.components[components::REFRESH].status, crate::ComponentStatus::Degraded);
}
