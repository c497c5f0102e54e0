//! Core data models for the insights engine

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Hours in an average month, used for monthly cost projections
pub const HOURS_PER_MONTH: f64 = 730.0;

/// Resource dimension tracked per namespace
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceType {
    /// CPU cores
    Cpu,
    /// Memory in GiB
    Memory,
}

impl ResourceType {
    pub const ALL: [ResourceType; 2] = [ResourceType::Cpu, ResourceType::Memory];

    /// Label value used in exported series
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceType::Cpu => "cpu",
            ResourceType::Memory => "memory",
        }
    }
}

impl fmt::Display for ResourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Window-aggregated usage of one resource in one namespace
///
/// Lives for a single refresh cycle, except when carried forward with
/// `stale = true` after an upstream outage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceSample {
    pub namespace: String,
    pub resource_type: ResourceType,
    pub requested: f64,
    pub used: f64,
    /// `None` when the namespace sets no limit for this resource
    pub limit: Option<f64>,
    /// Cost of one unit (core or GiB) per hour
    pub node_hourly_rate: f64,
    #[serde(default)]
    pub stale: bool,
}

/// Cost of a namespace over the configured cost window
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NamespaceCost {
    pub namespace: String,
    pub window_cost: f64,
    pub hourly_cost: f64,
    #[serde(default)]
    pub stale: bool,
}

impl NamespaceCost {
    /// Daily run rate, the unit anomaly baselines are kept in
    pub fn daily_cost(&self) -> f64 {
        self.hourly_cost * 24.0
    }

    pub fn monthly_cost(&self) -> f64 {
        self.hourly_cost * HOURS_PER_MONTH
    }
}

/// Per-namespace scores computed in one cycle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NamespaceScoreSet {
    pub namespace: String,
    /// 0-100, higher means less waste
    pub efficiency_score: f64,
    /// Only resource types with a non-zero request appear here
    pub waste_pct_by_resource: BTreeMap<ResourceType, f64>,
    pub utilization_ratio_by_resource: BTreeMap<ResourceType, f64>,
    /// Resource types whose figures were carried forward from an earlier cycle
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub stale_resources: Vec<ResourceType>,
    pub computed_at: DateTime<Utc>,
}

/// Lifecycle of a namespace's cost baseline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BaselineState {
    /// No observations yet
    Cold,
    /// Accumulating, scoring disabled
    Warming,
    /// Scoring enabled
    Stable,
}

/// Cost anomaly evaluation for one namespace
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnomalyResult {
    pub namespace: String,
    /// 0-100, higher means more anomalous
    pub anomaly_score: f64,
    /// Daily run rate observed this cycle
    pub observed_cost: f64,
    /// Baseline mean the observation was compared against
    pub baseline_cost: f64,
    pub baseline_stddev: f64,
    pub increase_percent: f64,
    pub state: BaselineState,
    #[serde(default)]
    pub stale: bool,
}

/// Recommendation taxonomy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecommendationType {
    /// Requests well above sustained usage
    Rightsizing,
    /// CPU requested without a limit
    AddCpuLimits,
    /// Memory requested without a limit
    AddMemoryLimits,
    /// Persistent volume claims not mounted by any live pod
    IdlePvc,
    /// LoadBalancer services with no backing pods
    IdleLoadBalancer,
}

impl RecommendationType {
    pub const ALL: [RecommendationType; 5] = [
        RecommendationType::Rightsizing,
        RecommendationType::AddCpuLimits,
        RecommendationType::AddMemoryLimits,
        RecommendationType::IdlePvc,
        RecommendationType::IdleLoadBalancer,
    ];

    /// Label value used in exported series
    pub fn as_str(&self) -> &'static str {
        match self {
            RecommendationType::Rightsizing => "rightsizing",
            RecommendationType::AddCpuLimits => "add_cpu_limits",
            RecommendationType::AddMemoryLimits => "add_memory_limits",
            RecommendationType::IdlePvc => "idle_pvc",
            RecommendationType::IdleLoadBalancer => "idle_load_balancer",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.as_str() == value)
    }
}

impl fmt::Display for RecommendationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An optimization opportunity, identified by `(namespace, recommendation_type)`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recommendation {
    pub recommendation_type: RecommendationType,
    pub namespace: String,
    pub estimated_monthly_savings: f64,
    pub description: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub details: Vec<String>,
    pub first_seen_at: DateTime<Utc>,
    pub pending_seconds: i64,
    /// True once the recommendation has been open for the pending threshold
    pub pending: bool,
}

/// Kind of idle resource reported by the cluster inventory
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdleKind {
    PersistentVolumeClaim,
    LoadBalancer,
}

impl IdleKind {
    pub fn recommendation_type(&self) -> RecommendationType {
        match self {
            IdleKind::PersistentVolumeClaim => RecommendationType::IdlePvc,
            IdleKind::LoadBalancer => RecommendationType::IdleLoadBalancer,
        }
    }
}

/// One idle object found in the cluster
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdleResource {
    pub namespace: String,
    pub name: String,
    pub kind: IdleKind,
    pub monthly_cost: f64,
}

/// 30-day cost projection for a namespace
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CostForecast {
    pub namespace: String,
    pub current_monthly_cost: f64,
    pub forecasted_monthly_cost: f64,
    pub trend_percent: f64,
    pub data_points: usize,
    #[serde(default)]
    pub stale: bool,
}

/// One complete, self-consistent generation of computed insights
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InsightSnapshot {
    /// Monotonic counter; 0 is the empty snapshot served before the first cycle
    pub generation: u64,
    pub generated_at: Option<DateTime<Utc>>,
    pub namespace_scores: Vec<NamespaceScoreSet>,
    pub anomalies: Vec<AnomalyResult>,
    pub recommendations: Vec<Recommendation>,
    pub forecasts: Vec<CostForecast>,
    /// Upstreams whose data was carried forward or missing in this generation
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub degraded_sources: Vec<String>,
}

impl InsightSnapshot {
    /// Snapshot served until the first refresh cycle succeeds
    pub fn empty() -> Self {
        Self {
            generation: 0,
            generated_at: None,
            namespace_scores: Vec::new(),
            anomalies: Vec::new(),
            recommendations: Vec::new(),
            forecasts: Vec::new(),
            degraded_sources: Vec::new(),
        }
    }

    pub fn is_empty_generation(&self) -> bool {
        self.generated_at.is_none()
    }

    /// Seconds since this snapshot was generated, `None` before the first cycle
    pub fn age_seconds(&self, now: DateTime<Utc>) -> Option<i64> {
        self.generated_at
            .map(|at| (now - at).num_seconds().max(0))
    }
}

impl Default for InsightSnapshot {
    fn default() -> Self {
        Self::empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resource_type_serializes_lowercase() {
        let json = serde_json::to_string(&ResourceType::Memory).unwrap();
        assert_eq!(json, "\"memory\"");
    }

    #[test]
    fn test_waste_map_keys_are_label_values() {
        let mut waste = BTreeMap::new();
        waste.insert(ResourceType::Cpu, 80.0);
        let json = serde_json::to_value(&waste).unwrap();
        assert_eq!(json["cpu"], 80.0);
    }

    #[test]
    fn test_recommendation_type_parse_matches_label() {
        for t in RecommendationType::ALL {
            assert_eq!(RecommendationType::parse(t.as_str()), Some(t));
        }
        assert_eq!(RecommendationType::parse("bogus"), None);
    }

    #[test]
    fn test_namespace_cost_projections() {
        let cost = NamespaceCost {
            namespace: "team-a".into(),
            window_cost: 2.0,
            hourly_cost: 2.0,
            stale: false,
        };
        assert_eq!(cost.daily_cost(), 48.0);
        assert_eq!(cost.monthly_cost(), 1460.0);
    }

    #[test]
    fn test_empty_snapshot_has_no_age() {
        let snapshot = InsightSnapshot::empty();
        assert!(snapshot.is_empty_generation());
        assert_eq!(snapshot.age_seconds(Utc::now()), None);
    }
}
