//! Efficiency, waste and utilization scoring
//!
//! Scores are pure functions of one cycle's samples.

use crate::error::FinopsError;
use crate::models::{NamespaceScoreSet, ResourceSample, ResourceType};
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use tracing::debug;

/// Weighting of resource types in the efficiency score
#[derive(Debug, Clone, PartialEq)]
pub struct ScoringConfig {
    pub weights: BTreeMap<ResourceType, f64>,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            weights: ResourceType::ALL.iter().map(|r| (*r, 1.0)).collect(),
        }
    }
}

impl ScoringConfig {
    pub fn with_weights(cpu: f64, memory: f64) -> Self {
        Self {
            weights: BTreeMap::from([(ResourceType::Cpu, cpu), (ResourceType::Memory, memory)]),
        }
    }

    fn weight(&self, resource: ResourceType) -> f64 {
        self.weights.get(&resource).copied().unwrap_or(0.0).max(0.0)
    }
}

/// `(requested - used) / requested * 100`, clamped to `[0, 100]`
pub fn waste_pct(requested: f64, used: f64) -> Result<f64, FinopsError> {
    if requested <= 0.0 || !requested.is_finite() || !used.is_finite() {
        return Err(FinopsError::ComputationUndefined(format!(
            "waste with requested={requested}"
        )));
    }
    Ok(((requested - used) / requested * 100.0).clamp(0.0, 100.0))
}

/// `used / requested`; may exceed 1 when a namespace bursts above its requests
pub fn utilization_ratio(requested: f64, used: f64) -> Result<f64, FinopsError> {
    if requested <= 0.0 || !requested.is_finite() || !used.is_finite() {
        return Err(FinopsError::ComputationUndefined(format!(
            "utilization with requested={requested}"
        )));
    }
    Ok((used / requested).max(0.0))
}

/// Weighted efficiency over the resource types that have a defined waste
pub fn efficiency_score(waste: &BTreeMap<ResourceType, f64>, config: &ScoringConfig) -> Option<f64> {
    let total_weight: f64 = waste.keys().map(|r| config.weight(*r)).sum();
    if total_weight <= 0.0 {
        return None;
    }

    let weighted: f64 = waste.iter().map(|(r, w)| config.weight(*r) * w).sum();
    Some((100.0 - weighted / total_weight).clamp(0.0, 100.0))
}

/// Score one namespace from its samples
///
/// Returns `None` when no resource type has a non-zero request; such a
/// namespace is excluded from efficiency and waste output entirely.
pub fn score_namespace(
    namespace: &str,
    samples: &[&ResourceSample],
    config: &ScoringConfig,
    computed_at: DateTime<Utc>,
) -> Option<NamespaceScoreSet> {
    let mut waste = BTreeMap::new();
    let mut utilization = BTreeMap::new();
    let mut stale_resources = Vec::new();

    for sample in samples {
        let resource = sample.resource_type;
        match (
            waste_pct(sample.requested, sample.used),
            utilization_ratio(sample.requested, sample.used),
        ) {
            (Ok(w), Ok(u)) => {
                waste.insert(resource, w);
                utilization.insert(resource, u);
                if sample.stale {
                    stale_resources.push(resource);
                }
            }
            (Err(err), _) | (_, Err(err)) => {
                debug!(namespace = %namespace, resource = %resource, error = %err, "Excluding resource from score");
            }
        }
    }

    let Some(efficiency) = efficiency_score(&waste, config) else {
        debug!(namespace = %namespace, "No scorable resources, namespace excluded");
        return None;
    };

    stale_resources.sort();
    stale_resources.dedup();

    Some(NamespaceScoreSet {
        namespace: namespace.to_string(),
        efficiency_score: efficiency,
        waste_pct_by_resource: waste,
        utilization_ratio_by_resource: utilization,
        stale_resources,
        computed_at,
    })
}

/// Score every namespace present in `samples`, ordered by namespace
pub fn score_all(
    samples: &[ResourceSample],
    config: &ScoringConfig,
    computed_at: DateTime<Utc>,
) -> Vec<NamespaceScoreSet> {
    let mut by_namespace: HashMap<&str, Vec<&ResourceSample>> = HashMap::new();
    for sample in samples {
        by_namespace
            .entry(sample.namespace.as_str())
            .or_default()
            .push(sample);
    }

    let mut scores: Vec<NamespaceScoreSet> = by_namespace
        .into_iter()
        .filter_map(|(ns, s)| score_namespace(ns, &s, config, computed_at))
        .collect();
    scores.sort_by(|a, b| a.namespace.cmp(&b.namespace));
    scores
}
