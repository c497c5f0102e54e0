//! Optimization recommendations and their lifecycle
//!
//! Candidates are rebuilt from scratch every cycle. The [`RecommendationTracker`]
//! gives them identity across cycles, keyed by `(namespace, recommendation_type)`,
//! so `first_seen_at` survives churn in savings figures and resets only after
//! the opportunity disappears for a cycle.

use crate::models::{
    IdleResource, NamespaceScoreSet, Recommendation, RecommendationType, ResourceSample,
    ResourceType, HOURS_PER_MONTH,
};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

/// Suggested limit as a multiple of the request, per resource
const CPU_LIMIT_FACTOR: f64 = 2.0;
const MEMORY_LIMIT_FACTOR: f64 = 1.5;

#[derive(Debug, Clone, PartialEq)]
pub struct RecommendationConfig {
    /// Waste percentage above which a resource is considered oversized;
    /// the engine overwrites it with `AlertThresholds::waste_warning_pct`
    pub waste_threshold_pct: f64,
    /// Multiplier over observed usage kept as the suggested request
    pub headroom: f64,
    /// Smallest request ever suggested, in cores or GiB
    pub min_request: f64,
    /// Rightsizing opportunities worth less than this per month are dropped
    pub min_monthly_savings: f64,
    /// How long waste must persist before a rightsizing recommendation opens
    pub sustain: Duration,
    /// Age at which an open recommendation counts as pending
    pub pending_threshold: Duration,
}

impl Default for RecommendationConfig {
    fn default() -> Self {
        Self {
            waste_threshold_pct: 30.0,
            headroom: 1.3,
            min_request: 0.1,
            min_monthly_savings: 1.0,
            sustain: Duration::from_secs(3600),
            pending_threshold: Duration::from_secs(14 * 24 * 3600),
        }
    }
}

/// A recommendation before lifecycle tracking is applied
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub recommendation_type: RecommendationType,
    pub namespace: String,
    pub estimated_monthly_savings: f64,
    pub description: String,
    pub details: Vec<String>,
}

type Key = (String, RecommendationType);

/// Build every candidate for this cycle
pub fn build_candidates(
    scores: &[NamespaceScoreSet],
    samples: &[ResourceSample],
    idle: &[IdleResource],
    config: &RecommendationConfig,
) -> Vec<Candidate> {
    let mut candidates = rightsizing_candidates(scores, samples, config);
    candidates.extend(limit_candidates(samples));
    candidates.extend(idle_candidates(idle));
    candidates
}

fn rightsizing_candidates(
    scores: &[NamespaceScoreSet],
    samples: &[ResourceSample],
    config: &RecommendationConfig,
) -> Vec<Candidate> {
    let by_key: HashMap<(&str, ResourceType), &ResourceSample> = samples
        .iter()
        .map(|s| ((s.namespace.as_str(), s.resource_type), s))
        .collect();

    let mut candidates = Vec::new();
    for score in scores {
        let mut savings = 0.0;
        let mut details = Vec::new();

        for (resource, waste) in &score.waste_pct_by_resource {
            if *waste <= config.waste_threshold_pct {
                continue;
            }
            let Some(sample) = by_key.get(&(score.namespace.as_str(), *resource)) else {
                continue;
            };

            let suggested = (sample.used * config.headroom).max(config.min_request);
            let wasted = (sample.requested - suggested).max(0.0);
            if wasted <= 0.0 {
                continue;
            }
            let monthly = wasted * sample.node_hourly_rate * HOURS_PER_MONTH;
            savings += monthly;
            details.push(format!(
                "{}: request {:.2} -> {:.2} ({:.0}% waste, ${:.2}/month)",
                resource, sample.requested, suggested, waste, monthly
            ));
        }

        if details.is_empty() || savings < config.min_monthly_savings {
            continue;
        }

        candidates.push(Candidate {
            recommendation_type: RecommendationType::Rightsizing,
            namespace: score.namespace.clone(),
            estimated_monthly_savings: savings,
            description: format!(
                "Reduce resource requests in {} to observed usage plus headroom",
                score.namespace
            ),
            details,
        });
    }
    candidates
}

fn limit_candidates(samples: &[ResourceSample]) -> Vec<Candidate> {
    samples
        .iter()
        .filter(|s| s.limit.is_none() && s.requested > 0.0)
        .map(|s| {
            let (recommendation_type, factor, unit) = match s.resource_type {
                ResourceType::Cpu => (RecommendationType::AddCpuLimits, CPU_LIMIT_FACTOR, "cores"),
                ResourceType::Memory => {
                    (RecommendationType::AddMemoryLimits, MEMORY_LIMIT_FACTOR, "GiB")
                }
            };
            Candidate {
                recommendation_type,
                namespace: s.namespace.clone(),
                estimated_monthly_savings: 0.0,
                description: format!(
                    "Set {} limits in {} to cap runaway consumption",
                    s.resource_type, s.namespace
                ),
                details: vec![format!(
                    "suggested limit {:.2} {} ({}x request)",
                    s.requested * factor,
                    unit,
                    factor
                )],
            }
        })
        .collect()
}

fn idle_candidates(idle: &[IdleResource]) -> Vec<Candidate> {
    let mut grouped: BTreeMap<Key, (f64, Vec<String>)> = BTreeMap::new();
    for resource in idle {
        let entry = grouped
            .entry((resource.namespace.clone(), resource.kind.recommendation_type()))
            .or_default();
        entry.0 += resource.monthly_cost;
        entry.1.push(format!("{} (${:.2}/month)", resource.name, resource.monthly_cost));
    }

    grouped
        .into_iter()
        .map(|((namespace, recommendation_type), (savings, details))| {
            let what = match recommendation_type {
                RecommendationType::IdlePvc => "unmounted persistent volume claims",
                _ => "load balancers without backing pods",
            };
            Candidate {
                recommendation_type,
                description: format!("Remove {} {} in {}", details.len(), what, namespace),
                namespace,
                estimated_monthly_savings: savings,
                details,
            }
        })
        .collect()
}

#[derive(Debug, Clone)]
struct TrackedEntry {
    detected_at: DateTime<Utc>,
    opened_at: Option<DateTime<Utc>>,
}

/// Result of reconciling one cycle's candidates
#[derive(Debug, Clone, Default)]
pub struct TrackerUpdate {
    /// Open recommendations, highest savings first
    pub recommendations: Vec<Recommendation>,
    /// Recommendations opened this cycle
    pub opened: Vec<Recommendation>,
    /// Recommendations that disappeared this cycle
    pub resolved: Vec<(String, RecommendationType)>,
}

/// Keeps recommendation identity across refresh cycles
#[derive(Debug, Clone, Default)]
pub struct RecommendationTracker {
    config: RecommendationConfig,
    entries: HashMap<Key, TrackedEntry>,
}

impl RecommendationTracker {
    pub fn new(config: RecommendationConfig) -> Self {
        Self {
            config,
            entries: HashMap::new(),
        }
    }

    /// Number of opportunities currently tracked, opened or still sustaining
    pub fn tracked(&self) -> usize {
        self.entries.len()
    }

    fn sustain_for(&self, recommendation_type: RecommendationType) -> ChronoDuration {
        match recommendation_type {
            RecommendationType::Rightsizing => {
                ChronoDuration::from_std(self.config.sustain).unwrap_or_else(|_| ChronoDuration::zero())
            }
            _ => ChronoDuration::zero(),
        }
    }

    /// Reconcile this cycle's candidates against tracked state
    pub fn update(&mut self, candidates: Vec<Candidate>, now: DateTime<Utc>) -> TrackerUpdate {
        let mut update = TrackerUpdate::default();
        let pending_secs = self.config.pending_threshold.as_secs() as i64;

        let present: HashMap<Key, Candidate> = candidates
            .into_iter()
            .map(|c| ((c.namespace.clone(), c.recommendation_type), c))
            .collect();

        // Absent for a cycle means a fresh identity next time
        let gone: Vec<Key> = self
            .entries
            .keys()
            .filter(|k| !present.contains_key(*k))
            .cloned()
            .collect();
        for key in gone {
            if let Some(entry) = self.entries.remove(&key) {
                if entry.opened_at.is_some() {
                    update.resolved.push(key);
                }
            }
        }

        for (key, candidate) in present {
            let sustain = self.sustain_for(candidate.recommendation_type);
            let entry = self.entries.entry(key).or_insert(TrackedEntry {
                detected_at: now,
                opened_at: None,
            });

            let newly_opened = entry.opened_at.is_none() && now - entry.detected_at >= sustain;
            if newly_opened {
                entry.opened_at = Some(now);
            }
            let Some(first_seen_at) = entry.opened_at else {
                continue;
            };

            let pending_seconds = (now - first_seen_at).num_seconds().max(0);
            let recommendation = Recommendation {
                recommendation_type: candidate.recommendation_type,
                namespace: candidate.namespace,
                estimated_monthly_savings: candidate.estimated_monthly_savings,
                description: candidate.description,
                details: candidate.details,
                first_seen_at,
                pending_seconds,
                pending: pending_secs > 0 && pending_seconds >= pending_secs,
            };
            if newly_opened {
                update.opened.push(recommendation.clone());
            }
            update.recommendations.push(recommendation);
        }

        update.recommendations.sort_by(|a, b| {
            b.estimated_monthly_savings
                .total_cmp(&a.estimated_monthly_savings)
                .then_with(|| a.namespace.cmp(&b.namespace))
                .then_with(|| a.recommendation_type.cmp(&b.recommendation_type))
        });
        update.opened.sort_by(|a, b| a.namespace.cmp(&b.namespace));
        update.resolved.sort();
        update
    }
}
