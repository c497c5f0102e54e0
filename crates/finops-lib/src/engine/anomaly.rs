//! Cost anomaly detection against per-namespace rolling baselines
//!
//! Baselines are exponentially weighted moving mean/variance so a sustained
//! legitimate cost shift gradually becomes the new normal. Each namespace moves
//! through `Cold -> Warming -> Stable`; only `Stable` baselines produce a
//! non-zero score. Drops and spikes score alike, by distance from the mean.

use crate::models::{AnomalyResult, BaselineState, NamespaceCost};
use std::collections::HashMap;

/// Anomaly detector tuning
#[derive(Debug, Clone, PartialEq)]
pub struct AnomalyConfig {
    /// EWMA weight of the newest observation, in (0, 1]
    pub decay: f64,
    /// Observations required before scoring is enabled
    pub min_samples: u64,
    /// Score points per standard deviation
    pub scale: f64,
    /// Floor on stddev relative to the mean, so a flat baseline does not turn
    /// cents of drift into a maximal score
    pub min_relative_stddev: f64,
}

impl Default for AnomalyConfig {
    fn default() -> Self {
        Self {
            decay: 0.1,
            min_samples: 12,
            scale: 25.0,
            min_relative_stddev: 0.05,
        }
    }
}

/// Rolling reference cost for one namespace
#[derive(Debug, Clone, PartialEq)]
pub struct CostBaseline {
    pub mean: f64,
    pub variance: f64,
    pub samples: u64,
}

impl CostBaseline {
    fn new() -> Self {
        Self {
            mean: 0.0,
            variance: 0.0,
            samples: 0,
        }
    }

    pub fn stddev(&self) -> f64 {
        self.variance.max(0.0).sqrt()
    }

    pub fn state(&self, min_samples: u64) -> BaselineState {
        match self.samples {
            0 => BaselineState::Cold,
            n if n < min_samples => BaselineState::Warming,
            _ => BaselineState::Stable,
        }
    }

    /// Fold an observation into the EWMA mean and variance
    fn update(&mut self, observed: f64, decay: f64) {
        if self.samples == 0 {
            self.mean = observed;
            self.variance = 0.0;
        } else {
            let diff = observed - self.mean;
            let increment = decay * diff;
            self.mean += increment;
            self.variance = (1.0 - decay) * (self.variance + diff * increment);
        }
        self.samples += 1;
    }
}

/// Map a z-score to `[0, 100]`; non-decreasing in `|z|`
pub fn score_from_z(z: f64, scale: f64) -> f64 {
    if z.is_nan() {
        return 0.0;
    }
    (z.abs() * scale).clamp(0.0, 100.0)
}

/// Per-namespace baselines, kept for the life of the process
#[derive(Debug, Clone, Default)]
pub struct AnomalyDetector {
    config: AnomalyConfig,
    baselines: HashMap<String, CostBaseline>,
}

impl AnomalyDetector {
    pub fn new(config: AnomalyConfig) -> Self {
        Self {
            config,
            baselines: HashMap::new(),
        }
    }

    pub fn baseline(&self, namespace: &str) -> Option<&CostBaseline> {
        self.baselines.get(namespace)
    }

    pub fn state(&self, namespace: &str) -> BaselineState {
        self.baselines
            .get(namespace)
            .map(|b| b.state(self.config.min_samples))
            .unwrap_or(BaselineState::Cold)
    }

    /// Score this cycle's cost against the baseline, then fold it in
    ///
    /// Carried-forward (stale) costs are scored but never update the baseline.
    pub fn observe(&mut self, cost: &NamespaceCost) -> AnomalyResult {
        let observed = cost.daily_cost();
        let config = self.config.clone();
        let baseline = self
            .baselines
            .entry(cost.namespace.clone())
            .or_insert_with(CostBaseline::new);

        let state = baseline.state(config.min_samples);
        let (score, baseline_cost, baseline_stddev) = match state {
            BaselineState::Stable => {
                let stddev = baseline
                    .stddev()
                    .max(baseline.mean.abs() * config.min_relative_stddev)
                    .max(f64::EPSILON);
                let z = (observed - baseline.mean) / stddev;
                (score_from_z(z, config.scale), baseline.mean, baseline.stddev())
            }
            BaselineState::Cold => (0.0, observed, 0.0),
            BaselineState::Warming => (0.0, baseline.mean, baseline.stddev()),
        };

        let increase_percent = if baseline_cost > 0.0 {
            (observed - baseline_cost) / baseline_cost * 100.0
        } else {
            0.0
        };

        // Zero-cost namespaces stay cold until they start spending
        let skip_update = cost.stale || (state == BaselineState::Cold && observed <= 0.0);
        if !skip_update {
            baseline.update(observed, config.decay);
        }
        let state_after = baseline.state(config.min_samples);

        AnomalyResult {
            namespace: cost.namespace.clone(),
            anomaly_score: score,
            observed_cost: observed,
            baseline_cost,
            baseline_stddev,
            increase_percent,
            state: state_after,
            stale: cost.stale,
        }
    }

    /// Score all namespaces, ordered by namespace
    pub fn observe_all(&mut self, costs: &[NamespaceCost]) -> Vec<AnomalyResult> {
        let mut results: Vec<AnomalyResult> = costs.iter().map(|c| self.observe(c)).collect();
        results.sort_by(|a, b| a.namespace.cmp(&b.namespace));
        results
    }

    #[cfg(test)]
    pub(crate) fn seed(&mut self, namespace: &str, baseline: CostBaseline) {
        self.baselines.insert(namespace.to_string(), baseline);
    }
}
