//! Service configuration
//!
//! Every option is read from a `FINOPS_`-prefixed environment variable
//! (`FINOPS_PROMETHEUS_URL`, `FINOPS_REFRESH_INTERVAL_SECS`, ...) and falls back
//! to the default below.

use anyhow::{bail, Context, Result};
use finops_lib::engine::anomaly::AnomalyConfig;
use finops_lib::engine::recommendations::RecommendationConfig;
use finops_lib::engine::scoring::ScoringConfig;
use finops_lib::upstream::{HourlyRates, InventoryPricing, RetryPolicy, Window};
use finops_lib::{AlertThresholds, EngineConfig, SchedulerConfig};
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// Name attached to every structured log line
    #[serde(default = "default_cluster_name")]
    pub cluster_name: String,

    /// Port serving the REST API and `/metrics`
    #[serde(default = "default_api_port")]
    pub api_port: u16,

    #[serde(default = "default_prometheus_url")]
    pub prometheus_url: String,

    #[serde(default = "default_opencost_url")]
    pub opencost_url: String,

    /// Fallback price of one CPU core-hour
    #[serde(default = "default_cpu_hourly_cost")]
    pub cpu_hourly_cost: f64,

    /// Fallback price of one GiB-hour of memory
    #[serde(default = "default_memory_gib_hourly_cost")]
    pub memory_gib_hourly_cost: f64,

    #[serde(default = "default_storage_gib_monthly_cost")]
    pub storage_gib_monthly_cost: f64,

    #[serde(default = "default_load_balancer_monthly_cost")]
    pub load_balancer_monthly_cost: f64,

    #[serde(default = "default_refresh_interval")]
    pub refresh_interval_secs: u64,

    #[serde(default = "default_cycle_deadline")]
    pub cycle_deadline_secs: u64,

    /// Time one upstream fetch may take, retries included
    #[serde(default = "default_fetch_budget")]
    pub fetch_budget_secs: u64,

    /// Consecutive total outages before `/health` reports unhealthy
    #[serde(default = "default_unhealthy_after_outages")]
    pub unhealthy_after_outages: u32,

    /// Timeout of a single upstream HTTP call
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,

    #[serde(default = "default_retry_backoff")]
    pub retry_backoff_ms: u64,

    #[serde(default = "default_window")]
    pub usage_window: String,

    #[serde(default = "default_window")]
    pub cost_window: String,

    #[serde(default = "default_forecast_days")]
    pub forecast_days: u32,

    #[serde(default = "default_weight")]
    pub cpu_weight: f64,

    #[serde(default = "default_weight")]
    pub memory_weight: f64,

    #[serde(default = "default_anomaly_decay")]
    pub anomaly_decay: f64,

    #[serde(default = "default_anomaly_min_samples")]
    pub anomaly_min_samples: u64,

    #[serde(default = "default_anomaly_scale")]
    pub anomaly_scale: f64,

    /// `LowCostEfficiency` fires below this score
    #[serde(default = "default_efficiency_warning_below")]
    pub efficiency_warning_below: f64,

    /// Also the waste level at which rightsizing is recommended
    #[serde(default = "default_waste_warning_pct")]
    pub waste_warning_pct: f64,

    #[serde(default = "default_waste_critical_pct")]
    pub waste_critical_pct: f64,

    #[serde(default = "default_anomaly_warning_score")]
    pub anomaly_warning_score: f64,

    #[serde(default = "default_anomaly_critical_score")]
    pub anomaly_critical_score: f64,

    #[serde(default = "default_notable_savings")]
    pub notable_savings: f64,

    #[serde(default = "default_cost_growth_warning_ratio")]
    pub cost_growth_warning_ratio: f64,

    #[serde(default = "default_cost_growth_critical_ratio")]
    pub cost_growth_critical_ratio: f64,

    #[serde(default = "default_headroom")]
    pub rightsizing_headroom: f64,

    #[serde(default = "default_min_monthly_savings")]
    pub min_monthly_savings: f64,

    /// How long waste must persist before rightsizing is recommended
    #[serde(default = "default_sustained_waste")]
    pub sustained_waste_secs: u64,

    #[serde(default = "default_pending_threshold_days")]
    pub pending_threshold_days: u64,

    /// Refresh intervals without a new snapshot before `/health` degrades
    #[serde(default = "default_stale_after_intervals")]
    pub stale_after_intervals: u32,

    /// Query the Kubernetes API for idle PVCs and load balancers
    #[serde(default = "default_inventory_enabled")]
    pub inventory_enabled: bool,
}

fn default_cluster_name() -> String {
    std::env::var("CLUSTER_NAME").unwrap_or_else(|_| "default".to_string())
}

fn default_api_port() -> u16 {
    8000
}

fn default_prometheus_url() -> String {
    "http://prometheus-server.monitoring.svc.cluster.local".to_string()
}

fn default_opencost_url() -> String {
    "http://opencost.opencost.svc.cluster.local:9003".to_string()
}

fn default_cpu_hourly_cost() -> f64 {
    0.04
}

fn default_memory_gib_hourly_cost() -> f64 {
    0.01
}

fn default_storage_gib_monthly_cost() -> f64 {
    0.10
}

fn default_load_balancer_monthly_cost() -> f64 {
    18.25
}

fn default_refresh_interval() -> u64 {
    300
}

fn default_cycle_deadline() -> u64 {
    30
}

fn default_fetch_budget() -> u64 {
    20
}

fn default_unhealthy_after_outages() -> u32 {
    3
}

fn default_request_timeout() -> u64 {
    5
}

fn default_retry_attempts() -> u32 {
    3
}

fn default_retry_backoff() -> u64 {
    500
}

fn default_window() -> String {
    "1h".to_string()
}

fn default_forecast_days() -> u32 {
    30
}

fn default_weight() -> f64 {
    1.0
}

fn default_anomaly_decay() -> f64 {
    0.1
}

fn default_anomaly_min_samples() -> u64 {
    12
}

fn default_anomaly_scale() -> f64 {
    25.0
}

fn default_efficiency_warning_below() -> f64 {
    AlertThresholds::default().efficiency_warning_below
}

fn default_waste_warning_pct() -> f64 {
    AlertThresholds::default().waste_warning_pct
}

fn default_waste_critical_pct() -> f64 {
    AlertThresholds::default().waste_critical_pct
}

fn default_anomaly_warning_score() -> f64 {
    AlertThresholds::default().anomaly_warning_score
}

fn default_anomaly_critical_score() -> f64 {
    AlertThresholds::default().anomaly_critical_score
}

fn default_notable_savings() -> f64 {
    AlertThresholds::default().notable_savings
}

fn default_cost_growth_warning_ratio() -> f64 {
    AlertThresholds::default().cost_growth_warning_ratio
}

fn default_cost_growth_critical_ratio() -> f64 {
    AlertThresholds::default().cost_growth_critical_ratio
}

fn default_headroom() -> f64 {
    1.3
}

fn default_min_monthly_savings() -> f64 {
    1.0
}

fn default_sustained_waste() -> u64 {
    3600
}

fn default_pending_threshold_days() -> u64 {
    14
}

fn default_stale_after_intervals() -> u32 {
    3
}

fn default_inventory_enabled() -> bool {
    true
}

impl AppConfig {
    /// Load configuration from the process environment
    pub fn load() -> Result<Self> {
        Self::from_source(config::Environment::with_prefix("FINOPS"))
    }

    /// Load configuration from an explicit variable map (used by tests)
    pub fn from_vars(vars: HashMap<String, String>) -> Result<Self> {
        Self::from_source(config::Environment::with_prefix("FINOPS").source(Some(vars)))
    }

    fn from_source(env: config::Environment) -> Result<Self> {
        let config = config::Config::builder()
            .add_source(env.try_parsing(true))
            .build()
            .context("failed to read FINOPS_* environment")?;

        let app: AppConfig = config
            .try_deserialize()
            .context("invalid FINOPS_* configuration")?;
        app.validate()?;
        Ok(app)
    }

    pub fn validate(&self) -> Result<()> {
        if self.cpu_weight < 0.0 || self.memory_weight < 0.0 {
            bail!("scoring weights must be non-negative");
        }
        if self.cpu_weight + self.memory_weight <= 0.0 {
            bail!("at least one scoring weight must be positive");
        }
        if !(self.anomaly_decay > 0.0 && self.anomaly_decay <= 1.0) {
            bail!("anomaly decay must be in (0, 1], got {}", self.anomaly_decay);
        }
        if self.refresh_interval_secs == 0 {
            bail!("refresh interval must be positive");
        }
        if self.cycle_deadline_secs == 0 || self.request_timeout_secs == 0 {
            bail!("cycle deadline and request timeout must be positive");
        }
        if self.fetch_budget_secs == 0 || self.fetch_budget_secs >= self.cycle_deadline_secs {
            bail!(
                "fetch budget ({}s) must be positive and shorter than the cycle deadline ({}s)",
                self.fetch_budget_secs,
                self.cycle_deadline_secs
            );
        }
        let worst_case = self.retry_policy().worst_case(self.request_timeout());
        if worst_case > Duration::from_secs(self.fetch_budget_secs) {
            bail!(
                "{} attempts of {}s plus backoff take up to {:?}, over the {}s fetch budget",
                self.retry_attempts.max(1),
                self.request_timeout_secs,
                worst_case,
                self.fetch_budget_secs
            );
        }
        let percent = 0.0..=100.0;
        if !percent.contains(&self.waste_warning_pct) || !percent.contains(&self.waste_critical_pct) {
            bail!("waste thresholds must be percentages");
        }
        if self.waste_warning_pct > self.waste_critical_pct
            || self.anomaly_warning_score > self.anomaly_critical_score
            || self.cost_growth_warning_ratio > self.cost_growth_critical_ratio
        {
            bail!("warning thresholds must not exceed their critical thresholds");
        }
        if self.rightsizing_headroom < 1.0 {
            bail!("rightsizing headroom must be at least 1.0");
        }
        Window::parse(&self.usage_window).context("invalid usage window")?;
        Window::parse(&self.cost_window).context("invalid cost window")?;
        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.retry_attempts.max(1),
            initial_backoff: Duration::from_millis(self.retry_backoff_ms),
            ..RetryPolicy::default()
        }
    }

    pub fn alert_thresholds(&self) -> AlertThresholds {
        AlertThresholds {
            efficiency_warning_below: self.efficiency_warning_below,
            waste_warning_pct: self.waste_warning_pct,
            waste_critical_pct: self.waste_critical_pct,
            anomaly_warning_score: self.anomaly_warning_score,
            anomaly_critical_score: self.anomaly_critical_score,
            notable_savings: self.notable_savings,
            cost_growth_warning_ratio: self.cost_growth_warning_ratio,
            cost_growth_critical_ratio: self.cost_growth_critical_ratio,
        }
    }

    pub fn hourly_rates(&self) -> HourlyRates {
        HourlyRates {
            cpu_core_hour: self.cpu_hourly_cost,
            memory_gib_hour: self.memory_gib_hourly_cost,
        }
    }

    pub fn inventory_pricing(&self) -> InventoryPricing {
        InventoryPricing {
            storage_gib_month: self.storage_gib_monthly_cost,
            load_balancer_month: self.load_balancer_monthly_cost,
        }
    }

    pub fn scheduler_config(&self) -> SchedulerConfig {
        SchedulerConfig {
            interval: Duration::from_secs(self.refresh_interval_secs),
            run_immediately: false,
        }
    }

    /// Snapshot age beyond which `/health` reports degraded
    pub fn max_snapshot_age_secs(&self) -> i64 {
        (self.refresh_interval_secs * u64::from(self.stale_after_intervals.max(1))) as i64
    }

    pub fn engine_config(&self) -> Result<EngineConfig> {
        Ok(EngineConfig {
            usage_window: Window::parse(&self.usage_window)?,
            cost_window: Window::parse(&self.cost_window)?,
            forecast_days: self.forecast_days,
            retry: self.retry_policy(),
            fetch_budget: Duration::from_secs(self.fetch_budget_secs),
            deadline: Duration::from_secs(self.cycle_deadline_secs),
            unhealthy_after_outages: self.unhealthy_after_outages,
            scoring: ScoringConfig::with_weights(self.cpu_weight, self.memory_weight),
            anomaly: AnomalyConfig {
                decay: self.anomaly_decay,
                min_samples: self.anomaly_min_samples,
                scale: self.anomaly_scale,
                ..AnomalyConfig::default()
            },
            recommendations: RecommendationConfig {
                waste_threshold_pct: self.waste_warning_pct,
                headroom: self.rightsizing_headroom,
                min_monthly_savings: self.min_monthly_savings,
                sustain: Duration::from_secs(self.sustained_waste_secs),
                pending_threshold: Duration::from_secs(self.pending_threshold_days * 24 * 3600),
                ..RecommendationConfig::default()
            },
            thresholds: self.alert_thresholds(),
        })
    }
}
