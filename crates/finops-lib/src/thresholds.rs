//! Named thresholds shared with the alerting rules
//!
//! The PrometheusRule definitions that consume the exported series fire on the
//! same values; keeping them here lets API responses classify a value exactly
//! the way the alert would.

use serde::{Deserialize, Serialize};

/// Severity attached to a value when compared against alert thresholds
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    None,
    Warning,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::None => "none",
            Severity::Warning => "warning",
            Severity::Critical => "critical",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertThresholds {
    /// `LowCostEfficiency` fires below this score
    pub efficiency_warning_below: f64,
    pub waste_warning_pct: f64,
    pub waste_critical_pct: f64,
    pub anomaly_warning_score: f64,
    pub anomaly_critical_score: f64,
    /// Monthly savings considered worth surfacing
    pub notable_savings: f64,
    /// Forecast-to-current cost ratios
    pub cost_growth_warning_ratio: f64,
    pub cost_growth_critical_ratio: f64,
}

impl Default for AlertThresholds {
    fn default() -> Self {
        Self {
            efficiency_warning_below: 70.0,
            waste_warning_pct: 30.0,
            waste_critical_pct: 50.0,
            anomaly_warning_score: 50.0,
            anomaly_critical_score: 90.0,
            notable_savings: 100.0,
            cost_growth_warning_ratio: 1.3,
            cost_growth_critical_ratio: 1.5,
        }
    }
}

impl AlertThresholds {
    pub fn efficiency_severity(&self, score: f64) -> Severity {
        if score < self.efficiency_warning_below {
            Severity::Warning
        } else {
            Severity::None
        }
    }

    pub fn waste_severity(&self, waste_pct: f64) -> Severity {
        if waste_pct >= self.waste_critical_pct {
            Severity::Critical
        } else if waste_pct >= self.waste_warning_pct {
            Severity::Warning
        } else {
            Severity::None
        }
    }

    pub fn anomaly_severity(&self, score: f64) -> Severity {
        if score >= self.anomaly_critical_score {
            Severity::Critical
        } else if score >= self.anomaly_warning_score {
            Severity::Warning
        } else {
            Severity::None
        }
    }

    pub fn forecast_severity(&self, current: f64, forecast: f64) -> Severity {
        if current <= 0.0 {
            return Severity::None;
        }
        let ratio = forecast / current;
        if ratio >= self.cost_growth_critical_ratio {
            Severity::Critical
        } else if ratio >= self.cost_growth_warning_ratio {
            Severity::Warning
        } else {
            Severity::None
        }
    }

    pub fn is_notable_savings(&self, monthly_savings: f64) -> bool {
        monthly_savings >= self.notable_savings
    }
}
