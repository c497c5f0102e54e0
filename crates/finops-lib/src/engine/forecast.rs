//! Linear-trend cost projection
//!
//! Fits a least-squares line through daily costs and projects 30 days ahead.

use crate::models::{CostForecast, NamespaceCost};
use std::collections::HashMap;

/// Days of daily costs needed before a trend is trusted
const MIN_TREND_POINTS: usize = 8;

const PROJECTION_DAYS: f64 = 30.0;

/// Least-squares slope of `values` against their index
pub fn linear_slope(values: &[f64]) -> Option<f64> {
    let n = values.len();
    if n < 2 {
        return None;
    }
    let n_f = n as f64;
    let mean_x = (n_f - 1.0) / 2.0;
    let mean_y = values.iter().sum::<f64>() / n_f;

    let (num, den) = values
        .iter()
        .enumerate()
        .fold((0.0, 0.0), |(num, den), (i, y)| {
            let dx = i as f64 - mean_x;
            (num + dx * (y - mean_y), den + dx * dx)
        });

    if den == 0.0 {
        None
    } else {
        Some(num / den)
    }
}

/// Project one namespace's monthly cost
pub fn forecast_namespace(namespace: &str, hourly_cost: f64, daily_history: &[f64]) -> CostForecast {
    let current_monthly_cost = hourly_cost * crate::models::HOURS_PER_MONTH;
    let current_daily = hourly_cost * 24.0;

    let trend_percent = if daily_history.len() >= MIN_TREND_POINTS && current_daily > 0.0 {
        linear_slope(daily_history)
            .map(|slope| slope * PROJECTION_DAYS / current_daily * 100.0)
            .filter(|t| t.is_finite())
            .unwrap_or(0.0)
    } else {
        0.0
    };

    CostForecast {
        namespace: namespace.to_string(),
        current_monthly_cost,
        forecasted_monthly_cost: (current_monthly_cost * (1.0 + trend_percent / 100.0)).max(0.0),
        trend_percent,
        data_points: daily_history.len(),
        stale: false,
    }
}

/// Forecast every namespace with a current cost, ordered by namespace
pub fn forecast_all(costs: &[NamespaceCost], history: &HashMap<String, Vec<f64>>) -> Vec<CostForecast> {
    let mut forecasts: Vec<CostForecast> = costs
        .iter()
        .map(|cost| {
            let points = history.get(&cost.namespace).map(Vec::as_slice).unwrap_or(&[]);
            let mut forecast = forecast_namespace(&cost.namespace, cost.hourly_cost, points);
            forecast.stale = cost.stale;
            forecast
        })
        .collect();
    forecasts.sort_by(|a, b| a.namespace.cmp(&b.namespace));
    forecasts
}
