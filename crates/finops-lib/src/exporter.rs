//! Prometheus exposition of the current snapshot
//!
//! Every scrape builds a fresh registry from one snapshot, so exported values
//! always belong to a single generation and namespaces that disappear stop
//! being exported. Label names must match the alerting rules exactly:
//! `exported_namespace`, `resource_type` and `recommendation_type`.

use crate::models::InsightSnapshot;
use chrono::{DateTime, Utc};
use prometheus::{Encoder, Gauge, GaugeVec, Opts, Registry, TextEncoder};

pub const NAMESPACE_LABEL: &str = "exported_namespace";
pub const RESOURCE_LABEL: &str = "resource_type";
pub const RECOMMENDATION_LABEL: &str = "recommendation_type";

fn gauge_vec(registry: &Registry, name: &str, help: &str, labels: &[&str]) -> prometheus::Result<GaugeVec> {
    let gauge = GaugeVec::new(Opts::new(name, help), labels)?;
    registry.register(Box::new(gauge.clone()))?;
    Ok(gauge)
}

fn gauge(registry: &Registry, name: &str, help: &str) -> prometheus::Result<Gauge> {
    let gauge = Gauge::with_opts(Opts::new(name, help))?;
    registry.register(Box::new(gauge.clone()))?;
    Ok(gauge)
}

/// Registry holding the insight families of one snapshot
pub fn snapshot_registry(snapshot: &InsightSnapshot, now: DateTime<Utc>) -> prometheus::Result<Registry> {
    let registry = Registry::new();

    let efficiency = gauge_vec(
        &registry,
        "finops_efficiency_score",
        "Resource efficiency score (0-100, higher is better)",
        &[NAMESPACE_LABEL],
    )?;
    let waste = gauge_vec(
        &registry,
        "finops_resource_waste",
        "Requested but unused resources in percent",
        &[RESOURCE_LABEL, NAMESPACE_LABEL],
    )?;
    let utilization = gauge_vec(
        &registry,
        "finops_resource_utilization",
        "Used over requested resources",
        &[RESOURCE_LABEL, NAMESPACE_LABEL],
    )?;
    let anomaly = gauge_vec(
        &registry,
        "finops_anomaly_score",
        "Cost anomaly score (0-100, higher is more anomalous)",
        &[NAMESPACE_LABEL],
    )?;
    let savings = gauge_vec(
        &registry,
        "finops_optimization_savings",
        "Estimated monthly savings of open recommendations",
        &[RECOMMENDATION_LABEL, NAMESPACE_LABEL],
    )?;
    let pending = gauge_vec(
        &registry,
        "finops_recommendation_pending_seconds",
        "Seconds since a recommendation was first seen",
        &[RECOMMENDATION_LABEL, NAMESPACE_LABEL],
    )?;
    let forecast = gauge_vec(
        &registry,
        "finops_cost_forecast",
        "Projected monthly cost in 30 days",
        &[NAMESPACE_LABEL],
    )?;
    let generation = gauge(
        &registry,
        "finops_snapshot_generation",
        "Generation of the snapshot being served",
    )?;
    let timestamp = gauge(
        &registry,
        "finops_snapshot_timestamp_seconds",
        "Unix time the snapshot being served was generated",
    )?;
    let age = gauge(
        &registry,
        "finops_snapshot_age_seconds",
        "Seconds since the snapshot being served was generated",
    )?;

    for score in &snapshot.namespace_scores {
        let ns = score.namespace.as_str();
        if score.efficiency_score.is_finite() {
            efficiency.with_label_values(&[ns]).set(score.efficiency_score);
        }
        for (resource, value) in &score.waste_pct_by_resource {
            if value.is_finite() {
                waste.with_label_values(&[resource.as_str(), ns]).set(*value);
            }
        }
        for (resource, value) in &score.utilization_ratio_by_resource {
            if value.is_finite() {
                utilization
                    .with_label_values(&[resource.as_str(), ns])
                    .set(*value);
            }
        }
    }

    for result in &snapshot.anomalies {
        anomaly
            .with_label_values(&[result.namespace.as_str()])
            .set(result.anomaly_score);
    }

    for recommendation in &snapshot.recommendations {
        let labels = [
            recommendation.recommendation_type.as_str(),
            recommendation.namespace.as_str(),
        ];
        savings
            .with_label_values(&labels)
            .set(recommendation.estimated_monthly_savings);
        pending
            .with_label_values(&labels)
            .set(recommendation.pending_seconds as f64);
    }

    for projection in &snapshot.forecasts {
        forecast
            .with_label_values(&[projection.namespace.as_str()])
            .set(projection.forecasted_monthly_cost);
    }

    generation.set(snapshot.generation as f64);
    if let Some(generated_at) = snapshot.generated_at {
        timestamp.set(generated_at.timestamp() as f64);
    }
    if let Some(seconds) = snapshot.age_seconds(now) {
        age.set(seconds as f64);
    }

    Ok(registry)
}

/// Text exposition of the snapshot followed by the process-global service metrics
pub fn render(snapshot: &InsightSnapshot, now: DateTime<Utc>) -> prometheus::Result<String> {
    let registry = snapshot_registry(snapshot, now)?;
    let mut families = registry.gather();
    families.extend(prometheus::gather());

    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    encoder.encode(&families, &mut buffer)?;
    Ok(String::from_utf8_lossy(&buffer).into_owned())
}
