//! Insight listing commands

use anyhow::Result;
use colored::Colorize;
use tabled::Tabled;

use super::print_envelope_header;
use crate::client::{
    AnomalyEntry, ApiClient, EfficiencyEntry, Envelope, ForecastEntry, RecommendationList,
};
use crate::output::{
    color_status, format_age, format_currency, format_percent, format_trend, print_rows,
    OutputFormat,
};

/// Row for efficiency table
#[derive(Tabled)]
struct EfficiencyRow {
    #[tabled(rename = "Namespace")]
    namespace: String,
    #[tabled(rename = "Efficiency")]
    efficiency: String,
    #[tabled(rename = "CPU Waste")]
    cpu_waste: String,
    #[tabled(rename = "Mem Waste")]
    memory_waste: String,
    #[tabled(rename = "CPU Util")]
    cpu_utilization: String,
    #[tabled(rename = "Mem Util")]
    memory_utilization: String,
    #[tabled(rename = "Severity")]
    severity: String,
}

/// Row for recommendations table
#[derive(Tabled)]
struct RecommendationRow {
    #[tabled(rename = "Namespace")]
    namespace: String,
    #[tabled(rename = "Type")]
    recommendation_type: String,
    #[tabled(rename = "Savings/mo")]
    savings: String,
    #[tabled(rename = "Open For")]
    open_for: String,
    #[tabled(rename = "Description")]
    description: String,
}

#[derive(Tabled)]
struct AnomalyRow {
    #[tabled(rename = "Namespace")]
    namespace: String,
    #[tabled(rename = "Score")]
    score: String,
    #[tabled(rename = "Daily Cost")]
    observed: String,
    #[tabled(rename = "Baseline")]
    baseline: String,
    #[tabled(rename = "Change")]
    change: String,
    #[tabled(rename = "Baseline State")]
    state: String,
    #[tabled(rename = "Severity")]
    severity: String,
}

#[derive(Tabled)]
struct ForecastRow {
    #[tabled(rename = "Namespace")]
    namespace: String,
    #[tabled(rename = "Current/mo")]
    current: String,
    #[tabled(rename = "Forecast/mo")]
    forecast: String,
    #[tabled(rename = "Trend")]
    trend: String,
    #[tabled(rename = "Days")]
    data_points: usize,
    #[tabled(rename = "Severity")]
    severity: String,
}

fn ratio_cell(values: &std::collections::BTreeMap<String, f64>, key: &str, percent: bool) -> String {
    match values.get(key) {
        Some(v) if percent => format_percent(*v),
        Some(v) => format!("{:.2}", v),
        None => "-".to_string(),
    }
}

/// Show per-namespace efficiency scores
pub async fn show_efficiency(
    client: &ApiClient,
    namespace: Option<String>,
    format: OutputFormat,
) -> Result<()> {
    let result: Envelope<Vec<EfficiencyEntry>> = client
        .get_query("cost-efficiency", &[("namespace", namespace)])
        .await?;

    let rows: Vec<EfficiencyRow> = result
        .data
        .iter()
        .map(|e| {
            let mut namespace = e.namespace.clone();
            if !e.stale_resources.is_empty() {
                namespace.push_str(" *");
            }
            EfficiencyRow {
                namespace,
                efficiency: format!("{:.1}", e.efficiency_score),
                cpu_waste: ratio_cell(&e.waste_pct_by_resource, "cpu", true),
                memory_waste: ratio_cell(&e.waste_pct_by_resource, "memory", true),
                cpu_utilization: ratio_cell(&e.utilization_ratio_by_resource, "cpu", false),
                memory_utilization: ratio_cell(&e.utilization_ratio_by_resource, "memory", false),
                severity: color_status(&e.severity),
            }
        })
        .collect();

    if format == OutputFormat::Table {
        print_envelope_header(&result);
    }
    print_rows(&rows, &result, format);
    if format == OutputFormat::Table && result.data.iter().any(|e| !e.stale_resources.is_empty()) {
        println!("{}", "* carried forward from an earlier refresh".dimmed());
    }

    Ok(())
}

/// Show open recommendations
pub async fn show_recommendations(
    client: &ApiClient,
    namespace: Option<String>,
    recommendation_type: Option<String>,
    pending_only: bool,
    format: OutputFormat,
) -> Result<()> {
    let result: Envelope<RecommendationList> = client
        .get_query(
            "recommendations",
            &[
                ("namespace", namespace),
                ("type", recommendation_type),
                ("pending_only", pending_only.then(|| "true".to_string())),
            ],
        )
        .await?;

    let rows: Vec<RecommendationRow> = result
        .data
        .recommendations
        .iter()
        .map(|r| {
            let savings = format_currency(r.estimated_monthly_savings);
            let open_for = format_age(r.pending_seconds);
            RecommendationRow {
                namespace: r.namespace.clone(),
                recommendation_type: r.recommendation_type.clone(),
                savings: if r.notable {
                    savings.green().bold().to_string()
                } else {
                    savings
                },
                open_for: if r.pending {
                    open_for.red().to_string()
                } else {
                    open_for
                },
                description: r.description.clone(),
            }
        })
        .collect();

    if format == OutputFormat::Table {
        print_envelope_header(&result);
    }
    print_rows(&rows, &result, format);
    if format == OutputFormat::Table && !rows.is_empty() {
        println!(
            "{} {} across {} recommendation(s)",
            "Potential Savings:".bold(),
            format_currency(result.data.total_monthly_savings).green().bold(),
            result.data.count
        );
    }

    Ok(())
}

/// Show cost anomaly scores
pub async fn show_anomalies(
    client: &ApiClient,
    namespace: Option<String>,
    min_score: Option<f64>,
    format: OutputFormat,
) -> Result<()> {
    let result: Envelope<Vec<AnomalyEntry>> = client
        .get_query(
            "cost-anomalies",
            &[
                ("namespace", namespace),
                ("min_score", min_score.map(|s| s.to_string())),
            ],
        )
        .await?;

    let rows: Vec<AnomalyRow> = result
        .data
        .iter()
        .map(|a| AnomalyRow {
            namespace: a.namespace.clone(),
            score: format!("{:.1}", a.anomaly_score),
            observed: format_currency(a.observed_cost),
            baseline: format_currency(a.baseline_cost),
            change: format_trend(a.increase_percent),
            state: color_status(&a.state),
            severity: color_status(&a.severity),
        })
        .collect();

    if format == OutputFormat::Table {
        print_envelope_header(&result);
    }
    print_rows(&rows, &result, format);

    Ok(())
}

/// Show 30-day cost forecasts
pub async fn show_forecasts(
    client: &ApiClient,
    namespace: Option<String>,
    format: OutputFormat,
) -> Result<()> {
    let result: Envelope<Vec<ForecastEntry>> = client
        .get_query("cost-forecasts", &[("namespace", namespace)])
        .await?;

    let rows: Vec<ForecastRow> = result
        .data
        .iter()
        .map(|f| ForecastRow {
            namespace: f.namespace.clone(),
            current: format_currency(f.current_monthly_cost),
            forecast: format_currency(f.forecasted_monthly_cost),
            trend: format_trend(f.trend_percent),
            data_points: f.data_points,
            severity: color_status(&f.severity),
        })
        .collect();

    if format == OutputFormat::Table {
        print_envelope_header(&result);
    }
    print_rows(&rows, &result, format);

    Ok(())
}
