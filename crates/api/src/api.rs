//! REST API and Prometheus exposition endpoint
//!
//! Every handler reads the current snapshot once and answers from it; no
//! request triggers upstream calls except `POST /update-metrics`.

use axum::{
    extract::{MatchedPath, Query, Request, State},
    http::StatusCode,
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use finops_lib::{
    exporter, health::ComponentStatus, AlertThresholds, AnomalyResult, CostForecast,
    CycleOutcome, FinopsMetrics, HealthRegistry, InsightEngine, InsightSnapshot,
    NamespaceScoreSet, Recommendation, RecommendationType, ResourceType, Severity, SnapshotStore,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{info, warn};

const SERVICE_NAME: &str = "finops-api";

/// Shared application state
pub struct AppState {
    pub store: Arc<SnapshotStore>,
    pub engine: Arc<InsightEngine>,
    pub health: HealthRegistry,
    pub metrics: FinopsMetrics,
    pub thresholds: AlertThresholds,
    /// Snapshot age beyond which responses are flagged stale
    pub max_snapshot_age_secs: i64,
}

impl AppState {
    pub fn new(engine: Arc<InsightEngine>, health: HealthRegistry, max_snapshot_age_secs: i64) -> Self {
        Self {
            store: Arc::clone(engine.store()),
            thresholds: engine.config().thresholds.clone(),
            engine,
            health,
            metrics: FinopsMetrics::new(),
            max_snapshot_age_secs,
        }
    }
}

/// JSON error body
#[derive(Debug, Clone, Serialize)]
pub struct ApiError {
    #[serde(skip)]
    pub status: StatusCode,
    pub error: String,
    pub code: &'static str,
}

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            error: message.into(),
            code: "BAD_REQUEST",
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            error: message.into(),
            code: "INTERNAL_ERROR",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(self)).into_response()
    }
}

/// Common wrapper naming the generation a response was computed from
#[derive(Debug, Serialize)]
pub struct Envelope<T> {
    pub generation: u64,
    pub generated_at: Option<DateTime<Utc>>,
    pub stale: bool,
    pub data: T,
}

impl<T> Envelope<T> {
    fn new(snapshot: &InsightSnapshot, max_age_secs: i64, data: T) -> Self {
        let stale = match snapshot.age_seconds(Utc::now()) {
            Some(age) => age > max_age_secs,
            None => true,
        };
        Self {
            generation: snapshot.generation,
            generated_at: snapshot.generated_at,
            stale,
            data,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct EfficiencyView {
    #[serde(flatten)]
    pub scores: NamespaceScoreSet,
    pub severity: Severity,
    pub waste_severity: BTreeMap<ResourceType, Severity>,
}

#[derive(Debug, Serialize)]
pub struct RecommendationView {
    #[serde(flatten)]
    pub recommendation: Recommendation,
    /// Savings at or above the notable threshold
    pub notable: bool,
}

#[derive(Debug, Serialize)]
pub struct RecommendationsBody {
    pub count: usize,
    pub total_monthly_savings: f64,
    pub recommendations: Vec<RecommendationView>,
}

#[derive(Debug, Serialize)]
pub struct AnomalyView {
    #[serde(flatten)]
    pub anomaly: AnomalyResult,
    pub severity: Severity,
}

#[derive(Debug, Serialize)]
pub struct ForecastView {
    #[serde(flatten)]
    pub forecast: CostForecast,
    pub severity: Severity,
}

#[derive(Debug, Serialize)]
pub struct AllInsights {
    pub cost_efficiency: Vec<EfficiencyView>,
    pub recommendations: RecommendationsBody,
    pub cost_anomalies: Vec<AnomalyView>,
    pub cost_forecasts: Vec<ForecastView>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub degraded_sources: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct NamespaceFilter {
    pub namespace: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct RecommendationFilter {
    pub namespace: Option<String>,
    #[serde(rename = "type")]
    pub recommendation_type: Option<String>,
    #[serde(default)]
    pub pending_only: bool,
}

#[derive(Debug, Default, Deserialize)]
pub struct AnomalyFilter {
    pub namespace: Option<String>,
    pub min_score: Option<f64>,
}

fn matches_namespace(filter: &Option<String>, namespace: &str) -> bool {
    filter.as_deref().map_or(true, |ns| ns == namespace)
}

fn efficiency_views(
    snapshot: &InsightSnapshot,
    thresholds: &AlertThresholds,
    filter: &NamespaceFilter,
) -> Vec<EfficiencyView> {
    snapshot
        .namespace_scores
        .iter()
        .filter(|s| matches_namespace(&filter.namespace, &s.namespace))
        .map(|s| EfficiencyView {
            severity: thresholds.efficiency_severity(s.efficiency_score),
            waste_severity: s
                .waste_pct_by_resource
                .iter()
                .map(|(r, w)| (*r, thresholds.waste_severity(*w)))
                .collect(),
            scores: s.clone(),
        })
        .collect()
}

fn recommendations_body(
    snapshot: &InsightSnapshot,
    thresholds: &AlertThresholds,
    filter: &RecommendationFilter,
    recommendation_type: Option<RecommendationType>,
) -> RecommendationsBody {
    let recommendations: Vec<RecommendationView> = snapshot
        .recommendations
        .iter()
        .filter(|r| matches_namespace(&filter.namespace, &r.namespace))
        .filter(|r| recommendation_type.map_or(true, |t| t == r.recommendation_type))
        .filter(|r| !filter.pending_only || r.pending)
        .map(|r| RecommendationView {
            notable: thresholds.is_notable_savings(r.estimated_monthly_savings),
            recommendation: r.clone(),
        })
        .collect();

    RecommendationsBody {
        count: recommendations.len(),
        total_monthly_savings: recommendations
            .iter()
            .map(|r| r.recommendation.estimated_monthly_savings)
            .sum(),
        recommendations,
    }
}

fn anomaly_views(
    snapshot: &InsightSnapshot,
    thresholds: &AlertThresholds,
    filter: &AnomalyFilter,
) -> Vec<AnomalyView> {
    snapshot
        .anomalies
        .iter()
        .filter(|a| matches_namespace(&filter.namespace, &a.namespace))
        .filter(|a| filter.min_score.map_or(true, |min| a.anomaly_score >= min))
        .map(|a| AnomalyView {
            severity: thresholds.anomaly_severity(a.anomaly_score),
            anomaly: a.clone(),
        })
        .collect()
}

fn forecast_views(
    snapshot: &InsightSnapshot,
    thresholds: &AlertThresholds,
    filter: &NamespaceFilter,
) -> Vec<ForecastView> {
    snapshot
        .forecasts
        .iter()
        .filter(|f| matches_namespace(&filter.namespace, &f.namespace))
        .map(|f| ForecastView {
            severity: thresholds.forecast_severity(f.current_monthly_cost, f.forecasted_monthly_cost),
            forecast: f.clone(),
        })
        .collect()
}

fn parse_recommendation_type(raw: &Option<String>) -> Result<Option<RecommendationType>, ApiError> {
    match raw.as_deref() {
        None => Ok(None),
        Some(value) => RecommendationType::parse(value).map(Some).ok_or_else(|| {
            ApiError::bad_request(format!("unknown recommendation type `{}`", value))
        }),
    }
}

/// Health check - 200 when healthy or degraded, 503 when unhealthy
async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let snapshot = state.store.load();
    let health = state
        .health
        .health_with_snapshot(
            snapshot.generation,
            snapshot.age_seconds(Utc::now()),
            state.max_snapshot_age_secs,
        )
        .await;

    let status_code = match health.status {
        ComponentStatus::Healthy => StatusCode::OK,
        ComponentStatus::Degraded => StatusCode::OK,
        ComponentStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };

    (status_code, Json(health))
}

/// Readiness - 200 once a snapshot has been published
async fn readyz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let readiness = state.health.readiness().await;

    let status_code = if readiness.ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (status_code, Json(readiness))
}

async fn version() -> impl IntoResponse {
    Json(serde_json::json!({
        "service": SERVICE_NAME,
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// Prometheus exposition of the current snapshot plus service metrics
async fn metrics(State(state): State<Arc<AppState>>) -> Result<Response, ApiError> {
    let snapshot = state.store.load();
    let body = exporter::render(&snapshot, Utc::now())
        .map_err(|e| ApiError::internal(format!("failed to encode metrics: {}", e)))?;

    Ok((
        StatusCode::OK,
        [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
        body,
    )
        .into_response())
}

async fn cost_efficiency(
    State(state): State<Arc<AppState>>,
    Query(filter): Query<NamespaceFilter>,
) -> Json<Envelope<Vec<EfficiencyView>>> {
    let snapshot = state.store.load();
    let data = efficiency_views(&snapshot, &state.thresholds, &filter);
    Json(Envelope::new(&snapshot, state.max_snapshot_age_secs, data))
}

async fn recommendations(
    State(state): State<Arc<AppState>>,
    Query(filter): Query<RecommendationFilter>,
) -> Result<Json<Envelope<RecommendationsBody>>, ApiError> {
    let recommendation_type = parse_recommendation_type(&filter.recommendation_type)?;
    let snapshot = state.store.load();
    let data = recommendations_body(&snapshot, &state.thresholds, &filter, recommendation_type);
    Ok(Json(Envelope::new(&snapshot, state.max_snapshot_age_secs, data)))
}

async fn cost_anomalies(
    State(state): State<Arc<AppState>>,
    Query(filter): Query<AnomalyFilter>,
) -> Json<Envelope<Vec<AnomalyView>>> {
    let snapshot = state.store.load();
    let data = anomaly_views(&snapshot, &state.thresholds, &filter);
    Json(Envelope::new(&snapshot, state.max_snapshot_age_secs, data))
}

async fn cost_forecasts(
    State(state): State<Arc<AppState>>,
    Query(filter): Query<NamespaceFilter>,
) -> Json<Envelope<Vec<ForecastView>>> {
    let snapshot = state.store.load();
    let data = forecast_views(&snapshot, &state.thresholds, &filter);
    Json(Envelope::new(&snapshot, state.max_snapshot_age_secs, data))
}

/// Every insight family from one snapshot
async fn all_insights(State(state): State<Arc<AppState>>) -> Json<Envelope<AllInsights>> {
    let snapshot = state.store.load();
    let all = NamespaceFilter::default();
    let data = AllInsights {
        cost_efficiency: efficiency_views(&snapshot, &state.thresholds, &all),
        recommendations: recommendations_body(
            &snapshot,
            &state.thresholds,
            &RecommendationFilter::default(),
            None,
        ),
        cost_anomalies: anomaly_views(&snapshot, &state.thresholds, &AnomalyFilter::default()),
        cost_forecasts: forecast_views(&snapshot, &state.thresholds, &all),
        degraded_sources: snapshot.degraded_sources.clone(),
    };
    Json(Envelope::new(&snapshot, state.max_snapshot_age_secs, data))
}

/// Force a refresh cycle; skipped with 409 if one is already running
async fn update_metrics(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let outcome = state.engine.refresh("api").await;
    let status_code = match &outcome {
        CycleOutcome::Completed { .. } => StatusCode::OK,
        CycleOutcome::Skipped => StatusCode::CONFLICT,
        CycleOutcome::Failed { .. } => StatusCode::SERVICE_UNAVAILABLE,
    };
    (status_code, Json(outcome))
}

/// Count every request by route template, method and status
async fn track_requests(State(state): State<Arc<AppState>>, request: Request, next: Next) -> Response {
    let endpoint = request
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_string())
        .unwrap_or_else(|| "unmatched".to_string());
    let method = request.method().to_string();

    let response = next.run(request).await;
    let status = response.status().as_u16();
    state.metrics.inc_http_request(&method, &endpoint, status);
    if response.status().is_server_error() {
        warn!(method = %method, endpoint = %endpoint, status = status, "Request failed");
    }
    response
}

/// Create the API router
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/readyz", get(readyz))
        .route("/version", get(version))
        .route("/metrics", get(metrics))
        .route("/cost-efficiency", get(cost_efficiency))
        .route("/recommendations", get(recommendations))
        .route("/cost-anomalies", get(cost_anomalies))
        .route("/cost-forecasts", get(cost_forecasts))
        .route("/all-insights", get(all_insights))
        .route("/update-metrics", post(update_metrics))
        .route_layer(middleware::from_fn_with_state(Arc::clone(&state), track_requests))
        .with_state(state)
}

/// Start the API server
pub async fn serve(
    port: u16,
    state: Arc<AppState>,
    shutdown: impl std::future::Future<Output = ()> + Send + 'static,
) -> anyhow::Result<()> {
    let app = create_router(state);

    let addr = format!("0.0.0.0:{}", port);
    info!(addr = %addr, "Starting API server");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await?;

    Ok(())
}
