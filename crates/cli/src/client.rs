//! HTTP client for the FinOps insights API

use anyhow::{Context, Result};
use reqwest::{Client, StatusCode};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::collections::BTreeMap;
use url::Url;

/// API client for the insights service
pub struct ApiClient {
    client: Client,
    base_url: Url,
}

impl ApiClient {
    /// Create a new API client
    pub fn new(base_url: &str) -> Result<Self> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(60))
            .build()
            .context("Failed to create HTTP client")?;

        let mut base_url = Url::parse(base_url).context("Invalid API URL")?;
        // keep any path prefix when joining relative endpoints
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }

        Ok(Self { client, base_url })
    }

    fn url(&self, path: &str) -> Result<Url> {
        self.base_url.join(path).context("Invalid path")
    }

    /// Make a GET request
    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let response = self
            .client
            .get(self.url(path)?)
            .send()
            .await
            .context("Failed to send request")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("API error ({}): {}", status, error_message(&body));
        }

        response.json().await.context("Failed to parse response")
    }

    /// GET with query parameters; `None` values are left out
    pub async fn get_query<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, Option<String>)],
    ) -> Result<T> {
        let mut url = self.url(path)?;
        {
            let mut pairs = url.query_pairs_mut();
            for (key, value) in query {
                if let Some(value) = value {
                    pairs.append_pair(key, value);
                }
            }
        }
        if url.query() == Some("") {
            url.set_query(None);
        }
        self.get(url.as_str()).await
    }

    /// Service health; a 503 still carries a health body
    pub async fn health(&self) -> Result<(StatusCode, HealthReport)> {
        let response = self
            .client
            .get(self.url("health")?)
            .send()
            .await
            .context("Failed to send request")?;

        let status = response.status();
        let report = response.json().await.context("Failed to parse health response")?;
        Ok((status, report))
    }

    /// Trigger a refresh cycle and return how it ended
    pub async fn refresh(&self) -> Result<RefreshOutcome> {
        let response = self
            .client
            .post(self.url("update-metrics")?)
            .send()
            .await
            .context("Failed to send request")?;

        let status = response.status();
        match status {
            StatusCode::OK | StatusCode::CONFLICT | StatusCode::SERVICE_UNAVAILABLE => response
                .json()
                .await
                .context("Failed to parse refresh outcome"),
            _ => {
                let body = response.text().await.unwrap_or_default();
                anyhow::bail!("API error ({}): {}", status, error_message(&body));
            }
        }
    }
}

/// Pull the `error` field out of a JSON error body, falling back to the raw text
fn error_message(body: &str) -> String {
    serde_json::from_str::<ErrorResponse>(body)
        .map(|e| e.error)
        .unwrap_or_else(|_| body.to_string())
}

// API response types

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope<T> {
    pub generation: u64,
    pub generated_at: Option<String>,
    pub stale: bool,
    pub data: T,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EfficiencyEntry {
    pub namespace: String,
    pub efficiency_score: f64,
    pub waste_pct_by_resource: BTreeMap<String, f64>,
    pub utilization_ratio_by_resource: BTreeMap<String, f64>,
    #[serde(default)]
    pub stale_resources: Vec<String>,
    pub severity: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecommendationEntry {
    pub recommendation_type: String,
    pub namespace: String,
    pub estimated_monthly_savings: f64,
    pub description: String,
    #[serde(default)]
    pub details: Vec<String>,
    pub first_seen_at: String,
    pub pending_seconds: i64,
    pub pending: bool,
    #[serde(default)]
    pub notable: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecommendationList {
    pub count: usize,
    pub total_monthly_savings: f64,
    pub recommendations: Vec<RecommendationEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnomalyEntry {
    pub namespace: String,
    pub anomaly_score: f64,
    pub observed_cost: f64,
    pub baseline_cost: f64,
    pub increase_percent: f64,
    pub state: String,
    #[serde(default)]
    pub stale: bool,
    pub severity: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForecastEntry {
    pub namespace: String,
    pub current_monthly_cost: f64,
    pub forecasted_monthly_cost: f64,
    pub trend_percent: f64,
    pub data_points: usize,
    #[serde(default)]
    pub stale: bool,
    pub severity: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentReport {
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthReport {
    pub status: String,
    pub components: BTreeMap<String, ComponentReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub snapshot_generation: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub snapshot_age_seconds: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RefreshOutcome {
    Completed {
        generation: u64,
        generated_at: String,
        duration_ms: u64,
        #[serde(default)]
        degraded_sources: Vec<String>,
    },
    Skipped,
    Failed {
        reason: String,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}
