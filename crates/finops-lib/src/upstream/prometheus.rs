//! Prometheus HTTP API client
//!
//! Issues instant and range queries against `/api/v1/query` and
//! `/api/v1/query_range`, and implements the usage, cost fallback and cost
//! history sources on top of the kube-state-metrics, cAdvisor and OpenCost
//! series Prometheus scrapes.

use super::{CostHistorySource, CostSource, UsageSource, Window};
use crate::error::{FinopsError, Result};
use crate::models::{NamespaceCost, ResourceSample, ResourceType};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::collections::{BTreeSet, HashMap};
use std::time::Duration;
use tracing::debug;
use url::Url;

const UPSTREAM: &str = crate::health::components::PROMETHEUS;

const BYTES_PER_GIB: &str = "1073741824";

/// Per-unit hourly prices used when the OpenCost pricing series are absent
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HourlyRates {
    pub cpu_core_hour: f64,
    pub memory_gib_hour: f64,
}

impl Default for HourlyRates {
    fn default() -> Self {
        Self {
            cpu_core_hour: 0.04,
            memory_gib_hour: 0.01,
        }
    }
}

impl HourlyRates {
    pub fn for_resource(&self, resource: ResourceType) -> f64 {
        match resource {
            ResourceType::Cpu => self.cpu_core_hour,
            ResourceType::Memory => self.memory_gib_hour,
        }
    }
}

/// One element of an instant vector
#[derive(Debug, Clone, Deserialize)]
pub struct PromSample {
    #[serde(default)]
    pub metric: HashMap<String, String>,
    pub value: (f64, String),
}

impl PromSample {
    pub fn number(&self) -> Option<f64> {
        parse_value(&self.value.1)
    }
}

/// One series of a range matrix
#[derive(Debug, Clone, Deserialize)]
pub struct PromSeries {
    #[serde(default)]
    pub metric: HashMap<String, String>,
    #[serde(default)]
    pub values: Vec<(f64, String)>,
}

impl PromSeries {
    pub fn numbers(&self) -> Vec<f64> {
        self.values.iter().filter_map(|(_, v)| parse_value(v)).collect()
    }
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    status: String,
    #[serde(default)]
    data: Option<QueryData>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "resultType", content = "result", rename_all = "lowercase")]
enum QueryData {
    Vector(Vec<PromSample>),
    Matrix(Vec<PromSeries>),
    Scalar((f64, String)),
    String((f64, String)),
}

fn parse_value(raw: &str) -> Option<f64> {
    raw.parse::<f64>().ok().filter(|v| v.is_finite())
}

/// Client for the Prometheus query API
pub struct PrometheusClient {
    client: Client,
    base_url: Url,
    fallback_rates: HourlyRates,
}

impl PrometheusClient {
    pub fn new(base_url: &str, timeout: Duration, fallback_rates: HourlyRates) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| FinopsError::unavailable(UPSTREAM, e))?;

        Ok(Self {
            client,
            base_url: normalize_base(base_url)?,
            fallback_rates,
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Run an instant query and return the resulting vector
    pub async fn instant_query(&self, query: &str) -> Result<Vec<PromSample>> {
        let url = self.endpoint("api/v1/query")?;
        let response = self
            .client
            .get(url)
            .query(&[("query", query)])
            .send()
            .await?;

        match self.decode(response).await? {
            QueryData::Vector(samples) => Ok(samples),
            QueryData::Scalar(value) => Ok(vec![PromSample {
                metric: HashMap::new(),
                value,
            }]),
            other => Err(FinopsError::invalid_response(
                UPSTREAM,
                format!("expected vector result, got {:?}", other),
            )),
        }
    }

    /// Run a range query between `start` and `end` at `step` resolution
    pub async fn range_query(
        &self,
        query: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        step: Duration,
    ) -> Result<Vec<PromSeries>> {
        let url = self.endpoint("api/v1/query_range")?;
        let start = start.timestamp().to_string();
        let end = end.timestamp().to_string();
        let step = format!("{}s", step.as_secs().max(1));

        let response = self
            .client
            .get(url)
            .query(&[
                ("query", query),
                ("start", start.as_str()),
                ("end", end.as_str()),
                ("step", step.as_str()),
            ])
            .send()
            .await?;

        match self.decode(response).await? {
            QueryData::Matrix(series) => Ok(series),
            other => Err(FinopsError::invalid_response(
                UPSTREAM,
                format!("expected matrix result, got {:?}", other),
            )),
        }
    }

    fn endpoint(&self, path: &str) -> Result<Url> {
        self.base_url
            .join(path)
            .map_err(|e| FinopsError::invalid_response(UPSTREAM, e))
    }

    async fn decode(&self, response: reqwest::Response) -> Result<QueryData> {
        let status = response.status();
        if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
            return Err(FinopsError::unavailable(
                UPSTREAM,
                format!("HTTP {}", status),
            ));
        }

        let body: ApiResponse = response.json().await?;
        if body.status != "success" {
            return Err(FinopsError::invalid_response(
                UPSTREAM,
                body.error.unwrap_or_else(|| format!("HTTP {}", status)),
            ));
        }

        body.data
            .ok_or_else(|| FinopsError::invalid_response(UPSTREAM, "missing data"))
    }

    /// Instant query aggregated `by (namespace)`
    async fn namespace_values(&self, query: &str) -> Result<HashMap<String, f64>> {
        let samples = self.instant_query(query).await?;
        Ok(samples
            .iter()
            .filter_map(|s| Some((s.metric.get("namespace")?.clone(), s.number()?)))
            .collect())
    }

    /// Price of one unit of `resource` per hour, falling back to configured rates
    pub async fn hourly_rate(&self, resource: ResourceType) -> f64 {
        let query = match resource {
            ResourceType::Cpu => "avg(node_cpu_hourly_cost)",
            ResourceType::Memory => "avg(node_ram_hourly_cost)",
        };

        match self.instant_query(query).await {
            Ok(samples) => samples
                .first()
                .and_then(PromSample::number)
                .filter(|v| *v > 0.0)
                .unwrap_or_else(|| self.fallback_rates.for_resource(resource)),
            Err(err) => {
                debug!(resource = %resource, error = %err, "Using fallback hourly rate");
                self.fallback_rates.for_resource(resource)
            }
        }
    }
}

fn normalize_base(base_url: &str) -> Result<Url> {
    let mut raw = base_url.trim().to_string();
    if !raw.ends_with('/') {
        raw.push('/');
    }
    Url::parse(&raw).map_err(|e| FinopsError::invalid_response(UPSTREAM, e))
}

/// PromQL for requested units per namespace, averaged over the window
pub(crate) fn requests_query(resource: ResourceType, window: Window) -> String {
    match resource {
        ResourceType::Cpu => format!(
            "sum(avg_over_time(kube_pod_container_resource_requests{{resource=\"cpu\"}}[{window}])) by (namespace)"
        ),
        ResourceType::Memory => format!(
            "sum(avg_over_time(kube_pod_container_resource_requests{{resource=\"memory\"}}[{window}])) by (namespace) / {BYTES_PER_GIB}"
        ),
    }
}

/// PromQL for used units per namespace over the window
pub(crate) fn usage_query(resource: ResourceType, window: Window) -> String {
    match resource {
        ResourceType::Cpu => format!(
            "sum(rate(container_cpu_usage_seconds_total{{container!=\"\"}}[{window}])) by (namespace)"
        ),
        ResourceType::Memory => format!(
            "sum(avg_over_time(container_memory_working_set_bytes{{container!=\"\"}}[{window}])) by (namespace) / {BYTES_PER_GIB}"
        ),
    }
}

/// PromQL for limits per namespace
pub(crate) fn limits_query(resource: ResourceType) -> String {
    match resource {
        ResourceType::Cpu => {
            "sum(kube_pod_container_resource_limits{resource=\"cpu\"}) by (namespace)".to_string()
        }
        ResourceType::Memory => format!(
            "sum(kube_pod_container_resource_limits{{resource=\"memory\"}}) by (namespace) / {BYTES_PER_GIB}"
        ),
    }
}

/// PromQL for hourly namespace cost from OpenCost allocation and pricing series
pub(crate) fn hourly_cost_query(window: Window) -> String {
    format!(
        "(sum(avg_over_time(container_memory_allocation_bytes[{window}])) by (namespace) / {BYTES_PER_GIB} \
         * on() group_left() avg(node_ram_hourly_cost)) \
         + (sum(avg_over_time(container_cpu_allocation[{window}])) by (namespace) \
         * on() group_left() avg(node_cpu_hourly_cost))"
    )
}

#[async_trait]
impl UsageSource for PrometheusClient {
    fn name(&self) -> &str {
        UPSTREAM
    }

    async fn fetch_usage(
        &self,
        resource: ResourceType,
        window: Window,
    ) -> Result<Vec<ResourceSample>> {
        let requests_promql = requests_query(resource, window);
        let usage_promql = usage_query(resource, window);
        let limits_promql = limits_query(resource);
        let (requested, used, limits, rate) = tokio::join!(
            self.namespace_values(&requests_promql),
            self.namespace_values(&usage_promql),
            self.namespace_values(&limits_promql),
            self.hourly_rate(resource),
        );
        let (requested, used, limits) = (requested?, used?, limits?);

        let namespaces: BTreeSet<&String> = requested.keys().chain(used.keys()).collect();
        let mut samples = Vec::with_capacity(namespaces.len());

        for namespace in namespaces {
            let (Some(&req), Some(&use_)) = (requested.get(namespace), used.get(namespace)) else {
                let missing = FinopsError::UpstreamDataMissing {
                    upstream: UPSTREAM.to_string(),
                    what: format!("{} requests/usage in {}", resource, namespace),
                };
                debug!(error = %missing, "Dropping partial namespace contribution");
                continue;
            };

            samples.push(ResourceSample {
                namespace: namespace.clone(),
                resource_type: resource,
                requested: req,
                used: use_.max(0.0),
                limit: limits.get(namespace).copied().filter(|l| *l > 0.0),
                node_hourly_rate: rate,
                stale: false,
            });
        }

        Ok(samples)
    }
}

#[async_trait]
impl CostSource for PrometheusClient {
    fn name(&self) -> &str {
        UPSTREAM
    }

    async fn fetch_allocation_cost(&self, window: Window) -> Result<Vec<NamespaceCost>> {
        let hourly = self.namespace_values(&hourly_cost_query(window)).await?;
        let mut costs: Vec<NamespaceCost> = hourly
            .into_iter()
            .map(|(namespace, hourly_cost)| NamespaceCost {
                namespace,
                window_cost: hourly_cost * window.hours(),
                hourly_cost,
                stale: false,
            })
            .collect();
        costs.sort_by(|a, b| a.namespace.cmp(&b.namespace));
        Ok(costs)
    }
}

#[async_trait]
impl CostHistorySource for PrometheusClient {
    fn name(&self) -> &str {
        UPSTREAM
    }

    async fn fetch_daily_costs(&self, days: u32) -> Result<HashMap<String, Vec<f64>>> {
        let one_day = Window::parse("1d")?;
        let query = format!("({}) * 24", hourly_cost_query(one_day));
        let end = Utc::now();
        let start = end - chrono::Duration::days(i64::from(days));

        let series = self
            .range_query(&query, start, end, one_day.duration())
            .await?;

        Ok(series
            .iter()
            .filter_map(|s| Some((s.metric.get("namespace")?.clone(), s.numbers())))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;

    fn client(url: &str) -> PrometheusClient {
        PrometheusClient::new(url, Duration::from_secs(2), HourlyRates::default()).unwrap()
    }

    fn vector_body(values: &[(&str, f64)]) -> String {
        let result: Vec<serde_json::Value> = values
            .iter()
            .map(|(ns, v)| {
                serde_json::json!({
                    "metric": {"namespace": ns},
                    "value": [1_700_000_000.0, v.to_string()]
                })
            })
            .collect();
        serde_json::json!({
            "status": "success",
            "data": {"resultType": "vector", "result": result}
        })
        .to_string()
    }

    #[test]
    fn test_queries_embed_window() {
        let window = Window::parse("1h").unwrap();
        assert!(usage_query(ResourceType::Cpu, window).contains("[1h]"));
        assert!(requests_query(ResourceType::Memory, window).ends_with("/ 1073741824"));
        assert!(hourly_cost_query(window).contains("node_cpu_hourly_cost"));
    }

    #[test]
    fn test_base_url_gets_trailing_slash() {
        let c = client("http://prometheus:9090/prom");
        assert_eq!(
            c.endpoint("api/v1/query").unwrap().as_str(),
            "http://prometheus:9090/prom/api/v1/query"
        );
    }

    #[tokio::test]
    async fn test_instant_query_parses_vector() {
        let mut server = mockito::Server::new_async().await;
        let _m = server
            .mock("GET", "/api/v1/query")
            .match_query(Matcher::UrlEncoded("query".into(), "up".into()))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(vector_body(&[("team-a", 1.5), ("team-b", 2.0)]))
            .create_async()
            .await;

        let samples = client(&server.url()).instant_query("up").await.unwrap();
        assert_eq!(samples.len(), 2);
        assert_eq!(samples[0].metric["namespace"], "team-a");
        assert_eq!(samples[0].number(), Some(1.5));
    }

    #[tokio::test]
    async fn test_server_error_is_retryable() {
        let mut server = mockito::Server::new_async().await;
        let _m = server
            .mock("GET", "/api/v1/query")
            .match_query(Matcher::Any)
            .with_status(503)
            .create_async()
            .await;

        let err = client(&server.url()).instant_query("up").await.unwrap_err();
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_query_error_is_not_retryable() {
        let mut server = mockito::Server::new_async().await;
        let _m = server
            .mock("GET", "/api/v1/query")
            .match_query(Matcher::Any)
            .with_status(400)
            .with_body(r#"{"status":"error","errorType":"bad_data","error":"parse error"}"#)
            .create_async()
            .await;

        let err = client(&server.url()).instant_query("sum(").await.unwrap_err();
        assert!(!err.is_retryable());
        assert!(err.to_string().contains("parse error"));
    }

    #[tokio::test]
    async fn test_range_query_parses_matrix() {
        let mut server = mockito::Server::new_async().await;
        let body = serde_json::json!({
            "status": "success",
            "data": {
                "resultType": "matrix",
                "result": [{
                    "metric": {"namespace": "team-a"},
                    "values": [[1.0, "10"], [2.0, "12"], [3.0, "NaN"]]
                }]
            }
        });
        let _m = server
            .mock("GET", "/api/v1/query_range")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body(body.to_string())
            .create_async()
            .await;

        let end = Utc::now();
        let series = client(&server.url())
            .range_query("x", end - chrono::Duration::days(3), end, Duration::from_secs(86_400))
            .await
            .unwrap();
        assert_eq!(series[0].numbers(), vec![10.0, 12.0]);
    }

    #[tokio::test]
    async fn test_fetch_usage_joins_requests_and_usage() {
        let mut server = mockito::Server::new_async().await;
        let window = Window::parse("1h").unwrap();

        let _req = server
            .mock("GET", "/api/v1/query")
            .match_query(Matcher::UrlEncoded(
                "query".into(),
                requests_query(ResourceType::Cpu, window),
            ))
            .with_body(vector_body(&[("team-a", 10.0), ("team-b", 4.0)]))
            .create_async()
            .await;
        let _used = server
            .mock("GET", "/api/v1/query")
            .match_query(Matcher::UrlEncoded(
                "query".into(),
                usage_query(ResourceType::Cpu, window),
            ))
            .with_body(vector_body(&[("team-a", 2.0)]))
            .create_async()
            .await;
        let _limits = server
            .mock("GET", "/api/v1/query")
            .match_query(Matcher::UrlEncoded(
                "query".into(),
                limits_query(ResourceType::Cpu),
            ))
            .with_body(vector_body(&[("team-a", 20.0)]))
            .create_async()
            .await;
        let _rate = server
            .mock("GET", "/api/v1/query")
            .match_query(Matcher::UrlEncoded(
                "query".into(),
                "avg(node_cpu_hourly_cost)".into(),
            ))
            .with_body(vector_body(&[]))
            .create_async()
            .await;

        let samples = client(&server.url())
            .fetch_usage(ResourceType::Cpu, window)
            .await
            .unwrap();

        // team-b has no usage series and is dropped
        assert_eq!(samples.len(), 1);
        let sample = &samples[0];
        assert_eq!(sample.namespace, "team-a");
        assert_eq!(sample.requested, 10.0);
        assert_eq!(sample.used, 2.0);
        assert_eq!(sample.limit, Some(20.0));
        assert_eq!(sample.node_hourly_rate, 0.04);
        assert!(!sample.stale);
    }
}
