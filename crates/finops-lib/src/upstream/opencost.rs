//! OpenCost allocation API client

use super::{CostSource, Window};
use crate::error::{FinopsError, Result};
use crate::models::NamespaceCost;
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;
use url::Url;

const UPSTREAM: &str = crate::health::components::OPENCOST;

/// Synthetic allocation buckets that do not correspond to a namespace
const SYNTHETIC_ALLOCATIONS: &[&str] = &["__idle__", "__unallocated__", "__unmounted__"];

#[derive(Debug, Deserialize)]
struct AllocationResponse {
    code: u16,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    data: Option<Vec<Option<HashMap<String, Allocation>>>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Allocation {
    #[serde(default)]
    total_cost: f64,
}

/// Client for `GET /allocation/compute` aggregated by namespace
pub struct OpenCostClient {
    client: Client,
    base_url: Url,
}

impl OpenCostClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| FinopsError::unavailable(UPSTREAM, e))?;

        let mut raw = base_url.trim().to_string();
        if !raw.ends_with('/') {
            raw.push('/');
        }
        let base_url = Url::parse(&raw).map_err(|e| FinopsError::invalid_response(UPSTREAM, e))?;

        Ok(Self { client, base_url })
    }
}

#[async_trait]
impl CostSource for OpenCostClient {
    fn name(&self) -> &str {
        UPSTREAM
    }

    async fn fetch_allocation_cost(&self, window: Window) -> Result<Vec<NamespaceCost>> {
        let url = self
            .base_url
            .join("allocation/compute")
            .map_err(|e| FinopsError::invalid_response(UPSTREAM, e))?;
        let window_param = window.to_string();

        let response = self
            .client
            .get(url)
            .query(&[
                ("window", window_param.as_str()),
                ("aggregate", "namespace"),
                ("accumulate", "true"),
            ])
            .send()
            .await?;

        let status = response.status();
        if status.is_server_error() {
            return Err(FinopsError::unavailable(UPSTREAM, format!("HTTP {}", status)));
        }

        let body: AllocationResponse = response.json().await?;
        if body.code != 200 {
            return Err(FinopsError::invalid_response(
                UPSTREAM,
                body.message.unwrap_or_else(|| format!("code {}", body.code)),
            ));
        }

        // accumulate=true yields a single set, but sum defensively across sets
        let mut totals: BTreeMap<String, f64> = BTreeMap::new();
        for set in body.data.unwrap_or_default().into_iter().flatten() {
            for (namespace, allocation) in set {
                if SYNTHETIC_ALLOCATIONS.contains(&namespace.as_str()) {
                    continue;
                }
                *totals.entry(namespace).or_default() += allocation.total_cost;
            }
        }

        let hours = window.hours();
        Ok(totals
            .into_iter()
            .map(|(namespace, window_cost)| NamespaceCost {
                namespace,
                window_cost,
                hourly_cost: window_cost / hours,
                stale: false,
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;

    #[tokio::test]
    async fn test_allocation_costs_by_namespace() {
        let mut server = mockito::Server::new_async().await;
        let body = serde_json::json!({
            "code": 200,
            "data": [{
                "team-a": {"name": "team-a", "totalCost": 4.0},
                "team-b": {"name": "team-b", "totalCost": 1.0},
                "__idle__": {"name": "__idle__", "totalCost": 9.0}
            }]
        });
        let _m = server
            .mock("GET", "/allocation/compute")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("window".into(), "2h".into()),
                Matcher::UrlEncoded("aggregate".into(), "namespace".into()),
            ]))
            .with_status(200)
            .with_body(body.to_string())
            .create_async()
            .await;

        let client = OpenCostClient::new(&server.url(), Duration::from_secs(2)).unwrap();
        let costs = client
            .fetch_allocation_cost(Window::parse("2h").unwrap())
            .await
            .unwrap();

        assert_eq!(costs.len(), 2);
        assert_eq!(costs[0].namespace, "team-a");
        assert_eq!(costs[0].window_cost, 4.0);
        assert_eq!(costs[0].hourly_cost, 2.0);
    }

    #[tokio::test]
    async fn test_unreachable_opencost_is_retryable() {
        let mut server = mockito::Server::new_async().await;
        let _m = server
            .mock("GET", "/allocation/compute")
            .match_query(Matcher::Any)
            .with_status(502)
            .create_async()
            .await;

        let client = OpenCostClient::new(&server.url(), Duration::from_secs(2)).unwrap();
        let err = client
            .fetch_allocation_cost(Window::parse("1h").unwrap())
            .await
            .unwrap_err();
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_null_allocation_sets_are_ignored() {
        let mut server = mockito::Server::new_async().await;
        let _m = server
            .mock("GET", "/allocation/compute")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body(r#"{"code":200,"data":[null]}"#)
            .create_async()
            .await;

        let client = OpenCostClient::new(&server.url(), Duration::from_secs(2)).unwrap();
        let costs = client
            .fetch_allocation_cost(Window::parse("1h").unwrap())
            .await
            .unwrap();
        assert!(costs.is_empty());
    }
}
