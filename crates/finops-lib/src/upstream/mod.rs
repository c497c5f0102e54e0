//! Upstream clients for Prometheus, OpenCost and the cluster inventory
//!
//! Each upstream sits behind a small trait so the refresh cycle can be driven
//! by mock sources in tests. Calls are wrapped in [`with_retry`], which applies
//! bounded exponential backoff to retryable failures only.

mod inventory;
mod opencost;
mod prometheus;

pub use inventory::{parse_quantity_gib, InventoryPricing, KubeInventory};
pub use opencost::OpenCostClient;
pub use prometheus::{HourlyRates, PrometheusClient, PromSample, PromSeries};

use crate::error::{FinopsError, Result};
use crate::models::{IdleResource, NamespaceCost, ResourceSample, ResourceType};
use async_trait::async_trait;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::time::Duration;
use tracing::debug;

/// Shortest window the alerting rules evaluate over
const MIN_WINDOW: Duration = Duration::from_secs(5 * 60);

/// Longest window the alerting rules evaluate over
const MAX_WINDOW: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// Bounded query window (5m to 7d)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Window(Duration);

impl Window {
    pub const ONE_HOUR: Window = Window(Duration::from_secs(3600));

    pub fn new(duration: Duration) -> Result<Self> {
        if duration < MIN_WINDOW || duration > MAX_WINDOW {
            return Err(FinopsError::InvalidWindow(format!("{}s", duration.as_secs())));
        }
        Ok(Self(duration))
    }

    /// Parse a duration literal such as `5m`, `1h` or `7d`
    pub fn parse(value: &str) -> Result<Self> {
        let value = value.trim();
        let invalid = || FinopsError::InvalidWindow(value.to_string());

        let split = value
            .find(|c: char| !c.is_ascii_digit())
            .ok_or_else(invalid)?;
        let (amount, unit) = value.split_at(split);
        let amount: u64 = amount.parse().map_err(|_| invalid())?;
        let secs = match unit {
            "m" => amount * 60,
            "h" => amount * 3600,
            "d" => amount * 86_400,
            _ => return Err(invalid()),
        };

        Self::new(Duration::from_secs(secs)).map_err(|_| invalid())
    }

    pub fn duration(&self) -> Duration {
        self.0
    }

    pub fn hours(&self) -> f64 {
        self.0.as_secs_f64() / 3600.0
    }
}

impl fmt::Display for Window {
    /// PromQL / OpenCost duration literal
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let secs = self.0.as_secs();
        if secs % 86_400 == 0 {
            write!(f, "{}d", secs / 86_400)
        } else if secs % 3600 == 0 {
            write!(f, "{}h", secs / 3600)
        } else {
            write!(f, "{}m", secs / 60)
        }
    }
}

/// Source of per-namespace requested/used figures
#[async_trait]
pub trait UsageSource: Send + Sync {
    fn name(&self) -> &str;

    async fn fetch_usage(&self, resource: ResourceType, window: Window)
        -> Result<Vec<ResourceSample>>;
}

/// Source of per-namespace cost over a window
#[async_trait]
pub trait CostSource: Send + Sync {
    fn name(&self) -> &str;

    async fn fetch_allocation_cost(&self, window: Window) -> Result<Vec<NamespaceCost>>;
}

/// Source of daily cost history used for forecasting
#[async_trait]
pub trait CostHistorySource: Send + Sync {
    fn name(&self) -> &str;

    /// Daily costs per namespace, oldest first
    async fn fetch_daily_costs(&self, days: u32) -> Result<HashMap<String, Vec<f64>>>;
}

/// Cluster inventory queried for idle objects
#[async_trait]
pub trait InventorySource: Send + Sync {
    fn name(&self) -> &str;

    async fn fetch_idle_resources(&self) -> Result<Vec<IdleResource>>;
}

/// Backoff policy applied per upstream call
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    /// Longest a retried call can take when every attempt runs `per_call` and fails
    pub fn worst_case(&self, per_call: Duration) -> Duration {
        let attempts = self.max_attempts.max(1);
        let mut total = per_call * attempts;
        let mut backoff = self.initial_backoff;
        for _ in 1..attempts {
            total += backoff;
            backoff = (backoff * 2).min(self.max_backoff);
        }
        total
    }
}

/// Run `call` until it succeeds, fails with a non-retryable error, or the
/// attempt budget is exhausted
pub async fn with_retry<T, F, Fut>(policy: &RetryPolicy, operation: &str, mut call: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut backoff = policy.initial_backoff;
    let mut attempt = 1;

    loop {
        match call().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_retryable() && attempt < policy.max_attempts.max(1) => {
                debug!(
                    operation = %operation,
                    attempt = attempt,
                    backoff_ms = backoff.as_millis() as u64,
                    error = %err,
                    "Upstream call failed, retrying"
                );
                tokio::time::sleep(backoff).await;
                backoff = (backoff * 2).min(policy.max_backoff);
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(2),
        }
    }

    #[test]
    fn test_window_parse_and_display() {
        assert_eq!(Window::parse("5m").unwrap().to_string(), "5m");
        assert_eq!(Window::parse("1h").unwrap().to_string(), "1h");
        assert_eq!(Window::parse("24h").unwrap().to_string(), "1d");
        assert_eq!(Window::parse("90m").unwrap().to_string(), "90m");
        assert_eq!(Window::parse("7d").unwrap().hours(), 168.0);
    }

    #[test]
    fn test_window_bounds() {
        assert!(Window::parse("1m").is_err());
        assert!(Window::parse("8d").is_err());
        assert!(Window::parse("h").is_err());
        assert!(Window::parse("10x").is_err());
    }

    #[test]
    fn test_worst_case_adds_attempts_and_backoff() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.worst_case(Duration::from_secs(10)), Duration::from_millis(31_500));

        let single = RetryPolicy {
            max_attempts: 1,
            ..RetryPolicy::default()
        };
        assert_eq!(single.worst_case(Duration::from_secs(5)), Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_retry_succeeds_after_transient_failures() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let result = with_retry(&fast_policy(), "test", move || async move {
            let n = counter.fetch_add(1, Ordering::SeqCst);
            if n < 2 {
                Err(FinopsError::unavailable("prometheus", "timeout"))
            } else {
                Ok(n)
            }
        })
        .await;

        assert_eq!(result.unwrap(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retry_gives_up_after_budget() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let result: Result<()> = with_retry(&fast_policy(), "test", move || async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Err(FinopsError::unavailable("prometheus", "timeout"))
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retry_skips_non_retryable_errors() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let result: Result<()> = with_retry(&fast_policy(), "test", move || async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Err(FinopsError::invalid_response("prometheus", "not json"))
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
