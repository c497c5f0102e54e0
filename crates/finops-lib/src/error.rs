//! Error taxonomy for the insights engine
//!
//! Failures local to one namespace or resource never abort a refresh cycle;
//! only [`FinopsError::AllUpstreamsUnavailable`] skips a cycle entirely.

use std::time::Duration;
use thiserror::Error;

/// Result alias used across the library
pub type Result<T, E = FinopsError> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum FinopsError {
    /// Network failure or timeout talking to Prometheus, OpenCost or the cluster API
    #[error("upstream {upstream} unavailable: {message}")]
    UpstreamUnavailable { upstream: String, message: String },

    /// A series is absent for a namespace; that contribution is dropped
    #[error("upstream {upstream} returned no data for {what}")]
    UpstreamDataMissing { upstream: String, what: String },

    /// Division by zero and friends; the value is excluded from output
    #[error("computation undefined: {0}")]
    ComputationUndefined(String),

    /// No successful refresh within the staleness budget
    #[error("snapshot stale: last successful refresh {age_secs}s ago")]
    SnapshotStale { age_secs: i64 },

    /// Upstream answered but the payload could not be interpreted
    #[error("invalid response from {upstream}: {message}")]
    InvalidResponse { upstream: String, message: String },

    #[error("invalid query window `{0}` (expected 5m..7d, e.g. `1h`)")]
    InvalidWindow(String),

    #[error("refresh cycle exceeded deadline of {0:?}")]
    DeadlineExceeded(Duration),

    #[error("snapshot generation {offered} is not newer than current generation {current}")]
    OutOfOrderSnapshot { offered: u64, current: u64 },

    #[error("all upstream sources unavailable")]
    AllUpstreamsUnavailable,
}

impl FinopsError {
    pub fn unavailable(upstream: impl Into<String>, message: impl ToString) -> Self {
        Self::UpstreamUnavailable {
            upstream: upstream.into(),
            message: message.to_string(),
        }
    }

    pub fn invalid_response(upstream: impl Into<String>, message: impl ToString) -> Self {
        Self::InvalidResponse {
            upstream: upstream.into(),
            message: message.to_string(),
        }
    }

    /// Whether a bounded retry has a chance of succeeding
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::UpstreamUnavailable { .. })
    }
}

impl From<reqwest::Error> for FinopsError {
    fn from(err: reqwest::Error) -> Self {
        let upstream = err
            .url()
            .and_then(|u| u.host_str().map(str::to_string))
            .unwrap_or_else(|| "http".to_string());

        if err.is_decode() {
            Self::invalid_response(upstream, err)
        } else {
            Self::unavailable(upstream, err)
        }
    }
}

impl From<kube::Error> for FinopsError {
    fn from(err: kube::Error) -> Self {
        Self::unavailable("kubernetes", err)
    }
}
