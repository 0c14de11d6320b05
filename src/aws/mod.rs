//! Upstream API contracts.
//!
//! The pipeline only sees the [`TagApi`] and [`CloudwatchApi`] traits; SDK
//! transports live in [`client`] and test stubs implement the same traits.

pub mod client;
pub mod limit;
pub mod retry;

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::model::{Datapoint, Dimension, TaggedResource};

/// Upstream API families; the rate limiter keys buckets on these.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Api {
    GetResources,
    ListMetrics,
    GetMetricData,
}

impl Api {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::GetResources => "get_resources",
            Self::ListMetrics => "list_metrics",
            Self::GetMetricData => "get_metric_data",
        }
    }
}

/// Errors surfaced by upstream API calls.
#[derive(Error, Debug)]
pub enum ApiError {
    /// The service asked us to slow down; retried with backoff before it
    /// degrades to a fetch failure.
    #[error("throttled: {message}")]
    Throttled { message: String },

    /// Non-retryable upstream failure.
    #[error("upstream call failed: {message}")]
    Upstream { message: String },

    /// The per-call deadline elapsed.
    #[error("call timed out after {elapsed_ms} ms")]
    Timeout { elapsed_ms: u64 },
}

impl ApiError {
    pub fn is_throttle(&self) -> bool {
        matches!(self, Self::Throttled { .. })
    }

    pub fn upstream(err: impl std::fmt::Display) -> Self {
        Self::Upstream {
            message: err.to_string(),
        }
    }
}

/// Aligned time window for one metric-data batch request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

/// One query within a metric-data batch request.
#[derive(Debug, Clone)]
pub struct BatchQuery {
    /// Correlation id, unique within the request (`id_<n>`).
    pub id: String,
    pub namespace: String,
    pub metric_name: String,
    pub dimensions: Vec<Dimension>,
    pub statistic: String,
    pub period: u64,
}

/// Data points returned for one batch entry, correlated by id.
#[derive(Debug, Clone)]
pub struct BatchResult {
    pub id: String,
    pub points: Vec<Datapoint>,
}

/// A metric returned by ListMetrics: name plus one existing dimension set.
#[derive(Debug, Clone)]
pub struct ListedMetric {
    pub metric_name: String,
    pub dimensions: Vec<Dimension>,
}

/// Resource-tagging API: enumerate tagged resources for a namespace.
pub trait TagApi: Send + Sync {
    /// Returns every tagged resource of the namespace visible in the
    /// client's account/region, with `namespace` and `region` filled in.
    fn get_resources(
        &self,
        namespace: &str,
    ) -> impl std::future::Future<Output = Result<Vec<TaggedResource>, ApiError>> + Send;
}

/// Metrics API: dimension listing and batched data retrieval.
pub trait CloudwatchApi: Send + Sync {
    /// Lists the dimension sets that exist for a metric.
    fn list_metrics(
        &self,
        namespace: &str,
        metric_name: &str,
    ) -> impl std::future::Future<Output = Result<Vec<ListedMetric>, ApiError>> + Send;

    /// Executes one batch of queries over the window. Results arrive
    /// keyed by query id; entries with no data may be absent or empty.
    fn batch_get_data(
        &self,
        queries: &[BatchQuery],
        window: TimeWindow,
    ) -> impl std::future::Future<Output = Result<Vec<BatchResult>, ApiError>> + Send;
}
