//! Data fetching: execute planned batches concurrently and join the
//! returned points back onto their originating resources.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::debug;

use crate::aws::limit::RateLimits;
use crate::aws::retry::{with_backoff, RetryPolicy};
use crate::aws::{Api, ApiError, CloudwatchApi};
use crate::model::{sort_by_timestamp, CloudwatchData};

use super::planner::QueryBatch;

/// Hard cap on a single batch request.
const MAX_BATCH_TIMEOUT: Duration = Duration::from_secs(30);

/// Headroom kept between a batch deadline and the scrape deadline so the
/// snapshot can still be assembled.
const DEADLINE_SAFETY_MARGIN: Duration = Duration::from_secs(2);

/// Shared limits for the fetch stage.
#[derive(Clone)]
pub struct FetchLimits {
    pub concurrency: Arc<Semaphore>,
    pub rate: Arc<RateLimits>,
    pub retry: RetryPolicy,
    /// Wall-clock deadline of the enclosing scrape.
    pub deadline: Instant,
}

impl FetchLimits {
    fn batch_timeout(&self) -> Option<Duration> {
        let remaining = self
            .deadline
            .checked_duration_since(Instant::now())?
            .checked_sub(DEADLINE_SAFETY_MARGIN)?;
        Some(remaining.min(MAX_BATCH_TIMEOUT))
    }
}

/// Executes every batch concurrently (bounded by `cloudwatch-concurrency`)
/// and expands results per origin. Data points are sorted newest-first and
/// the freshest one is selected for each query.
pub async fn fetch_data<C>(
    api: Arc<C>,
    batches: Vec<QueryBatch>,
    account_id: &str,
    region: &str,
    limits: &FetchLimits,
) -> Result<Vec<CloudwatchData>, ApiError>
where
    C: CloudwatchApi + 'static,
{
    let mut tasks = JoinSet::new();

    for batch in batches {
        let api = Arc::clone(&api);
        let limits = limits.clone();
        let account_id = account_id.to_string();
        let region = region.to_string();

        tasks.spawn(async move {
            let _permit = limits
                .concurrency
                .clone()
                .acquire_owned()
                .await
                .map_err(|e| ApiError::upstream(format!("semaphore closed: {e}")))?;

            limits
                .rate
                .acquire(&account_id, &region, Api::GetMetricData)
                .await;

            let Some(timeout) = limits.batch_timeout() else {
                return Err(ApiError::Timeout { elapsed_ms: 0 });
            };

            let window = batch.window(Utc::now());
            let queries: Vec<_> = batch.queries.iter().map(|q| q.to_batch_query()).collect();

            let started = Instant::now();
            let results = match tokio::time::timeout(
                timeout,
                with_backoff(limits.retry, || api.batch_get_data(&queries, window)),
            )
            .await
            {
                Ok(result) => result?,
                Err(_) => {
                    return Err(ApiError::Timeout {
                        elapsed_ms: started.elapsed().as_millis() as u64,
                    })
                }
            };

            debug!(
                queries = queries.len(),
                results = results.len(),
                elapsed_ms = started.elapsed().as_millis() as u64,
                "metric data batch fetched",
            );

            let mut data = Vec::new();
            for planned in &batch.queries {
                let point = results
                    .iter()
                    .find(|r| r.id == planned.id)
                    .map(|r| sort_by_timestamp(r.points.clone()))
                    .and_then(|points| points.first().copied());

                for origin in &planned.origins {
                    data.push(CloudwatchData {
                        metric_name: planned.metric_name.clone(),
                        namespace: planned.namespace.clone(),
                        statistic: planned.statistic.clone(),
                        dimensions: planned.dimensions.clone(),
                        resource_name: origin.resource_name.clone(),
                        tags: origin.tags.clone(),
                        nil_to_zero: origin.nil_to_zero,
                        add_cloudwatch_timestamp: origin.add_cloudwatch_timestamp,
                        data_point: point.map(|p| p.value),
                        timestamp: point.map(|p| p.timestamp),
                    });
                }
            }

            Ok(data)
        });
    }

    let mut all = Vec::new();
    let mut first_error: Option<ApiError> = None;

    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok(Ok(data)) => all.extend(data),
            Ok(Err(err)) => {
                // Drain remaining tasks; the branch fails as a unit.
                if first_error.is_none() {
                    first_error = Some(err);
                }
            }
            Err(e) => {
                if first_error.is_none() {
                    first_error = Some(ApiError::upstream(format!("fetch task join: {e}")));
                }
            }
        }
    }

    match first_error {
        Some(err) => Err(err),
        None => Ok(all),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use chrono::TimeZone;

    use super::*;
    use crate::aws::{BatchQuery, BatchResult, ListedMetric, TimeWindow};
    use crate::model::{Datapoint, Dimension};
    use crate::scrape::planner::{PlannedQuery, QueryOrigin};

    struct StubCloudwatch {
        results: Vec<BatchResult>,
        throttle_first: AtomicUsize,
        fail: bool,
    }

    impl CloudwatchApi for StubCloudwatch {
        async fn list_metrics(
            &self,
            _namespace: &str,
            _metric_name: &str,
        ) -> Result<Vec<ListedMetric>, ApiError> {
            Ok(Vec::new())
        }

        async fn batch_get_data(
            &self,
            _queries: &[BatchQuery],
            _window: TimeWindow,
        ) -> Result<Vec<BatchResult>, ApiError> {
            if self.fail {
                return Err(ApiError::upstream("access denied"));
            }
            if self
                .throttle_first
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
                    if n > 0 {
                        Some(n - 1)
                    } else {
                        None
                    }
                })
                .is_ok()
            {
                return Err(ApiError::Throttled {
                    message: "Rate exceeded".to_string(),
                });
            }
            Ok(self.results.clone())
        }
    }

    fn limits() -> FetchLimits {
        FetchLimits {
            concurrency: Arc::new(Semaphore::new(5)),
            rate: Arc::new(RateLimits::new(1000.0)),
            retry: RetryPolicy {
                max_attempts: 3,
                base_delay: Duration::from_millis(1),
                cap_delay: Duration::from_millis(2),
            },
            deadline: Instant::now() + Duration::from_secs(60),
        }
    }

    fn batch(origins: Vec<QueryOrigin>) -> QueryBatch {
        QueryBatch {
            period: 300,
            length: 600,
            delay: 0,
            queries: vec![PlannedQuery {
                id: "id_0".to_string(),
                namespace: "AWS/ElastiCache".to_string(),
                metric_name: "CPUUtilization".to_string(),
                dimensions: vec![Dimension::new("CacheClusterId", "redis-cluster")],
                statistic: "Average".to_string(),
                period: 300,
                origins,
            }],
        }
    }

    fn origin(name: &str) -> QueryOrigin {
        QueryOrigin {
            resource_name: name.to_string(),
            tags: vec![],
            nil_to_zero: true,
            add_cloudwatch_timestamp: false,
        }
    }

    #[tokio::test]
    async fn test_selects_newest_point() {
        let ts = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let api = Arc::new(StubCloudwatch {
            results: vec![BatchResult {
                id: "id_0".to_string(),
                points: vec![
                    Datapoint {
                        timestamp: ts - chrono::Duration::minutes(2),
                        value: 2.0,
                    },
                    Datapoint {
                        timestamp: ts - chrono::Duration::minutes(1),
                        value: 1.0,
                    },
                    Datapoint {
                        timestamp: ts - chrono::Duration::minutes(3),
                        value: 3.0,
                    },
                ],
            }],
            throttle_first: AtomicUsize::new(0),
            fail: false,
        });

        let data = fetch_data(
            api,
            vec![batch(vec![origin("arn:a")])],
            "123",
            "us-east-1",
            &limits(),
        )
        .await
        .expect("fetch");

        assert_eq!(data.len(), 1);
        assert_eq!(data[0].data_point, Some(1.0));
        assert_eq!(data[0].timestamp, Some(ts - chrono::Duration::minutes(1)));
    }

    #[tokio::test]
    async fn test_missing_result_yields_empty_point() {
        let api = Arc::new(StubCloudwatch {
            results: vec![],
            throttle_first: AtomicUsize::new(0),
            fail: false,
        });

        let data = fetch_data(
            api,
            vec![batch(vec![origin("arn:a")])],
            "123",
            "us-east-1",
            &limits(),
        )
        .await
        .expect("fetch");

        assert_eq!(data.len(), 1);
        assert_eq!(data[0].data_point, None);
        assert_eq!(data[0].timestamp, None);
        assert!(data[0].nil_to_zero);
    }

    #[tokio::test]
    async fn test_origins_expand_to_multiple_records() {
        let api = Arc::new(StubCloudwatch {
            results: vec![],
            throttle_first: AtomicUsize::new(0),
            fail: false,
        });

        let data = fetch_data(
            api,
            vec![batch(vec![origin("arn:a"), origin("arn:b")])],
            "123",
            "us-east-1",
            &limits(),
        )
        .await
        .expect("fetch");

        assert_eq!(data.len(), 2);
        let names: Vec<&str> = data.iter().map(|d| d.resource_name.as_str()).collect();
        assert!(names.contains(&"arn:a"));
        assert!(names.contains(&"arn:b"));
    }

    #[tokio::test]
    async fn test_throttle_is_retried() {
        let api = Arc::new(StubCloudwatch {
            results: vec![],
            throttle_first: AtomicUsize::new(1),
            fail: false,
        });

        let data = fetch_data(
            api,
            vec![batch(vec![origin("arn:a")])],
            "123",
            "us-east-1",
            &limits(),
        )
        .await
        .expect("fetch succeeds after retry");

        assert_eq!(data.len(), 1);
    }

    #[tokio::test]
    async fn test_upstream_failure_fails_branch() {
        let api = Arc::new(StubCloudwatch {
            results: vec![],
            throttle_first: AtomicUsize::new(0),
            fail: true,
        });

        let err = fetch_data(
            api,
            vec![batch(vec![origin("arn:a")])],
            "123",
            "us-east-1",
            &limits(),
        )
        .await
        .unwrap_err();

        assert!(!err.is_throttle());
    }

    #[tokio::test]
    async fn test_expired_deadline_times_out() {
        let api = Arc::new(StubCloudwatch {
            results: vec![],
            throttle_first: AtomicUsize::new(0),
            fail: false,
        });

        let mut l = limits();
        l.deadline = Instant::now();

        let err = fetch_data(
            api,
            vec![batch(vec![origin("arn:a")])],
            "123",
            "us-east-1",
            &l,
        )
        .await
        .unwrap_err();

        assert!(matches!(err, ApiError::Timeout { .. }));
    }
}
