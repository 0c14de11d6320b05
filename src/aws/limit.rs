//! Token-bucket rate limiting per (account, region, api).
//!
//! A saturated bucket suspends the caller until a token refills; it never
//! fails the call. Buckets are created lazily on first use and refill at
//! the configured QPS with a burst of one second's worth of tokens.

use std::time::{Duration, Instant};

use dashmap::DashMap;
use parking_lot::Mutex;

use super::Api;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct BucketKey {
    account_id: String,
    region: String,
    api: Api,
}

#[derive(Debug)]
struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

/// Shared rate limiter over all scrape branches.
pub struct RateLimits {
    qps: f64,
    burst: f64,
    buckets: DashMap<BucketKey, Mutex<Bucket>>,
}

impl RateLimits {
    pub fn new(qps: f64) -> Self {
        let qps = if qps > 0.0 { qps } else { 1.0 };
        Self {
            qps,
            burst: qps.max(1.0),
            buckets: DashMap::new(),
        }
    }

    /// Takes one token, sleeping until the bucket can supply it.
    pub async fn acquire(&self, account_id: &str, region: &str, api: Api) {
        let key = BucketKey {
            account_id: account_id.to_string(),
            region: region.to_string(),
            api,
        };

        loop {
            let wait = {
                let entry = self.buckets.entry(key.clone()).or_insert_with(|| {
                    Mutex::new(Bucket {
                        tokens: self.burst,
                        last_refill: Instant::now(),
                    })
                });
                let mut bucket = entry.lock();

                let now = Instant::now();
                let elapsed = now.duration_since(bucket.last_refill).as_secs_f64();
                bucket.tokens = (bucket.tokens + elapsed * self.qps).min(self.burst);
                bucket.last_refill = now;

                if bucket.tokens >= 1.0 {
                    bucket.tokens -= 1.0;
                    None
                } else {
                    Some(Duration::from_secs_f64((1.0 - bucket.tokens) / self.qps))
                }
            };

            match wait {
                None => return,
                Some(wait) => tokio::time::sleep(wait).await,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_burst_is_not_delayed() {
        let limits = RateLimits::new(100.0);
        let start = Instant::now();
        for _ in 0..10 {
            limits.acquire("123", "us-east-1", Api::GetMetricData).await;
        }
        assert!(start.elapsed() < Duration::from_millis(50));
    }

    #[tokio::test]
    async fn test_saturated_bucket_suspends() {
        let limits = RateLimits::new(50.0);
        // Drain the burst.
        for _ in 0..50 {
            limits.acquire("123", "us-east-1", Api::GetMetricData).await;
        }

        let start = Instant::now();
        limits.acquire("123", "us-east-1", Api::GetMetricData).await;
        // One token at 50 qps refills in ~20ms.
        assert!(start.elapsed() >= Duration::from_millis(10));
    }

    #[tokio::test]
    async fn test_buckets_are_independent_per_api() {
        let limits = RateLimits::new(1.0);
        limits.acquire("123", "us-east-1", Api::GetMetricData).await;

        // A different API family has its own untouched bucket.
        let start = Instant::now();
        limits.acquire("123", "us-east-1", Api::ListMetrics).await;
        assert!(start.elapsed() < Duration::from_millis(50));
    }
}
