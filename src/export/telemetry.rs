//! Exporter self-metrics.
//!
//! All metrics use the "exporter" namespace. Error counters are labelled by
//! job/region/account so a single misbehaving branch is visible without
//! log digging.

use anyhow::Result;
use prometheus::{Counter, CounterVec, Gauge, Histogram, HistogramOpts, Opts, Registry};

pub struct Telemetry {
    registry: Registry,

    /// Discovery (tagging API) failures.
    pub discovery_errors: CounterVec,
    /// ListMetrics failures during dimension resolution.
    pub list_metrics_errors: CounterVec,
    /// GetMetricData failures, including exhausted throttle retries.
    pub fetch_errors: CounterVec,
    /// Throttle responses observed before degradation.
    pub throttled: CounterVec,
    /// Whole-scrape failures by kind (e.g. timeout).
    pub scrape_errors: CounterVec,
    /// Discovered resources dropped for lacking an ARN.
    pub resources_missing_arn: CounterVec,
    /// (resource, metric) pairs skipped with no resolvable dimensions.
    pub resources_without_dimensions: CounterVec,
    /// Samples dropped by the renderer for invalid names or labels.
    pub render_dropped: Counter,
    /// End-to-end scrape duration.
    pub scrape_duration: Histogram,
    /// Unix time of the last completed scrape (success or failure).
    pub last_scrape_timestamp: Gauge,
}

const BRANCH_LABELS: &[&str] = &["job_name", "region", "account_id"];

impl Telemetry {
    pub fn new() -> Result<Self> {
        let registry = Registry::new();

        let discovery_errors = CounterVec::new(
            Opts::new("discovery_errors_total", "Total resource discovery failures.")
                .namespace("exporter"),
            BRANCH_LABELS,
        )?;
        let list_metrics_errors = CounterVec::new(
            Opts::new("list_metrics_errors_total", "Total ListMetrics failures.")
                .namespace("exporter"),
            BRANCH_LABELS,
        )?;
        let fetch_errors = CounterVec::new(
            Opts::new("fetch_errors_total", "Total metric data fetch failures.")
                .namespace("exporter"),
            BRANCH_LABELS,
        )?;
        let throttled = CounterVec::new(
            Opts::new("throttled_total", "Total throttled upstream responses.")
                .namespace("exporter"),
            BRANCH_LABELS,
        )?;
        let scrape_errors = CounterVec::new(
            Opts::new("scrape_errors_total", "Total scrape failures by kind.")
                .namespace("exporter"),
            &["kind"],
        )?;
        let resources_missing_arn = CounterVec::new(
            Opts::new(
                "resources_missing_arn_total",
                "Total discovered resources dropped for lacking an ARN.",
            )
            .namespace("exporter"),
            BRANCH_LABELS,
        )?;
        let resources_without_dimensions = CounterVec::new(
            Opts::new(
                "resources_without_dimensions_total",
                "Total resource/metric pairs skipped with no resolvable dimensions.",
            )
            .namespace("exporter"),
            BRANCH_LABELS,
        )?;
        let render_dropped = Counter::with_opts(
            Opts::new(
                "render_dropped_total",
                "Total samples dropped by the renderer for invalid names or labels.",
            )
            .namespace("exporter"),
        )?;
        let scrape_duration = Histogram::with_opts(
            HistogramOpts::new("scrape_duration_seconds", "End-to-end scrape duration.")
                .namespace("exporter")
                .buckets(vec![0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0]),
        )?;
        let last_scrape_timestamp = Gauge::with_opts(
            Opts::new(
                "last_scrape_timestamp_seconds",
                "Unix time of the last completed scrape.",
            )
            .namespace("exporter"),
        )?;

        registry.register(Box::new(discovery_errors.clone()))?;
        registry.register(Box::new(list_metrics_errors.clone()))?;
        registry.register(Box::new(fetch_errors.clone()))?;
        registry.register(Box::new(throttled.clone()))?;
        registry.register(Box::new(scrape_errors.clone()))?;
        registry.register(Box::new(resources_missing_arn.clone()))?;
        registry.register(Box::new(resources_without_dimensions.clone()))?;
        registry.register(Box::new(render_dropped.clone()))?;
        registry.register(Box::new(scrape_duration.clone()))?;
        registry.register(Box::new(last_scrape_timestamp.clone()))?;

        Ok(Self {
            registry,
            discovery_errors,
            list_metrics_errors,
            fetch_errors,
            throttled,
            scrape_errors,
            resources_missing_arn,
            resources_without_dimensions,
            render_dropped,
            scrape_duration,
            last_scrape_timestamp,
        })
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }
}
