use std::path::Path;

use anyhow::{bail, Context, Result};
use serde::Deserialize;

/// Maximum number of entries the metric-data batch API accepts per request.
pub const MAX_BATCH_SIZE: usize = 500;

/// Top-level configuration for the exporter.
#[derive(Debug, Deserialize)]
pub struct Config {
    /// Config schema version. Only "v1alpha1" is accepted.
    #[serde(default = "default_api_version", rename = "apiVersion")]
    pub api_version: String,

    /// Region used for STS calls when resolving account identities.
    #[serde(default, rename = "sts-region")]
    pub sts_region: String,

    /// Concurrent resource-tagging API calls. Default: 5.
    #[serde(default = "default_concurrency", rename = "tag-concurrency")]
    pub tag_concurrency: usize,

    /// Concurrent ListMetrics API calls. Default: 5.
    #[serde(default = "default_concurrency", rename = "list-metrics-concurrency")]
    pub list_metrics_concurrency: usize,

    /// Concurrent GetMetricData API calls. Default: 5.
    #[serde(default = "default_concurrency", rename = "cloudwatch-concurrency")]
    pub cloudwatch_concurrency: usize,

    /// Token-bucket refill rate per (account, region, api), in calls/sec.
    /// Default: 10.
    #[serde(default = "default_api_qps", rename = "api-qps")]
    pub api_qps: f64,

    /// Entries packed into one metric-data batch request. Default: 500.
    #[serde(default = "default_batch_size", rename = "metric-data-batch-size")]
    pub metric_data_batch_size: usize,

    /// Tag-discovery driven jobs.
    #[serde(default)]
    pub discovery: DiscoveryConfig,

    /// Fixed-dimension jobs that bypass discovery.
    #[serde(default, rename = "static")]
    pub static_jobs: Vec<StaticJobConfig>,
}

/// Discovery job list wrapper.
#[derive(Debug, Default, Deserialize)]
pub struct DiscoveryConfig {
    #[serde(default)]
    pub jobs: Vec<DiscoveryJobConfig>,
}

/// One tag-discovery driven scrape job.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscoveryJobConfig {
    /// CloudWatch namespace, e.g. "AWS/ElastiCache".
    #[serde(rename = "type")]
    pub namespace: String,

    /// Regions to scrape. At least one is required.
    #[serde(default)]
    pub regions: Vec<String>,

    /// Roles to assume per region. Empty means ambient credentials.
    #[serde(default)]
    pub roles: Vec<RoleConfig>,

    /// Tag filters ANDed together; values are regular expressions.
    #[serde(default)]
    pub search_tags: Vec<SearchTagConfig>,

    /// Extra labels stamped on every sample of this job.
    #[serde(default)]
    pub custom_tags: Vec<CustomTagConfig>,

    /// Dimension-value filters applied to ListMetrics results.
    #[serde(default)]
    pub dimensions_regex: Vec<DimensionFilterConfig>,

    /// Resource tags copied onto data samples (info metrics always carry
    /// the full tag set).
    #[serde(default)]
    pub exported_tags_on_metrics: Vec<String>,

    /// Metrics to collect.
    #[serde(default)]
    pub metrics: Vec<MetricDefaults>,

    // Job-level defaults inherited by metrics that leave them unset.
    #[serde(default)]
    pub statistics: Vec<String>,
    #[serde(default = "default_period")]
    pub period: u64,
    #[serde(default)]
    pub length: u64,
    #[serde(default)]
    pub delay: u64,
    #[serde(default)]
    pub nil_to_zero: bool,
    #[serde(default)]
    pub add_cloudwatch_timestamp: bool,

    /// Resolve dimensions through ListMetrics instead of ARN inference.
    #[serde(default)]
    pub list_metrics_for_dimensions: bool,

    /// Emit `aws_<ns>_info` samples for discovered resources.
    #[serde(default = "default_true")]
    pub emit_info_metrics: bool,

    /// Stamp context labels (account, region, custom tags) on info metrics.
    #[serde(default)]
    pub include_context_on_info_metrics: bool,
}

/// One fixed-dimension scrape job.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StaticJobConfig {
    /// Job name; becomes the `name` label of every sample.
    pub name: String,

    /// CloudWatch namespace.
    pub namespace: String,

    #[serde(default)]
    pub regions: Vec<String>,

    #[serde(default)]
    pub roles: Vec<RoleConfig>,

    /// Fixed dimension set queried as-is.
    #[serde(default)]
    pub dimensions: Vec<StaticDimensionConfig>,

    #[serde(default)]
    pub custom_tags: Vec<CustomTagConfig>,

    #[serde(default)]
    pub metrics: Vec<MetricDefaults>,

    #[serde(default)]
    pub statistics: Vec<String>,
    #[serde(default = "default_period")]
    pub period: u64,
    #[serde(default)]
    pub length: u64,
    #[serde(default)]
    pub delay: u64,
    #[serde(default)]
    pub nil_to_zero: bool,
    #[serde(default)]
    pub add_cloudwatch_timestamp: bool,
}

/// IAM role to assume for a scrape branch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoleConfig {
    #[serde(default)]
    pub role_arn: String,
    #[serde(default)]
    pub external_id: String,
}

/// Tag filter: key must exist, value must match the regex.
#[derive(Debug, Clone, Deserialize)]
pub struct SearchTagConfig {
    pub key: String,
    pub value: String,
}

/// Extra label key/value attached via the scrape context.
#[derive(Debug, Clone, Deserialize)]
pub struct CustomTagConfig {
    pub key: String,
    pub value: String,
}

/// Dimension-value filter for listed dimension resolution.
#[derive(Debug, Clone, Deserialize)]
pub struct DimensionFilterConfig {
    /// Dimension name the filter applies to.
    pub name: String,
    /// Regex the dimension value must match.
    pub value: String,
}

/// Fixed dimension on a static job.
#[derive(Debug, Clone, Deserialize)]
pub struct StaticDimensionConfig {
    pub name: String,
    pub value: String,
}

/// Per-metric settings; unset fields inherit the job-level defaults.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricDefaults {
    pub name: String,
    #[serde(default)]
    pub statistics: Vec<String>,
    #[serde(default)]
    pub period: Option<u64>,
    #[serde(default)]
    pub length: Option<u64>,
    #[serde(default)]
    pub delay: Option<u64>,
    #[serde(default)]
    pub nil_to_zero: Option<bool>,
    #[serde(default)]
    pub add_cloudwatch_timestamp: Option<bool>,
}

/// Fully-resolved per-metric settings after inheriting job defaults.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedMetric {
    pub name: String,
    pub statistics: Vec<String>,
    pub period: u64,
    pub length: u64,
    pub delay: u64,
    pub nil_to_zero: bool,
    pub add_cloudwatch_timestamp: bool,
}

// --- Default value functions ---

fn default_api_version() -> String {
    "v1alpha1".to_string()
}

fn default_concurrency() -> usize {
    5
}

fn default_api_qps() -> f64 {
    10.0
}

fn default_batch_size() -> usize {
    MAX_BATCH_SIZE
}

fn default_period() -> u64 {
    300
}

fn default_true() -> bool {
    true
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_version: default_api_version(),
            sts_region: String::new(),
            tag_concurrency: default_concurrency(),
            list_metrics_concurrency: default_concurrency(),
            cloudwatch_concurrency: default_concurrency(),
            api_qps: default_api_qps(),
            metric_data_batch_size: default_batch_size(),
            discovery: DiscoveryConfig::default(),
            static_jobs: Vec::new(),
        }
    }
}

// --- Resolution helpers ---

#[allow(clippy::too_many_arguments)]
fn resolve_metric(
    metric: &MetricDefaults,
    statistics: &[String],
    namespace: &str,
    period: u64,
    length: u64,
    delay: u64,
    nil_to_zero: bool,
    add_cloudwatch_timestamp: bool,
) -> ResolvedMetric {
    let statistics = if !metric.statistics.is_empty() {
        metric.statistics.clone()
    } else if !statistics.is_empty() {
        statistics.to_vec()
    } else {
        crate::registry::default_statistics(namespace)
            .iter()
            .map(|s| s.to_string())
            .collect()
    };

    let period = metric.period.unwrap_or(period);
    // A zero length means "one period worth of data".
    let length = match metric.length.unwrap_or(length) {
        0 => period,
        l => l,
    };

    ResolvedMetric {
        name: metric.name.clone(),
        statistics,
        period,
        length,
        delay: metric.delay.unwrap_or(delay),
        nil_to_zero: metric.nil_to_zero.unwrap_or(nil_to_zero),
        add_cloudwatch_timestamp: metric
            .add_cloudwatch_timestamp
            .unwrap_or(add_cloudwatch_timestamp),
    }
}

impl DiscoveryJobConfig {
    /// Metrics with job-level defaults folded in.
    pub fn resolved_metrics(&self) -> Vec<ResolvedMetric> {
        self.metrics
            .iter()
            .map(|m| {
                resolve_metric(
                    m,
                    &self.statistics,
                    &self.namespace,
                    self.period,
                    self.length,
                    self.delay,
                    self.nil_to_zero,
                    self.add_cloudwatch_timestamp,
                )
            })
            .collect()
    }

    /// Roles to iterate; an empty list means the ambient credentials.
    pub fn effective_roles(&self) -> Vec<RoleConfig> {
        if self.roles.is_empty() {
            vec![RoleConfig::default()]
        } else {
            self.roles.clone()
        }
    }
}

impl StaticJobConfig {
    pub fn resolved_metrics(&self) -> Vec<ResolvedMetric> {
        self.metrics
            .iter()
            .map(|m| {
                resolve_metric(
                    m,
                    &self.statistics,
                    &self.namespace,
                    self.period,
                    self.length,
                    self.delay,
                    self.nil_to_zero,
                    self.add_cloudwatch_timestamp,
                )
            })
            .collect()
    }

    pub fn effective_roles(&self) -> Vec<RoleConfig> {
        if self.roles.is_empty() {
            vec![RoleConfig::default()]
        } else {
            self.roles.clone()
        }
    }
}

// --- Validation and loading ---

impl Config {
    /// Load configuration from a YAML file.
    pub fn load(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;

        let cfg: Config = serde_yaml::from_str(&data)
            .with_context(|| format!("parsing config file {}", path.display()))?;

        cfg.validate()?;

        Ok(cfg)
    }

    /// Validate the configuration for required fields and consistency.
    pub fn validate(&self) -> Result<()> {
        if self.api_version != "v1alpha1" {
            bail!("unsupported apiVersion: {}", self.api_version);
        }

        if self.discovery.jobs.is_empty() && self.static_jobs.is_empty() {
            bail!("at least one discovery or static job is required");
        }

        if self.metric_data_batch_size == 0 || self.metric_data_batch_size > MAX_BATCH_SIZE {
            bail!(
                "metric-data-batch-size must be in 1..={MAX_BATCH_SIZE}, got {}",
                self.metric_data_batch_size,
            );
        }

        if self.tag_concurrency == 0
            || self.list_metrics_concurrency == 0
            || self.cloudwatch_concurrency == 0
        {
            bail!("concurrency limits must be positive");
        }

        if self.api_qps <= 0.0 {
            bail!("api-qps must be positive");
        }

        for (i, job) in self.discovery.jobs.iter().enumerate() {
            if job.namespace.is_empty() {
                bail!("discovery job {i}: type is required");
            }
            if job.regions.is_empty() {
                bail!("discovery job {i} ({}): regions is required", job.namespace);
            }
            if job.metrics.is_empty() {
                bail!("discovery job {i} ({}): metrics is required", job.namespace);
            }
            for tag in &job.search_tags {
                regex::Regex::new(&tag.value).with_context(|| {
                    format!(
                        "discovery job {i} ({}): invalid searchTags regex {:?}",
                        job.namespace, tag.value,
                    )
                })?;
            }
            for filter in &job.dimensions_regex {
                regex::Regex::new(&filter.value).with_context(|| {
                    format!(
                        "discovery job {i} ({}): invalid dimensionsRegex {:?}",
                        job.namespace, filter.value,
                    )
                })?;
            }
            validate_metrics(&job.resolved_metrics(), &job.namespace, i)?;
        }

        for (i, job) in self.static_jobs.iter().enumerate() {
            if job.name.is_empty() {
                bail!("static job {i}: name is required");
            }
            if job.namespace.is_empty() {
                bail!("static job {i} ({}): namespace is required", job.name);
            }
            if job.regions.is_empty() {
                bail!("static job {i} ({}): regions is required", job.name);
            }
            if job.metrics.is_empty() {
                bail!("static job {i} ({}): metrics is required", job.name);
            }
            validate_metrics(&job.resolved_metrics(), &job.name, i)?;
        }

        Ok(())
    }
}

fn validate_metrics(metrics: &[ResolvedMetric], job: &str, index: usize) -> Result<()> {
    for m in metrics {
        if m.name.is_empty() {
            bail!("job {index} ({job}): metric name is required");
        }
        if m.period == 0 {
            bail!("job {index} ({job}): metric {} period must be > 0", m.name);
        }
        if m.length < m.period {
            bail!(
                "job {index} ({job}): metric {} length {} is shorter than period {}",
                m.name,
                m.length,
                m.period,
            );
        }
        if m.statistics.is_empty() {
            bail!("job {index} ({job}): metric {} has no statistics", m.name);
        }
    }
    Ok(())
}
