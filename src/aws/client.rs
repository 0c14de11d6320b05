//! AWS SDK implementations of the upstream API traits.
//!
//! One client pair is built per (role, region) scrape branch. Pagination is
//! handled here; retry and rate limiting stay in the pipeline where the
//! policy values live.

use anyhow::{Context, Result};
use aws_config::sts::AssumeRoleProvider;
use aws_config::{BehaviorVersion, Region};
use aws_sdk_cloudwatch::error::{ProvideErrorMetadata, SdkError};
use aws_sdk_cloudwatch::primitives::DateTime as AwsDateTime;
use aws_sdk_cloudwatch::types::{Metric, MetricDataQuery, MetricStat};
use chrono::{DateTime, TimeZone, Utc};
use tracing::debug;

use crate::config::RoleConfig;
use crate::model::{Datapoint, Dimension, Tag, TaggedResource};
use crate::registry;

use super::{ApiError, BatchQuery, BatchResult, CloudwatchApi, ListedMetric, TagApi, TimeWindow};

/// Clients for one (role, region) scrape branch.
pub struct ScrapeClients {
    pub tagging: AwsTagClient,
    pub cloudwatch: AwsCloudwatchClient,
    pub account_id: String,
}

/// Builds per-branch SDK clients, assuming roles as configured.
pub struct ClientFactory {
    sts_region: String,
}

impl ClientFactory {
    pub fn new(sts_region: impl Into<String>) -> Self {
        Self {
            sts_region: sts_region.into(),
        }
    }

    /// Builds tagging + metrics clients for one branch and resolves the
    /// account id behind its credentials.
    pub async fn for_branch(&self, role: &RoleConfig, region: &str) -> Result<ScrapeClients> {
        let mut loader = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(region.to_string()));

        if !role.role_arn.is_empty() {
            let mut provider = AssumeRoleProvider::builder(role.role_arn.clone())
                .session_name("yace")
                .region(Region::new(region.to_string()));
            if !role.external_id.is_empty() {
                provider = provider.external_id(role.external_id.clone());
            }
            loader = loader.credentials_provider(provider.build().await);
        }

        let config = loader.load().await;

        let sts_config = if self.sts_region.is_empty() {
            config.clone()
        } else {
            config
                .to_builder()
                .region(Region::new(self.sts_region.clone()))
                .build()
        };

        let sts = aws_sdk_sts::Client::new(&sts_config);
        let identity = sts
            .get_caller_identity()
            .send()
            .await
            .context("resolving caller identity")?;
        let account_id = identity.account().unwrap_or_default().to_string();

        Ok(ScrapeClients {
            tagging: AwsTagClient {
                client: aws_sdk_resourcegroupstagging::Client::new(&config),
                region: region.to_string(),
            },
            cloudwatch: AwsCloudwatchClient {
                client: aws_sdk_cloudwatch::Client::new(&config),
            },
            account_id,
        })
    }
}

/// Resource-tagging API client for one region.
pub struct AwsTagClient {
    client: aws_sdk_resourcegroupstagging::Client,
    region: String,
}

impl TagApi for AwsTagClient {
    async fn get_resources(&self, namespace: &str) -> Result<Vec<TaggedResource>, ApiError> {
        let filters: Vec<String> = registry::resource_filters(namespace)
            .iter()
            .map(|f| f.to_string())
            .collect();

        let mut resources = Vec::new();
        let mut token: Option<String> = None;

        loop {
            let mut req = self
                .client
                .get_resources()
                .set_resource_type_filters(Some(filters.clone()));
            if let Some(t) = &token {
                req = req.pagination_token(t.clone());
            }

            let out = req.send().await.map_err(classify)?;

            for mapping in out.resource_tag_mapping_list() {
                let tags = mapping
                    .tags()
                    .iter()
                    .map(|t| Tag::new(t.key(), t.value()))
                    .collect();

                // Empty ARNs are dropped (and counted) by the discovery
                // stage; the transport reports what the API returned.
                resources.push(TaggedResource {
                    arn: mapping.resource_arn().unwrap_or_default().to_string(),
                    namespace: namespace.to_string(),
                    region: self.region.clone(),
                    tags,
                });
            }

            match out.pagination_token() {
                Some(t) if !t.is_empty() => token = Some(t.to_string()),
                _ => break,
            }
        }

        debug!(namespace, count = resources.len(), "discovered resources");

        Ok(resources)
    }
}

/// CloudWatch metrics API client.
pub struct AwsCloudwatchClient {
    client: aws_sdk_cloudwatch::Client,
}

impl CloudwatchApi for AwsCloudwatchClient {
    async fn list_metrics(
        &self,
        namespace: &str,
        metric_name: &str,
    ) -> Result<Vec<ListedMetric>, ApiError> {
        let mut listed = Vec::new();
        let mut token: Option<String> = None;

        loop {
            let mut req = self
                .client
                .list_metrics()
                .namespace(namespace)
                .metric_name(metric_name);
            if let Some(t) = &token {
                req = req.next_token(t.clone());
            }

            let out = req.send().await.map_err(classify)?;

            for metric in out.metrics() {
                let dimensions = metric
                    .dimensions()
                    .iter()
                    .map(|d| {
                        Dimension::new(
                            d.name().unwrap_or_default(),
                            d.value().unwrap_or_default(),
                        )
                    })
                    .collect();

                listed.push(ListedMetric {
                    metric_name: metric.metric_name().unwrap_or_default().to_string(),
                    dimensions,
                });
            }

            match out.next_token() {
                Some(t) if !t.is_empty() => token = Some(t.to_string()),
                _ => break,
            }
        }

        Ok(listed)
    }

    async fn batch_get_data(
        &self,
        queries: &[BatchQuery],
        window: TimeWindow,
    ) -> Result<Vec<BatchResult>, ApiError> {
        let data_queries: Vec<MetricDataQuery> = queries
            .iter()
            .map(|q| {
                let dimensions = q
                    .dimensions
                    .iter()
                    .map(|d| {
                        aws_sdk_cloudwatch::types::Dimension::builder()
                            .name(&d.name)
                            .value(&d.value)
                            .build()
                    })
                    .collect();

                MetricDataQuery::builder()
                    .id(&q.id)
                    .metric_stat(
                        MetricStat::builder()
                            .metric(
                                Metric::builder()
                                    .namespace(&q.namespace)
                                    .metric_name(&q.metric_name)
                                    .set_dimensions(Some(dimensions))
                                    .build(),
                            )
                            .period(q.period as i32)
                            .stat(&q.statistic)
                            .build(),
                    )
                    .return_data(true)
                    .build()
            })
            .collect();

        let mut results: Vec<BatchResult> = Vec::with_capacity(queries.len());
        let mut token: Option<String> = None;

        loop {
            let mut req = self
                .client
                .get_metric_data()
                .start_time(to_aws_time(window.start))
                .end_time(to_aws_time(window.end))
                .set_metric_data_queries(Some(data_queries.clone()));
            if let Some(t) = &token {
                req = req.next_token(t.clone());
            }

            let out = req.send().await.map_err(classify)?;

            for r in out.metric_data_results() {
                let Some(id) = r.id() else { continue };

                let points: Vec<Datapoint> = r
                    .timestamps()
                    .iter()
                    .zip(r.values().iter())
                    .filter_map(|(ts, value)| {
                        Some(Datapoint {
                            timestamp: from_aws_time(ts)?,
                            value: *value,
                        })
                    })
                    .collect();

                // Pages repeat ids; extend the existing entry.
                match results.iter_mut().find(|e| e.id == id) {
                    Some(entry) => entry.points.extend(points),
                    None => results.push(BatchResult {
                        id: id.to_string(),
                        points,
                    }),
                }
            }

            match out.next_token() {
                Some(t) if !t.is_empty() => token = Some(t.to_string()),
                _ => break,
            }
        }

        Ok(results)
    }
}

fn to_aws_time(t: DateTime<Utc>) -> AwsDateTime {
    AwsDateTime::from_secs(t.timestamp())
}

fn from_aws_time(t: &AwsDateTime) -> Option<DateTime<Utc>> {
    Utc.timestamp_opt(t.secs(), t.subsec_nanos()).single()
}

/// Throttle-or-not classification of SDK errors, by error code.
fn classify<E, R>(err: SdkError<E, R>) -> ApiError
where
    E: ProvideErrorMetadata + std::fmt::Debug,
    R: std::fmt::Debug,
{
    let code = err.code().unwrap_or_default().to_string();
    let message = err
        .message()
        .map(str::to_string)
        .unwrap_or_else(|| format!("{err:?}"));

    match code.as_str() {
        "Throttling" | "ThrottlingException" | "RequestLimitExceeded"
        | "TooManyRequestsException" => ApiError::Throttled { message },
        _ => ApiError::Upstream { message },
    }
}
