//! Dimension resolution: expand each (resource, metric) pair into the
//! dimension combinations that actually exist.
//!
//! Inferred mode parses dimension values out of the resource ARN via the
//! namespace registry. Listed mode asks ListMetrics for the dimension sets
//! CloudWatch knows about and keeps those correlated to the resource;
//! inferred dimensions remain the correlation key. A resource for which
//! neither mode yields dimensions is skipped and counted.

use std::collections::HashMap;

use anyhow::{Context, Result};
use regex::Regex;
use tracing::debug;

use crate::aws::{ApiError, CloudwatchApi};
use crate::config::{DimensionFilterConfig, ResolvedMetric};
use crate::model::{canonical_dimensions, Dimension, Tag, TaggedResource};
use crate::registry;

/// One concrete (resource, metric, dimension-set) unit for the planner.
#[derive(Debug, Clone)]
pub struct QuerySource {
    /// ARN (discovery) or static job name; becomes the `name` label.
    pub resource_name: String,
    /// Tags to copy onto data samples.
    pub exported_tags: Vec<Tag>,
    pub namespace: String,
    pub metric: ResolvedMetric,
    pub dimensions: Vec<Dimension>,
}

/// Compiled dimension-value filter for listed resolution.
pub struct DimensionFilter {
    name: String,
    value: Regex,
}

impl DimensionFilter {
    pub fn compile(filters: &[DimensionFilterConfig]) -> Result<Vec<Self>> {
        filters
            .iter()
            .map(|f| {
                Ok(Self {
                    name: f.name.clone(),
                    value: Regex::new(&f.value)
                        .with_context(|| format!("dimension regex {:?}", f.value))?,
                })
            })
            .collect()
    }

    fn matches(&self, dims: &[Dimension]) -> bool {
        dims.iter()
            .any(|d| d.name == self.name && self.value.is_match(&d.value))
    }
}

/// Resolution output for one branch.
#[derive(Debug, Default)]
pub struct Resolution {
    pub sources: Vec<QuerySource>,
    /// (resource, metric) pairs skipped because no dimensions resolved.
    pub skipped_no_dimensions: usize,
}

/// Resolves dimension sets for every (resource, metric) pair.
///
/// When `use_list_metrics` is set, ListMetrics is called once per metric
/// and its dimension sets are intersected with the resource's inferred
/// dimensions and the configured value filters.
pub async fn resolve_dimensions<C: CloudwatchApi>(
    api: &C,
    namespace: &str,
    resources: &[TaggedResource],
    metrics: &[ResolvedMetric],
    use_list_metrics: bool,
    filters: &[DimensionFilter],
    exported_tag_keys: &[String],
) -> Result<Resolution, ApiError> {
    // Listed sets are shared across resources; fetch once per metric.
    let mut listed: HashMap<&str, Vec<Vec<Dimension>>> = HashMap::new();
    if use_list_metrics {
        for metric in metrics {
            let sets = api
                .list_metrics(namespace, &metric.name)
                .await?
                .into_iter()
                .map(|m| canonical_dimensions(m.dimensions))
                .collect();
            listed.insert(metric.name.as_str(), sets);
        }
    }

    let mut out = Resolution::default();

    for resource in resources {
        let inferred = registry::dimensions_from_arn(namespace, &resource.arn);
        let exported_tags = resource.exported_tags(exported_tag_keys);

        for metric in metrics {
            let mut sets: Vec<Vec<Dimension>> = Vec::new();

            if use_list_metrics {
                if let Some(candidates) = listed.get(metric.name.as_str()) {
                    for set in candidates {
                        if correlates(set, inferred.as_deref())
                            && filters.iter().all(|f| f.matches(set))
                        {
                            sets.push(set.clone());
                        }
                    }
                }
            }

            // Fall back to the inferred set when listing produced nothing.
            if sets.is_empty() {
                if let Some(dims) = &inferred {
                    sets.push(canonical_dimensions(dims.clone()));
                }
            }

            if sets.is_empty() {
                out.skipped_no_dimensions += 1;
                debug!(
                    namespace,
                    resource = %resource.arn,
                    metric = %metric.name,
                    "no dimensions for resource, skipping",
                );
                continue;
            }

            for dims in sets {
                out.sources.push(QuerySource {
                    resource_name: resource.arn.clone(),
                    exported_tags: exported_tags.clone(),
                    namespace: namespace.to_string(),
                    metric: metric.clone(),
                    dimensions: dims,
                });
            }
        }
    }

    Ok(out)
}

/// Whether a listed dimension set belongs to the resource: every inferred
/// dimension must appear in it with the same value. Resources whose ARN
/// yields nothing cannot be correlated.
fn correlates(set: &[Dimension], inferred: Option<&[Dimension]>) -> bool {
    match inferred {
        Some(dims) => dims.iter().all(|d| set.contains(d)),
        None => false,
    }
}
