//! Rendering: join fetched data and discovered resources into samples.
//!
//! Data samples derive their name from namespace/metric/statistic and their
//! labels from the scrape context, dimensions and exported tags. Info
//! samples carry the resource metadata and join to data samples at query
//! time via the shared `name` label.

use std::collections::BTreeMap;

use tracing::{error, warn};

use crate::model::{CloudwatchDataResult, ScrapeContext, Tag, TaggedResourceResult};

use super::snake::{build_metric_name, is_valid_metric_name, prom_string_tag};
use super::{LabelSetRegistry, PrometheusMetric};

/// Rendering output plus the samples dropped for label inconsistencies.
#[derive(Debug, Default)]
pub struct BuildOutput {
    pub metrics: Vec<PrometheusMetric>,
    pub dropped: usize,
}

/// Builds data samples from fetched metric results.
pub fn build_metrics(
    results: &[CloudwatchDataResult],
    labels_snake_case: bool,
    observed: &mut LabelSetRegistry,
) -> BuildOutput {
    let mut out = BuildOutput::default();

    for result in results {
        for data in &result.data {
            // A requested cloud timestamp without a data point is
            // unrepresentable; the sample is withheld entirely.
            if data.data_point.is_none() && data.add_cloudwatch_timestamp {
                continue;
            }

            let name = build_metric_name(&data.namespace, &data.metric_name, &data.statistic);
            if !is_valid_metric_name(&name) {
                error!(metric = %name, "invalid metric name, dropping sample");
                out.dropped += 1;
                continue;
            }

            let (value, timestamp, include_timestamp) = match data.data_point {
                Some(v) => (v, data.timestamp, data.add_cloudwatch_timestamp),
                None if data.nil_to_zero => (0.0, None, false),
                None => (f64::NAN, None, false),
            };

            let mut labels = BTreeMap::new();
            labels.insert("name".to_string(), data.resource_name.clone());
            apply_context_labels(&mut labels, result.context.as_ref(), labels_snake_case);

            let mut valid = true;
            for dim in &data.dimensions {
                valid &= insert_prefixed(
                    &mut labels,
                    "dimension_",
                    &dim.name,
                    &dim.value,
                    labels_snake_case,
                );
            }
            valid &= apply_tag_labels(&mut labels, &data.tags, labels_snake_case);

            if !valid {
                error!(metric = %name, "invalid label name, dropping sample");
                out.dropped += 1;
                continue;
            }

            observed.observe(&name, labels.keys().cloned());
            out.metrics.push(PrometheusMetric {
                name,
                labels,
                value,
                timestamp,
                include_timestamp,
            });
        }
    }

    out
}

/// Builds one info sample per discovered resource.
pub fn build_info_metrics(
    results: &[TaggedResourceResult],
    labels_snake_case: bool,
    observed: &mut LabelSetRegistry,
) -> BuildOutput {
    let mut out = BuildOutput::default();

    for result in results {
        if !result.emit_info_metrics {
            continue;
        }

        for resource in &result.resources {
            let name = build_metric_name(&resource.namespace, "Info", "");
            if !is_valid_metric_name(&name) {
                error!(metric = %name, "invalid info metric name, dropping sample");
                out.dropped += 1;
                continue;
            }

            let mut labels = BTreeMap::new();
            labels.insert("name".to_string(), resource.arn.clone());

            let valid = apply_tag_labels(&mut labels, &resource.tags, labels_snake_case);
            if !valid {
                error!(metric = %name, "invalid label name, dropping info sample");
                out.dropped += 1;
                continue;
            }

            if result.include_context_on_info_metrics {
                apply_context_labels(&mut labels, result.context.as_ref(), labels_snake_case);
            }

            observed.observe(&name, labels.keys().cloned());
            out.metrics.push(PrometheusMetric {
                name,
                labels,
                value: 0.0,
                timestamp: None,
                include_timestamp: false,
            });
        }
    }

    out
}

fn apply_context_labels(
    labels: &mut BTreeMap<String, String>,
    context: Option<&ScrapeContext>,
    labels_snake_case: bool,
) {
    let Some(ctx) = context else { return };

    labels.insert("account_id".to_string(), ctx.account_id.clone());
    labels.insert("region".to_string(), ctx.region.clone());

    for tag in &ctx.custom_tags {
        let (ok, key) = prom_string_tag(&tag.key, labels_snake_case);
        if !ok {
            warn!(key = %tag.key, "invalid custom tag key, skipping label");
            continue;
        }
        labels.insert(format!("custom_tag_{key}"), tag.value.clone());
    }
}

fn apply_tag_labels(
    labels: &mut BTreeMap<String, String>,
    tags: &[Tag],
    labels_snake_case: bool,
) -> bool {
    let mut valid = true;
    for tag in tags {
        valid &= insert_prefixed(labels, "tag_", &tag.key, &tag.value, labels_snake_case);
    }
    valid
}

/// Inserts `<prefix><transformed key> = value`; values are never
/// transformed. Returns false when the key does not survive as a valid
/// label name.
fn insert_prefixed(
    labels: &mut BTreeMap<String, String>,
    prefix: &str,
    key: &str,
    value: &str,
    labels_snake_case: bool,
) -> bool {
    let (ok, key) = prom_string_tag(key, labels_snake_case);
    if !ok {
        return false;
    }
    labels.insert(format!("{prefix}{key}"), value.to_string());
    true
}
