//! Query planning: dedup the resources × metrics × statistics
//! cross-product and pack it into batch requests.
//!
//! Queries sharing an identity key (everything except the rendering flags)
//! merge into one upstream entry; the flags travel on the origins so the
//! renderer can apply them per resource. Batches group by
//! (period, length, delay) because one request carries a single time
//! window, and hold at most the configured entry count.

use std::collections::HashMap;

use chrono::{DateTime, TimeZone, Utc};

use crate::aws::{BatchQuery, TimeWindow};
use crate::model::{Dimension, Tag};

use super::dimensions::QuerySource;

/// A resource that contributed a planned query, with its rendering flags.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryOrigin {
    pub resource_name: String,
    pub tags: Vec<Tag>,
    pub nil_to_zero: bool,
    pub add_cloudwatch_timestamp: bool,
}

/// One deduplicated upstream query with its correlation id.
#[derive(Debug, Clone)]
pub struct PlannedQuery {
    pub id: String,
    pub namespace: String,
    pub metric_name: String,
    pub dimensions: Vec<Dimension>,
    pub statistic: String,
    pub period: u64,
    pub origins: Vec<QueryOrigin>,
}

impl PlannedQuery {
    /// The wire form sent upstream; origins stay behind.
    pub fn to_batch_query(&self) -> BatchQuery {
        BatchQuery {
            id: self.id.clone(),
            namespace: self.namespace.clone(),
            metric_name: self.metric_name.clone(),
            dimensions: self.dimensions.clone(),
            statistic: self.statistic.clone(),
            period: self.period,
        }
    }
}

/// One batch request: a shared window shape plus its queries.
#[derive(Debug, Clone)]
pub struct QueryBatch {
    pub length: u64,
    pub delay: u64,
    pub period: u64,
    pub queries: Vec<PlannedQuery>,
}

impl QueryBatch {
    /// Computes the aligned request window at fetch time.
    ///
    /// Both edges round down to period boundaries; CloudWatch buckets data
    /// on those boundaries and misaligned windows can come back empty.
    pub fn window(&self, now: DateTime<Utc>) -> TimeWindow {
        let period = self.period.max(1) as i64;
        let end = floor_to_period(now.timestamp() - self.delay as i64, period);
        let start = floor_to_period(end - self.length as i64, period);
        TimeWindow {
            start: Utc.timestamp_opt(start, 0).single().unwrap_or(now),
            end: Utc.timestamp_opt(end, 0).single().unwrap_or(now),
        }
    }
}

fn floor_to_period(ts: i64, period: i64) -> i64 {
    ts - ts.rem_euclid(period)
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct IdentityKey {
    namespace: String,
    metric_name: String,
    dimensions: Vec<Dimension>,
    statistic: String,
    period: u64,
    length: u64,
    delay: u64,
}

/// Plans the batch requests for one scrape branch.
pub fn plan_queries(sources: &[QuerySource], batch_size: usize) -> Vec<QueryBatch> {
    let batch_size = batch_size.max(1);

    // Dedup by identity key, insertion-ordered so output stays stable.
    let mut order: Vec<IdentityKey> = Vec::new();
    let mut merged: HashMap<IdentityKey, Vec<QueryOrigin>> = HashMap::new();

    for source in sources {
        for statistic in &source.metric.statistics {
            let key = IdentityKey {
                namespace: source.namespace.clone(),
                metric_name: source.metric.name.clone(),
                dimensions: source.dimensions.clone(),
                statistic: statistic.clone(),
                period: source.metric.period,
                length: source.metric.length,
                delay: source.metric.delay,
            };

            let origin = QueryOrigin {
                resource_name: source.resource_name.clone(),
                tags: source.exported_tags.clone(),
                nil_to_zero: source.metric.nil_to_zero,
                add_cloudwatch_timestamp: source.metric.add_cloudwatch_timestamp,
            };

            match merged.get_mut(&key) {
                Some(origins) => {
                    if !origins.contains(&origin) {
                        origins.push(origin);
                    }
                }
                None => {
                    merged.insert(key.clone(), vec![origin]);
                    order.push(key);
                }
            }
        }
    }

    // Group by window shape, preserving first-seen order.
    let mut group_order: Vec<(u64, u64, u64)> = Vec::new();
    let mut groups: HashMap<(u64, u64, u64), Vec<IdentityKey>> = HashMap::new();
    for key in order {
        let shape = (key.period, key.length, key.delay);
        groups
            .entry(shape)
            .or_insert_with(|| {
                group_order.push(shape);
                Vec::new()
            })
            .push(key);
    }

    // Pack each group into batches of at most `batch_size`, assigning a
    // request-unique correlation id per entry.
    let mut batches = Vec::new();
    for shape in group_order {
        let keys = groups.remove(&shape).unwrap_or_default();
        for chunk in keys.chunks(batch_size) {
            let queries = chunk
                .iter()
                .enumerate()
                .map(|(i, key)| PlannedQuery {
                    id: format!("id_{i}"),
                    namespace: key.namespace.clone(),
                    metric_name: key.metric_name.clone(),
                    dimensions: key.dimensions.clone(),
                    statistic: key.statistic.clone(),
                    period: key.period,
                    origins: merged.get(key).cloned().unwrap_or_default(),
                })
                .collect();

            batches.push(QueryBatch {
                period: shape.0,
                length: shape.1,
                delay: shape.2,
                queries,
            });
        }
    }

    batches
}
