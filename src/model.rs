use chrono::{DateTime, Utc};

/// A key/value tag attached to a cloud resource or a scrape context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tag {
    pub key: String,
    pub value: String,
}

impl Tag {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// A CloudWatch dimension: name/value pair identifying a metric's subject.
///
/// Dimension-set identity is the name-sorted multiset of pairs; callers
/// sort before comparing or hashing.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Dimension {
    pub name: String,
    pub value: String,
}

impl Dimension {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// Sorts a dimension set into its canonical (name-ordered) form.
pub fn canonical_dimensions(mut dims: Vec<Dimension>) -> Vec<Dimension> {
    dims.sort();
    dims
}

/// A discovered cloud resource. Immutable after discovery; the ARN is the
/// canonical correlation key for the join in the rendering stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaggedResource {
    pub arn: String,
    pub namespace: String,
    pub region: String,
    pub tags: Vec<Tag>,
}

impl TaggedResource {
    /// Returns the tags selected for export on data samples.
    /// Info metrics always carry the full tag set instead.
    pub fn exported_tags(&self, exported_keys: &[String]) -> Vec<Tag> {
        self.tags
            .iter()
            .filter(|t| exported_keys.iter().any(|k| *k == t.key))
            .cloned()
            .collect()
    }
}

/// Ambient labels for one scrape pass: region, account and custom tags.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScrapeContext {
    pub region: String,
    pub account_id: String,
    pub custom_tags: Vec<Tag>,
}

/// One aggregated data point returned by the metrics API.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Datapoint {
    pub timestamp: DateTime<Utc>,
    pub value: f64,
}

/// Sorts data points by timestamp, newest first. The renderer consumes the
/// first entry as the freshest value for the window.
pub fn sort_by_timestamp(mut points: Vec<Datapoint>) -> Vec<Datapoint> {
    points.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
    points
}

/// Post-fetch join record: one metric/statistic for one resource, with the
/// selected data point (if any) and the rendering flags carried through the
/// planner merge.
#[derive(Debug, Clone)]
pub struct CloudwatchData {
    pub metric_name: String,
    pub namespace: String,
    pub statistic: String,
    pub dimensions: Vec<Dimension>,
    /// Resource ARN (discovery jobs) or the static job name. Becomes the
    /// `name` label.
    pub resource_name: String,
    /// Tags copied onto data samples (per the job's exported-tags list).
    pub tags: Vec<Tag>,
    pub nil_to_zero: bool,
    pub add_cloudwatch_timestamp: bool,
    pub data_point: Option<f64>,
    /// Timestamp of the selected data point. `None` when no point exists.
    pub timestamp: Option<DateTime<Utc>>,
}

/// Discovery or data results for one scrape branch, tied to their context.
#[derive(Debug, Clone)]
pub struct TaggedResourceResult {
    pub context: Option<ScrapeContext>,
    pub resources: Vec<TaggedResource>,
    /// Whether info metrics for these resources should carry context labels.
    pub include_context_on_info_metrics: bool,
    /// Whether this job emits info metrics at all.
    pub emit_info_metrics: bool,
}

/// Fetched data for one scrape branch, tied to its context.
#[derive(Debug, Clone)]
pub struct CloudwatchDataResult {
    pub context: Option<ScrapeContext>,
    pub data: Vec<CloudwatchData>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_canonical_dimensions_sorts_by_name() {
        let dims = vec![
            Dimension::new("Role", "writer"),
            Dimension::new("CacheClusterId", "redis-cluster"),
        ];
        let canon = canonical_dimensions(dims);
        assert_eq!(canon[0].name, "CacheClusterId");
        assert_eq!(canon[1].name, "Role");
    }

    #[test]
    fn test_sort_by_timestamp_descending() {
        let ts = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let middle = Datapoint {
            timestamp: ts - chrono::Duration::minutes(2),
            value: 2.0,
        };
        let newest = Datapoint {
            timestamp: ts - chrono::Duration::minutes(1),
            value: 1.0,
        };
        let oldest = Datapoint {
            timestamp: ts - chrono::Duration::minutes(3),
            value: 3.0,
        };

        let sorted = sort_by_timestamp(vec![middle, newest, oldest]);

        assert_eq!(sorted[0].value, 1.0);
        assert_eq!(sorted[1].value, 2.0);
        assert_eq!(sorted[2].value, 3.0);
    }

    #[test]
    fn test_exported_tags_filters_by_key() {
        let resource = TaggedResource {
            arn: "arn:aws:elasticache:us-east-1:123456789012:cluster:redis-cluster".to_string(),
            namespace: "AWS/ElastiCache".to_string(),
            region: "us-east-1".to_string(),
            tags: vec![Tag::new("Environment", "prod"), Tag::new("Team", "storage")],
        };

        let exported = resource.exported_tags(&["Environment".to_string()]);
        assert_eq!(exported.len(), 1);
        assert_eq!(exported[0].key, "Environment");

        assert!(resource.exported_tags(&[]).is_empty());
    }
}
