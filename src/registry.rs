//! Per-namespace service registry.
//!
//! Maps a CloudWatch namespace to the knowledge needed to plan queries for
//! it: how to infer dimension values from a resource ARN, which statistics
//! to request when a job does not name any, and which resource-type filters
//! the tagging API expects. Lookups are O(1); namespaces absent from the
//! table fall back to ListMetrics-based dimension resolution.

use std::collections::HashMap;
use std::sync::LazyLock;

use regex::Regex;

use crate::model::Dimension;

/// Registry entry for one CloudWatch namespace.
pub struct ServiceEntry {
    /// ARN pattern with one named capture group per inferable dimension.
    pub arn_pattern: Regex,
    /// Dimension names in capture-group order.
    pub dimension_names: &'static [&'static str],
    /// Statistics requested when the job config leaves them empty.
    pub default_statistics: &'static [&'static str],
    /// Resource-type filters passed to the tagging API.
    pub resource_filters: &'static [&'static str],
}

static SERVICES: LazyLock<HashMap<&'static str, ServiceEntry>> = LazyLock::new(|| {
    let mut m = HashMap::new();

    m.insert(
        "AWS/EC2",
        entry(
            r"instance/(?P<InstanceId>[^/]+)$",
            &["InstanceId"],
            &["Average"],
            &["ec2:instance"],
        ),
    );
    m.insert(
        "AWS/EBS",
        entry(
            r"volume/(?P<VolumeId>[^/]+)$",
            &["VolumeId"],
            &["Average"],
            &["ec2:volume"],
        ),
    );
    m.insert(
        "AWS/ElastiCache",
        entry(
            r":cluster:(?P<CacheClusterId>[^:]+)$",
            &["CacheClusterId"],
            &["Average"],
            &["elasticache:cluster"],
        ),
    );
    m.insert(
        "AWS/RDS",
        entry(
            r":db:(?P<DBInstanceIdentifier>[^:]+)$",
            &["DBInstanceIdentifier"],
            &["Average"],
            &["rds:db"],
        ),
    );
    m.insert(
        "AWS/Lambda",
        entry(
            r":function:(?P<FunctionName>[^:]+)$",
            &["FunctionName"],
            &["Average"],
            &["lambda:function"],
        ),
    );
    m.insert(
        "AWS/SQS",
        entry(
            r":(?P<QueueName>[^:]+)$",
            &["QueueName"],
            &["Average"],
            &["sqs"],
        ),
    );
    m.insert(
        "AWS/SNS",
        entry(
            r":(?P<TopicName>[^:]+)$",
            &["TopicName"],
            &["Average"],
            &["sns"],
        ),
    );
    m.insert(
        "AWS/S3",
        entry(
            r":::(?P<BucketName>[^:]+)$",
            &["BucketName"],
            &["Average"],
            &["s3"],
        ),
    );
    m.insert(
        "AWS/DynamoDB",
        entry(
            r"table/(?P<TableName>[^/]+)$",
            &["TableName"],
            &["Average"],
            &["dynamodb:table"],
        ),
    );
    m.insert(
        "AWS/ES",
        entry(
            r"domain/(?P<DomainName>[^/]+)$",
            &["DomainName"],
            &["Average"],
            &["es:domain"],
        ),
    );

    m
});

fn entry(
    pattern: &str,
    dimension_names: &'static [&'static str],
    default_statistics: &'static [&'static str],
    resource_filters: &'static [&'static str],
) -> ServiceEntry {
    ServiceEntry {
        arn_pattern: Regex::new(pattern).expect("service ARN pattern"),
        dimension_names,
        default_statistics,
        resource_filters,
    }
}

/// Looks up the registry entry for a namespace.
pub fn lookup(namespace: &str) -> Option<&'static ServiceEntry> {
    SERVICES.get(namespace)
}

/// Infers the dimension set for a resource from its ARN.
///
/// Returns `None` when the namespace is unknown or the ARN does not match
/// the namespace's pattern; the caller then falls back to ListMetrics.
pub fn dimensions_from_arn(namespace: &str, arn: &str) -> Option<Vec<Dimension>> {
    let entry = lookup(namespace)?;
    let caps = entry.arn_pattern.captures(arn)?;

    let mut dims = Vec::with_capacity(entry.dimension_names.len());
    for name in entry.dimension_names {
        let value = caps.name(name)?.as_str();
        if value.is_empty() {
            return None;
        }
        dims.push(Dimension::new(*name, value));
    }
    Some(dims)
}

/// Default statistics for a namespace, used when the job names none.
pub fn default_statistics(namespace: &str) -> &'static [&'static str] {
    lookup(namespace).map_or(&["Average"], |e| e.default_statistics)
}

/// Resource-type filters for the tagging API; empty when unknown.
pub fn resource_filters(namespace: &str) -> &'static [&'static str] {
    lookup(namespace).map_or(&[], |e| e.resource_filters)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_elasticache_cluster_arn() {
        let dims = dimensions_from_arn(
            "AWS/ElastiCache",
            "arn:aws:elasticache:us-east-1:123456789012:cluster:redis-cluster",
        )
        .expect("dimensions");
        assert_eq!(dims, vec![Dimension::new("CacheClusterId", "redis-cluster")]);
    }

    #[test]
    fn test_ec2_instance_arn() {
        let dims = dimensions_from_arn(
            "AWS/EC2",
            "arn:aws:ec2:us-east-1:123456789012:instance/i-abc123",
        )
        .expect("dimensions");
        assert_eq!(dims, vec![Dimension::new("InstanceId", "i-abc123")]);
    }

    #[test]
    fn test_rds_db_arn() {
        let dims = dimensions_from_arn(
            "AWS/RDS",
            "arn:aws:rds:eu-west-1:123456789012:db:orders-primary",
        )
        .expect("dimensions");
        assert_eq!(
            dims,
            vec![Dimension::new("DBInstanceIdentifier", "orders-primary")],
        );
    }

    #[test]
    fn test_sqs_queue_arn() {
        let dims = dimensions_from_arn(
            "AWS/SQS",
            "arn:aws:sqs:us-east-1:123456789012:ingest-queue",
        )
        .expect("dimensions");
        assert_eq!(dims, vec![Dimension::new("QueueName", "ingest-queue")]);
    }

    #[test]
    fn test_s3_bucket_arn() {
        let dims = dimensions_from_arn("AWS/S3", "arn:aws:s3:::my-bucket").expect("dimensions");
        assert_eq!(dims, vec![Dimension::new("BucketName", "my-bucket")]);
    }

    #[test]
    fn test_unknown_namespace_returns_none() {
        assert!(dimensions_from_arn("AWS/Unknown", "arn:aws:foo:::bar").is_none());
    }

    #[test]
    fn test_non_matching_arn_returns_none() {
        assert!(
            dimensions_from_arn("AWS/EC2", "arn:aws:ec2:us-east-1:123:snapshot/snap-1").is_none()
        );
    }

    #[test]
    fn test_default_statistics_fallback() {
        assert_eq!(default_statistics("AWS/ElastiCache"), &["Average"]);
        assert_eq!(default_statistics("AWS/Unknown"), &["Average"]);
    }

    #[test]
    fn test_resource_filters() {
        assert_eq!(resource_filters("AWS/ElastiCache"), &["elasticache:cluster"]);
        assert!(resource_filters("AWS/Unknown").is_empty());
    }
}
