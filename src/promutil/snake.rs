//! Prometheus string transforms for metric and label names.
//!
//! The split step inserts an underscore only at lowercase/digit→uppercase
//! boundaries, so `NetworkBytesIn` becomes `network_bytes_in` while the
//! all-caps run in `CPUUtilization` collapses to `cpuutilization`. The
//! transform is idempotent.

use std::sync::LazyLock;

use regex::Regex;

static SPLIT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"([a-z0-9])([A-Z])").expect("split regex"));

static METRIC_NAME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-zA-Z_:][a-zA-Z0-9_:]*$").expect("metric name regex"));

static LABEL_NAME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-zA-Z_][a-zA-Z0-9_]*$").expect("label name regex"));

/// Replaces characters CloudWatch allows but Prometheus does not.
fn sanitize(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            ' ' | ',' | '\t' | '/' | '\\' | '.' | '-' | ':' | '=' | '@' | '<' | '>' => {
                out.push('_');
            }
            '%' => out.push_str("_percent"),
            _ => out.push(c),
        }
    }
    out
}

/// Full transform for metric-name components: split, sanitize, lowercase.
pub fn prom_string(text: &str) -> String {
    let split = SPLIT_RE.replace_all(text, "${1}_${2}");
    sanitize(&split).to_lowercase()
}

/// Transform for label-name components. Snake-casing is opt-in; without it
/// only invalid characters are replaced and the original casing survives.
pub fn prom_string_tag(text: &str, snake_case: bool) -> (bool, String) {
    let s = if snake_case {
        prom_string(text)
    } else {
        sanitize(text)
    };
    (is_valid_label_name(&s), s)
}

/// Whether `name` is a valid Prometheus metric name.
pub fn is_valid_metric_name(name: &str) -> bool {
    METRIC_NAME_RE.is_match(name)
}

/// Whether `name` is a valid Prometheus label name.
pub fn is_valid_label_name(name: &str) -> bool {
    LABEL_NAME_RE.is_match(name)
}

/// Builds the exported metric name from namespace, metric and statistic.
///
/// The namespace is lowercased before splitting so `AWS/ElastiCache` yields
/// `aws_elasticache` rather than `aws_elasti_cache`. Namespaces that do not
/// already start with `aws` get the `aws_` prefix.
pub fn build_metric_name(namespace: &str, metric_name: &str, statistic: &str) -> String {
    let prom_ns = prom_string(&namespace.to_lowercase());

    let mut out = String::with_capacity(prom_ns.len() + metric_name.len() + statistic.len() + 8);
    if !prom_ns.starts_with("aws") {
        out.push_str("aws_");
    }
    out.push_str(&prom_ns);

    out.push('_');
    out.push_str(&prom_string(metric_name));

    if !statistic.is_empty() {
        out.push('_');
        out.push_str(&prom_string(statistic));
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prom_string_camel_boundaries() {
        assert_eq!(prom_string("NetworkBytesIn"), "network_bytes_in");
        assert_eq!(prom_string("FreeableMemory"), "freeable_memory");
        assert_eq!(prom_string("CacheClusterId"), "cache_cluster_id");
    }

    #[test]
    fn test_prom_string_acronym_run_collapses() {
        // No lowercase→uppercase boundary inside the all-caps run.
        assert_eq!(prom_string("CPUUtilization"), "cpuutilization");
        assert_eq!(prom_string("BurstBalance"), "burst_balance");
    }

    #[test]
    fn test_prom_string_sanitizes_punctuation() {
        assert_eq!(prom_string("billable-to"), "billable_to");
        assert_eq!(prom_string("a b/c.d:e"), "a_b_c_d_e");
        assert_eq!(prom_string("Usage%"), "usage_percent");
    }

    #[test]
    fn test_prom_string_idempotent() {
        for input in ["CPUUtilization", "NetworkBytesIn", "billable-to", "x_y_z"] {
            let once = prom_string(input);
            assert_eq!(prom_string(&once), once, "input {input}");
        }
    }

    #[test]
    fn test_prom_string_tag_without_snake_case_keeps_casing() {
        let (ok, s) = prom_string_tag("CustomTag", false);
        assert!(ok);
        assert_eq!(s, "CustomTag");

        let (ok, s) = prom_string_tag("billable-to", false);
        assert!(ok);
        assert_eq!(s, "billable_to");
    }

    #[test]
    fn test_prom_string_tag_with_snake_case() {
        let (ok, s) = prom_string_tag("CustomTag", true);
        assert!(ok);
        assert_eq!(s, "custom_tag");
    }

    #[test]
    fn test_invalid_label_name_detected() {
        let (ok, s) = prom_string_tag("0badkey", false);
        assert!(!ok);
        assert_eq!(s, "0badkey");
    }

    #[test]
    fn test_build_metric_name() {
        assert_eq!(
            build_metric_name("AWS/ElastiCache", "CPUUtilization", "Average"),
            "aws_elasticache_cpuutilization_average",
        );
        assert_eq!(
            build_metric_name("AWS/ElastiCache", "NetworkBytesIn", "Average"),
            "aws_elasticache_network_bytes_in_average",
        );
        assert_eq!(
            build_metric_name("AWS/EC2", "CPUUtilization", "Maximum"),
            "aws_ec2_cpuutilization_maximum",
        );
    }

    #[test]
    fn test_build_metric_name_non_aws_namespace_gets_prefix() {
        assert_eq!(
            build_metric_name("CustomApp", "QueueDepth", "Sum"),
            "aws_customapp_queue_depth_sum",
        );
    }

    #[test]
    fn test_build_metric_name_empty_statistic() {
        assert_eq!(
            build_metric_name("AWS/ElastiCache", "Info", ""),
            "aws_elasticache_info",
        );
    }

    #[test]
    fn test_metric_name_validity() {
        assert!(is_valid_metric_name("aws_elasticache_cpuutilization_average"));
        assert!(is_valid_metric_name("a:b_c"));
        assert!(!is_valid_metric_name("0leading_digit"));
        assert!(!is_valid_metric_name("has space"));
    }
}
