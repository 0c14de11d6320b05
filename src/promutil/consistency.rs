//! Label consistency and duplicate removal over the full emitted slice.
//!
//! Every sample of a metric family is padded with empty strings for the
//! label keys observed elsewhere in the family, then exact duplicates
//! (same name, same full label map) collapse to their first occurrence.

use std::collections::BTreeMap;
use std::collections::HashSet;

use super::{LabelSetRegistry, PrometheusMetric};

/// Pads labels from the observed registry and drops exact duplicates.
/// Output order is stable relative to first occurrences.
pub fn ensure_label_consistency_and_dedup(
    metrics: Vec<PrometheusMetric>,
    observed: &LabelSetRegistry,
) -> Vec<PrometheusMetric> {
    let mut seen: HashSet<(String, BTreeMap<String, String>)> = HashSet::with_capacity(metrics.len());
    let mut out = Vec::with_capacity(metrics.len());

    for mut metric in metrics {
        if let Some(keys) = observed.keys(&metric.name) {
            for key in keys {
                if !metric.labels.contains_key(key) {
                    metric.labels.insert(key.clone(), String::new());
                }
            }
        }

        // Value and timestamp are not part of duplicate identity.
        if seen.insert((metric.name.clone(), metric.labels.clone())) {
            out.push(metric);
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(name: &str, labels: &[(&str, &str)], value: f64) -> PrometheusMetric {
        PrometheusMetric {
            name: name.to_string(),
            labels: labels
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            value,
            timestamp: None,
            include_timestamp: false,
        }
    }

    #[test]
    fn test_adds_missing_labels() {
        let mut observed = LabelSetRegistry::default();
        observed.observe("metric1", ["label1", "label2", "label3"]);

        let out = ensure_label_consistency_and_dedup(
            vec![
                sample("metric1", &[("label1", "value1")], 1.0),
                sample("metric1", &[("label2", "value2")], 2.0),
                sample("metric1", &[], 3.0),
            ],
            &observed,
        );

        assert_eq!(out.len(), 3);
        for m in &out {
            assert_eq!(m.labels.len(), 3);
            for key in ["label1", "label2", "label3"] {
                assert!(m.labels.contains_key(key));
            }
        }
        assert_eq!(out[0].labels["label1"], "value1");
        assert_eq!(out[0].labels["label2"], "");
        assert_eq!(out[1].labels["label2"], "value2");
        assert_eq!(out[2].labels["label3"], "");
    }

    #[test]
    fn test_duplicate_metric_collapses() {
        let out = ensure_label_consistency_and_dedup(
            vec![
                sample("metric1", &[("label1", "value1")], 1.0),
                sample("metric1", &[("label1", "value1")], 2.0),
            ],
            &LabelSetRegistry::default(),
        );

        assert_eq!(out.len(), 1);
        // First occurrence wins.
        assert_eq!(out[0].value, 1.0);
    }

    #[test]
    fn test_duplicate_with_multiple_labels_any_order() {
        let out = ensure_label_consistency_and_dedup(
            vec![
                sample("metric1", &[("label1", "value1"), ("label2", "value2")], 1.0),
                sample("metric1", &[("label2", "value2"), ("label1", "value1")], 2.0),
            ],
            &LabelSetRegistry::default(),
        );

        assert_eq!(out.len(), 1);
    }

    #[test]
    fn test_same_name_different_labels_both_kept() {
        let out = ensure_label_consistency_and_dedup(
            vec![
                sample("metric1", &[("label1", "value1")], 1.0),
                sample("metric1", &[("label2", "value2")], 2.0),
            ],
            &LabelSetRegistry::default(),
        );

        assert_eq!(out.len(), 2);
    }

    #[test]
    fn test_different_names_same_labels_both_kept() {
        let out = ensure_label_consistency_and_dedup(
            vec![
                sample("metric1", &[("label1", "value1")], 1.0),
                sample("metric2", &[("label1", "value1")], 2.0),
            ],
            &LabelSetRegistry::default(),
        );

        assert_eq!(out.len(), 2);
    }

    #[test]
    fn test_mixed_duplicates_keep_first_in_input_order() {
        let out = ensure_label_consistency_and_dedup(
            vec![
                sample("metric2", &[("label2", "value2")], 1.0),
                sample("metric2", &[("label1", "value1")], 2.0),
                sample("metric1", &[("label1", "value1")], 3.0),
                sample("metric1", &[("label1", "value1")], 4.0),
                sample("metric1", &[("label1", "value1")], 5.0),
            ],
            &LabelSetRegistry::default(),
        );

        assert_eq!(out.len(), 3);
        assert_eq!(out[0].name, "metric2");
        assert_eq!(out[0].labels["label2"], "value2");
        assert_eq!(out[1].name, "metric2");
        assert_eq!(out[1].labels["label1"], "value1");
        assert_eq!(out[2].name, "metric1");
        assert_eq!(out[2].value, 3.0);
    }

    #[test]
    fn test_padding_can_reveal_duplicates() {
        let mut observed = LabelSetRegistry::default();
        observed.observe("metric1", ["label1"]);

        // After padding, both samples have identical label maps.
        let out = ensure_label_consistency_and_dedup(
            vec![
                sample("metric1", &[("label1", "")], 1.0),
                sample("metric1", &[], 2.0),
            ],
            &observed,
        );

        assert_eq!(out.len(), 1);
        assert_eq!(out[0].value, 1.0);
    }
}
