//! Prometheus sample model and text exposition.
//!
//! The renderer produces flat [`PrometheusMetric`] samples; this module
//! carries them to the text format (0.0.4) via hand-built protobuf metric
//! families so NaN values and explicit timestamps survive encoding.

pub mod consistency;
pub mod migrate;
pub mod snake;

use std::collections::{BTreeMap, HashMap, HashSet};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use prometheus::proto;
use prometheus::{Encoder, TextEncoder};

/// One exported sample.
#[derive(Debug, Clone, PartialEq)]
pub struct PrometheusMetric {
    pub name: String,
    /// Sorted label map; exposition order follows key order.
    pub labels: BTreeMap<String, String>,
    pub value: f64,
    /// Data-point time; `None` is the zero instant.
    pub timestamp: Option<DateTime<Utc>>,
    /// Whether the timestamp is written out on exposition.
    pub include_timestamp: bool,
}

/// Label keys observed per metric name within one scrape. Built by the
/// renderer, consumed read-only by the consistency pass, discarded with
/// the scrape.
#[derive(Debug, Default)]
pub struct LabelSetRegistry {
    observed: HashMap<String, HashSet<String>>,
}

impl LabelSetRegistry {
    pub fn observe<I, S>(&mut self, name: &str, keys: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let set = self.observed.entry(name.to_string()).or_default();
        for key in keys {
            set.insert(key.into());
        }
    }

    pub fn keys(&self, name: &str) -> Option<&HashSet<String>> {
        self.observed.get(name)
    }

    pub fn len(&self) -> usize {
        self.observed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.observed.is_empty()
    }
}

/// Encodes samples as Prometheus text exposition (version 0.0.4).
///
/// Families keep the order in which their names first appear; every family
/// is exposed as a gauge.
pub fn encode_text(metrics: &[PrometheusMetric]) -> Result<String> {
    let mut order: Vec<&str> = Vec::new();
    let mut grouped: HashMap<&str, Vec<&PrometheusMetric>> = HashMap::new();

    for metric in metrics {
        grouped
            .entry(metric.name.as_str())
            .or_insert_with(|| {
                order.push(metric.name.as_str());
                Vec::new()
            })
            .push(metric);
    }

    let mut families = Vec::with_capacity(order.len());
    for name in order {
        let mut family = proto::MetricFamily::default();
        family.set_name(name.to_string());
        family.set_help(format!("Exported metric {name}"));
        family.set_field_type(proto::MetricType::GAUGE);

        for sample in grouped.get(name).into_iter().flatten() {
            let mut m = proto::Metric::default();

            for (key, value) in &sample.labels {
                let mut pair = proto::LabelPair::default();
                pair.set_name(key.clone());
                pair.set_value(value.clone());
                m.mut_label().push(pair);
            }

            let mut gauge = proto::Gauge::default();
            gauge.set_value(sample.value);
            m.set_gauge(gauge);

            if sample.include_timestamp {
                if let Some(ts) = sample.timestamp {
                    m.set_timestamp_ms(ts.timestamp_millis());
                }
            }

            family.mut_metric().push(m);
        }

        families.push(family);
    }

    let encoder = TextEncoder::new();
    let mut buf = Vec::new();
    encoder
        .encode(&families, &mut buf)
        .context("encoding metric families")?;
    String::from_utf8(buf).context("metrics text is not UTF-8")
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

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
    fn test_registry_unions_keys() {
        let mut reg = LabelSetRegistry::default();
        reg.observe("metric1", ["label1"]);
        reg.observe("metric1", ["label2"]);

        let keys = reg.keys("metric1").expect("keys");
        assert_eq!(keys.len(), 2);
        assert!(keys.contains("label1"));
        assert!(keys.contains("label2"));
        assert!(reg.keys("metric2").is_none());
    }

    #[test]
    fn test_encode_text_basic() {
        let text = encode_text(&[sample(
            "aws_elasticache_cpuutilization_average",
            &[("name", "arn:x"), ("region", "us-east-1")],
            1.5,
        )])
        .expect("encode");

        assert!(text.contains("# TYPE aws_elasticache_cpuutilization_average gauge"));
        assert!(text
            .contains(r#"aws_elasticache_cpuutilization_average{name="arn:x",region="us-east-1"} 1.5"#));
    }

    #[test]
    fn test_encode_text_nan_round_trips() {
        let text = encode_text(&[sample("metric1", &[("label1", "value1")], f64::NAN)])
            .expect("encode");
        assert!(text.contains("NaN"));
    }

    #[test]
    fn test_encode_text_timestamp_only_when_included() {
        let ts = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();

        let mut with_ts = sample("metric1", &[], 4.0);
        with_ts.timestamp = Some(ts);
        with_ts.include_timestamp = true;

        let text = encode_text(&[with_ts]).expect("encode");
        assert!(text.contains(&format!("metric1 4 {}", ts.timestamp_millis())));

        let mut without = sample("metric2", &[], 4.0);
        without.timestamp = Some(ts);
        without.include_timestamp = false;

        let text = encode_text(&[without]).expect("encode");
        assert!(text.contains("metric2 4\n"));
    }

    #[test]
    fn test_encode_text_family_groups_by_first_occurrence() {
        let text = encode_text(&[
            sample("metric_b", &[("l", "1")], 1.0),
            sample("metric_a", &[("l", "1")], 2.0),
            sample("metric_b", &[("l", "2")], 3.0),
        ])
        .expect("encode");

        let b_pos = text.find("# TYPE metric_b").expect("metric_b family");
        let a_pos = text.find("# TYPE metric_a").expect("metric_a family");
        assert!(b_pos < a_pos);
    }
}
