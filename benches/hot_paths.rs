use criterion::{black_box, criterion_group, criterion_main, Criterion};

use yace::config::ResolvedMetric;
use yace::model::Dimension;
use yace::promutil::consistency::ensure_label_consistency_and_dedup;
use yace::promutil::snake::{build_metric_name, prom_string};
use yace::promutil::{LabelSetRegistry, PrometheusMetric};
use yace::scrape::dimensions::QuerySource;
use yace::scrape::planner::plan_queries;

fn build_sources(n: usize) -> Vec<QuerySource> {
    (0..n)
        .map(|i| QuerySource {
            resource_name: format!("arn:aws:elasticache:us-east-1:123456789012:cluster:c{i}"),
            exported_tags: vec![],
            namespace: "AWS/ElastiCache".to_string(),
            metric: ResolvedMetric {
                name: "CPUUtilization".to_string(),
                statistics: vec!["Average".to_string(), "Maximum".to_string()],
                period: 300,
                length: 600,
                delay: 0,
                nil_to_zero: true,
                add_cloudwatch_timestamp: false,
            },
            dimensions: vec![Dimension::new("CacheClusterId", format!("c{i}"))],
        })
        .collect()
}

fn build_samples(n: usize) -> (Vec<PrometheusMetric>, LabelSetRegistry) {
    let mut observed = LabelSetRegistry::default();
    observed.observe(
        "aws_elasticache_cpuutilization_average",
        ["name", "region", "account_id", "dimension_CacheClusterId"],
    );

    let samples = (0..n)
        .map(|i| PrometheusMetric {
            name: "aws_elasticache_cpuutilization_average".to_string(),
            labels: [
                ("name".to_string(), format!("arn:c{i}")),
                ("region".to_string(), "us-east-1".to_string()),
            ]
            .into_iter()
            .collect(),
            value: i as f64,
            timestamp: None,
            include_timestamp: false,
        })
        .collect();

    (samples, observed)
}

fn bench_suite(c: &mut Criterion) {
    c.bench_function("prom_string_camel", |b| {
        b.iter(|| prom_string(black_box("NetworkPacketsInFromSource")))
    });

    c.bench_function("build_metric_name", |b| {
        b.iter(|| {
            build_metric_name(
                black_box("AWS/ElastiCache"),
                black_box("CPUUtilization"),
                black_box("Average"),
            )
        })
    });

    let sources = build_sources(1_000);
    c.bench_function("plan_queries_1k_resources", |b| {
        b.iter(|| plan_queries(black_box(&sources), 500))
    });

    c.bench_function("label_consistency_4k_samples", |b| {
        b.iter_batched(
            || build_samples(4_000),
            |(samples, observed)| ensure_label_consistency_and_dedup(samples, &observed),
            criterion::BatchSize::SmallInput,
        )
    });
}

criterion_group!(benches, bench_suite);
criterion_main!(benches);
