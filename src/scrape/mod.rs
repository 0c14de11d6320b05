//! Scrape orchestration: jobs × roles × regions fan-out.
//!
//! Every branch runs independently and failures stay contained to their
//! branch; the orchestrator collects whatever the branches produced,
//! renders, and assembles one consistent snapshot. Exceeding the scrape
//! deadline discards the whole pass.

pub mod discovery;
pub mod dimensions;
pub mod fetcher;
pub mod planner;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use chrono::Utc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::aws::client::ClientFactory;
use crate::aws::limit::RateLimits;
use crate::aws::retry::RetryPolicy;
use crate::aws::{Api, CloudwatchApi, TagApi};
use crate::config::{Config, DiscoveryJobConfig, RoleConfig, StaticJobConfig};
use crate::export::telemetry::Telemetry;
use crate::export::Snapshot;
use crate::model::{
    canonical_dimensions, CloudwatchDataResult, Dimension, ScrapeContext, Tag,
    TaggedResourceResult,
};
use crate::promutil::consistency::ensure_label_consistency_and_dedup;
use crate::promutil::migrate::{build_info_metrics, build_metrics};
use crate::promutil::LabelSetRegistry;

use self::dimensions::{DimensionFilter, QuerySource};
use self::fetcher::FetchLimits;

/// Builds the API clients for one (role, region) branch.
pub trait ClientProvider: Send + Sync {
    type Tags: TagApi + 'static;
    type Metrics: CloudwatchApi + 'static;

    fn branch(
        &self,
        role: &RoleConfig,
        region: &str,
    ) -> impl std::future::Future<Output = Result<BranchClients<Self::Tags, Self::Metrics>>> + Send;
}

/// Client pair plus the account identity behind it.
pub struct BranchClients<T, C> {
    pub tags: Arc<T>,
    pub cloudwatch: Arc<C>,
    pub account_id: String,
}

impl ClientProvider for ClientFactory {
    type Tags = crate::aws::client::AwsTagClient;
    type Metrics = crate::aws::client::AwsCloudwatchClient;

    async fn branch(
        &self,
        role: &RoleConfig,
        region: &str,
    ) -> Result<BranchClients<Self::Tags, Self::Metrics>> {
        let clients = self.for_branch(role, region).await?;
        Ok(BranchClients {
            tags: Arc::new(clients.tagging),
            cloudwatch: Arc::new(clients.cloudwatch),
            account_id: clients.account_id,
        })
    }
}

/// Shared concurrency envelope for one exporter instance.
pub struct Limiters {
    pub tag: Arc<Semaphore>,
    pub list_metrics: Arc<Semaphore>,
    pub cloudwatch: Arc<Semaphore>,
    pub rate: Arc<RateLimits>,
}

impl Limiters {
    pub fn from_config(cfg: &Config) -> Self {
        Self {
            tag: Arc::new(Semaphore::new(cfg.tag_concurrency)),
            list_metrics: Arc::new(Semaphore::new(cfg.list_metrics_concurrency)),
            cloudwatch: Arc::new(Semaphore::new(cfg.cloudwatch_concurrency)),
            rate: Arc::new(RateLimits::new(cfg.api_qps)),
        }
    }
}

/// Per-scrape options resolved from CLI flags.
#[derive(Debug, Clone, Copy)]
pub struct ScrapeOptions {
    pub labels_snake_case: bool,
    /// Whole-scrape deadline; an overrun discards the snapshot.
    pub deadline: Duration,
    pub retry: RetryPolicy,
}

/// Output of one branch: discovery results for info metrics and fetched
/// data for data metrics. Either half may be missing after a failure.
#[derive(Default)]
struct BranchOutput {
    resources: Option<TaggedResourceResult>,
    data: Option<CloudwatchDataResult>,
}

/// Runs one full scrape pass and assembles the snapshot.
pub async fn run_scrape<P>(
    cfg: Arc<Config>,
    provider: Arc<P>,
    limiters: Arc<Limiters>,
    telemetry: Arc<Telemetry>,
    opts: ScrapeOptions,
    cancel: CancellationToken,
) -> Result<Snapshot>
where
    P: ClientProvider + 'static,
{
    let started = std::time::Instant::now();

    let result = tokio::select! {
        _ = cancel.cancelled() => {
            bail!("scrape cancelled");
        }
        result = tokio::time::timeout(
            opts.deadline,
            scrape_pass(cfg, provider, limiters, Arc::clone(&telemetry), opts),
        ) => result,
    };

    telemetry
        .scrape_duration
        .observe(started.elapsed().as_secs_f64());

    match result {
        Ok(snapshot) => Ok(snapshot),
        Err(_) => {
            telemetry.scrape_errors.with_label_values(&["timeout"]).inc();
            bail!("scrape exceeded deadline of {:?}", opts.deadline);
        }
    }
}

async fn scrape_pass<P>(
    cfg: Arc<Config>,
    provider: Arc<P>,
    limiters: Arc<Limiters>,
    telemetry: Arc<Telemetry>,
    opts: ScrapeOptions,
) -> Snapshot
where
    P: ClientProvider + 'static,
{
    let deadline = Instant::now() + opts.deadline;
    let mut branches = JoinSet::new();

    for job in &cfg.discovery.jobs {
        for role in job.effective_roles() {
            for region in &job.regions {
                branches.spawn(discovery_branch(
                    job.clone(),
                    role.clone(),
                    region.clone(),
                    Arc::clone(&provider),
                    Arc::clone(&limiters),
                    Arc::clone(&telemetry),
                    cfg.metric_data_batch_size,
                    opts.retry,
                    deadline,
                ));
            }
        }
    }

    for job in &cfg.static_jobs {
        for role in job.effective_roles() {
            for region in &job.regions {
                branches.spawn(static_branch(
                    job.clone(),
                    role.clone(),
                    region.clone(),
                    Arc::clone(&provider),
                    Arc::clone(&limiters),
                    Arc::clone(&telemetry),
                    cfg.metric_data_batch_size,
                    opts.retry,
                    deadline,
                ));
            }
        }
    }

    let mut resource_results = Vec::new();
    let mut data_results = Vec::new();

    while let Some(joined) = branches.join_next().await {
        match joined {
            Ok(output) => {
                if let Some(resources) = output.resources {
                    resource_results.push(resources);
                }
                if let Some(data) = output.data {
                    data_results.push(data);
                }
            }
            Err(e) => warn!(error = %e, "scrape branch task join failed"),
        }
    }

    // Render and enforce the per-family label schema.
    let mut observed = LabelSetRegistry::default();
    let mut data_out = build_metrics(&data_results, opts.labels_snake_case, &mut observed);
    let info_out = build_info_metrics(&resource_results, opts.labels_snake_case, &mut observed);

    let dropped = data_out.dropped + info_out.dropped;
    if dropped > 0 {
        telemetry.render_dropped.inc_by(dropped as f64);
    }

    data_out.metrics.extend(info_out.metrics);
    let metrics = ensure_label_consistency_and_dedup(data_out.metrics, &observed);

    debug!(
        samples = metrics.len(),
        families = observed.len(),
        "scrape assembled",
    );

    Snapshot {
        metrics,
        scraped_at: Utc::now(),
    }
}

#[allow(clippy::too_many_arguments)]
async fn discovery_branch<P>(
    job: DiscoveryJobConfig,
    role: RoleConfig,
    region: String,
    provider: Arc<P>,
    limiters: Arc<Limiters>,
    telemetry: Arc<Telemetry>,
    batch_size: usize,
    retry: RetryPolicy,
    deadline: Instant,
) -> BranchOutput
where
    P: ClientProvider,
{
    let clients = match provider.branch(&role, &region).await {
        Ok(clients) => clients,
        Err(e) => {
            warn!(
                job = %job.namespace,
                region = %region,
                error = %e,
                "building branch clients failed",
            );
            telemetry
                .discovery_errors
                .with_label_values(&[job.namespace.as_str(), region.as_str(), ""])
                .inc();
            return BranchOutput::default();
        }
    };
    let account_id = clients.account_id.clone();
    let branch_labels = [job.namespace.as_str(), region.as_str(), account_id.as_str()];

    let context = ScrapeContext {
        region: region.clone(),
        account_id: account_id.clone(),
        custom_tags: job
            .custom_tags
            .iter()
            .map(|t| Tag::new(&t.key, &t.value))
            .collect(),
    };

    // Stage A: discovery, bounded by the tag semaphore.
    let discovered = {
        let _permit = match limiters.tag.acquire().await {
            Ok(p) => p,
            Err(_) => return BranchOutput::default(),
        };
        limiters
            .rate
            .acquire(&account_id, &region, Api::GetResources)
            .await;

        let filters = match discovery::SearchFilter::compile(&job.search_tags) {
            Ok(f) => f,
            Err(e) => {
                warn!(job = %job.namespace, error = %e, "invalid search tags");
                telemetry
                    .discovery_errors
                    .with_label_values(&branch_labels)
                    .inc();
                return BranchOutput::default();
            }
        };

        match discovery::discover_resources(clients.tags.as_ref(), &job.namespace, &filters).await
        {
            Ok(d) => d,
            Err(e) => {
                warn!(
                    job = %job.namespace,
                    region = %region,
                    error = %e,
                    "resource discovery failed",
                );
                telemetry
                    .discovery_errors
                    .with_label_values(&branch_labels)
                    .inc();
                return BranchOutput::default();
            }
        }
    };

    if discovered.dropped_missing_arn > 0 {
        telemetry
            .resources_missing_arn
            .with_label_values(&branch_labels)
            .inc_by(discovered.dropped_missing_arn as f64);
    }

    let resources = TaggedResourceResult {
        context: Some(context.clone()),
        resources: discovered.resources.clone(),
        include_context_on_info_metrics: job.include_context_on_info_metrics,
        emit_info_metrics: job.emit_info_metrics,
    };

    // Stage B: dimension resolution, bounded by the list-metrics semaphore
    // when it has to call ListMetrics.
    let resolution = {
        let _permit = if job.list_metrics_for_dimensions {
            limiters
                .rate
                .acquire(&account_id, &region, Api::ListMetrics)
                .await;
            match limiters.list_metrics.acquire().await {
                Ok(p) => Some(p),
                Err(_) => return BranchOutput::default(),
            }
        } else {
            None
        };

        let filters = match DimensionFilter::compile(&job.dimensions_regex) {
            Ok(f) => f,
            Err(e) => {
                warn!(job = %job.namespace, error = %e, "invalid dimension filters");
                telemetry
                    .list_metrics_errors
                    .with_label_values(&branch_labels)
                    .inc();
                return BranchOutput {
                    resources: Some(resources),
                    data: None,
                };
            }
        };

        match dimensions::resolve_dimensions(
            clients.cloudwatch.as_ref(),
            &job.namespace,
            &discovered.resources,
            &job.resolved_metrics(),
            job.list_metrics_for_dimensions,
            &filters,
            &job.exported_tags_on_metrics,
        )
        .await
        {
            Ok(r) => r,
            Err(e) => {
                warn!(
                    job = %job.namespace,
                    region = %region,
                    error = %e,
                    "listing metric dimensions failed",
                );
                telemetry
                    .list_metrics_errors
                    .with_label_values(&branch_labels)
                    .inc();
                return BranchOutput {
                    resources: Some(resources),
                    data: None,
                };
            }
        }
    };

    if resolution.skipped_no_dimensions > 0 {
        telemetry
            .resources_without_dimensions
            .with_label_values(&branch_labels)
            .inc_by(resolution.skipped_no_dimensions as f64);
    }

    // Stages C+D: plan and fetch.
    let data = fetch_branch_data(
        clients.cloudwatch,
        &resolution.sources,
        &account_id,
        &region,
        &limiters,
        batch_size,
        retry,
        deadline,
        &telemetry,
        &branch_labels,
    )
    .await
    .map(|data| CloudwatchDataResult {
        context: Some(context),
        data,
    });

    BranchOutput {
        resources: Some(resources),
        data,
    }
}

#[allow(clippy::too_many_arguments)]
async fn static_branch<P>(
    job: StaticJobConfig,
    role: RoleConfig,
    region: String,
    provider: Arc<P>,
    limiters: Arc<Limiters>,
    telemetry: Arc<Telemetry>,
    batch_size: usize,
    retry: RetryPolicy,
    deadline: Instant,
) -> BranchOutput
where
    P: ClientProvider,
{
    let clients = match provider.branch(&role, &region).await {
        Ok(clients) => clients,
        Err(e) => {
            warn!(job = %job.name, region = %region, error = %e, "building branch clients failed");
            telemetry
                .fetch_errors
                .with_label_values(&[job.name.as_str(), region.as_str(), ""])
                .inc();
            return BranchOutput::default();
        }
    };
    let account_id = clients.account_id.clone();
    let branch_labels = [job.name.as_str(), region.as_str(), account_id.as_str()];

    let context = ScrapeContext {
        region: region.clone(),
        account_id: account_id.clone(),
        custom_tags: job
            .custom_tags
            .iter()
            .map(|t| Tag::new(&t.key, &t.value))
            .collect(),
    };

    let sources = static_sources(&job);

    let data = fetch_branch_data(
        clients.cloudwatch,
        &sources,
        &account_id,
        &region,
        &limiters,
        batch_size,
        retry,
        deadline,
        &telemetry,
        &branch_labels,
    )
    .await
    .map(|data| CloudwatchDataResult {
        context: Some(context),
        data,
    });

    BranchOutput {
        resources: None,
        data,
    }
}

/// Builds planner sources for a static job's fixed dimension set.
fn static_sources(job: &StaticJobConfig) -> Vec<QuerySource> {
    let dimensions = canonical_dimensions(
        job.dimensions
            .iter()
            .map(|d| Dimension::new(&d.name, &d.value))
            .collect(),
    );

    job.resolved_metrics()
        .into_iter()
        .map(|metric| QuerySource {
            resource_name: job.name.clone(),
            exported_tags: Vec::new(),
            namespace: job.namespace.clone(),
            metric,
            dimensions: dimensions.clone(),
        })
        .collect()
}

#[allow(clippy::too_many_arguments)]
async fn fetch_branch_data<C>(
    cloudwatch: Arc<C>,
    sources: &[QuerySource],
    account_id: &str,
    region: &str,
    limiters: &Limiters,
    batch_size: usize,
    retry: RetryPolicy,
    deadline: Instant,
    telemetry: &Telemetry,
    branch_labels: &[&str; 3],
) -> Option<Vec<crate::model::CloudwatchData>>
where
    C: CloudwatchApi + 'static,
{
    if sources.is_empty() {
        return Some(Vec::new());
    }

    let batches = planner::plan_queries(sources, batch_size);
    let limits = FetchLimits {
        concurrency: Arc::clone(&limiters.cloudwatch),
        rate: Arc::clone(&limiters.rate),
        retry,
        deadline,
    };

    match fetcher::fetch_data(cloudwatch, batches, account_id, region, &limits).await {
        Ok(data) => Some(data),
        Err(e) => {
            warn!(region = %region, error = %e, "metric data fetch failed");
            if e.is_throttle() {
                telemetry.throttled.with_label_values(branch_labels).inc();
            }
            telemetry
                .fetch_errors
                .with_label_values(branch_labels)
                .inc();
            None
        }
    }
}

/// Drives scrapes on an interval, publishing snapshots to the store.
pub async fn scrape_loop<P>(
    cfg: Arc<Config>,
    provider: Arc<P>,
    limiters: Arc<Limiters>,
    telemetry: Arc<Telemetry>,
    store: Arc<crate::export::SnapshotStore>,
    interval: Duration,
    opts: ScrapeOptions,
    cancel: CancellationToken,
) where
    P: ClientProvider + 'static,
{
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = ticker.tick() => {
                let result = run_scrape(
                    Arc::clone(&cfg),
                    Arc::clone(&provider),
                    Arc::clone(&limiters),
                    Arc::clone(&telemetry),
                    opts,
                    cancel.clone(),
                )
                .await
                .context("running scrape");

                let now = Utc::now();
                store.mark_completed(now);
                telemetry.last_scrape_timestamp.set(now.timestamp() as f64);

                match result {
                    Ok(snapshot) => {
                        debug!(samples = snapshot.metrics.len(), "snapshot published");
                        store.publish(snapshot);
                    }
                    Err(e) => {
                        // Stale data keeps serving; only the counter moves.
                        warn!(error = %e, "scrape failed, keeping last snapshot");
                    }
                }
            }
        }
    }
}
