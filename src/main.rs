use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use yace::aws::client::ClientFactory;
use yace::aws::retry::RetryPolicy;
use yace::config::Config;
use yace::export::http::MetricsServer;
use yace::export::telemetry::Telemetry;
use yace::export::SnapshotStore;
use yace::scrape::{self, Limiters, ScrapeOptions};

/// Prometheus exporter for CloudWatch metrics.
#[derive(Parser)]
#[command(name = "yace", about)]
struct Cli {
    /// Path to the YAML configuration file.
    #[arg(long = "config.file", default_value = "config.yml")]
    config_file: PathBuf,

    /// Address for the HTTP listener.
    #[arg(long = "listen-address", default_value = ":5000")]
    listen_address: String,

    /// Interval between scrapes.
    #[arg(long = "scraping-interval", default_value = "300s", value_parser = humantime::parse_duration)]
    scraping_interval: Duration,

    /// Enable debug logging regardless of LOG_LEVEL.
    #[arg(long)]
    debug: bool,

    /// Snake-case tag and dimension label keys.
    #[arg(long = "labels-snake-case")]
    labels_snake_case: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Print version information and exit.
    Version,
}

/// Build-time version info.
mod version {
    /// Release version string (set at build time).
    pub const RELEASE: &str = env!("CARGO_PKG_VERSION");

    /// Git commit hash (set at build time via env, or "unknown").
    pub fn git_commit() -> &'static str {
        option_env!("GIT_COMMIT").unwrap_or("unknown")
    }

    /// Full version string with platform info.
    pub fn full() -> String {
        format!(
            "{} (commit: {}, {}/{})",
            RELEASE,
            git_commit(),
            std::env::consts::OS,
            std::env::consts::ARCH,
        )
    }
}

fn init_logging(debug: bool) -> Result<()> {
    let level = if debug {
        "debug".to_string()
    } else {
        std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string())
    };

    let filter =
        EnvFilter::try_new(&level).with_context(|| format!("invalid log level: {level}"))?;

    let format = std::env::var("LOG_FORMAT").unwrap_or_else(|_| "text".to_string());
    match format.as_str() {
        "json" => tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_target(true)
            .init(),
        _ => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .init(),
    }

    Ok(())
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Some(Command::Version) = &cli.command {
        println!("yace {}", version::full());
        return ExitCode::SUCCESS;
    }

    if let Err(e) = init_logging(cli.debug) {
        eprintln!("yace: {e:#}");
        return ExitCode::from(1);
    }

    // Fatal configuration errors refuse startup.
    let cfg = match Config::load(&cli.config_file) {
        Ok(cfg) => cfg,
        Err(e) => {
            error!(error = format!("{e:#}"), "invalid configuration");
            return ExitCode::from(1);
        }
    };

    info!(
        version = version::RELEASE,
        commit = version::git_commit(),
        config = %cli.config_file.display(),
        "starting yace",
    );

    let rt = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("building tokio runtime")
    {
        Ok(rt) => rt,
        Err(e) => {
            error!(error = format!("{e:#}"), "runtime setup failed");
            return ExitCode::from(1);
        }
    };

    rt.block_on(run(cfg, cli))
}

async fn run(cfg: Config, cli: Cli) -> ExitCode {
    let cfg = Arc::new(cfg);
    let telemetry = match Telemetry::new() {
        Ok(t) => Arc::new(t),
        Err(e) => {
            error!(error = format!("{e:#}"), "telemetry setup failed");
            return ExitCode::from(1);
        }
    };
    let store = Arc::new(SnapshotStore::new());

    // Serve /healthy as "down" until the first scrape completes, but never
    // longer than twice the scrape interval afterwards.
    let server = MetricsServer::new(
        cli.listen_address.clone(),
        Arc::clone(&store),
        Arc::clone(&telemetry),
        2 * cli.scraping_interval,
    );

    if let Err(e) = server.start().await {
        error!(error = format!("{e:#}"), "binding HTTP listener failed");
        return ExitCode::from(2);
    }

    let cancel = tokio_util::sync::CancellationToken::new();

    // Shut down on SIGINT/SIGTERM.
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            let ctrl_c = tokio::signal::ctrl_c();
            #[cfg(unix)]
            {
                let mut sigterm =
                    tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                        .expect("failed to register SIGTERM handler");
                tokio::select! {
                    _ = ctrl_c => info!("received SIGINT, shutting down"),
                    _ = sigterm.recv() => info!("received SIGTERM, shutting down"),
                }
            }
            #[cfg(not(unix))]
            {
                let _ = ctrl_c.await;
                info!("received interrupt, shutting down");
            }
            cancel.cancel();
        });
    }

    let provider = Arc::new(ClientFactory::new(cfg.sts_region.clone()));
    let limiters = Arc::new(Limiters::from_config(&cfg));

    let opts = ScrapeOptions {
        labels_snake_case: cli.labels_snake_case,
        // Leave headroom so a slow scrape finishes before the next tick.
        deadline: cli.scraping_interval,
        retry: RetryPolicy::default(),
    };

    scrape::scrape_loop(
        cfg,
        provider,
        limiters,
        Arc::clone(&telemetry),
        Arc::clone(&store),
        cli.scraping_interval,
        opts,
        cancel.clone(),
    )
    .await;

    if let Err(e) = server.stop().await {
        error!(error = format!("{e:#}"), "stopping metrics server");
    }

    info!("yace stopped");

    ExitCode::SUCCESS
}
