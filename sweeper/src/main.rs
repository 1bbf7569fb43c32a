//! Sweeper - Main entry point
//!
//! Opens a drill-down browser over a directory tree. Sizes (or file counts)
//! of every shown entry are resolved in the background while the console
//! stays responsive.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use sweeper::console;
use sweeper::store::LocalStore;
use sweeper::{NavigationChain, ResolutionPool};
use sweeper_common::config::{
    load_toml_config, log_directives, CliOverrides, SweeperConfig,
};
use sweeper_common::MetricKind;
use tokio::io::BufReader;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, reload, util::SubscriberInitExt, EnvFilter};

/// Command-line arguments for sweeper
#[derive(Parser, Debug)]
#[command(name = "sweeper")]
#[command(about = "Find out where the space went, one level at a time")]
#[command(version)]
struct Args {
    /// Directory to open
    root: Option<PathBuf>,

    /// Metric to show: bytes_used or file_count
    #[arg(short, long)]
    metric: Option<MetricKind>,

    /// Number of metric queries allowed to run at once
    #[arg(short, long)]
    workers: Option<usize>,

    /// Config file (defaults to the platform config dir)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log level when RUST_LOG is unset
    #[arg(long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize tracing before anything can log. Without RUST_LOG the level
    // starts from --log-level and is switched once the config file is read.
    let env_filter = EnvFilter::try_from_default_env().ok();
    let from_env = env_filter.is_some();
    let bootstrap_level = args.log_level.clone().unwrap_or_else(|| "info".to_string());
    let (filter, filter_handle) = reload::Layer::new(
        env_filter.unwrap_or_else(|| EnvFilter::new(log_directives(&bootstrap_level))),
    );
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let file = load_toml_config(args.config.as_deref()).context("Failed to load config file")?;
    let config = SweeperConfig::resolve(
        &CliOverrides {
            root_path: args.root,
            metric: args.metric,
            workers: args.workers,
            log_level: args.log_level,
        },
        &file,
    )
    .context("Invalid configuration")?;

    if !from_env && config.log_level != bootstrap_level {
        filter_handle
            .reload(EnvFilter::new(log_directives(&config.log_level)))
            .context("Failed to apply configured log level")?;
    }

    info!("Root: {}", config.root_path.display());
    info!("Metric: {}, workers: {}", config.metric, config.workers);

    let pool = Arc::new(ResolutionPool::new(config.workers));
    let store = Arc::new(LocalStore::new());
    let mut chain = NavigationChain::open(
        store,
        &config.root_path.to_string_lossy(),
        config.metric,
        Arc::clone(&pool),
    )
    .await
    .with_context(|| format!("Failed to open {}", config.root_path.display()))?;

    let stdin = BufReader::new(tokio::io::stdin());
    let result = console::run(&mut chain, config.metric, stdin, tokio::io::stdout()).await;

    chain.close();
    pool.shutdown().await;
    info!("Shutdown complete");

    result.context("Console error")
}
