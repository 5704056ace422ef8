//! Sumi-Trawl main entry point
//!
//! This is the command-line interface for the Sumi-Trawl content harvester.

use anyhow::Context;
use clap::Parser;
use std::path::PathBuf;
use sumi_trawl::config::{load_config_with_hash, Config, FrontierMode};
use sumi_trawl::crawler::Coordinator;
use sumi_trawl::output::print_report;
use sumi_trawl::seed::{SeedPlan, SeedSource};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

/// Sumi-Trawl: a frontier-driven content harvester
///
/// Sumi-Trawl drains a deduplicated frontier of targets through a bounded
/// pool of workers, follows the targets found in each response, and appends
/// the extracted records to a JSON-lines file.
#[derive(Parser, Debug)]
#[command(name = "sumi-trawl")]
#[command(version)]
#[command(about = "A frontier-driven content harvester", long_about = None)]
struct Cli {
    /// Path to TOML configuration file
    #[arg(value_name = "CONFIG")]
    config: PathBuf,

    /// Increase logging verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,

    /// Validate config and show what would be crawled without actually crawling
    #[arg(long, conflicts_with = "seed_only")]
    dry_run: bool,

    /// Push the seed targets into the shared frontier and exit
    #[arg(long, conflicts_with = "dry_run")]
    seed_only: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Setup logging based on verbosity
    setup_logging(cli.verbose, cli.quiet);

    // Load and validate configuration
    tracing::info!("Loading configuration from: {}", cli.config.display());
    let (config, config_hash) = load_config_with_hash(&cli.config)
        .with_context(|| format!("failed to load {}", cli.config.display()))?;
    tracing::info!("Configuration loaded successfully (hash: {})", config_hash);

    if cli.dry_run {
        handle_dry_run(&config);
        return Ok(());
    }

    let cancel = CancellationToken::new();
    spawn_interrupt_handler(cancel.clone());

    if cli.seed_only {
        handle_seed_only(config, cancel).await
    } else {
        handle_crawl(config, cancel).await
    }
}

/// Sets up the logging/tracing subscriber based on verbosity level
fn setup_logging(verbose: u8, quiet: bool) {
    let filter = if quiet {
        // Only show errors
        EnvFilter::new("error")
    } else {
        match verbose {
            0 => EnvFilter::new("sumi_trawl=info,warn"),
            1 => EnvFilter::new("sumi_trawl=debug,info"),
            2 => EnvFilter::new("sumi_trawl=trace,debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .init();
}

/// Cancels the run on the first Ctrl-C
fn spawn_interrupt_handler(cancel: CancellationToken) {
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                tracing::warn!("Interrupt received, stopping (queued records will be written)");
                cancel.cancel();
            }
            Err(e) => tracing::error!("Cannot listen for Ctrl-C: {}", e),
        }
    });
}

/// Handles the --dry-run mode: shows what would be crawled
fn handle_dry_run(config: &Config) {
    println!("=== Sumi-Trawl Dry Run ===\n");

    let crawler = &config.crawler;
    println!("Crawler Configuration:");
    println!("  Concurrency: {}", crawler.concurrency);
    println!("  Workers: {}", crawler.worker_count());
    println!("  Request timeout: {}s", crawler.request_timeout_secs);
    println!(
        "  Retries: {} (back-off {}ms, capped at {}ms)",
        crawler.max_retries, crawler.backoff_ms, crawler.max_backoff_ms
    );
    println!("  Queue policy: {:?}", crawler.queue_policy);
    match crawler.rate_limit() {
        Some(rate) => println!("  Rate limit: {} requests/s", rate),
        None => println!("  Rate limit: none"),
    }

    println!("\nFrontier:");
    match config.frontier.mode {
        FrontierMode::Local => println!("  Mode: local"),
        FrontierMode::Shared => {
            println!("  Mode: shared ({})", config.frontier.redis_url);
            println!("  Queue key: {}", config.frontier.queue_key);
            println!("  Seen key: {}", config.frontier.seen_key);
        }
    }

    println!("\nTarget:");
    match &config.target.url_template {
        Some(template) => println!("  URL template: {}", template),
        None => println!("  URL template: (targets are URLs)"),
    }
    if let Some(param) = &config.target.id_param {
        println!("  ID parameter: {}", param);
    }
    println!("  Signed: {}", config.target.sign);

    println!("\nIdentity:");
    println!("  User agents: {}", config.identity.user_agents.len());
    println!("  Proxies: {}", config.identity.proxies.len());

    println!("\nOutput:");
    println!("  Records: {}", config.output.records_path);

    let plan = SeedPlan::from_config(&config.seed);
    println!("\nSeed Sources ({}):", plan.sources.len());
    for source in &plan.sources {
        match source {
            SeedSource::Urls(urls) => {
                println!("  - {} URLs", urls.len());
                for url in urls.iter().take(10) {
                    println!("    * {}", url);
                }
            }
            SeedSource::Range { start, end } => println!("  - IDs {}..={}", start, end),
            SeedSource::Pages {
                template,
                first,
                count,
            } => println!("  - {} pages of {} from {}", count, template, first),
        }
    }

    println!("\n✓ Configuration is valid");
    println!("✓ Would start crawling with {} seed targets", plan.len());
}

/// Handles the --seed-only mode: feeds a shared frontier
async fn handle_seed_only(config: Config, cancel: CancellationToken) -> anyhow::Result<()> {
    let coordinator = Coordinator::new(config).await?;
    let summary = coordinator
        .seed_only(cancel)
        .await
        .context("seeding the shared frontier failed")?;

    println!(
        "Seeded {} targets ({} new){}",
        summary.offered,
        summary.admitted,
        if summary.cancelled { ", stopped early" } else { "" }
    );
    Ok(())
}

/// Handles the main crawl operation
async fn handle_crawl(config: Config, cancel: CancellationToken) -> anyhow::Result<()> {
    tracing::info!("Records will be appended to {}", config.output.records_path);

    let coordinator = Coordinator::new(config).await?;
    match coordinator.run(cancel).await {
        Ok(report) => {
            tracing::info!("Crawl completed successfully");
            print_report(&report);
            Ok(())
        }
        Err(e) => {
            tracing::error!("Crawl failed: {}", e);
            Err(e.into())
        }
    }
}
