//! Shelf-Ripple main entry point
//!
//! This is the command-line interface for the Shelf-Ripple price crawler.

use anyhow::Context;
use clap::Parser;
use std::path::{Path, PathBuf};
use shelf_ripple::config::{load_config_with_hash, Config};
use shelf_ripple::crawler::{crawl, RunParams};
use shelf_ripple::output::{load_statistics, print_run_report, print_statistics};
use shelf_ripple::sites::vtex_sources;
use shelf_ripple::storage::open_storage;
use shelf_ripple::CrawlError;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

/// Recent runs shown by --stats
const STATS_RUN_LIMIT: usize = 10;

/// Shelf-Ripple: a catalog price-ingestion crawler
///
/// Shelf-Ripple walks a retailer's catalog API category by category,
/// splitting categories the API cannot enumerate in full, and records
/// one timestamped price snapshot per listing per run.
#[derive(Parser, Debug)]
#[command(name = "shelf-ripple")]
#[command(version)]
#[command(about = "A catalog price-ingestion crawler", long_about = None)]
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

    /// Validate config and show what would be crawled without crawling
    #[arg(long, conflicts_with = "stats")]
    dry_run: bool,

    /// Show statistics from the database and exit
    #[arg(long, conflicts_with = "dry_run")]
    stats: bool,

    /// Timestamp for this run's snapshots (RFC 3339); defaults to now
    #[arg(long, value_name = "RFC3339")]
    captured_at: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    setup_logging(cli.verbose, cli.quiet);

    tracing::info!("Loading configuration from: {}", cli.config.display());
    let (config, config_hash) = load_config_with_hash(&cli.config)
        .with_context(|| format!("failed to load {}", cli.config.display()))?;
    tracing::info!("Configuration loaded successfully (hash: {})", config_hash);

    if cli.dry_run {
        handle_dry_run(&config);
    } else if cli.stats {
        handle_stats(&config)?;
    } else {
        let captured_at = captured_at(cli.captured_at.as_deref())?;
        handle_crawl(&config, config_hash, captured_at).await?;
    }

    Ok(())
}

/// Sets up the logging/tracing subscriber based on verbosity level
fn setup_logging(verbose: u8, quiet: bool) {
    let filter = if quiet {
        EnvFilter::new("error")
    } else {
        match verbose {
            0 => EnvFilter::new("shelf_ripple=info,warn"),
            1 => EnvFilter::new("shelf_ripple=debug,info"),
            2 => EnvFilter::new("shelf_ripple=trace,debug"),
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

/// Normalizes the `--captured-at` override, or stamps the current time
fn captured_at(requested: Option<&str>) -> anyhow::Result<String> {
    match requested {
        Some(text) => {
            let parsed = chrono::DateTime::parse_from_rfc3339(text)
                .with_context(|| format!("invalid --captured-at value: {}", text))?;
            Ok(parsed.with_timezone(&chrono::Utc).to_rfc3339())
        }
        None => Ok(chrono::Utc::now().to_rfc3339()),
    }
}

/// Handles the --dry-run mode: shows the planned crawl
fn handle_dry_run(config: &Config) {
    println!("=== Shelf-Ripple Dry Run ===\n");

    println!("Store:");
    println!("  Code: {}", config.store.code);
    println!("  Name: {}", config.store.display_name);
    println!("  Base URL: {}", config.store.base_url);
    println!("  Category tree depth: {}", config.store.tree_depth);

    println!("\nCrawler:");
    println!("  Fetch workers: {}", config.crawler.worker_count);
    println!("  Queue capacity: {}", config.crawler.queue_capacity);
    println!("  Page size: {}", config.crawler.page_size);
    println!("  Max offset: {}", config.crawler.max_offset);
    println!(
        "  Thresholds: {} empty pages, {} stagnant pages",
        config.crawler.empty_threshold, config.crawler.stagnation_threshold
    );
    println!(
        "  Max escalation depth: {}",
        config.crawler.max_escalation_depth
    );

    println!("\nSplitting:");
    println!("  Sales channels: {}", config.split.sales_channels.join(", "));
    println!("  Tokens: {}", config.split.tokens.len());
    println!("  Price ranges: {}", config.split.price_ranges.len());

    println!("\nWriter:");
    println!("  Batch size: {}", config.writer.batch_size);
    println!("  Commit interval: {}ms", config.writer.commit_interval_ms);
    println!(
        "  Row retries: {} (base backoff {}ms)",
        config.writer.max_row_retries, config.writer.row_backoff_ms
    );

    println!("\nOutput:");
    println!("  Database: {}", config.output.database_path);

    println!("\n✓ Configuration is valid");
}

/// Handles the --stats mode: shows statistics from the database
fn handle_stats(config: &Config) -> anyhow::Result<()> {
    println!("Database: {}\n", config.output.database_path);

    let storage = open_storage(Path::new(&config.output.database_path))
        .context("failed to open database")?;
    let stats = load_statistics(&storage, STATS_RUN_LIMIT)?;
    print_statistics(&stats);

    Ok(())
}

/// Handles the main crawl operation
async fn handle_crawl(config: &Config, config_hash: String, captured_at: String) -> anyhow::Result<()> {
    let storage = open_storage(Path::new(&config.output.database_path))
        .context("failed to open database")?;
    let sources = vtex_sources(config)?;

    let cancel = CancellationToken::new();
    let ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupt received; draining and stopping");
            ctrl_c.cancel();
        }
    });

    tracing::info!(
        "Crawling {} with {} workers",
        config.store.code,
        config.crawler.worker_count
    );

    let params = RunParams {
        captured_at,
        config_hash,
    };
    match crawl(config, sources, storage, params, cancel).await {
        Ok((_, report)) => {
            print_run_report(&report);
            Ok(())
        }
        Err(CrawlError::RunFailed { report, source }) => {
            print_run_report(&report);
            Err(anyhow::Error::new(*source).context(format!("run {} failed", report.run_id)))
        }
        Err(e) => Err(anyhow::Error::new(e).context("crawl failed")),
    }
}
