//! Station-Harvester main entry point
//!
//! This is the command-line interface for the Station-Harvester catalog harvester.

use anyhow::Context;
use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use station_harvester::config::{load_config_with_hash, Config};
use station_harvester::harvester::{Harvester, HttpSource, RunContext};
use station_harvester::history::{self, Selection};
use station_harvester::output::{evaluate, print_statistics};
use station_harvester::storage::EntityStore;
use tracing_subscriber::EnvFilter;

/// Exit code for errors that prevent an invocation from running at all
const EXIT_FATAL: u8 = 2;

/// Station-Harvester: a resumable, budget-bounded catalog harvester
///
/// Each invocation fetches a bounded number of station details, checkpoints
/// its progress, and resumes unfinished runs on the next invocation. The exit
/// code is non-zero when too many stations failed permanently.
#[derive(Parser, Debug)]
#[command(name = "station-harvester")]
#[command(version)]
#[command(about = "A resumable, budget-bounded catalog harvester", long_about = None)]
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

    /// Start a fresh cycle, ignoring previous runs
    #[arg(long)]
    fresh: bool,

    /// Validate config and show what the next invocation would do without fetching
    #[arg(long, conflicts_with = "stats")]
    dry_run: bool,

    /// Show statistics of the newest run and exit
    #[arg(long, conflicts_with = "dry_run")]
    stats: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    setup_logging(cli.verbose, cli.quiet);

    tracing::info!("Loading configuration from: {}", cli.config.display());
    let config = match load_config_with_hash(&cli.config) {
        Ok((config, hash)) => {
            tracing::info!("Configuration loaded successfully (hash: {})", hash);
            config
        }
        Err(e) => {
            tracing::error!("Failed to load configuration: {}", e);
            return ExitCode::from(EXIT_FATAL);
        }
    };

    let result = if cli.dry_run {
        handle_dry_run(&config, cli.fresh).map(|()| 0)
    } else if cli.stats {
        handle_stats(&config).map(|()| 0)
    } else {
        handle_harvest(config, cli.fresh).await
    };

    match result {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            tracing::error!("{:#}", e);
            ExitCode::from(EXIT_FATAL)
        }
    }
}

/// Sets up the logging/tracing subscriber based on verbosity level
fn setup_logging(verbose: u8, quiet: bool) {
    let filter = if quiet {
        EnvFilter::new("error")
    } else {
        match verbose {
            0 => EnvFilter::new("station_harvester=info,warn"),
            1 => EnvFilter::new("station_harvester=debug,info"),
            2 => EnvFilter::new("station_harvester=trace,debug"),
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

/// Handles the --dry-run mode: shows configuration and the selection decision
fn handle_dry_run(config: &Config, fresh: bool) -> anyhow::Result<()> {
    let ctx = RunContext::from_config(config);
    let settings = &ctx.settings;

    println!("=== Station-Harvester Dry Run ===\n");

    println!("Budgets:");
    println!("  Max requests: {}", settings.max_requests);
    println!("  Max minutes: {}", settings.max_minutes);
    println!("  Request delay: {}ms", settings.request_delay_ms);
    println!("  Request timeout: {}s", settings.request_timeout_secs);
    println!("  Checkpoint every: {} entities", settings.checkpoint_interval);

    println!("\nPolicy:");
    println!("  Max retries: {}", settings.max_retries);
    println!(
        "  Failure threshold: {}%",
        settings.failure_threshold_percent
    );
    println!("  Min interval: {} day(s)", settings.min_interval_days);
    println!("  History kept: {} run(s)", settings.max_history);

    println!("\nSource:");
    println!("  Listing: {}", config.source.list_url);
    println!("  Detail: {}", config.source.detail_url);
    println!("  User agent: {}", config.source.user_agent);

    println!("\nOutput:");
    println!("  Data directory: {}", config.output.data_dir);
    println!("  Published alias: {}", ctx.layout.latest_path().display());

    let selection = history::select_run(&ctx.layout, settings, ctx.now(), fresh)
        .context("Failed to inspect run history")?;

    println!("\n✓ Configuration is valid");
    match selection {
        Selection::Fresh => println!("✓ Would fetch the listing and start a fresh cycle"),
        Selection::Resume { run, store } => {
            let queue = store.work_queue(&ctx.policy());
            println!(
                "✓ Would resume run {} with {} eligible entities (at most {} this invocation)",
                run,
                queue.len(),
                queue.len().min(settings.max_requests as usize)
            );
        }
        Selection::UpToDate { run, age_days, .. } => println!(
            "✓ Run {} is healthy and {} day(s) old; would fetch nothing",
            run, age_days
        ),
    }

    Ok(())
}

/// Handles the --stats mode: shows statistics of the newest run
fn handle_stats(config: &Config) -> anyhow::Result<()> {
    let ctx = RunContext::from_config(config);

    println!("Data directory: {}\n", config.output.data_dir);

    let runs = ctx
        .layout
        .list_runs()
        .context("Failed to list run history")?;
    let Some(&newest) = runs.first() else {
        println!("No runs found");
        return Ok(());
    };

    let store = EntityStore::load(&ctx.layout.state_path(newest))
        .with_context(|| format!("Failed to load run {}", newest))?;
    let summary = evaluate(
        &store,
        &ctx.policy(),
        ctx.settings.failure_threshold_percent,
    );

    print_statistics(newest, &summary);
    println!("\nRuns on disk: {}", runs.len());

    Ok(())
}

/// Handles the main harvest operation and returns the process exit code
async fn handle_harvest(config: Config, fresh: bool) -> anyhow::Result<u8> {
    let ctx = RunContext::from_config(&config);
    let source = HttpSource::new(&config.source, ctx.settings.request_timeout())
        .context("Failed to build HTTP client")?;

    let harvester = Harvester::with_default_normalizer(ctx, source).force_fresh(fresh);
    let report = harvester.run().await.context("Harvest failed")?;

    tracing::info!(
        "Invocation finished: {:?} run {}, {} attempts ({:?}), outcome {:?}",
        report.action,
        report.run,
        report.attempted,
        report.stop,
        report.outcome()
    );

    Ok(report.exit_code())
}
