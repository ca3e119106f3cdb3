//! Bnmp-Harvest main entry point
//!
//! This is the command-line interface for the BNMP portal harvester.

use anyhow::Context;
use bnmp_harvest::{
    BnmpClient, Checkpoint, ConfigError, HarvestConfig, HarvestController, HarvestStore, Interrupt,
};
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

/// Bnmp-Harvest: a resumable harvester for the BNMP warrant portal
///
/// Bnmp-Harvest walks every state and municipality in the portal, persists
/// each raw result page exactly once, and downloads one PDF certificate per
/// discovered record. Session cookies from an authenticated browser session
/// must be exported to a file first.
#[derive(Parser, Debug)]
#[command(name = "bnmp-harvest")]
#[command(version = "1.0.0")]
#[command(about = "A resumable harvester for the BNMP warrant portal", long_about = None)]
struct Cli {
    /// Path to the exported session cookies file
    #[arg(long, default_value = "cookies.json", value_name = "FILE")]
    cookies_file: PathBuf,

    /// Directory for raw pages, PDFs, and listings
    #[arg(long, default_value = "data-raw", value_name = "DIR")]
    data_dir: PathBuf,

    /// Records to request per page (the server may settle on fewer)
    #[arg(long, default_value_t = 30)]
    page_size: u32,

    /// Most records to collect from a single search scope
    #[arg(long, default_value_t = 10_000)]
    max_results: u64,

    /// Seconds to wait after each successful request
    #[arg(long, default_value_t = 0.5)]
    delay: f64,

    /// Concurrent workers for page fetches and certificate downloads
    #[arg(long, default_value_t = 1)]
    workers: usize,

    /// Resume from this state id, skipping earlier states
    #[arg(long, value_name = "STATE_ID")]
    start_state: Option<i64>,

    /// Resume from this municipality id within the starting state
    #[arg(long, value_name = "MUNICIPALITY_ID", requires = "start_state")]
    start_municipality: Option<i64>,

    /// Descend into municipalities even for states under the result cap
    #[arg(long)]
    no_skip_small: bool,

    /// Increase logging verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Setup logging based on verbosity
    setup_logging(cli.verbose, cli.quiet);

    let config = match build_config(&cli) {
        Ok(config) => config,
        Err(e) => {
            tracing::error!("Invalid options: {}", e);
            return Err(e.into());
        }
    };

    tracing::info!("Data directory: {}", config.data_dir.display());
    tracing::info!(
        "Page size: {}, max results per scope: {}",
        config.page_size,
        config.max_results_per_scope
    );
    tracing::info!(
        "Request delay: {:?}, workers: {}",
        config.request_delay,
        config.workers
    );
    if let Some(checkpoint) = config.resume_from {
        tracing::info!("Resuming from {}", checkpoint);
    }

    // Load session credentials and build the portal client
    tracing::info!("Loading session credentials from: {}", cli.cookies_file.display());
    let client = match BnmpClient::builder().credential_file(&cli.cookies_file).build() {
        Ok(client) => client,
        Err(e) => {
            tracing::error!("Failed to build portal client: {}", e);
            return Err(e.into());
        }
    };
    if client.fingerprint().is_some() {
        tracing::info!("Fingerprint header present");
    } else {
        tracing::warn!("No fingerprint in the credential file; the portal may reject requests");
    }

    let store = HarvestStore::open(&config.data_dir)
        .await
        .context("failed to prepare data directories")?;

    // Ctrl-C stops between scopes instead of killing requests mid-flight
    let interrupt = Interrupt::new();
    {
        let interrupt = interrupt.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("Interrupt received, finishing in-flight work");
                interrupt.trigger();
            }
        });
    }

    let controller = HarvestController::new(client, store, config, interrupt)?;
    let report = match controller.run().await {
        Ok(report) => report,
        Err(e) => {
            tracing::error!("Harvest failed: {}", e);
            return Err(e.into());
        }
    };

    println!("\n=== Harvest Summary ===");
    println!("States completed:   {}", report.states_processed);
    println!("Scopes swept:       {}", report.scopes_processed);
    println!("Records discovered: {}", report.records_discovered);
    println!("Failed pages:       {}", report.failed_pages);
    println!(
        "Certificates:       {} downloaded, {} skipped, {} errors",
        report.certificates.downloaded, report.certificates.skipped, report.certificates.errors
    );

    if let Some(checkpoint) = report.resume_hint {
        println!("\nHarvest did not finish. To resume:");
        match checkpoint.municipality_id {
            Some(municipality_id) => println!(
                "  bnmp-harvest --start-state {} --start-municipality {}",
                checkpoint.state_id, municipality_id
            ),
            None => println!("  bnmp-harvest --start-state {}", checkpoint.state_id),
        }
        std::process::exit(1);
    }

    println!("\n✓ Harvest complete");
    Ok(())
}

/// Sets up the logging/tracing subscriber based on verbosity level
fn setup_logging(verbose: u8, quiet: bool) {
    let filter = if quiet {
        // Only show errors
        EnvFilter::new("error")
    } else {
        match verbose {
            0 => EnvFilter::new("bnmp_harvest=info,warn"),
            1 => EnvFilter::new("bnmp_harvest=debug,info"),
            2 => EnvFilter::new("bnmp_harvest=trace,debug"),
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

/// Turns command-line options into a harvest configuration
fn build_config(cli: &Cli) -> Result<HarvestConfig, ConfigError> {
    if !cli.delay.is_finite() || cli.delay < 0.0 {
        return Err(ConfigError::Validation(format!(
            "delay must be a non-negative number of seconds, got {}",
            cli.delay
        )));
    }

    let resume_from = cli.start_state.map(|state_id| Checkpoint {
        state_id,
        municipality_id: cli.start_municipality,
    });

    let config = HarvestConfig {
        data_dir: cli.data_dir.clone(),
        page_size: cli.page_size,
        max_results_per_scope: cli.max_results,
        request_delay: Duration::from_secs_f64(cli.delay),
        workers: cli.workers,
        skip_small_states: !cli.no_skip_small,
        resume_from,
    };
    config.validate()?;
    Ok(config)
}
