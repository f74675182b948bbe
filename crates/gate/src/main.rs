//! Certgate - Main entry point
//!
//! On-demand TLS certificate admission gate for reverse proxies.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{error, info, warn};

use certgate::reload::POLICY_REFRESH_INTERVAL;
use certgate::{
    AbuseTracker, DecisionEngine, GateMetrics, GateState, PolicyReloader, PolicyStore,
    SignalManager, SignalType,
};
use certgate_config::Config;

/// How often idle client windows are swept from the abuse tracker
const TRACKER_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Certgate - on-demand TLS certificate admission gate
#[derive(Parser, Debug)]
#[command(name = "certgate")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Configuration file path
    #[arg(short = 'c', long = "config", env = "CERTGATE_CONFIG")]
    config: Option<String>,

    /// Test configuration and exit
    #[arg(short = 't', long = "test")]
    test: bool,

    /// Enable verbose logging (debug level)
    #[arg(long = "verbose")]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Validate configuration file and exit
    Test {
        /// Configuration file to test
        #[arg(short = 'c', long = "config")]
        config: Option<String>,
    },
    /// Run the admission gate (default)
    Run {
        /// Configuration file path
        #[arg(short = 'c', long = "config")]
        config: Option<String>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    if cli.test {
        return test_config(cli.config.as_deref());
    }

    match cli.command {
        Some(Commands::Test { config }) => test_config(config.as_deref().or(cli.config.as_deref())),
        Some(Commands::Run { config }) => run_server(config.or(cli.config), cli.verbose),
        None => run_server(cli.config, cli.verbose),
    }
}

/// Test configuration file and exit
fn test_config(config_path: Option<&str>) -> Result<()> {
    tracing_subscriber::fmt()
        .with_target(false)
        .with_level(true)
        .init();

    let config = load_config(config_path)?;

    let result = config
        .validate()
        .context("Configuration validation failed")?;

    for warning in &result.warnings {
        warn!("{}", warning.message);
    }
    for err in &result.errors {
        error!("{}", err);
    }
    if !result.is_ok() {
        anyhow::bail!("configuration test failed with {} error(s)", result.errors.len());
    }

    // Prove the effective policy set loads, including any policy file
    let entries = config
        .load_policy_entries()
        .context("Failed to load policy entries")?;

    info!("Configuration test successful:");
    info!("  - listener {}", config.listener.address);
    info!("  - {} policy entry(ies)", entries.len());
    info!(
        "  - rate limit {}/client, {} global per {}s",
        config.rate_limit.per_client, config.rate_limit.global, config.rate_limit.window_secs
    );

    println!(
        "certgate: configuration file {} test is successful",
        config_path.unwrap_or("(defaults)")
    );

    Ok(())
}

/// Run the admission gate
fn run_server(config_path: Option<String>, verbose: bool) -> Result<()> {
    let log_level = if verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level)),
        )
        .init();

    let effective_config_path = config_path.or_else(|| std::env::var("CERTGATE_CONFIG").ok());

    match &effective_config_path {
        Some(path) => info!("Loading configuration from: {}", path),
        None => info!("No configuration specified, using defaults"),
    }

    let config = load_config(effective_config_path.as_deref())?;

    let validation = config
        .validate()
        .context("Configuration validation failed")?;
    for warning in &validation.warnings {
        warn!("{}", warning.message);
    }
    if !validation.is_ok() {
        for err in &validation.errors {
            error!("{}", err);
        }
        anyhow::bail!("refusing to start with invalid configuration");
    }

    let addr: SocketAddr = config
        .listener
        .address
        .parse()
        .with_context(|| format!("Invalid listener address '{}'", config.listener.address))?;

    let entries = config
        .load_policy_entries()
        .context("Failed to load policy entries")?;

    let metrics = Arc::new(GateMetrics::new());
    let store = Arc::new(PolicyStore::new(&entries));
    let tracker = Arc::new(AbuseTracker::new(
        Duration::from_secs(config.rate_limit.window_secs),
        config.rate_limit.max_tracked_clients,
    ));
    let engine = Arc::new(DecisionEngine::new(
        Arc::clone(&store),
        Arc::clone(&tracker),
        Arc::clone(&metrics),
        config.rate_limit.per_client,
        config.rate_limit.global,
    ));

    let state = Arc::new(GateState {
        engine,
        metrics: Arc::clone(&metrics),
        ask_timeout: Duration::from_millis(config.listener.ask_timeout_ms),
        trust_forwarded: config.listener.trust_forwarded_header,
    });

    let reloader = Arc::new(PolicyReloader::new(
        config,
        Arc::clone(&store),
        Arc::clone(&metrics),
    ));

    let runtime = tokio::runtime::Runtime::new()?;

    runtime.block_on(async {
        spawn_signal_loop(Arc::clone(&reloader))?;

        if reloader.has_policy_file() {
            tokio::spawn(Arc::clone(&reloader).run_periodic(POLICY_REFRESH_INTERVAL));
        }

        spawn_tracker_sweeper(Arc::clone(&tracker), Arc::clone(&metrics));

        info!("Certgate started successfully");
        info!("Policy hot reload enabled (SIGHUP)");

        certgate::server::run(state, addr).await
    })
}

/// Load configuration from a path or fall back to defaults
fn load_config(path: Option<&str>) -> Result<Config> {
    match path {
        Some(path) => Config::from_file(path).context("Failed to load configuration file"),
        None => Ok(Config::default()),
    }
}

/// Bridge OS signals into reload/shutdown actions
fn spawn_signal_loop(reloader: Arc<PolicyReloader>) -> Result<()> {
    let signals = SignalManager::install().context("Failed to register signal handlers")?;

    tokio::task::spawn_blocking(move || {
        while let Some(signal) = signals.recv_blocking() {
            match signal {
                SignalType::Reload => {
                    info!("Received SIGHUP, reloading policy set");
                    reloader.reload_tracked();
                }
                SignalType::Shutdown => {
                    info!("Received shutdown signal, exiting");
                    std::process::exit(0);
                }
            }
        }
    });

    Ok(())
}

/// Periodically reclaim idle client windows
fn spawn_tracker_sweeper(tracker: Arc<AbuseTracker>, metrics: Arc<GateMetrics>) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(TRACKER_SWEEP_INTERVAL);
        loop {
            interval.tick().await;
            tracker.sweep(Instant::now());
            metrics.set_tracked_clients(tracker.tracked_clients());
        }
    });
}
