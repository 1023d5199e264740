//! Vigil agent main entry point
//!
//! Runs the self-learning monitoring agent: samples host metrics,
//! learns per-metric baselines, flags statistical anomalies, and
//! dispatches automated responses.

use std::path::PathBuf;
use std::process;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use vigil_agent::{
    config::AgentConfig,
    dispatch::{LogAlertSink, LogFirewall},
    error::{AgentError, Result},
    persist::PersistenceGateway,
    sampler::SystemSampler,
    service::{AgentService, SignalShutdown},
};

/// Vigil agent command line interface
#[derive(Parser)]
#[command(name = "vigil-agent")]
#[command(about = "Self-learning host monitoring and response agent")]
#[command(version = "0.1.0")]
struct Cli {
    /// Configuration file path
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log level override (trace, debug, info, warn, error)
    #[arg(short, long)]
    log_level: Option<String>,

    /// Enable JSON logging
    #[arg(long)]
    json_logs: bool,

    /// Subcommand
    #[command(subcommand)]
    command: Option<Commands>,
}

/// Available commands
#[derive(Subcommand)]
enum Commands {
    /// Start the monitoring agent
    Start,

    /// Get agent status from the persisted baseline state
    Status,

    /// Validate configuration
    Config {
        /// Show effective configuration
        #[arg(long)]
        show: bool,
    },

    /// Inspect or reset learned baselines
    Baseline {
        #[command(subcommand)]
        command: BaselineCommands,
    },
}

#[derive(Subcommand)]
enum BaselineCommands {
    /// Show learned baselines
    Show,

    /// Delete the baseline file; the agent relearns on next start
    Reset,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Load configuration before logging so the logging section applies
    let config = match load_configuration(&cli) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load configuration: {}", e);
            process::exit(1);
        }
    };

    if let Err(e) = initialize_logging(&cli, &config) {
        eprintln!("Failed to initialize logging: {}", e);
        process::exit(1);
    }

    let result = match &cli.command {
        Some(Commands::Start) | None => start_agent(config).await,
        Some(Commands::Status) => show_status(config).await,
        Some(Commands::Config { show }) => handle_config(config, *show),
        Some(Commands::Baseline { command }) => match command {
            BaselineCommands::Show => show_baselines(config).await,
            BaselineCommands::Reset => reset_baselines(config).await,
        },
    };

    match result {
        Ok(_) => {
            info!("Command completed successfully");
        }
        Err(e) => {
            error!("Command failed: {}", e);
            process::exit(1);
        }
    }
}

/// Initialize logging from the configuration with CLI overrides
fn initialize_logging(cli: &Cli, config: &AgentConfig) -> Result<()> {
    let level = cli
        .log_level
        .as_deref()
        .unwrap_or(&config.logging.level)
        .to_lowercase();

    let filter = EnvFilter::from_default_env()
        .add_directive(directive(&format!("vigil_agent={}", level))?)
        .add_directive(directive("tokio=warn")?)
        .add_directive(directive("mio=warn")?);

    if cli.json_logs || config.logging.json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(false))
            .init();
    }

    Ok(())
}

fn directive(raw: &str) -> Result<tracing_subscriber::filter::Directive> {
    raw.parse()
        .map_err(|e| AgentError::Generic(format!("invalid log directive '{}': {}", raw, e)))
}

/// Load configuration from the given path, the default location, or
/// built-in defaults, with environment overrides applied
fn load_configuration(cli: &Cli) -> Result<AgentConfig> {
    let config = match &cli.config {
        Some(path) => AgentConfig::load_with_fallback(Some(path))?,
        None => match AgentConfig::default_config_path() {
            Ok(path) if path.exists() => AgentConfig::load_with_fallback(Some(path))?,
            _ => AgentConfig::load_with_fallback(None::<&PathBuf>)?,
        },
    };
    Ok(config)
}

/// Run the agent until a signal or a dispatched shutdown stops it
async fn start_agent(config: AgentConfig) -> Result<()> {
    info!("Starting Vigil agent");

    let sampler = Box::new(SystemSampler::new(config.monitoring.monitored_hosts.clone()));
    let cancel = CancellationToken::new();

    let service = AgentService::start(
        config,
        sampler,
        Arc::new(LogFirewall),
        Arc::new(LogAlertSink),
        Arc::new(SignalShutdown::new(cancel.clone())),
        cancel,
    )
    .await?;

    wait_for_shutdown(&service).await;

    info!("Initiating graceful shutdown");
    service.stop().await;

    Ok(())
}

/// Wait for Ctrl-C, SIGTERM, or an internally dispatched shutdown
async fn wait_for_shutdown(service: &AgentService) {
    tokio::select! {
        result = signal::ctrl_c() => {
            match result {
                Ok(()) => info!("Received Ctrl-C"),
                Err(e) => error!(error = %e, "Failed to listen for Ctrl-C"),
            }
        }
        _ = terminate_signal() => {
            info!("Received terminate signal");
        }
        _ = service.cancelled() => {
            info!("Shutdown requested by the service");
        }
    }
}

#[cfg(unix)]
async fn terminate_signal() {
    match signal::unix::signal(signal::unix::SignalKind::terminate()) {
        Ok(mut sigterm) => {
            sigterm.recv().await;
        }
        Err(e) => {
            error!(error = %e, "Failed to install SIGTERM handler");
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(not(unix))]
async fn terminate_signal() {
    std::future::pending::<()>().await;
}

/// Show agent status derived from the persisted baseline state
async fn show_status(config: AgentConfig) -> Result<()> {
    let gateway = PersistenceGateway::new(
        &config.persistence.baseline_path,
        config.monitoring.min_samples,
    );
    let loaded = gateway.load().await;

    println!("Baseline file: {}", gateway.path().display());
    if loaded.store.is_empty() {
        println!("No learned baselines; the agent starts in learning mode");
        return Ok(());
    }

    let learned = loaded.store.iter().filter(|(_, s)| s.is_learned).count();
    println!(
        "Baselines: {} metrics ({} learned), {} suppressed feedback keys",
        loaded.store.len(),
        learned,
        loaded.suppressed.len()
    );

    Ok(())
}

/// Validate and optionally print the effective configuration
fn handle_config(config: AgentConfig, show: bool) -> Result<()> {
    config.validate()?;
    println!("Configuration is valid");

    if show {
        let rendered = toml::to_string_pretty(&config)
            .map_err(|e| AgentError::Generic(format!("failed to render config: {}", e)))?;
        println!("{}", rendered);
    }

    Ok(())
}

async fn show_baselines(config: AgentConfig) -> Result<()> {
    let gateway = PersistenceGateway::new(
        &config.persistence.baseline_path,
        config.monitoring.min_samples,
    );
    let loaded = gateway.load().await;

    if loaded.store.is_empty() {
        println!("No learned baselines");
        return Ok(());
    }

    println!("{:<24} {:>12} {:>12} {:>8}  learned", "metric", "mean", "stddev", "n");
    let mut entries: Vec<_> = loaded.store.iter().collect();
    entries.sort_by_key(|(kind, _)| kind.as_key());
    for (kind, stats) in entries {
        println!(
            "{:<24} {:>12.3} {:>12.3} {:>8}  {}",
            kind.as_key(),
            stats.mean,
            stats.stddev,
            stats.sample_count,
            stats.is_learned
        );
    }

    Ok(())
}

async fn reset_baselines(config: AgentConfig) -> Result<()> {
    let path = &config.persistence.baseline_path;
    match tokio::fs::remove_file(path).await {
        Ok(()) => {
            info!(path = %path.display(), "Baseline file removed, agent will relearn");
            println!("Baselines reset");
            Ok(())
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            println!("No baseline file to reset");
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}
