//! Entry point for the anteroom lobby service
//!
//! Loads configuration, restores lobbies from the last snapshot, serves
//! health and metrics endpoints and shuts down cleanly on Ctrl-C or SIGTERM.

use anteroom::config::{validate_config, AppConfig};
use anteroom::service::{AppState, HealthCheck, HealthStatus};
use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use tokio::signal;
use tracing::{error, info, warn};

/// Anteroom - lobby coordination service
#[derive(Parser)]
#[command(
    name = "anteroom",
    version,
    about = "Lobby coordination for tier-gated, region-partitioned matchmaking",
    long_about = "Anteroom keeps a bounded set of waiting lobbies per partition, admits \
                 participants by tier and region, prunes idle lobbies, persists its state \
                 to snapshots and publishes lobby events over AMQP."
)]
struct Args {
    #[arg(
        short,
        long,
        value_name = "FILE",
        help = "Path to configuration file (TOML format)"
    )]
    config: Option<PathBuf>,

    #[arg(long, help = "Start the service, run one health check and exit with its status")]
    health_check: bool,

    #[arg(
        short,
        long,
        value_name = "LEVEL",
        help = "Override log level (trace, debug, info, warn, error)"
    )]
    log_level: Option<String>,

    #[arg(long, value_name = "URL", help = "Override AMQP connection URL")]
    amqp_url: Option<String>,

    #[arg(long, help = "Disable AMQP and log lobby events instead")]
    no_amqp: bool,

    #[arg(long, value_name = "PORT", help = "Override health/metrics server port")]
    health_port: Option<u16>,

    #[arg(long, value_name = "FILE", help = "Override snapshot file path")]
    snapshot_path: Option<PathBuf>,

    #[arg(long, value_name = "FILE", help = "Override tiers file path")]
    tiers_file: Option<PathBuf>,

    #[arg(short, long, help = "Enable debug logging")]
    debug: bool,

    #[arg(long, help = "Validate configuration and exit without starting service")]
    dry_run: bool,
}

fn init_logging(log_level: &str) -> Result<()> {
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| log_level.into()),
        )
        .with_target(false)
        .with_thread_ids(true)
        .with_line_number(true)
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .map_err(|e| anyhow::anyhow!("Failed to initialize logging: {}", e))?;

    Ok(())
}

/// Defaults, then file or environment, then CLI flags
fn load_config(args: &Args) -> Result<AppConfig> {
    let mut config = match &args.config {
        Some(path) => AppConfig::from_file(path)?,
        None => AppConfig::from_env()?,
    };

    if let Some(log_level) = &args.log_level {
        config.service.log_level = log_level.clone();
    }
    if args.debug {
        config.service.log_level = "debug".to_string();
    }
    if let Some(url) = &args.amqp_url {
        config.amqp.url = url.clone();
        config.amqp.enabled = true;
    }
    if args.no_amqp {
        config.amqp.enabled = false;
    }
    if let Some(port) = args.health_port {
        config.service.health_port = port;
    }
    if let Some(path) = &args.snapshot_path {
        config.persistence.snapshot_path = path.clone();
    }
    if let Some(path) = &args.tiers_file {
        config.rank.tiers_file = Some(path.clone());
    }

    validate_config(&config)?;
    Ok(config)
}

fn display_startup_banner(config: &AppConfig) {
    info!("Anteroom lobby service v{}", anteroom::VERSION);
    info!("   Service: {}", config.service.name);
    info!("   Health port: {}", config.service.health_port);
    info!(
        "   AMQP: {}",
        if config.amqp.enabled {
            config.amqp.exchange_name.as_str()
        } else {
            "disabled"
        }
    );
    info!("   Snapshot: {}", config.persistence.snapshot_path.display());
    info!("   Lobby capacity: {}", config.lobby.capacity);
    for league in &config.leagues {
        info!(
            "   League {}: prefix {}, min tier {}, regions {:?}{}",
            league.name,
            league.prefix,
            league.min_tier,
            league.regions,
            if league.exempt_from_pruning {
                ", exempt from pruning"
            } else {
                ""
            }
        );
    }
}

async fn wait_for_shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received SIGINT (Ctrl+C)"),
        _ = terminate => info!("Received SIGTERM"),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = match load_config(&args) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Configuration error: {:#}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = init_logging(&config.service.log_level) {
        eprintln!("{}", e);
        std::process::exit(1);
    }

    display_startup_banner(&config);

    if args.dry_run {
        info!("Configuration is valid; exiting (dry run)");
        return Ok(());
    }

    let app_state = match AppState::new(config).await {
        Ok(state) => state,
        Err(e) => {
            error!("Failed to initialize service: {}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = app_state.start().await {
        error!("Failed to start service: {}", e);
        std::process::exit(1);
    }

    if args.health_check {
        let health = HealthCheck::check(app_state.clone()).await?;
        println!("{}", health.to_json()?);
        if let Err(e) = app_state.shutdown().await {
            warn!("Shutdown after health check failed: {}", e);
        }
        std::process::exit(if health.status == HealthStatus::Unhealthy { 1 } else { 0 });
    }

    info!("Anteroom is running; press Ctrl+C to stop");
    wait_for_shutdown_signal().await;

    info!("Shutting down...");
    match app_state.shutdown().await {
        Ok(()) => info!("Graceful shutdown completed"),
        Err(e) => {
            error!("Shutdown completed with errors: {}", e);
            std::process::exit(1);
        }
    }

    Ok(())
}
