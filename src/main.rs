use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use discord_bridge::config::BridgeConfig;
use discord_bridge::supervisor::Supervisor;

/// Bridge a Discord gateway session to operator-configured HTTP sinks.
#[derive(Parser, Debug)]
#[command(name = "discord-bridge", version, about)]
struct Cli {
    /// Path to a YAML config file. Falls back to environment variables
    /// (DISCORD_TOKEN, ...) when omitted.
    #[arg(short, long)]
    config: Option<String>,

    /// Override the Discord bot token from the loaded config.
    #[arg(long)]
    token: Option<String>,

    /// Override the logging level from the loaded config (e.g. "debug").
    #[arg(long)]
    log_level: Option<String>,
}

fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let mut config = match cli.config.as_deref() {
        Some(path) => BridgeConfig::from_yaml(path),
        None => BridgeConfig::from_env(),
    };

    // Apply CLI overrides before validation-dependent logging setup so
    // --log-level takes effect immediately.
    if let Ok(ref mut config) = config {
        config.apply_overrides(cli.token.clone(), cli.log_level.clone());
    }

    let config = match config {
        Ok(config) => config,
        Err(e) => {
            eprintln!("FATAL: failed to load configuration: {e}");
            return ExitCode::FAILURE;
        }
    };

    init_logging(&config.logging.level);

    if config.routes.is_empty() {
        tracing::warn!("no routes configured; events will be received but nothing forwarded");
    }

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("FATAL: failed to start async runtime: {e}");
            return ExitCode::FAILURE;
        }
    };

    runtime.block_on(async_main(config))
}

fn init_logging(configured_level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(configured_level.to_string()));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

async fn async_main(config: BridgeConfig) -> ExitCode {
    info!(version = env!("CARGO_PKG_VERSION"), "discord-bridge starting");

    let config = Arc::new(config);
    let mut supervisor = Supervisor::new(config);
    supervisor.start();

    wait_for_shutdown_signal().await;

    info!("shutdown signal received, stopping");
    supervisor.stop().await;
    info!("discord-bridge stopped cleanly");
    ExitCode::SUCCESS
}

#[cfg(unix)]
async fn wait_for_shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = match signal(SignalKind::terminate()) {
        Ok(sig) => sig,
        Err(e) => {
            error!(error = %e, "failed to install SIGTERM handler");
            let _ = tokio::signal::ctrl_c().await;
            return;
        }
    };

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = sigterm.recv() => {}
    }
}

#[cfg(not(unix))]
async fn wait_for_shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
