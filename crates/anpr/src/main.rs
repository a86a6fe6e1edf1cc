#![forbid(unsafe_code)]

use anpr::adapter::StatusHandler;
use anpr::config::{Cli, load_config};
use anpr::gateway::ConnState;
use anpr::service::Receiver;
use clap::Parser;
use std::io::IsTerminal;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

const RESET: &str = "\x1b[0m";
const BOLD: &str = "\x1b[1m";
const DIM: &str = "\x1b[2m";
const CYAN: &str = "\x1b[36m";

fn init_tracing(cli: &Cli) -> anyhow::Result<()> {
    let filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        let directive = match cli.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        };
        EnvFilter::new(directive)
    };

    if let Some(ref path) = cli.log_file {
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|e| anyhow::anyhow!("failed to open log file {path:?}: {e}"))?;
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::sync::Mutex::new(file))
            .with_ansi(false)
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    Ok(())
}

/// Resolves once the watched connection reaches its terminal failed state,
/// or once its manager task is gone.
async fn connection_failed(mut state_rx: watch::Receiver<ConnState>) {
    loop {
        if *state_rx.borrow_and_update() == ConnState::Failed {
            return;
        }
        if state_rx.changed().await.is_err() {
            return;
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if rustls::crypto::ring::default_provider()
        .install_default()
        .is_err()
    {
        eprintln!("Failed to install rustls crypto provider - may already be installed or unsupported platform");
    }

    let cli = Cli::parse();

    init_tracing(&cli)?;

    let mut config = load_config(cli.config.as_deref())?;
    if let Some(ref gateway) = cli.gateway {
        config.gateway_url = gateway.clone();
    }
    config
        .validate()
        .map_err(|e| anyhow::anyhow!("Invalid configuration: {e}"))?;

    // Startup banner
    if std::io::stderr().is_terminal() {
        let v = env!("CARGO_PKG_VERSION");
        eprintln!();
        eprintln!("  {BOLD}◈ ANP Receiver{RESET} {DIM}v{v}{RESET}");
        eprintln!("  {DIM}Gateway{RESET}    {CYAN}{}{RESET}", config.gateway_url);
        eprintln!("  {DIM}Identities{RESET} {}", config.identity.len());
        if !config.advertised_services.is_empty() {
            eprintln!(
                "  {DIM}Services{RESET}   {}",
                config.advertised_services.join(", ")
            );
        }
        eprintln!();
    }

    info!(
        gateway = %config.gateway_url,
        identities = config.identity.len(),
        "starting anpr daemon"
    );

    let service = config
        .advertised_services
        .first()
        .cloned()
        .unwrap_or_else(|| "anpr".to_string());
    let handler = Arc::new(StatusHandler::new(service));
    let receiver = Receiver::start(config, handler).await?;

    let watchers = receiver.states();
    let all_failed = futures_util::future::join_all(
        watchers
            .into_iter()
            .map(|(_, state_rx)| connection_failed(state_rx)),
    );

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("received shutdown signal");
        }
        _ = all_failed => {
            error!("all gateway connections failed");
            receiver.stop().await;
            anyhow::bail!("all gateway connections failed");
        }
    }

    receiver.stop().await;
    Ok(())
}
