//! camtune-server: camera tuning protocol server.
//!
//! Listens on the command and preview ports and serves a simulated imaging
//! pipeline until SIGINT/SIGTERM.

use camtune_server::{ConfigOverrides, ServerConfig, SimulatedPipeline, TuningServer};
use clap::Parser;
use std::net::IpAddr;
use std::path::PathBuf;
use tokio::sync::broadcast::error::RecvError;
use tracing::{error, info, warn};

/// camtune-server: camera tuning protocol server
#[derive(Parser, Debug)]
#[command(name = "camtune-server", version, about = "Camera tuning protocol server")]
struct Cli {
    /// Address to bind both channels to
    #[arg(long)]
    bind: Option<IpAddr>,

    /// Command channel port
    #[arg(long)]
    command_port: Option<u16>,

    /// Preview channel port
    #[arg(long)]
    preview_port: Option<u16>,

    /// Config file path
    #[arg(long, default_value = "~/.camtune/config.toml")]
    config: String,

    /// Largest accepted command payload / response length in bytes
    #[arg(long)]
    max_payload: Option<usize>,

    /// Drop clients silent for this many seconds (0 = never)
    #[arg(long)]
    idle_timeout: Option<u64>,

    /// Drop a client that leaves a response unread for this many seconds
    #[arg(long)]
    write_timeout: Option<u64>,

    /// Print every session event as a JSON line on stdout
    #[arg(long)]
    events_json: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Initialize tracing
    use tracing_subscriber::EnvFilter;
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    info!(version = env!("CARGO_PKG_VERSION"), "starting camtune-server");

    let overrides = ConfigOverrides {
        bind: cli.bind,
        command_port: cli.command_port,
        preview_port: cli.preview_port,
        max_payload: cli.max_payload,
        client_idle_timeout: cli.idle_timeout,
        write_timeout: cli.write_timeout,
    };
    let config_path = PathBuf::from(&cli.config);
    let config = match ServerConfig::load(Some(&config_path), &overrides) {
        Ok(cfg) => cfg,
        Err(e) => {
            error!(error = %e, "failed to load config");
            std::process::exit(1);
        }
    };

    let pipeline = SimulatedPipeline::new(config.pipeline);
    let handle = match TuningServer::new(config, pipeline).start().await {
        Ok(h) => h,
        Err(e) => {
            error!(error = %e, "failed to start server");
            std::process::exit(1);
        }
    };

    if cli.events_json {
        let mut events = handle.subscribe();
        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(event) => match serde_json::to_string(&event) {
                        Ok(line) => println!("{line}"),
                        Err(e) => warn!(error = %e, "failed to encode event"),
                    },
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "event printer lagged");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        });
    }

    shutdown_signal().await;
    info!("received shutdown signal");

    if let Err(e) = handle.stop().await {
        error!(error = %e, "unclean shutdown");
        std::process::exit(1);
    }
}

/// Wait for SIGTERM or SIGINT (Ctrl+C).
async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        let mut sigterm =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                .expect("failed to install SIGTERM handler");
        tokio::select! {
            _ = ctrl_c => {}
            _ = sigterm.recv() => {}
        }
    }

    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
    }
}
