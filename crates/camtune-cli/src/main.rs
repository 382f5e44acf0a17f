//! camtune: camera tuning client.
//!
//! Reads and writes pipeline parameters over the command channel and pulls
//! preview frames over the preview channel of a camtune-server.

mod client;
mod commands;

use camtune_core::{COMMAND_PORT, PREVIEW_PORT};
use clap::{Parser, Subcommand};
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use tracing::error;

/// camtune: camera tuning client
#[derive(Parser)]
#[command(name = "camtune", version, about = "Camera tuning client")]
struct Cli {
    /// Server address
    #[arg(long, global = true, default_value = "127.0.0.1")]
    host: IpAddr,

    /// Command channel port
    #[arg(long, global = true, default_value_t = COMMAND_PORT)]
    command_port: u16,

    /// Preview channel port
    #[arg(long, global = true, default_value_t = PREVIEW_PORT)]
    preview_port: u16,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List parameter ids and names
    List,

    /// Read parameter values
    Get {
        #[arg(required = true)]
        ids: Vec<u16>,
    },

    /// Write parameter values
    Set {
        /// Assignments in id=value form
        #[arg(required = true)]
        assignments: Vec<String>,
    },

    /// Send a vendor misc command (ids 1021..=1029)
    Misc {
        id: u16,
        /// Request payload as hex
        payload: Option<String>,
        /// Bytes of response to read
        #[arg(long, default_value_t = 64)]
        response_len: u32,
    },

    /// Show preview version and capabilities
    Info,

    /// Show or change the preview tile size
    ChunkSize {
        new: Option<u32>,
    },

    /// Capture one raw preview frame
    Frame {
        /// Output file
        #[arg(short, long)]
        out: PathBuf,
        /// Tile size to request before capturing
        #[arg(long)]
        chunk_size: Option<u32>,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if cli.verbose {
        tracing_subscriber::fmt()
            .with_env_filter("camtune=debug,camtune_core=debug")
            .with_target(true)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter("camtune=warn")
            .with_target(false)
            .with_writer(std::io::stderr)
            .init();
    }

    let command_addr = SocketAddr::new(cli.host, cli.command_port);
    let preview_addr = SocketAddr::new(cli.host, cli.preview_port);

    let result = match cli.command {
        Command::List => commands::params::run_list(command_addr).await,
        Command::Get { ids } => commands::params::run_get(command_addr, &ids).await,
        Command::Set { assignments } => {
            commands::params::run_set(command_addr, &assignments).await
        }
        Command::Misc {
            id,
            payload,
            response_len,
        } => commands::misc::run(command_addr, id, payload.as_deref(), response_len).await,
        Command::Info => commands::preview::run_info(preview_addr).await,
        Command::ChunkSize { new } => commands::preview::run_chunk_size(preview_addr, new).await,
        Command::Frame { out, chunk_size } => {
            commands::preview::run_frame(preview_addr, &out, chunk_size).await
        }
    };

    if let Err(e) = result {
        error!("{:#}", e);
        eprintln!("camtune: {e:#}");
        std::process::exit(1);
    }
}
