//! `allone`: discover Allone infrared bridges, learn codes, and send them.
//!
//! # Usage
//!
//! ```text
//! allone [--config PATH] discover
//! allone [--config PATH] learn [--ip IP] --name tv_on.ir
//! allone [--config PATH] send  [--ip IP] --names tv_on.ir,vol_up.ir
//! ```
//!
//! Every subcommand prints one JSON object on stdout (see
//! `allone_bridge::infrastructure::api`) and exits non-zero when `success` is
//! false.  Logs go to stderr; `RUST_LOG` overrides the configured level.
//!
//! Sending without `--ip` tries every known bridge in turn and is markedly
//! slower than naming the bridge.

use std::net::IpAddr;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use allone_bridge::application::BridgeEngine;
use allone_bridge::infrastructure::api;
use allone_bridge::infrastructure::network::udp::UdpTransport;
use allone_bridge::infrastructure::storage::command_store::FileCommandStore;
use allone_bridge::infrastructure::storage::config::{config_file_path, load_config_from};

// ── CLI argument definitions ──────────────────────────────────────────────────

/// Controller for Allone infrared bridges.
#[derive(Debug, Parser)]
#[command(name = "allone", about = "Discover, learn and send with Allone IR bridges", version)]
struct Cli {
    /// Path to the TOML config file.  Defaults to the platform config dir.
    #[arg(long, global = true, env = "ALLONE_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Broadcast a discovery request and list bridges and stored codes.
    Discover,

    /// Put a bridge into learn mode and store the captured code.
    Learn {
        /// Bridge IP.  Defaults to the first bridge found.
        #[arg(long)]
        ip: Option<IpAddr>,

        /// Name to store the code under, e.g. `tv_on.ir`.
        #[arg(long)]
        name: String,
    },

    /// Emit stored codes, in order.
    Send {
        /// Bridge IP.  Without it every known bridge is tried.
        #[arg(long)]
        ip: Option<IpAddr>,

        /// Comma-separated code names, e.g. `tv_on.ir,vol_up.ir`.
        #[arg(long)]
        names: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();

    let config_path = match cli.config {
        Some(path) => path,
        None => config_file_path().context("no --config given and no platform config dir")?,
    };
    let config = load_config_from(&config_path)
        .with_context(|| format!("loading config from {}", config_path.display()))?;

    // stdout carries the JSON result, so logs go to stderr.
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .or_else(|_| EnvFilter::try_new(&config.log.level))
                .unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();
    debug!("config loaded from {}", config_path.display());

    let settings = config.engine_settings()?;
    let transport = UdpTransport::new(config.bind_address()?, config.network.listen_port);
    let store = FileCommandStore::new(config.store.directory.clone());
    let engine = BridgeEngine::new(settings, Arc::new(transport), Arc::new(store));

    let (json, success) = match cli.command {
        Command::Discover => {
            let response = api::discover(&engine).await;
            info!("{} bridge(s) found", response.devices.len());
            (api::to_json(&response)?, response.success)
        }
        Command::Learn { ip, name } => {
            let response = api::learn(&engine, ip, &name).await;
            (api::to_json(&response)?, response.success)
        }
        Command::Send { ip, names } => {
            let response = api::send(&engine, ip, &names).await;
            (api::to_json(&response)?, response.success)
        }
    };

    println!("{json}");
    Ok(if success {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}
