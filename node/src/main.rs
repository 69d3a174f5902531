// Copyright (c) 2026 ALAS Technology. MIT License.
// See LICENSE for details.

//! # accredit Devnet Node
//!
//! Entry point for the `accredit-node` binary.
//!
//! - `run`    : start a persistent devnet and serve the status API
//! - `init`   : create the data directory and write devnet keys
//! - `demo`   : walk every pipeline scenario on a throwaway devnet
//! - `version`: print build version information

mod api;
mod cli;
mod demo;
mod logging;
mod metrics;

use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::Parser;
use tokio::signal;

use accredit_contracts::{Devnet, DevnetConfig, DevnetKeys, KeyFile};
use accredit_protocol::config::ServiceConfig;

use cli::{AccreditNodeCli, Commands, NodeArgs};
use logging::LogFormat;
use metrics::{MetricsState, NodeMetrics};

const KEY_FILE: &str = "keys.json";

/// Receipt timeout for the demo, so the stuck-transaction scenario
/// resolves in well under a second.
const DEMO_RECEIPT_TIMEOUT_MS: u64 = 500;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = AccreditNodeCli::parse();

    match cli.command {
        Commands::Run(args) => run_node(args).await,
        Commands::Init(args) => init_node(args),
        Commands::Demo(args) => run_demo(args).await,
        Commands::Version => {
            print_version();
            Ok(())
        }
    }
}

fn load_config(args: &NodeArgs) -> Result<ServiceConfig> {
    match &args.config {
        Some(path) => ServiceConfig::from_json_file(path)
            .with_context(|| format!("failed to load config from {}", path.display())),
        None => Ok(ServiceConfig::default()),
    }
}

fn read_keys(data_dir: &Path) -> Result<DevnetKeys> {
    let path = data_dir.join(KEY_FILE);
    let raw = std::fs::read_to_string(&path)
        .with_context(|| format!("failed to read {} (run `accredit-node init` first)", path.display()))?;
    let file: KeyFile = serde_json::from_str(&raw).with_context(|| format!("malformed {}", path.display()))?;
    DevnetKeys::from_file(&file)
}

/// Starts a persistent devnet and serves the status API until shutdown.
async fn run_node(args: cli::RunArgs) -> Result<()> {
    logging::init_logging(&args.node.log_level, LogFormat::from_flag(args.node.log_json))?;
    let service = load_config(&args.node)?;
    let keys = read_keys(&args.data_dir)?;

    tracing::info!(
        http_port = args.http_port,
        data_dir = %args.data_dir.display(),
        chain_id = service.chain_id,
        "starting accredit-node"
    );

    let db_path = args.data_dir.join("db");
    let config = DevnetConfig {
        service,
        ..DevnetConfig::default()
    };
    let devnet = Arc::new(Devnet::start_persistent(config, keys, &db_path).await?);
    let state = MetricsState {
        metrics: Arc::new(NodeMetrics::new()?),
        devnet,
    };

    let router = api::create_router(state);
    let addr = format!("0.0.0.0:{}", args.http_port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    tracing::info!(%addr, "status API listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server failed")?;

    tracing::info!("accredit-node stopped");
    Ok(())
}

/// Creates the data directory and writes a fresh key file.
fn init_node(args: cli::InitArgs) -> Result<()> {
    logging::init_logging("accredit_node=info", LogFormat::Pretty)?;

    let data_dir = &args.data_dir;
    std::fs::create_dir_all(data_dir)
        .with_context(|| format!("failed to create data directory: {}", data_dir.display()))?;

    let key_path = data_dir.join(KEY_FILE);
    if key_path.exists() && !args.force {
        bail!("{} already exists (pass --force to replace it)", key_path.display());
    }

    let keys = DevnetKeys::generate(args.validators);
    std::fs::write(&key_path, serde_json::to_vec_pretty(&keys.to_file())?)
        .with_context(|| format!("failed to write {}", key_path.display()))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&key_path, std::fs::Permissions::from_mode(0o600))?;
    }

    let address = |kp: &accredit_protocol::crypto::Keypair| {
        accredit_protocol::identity::Address::from_public_key(&kp.public_key())
    };
    tracing::info!(key_path = %key_path.display(), validators = args.validators, "devnet keys generated");

    println!("Node initialized.");
    println!("  Data directory : {}", data_dir.display());
    println!("  Key file       : {}", key_path.display());
    println!("  Owner          : {}", address(&keys.owner));
    println!("  Platform       : {}", address(&keys.platform));
    for (i, validator) in keys.validators.iter().enumerate() {
        println!("  Validator {i:<4} : {}", address(validator));
    }
    Ok(())
}

async fn run_demo(args: cli::DemoArgs) -> Result<()> {
    logging::init_logging(&args.node.log_level, LogFormat::from_flag(args.node.log_json))?;
    let mut service = load_config(&args.node)?;
    service.rate_limit_window_ms = 0;
    service.receipt_timeout_ms = service.receipt_timeout_ms.min(DEMO_RECEIPT_TIMEOUT_MS);

    let config = DevnetConfig {
        service,
        ..DevnetConfig::default()
    };
    let devnet = Devnet::start(config, DevnetKeys::derive(args.seed, 1)).await?;
    let metrics = NodeMetrics::new()?;

    let steps = demo::Demo::new(&devnet, &metrics).run().await?;
    println!("{steps} steps passed");

    if args.metrics {
        metrics.sample(&devnet);
        print!("{}", metrics.encode()?);
    }
    Ok(())
}

fn print_version() {
    println!("accredit-node {}", env!("CARGO_PKG_VERSION"));
    println!("chain id      {:#x}", accredit_protocol::config::DEVNET_CHAIN_ID);
}

/// Waits for SIGINT (Ctrl+C) or SIGTERM, whichever comes first.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for Ctrl+C");
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
                tracing::error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
    tracing::info!("shutdown signal received");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_file_round_trips_through_the_data_dir() {
        let dir = tempfile::tempdir().unwrap();
        let keys = DevnetKeys::derive(9, 2);
        std::fs::write(
            dir.path().join(KEY_FILE),
            serde_json::to_vec_pretty(&keys.to_file()).unwrap(),
        )
        .unwrap();

        let read = read_keys(dir.path()).unwrap();
        assert_eq!(read.to_file(), keys.to_file());
        assert_eq!(read.validators.len(), 2);
    }

    #[test]
    fn missing_key_file_points_at_init() {
        let dir = tempfile::tempdir().unwrap();
        let err = read_keys(dir.path()).unwrap_err();
        assert!(format!("{err:#}").contains("accredit-node init"));
    }
}
