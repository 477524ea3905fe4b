// Copyright (c) 2026 ALAS Technology. MIT License.
// See LICENSE for details.

//! # Capvault Node
//!
//! Entry point for the `capvault-node` binary. Parses CLI arguments,
//! initializes logging and metrics, loads the ledger, and serves the API.
//!
//! - `run`: serve the ledger over HTTP
//! - `init`: create a ledger with the given caps
//! - `inspect`: dump the persisted ledger as JSON
//! - `version`: print build version information

mod api;
mod cli;
mod host;
mod logging;
mod metrics;

use anyhow::{bail, Context, Result};
use clap::Parser;
use std::path::Path;
use std::sync::Arc;
use tokio::signal;

use capvault_contracts::VaultLedger;
use capvault_protocol::config::{LedgerConfig, PROTOCOL_VERSION};
use capvault_protocol::storage::VaultDB;

use cli::{CapvaultNodeCli, Commands};
use host::LedgerHost;
use logging::LogFormat;
use metrics::NodeMetrics;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = CapvaultNodeCli::parse();

    match cli.command {
        Commands::Run(args) => run_node(args).await,
        Commands::Init(args) => init_ledger(args),
        Commands::Inspect(args) => inspect_ledger(args),
        Commands::Version => {
            print_version();
            Ok(())
        }
    }
}

/// Opens (creating if needed) the ledger database under `data_dir`.
fn open_db(data_dir: &Path) -> Result<VaultDB> {
    let db_path = data_dir.join("db");
    std::fs::create_dir_all(&db_path)
        .with_context(|| format!("failed to create database directory: {}", db_path.display()))?;
    let db = VaultDB::open(&db_path)
        .with_context(|| format!("failed to open database at {}", db_path.display()))?;
    tracing::info!(path = %db_path.display(), "database opened");
    Ok(db)
}

/// Loads the ledger and serves the API and metrics endpoints until a
/// shutdown signal arrives.
async fn run_node(args: cli::RunArgs) -> Result<()> {
    logging::init_logging(logging::DEFAULT_DIRECTIVES, args.log_format)
        .context("failed to initialize logging")?;

    tracing::info!(
        api_port = args.api_port,
        metrics_port = args.metrics_port,
        data_dir = %args.data_dir.display(),
        "starting capvault-node"
    );

    let db = open_db(&args.data_dir)?;
    let config = LedgerConfig::from(args.caps);
    let node_metrics = Arc::new(NodeMetrics::new());
    let ledger_host = LedgerHost::open(db, &config)
        .context("failed to load ledger")?
        .with_metrics(Arc::clone(&node_metrics));

    let app_state = api::AppState {
        version: format!(
            "{} (protocol {})",
            env!("CARGO_PKG_VERSION"),
            PROTOCOL_VERSION
        ),
        host: Arc::new(ledger_host),
        metrics: Arc::clone(&node_metrics),
    };

    // --- API server ---
    let api_router = api::create_router(app_state);
    let api_addr = format!("0.0.0.0:{}", args.api_port);
    let api_listener = tokio::net::TcpListener::bind(&api_addr)
        .await
        .with_context(|| format!("failed to bind API listener on {}", api_addr))?;
    tracing::info!("API server listening on {}", api_addr);

    // --- Metrics server ---
    let metrics_router = axum::Router::new()
        .route("/metrics", axum::routing::get(metrics::metrics_handler))
        .with_state(Arc::clone(&node_metrics));
    let metrics_addr = format!("0.0.0.0:{}", args.metrics_port);
    let metrics_listener = tokio::net::TcpListener::bind(&metrics_addr)
        .await
        .with_context(|| format!("failed to bind metrics listener on {}", metrics_addr))?;
    tracing::info!("Metrics server listening on {}", metrics_addr);

    tokio::select! {
        res = axum::serve(api_listener, api_router) => {
            if let Err(e) = res {
                tracing::error!("API server error: {}", e);
            }
        }
        res = axum::serve(metrics_listener, metrics_router) => {
            if let Err(e) = res {
                tracing::error!("Metrics server error: {}", e);
            }
        }
        _ = shutdown_signal() => {
            tracing::info!("shutdown signal received");
        }
    }

    tracing::info!("capvault-node stopped");
    Ok(())
}

/// Creates and persists a new ledger. Refuses to touch an existing one.
fn init_ledger(args: cli::InitArgs) -> Result<()> {
    logging::init_logging("capvault_node=info", LogFormat::Pretty)
        .context("failed to initialize logging")?;

    let db = open_db(&args.data_dir)?;
    if db.has_ledger()? {
        bail!(
            "a ledger already exists in {}; caps cannot be changed",
            args.data_dir.display()
        );
    }

    let config = LedgerConfig::from(args.caps);
    let ledger = VaultLedger::from_config(&config).context("invalid ledger caps")?;
    db.save_state(ledger.state())
        .context("failed to persist new ledger")?;

    println!("Ledger initialized.");
    println!("  Data directory     : {}", args.data_dir.display());
    println!("  Global cap         : {}", config.global_cap);
    println!("  Per-withdrawal cap : {}", config.per_withdrawal_cap);
    Ok(())
}

/// Prints the persisted ledger state as pretty JSON on stdout.
fn inspect_ledger(args: cli::InspectArgs) -> Result<()> {
    let db_path = args.data_dir.join("db");
    if !db_path.exists() {
        bail!("no ledger database at {}", db_path.display());
    }
    let db = VaultDB::open(&db_path)
        .with_context(|| format!("failed to open database at {}", db_path.display()))?;

    let Some(state) = db.load_state()? else {
        bail!("database at {} holds no ledger", db_path.display());
    };
    // Surfaces corruption instead of printing it.
    let ledger = VaultLedger::from_state(state).context("persisted ledger is inconsistent")?;

    println!("{}", serde_json::to_string_pretty(ledger.state())?);
    Ok(())
}

fn print_version() {
    println!("capvault-node {}", env!("CARGO_PKG_VERSION"));
    println!("protocol      {}", PROTOCOL_VERSION);
}

/// Waits for SIGINT (Ctrl+C) or SIGTERM, whichever comes first.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("failed to listen for Ctrl+C: {}", e);
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
                tracing::error!("failed to install SIGTERM handler: {}", e);
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
}
