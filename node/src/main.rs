// Copyright (c) 2026 X-Bank. MIT License.
// See LICENSE for details.

//! # Bank Ledger Node
//!
//! Entry point for the `bank-node` binary. Parses CLI arguments, loads the
//! configuration file, initializes logging and metrics, opens the ledger, and
//! serves the HTTP API.
//!
//! The binary supports four subcommands:
//!
//! - `run`           start the node
//! - `provision-atm` register an ATM and its vault account
//! - `settle`        drain pending transactions once and exit
//! - `version`       print build version information

mod api;
mod cli;
mod config;
mod logging;
mod metrics;

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal;
use tokio::sync::watch;

use bank_ledger::{
    AcknowledgeHook, BcryptCredentials, RequestContext, SettlementError, SettlementWorker,
    SledLedger, TransactionEngine,
};

use cli::{BankNodeCli, Commands, ConfigArgs};
use config::NodeConfig;
use logging::LogFormat;
use metrics::LedgerMetrics;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = BankNodeCli::parse();

    match cli.command {
        Commands::Run(args) => run_node(args).await,
        Commands::ProvisionAtm(args) => provision_atm(args).await,
        Commands::Settle(args) => settle(args).await,
        Commands::Version => {
            print_version();
            Ok(())
        }
    }
}

/// Loads the config file, applies the shared overrides and starts logging.
fn prepare(common: &ConfigArgs) -> Result<NodeConfig> {
    let mut config = NodeConfig::load_or_default(common.config.as_deref())?;
    if let Some(dir) = &common.data_dir {
        config.database.path = dir.clone();
    }
    if let Some(format) = &common.log_format {
        config.log.format = LogFormat::from_str_lossy(format);
    }
    logging::init_logging(&config.log.filter, config.log.format);
    Ok(config)
}

fn open_ledger(config: &NodeConfig) -> Result<Arc<SledLedger>> {
    let path = &config.database.path;
    std::fs::create_dir_all(path)
        .with_context(|| format!("failed to create database directory: {}", path.display()))?;
    let ledger = SledLedger::open_with(&config.sled_config())
        .with_context(|| format!("failed to open database at {}", path.display()))?;
    tracing::info!(
        path = %path.display(),
        accounts = ledger.account_count(),
        transactions = ledger.transaction_count(),
        "database opened"
    );
    Ok(Arc::new(ledger))
}

/// Starts the node: API server, metrics endpoint, and settlement worker.
async fn run_node(args: cli::RunArgs) -> Result<()> {
    let mut config = prepare(&args.common)?;
    if let Some(listen) = args.listen {
        config.http.listen = listen;
    }
    if let Some(listen) = args.metrics_listen {
        config.http.metrics_listen = listen;
    }
    if args.no_settlement {
        config.settlement.enabled = false;
    }
    config.validate()?;

    tracing::info!(
        listen = %config.http.listen,
        metrics_listen = %config.http.metrics_listen,
        data_dir = %config.database.path.display(),
        settlement = config.settlement.enabled,
        "starting bank-node"
    );

    let ledger = open_ledger(&config)?;
    let engine = TransactionEngine::new(Arc::clone(&ledger), BcryptCredentials)
        .with_hash_cost(config.hash_cost);
    let ledger_metrics = Arc::new(LedgerMetrics::new());

    let app_state = api::AppState {
        engine,
        metrics: Arc::clone(&ledger_metrics),
        request_timeout: config.request_timeout(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    };

    // --- API server ---
    let api_router = api::create_router(app_state);
    let api_listener = tokio::net::TcpListener::bind(config.http.listen)
        .await
        .with_context(|| format!("failed to bind API listener on {}", config.http.listen))?;
    tracing::info!(addr = %config.http.listen, "API server listening");

    // --- Metrics server ---
    let metrics_router = axum::Router::new()
        .route("/metrics", axum::routing::get(metrics::metrics_handler))
        .with_state(Arc::clone(&ledger_metrics));
    let metrics_listener = tokio::net::TcpListener::bind(config.http.metrics_listen)
        .await
        .with_context(|| {
            format!(
                "failed to bind metrics listener on {}",
                config.http.metrics_listen
            )
        })?;
    tracing::info!(addr = %config.http.metrics_listen, "metrics server listening");

    // --- Settlement ---
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let settlement = config.settlement.enabled.then(|| {
        let metrics = Arc::clone(&ledger_metrics);
        let worker = SettlementWorker::new(
            Arc::clone(&ledger),
            AcknowledgeHook,
            config.settlement.batch_size,
        )
        .with_observer(move |report| metrics.record_settlement(report));
        let interval = config.settlement_interval();
        tokio::spawn(async move { worker.run(interval, shutdown_rx).await })
    });

    // --- Serve ---
    tokio::select! {
        res = axum::serve(api_listener, api_router) => {
            if let Err(e) = res {
                tracing::error!(error = %e, "API server error");
            }
        }
        res = axum::serve(metrics_listener, metrics_router) => {
            if let Err(e) = res {
                tracing::error!(error = %e, "metrics server error");
            }
        }
        _ = shutdown_signal() => {
            tracing::info!("shutdown signal received");
        }
    }

    let _ = shutdown_tx.send(true);
    if let Some(handle) = settlement {
        match handle.await {
            Ok(Err(SettlementError::Shutdown)) | Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::warn!(error = %e, "settlement worker stopped with error"),
            Err(e) => tracing::warn!(error = %e, "settlement worker task failed"),
        }
    }

    ledger
        .flush()
        .await
        .context("failed to flush database on shutdown")?;
    tracing::info!("bank-node stopped");
    Ok(())
}

/// Registers a new ATM and prints its identifiers.
async fn provision_atm(args: cli::ProvisionAtmArgs) -> Result<()> {
    let config = prepare(&args.common)?;
    let ledger = open_ledger(&config)?;
    let engine = TransactionEngine::new(Arc::clone(&ledger), BcryptCredentials)
        .with_hash_cost(config.hash_cost);

    let atm = engine
        .provision_atm(&RequestContext::unbounded(), &args.login, &args.password)
        .await
        .with_context(|| format!("failed to provision ATM {:?}", args.login))?;
    ledger.flush().await.context("failed to flush database")?;

    println!("ATM provisioned.");
    println!("  Login         : {}", atm.login);
    println!("  ATM id        : {}", atm.id);
    println!("  Vault account : {}", atm.account_id);
    Ok(())
}

/// Marks every pending transaction applied and prints a summary.
async fn settle(args: cli::SettleArgs) -> Result<()> {
    let config = prepare(&args.common)?;
    let ledger = open_ledger(&config)?;
    let batch_size = args.batch_size.unwrap_or(config.settlement.batch_size);

    let worker = SettlementWorker::new(Arc::clone(&ledger), AcknowledgeHook, batch_size);
    let report = worker.drain().await.context("settlement pass failed")?;
    ledger.flush().await.context("failed to flush database")?;

    println!("Settlement complete.");
    println!("  Offered : {}", report.offered);
    println!("  Applied : {}", report.applied);
    Ok(())
}

/// Prints version information to stdout.
fn print_version() {
    println!("bank-node   {}", env!("CARGO_PKG_VERSION"));
    println!("bank-ledger {}", bank_ledger::VERSION);
    println!("rustc       {}", option_env!("RUSTC_VERSION").unwrap_or("unknown"));
}

/// Waits for SIGINT (Ctrl+C) or SIGTERM, whichever comes first.
///
/// If a handler cannot be installed the error is logged and that signal is
/// ignored; the other one still works.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to install Ctrl+C handler");
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
}
