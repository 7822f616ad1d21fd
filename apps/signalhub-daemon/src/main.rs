mod gateway;

use std::io;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use gateway::{LogNotifier, LogRevoker};
use signalhub_ledger::{
    AccessRevoker, ExpiryMonitor, LedgerConfig, Notifier, RecordStore, UserService,
};

#[derive(Parser)]
#[command(name = "signalhub")]
#[command(about = "SignalHub subscription ledger daemon", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the ledger with its autosave, snapshot and expiry jobs
    Serve,
    /// Print ledger totals
    Stats,
    /// Write a timestamped backup of the ledger file
    Backup,
    /// Load, repair and rewrite the ledger file
    Check,
    /// Clear long-lapsed expiry dates and stale payment proofs
    Cleanup {
        /// Lapsed for more than this many days
        #[arg(long, default_value_t = 90)]
        days: i64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    println!("SignalHub daemon started. Version: {}", env!("CARGO_PKG_VERSION"));
    if let Err(e) = dotenvy::dotenv() {
        println!("⚠️  Warning: Failed to load .env file: {}", e);
    }

    let cli = Cli::parse();

    let file_appender = tracing_appender::rolling::never(".", "signalhub.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| "info,signalhub_ledger=debug".into()))
        .with(tracing_subscriber::fmt::layer().with_writer(io::stdout))
        .with(tracing_subscriber::fmt::layer().with_writer(non_blocking).with_ansi(false))
        .init();

    let config = LedgerConfig::from_env();

    match cli.command {
        Commands::Serve => serve(config).await?,
        Commands::Stats => stats(config).await?,
        Commands::Backup => backup(config).await?,
        Commands::Check => check(config).await?,
        Commands::Cleanup { days } => cleanup(config, days).await?,
    }

    Ok(())
}

async fn serve(config: LedgerConfig) -> Result<()> {
    let store = RecordStore::open(&config)
        .await
        .context("failed to open ledger file")?;
    let ledger = store.stats().await;
    info!(
        users = ledger.total_users,
        affiliates = ledger.total_affiliates,
        active_subscriptions = ledger.active_subscriptions,
        pending_payouts = ledger.pending_payouts,
        "ledger loaded"
    );

    let users = UserService::new(store.clone());
    let notifier: Arc<dyn Notifier> = Arc::new(LogNotifier);
    let revoker: Arc<dyn AccessRevoker> = Arc::new(LogRevoker);
    let monitor = ExpiryMonitor::new(users, notifier, revoker, &config);

    let flush_store = store.clone();
    tokio::spawn(async move { flush_store.run_flush_loop().await });

    let snapshot_store = store.clone();
    tokio::spawn(async move { snapshot_store.run_snapshot_loop().await });

    let interval_monitor = monitor.clone();
    tokio::spawn(async move { interval_monitor.run_interval_loop().await });

    tokio::spawn(async move { monitor.run_daily_loop().await });

    info!(file = %config.file.display(), "ledger daemon running");
    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;

    info!("shutting down, flushing ledger");
    store.force_save().await.context("final ledger flush failed")?;
    Ok(())
}

async fn stats(config: LedgerConfig) -> Result<()> {
    let store = RecordStore::open(&config).await?;
    let stats = store.stats().await;

    println!("\n=== SIGNALHUB LEDGER ===");
    println!("File:                 {}", config.file.display());
    println!("Size:                 {} bytes", stats.file_size_bytes);
    println!("Users:                {}", stats.total_users);
    println!("Affiliates:           {}", stats.total_affiliates);
    println!("Active subscriptions: {}", stats.active_subscriptions);
    println!("Commissions:          {}", stats.total_commissions);
    println!("Payouts:              {} ({} pending)", stats.total_payouts, stats.pending_payouts);
    println!("Created:              {}", stats.created_at.format("%Y-%m-%d %H:%M:%S UTC"));
    println!("Updated:              {}", stats.updated_at.format("%Y-%m-%d %H:%M:%S UTC"));
    println!("========================\n");
    Ok(())
}

async fn backup(config: LedgerConfig) -> Result<()> {
    let store = RecordStore::open(&config).await?;
    let path = store.snapshot().await.context("backup failed")?;
    println!("Backup written to {}", path.display());
    Ok(())
}

async fn check(config: LedgerConfig) -> Result<()> {
    // Opening runs the load-time repairs (missing fields, stray keys,
    // corrupted-file quarantine) and rewrites the file in current shape.
    let store = RecordStore::open(&config)
        .await
        .context("ledger check failed")?;
    let stats = store.stats().await;
    println!(
        "Ledger at {} is healthy: {} users, {} payouts",
        config.file.display(),
        stats.total_users,
        stats.total_payouts
    );
    Ok(())
}

async fn cleanup(config: LedgerConfig, days: i64) -> Result<()> {
    let store = RecordStore::open(&config).await?;
    let report = store.cleanup_old_data(days).await?;
    store.force_save().await?;
    println!(
        "Cleanup done: {} expiry dates and {} stale proofs cleared",
        report.expiries_cleared, report.proofs_cleared
    );
    Ok(())
}
