use anyhow::{Context, Result};
use clap::Parser;
use peeko::{AccountService, DurabilityMode, GuardConfig};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Runs the account expiry sweep against the configured store.
#[derive(Parser, Debug)]
#[command(name = "peeko-guard", version, about)]
struct Args {
    /// Seconds between sweep passes (overrides PEEKO_SWEEP_INTERVAL_SECS)
    #[arg(long)]
    sweep_interval_secs: Option<u64>,

    /// Snapshot directory (overrides PEEKO_DATA_DIR)
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// sync, async or none (overrides PEEKO_DURABILITY)
    #[arg(long)]
    durability: Option<DurabilityMode>,

    /// Run a single sweep pass and exit
    #[arg(long)]
    once: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let args = Args::parse();
    let mut config = GuardConfig::from_env().context("failed to load guard configuration")?;
    if let Some(secs) = args.sweep_interval_secs {
        anyhow::ensure!(secs > 0, "--sweep-interval-secs must be greater than zero");
        config = config.sweep_interval(Duration::from_secs(secs));
    }
    if let Some(dir) = args.data_dir {
        config = config.data_dir(dir);
    }
    if let Some(mode) = args.durability {
        config = config.durability(mode);
    }

    let service = AccountService::from_config(config).context("failed to open account store")?;
    info!(
        accounts = service.store().count().await?,
        durability = ?service.config().durability,
        "account store ready"
    );

    if args.once {
        let report = service.sweep_once().await.context("sweep failed")?;
        info!(deleted = report.deleted, "single sweep pass finished");
    } else {
        let sweep = service.start_sweep();
        shutdown_signal().await;
        info!("shutdown requested");
        sweep.stop().await;
    }

    service.shutdown().await.context("failed to flush account store")?;
    Ok(())
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("peeko=info")))
        .with(tracing_subscriber::fmt::layer())
        .init();
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            error!(error = %err, "unable to install Ctrl+C signal handler");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};

        match signal(SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                error!(error = %err, "unable to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
