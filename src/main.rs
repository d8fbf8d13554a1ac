use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio::sync::mpsc;
use tracing::info;
use tracing_subscriber::EnvFilter;

use download_warden::pipeline::Orchestrator;
use download_warden::scanner::ClamAvScanner;
use download_warden::watcher::SourceWatcher;
use download_warden::Config;

/// Watch a downloads directory, scan and contain what arrives, and organize
/// the rest.
#[derive(Debug, Parser)]
#[command(name = "download-warden", version, about)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(short, long, default_value = "warden.toml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("warn,download_warden=info")),
        )
        .init();

    let cli = Cli::parse();
    let config = Config::load(&cli.config)
        .with_context(|| format!("loading configuration from {}", cli.config.display()))?;

    std::fs::create_dir_all(&config.directories.source)
        .with_context(|| format!("creating {}", config.directories.source.display()))?;
    std::fs::create_dir_all(&config.directories.destination)
        .with_context(|| format!("creating {}", config.directories.destination.display()))?;
    std::fs::create_dir_all(config.directories.quarantine_dir())
        .with_context(|| format!("creating {}", config.directories.quarantine_dir().display()))?;

    let scanner = Arc::new(ClamAvScanner::new(&config.scanner));
    let orchestrator = Arc::new(Orchestrator::new(&config, scanner));

    let (tx, rx) = mpsc::channel(1024);
    let watcher = SourceWatcher::spawn(&config.directories.source, tx)
        .with_context(|| format!("watching {}", config.directories.source.display()))?;

    info!(
        source = %config.directories.source.display(),
        destination = %config.directories.destination.display(),
        workers = config.workers,
        "download-warden started"
    );

    let workers = config.workers;
    let pipeline = tokio::spawn(orchestrator.run(rx, workers));

    tokio::signal::ctrl_c()
        .await
        .context("waiting for shutdown signal")?;
    info!("shutdown signal received, draining pipeline");

    // Dropping the watcher closes the task channel, which lets the pipeline
    // finish in-flight work and return.
    drop(watcher);
    pipeline.await.context("pipeline task panicked")?;

    info!("shutdown complete");
    Ok(())
}
