//! Driver State Engine - Replay Entry Point

use anyhow::Context;
use clap::Parser;
use dms::{DmsConfig, DriverMonitor};
use runner::{init_logging, install_metrics_exporter, replay};
use std::fs::File;
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use storage::Repository;
use tracing::{info, warn};

#[derive(Debug, Parser)]
#[command(name = "dms-monitor")]
#[command(about = "Replay recorded driver frames through the driver state engine")]
struct Cli {
    /// YAML/TOML configuration file; defaults plus DMS__* overrides when omitted
    #[arg(long)]
    config: Option<PathBuf>,
    /// Frame inputs as JSON lines; stdin when omitted
    #[arg(long)]
    input: Option<PathBuf>,
    /// Per-frame results as JSON lines; stdout when omitted
    #[arg(long)]
    output: Option<PathBuf>,
    /// Serve Prometheus metrics on this address
    #[arg(long, env = "DMS_METRICS_ADDR")]
    metrics_addr: Option<SocketAddr>,
    /// Run known-user checks on a background task while calibrating
    #[arg(long)]
    probe: bool,
    /// Emit logs as JSON
    #[arg(long)]
    json_logs: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.json_logs);

    info!("=== Driver State Engine v{} ===", env!("CARGO_PKG_VERSION"));

    if let Some(addr) = cli.metrics_addr {
        install_metrics_exporter(addr)?;
    }

    let config = match &cli.config {
        Some(path) => DmsConfig::from_file(path)
            .with_context(|| format!("failed to load {}", path.display()))?,
        None => DmsConfig::from_env().context("failed to load configuration")?,
    };

    let store = Arc::new(Repository::new());
    let mut monitor = DriverMonitor::new(config, Arc::clone(&store))?
        .with_event_sink(store.clone());
    if cli.probe {
        monitor = monitor.with_probe();
    }

    let stop = monitor.stop_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, stopping");
            stop.store(true, Ordering::Relaxed);
        }
    });

    let input: Box<dyn BufRead> = match &cli.input {
        Some(path) => Box::new(BufReader::new(
            File::open(path).with_context(|| format!("failed to open {}", path.display()))?,
        )),
        None => Box::new(io::stdin().lock()),
    };
    let output: Box<dyn Write> = match &cli.output {
        Some(path) => Box::new(BufWriter::new(
            File::create(path).with_context(|| format!("failed to create {}", path.display()))?,
        )),
        None => Box::new(BufWriter::new(io::stdout().lock())),
    };

    let summary = replay(&mut monitor, input, output)?;

    let dispatch = monitor.shutdown().await;
    info!(
        frames = summary.frames,
        skipped = summary.skipped,
        events = summary.events,
        detecting_frames = summary.detecting_frames,
        profiles = store.profile_count(),
        stored_events = store.event_count(),
        ?dispatch,
        "Shutdown complete"
    );

    Ok(())
}
