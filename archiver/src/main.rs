//! HLS re-chunking archiver: pulls configured upstream playlists, re-chunks
//! their segments into fixed-duration groups, and writes durable append-only
//! manifests (see `spec.md`/`SPEC_FULL.md` for the full design).

mod config;
mod downloader;
mod error;
mod logging;
mod pull;
mod retry;
mod supervisor;
mod tls;

use std::path::PathBuf;

use clap::Parser;
use tokio_util::sync::CancellationToken;

use crate::config::Config;

#[derive(Debug, Parser)]
#[command(name = "archiver", about = "HLS re-chunking archiver and notifier")]
struct Args {
    /// Path to the YAML configuration file (§6).
    #[arg(short, long)]
    config: PathBuf,

    /// Root directory captured segments and manifests are written under.
    #[arg(long, default_value = "data")]
    data_dir: PathBuf,

    /// Exit a feed's pull loop once its playlist completes (`EXT-X-ENDLIST`)
    /// instead of continuing to poll. Off by default: these are live feeds.
    #[arg(long)]
    once: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    logging::init();
    tls::install_provider();

    let args = Args::parse();
    let config = Config::load(&args.config)?;

    tracing::info!(feeds = config.feeds.len(), data_dir = %args.data_dir.display(), "starting archiver");

    let stop = CancellationToken::new();
    let supervisor_stop = stop.clone();
    let mut supervisor = tokio::spawn(supervisor::run(config, args.data_dir, !args.once, supervisor_stop));

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("received SIGINT, shutting down");
        }
        _ = wait_for_sigterm() => {
            tracing::info!("received SIGTERM, shutting down");
        }
        result = &mut supervisor => {
            result?;
            return Ok(());
        }
    }

    stop.cancel();
    supervisor.await?;
    tracing::info!("archiver shutdown complete");
    Ok(())
}

/// Wait for SIGTERM (Unix only, §9).
#[cfg(unix)]
async fn wait_for_sigterm() {
    use tokio::signal::unix::{signal, SignalKind};
    let mut sigterm = signal(SignalKind::terminate()).expect("failed to register SIGTERM handler");
    sigterm.recv().await;
}

#[cfg(not(unix))]
async fn wait_for_sigterm() {
    std::future::pending::<()>().await;
}
