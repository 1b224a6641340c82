//! espdap - Debug Adapter Protocol server for ESP32 targets.
//!
//! Bridges an editor to `xtensa-esp32-elf-gdb` attached to a hardware
//! target through OpenOCD. Speaks DAP on stdio by default; `--listen`
//! serves editor connections over TCP instead, one session at a time.

use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use espdap_dap::DapServer;
use espdap_logging::LogConfig;
use tokio::net::TcpListener;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Listen for editor connections on a TCP address instead of stdio
    #[clap(long)]
    listen: Option<String>,

    /// Exit after the first debug session ends (TCP mode)
    #[clap(long)]
    oneshot: bool,

    /// Write logs to a file instead of stderr
    #[clap(long)]
    log_file: Option<PathBuf>,

    /// Enable debug-level logging
    #[clap(short, long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Guard must outlive the sessions so file logs flush on exit.
    let _log_guard = match &args.log_file {
        Some(path) => Some(
            espdap_logging::init_with_file(LogConfig::new().debug(args.debug), path)
                .with_context(|| format!("failed to open log file {}", path.display()))?,
        ),
        None => {
            espdap_logging::init(LogConfig::new().debug(args.debug));
            None
        }
    };

    match &args.listen {
        Some(address) => serve_tcp(address, args.oneshot).await,
        None => serve_stdio().await,
    }
}

/// One session over stdio; stdout carries DAP frames, logs go elsewhere.
async fn serve_stdio() -> anyhow::Result<()> {
    info!("serving DAP on stdio");
    let server = DapServer::new(tokio::io::stdin(), tokio::io::stdout());
    server.serve().await.context("DAP session failed")?;
    Ok(())
}

/// Accept editor connections sequentially; one client is one session.
async fn serve_tcp(address: &str, oneshot: bool) -> anyhow::Result<()> {
    let addr: SocketAddr = address.parse().context("invalid listen address")?;
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("bind {addr}"))?;
    info!(%addr, "listening for DAP connections");

    loop {
        let (stream, peer) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(err) => {
                warn!(error = %err, "accept failed");
                continue;
            }
        };
        info!(%peer, "editor connected");

        let (read, write) = stream.into_split();
        if let Err(err) = DapServer::new(read, write).serve().await {
            warn!(%peer, error = %err, "session ended with error");
        } else {
            info!(%peer, "session finished");
        }

        if oneshot {
            break;
        }
    }
    Ok(())
}
