//! # SEGMUX Worker
//!
//! Isolated transmux context. Reads one JSON command per line on stdin and
//! writes events (`transmuxComplete`, `flush`, `error`, `workerLog`,
//! `decrypted`) as JSON lines on stdout.
//!
//! ## Usage
//! ```bash
//! segmux-worker < commands.jsonl
//!
//! # With debug logging
//! RUST_LOG=segmux_core=debug segmux-worker
//! ```

mod log_forward;
mod protocol;
mod worker;

use anyhow::{Context, Result};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, error, info};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use log_forward::ForwardLayer;
use protocol::{Command, Outbox};
use worker::Worker;

// ============================================================================
// Main Entry Point
// ============================================================================

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let outbox = Outbox::new(std::io::stdout());

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("segmux_worker=info,segmux_core=info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(ForwardLayer::new(outbox.clone()))
        .init();

    info!("SEGMUX worker v{} starting", segmux_core::VERSION);

    let mut worker = Worker::new(outbox);
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    while let Some(line) = lines.next_line().await.context("reading stdin")? {
        if line.trim().is_empty() {
            continue;
        }
        debug!(bytes = line.len(), "command line received");

        let command: Command = match serde_json::from_str(&line) {
            Ok(command) => command,
            Err(e) => {
                error!("Failed to parse command: {e}");
                continue;
            }
        };
        worker.handle(command).await.context("writing events to stdout")?;
    }

    info!("stdin closed, worker exiting");
    Ok(())
}
