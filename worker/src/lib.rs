//! The bundled ninebox backend worker.
//!
//! Binds a loopback port (preferring the one it was given), announces it on stdout with a
//! single handshake line, then serves the liveness API until asked to stop.

pub mod handshake;
pub mod port;
pub mod server;

use std::future::Future;
use std::io::Write;
use std::path::PathBuf;

use anyhow::Context;
use tracing::info;

/// Default preferred port when neither `--port` nor `NINEBOX_PORT` is set.
pub const DEFAULT_PORT: u16 = 8000;

#[derive(Debug, Clone)]
pub struct WorkerOptions {
    pub preferred_port: u16,
    pub data_dir: Option<PathBuf>,
}

/// Runs the worker: bind, announce on `handshake_out`, serve until `shutdown` resolves.
pub async fn run<W, F>(
    options: WorkerOptions,
    handshake_out: &mut W,
    shutdown: F,
) -> anyhow::Result<()>
where
    W: Write,
    F: Future<Output = ()> + Send + 'static,
{
    if let Some(data_dir) = options.data_dir.as_deref() {
        std::fs::create_dir_all(data_dir)
            .with_context(|| format!("failed to create data dir {}", data_dir.display()))?;
    }

    let listener = port::bind_loopback(options.preferred_port)
        .await
        .context("failed to bind a loopback port")?;
    let port = listener
        .local_addr()
        .context("failed to read bound address")?
        .port();
    info!(port, preferred = options.preferred_port, "worker bound");

    handshake::announce_ready(handshake_out, port).context("failed to write handshake")?;

    server::serve(listener, shutdown)
        .await
        .context("worker server failed")?;
    info!("worker stopped");
    Ok(())
}
