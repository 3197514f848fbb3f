use std::path::PathBuf;

use clap::Parser;
use ninebox_worker::DEFAULT_PORT;
use ninebox_worker::WorkerOptions;
use tracing::warn;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "ninebox-worker", version, about = "ninebox backend worker")]
struct Cli {
    /// Preferred loopback port. Falls back to a free port when occupied; 0 picks any free port.
    #[arg(long, env = "NINEBOX_PORT", default_value_t = DEFAULT_PORT)]
    port: u16,

    /// Application data directory.
    #[arg(long, env = "NINEBOX_DATA_DIR")]
    data_dir: Option<PathBuf>,
}

fn init_tracing() {
    let filter = EnvFilter::try_from_env("NINEBOX_LOG").unwrap_or_else(|_| EnvFilter::new("info"));
    // stdout carries the handshake, so logs go to stderr.
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_ansi(false)
        .with_writer(std::io::stderr)
        .init();
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!("failed to listen for ctrl-c: {err}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::SignalKind;
        match tokio::signal::unix::signal(SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                warn!("failed to listen for SIGTERM: {err}");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    let cli = Cli::parse();

    let options = WorkerOptions {
        preferred_port: cli.port,
        data_dir: cli.data_dir,
    };
    let mut stdout = std::io::stdout();
    ninebox_worker::run(options, &mut stdout, shutdown_signal()).await
}
