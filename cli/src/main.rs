mod config;
mod console;
mod health;
mod logging;
mod path_utils;
mod restart_policy;
mod startup;
mod supervisor;
mod worker_process;

use std::path::Path;
use std::path::PathBuf;

use anyhow::Context;
use clap::CommandFactory;
use clap::FromArgMatches;
use clap::Parser;
use ninebox_client::BackendClient;
use ninebox_client::ConnectionStatusConsumer;
use ninebox_client::NINEBOX_VERSION;
use ninebox_client::status_indicator::failure_dialog;
use ninebox_client::status_indicator::needs_dialog;
use ninebox_client::status_indicator::render_status_line;
use tokio::io::BufReader;
use tracing::info;
use tracing::warn;

use crate::config::ConfigStore;
use crate::logging::LogConfig;
use crate::logging::LogTarget;
use crate::supervisor::SupervisorConfig;
use crate::supervisor::SupervisorHandle;
use crate::worker_process::WorkerLaunch;

const APP_DIR_NAME: &str = "ninebox";

#[derive(Parser, Debug)]
#[command(about = "Run the ninebox backend worker and keep it connected")]
struct Cli {
    /// Worker binary to launch: a name looked up next to this binary and on PATH, or a path.
    #[arg(long, env = "NINEBOX_WORKER_BIN", default_value = startup::DEFAULT_WORKER_BIN)]
    worker_bin: String,

    /// Application data directory. Holds `config.toml` and the logs.
    #[arg(long, env = "NINEBOX_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// Preferred worker port. Overrides `preferred_port` from `config.toml`.
    #[arg(long, env = "NINEBOX_PORT")]
    port: Option<u16>,

    /// Where to write logs. Defaults to the console when stderr is a terminal.
    #[arg(long, value_enum)]
    log_target: Option<LogTarget>,
}

fn parse_cli() -> Cli {
    let matches = Cli::command().version(NINEBOX_VERSION).get_matches();
    Cli::from_arg_matches(&matches).unwrap_or_else(|err| err.exit())
}

fn resolve_data_dir(flag: Option<&Path>) -> anyhow::Result<PathBuf> {
    match flag {
        Some(path) => Ok(path_utils::expand_tilde(path)),
        None => dirs::data_dir()
            .map(|dir| dir.join(APP_DIR_NAME))
            .context("could not determine the user data directory; pass --data-dir"),
    }
}

/// Resolves on ctrl-c. Never resolves when the signal cannot be watched.
async fn interrupted() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!("failed to listen for ctrl-c: {err}");
        std::future::pending::<()>().await;
    }
}

#[tokio::main(flavor = "multi_thread")]
async fn main() -> anyhow::Result<()> {
    let cli = parse_cli();

    let data_dir = resolve_data_dir(cli.data_dir.as_deref())?;
    std::fs::create_dir_all(&data_dir)
        .with_context(|| format!("create data directory {}", data_dir.display()))?;

    let log_path = logging::init(&LogConfig {
        target: cli.log_target.unwrap_or_else(LogTarget::detect),
        log_dir: data_dir.join("logs"),
    })?;

    let store = ConfigStore::in_data_dir(&data_dir);
    if store.write_default_if_missing()? {
        info!(path = %store.path().display(), "wrote default configuration");
    }
    let settings = store.load()?;

    let handle = SupervisorHandle::spawn(SupervisorConfig {
        launch: WorkerLaunch {
            program: cli.worker_bin,
            args: Vec::new(),
            preferred_port: cli.port.unwrap_or(settings.preferred_port),
            data_dir,
            handshake_timeout: settings.handshake_timeout,
        },
        health_interval: settings.health_interval,
        health_timeout: settings.health_timeout,
        shutdown_grace: settings.shutdown_grace,
        max_auto_restarts: settings.max_auto_restarts,
    })
    .context("build the worker health client")?;

    let client = BackendClient::new(handle.link(), settings.client_retry)
        .context("build the backend client")?;
    let mut consumer = ConnectionStatusConsumer::new(handle.link());
    let dialog_log_path = log_path.clone();
    let subscription = consumer.activate(move |update| {
        println!("{}", render_status_line(update));
        if needs_dialog(update)
            && let Some(report) = &update.failure
        {
            println!("{}", failure_dialog(report, dialog_log_path.as_deref()));
        }
    });

    let exit = console::run(
        BufReader::new(tokio::io::stdin()),
        &mut std::io::stdout(),
        &consumer,
        &client,
        log_path.as_deref(),
        interrupted(),
    )
    .await?;
    info!(?exit, "leaving the console");

    subscription.unsubscribe().await;
    let last = handle.shutdown().await;
    println!("{}", render_status_line(&last));
    Ok(())
}
