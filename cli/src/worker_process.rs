//! Spawning the worker and waiting for its handshake.
//!
//! `start_worker` resolves exactly once, to whichever of these happens first: the handshake
//! line arrives, the worker exits, or the handshake timer fires. A spawn failure resolves
//! immediately without arming the timer.
//!
//! Worker output is forwarded line by line into the host log until the pipes close. Bytes that
//! are not UTF-8 are replaced rather than ending the forwarding, since a pipe nobody reads would
//! eventually block or kill the worker.

use std::io;
use std::path::PathBuf;
use std::process::ExitStatus;
use std::process::Stdio;
use std::time::Duration;

use ninebox_protocol::DATA_DIR_ENV_VAR;
use ninebox_protocol::ErrorCategory;
use ninebox_protocol::HandshakeMessage;
use ninebox_protocol::PORT_ENV_VAR;
use tokio::io::AsyncBufReadExt;
use tokio::io::AsyncRead;
use tokio::io::BufReader;
use tokio::process::Child;
use tokio::process::Command;
use tokio::sync::oneshot;
use tracing::debug;
use tracing::info;
use tracing::warn;

use crate::health::ProbeError;
use crate::startup;
use crate::startup::WorkerBinError;

/// Target for worker output forwarded into the host log.
pub const WORKER_LOG_TARGET: &str = "ninebox::worker";

#[derive(Debug, Clone)]
pub struct WorkerLaunch {
    /// Bare executable name or path, resolved on every start.
    pub program: String,
    pub args: Vec<String>,
    pub preferred_port: u16,
    pub data_dir: PathBuf,
    pub handshake_timeout: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerLifecycle {
    /// Spawned, handshake not yet received.
    Spawning,
    Running,
    Exited,
}

#[derive(Debug, thiserror::Error)]
pub enum StartError {
    #[error(transparent)]
    ExecutableNotFound(#[from] WorkerBinError),
    #[error("failed to launch {}: {source}", .program.display())]
    Spawn {
        program: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("no handshake within {}ms", .timeout.as_millis())]
    HandshakeTimeout { timeout: Duration },
    #[error(
        "worker exited before the handshake (exit code {})",
        .exit_code.map_or_else(|| "none".to_string(), |code| code.to_string())
    )]
    CrashBeforeHandshake { exit_code: Option<i32> },
    #[error("worker on port {port} failed its liveness check: {source}")]
    HealthCheck {
        port: u16,
        #[source]
        source: ProbeError,
    },
}

impl StartError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            StartError::ExecutableNotFound(_) | StartError::Spawn { .. } => {
                ErrorCategory::ExecutableNotFound
            }
            StartError::HandshakeTimeout { .. } => ErrorCategory::HandshakeTimeout,
            StartError::CrashBeforeHandshake { .. } => ErrorCategory::CrashBeforeHandshake,
            StartError::HealthCheck { .. } => ErrorCategory::HealthCheckFailure,
        }
    }
}

/// A spawned worker process. Owned by exactly one supervisor; dropping it kills the process.
#[derive(Debug)]
pub struct WorkerHandle {
    child: Child,
    pid: Option<u32>,
    lifecycle: WorkerLifecycle,
}

/// A worker that completed its handshake.
#[derive(Debug)]
pub struct StartedWorker {
    pub worker: WorkerHandle,
    /// Port from the handshake.
    pub port: u16,
}

impl WorkerHandle {
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    pub fn lifecycle(&self) -> WorkerLifecycle {
        self.lifecycle
    }

    /// Waits for the worker to exit. Cancel safe.
    pub async fn wait_exit(&mut self) -> io::Result<ExitStatus> {
        let status = self.child.wait().await?;
        self.lifecycle = WorkerLifecycle::Exited;
        Ok(status)
    }

    /// Asks the worker to stop, then kills it once `grace` has passed.
    pub async fn terminate(&mut self, grace: Duration) -> Option<ExitStatus> {
        if self.lifecycle == WorkerLifecycle::Exited {
            return None;
        }
        if let Ok(Some(status)) = self.child.try_wait() {
            self.lifecycle = WorkerLifecycle::Exited;
            return Some(status);
        }

        if request_stop(self.pid) {
            match tokio::time::timeout(grace, self.child.wait()).await {
                Ok(Ok(status)) => {
                    self.lifecycle = WorkerLifecycle::Exited;
                    debug!(pid = self.pid, %status, "worker stopped");
                    return Some(status);
                }
                Ok(Err(err)) => warn!(pid = self.pid, "failed to wait for worker: {err}"),
                Err(_) => warn!(
                    pid = self.pid,
                    grace_ms = grace.as_millis(),
                    "worker ignored the stop request; killing it"
                ),
            }
        }

        self.kill().await
    }

    async fn kill(&mut self) -> Option<ExitStatus> {
        if let Err(err) = self.child.kill().await {
            warn!(pid = self.pid, "failed to kill worker: {err}");
        }
        let status = self.child.wait().await.ok();
        self.lifecycle = WorkerLifecycle::Exited;
        status
    }
}

#[cfg(unix)]
fn request_stop(pid: Option<u32>) -> bool {
    let Some(pid) = pid.and_then(|pid| libc::pid_t::try_from(pid).ok()) else {
        return false;
    };
    // SAFETY: `pid` is our own child and has not been reaped, so it cannot name another process.
    unsafe { libc::kill(pid, libc::SIGTERM) == 0 }
}

#[cfg(not(unix))]
fn request_stop(_pid: Option<u32>) -> bool {
    false
}

/// Spawns the worker and waits for its handshake.
pub async fn start_worker(launch: &WorkerLaunch) -> Result<StartedWorker, StartError> {
    let program = startup::resolve_worker_bin(&launch.program)?;

    let mut cmd = Command::new(&program);
    cmd.kill_on_drop(true)
        .args(&launch.args)
        .env(PORT_ENV_VAR, launch.preferred_port.to_string())
        .env(DATA_DIR_ENV_VAR, &launch.data_dir)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    let mut child = cmd.spawn().map_err(|source| StartError::Spawn {
        program: program.clone(),
        source,
    })?;
    let pid = child.id();
    info!(
        pid,
        program = %program.display(),
        preferred_port = launch.preferred_port,
        "worker spawned"
    );

    let (handshake_tx, handshake_rx) = oneshot::channel();
    if let Some(stdout) = child.stdout.take() {
        tokio::spawn(pump_output(stdout, pid, "stdout", Some(handshake_tx)));
    }
    if let Some(stderr) = child.stderr.take() {
        tokio::spawn(pump_output(stderr, pid, "stderr", None));
    }
    let mut worker = WorkerHandle {
        child,
        pid,
        lifecycle: WorkerLifecycle::Spawning,
    };

    // A closed stdout without a handshake is not an outcome by itself; the exit or the timer
    // decides.
    let handshake = async {
        match handshake_rx.await {
            Ok(message) => message,
            Err(_) => std::future::pending().await,
        }
    };

    let outcome = tokio::select! {
        biased;
        message = handshake => Ok(message),
        status = worker.wait_exit() => Err(status),
        () = tokio::time::sleep(launch.handshake_timeout) => {
            warn!(
                pid,
                timeout_ms = launch.handshake_timeout.as_millis(),
                "worker handshake timed out"
            );
            worker.kill().await;
            return Err(StartError::HandshakeTimeout {
                timeout: launch.handshake_timeout,
            });
        }
    };

    match outcome {
        Ok(message) => {
            info!(pid, port = message.port, "worker ready");
            worker.lifecycle = WorkerLifecycle::Running;
            Ok(StartedWorker {
                worker,
                port: message.port,
            })
        }
        Err(status) => {
            let exit_code = status.ok().and_then(|status| status.code());
            warn!(pid, exit_code, "worker exited before the handshake");
            Err(StartError::CrashBeforeHandshake { exit_code })
        }
    }
}

/// Forwards one output stream to the log until it closes. When `handshake_tx` is set, the
/// first handshake line is adopted; later look-alikes are only logged.
async fn pump_output<R>(
    stream: R,
    pid: Option<u32>,
    name: &'static str,
    mut handshake_tx: Option<oneshot::Sender<HandshakeMessage>>,
) where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(stream);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {
                let text = String::from_utf8_lossy(&buf);
                let line = text.trim_end_matches(['\n', '\r']);
                info!(target: WORKER_LOG_TARGET, pid, stream = name, "{line}");
                if handshake_tx.is_some()
                    && let Ok(message) = HandshakeMessage::parse_line(line)
                    && let Some(tx) = handshake_tx.take()
                {
                    let _ = tx.send(message);
                }
            }
            Err(err) => {
                warn!(
                    target: WORKER_LOG_TARGET,
                    pid,
                    stream = name,
                    "failed to read worker output: {err}"
                );
                break;
            }
        }
    }
}
