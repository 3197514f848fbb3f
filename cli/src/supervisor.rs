//! The backend supervisor.
//!
//! One task owns the worker process, the restart policy, the health timer and the status
//! sender. Everything else talks to it through [`SupervisorHandle`] or a [`BackendLink`]: reads
//! come from the watch channel, requests go through the command channel.
//!
//! Commands are only read between steps. A shutdown that arrives while a health check or a
//! start is in flight is picked up before the next restart, so no new worker is spawned after
//! it.

use std::io;
use std::process::ExitStatus;
use std::time::Duration;

use ninebox_client::BackendLink;
use ninebox_protocol::ConnectionConfig;
use ninebox_protocol::ConnectionStatus;
use ninebox_protocol::ErrorCategory;
use ninebox_protocol::FailureReport;
use ninebox_protocol::StatusUpdate;
use ninebox_protocol::SupervisorCommand;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TryRecvError;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio::time::Interval;
use tokio::time::MissedTickBehavior;
use tracing::debug;
use tracing::error;
use tracing::info;
use tracing::warn;

use crate::health::LivenessProbe;
use crate::restart_policy::PolicyEvent;
use crate::restart_policy::RestartPolicy;
use crate::restart_policy::Step;
use crate::worker_process::StartError;
use crate::worker_process::StartedWorker;
use crate::worker_process::WorkerHandle;
use crate::worker_process::WorkerLaunch;
use crate::worker_process::start_worker;

#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    pub launch: WorkerLaunch,
    pub health_interval: Duration,
    pub health_timeout: Duration,
    pub shutdown_grace: Duration,
    pub max_auto_restarts: u32,
}

/// Owner-side handle. Dropping it asks the supervisor to shut down.
#[derive(Debug)]
pub struct SupervisorHandle {
    status_rx: watch::Receiver<StatusUpdate>,
    command_tx: mpsc::UnboundedSender<SupervisorCommand>,
    task: Option<JoinHandle<()>>,
}

impl SupervisorHandle {
    /// Starts the supervisor task, which immediately launches the first worker.
    pub fn spawn(config: SupervisorConfig) -> reqwest::Result<Self> {
        let probe = LivenessProbe::new(config.health_timeout)?;
        let (status_tx, status_rx) = watch::channel(StatusUpdate::starting());
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let supervisor = Supervisor {
            probe,
            policy: RestartPolicy::new(config.max_auto_restarts),
            config,
            status_tx,
            commands: command_rx,
            stopping: false,
            worker: None,
            connection: None,
            health: None,
        };
        let task = tokio::spawn(supervisor.run());
        Ok(Self {
            status_rx,
            command_tx,
            task: Some(task),
        })
    }

    pub fn snapshot(&self) -> StatusUpdate {
        self.status_rx.borrow().clone()
    }

    /// The handle UI surfaces get: status reads and commands, nothing else.
    pub fn link(&self) -> BackendLink {
        BackendLink::new(self.status_rx.clone(), self.command_tx.clone())
    }

    /// Stops health checks, terminates the worker and waits for the supervisor to finish.
    /// Returns the final status.
    pub async fn shutdown(mut self) -> StatusUpdate {
        let _ = self.command_tx.send(SupervisorCommand::Shutdown);
        if let Some(task) = self.task.take()
            && let Err(err) = task.await
        {
            warn!("supervisor task failed: {err}");
        }
        self.snapshot()
    }
}

impl Drop for SupervisorHandle {
    fn drop(&mut self) {
        if self.task.is_some() {
            let _ = self.command_tx.send(SupervisorCommand::Shutdown);
        }
    }
}

struct Supervisor {
    config: SupervisorConfig,
    probe: LivenessProbe,
    policy: RestartPolicy,
    status_tx: watch::Sender<StatusUpdate>,
    commands: mpsc::UnboundedReceiver<SupervisorCommand>,
    /// Set once shutdown was requested or every sender is gone.
    stopping: bool,
    worker: Option<WorkerHandle>,
    /// Last endpoint that passed a liveness check.
    connection: Option<ConnectionConfig>,
    /// Armed only while connected.
    health: Option<Interval>,
}

impl Supervisor {
    async fn run(mut self) {
        self.start_attempts().await;

        while !self.stopping {
            let connected = self.policy.status() == ConnectionStatus::Connected;
            tokio::select! {
                biased;
                command = self.commands.recv() => match command {
                    Some(SupervisorCommand::ManualRetry) => self.manual_retry().await,
                    Some(SupervisorCommand::Shutdown) | None => self.stopping = true,
                },
                exit = wait_for_exit(self.worker.as_mut()), if connected => {
                    self.worker = None;
                    let detail = match exit {
                        Ok(status) => format!("worker exited unexpectedly ({status})"),
                        Err(err) => format!("lost track of the worker process: {err}"),
                    };
                    self.connection_lost(ErrorCategory::CrashAfterReady, detail).await;
                }
                () = next_tick(self.health.as_mut()), if connected => self.check_health().await,
            }
        }

        self.shutdown().await;
    }

    async fn manual_retry(&mut self) {
        match self.policy.on_event(PolicyEvent::ManualRetry) {
            Some(step) => {
                info!(retry_count = step.retry_count, "manual retry requested");
                self.publish(step, None);
                self.start_attempts().await;
            }
            None => debug!(
                status = %self.policy.status(),
                retry_count = self.policy.retry_count(),
                "ignoring manual retry outside the disconnected state"
            ),
        }
    }

    /// Drains queued commands without blocking. Returns true once shutdown is pending.
    fn shutdown_pending(&mut self) -> bool {
        while !self.stopping {
            match self.commands.try_recv() {
                Ok(SupervisorCommand::Shutdown) | Err(TryRecvError::Disconnected) => {
                    self.stopping = true;
                }
                Ok(SupervisorCommand::ManualRetry) => {
                    debug!("ignoring manual retry while the worker is being replaced");
                }
                Err(TryRecvError::Empty) => break,
            }
        }
        self.stopping
    }

    async fn check_health(&mut self) {
        let Some(connection) = self.connection.clone() else {
            return;
        };
        match self.probe.check(&connection).await {
            Ok(()) => debug!(port = connection.port, "worker is healthy"),
            Err(err) => {
                self.connection_lost(ErrorCategory::HealthCheckFailure, err.to_string())
                    .await;
            }
        }
    }

    async fn connection_lost(&mut self, category: ErrorCategory, detail: String) {
        warn!(%category, "connection to the worker lost: {detail}");
        if self.shutdown_pending() {
            return;
        }
        let Some(step) = self.policy.on_event(PolicyEvent::Lost(category)) else {
            return;
        };
        self.publish(step, Some(detail));
        if step.start_worker {
            self.start_attempts().await;
        } else {
            self.stop_worker().await;
        }
    }

    /// Replaces the worker, repeating while the policy asks for another attempt. Returns once
    /// the policy has settled on connected or disconnected.
    async fn start_attempts(&mut self) {
        loop {
            self.stop_worker().await;
            if self.shutdown_pending() {
                return;
            }
            match self.start_verified().await {
                Ok((worker, connection)) => {
                    if self.connection.as_ref() != Some(&connection) {
                        info!(base_url = %connection.base_url, "worker endpoint adopted");
                    }
                    self.worker = Some(worker);
                    self.connection = Some(connection);
                    if let Some(step) = self.policy.on_event(PolicyEvent::Verified) {
                        self.publish(step, None);
                    }
                    return;
                }
                Err(err) => {
                    let category = err.category();
                    warn!(%category, "worker start failed: {err}");
                    let Some(step) = self.policy.on_event(PolicyEvent::StartFailed(category))
                    else {
                        return;
                    };
                    self.publish(step, Some(err.to_string()));
                    if !step.start_worker {
                        return;
                    }
                }
            }
        }
    }

    async fn start_verified(&self) -> Result<(WorkerHandle, ConnectionConfig), StartError> {
        let StartedWorker { mut worker, port } = start_worker(&self.config.launch).await?;
        let connection = ConnectionConfig::loopback(port);
        if let Err(source) = self.probe.check(&connection).await {
            worker.terminate(self.config.shutdown_grace).await;
            return Err(StartError::HealthCheck { port, source });
        }
        Ok((worker, connection))
    }

    async fn stop_worker(&mut self) {
        if let Some(mut worker) = self.worker.take() {
            info!(pid = worker.pid(), lifecycle = ?worker.lifecycle(), "stopping worker");
            worker.terminate(self.config.shutdown_grace).await;
        }
    }

    async fn shutdown(&mut self) {
        self.health = None;
        info!("shutting down the backend");
        self.stop_worker().await;
        if let Some(step) = self.policy.on_event(PolicyEvent::Shutdown) {
            self.publish(step, None);
        }
    }

    /// Publishes `step`, arming the health timer iff the new status is connected.
    fn publish(&mut self, step: Step, detail: Option<String>) {
        self.health = (step.status == ConnectionStatus::Connected).then(|| {
            let period = self.config.health_interval;
            let mut interval = tokio::time::interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            interval
        });

        let failure = step.failure.map(|category| {
            let message = detail.unwrap_or_else(|| category.user_message().to_string());
            if category.interrupts_user() {
                error!(%category, "{message}");
            }
            FailureReport::new(category, message)
        });
        let update = StatusUpdate {
            status: step.status,
            retry_count: step.retry_count,
            connection: self.connection.clone(),
            failure,
        };
        info!(
            status = %update.status,
            retry_count = update.retry_count,
            port = update.port(),
            "backend status changed"
        );
        self.status_tx.send_replace(update);
    }
}

async fn wait_for_exit(worker: Option<&mut WorkerHandle>) -> io::Result<ExitStatus> {
    match worker {
        Some(worker) => worker.wait_exit().await,
        None => std::future::pending().await,
    }
}

async fn next_tick(health: Option<&mut Interval>) {
    match health {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}
