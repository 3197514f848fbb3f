//! The UI side of the host/UI boundary.
//!
//! A [`BackendLink`] is the only thing a UI surface holds: a read-only mirror of the supervisor's
//! leveled status and a command sender. Queries never leave the process.

use ninebox_protocol::StatusUpdate;
use ninebox_protocol::SupervisorCommand;
use tokio::sync::mpsc;
use tokio::sync::watch;

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("the backend supervisor is no longer running")]
pub struct SupervisorGone;

#[derive(Debug, Clone)]
pub struct BackendLink {
    status_rx: watch::Receiver<StatusUpdate>,
    command_tx: mpsc::UnboundedSender<SupervisorCommand>,
}

impl BackendLink {
    pub fn new(
        status_rx: watch::Receiver<StatusUpdate>,
        command_tx: mpsc::UnboundedSender<SupervisorCommand>,
    ) -> Self {
        Self {
            status_rx,
            command_tx,
        }
    }

    pub fn snapshot(&self) -> StatusUpdate {
        self.status_rx.borrow().clone()
    }

    /// Last port that passed a liveness check, if any worker has been verified yet.
    pub fn current_port(&self) -> Option<u16> {
        self.status_rx.borrow().port()
    }

    pub fn current_base_url(&self) -> Option<String> {
        self.status_rx.borrow().base_url().map(str::to_string)
    }

    /// A fresh receiver for status changes. The current value counts as already seen.
    pub fn subscribe(&self) -> watch::Receiver<StatusUpdate> {
        let mut rx = self.status_rx.clone();
        rx.borrow_and_update();
        rx
    }

    pub fn send(&self, command: SupervisorCommand) -> Result<(), SupervisorGone> {
        self.command_tx.send(command).map_err(|_| SupervisorGone)
    }

    pub fn manual_retry(&self) -> Result<(), SupervisorGone> {
        self.send(SupervisorCommand::ManualRetry)
    }

    pub fn request_shutdown(&self) -> Result<(), SupervisorGone> {
        self.send(SupervisorCommand::Shutdown)
    }
}
