//! UI-side view of the backend connection.
//!
//! The consumer holds no state of its own: every read goes to the supervisor's leveled status,
//! and a manual retry is a command that makes the supervisor run a fresh worker start.

use ninebox_protocol::ConnectionStatus;
use ninebox_protocol::StatusUpdate;
use tokio::task::AbortHandle;
use tokio::task::JoinHandle;

use crate::link::BackendLink;
use crate::link::SupervisorGone;

/// Keeps a status watcher alive. Dropping it stops the watcher and releases its receiver.
#[derive(Debug)]
#[must_use = "dropping the subscription stops status notifications"]
pub struct StatusSubscription {
    task: Option<JoinHandle<()>>,
}

impl StatusSubscription {
    /// Stops the watcher and waits until it has released its receiver.
    pub async fn unsubscribe(mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
            let _ = task.await;
        }
    }
}

impl Drop for StatusSubscription {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

#[derive(Debug)]
pub struct ConnectionStatusConsumer {
    link: BackendLink,
    active: Option<AbortHandle>,
}

impl ConnectionStatusConsumer {
    pub fn new(link: BackendLink) -> Self {
        Self { link, active: None }
    }

    /// Starts delivering status to `on_change`: the current value right away, then every change.
    ///
    /// Activating again stops the previous watcher first, so repeated activations never stack
    /// listeners. Must be called from within a tokio runtime.
    pub fn activate<F>(&mut self, mut on_change: F) -> StatusSubscription
    where
        F: FnMut(&StatusUpdate) + Send + 'static,
    {
        if let Some(previous) = self.active.take() {
            previous.abort();
        }

        let mut status_rx = self.link.subscribe();
        let task = tokio::spawn(async move {
            let initial = status_rx.borrow_and_update().clone();
            on_change(&initial);
            while status_rx.changed().await.is_ok() {
                let update = status_rx.borrow_and_update().clone();
                on_change(&update);
            }
        });
        self.active = Some(task.abort_handle());
        StatusSubscription { task: Some(task) }
    }

    pub fn snapshot(&self) -> StatusUpdate {
        self.link.snapshot()
    }

    pub fn status(&self) -> ConnectionStatus {
        self.snapshot().status
    }

    pub fn retry_count(&self) -> u32 {
        self.snapshot().retry_count
    }

    /// Asks the supervisor to run a fresh worker start. The supervisor ignores the request unless
    /// it is disconnected; progress shows up through the subscription.
    pub fn manual_retry(&self) -> Result<(), SupervisorGone> {
        self.link.manual_retry()
    }
}

impl Drop for ConnectionStatusConsumer {
    fn drop(&mut self) {
        if let Some(active) = self.active.take() {
            active.abort();
        }
    }
}
