//! Connection state machine for the supervisor.
//!
//! Pure bookkeeping: the supervisor feeds it what happened and gets back the status to publish
//! and whether to start a worker. Automatic restarts are capped per failure episode; an episode
//! ends only when a worker is verified again.

use ninebox_protocol::ConnectionStatus;
use ninebox_protocol::ErrorCategory;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolicyEvent {
    /// A worker start passed its post-handshake liveness check.
    Verified,
    /// A worker start failed with the given category.
    StartFailed(ErrorCategory),
    /// The verified worker failed a periodic check or exited on its own.
    Lost(ErrorCategory),
    ManualRetry,
    Shutdown,
}

/// A state change to publish.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Step {
    pub status: ConnectionStatus,
    pub retry_count: u32,
    /// Category to report with this status, if it is the result of a failure.
    pub failure: Option<ErrorCategory>,
    /// The supervisor must (re)start the worker after publishing.
    pub start_worker: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Attempt {
    Automatic,
    Manual,
}

#[derive(Debug)]
pub struct RestartPolicy {
    status: ConnectionStatus,
    retry_count: u32,
    auto_restarts: u32,
    max_auto_restarts: u32,
    attempt: Attempt,
}

impl RestartPolicy {
    pub fn new(max_auto_restarts: u32) -> Self {
        Self {
            status: ConnectionStatus::Starting,
            retry_count: 0,
            auto_restarts: 0,
            max_auto_restarts,
            attempt: Attempt::Automatic,
        }
    }

    pub fn status(&self) -> ConnectionStatus {
        self.status
    }

    pub fn retry_count(&self) -> u32 {
        self.retry_count
    }

    /// Applies `event`. Returns `None` when the event causes no transition.
    pub fn on_event(&mut self, event: PolicyEvent) -> Option<Step> {
        use ConnectionStatus::Connected;
        use ConnectionStatus::Disconnected;
        use ConnectionStatus::Reconnecting;
        use ConnectionStatus::Starting;

        match (self.status, event) {
            (_, PolicyEvent::Shutdown) => Some(self.enter(Disconnected, None, false)),

            (Starting | Reconnecting, PolicyEvent::Verified) => {
                self.retry_count = 0;
                self.auto_restarts = 0;
                Some(self.enter(Connected, None, false))
            }
            (Starting, PolicyEvent::StartFailed(category)) => {
                Some(self.enter(Disconnected, Some(category), false))
            }

            (Connected, PolicyEvent::Lost(category)) => Some(self.restart_or_give_up(category)),

            (Reconnecting, PolicyEvent::StartFailed(category)) => match self.attempt {
                Attempt::Manual => Some(self.enter(Disconnected, Some(category), false)),
                Attempt::Automatic => Some(self.restart_or_give_up(ErrorCategory::RestartFailed)),
            },

            (Disconnected, PolicyEvent::ManualRetry) => {
                self.retry_count += 1;
                self.attempt = Attempt::Manual;
                Some(self.enter(Reconnecting, None, true))
            }

            // Connected -> connected is not a transition, and nothing else applies in the
            // remaining combinations.
            _ => None,
        }
    }

    fn restart_or_give_up(&mut self, category: ErrorCategory) -> Step {
        if self.auto_restarts < self.max_auto_restarts {
            self.auto_restarts += 1;
            self.retry_count += 1;
            self.attempt = Attempt::Automatic;
            return self.enter(ConnectionStatus::Reconnecting, Some(category), true);
        }

        let reported = if self.status == ConnectionStatus::Reconnecting {
            ErrorCategory::RestartFailed
        } else {
            category
        };
        self.enter(ConnectionStatus::Disconnected, Some(reported), false)
    }

    fn enter(
        &mut self,
        status: ConnectionStatus,
        failure: Option<ErrorCategory>,
        start_worker: bool,
    ) -> Step {
        self.status = status;
        Step {
            status,
            retry_count: self.retry_count,
            failure,
            start_worker,
        }
    }
}
