use serde::Deserialize;
use serde::Serialize;
use strum_macros::Display;

/// Why a worker start or a running worker failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ErrorCategory {
    /// The worker binary is missing or cannot be executed.
    ExecutableNotFound,
    /// The worker did not announce readiness in time.
    HandshakeTimeout,
    /// The worker exited before announcing readiness.
    CrashBeforeHandshake,
    /// The worker exited after it had been verified as ready.
    CrashAfterReady,
    /// The worker announced a port but did not answer its liveness endpoint.
    HealthCheckFailure,
    /// The single automatic restart of a failure episode did not bring the worker back.
    RestartFailed,
}

/// Actions offered by the blocking dialog for an unrecoverable failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum DialogAction {
    Retry,
    ShowLogs,
    Reinstall,
    Quit,
}

impl ErrorCategory {
    /// `false` for failures the restart policy normally absorbs. They reach the user only when
    /// automatic recovery gives up.
    pub fn interrupts_user(self) -> bool {
        !matches!(
            self,
            ErrorCategory::CrashAfterReady | ErrorCategory::HealthCheckFailure
        )
    }

    pub fn dialog_actions(self) -> &'static [DialogAction] {
        match self {
            ErrorCategory::ExecutableNotFound => &[DialogAction::Reinstall, DialogAction::Quit],
            ErrorCategory::HandshakeTimeout
            | ErrorCategory::CrashBeforeHandshake
            | ErrorCategory::RestartFailed => &[
                DialogAction::Retry,
                DialogAction::ShowLogs,
                DialogAction::Quit,
            ],
            ErrorCategory::CrashAfterReady | ErrorCategory::HealthCheckFailure => {
                &[DialogAction::Retry, DialogAction::Quit]
            }
        }
    }

    /// Short, user-facing explanation. Details belong in the log file.
    pub fn user_message(self) -> &'static str {
        match self {
            ErrorCategory::ExecutableNotFound => {
                "The ninebox backend is missing from this installation. Reinstall the application."
            }
            ErrorCategory::HandshakeTimeout => {
                "The ninebox backend did not finish starting in time."
            }
            ErrorCategory::CrashBeforeHandshake => {
                "The ninebox backend stopped while it was starting."
            }
            ErrorCategory::CrashAfterReady => "The ninebox backend stopped unexpectedly.",
            ErrorCategory::HealthCheckFailure => "The ninebox backend is not responding.",
            ErrorCategory::RestartFailed => {
                "The ninebox backend stopped and could not be restarted automatically."
            }
        }
    }
}

/// The last failure observed by the supervisor, as shown to the user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureReport {
    pub category: ErrorCategory,
    /// One-line description of what went wrong, without stack traces.
    pub message: String,
}

impl FailureReport {
    pub fn new(category: ErrorCategory, message: impl Into<String>) -> Self {
        Self {
            category,
            message: message.into(),
        }
    }
}
