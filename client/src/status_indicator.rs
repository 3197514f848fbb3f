//! Text for the connection indicator and the blocking failure dialog.

use std::path::Path;

use ninebox_protocol::ConnectionStatus;
use ninebox_protocol::DialogAction;
use ninebox_protocol::FailureReport;
use ninebox_protocol::StatusUpdate;

/// One line for the lightweight status indicator.
pub fn render_status_line(update: &StatusUpdate) -> String {
    match update.status {
        ConnectionStatus::Starting => "backend: starting".to_string(),
        ConnectionStatus::Connected => match update.base_url() {
            Some(base_url) => format!("backend: connected ({base_url})"),
            None => "backend: connected".to_string(),
        },
        ConnectionStatus::Reconnecting => {
            format!("backend: reconnecting (attempt {})", update.retry_count)
        }
        ConnectionStatus::Disconnected => match &update.failure {
            Some(failure) => format!("backend: disconnected ({})", failure.category),
            None => "backend: disconnected".to_string(),
        },
    }
}

/// `true` when the update calls for the blocking dialog rather than just the indicator: automatic
/// recovery is over and it ended in a failure. A clean shutdown needs no dialog.
pub fn needs_dialog(update: &StatusUpdate) -> bool {
    update.status == ConnectionStatus::Disconnected && update.failure.is_some()
}

pub fn action_label(action: DialogAction) -> &'static str {
    match action {
        DialogAction::Retry => "[r] retry",
        DialogAction::ShowLogs => "[l] show logs",
        DialogAction::Reinstall => "reinstall the application",
        DialogAction::Quit => "[q] quit",
    }
}

/// Body of the blocking dialog: the category's message, the specific detail, and what the user
/// can do next.
pub fn failure_dialog(report: &FailureReport, log_path: Option<&Path>) -> String {
    let mut lines = vec![
        report.category.user_message().to_string(),
        format!("Details: {}", report.message),
    ];
    if let Some(log_path) = log_path {
        lines.push(format!("Log file: {}", log_path.display()));
    }
    let actions: Vec<&str> = report
        .category
        .dialog_actions()
        .iter()
        .map(|action| action_label(*action))
        .collect();
    lines.push(format!("Options: {}", actions.join(", ")));
    lines.join("\n")
}
