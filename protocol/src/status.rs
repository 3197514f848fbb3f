//! Connection state shared between the supervisor and every UI surface.
//!
//! The supervisor is the only writer. Everyone else holds a read-only mirror of the latest
//! [`StatusUpdate`], refreshed by broadcast or by querying the supervisor handle.

use serde::Deserialize;
use serde::Serialize;
use strum_macros::Display;

use crate::error_category::FailureReport;

pub const LOOPBACK_HOST: &str = "127.0.0.1";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ConnectionStatus {
    /// The first worker start has not completed yet.
    Starting,
    /// The worker passed its latest liveness check.
    Connected,
    /// A failure was detected and a restart is in flight.
    Reconnecting,
    /// Automatic recovery is exhausted (or shutdown completed); a human has to act.
    Disconnected,
}

/// The verified endpoint of the running worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionConfig {
    pub port: u16,
    pub base_url: String,
}

impl ConnectionConfig {
    pub fn loopback(port: u16) -> Self {
        Self {
            port,
            base_url: format!("http://{LOOPBACK_HOST}:{port}"),
        }
    }

    /// Joins `path` onto the base URL, tolerating a missing leading slash.
    pub fn url(&self, path: &str) -> String {
        join_url(&self.base_url, path)
    }
}

pub fn join_url(base_url: &str, path: &str) -> String {
    let base = base_url.trim_end_matches('/');
    let path = path.trim_start_matches('/');
    format!("{base}/{path}")
}

/// Leveled connection status: the current truth, not an event log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusUpdate {
    pub status: ConnectionStatus,
    /// Restart attempts in the current failure episode. Always 0 while connected.
    pub retry_count: u32,
    /// Last endpoint that passed a liveness check. Survives restarts and disconnects.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connection: Option<ConnectionConfig>,
    /// Most recent failure, cleared on reconnect.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<FailureReport>,
}

impl StatusUpdate {
    pub fn starting() -> Self {
        Self {
            status: ConnectionStatus::Starting,
            retry_count: 0,
            connection: None,
            failure: None,
        }
    }

    pub fn port(&self) -> Option<u16> {
        self.connection.as_ref().map(|connection| connection.port)
    }

    pub fn base_url(&self) -> Option<&str> {
        self.connection
            .as_ref()
            .map(|connection| connection.base_url.as_str())
    }

    pub fn is_connected(&self) -> bool {
        self.status == ConnectionStatus::Connected
    }
}

/// Requests a UI surface can make of the supervisor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SupervisorCommand {
    /// Re-run the worker startup after automatic recovery gave up.
    ManualRetry,
    /// Stop health checks and terminate the worker.
    Shutdown,
}
