//! Types shared by the ninebox host, its UI surfaces and the worker: the stdout handshake, the
//! leveled connection status, supervisor commands and the failure categories shown to users.

mod error_category;
mod handshake;
mod status;

pub use error_category::DialogAction;
pub use error_category::ErrorCategory;
pub use error_category::FailureReport;
pub use handshake::HandshakeMessage;
pub use handshake::HandshakeParseError;
pub use handshake::HandshakeStatus;
pub use status::ConnectionConfig;
pub use status::ConnectionStatus;
pub use status::LOOPBACK_HOST;
pub use status::StatusUpdate;
pub use status::SupervisorCommand;
pub use status::join_url;

/// Path of the worker's liveness endpoint.
pub const HEALTH_PATH: &str = "/api/health";

/// Environment variable carrying the preferred port into the worker.
pub const PORT_ENV_VAR: &str = "NINEBOX_PORT";

/// Environment variable carrying the application data directory into the worker.
pub const DATA_DIR_ENV_VAR: &str = "NINEBOX_DATA_DIR";
