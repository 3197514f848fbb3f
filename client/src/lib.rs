//! UI-side access to the ninebox backend: status queries, change notifications, manual retry
//! and an HTTP client that rides out worker restarts.

mod backend_client;
mod link;
mod retry;
mod status_consumer;
pub mod status_indicator;
mod version;

pub use backend_client::BackendClient;
pub use backend_client::ClientError;
pub use backend_client::loopback_http_client;
pub use link::BackendLink;
pub use link::SupervisorGone;
pub use retry::RetryDecision;
pub use retry::RetryPolicy;
pub use retry::retry_connection_failures;
pub use status_consumer::ConnectionStatusConsumer;
pub use status_consumer::StatusSubscription;
pub use version::NINEBOX_VERSION;
