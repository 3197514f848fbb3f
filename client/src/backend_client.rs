use reqwest::RequestBuilder;
use reqwest::StatusCode;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

use ninebox_protocol::HEALTH_PATH;
use ninebox_protocol::join_url;

use crate::link::BackendLink;
use crate::retry::RetryPolicy;
use crate::retry::retry_connection_failures;
use crate::version::NINEBOX_VERSION;

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("the backend has not been verified yet")]
    NotConnected,
    #[error("could not reach the backend at {url}: {source}")]
    Connection {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("the backend answered {status}: {body}")]
    Status { status: StatusCode, body: String },
    #[error("failed to decode the backend response: {0}")]
    Decode(#[source] reqwest::Error),
    #[error("failed to build the request: {0}")]
    Request(#[source] reqwest::Error),
}

impl ClientError {
    /// `true` when no response was received, so sending again cannot repeat a side effect.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ClientError::NotConnected | ClientError::Connection { .. }
        )
    }
}

/// Builds the HTTP client used for every call to the worker. Proxy settings from the environment
/// are ignored: the worker only listens on loopback.
pub fn loopback_http_client() -> reqwest::Result<reqwest::Client> {
    reqwest::Client::builder()
        .no_proxy()
        .user_agent(format!("ninebox/{NINEBOX_VERSION}"))
        .build()
}

/// HTTP client for the backend that re-resolves the base URL on every attempt.
#[derive(Debug, Clone)]
pub struct BackendClient {
    http: reqwest::Client,
    link: BackendLink,
    policy: RetryPolicy,
}

impl BackendClient {
    pub fn new(link: BackendLink, policy: RetryPolicy) -> reqwest::Result<Self> {
        Ok(Self::with_http_client(loopback_http_client()?, link, policy))
    }

    pub fn with_http_client(
        http: reqwest::Client,
        link: BackendLink,
        policy: RetryPolicy,
    ) -> Self {
        Self { http, link, policy }
    }

    pub fn link(&self) -> &BackendLink {
        &self.link
    }

    pub async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, ClientError> {
        self.execute(path, |http, url| http.get(url)).await
    }

    pub async fn post_json<B, T>(&self, path: &str, body: &B) -> Result<T, ClientError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        self.execute(path, |http, url| http.post(url).json(body)).await
    }

    /// Hits the liveness endpoint through the retry wrapper.
    pub async fn ping(&self) -> Result<Value, ClientError> {
        self.get_json(HEALTH_PATH).await
    }

    async fn execute<T, B>(&self, path: &str, build: B) -> Result<T, ClientError>
    where
        T: DeserializeOwned,
        B: Fn(&reqwest::Client, String) -> RequestBuilder,
    {
        let http = &self.http;
        let link = &self.link;
        let build = &build;
        retry_connection_failures(&self.policy, ClientError::is_retryable, move |_| async move {
            let base_url = link.current_base_url().ok_or(ClientError::NotConnected)?;
            let url = join_url(&base_url, path);
            let response = build(http, url.clone())
                .send()
                .await
                .map_err(|source| classify_send_error(url, source))?;

            let status = response.status();
            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                return Err(ClientError::Status { status, body });
            }
            response.json::<T>().await.map_err(ClientError::Decode)
        })
        .await
    }
}

fn classify_send_error(url: String, source: reqwest::Error) -> ClientError {
    if source.is_builder() {
        ClientError::Request(source)
    } else {
        ClientError::Connection { url, source }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::link::test_support::fake_link;
    use axum::Json;
    use axum::Router;
    use axum::http::StatusCode as AxumStatus;
    use axum::routing::get;
    use ninebox_protocol::ConnectionConfig;
    use ninebox_protocol::ConnectionStatus;
    use ninebox_protocol::StatusUpdate;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use serial_test::serial;
    use std::net::Ipv4Addr;
    use std::sync::Arc;
    use std::sync::atomic::AtomicUsize;
    use std::sync::atomic::Ordering;
    use std::time::Duration;
    use tokio::net::TcpListener;

    fn connected(port: u16) -> StatusUpdate {
        StatusUpdate {
            status: ConnectionStatus::Connected,
            retry_count: 0,
            connection: Some(ConnectionConfig::loopback(port)),
            failure: None,
        }
    }

    fn fast_policy() -> RetryPolicy {
        RetryPolicy {
            max_retries: 3,
            base_delay: Duration::from_millis(20),
            factor: 2,
            max_delay: Duration::from_millis(200),
        }
    }

    async fn serve(router: Router) -> u16 {
        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0))
            .await
            .expect("bind");
        let port = listener.local_addr().expect("local addr").port();
        tokio::spawn(async move {
            let _ = axum::serve(listener, router).await;
        });
        port
    }

    fn closed_port() -> u16 {
        let listener = std::net::TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).expect("bind");
        listener.local_addr().expect("local addr").port()
    }

    struct EnvVarGuard {
        key: &'static str,
        prev: Option<std::ffi::OsString>,
    }

    impl EnvVarGuard {
        fn set(key: &'static str, value: Option<&str>) -> Self {
            let prev = std::env::var_os(key);
            // Safety: tests touching the environment are serialized and restore it on drop.
            unsafe {
                match value {
                    Some(value) => std::env::set_var(key, value),
                    None => std::env::remove_var(key),
                }
            }
            Self { key, prev }
        }
    }

    impl Drop for EnvVarGuard {
        fn drop(&mut self) {
            match self.prev.take() {
                Some(value) => unsafe {
                    std::env::set_var(self.key, value);
                },
                None => unsafe {
                    std::env::remove_var(self.key);
                },
            }
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    #[serial]
    async fn proxy_environment_does_not_divert_backend_calls() {
        let port = serve(
            Router::new().route(HEALTH_PATH, get(|| async { Json(json!({ "status": "ok" })) })),
        )
        .await;
        let dead_proxy = format!("http://127.0.0.1:{}", closed_port());
        let _env = [
            EnvVarGuard::set("HTTP_PROXY", Some(&dead_proxy)),
            EnvVarGuard::set("http_proxy", Some(&dead_proxy)),
            EnvVarGuard::set("ALL_PROXY", Some(&dead_proxy)),
            EnvVarGuard::set("NO_PROXY", None),
            EnvVarGuard::set("no_proxy", None),
        ];
        let (link, _status_tx, _commands) = fake_link(connected(port));
        let client = BackendClient::new(link, RetryPolicy::none()).expect("client");

        let body = client.ping().await.expect("ping bypasses the proxy");
        assert_eq!(body, json!({ "status": "ok" }));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn error_status_is_returned_without_retrying() {
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&hits);
        let router = Router::new().route(
            "/api/grid",
            get(move || {
                let counter = Arc::clone(&counter);
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    (AxumStatus::SERVICE_UNAVAILABLE, "busy")
                }
            }),
        );
        let port = serve(router).await;
        let (link, _status_tx, _commands) = fake_link(connected(port));
        let client = BackendClient::new(link, fast_policy()).expect("client");

        let err = client
            .get_json::<Value>("/api/grid")
            .await
            .expect_err("503 must surface");

        match err {
            ClientError::Status { status, body } => {
                assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
                assert_eq!(body, "busy");
            }
            other => panic!("expected a status error, got {other:?}"),
        }
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn unreachable_backend_surfaces_a_connection_error() {
        let (link, _status_tx, _commands) = fake_link(connected(closed_port()));
        let client = BackendClient::new(link, fast_policy()).expect("client");

        let err = client.ping().await.expect_err("nothing is listening");

        assert!(err.is_retryable(), "unexpected error: {err:?}");
        assert!(matches!(err, ClientError::Connection { .. }));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn port_change_during_backoff_is_picked_up() {
        let live_port = serve(
            Router::new().route(HEALTH_PATH, get(|| async { Json(json!({ "status": "ok" })) })),
        )
        .await;
        let (link, status_tx, _commands) = fake_link(connected(closed_port()));
        let client = BackendClient::new(
            link,
            RetryPolicy {
                base_delay: Duration::from_millis(300),
                ..fast_policy()
            },
        )
        .expect("client");

        let ping = tokio::spawn(async move { client.ping().await });
        tokio::time::sleep(Duration::from_millis(100)).await;
        status_tx.send_replace(connected(live_port));

        let body = ping
            .await
            .expect("ping task panicked")
            .expect("ping after port change");
        assert_eq!(body, json!({ "status": "ok" }));
    }

    #[tokio::test]
    async fn not_connected_is_retried_then_reported() {
        let (link, _status_tx, _commands) = fake_link(StatusUpdate::starting());
        let client = BackendClient::new(
            link,
            RetryPolicy {
                base_delay: Duration::from_millis(1),
                ..fast_policy()
            },
        )
        .expect("client");

        let err = client.ping().await.expect_err("no base url yet");
        assert!(matches!(err, ClientError::NotConnected));
    }
}
