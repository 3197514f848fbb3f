use std::future::Future;
use std::io;
use std::sync::Arc;

use axum::Json;
use axum::Router;
use axum::extract::State;
use axum::routing::get;
use ninebox_protocol::HEALTH_PATH;
use serde::Serialize;
use serde_json::Value;
use serde_json::json;
use tokio::net::TcpListener;

pub const INFO_PATH: &str = "/api/info";

#[derive(Debug)]
struct ServerState {
    port: u16,
}

#[derive(Debug, Serialize)]
struct InfoResponse {
    name: &'static str,
    version: &'static str,
    port: u16,
}

pub fn router(port: u16) -> Router {
    Router::new()
        .route(HEALTH_PATH, get(health_handler))
        .route(INFO_PATH, get(info_handler))
        .with_state(Arc::new(ServerState { port }))
}

/// Serves the worker API on an already-bound listener until `shutdown` resolves.
pub async fn serve<F>(listener: TcpListener, shutdown: F) -> io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let port = listener.local_addr()?.port();
    axum::serve(listener, router(port))
        .with_graceful_shutdown(shutdown)
        .await
}

async fn health_handler() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

async fn info_handler(State(state): State<Arc<ServerState>>) -> Json<InfoResponse> {
    Json(InfoResponse {
        name: env!("CARGO_PKG_NAME"),
        version: env!("CARGO_PKG_VERSION"),
        port: state.port,
    })
}
