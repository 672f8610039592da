//! Administrative HTTP Interface
//!
//! - `GET /` reports the server state as JSON
//! - `POST /shutdown` stops the accept loop at its next cycle
//! - `POST /clear` empties the file store

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tftp::ServerState;
use tokio::net::TcpListener;

pub const DEFAULT_ADMIN_ADDRESS: &str = "0.0.0.0:8069";

/// Body of `GET /`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Status {
    pub running: bool,
    pub received_request_count: u64,
    /// File name → size in bytes
    pub files: BTreeMap<String, usize>,
}

impl Status {
    fn of(state: &ServerState) -> Self {
        Self {
            running: state.is_running(),
            received_request_count: state.received_request_count(),
            files: state.store().snapshot(),
        }
    }
}

pub fn router(state: Arc<ServerState>) -> Router {
    Router::new()
        .route("/", get(status))
        .route("/shutdown", post(shutdown))
        .route("/clear", post(clear))
        .with_state(state)
}

async fn status(State(state): State<Arc<ServerState>>) -> Json<Status> {
    Json(Status::of(&state))
}

async fn shutdown(State(state): State<Arc<ServerState>>) -> StatusCode {
    tracing::info!("[admin] /shutdown");
    state.shutdown();
    StatusCode::NO_CONTENT
}

async fn clear(State(state): State<Arc<ServerState>>) -> StatusCode {
    tracing::info!("[admin] /clear");
    state.store().clear();
    StatusCode::NO_CONTENT
}

/// Bind the admin listener, so that a taken port fails start-up
pub async fn bind_admin(addr: SocketAddr) -> Result<TcpListener> {
    TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind admin interface to {}", addr))
}

/// Serve the admin interface until the process exits
pub async fn serve_admin(listener: TcpListener, state: Arc<ServerState>) -> Result<()> {
    let addr = listener.local_addr().context("Failed to get admin address")?;
    tracing::info!("Admin interface at http://{}", addr);
    axum::serve(listener, router(state))
        .await
        .context("Admin interface failed")
}

#[cfg(test)]
mod tests {
    use axum::body::{Body, to_bytes};
    use axum::http::{Method, Request};
    use tftp::{FileStore, TftpServer, TftpServerConfig};
    use tower::ServiceExt;

    use super::*;

    fn running_state(store: FileStore) -> (TftpServer, Arc<ServerState>) {
        let config = TftpServerConfig {
            bind_address: "127.0.0.1:0".to_string(),
            ..Default::default()
        };
        let mut server = TftpServer::new(config, store);
        server.bind().unwrap();
        let state = server.state();
        (server, state)
    }

    fn request(method: Method, uri: &str) -> Request<Body> {
        Request::builder().method(method).uri(uri).body(Body::empty()).unwrap()
    }

    async fn get_status(state: &Arc<ServerState>) -> Status {
        let response = router(Arc::clone(state))
            .oneshot(request(Method::GET, "/"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&body).unwrap()
    }

    #[tokio::test]
    async fn test_status() {
        let store = FileStore::new();
        store.open_write("pxelinux.0").unwrap().write(&[0u8; 1000]).unwrap();
        let (_server, state) = running_state(store);

        let status = get_status(&state).await;
        assert!(status.running);
        assert_eq!(status.received_request_count, 0);
        assert_eq!(status.files.len(), 1);
        assert_eq!(status.files["pxelinux.0"], 1000);
    }

    #[tokio::test]
    async fn test_status_json_fields() {
        let (_server, state) = running_state(FileStore::new());
        let response = router(state).oneshot(request(Method::GET, "/")).await.unwrap();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();

        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["running"], true);
        assert_eq!(json["received_request_count"], 0);
        assert!(json["files"].as_object().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_shutdown() {
        let (_server, state) = running_state(FileStore::new());

        let response = router(Arc::clone(&state))
            .oneshot(request(Method::POST, "/shutdown"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
        assert!(!state.is_running());
        assert!(!get_status(&state).await.running);
    }

    #[tokio::test]
    async fn test_clear() {
        let store = FileStore::new();
        store.open_write("a").unwrap().write(b"1").unwrap();
        store.open_write("b").unwrap().write(b"22").unwrap();
        let (_server, state) = running_state(store.clone());

        let response = router(Arc::clone(&state))
            .oneshot(request(Method::POST, "/clear"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
        assert!(store.snapshot().is_empty());
        assert!(state.is_running());
    }

    #[tokio::test]
    async fn test_mutations_require_post() {
        let (_server, state) = running_state(FileStore::new());
        let response = router(Arc::clone(&state))
            .oneshot(request(Method::GET, "/shutdown"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
        assert!(state.is_running());
    }

    #[tokio::test]
    async fn test_bind_admin() {
        let listener = bind_admin("127.0.0.1:0".parse().unwrap()).await.unwrap();
        let addr = listener.local_addr().unwrap();
        assert!(bind_admin(addr).await.is_err());
    }
}
