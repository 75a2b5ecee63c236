//! Mock mesh aggregation service
//!
//! Serves `GET /status` with whatever payload the test sets.

use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::get, Json, Router};
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;

type Shared = Arc<RwLock<Option<Value>>>;

pub struct MockMapService {
    addr: SocketAddr,
    payload: Shared,
    handle: JoinHandle<()>,
}

impl MockMapService {
    pub async fn start() -> Self {
        let payload: Shared = Arc::new(RwLock::new(Some(json!({
            "nodeInfos": [],
            "linkQuality": []
        }))));

        let app = Router::new()
            .route("/status", get(handle_status))
            .with_state(payload.clone());

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            addr,
            payload,
            handle,
        }
    }

    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub async fn set_payload(&self, payload: Value) {
        *self.payload.write().await = Some(payload);
    }

    /// Make `/status` answer 503
    pub async fn fail(&self) {
        *self.payload.write().await = None;
    }

    pub async fn stop(self) {
        self.handle.abort();
    }
}

async fn handle_status(State(payload): State<Shared>) -> impl IntoResponse {
    match payload.read().await.clone() {
        Some(body) => (StatusCode::OK, Json(body)).into_response(),
        None => StatusCode::SERVICE_UNAVAILABLE.into_response(),
    }
}
