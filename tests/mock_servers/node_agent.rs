//! Mock node agent for testing
//!
//! Serves the agent's REST API on a random local port. Each endpoint's
//! answer, HTTP status and latency can be changed while the server runs, and
//! command requests are recorded.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;

/// Mock agent state
struct AgentState {
    node_status: String,
    attributes: Value,
    manet: Value,
    /// Status code for GET endpoints
    read_status: u16,
    setup_status: u16,
    config_status: u16,
    config_message: String,
    delay: Duration,
    setup_actions: Vec<String>,
    config_updates: Vec<Value>,
}

impl Default for AgentState {
    fn default() -> Self {
        Self {
            node_status: "OFF".to_string(),
            attributes: json!({
                "gnb_id": "411",
                "gnb_pci": "17",
                "cpu_usage": "12.5",
                "ram_total": "2000",
                "ram_usage": "25",
                "tx_power": 23,
                "ip_address_gnb": "127.0.0.1",
            }),
            manet: json!({
                "status": "Connected",
                "nodeInfo": [{"id": 5, "label": "alpha"}],
                "selfManetInfo": {"id": 5, "label": "alpha"},
            }),
            read_status: 200,
            setup_status: 200,
            config_status: 200,
            config_message: String::new(),
            delay: Duration::ZERO,
            setup_actions: Vec::new(),
            config_updates: Vec::new(),
        }
    }
}

type Shared = Arc<RwLock<AgentState>>;

/// Mock node agent
pub struct MockNodeAgent {
    addr: SocketAddr,
    state: Shared,
    handle: JoinHandle<()>,
}

impl MockNodeAgent {
    /// Start a mock agent on a random port
    pub async fn start() -> Self {
        let state: Shared = Arc::new(RwLock::new(AgentState::default()));

        let app = Router::new()
            .route("/api/attributes", get(handle_attributes))
            .route("/api/node_status", get(handle_node_status))
            .route("/api/manet_status", get(handle_manet_status))
            .route("/api/setup_script", post(handle_setup_script))
            .route("/api/config", post(handle_config))
            .route("/api/download/{file}", get(handle_download))
            .with_state(state.clone());

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let handle = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            addr,
            state,
            handle,
        }
    }

    /// Address to track in the roster
    pub fn host(&self) -> String {
        self.addr.ip().to_string()
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    pub async fn set_node_status(&self, status: &str) {
        self.state.write().await.node_status = status.to_string();
    }

    pub async fn set_attributes(&self, attributes: Value) {
        self.state.write().await.attributes = attributes;
    }

    pub async fn set_manet(&self, manet: Value) {
        self.state.write().await.manet = manet;
    }

    /// Status code for attribute, status and MANET reads
    pub async fn set_read_status(&self, code: u16) {
        self.state.write().await.read_status = code;
    }

    pub async fn set_setup_status(&self, code: u16) {
        self.state.write().await.setup_status = code;
    }

    pub async fn set_config_response(&self, code: u16, message: &str) {
        let mut state = self.state.write().await;
        state.config_status = code;
        state.config_message = message.to_string();
    }

    /// Latency added to every response
    pub async fn set_delay(&self, delay: Duration) {
        self.state.write().await.delay = delay;
    }

    pub async fn setup_actions(&self) -> Vec<String> {
        self.state.read().await.setup_actions.clone()
    }

    pub async fn config_updates(&self) -> Vec<Value> {
        self.state.read().await.config_updates.clone()
    }

    /// Stop the mock agent
    pub async fn stop(self) {
        self.handle.abort();
    }
}

fn status(code: u16) -> StatusCode {
    StatusCode::from_u16(code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
}

/// Copy out what a read handler needs, then apply the configured delay
async fn read_snapshot<T>(state: &Shared, pick: impl FnOnce(&AgentState) -> T) -> (u16, T) {
    let (code, delay, value) = {
        let s = state.read().await;
        (s.read_status, s.delay, pick(&s))
    };
    tokio::time::sleep(delay).await;
    (code, value)
}

async fn handle_attributes(State(state): State<Shared>) -> Response {
    let (code, body) = read_snapshot(&state, |s| s.attributes.clone()).await;
    (status(code), Json(body)).into_response()
}

async fn handle_node_status(State(state): State<Shared>) -> Response {
    let (code, node_status) = read_snapshot(&state, |s| s.node_status.clone()).await;
    (status(code), Json(json!({ "node_status": node_status }))).into_response()
}

async fn handle_manet_status(State(state): State<Shared>) -> Response {
    let (code, body) = read_snapshot(&state, |s| s.manet.clone()).await;
    (status(code), Json(body)).into_response()
}

async fn handle_setup_script(State(state): State<Shared>, Json(body): Json<Value>) -> Response {
    let action = body["action"].as_str().unwrap_or_default().to_string();
    let (code, delay) = {
        let mut s = state.write().await;
        s.setup_actions.push(action.clone());
        (s.setup_status, s.delay)
    };
    tokio::time::sleep(delay).await;

    if code == 200 && action == "setupv2" {
        state.write().await.node_status = "RUNNING".to_string();
    } else if code == 200 && action == "stop" {
        state.write().await.node_status = "OFF".to_string();
    }
    (status(code), Json(json!({ "message": format!("{} -> {}", action, code) }))).into_response()
}

async fn handle_config(State(state): State<Shared>, Json(body): Json<Value>) -> Response {
    let (code, message) = {
        let mut s = state.write().await;
        s.config_updates.push(body);
        (s.config_status, s.config_message.clone())
    };
    (status(code), Json(json!({ "message": message }))).into_response()
}

async fn handle_download(Path(file): Path<String>) -> Response {
    match file.as_str() {
        "du_log" | "cu_log" | "setup_log" => format!("{} line 1\n{} line 2\n", file, file).into_response(),
        _ => StatusCode::NOT_FOUND.into_response(),
    }
}
