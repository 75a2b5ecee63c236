//! HTTP API handlers

use crate::bus::SharedBus;
use crate::map_data::{MapDataLoader, MapSnapshot};
use crate::node::{FetchError, LogKind, NodeError, NodeSnapshot};
use crate::roster::Roster;
use axum::{
    extract::{Path, State},
    http::{header, StatusCode},
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    routing::{delete, get, post, put},
    Json, Router,
};
use futures::stream::Stream;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::convert::Infallible;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::StreamExt;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub roster: Arc<Roster>,
    pub map: Arc<MapDataLoader>,
    pub bus: SharedBus,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(roster: Arc<Roster>, map: Arc<MapDataLoader>, bus: SharedBus) -> Self {
        Self {
            roster,
            map,
            bus,
            started_at: Instant::now(),
        }
    }
}

/// All host API routes
pub fn router(state: AppState) -> Router {
    Router::new()
        // Health check
        .route("/status", get(status_handler))
        // Roster
        .route("/api/nodes", get(list_nodes_handler))
        .route("/api/nodes", post(add_node_handler))
        .route("/api/nodes/{address}", put(edit_node_handler))
        .route("/api/nodes/{address}", delete(remove_node_handler))
        // Node commands
        .route("/api/nodes/{address}/toggle", post(toggle_handler))
        .route("/api/nodes/{address}/config", post(config_handler))
        .route("/api/nodes/{address}/logs/{kind}", get(log_handler))
        // Map overlay
        .route("/api/map", get(map_handler))
        // Event stream (SSE)
        .route("/events", get(events_handler))
        .with_state(state)
}

/// Error response
#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

fn error_response(status: StatusCode, error: impl Into<String>) -> Response {
    (
        status,
        Json(ErrorResponse {
            error: error.into(),
        }),
    )
        .into_response()
}

fn node_error_response(e: NodeError) -> Response {
    let status = match &e {
        NodeError::InvalidAction(_) | NodeError::EmptyAddress => StatusCode::BAD_REQUEST,
        NodeError::NotFound(_) => StatusCode::NOT_FOUND,
        NodeError::Busy(_) | NodeError::Broadcasting | NodeError::DuplicateAddress(_) => {
            StatusCode::CONFLICT
        }
        NodeError::Request(FetchError::Timeout) => StatusCode::GATEWAY_TIMEOUT,
        NodeError::Rejected(_) | NodeError::Request(_) => StatusCode::BAD_GATEWAY,
    };
    error_response(status, e.to_string())
}

fn not_found(address: &str) -> Response {
    node_error_response(NodeError::NotFound(address.to_string()))
}

/// General status response
#[derive(Serialize)]
pub struct StatusResponse {
    pub service: &'static str,
    pub version: &'static str,
    pub git_sha: &'static str,
    pub uptime_secs: u64,
    pub nodes: usize,
    pub map_configured: bool,
    pub bus_subscribers: usize,
}

/// GET /status - Service health check
pub async fn status_handler(State(state): State<AppState>) -> Json<StatusResponse> {
    Json(StatusResponse {
        service: "gnb-dashboard",
        version: env!("GNB_VERSION"),
        git_sha: env!("GNB_GIT_SHA"),
        uptime_secs: state.started_at.elapsed().as_secs(),
        nodes: state.roster.len().await,
        map_configured: state.map.is_configured(),
        bus_subscribers: state.bus.subscriber_count(),
    })
}

// =============================================================================
// Roster handlers
// =============================================================================

#[derive(Debug, Deserialize)]
pub struct AddNodeRequest {
    pub address: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EditNodeRequest {
    pub address: String,
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub manet_address: Option<String>,
}

/// GET /api/nodes - Roster snapshot in display order
pub async fn list_nodes_handler(State(state): State<AppState>) -> Json<Vec<NodeSnapshot>> {
    Json(state.roster.snapshot().await)
}

/// POST /api/nodes - Track a node (201 when added, 200 when already tracked)
pub async fn add_node_handler(
    State(state): State<AppState>,
    Json(req): Json<AddNodeRequest>,
) -> Response {
    let address = req.address.trim();
    if address.is_empty() {
        return node_error_response(NodeError::EmptyAddress);
    }

    let added = state.roster.add(address).await;
    match state.roster.get(address).await {
        Some(node) => {
            let status = if added {
                StatusCode::CREATED
            } else {
                StatusCode::OK
            };
            (status, Json(node.snapshot().await)).into_response()
        }
        // Removed again before we could read it back
        None => not_found(address),
    }
}

/// DELETE /api/nodes/{address}
pub async fn remove_node_handler(
    State(state): State<AppState>,
    Path(address): Path<String>,
) -> Response {
    if state.roster.remove(&address).await {
        StatusCode::NO_CONTENT.into_response()
    } else {
        not_found(&address)
    }
}

/// PUT /api/nodes/{address} - Retarget, rename or set the MANET address
pub async fn edit_node_handler(
    State(state): State<AppState>,
    Path(address): Path<String>,
    Json(req): Json<EditNodeRequest>,
) -> Response {
    match state
        .roster
        .edit(
            &address,
            &req.address,
            &req.display_name,
            req.manet_address.as_deref(),
        )
        .await
    {
        Ok(snapshot) => Json(snapshot).into_response(),
        Err(e) => node_error_response(e),
    }
}

// =============================================================================
// Node command handlers
// =============================================================================

#[derive(Debug, Deserialize)]
pub struct ToggleRequest {
    pub action: String,
}

#[derive(Debug, Deserialize)]
pub struct ConfigRequest {
    pub field: String,
    pub value: Value,
}

/// POST /api/nodes/{address}/toggle - Start or stop broadcasting
pub async fn toggle_handler(
    State(state): State<AppState>,
    Path(address): Path<String>,
    Json(req): Json<ToggleRequest>,
) -> Response {
    let Some(node) = state.roster.get(&address).await else {
        return not_found(&address);
    };
    match node.toggle_broadcast(&req.action).await {
        Ok(outcome) => Json(outcome).into_response(),
        Err(e) => node_error_response(e),
    }
}

/// POST /api/nodes/{address}/config - Update one configuration field
pub async fn config_handler(
    State(state): State<AppState>,
    Path(address): Path<String>,
    Json(req): Json<ConfigRequest>,
) -> Response {
    let Some(node) = state.roster.get(&address).await else {
        return not_found(&address);
    };
    match node.update_config(&req.field, req.value).await {
        Ok(()) => Json(json!({ "ok": true })).into_response(),
        Err(e) => node_error_response(e),
    }
}

/// GET /api/nodes/{address}/logs/{kind} - Raw log text (du, cu or setup)
pub async fn log_handler(
    State(state): State<AppState>,
    Path((address, kind)): Path<(String, String)>,
) -> Response {
    let kind: LogKind = match kind.parse() {
        Ok(kind) => kind,
        Err(bad) => {
            return error_response(StatusCode::BAD_REQUEST, format!("unknown log '{}'", bad))
        }
    };
    let Some(node) = state.roster.get(&address).await else {
        return not_found(&address);
    };
    match node.download_log(kind).await {
        Ok(text) => ([(header::CONTENT_TYPE, "text/plain; charset=utf-8")], text).into_response(),
        Err(e) => node_error_response(e),
    }
}

// =============================================================================
// Map and events
// =============================================================================

/// GET /api/map - Latest merged map data
pub async fn map_handler(State(state): State<AppState>) -> Json<MapSnapshot> {
    Json(state.map.snapshot().await)
}

/// GET /events - Server-Sent Events stream of dashboard events
pub async fn events_handler(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let rx = state.bus.subscribe();

    let stream = BroadcastStream::new(rx).filter_map(|result| match result {
        Ok(event) => match serde_json::to_string(&event) {
            Ok(json) => Some(Ok(Event::default().data(json))),
            Err(_) => None,
        },
        Err(_) => None, // Skip lagged messages
    });

    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("ping"),
    )
}
