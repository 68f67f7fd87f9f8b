//! WebSocket signaling server.
//!
//! Devices connect on `/ws`, log in under an identity and exchange call setup
//! messages through a single coordinator task. `/health` and `/metrics` report
//! on the running process.

pub mod config;
pub mod coordinator;
pub mod metrics;
pub mod websocket;

pub use config::{FileConfig, ServerConfig, load_config};
pub use coordinator::{CoordinatorError, CoordinatorHandle};
pub use metrics::{MetricsSnapshot, ServerMetrics};

use axum::{
    Json, Router,
    extract::{State, WebSocketUpgrade},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
};
use std::sync::Arc;
use std::sync::atomic::Ordering;

#[derive(Clone)]
pub struct AppState {
    pub coordinator: CoordinatorHandle,
    pub config: Arc<ServerConfig>,
    pub metrics: Arc<ServerMetrics>,
}

impl AppState {
    /// Spawn the coordinator and bundle it with the shared config and metrics
    pub fn new(config: ServerConfig) -> Self {
        let metrics = Arc::new(ServerMetrics::new());
        let coordinator =
            CoordinatorHandle::spawn(config.connection.command_capacity, metrics.clone());
        Self {
            coordinator,
            config: Arc::new(config),
            metrics,
        }
    }
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(index_handler))
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .route("/ws", get(websocket_handler))
        .with_state(state)
}

async fn index_handler() -> &'static str {
    "signald: WebSocket signaling server. Connect on /ws\n"
}

async fn health_handler(State(state): State<AppState>) -> Response {
    match state.coordinator.stats().await {
        Ok(stats) => Json(serde_json::json!({
            "status": "healthy",
            "connections": state.metrics.active_connections.load(Ordering::Relaxed),
            "devices": stats.devices,
            "uptime_secs": state.metrics.uptime_secs(),
        }))
        .into_response(),
        Err(e) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(serde_json::json!({ "status": "unavailable", "error": e.to_string() })),
        )
            .into_response(),
    }
}

async fn metrics_handler(State(state): State<AppState>) -> Response {
    match state.coordinator.stats().await {
        Ok(stats) => Json(state.metrics.snapshot(stats)).into_response(),
        Err(e) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(serde_json::json!({ "error": e.to_string() })),
        )
            .into_response(),
    }
}

async fn websocket_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
) -> impl IntoResponse {
    let connection = state.config.connection.clone();
    ws.max_message_size(connection.max_frame_bytes)
        .on_upgrade(move |socket| {
            websocket::handle_websocket(socket, state.coordinator, connection, state.metrics)
        })
}
