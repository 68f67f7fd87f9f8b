//! WebSocket Handler
//!
//! One task pair per device connection: a writer draining the connection's
//! outbox and a reader feeding decoded frames to the coordinator.

use axum::extract::ws::{Message, WebSocket};
use futures::{sink::SinkExt, stream::StreamExt};
use signal_core::{ServerMessage, decode, encode};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{Instrument, debug, error, info, info_span, warn};

use crate::config::ConnectionConfig;
use crate::coordinator::CoordinatorHandle;
use crate::metrics::ServerMetrics;

/// Drive a device connection until either side closes it
pub async fn handle_websocket(
    socket: WebSocket,
    coordinator: CoordinatorHandle,
    config: ConnectionConfig,
    metrics: Arc<ServerMetrics>,
) {
    let session_id = uuid::Uuid::new_v4();
    let span = info_span!("ws", session = %session_id);
    serve_connection(socket, coordinator, config, metrics)
        .instrument(span)
        .await
}

async fn serve_connection(
    socket: WebSocket,
    coordinator: CoordinatorHandle,
    config: ConnectionConfig,
    metrics: Arc<ServerMetrics>,
) {
    let (outbox, mut rx) = mpsc::channel::<ServerMessage>(config.outbox_capacity);
    let connection = match coordinator.attach(outbox).await {
        Ok(connection) => connection,
        Err(e) => {
            error!("Failed to attach connection: {}", e);
            return;
        }
    };

    metrics.connection_opened();
    info!(%connection, "New signaling connection");

    let (mut ws_sender, mut ws_receiver) = socket.split();

    // Ends when the coordinator drops the outbox, either on detach or eviction
    let sender_task = async move {
        while let Some(msg) = rx.recv().await {
            let json = match encode(&msg) {
                Ok(j) => j,
                Err(e) => {
                    error!(code = e.error_code(), "Failed to serialize message: {}", e);
                    continue;
                }
            };
            if ws_sender.send(Message::Text(json.into())).await.is_err() {
                return;
            }
        }
        let _ = ws_sender.send(Message::Close(None)).await;
    };

    let input_coordinator = coordinator.clone();
    let input_metrics = metrics.clone();
    let input_task = async move {
        while let Some(msg) = ws_receiver.next().await {
            let frame = match msg {
                Ok(Message::Text(text)) => decode(text.as_bytes()),
                Ok(Message::Binary(data)) => decode(&data),
                Ok(Message::Close(_)) => {
                    debug!(%connection, "Client sent close frame");
                    break;
                }
                Ok(_) => continue,
                Err(e) => {
                    debug!(%connection, "WebSocket receive error: {}", e);
                    break;
                }
            };

            input_metrics.message_received();
            if frame.is_decode_failure() {
                input_metrics.decode_error();
            }

            if let Err(e) = input_coordinator.dispatch(connection, frame).await {
                warn!(%connection, "Dropping frame: {}", e);
                break;
            }
        }
    };

    tokio::select! {
        _ = sender_task => debug!(%connection, "Sender task ended"),
        _ = input_task => debug!(%connection, "Input task ended"),
    }

    if let Err(e) = coordinator.detach(connection).await {
        warn!(%connection, "Failed to detach connection: {}", e);
    }
    metrics.connection_closed();
    info!(%connection, "Signaling connection closed");
}
