//! WebSocket Event Broadcasting
//!
//! Clients connect to `/api/v1/ws` to receive write events as they happen.
//!
//! ## Architecture
//!
//! - tokio broadcast channel for fan-out
//! - optional `?table=<name>` filter: the client then only receives events
//!   for that dependent table (plus connection events)
//! - JSON-serialized [`WsEvent`]s, one per text frame

use crate::error::ApiResult;
use crate::events::WsEvent;
use crate::telemetry::METRICS;
use axum::{
    extract::{
        ws::{Message, WebSocket},
        Query, State, WebSocketUpgrade,
    },
    response::Response,
};
use carebridge_core::DependentTable;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

/// WebSocket state shared across the application.
#[derive(Clone)]
pub struct WsState {
    tx: broadcast::Sender<WsEvent>,
}

impl WsState {
    /// Create a new WebSocket state with the specified channel capacity.
    ///
    /// Slow consumers that fall more than `capacity` events behind miss
    /// events and are told so with an `Error` event.
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Broadcast an event to all connected clients. Never blocks.
    pub fn broadcast(&self, event: WsEvent) {
        let event_type = event.event_type();
        match self.tx.send(event) {
            Ok(receiver_count) => {
                debug!(
                    event_type = event_type,
                    receivers = receiver_count,
                    "Broadcast event"
                );
            }
            Err(_) => {
                debug!(event_type = event_type, "No receivers for event");
            }
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<WsEvent> {
        self.tx.subscribe()
    }
}

/// Query parameters accepted on upgrade.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct WsParams {
    pub table: Option<String>,
}

/// WebSocket upgrade handler.
///
/// ## Protocol
///
/// 1. Client connects, optionally with `?table=lab_results`
/// 2. Server sends `Connected` echoing the filter
/// 3. Server streams matching events
/// 4. On close, server sends `Disconnected`
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<WsState>>,
    Query(params): Query<WsParams>,
) -> ApiResult<Response> {
    let table = params
        .table
        .as_deref()
        .map(str::parse::<DependentTable>)
        .transpose()
        .map_err(carebridge_core::CareError::from)?;

    info!(table = ?table, "WebSocket connection request");
    Ok(ws.on_upgrade(move |socket| handle_socket(socket, state, table)))
}

/// Runs for the lifetime of one WebSocket connection.
async fn handle_socket(socket: WebSocket, state: Arc<WsState>, table: Option<DependentTable>) {
    if let Ok(metrics) = METRICS.as_ref() {
        metrics.ws_connected();
    }
    info!(table = ?table, "WebSocket connected");

    let (mut sender, mut receiver) = socket.split();
    let mut rx = state.subscribe();

    if let Err(e) = send_event(&mut sender, WsEvent::Connected { table }).await {
        error!(error = %e, "Failed to send Connected event");
        if let Ok(metrics) = METRICS.as_ref() {
            metrics.ws_disconnected();
        }
        return;
    }

    // Drain client frames; the connection ends when the client goes away.
    let mut recv_task = tokio::spawn(async move {
        while let Some(msg) = receiver.next().await {
            match msg {
                Ok(Message::Close(_)) => {
                    debug!("Client sent close frame");
                    break;
                }
                Ok(Message::Text(text)) => {
                    debug!(len = text.len(), "Received text message (ignored)");
                }
                Ok(_) => {}
                Err(e) => {
                    warn!(error = %e, "WebSocket receive error");
                    break;
                }
            }
        }
    });

    loop {
        tokio::select! {
            result = rx.recv() => {
                match result {
                    Ok(event) => {
                        if should_send_event(&event, table) {
                            if let Err(e) = send_event(&mut sender, event).await {
                                error!(error = %e, "Failed to send event, closing connection");
                                break;
                            }
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped = skipped, "Client lagged, some events were dropped");
                        let error_event = WsEvent::Error {
                            message: format!("Lagged: {} events dropped", skipped),
                        };
                        if let Err(e) = send_event(&mut sender, error_event).await {
                            error!(error = %e, "Failed to send error event");
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        info!("Broadcast channel closed");
                        break;
                    }
                }
            }
            _ = &mut recv_task => {
                debug!("Receiver task finished");
                break;
            }
        }
    }

    let disconnected_event = WsEvent::Disconnected {
        reason: "Connection closed".to_string(),
    };
    let _ = send_event(&mut sender, disconnected_event).await;
    recv_task.abort();

    if let Ok(metrics) = METRICS.as_ref() {
        metrics.ws_disconnected();
    }
    info!(table = ?table, "WebSocket disconnected");
}

async fn send_event(
    sender: &mut futures_util::stream::SplitSink<WebSocket, Message>,
    event: WsEvent,
) -> Result<(), axum::Error> {
    let json = serde_json::to_string(&event).map_err(|e| {
        error!(error = %e, "Failed to serialize event");
        axum::Error::new(e)
    })?;
    sender.send(Message::Text(json)).await
}

/// Events without a table (patients, connection events) reach every client.
fn should_send_event(event: &WsEvent, filter: Option<DependentTable>) -> bool {
    match (filter, event.table()) {
        (Some(wanted), Some(actual)) => wanted == actual,
        _ => true,
    }
}
