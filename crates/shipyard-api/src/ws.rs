//! WebSocket handling for real-time updates.

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::Response;
use futures::StreamExt;
use serde::Deserialize;
use shipyard_core::ResourceId;
use shipyard_scheduler::PipelineEvent;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tracing::{debug, info, warn};

use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct WsQuery {
    /// Only forward events of this run.
    run_id: Option<ResourceId>,
}

/// WebSocket upgrade handler.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Query(query): Query<WsQuery>,
) -> Response {
    // Subscribe before the upgrade completes so nothing emitted meanwhile is lost.
    let events = BroadcastStream::new(state.orchestrator.subscribe());
    ws.on_upgrade(move |socket| forward_events(socket, events, query.run_id))
}

async fn forward_events(
    mut socket: WebSocket,
    mut events: BroadcastStream<PipelineEvent>,
    run_filter: Option<ResourceId>,
) {
    info!(run_id = ?run_filter, "WebSocket connection established");

    loop {
        tokio::select! {
            event = events.next() => {
                let text = match event {
                    Some(Ok(event)) => {
                        if run_filter.is_some_and(|id| id != event.run_id()) {
                            continue;
                        }
                        match serde_json::to_string(&event) {
                            Ok(text) => text,
                            Err(e) => {
                                warn!(error = %e, "Failed to serialize event");
                                continue;
                            }
                        }
                    }
                    Some(Err(BroadcastStreamRecvError::Lagged(missed))) => {
                        debug!(missed, "WebSocket client lagging");
                        serde_json::json!({ "type": "lagged", "missed": missed }).to_string()
                    }
                    None => break,
                };
                if socket.send(Message::Text(text.into())).await.is_err() {
                    break;
                }
            }
            msg = socket.recv() => match msg {
                Some(Ok(Message::Close(_))) | None => {
                    info!("WebSocket connection closed");
                    break;
                }
                Some(Err(e)) => {
                    warn!(error = %e, "WebSocket error");
                    break;
                }
                // Clients only listen.
                Some(Ok(_)) => {}
            },
        }
    }
}
