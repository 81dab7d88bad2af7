//! WebSocket event stream for session progress
//!
//! Each connection is bound to one session id. On connect the client
//! receives a replay of the current state, then live events until the
//! terminal event arrives or the client disconnects.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, State,
    },
    response::IntoResponse,
};
use futures_util::{SinkExt, StreamExt};

use super::ServerAppState;
use crate::models::{ProgressEvent, ProgressEventType, ResearchStage};

/// WebSocket upgrade handler for `/ws/:session_id`
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Path(session_id): Path<String>,
    State(state): State<ServerAppState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_websocket(socket, state, session_id))
}

async fn handle_websocket(socket: WebSocket, state: ServerAppState, session_id: String) {
    log::info!("WebSocket client connected for session {}", session_id);

    // After a restart the bus has no history; seed the replay from the store
    // so late subscribers still receive the terminal event.
    if let Ok(Some(session)) = state.workflow.store.load(&session_id).await {
        let event_type = match session.record.stage {
            ResearchStage::Completed => ProgressEventType::ResearchComplete,
            ResearchStage::Error => ProgressEventType::Error,
            _ => ProgressEventType::ProgressUpdate,
        };
        let mut event = ProgressEvent::new(
            &session_id,
            event_type,
            session.record.stage,
            session.record.progress,
        );
        if let Some(error) = &session.record.error {
            event = event.with_error(error.kind, error.message.clone());
        }
        state.workflow.bus.seed_last_event(event);
    }

    let mut subscription = state.workflow.bus.subscribe(&session_id);
    let (mut sender, mut receiver) = socket.split();

    // Drain client messages so pings keep flowing; no commands are defined
    let mut recv_task = tokio::spawn(async move {
        while let Some(result) = receiver.next().await {
            match result {
                Ok(Message::Close(_)) | Err(_) => break,
                Ok(_) => {}
            }
        }
    });

    // Forward bus events to this client until the stream ends or the
    // client goes away
    loop {
        tokio::select! {
            _ = &mut recv_task => {
                log::info!("WebSocket client disconnected from session {}", session_id);
                break;
            }
            event = subscription.recv() => {
                let event = match event {
                    Some(event) => event,
                    None => break,
                };
                let terminal = event.is_terminal();
                match serde_json::to_string(&event) {
                    Ok(json) => {
                        if sender.send(Message::Text(json.into())).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        log::warn!("Failed to serialize progress event: {}", e);
                    }
                }
                if terminal {
                    break;
                }
            }
        }
    }

    state.workflow.bus.unsubscribe(&subscription);
    let _ = sender.send(Message::Close(None)).await;
    recv_task.abort();
    log::debug!("WebSocket connection closed for session {}", session_id);
}
