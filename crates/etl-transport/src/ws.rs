//! WebSocket endpoint.

use axum::extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade, close_code};
use axum::extract::{Extension, State};
use axum::response::Response;
use etl_protocol::CorrelationId;
use etl_tracing::with_correlation;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::error::ApiError;
use crate::server::AppState;

/// Upgrade to a WebSocket keyed by the request's correlation id.
///
/// Refused with 409 while another connection holds the same id.
pub(crate) async fn upgrade(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Extension(id): Extension<CorrelationId>,
) -> Result<Response, ApiError> {
    if state.registry.contains(&id) {
        return Err(ApiError::Conflict(format!("connection {id} is already open")));
    }
    Ok(ws.on_upgrade(move |socket| {
        // The upgraded socket runs on its own task, outside the request scope.
        with_correlation(id.clone(), handle_socket(socket, state, id))
    }))
}

async fn handle_socket(mut socket: WebSocket, state: AppState, id: CorrelationId) {
    let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<String>();

    let guard = match state.registry.register(id, outbound_tx) {
        Ok(guard) => guard,
        Err(err) => {
            warn!("Refusing WebSocket connection: {err}");
            let _ = socket
                .send(Message::Close(Some(CloseFrame {
                    code: close_code::POLICY,
                    reason: err.to_string().into(),
                })))
                .await;
            return;
        }
    };
    info!(active = state.registry.len(), "WebSocket connected");

    let (mut ws_tx, mut ws_rx) = socket.split();

    loop {
        tokio::select! {
            msg = ws_rx.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        debug!("WebSocket received: {}", text.as_str());
                        let reply = format!("Message received: {}", text.as_str());
                        if let Err(e) = ws_tx.send(Message::Text(reply.into())).await {
                            warn!("Failed to answer WebSocket message: {e}");
                            break;
                        }
                    }
                    Some(Ok(Message::Ping(data))) => {
                        let _ = ws_tx.send(Message::Pong(data)).await;
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(e)) => {
                        warn!("WebSocket error: {e}");
                        break;
                    }
                    _ => {}
                }
            }

            Some(text) = outbound_rx.recv() => {
                if let Err(e) = ws_tx.send(Message::Text(text.into())).await {
                    warn!("Failed to push frame: {e}");
                    break;
                }
            }
        }
    }

    drop(guard);
    info!(active = state.registry.len(), "WebSocket disconnected");
}
