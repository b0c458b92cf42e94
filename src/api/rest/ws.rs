use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::IntoResponse;
use futures::{Sink, SinkExt, Stream, StreamExt};
use serde::Deserialize;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};

use crate::engine::notifier::DispatchEvent;
use crate::models::booking::BookingId;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct WsParams {
    pub booking_id: Option<String>,
}

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    Query(params): Query<WsParams>,
) -> impl IntoResponse {
    let filter = params.booking_id.map(BookingId::from);
    ws.on_upgrade(move |socket| handle_socket(socket, state, filter))
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>, filter: Option<BookingId>) {
    let (sender, receiver) = socket.split();
    let rx = state.notifier.subscribe();

    info!(booking_id = ?filter, "websocket client connected");
    forward_events(sender, receiver, rx, filter).await;
    info!("websocket client disconnected");
}

/// Streams matching events to the client until either side goes away. The
/// client half is polled alongside the event feed so a filtered session
/// notices a disconnect even when no event for its booking arrives.
async fn forward_events<S, R, E>(
    mut sender: S,
    mut receiver: R,
    mut rx: broadcast::Receiver<DispatchEvent>,
    filter: Option<BookingId>,
) where
    S: Sink<Message> + Unpin,
    R: Stream<Item = Result<Message, E>> + Unpin,
{
    loop {
        let event = tokio::select! {
            incoming = receiver.next() => match incoming {
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => continue,
            },
            received = rx.recv() => match received {
                Ok(event) => event,
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "websocket subscriber lagged");
                    continue;
                }
                Err(RecvError::Closed) => break,
            },
        };

        if filter.as_ref().is_some_and(|id| id != event.booking_id()) {
            continue;
        }

        let json = match serde_json::to_string(&event) {
            Ok(json) => json,
            Err(err) => {
                warn!(error = %err, "failed to serialize dispatch event for ws");
                continue;
            }
        };

        if sender.send(Message::Text(json.into())).await.is_err() {
            break;
        }
    }
}
