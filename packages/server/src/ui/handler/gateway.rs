//! Relay endpoint: inbound connections from peer instances.
//!
//! Frames are routed locally through `Hub::dispatch_relay` and never relayed
//! again. A malformed frame is answered with a service notice; the relay
//! connection stays open.

use std::{collections::HashMap, sync::Arc};

use axum::{
    extract::{
        Query, State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::Response,
};
use futures_util::{sink::SinkExt, stream::StreamExt};

use crate::{domain::Output, ui::state::AppState};

pub const NOT_AUTHORIZED: &str = "not authorized";
pub const MALFORMED_RELAY_MESSAGE: &str = "malformed relay message";

pub async fn gateway_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    let authorized = params
        .get(&state.relay_auth.key)
        .is_some_and(|secret| *secret == state.relay_auth.secret);

    ws.on_upgrade(move |socket| async move {
        if authorized {
            handle_peer(socket, state).await;
        } else {
            reject_peer(socket).await;
        }
    })
}

async fn send_notice(socket: &mut (impl SinkExt<Message> + Unpin), msg: &str) {
    match Output::notice(msg).encode() {
        Ok(frame) => {
            let _ = socket.send(Message::Text(frame.into())).await;
        }
        Err(e) => tracing::error!("Failed to encode relay notice: {}", e),
    }
}

async fn reject_peer(mut socket: WebSocket) {
    tracing::warn!("Relay connection rejected: bad or missing secret");
    send_notice(&mut socket, NOT_AUTHORIZED).await;
    let _ = socket.send(Message::Close(None)).await;
}

async fn handle_peer(socket: WebSocket, state: Arc<AppState>) {
    tracing::info!("Relay peer connected");
    let (mut sender, mut receiver) = socket.split();

    loop {
        let message = tokio::select! {
            _ = state.shutting_down() => break,
            message = receiver.next() => message,
        };

        let text = match message {
            Some(Ok(Message::Text(text))) => text,
            Some(Ok(Message::Close(_))) | None => break,
            Some(Ok(_)) => continue,
            Some(Err(e)) => {
                tracing::info!("Relay read failed: {}", e);
                break;
            }
        };
        if text.as_str().trim().is_empty() {
            continue;
        }

        if let Err(e) = state.hub.dispatch_relay(text.as_str()).await {
            tracing::warn!("Malformed relay frame: {}", e);
            send_notice(&mut sender, MALFORMED_RELAY_MESSAGE).await;
        }
    }

    let _ = sender.send(Message::Close(None)).await;
    tracing::info!("Relay peer disconnected");
}
