//! WebSocket upgrade and per-connection handler.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
};
use chrono::Utc;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::metrics::collect_quick;
use crate::proto::{ClientMessage, ServerMessage};
use crate::registry::{ChannelId, Outbound, CHANNEL_QUEUE};
use crate::state::AppState;

pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn push(state: &AppState, id: ChannelId, msg: &ServerMessage) {
    match msg.to_json() {
        Ok(js) => {
            state.registry.send_to(id, Outbound::from(js)).await;
        }
        Err(e) => warn!(channel = id, error = %e, "failed to encode frame"),
    }
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let (mut sink, mut stream) = socket.split();
    let (tx, mut rx) = mpsc::channel::<Outbound>(CHANNEL_QUEUE);
    let id = state.registry.register(tx).await;
    info!(channel = id, "client connected");

    // The registry holds the only sender; removing the channel ends this task.
    let writer = tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            if let Err(e) = sink.send(Message::Text(frame.to_string())).await {
                debug!(channel = id, error = %e, "socket write failed");
                break;
            }
        }
        let _ = sink.close().await;
    });

    push(
        &state,
        id,
        &ServerMessage::Connected {
            timestamp: Utc::now(),
            hostname: state.hostname.clone(),
            interval_ms: state.config.interval.as_millis() as u64,
        },
    )
    .await;

    while let Some(msg) = stream.next().await {
        match msg {
            Ok(Message::Text(text)) => handle_text(&state, id, &text).await,
            Ok(Message::Close(_)) => break,
            Ok(_) => {}
            Err(e) => {
                debug!(channel = id, error = %e, "socket read failed");
                break;
            }
        }
        if writer.is_finished() {
            break;
        }
    }

    state.registry.remove(id).await;
    let _ = writer.await;
    info!(channel = id, "client disconnected");
}

async fn handle_text(state: &AppState, id: ChannelId, text: &str) {
    match ClientMessage::parse(text) {
        Ok(ClientMessage::Subscribe) => {
            state.registry.set_subscribed(id, true).await;
            debug!(channel = id, "subscribed");
        }
        Ok(ClientMessage::Unsubscribe) => {
            state.registry.set_subscribed(id, false).await;
            debug!(channel = id, "unsubscribed");
        }
        Ok(ClientMessage::RequestUpdate) => {
            let snapshot = collect_quick(state).await;
            push(state, id, &ServerMessage::SystemUpdate(snapshot)).await;
        }
        Err(e) => {
            debug!(channel = id, error = %e, "unrecognised frame");
            push(
                state,
                id,
                &ServerMessage::Error {
                    message: format!("unrecognised message: {e}"),
                },
            )
            .await;
        }
    }
}
