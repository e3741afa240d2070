//! `/ws`: live desk events.
//!
//! On connect the client gets a `sync` frame with the current ticket list,
//! then every event published after the subscription. Missed events are
//! never replayed; reconnecting clients resynchronise from the snapshot.

use axum::{
    extract::{
        Query, State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::Response,
};
use serde::Deserialize;
use tracing::{debug, info, warn};

use super::AppState;
use super::auth::unauthorized;

#[derive(Debug, Deserialize)]
pub struct WsParams {
    token: Option<String>,
}

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Query(params): Query<WsParams>,
) -> Response {
    if !state.auth.accepts(params.token.as_deref()) {
        debug!("Rejected WebSocket upgrade");
        return unauthorized();
    }
    info!("WebSocket client connecting");
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn send_json(socket: &mut WebSocket, value: &impl serde::Serialize) -> bool {
    match serde_json::to_string(value) {
        Ok(json) => socket.send(Message::Text(json.into())).await.is_ok(),
        Err(e) => {
            warn!(error = %e, "Failed to serialize WS frame");
            true
        }
    }
}

async fn handle_socket(mut socket: WebSocket, state: AppState) {
    // Subscribe before the snapshot so nothing falls in between.
    let (handle, mut rx) = state.events.subscribe();

    let tickets = match state.store.list_tickets(None).await {
        Ok(tickets) => tickets,
        Err(e) => {
            warn!(error = %e, "Failed to load tickets for WS sync");
            Vec::new()
        }
    };
    let sync = serde_json::json!({
        "type": "sync",
        "waStatus": state.transport.status(),
        "tickets": tickets,
    });
    if !send_json(&mut socket, &sync).await {
        warn!("Failed to send initial sync, client disconnected");
        state.events.unsubscribe(handle);
        return;
    }

    info!("WebSocket client connected");

    loop {
        tokio::select! {
            event = rx.recv() => {
                let Some(event) = event else {
                    debug!("Event feed dropped this observer");
                    break;
                };
                if !send_json(&mut socket, &event).await {
                    debug!("Client disconnected during send");
                    break;
                }
            }

            incoming = socket.recv() => {
                match incoming {
                    Some(Ok(Message::Ping(data))) => {
                        if socket.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        info!("WebSocket client disconnected");
                        break;
                    }
                    Some(Err(e)) => {
                        warn!(error = %e, "WebSocket error");
                        break;
                    }
                    _ => {}
                }
            }
        }
    }

    state.events.unsubscribe(handle);
    info!("WebSocket connection closed");
}
