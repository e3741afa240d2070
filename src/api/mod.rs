//! Operator API — REST endpoints plus the `/ws` event feed.
//!
//! Public: `GET /api/health`, `GET /api/status`.
//! Everything else requires `Authorization: Bearer <ADMIN_TOKEN>`; the
//! WebSocket takes the token as a `token` query parameter since browsers
//! cannot set headers on the upgrade request.

pub mod auth;
pub mod routes;
pub mod ws;

use std::io;
use std::sync::Arc;

use axum::{
    Router, middleware,
    routing::{get, post},
};
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tracing::warn;

use crate::delivery::Outbound;
use crate::events::EventBroadcaster;
use crate::store::ConversationStore;
use crate::transport::Transport;
use crate::triage::TriageEngine;

pub use auth::AdminAuth;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn ConversationStore>,
    pub outbound: Arc<Outbound>,
    pub events: Arc<EventBroadcaster>,
    pub transport: Arc<dyn Transport>,
    pub triage: Arc<TriageEngine>,
    pub auth: AdminAuth,
}

/// Build the full router.
pub fn router(state: AppState) -> Router {
    let public_routes = Router::new()
        .route("/api/health", get(routes::health))
        .route("/api/status", get(routes::status))
        .with_state(state.clone());

    let admin_routes = Router::new()
        .route("/api/tickets", get(routes::list_tickets))
        .route("/api/tickets/{id}/messages", get(routes::ticket_messages))
        .route("/api/tickets/{id}/close", post(routes::close_ticket))
        .route(
            "/api/tickets/{id}/tag",
            get(routes::get_tag).post(routes::set_tag),
        )
        .route("/api/send", post(routes::send))
        .route(
            "/api/human-mode",
            get(routes::get_human_mode).post(routes::set_human_mode),
        )
        .route_layer(middleware::from_fn_with_state(
            state.auth.clone(),
            auth::require_admin,
        ))
        .with_state(state.clone());

    let ws_routes = Router::new()
        .route("/ws", get(ws::ws_handler))
        .with_state(state);

    Router::new()
        .merge(public_routes)
        .merge(admin_routes)
        .merge(ws_routes)
        .layer(CorsLayer::permissive())
}

/// Bind `host:port`, moving to the next port while the current one is taken.
/// Returns the listener and the port it ended up on.
pub async fn bind_with_retry(
    host: &str,
    port: u16,
    attempts: u16,
) -> io::Result<(TcpListener, u16)> {
    let mut current = port;
    let mut last_err = None;

    for _ in 0..attempts.max(1) {
        match TcpListener::bind((host, current)).await {
            Ok(listener) => return Ok((listener, current)),
            Err(e) if e.kind() == io::ErrorKind::AddrInUse => {
                warn!(port = current, "Port in use, trying the next one");
                last_err = Some(e);
                match current.checked_add(1) {
                    Some(next) => current = next,
                    None => break,
                }
            }
            Err(e) => return Err(e),
        }
    }

    Err(last_err.unwrap_or_else(|| io::Error::new(io::ErrorKind::AddrInUse, "no free port")))
}
