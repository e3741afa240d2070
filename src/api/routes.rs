//! REST handlers.

use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Deserialize;
use tracing::{error, info};

use super::AppState;
use crate::error::{DatabaseError, SendError};
use crate::events::{DeskEvent, TicketChange};

fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    (
        status,
        Json(serde_json::json!({"ok": false, "error": message.into()})),
    )
        .into_response()
}

fn storage_failure(e: DatabaseError) -> Response {
    error!(error = %e, "Store access failed");
    error_response(StatusCode::INTERNAL_SERVER_ERROR, "storage error")
}

// ── Health ──────────────────────────────────────────────────────────────

pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    Json(serde_json::json!({
        "ok": true,
        "waStatus": state.transport.status(),
        "queue": state.outbound.queue().pending_count(),
    }))
}

pub async fn status(State(state): State<AppState>) -> impl IntoResponse {
    Json(serde_json::json!({
        "ok": true,
        "message": "Backend online",
        "waStatus": state.transport.status(),
    }))
}

// ── Tickets ─────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct TicketFilter {
    tenant: Option<String>,
}

pub async fn list_tickets(
    State(state): State<AppState>,
    Query(filter): Query<TicketFilter>,
) -> Response {
    let tenant = filter.tenant.as_deref().filter(|t| !t.is_empty());
    match state.store.list_tickets(tenant).await {
        Ok(tickets) => Json(tickets).into_response(),
        Err(e) => storage_failure(e),
    }
}

/// Message history. Reading it clears the unread counter.
pub async fn ticket_messages(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    match state.store.read_messages(&id).await {
        Ok(messages) => Json(messages).into_response(),
        Err(e) => storage_failure(e),
    }
}

pub async fn close_ticket(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    match state.store.close_ticket(&id).await {
        Ok(true) => {
            info!(conversation_id = %id, "Ticket closed");
            state.events.publish(DeskEvent::Ticket {
                conversation_id: id.clone(),
                change: TicketChange::Closed,
            });
            Json(serde_json::json!({"ok": true, "jid": id, "status": "closed", "closed": true}))
                .into_response()
        }
        // Closing is idempotent; an unknown conversation is a no-op.
        Ok(false) => Json(serde_json::json!({"ok": true, "jid": id, "closed": false})).into_response(),
        Err(e) => storage_failure(e),
    }
}

/// Tag, owning tenant, and the tenant's agent label for a conversation.
pub async fn get_tag(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    let tag = match state.store.get_tag(&id).await {
        Ok(tag) => tag,
        Err(e) => return storage_failure(e),
    };
    let tenant = match state.store.get_tenant(&id).await {
        Ok(tenant) => tenant,
        Err(e) => return storage_failure(e),
    };
    let agent = tenant
        .as_deref()
        .map(|t| state.triage.tenant(t).name.clone());

    Json(serde_json::json!({
        "ok": true,
        "jid": id,
        "tag": tag.tag(),
        "tenant": tenant,
        "agent": agent,
    }))
    .into_response()
}

#[derive(Debug, Deserialize)]
pub struct TagRequest {
    /// `null` returns the conversation to untagged.
    tag: Option<String>,
}

/// Operator retag or clear.
pub async fn set_tag(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<TagRequest>,
) -> Response {
    let tag = body.tag.map(|t| t.trim().to_string()).filter(|t| !t.is_empty());
    let result = match tag.as_deref() {
        Some(tag) => state.store.set_tag(&id, tag).await,
        None => state.store.clear_tag(&id).await,
    };
    if let Err(e) = result {
        return storage_failure(e);
    }

    info!(conversation_id = %id, tag = ?tag, "Tag set by operator");
    state.events.publish(DeskEvent::Ticket {
        conversation_id: id.clone(),
        change: TicketChange::Tag { tag: tag.clone() },
    });
    Json(serde_json::json!({"ok": true, "jid": id, "tag": tag})).into_response()
}

// ── Send ────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct SendRequest {
    #[serde(default)]
    to: String,
    #[serde(default)]
    text: String,
    author: Option<String>,
}

pub async fn send(State(state): State<AppState>, Json(body): Json<SendRequest>) -> Response {
    match state
        .outbound
        .send(&body.to, &body.text, body.author.as_deref())
    {
        Ok(jid) => Json(serde_json::json!({"ok": true, "queued": true, "jid": jid})).into_response(),
        Err(e) => {
            let status = match e {
                SendError::NotAllowed(_) => StatusCode::FORBIDDEN,
                SendError::NotReady { .. } => StatusCode::SERVICE_UNAVAILABLE,
                SendError::MissingRecipient | SendError::InvalidRecipient(_) | SendError::EmptyText => {
                    StatusCode::BAD_REQUEST
                }
            };
            error_response(status, e.to_string())
        }
    }
}

// ── Human mode ──────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct HumanModeRequest {
    #[serde(default)]
    jid: String,
    #[serde(default)]
    enabled: bool,
}

pub async fn set_human_mode(
    State(state): State<AppState>,
    Json(body): Json<HumanModeRequest>,
) -> Response {
    let jid = body.jid.trim();
    if jid.is_empty() {
        return error_response(StatusCode::BAD_REQUEST, "jid required");
    }
    match state.store.set_human_mode(jid, body.enabled).await {
        Ok(value) => {
            info!(conversation_id = %jid, enabled = value, "Human mode toggled");
            state.events.publish(DeskEvent::Ticket {
                conversation_id: jid.to_string(),
                change: TicketChange::HumanMode { enabled: value },
            });
            Json(serde_json::json!({"ok": true, "jid": jid, "humanMode": value})).into_response()
        }
        Err(e) => storage_failure(e),
    }
}

#[derive(Debug, Deserialize)]
pub struct HumanModeQuery {
    jid: Option<String>,
}

pub async fn get_human_mode(
    State(state): State<AppState>,
    Query(query): Query<HumanModeQuery>,
) -> Response {
    let Some(jid) = query.jid.filter(|j| !j.trim().is_empty()) else {
        return error_response(StatusCode::BAD_REQUEST, "jid required");
    };
    match state.store.is_human_mode(&jid).await {
        Ok(value) => Json(serde_json::json!({"ok": true, "jid": jid, "humanMode": value})).into_response(),
        Err(e) => storage_failure(e),
    }
}
