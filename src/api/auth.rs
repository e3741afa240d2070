//! Admin bearer-token check.
//!
//! Fail-closed: with no token configured every guarded request is rejected.

use std::sync::Arc;

use axum::{
    Json,
    extract::{Request, State},
    http::{StatusCode, header},
    middleware::Next,
    response::{IntoResponse, Response},
};
use secrecy::{ExposeSecret, SecretString};
use tracing::{debug, warn};

#[derive(Clone, Default)]
pub struct AdminAuth {
    token: Option<Arc<SecretString>>,
}

impl std::fmt::Debug for AdminAuth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdminAuth")
            .field("token", &self.token.as_ref().map(|_| "[redacted]"))
            .finish()
    }
}

impl AdminAuth {
    pub fn new(token: Option<SecretString>) -> Self {
        Self {
            token: token
                .filter(|t| !t.expose_secret().is_empty())
                .map(Arc::new),
        }
    }

    pub fn is_configured(&self) -> bool {
        self.token.is_some()
    }

    /// Compare a presented token against the configured one.
    pub fn accepts(&self, presented: Option<&str>) -> bool {
        match (&self.token, presented) {
            (Some(expected), Some(given)) => expected.expose_secret() == given,
            _ => false,
        }
    }
}

pub(crate) fn unauthorized() -> Response {
    (
        StatusCode::UNAUTHORIZED,
        Json(serde_json::json!({"ok": false, "error": "unauthorized"})),
    )
        .into_response()
}

/// Route layer guarding operator endpoints.
pub async fn require_admin(State(auth): State<AdminAuth>, request: Request, next: Next) -> Response {
    if !auth.is_configured() {
        warn!("ADMIN_TOKEN not set, rejecting admin request");
        return unauthorized();
    }

    let presented = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));

    if auth.accepts(presented) {
        next.run(request).await
    } else {
        debug!(path = %request.uri().path(), "Rejected admin request");
        unauthorized()
    }
}
