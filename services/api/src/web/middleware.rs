//! services/api/src/web/middleware.rs
//!
//! Identity middleware for protecting routes.

use axum::{
    extract::{Request, State},
    http::StatusCode,
    middleware::Next,
    response::Response,
};
use inbox_triage_core::domain::normalize_identity;
use regex::Regex;
use std::sync::Arc;
use tracing::warn;

use crate::web::state::AppState;

/// Header carrying the user's mailbox identity.
pub const IDENTITY_HEADER: &str = "x-user-identity";

/// The normalized identity of the caller, inserted into request extensions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity(pub String);

/// Pattern an identity must match after normalization.
pub fn identity_pattern() -> Result<Regex, regex::Error> {
    Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$")
}

/// Normalizes `raw` and returns it when it looks like a mailbox address.
pub fn parse_identity(pattern: &Regex, raw: &str) -> Option<Identity> {
    let normalized = normalize_identity(raw);
    pattern.is_match(&normalized).then_some(Identity(normalized))
}

/// Middleware that validates the identity header.
///
/// If valid, inserts the `Identity` into request extensions for handlers to use.
/// If invalid or missing, returns 401 Unauthorized.
pub async fn require_identity(
    State(state): State<Arc<AppState>>,
    mut req: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    let raw = req
        .headers()
        .get(IDENTITY_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or(StatusCode::UNAUTHORIZED)?;

    let identity = parse_identity(&state.identity_pattern, raw).ok_or_else(|| {
        warn!("Rejected malformed {} header.", IDENTITY_HEADER);
        StatusCode::UNAUTHORIZED
    })?;

    req.extensions_mut().insert(identity);
    Ok(next.run(req).await)
}
