//! Bearer-token authentication extractor.
//!
//! Protected handlers take an [`AuthUser`] argument; extraction fails with
//! `401 Unauthorized` when the `Authorization: Bearer` header is missing,
//! malformed, forged, or expired. Expiry gets its own error string so
//! clients can prompt for re-login instead of treating it as a bad token.

use std::sync::Arc;

use axum::Json;
use axum::extract::FromRequestParts;
use axum::http::{StatusCode, header, request::Parts};
use serde_json::{Value, json};

use keywarden_core::VaultError;

use crate::state::AppState;

/// The authenticated caller's user id, extracted from the bearer token.
#[derive(Debug, Clone, Copy)]
pub struct AuthUser(pub i64);

impl FromRequestParts<Arc<AppState>> for AuthUser {
    type Rejection = (StatusCode, Json<Value>);

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let header_value = parts
            .headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| unauthorized("missing authorization header"))?;

        let token = header_value
            .strip_prefix("Bearer ")
            .ok_or_else(|| unauthorized("expected bearer token"))?;

        match state.tokens.validate(token) {
            Ok(user_id) => Ok(AuthUser(user_id)),
            Err(VaultError::TokenExpired) => Err(unauthorized("token expired")),
            Err(_) => Err(unauthorized("invalid token")),
        }
    }
}

fn unauthorized(message: &str) -> (StatusCode, Json<Value>) {
    (
        StatusCode::UNAUTHORIZED,
        Json(json!({ "success": false, "error": message })),
    )
}
