//! REST API route handlers.
//!
//! All endpoints speak JSON with a `success` flag in every body. Auth
//! failures never say whether the identity or the password was wrong.

use std::sync::Arc;
use std::time::{Duration, SystemTime};

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use keywarden_store::{Profile, SecretRecord, StoreError};

use crate::auth::AuthUser;
use crate::state::AppState;

// ---------------------------------------------------------------------------
// GET /api/status
// ---------------------------------------------------------------------------

/// Response payload for the `/api/status` endpoint.
#[derive(Serialize)]
pub struct StatusResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub uptime_seconds: u64,
    pub database: bool,
}

// Global startup time for uptime calculation.
static STARTUP_TIME: std::sync::OnceLock<SystemTime> = std::sync::OnceLock::new();

/// Initialize the startup time (call this once at server start).
pub fn init_startup_time() {
    STARTUP_TIME.set(SystemTime::now()).ok();
}

/// Return basic health information. Unauthenticated.
pub async fn status(State(state): State<Arc<AppState>>) -> Json<StatusResponse> {
    let startup_time = STARTUP_TIME.get().copied().unwrap_or_else(SystemTime::now);
    let uptime = SystemTime::now()
        .duration_since(startup_time)
        .unwrap_or(Duration::ZERO)
        .as_secs();

    let database = match state.store.ping().await {
        Ok(()) => true,
        Err(e) => {
            tracing::warn!(error = %e, "database health check failed");
            false
        }
    };

    Json(StatusResponse {
        status: if database { "healthy" } else { "degraded" },
        version: env!("CARGO_PKG_VERSION"),
        uptime_seconds: uptime,
        database,
    })
}

// ---------------------------------------------------------------------------
// POST /api/auth/register
// ---------------------------------------------------------------------------

/// Request body for account registration.
#[derive(Deserialize)]
pub struct RegisterBody {
    pub email: String,
    pub username: String,
    pub password: String,
}

/// Create an account and return a bearer token for the new user.
pub async fn register(
    State(state): State<Arc<AppState>>,
    Json(body): Json<RegisterBody>,
) -> (StatusCode, Json<Value>) {
    let profile = match state
        .store
        .create_user(&body.email, &body.username, &body.password)
        .await
    {
        Ok(p) => p,
        Err(e) => return store_error(e),
    };

    let token = match state.tokens.issue(profile.id) {
        Ok(t) => t,
        Err(e) => return internal_error(e),
    };

    tracing::info!(user_id = profile.id, "account registered");
    (
        StatusCode::CREATED,
        Json(json!({
            "success": true,
            "token": token,
            "user": profile_json(&profile),
        })),
    )
}

// ---------------------------------------------------------------------------
// POST /api/auth/login
// ---------------------------------------------------------------------------

/// Request body for login. `email` also accepts the account username.
#[derive(Deserialize)]
pub struct LoginBody {
    pub email: String,
    pub password: String,
}

/// Authenticate and return a bearer token.
///
/// Unknown identity and wrong password produce the identical response.
pub async fn login(
    State(state): State<Arc<AppState>>,
    Json(body): Json<LoginBody>,
) -> (StatusCode, Json<Value>) {
    let user_id = match state
        .store
        .verify_credentials(&body.email, &body.password)
        .await
    {
        Ok(Some(id)) => id,
        Ok(None) => {
            return (
                StatusCode::UNAUTHORIZED,
                Json(json!({ "success": false, "error": "invalid credentials" })),
            );
        }
        Err(e) => return store_error(e),
    };

    let token = match state.tokens.issue(user_id) {
        Ok(t) => t,
        Err(e) => return internal_error(e),
    };

    tracing::info!(user_id, "login succeeded");
    (
        StatusCode::OK,
        Json(json!({
            "success": true,
            "token": token,
            "user_id": user_id,
            "expires_in": state.tokens.ttl_secs(),
        })),
    )
}

// ---------------------------------------------------------------------------
// GET /api/passwords
// ---------------------------------------------------------------------------

/// List the caller's stored credentials, newest first.
pub async fn list_passwords(
    State(state): State<Arc<AppState>>,
    AuthUser(user_id): AuthUser,
) -> (StatusCode, Json<Value>) {
    match state.store.list_secrets(user_id).await {
        Ok(secrets) => {
            let items: Vec<Value> = secrets.iter().map(secret_json).collect();
            (
                StatusCode::OK,
                Json(json!({ "success": true, "count": items.len(), "passwords": items })),
            )
        }
        Err(e) => store_error(e),
    }
}

// ---------------------------------------------------------------------------
// POST /api/passwords
// ---------------------------------------------------------------------------

/// Request body for storing a credential.
#[derive(Deserialize)]
pub struct SavePasswordBody {
    pub site: String,
    pub username: String,
    pub password: String,
}

/// Encrypt and store a credential for the caller.
pub async fn save_password(
    State(state): State<Arc<AppState>>,
    AuthUser(user_id): AuthUser,
    Json(body): Json<SavePasswordBody>,
) -> (StatusCode, Json<Value>) {
    match state
        .store
        .save_secret(user_id, &body.site, &body.username, &body.password)
        .await
    {
        Ok(record) => (
            StatusCode::CREATED,
            Json(json!({ "success": true, "password": secret_json(&record) })),
        ),
        Err(e) => store_error(e),
    }
}

// ---------------------------------------------------------------------------
// DELETE /api/passwords/{id}
// ---------------------------------------------------------------------------

/// Delete one of the caller's credentials.
///
/// A secret owned by someone else 404s exactly like a nonexistent id.
pub async fn delete_password(
    State(state): State<Arc<AppState>>,
    AuthUser(user_id): AuthUser,
    Path(id): Path<i64>,
) -> (StatusCode, Json<Value>) {
    match state.store.delete_secret(user_id, id).await {
        Ok(true) => (StatusCode::OK, Json(json!({ "success": true }))),
        Ok(false) => (
            StatusCode::NOT_FOUND,
            Json(json!({ "success": false, "error": "password not found" })),
        ),
        Err(e) => store_error(e),
    }
}

// ---------------------------------------------------------------------------
// GET /api/user/profile
// ---------------------------------------------------------------------------

/// Return the caller's account profile.
pub async fn get_profile(
    State(state): State<Arc<AppState>>,
    AuthUser(user_id): AuthUser,
) -> (StatusCode, Json<Value>) {
    match state.store.get_profile(user_id).await {
        Ok(profile) => (
            StatusCode::OK,
            Json(json!({ "success": true, "user": profile_json(&profile) })),
        ),
        Err(e) => store_error(e),
    }
}

// ---------------------------------------------------------------------------
// PUT /api/user/profile
// ---------------------------------------------------------------------------

/// Request body for updating account identity.
#[derive(Deserialize)]
pub struct UpdateProfileBody {
    pub email: String,
    pub username: String,
}

/// Update the caller's email and username.
pub async fn update_profile(
    State(state): State<Arc<AppState>>,
    AuthUser(user_id): AuthUser,
    Json(body): Json<UpdateProfileBody>,
) -> (StatusCode, Json<Value>) {
    match state
        .store
        .update_profile(user_id, &body.email, &body.username)
        .await
    {
        Ok(true) => (StatusCode::OK, Json(json!({ "success": true }))),
        Ok(false) => (
            StatusCode::CONFLICT,
            Json(json!({ "success": false, "error": "email or username already in use" })),
        ),
        Err(e) => store_error(e),
    }
}

// ---------------------------------------------------------------------------
// Response helpers
// ---------------------------------------------------------------------------

fn profile_json(profile: &Profile) -> Value {
    json!({
        "id": profile.id,
        "email": profile.email,
        "username": profile.username,
        "created_at": profile.created_at,
    })
}

fn secret_json(secret: &SecretRecord) -> Value {
    json!({
        "id": secret.id,
        "site": secret.site,
        "username": secret.username,
        "password": secret.password,
        "created_at": secret.created_at,
    })
}

/// Map a store error to an HTTP response.
fn store_error(e: StoreError) -> (StatusCode, Json<Value>) {
    let status = match &e {
        StoreError::DuplicateIdentity => StatusCode::CONFLICT,
        StoreError::NotFound { .. } => StatusCode::NOT_FOUND,
        StoreError::InvalidArgument(_) => StatusCode::BAD_REQUEST,
        StoreError::StorageUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };

    if status == StatusCode::INTERNAL_SERVER_ERROR {
        tracing::error!(error = %e, "request failed");
        // Internals stay in the log, not the response body.
        return (
            status,
            Json(json!({ "success": false, "error": "internal error" })),
        );
    }

    (
        status,
        Json(json!({ "success": false, "error": e.to_string() })),
    )
}

fn internal_error(e: impl std::fmt::Display) -> (StatusCode, Json<Value>) {
    tracing::error!(error = %e, "request failed");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({ "success": false, "error": "internal error" })),
    )
}
