//! HTTP API for Keywarden.
//!
//! This crate exposes the credential store over a small REST surface:
//!
//! - `POST /api/auth/register` and `POST /api/auth/login` issue bearer
//!   tokens.
//! - `GET`/`POST /api/passwords` and `DELETE /api/passwords/{id}` manage
//!   the caller's secrets.
//! - `GET`/`PUT /api/user/profile` read and update account identity.
//!
//! Every response carries a `success` flag; protected routes require an
//! `Authorization: Bearer` header validated against the HS256 token key.

pub mod api;
pub mod auth;
pub mod server;
pub mod state;

pub use server::ApiServer;
pub use state::AppState;

/// HTTP server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// The address to bind the HTTP server to.
    pub bind_addr: String,
    /// The port to listen on.
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1".into(),
            port: 8000,
        }
    }
}
