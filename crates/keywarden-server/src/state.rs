//! Shared application state for the API server.
//!
//! [`AppState`] is wrapped in an `Arc` and shared across all request
//! handlers. It holds the credential store and the token signer; handlers
//! never touch the database or key material directly.

use keywarden_core::TokenSigner;
use keywarden_store::CredentialStore;

use crate::ServerConfig;

/// Shared state accessible from every Axum handler.
#[derive(Clone)]
pub struct AppState {
    /// Account and secret operations.
    pub store: CredentialStore,

    /// Issues and validates bearer tokens.
    pub tokens: TokenSigner,

    /// Server configuration.
    pub config: ServerConfig,
}
