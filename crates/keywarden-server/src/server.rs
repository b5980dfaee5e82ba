//! Server setup and startup.
//!
//! [`ApiServer`] composes the Axum router, registers all routes, and
//! starts the HTTP listener.

use std::sync::Arc;

use axum::Router;
use axum::http::{HeaderValue, Method};
use axum::routing::{delete, get, post, put};
use tower_http::cors::CorsLayer;

use keywarden_core::TokenSigner;
use keywarden_store::CredentialStore;

use crate::ServerConfig;
use crate::api;
use crate::state::AppState;

/// The Keywarden API server.
pub struct ApiServer {
    config: ServerConfig,
    state: Arc<AppState>,
}

impl ApiServer {
    /// Create a new API server.
    ///
    /// # Arguments
    ///
    /// * `config` - Bind address and port configuration.
    /// * `store` - The credential store shared across all requests.
    /// * `tokens` - The bearer-token signer.
    pub fn new(config: ServerConfig, store: CredentialStore, tokens: TokenSigner) -> Self {
        let state = Arc::new(AppState {
            store,
            tokens,
            config: config.clone(),
        });
        Self { config, state }
    }

    /// Return the `host:port` string this server will bind to.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.config.bind_addr, self.config.port)
    }

    /// Build the Axum router with all routes registered.
    pub fn router(&self) -> Router {
        let cors = CorsLayer::new()
            .allow_origin("*".parse::<HeaderValue>().unwrap())
            .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
            .allow_headers(tower_http::cors::Any);

        Router::new()
            .route("/api/status", get(api::status))
            // Authentication.
            .route("/api/auth/register", post(api::register))
            .route("/api/auth/login", post(api::login))
            // Stored credentials.
            .route("/api/passwords", get(api::list_passwords))
            .route("/api/passwords", post(api::save_password))
            .route("/api/passwords/{id}", delete(api::delete_password))
            // Account profile.
            .route("/api/user/profile", get(api::get_profile))
            .route("/api/user/profile", put(api::update_profile))
            .layer(cors)
            .with_state(Arc::clone(&self.state))
    }

    /// Start the server and block until it is shut down.
    ///
    /// # Errors
    ///
    /// Returns an error if the TCP listener cannot be bound.
    pub async fn start(self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let addr = self.addr();
        let router = self.router();

        api::init_startup_time();
        tracing::info!(addr = %addr, "starting api server");

        let listener = tokio::net::TcpListener::bind(&addr).await?;
        axum::serve(listener, router).await?;

        Ok(())
    }
}
