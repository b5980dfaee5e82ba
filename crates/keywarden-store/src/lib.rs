//! Keywarden Store - Persistence layer
//!
//! This crate provides:
//! - A bounded async connection pool over SQLite ([`db::Database`])
//! - Versioned, idempotent schema migrations ([`migration`])
//! - A per-user TTL cache for hot queries ([`cache::CacheLayer`])
//! - Account and encrypted-secret operations ([`store::CredentialStore`])

pub mod cache;
pub mod db;
pub mod error;
pub mod migration;
pub mod store;

pub use cache::{CacheLayer, CacheStats};
pub use db::{Database, PoolConfig};
pub use error::{StoreError, StoreResult};
pub use store::{CredentialStore, DECRYPTION_ERROR_PLACEHOLDER, Profile, SecretRecord};
