//! Keywarden Core - Credential vault primitives
//!
//! This crate provides:
//! - AES-256-GCM authenticated encryption for secrets at rest
//! - PBKDF2 login-password verifiers with legacy-format migration
//! - Platform keychain sourcing for the master key and token secret
//! - HS256-signed bearer tokens for the server API
//! - Encrypted local session persistence
//! - CSPRNG-backed password generation

pub mod crypto;
pub mod error;
pub mod generator;
pub mod hasher;
pub mod keychain;
pub mod session;
pub mod token;

pub use crypto::{Cipher, KEY_LEN, random_bytes};
pub use error::{Result, VaultError};
pub use generator::generate_password;
pub use hasher::{PasswordHasher, Verdict};
pub use keychain::{
    FileKeychain, KeychainProvider, MASTER_KEY_ENTRY, TOKEN_KEY_ENTRY, get_or_create_key,
    platform_keychain,
};
pub use session::{DEFAULT_TTL_DAYS, SessionManager, SessionPayload};
pub use token::{Claims, TokenSigner};
