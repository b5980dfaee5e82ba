//! Vault error types.
//!
//! All core subsystems surface errors through [`VaultError`], the single
//! error type returned by every public API in this crate.  Each variant
//! carries enough context for callers to decide how to handle the failure
//! without inspecting opaque strings.

/// Unified error type for the Keywarden credential vault core.
#[derive(Debug, thiserror::Error)]
pub enum VaultError {
    // -- Cipher errors ------------------------------------------------------
    /// Encryption failed (e.g. invalid key length, ring internal error).
    #[error("encryption failed: {reason}")]
    EncryptionFailed { reason: String },

    /// Authentication tag mismatch: the blob was tampered with or was
    /// encrypted under a different key. No plaintext is ever released.
    #[error("integrity check failed: tag mismatch (tampered data or wrong key)")]
    IntegrityFailure,

    /// The blob is shorter than the minimum header (nonce + tag) or is
    /// otherwise structurally unparseable.
    #[error("malformed blob: {reason}")]
    MalformedBlob { reason: String },

    /// Key derivation failed (e.g. random salt generation).
    #[error("key derivation failed: {reason}")]
    KeyDerivationFailed { reason: String },

    // -- Keychain errors ----------------------------------------------------
    /// The master key could not be retrieved from the platform keychain.
    #[error("master key not found in keychain")]
    MasterKeyNotFound,

    /// Writing the master key to the keychain failed.
    #[error("failed to store master key: {reason}")]
    MasterKeyStoreFailed { reason: String },

    /// The keychain backend is unavailable or unsupported on this platform.
    #[error("keychain unavailable: {reason}")]
    KeychainUnavailable { reason: String },

    // -- Token errors -------------------------------------------------------
    /// The bearer token's expiry timestamp is in the past.
    #[error("token expired")]
    TokenExpired,

    /// The bearer token is malformed or its signature does not verify.
    #[error("invalid token")]
    TokenInvalid,

    // -- Underlying errors --------------------------------------------------
    /// JSON serialization/deserialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// I/O error from the filesystem (session file, keychain file).
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    // -- Generic ------------------------------------------------------------
    /// Catch-all for unexpected internal errors that don't fit a specific
    /// variant.  Prefer a typed variant whenever possible.
    #[error("internal vault error: {0}")]
    Internal(String),
}

/// Convenience alias used throughout the core crate.
pub type Result<T> = std::result::Result<T, VaultError>;
