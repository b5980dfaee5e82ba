//! Platform keychain integration for process-wide secrets.
//!
//! The master encryption key and the token-signing secret must never be
//! stored as plaintext on disk. This module provides a [`KeychainProvider`]
//! trait that abstracts over platform-specific secure storage backends:
//!
//! - **macOS**: Keychain Services via `security-framework`
//! - **Fallback**: file-based storage encrypted under a device-derived key
//!
//! [`get_or_create_key`] is the only way the rest of the system obtains
//! these secrets: it fetches the named entry, or generates a random 256-bit
//! key and persists it on first use. The call is serialized behind a
//! process-wide mutex so two concurrent first runs cannot each generate a
//! different key.
//!
//! # Security Notes
//!
//! - These keys are the root of trust for every encrypted secret and
//!   session blob. Losing a key permanently and silently invalidates
//!   everything encrypted under it: decryption fails with an integrity
//!   error and there is no recovery path. Callers must surface that state,
//!   never mask it.
//! - The file-based fallback is a compromise: the device-derived key can be
//!   reconstructed by anyone with access to the same machine account. A
//!   real OS keychain provides OS-protected storage.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use ring::pbkdf2;

use crate::crypto::{self, Cipher, KEY_LEN};
use crate::error::{Result, VaultError};

/// Keychain entry name for the vault master key.
pub const MASTER_KEY_ENTRY: &str = "master-key";

/// Keychain entry name for the bearer-token signing secret.
pub const TOKEN_KEY_ENTRY: &str = "token-key";

// ---------------------------------------------------------------------------
// Trait
// ---------------------------------------------------------------------------

/// Abstraction over platform-specific secure key storage.
///
/// Entries are identified by a short name ([`MASTER_KEY_ENTRY`],
/// [`TOKEN_KEY_ENTRY`]). Implementations must be `Send + Sync` so the vault
/// can be shared across async tasks.
pub trait KeychainProvider: Send + Sync {
    /// Retrieve the named key.
    ///
    /// Returns [`VaultError::MasterKeyNotFound`] if the entry has never been
    /// stored.
    fn get_key(&self, entry: &str) -> Result<Vec<u8>>;

    /// Store (or overwrite) the named key.
    fn set_key(&self, entry: &str, key: &[u8]) -> Result<()>;

    /// Check whether the named key has been stored.
    fn has_key(&self, entry: &str) -> Result<bool>;

    /// Delete the named key (e.g. during vault reset).
    fn delete_key(&self, entry: &str) -> Result<()>;
}

/// Fetch the named key, generating and persisting a random 256-bit key on
/// first use.
///
/// Serialized behind a process-wide mutex: concurrent callers on a fresh
/// install agree on a single generated key.
pub fn get_or_create_key(provider: &dyn KeychainProvider, entry: &str) -> Result<Vec<u8>> {
    static INIT_LOCK: Mutex<()> = Mutex::new(());
    let _guard = INIT_LOCK
        .lock()
        .map_err(|_| VaultError::Internal("keychain init lock poisoned".into()))?;

    match provider.get_key(entry) {
        Ok(key) => Ok(key),
        Err(VaultError::MasterKeyNotFound) => {
            let key = crypto::random_bytes(KEY_LEN)?;
            provider.set_key(entry, &key)?;
            tracing::info!(entry, "generated and stored new keychain entry");
            Ok(key)
        }
        Err(e) => Err(e),
    }
}

// ---------------------------------------------------------------------------
// File-based fallback
// ---------------------------------------------------------------------------

/// Application salt mixed into the device-derived key. Changing this
/// invalidates all previously stored entries. Must be exactly 32 bytes.
const APP_SALT: &[u8; 32] = b"keywarden-keychain-v1\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00";

/// PBKDF2 iterations for the device-derived wrapping key. The input has low
/// entropy either way; this only slows casual offline reconstruction.
const DEVICE_KEY_ITERATIONS: u32 = 100_000;

/// File-based keychain that stores each entry encrypted with a
/// device-derived key.
///
/// Each entry lives at `<dir>/<entry>.key` and holds a [`Cipher`] blob
/// (`nonce ‖ ciphertext ‖ tag`) of the raw key bytes.
pub struct FileKeychain {
    dir: PathBuf,
}

impl FileKeychain {
    /// Create a file-based keychain rooted at `dir`. The directory is
    /// created on first write.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn entry_path(&self, entry: &str) -> PathBuf {
        self.dir.join(format!("{entry}.key"))
    }

    /// Derive the wrapping cipher from machine-specific data.
    ///
    /// Combines the hostname, username, and an application salt into a
    /// deterministic 256-bit key unique per machine/user combination.
    fn device_cipher(&self) -> Result<Cipher> {
        let hostname = Self::hostname();
        let username = std::env::var("USER")
            .or_else(|_| std::env::var("USERNAME"))
            .unwrap_or_else(|_| "unknown-user".into());

        let mut material = Vec::with_capacity(hostname.len() + username.len() + APP_SALT.len());
        material.extend_from_slice(hostname.as_bytes());
        material.extend_from_slice(username.as_bytes());
        material.extend_from_slice(APP_SALT);

        let iterations = std::num::NonZeroU32::new(DEVICE_KEY_ITERATIONS)
            .expect("DEVICE_KEY_ITERATIONS is non-zero");
        let mut key = [0u8; KEY_LEN];
        pbkdf2::derive(
            pbkdf2::PBKDF2_HMAC_SHA256,
            iterations,
            APP_SALT,
            &material,
            &mut key,
        );

        Cipher::new(&key)
    }

    /// Get the system hostname, falling back to "unknown-host".
    fn hostname() -> String {
        #[cfg(unix)]
        {
            std::fs::read_to_string("/etc/hostname")
                .map(|s| s.trim().to_string())
                .or_else(|_| std::env::var("HOSTNAME"))
                .or_else(|_| std::env::var("HOST"))
                .unwrap_or_else(|_| "unknown-host".into())
        }

        #[cfg(not(unix))]
        {
            std::env::var("COMPUTERNAME")
                .or_else(|_| std::env::var("HOSTNAME"))
                .unwrap_or_else(|_| "unknown-host".into())
        }
    }
}

impl KeychainProvider for FileKeychain {
    fn get_key(&self, entry: &str) -> Result<Vec<u8>> {
        let path = self.entry_path(entry);
        if !path.exists() {
            return Err(VaultError::MasterKeyNotFound);
        }

        let blob = std::fs::read(&path)?;
        let key = self.device_cipher()?.decrypt(&blob)?;

        tracing::debug!(entry, "retrieved key from file keychain");
        Ok(key)
    }

    fn set_key(&self, entry: &str, key: &[u8]) -> Result<()> {
        let blob = self.device_cipher()?.encrypt(key)?;

        std::fs::create_dir_all(&self.dir)?;
        let path = self.entry_path(entry);
        std::fs::write(&path, &blob)?;

        // Owner read/write only.
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let perms = std::fs::Permissions::from_mode(0o600);
            std::fs::set_permissions(&path, perms)?;
        }

        tracing::info!(entry, path = %path.display(), "stored key in file keychain");
        Ok(())
    }

    fn has_key(&self, entry: &str) -> Result<bool> {
        Ok(self.entry_path(entry).exists())
    }

    fn delete_key(&self, entry: &str) -> Result<()> {
        let path = self.entry_path(entry);
        if path.exists() {
            std::fs::remove_file(&path)?;
            tracing::info!(entry, "deleted key from file keychain");
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// macOS Keychain Services
// ---------------------------------------------------------------------------

/// The Security framework error code for "item not found"
/// (`errSecItemNotFound = -25300`).
#[cfg(target_os = "macos")]
const MACOS_ERR_SEC_ITEM_NOT_FOUND: i32 = -25300;

/// macOS Keychain Services integration via the `security-framework` crate.
///
/// Stores each entry in the user's login keychain using the generic
/// password APIs, keyed by service name + entry name.
#[cfg(target_os = "macos")]
pub struct MacOSKeychain {
    service_name: String,
}

#[cfg(target_os = "macos")]
impl MacOSKeychain {
    /// Default service name used for keychain entries.
    const DEFAULT_SERVICE: &'static str = "dev.keywarden.vault";

    /// Create a provider using the default service name.
    pub fn new() -> Self {
        Self {
            service_name: Self::DEFAULT_SERVICE.to_string(),
        }
    }

    /// Create a provider with a custom service name — useful for tests so
    /// they do not touch production entries.
    pub fn with_service(service: &str) -> Self {
        Self {
            service_name: service.to_string(),
        }
    }
}

#[cfg(target_os = "macos")]
impl Default for MacOSKeychain {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(target_os = "macos")]
impl KeychainProvider for MacOSKeychain {
    fn get_key(&self, entry: &str) -> Result<Vec<u8>> {
        use security_framework::passwords::get_generic_password;

        match get_generic_password(&self.service_name, entry) {
            Ok(data) => {
                tracing::debug!(service = %self.service_name, entry, "retrieved key from macOS keychain");
                Ok(data.to_vec())
            }
            Err(e) if e.code() == MACOS_ERR_SEC_ITEM_NOT_FOUND => {
                Err(VaultError::MasterKeyNotFound)
            }
            Err(e) => Err(VaultError::KeychainUnavailable {
                reason: format!("macOS keychain read failed: {e}"),
            }),
        }
    }

    fn set_key(&self, entry: &str, key: &[u8]) -> Result<()> {
        use security_framework::passwords::set_generic_password;

        set_generic_password(&self.service_name, entry, key).map_err(|e| {
            VaultError::MasterKeyStoreFailed {
                reason: format!("macOS keychain write failed: {e}"),
            }
        })?;

        tracing::info!(service = %self.service_name, entry, "stored key in macOS keychain");
        Ok(())
    }

    fn has_key(&self, entry: &str) -> Result<bool> {
        use security_framework::passwords::get_generic_password;

        match get_generic_password(&self.service_name, entry) {
            Ok(_) => Ok(true),
            Err(e) if e.code() == MACOS_ERR_SEC_ITEM_NOT_FOUND => Ok(false),
            Err(e) => Err(VaultError::KeychainUnavailable {
                reason: format!("macOS keychain check failed: {e}"),
            }),
        }
    }

    fn delete_key(&self, entry: &str) -> Result<()> {
        use security_framework::passwords::delete_generic_password;

        match delete_generic_password(&self.service_name, entry) {
            Ok(()) => {
                tracing::info!(service = %self.service_name, entry, "deleted key from macOS keychain");
                Ok(())
            }
            // Not an error if the key does not exist.
            Err(e) if e.code() == MACOS_ERR_SEC_ITEM_NOT_FOUND => Ok(()),
            Err(e) => Err(VaultError::KeychainUnavailable {
                reason: format!("macOS keychain delete failed: {e}"),
            }),
        }
    }
}

// ---------------------------------------------------------------------------
// Factory
// ---------------------------------------------------------------------------

/// Returns the best available keychain provider for the current platform.
///
/// - **macOS**: [`MacOSKeychain`] (Keychain Services)
/// - **Other platforms**: [`FileKeychain`] rooted at `data_dir`
///
/// Callers should not need to know which backend is in use.
pub fn platform_keychain(data_dir: &Path) -> Box<dyn KeychainProvider> {
    let _ = &data_dir;

    #[cfg(target_os = "macos")]
    {
        tracing::info!("using macOS Keychain Services for key storage");
        Box::new(MacOSKeychain::new())
    }
    #[cfg(not(target_os = "macos"))]
    {
        tracing::info!(dir = %data_dir.display(), "using file-based keychain for key storage");
        Box::new(FileKeychain::new(data_dir))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
