//! Authenticated encryption using AES-256-GCM via the `ring` crate.
//!
//! [`Cipher`] is the single encryption primitive for the vault: stored site
//! passwords and the local session file both go through it. Each call to
//! [`Cipher::encrypt`] produces a self-contained blob:
//!
//! ```text
//! [12 bytes: random nonce][ciphertext][16 bytes: GCM tag]
//! ```
//!
//! # Security Notes
//!
//! - GCM verifies the authentication tag before releasing any plaintext, so
//!   a tampered blob fails closed with [`VaultError::IntegrityFailure`] and
//!   never yields corrupted output.
//! - Nonces are generated randomly per encryption. With 96-bit nonces the
//!   collision probability is negligible for up to ~2^32 encryptions under
//!   the same key.

use ring::aead::{self, Aad, BoundKey, NONCE_LEN, Nonce, NonceSequence, SealingKey, UnboundKey};
use ring::rand::{SecureRandom, SystemRandom};

use crate::error::{Result, VaultError};

/// Length of the AES-256-GCM key in bytes.
pub const KEY_LEN: usize = 32;

/// Length of the AES-256-GCM nonce in bytes (96 bits).
pub const NONCE_LEN_BYTES: usize = NONCE_LEN;

/// Length of the GCM authentication tag in bytes.
pub const TAG_LEN: usize = 16;

/// Minimum size of a valid blob: nonce + tag (empty plaintext).
pub const MIN_BLOB_LEN: usize = NONCE_LEN_BYTES + TAG_LEN;

/// AES-256-GCM algorithm from `ring`.
static AEAD_ALG: &aead::Algorithm = &aead::AES_256_GCM;

// ---------------------------------------------------------------------------
// Nonce handling
// ---------------------------------------------------------------------------

/// A single-use nonce sequence that yields exactly one nonce and then errors.
///
/// `ring` requires a [`NonceSequence`] for sealing operations. Since we
/// generate a fresh random nonce per encryption call, this wrapper ensures
/// each sealing key is used exactly once.
struct SingleNonce(Option<[u8; NONCE_LEN_BYTES]>);

impl SingleNonce {
    fn new(bytes: [u8; NONCE_LEN_BYTES]) -> Self {
        Self(Some(bytes))
    }
}

impl NonceSequence for SingleNonce {
    fn advance(&mut self) -> std::result::Result<Nonce, ring::error::Unspecified> {
        self.0
            .take()
            .map(Nonce::assume_unique_for_key)
            .ok_or(ring::error::Unspecified)
    }
}

// ---------------------------------------------------------------------------
// Cipher
// ---------------------------------------------------------------------------

/// Authenticated cipher bound to a single 256-bit key.
///
/// Cloning is cheap; the key is shared.
#[derive(Clone)]
pub struct Cipher {
    key: std::sync::Arc<[u8; KEY_LEN]>,
}

impl Cipher {
    /// Create a cipher from raw key bytes.
    ///
    /// # Errors
    ///
    /// Returns [`VaultError::EncryptionFailed`] if `key` is not exactly
    /// [`KEY_LEN`] bytes.
    pub fn new(key: &[u8]) -> Result<Self> {
        let key: [u8; KEY_LEN] = key
            .try_into()
            .map_err(|_| VaultError::EncryptionFailed {
                reason: format!("key must be {} bytes, got {}", KEY_LEN, key.len()),
            })?;
        Ok(Self {
            key: std::sync::Arc::new(key),
        })
    }

    /// Encrypt `plaintext`, returning a self-contained blob
    /// (`nonce ‖ ciphertext ‖ tag`).
    ///
    /// # Errors
    ///
    /// Returns [`VaultError::EncryptionFailed`] if nonce generation or the
    /// seal operation fails.
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>> {
        let rng = SystemRandom::new();

        let mut nonce_bytes = [0u8; NONCE_LEN_BYTES];
        rng.fill(&mut nonce_bytes)
            .map_err(|_| VaultError::EncryptionFailed {
                reason: "failed to generate random nonce".into(),
            })?;

        let unbound_key =
            UnboundKey::new(AEAD_ALG, self.key.as_ref()).map_err(|_| {
                VaultError::EncryptionFailed {
                    reason: "failed to create AES-256-GCM key".into(),
                }
            })?;
        let mut sealing_key = SealingKey::new(unbound_key, SingleNonce::new(nonce_bytes));

        // `ring` encrypts in-place and appends the authentication tag.
        let mut in_out = plaintext.to_vec();
        sealing_key
            .seal_in_place_append_tag(Aad::empty(), &mut in_out)
            .map_err(|_| VaultError::EncryptionFailed {
                reason: "seal_in_place failed".into(),
            })?;

        let mut blob = Vec::with_capacity(NONCE_LEN_BYTES + in_out.len());
        blob.extend_from_slice(&nonce_bytes);
        blob.extend_from_slice(&in_out);

        tracing::trace!(
            plaintext_len = plaintext.len(),
            blob_len = blob.len(),
            "encrypted blob"
        );

        Ok(blob)
    }

    /// Decrypt a blob produced by [`Cipher::encrypt`].
    ///
    /// The tag is verified before any plaintext is released.
    ///
    /// # Errors
    ///
    /// - [`VaultError::MalformedBlob`] if the blob is shorter than the
    ///   minimum header.
    /// - [`VaultError::IntegrityFailure`] if the tag does not verify
    ///   (tampered data or wrong key).
    pub fn decrypt(&self, blob: &[u8]) -> Result<Vec<u8>> {
        if blob.len() < MIN_BLOB_LEN {
            return Err(VaultError::MalformedBlob {
                reason: format!(
                    "blob is {} bytes, minimum is {}",
                    blob.len(),
                    MIN_BLOB_LEN
                ),
            });
        }

        let (nonce_bytes, ciphertext) = blob.split_at(NONCE_LEN_BYTES);
        let mut nonce = [0u8; NONCE_LEN_BYTES];
        nonce.copy_from_slice(nonce_bytes);

        let unbound_key =
            UnboundKey::new(AEAD_ALG, self.key.as_ref()).map_err(|_| {
                VaultError::EncryptionFailed {
                    reason: "failed to create AES-256-GCM key".into(),
                }
            })?;
        let mut opening_key = aead::OpeningKey::new(unbound_key, SingleNonce::new(nonce));

        let mut in_out = ciphertext.to_vec();
        let plaintext = opening_key
            .open_in_place(Aad::empty(), &mut in_out)
            .map_err(|_| VaultError::IntegrityFailure)?;

        Ok(plaintext.to_vec())
    }
}

impl std::fmt::Debug for Cipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Never print key material.
        f.debug_struct("Cipher").finish_non_exhaustive()
    }
}

/// Generate `len` cryptographically secure random bytes.
///
/// # Errors
///
/// Returns [`VaultError::Internal`] if the system CSPRNG fails.
pub fn random_bytes(len: usize) -> Result<Vec<u8>> {
    let rng = SystemRandom::new();
    let mut buf = vec![0u8; len];
    rng.fill(&mut buf)
        .map_err(|_| VaultError::Internal("failed to generate random bytes".into()))?;
    Ok(buf)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn make_cipher() -> Cipher {
        let key = random_bytes(KEY_LEN).unwrap();
        Cipher::new(&key).unwrap()
    }

    #[test]
    fn encrypt_decrypt_roundtrip() {
        let cipher = make_cipher();
        let plaintext = b"hunter2, but longer";

        let blob = cipher.encrypt(plaintext).unwrap();
        let decrypted = cipher.decrypt(&blob).unwrap();

        assert_eq!(decrypted, plaintext);
    }

    #[test]
    fn decrypt_with_wrong_key_is_integrity_failure() {
        let cipher1 = make_cipher();
        let cipher2 = make_cipher();

        let blob = cipher1.encrypt(b"secret data").unwrap();
        let result = cipher2.decrypt(&blob);

        assert!(matches!(result, Err(VaultError::IntegrityFailure)));
    }

    #[test]
    fn flipping_any_byte_is_detected() {
        let cipher = make_cipher();
        let blob = cipher.encrypt(b"secret data").unwrap();

        for i in 0..blob.len() {
            let mut tampered = blob.clone();
            tampered[i] ^= 0x01;
            let result = cipher.decrypt(&tampered);
            assert!(
                matches!(result, Err(VaultError::IntegrityFailure)),
                "byte {i} flip was not detected"
            );
        }
    }

    #[test]
    fn short_blob_is_malformed_not_integrity() {
        let cipher = make_cipher();
        let result = cipher.decrypt(&[0u8; MIN_BLOB_LEN - 1]);
        assert!(matches!(result, Err(VaultError::MalformedBlob { .. })));
    }

    #[test]
    fn invalid_key_length_rejected() {
        let short_key = vec![0u8; 16]; // AES-128, not AES-256
        assert!(Cipher::new(&short_key).is_err());
    }

    #[test]
    fn empty_plaintext_roundtrip() {
        let cipher = make_cipher();
        let blob = cipher.encrypt(b"").unwrap();
        assert_eq!(blob.len(), MIN_BLOB_LEN);
        assert_eq!(cipher.decrypt(&blob).unwrap(), b"");
    }

    #[test]
    fn nonces_are_unique_per_call() {
        let cipher = make_cipher();
        let a = cipher.encrypt(b"same input").unwrap();
        let b = cipher.encrypt(b"same input").unwrap();
        assert_ne!(a[..NONCE_LEN_BYTES], b[..NONCE_LEN_BYTES]);
        assert_ne!(a, b);
    }
}
