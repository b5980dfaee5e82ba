//! Login-password verifier derivation and verification.
//!
//! Verifiers are stored as the self-describing string
//! `pbkdf2_sha256$<iterations>$<saltHex>$<hashHex>` (PBKDF2-HMAC-SHA256,
//! 16-byte random salt, 32-byte derived key). Two historical storage
//! schemes are still accepted on verify:
//!
//! 1. a bare lowercase-hex SHA-256 digest of the password (64 chars), and
//! 2. the raw password itself, stored as plaintext.
//!
//! A record matched through either legacy path reports
//! [`Verdict::needs_rehash`] so the caller can rewrite it into the current
//! format with a fresh salt. The rewrite is best-effort: a failure there
//! must never fail the login.
//!
//! All digest comparisons are constant-time via `ring`.

use std::num::NonZeroU32;

use ring::digest;
use ring::pbkdf2;
use ring::rand::{SecureRandom, SystemRandom};

use crate::error::{Result, VaultError};

/// Algorithm tag at the front of a current-format verifier.
pub const ALGORITHM: &str = "pbkdf2_sha256";

/// Default PBKDF2 iteration count. Raising this upgrades existing records
/// lazily: they are re-derived on the next successful login.
pub const DEFAULT_ITERATIONS: u32 = 200_000;

/// Salt length in bytes.
const SALT_LEN: usize = 16;

/// Derived key length in bytes.
const DK_LEN: usize = 32;

/// PBKDF2 algorithm: HMAC-SHA256.
static PBKDF2_ALG: pbkdf2::Algorithm = pbkdf2::PBKDF2_HMAC_SHA256;

/// Outcome of verifying a password against a stored record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Verdict {
    /// Whether the password matched the stored record.
    pub matched: bool,
    /// Whether the record should be rewritten into the current format
    /// (legacy scheme, or an iteration count below the current default).
    /// Only meaningful when `matched` is true.
    pub needs_rehash: bool,
}

impl Verdict {
    const MISS: Self = Self {
        matched: false,
        needs_rehash: false,
    };
}

/// Derives and verifies login-password verifiers.
#[derive(Debug, Clone, Copy)]
pub struct PasswordHasher {
    iterations: NonZeroU32,
}

impl Default for PasswordHasher {
    fn default() -> Self {
        Self::new(DEFAULT_ITERATIONS)
    }
}

impl PasswordHasher {
    /// Create a hasher with a specific iteration count.
    ///
    /// # Panics
    ///
    /// Panics if `iterations` is zero.
    pub fn new(iterations: u32) -> Self {
        Self {
            iterations: NonZeroU32::new(iterations).expect("iteration count must be non-zero"),
        }
    }

    /// Derive a current-format verifier for `password` with a fresh random
    /// salt.
    ///
    /// # Errors
    ///
    /// Returns [`VaultError::KeyDerivationFailed`] if salt generation fails.
    pub fn derive(&self, password: &str) -> Result<String> {
        let rng = SystemRandom::new();
        let mut salt = [0u8; SALT_LEN];
        rng.fill(&mut salt)
            .map_err(|_| VaultError::KeyDerivationFailed {
                reason: "failed to generate random salt".into(),
            })?;

        let mut dk = [0u8; DK_LEN];
        pbkdf2::derive(
            PBKDF2_ALG,
            self.iterations,
            &salt,
            password.as_bytes(),
            &mut dk,
        );

        Ok(format!(
            "{ALGORITHM}${}${}${}",
            self.iterations,
            hex::encode(salt),
            hex::encode(dk)
        ))
    }

    /// Verify `password` against a stored record in any accepted format.
    ///
    /// Tries the current format first, then the legacy SHA-256 digest shape,
    /// then a raw plaintext comparison. Comparisons are constant-time.
    pub fn verify(&self, password: &str, stored: &str) -> Verdict {
        if let Some((iterations, salt, expected_dk)) = parse_record(stored) {
            let matched = pbkdf2::verify(
                PBKDF2_ALG,
                iterations,
                &salt,
                password.as_bytes(),
                &expected_dk,
            )
            .is_ok();
            return Verdict {
                matched,
                needs_rehash: matched && iterations < self.iterations,
            };
        }

        // Legacy: bare lowercase-hex SHA-256 digest. The shape test is
        // ambiguous for a genuine 64-hex-char password; kept for
        // compatibility with historical records.
        if is_hex_digest(stored) {
            let Ok(expected) = hex::decode(stored) else {
                return Verdict::MISS;
            };
            let candidate = digest::digest(&digest::SHA256, password.as_bytes());
            let matched =
                ring::constant_time::verify_slices_are_equal(candidate.as_ref(), &expected)
                    .is_ok();
            return Verdict {
                matched,
                needs_rehash: matched,
            };
        }

        // Legacy: raw plaintext.
        let matched = ring::constant_time::verify_slices_are_equal(
            password.as_bytes(),
            stored.as_bytes(),
        )
        .is_ok();
        Verdict {
            matched,
            needs_rehash: matched,
        }
    }
}

/// Parse a current-format record into `(iterations, salt, derived_key)`.
///
/// Returns `None` for anything that is not exactly
/// `pbkdf2_sha256$<iterations>$<saltHex>$<hashHex>`.
fn parse_record(record: &str) -> Option<(NonZeroU32, Vec<u8>, Vec<u8>)> {
    let mut parts = record.split('$');
    if parts.next()? != ALGORITHM {
        return None;
    }
    let iterations: u32 = parts.next()?.parse().ok()?;
    let salt = hex::decode(parts.next()?).ok()?;
    let dk = hex::decode(parts.next()?).ok()?;
    if parts.next().is_some() || salt.is_empty() || dk.is_empty() {
        return None;
    }
    Some((NonZeroU32::new(iterations)?, salt, dk))
}

/// True if `s` looks like a bare lowercase-hex SHA-256 digest.
fn is_hex_digest(s: &str) -> bool {
    s.len() == 64 && s.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
