//! Random password generation.
//!
//! Draws from a fixed alphabet of lowercase, uppercase, digits, and
//! symbols using the system CSPRNG with rejection sampling, so every
//! character is uniformly distributed.

use crate::error::{Result, VaultError};
use ring::rand::{SecureRandom, SystemRandom};

/// Minimum accepted password length.
pub const MIN_LENGTH: usize = 6;

/// Maximum accepted password length.
pub const MAX_LENGTH: usize = 32;

/// Default generated length.
pub const DEFAULT_LENGTH: usize = 14;

const ALPHABET: &[u8] =
    b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789!@#$%&()_-+^*?";

/// Generate a random password of `length` characters.
///
/// `length` is clamped to `MIN_LENGTH..=MAX_LENGTH`.
///
/// # Errors
///
/// Returns [`VaultError::Internal`] if the system CSPRNG fails.
pub fn generate_password(length: usize) -> Result<String> {
    let length = length.clamp(MIN_LENGTH, MAX_LENGTH);
    let rng = SystemRandom::new();

    // Reject bytes above the largest multiple of the alphabet size to keep
    // the distribution uniform.
    let limit = 256 - (256 % ALPHABET.len());
    let mut out = String::with_capacity(length);
    let mut buf = [0u8; 1];

    while out.len() < length {
        rng.fill(&mut buf)
            .map_err(|_| VaultError::Internal("failed to generate random bytes".into()))?;
        let b = buf[0] as usize;
        if b < limit {
            out.push(ALPHABET[b % ALPHABET.len()] as char);
        }
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generates_requested_length() {
        for len in [MIN_LENGTH, DEFAULT_LENGTH, MAX_LENGTH] {
            assert_eq!(generate_password(len).unwrap().len(), len);
        }
    }

    #[test]
    fn length_is_clamped() {
        assert_eq!(generate_password(1).unwrap().len(), MIN_LENGTH);
        assert_eq!(generate_password(1000).unwrap().len(), MAX_LENGTH);
    }

    #[test]
    fn output_uses_only_the_alphabet() {
        let pw = generate_password(MAX_LENGTH).unwrap();
        assert!(pw.bytes().all(|b| ALPHABET.contains(&b)));
    }

    #[test]
    fn consecutive_outputs_differ() {
        let a = generate_password(DEFAULT_LENGTH).unwrap();
        let b = generate_password(DEFAULT_LENGTH).unwrap();
        assert_ne!(a, b);
    }
}
