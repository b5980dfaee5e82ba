//! Signed bearer tokens for the server API (HS256).
//!
//! Tokens are compact three-segment strings,
//! `base64url(header).base64url(claims).base64url(mac)`, signed with
//! HMAC-SHA256 over the first two segments. Claims carry the user id plus
//! issue and expiry timestamps; expiry is minutes-scale by default.
//!
//! Validation is stateless: there is no revocation store, "logout" is the
//! client discarding its token. The signing secret comes from the platform
//! keychain ([`crate::keychain::TOKEN_KEY_ENTRY`]).

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD as B64;
use ring::hmac;
use serde::{Deserialize, Serialize};

use crate::error::{Result, VaultError};

/// Default token lifetime in seconds (15 minutes).
pub const DEFAULT_TTL_SECS: i64 = 15 * 60;

/// Static header segment — the algorithm never varies.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
struct Header {
    alg: String,
    typ: String,
}

impl Header {
    fn hs256() -> Self {
        Self {
            alg: "HS256".into(),
            typ: "JWT".into(),
        }
    }
}

/// Token claims.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// The authenticated user's id.
    pub user_id: i64,
    /// Issue time, epoch seconds.
    pub iat: i64,
    /// Expiry time, epoch seconds.
    pub exp: i64,
}

/// Issues and validates HS256-signed bearer tokens.
#[derive(Clone)]
pub struct TokenSigner {
    key: hmac::Key,
    ttl_secs: i64,
}

impl TokenSigner {
    /// Create a signer from the raw signing secret with the default
    /// minutes-scale expiry.
    pub fn new(secret: &[u8]) -> Self {
        Self::with_ttl(secret, DEFAULT_TTL_SECS)
    }

    /// Create a signer with an explicit token lifetime in seconds.
    pub fn with_ttl(secret: &[u8], ttl_secs: i64) -> Self {
        Self {
            key: hmac::Key::new(hmac::HMAC_SHA256, secret),
            ttl_secs,
        }
    }

    /// Token lifetime in seconds, for `expires_in` response fields.
    pub fn ttl_secs(&self) -> i64 {
        self.ttl_secs
    }

    /// Issue a token for `user_id`, valid from now for the configured TTL.
    pub fn issue(&self, user_id: i64) -> Result<String> {
        let now = chrono::Utc::now().timestamp();
        self.issue_at(user_id, now)
    }

    /// Issue a token with an explicit issue time — the testable core of
    /// [`TokenSigner::issue`].
    fn issue_at(&self, user_id: i64, iat: i64) -> Result<String> {
        let header = B64.encode(serde_json::to_vec(&Header::hs256())?);
        let claims = B64.encode(serde_json::to_vec(&Claims {
            user_id,
            iat,
            exp: iat + self.ttl_secs,
        })?);

        let signing_input = format!("{header}.{claims}");
        let mac = hmac::sign(&self.key, signing_input.as_bytes());
        let mac = B64.encode(mac.as_ref());

        Ok(format!("{signing_input}.{mac}"))
    }

    /// Validate a token and return the authenticated user id.
    ///
    /// # Errors
    ///
    /// - [`VaultError::TokenInvalid`] for structural or signature failures.
    /// - [`VaultError::TokenExpired`] when the signature is valid but the
    ///   expiry has passed.
    pub fn validate(&self, token: &str) -> Result<i64> {
        self.validate_at(token, chrono::Utc::now().timestamp())
    }

    fn validate_at(&self, token: &str, now: i64) -> Result<i64> {
        let mut segments = token.split('.');
        let (Some(header), Some(claims), Some(mac), None) = (
            segments.next(),
            segments.next(),
            segments.next(),
            segments.next(),
        ) else {
            return Err(VaultError::TokenInvalid);
        };

        // Verify the signature before trusting anything inside the token.
        let mac_bytes = B64.decode(mac).map_err(|_| VaultError::TokenInvalid)?;
        let signing_input = format!("{header}.{claims}");
        hmac::verify(&self.key, signing_input.as_bytes(), &mac_bytes)
            .map_err(|_| VaultError::TokenInvalid)?;

        let header_bytes = B64.decode(header).map_err(|_| VaultError::TokenInvalid)?;
        let parsed: Header =
            serde_json::from_slice(&header_bytes).map_err(|_| VaultError::TokenInvalid)?;
        if parsed != Header::hs256() {
            return Err(VaultError::TokenInvalid);
        }

        let claim_bytes = B64.decode(claims).map_err(|_| VaultError::TokenInvalid)?;
        let claims: Claims =
            serde_json::from_slice(&claim_bytes).map_err(|_| VaultError::TokenInvalid)?;

        if now >= claims.exp {
            return Err(VaultError::TokenExpired);
        }

        Ok(claims.user_id)
    }
}

impl std::fmt::Debug for TokenSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenSigner")
            .field("ttl_secs", &self.ttl_secs)
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
