//! Local session persistence.
//!
//! A single well-known file holds one encrypted JSON payload
//! `{"user": <id>, "ts": <epoch_seconds>, "ttl": <seconds>}`. Saving
//! overwrites the file, so at most one local session is active at a time.
//!
//! Loading treats expired, corrupt, tampered, and wrong-key sessions
//! identically: the file is deleted and `None` is returned. Callers never
//! learn which of those happened — the distinction is logged server-side
//! only, so a tampered file cannot be probed through this API.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::crypto::Cipher;
use crate::error::Result;

/// Default session lifetime in days.
pub const DEFAULT_TTL_DAYS: i64 = 30;

/// Decrypted session contents.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SessionPayload {
    /// The logged-in user's id.
    pub user: i64,
    /// Issue time, epoch seconds.
    pub ts: i64,
    /// Lifetime in seconds from `ts`.
    pub ttl: i64,
}

impl SessionPayload {
    /// Whether the session is still valid at `now`.
    fn is_live(&self, now: i64) -> bool {
        now - self.ts <= self.ttl
    }
}

/// Persists the local session blob.
pub struct SessionManager {
    path: PathBuf,
    cipher: Cipher,
}

impl SessionManager {
    /// Create a manager for the session file at `path`.
    pub fn new(path: impl Into<PathBuf>, cipher: Cipher) -> Self {
        Self {
            path: path.into(),
            cipher,
        }
    }

    /// Save a session for `user_id` lasting `ttl_days`, overwriting any
    /// existing session.
    pub fn save(&self, user_id: i64, ttl_days: i64) -> Result<()> {
        let payload = SessionPayload {
            user: user_id,
            ts: chrono::Utc::now().timestamp(),
            ttl: ttl_days * 86_400,
        };

        let blob = self.cipher.encrypt(&serde_json::to_vec(&payload)?)?;

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.path, &blob)?;

        tracing::debug!(user_id, ttl_days, "session saved");
        Ok(())
    }

    /// Load the session if it exists and is still valid.
    ///
    /// Any failure — missing file aside — deletes the file and yields
    /// `None`; expiry and corruption are indistinguishable to the caller.
    pub fn load(&self) -> Option<SessionPayload> {
        if !self.path.exists() {
            return None;
        }

        let blob = match std::fs::read(&self.path) {
            Ok(b) => b,
            Err(err) => {
                tracing::warn!(%err, "failed to read session file");
                return None;
            }
        };

        let payload = self
            .cipher
            .decrypt(&blob)
            .ok()
            .and_then(|plain| serde_json::from_slice::<SessionPayload>(&plain).ok());

        match payload {
            Some(p) if p.is_live(chrono::Utc::now().timestamp()) => Some(p),
            Some(_) => {
                tracing::debug!("session expired, clearing");
                self.clear();
                None
            }
            None => {
                tracing::debug!("session unreadable, clearing");
                self.clear();
                None
            }
        }
    }

    /// Whether a live session exists.
    pub fn has_session(&self) -> bool {
        self.load().is_some()
    }

    /// Delete the session file if present. Best-effort.
    pub fn clear(&self) {
        if self.path.exists()
            && let Err(err) = std::fs::remove_file(&self.path)
        {
            tracing::warn!(%err, "failed to delete session file");
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::{self, KEY_LEN};

    fn make_manager(dir: &tempfile::TempDir) -> SessionManager {
        let cipher = Cipher::new(&crypto::random_bytes(KEY_LEN).unwrap()).unwrap();
        SessionManager::new(dir.path().join("session.bin"), cipher)
    }

    #[test]
    fn save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let sessions = make_manager(&dir);

        sessions.save(7, 30).unwrap();
        let payload = sessions.load().unwrap();
        assert_eq!(payload.user, 7);
        assert_eq!(payload.ttl, 30 * 86_400);
        assert!(sessions.has_session());
    }

    #[test]
    fn no_file_means_no_session() {
        let dir = tempfile::tempdir().unwrap();
        let sessions = make_manager(&dir);
        assert!(sessions.load().is_none());
    }

    #[test]
    fn expired_session_is_deleted() {
        let dir = tempfile::tempdir().unwrap();
        let sessions = make_manager(&dir);

        // ttl_days = 0 gives a ttl of 0 seconds; any elapsed time past the
        // same second expires it. Write a payload with ts in the past
        // instead of sleeping.
        let past = SessionPayload {
            user: 1,
            ts: chrono::Utc::now().timestamp() - 10,
            ttl: 1,
        };
        let cipher = Cipher::new(&crypto::random_bytes(KEY_LEN).unwrap()).unwrap();
        let path = dir.path().join("session.bin");
        std::fs::write(
            &path,
            cipher.encrypt(&serde_json::to_vec(&past).unwrap()).unwrap(),
        )
        .unwrap();

        let sessions = SessionManager::new(&path, cipher);
        assert!(sessions.load().is_none());
        assert!(!path.exists(), "expired session file must be deleted");
    }

    #[test]
    fn tampered_session_is_deleted_and_silent() {
        let dir = tempfile::tempdir().unwrap();
        let sessions = make_manager(&dir);
        sessions.save(7, 30).unwrap();

        let path = dir.path().join("session.bin");
        let mut blob = std::fs::read(&path).unwrap();
        let last = blob.len() - 1;
        blob[last] ^= 0x01;
        std::fs::write(&path, &blob).unwrap();

        assert!(sessions.load().is_none());
        assert!(!path.exists(), "tampered session file must be deleted");
    }

    #[test]
    fn wrong_key_session_is_deleted() {
        let dir = tempfile::tempdir().unwrap();
        let sessions = make_manager(&dir);
        sessions.save(7, 30).unwrap();

        // A different cipher (fresh key) cannot read the file.
        let other = make_manager(&dir);
        assert!(other.load().is_none());
        assert!(!dir.path().join("session.bin").exists());
    }

    #[test]
    fn save_overwrites_previous_session() {
        let dir = tempfile::tempdir().unwrap();
        let sessions = make_manager(&dir);

        sessions.save(1, 30).unwrap();
        sessions.save(2, 30).unwrap();

        assert_eq!(sessions.load().unwrap().user, 2);
    }

    #[test]
    fn clear_removes_file() {
        let dir = tempfile::tempdir().unwrap();
        let sessions = make_manager(&dir);

        sessions.save(1, 30).unwrap();
        sessions.clear();
        assert!(sessions.load().is_none());

        // Clearing again is a no-op.
        sessions.clear();
    }
}
