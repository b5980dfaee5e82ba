//! Credential persistence for Keywarden.
//!
//! [`CredentialStore`] owns the account table (`login`) and the encrypted
//! secret table (`secrets`). Login passwords are stored as PBKDF2
//! verifiers; site passwords are encrypted with AES-256-GCM before they
//! touch disk and decrypted on the way out. Secret lists and profiles are
//! served through a per-user TTL cache that is invalidated on every
//! mutation.

use chrono::Utc;
use keywarden_core::{Cipher, PasswordHasher};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};

use crate::cache::{CacheLayer, CacheStats, DEFAULT_TTL_SECS};
use crate::db::Database;
use crate::error::{StoreError, StoreResult};

/// Placeholder shown when a stored secret fails authenticated decryption.
/// One bad row must not hide the rest of the vault.
pub const DECRYPTION_ERROR_PLACEHOLDER: &str = "<decryption-error>";

// ═══════════════════════════════════════════════════════════════════════
//  Types
// ═══════════════════════════════════════════════════════════════════════

/// A user account, without any password material.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    /// Row id in the `login` table.
    pub id: i64,
    /// Unique email, stored lowercased.
    pub email: String,
    /// Unique login name, stored lowercased.
    pub username: String,
    /// Unix timestamp when the account was created.
    pub created_at: i64,
}

/// A stored credential with its password already decrypted.
///
/// When authenticated decryption fails for a row, `password` carries
/// [`DECRYPTION_ERROR_PLACEHOLDER`] instead of failing the whole listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecretRecord {
    /// Row id in the `secrets` table.
    pub id: i64,
    /// Site or service this credential belongs to.
    pub site: String,
    /// Username at that site.
    pub username: String,
    /// The plaintext password, or the decryption-error placeholder.
    pub password: String,
    /// Unix timestamp when the secret was saved.
    pub created_at: i64,
}

// ═══════════════════════════════════════════════════════════════════════
//  CredentialStore
// ═══════════════════════════════════════════════════════════════════════

/// Account and secret operations over the pooled database.
#[derive(Clone)]
pub struct CredentialStore {
    db: Database,
    cipher: Cipher,
    hasher: PasswordHasher,
    secrets_cache: CacheLayer<Vec<SecretRecord>>,
    profile_cache: CacheLayer<Profile>,
}

impl CredentialStore {
    /// Create a store backed by `db`, encrypting secrets with `cipher`.
    pub fn new(db: Database, cipher: Cipher) -> Self {
        Self {
            db,
            cipher,
            hasher: PasswordHasher::default(),
            secrets_cache: CacheLayer::new("secrets", 10_000, DEFAULT_TTL_SECS),
            profile_cache: CacheLayer::new("profiles", 10_000, DEFAULT_TTL_SECS),
        }
    }

    // ── accounts ─────────────────────────────────────────────────────

    /// Register a new account.
    ///
    /// Email and username are trimmed and lowercased before storage so
    /// lookups are case-insensitive. The password is stored as a PBKDF2
    /// verifier, never in recoverable form.
    ///
    /// # Errors
    ///
    /// [`StoreError::DuplicateIdentity`] if the email or username is
    /// already taken.
    #[instrument(skip(self, password))]
    pub async fn create_user(
        &self,
        email: &str,
        username: &str,
        password: &str,
    ) -> StoreResult<Profile> {
        let email = email.trim().to_lowercase();
        let username = username.trim().to_lowercase();

        if email.is_empty() || username.is_empty() {
            return Err(StoreError::InvalidArgument(
                "email and username must not be empty".into(),
            ));
        }
        if password.is_empty() {
            return Err(StoreError::InvalidArgument(
                "password must not be empty".into(),
            ));
        }

        let verifier = self.hasher.derive(password)?;
        let now = Utc::now().timestamp();

        let profile = {
            let email = email.clone();
            let username = username.clone();
            self.db
                .execute(move |conn| {
                    conn.execute(
                        "INSERT INTO login (email, username, pass, created_at) VALUES (?1, ?2, ?3, ?4)",
                        rusqlite::params![email, username, verifier, now],
                    )
                    .map_err(constraint_to_duplicate)?;
                    Ok(Profile {
                        id: conn.last_insert_rowid(),
                        email,
                        username,
                        created_at: now,
                    })
                })
                .await?
        };

        debug!(user_id = profile.id, username = %profile.username, "account created");
        Ok(profile)
    }

    /// Authenticate by username or email.
    ///
    /// Returns `Some(user_id)` on success, `None` for both an unknown
    /// identity and a wrong password. Verifiers in a legacy format (or
    /// with a weaker iteration count) are rewritten to the current
    /// format after a successful match; a failed rewrite does not fail
    /// the login.
    #[instrument(skip(self, password))]
    pub async fn verify_credentials(
        &self,
        login_or_email: &str,
        password: &str,
    ) -> StoreResult<Option<i64>> {
        let identity = login_or_email.trim().to_lowercase();
        let password = password.to_string();
        let hasher = self.hasher;

        self.db
            .execute(move |conn| {
                let row = conn.query_row(
                    "SELECT id, pass FROM login WHERE username = ?1 OR email = ?1",
                    rusqlite::params![identity],
                    |row| Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?)),
                );

                let (user_id, stored) = match row {
                    Ok(pair) => pair,
                    Err(rusqlite::Error::QueryReturnedNoRows) => return Ok(None),
                    Err(e) => return Err(StoreError::Sqlite(e)),
                };

                let verdict = hasher.verify(&password, &stored);
                if !verdict.matched {
                    return Ok(None);
                }

                if verdict.needs_rehash {
                    match hasher.derive(&password) {
                        Ok(fresh) => {
                            if let Err(err) = conn.execute(
                                "UPDATE login SET pass = ?1 WHERE id = ?2",
                                rusqlite::params![fresh, user_id],
                            ) {
                                warn!(user_id, %err, "verifier rewrite failed");
                            } else {
                                debug!(user_id, "verifier upgraded to current format");
                            }
                        }
                        Err(err) => warn!(user_id, %err, "verifier rederivation failed"),
                    }
                }

                Ok(Some(user_id))
            })
            .await
    }

    /// Fetch an account profile by id, through the cache.
    #[instrument(skip(self))]
    pub async fn get_profile(&self, user_id: i64) -> StoreResult<Profile> {
        let key = format!("user:{user_id}:profile");
        let db = self.db.clone();
        self.profile_cache
            .get_or_insert_with(&key, || async move {
                db.execute(move |conn| {
                    let row = conn.query_row(
                        "SELECT id, email, username, created_at FROM login WHERE id = ?1",
                        rusqlite::params![user_id],
                        |row| {
                            Ok(Profile {
                                id: row.get(0)?,
                                email: row.get(1)?,
                                username: row.get(2)?,
                                created_at: row.get(3)?,
                            })
                        },
                    );
                    match row {
                        Ok(profile) => Ok(profile),
                        Err(rusqlite::Error::QueryReturnedNoRows) => Err(StoreError::NotFound {
                            entity: "user",
                            id: user_id,
                        }),
                        Err(e) => Err(StoreError::Sqlite(e)),
                    }
                })
                .await
            })
            .await
    }

    /// Update an account's email and username.
    ///
    /// Returns `false` when the new identity collides with a different
    /// account, leaving the row unchanged.
    ///
    /// # Errors
    ///
    /// [`StoreError::NotFound`] if no account has `user_id`.
    #[instrument(skip(self))]
    pub async fn update_profile(
        &self,
        user_id: i64,
        email: &str,
        username: &str,
    ) -> StoreResult<bool> {
        let email = email.trim().to_lowercase();
        let username = username.trim().to_lowercase();

        if email.is_empty() || username.is_empty() {
            return Err(StoreError::InvalidArgument(
                "email and username must not be empty".into(),
            ));
        }

        let updated = self
            .db
            .execute(move |conn| {
                // Collisions are caught by the UNIQUE constraints, atomically
                // with the write; a separate pre-check would race with
                // concurrent updates.
                let rows = match conn.execute(
                    "UPDATE login SET email = ?1, username = ?2 WHERE id = ?3",
                    rusqlite::params![email, username, user_id],
                ) {
                    Ok(rows) => rows,
                    Err(e) => {
                        return match constraint_to_duplicate(e) {
                            StoreError::DuplicateIdentity => Ok(false),
                            other => Err(other),
                        };
                    }
                };
                if rows == 0 {
                    return Err(StoreError::NotFound {
                        entity: "user",
                        id: user_id,
                    });
                }
                Ok(true)
            })
            .await?;

        if updated {
            self.invalidate_user(user_id)?;
        }
        Ok(updated)
    }

    // ── secrets ──────────────────────────────────────────────────────

    /// List a user's secrets, newest first, with passwords decrypted.
    ///
    /// Served through the cache; a row whose ciphertext fails
    /// authentication is returned with the decryption-error placeholder
    /// rather than aborting the listing.
    #[instrument(skip(self))]
    pub async fn list_secrets(&self, user_id: i64) -> StoreResult<Vec<SecretRecord>> {
        let key = format!("user:{user_id}:secrets");
        let db = self.db.clone();
        let cipher = self.cipher.clone();
        self.secrets_cache
            .get_or_insert_with(&key, || async move {
                db.execute(move |conn| {
                    let mut stmt = conn.prepare(
                        "SELECT id, site, username, pass, created_at FROM secrets \
                         WHERE user_id = ?1 ORDER BY id DESC",
                    )?;
                    let rows = stmt
                        .query_map(rusqlite::params![user_id], |row| {
                            Ok((
                                row.get::<_, i64>(0)?,
                                row.get::<_, String>(1)?,
                                row.get::<_, String>(2)?,
                                row.get::<_, Vec<u8>>(3)?,
                                row.get::<_, i64>(4)?,
                            ))
                        })?
                        .collect::<Result<Vec<_>, _>>()?;

                    let mut secrets = Vec::with_capacity(rows.len());
                    for (id, site, username, blob, created_at) in rows {
                        let password = match cipher.decrypt(&blob) {
                            Ok(plain) => String::from_utf8(plain)
                                .unwrap_or_else(|_| DECRYPTION_ERROR_PLACEHOLDER.to_string()),
                            Err(err) => {
                                warn!(secret_id = id, user_id, %err, "secret failed to decrypt");
                                DECRYPTION_ERROR_PLACEHOLDER.to_string()
                            }
                        };
                        secrets.push(SecretRecord {
                            id,
                            site,
                            username,
                            password,
                            created_at,
                        });
                    }
                    Ok(secrets)
                })
                .await
            })
            .await
    }

    /// Encrypt and store a new secret for `user_id`.
    ///
    /// Encryption happens before any write; an encryption failure aborts
    /// the operation with nothing persisted.
    #[instrument(skip(self, password))]
    pub async fn save_secret(
        &self,
        user_id: i64,
        site: &str,
        username: &str,
        password: &str,
    ) -> StoreResult<SecretRecord> {
        let site = site.trim().to_string();
        if site.is_empty() {
            return Err(StoreError::InvalidArgument("site must not be empty".into()));
        }
        let username = username.to_string();
        let blob = self.cipher.encrypt(password.as_bytes())?;
        let now = Utc::now().timestamp();

        let record = {
            let site = site.clone();
            let username = username.clone();
            let password = password.to_string();
            self.db
                .execute(move |conn| {
                    conn.execute(
                        "INSERT INTO secrets (site, username, pass, user_id, created_at) \
                         VALUES (?1, ?2, ?3, ?4, ?5)",
                        rusqlite::params![site, username, blob, user_id, now],
                    )?;
                    Ok(SecretRecord {
                        id: conn.last_insert_rowid(),
                        site,
                        username,
                        password,
                        created_at: now,
                    })
                })
                .await?
        };

        self.invalidate_user(user_id)?;
        debug!(secret_id = record.id, user_id, "secret stored");
        Ok(record)
    }

    /// Delete a secret owned by `user_id`.
    ///
    /// Ownership is part of the predicate: deleting another user's secret
    /// id returns `false`, indistinguishable from a nonexistent id.
    #[instrument(skip(self))]
    pub async fn delete_secret(&self, user_id: i64, secret_id: i64) -> StoreResult<bool> {
        let deleted = self
            .db
            .execute(move |conn| {
                let rows = conn.execute(
                    "DELETE FROM secrets WHERE id = ?1 AND user_id = ?2",
                    rusqlite::params![secret_id, user_id],
                )?;
                Ok(rows > 0)
            })
            .await?;

        if deleted {
            self.invalidate_user(user_id)?;
            debug!(secret_id, user_id, "secret deleted");
        }
        Ok(deleted)
    }

    /// Verify the database is reachable with a trivial query.
    pub async fn ping(&self) -> StoreResult<()> {
        self.db
            .execute(|conn| {
                conn.query_row("SELECT 1", [], |_| Ok(()))?;
                Ok(())
            })
            .await
    }

    // ── cache ────────────────────────────────────────────────────────

    /// Drop every cached entry belonging to one user.
    fn invalidate_user(&self, user_id: i64) -> StoreResult<()> {
        let prefix = format!("user:{user_id}:");
        self.secrets_cache.invalidate_prefix(&prefix)?;
        self.profile_cache.invalidate_prefix(&prefix)?;
        Ok(())
    }

    /// Cache hit/miss counters for the secret listing cache.
    pub fn secrets_cache_stats(&self) -> &CacheStats {
        self.secrets_cache.stats()
    }
}

/// Map a UNIQUE-constraint failure to [`StoreError::DuplicateIdentity`].
fn constraint_to_duplicate(e: rusqlite::Error) -> StoreError {
    if let rusqlite::Error::SqliteFailure(ref err, _) = e
        && err.code == rusqlite::ErrorCode::ConstraintViolation
    {
        return StoreError::DuplicateIdentity;
    }
    StoreError::Sqlite(e)
}

// ── tests ────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use keywarden_core::KEY_LEN;

    async fn setup_store() -> CredentialStore {
        let db = Database::open_in_memory().unwrap();
        db.run_migrations().await.unwrap();
        CredentialStore::new(db, Cipher::new(&[7u8; KEY_LEN]).unwrap())
    }

    #[tokio::test]
    async fn register_and_login() {
        let store = setup_store().await;

        let profile = store
            .create_user("alice@example.com", "alice", "hunter22")
            .await
            .unwrap();
        assert_eq!(profile.email, "alice@example.com");
        assert_eq!(profile.username, "alice");
        assert!(profile.id > 0);

        let by_username = store.verify_credentials("alice", "hunter22").await.unwrap();
        assert_eq!(by_username, Some(profile.id));

        let by_email = store
            .verify_credentials("alice@example.com", "hunter22")
            .await
            .unwrap();
        assert_eq!(by_email, Some(profile.id));
    }

    #[tokio::test]
    async fn login_is_case_insensitive() {
        let store = setup_store().await;
        let profile = store
            .create_user("Bob@Example.COM", "  Bob ", "pw123456")
            .await
            .unwrap();
        assert_eq!(profile.email, "bob@example.com");
        assert_eq!(profile.username, "bob");

        let id = store.verify_credentials("BOB", "pw123456").await.unwrap();
        assert_eq!(id, Some(profile.id));
    }

    #[tokio::test]
    async fn wrong_password_and_unknown_user_look_the_same() {
        let store = setup_store().await;
        store
            .create_user("carol@example.com", "carol", "right-pw")
            .await
            .unwrap();

        assert_eq!(
            store.verify_credentials("carol", "wrong-pw").await.unwrap(),
            None
        );
        assert_eq!(
            store.verify_credentials("ghost", "right-pw").await.unwrap(),
            None
        );
    }

    #[tokio::test]
    async fn duplicate_email_or_username_rejected() {
        let store = setup_store().await;
        store
            .create_user("dave@example.com", "dave", "pw123456")
            .await
            .unwrap();

        let dup_email = store
            .create_user("dave@example.com", "other", "pw123456")
            .await;
        assert!(matches!(dup_email, Err(StoreError::DuplicateIdentity)));

        let dup_username = store
            .create_user("other@example.com", "dave", "pw123456")
            .await;
        assert!(matches!(dup_username, Err(StoreError::DuplicateIdentity)));
    }

    #[tokio::test]
    async fn empty_registration_fields_rejected() {
        let store = setup_store().await;

        for (email, username, password) in [
            ("", "user", "pw123456"),
            ("a@example.com", "   ", "pw123456"),
            ("a@example.com", "user", ""),
        ] {
            let result = store.create_user(email, username, password).await;
            assert!(
                matches!(result, Err(StoreError::InvalidArgument(_))),
                "accepted empty field: ({email:?}, {username:?}, {password:?})"
            );
        }
    }

    #[tokio::test]
    async fn legacy_digest_verifier_rewritten_on_login() {
        let store = setup_store().await;
        let profile = store
            .create_user("erin@example.com", "erin", "placeholder")
            .await
            .unwrap();

        // Plant a legacy sha256-hex verifier directly.
        let digest = {
            use ring::digest;
            hex::encode(digest::digest(&digest::SHA256, b"legacy-pw").as_ref())
        };
        store
            .db
            .execute({
                let digest = digest.clone();
                let id = profile.id;
                move |conn| {
                    conn.execute(
                        "UPDATE login SET pass = ?1 WHERE id = ?2",
                        rusqlite::params![digest, id],
                    )?;
                    Ok(())
                }
            })
            .await
            .unwrap();

        // Login succeeds against the legacy form and rewrites it.
        let id = store
            .verify_credentials("erin", "legacy-pw")
            .await
            .unwrap();
        assert_eq!(id, Some(profile.id));

        let stored: String = store
            .db
            .execute({
                let id = profile.id;
                move |conn| {
                    let s: String = conn.query_row(
                        "SELECT pass FROM login WHERE id = ?1",
                        [id],
                        |row| row.get(0),
                    )?;
                    Ok(s)
                }
            })
            .await
            .unwrap();
        assert_ne!(stored, digest);
        assert!(stored.starts_with("pbkdf2_sha256$"));

        // And the rewritten verifier still authenticates.
        let again = store
            .verify_credentials("erin", "legacy-pw")
            .await
            .unwrap();
        assert_eq!(again, Some(profile.id));
    }

    #[tokio::test]
    async fn profile_fetch_and_update() {
        let store = setup_store().await;
        let profile = store
            .create_user("frank@example.com", "frank", "pw123456")
            .await
            .unwrap();

        let fetched = store.get_profile(profile.id).await.unwrap();
        assert_eq!(fetched, profile);

        let ok = store
            .update_profile(profile.id, "franklin@example.com", "franklin")
            .await
            .unwrap();
        assert!(ok);

        let updated = store.get_profile(profile.id).await.unwrap();
        assert_eq!(updated.email, "franklin@example.com");
        assert_eq!(updated.username, "franklin");
    }

    #[tokio::test]
    async fn profile_update_collision_returns_false() {
        let store = setup_store().await;
        store
            .create_user("taken@example.com", "taken", "pw123456")
            .await
            .unwrap();
        let profile = client(&store).await;

        let ok = store
            .update_profile(profile.id, "taken@example.com", "newname")
            .await
            .unwrap();
        assert!(!ok);

        // The row is unchanged.
        let fetched = store.get_profile(profile.id).await.unwrap();
        assert_eq!(fetched.email, profile.email);
    }

    #[tokio::test]
    async fn profile_update_username_collision_returns_false() {
        let store = setup_store().await;
        store
            .create_user("holder@example.com", "holder", "pw123456")
            .await
            .unwrap();
        let profile = client(&store).await;

        // Same email, colliding username: the UNIQUE constraint on
        // username is the only thing that can report this.
        let ok = store
            .update_profile(profile.id, &profile.email, "holder")
            .await
            .unwrap();
        assert!(!ok);

        let fetched = store.get_profile(profile.id).await.unwrap();
        assert_eq!(fetched.username, profile.username);
    }

    #[tokio::test]
    async fn profile_update_of_missing_user_is_not_found() {
        let store = setup_store().await;
        let result = store
            .update_profile(9999, "ghost@example.com", "ghost")
            .await;
        assert!(matches!(
            result,
            Err(StoreError::NotFound { entity: "user", .. })
        ));
    }

    async fn client(store: &CredentialStore) -> Profile {
        store
            .create_user("grace@example.com", "grace", "pw123456")
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn missing_profile_is_not_found() {
        let store = setup_store().await;
        let result = store.get_profile(9999).await;
        assert!(matches!(
            result,
            Err(StoreError::NotFound { entity: "user", .. })
        ));
    }

    #[tokio::test]
    async fn save_list_delete_secret() {
        let store = setup_store().await;
        let profile = client(&store).await;

        let saved = store
            .save_secret(profile.id, "example.com", "grace", "s3cret!")
            .await
            .unwrap();
        assert_eq!(saved.password, "s3cret!");

        let listed = store.list_secrets(profile.id).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].site, "example.com");
        assert_eq!(listed[0].password, "s3cret!");

        let deleted = store.delete_secret(profile.id, saved.id).await.unwrap();
        assert!(deleted);
        assert!(store.list_secrets(profile.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn secrets_are_listed_newest_first() {
        let store = setup_store().await;
        let profile = client(&store).await;

        store
            .save_secret(profile.id, "first.com", "u", "a")
            .await
            .unwrap();
        store
            .save_secret(profile.id, "second.com", "u", "b")
            .await
            .unwrap();

        let listed = store.list_secrets(profile.id).await.unwrap();
        assert_eq!(listed[0].site, "second.com");
        assert_eq!(listed[1].site, "first.com");
    }

    #[tokio::test]
    async fn secrets_stored_encrypted_at_rest() {
        let store = setup_store().await;
        let profile = client(&store).await;
        store
            .save_secret(profile.id, "example.com", "grace", "plain-text-pw")
            .await
            .unwrap();

        let blob: Vec<u8> = store
            .db
            .execute(|conn| {
                let b: Vec<u8> =
                    conn.query_row("SELECT pass FROM secrets LIMIT 1", [], |row| row.get(0))?;
                Ok(b)
            })
            .await
            .unwrap();
        assert!(!blob.windows(13).any(|w| w == b"plain-text-pw"));
    }

    #[tokio::test]
    async fn corrupt_secret_gets_placeholder() {
        let store = setup_store().await;
        let profile = client(&store).await;
        store
            .save_secret(profile.id, "good.com", "u", "ok")
            .await
            .unwrap();
        let bad = store
            .save_secret(profile.id, "bad.com", "u", "broken")
            .await
            .unwrap();

        // Corrupt one row's ciphertext directly.
        store
            .db
            .execute({
                let id = bad.id;
                move |conn| {
                    conn.execute(
                        "UPDATE secrets SET pass = x'0011223344' WHERE id = ?1",
                        [id],
                    )?;
                    Ok(())
                }
            })
            .await
            .unwrap();
        // Bypass the still-fresh cached listing from save_secret.
        store.invalidate_user(profile.id).unwrap();

        let listed = store.list_secrets(profile.id).await.unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].password, DECRYPTION_ERROR_PLACEHOLDER);
        assert_eq!(listed[1].password, "ok");
    }

    #[tokio::test]
    async fn users_cannot_touch_each_others_secrets() {
        let store = setup_store().await;
        let alice = store
            .create_user("a@example.com", "a", "pw123456")
            .await
            .unwrap();
        let bob = store
            .create_user("b@example.com", "b", "pw123456")
            .await
            .unwrap();

        let secret = store
            .save_secret(alice.id, "example.com", "a", "alice-pw")
            .await
            .unwrap();

        // Bob sees nothing and cannot delete Alice's secret.
        assert!(store.list_secrets(bob.id).await.unwrap().is_empty());
        assert!(!store.delete_secret(bob.id, secret.id).await.unwrap());
        assert_eq!(store.list_secrets(alice.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn mutations_invalidate_cached_listing() {
        let store = setup_store().await;
        let profile = client(&store).await;

        // Prime the cache with an empty listing.
        assert!(store.list_secrets(profile.id).await.unwrap().is_empty());

        store
            .save_secret(profile.id, "example.com", "grace", "pw")
            .await
            .unwrap();

        // The save must be visible immediately, not after TTL expiry.
        let listed = store.list_secrets(profile.id).await.unwrap();
        assert_eq!(listed.len(), 1);
    }
}
