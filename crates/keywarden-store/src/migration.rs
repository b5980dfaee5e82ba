//! Schema migration system.
//!
//! Migrations are stored as static SQL strings keyed by version number.
//! The current version is tracked in a `_migrations` table so migrations
//! are idempotent and only run once.

use rusqlite::Connection;
use tracing::{debug, info, warn};

use crate::error::{StoreError, StoreResult};

/// A single migration definition.
struct Migration {
    /// Monotonically increasing version number (1, 2, 3, ...).
    version: u32,
    /// Human-readable description.
    description: &'static str,
    /// Raw SQL to execute. May contain multiple statements separated by `;`.
    sql: &'static str,
}

/// All migrations in order. Add new migrations to the end of this array.
static MIGRATIONS: &[Migration] = &[Migration {
    version: 1,
    description: "initial schema — login accounts and encrypted secrets",
    sql: r#"
        CREATE TABLE login (
            id         INTEGER PRIMARY KEY AUTOINCREMENT,
            email      TEXT NOT NULL UNIQUE,
            username   TEXT NOT NULL UNIQUE,
            pass       TEXT NOT NULL,
            created_at INTEGER NOT NULL
        );

        CREATE TABLE secrets (
            id         INTEGER PRIMARY KEY AUTOINCREMENT,
            site       TEXT NOT NULL,
            username   TEXT NOT NULL,
            pass       BLOB NOT NULL,
            user_id    INTEGER NOT NULL REFERENCES login(id) ON DELETE CASCADE,
            created_at INTEGER NOT NULL
        );
        CREATE INDEX idx_secrets_user ON secrets(user_id);
    "#,
}];

// ── public API ───────────────────────────────────────────────────────

/// Run all pending migrations against `conn`.
///
/// This is a **synchronous** function — call it from `spawn_blocking`.
pub fn run_all(conn: &Connection) -> StoreResult<()> {
    ensure_migrations_table(conn)?;

    let current = current_version(conn)?;
    let pending: Vec<&Migration> = MIGRATIONS.iter().filter(|m| m.version > current).collect();

    if pending.is_empty() {
        debug!(current_version = current, "database schema is up to date");
        return Ok(());
    }

    info!(
        current_version = current,
        pending = pending.len(),
        "running pending migrations"
    );

    for migration in pending {
        apply(conn, migration)?;
    }

    info!(
        new_version = MIGRATIONS.last().map(|m| m.version).unwrap_or(0),
        "all migrations applied"
    );
    Ok(())
}

/// Return the latest applied migration version, or 0 if none.
pub fn current_version(conn: &Connection) -> StoreResult<u32> {
    let version: u32 = conn
        .query_row(
            "SELECT COALESCE(MAX(version), 0) FROM _migrations",
            [],
            |row| row.get(0),
        )
        .map_err(|e| StoreError::Migration {
            version: 0,
            message: format!("failed to read current version: {e}"),
        })?;
    Ok(version)
}

// ── internals ────────────────────────────────────────────────────────

/// Create the `_migrations` bookkeeping table if it does not exist.
fn ensure_migrations_table(conn: &Connection) -> StoreResult<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS _migrations (
            version     INTEGER PRIMARY KEY,
            description TEXT NOT NULL,
            applied_at  INTEGER NOT NULL
        );",
    )
    .map_err(|e| StoreError::Migration {
        version: 0,
        message: format!("failed to create _migrations table: {e}"),
    })?;
    Ok(())
}

/// Apply a single migration inside a transaction.
fn apply(conn: &Connection, migration: &Migration) -> StoreResult<()> {
    info!(
        version = migration.version,
        description = migration.description,
        "applying migration"
    );

    // `conn.transaction()` needs `&mut Connection`, so manage the
    // transaction manually.
    conn.execute_batch("BEGIN IMMEDIATE;")
        .map_err(|e| StoreError::Migration {
            version: migration.version,
            message: format!("failed to begin transaction: {e}"),
        })?;

    let result = (|| -> StoreResult<()> {
        conn.execute_batch(migration.sql)
            .map_err(|e| StoreError::Migration {
                version: migration.version,
                message: format!("SQL execution failed: {e}"),
            })?;

        let now = chrono::Utc::now().timestamp();
        conn.execute(
            "INSERT INTO _migrations (version, description, applied_at) VALUES (?1, ?2, ?3)",
            rusqlite::params![migration.version, migration.description, now],
        )
        .map_err(|e| StoreError::Migration {
            version: migration.version,
            message: format!("failed to record migration: {e}"),
        })?;

        Ok(())
    })();

    match &result {
        Ok(()) => {
            conn.execute_batch("COMMIT;")
                .map_err(|e| StoreError::Migration {
                    version: migration.version,
                    message: format!("failed to commit: {e}"),
                })?;
            info!(version = migration.version, "migration applied successfully");
        }
        Err(err) => {
            warn!(version = migration.version, %err, "migration failed, rolling back");
            let _ = conn.execute_batch("ROLLBACK;");
        }
    }

    result
}

// ── tests ────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    /// The expected latest migration version (update when adding migrations).
    const LATEST_VERSION: u32 = 1;

    fn setup_conn() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        conn.pragma_update(None, "foreign_keys", "ON").unwrap();
        conn
    }

    #[test]
    fn migrations_are_ordered() {
        for window in MIGRATIONS.windows(2) {
            assert!(
                window[1].version > window[0].version,
                "migration versions must be strictly increasing: {} >= {}",
                window[0].version,
                window[1].version,
            );
        }
    }

    #[test]
    fn run_all_on_fresh_db() {
        let conn = setup_conn();
        run_all(&conn).unwrap();

        let version = current_version(&conn).unwrap();
        assert_eq!(version, LATEST_VERSION);
    }

    #[test]
    fn run_all_is_idempotent() {
        let conn = setup_conn();
        run_all(&conn).unwrap();
        run_all(&conn).unwrap();

        let version = current_version(&conn).unwrap();
        assert_eq!(version, LATEST_VERSION);
    }

    #[test]
    fn migrations_create_all_tables() {
        let conn = setup_conn();
        run_all(&conn).unwrap();

        let tables: Vec<String> = {
            let mut stmt = conn
                .prepare(
                    "SELECT name FROM sqlite_master WHERE type='table' AND name NOT LIKE '\\_%' ESCAPE '\\' ORDER BY name",
                )
                .unwrap();
            stmt.query_map([], |row| row.get(0))
                .unwrap()
                .map(|r| r.unwrap())
                .collect()
        };

        assert!(tables.contains(&"login".to_string()));
        assert!(tables.contains(&"secrets".to_string()));
    }

    #[test]
    fn unique_constraints_enforced() {
        let conn = setup_conn();
        run_all(&conn).unwrap();

        conn.execute(
            "INSERT INTO login (email, username, pass, created_at) VALUES ('a@b.c', 'alice', 'x', 0)",
            [],
        )
        .unwrap();

        let dup_email = conn.execute(
            "INSERT INTO login (email, username, pass, created_at) VALUES ('a@b.c', 'bob', 'x', 0)",
            [],
        );
        assert!(dup_email.is_err());

        let dup_username = conn.execute(
            "INSERT INTO login (email, username, pass, created_at) VALUES ('b@b.c', 'alice', 'x', 0)",
            [],
        );
        assert!(dup_username.is_err());
    }

    #[test]
    fn deleting_account_cascades_to_secrets() {
        let conn = setup_conn();
        run_all(&conn).unwrap();

        conn.execute(
            "INSERT INTO login (email, username, pass, created_at) VALUES ('a@b.c', 'alice', 'x', 0)",
            [],
        )
        .unwrap();
        let user_id = conn.last_insert_rowid();
        conn.execute(
            "INSERT INTO secrets (site, username, pass, user_id, created_at) VALUES ('example.com', 'alice', x'00', ?1, 0)",
            [user_id],
        )
        .unwrap();

        conn.execute("DELETE FROM login WHERE id = ?1", [user_id])
            .unwrap();

        let remaining: i64 = conn
            .query_row("SELECT COUNT(*) FROM secrets", [], |row| row.get(0))
            .unwrap();
        assert_eq!(remaining, 0);
    }
}
