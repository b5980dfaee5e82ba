//! Bounded SQLite connection pool with WAL mode and safety pragmas.
//!
//! [`Database`] keeps a small set of reusable `rusqlite::Connection`s. A
//! `tokio::sync::Semaphore` caps how many may be checked out at once;
//! acquisition waits up to a configured timeout and then fails with
//! [`StoreError::StorageUnavailable`]. Closures run on the blocking thread
//! pool via `tokio::task::spawn_blocking` so async callers are never
//! blocked, and the connection is returned to the pool even when the
//! closure fails.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use rusqlite::Connection;
use tracing::{debug, info};

use crate::error::{StoreError, StoreResult};
use crate::migration;

/// Pool sizing and acquisition behavior.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Connections opened eagerly at startup.
    pub min_connections: usize,
    /// Upper bound on concurrently checked-out connections.
    pub max_connections: usize,
    /// How long `execute` waits for a free connection before failing.
    pub acquire_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            min_connections: 1,
            max_connections: 10,
            acquire_timeout: Duration::from_secs(5),
        }
    }
}

/// Where the pool's connections come from.
enum Backend {
    /// File-backed database; new connections can be opened on demand up to
    /// the pool cap.
    File(PathBuf),
    /// In-memory database; limited to the single connection opened at
    /// startup, since a second connection would see a different database.
    Memory,
}

struct Inner {
    idle: Mutex<Vec<Connection>>,
    permits: tokio::sync::Semaphore,
    backend: Backend,
    acquire_timeout: Duration,
}

/// Thread-safe handle to the pooled SQLite database.
///
/// Cloning is cheap; all clones share the same pool.
#[derive(Clone)]
pub struct Database {
    inner: Arc<Inner>,
}

impl Database {
    /// Open (or create) a database at `path` with the given pool config.
    ///
    /// Opens `min_connections` eagerly; further connections are opened
    /// lazily up to `max_connections`. Blocks briefly on file I/O, so call
    /// it during startup.
    pub fn open(path: impl AsRef<Path>, config: PoolConfig) -> StoreResult<Self> {
        let path = path.as_ref().to_path_buf();
        info!(
            path = %path.display(),
            min = config.min_connections,
            max = config.max_connections,
            "opening database pool"
        );

        let min = config.min_connections.clamp(1, config.max_connections.max(1));
        let mut idle = Vec::with_capacity(min);
        for _ in 0..min {
            idle.push(open_connection(&path)?);
        }

        Ok(Self {
            inner: Arc::new(Inner {
                idle: Mutex::new(idle),
                permits: tokio::sync::Semaphore::new(config.max_connections.max(1)),
                backend: Backend::File(path),
                acquire_timeout: config.acquire_timeout,
            }),
        })
    }

    /// Create an in-memory database — useful for tests. The pool is pinned
    /// to a single connection.
    pub fn open_in_memory() -> StoreResult<Self> {
        debug!("opening in-memory database");

        let conn = Connection::open_in_memory()?;
        apply_pragmas(&conn)?;

        Ok(Self {
            inner: Arc::new(Inner {
                idle: Mutex::new(vec![conn]),
                permits: tokio::sync::Semaphore::new(1),
                backend: Backend::Memory,
                acquire_timeout: Duration::from_secs(5),
            }),
        })
    }

    /// Open the database and run all pending migrations.
    pub async fn open_and_migrate(
        path: impl AsRef<Path> + Send + 'static,
        config: PoolConfig,
    ) -> StoreResult<Self> {
        let path = path.as_ref().to_path_buf();
        let db = tokio::task::spawn_blocking(move || Self::open(&path, config)).await??;
        db.run_migrations().await?;
        Ok(db)
    }

    /// Run all pending schema migrations.
    pub async fn run_migrations(&self) -> StoreResult<()> {
        self.execute(|conn| migration::run_all(conn)).await
    }

    /// Execute a closure against a pooled connection on the blocking pool.
    ///
    /// This is the primary way to interact with the database from async
    /// code. The connection is returned to the pool unconditionally, even
    /// when the closure returns an error.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::StorageUnavailable`] when no connection
    /// becomes free within the acquire timeout.
    pub async fn execute<F, T>(&self, f: F) -> StoreResult<T>
    where
        F: FnOnce(&Connection) -> StoreResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let permit = tokio::time::timeout(self.inner.acquire_timeout, self.inner.permits.acquire())
            .await
            .map_err(|_| {
                StoreError::StorageUnavailable("connection pool exhausted (acquire timed out)".into())
            })?
            .map_err(|_| StoreError::StorageUnavailable("connection pool closed".into()))?;

        let conn = self.checkout()?;

        let (result, conn) = tokio::task::spawn_blocking(move || {
            let result = f(&conn);
            (result, conn)
        })
        .await?;

        self.checkin(conn);
        drop(permit);
        result
    }

    /// Pop an idle connection, or open a new one for file-backed pools.
    fn checkout(&self) -> StoreResult<Connection> {
        let idle = self
            .inner
            .idle
            .lock()
            .map_err(|_| StoreError::StorageUnavailable("pool mutex poisoned".into()))?
            .pop();

        match idle {
            Some(conn) => Ok(conn),
            None => match &self.inner.backend {
                Backend::File(path) => open_connection(path),
                Backend::Memory => Err(StoreError::StorageUnavailable(
                    "in-memory pool cannot grow".into(),
                )),
            },
        }
    }

    /// Return a connection to the pool. Never fails: a poisoned mutex only
    /// costs us the connection, not the caller's result.
    fn checkin(&self, conn: Connection) {
        if let Ok(mut idle) = self.inner.idle.lock() {
            idle.push(conn);
        }
    }
}

/// Open a file-backed connection with pragmas applied.
fn open_connection(path: &Path) -> StoreResult<Connection> {
    let conn = Connection::open(path)?;
    apply_pragmas(&conn)?;
    Ok(conn)
}

/// Apply safety and performance pragmas to a fresh connection.
fn apply_pragmas(conn: &Connection) -> StoreResult<()> {
    // WAL mode: concurrent readers, non-blocking writes.
    conn.pragma_update(None, "journal_mode", "WAL")?;

    // NORMAL sync is safe with WAL — we only lose the last transaction
    // on a power failure, not corruption.
    conn.pragma_update(None, "synchronous", "NORMAL")?;

    // Enforce foreign key constraints.
    conn.pragma_update(None, "foreign_keys", "ON")?;

    // Temp tables and indices in memory, not on disk.
    conn.pragma_update(None, "temp_store", "MEMORY")?;

    // Busy timeout so concurrent writers wait instead of failing immediately.
    conn.pragma_update(None, "busy_timeout", 5_000_i32)?;

    Ok(())
}

// ── tests ────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn open_in_memory_works() {
        let db = Database::open_in_memory().unwrap();
        let version: String = db
            .execute(|conn| {
                let v: String = conn.query_row("SELECT sqlite_version()", [], |row| row.get(0))?;
                Ok(v)
            })
            .await
            .unwrap();
        assert!(!version.is_empty());
    }

    #[tokio::test]
    async fn migrations_run_on_fresh_db() {
        let db = Database::open_in_memory().unwrap();
        db.run_migrations().await.unwrap();

        let count: i64 = db
            .execute(|conn| {
                let c: i64 = conn.query_row("SELECT count(*) FROM login", [], |row| row.get(0))?;
                Ok(c)
            })
            .await
            .unwrap();
        assert_eq!(count, 0);
    }

    #[tokio::test]
    async fn connection_is_returned_after_error() {
        let db = Database::open_in_memory().unwrap();

        // The pool holds a single connection; if an error leaked it, the
        // second call would time out.
        let result: StoreResult<()> = db
            .execute(|conn| {
                conn.execute("SELECT * FROM does_not_exist", [])?;
                Ok(())
            })
            .await;
        assert!(result.is_err());

        let ok: i64 = db
            .execute(|conn| {
                let v: i64 = conn.query_row("SELECT 1", [], |row| row.get(0))?;
                Ok(v)
            })
            .await
            .unwrap();
        assert_eq!(ok, 1);
    }

    #[tokio::test]
    async fn file_pool_reuses_connections() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open(
            dir.path().join("pool.db"),
            PoolConfig {
                min_connections: 2,
                max_connections: 4,
                acquire_timeout: Duration::from_secs(1),
            },
        )
        .unwrap();
        db.run_migrations().await.unwrap();

        // Run several operations concurrently; all must complete within
        // the pool bounds.
        let mut handles = Vec::new();
        for _ in 0..8 {
            let db = db.clone();
            handles.push(tokio::spawn(async move {
                db.execute(|conn| {
                    let v: i64 = conn.query_row("SELECT count(*) FROM login", [], |row| row.get(0))?;
                    Ok(v)
                })
                .await
            }));
        }
        for handle in handles {
            assert_eq!(handle.await.unwrap().unwrap(), 0);
        }
    }
}
