//! `SQLite` storage engine.
//!
//! Owns the sole connection to the backing database file, configured for
//! WAL journaling with a busy timeout. All access goes through scoped
//! closures: [`StorageEngine::with_read`] for read-only statements and
//! [`StorageEngine::with_write_tx`] for mutations, which wrap the closure in
//! a single-writer transaction that commits on success and rolls back on any
//! error. Prepared statements live inside the closure and are released on
//! every exit path.

use crate::config::{StoreConfig, StoreLocation};
use crate::storage::{migrations, schema};
use crate::{Error, Result};
use rusqlite::{Connection, InterruptHandle};
use std::path::PathBuf;
use std::sync::{Mutex, MutexGuard};
use std::time::Instant;

/// Helper to acquire a mutex lock with poison recovery.
///
/// If the mutex is poisoned (a panic in a previous critical section), the
/// inner value is recovered and a warning logged. The connection state is
/// still valid: every statement either committed or rolled back.
pub(crate) fn acquire_lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => {
            tracing::warn!("storage mutex was poisoned, recovering");
            metrics::counter!("storage_mutex_poison_recovery_total").increment(1);
            poisoned.into_inner()
        },
    }
}

/// Configures a `SQLite` connection for concurrent embedded use.
///
/// - **WAL mode**: concurrent readers alongside the single writer
/// - **NORMAL synchronous**: balances durability with performance
/// - **`busy_timeout`**: waits up to 5 seconds on lock contention instead of
///   failing immediately
fn configure_connection(conn: &Connection) {
    // journal_mode returns a string result which would fail execute_batch;
    // in-memory databases reject WAL entirely. Both are fine to ignore.
    let _ = conn.pragma_update(None, "journal_mode", "WAL");
    let _ = conn.pragma_update(None, "synchronous", "NORMAL");
    let _ = conn.pragma_update(None, "busy_timeout", "5000");
}

/// Maps a `rusqlite` error into the crate error taxonomy.
///
/// Constraint failures become [`Error::ConstraintViolation`]; everything else
/// (I/O, corruption, interruption) is [`Error::StorageIo`].
pub(crate) fn map_sqlite_err(operation: &str, e: &rusqlite::Error) -> Error {
    match e {
        rusqlite::Error::SqliteFailure(code, _)
            if code.code == rusqlite::ErrorCode::ConstraintViolation =>
        {
            Error::ConstraintViolation(e.to_string())
        },
        _ => Error::StorageIo {
            operation: operation.to_string(),
            cause: e.to_string(),
        },
    }
}

/// Records operation metrics for storage operations.
pub(crate) fn record_operation_metrics(
    operation: &'static str,
    start: Instant,
    status: &'static str,
) {
    metrics::counter!(
        "storage_operations_total",
        "backend" => "sqlite",
        "operation" => operation,
        "status" => status
    )
    .increment(1);
    metrics::histogram!(
        "storage_operation_duration_ms",
        "backend" => "sqlite",
        "operation" => operation,
        "status" => status
    )
    .record(start.elapsed().as_secs_f64() * 1000.0);
}

/// Durable `SQLite` storage engine for diagram rows.
///
/// # Concurrency Model
///
/// Uses a `Mutex<Connection>` for thread-safe access: writes are serialized
/// by construction, which is the ordering guarantee that prevents lost
/// updates. WAL mode and the busy timeout mitigate contention from other
/// processes holding the file.
#[derive(Debug)]
pub struct StorageEngine {
    /// Connection to the `SQLite` database.
    ///
    /// Protected by a mutex because `rusqlite::Connection` is not `Sync`.
    conn: Mutex<Connection>,
    /// Path to the database file (`None` for in-memory).
    db_path: Option<PathBuf>,
}

impl StorageEngine {
    /// Opens or creates the backing database using the built-in migration
    /// list.
    ///
    /// # Errors
    ///
    /// Returns [`Error::StorageIo`] if the file cannot be opened and
    /// [`Error::SchemaMismatch`] if the on-disk schema diverges from the
    /// compiled expectation with no applicable migration path.
    pub fn open(config: &StoreConfig) -> Result<Self> {
        Self::open_with_migrations(config, migrations::BUILT_IN)
    }

    /// Opens or creates the backing database with an explicit migration list.
    ///
    /// On first creation the table is created and stamped with the schema
    /// identity token. On reopen the stored version is walked to
    /// `config.schema_version` through `steps`, then the on-disk shape is
    /// verified against the compiled expectation. The whole open sequence
    /// runs in one transaction: a failed open leaves the file untouched.
    ///
    /// # Errors
    ///
    /// As [`StorageEngine::open`]; additionally any missing hop in `steps`
    /// is a fatal [`Error::SchemaMismatch`].
    pub fn open_with_migrations(
        config: &StoreConfig,
        steps: &[migrations::Migration],
    ) -> Result<Self> {
        let conn = match &config.location {
            StoreLocation::File(path) => Connection::open(path).map_err(|e| Error::StorageIo {
                operation: "open_database".to_string(),
                cause: e.to_string(),
            })?,
            StoreLocation::InMemory => {
                Connection::open_in_memory().map_err(|e| Error::StorageIo {
                    operation: "open_database".to_string(),
                    cause: e.to_string(),
                })?
            },
        };

        configure_connection(&conn);
        Self::initialize(&conn, config, steps)?;

        let db_path = match &config.location {
            StoreLocation::File(path) => Some(path.clone()),
            StoreLocation::InMemory => None,
        };
        Ok(Self {
            conn: Mutex::new(conn),
            db_path,
        })
    }

    /// Returns the database path (`None` for in-memory).
    #[must_use]
    pub const fn db_path(&self) -> Option<&PathBuf> {
        self.db_path.as_ref()
    }

    /// Creates or validates the schema inside a single transaction.
    fn initialize(
        conn: &Connection,
        config: &StoreConfig,
        steps: &[migrations::Migration],
    ) -> Result<()> {
        conn.execute_batch("BEGIN IMMEDIATE")
            .map_err(|e| map_sqlite_err("begin_initialize", &e))?;

        let result = (|| {
            let fresh = !schema::table_exists(conn, schema::DIAGRAMS_TABLE)
                .map_err(|e| map_sqlite_err("probe_schema", &e))?;
            if fresh {
                schema::create_schema(conn).map_err(|e| map_sqlite_err("create_schema", &e))?;
            } else if !schema::table_exists(conn, schema::META_TABLE)
                .map_err(|e| map_sqlite_err("probe_schema", &e))?
            {
                // A diagrams table without store metadata is a foreign or
                // drifted file, not a fresh store.
                return Err(Error::SchemaMismatch(
                    "diagrams table exists but the store metadata table is missing".to_string(),
                ));
            }

            let stored = schema::stored_version(conn)?;
            migrations::run_migrations(conn, steps, stored, config.schema_version)?;

            // The compiled shape describes SCHEMA_VERSION; a synthetic target
            // beyond it (test-only) has no compiled expectation to check.
            if config.schema_version == schema::SCHEMA_VERSION {
                schema::verify_schema(conn)?;
            }
            Ok(())
        })();

        if result.is_ok() {
            conn.execute_batch("COMMIT")
                .map_err(|e| map_sqlite_err("commit_initialize", &e))?;
        } else {
            let _ = conn.execute_batch("ROLLBACK");
        }
        result
    }

    /// Runs a read-only statement against the connection.
    ///
    /// The closure borrows the connection for its whole scope; prepared
    /// statements are dropped with it on every exit path.
    ///
    /// # Errors
    ///
    /// `rusqlite` failures are mapped through the crate taxonomy with
    /// `operation` as the failing operation name.
    pub fn with_read<T>(
        &self,
        operation: &'static str,
        f: impl FnOnce(&Connection) -> rusqlite::Result<T>,
    ) -> Result<T> {
        let start = Instant::now();
        let conn = acquire_lock(&self.conn);
        let result = f(&conn).map_err(|e| map_sqlite_err(operation, &e));
        let status = if result.is_ok() { "success" } else { "error" };
        record_operation_metrics(operation, start, status);
        result
    }

    /// Runs a mutation inside a single-writer transaction.
    ///
    /// Issues `BEGIN IMMEDIATE` unless the connection is already inside a
    /// transaction (nested logical units collapse into the outer one, which
    /// owns the commit). Commits when the closure returns `Ok`, rolls back on
    /// `Err`; callers never observe a partially-applied write.
    ///
    /// # Errors
    ///
    /// `rusqlite` failures are mapped through the crate taxonomy; the
    /// transaction is rolled back before the error surfaces.
    pub fn with_write_tx<T>(
        &self,
        operation: &'static str,
        f: impl FnOnce(&Connection) -> rusqlite::Result<T>,
    ) -> Result<T> {
        let start = Instant::now();
        let conn = acquire_lock(&self.conn);

        let nested = !conn.is_autocommit();
        if !nested {
            conn.execute_batch("BEGIN IMMEDIATE")
                .map_err(|e| map_sqlite_err(operation, &e))?;
        }

        let result = f(&conn).map_err(|e| map_sqlite_err(operation, &e));

        let result = if nested {
            result
        } else {
            match result {
                Ok(value) => conn
                    .execute_batch("COMMIT")
                    .map_err(|e| map_sqlite_err(operation, &e))
                    .map(|()| value),
                Err(err) => {
                    let _ = conn.execute_batch("ROLLBACK");
                    Err(err)
                },
            }
        };

        let status = if result.is_ok() { "success" } else { "error" };
        record_operation_metrics(operation, start, status);
        result
    }

    /// Deletes all diagram rows, then compacts the file.
    ///
    /// The delete runs in a write transaction; `VACUUM` runs afterwards under
    /// the same connection guard, so no other write can interleave.
    ///
    /// # Errors
    ///
    /// Returns [`Error::StorageIo`] if the delete or the compaction fails.
    pub fn clear_all(&self) -> Result<()> {
        let start = Instant::now();
        let conn = acquire_lock(&self.conn);

        conn.execute_batch("BEGIN IMMEDIATE")
            .map_err(|e| map_sqlite_err("clear_all", &e))?;
        let deleted = conn
            .execute("DELETE FROM diagrams", [])
            .map_err(|e| map_sqlite_err("clear_all", &e));
        let result = match deleted {
            Ok(rows) => conn
                .execute_batch("COMMIT")
                .map_err(|e| map_sqlite_err("clear_all", &e))
                .map(|()| rows),
            Err(err) => {
                let _ = conn.execute_batch("ROLLBACK");
                Err(err)
            },
        };

        let result = result.and_then(|rows| {
            tracing::debug!(rows, "cleared diagrams table");
            // VACUUM cannot run inside a transaction.
            conn.execute_batch("VACUUM")
                .map_err(|e| map_sqlite_err("vacuum", &e))
        });

        let status = if result.is_ok() { "success" } else { "error" };
        record_operation_metrics("clear_all", start, status);
        result
    }

    /// Returns a handle that can interrupt an in-flight statement.
    ///
    /// Cooperative cancellation for single-shot reads: interrupting makes the
    /// running statement fail with [`Error::StorageIo`] and leaves no shared
    /// state locked. Interrupting while nothing runs is a no-op.
    #[must_use]
    pub fn interrupt_handle(&self) -> InterruptHandle {
        acquire_lock(&self.conn).get_interrupt_handle()
    }
}
