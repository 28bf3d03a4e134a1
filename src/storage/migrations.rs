//! Versioned schema migration steps.
//!
//! Schema changes are expressed as an ordered list of steps keyed by
//! `(from_version, to_version)`. At open time the runner walks the stored
//! version up to the configured target; a hop with no registered step is a
//! fatal open-time error, as is an on-disk version newer than the target.
//!
//! The built-in list is empty: the shipped schema has a single version. The
//! mechanism exists so that a future version bump is an additive change, and
//! is exercised by tests through a synthetic bump.

use crate::storage::schema;
use crate::{Error, Result};
use rusqlite::Connection;

/// A single schema migration step.
#[derive(Debug, Clone, Copy)]
pub struct Migration {
    /// Version this step upgrades from.
    pub from_version: i64,
    /// Version this step upgrades to.
    pub to_version: i64,
    /// Human-readable description.
    pub description: &'static str,
    /// SQL to apply (may contain multiple statements separated by semicolons).
    pub sql: &'static str,
}

/// Built-in migration steps. Empty while the schema has a single version.
pub(crate) const BUILT_IN: &[Migration] = &[];

/// Walks the migration list from `from` to `to`, applying each hop.
///
/// Runs inside the caller's open-time transaction: either every hop applies
/// and the stored version reaches `to`, or the transaction rolls back and the
/// database is untouched. Each applied hop bumps the stored version and is
/// logged.
///
/// # Errors
///
/// Returns [`Error::SchemaMismatch`] when `from > to` (downgrade), when no
/// step is registered for a required hop, or when a step overshoots the
/// target. Returns [`Error::StorageIo`] when a step's SQL fails.
pub(crate) fn run_migrations(
    conn: &Connection,
    steps: &[Migration],
    from: i64,
    to: i64,
) -> Result<()> {
    if from > to {
        return Err(Error::SchemaMismatch(format!(
            "on-disk schema version {from} is newer than target version {to}"
        )));
    }

    let mut current = from;
    while current < to {
        let Some(step) = steps.iter().find(|m| m.from_version == current) else {
            return Err(Error::SchemaMismatch(format!(
                "no migration step from version {current} toward target {to}"
            )));
        };
        if step.to_version > to {
            return Err(Error::SchemaMismatch(format!(
                "migration step {current} -> {} overshoots target {to}",
                step.to_version
            )));
        }

        conn.execute_batch(step.sql).map_err(|e| Error::StorageIo {
            operation: format!("migration_v{}_to_v{}", step.from_version, step.to_version),
            cause: e.to_string(),
        })?;
        schema::set_stored_version(conn, step.to_version)?;
        current = step.to_version;

        tracing::info!(
            from = step.from_version,
            to = step.to_version,
            description = step.description,
            "applied schema migration"
        );
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const BUMP_TO_V2: &[Migration] = &[Migration {
        from_version: 1,
        to_version: 2,
        description: "add tags column",
        sql: "ALTER TABLE diagrams ADD COLUMN tags TEXT",
    }];

    fn schema_v1() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        schema::create_schema(&conn).unwrap();
        conn
    }

    #[test]
    fn test_no_hops_needed() {
        let conn = schema_v1();
        run_migrations(&conn, BUILT_IN, 1, 1).unwrap();
        assert_eq!(schema::stored_version(&conn).unwrap(), 1);
    }

    #[test]
    fn test_synthetic_bump_applies_and_records() {
        let conn = schema_v1();
        run_migrations(&conn, BUMP_TO_V2, 1, 2).unwrap();
        assert_eq!(schema::stored_version(&conn).unwrap(), 2);
        // The new column is queryable.
        conn.query_row("SELECT COUNT(tags) FROM diagrams", [], |row| {
            row.get::<_, i64>(0)
        })
        .unwrap();
    }

    #[test]
    fn test_missing_hop_is_fatal() {
        let conn = schema_v1();
        let err = run_migrations(&conn, BUILT_IN, 1, 2).unwrap_err();
        assert!(matches!(err, Error::SchemaMismatch(_)), "{err}");
    }

    #[test]
    fn test_downgrade_is_fatal() {
        let conn = schema_v1();
        let err = run_migrations(&conn, BUMP_TO_V2, 2, 1).unwrap_err();
        assert!(matches!(err, Error::SchemaMismatch(_)), "{err}");
    }

    #[test]
    fn test_failing_step_surfaces_storage_error() {
        let conn = schema_v1();
        let broken: &[Migration] = &[Migration {
            from_version: 1,
            to_version: 2,
            description: "broken step",
            sql: "ALTER TABLE no_such_table ADD COLUMN x TEXT",
        }];
        let err = run_migrations(&conn, broken, 1, 2).unwrap_err();
        assert!(matches!(err, Error::StorageIo { .. }), "{err}");
    }
}
