//! Compiled schema shape for the `diagrams` table.
//!
//! The expected shape (column names, declared types, nullability, primary
//! key) is compiled into the crate. At open time the on-disk shape reported
//! by `PRAGMA table_info` is compared against it, together with a stored
//! identity token, so that drift between the binary and the database file is
//! detected before any operation runs.

use crate::{Error, Result};
use rusqlite::Connection;

/// Name of the diagrams table.
pub const DIAGRAMS_TABLE: &str = "diagrams";

/// Name of the metadata table holding the schema identity token and version.
pub const META_TABLE: &str = "store_meta";

/// Current compiled schema version.
pub const SCHEMA_VERSION: i64 = 1;

/// Meta key for the stored schema version.
const META_KEY_VERSION: &str = "schema_version";

/// Meta key for the stored schema identity token.
const META_KEY_IDENTITY: &str = "schema_identity";

/// One expected column of the `diagrams` table.
struct ColumnSpec {
    name: &'static str,
    decl_type: &'static str,
    not_null: bool,
    pk: bool,
}

/// Expected shape of the `diagrams` table at [`SCHEMA_VERSION`].
const EXPECTED_COLUMNS: [ColumnSpec; 7] = [
    ColumnSpec {
        name: "id",
        decl_type: "TEXT",
        not_null: true,
        pk: true,
    },
    ColumnSpec {
        name: "title",
        decl_type: "TEXT",
        not_null: true,
        pk: false,
    },
    ColumnSpec {
        name: "code",
        decl_type: "TEXT",
        not_null: true,
        pk: false,
    },
    ColumnSpec {
        name: "diagram_type",
        decl_type: "TEXT",
        not_null: true,
        pk: false,
    },
    ColumnSpec {
        name: "created_at",
        decl_type: "INTEGER",
        not_null: true,
        pk: false,
    },
    ColumnSpec {
        name: "modified_at",
        decl_type: "INTEGER",
        not_null: true,
        pk: false,
    },
    ColumnSpec {
        name: "is_favorite",
        decl_type: "INTEGER",
        not_null: true,
        pk: false,
    },
];

/// Canonical rendering of the expected shape, stored as the identity token.
pub(crate) fn identity_token() -> String {
    let mut token = String::new();
    for col in &EXPECTED_COLUMNS {
        if !token.is_empty() {
            token.push('|');
        }
        token.push_str(col.name);
        token.push(':');
        token.push_str(col.decl_type);
        if col.not_null {
            token.push_str(":notnull");
        }
        if col.pk {
            token.push_str(":pk");
        }
    }
    token
}

/// Checks whether a table exists in the open database.
pub(crate) fn table_exists(conn: &Connection, name: &str) -> rusqlite::Result<bool> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
        [name],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

/// Creates the diagrams table, its listing index, and the meta table.
///
/// Stamps the identity token and [`SCHEMA_VERSION`] into the meta table.
/// Must run inside the open-time transaction.
pub(crate) fn create_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS diagrams (
            id TEXT NOT NULL PRIMARY KEY,
            title TEXT NOT NULL,
            code TEXT NOT NULL,
            diagram_type TEXT NOT NULL,
            created_at INTEGER NOT NULL,
            modified_at INTEGER NOT NULL,
            is_favorite INTEGER NOT NULL
        )",
        [],
    )?;

    // Listings are always ordered by recency.
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_diagrams_modified_at ON diagrams(modified_at DESC)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_diagrams_favorite ON diagrams(is_favorite, modified_at DESC)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS store_meta (
            key TEXT NOT NULL PRIMARY KEY,
            value TEXT NOT NULL
        )",
        [],
    )?;

    write_meta(conn, META_KEY_VERSION, &SCHEMA_VERSION.to_string())?;
    write_meta(conn, META_KEY_IDENTITY, &identity_token())?;
    Ok(())
}

/// Reads a meta value, `None` when absent.
fn read_meta(conn: &Connection, key: &str) -> rusqlite::Result<Option<String>> {
    use rusqlite::OptionalExtension;
    conn.query_row("SELECT value FROM store_meta WHERE key = ?1", [key], |row| {
        row.get(0)
    })
    .optional()
}

/// Upserts a meta value.
pub(crate) fn write_meta(conn: &Connection, key: &str, value: &str) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT OR REPLACE INTO store_meta (key, value) VALUES (?1, ?2)",
        [key, value],
    )?;
    Ok(())
}

/// Returns the stored schema version.
pub(crate) fn stored_version(conn: &Connection) -> Result<i64> {
    let raw = read_meta(conn, META_KEY_VERSION).map_err(|e| Error::StorageIo {
        operation: "read_schema_version".to_string(),
        cause: e.to_string(),
    })?;
    let Some(raw) = raw else {
        return Err(Error::SchemaMismatch(
            "schema version record is missing".to_string(),
        ));
    };
    raw.parse().map_err(|_| {
        Error::SchemaMismatch(format!("schema version record is not an integer: '{raw}'"))
    })
}

/// Records a new schema version (used by the migration runner).
pub(crate) fn set_stored_version(conn: &Connection, version: i64) -> Result<()> {
    write_meta(conn, META_KEY_VERSION, &version.to_string()).map_err(|e| Error::StorageIo {
        operation: "write_schema_version".to_string(),
        cause: e.to_string(),
    })
}

/// Verifies the on-disk shape and identity token against the compiled shape.
///
/// Divergence is fatal ([`Error::SchemaMismatch`]); there is no automatic
/// recovery once the expected and actual shapes disagree.
pub(crate) fn verify_schema(conn: &Connection) -> Result<()> {
    let stored_identity = read_meta(conn, META_KEY_IDENTITY).map_err(|e| Error::StorageIo {
        operation: "read_schema_identity".to_string(),
        cause: e.to_string(),
    })?;
    let expected_identity = identity_token();
    match stored_identity {
        Some(ref token) if *token == expected_identity => {},
        Some(token) => {
            return Err(Error::SchemaMismatch(format!(
                "schema identity token diverged: stored '{token}', expected '{expected_identity}'"
            )));
        },
        None => {
            return Err(Error::SchemaMismatch(
                "schema identity token is missing".to_string(),
            ));
        },
    }

    let mut stmt = conn
        .prepare("PRAGMA table_info(diagrams)")
        .map_err(|e| Error::StorageIo {
            operation: "table_info".to_string(),
            cause: e.to_string(),
        })?;
    // (name, declared type, notnull, pk) per on-disk column.
    let actual = stmt
        .query_map([], |row| {
            Ok((
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, i64>(3)? != 0,
                row.get::<_, i64>(5)? != 0,
            ))
        })
        .and_then(|rows| rows.collect::<rusqlite::Result<Vec<(String, String, bool, bool)>>>())
        .map_err(|e| Error::StorageIo {
            operation: "table_info".to_string(),
            cause: e.to_string(),
        })?;

    if actual.len() != EXPECTED_COLUMNS.len() {
        return Err(Error::SchemaMismatch(format!(
            "diagrams has {} columns on disk, expected {}",
            actual.len(),
            EXPECTED_COLUMNS.len()
        )));
    }

    for (expected, (name, decl_type, not_null, pk)) in EXPECTED_COLUMNS.iter().zip(&actual) {
        if expected.name != name
            || !expected.decl_type.eq_ignore_ascii_case(decl_type)
            || expected.not_null != *not_null
            || expected.pk != *pk
        {
            return Err(Error::SchemaMismatch(format!(
                "column mismatch: on disk '{name} {decl_type}' (notnull={not_null}, pk={pk}), \
                 expected '{} {}' (notnull={}, pk={})",
                expected.name, expected.decl_type, expected.not_null, expected.pk
            )));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fresh_conn() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        create_schema(&conn).unwrap();
        conn
    }

    #[test]
    fn test_identity_token_is_stable() {
        let token = identity_token();
        assert!(token.starts_with("id:TEXT:notnull:pk|title:TEXT:notnull|"));
        assert!(token.ends_with("is_favorite:INTEGER:notnull"));
    }

    #[test]
    fn test_fresh_schema_verifies() {
        let conn = fresh_conn();
        assert!(table_exists(&conn, DIAGRAMS_TABLE).unwrap());
        assert!(table_exists(&conn, META_TABLE).unwrap());
        assert_eq!(stored_version(&conn).unwrap(), SCHEMA_VERSION);
        verify_schema(&conn).unwrap();
    }

    #[test]
    fn test_drifted_shape_is_fatal() {
        let conn = fresh_conn();
        conn.execute_batch(
            "ALTER TABLE diagrams RENAME TO diagrams_old;
             CREATE TABLE diagrams (
                id TEXT NOT NULL PRIMARY KEY,
                title TEXT,
                code TEXT NOT NULL,
                diagram_type TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                modified_at INTEGER NOT NULL,
                is_favorite INTEGER NOT NULL
             );",
        )
        .unwrap();
        let err = verify_schema(&conn).unwrap_err();
        assert!(matches!(err, crate::Error::SchemaMismatch(_)), "{err}");
    }

    #[test]
    fn test_tampered_identity_token_is_fatal() {
        let conn = fresh_conn();
        write_meta(&conn, META_KEY_IDENTITY, "bogus").unwrap();
        let err = verify_schema(&conn).unwrap_err();
        assert!(matches!(err, crate::Error::SchemaMismatch(_)), "{err}");
    }

    #[test]
    fn test_missing_version_record_is_fatal() {
        let conn = fresh_conn();
        conn.execute("DELETE FROM store_meta WHERE key = ?1", [META_KEY_VERSION])
            .unwrap();
        let err = stored_version(&conn).unwrap_err();
        assert!(matches!(err, crate::Error::SchemaMismatch(_)), "{err}");
    }
}
