//! Typed data access over the storage engine.
//!
//! Every multi-step write runs inside a single-writer transaction; the bus is
//! notified only after the transaction has committed and only when a row
//! actually changed, so reactive queries never observe state older than the
//! write they were woken for.

use std::sync::Arc;

use rusqlite::{OptionalExtension, params};
use tracing::instrument;

use crate::Result;
use crate::bus::{InvalidationTracker, QuerySubscription, TableId};
use crate::models::{Diagram, DiagramId};
use crate::storage::{StorageEngine, escape_like_wildcards, schema};

/// Invalidation granule for the diagrams table.
pub const DIAGRAMS: TableId = TableId::new(schema::DIAGRAMS_TABLE);

/// A live reactive diagram query.
///
/// Carries the latest full, ordered result snapshot and re-publishes after
/// every committed mutation of the diagrams table.
pub type DiagramSubscription = QuerySubscription<Vec<Diagram>>;

/// Columns selected by every diagram read, in row-mapping order.
const SELECT_COLUMNS: &str = "id, title, code, diagram_type, created_at, modified_at, is_favorite";

/// Typed CRUD and query operations over the diagrams table.
///
/// Owns the prepared-statement lifecycle (scoped to each engine closure) and
/// the transaction boundaries of every operation.
#[derive(Debug)]
pub struct DiagramDao {
    engine: Arc<StorageEngine>,
    tracker: Arc<InvalidationTracker>,
}

/// Maps one result row to a [`Diagram`].
fn row_to_diagram(row: &rusqlite::Row<'_>) -> rusqlite::Result<Diagram> {
    Ok(Diagram {
        id: DiagramId::new(row.get::<_, String>(0)?),
        title: row.get(1)?,
        code: row.get(2)?,
        diagram_type: row.get(3)?,
        created_at: row.get(4)?,
        modified_at: row.get(5)?,
        is_favorite: row.get(6)?,
    })
}

impl DiagramDao {
    /// Creates a DAO over the given engine and invalidation tracker.
    #[must_use]
    pub fn new(engine: Arc<StorageEngine>, tracker: Arc<InvalidationTracker>) -> Self {
        Self { engine, tracker }
    }

    /// Returns the invalidation tracker this DAO notifies.
    #[must_use]
    pub fn tracker(&self) -> &Arc<InvalidationTracker> {
        &self.tracker
    }

    /// Returns a handle that can interrupt an in-flight read.
    ///
    /// See [`StorageEngine::interrupt_handle`].
    #[must_use]
    pub fn interrupt_handle(&self) -> rusqlite::InterruptHandle {
        self.engine.interrupt_handle()
    }

    /// Inserts a diagram, replacing any prior record with the same id.
    ///
    /// Upsert semantics: re-inserting an existing id replaces the row, never
    /// errors. Notifies the bus on success.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::StorageIo`] on engine failure.
    #[instrument(skip(self, diagram), fields(diagram.id = %diagram.id))]
    pub fn insert(&self, diagram: &Diagram) -> Result<()> {
        self.engine.with_write_tx("insert_diagram", |conn| {
            conn.execute(
                "INSERT OR REPLACE INTO diagrams
                     (id, title, code, diagram_type, created_at, modified_at, is_favorite)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    diagram.id.as_str(),
                    diagram.title,
                    diagram.code,
                    diagram.diagram_type,
                    diagram.created_at,
                    diagram.modified_at,
                    diagram.is_favorite,
                ],
            )?;
            Ok(())
        })?;
        self.tracker.notify(&[DIAGRAMS]);
        Ok(())
    }

    /// Replaces the full row matching the diagram's id.
    ///
    /// Returns `false` when no row matched: a no-op, observable but not an
    /// error. The bus is notified only when a row actually changed.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::StorageIo`] on engine failure.
    #[instrument(skip(self, diagram), fields(diagram.id = %diagram.id))]
    pub fn update(&self, diagram: &Diagram) -> Result<bool> {
        let affected = self.engine.with_write_tx("update_diagram", |conn| {
            conn.execute(
                "UPDATE diagrams
                 SET title = ?2, code = ?3, diagram_type = ?4, created_at = ?5,
                     modified_at = ?6, is_favorite = ?7
                 WHERE id = ?1",
                params![
                    diagram.id.as_str(),
                    diagram.title,
                    diagram.code,
                    diagram.diagram_type,
                    diagram.created_at,
                    diagram.modified_at,
                    diagram.is_favorite,
                ],
            )
        })?;
        if affected > 0 {
            self.tracker.notify(&[DIAGRAMS]);
        }
        Ok(affected > 0)
    }

    /// Deletes the row with the given id.
    ///
    /// Idempotent: deleting a missing id returns `false` and is not an error.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::StorageIo`] on engine failure.
    #[instrument(skip(self), fields(diagram.id = %id))]
    pub fn delete_by_id(&self, id: &DiagramId) -> Result<bool> {
        let affected = self.engine.with_write_tx("delete_diagram", |conn| {
            conn.execute("DELETE FROM diagrams WHERE id = ?1", [id.as_str()])
        })?;
        if affected > 0 {
            self.tracker.notify(&[DIAGRAMS]);
        }
        Ok(affected > 0)
    }

    /// Sets the favorite flag of the row with the given id.
    ///
    /// Deliberately leaves `modified_at` untouched: favoriting is metadata,
    /// not content editing, and must not bump the record's recency ordering.
    /// Returns `false` when no row matched.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::StorageIo`] on engine failure.
    #[instrument(skip(self), fields(diagram.id = %id, is_favorite))]
    pub fn update_favorite(&self, id: &DiagramId, is_favorite: bool) -> Result<bool> {
        let affected = self.engine.with_write_tx("update_favorite", |conn| {
            conn.execute(
                "UPDATE diagrams SET is_favorite = ?2 WHERE id = ?1",
                params![id.as_str(), is_favorite],
            )
        })?;
        if affected > 0 {
            self.tracker.notify(&[DIAGRAMS]);
        }
        Ok(affected > 0)
    }

    /// Fetches a single diagram by id; absence is `Ok(None)`, not an error.
    ///
    /// A caller that abandons interest mid-flight can interrupt the read
    /// through [`StorageEngine::interrupt_handle`]; the interrupted statement
    /// surfaces as [`crate::Error::StorageIo`] and leaves nothing locked.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::StorageIo`] on engine failure.
    #[instrument(skip(self), fields(diagram.id = %id))]
    pub fn get_by_id(&self, id: &DiagramId) -> Result<Option<Diagram>> {
        self.engine.with_read("get_diagram", |conn| {
            conn.query_row(
                &format!("SELECT {SELECT_COLUMNS} FROM diagrams WHERE id = ?1"),
                [id.as_str()],
                row_to_diagram,
            )
            .optional()
        })
    }

    /// Returns the number of stored diagrams.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::StorageIo`] on engine failure.
    pub fn count(&self) -> Result<usize> {
        let count: i64 = self.engine.with_read("count_diagrams", |conn| {
            conn.query_row("SELECT COUNT(*) FROM diagrams", [], |row| row.get(0))
        })?;
        Ok(usize::try_from(count).unwrap_or(0))
    }

    /// Deletes all rows and compacts the file, then notifies the bus.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::StorageIo`] on engine failure.
    #[instrument(skip(self))]
    pub fn clear_all(&self) -> Result<()> {
        self.engine.clear_all()?;
        self.tracker.notify(&[DIAGRAMS]);
        Ok(())
    }

    /// Reactive query over all diagrams, ordered by `modified_at` descending
    /// (ties broken by stable row order).
    ///
    /// # Errors
    ///
    /// Returns the error of the initial read.
    ///
    /// # Panics
    ///
    /// Panics if called outside a tokio runtime.
    pub fn list_all(&self) -> Result<DiagramSubscription> {
        self.subscribe_query(
            "list_all",
            format!("SELECT {SELECT_COLUMNS} FROM diagrams ORDER BY modified_at DESC, rowid"),
            None,
        )
    }

    /// Reactive query over favorite diagrams, same ordering as
    /// [`DiagramDao::list_all`].
    ///
    /// # Errors
    ///
    /// Returns the error of the initial read.
    ///
    /// # Panics
    ///
    /// Panics if called outside a tokio runtime.
    pub fn list_favorites(&self) -> Result<DiagramSubscription> {
        self.subscribe_query(
            "list_favorites",
            format!(
                "SELECT {SELECT_COLUMNS} FROM diagrams
                 WHERE is_favorite = 1
                 ORDER BY modified_at DESC, rowid"
            ),
            None,
        )
    }

    /// Reactive query over diagrams whose title or code contains `term` as a
    /// literal substring (LIKE wildcards in the term are escaped), same
    /// ordering as [`DiagramDao::list_all`].
    ///
    /// An empty term matches everything; deciding whether to issue a
    /// pass-through query is the caller's concern.
    ///
    /// # Errors
    ///
    /// Returns the error of the initial read.
    ///
    /// # Panics
    ///
    /// Panics if called outside a tokio runtime.
    pub fn search(&self, term: &str) -> Result<DiagramSubscription> {
        let pattern = format!("%{}%", escape_like_wildcards(term));
        self.subscribe_query(
            "search",
            format!(
                "SELECT {SELECT_COLUMNS} FROM diagrams
                 WHERE title LIKE ?1 ESCAPE '\\' OR code LIKE ?1 ESCAPE '\\'
                 ORDER BY modified_at DESC, rowid"
            ),
            Some(pattern),
        )
    }

    /// Registers a reactive query: runs the read once for the initial
    /// snapshot, then re-runs it after every committed diagrams mutation.
    fn subscribe_query(
        &self,
        operation: &'static str,
        sql: String,
        pattern: Option<String>,
    ) -> Result<DiagramSubscription> {
        let engine = Arc::clone(&self.engine);
        self.tracker.subscribe(&[DIAGRAMS], move || {
            engine.with_read(operation, |conn| {
                let mut stmt = conn.prepare(&sql)?;
                let rows = match &pattern {
                    Some(p) => stmt.query_map(params![p], row_to_diagram)?,
                    None => stmt.query_map(params![], row_to_diagram)?,
                };
                rows.collect()
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StoreConfig;

    fn dao() -> DiagramDao {
        let config = StoreConfig::in_memory();
        let engine = Arc::new(StorageEngine::open(&config).unwrap());
        let tracker = Arc::new(InvalidationTracker::new(config.bus_capacity));
        DiagramDao::new(engine, tracker)
    }

    fn diagram(id: &str, title: &str, modified_at: i64) -> Diagram {
        Diagram {
            id: DiagramId::new(id),
            title: title.to_string(),
            code: "graph TD\n  A --> B".to_string(),
            diagram_type: "flowchart".to_string(),
            created_at: 1_700_000_000_000,
            modified_at,
            is_favorite: false,
        }
    }

    #[test]
    fn test_insert_then_get_round_trip() {
        let dao = dao();
        let d = diagram("d-1", "Login flow", 10);
        dao.insert(&d).unwrap();
        let fetched = dao.get_by_id(&d.id).unwrap();
        assert_eq!(fetched, Some(d));
    }

    #[test]
    fn test_get_missing_is_none() {
        let dao = dao();
        assert_eq!(dao.get_by_id(&DiagramId::new("nope")).unwrap(), None);
    }

    #[test]
    fn test_upsert_replaces_existing_row() {
        let dao = dao();
        dao.insert(&diagram("d-1", "first", 10)).unwrap();
        dao.insert(&diagram("d-1", "second", 20)).unwrap();

        assert_eq!(dao.count().unwrap(), 1);
        let fetched = dao.get_by_id(&DiagramId::new("d-1")).unwrap().unwrap();
        assert_eq!(fetched.title, "second");
    }

    #[test]
    fn test_update_missing_row_is_noop() {
        let dao = dao();
        let matched = dao.update(&diagram("ghost", "t", 1)).unwrap();
        assert!(!matched);
        assert_eq!(dao.count().unwrap(), 0);
    }

    #[test]
    fn test_delete_is_idempotent() {
        let dao = dao();
        dao.insert(&diagram("d-1", "t", 1)).unwrap();
        assert!(dao.delete_by_id(&DiagramId::new("d-1")).unwrap());
        assert!(!dao.delete_by_id(&DiagramId::new("d-1")).unwrap());
        assert!(!dao.delete_by_id(&DiagramId::new("never-existed")).unwrap());
    }

    #[test]
    fn test_update_favorite_leaves_modified_at_unchanged() {
        let dao = dao();
        dao.insert(&diagram("d-1", "t", 777)).unwrap();

        assert!(dao.update_favorite(&DiagramId::new("d-1"), true).unwrap());
        let fetched = dao.get_by_id(&DiagramId::new("d-1")).unwrap().unwrap();
        assert!(fetched.is_favorite);
        assert_eq!(fetched.modified_at, 777);

        assert!(!dao.update_favorite(&DiagramId::new("ghost"), true).unwrap());
    }

    #[tokio::test]
    async fn test_list_all_orders_by_modified_at_descending() {
        let dao = dao();
        dao.insert(&diagram("a", "oldest", 1)).unwrap();
        dao.insert(&diagram("b", "newest", 3)).unwrap();
        dao.insert(&diagram("c", "middle", 2)).unwrap();

        let sub = dao.list_all().unwrap();
        let titles: Vec<String> = sub.current().into_iter().map(|d| d.title).collect();
        assert_eq!(titles, ["newest", "middle", "oldest"]);
    }

    #[tokio::test]
    async fn test_list_favorites_filters() {
        let dao = dao();
        dao.insert(&diagram("a", "plain", 1)).unwrap();
        dao.insert(&diagram("b", "starred", 2)).unwrap();
        dao.update_favorite(&DiagramId::new("b"), true).unwrap();

        let sub = dao.list_favorites().unwrap();
        let ids: Vec<DiagramId> = sub.current().into_iter().map(|d| d.id).collect();
        assert_eq!(ids, [DiagramId::new("b")]);
    }

    #[tokio::test]
    async fn test_search_matches_title_or_code_substring() {
        let dao = dao();
        let mut by_code = diagram("a", "architecture", 1);
        by_code.code = "sequenceDiagram\n  A->>B: flow start".to_string();
        dao.insert(&by_code).unwrap();
        dao.insert(&diagram("b", "login flow", 2)).unwrap();
        dao.insert(&diagram("c", "unrelated", 3)).unwrap();

        let sub = dao.search("flow").unwrap();
        let mut ids: Vec<String> = sub
            .current()
            .into_iter()
            .map(|d| d.id.as_str().to_string())
            .collect();
        ids.sort();
        assert_eq!(ids, ["a", "b"]);
    }

    #[tokio::test]
    async fn test_search_term_wildcards_match_literally() {
        let dao = dao();
        dao.insert(&diagram("a", "coverage 100%", 1)).unwrap();
        dao.insert(&diagram("b", "coverage 100x", 2)).unwrap();

        // '%' in the term is a literal character, not a wildcard.
        let sub = dao.search("100%").unwrap();
        let ids: Vec<String> = sub
            .current()
            .into_iter()
            .map(|d| d.id.as_str().to_string())
            .collect();
        assert_eq!(ids, ["a"]);
    }
}
