//! Process-wide access facade over the data access layer.
//!
//! The repository is the only object external collaborators touch. It owns
//! the sole engine handle (no other component may open the database file)
//! and exposes the DAO surface. [`DiagramRepository::global`] provides the
//! lazily-initialized, process-wide singleton; construction happens at most
//! once even under concurrent first access.

use std::sync::{Arc, Mutex, OnceLock};

use crate::bus::InvalidationTracker;
use crate::config::StoreConfig;
use crate::dao::{DiagramDao, DiagramSubscription};
use crate::models::{Diagram, DiagramId};
use crate::storage::StorageEngine;
use crate::Result;

static GLOBAL_REPOSITORY: OnceLock<Arc<DiagramRepository>> = OnceLock::new();
static GLOBAL_INIT: Mutex<()> = Mutex::new(());

/// Facade over the diagram store.
///
/// Cheap to share behind an `Arc`; all operations take `&self` and are safe
/// to call from concurrent contexts.
#[derive(Debug)]
pub struct DiagramRepository {
    dao: DiagramDao,
}

impl DiagramRepository {
    /// Opens a repository directly, without touching the process-wide
    /// singleton.
    ///
    /// Opens the storage engine, runs schema validation and migrations, and
    /// wires the invalidation bus.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::StorageIo`] or [`crate::Error::SchemaMismatch`]
    /// from the engine open sequence.
    pub fn open(config: &StoreConfig) -> Result<Self> {
        let engine = Arc::new(StorageEngine::open(config)?);
        let tracker = Arc::new(InvalidationTracker::new(config.bus_capacity));
        tracing::info!(path = ?engine.db_path(), "diagram store opened");
        Ok(Self {
            dao: DiagramDao::new(engine, tracker),
        })
    }

    /// Returns the process-wide repository, constructing it on first call.
    ///
    /// Double-checked locking: concurrent first callers collapse into exactly
    /// one construction; every caller receives the same instance. A failed
    /// construction is not cached, so a later call may retry. Once
    /// initialized, the config of subsequent calls is ignored. The instance
    /// lives for the process lifetime; there is no teardown API.
    ///
    /// # Errors
    ///
    /// As [`DiagramRepository::open`], on the constructing call only.
    pub fn global(config: &StoreConfig) -> Result<Arc<Self>> {
        if let Some(repo) = GLOBAL_REPOSITORY.get() {
            return Ok(Arc::clone(repo));
        }

        let _guard = crate::storage::engine::acquire_lock(&GLOBAL_INIT);
        // Re-check under the lock: another caller may have won the race.
        if let Some(repo) = GLOBAL_REPOSITORY.get() {
            return Ok(Arc::clone(repo));
        }

        let repo = Arc::new(Self::open(config)?);
        let _ = GLOBAL_REPOSITORY.set(Arc::clone(&repo));
        Ok(repo)
    }

    /// Returns the underlying data access layer.
    #[must_use]
    pub const fn dao(&self) -> &DiagramDao {
        &self.dao
    }

    /// Returns a handle that can interrupt an in-flight read. See
    /// [`DiagramDao::interrupt_handle`].
    #[must_use]
    pub fn interrupt_handle(&self) -> rusqlite::InterruptHandle {
        self.dao.interrupt_handle()
    }

    /// Inserts or replaces a diagram. See [`DiagramDao::insert`].
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::StorageIo`] on engine failure.
    pub fn insert(&self, diagram: &Diagram) -> Result<()> {
        self.dao.insert(diagram)
    }

    /// Replaces the full row for the diagram's id. See [`DiagramDao::update`].
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::StorageIo`] on engine failure.
    pub fn update(&self, diagram: &Diagram) -> Result<bool> {
        self.dao.update(diagram)
    }

    /// Deletes a diagram by id. See [`DiagramDao::delete_by_id`].
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::StorageIo`] on engine failure.
    pub fn delete_by_id(&self, id: &DiagramId) -> Result<bool> {
        self.dao.delete_by_id(id)
    }

    /// Sets the favorite flag. See [`DiagramDao::update_favorite`].
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::StorageIo`] on engine failure.
    pub fn update_favorite(&self, id: &DiagramId, is_favorite: bool) -> Result<bool> {
        self.dao.update_favorite(id, is_favorite)
    }

    /// Fetches a diagram by id. See [`DiagramDao::get_by_id`].
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::StorageIo`] on engine failure.
    pub fn get_by_id(&self, id: &DiagramId) -> Result<Option<Diagram>> {
        self.dao.get_by_id(id)
    }

    /// Returns the number of stored diagrams. See [`DiagramDao::count`].
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::StorageIo`] on engine failure.
    pub fn count(&self) -> Result<usize> {
        self.dao.count()
    }

    /// Deletes all diagrams and compacts the file. See
    /// [`DiagramDao::clear_all`].
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::StorageIo`] on engine failure.
    pub fn clear_all(&self) -> Result<()> {
        self.dao.clear_all()
    }

    /// Reactive query over all diagrams. See [`DiagramDao::list_all`].
    ///
    /// # Errors
    ///
    /// Returns the error of the initial read.
    pub fn list_all(&self) -> Result<DiagramSubscription> {
        self.dao.list_all()
    }

    /// Reactive query over favorites. See [`DiagramDao::list_favorites`].
    ///
    /// # Errors
    ///
    /// Returns the error of the initial read.
    pub fn list_favorites(&self) -> Result<DiagramSubscription> {
        self.dao.list_favorites()
    }

    /// Reactive substring search. See [`DiagramDao::search`].
    ///
    /// # Errors
    ///
    /// Returns the error of the initial read.
    pub fn search(&self, term: &str) -> Result<DiagramSubscription> {
        self.dao.search(term)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_open_is_independent_of_global() {
        let a = DiagramRepository::open(&StoreConfig::in_memory()).unwrap();
        let b = DiagramRepository::open(&StoreConfig::in_memory()).unwrap();
        a.insert(&Diagram {
            id: DiagramId::new("only-in-a"),
            title: "t".to_string(),
            code: "graph TD".to_string(),
            diagram_type: "flowchart".to_string(),
            created_at: 1,
            modified_at: 1,
            is_favorite: false,
        })
        .unwrap();
        assert_eq!(a.count().unwrap(), 1);
        assert_eq!(b.count().unwrap(), 0);
    }

    #[test]
    fn test_global_is_single_flight() {
        let config = StoreConfig::in_memory();
        let mut handles = vec![];
        for _ in 0..8 {
            let config = config.clone();
            handles.push(thread::spawn(move || {
                DiagramRepository::global(&config).unwrap()
            }));
        }
        let repos: Vec<Arc<DiagramRepository>> =
            handles.into_iter().map(|h| h.join().unwrap()).collect();
        for repo in &repos[1..] {
            assert!(Arc::ptr_eq(&repos[0], repo));
        }
    }
}
