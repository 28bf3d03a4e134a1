//! Store configuration.

use std::path::{Path, PathBuf};

use crate::storage::SCHEMA_VERSION;

/// Default broadcast buffer depth for the invalidation bus.
const DEFAULT_BUS_CAPACITY: usize = 64;

/// Configuration for opening a diagram store.
///
/// The caller supplies the storage location and the target schema version at
/// construction time; the store itself never chooses a path.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Where the backing database lives.
    pub location: StoreLocation,
    /// Target schema version the on-disk database must be migrated to.
    pub schema_version: i64,
    /// Buffer depth of the invalidation broadcast channel.
    pub bus_capacity: usize,
}

/// Location of the backing `SQLite` database.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreLocation {
    /// A single database file on disk.
    File(PathBuf),
    /// An in-memory database, useful for testing.
    InMemory,
}

impl StoreConfig {
    /// Creates a configuration backed by a database file at `path`.
    #[must_use]
    pub fn at(path: impl AsRef<Path>) -> Self {
        Self {
            location: StoreLocation::File(path.as_ref().to_path_buf()),
            ..Self::default()
        }
    }

    /// Creates a configuration backed by an in-memory database.
    #[must_use]
    pub fn in_memory() -> Self {
        Self {
            location: StoreLocation::InMemory,
            ..Self::default()
        }
    }

    /// Overrides the target schema version.
    ///
    /// Intended for tests that exercise the migration mechanism; production
    /// callers normally keep the compiled [`SCHEMA_VERSION`].
    #[must_use]
    pub const fn with_schema_version(mut self, version: i64) -> Self {
        self.schema_version = version;
        self
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            location: StoreLocation::InMemory,
            schema_version: SCHEMA_VERSION,
            bus_capacity: DEFAULT_BUS_CAPACITY,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_at_path() {
        let config = StoreConfig::at("/tmp/diagrams.db");
        assert_eq!(
            config.location,
            StoreLocation::File(PathBuf::from("/tmp/diagrams.db"))
        );
        assert_eq!(config.schema_version, SCHEMA_VERSION);
    }

    #[test]
    fn test_config_in_memory_default() {
        let config = StoreConfig::default();
        assert_eq!(config.location, StoreLocation::InMemory);
        assert_eq!(config.bus_capacity, DEFAULT_BUS_CAPACITY);
    }

    #[test]
    fn test_with_schema_version() {
        let config = StoreConfig::in_memory().with_schema_version(7);
        assert_eq!(config.schema_version, 7);
    }
}
