//! # diagramstore
//!
//! Embedded reactive persistence core for a diagram editor.
//!
//! diagramstore keeps diagram records in a single-file `SQLite` database and
//! serves reactive queries: live subscriptions that re-publish a freshly
//! computed full result set whenever the underlying table is mutated.
//!
//! ## Architecture
//!
//! - [`storage`] - durable `SQLite` engine with schema verification, versioned
//!   migrations, and single-writer transactions
//! - [`dao`] - typed CRUD and query operations over the engine
//! - [`bus`] - table-granularity invalidation tracker driving reactive queries
//! - [`repository`] - lazily-initialized, process-wide access facade
//!
//! ## Example
//!
//! ```rust,ignore
//! use diagramstore::{Diagram, DiagramRepository, StoreConfig};
//!
//! let repo = DiagramRepository::open(&StoreConfig::at("./diagrams.db"))?;
//! repo.insert(&diagram)?;
//! let mut all = repo.list_all()?;
//! // `all` re-publishes a full snapshot after every committed write.
//! ```

#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

use thiserror::Error as ThisError;

// Module declarations
pub mod bus;
pub mod config;
pub mod dao;
pub mod models;
pub mod repository;
pub mod storage;

// Re-exports for convenience
pub use bus::{InvalidationTracker, QuerySubscription, TableId};
pub use config::{StoreConfig, StoreLocation};
pub use dao::{DiagramDao, DiagramSubscription};
pub use models::{Diagram, DiagramId, DiagramType};
pub use repository::DiagramRepository;
pub use storage::{Migration, StorageEngine};

/// Error type for diagramstore operations.
///
/// Uses `thiserror` for automatic `Display` and `Error` trait implementations.
///
/// # Error Variant Triggers
///
/// | Variant | Raised When |
/// |---------|-------------|
/// | `SchemaMismatch` | On-disk schema shape or version diverges from the compiled expectation with no applicable migration |
/// | `StorageIo` | `SQLite`/filesystem failures (disk full, permission denied, corruption, interrupted statements) |
/// | `ConstraintViolation` | A database constraint is violated; unreachable through the typed API while every field is mandatory |
///
/// Absence is never an error: single-row reads return `Ok(None)` and
/// zero-affected-row writes return `Ok(false)`.
#[derive(Debug, ThisError)]
pub enum Error {
    /// The on-disk schema does not match the compiled expected shape.
    ///
    /// Raised when:
    /// - Column names, declared types, nullability, or the primary key of the
    ///   `diagrams` table differ from the compiled shape
    /// - The stored schema identity token diverges
    /// - The on-disk version is newer than the configured target version
    /// - A required migration hop has no registered step
    ///
    /// Fatal at open time; there is no automatic recovery.
    #[error("schema mismatch: {0}")]
    SchemaMismatch(String),

    /// The underlying storage medium failed.
    ///
    /// Raised when:
    /// - `SQLite` reports an I/O-class failure (disk full, permission denied,
    ///   corruption)
    /// - A statement is interrupted through the cooperative cancellation
    ///   handle
    ///
    /// Never retried by the core; the caller decides whether to surface or
    /// retry.
    #[error("storage i/o failure in '{operation}': {cause}")]
    StorageIo {
        /// The operation that failed.
        operation: String,
        /// The underlying cause.
        cause: String,
    },

    /// A database constraint was violated.
    ///
    /// Reserved: with every `Diagram` field mandatory at construction, the
    /// typed API cannot produce this today.
    #[error("constraint violation: {0}")]
    ConstraintViolation(String),
}

/// Result type alias for diagramstore operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Returns the current Unix timestamp in milliseconds.
///
/// The store never stamps records itself; `created_at` and `modified_at` are
/// caller-supplied. This helper is the convenience clock for callers that have
/// no clock of their own. Falls back to 0 if the system clock is before the
/// Unix epoch.
///
/// # Examples
///
/// ```rust
/// use diagramstore::current_timestamp_millis;
///
/// let ts = current_timestamp_millis();
/// assert!(ts > 0);
/// ```
#[must_use]
pub fn current_timestamp_millis() -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| i64::try_from(d.as_millis()).unwrap_or(i64::MAX))
}
