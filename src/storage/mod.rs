//! Storage layer.
//!
//! Durable, indexed storage of diagram rows over a single `SQLite` file:
//! - **Engine** (`engine`) - connection ownership, pragmas, transactions
//! - **Schema** (`schema`) - compiled expected shape and identity verification
//! - **Migrations** (`migrations`) - ordered, versioned schema transformation steps
//! - **SQL helpers** (`sql`) - LIKE wildcard escaping for literal search terms

// Dropping the connection guard slightly early provides no meaningful benefit.
#![allow(clippy::significant_drop_tightening)]

pub mod engine;
pub mod migrations;
pub mod schema;
pub mod sql;

pub use engine::StorageEngine;
pub use migrations::Migration;
pub use schema::{DIAGRAMS_TABLE, SCHEMA_VERSION};
pub use sql::escape_like_wildcards;
