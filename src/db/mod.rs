//! SQLite persistence for chapter-dl
//!
//! [`SqliteStore`] is a key/value store of JSON story snapshots and download
//! settings implementing [`crate::store::StoryStore`].
//!
//! ## Submodules
//!
//! Methods on [`SqliteStore`] are organized by domain:
//! - [`migrations`] - Database lifecycle, schema migrations
//! - [`stories`] - Story snapshot CRUD
//! - [`settings`] - Download settings

use sqlx::sqlite::SqlitePool;

mod migrations;
mod settings;
mod stories;

/// SQLite-backed story store
pub struct SqliteStore {
    pool: SqlitePool,
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests;
