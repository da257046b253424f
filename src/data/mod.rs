//! Data layer module
//!
//! Handles all data persistence and caching:
//! - Entity model shared by every layer
//! - SQLite database operations
//! - Read-through snapshot cache (volatile)

mod cache;
mod database;
mod models;

pub use cache::{QueryCache, SnapshotCache};
pub use database::{Database, SqliteQuery, Stored};
pub use models::*;

#[cfg(test)]
mod database_test;
