//! Database layer for repotrail
//!
//! This module provides the storage layer using SQLite with:
//! - Schema migrations
//! - Repository pattern for queries
//! - Cursor tracking for incremental ingestion

pub mod repo;
pub mod schema;

pub use repo::Database;
