//! # repotrail-core
//!
//! Core library for repotrail - an incremental commit history mirror.
//!
//! This library provides:
//! - Domain types for repositories, cursors, and commits
//! - Database storage layer with SQLite
//! - An upstream API client with rate-limit tracking
//! - The ingestion engine: resumable passes and per-repository sync loops
//! - Configuration management
//! - Logging infrastructure
//!
//! ## Architecture
//!
//! Data flows through three stages:
//! - **Upstream:** Repository metadata and commit pages from the hosting API
//! - **Ingestion:** Paged catch-up passes that advance a durable cursor
//! - **Storage:** SQLite tables for repositories and commits, queried by the CLI
//!
//! ## Example
//!
//! ```rust,no_run
//! use repotrail_core::{Config, Database};
//!
//! // Load configuration
//! let config = Config::load().expect("failed to load config");
//!
//! // Open database
//! let db = Database::open(&Config::database_path()).expect("failed to open database");
//! db.migrate().expect("failed to run migrations");
//! ```

// Re-export commonly used items at the crate root
pub use config::Config;
pub use db::Database;
pub use error::{Error, Result};
pub use ingest::{IngestConfig, IngestionCoordinator, PassOutcome, PassReport};
pub use store::{CommitStore, RepositoryStore};
pub use types::*;
pub use upstream::{GithubClient, UpstreamClient};

// Public modules
pub mod config;
pub mod db;
pub mod error;
pub mod ingest;
pub mod logging;
pub mod store;
pub mod types;
pub mod upstream;
