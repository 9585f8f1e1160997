//! Store interfaces consumed by the ingestion engine
//!
//! The engine never talks to SQL directly. It reads and writes repositories
//! and commits through these two traits, which [`crate::db::Database`]
//! implements. Tests and alternative backends can provide their own.

use crate::error::Result;
use crate::types::{Commit, CommitSave, RepositoryMetadata, SyncCursor};

/// Persistence for tracked repository metadata and cursors.
pub trait RepositoryStore: Send + Sync {
    /// Insert a new repository.
    ///
    /// Fails with [`crate::Error::DuplicateKey`] when the name or public id is taken.
    fn save(&self, repository: &RepositoryMetadata) -> Result<RepositoryMetadata>;

    /// Write the cursor pair and the fetching flag for `name` in one statement.
    ///
    /// Last writer wins; there is no optimistic concurrency check.
    fn update_cursor_and_flags(&self, name: &str, cursor: &SyncCursor, is_fetching: bool)
        -> Result<()>;

    /// Fails with [`crate::Error::NotFound`] when absent.
    fn find_by_name(&self, name: &str) -> Result<RepositoryMetadata>;

    /// Fails with [`crate::Error::NotFound`] when absent.
    fn find_by_public_id(&self, public_id: &str) -> Result<RepositoryMetadata>;

    /// Every tracked repository, oldest first.
    fn list_all(&self) -> Result<Vec<RepositoryMetadata>>;
}

/// Persistence for ingested commits.
pub trait CommitStore: Send + Sync {
    /// Store a commit.
    ///
    /// A commit whose id already exists is not an error and yields
    /// [`CommitSave::AlreadyPresent`].
    fn save(&self, commit: &Commit) -> Result<CommitSave>;
}
