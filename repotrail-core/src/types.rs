//! Core domain types for repotrail
//!
//! These types represent the canonical data model that the ingestion engine
//! reads and writes through the store interfaces.
//!
//! ## Terminology
//!
//! | Term | Definition |
//! |------|------------|
//! | **Upstream** | The source-control hosting API that supplies metadata and commit pages |
//! | **Repository** | An upstream repository tracked locally, identified by `owner/repo` |
//! | **Cursor** | The `(last_fetched_commit, last_fetched_page)` pair marking ingestion progress |
//! | **Pass** | One run from the current cursor until caught up or aborted |
//! | **Commit** | A single upstream commit, stored once by its SHA |

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

// ============================================
// Repository
// ============================================

/// Resumable ingestion cursor for a repository.
///
/// Written only after the commits of the page it names are durably stored.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncCursor {
    /// SHA of the most recently persisted commit ("" if none)
    pub last_fetched_commit: String,
    /// Last page number processed (0 for a repository never fetched)
    pub last_fetched_page: u32,
}

impl SyncCursor {
    /// Cursor written when a pass observes an empty page.
    ///
    /// Clearing the SHA makes the next pass anchor by date window again.
    pub fn caught_up() -> Self {
        Self {
            last_fetched_commit: String::new(),
            last_fetched_page: 1,
        }
    }

    /// Whether the next fetch should walk forward from a SHA.
    pub fn is_sha_anchored(&self) -> bool {
        !self.last_fetched_commit.is_empty()
    }
}

/// Metadata for one tracked upstream repository.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RepositoryMetadata {
    /// Opaque external identifier (UUID), the only id exposed to callers
    pub public_id: String,
    /// Canonical `owner/repo` name, unique
    pub name: String,
    pub description: String,
    pub url: String,
    pub language: String,
    pub forks_count: i64,
    pub stars_count: i64,
    pub open_issues_count: i64,
    pub watchers_count: i64,
    /// Ingestion progress
    pub cursor: SyncCursor,
    /// True only while an ingestion pass is in flight
    pub is_fetching: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl RepositoryMetadata {
    /// Build a record from a fresh upstream metadata snapshot.
    ///
    /// Assigns a new `public_id` and an empty cursor.
    pub fn from_upstream(snapshot: RepositorySnapshot) -> Self {
        let now = Utc::now();
        Self {
            public_id: uuid::Uuid::new_v4().to_string(),
            name: snapshot.name,
            description: snapshot.description,
            url: snapshot.url,
            language: snapshot.language,
            forks_count: snapshot.forks_count,
            stars_count: snapshot.stars_count,
            open_issues_count: snapshot.open_issues_count,
            watchers_count: snapshot.watchers_count,
            cursor: SyncCursor::default(),
            is_fetching: false,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Descriptive repository fields as reported by the upstream API.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RepositorySnapshot {
    pub name: String,
    pub description: String,
    pub url: String,
    pub language: String,
    pub forks_count: i64,
    pub stars_count: i64,
    pub open_issues_count: i64,
    pub watchers_count: i64,
}

/// Returns true if `name` has the `owner/repo` shape.
pub fn is_valid_repository_name(name: &str) -> bool {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN
        .get_or_init(|| {
            Regex::new(r"^[A-Za-z0-9_.-]+/[A-Za-z0-9_.-]+$").expect("repository name pattern")
        })
        .is_match(name)
}

// ============================================
// Commit
// ============================================

/// A single upstream commit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Commit {
    /// Upstream SHA, globally unique
    pub commit_id: String,
    pub message: String,
    pub author: String,
    pub date: DateTime<Utc>,
    pub url: String,
    /// Name of the owning repository
    pub repository_name: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Outcome of handing a commit to the commit store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitSave {
    /// Row was written
    Inserted,
    /// A commit with the same id was already stored
    AlreadyPresent,
}

// ============================================
// Read side
// ============================================

/// Commit count for a single author.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuthorCommitCount {
    pub author: String,
    pub commit_count: i64,
}

/// Sort direction for commit listings.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    Asc,
    #[default]
    Desc,
}

impl SortDirection {
    pub fn as_sql(&self) -> &'static str {
        match self {
            SortDirection::Asc => "ASC",
            SortDirection::Desc => "DESC",
        }
    }
}

/// Offset pagination request for commit listings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    /// 1-based page number
    pub page: u32,
    /// Rows per page
    pub limit: u32,
    pub direction: SortDirection,
}

impl Default for PageRequest {
    fn default() -> Self {
        Self {
            page: 1,
            limit: 10,
            direction: SortDirection::Desc,
        }
    }
}

impl PageRequest {
    /// Row offset for this page (pages below 1 are treated as 1).
    pub fn offset(&self) -> u64 {
        u64::from(self.page.max(1) - 1) * u64::from(self.limit)
    }
}

/// Pagination details returned alongside a listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PageInfo {
    /// Total rows available for the query
    pub total_count: i64,
    pub page: u32,
    pub has_next_page: bool,
    /// Rows in this page
    pub count: usize,
}

/// One page of stored commits for a repository.
#[derive(Debug, Clone)]
pub struct CommitListing {
    pub commits: Vec<Commit>,
    pub page_info: PageInfo,
}
