//! Upstream source-control API access
//!
//! This module talks to the hosting API that owns the repositories we track.
//! It has two jobs:
//! - Fetch repository metadata when a repository is added
//! - Fetch one page of commits at a time for the ingestion engine
//!
//! ## Cursor modes
//!
//! A commit page request is anchored in exactly one of two ways:
//!
//! ```text
//! last_fetched_commit == ""   →  GET /repos/{name}/commits?since=..&until=..&page=N
//! last_fetched_commit != ""   →  GET /repos/{name}/commits?sha=..&page=N
//! ```
//!
//! Whether another page follows is read from the `Link` header
//! (`rel="next"`), not from the page size.
//!
//! ## Configuration
//!
//! ```toml
//! [upstream]
//! base_url = "https://api.github.com"
//! token = "ghp_xxxxxxxxxxxx"
//! per_page = 100
//! rate_limit_policy = "advisory"
//! ```

mod client;
pub mod rate_limit;
pub mod wire;

pub use client::{parse_next_link, GithubClient};
pub use rate_limit::{RateLimitSnapshot, RateLimitTracker};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::types::{Commit, RepositorySnapshot};

/// Parameters for a single commit page fetch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitPageRequest {
    /// `owner/repo`
    pub repository_name: String,
    /// Window start, ignored when anchored by SHA
    pub since: DateTime<Utc>,
    /// Window end, ignored when anchored by SHA
    pub until: DateTime<Utc>,
    /// SHA anchor; empty means "use the date window"
    pub last_fetched_commit: String,
    /// 1-based page number
    pub page: u32,
}

impl CommitPageRequest {
    pub fn is_sha_anchored(&self) -> bool {
        !self.last_fetched_commit.is_empty()
    }
}

/// One page of upstream commits
#[derive(Debug, Clone, Default)]
pub struct CommitPage {
    pub commits: Vec<Commit>,
    /// Upstream advertised a next page
    pub has_more_pages: bool,
}

/// The upstream operations the ingestion engine depends on.
///
/// [`GithubClient`] is the HTTP implementation. Errors use the upstream
/// variants of [`crate::Error`]: `UpstreamUnavailable`, `UpstreamThrottled`,
/// `MalformedResponse`, and `RepositoryNotFound` for metadata lookups.
#[async_trait]
pub trait UpstreamClient: Send + Sync {
    /// GET /repos/{owner}/{repo}
    async fn fetch_repository_metadata(&self, name: &str) -> Result<RepositorySnapshot>;

    /// GET /repos/{owner}/{repo}/commits for one page
    async fn fetch_commits(&self, request: &CommitPageRequest) -> Result<CommitPage>;
}
