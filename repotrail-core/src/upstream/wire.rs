//! Wire formats for the upstream REST API
//!
//! Converts upstream JSON payloads into repotrail's [`Commit`] and
//! [`RepositorySnapshot`] types.
//!
//! Upstream objects carry many more fields than we keep. Only the ones below
//! are read; everything else is ignored by serde. Nullable fields
//! (`description`, `language`, a commit author that is not linked to an
//! account) default to empty strings rather than failing the page.

use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::error::{Error, Result};
use crate::types::{Commit, RepositorySnapshot};

/// Response from GET /repos/{owner}/{repo}
#[derive(Debug, Deserialize)]
pub struct RepositoryResponse {
    pub full_name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub html_url: Option<String>,
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default)]
    pub forks_count: i64,
    #[serde(default)]
    pub stargazers_count: i64,
    #[serde(default)]
    pub open_issues_count: i64,
    #[serde(default)]
    pub watchers_count: i64,
}

impl From<RepositoryResponse> for RepositorySnapshot {
    fn from(r: RepositoryResponse) -> Self {
        RepositorySnapshot {
            name: r.full_name,
            description: r.description.unwrap_or_default(),
            url: r.html_url.unwrap_or_default(),
            language: r.language.unwrap_or_default(),
            forks_count: r.forks_count,
            stars_count: r.stargazers_count,
            open_issues_count: r.open_issues_count,
            watchers_count: r.watchers_count,
        }
    }
}

/// One element of GET /repos/{owner}/{repo}/commits
#[derive(Debug, Deserialize)]
pub struct CommitResponse {
    pub sha: String,
    #[serde(default)]
    pub html_url: Option<String>,
    pub commit: CommitDetail,
}

#[derive(Debug, Deserialize)]
pub struct CommitDetail {
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub author: Option<CommitSignature>,
    #[serde(default)]
    pub committer: Option<CommitSignature>,
}

#[derive(Debug, Deserialize)]
pub struct CommitSignature {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub date: Option<DateTime<Utc>>,
}

impl CommitResponse {
    /// Convert into a domain commit for `repository_name`.
    ///
    /// The author date is used when present, then the committer date.
    pub fn into_commit(self, repository_name: &str, observed_at: DateTime<Utc>) -> Commit {
        let author_date = self.commit.author.as_ref().and_then(|a| a.date);
        let committer_date = self.commit.committer.as_ref().and_then(|c| c.date);
        let author = self
            .commit
            .author
            .and_then(|a| a.name)
            .unwrap_or_default();

        Commit {
            commit_id: self.sha,
            message: self.commit.message,
            author,
            date: author_date.or(committer_date).unwrap_or(observed_at),
            url: self.html_url.unwrap_or_default(),
            repository_name: repository_name.to_string(),
            created_at: observed_at,
            updated_at: observed_at,
        }
    }
}

/// Parse a commit-list body into domain commits.
pub fn parse_commit_page(
    body: &str,
    repository_name: &str,
    observed_at: DateTime<Utc>,
) -> Result<Vec<Commit>> {
    let page: Vec<CommitResponse> = serde_json::from_str(body)
        .map_err(|e| Error::MalformedResponse(format!("commit page for {}: {}", repository_name, e)))?;

    Ok(page
        .into_iter()
        .map(|c| c.into_commit(repository_name, observed_at))
        .collect())
}

/// Parse a repository body into a metadata snapshot.
pub fn parse_repository(body: &str) -> Result<RepositorySnapshot> {
    let repo: RepositoryResponse = serde_json::from_str(body)
        .map_err(|e| Error::MalformedResponse(format!("repository metadata: {}", e)))?;
    Ok(repo.into())
}
