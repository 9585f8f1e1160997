//! Single catch-up pass for one repository

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::config::SyncConfig;
use crate::error::{Error, Result};
use crate::store::{CommitStore, RepositoryStore};
use crate::types::{CommitSave, RepositoryMetadata, SyncCursor};
use crate::upstream::{CommitPageRequest, UpstreamClient};

/// Settings for ingestion passes and the loops that drive them.
#[derive(Debug, Clone)]
pub struct IngestConfig {
    /// Start of the commit window
    pub since: DateTime<Utc>,
    /// Fixed end of the initial window; `None` means "now" at pass start
    pub end_date: Option<DateTime<Utc>>,
    /// Delay between passes for each repository
    pub interval: Duration,
}

impl IngestConfig {
    /// Resolve the window once, relative to `now`.
    pub fn from_sync_config(sync: &SyncConfig, now: DateTime<Utc>) -> Self {
        Self {
            since: sync.since(now),
            end_date: sync.end_date,
            interval: sync.interval(),
        }
    }

    /// Window end for the first page of a pass starting at `now`.
    pub fn until(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        self.end_date.unwrap_or(now)
    }
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self::from_sync_config(&SyncConfig::default(), Utc::now())
    }
}

/// How a pass ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PassOutcome {
    /// Upstream stopped advertising further pages
    Exhausted,
    /// An empty page was returned; the cursor was reset to `(1, "")`
    CaughtUp,
    /// A fetch or cursor write failed; the cursor keeps its last durable value
    Aborted(String),
}

/// Counters for one pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PassReport {
    pub repository: String,
    pub pages_fetched: u32,
    pub commits_inserted: usize,
    pub commits_already_present: usize,
    /// Commits skipped because the store rejected them
    pub commits_failed: usize,
    pub outcome: PassOutcome,
}

impl PassReport {
    fn new(repository: &str) -> Self {
        Self {
            repository: repository.to_string(),
            pages_fetched: 0,
            commits_inserted: 0,
            commits_already_present: 0,
            commits_failed: 0,
            outcome: PassOutcome::Exhausted,
        }
    }

    pub fn is_aborted(&self) -> bool {
        matches!(self.outcome, PassOutcome::Aborted(_))
    }
}

/// Pulls commit pages for a repository and writes them through the stores.
///
/// The cursor is only written after every commit of its page has been handed
/// to the commit store, so a crash mid-page replays that page on restart.
/// Replays are harmless because commits are keyed by SHA.
pub struct CommitIngestor {
    upstream: Arc<dyn UpstreamClient>,
    repositories: Arc<dyn RepositoryStore>,
    commits: Arc<dyn CommitStore>,
    config: IngestConfig,
}

impl CommitIngestor {
    pub fn new(
        upstream: Arc<dyn UpstreamClient>,
        repositories: Arc<dyn RepositoryStore>,
        commits: Arc<dyn CommitStore>,
        config: IngestConfig,
    ) -> Self {
        Self {
            upstream,
            repositories,
            commits,
            config,
        }
    }

    /// Run one pass from the repository's stored cursor.
    ///
    /// Never fails: errors end the pass and are reported in
    /// [`PassReport::outcome`]. `is_fetching` is cleared on every exit.
    pub async fn run_pass(&self, repository: &RepositoryMetadata) -> PassReport {
        let name = repository.name.as_str();
        let mut report = PassReport::new(name);
        let mut cursor = repository.cursor.clone();

        if repository.is_fetching {
            tracing::debug!(repository = %name, "Repository was left marked as fetching");
        }

        if let Err(e) = self
            .repositories
            .update_cursor_and_flags(name, &cursor, true)
        {
            tracing::warn!(repository = %name, error = %e, "Failed to mark repository as fetching");
            report.outcome = PassOutcome::Aborted(e.to_string());
            return report;
        }

        report.outcome = match self.fetch_pages(name, &mut cursor, &mut report).await {
            Ok(outcome) => outcome,
            Err(e) => {
                if e.is_upstream() {
                    tracing::warn!(
                        repository = %name,
                        page = cursor.last_fetched_page,
                        error = %e,
                        "Ingestion pass aborted by upstream"
                    );
                } else {
                    tracing::error!(
                        repository = %name,
                        page = cursor.last_fetched_page,
                        error = %e,
                        "Ingestion pass aborted by storage"
                    );
                }
                PassOutcome::Aborted(e.to_string())
            }
        };

        // `cursor` holds the last value written during this pass.
        if let Err(e) = self
            .repositories
            .update_cursor_and_flags(name, &cursor, false)
        {
            tracing::error!(repository = %name, error = %e, "Failed to clear fetching flag");
        }

        tracing::info!(
            repository = %name,
            pages = report.pages_fetched,
            inserted = report.commits_inserted,
            already_present = report.commits_already_present,
            failed = report.commits_failed,
            outcome = ?report.outcome,
            "Ingestion pass finished"
        );

        report
    }

    async fn fetch_pages(
        &self,
        name: &str,
        cursor: &mut SyncCursor,
        report: &mut PassReport,
    ) -> Result<PassOutcome> {
        let mut page = cursor.last_fetched_page.max(1);
        let mut last_fetched_commit = cursor.last_fetched_commit.clone();
        let mut until = self.config.until(Utc::now());

        loop {
            let request = CommitPageRequest {
                repository_name: name.to_string(),
                since: self.config.since,
                until,
                last_fetched_commit: last_fetched_commit.clone(),
                page,
            };

            tracing::debug!(
                repository = %name,
                page,
                sha_anchored = request.is_sha_anchored(),
                "Fetching commit page"
            );

            let fetched = self.upstream.fetch_commits(&request).await?;
            report.pages_fetched += 1;

            if fetched.commits.is_empty() {
                let caught_up = SyncCursor::caught_up();
                self.repositories
                    .update_cursor_and_flags(name, &caught_up, true)?;
                *cursor = caught_up;
                tracing::debug!(repository = %name, page, "Empty page, caught up");
                return Ok(PassOutcome::CaughtUp);
            }

            for commit in &fetched.commits {
                match self.commits.save(commit) {
                    Ok(CommitSave::Inserted) => {
                        report.commits_inserted += 1;
                        last_fetched_commit = commit.commit_id.clone();
                    }
                    Ok(CommitSave::AlreadyPresent) | Err(Error::DuplicateKey(_)) => {
                        report.commits_already_present += 1;
                        last_fetched_commit = commit.commit_id.clone();
                    }
                    Err(e) => {
                        report.commits_failed += 1;
                        tracing::warn!(
                            repository = %name,
                            commit_id = %commit.commit_id,
                            error = %e,
                            "Failed to store commit, skipping"
                        );
                    }
                }
            }

            let next = SyncCursor {
                last_fetched_commit: last_fetched_commit.clone(),
                last_fetched_page: page,
            };
            self.repositories
                .update_cursor_and_flags(name, &next, true)?;
            *cursor = next;

            if !fetched.has_more_pages {
                return Ok(PassOutcome::Exhausted);
            }

            page += 1;
            until = Utc::now();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use crate::ingest::test_support::{commit, repository, test_db, ScriptedUpstream};
    use crate::upstream::CommitPage;

    fn setup(upstream: Arc<ScriptedUpstream>) -> (Arc<Database>, CommitIngestor) {
        let db = test_db();
        let ingestor = CommitIngestor::new(upstream, db.clone(), db.clone(), IngestConfig::default());
        (db, ingestor)
    }

    fn stored(db: &Database, name: &str) -> RepositoryMetadata {
        db.get_repository_by_name(name).unwrap().unwrap()
    }

    #[tokio::test]
    async fn test_pass_walks_pages_and_advances_cursor() {
        let upstream = Arc::new(ScriptedUpstream::new());
        upstream.push_page(vec![commit("golang/go", "a1"), commit("golang/go", "a2")], true);
        upstream.push_page(vec![commit("golang/go", "a3")], false);
        let (db, ingestor) = setup(upstream.clone());
        let repo = RepositoryStore::save(db.as_ref(), &repository("golang/go")).unwrap();

        let report = ingestor.run_pass(&repo).await;

        assert_eq!(report.outcome, PassOutcome::Exhausted);
        assert_eq!(report.pages_fetched, 2);
        assert_eq!(report.commits_inserted, 3);
        assert_eq!(db.count_commits("golang/go").unwrap(), 3);

        let after = stored(&db, "golang/go");
        assert_eq!(after.cursor.last_fetched_commit, "a3");
        assert_eq!(after.cursor.last_fetched_page, 2);
        assert!(!after.is_fetching);

        let requests = upstream.commit_requests();
        assert_eq!(requests[0].page, 1);
        assert!(!requests[0].is_sha_anchored());
        // The in-memory anchor follows the last stored commit.
        assert_eq!(requests[1].page, 2);
        assert_eq!(requests[1].last_fetched_commit, "a2");
    }

    #[tokio::test]
    async fn test_empty_page_resets_cursor() {
        let upstream = Arc::new(ScriptedUpstream::new());
        upstream.push_page(vec![], false);
        let (db, ingestor) = setup(upstream);
        let mut repo = repository("golang/go");
        repo.cursor = SyncCursor {
            last_fetched_commit: "abc123".to_string(),
            last_fetched_page: 4,
        };
        RepositoryStore::save(db.as_ref(), &repo).unwrap();

        let report = ingestor.run_pass(&repo).await;

        assert_eq!(report.outcome, PassOutcome::CaughtUp);
        let after = stored(&db, "golang/go");
        assert_eq!(after.cursor, SyncCursor::caught_up());
        assert!(!after.is_fetching);
    }

    #[tokio::test]
    async fn test_fetch_error_keeps_last_durable_cursor() {
        let upstream = Arc::new(ScriptedUpstream::new());
        upstream.push_page(vec![commit("golang/go", "a1")], true);
        upstream.push_error(Error::UpstreamThrottled { reset_at: None });
        let (db, ingestor) = setup(upstream);
        let repo = RepositoryStore::save(db.as_ref(), &repository("golang/go")).unwrap();

        let report = ingestor.run_pass(&repo).await;

        assert!(report.is_aborted());
        assert_eq!(report.pages_fetched, 1);
        let after = stored(&db, "golang/go");
        assert_eq!(after.cursor.last_fetched_commit, "a1");
        assert_eq!(after.cursor.last_fetched_page, 1);
        assert!(!after.is_fetching);
    }

    #[tokio::test]
    async fn test_replayed_page_counts_duplicates() {
        let upstream = Arc::new(ScriptedUpstream::new());
        let page = vec![commit("golang/go", "a1"), commit("golang/go", "a2")];
        upstream.push_page(page.clone(), false);
        upstream.push_page(page, false);
        let (db, ingestor) = setup(upstream);
        let repo = RepositoryStore::save(db.as_ref(), &repository("golang/go")).unwrap();

        ingestor.run_pass(&repo).await;
        let second = ingestor.run_pass(&stored(&db, "golang/go")).await;

        assert_eq!(second.commits_inserted, 0);
        assert_eq!(second.commits_already_present, 2);
        assert_eq!(db.count_commits("golang/go").unwrap(), 2);
        assert_eq!(stored(&db, "golang/go").cursor.last_fetched_commit, "a2");
    }

    #[tokio::test]
    async fn test_rejected_commit_is_skipped_without_aborting() {
        let upstream = Arc::new(ScriptedUpstream::new());
        // Commits for an untracked repository violate the foreign key.
        upstream.push_page(
            vec![
                commit("golang/go", "a1"),
                commit("ghost/repo", "x1"),
                commit("golang/go", "a3"),
            ],
            true,
        );
        upstream.push_page(
            vec![commit("golang/go", "b1"), commit("ghost/repo", "x2")],
            false,
        );
        let (db, ingestor) = setup(upstream.clone());
        let repo = RepositoryStore::save(db.as_ref(), &repository("golang/go")).unwrap();

        let report = ingestor.run_pass(&repo).await;

        assert_eq!(report.outcome, PassOutcome::Exhausted);
        assert_eq!(report.pages_fetched, 2);
        assert_eq!(report.commits_inserted, 3);
        assert_eq!(report.commits_failed, 2);
        assert_eq!(db.count_commits("golang/go").unwrap(), 3);
        assert!(db.get_commit("x1").unwrap().is_none());

        // The anchor skips over rejected commits.
        let requests = upstream.commit_requests();
        assert_eq!(requests[1].last_fetched_commit, "a3");
        let after = stored(&db, "golang/go");
        assert_eq!(after.cursor.last_fetched_commit, "b1");
        assert_eq!(after.cursor.last_fetched_page, 2);
    }

    #[tokio::test]
    async fn test_fetching_flag_is_set_while_pass_runs() {
        let upstream = Arc::new(ScriptedUpstream::new());
        upstream.push_page(vec![commit("golang/go", "a1")], true);
        upstream.push_page(vec![commit("golang/go", "a2")], false);
        let (db, ingestor) = setup(upstream.clone());
        upstream.watch_fetching_flag(db.clone());
        let repo = RepositoryStore::save(db.as_ref(), &repository("golang/go")).unwrap();
        assert!(!repo.is_fetching);

        let report = ingestor.run_pass(&repo).await;

        assert!(!report.is_aborted());
        assert_eq!(upstream.fetching_seen(), vec![true, true]);
        assert!(!stored(&db, "golang/go").is_fetching);
    }

    #[tokio::test]
    async fn test_unknown_repository_aborts_before_fetching() {
        let upstream = Arc::new(ScriptedUpstream::new());
        upstream.push_page(vec![commit("golang/go", "a1")], false);
        let (_db, ingestor) = setup(upstream.clone());

        let report = ingestor.run_pass(&repository("golang/go")).await;

        assert!(report.is_aborted());
        assert!(upstream.commit_requests().is_empty());
    }

    #[test]
    fn test_ingest_config_window() {
        let now = Utc::now();
        let sync = SyncConfig {
            lookback_days: 10,
            ..Default::default()
        };
        let config = IngestConfig::from_sync_config(&sync, now);
        assert_eq!(config.since, now - chrono::Duration::days(10));
        assert_eq!(config.until(now), now);
        assert_eq!(config.interval, Duration::from_secs(3600));
    }

    #[test]
    fn test_commit_page_default_is_last_page() {
        let page = CommitPage::default();
        assert!(page.commits.is_empty());
        assert!(!page.has_more_pages);
    }
}
