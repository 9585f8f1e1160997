//! Incremental commit ingestion
//!
//! This module pulls commit history from the upstream API into local storage
//! and keeps it current.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────┐     ┌──────────────────┐     ┌──────────────────┐
//! │ IngestionCoordinator │ ──► │  SyncSupervisor  │ ──► │ SyncScheduler    │
//! │ add / resume / seed  │     │ (JoinSet + token)│     │ (one per repo)   │
//! └──────────────────────┘     └──────────────────┘     └──────────────────┘
//!                                                                │
//!                                                                ▼
//!        ┌──────────────┐      ┌──────────────────┐     ┌──────────────────┐
//!        │  Upstream    │ ◄──  │  CommitIngestor  │ ──► │ RepositoryStore  │
//!        │  (pages)     │      │  (one pass)      │     │ CommitStore      │
//!        └──────────────┘      └──────────────────┘     └──────────────────┘
//! ```
//!
//! Progress is kept in each repository's cursor, so a restarted process
//! resumes where the last durable page left off.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use repotrail_core::ingest::{IngestConfig, IngestionCoordinator};
//! use repotrail_core::upstream::GithubClient;
//! use repotrail_core::{Config, Database};
//!
//! let config = Config::load()?;
//! let db = Arc::new(Database::open(&Config::database_path())?);
//! let upstream = Arc::new(GithubClient::new(config.upstream.clone())?);
//! let ingest = IngestConfig::from_sync_config(&config.sync, chrono::Utc::now());
//!
//! let coordinator = IngestionCoordinator::new(upstream, db.clone(), db, ingest);
//! coordinator.resume_all_repositories()?;
//! coordinator.add_repository("golang/go").await?;
//! ```

mod coordinator;
mod ingestor;
mod scheduler;

pub use coordinator::IngestionCoordinator;
pub use ingestor::{CommitIngestor, IngestConfig, PassOutcome, PassReport};
pub use scheduler::{RepositorySyncScheduler, SyncSupervisor};

#[cfg(test)]
pub(crate) mod test_support {
    use std::collections::{HashMap, VecDeque};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    use async_trait::async_trait;
    use chrono::{DateTime, Utc};

    use crate::db::Database;
    use crate::error::{Error, Result};
    use crate::store::RepositoryStore;
    use crate::types::{Commit, RepositoryMetadata, RepositorySnapshot};
    use crate::upstream::{CommitPage, CommitPageRequest, UpstreamClient};

    /// Upstream fake that replays queued responses in order.
    ///
    /// Once the queue is empty every fetch returns an empty last page.
    #[derive(Default)]
    pub struct ScriptedUpstream {
        repositories: Mutex<HashMap<String, RepositorySnapshot>>,
        pages: Mutex<VecDeque<Result<CommitPage>>>,
        requests: Mutex<Vec<CommitPageRequest>>,
        metadata_calls: AtomicUsize,
        watched_store: Mutex<Option<Arc<dyn RepositoryStore>>>,
        fetching_seen: Mutex<Vec<bool>>,
    }

    impl ScriptedUpstream {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn add_repository(&self, snapshot: RepositorySnapshot) {
            self.repositories
                .lock()
                .unwrap()
                .insert(snapshot.name.clone(), snapshot);
        }

        pub fn push_page(&self, commits: Vec<Commit>, has_more_pages: bool) {
            self.pages.lock().unwrap().push_back(Ok(CommitPage {
                commits,
                has_more_pages,
            }));
        }

        pub fn push_error(&self, error: Error) {
            self.pages.lock().unwrap().push_back(Err(error));
        }

        pub fn commit_requests(&self) -> Vec<CommitPageRequest> {
            self.requests.lock().unwrap().clone()
        }

        pub fn metadata_calls(&self) -> usize {
            self.metadata_calls.load(Ordering::SeqCst)
        }

        /// Read the stored `is_fetching` flag on every commit fetch.
        pub fn watch_fetching_flag(&self, store: Arc<dyn RepositoryStore>) {
            *self.watched_store.lock().unwrap() = Some(store);
        }

        /// Flags seen by fetches made since [`Self::watch_fetching_flag`].
        pub fn fetching_seen(&self) -> Vec<bool> {
            self.fetching_seen.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl UpstreamClient for ScriptedUpstream {
        async fn fetch_repository_metadata(&self, name: &str) -> Result<RepositorySnapshot> {
            self.metadata_calls.fetch_add(1, Ordering::SeqCst);
            self.repositories
                .lock()
                .unwrap()
                .get(name)
                .cloned()
                .ok_or_else(|| Error::RepositoryNotFound(name.to_string()))
        }

        async fn fetch_commits(&self, request: &CommitPageRequest) -> Result<CommitPage> {
            self.requests.lock().unwrap().push(request.clone());
            let watched = self.watched_store.lock().unwrap().clone();
            if let Some(store) = watched {
                let stored = store.find_by_name(&request.repository_name)?;
                self.fetching_seen.lock().unwrap().push(stored.is_fetching);
            }
            self.pages
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(CommitPage::default()))
        }
    }

    pub fn test_db() -> Arc<Database> {
        let db = Database::open_in_memory().unwrap();
        db.migrate().unwrap();
        Arc::new(db)
    }

    pub fn snapshot(name: &str) -> RepositorySnapshot {
        RepositorySnapshot {
            name: name.to_string(),
            description: format!("{} description", name),
            url: format!("https://github.com/{}", name),
            language: "Go".to_string(),
            ..Default::default()
        }
    }

    pub fn repository(name: &str) -> RepositoryMetadata {
        RepositoryMetadata::from_upstream(snapshot(name))
    }

    pub fn commit(repository_name: &str, sha: &str) -> Commit {
        let date: DateTime<Utc> = "2024-04-02T10:00:00Z".parse().unwrap();
        Commit {
            commit_id: sha.to_string(),
            message: format!("commit {}", sha),
            author: "Rob Pike".to_string(),
            date,
            url: format!("https://github.com/{}/commit/{}", repository_name, sha),
            repository_name: repository_name.to_string(),
            created_at: date,
            updated_at: date,
        }
    }
}
