//! Entry points for adding and resuming tracked repositories

use std::sync::Arc;

use crate::error::{Error, Result};
use crate::store::{CommitStore, RepositoryStore};
use crate::types::{is_valid_repository_name, RepositoryMetadata};
use crate::upstream::UpstreamClient;

use super::ingestor::{CommitIngestor, IngestConfig};
use super::scheduler::{RepositorySyncScheduler, SyncSupervisor};

/// Registers repositories and keeps a sync loop running for each.
///
/// The coordinator is responsible for:
/// - Validating names and refusing repositories that are already tracked
/// - Fetching upstream metadata and persisting the new record
/// - Starting loops for new repositories and for everything stored at startup
pub struct IngestionCoordinator {
    upstream: Arc<dyn UpstreamClient>,
    repositories: Arc<dyn RepositoryStore>,
    ingestor: Arc<CommitIngestor>,
    supervisor: SyncSupervisor,
    default_repository: Option<String>,
}

impl IngestionCoordinator {
    pub fn new(
        upstream: Arc<dyn UpstreamClient>,
        repositories: Arc<dyn RepositoryStore>,
        commits: Arc<dyn CommitStore>,
        config: IngestConfig,
    ) -> Self {
        let interval = config.interval;
        let ingestor = Arc::new(CommitIngestor::new(
            Arc::clone(&upstream),
            Arc::clone(&repositories),
            commits,
            config,
        ));
        let scheduler = Arc::new(RepositorySyncScheduler::new(
            Arc::clone(&ingestor),
            Arc::clone(&repositories),
            interval,
        ));

        Self {
            upstream,
            repositories,
            ingestor,
            supervisor: SyncSupervisor::new(scheduler),
            default_repository: None,
        }
    }

    /// Repository to add on startup via [`Self::seed_default_repository`].
    pub fn with_default_repository(mut self, name: Option<String>) -> Self {
        self.default_repository = name.filter(|n| !n.trim().is_empty());
        self
    }

    pub fn ingestor(&self) -> &CommitIngestor {
        &self.ingestor
    }

    pub fn supervisor(&self) -> &SyncSupervisor {
        &self.supervisor
    }

    /// Start tracking `name` and schedule its sync loop.
    ///
    /// The first pass starts in the background; the returned record carries
    /// the empty cursor it was saved with.
    pub async fn add_repository(&self, name: &str) -> Result<RepositoryMetadata> {
        let saved = self.register_repository(name).await?;
        self.supervisor.schedule(saved.clone());
        Ok(saved)
    }

    /// Validate, fetch metadata and persist `name` without scheduling it.
    pub async fn register_repository(&self, name: &str) -> Result<RepositoryMetadata> {
        if !is_valid_repository_name(name) {
            return Err(Error::InvalidRepositoryName(name.to_string()));
        }

        match self.repositories.find_by_name(name) {
            Ok(_) => return Err(Error::AlreadyTracked(name.to_string())),
            Err(Error::NotFound(_)) => {}
            Err(e) => return Err(e),
        }

        tracing::info!(repository = %name, "Fetching repository metadata");
        let mut snapshot = self.upstream.fetch_repository_metadata(name).await?;
        if snapshot.name.is_empty() {
            snapshot.name = name.to_string();
        }

        let record = RepositoryMetadata::from_upstream(snapshot);
        let saved = match self.repositories.save(&record) {
            Ok(saved) => saved,
            Err(Error::DuplicateKey(_)) => return Err(Error::AlreadyTracked(record.name)),
            Err(e) => return Err(e),
        };

        tracing::info!(
            repository = %saved.name,
            public_id = %saved.public_id,
            "Repository added"
        );
        Ok(saved)
    }

    /// Schedule a loop for every stored repository.
    ///
    /// Returns the number of loops started.
    pub fn resume_all_repositories(&self) -> Result<usize> {
        let repositories = self.repositories.list_all()?;
        let mut scheduled = 0;

        for repository in repositories {
            if repository.is_fetching {
                tracing::warn!(
                    repository = %repository.name,
                    page = repository.cursor.last_fetched_page,
                    "Repository was mid-pass at shutdown, resuming from stored cursor"
                );
            }
            if self.supervisor.schedule(repository) {
                scheduled += 1;
            }
        }

        tracing::info!(count = scheduled, "Resumed repositories");
        Ok(scheduled)
    }

    /// Add the configured default repository, if any.
    ///
    /// A repository that is already tracked counts as seeded.
    pub async fn seed_default_repository(&self) -> Result<Option<RepositoryMetadata>> {
        let Some(name) = self.default_repository.as_deref() else {
            return Ok(None);
        };

        match self.add_repository(name).await {
            Ok(saved) => Ok(Some(saved)),
            Err(Error::AlreadyTracked(_)) => {
                tracing::debug!(repository = %name, "Default repository already tracked");
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// Stop every loop and wait for in-flight passes to finish.
    pub async fn shutdown(&self) {
        self.supervisor.shutdown().await;
    }
}
