//! Periodic sync loops, one per tracked repository

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::task::JoinSet;
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::store::RepositoryStore;
use crate::types::RepositoryMetadata;

use super::ingestor::CommitIngestor;

/// Runs a repository's passes on a fixed interval.
///
/// ```text
/// register ─► pass ─► wait interval ─► re-read ─► pass ─► ...
/// ```
///
/// Cancellation is checked between passes only; a pass in flight finishes.
pub struct RepositorySyncScheduler {
    ingestor: Arc<CommitIngestor>,
    repositories: Arc<dyn RepositoryStore>,
    interval: Duration,
}

impl RepositorySyncScheduler {
    pub fn new(
        ingestor: Arc<CommitIngestor>,
        repositories: Arc<dyn RepositoryStore>,
        interval: Duration,
    ) -> Self {
        Self {
            ingestor,
            repositories,
            interval,
        }
    }

    /// Run the loop for `repository` until `cancel` fires.
    pub async fn run(&self, repository: RepositoryMetadata, cancel: CancellationToken) {
        let mut snapshot = repository;
        tracing::info!(
            repository = %snapshot.name,
            interval_secs = self.interval.as_secs(),
            "Sync loop started"
        );

        self.ingestor.run_pass(&snapshot).await;

        let mut ticker = time::interval_at(Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    // Pick up cursor changes made by the previous pass.
                    match self.repositories.find_by_public_id(&snapshot.public_id) {
                        Ok(current) => snapshot = current,
                        Err(e) => {
                            tracing::warn!(
                                repository = %snapshot.name,
                                error = %e,
                                "Failed to reload repository, using last known state"
                            );
                        }
                    }
                    self.ingestor.run_pass(&snapshot).await;
                }
            }
        }

        tracing::info!(repository = %snapshot.name, "Sync loop stopped");
    }
}

/// Owns every sync loop task and the token that stops them.
pub struct SyncSupervisor {
    scheduler: Arc<RepositorySyncScheduler>,
    tasks: Mutex<JoinSet<String>>,
    tracked: Mutex<HashSet<String>>,
    cancel: CancellationToken,
}

impl SyncSupervisor {
    pub fn new(scheduler: Arc<RepositorySyncScheduler>) -> Self {
        Self {
            scheduler,
            tasks: Mutex::new(JoinSet::new()),
            tracked: Mutex::new(HashSet::new()),
            cancel: CancellationToken::new(),
        }
    }

    /// Spawn the loop for `repository`.
    ///
    /// Returns false, without spawning, when a loop for the same repository
    /// name already exists. Must be called from within a tokio runtime.
    pub fn schedule(&self, repository: RepositoryMetadata) -> bool {
        if !self.tracked.lock().unwrap().insert(repository.name.clone()) {
            tracing::debug!(repository = %repository.name, "Sync loop already running");
            return false;
        }

        let scheduler = Arc::clone(&self.scheduler);
        let cancel = self.cancel.clone();
        self.tasks.lock().unwrap().spawn(async move {
            let name = repository.name.clone();
            scheduler.run(repository, cancel).await;
            name
        });
        true
    }

    /// Number of repositories with a loop.
    pub fn scheduled_count(&self) -> usize {
        self.tracked.lock().unwrap().len()
    }

    pub fn is_scheduled(&self, name: &str) -> bool {
        self.tracked.lock().unwrap().contains(name)
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Cancel all loops and wait for them to finish.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        let mut tasks = std::mem::take(&mut *self.tasks.lock().unwrap());

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(name) => tracing::debug!(repository = %name, "Sync loop joined"),
                Err(e) => tracing::error!(error = %e, "Sync loop task failed"),
            }
        }
        self.tracked.lock().unwrap().clear();
    }
}
