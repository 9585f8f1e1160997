//! repotrail - incremental commit history mirror
//!
//! This tool provides commands for:
//! - Running sync loops for every tracked repository (`serve`)
//! - Adding a repository and running its first pass (`add`)
//! - Inspecting tracked repositories, stored commits and top authors
//!
//! Uses XDG Base Directory specification for file locations:
//! - Database: $XDG_DATA_HOME/repotrail/data.db (~/.local/share/repotrail/data.db)
//! - Logs: $XDG_STATE_HOME/repotrail/repotrail.log (~/.local/state/repotrail/repotrail.log)
//! - Config: $XDG_CONFIG_HOME/repotrail/config.toml (~/.config/repotrail/config.toml)

mod process_lock;

use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use process_lock::acquire_serve_guard;
use repotrail_core::ingest::{IngestConfig, IngestionCoordinator, PassOutcome, PassReport};
use repotrail_core::types::{PageRequest, RepositoryMetadata, SortDirection};
use repotrail_core::upstream::{GithubClient, RateLimitSnapshot};
use repotrail_core::{Config, Database, RepositoryStore};

#[derive(Parser)]
#[command(name = "repotrail")]
#[command(about = "Mirror and query commit history from upstream repositories")]
#[command(version)]
struct Args {
    /// Mirror log output to stderr
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Print query results as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Keep every tracked repository in sync until interrupted
    Serve,

    /// Start tracking a repository (owner/repo)
    Add {
        /// Repository in owner/repo form
        name: String,

        /// Only register the repository, skip the first sync pass
        #[arg(long)]
        no_sync: bool,
    },

    /// List tracked repositories and their sync cursors
    Repos,

    /// List stored commits for a repository
    Commits {
        /// Repository public id (see `repotrail repos`)
        public_id: String,

        /// Page number (1-based)
        #[arg(short, long, default_value = "1")]
        page: u32,

        /// Commits per page
        #[arg(short, long, default_value = "10")]
        limit: u32,

        /// Oldest first
        #[arg(long)]
        asc: bool,
    },

    /// Show the authors with the most stored commits
    Authors {
        /// Repository public id (see `repotrail repos`)
        public_id: String,

        /// Number of authors to show
        #[arg(short, long, default_value = "10")]
        limit: u32,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Ensure XDG environment variables are set before using core library
    Config::ensure_xdg_env();

    // Load configuration
    let config = Config::load().context("failed to load configuration")?;

    // Initialize logging
    let _log_guard = repotrail_core::logging::init(&config.logging, args.verbose)
        .context("failed to initialize logging")?;

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "repotrail starting");

    match args.command {
        Command::Serve => cmd_serve(&config).await,
        Command::Add { name, no_sync } => cmd_add(&config, &name, no_sync, args.json).await,
        Command::Repos => cmd_repos(args.json),
        Command::Commits {
            public_id,
            page,
            limit,
            asc,
        } => {
            let request = PageRequest {
                page,
                limit,
                direction: if asc {
                    SortDirection::Asc
                } else {
                    SortDirection::Desc
                },
            };
            cmd_commits(&public_id, &request, args.json)
        }
        Command::Authors { public_id, limit } => cmd_authors(&public_id, limit, args.json),
    }
}

/// Open the XDG database and bring its schema up to date.
fn open_database() -> Result<Arc<Database>> {
    let db_path = Config::database_path();
    tracing::info!(path = %db_path.display(), "Opening database");

    let db = Database::open(&db_path).context("failed to open database")?;
    db.migrate().context("failed to run database migrations")?;
    Ok(Arc::new(db))
}

/// Build the coordinator, keeping a handle on the client for rate-limit reporting.
fn build_coordinator(
    config: &Config,
    db: Arc<Database>,
) -> Result<(IngestionCoordinator, Arc<GithubClient>)> {
    let upstream = Arc::new(
        GithubClient::new(config.upstream.clone()).context("failed to create upstream client")?,
    );
    let ingest = IngestConfig::from_sync_config(&config.sync, Utc::now());

    let coordinator = IngestionCoordinator::new(upstream.clone(), db.clone(), db, ingest)
        .with_default_repository(config.sync.default_repository.clone());
    Ok((coordinator, upstream))
}

fn find_repository(db: &Database, public_id: &str) -> Result<RepositoryMetadata> {
    RepositoryStore::find_by_public_id(db, public_id)
        .with_context(|| format!("no tracked repository with id {}", public_id))
}

async fn cmd_serve(config: &Config) -> Result<()> {
    // Resolve database path and enforce process-level exclusivity for it.
    let db_path = Config::database_path();
    let _serve_guard = acquire_serve_guard(&db_path).context("failed to acquire process lock")?;

    let db = open_database()?;
    let (coordinator, upstream) = build_coordinator(config, db)?;

    // Set up signal handler for graceful shutdown
    let cancel = coordinator.supervisor().cancel_token();
    let on_signal = cancel.clone();
    ctrlc::set_handler(move || {
        eprintln!("\nShutting down...");
        on_signal.cancel();
    })
    .context("failed to set Ctrl+C handler")?;

    if let Some(seeded) = coordinator
        .seed_default_repository()
        .await
        .context("failed to add default repository")?
    {
        println!("Added default repository {} ({})", seeded.name, seeded.public_id);
    }

    coordinator
        .resume_all_repositories()
        .context("failed to resume repositories")?;

    println!(
        "Syncing {} repositories every {}s. Press Ctrl+C to stop.",
        coordinator.supervisor().scheduled_count(),
        config.sync.interval_secs
    );

    cancel.cancelled().await;

    println!("Waiting for in-flight passes to finish...");
    coordinator.shutdown().await;

    let rate_limit = upstream.rate_limit();
    tracing::info!(
        limit = ?rate_limit.limit,
        remaining = ?rate_limit.remaining,
        reset_at = ?rate_limit.reset_at,
        "repotrail serve stopped"
    );
    Ok(())
}

async fn cmd_add(config: &Config, name: &str, no_sync: bool, json: bool) -> Result<()> {
    let db = open_database()?;
    let (coordinator, upstream) = build_coordinator(config, db)?;

    let repository = coordinator
        .register_repository(name)
        .await
        .with_context(|| format!("failed to add repository {}", name))?;

    if !json {
        println!("Added {} ({})", repository.name, repository.public_id);
    }

    if no_sync {
        if json {
            println!("{}", serde_json::to_string_pretty(&repository)?);
        }
        return Ok(());
    }

    let report = coordinator.ingestor().run_pass(&repository).await;
    let rate_limit = upstream.rate_limit();

    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&serde_json::json!({
                "repository": repository,
                "pass": pass_report_json(&report),
                "rate_limit": rate_limit_json(&rate_limit),
            }))?
        );
    } else {
        print_pass_report(&report);
        print_rate_limit(&rate_limit);
    }

    if let PassOutcome::Aborted(reason) = &report.outcome {
        anyhow::bail!("first sync pass for {} aborted: {}", repository.name, reason);
    }
    Ok(())
}

fn cmd_repos(json: bool) -> Result<()> {
    let db = open_database()?;
    let repositories = db.list_repositories().context("failed to list repositories")?;

    if json {
        println!("{}", serde_json::to_string_pretty(&repositories)?);
        return Ok(());
    }

    if repositories.is_empty() {
        println!("No repositories tracked. Add one with `repotrail add owner/repo`.");
        return Ok(());
    }

    println!(
        "{:<36}  {:<32}  {:>8}  {:>5}  {:<12}  {}",
        "ID", "NAME", "COMMITS", "PAGE", "LAST COMMIT", "STATE"
    );
    for repo in &repositories {
        let commits = db.count_commits(&repo.name).unwrap_or(0);
        let last_commit: String = repo.cursor.last_fetched_commit.chars().take(12).collect();
        println!(
            "{:<36}  {:<32}  {:>8}  {:>5}  {:<12}  {}",
            repo.public_id,
            repo.name,
            commits,
            repo.cursor.last_fetched_page,
            if last_commit.is_empty() { "-".to_string() } else { last_commit },
            if repo.is_fetching { "fetching" } else { "idle" }
        );
    }

    Ok(())
}

fn cmd_commits(public_id: &str, request: &PageRequest, json: bool) -> Result<()> {
    let db = open_database()?;
    let repository = find_repository(&db, public_id)?;
    let listing = db
        .list_commits(&repository.name, request)
        .context("failed to list commits")?;

    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&serde_json::json!({
                "commits": listing.commits,
                "page_info": listing.page_info,
            }))?
        );
        return Ok(());
    }

    println!(
        "{} - page {} ({} of {} commits)",
        repository.name,
        listing.page_info.page,
        listing.page_info.count,
        listing.page_info.total_count
    );
    println!();

    for commit in &listing.commits {
        let sha: String = commit.commit_id.chars().take(10).collect();
        let subject = commit.message.lines().next().unwrap_or("");
        println!(
            "{}  {}  {:<20}  {}",
            sha,
            commit.date.format("%Y-%m-%d %H:%M"),
            truncate(&commit.author, 20),
            subject
        );
    }

    if listing.page_info.has_next_page {
        println!();
        println!("More commits available: --page {}", listing.page_info.page + 1);
    }

    Ok(())
}

fn cmd_authors(public_id: &str, limit: u32, json: bool) -> Result<()> {
    let db = open_database()?;
    let repository = find_repository(&db, public_id)?;
    let authors = db
        .top_commit_authors(&repository.name, limit)
        .context("failed to query commit authors")?;

    if json {
        println!("{}", serde_json::to_string_pretty(&authors)?);
        return Ok(());
    }

    println!("Top commit authors for {}", repository.name);
    println!();
    for (rank, author) in authors.iter().enumerate() {
        println!("{:>3}. {:<32} {:>6}", rank + 1, author.author, author.commit_count);
    }

    Ok(())
}

fn print_pass_report(report: &PassReport) {
    println!();
    match &report.outcome {
        PassOutcome::Exhausted => println!("Sync complete:"),
        PassOutcome::CaughtUp => println!("Sync complete (caught up):"),
        PassOutcome::Aborted(reason) => println!("Sync aborted: {}", reason),
    }
    println!("  Pages fetched:        {}", report.pages_fetched);
    println!("  Commits inserted:     {}", report.commits_inserted);
    println!("  Already present:      {}", report.commits_already_present);
    if report.commits_failed > 0 {
        println!("  Failed:               {}", report.commits_failed);
    }
}

fn print_rate_limit(rate_limit: &RateLimitSnapshot) {
    if let (Some(remaining), Some(limit)) = (rate_limit.remaining, rate_limit.limit) {
        print!("  Rate limit remaining: {}/{}", remaining, limit);
        match rate_limit.reset_at {
            Some(reset_at) => println!(" (resets {})", reset_at.format("%H:%M:%S UTC")),
            None => println!(),
        }
    }
}

fn rate_limit_json(rate_limit: &RateLimitSnapshot) -> serde_json::Value {
    serde_json::json!({
        "limit": rate_limit.limit,
        "remaining": rate_limit.remaining,
        "used": rate_limit.used,
        "reset_at": rate_limit.reset_at,
    })
}

fn pass_report_json(report: &PassReport) -> serde_json::Value {
    let (outcome, reason) = match &report.outcome {
        PassOutcome::Exhausted => ("exhausted", None),
        PassOutcome::CaughtUp => ("caught_up", None),
        PassOutcome::Aborted(reason) => ("aborted", Some(reason.as_str())),
    };
    serde_json::json!({
        "pages_fetched": report.pages_fetched,
        "commits_inserted": report.commits_inserted,
        "commits_already_present": report.commits_already_present,
        "commits_failed": report.commits_failed,
        "outcome": outcome,
        "reason": reason,
    })
}

fn truncate(value: &str, max_chars: usize) -> String {
    if value.chars().count() <= max_chars {
        return value.to_string();
    }
    let mut out: String = value.chars().take(max_chars.saturating_sub(3)).collect();
    out.push_str("...");
    out
}
