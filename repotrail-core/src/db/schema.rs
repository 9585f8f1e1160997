//! Database schema and migrations
//!
//! Uses SQLite with embedded migrations managed via PRAGMA user_version.

use rusqlite::Connection;

/// Current schema version
pub const SCHEMA_VERSION: i32 = 2;

/// SQL migrations, indexed by version number
const MIGRATIONS: &[&str] = &[
    // Version 1: tracked repositories and their commits
    r#"
    CREATE TABLE IF NOT EXISTS repositories (
        id                  INTEGER PRIMARY KEY AUTOINCREMENT,
        public_id           TEXT NOT NULL UNIQUE,
        name                TEXT NOT NULL UNIQUE,
        description         TEXT NOT NULL DEFAULT '',
        url                 TEXT NOT NULL DEFAULT '',
        language            TEXT NOT NULL DEFAULT '',
        forks_count         INTEGER NOT NULL DEFAULT 0,
        stars_count         INTEGER NOT NULL DEFAULT 0,
        open_issues_count   INTEGER NOT NULL DEFAULT 0,
        watchers_count      INTEGER NOT NULL DEFAULT 0,

        -- Resumable cursor
        last_fetched_commit TEXT NOT NULL DEFAULT '',
        last_fetched_page   INTEGER NOT NULL DEFAULT 0,
        is_fetching         INTEGER NOT NULL DEFAULT 0,

        created_at          DATETIME NOT NULL,
        updated_at          DATETIME NOT NULL
    );

    CREATE TABLE IF NOT EXISTS commits (
        id               INTEGER PRIMARY KEY AUTOINCREMENT,
        commit_id        TEXT NOT NULL UNIQUE,
        message          TEXT NOT NULL,
        author           TEXT NOT NULL,
        date             DATETIME NOT NULL,
        url              TEXT NOT NULL,
        repository_name  TEXT NOT NULL REFERENCES repositories(name),
        created_at       DATETIME NOT NULL,
        updated_at       DATETIME NOT NULL
    );
    "#,
    // Version 2: read-side indexes for listings and author aggregation
    r#"
    CREATE INDEX IF NOT EXISTS idx_commits_repo_date ON commits(repository_name, date);
    CREATE INDEX IF NOT EXISTS idx_commits_repo_author ON commits(repository_name, author);
    "#,
];

/// Run all pending migrations
pub fn run_migrations(conn: &Connection) -> crate::error::Result<()> {
    let current_version: i32 = conn
        .query_row("PRAGMA user_version", [], |r| r.get(0))
        .unwrap_or(0);

    tracing::info!(
        current_version,
        target_version = SCHEMA_VERSION,
        "Checking database migrations"
    );

    for (i, migration) in MIGRATIONS.iter().enumerate() {
        let version = (i + 1) as i32;
        if version > current_version {
            tracing::info!(version, "Running migration");
            conn.execute_batch(migration)?;
            conn.execute(&format!("PRAGMA user_version = {}", version), [])?;
        }
    }

    if current_version < SCHEMA_VERSION {
        tracing::info!(
            from = current_version,
            to = SCHEMA_VERSION,
            "Migrations complete"
        );
    }

    Ok(())
}

/// Get current schema version
pub fn get_schema_version(conn: &Connection) -> crate::error::Result<i32> {
    let version: i32 = conn.query_row("PRAGMA user_version", [], |r| r.get(0))?;
    Ok(version)
}
