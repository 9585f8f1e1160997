//! Database repository layer
//!
//! Provides query and insert operations for repositories and commits, and
//! implements the [`RepositoryStore`] and [`CommitStore`] interfaces used by
//! the ingestion engine.

use crate::error::{Error, Result};
use crate::store::{CommitStore, RepositoryStore};
use crate::types::*;
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::PathBuf;
use std::sync::Mutex;

/// Database handle with connection pooling (single connection for now)
pub struct Database {
    conn: Mutex<Connection>,
}

/// Fixed-width UTC timestamp so text ordering matches time ordering.
fn format_ts(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn parse_ts(value: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

/// Map unique/primary-key violations to [`Error::DuplicateKey`].
fn classify_insert_error(err: rusqlite::Error, key: &str) -> Error {
    if let rusqlite::Error::SqliteFailure(ref failure, _) = err {
        if failure.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
            || failure.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_PRIMARYKEY
        {
            return Error::DuplicateKey(key.to_string());
        }
    }
    Error::Persistence(err)
}

impl Database {
    /// Open or create a database at the given path
    pub fn open(path: &PathBuf) -> Result<Self> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;

        // Enable foreign keys and WAL mode for better concurrency
        conn.execute_batch(
            "
            PRAGMA foreign_keys = ON;
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA busy_timeout = 5000;
            ",
        )?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Open an in-memory database (for testing)
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute("PRAGMA foreign_keys = ON", [])?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Run migrations on this database
    pub fn migrate(&self) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        super::schema::run_migrations(&conn)
    }

    // ============================================
    // Repository operations
    // ============================================

    /// Insert a new repository record
    pub fn insert_repository(&self, repo: &RepositoryMetadata) -> Result<RepositoryMetadata> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            r#"
            INSERT INTO repositories (
                public_id, name, description, url, language,
                forks_count, stars_count, open_issues_count, watchers_count,
                last_fetched_commit, last_fetched_page, is_fetching,
                created_at, updated_at
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)
            "#,
            params![
                repo.public_id,
                repo.name,
                repo.description,
                repo.url,
                repo.language,
                repo.forks_count,
                repo.stars_count,
                repo.open_issues_count,
                repo.watchers_count,
                repo.cursor.last_fetched_commit,
                repo.cursor.last_fetched_page,
                repo.is_fetching,
                format_ts(&repo.created_at),
                format_ts(&repo.updated_at),
            ],
        )
        .map_err(|e| classify_insert_error(e, &repo.name))?;

        conn.query_row(
            "SELECT * FROM repositories WHERE public_id = ?",
            [&repo.public_id],
            Self::row_to_repository,
        )
        .map_err(Error::from)
    }

    /// Update the cursor pair and fetching flag of a repository
    pub fn update_repository_cursor(
        &self,
        name: &str,
        cursor: &SyncCursor,
        is_fetching: bool,
    ) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        let changed = conn.execute(
            r#"
            UPDATE repositories
            SET last_fetched_commit = ?1,
                last_fetched_page = ?2,
                is_fetching = ?3,
                updated_at = ?4
            WHERE name = ?5
            "#,
            params![
                cursor.last_fetched_commit,
                cursor.last_fetched_page,
                is_fetching,
                format_ts(&Utc::now()),
                name,
            ],
        )?;

        if changed == 0 {
            return Err(Error::NotFound(format!("repository {}", name)));
        }
        Ok(())
    }

    /// Get a repository by its `owner/repo` name
    pub fn get_repository_by_name(&self, name: &str) -> Result<Option<RepositoryMetadata>> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT * FROM repositories WHERE name = ?",
            [name],
            Self::row_to_repository,
        )
        .optional()
        .map_err(Error::from)
    }

    /// Get a repository by its public id
    pub fn get_repository_by_public_id(
        &self,
        public_id: &str,
    ) -> Result<Option<RepositoryMetadata>> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT * FROM repositories WHERE public_id = ?",
            [public_id],
            Self::row_to_repository,
        )
        .optional()
        .map_err(Error::from)
    }

    /// List all tracked repositories in insertion order
    pub fn list_repositories(&self) -> Result<Vec<RepositoryMetadata>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare("SELECT * FROM repositories ORDER BY id ASC")?;
        let repos = stmt
            .query_map([], Self::row_to_repository)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(repos)
    }

    fn row_to_repository(row: &Row) -> rusqlite::Result<RepositoryMetadata> {
        let created_at: String = row.get("created_at")?;
        let updated_at: String = row.get("updated_at")?;

        Ok(RepositoryMetadata {
            public_id: row.get("public_id")?,
            name: row.get("name")?,
            description: row.get("description")?,
            url: row.get("url")?,
            language: row.get("language")?,
            forks_count: row.get("forks_count")?,
            stars_count: row.get("stars_count")?,
            open_issues_count: row.get("open_issues_count")?,
            watchers_count: row.get("watchers_count")?,
            cursor: SyncCursor {
                last_fetched_commit: row.get("last_fetched_commit")?,
                last_fetched_page: row.get("last_fetched_page")?,
            },
            is_fetching: row.get("is_fetching")?,
            created_at: parse_ts(&created_at),
            updated_at: parse_ts(&updated_at),
        })
    }

    // ============================================
    // Commit operations
    // ============================================

    /// Insert a commit
    ///
    /// Returns [`Error::DuplicateKey`] if the commit id is already stored.
    pub fn insert_commit(&self, commit: &Commit) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            r#"
            INSERT INTO commits (
                commit_id, message, author, date, url, repository_name,
                created_at, updated_at
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            "#,
            params![
                commit.commit_id,
                commit.message,
                commit.author,
                format_ts(&commit.date),
                commit.url,
                commit.repository_name,
                format_ts(&commit.created_at),
                format_ts(&commit.updated_at),
            ],
        )
        .map_err(|e| classify_insert_error(e, &commit.commit_id))?;
        Ok(())
    }

    /// Get a commit by its upstream id
    pub fn get_commit(&self, commit_id: &str) -> Result<Option<Commit>> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT * FROM commits WHERE commit_id = ?",
            [commit_id],
            Self::row_to_commit,
        )
        .optional()
        .map_err(Error::from)
    }

    /// Count stored commits for a repository
    pub fn count_commits(&self, repository_name: &str) -> Result<i64> {
        let conn = self.conn.lock().unwrap();
        let count = conn.query_row(
            "SELECT COUNT(*) FROM commits WHERE repository_name = ?",
            [repository_name],
            |r| r.get(0),
        )?;
        Ok(count)
    }

    /// List stored commits for a repository ordered by commit date
    pub fn list_commits(&self, repository_name: &str, page: &PageRequest) -> Result<CommitListing> {
        let total_count = self.count_commits(repository_name)?;

        let conn = self.conn.lock().unwrap();
        // Direction is an enum-derived literal, never user text.
        let sql = format!(
            "SELECT * FROM commits WHERE repository_name = ?1 ORDER BY date {dir}, id {dir} LIMIT ?2 OFFSET ?3",
            dir = page.direction.as_sql()
        );
        let mut stmt = conn.prepare(&sql)?;
        let commits = stmt
            .query_map(
                params![repository_name, page.limit, page.offset() as i64],
                Self::row_to_commit,
            )?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let consumed = page.offset() as i64 + commits.len() as i64;
        Ok(CommitListing {
            page_info: PageInfo {
                total_count,
                page: page.page.max(1),
                has_next_page: consumed < total_count,
                count: commits.len(),
            },
            commits,
        })
    }

    /// Authors with the most stored commits for a repository
    pub fn top_commit_authors(
        &self,
        repository_name: &str,
        limit: u32,
    ) -> Result<Vec<AuthorCommitCount>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            r#"
            SELECT author, COUNT(*) AS commit_count
            FROM commits
            WHERE repository_name = ?1
            GROUP BY author
            ORDER BY commit_count DESC, author ASC
            LIMIT ?2
            "#,
        )?;
        let authors = stmt
            .query_map(params![repository_name, limit], |row| {
                Ok(AuthorCommitCount {
                    author: row.get(0)?,
                    commit_count: row.get(1)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(authors)
    }

    fn row_to_commit(row: &Row) -> rusqlite::Result<Commit> {
        let date: String = row.get("date")?;
        let created_at: String = row.get("created_at")?;
        let updated_at: String = row.get("updated_at")?;

        Ok(Commit {
            commit_id: row.get("commit_id")?,
            message: row.get("message")?,
            author: row.get("author")?,
            date: parse_ts(&date),
            url: row.get("url")?,
            repository_name: row.get("repository_name")?,
            created_at: parse_ts(&created_at),
            updated_at: parse_ts(&updated_at),
        })
    }
}

impl RepositoryStore for Database {
    fn save(&self, repository: &RepositoryMetadata) -> Result<RepositoryMetadata> {
        self.insert_repository(repository)
    }

    fn update_cursor_and_flags(
        &self,
        name: &str,
        cursor: &SyncCursor,
        is_fetching: bool,
    ) -> Result<()> {
        self.update_repository_cursor(name, cursor, is_fetching)
    }

    fn find_by_name(&self, name: &str) -> Result<RepositoryMetadata> {
        self.get_repository_by_name(name)?
            .ok_or_else(|| Error::NotFound(format!("repository {}", name)))
    }

    fn find_by_public_id(&self, public_id: &str) -> Result<RepositoryMetadata> {
        self.get_repository_by_public_id(public_id)?
            .ok_or_else(|| Error::NotFound(format!("repository id {}", public_id)))
    }

    fn list_all(&self) -> Result<Vec<RepositoryMetadata>> {
        self.list_repositories()
    }
}

impl CommitStore for Database {
    fn save(&self, commit: &Commit) -> Result<CommitSave> {
        match self.insert_commit(commit) {
            Ok(()) => Ok(CommitSave::Inserted),
            Err(Error::DuplicateKey(_)) => Ok(CommitSave::AlreadyPresent),
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn create_test_repository(name: &str) -> RepositoryMetadata {
        RepositoryMetadata::from_upstream(RepositorySnapshot {
            name: name.to_string(),
            description: "The Go programming language".to_string(),
            url: format!("https://github.com/{}", name),
            language: "Go".to_string(),
            forks_count: 10,
            stars_count: 100,
            open_issues_count: 5,
            watchers_count: 100,
        })
    }

    fn create_test_commit(repo: &str, id: &str, author: &str, minutes: i64) -> Commit {
        let base = DateTime::parse_from_rfc3339("2024-03-01T12:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        Commit {
            commit_id: id.to_string(),
            message: format!("commit {}", id),
            author: author.to_string(),
            date: base + Duration::minutes(minutes),
            url: format!("https://github.com/{}/commit/{}", repo, id),
            repository_name: repo.to_string(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn test_db() -> Database {
        let db = Database::open_in_memory().unwrap();
        db.migrate().unwrap();
        db
    }

    #[test]
    fn test_repository_crud() {
        let db = test_db();
        let repo = create_test_repository("golang/go");

        let saved = RepositoryStore::save(&db, &repo).unwrap();
        assert_eq!(saved.public_id, repo.public_id);
        assert_eq!(saved.cursor, SyncCursor::default());

        let by_name = db.find_by_name("golang/go").unwrap();
        assert_eq!(by_name.public_id, repo.public_id);
        assert_eq!(by_name.language, "Go");

        let by_id = db.find_by_public_id(&repo.public_id).unwrap();
        assert_eq!(by_id.name, "golang/go");

        assert_eq!(db.list_all().unwrap().len(), 1);
    }

    #[test]
    fn test_repository_lookups_fail_with_not_found() {
        let db = test_db();
        assert!(matches!(db.find_by_name("nope/nope"), Err(Error::NotFound(_))));
        assert!(matches!(
            db.find_by_public_id("missing"),
            Err(Error::NotFound(_))
        ));
    }

    #[test]
    fn test_duplicate_repository_name_is_classified() {
        let db = test_db();
        RepositoryStore::save(&db, &create_test_repository("golang/go")).unwrap();

        let again = RepositoryStore::save(&db, &create_test_repository("golang/go"));
        assert!(matches!(again, Err(Error::DuplicateKey(_))));
    }

    #[test]
    fn test_update_cursor_and_flags() {
        let db = test_db();
        let repo = create_test_repository("golang/go");
        RepositoryStore::save(&db, &repo).unwrap();

        let cursor = SyncCursor {
            last_fetched_commit: "abc123".to_string(),
            last_fetched_page: 4,
        };
        db.update_cursor_and_flags("golang/go", &cursor, true).unwrap();

        let stored = db.find_by_name("golang/go").unwrap();
        assert_eq!(stored.cursor, cursor);
        assert!(stored.is_fetching);

        db.update_cursor_and_flags("golang/go", &cursor, false).unwrap();
        assert!(!db.find_by_name("golang/go").unwrap().is_fetching);

        assert!(matches!(
            db.update_cursor_and_flags("other/repo", &cursor, false),
            Err(Error::NotFound(_))
        ));
    }

    #[test]
    fn test_commit_save_is_idempotent() {
        let db = test_db();
        RepositoryStore::save(&db, &create_test_repository("golang/go")).unwrap();

        let commit = create_test_commit("golang/go", "c1", "rob", 0);
        assert_eq!(CommitStore::save(&db, &commit).unwrap(), CommitSave::Inserted);
        assert_eq!(
            CommitStore::save(&db, &commit).unwrap(),
            CommitSave::AlreadyPresent
        );
        assert_eq!(db.count_commits("golang/go").unwrap(), 1);

        // The raw insert surfaces the typed error instead.
        assert!(matches!(
            db.insert_commit(&commit),
            Err(Error::DuplicateKey(id)) if id == "c1"
        ));
    }

    #[test]
    fn test_commit_for_unknown_repository_is_a_persistence_error() {
        let db = test_db();
        let commit = create_test_commit("ghost/repo", "c1", "rob", 0);
        assert!(matches!(
            CommitStore::save(&db, &commit),
            Err(Error::Persistence(_))
        ));
    }

    #[test]
    fn test_list_commits_paginates_by_date() {
        let db = test_db();
        RepositoryStore::save(&db, &create_test_repository("golang/go")).unwrap();
        for i in 0..5 {
            let commit = create_test_commit("golang/go", &format!("c{}", i), "rob", i);
            db.insert_commit(&commit).unwrap();
        }

        let first = db
            .list_commits(
                "golang/go",
                &PageRequest {
                    page: 1,
                    limit: 2,
                    direction: SortDirection::Desc,
                },
            )
            .unwrap();
        assert_eq!(first.page_info.total_count, 5);
        assert_eq!(first.page_info.count, 2);
        assert!(first.page_info.has_next_page);
        assert_eq!(first.commits[0].commit_id, "c4");
        assert_eq!(first.commits[1].commit_id, "c3");

        let last = db
            .list_commits(
                "golang/go",
                &PageRequest {
                    page: 3,
                    limit: 2,
                    direction: SortDirection::Desc,
                },
            )
            .unwrap();
        assert_eq!(last.page_info.count, 1);
        assert!(!last.page_info.has_next_page);
        assert_eq!(last.commits[0].commit_id, "c0");

        let ascending = db
            .list_commits(
                "golang/go",
                &PageRequest {
                    page: 1,
                    limit: 10,
                    direction: SortDirection::Asc,
                },
            )
            .unwrap();
        assert_eq!(ascending.commits.first().unwrap().commit_id, "c0");
    }

    #[test]
    fn test_top_commit_authors() {
        let db = test_db();
        RepositoryStore::save(&db, &create_test_repository("golang/go")).unwrap();
        RepositoryStore::save(&db, &create_test_repository("rust-lang/rust")).unwrap();

        let authored = [("c1", "rob"), ("c2", "ken"), ("c3", "rob"), ("c4", "ian")];
        for (i, (id, author)) in authored.iter().enumerate() {
            db.insert_commit(&create_test_commit("golang/go", id, author, i as i64))
                .unwrap();
        }
        db.insert_commit(&create_test_commit("rust-lang/rust", "r1", "rob", 0))
            .unwrap();

        let top = db.top_commit_authors("golang/go", 2).unwrap();
        assert_eq!(
            top,
            vec![
                AuthorCommitCount {
                    author: "rob".to_string(),
                    commit_count: 2
                },
                AuthorCommitCount {
                    author: "ian".to_string(),
                    commit_count: 1
                },
            ]
        );
    }
}
