//! DuckDB-backed storage for seeds, forks, commits, bookmarks and pull requests.
//!
//! A single connection is shared behind a mutex, so every method observes and
//! mutates the database atomically with respect to other callers. Timestamps
//! are stored as epoch milliseconds.

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use duckdb::{params, Connection, Row};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::types::{
    Bookmark, BookmarkFields, BranchPoint, Chapter, Commit, ForkDeletion, InsertOutcome, NewCommit,
    NewStoryOption, PullRequest, PullRequestStatus, ReaderFork, StoryOption, StorySeed,
};

const MIGRATIONS: &str = r#"
CREATE SEQUENCE IF NOT EXISTS seq_story_seeds START 1;
CREATE SEQUENCE IF NOT EXISTS seq_chapters START 1;
CREATE SEQUENCE IF NOT EXISTS seq_branch_points START 1;
CREATE SEQUENCE IF NOT EXISTS seq_story_options START 1;
CREATE SEQUENCE IF NOT EXISTS seq_reader_forks START 1;
CREATE SEQUENCE IF NOT EXISTS seq_commits START 1;
CREATE SEQUENCE IF NOT EXISTS seq_bookmarks START 1;
CREATE SEQUENCE IF NOT EXISTS seq_pull_requests START 1;

CREATE TABLE IF NOT EXISTS story_seeds (
    id BIGINT NOT NULL,
    slug VARCHAR NOT NULL,
    title VARCHAR NOT NULL,
    opening VARCHAR,
    author VARCHAR NOT NULL,
    published BOOLEAN NOT NULL,
    created_at_ms BIGINT NOT NULL,
    updated_at_ms BIGINT NOT NULL
);

CREATE TABLE IF NOT EXISTS chapters (
    id BIGINT NOT NULL,
    story_seed_id BIGINT NOT NULL,
    sort_order INTEGER NOT NULL,
    title VARCHAR NOT NULL,
    content_markdown VARCHAR NOT NULL,
    created_at_ms BIGINT NOT NULL
);

CREATE TABLE IF NOT EXISTS branch_points (
    id BIGINT NOT NULL,
    story_seed_id BIGINT NOT NULL,
    fork_id BIGINT,
    sort_order INTEGER NOT NULL,
    anchor_text VARCHAR,
    created_at_ms BIGINT NOT NULL
);

CREATE TABLE IF NOT EXISTS story_options (
    id BIGINT NOT NULL,
    branch_point_id BIGINT NOT NULL,
    label VARCHAR NOT NULL,
    sort_order INTEGER NOT NULL,
    influence_notes VARCHAR,
    plot_hint VARCHAR,
    selection_count BIGINT NOT NULL
);

CREATE TABLE IF NOT EXISTS reader_forks (
    id BIGINT NOT NULL,
    story_seed_id BIGINT NOT NULL,
    reader VARCHAR NOT NULL,
    title VARCHAR NOT NULL,
    from_chapter_sort_order INTEGER,
    head_commit_id BIGINT,
    last_read_commit_id BIGINT,
    version BIGINT NOT NULL,
    created_at_ms BIGINT NOT NULL,
    updated_at_ms BIGINT NOT NULL
);

CREATE TABLE IF NOT EXISTS commits (
    id BIGINT NOT NULL,
    fork_id BIGINT NOT NULL,
    parent_commit_id BIGINT,
    branch_point_id BIGINT,
    option_id BIGINT,
    content_markdown VARCHAR NOT NULL,
    sort_order INTEGER NOT NULL,
    created_at_ms BIGINT NOT NULL
);

CREATE TABLE IF NOT EXISTS bookmarks (
    id BIGINT NOT NULL,
    fork_id BIGINT NOT NULL,
    reader VARCHAR NOT NULL,
    commit_id BIGINT,
    chapter_sort_order INTEGER,
    bookmark_name VARCHAR,
    notes VARCHAR,
    sort_order INTEGER NOT NULL,
    created_at_ms BIGINT NOT NULL,
    updated_at_ms BIGINT NOT NULL
);

CREATE TABLE IF NOT EXISTS pull_requests (
    id BIGINT NOT NULL,
    story_seed_id BIGINT NOT NULL,
    fork_id BIGINT NOT NULL,
    from_commit_id BIGINT,
    title VARCHAR,
    description VARCHAR,
    status VARCHAR NOT NULL,
    reviewed_by VARCHAR,
    created_at_ms BIGINT NOT NULL,
    updated_at_ms BIGINT NOT NULL
);
"#;

const SEED_COLUMNS: &str =
    "id, slug, title, opening, author, published, created_at_ms, updated_at_ms";
const CHAPTER_COLUMNS: &str =
    "id, story_seed_id, sort_order, title, content_markdown, created_at_ms";
const BRANCH_POINT_COLUMNS: &str =
    "id, story_seed_id, fork_id, sort_order, anchor_text, created_at_ms";
const OPTION_COLUMNS: &str =
    "id, branch_point_id, label, sort_order, influence_notes, plot_hint, selection_count";
const FORK_COLUMNS: &str = "id, story_seed_id, reader, title, from_chapter_sort_order, \
     head_commit_id, last_read_commit_id, version, created_at_ms, updated_at_ms";
const COMMIT_SELECT: &str = "SELECT c.id, c.fork_id, c.parent_commit_id, c.branch_point_id, \
     c.option_id, o.label, c.content_markdown, c.sort_order, c.created_at_ms \
     FROM commits c LEFT JOIN story_options o ON o.id = c.option_id";
const BOOKMARK_COLUMNS: &str = "id, fork_id, reader, commit_id, chapter_sort_order, \
     bookmark_name, notes, sort_order, created_at_ms, updated_at_ms";
const PULL_REQUEST_COLUMNS: &str = "id, story_seed_id, fork_id, from_commit_id, title, \
     description, status, reviewed_by, created_at_ms, updated_at_ms";

/// Shared handle to the storyfork database
#[derive(Clone)]
pub struct Persistence {
    conn: Arc<Mutex<Connection>>,
    db_path: PathBuf,
}

impl Persistence {
    /// Open (or create) the database file and apply migrations
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let db_path = db_path.as_ref().to_path_buf();
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).with_context(|| {
                    format!("Failed to create database directory: {}", parent.display())
                })?;
            }
        }
        let conn = Connection::open(&db_path)
            .with_context(|| format!("Failed to open database at {}", db_path.display()))?;
        Self::from_connection(conn, db_path)
    }

    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("Failed to open in-memory database")?;
        Self::from_connection(conn, PathBuf::from(":memory:"))
    }

    fn from_connection(conn: Connection, db_path: PathBuf) -> Result<Self> {
        conn.execute_batch(MIGRATIONS)
            .context("Failed to apply database migrations")?;
        tracing::debug!(path = %db_path.display(), "Database initialized");
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            db_path,
        })
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| anyhow!("database connection lock poisoned"))
    }

    // ---------- Story seeds & chapters ----------

    /// Insert a seed; returns `None` when the slug is already taken.
    pub fn insert_seed(
        &self,
        author: &str,
        slug: &str,
        title: &str,
        opening: Option<&str>,
    ) -> Result<Option<StorySeed>> {
        let conn = self.conn()?;
        if seed_by_slug(&conn, slug)?.is_some() {
            return Ok(None);
        }
        let id = next_id(&conn, "seq_story_seeds")?;
        let now = now_ms();
        conn.execute(
            "INSERT INTO story_seeds (id, slug, title, opening, author, published, created_at_ms, updated_at_ms)
             VALUES (?, ?, ?, ?, ?, FALSE, ?, ?)",
            params![id, slug, title, opening, author, now, now],
        )?;
        seed_by_id(&conn, id)
    }

    pub fn get_seed(&self, id: i64) -> Result<Option<StorySeed>> {
        let conn = self.conn()?;
        seed_by_id(&conn, id)
    }

    pub fn get_seed_by_slug(&self, slug: &str) -> Result<Option<StorySeed>> {
        let conn = self.conn()?;
        seed_by_slug(&conn, slug)
    }

    pub fn set_seed_published(&self, id: i64, published: bool) -> Result<Option<StorySeed>> {
        let conn = self.conn()?;
        conn.execute(
            "UPDATE story_seeds SET published = ?, updated_at_ms = ? WHERE id = ?",
            params![published, now_ms(), id],
        )?;
        seed_by_id(&conn, id)
    }

    /// Append a chapter at `count + 1`
    pub fn insert_chapter(&self, seed_id: i64, title: &str, content: &str) -> Result<Chapter> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let sort_order = chapter_count(&tx, seed_id)? + 1;
        let id = next_id(&tx, "seq_chapters")?;
        tx.execute(
            "INSERT INTO chapters (id, story_seed_id, sort_order, title, content_markdown, created_at_ms)
             VALUES (?, ?, ?, ?, ?, ?)",
            params![id, seed_id, sort_order, title, content, now_ms()],
        )?;
        tx.execute(
            "UPDATE story_seeds SET updated_at_ms = ? WHERE id = ?",
            params![now_ms(), seed_id],
        )?;
        let chapter = query_one(
            &tx,
            &format!("SELECT {CHAPTER_COLUMNS} FROM chapters WHERE id = ?"),
            params![id],
            chapter_from_row,
        )?
        .ok_or_else(|| anyhow!("chapter {id} vanished after insert"))?;
        tx.commit()?;
        Ok(chapter)
    }

    /// Chapters in order, optionally capped at `up_to` (inclusive)
    pub fn list_chapters(&self, seed_id: i64, up_to: Option<i32>) -> Result<Vec<Chapter>> {
        let conn = self.conn()?;
        match up_to {
            Some(limit) => query_all(
                &conn,
                &format!(
                    "SELECT {CHAPTER_COLUMNS} FROM chapters
                     WHERE story_seed_id = ? AND sort_order <= ? ORDER BY sort_order"
                ),
                params![seed_id, limit],
                chapter_from_row,
            ),
            None => query_all(
                &conn,
                &format!(
                    "SELECT {CHAPTER_COLUMNS} FROM chapters
                     WHERE story_seed_id = ? ORDER BY sort_order"
                ),
                params![seed_id],
                chapter_from_row,
            ),
        }
    }

    pub fn count_chapters(&self, seed_id: i64) -> Result<i32> {
        let conn = self.conn()?;
        chapter_count(&conn, seed_id)
    }

    // ---------- Branch points ----------

    pub fn insert_branch_point(
        &self,
        seed_id: i64,
        fork_id: Option<i64>,
        sort_order: i32,
        anchor_text: Option<&str>,
        options: &[NewStoryOption],
    ) -> Result<BranchPoint> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let id = next_id(&tx, "seq_branch_points")?;
        tx.execute(
            "INSERT INTO branch_points (id, story_seed_id, fork_id, sort_order, anchor_text, created_at_ms)
             VALUES (?, ?, ?, ?, ?, ?)",
            params![id, seed_id, fork_id, sort_order, anchor_text, now_ms()],
        )?;
        for option in options {
            let option_id = next_id(&tx, "seq_story_options")?;
            tx.execute(
                "INSERT INTO story_options (id, branch_point_id, label, sort_order, influence_notes, plot_hint, selection_count)
                 VALUES (?, ?, ?, ?, ?, ?, 0)",
                params![
                    option_id,
                    id,
                    option.label,
                    option.sort_order,
                    option.influence_notes,
                    option.plot_hint
                ],
            )?;
        }
        let branch_point = branch_point_by_id(&tx, id)?
            .ok_or_else(|| anyhow!("branch point {id} vanished after insert"))?;
        tx.commit()?;
        Ok(branch_point)
    }

    pub fn get_branch_point(&self, id: i64) -> Result<Option<BranchPoint>> {
        let conn = self.conn()?;
        branch_point_by_id(&conn, id)
    }

    /// Authored branch points of a seed plus those scoped to `fork_id`.
    ///
    /// Authored points sort before generated ones at the same position.
    pub fn list_branch_points(
        &self,
        seed_id: i64,
        fork_id: Option<i64>,
        position: Option<i32>,
    ) -> Result<Vec<BranchPoint>> {
        let conn = self.conn()?;
        let mut sql = format!(
            "SELECT {BRANCH_POINT_COLUMNS} FROM branch_points
             WHERE story_seed_id = ? AND (fork_id IS NULL OR fork_id = ?)"
        );
        if position.is_some() {
            sql.push_str(" AND sort_order = ?");
        }
        sql.push_str(" ORDER BY sort_order, fork_id NULLS FIRST, id");

        // A NULL fork id never matches `fork_id = ?`, leaving only authored rows.
        let mut points = match position {
            Some(position) => query_all(
                &conn,
                &sql,
                params![seed_id, fork_id, position],
                branch_point_from_row,
            )?,
            None => query_all(&conn, &sql, params![seed_id, fork_id], branch_point_from_row)?,
        };
        for point in &mut points {
            point.options = options_for(&conn, point.id)?;
        }
        Ok(points)
    }

    // ---------- Reader forks ----------

    /// Insert a fork unless the reader already owns one for this seed.
    pub fn insert_fork(
        &self,
        seed_id: i64,
        reader: &str,
        title: &str,
        from_chapter_sort_order: Option<i32>,
    ) -> Result<InsertOutcome<ReaderFork>> {
        let conn = self.conn()?;
        if let Some(existing) = fork_by_reader(&conn, reader, seed_id)? {
            return Ok(InsertOutcome::Existing(existing));
        }
        let id = next_id(&conn, "seq_reader_forks")?;
        let now = now_ms();
        conn.execute(
            "INSERT INTO reader_forks (id, story_seed_id, reader, title, from_chapter_sort_order,
                 head_commit_id, last_read_commit_id, version, created_at_ms, updated_at_ms)
             VALUES (?, ?, ?, ?, ?, NULL, NULL, 0, ?, ?)",
            params![id, seed_id, reader, title, from_chapter_sort_order, now, now],
        )?;
        let fork = fork_by_id(&conn, id)?
            .ok_or_else(|| anyhow!("fork {id} vanished after insert"))?;
        Ok(InsertOutcome::Created(fork))
    }

    pub fn get_fork(&self, id: i64) -> Result<Option<ReaderFork>> {
        let conn = self.conn()?;
        fork_by_id(&conn, id)
    }

    pub fn find_fork(&self, reader: &str, seed_id: i64) -> Result<Option<ReaderFork>> {
        let conn = self.conn()?;
        fork_by_reader(&conn, reader, seed_id)
    }

    /// Most recently updated first
    pub fn list_forks_by_reader(&self, reader: &str) -> Result<Vec<ReaderFork>> {
        let conn = self.conn()?;
        query_all(
            &conn,
            &format!(
                "SELECT {FORK_COLUMNS} FROM reader_forks
                 WHERE reader = ? ORDER BY updated_at_ms DESC, id DESC"
            ),
            params![reader],
            fork_from_row,
        )
    }

    /// Delete a fork with its commits, bookmarks and fork-scoped branch points.
    ///
    /// Refused while the fork has open pull requests; the check and the delete
    /// run in one transaction. Pull requests are kept as history.
    pub fn delete_fork_cascade(&self, fork_id: i64) -> Result<ForkDeletion> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        if fork_by_id(&tx, fork_id)?.is_none() {
            tx.rollback()?;
            return Ok(ForkDeletion::Missing);
        }
        let open = open_pull_requests_for_fork(&tx, fork_id)?;
        if open > 0 {
            tx.rollback()?;
            return Ok(ForkDeletion::OpenPullRequests(open));
        }
        tx.execute(
            "DELETE FROM story_options WHERE branch_point_id IN
                 (SELECT id FROM branch_points WHERE fork_id = ?)",
            params![fork_id],
        )?;
        tx.execute("DELETE FROM branch_points WHERE fork_id = ?", params![fork_id])?;
        let commits = tx.execute("DELETE FROM commits WHERE fork_id = ?", params![fork_id])?;
        let bookmarks = tx.execute("DELETE FROM bookmarks WHERE fork_id = ?", params![fork_id])?;
        tx.execute("DELETE FROM reader_forks WHERE id = ?", params![fork_id])?;
        tx.commit()?;
        tracing::debug!(fork_id, commits, bookmarks, "Deleted fork rows");
        Ok(ForkDeletion::Deleted)
    }

    pub fn count_open_pull_requests_for_fork(&self, fork_id: i64) -> Result<i64> {
        let conn = self.conn()?;
        open_pull_requests_for_fork(&conn, fork_id)
    }

    // ---------- Frontier & commits ----------

    /// Append a commit, move the fork head onto it and count the chosen
    /// option's selection.
    ///
    /// Succeeds only while the fork is still at `expected_version`; returns
    /// `None` when another writer moved the frontier first.
    pub fn append_commit(
        &self,
        fork_id: i64,
        expected_version: i64,
        commit: &NewCommit,
    ) -> Result<Option<Commit>> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let id = next_id(&tx, "seq_commits")?;
        let now = now_ms();
        let moved = tx.execute(
            "UPDATE reader_forks SET head_commit_id = ?, version = version + 1, updated_at_ms = ?
             WHERE id = ? AND version = ?",
            params![id, now, fork_id, expected_version],
        )?;
        if moved == 0 {
            tx.rollback()?;
            return Ok(None);
        }
        if let Some(option_id) = commit.option_id {
            tx.execute(
                "UPDATE story_options SET selection_count = selection_count + 1 WHERE id = ?",
                params![option_id],
            )?;
        }
        tx.execute(
            "INSERT INTO commits (id, fork_id, parent_commit_id, branch_point_id, option_id,
                 content_markdown, sort_order, created_at_ms)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
            params![
                id,
                fork_id,
                commit.parent_commit_id,
                commit.branch_point_id,
                commit.option_id,
                commit.content_markdown,
                commit.sort_order,
                now
            ],
        )?;
        let stored = commit_by_id(&tx, id)?
            .ok_or_else(|| anyhow!("commit {id} vanished after insert"))?;
        tx.commit()?;
        Ok(Some(stored))
    }

    /// Point the fork head at `head` if the fork is still at `expected_version`.
    pub fn move_head(
        &self,
        fork_id: i64,
        expected_version: i64,
        head: Option<i64>,
    ) -> Result<Option<ReaderFork>> {
        let conn = self.conn()?;
        let moved = conn.execute(
            "UPDATE reader_forks SET head_commit_id = ?, version = version + 1, updated_at_ms = ?
             WHERE id = ? AND version = ?",
            params![head, now_ms(), fork_id, expected_version],
        )?;
        if moved == 0 {
            return Ok(None);
        }
        fork_by_id(&conn, fork_id)
    }

    pub fn set_last_read(&self, fork_id: i64, commit_id: Option<i64>) -> Result<Option<ReaderFork>> {
        let conn = self.conn()?;
        conn.execute(
            "UPDATE reader_forks SET last_read_commit_id = ?, updated_at_ms = ? WHERE id = ?",
            params![commit_id, now_ms(), fork_id],
        )?;
        fork_by_id(&conn, fork_id)
    }

    pub fn get_commit(&self, id: i64) -> Result<Option<Commit>> {
        let conn = self.conn()?;
        commit_by_id(&conn, id)
    }

    /// Every commit of the fork in creation order
    pub fn list_commits(&self, fork_id: i64) -> Result<Vec<Commit>> {
        let conn = self.conn()?;
        query_all(
            &conn,
            &format!("{COMMIT_SELECT} WHERE c.fork_id = ? ORDER BY c.id"),
            params![fork_id],
            commit_from_row,
        )
    }

    // ---------- Bookmarks ----------

    /// Insert a bookmark; a missing sort order appends after the last one.
    pub fn insert_bookmark(
        &self,
        fork_id: i64,
        reader: &str,
        fields: &BookmarkFields,
    ) -> Result<Bookmark> {
        let conn = self.conn()?;
        let sort_order = match fields.sort_order {
            Some(sort_order) => sort_order,
            None => {
                conn.query_row(
                    "SELECT CAST(COALESCE(MAX(sort_order), -1) AS INTEGER) FROM bookmarks WHERE fork_id = ?",
                    params![fork_id],
                    |row| row.get::<_, i32>(0),
                )? + 1
            }
        };
        let id = next_id(&conn, "seq_bookmarks")?;
        let now = now_ms();
        conn.execute(
            "INSERT INTO bookmarks (id, fork_id, reader, commit_id, chapter_sort_order, bookmark_name,
                 notes, sort_order, created_at_ms, updated_at_ms)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            params![
                id,
                fork_id,
                reader,
                fields.commit_id,
                fields.chapter_sort_order,
                fields.bookmark_name,
                fields.notes,
                sort_order,
                now,
                now
            ],
        )?;
        bookmark_by_id(&conn, id)?.ok_or_else(|| anyhow!("bookmark {id} vanished after insert"))
    }

    pub fn get_bookmark(&self, id: i64) -> Result<Option<Bookmark>> {
        let conn = self.conn()?;
        bookmark_by_id(&conn, id)
    }

    /// Overwrite a bookmark's fields; `sort_order == None` keeps the stored value.
    pub fn update_bookmark(&self, id: i64, fields: &BookmarkFields) -> Result<Option<Bookmark>> {
        let conn = self.conn()?;
        let updated = conn.execute(
            "UPDATE bookmarks SET commit_id = ?, chapter_sort_order = ?, bookmark_name = ?,
                 notes = ?, sort_order = COALESCE(?, sort_order), updated_at_ms = ?
             WHERE id = ?",
            params![
                fields.commit_id,
                fields.chapter_sort_order,
                fields.bookmark_name,
                fields.notes,
                fields.sort_order,
                now_ms(),
                id
            ],
        )?;
        if updated == 0 {
            return Ok(None);
        }
        bookmark_by_id(&conn, id)
    }

    pub fn delete_bookmark(&self, id: i64) -> Result<bool> {
        let conn = self.conn()?;
        Ok(conn.execute("DELETE FROM bookmarks WHERE id = ?", params![id])? > 0)
    }

    pub fn list_bookmarks(&self, fork_id: i64) -> Result<Vec<Bookmark>> {
        let conn = self.conn()?;
        query_all(
            &conn,
            &format!(
                "SELECT {BOOKMARK_COLUMNS} FROM bookmarks
                 WHERE fork_id = ? ORDER BY sort_order, created_at_ms, id"
            ),
            params![fork_id],
            bookmark_from_row,
        )
    }

    // ---------- Pull requests ----------

    /// Open a pull request; returns `None` when the fork no longer exists.
    pub fn insert_pull_request(
        &self,
        seed_id: i64,
        fork_id: i64,
        from_commit_id: Option<i64>,
        title: Option<&str>,
        description: Option<&str>,
    ) -> Result<Option<PullRequest>> {
        let conn = self.conn()?;
        if fork_by_id(&conn, fork_id)?.is_none() {
            return Ok(None);
        }
        let id = next_id(&conn, "seq_pull_requests")?;
        let now = now_ms();
        conn.execute(
            "INSERT INTO pull_requests (id, story_seed_id, fork_id, from_commit_id, title, description,
                 status, reviewed_by, created_at_ms, updated_at_ms)
             VALUES (?, ?, ?, ?, ?, ?, ?, NULL, ?, ?)",
            params![
                id,
                seed_id,
                fork_id,
                from_commit_id,
                title,
                description,
                PullRequestStatus::Open.as_str(),
                now,
                now
            ],
        )?;
        let pull_request = pull_request_by_id(&conn, id)?
            .ok_or_else(|| anyhow!("pull request {id} vanished after insert"))?;
        Ok(Some(pull_request))
    }

    pub fn get_pull_request(&self, id: i64) -> Result<Option<PullRequest>> {
        let conn = self.conn()?;
        pull_request_by_id(&conn, id)
    }

    /// Newest first
    pub fn list_pull_requests(&self, seed_id: i64) -> Result<Vec<PullRequest>> {
        let conn = self.conn()?;
        query_all(
            &conn,
            &format!(
                "SELECT {PULL_REQUEST_COLUMNS} FROM pull_requests
                 WHERE story_seed_id = ? ORDER BY created_at_ms DESC, id DESC"
            ),
            params![seed_id],
            pull_request_from_row,
        )
    }

    /// Move an open pull request to `to`.
    ///
    /// Returns `None` when the request is no longer open, so two reviewers
    /// racing on the same request cannot both succeed.
    pub fn transition_pull_request(
        &self,
        id: i64,
        to: PullRequestStatus,
        reviewed_by: &str,
    ) -> Result<Option<PullRequest>> {
        let conn = self.conn()?;
        let updated = conn.execute(
            "UPDATE pull_requests SET status = ?, reviewed_by = ?, updated_at_ms = ?
             WHERE id = ? AND status = 'open'",
            params![to.as_str(), reviewed_by, now_ms(), id],
        )?;
        if updated == 0 {
            return Ok(None);
        }
        pull_request_by_id(&conn, id)
    }
}

fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

fn timestamp(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or_default()
}

fn next_id(conn: &Connection, sequence: &str) -> Result<i64> {
    let id = conn.query_row(&format!("SELECT nextval('{sequence}')"), params![], |row| {
        row.get::<_, i64>(0)
    })?;
    Ok(id)
}

fn query_all<T, P, F>(conn: &Connection, sql: &str, params: P, map: F) -> Result<Vec<T>>
where
    P: duckdb::Params,
    F: FnMut(&Row<'_>) -> duckdb::Result<T>,
{
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt.query_map(params, map)?;
    let mut out = Vec::new();
    for row in rows {
        out.push(row?);
    }
    Ok(out)
}

fn query_one<T, P, F>(conn: &Connection, sql: &str, params: P, map: F) -> Result<Option<T>>
where
    P: duckdb::Params,
    F: FnMut(&Row<'_>) -> duckdb::Result<T>,
{
    Ok(query_all(conn, sql, params, map)?.into_iter().next())
}

fn open_pull_requests_for_fork(conn: &Connection, fork_id: i64) -> Result<i64> {
    let count = conn.query_row(
        "SELECT COUNT(*) FROM pull_requests WHERE fork_id = ? AND status = 'open'",
        params![fork_id],
        |row| row.get::<_, i64>(0),
    )?;
    Ok(count)
}

fn chapter_count(conn: &Connection, seed_id: i64) -> Result<i32> {
    let count = conn.query_row(
        "SELECT CAST(COUNT(*) AS INTEGER) FROM chapters WHERE story_seed_id = ?",
        params![seed_id],
        |row| row.get::<_, i32>(0),
    )?;
    Ok(count)
}

fn seed_by_id(conn: &Connection, id: i64) -> Result<Option<StorySeed>> {
    query_one(
        conn,
        &format!("SELECT {SEED_COLUMNS} FROM story_seeds WHERE id = ?"),
        params![id],
        seed_from_row,
    )
}

fn seed_by_slug(conn: &Connection, slug: &str) -> Result<Option<StorySeed>> {
    query_one(
        conn,
        &format!("SELECT {SEED_COLUMNS} FROM story_seeds WHERE slug = ?"),
        params![slug],
        seed_from_row,
    )
}

fn branch_point_by_id(conn: &Connection, id: i64) -> Result<Option<BranchPoint>> {
    let point = query_one(
        conn,
        &format!("SELECT {BRANCH_POINT_COLUMNS} FROM branch_points WHERE id = ?"),
        params![id],
        branch_point_from_row,
    )?;
    match point {
        Some(mut point) => {
            point.options = options_for(conn, point.id)?;
            Ok(Some(point))
        }
        None => Ok(None),
    }
}

fn options_for(conn: &Connection, branch_point_id: i64) -> Result<Vec<StoryOption>> {
    query_all(
        conn,
        &format!(
            "SELECT {OPTION_COLUMNS} FROM story_options
             WHERE branch_point_id = ? ORDER BY sort_order, id"
        ),
        params![branch_point_id],
        option_from_row,
    )
}

fn fork_by_id(conn: &Connection, id: i64) -> Result<Option<ReaderFork>> {
    query_one(
        conn,
        &format!("SELECT {FORK_COLUMNS} FROM reader_forks WHERE id = ?"),
        params![id],
        fork_from_row,
    )
}

fn fork_by_reader(conn: &Connection, reader: &str, seed_id: i64) -> Result<Option<ReaderFork>> {
    query_one(
        conn,
        &format!("SELECT {FORK_COLUMNS} FROM reader_forks WHERE reader = ? AND story_seed_id = ?"),
        params![reader, seed_id],
        fork_from_row,
    )
}

fn commit_by_id(conn: &Connection, id: i64) -> Result<Option<Commit>> {
    query_one(
        conn,
        &format!("{COMMIT_SELECT} WHERE c.id = ?"),
        params![id],
        commit_from_row,
    )
}

fn bookmark_by_id(conn: &Connection, id: i64) -> Result<Option<Bookmark>> {
    query_one(
        conn,
        &format!("SELECT {BOOKMARK_COLUMNS} FROM bookmarks WHERE id = ?"),
        params![id],
        bookmark_from_row,
    )
}

fn pull_request_by_id(conn: &Connection, id: i64) -> Result<Option<PullRequest>> {
    query_one(
        conn,
        &format!("SELECT {PULL_REQUEST_COLUMNS} FROM pull_requests WHERE id = ?"),
        params![id],
        pull_request_from_row,
    )
}

fn seed_from_row(row: &Row<'_>) -> duckdb::Result<StorySeed> {
    Ok(StorySeed {
        id: row.get(0)?,
        slug: row.get(1)?,
        title: row.get(2)?,
        opening: row.get(3)?,
        author: row.get(4)?,
        published: row.get(5)?,
        created_at: timestamp(row.get(6)?),
        updated_at: timestamp(row.get(7)?),
    })
}

fn chapter_from_row(row: &Row<'_>) -> duckdb::Result<Chapter> {
    Ok(Chapter {
        id: row.get(0)?,
        story_seed_id: row.get(1)?,
        sort_order: row.get(2)?,
        title: row.get(3)?,
        content_markdown: row.get(4)?,
        created_at: timestamp(row.get(5)?),
    })
}

fn branch_point_from_row(row: &Row<'_>) -> duckdb::Result<BranchPoint> {
    Ok(BranchPoint {
        id: row.get(0)?,
        story_seed_id: row.get(1)?,
        fork_id: row.get(2)?,
        sort_order: row.get(3)?,
        anchor_text: row.get(4)?,
        options: Vec::new(),
        created_at: timestamp(row.get(5)?),
    })
}

fn option_from_row(row: &Row<'_>) -> duckdb::Result<StoryOption> {
    Ok(StoryOption {
        id: row.get(0)?,
        branch_point_id: row.get(1)?,
        label: row.get(2)?,
        sort_order: row.get(3)?,
        influence_notes: row.get(4)?,
        plot_hint: row.get(5)?,
        selection_count: row.get(6)?,
    })
}

fn fork_from_row(row: &Row<'_>) -> duckdb::Result<ReaderFork> {
    Ok(ReaderFork {
        id: row.get(0)?,
        story_seed_id: row.get(1)?,
        reader: row.get(2)?,
        title: row.get(3)?,
        from_chapter_sort_order: row.get(4)?,
        head_commit_id: row.get(5)?,
        last_read_commit_id: row.get(6)?,
        version: row.get(7)?,
        created_at: timestamp(row.get(8)?),
        updated_at: timestamp(row.get(9)?),
    })
}

fn commit_from_row(row: &Row<'_>) -> duckdb::Result<Commit> {
    Ok(Commit {
        id: row.get(0)?,
        fork_id: row.get(1)?,
        parent_commit_id: row.get(2)?,
        branch_point_id: row.get(3)?,
        option_id: row.get(4)?,
        option_label: row.get(5)?,
        content_markdown: row.get(6)?,
        sort_order: row.get(7)?,
        created_at: timestamp(row.get(8)?),
    })
}

fn bookmark_from_row(row: &Row<'_>) -> duckdb::Result<Bookmark> {
    Ok(Bookmark {
        id: row.get(0)?,
        fork_id: row.get(1)?,
        reader: row.get(2)?,
        commit_id: row.get(3)?,
        chapter_sort_order: row.get(4)?,
        bookmark_name: row.get(5)?,
        notes: row.get(6)?,
        sort_order: row.get(7)?,
        created_at: timestamp(row.get(8)?),
        updated_at: timestamp(row.get(9)?),
    })
}

fn pull_request_from_row(row: &Row<'_>) -> duckdb::Result<PullRequest> {
    let status: String = row.get(6)?;
    let status = status.parse::<PullRequestStatus>().map_err(|e| {
        duckdb::Error::FromSqlConversionFailure(6, duckdb::types::Type::Text, Box::new(e))
    })?;
    Ok(PullRequest {
        id: row.get(0)?,
        story_seed_id: row.get(1)?,
        fork_id: row.get(2)?,
        from_commit_id: row.get(3)?,
        title: row.get(4)?,
        description: row.get(5)?,
        status,
        reviewed_by: row.get(7)?,
        created_at: timestamp(row.get(8)?),
        updated_at: timestamp(row.get(9)?),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn open_store() -> (tempfile::TempDir, Persistence) {
        let dir = tempdir().unwrap();
        let store = Persistence::new(dir.path().join("storyfork.duckdb")).unwrap();
        (dir, store)
    }

    fn seed_with_fork(store: &Persistence) -> (StorySeed, ReaderFork) {
        let seed = store
            .insert_seed("author", "dragon-realm", "Dragon Realm", Some("Once..."))
            .unwrap()
            .unwrap();
        let fork = store
            .insert_fork(seed.id, "reader", "Dragon Realm", Some(3))
            .unwrap()
            .into_inner();
        (seed, fork)
    }

    fn root_commit(text: &str) -> NewCommit {
        NewCommit {
            parent_commit_id: None,
            branch_point_id: None,
            option_id: None,
            content_markdown: text.to_string(),
            sort_order: 1,
        }
    }

    #[test]
    fn test_seed_slug_is_unique() {
        let (_dir, store) = open_store();
        let seed = store.insert_seed("author", "tale", "Tale", None).unwrap();
        assert!(seed.is_some());
        assert!(store.insert_seed("other", "tale", "Tale 2", None).unwrap().is_none());

        let loaded = store.get_seed_by_slug("tale").unwrap().unwrap();
        assert_eq!(loaded.title, "Tale");
        assert!(!loaded.published);

        let published = store.set_seed_published(loaded.id, true).unwrap().unwrap();
        assert!(published.published);
    }

    #[test]
    fn test_chapters_append_in_order() {
        let (_dir, store) = open_store();
        let seed = store.insert_seed("author", "tale", "Tale", None).unwrap().unwrap();
        for i in 1..=3 {
            let chapter = store
                .insert_chapter(seed.id, &format!("Chapter {i}"), "text")
                .unwrap();
            assert_eq!(chapter.sort_order, i);
        }
        assert_eq!(store.count_chapters(seed.id).unwrap(), 3);
        assert_eq!(store.list_chapters(seed.id, Some(2)).unwrap().len(), 2);
        assert_eq!(store.list_chapters(seed.id, None).unwrap().len(), 3);
    }

    #[test]
    fn test_fork_insert_returns_existing() {
        let (_dir, store) = open_store();
        let (seed, fork) = seed_with_fork(&store);
        assert_eq!(fork.from_chapter_sort_order, Some(3));
        assert_eq!(fork.version, 0);
        assert!(fork.head_commit_id.is_none());

        let again = store.insert_fork(seed.id, "reader", "Dup", None).unwrap();
        assert!(!again.was_created());
        assert_eq!(again.into_inner().id, fork.id);
        assert_eq!(store.list_forks_by_reader("reader").unwrap().len(), 1);
        assert!(store.list_forks_by_reader("someone").unwrap().is_empty());
    }

    #[test]
    fn test_branch_points_scoped_to_fork() {
        let (_dir, store) = open_store();
        let (seed, fork) = seed_with_fork(&store);
        let options = vec![
            NewStoryOption {
                label: "Left".to_string(),
                sort_order: 1,
                ..Default::default()
            },
            NewStoryOption {
                label: "Right".to_string(),
                sort_order: 2,
                plot_hint: Some("danger".to_string()),
                ..Default::default()
            },
        ];
        let authored = store
            .insert_branch_point(seed.id, None, 1, Some("A fork in the road"), &options)
            .unwrap();
        assert_eq!(authored.options.len(), 2);
        assert!(!authored.is_generated());

        store
            .insert_branch_point(seed.id, Some(fork.id), 2, None, &options[..1])
            .unwrap();

        assert_eq!(store.list_branch_points(seed.id, None, None).unwrap().len(), 1);
        assert_eq!(store.list_branch_points(seed.id, Some(fork.id), None).unwrap().len(), 2);
        let at_two = store.list_branch_points(seed.id, Some(fork.id), Some(2)).unwrap();
        assert_eq!(at_two.len(), 1);
        assert!(at_two[0].is_generated());

        let option_id = authored.options[0].id;
        let chosen = NewCommit {
            branch_point_id: Some(authored.id),
            option_id: Some(option_id),
            ..root_commit("left")
        };
        store.append_commit(fork.id, 0, &chosen).unwrap().unwrap();
        // A losing writer leaves the count alone.
        assert!(store.append_commit(fork.id, 0, &chosen).unwrap().is_none());

        let reloaded = store.get_branch_point(authored.id).unwrap().unwrap();
        assert_eq!(reloaded.option(option_id).unwrap().selection_count, 1);
        assert_eq!(reloaded.options[1].selection_count, 0);
    }

    #[test]
    fn test_append_commit_checks_version() {
        let (_dir, store) = open_store();
        let (_seed, fork) = seed_with_fork(&store);

        let first = store
            .append_commit(fork.id, fork.version, &root_commit("one"))
            .unwrap()
            .unwrap();
        assert!(first.parent_commit_id.is_none());

        // Same stale version loses.
        assert!(store
            .append_commit(fork.id, fork.version, &root_commit("two"))
            .unwrap()
            .is_none());

        let fork = store.get_fork(fork.id).unwrap().unwrap();
        assert_eq!(fork.head_commit_id, Some(first.id));
        assert_eq!(fork.version, 1);
        assert_eq!(store.list_commits(fork.id).unwrap().len(), 1);
    }

    #[test]
    fn test_move_head_keeps_commits() {
        let (_dir, store) = open_store();
        let (_seed, fork) = seed_with_fork(&store);
        let root = store
            .append_commit(fork.id, 0, &root_commit("one"))
            .unwrap()
            .unwrap();
        let child = NewCommit {
            parent_commit_id: Some(root.id),
            sort_order: 2,
            ..root_commit("two")
        };
        store.append_commit(fork.id, 1, &child).unwrap().unwrap();

        let moved = store.move_head(fork.id, 2, Some(root.id)).unwrap().unwrap();
        assert_eq!(moved.head_commit_id, Some(root.id));
        assert_eq!(moved.version, 3);
        assert!(store.move_head(fork.id, 2, None).unwrap().is_none());
        assert_eq!(store.list_commits(fork.id).unwrap().len(), 2);
    }

    #[test]
    fn test_bookmarks_default_sort_order() {
        let (_dir, store) = open_store();
        let (_seed, fork) = seed_with_fork(&store);
        let first = store
            .insert_bookmark(fork.id, "reader", &BookmarkFields::default())
            .unwrap();
        let second = store
            .insert_bookmark(
                fork.id,
                "reader",
                &BookmarkFields {
                    bookmark_name: Some("later".to_string()),
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(first.sort_order, 0);
        assert_eq!(second.sort_order, 1);

        let updated = store
            .update_bookmark(
                second.id,
                &BookmarkFields {
                    notes: Some("note".to_string()),
                    ..Default::default()
                },
            )
            .unwrap()
            .unwrap();
        assert_eq!(updated.sort_order, 1);
        assert_eq!(updated.notes.as_deref(), Some("note"));

        assert!(store.delete_bookmark(first.id).unwrap());
        assert!(!store.delete_bookmark(first.id).unwrap());
        assert_eq!(store.list_bookmarks(fork.id).unwrap().len(), 1);
    }

    #[test]
    fn test_pull_request_transition_once() {
        let (_dir, store) = open_store();
        let (seed, fork) = seed_with_fork(&store);
        let pr = store
            .insert_pull_request(seed.id, fork.id, None, Some("My ending"), None)
            .unwrap()
            .unwrap();
        assert_eq!(pr.status, PullRequestStatus::Open);
        assert_eq!(store.count_open_pull_requests_for_fork(fork.id).unwrap(), 1);

        let merged = store
            .transition_pull_request(pr.id, PullRequestStatus::Merged, "author")
            .unwrap()
            .unwrap();
        assert_eq!(merged.status, PullRequestStatus::Merged);
        assert_eq!(merged.reviewed_by.as_deref(), Some("author"));
        assert!(store
            .transition_pull_request(pr.id, PullRequestStatus::Closed, "author")
            .unwrap()
            .is_none());
        assert_eq!(store.count_open_pull_requests_for_fork(fork.id).unwrap(), 0);
        assert_eq!(store.list_pull_requests(seed.id).unwrap().len(), 1);
    }

    #[test]
    fn test_delete_fork_cascades() {
        let (_dir, store) = open_store();
        let (seed, fork) = seed_with_fork(&store);
        let commit = store
            .append_commit(fork.id, 0, &root_commit("one"))
            .unwrap()
            .unwrap();
        store
            .insert_bookmark(
                fork.id,
                "reader",
                &BookmarkFields {
                    commit_id: Some(commit.id),
                    ..Default::default()
                },
            )
            .unwrap();
        store
            .insert_branch_point(seed.id, Some(fork.id), 2, None, &[])
            .unwrap();

        assert_eq!(store.delete_fork_cascade(fork.id).unwrap(), ForkDeletion::Deleted);
        assert!(store.get_fork(fork.id).unwrap().is_none());
        assert!(store.list_commits(fork.id).unwrap().is_empty());
        assert!(store.list_bookmarks(fork.id).unwrap().is_empty());
        assert!(store.list_branch_points(seed.id, Some(fork.id), None).unwrap().is_empty());
        assert_eq!(store.delete_fork_cascade(fork.id).unwrap(), ForkDeletion::Missing);

        // No pull request can be opened against the deleted fork.
        assert!(store
            .insert_pull_request(seed.id, fork.id, None, None, None)
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_delete_fork_blocked_by_open_pull_request() {
        let (_dir, store) = open_store();
        let (seed, fork) = seed_with_fork(&store);
        store
            .append_commit(fork.id, 0, &root_commit("one"))
            .unwrap()
            .unwrap();
        let pr = store
            .insert_pull_request(seed.id, fork.id, None, None, None)
            .unwrap()
            .unwrap();

        assert_eq!(
            store.delete_fork_cascade(fork.id).unwrap(),
            ForkDeletion::OpenPullRequests(1)
        );
        assert!(store.get_fork(fork.id).unwrap().is_some());
        assert_eq!(store.list_commits(fork.id).unwrap().len(), 1);

        store
            .transition_pull_request(pr.id, PullRequestStatus::Closed, "author")
            .unwrap()
            .unwrap();
        assert_eq!(store.delete_fork_cascade(fork.id).unwrap(), ForkDeletion::Deleted);
        assert_eq!(store.list_pull_requests(seed.id).unwrap().len(), 1);
    }

    #[test]
    fn test_reopen_preserves_data() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("storyfork.duckdb");
        {
            let store = Persistence::new(&path).unwrap();
            store.insert_seed("author", "tale", "Tale", None).unwrap();
        }
        let store = Persistence::new(&path).unwrap();
        assert!(store.get_seed_by_slug("tale").unwrap().is_some());
        let next = store.insert_seed("author", "tale-2", "Tale 2", None).unwrap().unwrap();
        assert_eq!(next.id, 2);
    }
}
