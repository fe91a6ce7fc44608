//! SQLite-backed index: derived tables mirroring the event log, kept
//! current by replaying events, and queried via pushdown/FTS/thread
//! grouping.

pub mod derived;
pub mod fts;
pub mod pushdown;
pub mod query;
pub(crate) mod schema;
pub mod thread;

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::Utc;
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, Connection, OptionalExtension};

use crate::error::AppResult;
use crate::primitives::{Event, EventSeq};

use derived::DerivedRow;

pub use fts::{search_posts, SearchPage, SearchSort, SearchSpec};
pub use query::{query as run_query, QueryPage, QuerySpec, SortBy, SortOrder};
pub use schema::open_writer;
pub use thread::{thread_groups, thread_posts, ThreadGroup};

/// `index_checkpoints` row for the single built-in index (`name = "primary"`).
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct IndexCheckpoint {
    pub name: String,
    pub version: i64,
    pub last_event_seq: EventSeq,
    pub event_count: u64,
    pub updated_at: chrono::DateTime<Utc>,
}

/// Handle to a store's SQLite-backed index. Cheap to clone: the reader pool
/// and the bootstrap-once flag are both reference-counted.
#[derive(Clone)]
pub struct Index {
    pool: Pool<SqliteConnectionManager>,
    bootstrapped: Arc<AtomicBool>,
}

impl Index {
    /// Opens the index's SQLite pool and rebuilds it from the log first if
    /// it was left empty (see `bootstrap_if_needed`), so every read path
    /// that goes through `Index::open` serves current data without each
    /// caller having to remember to bootstrap itself.
    pub fn open(db_path: &Path) -> AppResult<Self> {
        let pool = schema::build_pool(db_path)?;
        let index = Self { pool, bootstrapped: Arc::new(AtomicBool::new(false)) };
        let conn = index.pool.get()?;
        index.bootstrap_if_needed(&conn)?;
        drop(conn);
        Ok(index)
    }

    pub fn pool(&self) -> &Pool<SqliteConnectionManager> {
        &self.pool
    }

    /// Rebuilds `posts`/`post_hashtag`/`post_lang`/FTS from `event_log` if
    /// the index is empty but the log isn't — e.g. after `clear` or on a
    /// store that was populated by a process that crashed before indexing.
    /// Runs at most once per process per `Index` instance.
    pub fn bootstrap_if_needed(&self, conn: &Connection) -> AppResult<()> {
        if self.bootstrapped.load(Ordering::Acquire) {
            return Ok(());
        }

        let posts_count: i64 = conn.query_row("SELECT COUNT(*) FROM posts", [], |r| r.get(0))?;
        let log_count: i64 = conn.query_row("SELECT COUNT(*) FROM event_log", [], |r| r.get(0))?;

        if posts_count == 0 && log_count > 0 {
            tracing::info!(log_count, "index empty but log non-empty, rebuilding");
            let mut after = None;
            loop {
                let page = crate::log::stream_page(conn, after, crate::log::DEFAULT_PAGE_SIZE)?;
                if page.is_empty() {
                    break;
                }
                conn.execute_batch("BEGIN")?;
                for record in &page {
                    apply(conn, record.seq, &record.event)?;
                }
                conn.execute_batch("COMMIT")?;
                after = page.last().map(|r| r.seq);
            }
            conn.execute_batch("ANALYZE; PRAGMA optimize;")?;
        }

        self.bootstrapped.store(true, Ordering::Release);
        Ok(())
    }

    pub fn checkpoint(&self, conn: &Connection) -> AppResult<Option<IndexCheckpoint>> {
        checkpoint(conn)
    }

    pub fn has_uri(&self, conn: &Connection, uri: &str) -> AppResult<bool> {
        has_uri(conn, uri)
    }

    #[cfg(test)]
    pub fn apply_for_tests(&self, event: &Event) -> AppResult<()> {
        let conn = self.pool.get()?;
        let seq = crate::log::last_seq(&conn)?.map(|s| s.next()).unwrap_or(EventSeq(1));
        apply(&conn, seq, event)
    }
}

/// Current `index_checkpoints` row for `"primary"`, if any.
pub fn checkpoint(conn: &Connection) -> AppResult<Option<IndexCheckpoint>> {
    conn.query_row(
        "SELECT name, version, last_event_seq, event_count, updated_at FROM index_checkpoints WHERE name = 'primary'",
        [],
        |row| {
            Ok(IndexCheckpoint {
                name: row.get(0)?,
                version: row.get(1)?,
                last_event_seq: EventSeq(row.get::<_, i64>(2)? as u64),
                event_count: row.get::<_, i64>(3)? as u64,
                updated_at: row
                    .get::<_, String>(4)?
                    .parse()
                    .unwrap_or_else(|_| Utc::now()),
            })
        },
    )
    .optional()
    .map_err(Into::into)
}

pub fn has_uri(conn: &Connection, uri: &str) -> AppResult<bool> {
    let exists: bool =
        conn.query_row("SELECT EXISTS(SELECT 1 FROM posts WHERE uri = ?1)", [uri], |r| r.get(0))?;
    Ok(exists)
}

/// Applies one event to the index tables, in whatever transaction the
/// caller already has open on `conn`, and advances `index_checkpoints`.
/// Does not touch `event_log` — the committer is responsible for pairing
/// this with `log::append_batch` inside one transaction.
pub fn apply(conn: &Connection, seq: EventSeq, event: &Event) -> AppResult<()> {
    match event {
        Event::PostUpsert { post, .. } => {
            let derived = DerivedRow::compute(post);
            let post_json = serde_json::to_string(post)?;

            let rowid: Option<i64> = conn
                .query_row("SELECT rowid FROM posts WHERE uri = ?1", [post.uri.as_str()], |r| r.get(0))
                .optional()?;
            if let Some(rowid) = rowid {
                conn.execute("DELETE FROM posts_fts WHERE rowid = ?1", params![rowid])?;
            }

            conn.execute(
                "INSERT INTO posts (
                    uri, created_at, created_date, author, text, lang,
                    is_reply, is_quote, is_repost, is_original,
                    has_links, has_media, has_embed, has_images, image_count,
                    alt_text, has_alt_text, has_video,
                    like_count, repost_count, reply_count, quote_count,
                    reply_root_uri, post_json
                ) VALUES (
                    ?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15,
                    ?16, ?17, ?18, ?19, ?20, ?21, ?22, ?23, ?24
                )
                ON CONFLICT(uri) DO UPDATE SET
                    created_at = excluded.created_at,
                    created_date = excluded.created_date,
                    author = excluded.author,
                    text = excluded.text,
                    lang = excluded.lang,
                    is_reply = excluded.is_reply,
                    is_quote = excluded.is_quote,
                    is_repost = excluded.is_repost,
                    is_original = excluded.is_original,
                    has_links = excluded.has_links,
                    has_media = excluded.has_media,
                    has_embed = excluded.has_embed,
                    has_images = excluded.has_images,
                    image_count = excluded.image_count,
                    alt_text = excluded.alt_text,
                    has_alt_text = excluded.has_alt_text,
                    has_video = excluded.has_video,
                    like_count = excluded.like_count,
                    repost_count = excluded.repost_count,
                    reply_count = excluded.reply_count,
                    quote_count = excluded.quote_count,
                    reply_root_uri = excluded.reply_root_uri,
                    post_json = excluded.post_json",
                params![
                    post.uri.as_str(),
                    post.created_at.to_rfc3339(),
                    derived.created_date,
                    post.author.as_str(),
                    post.text,
                    derived.lang,
                    derived.is_reply,
                    derived.is_quote,
                    derived.is_repost,
                    derived.is_original,
                    derived.has_links,
                    derived.has_media,
                    derived.has_embed,
                    derived.has_images,
                    derived.image_count,
                    derived.alt_text,
                    derived.has_alt_text,
                    derived.has_video,
                    derived.like_count,
                    derived.repost_count,
                    derived.reply_count,
                    derived.quote_count,
                    derived.reply_root_uri,
                    post_json,
                ],
            )?;

            conn.execute("DELETE FROM post_hashtag WHERE uri = ?1", [post.uri.as_str()])?;
            for tag in &post.hashtags {
                conn.execute(
                    "INSERT INTO post_hashtag (uri, tag) VALUES (?1, ?2)",
                    params![post.uri.as_str(), tag.as_str()],
                )?;
            }

            conn.execute("DELETE FROM post_lang WHERE uri = ?1", [post.uri.as_str()])?;
            for lang in &post.langs {
                conn.execute(
                    "INSERT INTO post_lang (uri, lang) VALUES (?1, ?2)",
                    params![post.uri.as_str(), lang.to_lowercase()],
                )?;
            }

            let new_rowid: i64 =
                conn.query_row("SELECT rowid FROM posts WHERE uri = ?1", [post.uri.as_str()], |r| r.get(0))?;
            conn.execute(
                "INSERT INTO posts_fts(rowid, text, alt_text) VALUES (?1, ?2, ?3)",
                params![new_rowid, post.text, derived.alt_text],
            )?;
        }
        Event::PostDelete { uri, .. } => {
            let rowid: Option<i64> = conn
                .query_row("SELECT rowid FROM posts WHERE uri = ?1", [uri.as_str()], |r| r.get(0))
                .optional()?;
            if let Some(rowid) = rowid {
                conn.execute("DELETE FROM posts_fts WHERE rowid = ?1", params![rowid])?;
            }
            conn.execute("DELETE FROM posts WHERE uri = ?1", [uri.as_str()])?;
        }
    }

    conn.execute(
        "INSERT INTO index_checkpoints (name, version, last_event_seq, event_count, updated_at)
         VALUES ('primary', 1, ?1, 1, ?2)
         ON CONFLICT(name) DO UPDATE SET
             last_event_seq = excluded.last_event_seq,
             event_count = index_checkpoints.event_count + 1,
             updated_at = excluded.updated_at",
        params![seq.0 as i64, Utc::now().to_rfc3339()],
    )?;

    Ok(())
}

/// Clears every derived table (used by `derive(reset=true)` and the CLI's
/// `store clear`). Does not touch `event_log`.
pub fn clear(conn: &Connection) -> AppResult<()> {
    conn.execute_batch(
        "DELETE FROM posts_fts;
         DELETE FROM post_hashtag;
         DELETE FROM post_lang;
         DELETE FROM posts;
         DELETE FROM index_checkpoints;",
    )?;
    Ok(())
}
