//! Connection setup and schema migrations for a store's SQLite database.
//!
//! A `metadata(key, value)` singleton tracks `schema_version`; each
//! `migrate_vN_to_vN1` checks `pragma_table_info`/`sqlite_master` before
//! altering anything so re-running a half-applied migration is safe.
//!
//! `foreign_keys=ON` is enabled: `PostUpsert` always writes its hashtag/lang
//! join rows in the same transaction as the base row, so FK enforcement
//! catches index bugs rather than fighting legitimate out-of-order writes.

use r2d2::{CustomizeConnection, Pool};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::Connection;
use std::path::Path;

use crate::error::AppResult;

pub const CURRENT_SCHEMA_VERSION: i64 = 1;

fn apply_pragmas(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        "PRAGMA journal_mode=WAL;
         PRAGMA synchronous=NORMAL;
         PRAGMA busy_timeout=5000;
         PRAGMA foreign_keys=ON;",
    )
}

/// Opens a fresh connection, applies pragmas, and brings the schema up to
/// `CURRENT_SCHEMA_VERSION`. Safe to call from multiple connections since
/// every step is guarded by an existence check.
pub fn ensure_schema(db_path: &Path) -> AppResult<()> {
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let conn = Connection::open(db_path)?;
    apply_pragmas(&conn)?;
    migrate(&conn)?;
    Ok(())
}

fn schema_version(conn: &Connection) -> rusqlite::Result<i64> {
    conn.query_row(
        "SELECT COALESCE((SELECT CAST(value AS INTEGER) FROM metadata WHERE key = 'schema_version'), 0)",
        [],
        |row| row.get(0),
    )
}

pub(crate) fn migrate(conn: &Connection) -> rusqlite::Result<()> {
    let current = schema_version(conn).unwrap_or(0);
    if current < 1 {
        apply_schema_v1(conn)?;
    }
    Ok(())
}

fn apply_schema_v1(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS metadata (
            key TEXT PRIMARY KEY,
            value TEXT
        );

        CREATE TABLE IF NOT EXISTS event_log (
            seq INTEGER PRIMARY KEY AUTOINCREMENT,
            event_tag TEXT NOT NULL,
            payload_json TEXT NOT NULL,
            created_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS posts (
            uri TEXT PRIMARY KEY,
            created_at TEXT NOT NULL,
            created_date TEXT NOT NULL,
            author TEXT NOT NULL,
            text TEXT NOT NULL,
            lang TEXT,
            is_reply INTEGER NOT NULL DEFAULT 0,
            is_quote INTEGER NOT NULL DEFAULT 0,
            is_repost INTEGER NOT NULL DEFAULT 0,
            is_original INTEGER NOT NULL DEFAULT 0,
            has_links INTEGER NOT NULL DEFAULT 0,
            has_media INTEGER NOT NULL DEFAULT 0,
            has_embed INTEGER NOT NULL DEFAULT 0,
            has_images INTEGER NOT NULL DEFAULT 0,
            image_count INTEGER NOT NULL DEFAULT 0,
            alt_text TEXT NOT NULL DEFAULT '',
            has_alt_text INTEGER NOT NULL DEFAULT 0,
            has_video INTEGER NOT NULL DEFAULT 0,
            like_count INTEGER NOT NULL DEFAULT 0,
            repost_count INTEGER NOT NULL DEFAULT 0,
            reply_count INTEGER NOT NULL DEFAULT 0,
            quote_count INTEGER NOT NULL DEFAULT 0,
            reply_root_uri TEXT,
            post_json TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_posts_created_at ON posts(created_at);
        CREATE INDEX IF NOT EXISTS idx_posts_author ON posts(author);
        CREATE INDEX IF NOT EXISTS idx_posts_reply_root ON posts(reply_root_uri);
        CREATE INDEX IF NOT EXISTS idx_posts_engagement ON posts(like_count, repost_count, reply_count, quote_count);

        CREATE TABLE IF NOT EXISTS post_hashtag (
            uri TEXT NOT NULL REFERENCES posts(uri) ON DELETE CASCADE,
            tag TEXT NOT NULL,
            PRIMARY KEY (uri, tag)
        );
        CREATE INDEX IF NOT EXISTS idx_post_hashtag_tag ON post_hashtag(tag);

        CREATE TABLE IF NOT EXISTS post_lang (
            uri TEXT NOT NULL REFERENCES posts(uri) ON DELETE CASCADE,
            lang TEXT NOT NULL,
            PRIMARY KEY (uri, lang)
        );
        CREATE INDEX IF NOT EXISTS idx_post_lang_lang ON post_lang(lang);

        CREATE VIRTUAL TABLE IF NOT EXISTS posts_fts USING fts5(
            text,
            alt_text,
            content=posts,
            content_rowid=rowid,
            tokenize='porter unicode61'
        );

        CREATE TABLE IF NOT EXISTS index_checkpoints (
            name TEXT PRIMARY KEY,
            version INTEGER NOT NULL,
            last_event_seq INTEGER NOT NULL,
            event_count INTEGER NOT NULL,
            updated_at TEXT NOT NULL
        );

        INSERT INTO metadata (key, value) VALUES ('schema_version', '1')
        ON CONFLICT(key) DO NOTHING;
        "#,
    )
}

/// `r2d2` customizer that re-applies per-connection pragmas (WAL mode is
/// database-wide and persists, but `foreign_keys`/`busy_timeout` are
/// per-connection settings) each time the pool opens a new connection.
#[derive(Debug)]
struct PragmaCustomizer;

impl CustomizeConnection<Connection, rusqlite::Error> for PragmaCustomizer {
    fn on_acquire(&self, conn: &mut Connection) -> Result<(), rusqlite::Error> {
        apply_pragmas(conn)
    }
}

/// Builds the shared reader pool, sized for concurrent
/// query/search/thread-grouping reads.
pub fn build_pool(db_path: &Path) -> AppResult<Pool<SqliteConnectionManager>> {
    ensure_schema(db_path)?;
    let manager = SqliteConnectionManager::file(db_path);
    let pool = Pool::builder()
        .max_size(4)
        .connection_customizer(Box::new(PragmaCustomizer))
        .build(manager)
        .map_err(crate::error::AppError::from)?;
    Ok(pool)
}

/// Opens the single dedicated writer connection for a store.
pub fn open_writer(db_path: &Path) -> AppResult<Connection> {
    ensure_schema(db_path)?;
    let conn = Connection::open(db_path)?;
    apply_pragmas(&conn)?;
    Ok(conn)
}

/// Test-only helper: applies pragmas and the schema to an already-open
/// connection (used for in-memory connections, which have no path to hand
/// to `ensure_schema`).
#[cfg(test)]
pub(crate) fn init_for_tests(conn: &Connection) {
    apply_pragmas(conn).expect("pragmas apply to an in-memory connection");
    migrate(conn).expect("schema migrates cleanly on an in-memory connection");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ensure_schema_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("index.sqlite3");
        ensure_schema(&db_path).unwrap();
        ensure_schema(&db_path).unwrap();
        let conn = Connection::open(&db_path).unwrap();
        assert_eq!(schema_version(&conn).unwrap(), CURRENT_SCHEMA_VERSION);
    }

    #[test]
    fn build_pool_yields_working_connections() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("index.sqlite3");
        let pool = build_pool(&db_path).unwrap();
        let conn = pool.get().unwrap();
        let one: i64 = conn.query_row("SELECT 1", [], |r| r.get(0)).unwrap();
        assert_eq!(one, 1);
    }
}
