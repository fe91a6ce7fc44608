//! Thread grouping.

use chrono::{DateTime, Utc};
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use serde::Serialize;

use crate::error::AppResult;
use crate::primitives::Post;

use super::query::QuerySpec;
use super::pushdown;

/// Returns every post sharing a thread root with `uri` (or the root itself),
/// oldest first.
pub fn thread_posts(pool: &Pool<SqliteConnectionManager>, uri: &str) -> AppResult<Vec<Post>> {
    let conn = pool.get()?;
    let root: Option<String> = conn
        .query_row("SELECT COALESCE(reply_root_uri, uri) FROM posts WHERE uri = ?1", [uri], |row| row.get(0))
        .ok();
    let Some(root) = root else { return Ok(Vec::new()) };

    let mut stmt = conn.prepare(
        "SELECT post_json FROM posts WHERE COALESCE(reply_root_uri, uri) = ?1 ORDER BY created_at ASC",
    )?;
    let rows = stmt.query_map([&root], |row| row.get::<_, String>(0))?;
    let mut posts = Vec::new();
    for row in rows {
        posts.push(serde_json::from_str(&row?)?);
    }
    Ok(posts)
}

#[derive(Debug, Clone, Serialize)]
pub struct ThreadGroup {
    pub root_uri: String,
    pub count: u64,
    pub first_created_at: DateTime<Utc>,
}

/// Groups posts matching `spec.filter` (ignoring pagination/sort in `spec`)
/// by their thread root, returning one summary row per thread.
pub fn thread_groups(pool: &Pool<SqliteConnectionManager>, spec: &QuerySpec) -> AppResult<Vec<ThreadGroup>> {
    let conn = pool.get()?;

    let mut where_clauses = Vec::new();
    let mut params: Vec<rusqlite::types::Value> = Vec::new();
    if let Some(filter) = &spec.filter {
        let compiled = pushdown::compile(filter);
        where_clauses.push(compiled.sql);
        params.extend(compiled.params);
    }
    if let Some((start, end)) = spec.range {
        where_clauses.push("created_at BETWEEN ? AND ?".to_string());
        params.push(rusqlite::types::Value::Text(start.to_rfc3339()));
        params.push(rusqlite::types::Value::Text(end.to_rfc3339()));
    }
    let where_sql = if where_clauses.is_empty() { "1".to_string() } else { where_clauses.join(" AND ") };

    let sql = format!(
        "SELECT COALESCE(reply_root_uri, uri) AS root, COUNT(*), MIN(created_at) \
         FROM posts WHERE {where_sql} GROUP BY root ORDER BY MIN(created_at) ASC"
    );

    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(rusqlite::params_from_iter(params.iter()), |row| {
        let root: String = row.get(0)?;
        let count: i64 = row.get(1)?;
        let first: String = row.get(2)?;
        Ok((root, count, first))
    })?;

    let mut groups = Vec::new();
    for row in rows {
        let (root_uri, count, first) = row?;
        let first_created_at = DateTime::parse_from_rfc3339(&first)
            .map(|d| d.with_timezone(&Utc))
            .unwrap_or_else(|_| Utc::now());
        groups.push(ThreadGroup { root_uri, count: count as u64, first_created_at });
    }
    Ok(groups)
}
