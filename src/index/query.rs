//! Filtered, ordered, keyset-paginated queries over the index.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Utc};
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::types::Value;
use rusqlite::params_from_iter;
use serde::{Deserialize, Serialize};

use crate::error::{AppError, AppResult};
use crate::filter::FilterAst;
use crate::primitives::Post;

use super::pushdown;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortBy {
    CreatedAt,
    LikeCount,
    RepostCount,
    ReplyCount,
    QuoteCount,
    Engagement,
}

impl SortBy {
    fn sql_expr(self) -> &'static str {
        match self {
            SortBy::CreatedAt => "created_at",
            SortBy::LikeCount => "like_count",
            SortBy::RepostCount => "repost_count",
            SortBy::ReplyCount => "reply_count",
            SortBy::QuoteCount => "quote_count",
            SortBy::Engagement => "(like_count + 2 * repost_count + 3 * reply_count + 2 * quote_count)",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortOrder {
    Asc,
    Desc,
}

impl SortOrder {
    fn sql_dir(self) -> &'static str {
        match self {
            SortOrder::Asc => "ASC",
            SortOrder::Desc => "DESC",
        }
    }

    fn keyset_op(self) -> &'static str {
        match self {
            SortOrder::Asc => ">",
            SortOrder::Desc => "<",
        }
    }
}

/// Opaque cursor over `(sort_key, created_at, uri)`, base64-encoded so
/// callers never need to understand its internal shape.
///
/// `sort_key` keeps the JSON type it had when read back from SQLite (number
/// for the count/engagement expressions, string for `created_at`) so the
/// keyset predicate can rebind it with the same storage class it was
/// compared against. Binding a numeric sort key as text would compare an
/// INTEGER column/expression against a TEXT literal under SQLite's
/// storage-class rules, where INTEGER always sorts before TEXT regardless of
/// value — silently breaking keyset pagination for numeric sorts.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct CursorState {
    sort_key: serde_json::Value,
    created_at: String,
    uri: String,
}

impl CursorState {
    fn encode(&self) -> String {
        let json = serde_json::to_vec(self).expect("cursor state always serializes");
        URL_SAFE_NO_PAD.encode(json)
    }

    fn decode(cursor: &str) -> AppResult<Self> {
        let bytes = URL_SAFE_NO_PAD
            .decode(cursor)
            .map_err(|e| AppError::CliInputError { message: format!("invalid cursor: {e}") })?;
        serde_json::from_slice(&bytes)
            .map_err(|e| AppError::CliInputError { message: format!("invalid cursor payload: {e}") })
    }
}

#[derive(Debug, Clone)]
pub struct QuerySpec {
    pub filter: Option<FilterAst>,
    pub range: Option<(DateTime<Utc>, DateTime<Utc>)>,
    pub sort_by: SortBy,
    pub order: SortOrder,
    pub scan_limit: usize,
    pub page_size: usize,
    pub cursor: Option<String>,
}

impl QuerySpec {
    pub fn new(sort_by: SortBy, order: SortOrder) -> Self {
        Self { filter: None, range: None, sort_by, order, scan_limit: 10_000, page_size: 500, cursor: None }
    }
}

pub struct QueryPage {
    pub posts: Vec<Post>,
    pub next_cursor: Option<String>,
}

pub fn query(pool: &Pool<SqliteConnectionManager>, spec: &QuerySpec) -> AppResult<QueryPage> {
    let conn = pool.get()?;

    let mut where_clauses = Vec::new();
    let mut params: Vec<Value> = Vec::new();

    if let Some(filter) = &spec.filter {
        let compiled = pushdown::compile(filter);
        where_clauses.push(compiled.sql);
        params.extend(compiled.params);
    }
    if let Some((start, end)) = spec.range {
        where_clauses.push("created_at BETWEEN ? AND ?".to_string());
        params.push(Value::Text(start.to_rfc3339()));
        params.push(Value::Text(end.to_rfc3339()));
    }

    let sort_expr = spec.sort_by.sql_expr();
    let dir = spec.order.sql_dir();
    let op = spec.order.keyset_op();

    if let Some(cursor) = &spec.cursor {
        let state = CursorState::decode(cursor)?;
        where_clauses.push(format!("({sort_expr}, created_at, uri) {op} (?, ?, ?)"));
        params.push(json_to_param_value(&state.sort_key));
        params.push(Value::Text(state.created_at));
        params.push(Value::Text(state.uri));
    }

    let where_sql = if where_clauses.is_empty() { "1".to_string() } else { where_clauses.join(" AND ") };
    let limit = spec.page_size.min(spec.scan_limit).max(1);

    let sql = format!(
        "SELECT post_json, {sort_expr} AS sort_key, created_at, uri FROM posts \
         WHERE {where_sql} \
         ORDER BY {sort_expr} {dir}, created_at {dir}, uri {dir} \
         LIMIT ?"
    );
    params.push(Value::Integer(limit as i64));

    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query(params_from_iter(params.iter()))?;

    let mut posts = Vec::new();
    let mut last_cursor_state = None;
    while let Some(row) = rows.next()? {
        let post_json: String = row.get(0)?;
        let sort_key: Value = row.get(1)?;
        let created_at: String = row.get(2)?;
        let uri: String = row.get(3)?;

        let post: Post = serde_json::from_str(&post_json)?;
        last_cursor_state = Some(CursorState { sort_key: value_to_json(&sort_key), created_at, uri });
        posts.push(post);
    }

    let next_cursor = if posts.len() as i64 >= limit as i64 {
        last_cursor_state.map(|s| s.encode())
    } else {
        None
    };

    Ok(QueryPage { posts, next_cursor })
}

/// Converts a value read back from a `sort_key` column/expression into the
/// JSON shape `CursorState` carries, preserving its storage class.
fn value_to_json(value: &Value) -> serde_json::Value {
    match value {
        Value::Null => serde_json::Value::Null,
        Value::Integer(i) => serde_json::Value::from(*i),
        Value::Real(f) => serde_json::Number::from_f64(*f)
            .map(serde_json::Value::Number)
            .unwrap_or(serde_json::Value::Null),
        Value::Text(s) => serde_json::Value::String(s.clone()),
        Value::Blob(b) => serde_json::Value::String(String::from_utf8_lossy(b).to_string()),
    }
}

/// Inverse of [`value_to_json`]: rebinds a cursor's `sort_key` as a query
/// parameter with the same storage class it was read with, so the keyset
/// comparison stays type-consistent regardless of `sort_by`.
fn json_to_param_value(value: &serde_json::Value) -> Value {
    match value {
        serde_json::Value::Null => Value::Null,
        serde_json::Value::Bool(b) => Value::Integer(if *b { 1 } else { 0 }),
        serde_json::Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Value::Integer(i)
            } else if let Some(f) = n.as_f64() {
                Value::Real(f)
            } else {
                Value::Null
            }
        }
        serde_json::Value::String(s) => Value::Text(s.clone()),
        other => Value::Text(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::Index;
    use crate::primitives::{AtUri, Cid, Did, EventMeta, Event, Handle, Hashtag};

    fn sample_post(uri: &str, author: &str, tag: &str, days: i64) -> Post {
        Post {
            uri: AtUri::from(uri),
            cid: Cid("c".into()),
            author: Handle::new(author),
            author_did: Did(format!("did:plc:{author}")),
            created_at: chrono::DateTime::parse_from_rfc3339("2026-01-01T00:00:00Z")
                .unwrap()
                .with_timezone(&Utc)
                + chrono::Duration::days(days),
            text: "hi".into(),
            hashtags: vec![Hashtag::new(tag)],
            mentions: vec![],
            links: vec![],
            langs: vec![],
            reply: None,
            embed: None,
            metrics: None,
            feed: None,
        }
    }

    fn index_with(posts: Vec<Post>) -> (tempfile::TempDir, Index) {
        let dir = tempfile::tempdir().unwrap();
        let index = Index::open(&dir.path().join("i.sqlite3")).unwrap();
        for post in posts {
            index
                .apply_for_tests(&Event::PostUpsert { post, meta: EventMeta::new("test", "test") })
                .unwrap();
        }
        (dir, index)
    }

    #[test]
    fn pushdown_author_filters_correctly() {
        let (_dir, index) = index_with(vec![
            sample_post("at://x/1", "alice", "effect", 0),
            sample_post("at://x/2", "bob", "later", 2),
        ]);
        let mut spec = QuerySpec::new(SortBy::CreatedAt, SortOrder::Asc);
        spec.filter = Some(FilterAst::Author { handle: Handle::new("alice") });
        let page = query(index.pool(), &spec).unwrap();
        assert_eq!(page.posts.len(), 1);
        assert_eq!(page.posts[0].uri.as_str(), "at://x/1");
    }

    #[test]
    fn keyset_pagination_has_no_duplicates_across_pages() {
        let (_dir, index) = index_with(vec![
            sample_post("at://x/1", "a", "t", 0),
            sample_post("at://x/2", "a", "t", 1),
            sample_post("at://x/3", "a", "t", 2),
        ]);
        let mut spec = QuerySpec::new(SortBy::CreatedAt, SortOrder::Asc);
        spec.page_size = 1;
        let page1 = query(index.pool(), &spec).unwrap();
        assert_eq!(page1.posts.len(), 1);
        spec.cursor = page1.next_cursor.clone();
        let page2 = query(index.pool(), &spec).unwrap();
        assert_ne!(page1.posts[0].uri, page2.posts[0].uri);
    }

    #[test]
    fn keyset_pagination_over_engagement_visits_every_post_once() {
        let (_dir, index) = index_with(vec![
            sample_post("at://x/1", "a", "t", 0),
            sample_post("at://x/2", "a", "t", 1),
            sample_post("at://x/3", "a", "t", 2),
        ]);
        let mut spec = QuerySpec::new(SortBy::Engagement, SortOrder::Desc);
        spec.page_size = 1;

        let mut seen = Vec::new();
        loop {
            let page = query(index.pool(), &spec).unwrap();
            assert_eq!(page.posts.len(), 1, "each page must make progress, not return empty/duplicate rows");
            seen.push(page.posts[0].uri.as_str().to_string());
            match page.next_cursor.clone() {
                Some(cursor) => spec.cursor = Some(cursor),
                None => break,
            }
            assert!(seen.len() <= 3, "pagination did not terminate: likely re-binding sort_key as TEXT");
        }

        seen.sort();
        seen.dedup();
        assert_eq!(seen.len(), 3, "every post must be visited exactly once across pages");
    }
}
