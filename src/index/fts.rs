//! Full-text search over `posts_fts`.

use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use serde::{Deserialize, Serialize};

use crate::error::AppResult;
use crate::primitives::Post;

const FTS_OPERATOR_CHARS: &[char] = &['"', '*', '(', ')', ':', '^'];

fn looks_like_fts_syntax(query: &str) -> bool {
    let upper = query.to_uppercase();
    FTS_OPERATOR_CHARS.iter().any(|c| query.contains(*c))
        || upper.contains(" AND ")
        || upper.contains(" OR ")
        || upper.contains(" NOT ")
        || upper.contains("NEAR")
}

/// Quotes each whitespace-separated token and joins with implicit AND, so
/// punctuation in user input can't be misread as FTS5 syntax.
fn literal_form(query: &str) -> String {
    query
        .split_whitespace()
        .map(|tok| format!("\"{}\"", tok.replace('"', "\"\"")))
        .collect::<Vec<_>>()
        .join(" ")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchSort {
    Relevance,
    Newest,
    Oldest,
}

pub struct SearchSpec {
    pub query: String,
    pub limit: usize,
    pub cursor: Option<usize>,
    pub sort: SearchSort,
}

impl SearchSpec {
    pub fn new(query: impl Into<String>) -> Self {
        Self { query: query.into(), limit: 25, cursor: None, sort: SearchSort::Relevance }
    }
}

pub struct SearchPage {
    pub posts: Vec<Post>,
    pub next_cursor: Option<usize>,
}

pub fn search_posts(pool: &Pool<SqliteConnectionManager>, spec: &SearchSpec) -> AppResult<SearchPage> {
    let conn = pool.get()?;
    let offset = spec.cursor.unwrap_or(0);

    let order_by = match spec.sort {
        SearchSort::Relevance => "bm25(posts_fts)",
        SearchSort::Newest => "posts.created_at DESC, bm25(posts_fts)",
        SearchSort::Oldest => "posts.created_at ASC, bm25(posts_fts)",
    };

    let sql = format!(
        "SELECT posts.post_json FROM posts_fts \
         JOIN posts ON posts.rowid = posts_fts.rowid \
         WHERE posts_fts MATCH ?1 \
         ORDER BY {order_by} \
         LIMIT ?2 OFFSET ?3"
    );

    let run = |match_query: &str| -> AppResult<Vec<Post>> {
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(
            rusqlite::params![match_query, (spec.limit + 1) as i64, offset as i64],
            |row| row.get::<_, String>(0),
        )?;
        let mut posts = Vec::new();
        for row in rows {
            posts.push(serde_json::from_str(&row?)?);
        }
        Ok(posts)
    };

    let raw_attempt = if looks_like_fts_syntax(&spec.query) {
        run(&spec.query)
    } else {
        run(&literal_form(&spec.query))
    };

    let mut posts = match raw_attempt {
        Ok(posts) => posts,
        Err(_) => run(&literal_form(&spec.query))?,
    };

    let next_cursor = if posts.len() > spec.limit { Some(offset + spec.limit) } else { None };
    posts.truncate(spec.limit);

    Ok(SearchPage { posts, next_cursor })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn literal_form_quotes_each_token() {
        assert_eq!(literal_form("Kubernetes Docker"), "\"Kubernetes\" \"Docker\"");
    }

    #[test]
    fn detects_fts_operator_syntax() {
        assert!(looks_like_fts_syntax("\"Kubernetes\""));
        assert!(looks_like_fts_syntax("a AND b"));
        assert!(!looks_like_fts_syntax("Kubernetes Docker"));
    }
}
