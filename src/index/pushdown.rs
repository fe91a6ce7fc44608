//! Rewrites a `FilterAst` into a SQL WHERE fragment.
//!
//! Unsupported leaves over-approximate to `TRUE` rather than being rejected,
//! so the index always returns a superset of the true result (invariant 7).
//! The in-memory filter runtime is the authority for exact matching; this
//! compiler only needs to narrow the scan.

use rusqlite::types::Value;

use crate::filter::FilterAst;

/// A compiled WHERE fragment plus its positional parameters, in the order
/// `?` placeholders appear in `sql`.
pub struct Compiled {
    pub sql: String,
    pub params: Vec<Value>,
    /// True iff every leaf in the tree was pushed verbatim (no leaf
    /// over-approximated to `TRUE`). Used by callers that want to skip a
    /// redundant in-memory re-filter when it would be a no-op.
    pub fully_pushable: bool,
}

pub fn compile(filter: &FilterAst) -> Compiled {
    let mut params = Vec::new();
    let (sql, fully_pushable) = compile_node(filter, &mut params);
    Compiled { sql, params, fully_pushable }
}

/// Returns `(sql_fragment, fully_pushable)`.
fn compile_node(filter: &FilterAst, params: &mut Vec<Value>) -> (String, bool) {
    match filter {
        FilterAst::All => ("1".to_string(), true),
        FilterAst::None => ("0".to_string(), true),

        FilterAst::And { clauses } => combine_and(clauses, params),
        FilterAst::Or { clauses } => combine_or(clauses, params),
        FilterAst::Not { clause } => {
            let (inner, pushable) = compile_node(clause, params);
            if pushable {
                (format!("NOT ({inner})"), true)
            } else {
                ("1".to_string(), false)
            }
        }

        FilterAst::Author { handle } => {
            params.push(Value::Text(handle.as_str().to_string()));
            ("author = ?".to_string(), true)
        }
        FilterAst::AuthorIn { handles } => in_list("author", handles.iter().map(|h| h.as_str()), params),

        FilterAst::Hashtag { tag } => {
            params.push(Value::Text(tag.as_str().to_string()));
            ("EXISTS (SELECT 1 FROM post_hashtag h WHERE h.uri = posts.uri AND h.tag = ?)".to_string(), true)
        }
        FilterAst::HashtagIn { tags } => {
            if tags.is_empty() {
                return ("0".to_string(), true);
            }
            let placeholders = std::iter::repeat("?").take(tags.len()).collect::<Vec<_>>().join(", ");
            for tag in tags {
                params.push(Value::Text(tag.as_str().to_string()));
            }
            (
                format!("EXISTS (SELECT 1 FROM post_hashtag h WHERE h.uri = posts.uri AND h.tag IN ({placeholders}))"),
                true,
            )
        }

        FilterAst::Contains { text, case_sensitive } => {
            if *case_sensitive {
                params.push(Value::Text(text.clone()));
                ("instr(text, ?) > 0".to_string(), true)
            } else if text.is_ascii() {
                params.push(Value::Text(text.to_lowercase()));
                ("instr(lower(text), ?) > 0".to_string(), true)
            } else {
                // Unicode-aware case-insensitive containment isn't expressible
                // in stock SQLite `lower()`; fall back to in-memory evaluation.
                ("1".to_string(), false)
            }
        }

        FilterAst::IsReply => ("is_reply = 1".to_string(), true),
        FilterAst::IsQuote => ("is_quote = 1".to_string(), true),
        FilterAst::IsRepost => ("is_repost = 1".to_string(), true),
        FilterAst::IsOriginal => ("is_original = 1".to_string(), true),

        FilterAst::HasLinks => ("has_links = 1".to_string(), true),
        FilterAst::HasMedia => ("has_media = 1".to_string(), true),
        FilterAst::HasEmbed => ("has_embed = 1".to_string(), true),
        FilterAst::HasImages => ("has_images = 1".to_string(), true),
        FilterAst::HasVideo => ("has_video = 1".to_string(), true),
        FilterAst::MinImages { n } => {
            params.push(Value::Integer(*n as i64));
            ("image_count >= ?".to_string(), true)
        }

        FilterAst::HasAltText => ("has_alt_text = 1".to_string(), true),
        FilterAst::NoAltText => ("image_count > 0 AND has_alt_text = 0".to_string(), true),
        FilterAst::AltText { text } => {
            if text.is_ascii() {
                params.push(Value::Text(format!("\"{}\"", text.replace('"', "\"\""))));
                ("posts.rowid IN (SELECT rowid FROM posts_fts WHERE alt_text MATCH ?)".to_string(), true)
            } else {
                ("1".to_string(), false)
            }
        }

        FilterAst::Language { langs } => {
            if langs.is_empty() {
                return ("0".to_string(), true);
            }
            let placeholders = std::iter::repeat("?").take(langs.len()).collect::<Vec<_>>().join(", ");
            for lang in langs {
                params.push(Value::Text(lang.to_lowercase()));
            }
            let sub_placeholders = std::iter::repeat("?").take(langs.len()).collect::<Vec<_>>().join(", ");
            for lang in langs {
                params.push(Value::Text(lang.to_lowercase()));
            }
            (
                format!(
                    "(EXISTS (SELECT 1 FROM post_lang pl WHERE pl.uri = posts.uri AND pl.lang IN ({placeholders})) OR LOWER(lang) IN ({sub_placeholders}))"
                ),
                true,
            )
        }

        FilterAst::Engagement { min_likes, min_reposts, min_replies } => {
            let mut clauses = Vec::new();
            if let Some(n) = min_likes {
                params.push(Value::Integer(*n as i64));
                clauses.push("like_count >= ?".to_string());
            }
            if let Some(n) = min_reposts {
                params.push(Value::Integer(*n as i64));
                clauses.push("repost_count >= ?".to_string());
            }
            if let Some(n) = min_replies {
                params.push(Value::Integer(*n as i64));
                clauses.push("reply_count >= ?".to_string());
            }
            if clauses.is_empty() {
                ("1".to_string(), true)
            } else {
                (clauses.join(" AND "), true)
            }
        }

        FilterAst::DateRange { start, end } => {
            params.push(Value::Text(start.to_rfc3339()));
            params.push(Value::Text(end.to_rfc3339()));
            ("created_at BETWEEN ? AND ?".to_string(), true)
        }

        // Side-effectful or otherwise unpushable leaves: over-approximate.
        FilterAst::Regex { .. }
        | FilterAst::HasValidLinks
        | FilterAst::Trending { .. }
        | FilterAst::Llm { .. } => ("1".to_string(), false),
    }
}

fn in_list<'a>(column: &str, values: impl Iterator<Item = &'a str>, params: &mut Vec<Value>) -> (String, bool) {
    let values: Vec<&str> = values.collect();
    if values.is_empty() {
        return ("0".to_string(), true);
    }
    let placeholders = std::iter::repeat("?").take(values.len()).collect::<Vec<_>>().join(", ");
    for v in values {
        params.push(Value::Text(v.to_string()));
    }
    (format!("{column} IN ({placeholders})"), true)
}

/// `And` absorbs `TRUE`, short-circuits on `FALSE`, flattens nested `And`.
fn combine_and(clauses: &[FilterAst], params: &mut Vec<Value>) -> (String, bool) {
    let mut parts = Vec::new();
    let mut fully_pushable = true;
    for clause in clauses {
        let (sql, pushable) = compile_node(clause, params);
        if sql == "0" {
            return ("0".to_string(), true);
        }
        if sql != "1" {
            parts.push(sql);
        }
        fully_pushable &= pushable;
    }
    if parts.is_empty() {
        ("1".to_string(), fully_pushable)
    } else {
        (format!("({})", parts.join(" AND ")), fully_pushable)
    }
}

/// `Or` only pushes if every clause is pushable; otherwise the whole node
/// over-approximates to `TRUE` rather than risk under-matching.
fn combine_or(clauses: &[FilterAst], params: &mut Vec<Value>) -> (String, bool) {
    let mut parts = Vec::new();
    let mut all_pushable = true;
    let mut sub_params = Vec::new();
    for clause in clauses {
        let (sql, pushable) = compile_node(clause, &mut sub_params);
        if !pushable {
            all_pushable = false;
            break;
        }
        if sql == "1" {
            return ("1".to_string(), true);
        }
        if sql != "0" {
            parts.push(sql);
        }
    }
    if !all_pushable {
        return ("1".to_string(), false);
    }
    params.extend(sub_params);
    if parts.is_empty() {
        ("0".to_string(), true)
    } else {
        (format!("({})", parts.join(" OR ")), true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::primitives::{Handle, Hashtag};

    #[test]
    fn author_compiles_to_equality() {
        let compiled = compile(&FilterAst::Author { handle: Handle::new("alice") });
        assert_eq!(compiled.sql, "author = ?");
        assert!(compiled.fully_pushable);
    }

    #[test]
    fn or_with_unpushable_clause_over_approximates() {
        let filter = FilterAst::Or {
            clauses: vec![
                FilterAst::Author { handle: Handle::new("alice") },
                FilterAst::Contains { text: "🙂".into(), case_sensitive: false },
            ],
        };
        let compiled = compile(&filter);
        assert_eq!(compiled.sql, "1");
        assert!(!compiled.fully_pushable);
    }

    #[test]
    fn and_absorbs_true_leaves() {
        let filter = FilterAst::And { clauses: vec![FilterAst::All, FilterAst::IsReply] };
        let compiled = compile(&filter);
        assert_eq!(compiled.sql, "(is_reply = 1)");
    }

    #[test]
    fn empty_author_in_is_false() {
        let compiled = compile(&FilterAst::AuthorIn { handles: vec![] });
        assert_eq!(compiled.sql, "0");
    }

    #[test]
    fn hashtag_in_uses_exists_with_in_clause() {
        let compiled = compile(&FilterAst::HashtagIn { tags: vec![Hashtag::new("a"), Hashtag::new("b")] });
        assert!(compiled.sql.contains("IN (?, ?)"));
        assert_eq!(compiled.params.len(), 2);
    }
}
