//! Filter expression AST.
//!
//! The same AST is consumed by two independent evaluators: the pushdown
//! compiler (`crate::index::pushdown`), which rewrites it to a SQL WHERE
//! fragment and over-approximates leaves it can't express, and the filter
//! runtime (`crate::filter::runtime`), which evaluates it in memory against
//! a single `Post`, including side-effectful leaves.

pub mod fingerprint;
pub mod runtime;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::OnError;
use crate::primitives::{Handle, Hashtag};

pub use fingerprint::fingerprint;
pub use runtime::{Collaborators, FilterRuntime, NullCollaborators};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum FilterAst {
    All,
    None,
    And { clauses: Vec<FilterAst> },
    Or { clauses: Vec<FilterAst> },
    Not { clause: Box<FilterAst> },

    Author { handle: Handle },
    AuthorIn { handles: Vec<Handle> },

    Hashtag { tag: Hashtag },
    HashtagIn { tags: Vec<Hashtag> },

    Contains { text: String, case_sensitive: bool },

    IsReply,
    IsQuote,
    IsRepost,
    IsOriginal,

    HasLinks,
    HasMedia,
    HasEmbed,
    HasImages,
    HasVideo,
    MinImages { n: u32 },

    HasAltText,
    NoAltText,
    AltText { text: String },

    Language { langs: Vec<String> },

    Engagement {
        #[serde(default)]
        min_likes: Option<u64>,
        #[serde(default)]
        min_reposts: Option<u64>,
        #[serde(default)]
        min_replies: Option<u64>,
    },

    DateRange { start: DateTime<Utc>, end: DateTime<Utc> },

    Regex { pattern: String },
    HasValidLinks,
    Trending { tag: String },
    Llm { prompt: String, min_confidence: f32, #[serde(default)] on_error: OnError },
}

impl FilterAst {
    /// Whether this leaf (or, recursively, every leaf of this node) requires
    /// a collaborator to evaluate. Pure nodes never consult `Collaborators`.
    pub fn is_side_effectful(&self) -> bool {
        match self {
            FilterAst::HasValidLinks | FilterAst::Trending { .. } | FilterAst::Llm { .. } => true,
            FilterAst::And { clauses } | FilterAst::Or { clauses } => {
                clauses.iter().any(Self::is_side_effectful)
            }
            FilterAst::Not { clause } => clause.is_side_effectful(),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn and_is_side_effectful_if_any_clause_is() {
        let f = FilterAst::And {
            clauses: vec![FilterAst::IsReply, FilterAst::Trending { tag: "rust".into() }],
        };
        assert!(f.is_side_effectful());
    }

    #[test]
    fn pure_tree_is_not_side_effectful() {
        let f = FilterAst::Not { clause: Box::new(FilterAst::IsOriginal) };
        assert!(!f.is_side_effectful());
    }

    #[test]
    fn wire_format_round_trips() {
        let f = FilterAst::Author { handle: Handle::new("alice.bsky.social") };
        let json = serde_json::to_string(&f).unwrap();
        assert!(json.contains("\"kind\":\"Author\""));
        let back: FilterAst = serde_json::from_str(&json).unwrap();
        assert_eq!(f, back);
    }
}
