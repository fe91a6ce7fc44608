//! In-memory filter evaluation.
//!
//! Pure leaves are evaluated directly against a `Post`. Side-effectful
//! leaves (`HasValidLinks`, `Trending`, `Llm`) are dispatched through a
//! dependency-injected `Collaborators` trait object rather than a
//! thread-local or global registry.

use regex::Regex;

use crate::error::{AppError, OnError};
use crate::primitives::Post;

use super::FilterAst;

/// Side-effectful collaborators a filter may need. Real implementations
/// (HTTP link checker, trending-topics service, LLM client) are external to
/// this crate; only `NullCollaborators` ships here.
pub trait Collaborators: Send + Sync {
    fn check_link_validity(&self, url: &str) -> Result<bool, AppError>;
    fn is_trending(&self, tag: &str) -> Result<bool, AppError>;
    /// Returns a confidence in `[0.0, 1.0]`.
    fn llm_decide(&self, prompt: &str, post: &Post) -> Result<f32, AppError>;
}

/// Always fails every collaborator call. Correct behavior then depends
/// entirely on each leaf's `on_error` policy, so the runtime stays well
/// defined with or without a real collaborator wired in.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullCollaborators;

impl Collaborators for NullCollaborators {
    fn check_link_validity(&self, _url: &str) -> Result<bool, AppError> {
        Err(AppError::filter_eval("no link-validity collaborator configured"))
    }

    fn is_trending(&self, _tag: &str) -> Result<bool, AppError> {
        Err(AppError::filter_eval("no trending-topics collaborator configured"))
    }

    fn llm_decide(&self, _prompt: &str, _post: &Post) -> Result<f32, AppError> {
        Err(AppError::filter_eval("no LLM collaborator configured"))
    }
}

/// Outcome of evaluating a filter against one post. `decisions` records a
/// short opaque label per side-effectful leaf consulted, for audit logging.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EvalOutcome {
    pub matched: bool,
    pub decisions: Vec<String>,
}

pub struct FilterRuntime<'c> {
    collaborators: &'c dyn Collaborators,
}

impl<'c> FilterRuntime<'c> {
    pub fn new(collaborators: &'c dyn Collaborators) -> Self {
        Self { collaborators }
    }

    pub fn evaluate(&self, filter: &FilterAst, post: &Post) -> Result<EvalOutcome, AppError> {
        let mut decisions = Vec::new();
        let matched = self.eval_node(filter, post, &mut decisions)?;
        Ok(EvalOutcome { matched, decisions })
    }

    fn eval_node(
        &self,
        filter: &FilterAst,
        post: &Post,
        decisions: &mut Vec<String>,
    ) -> Result<bool, AppError> {
        let result = match filter {
            FilterAst::All => true,
            FilterAst::None => false,
            FilterAst::And { clauses } => {
                let mut ok = true;
                for clause in clauses {
                    if !self.eval_node(clause, post, decisions)? {
                        ok = false;
                    }
                }
                ok
            }
            FilterAst::Or { clauses } => {
                let mut ok = false;
                for clause in clauses {
                    if self.eval_node(clause, post, decisions)? {
                        ok = true;
                    }
                }
                ok
            }
            FilterAst::Not { clause } => !self.eval_node(clause, post, decisions)?,

            FilterAst::Author { handle } => &post.author == handle,
            FilterAst::AuthorIn { handles } => handles.contains(&post.author),

            FilterAst::Hashtag { tag } => post.hashtags.contains(tag),
            FilterAst::HashtagIn { tags } => post.hashtags.iter().any(|t| tags.contains(t)),

            FilterAst::Contains { text, case_sensitive } => {
                if *case_sensitive {
                    post.text.contains(text.as_str())
                } else {
                    post.text.to_lowercase().contains(&text.to_lowercase())
                }
            }

            FilterAst::IsReply => post.is_reply(),
            FilterAst::IsQuote => post.is_quote(),
            FilterAst::IsRepost => post.is_repost(),
            FilterAst::IsOriginal => post.is_original(),

            FilterAst::HasLinks => post.has_links(),
            FilterAst::HasMedia => post.has_media(),
            FilterAst::HasEmbed => post.has_embed(),
            FilterAst::HasImages => post.has_images(),
            FilterAst::HasVideo => post.has_video(),
            FilterAst::MinImages { n } => post.image_count() as u32 >= *n,

            FilterAst::HasAltText => post.has_alt_text(),
            FilterAst::NoAltText => post.has_images() && !post.has_alt_text(),
            FilterAst::AltText { text } => post.alt_text().to_lowercase().contains(&text.to_lowercase()),

            FilterAst::Language { langs } => {
                post.langs.iter().any(|l| langs.iter().any(|x| x.eq_ignore_ascii_case(l)))
            }

            FilterAst::Engagement { min_likes, min_reposts, min_replies } => {
                let m = post.metrics.unwrap_or_default();
                min_likes.map_or(true, |n| m.like_count >= n)
                    && min_reposts.map_or(true, |n| m.repost_count >= n)
                    && min_replies.map_or(true, |n| m.reply_count >= n)
            }

            FilterAst::DateRange { start, end } => post.created_at >= *start && post.created_at <= *end,

            FilterAst::Regex { pattern } => Regex::new(pattern)
                .map_err(|e| AppError::filter_eval(format!("invalid regex: {e}")))?
                .is_match(&post.text),

            FilterAst::HasValidLinks => {
                self.eval_side_effect(decisions, "has_valid_links", OnError::Exclude, || {
                    for link in &post.links {
                        if !self.collaborators.check_link_validity(link)? {
                            return Ok(false);
                        }
                    }
                    Ok(!post.links.is_empty())
                })?
            }

            FilterAst::Trending { tag } => {
                self.eval_side_effect(decisions, &format!("trending:{tag}"), OnError::Exclude, || {
                    self.collaborators.is_trending(tag)
                })?
            }

            FilterAst::Llm { prompt, min_confidence, on_error } => {
                self.eval_side_effect(decisions, &format!("llm:{prompt}"), *on_error, || {
                    Ok(self.collaborators.llm_decide(prompt, post)? >= *min_confidence)
                })?
            }
        };
        Ok(result)
    }

    fn eval_side_effect(
        &self,
        decisions: &mut Vec<String>,
        label: &str,
        on_error: OnError,
        f: impl FnOnce() -> Result<bool, AppError>,
    ) -> Result<bool, AppError> {
        match f() {
            Ok(ok) => {
                decisions.push(format!("{label}={ok}"));
                Ok(ok)
            }
            Err(e) => {
                decisions.push(format!("{label}=error:{e}"));
                match on_error {
                    OnError::Exclude => Ok(false),
                    OnError::Include => Ok(true),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::primitives::{AtUri, Cid, Did, Handle};

    fn sample_post() -> Post {
        Post {
            uri: AtUri::from("at://x/1"),
            cid: Cid("c1".into()),
            author: Handle::new("alice.bsky.social"),
            author_did: Did("did:plc:a".into()),
            created_at: "2026-01-01T00:00:00Z".parse().unwrap(),
            text: "Hello world".into(),
            hashtags: vec![],
            mentions: vec![],
            links: vec![],
            langs: vec!["en".into()],
            reply: None,
            embed: None,
            metrics: None,
            feed: None,
        }
    }

    #[test]
    fn author_leaf_matches() {
        let runtime = FilterRuntime::new(&NullCollaborators);
        let post = sample_post();
        let f = FilterAst::Author { handle: Handle::new("alice.bsky.social") };
        assert!(runtime.evaluate(&f, &post).unwrap().matched);
    }

    #[test]
    fn side_effect_leaf_with_no_collaborator_respects_on_error_exclude() {
        let runtime = FilterRuntime::new(&NullCollaborators);
        let post = sample_post();
        let f = FilterAst::Trending { tag: "rust".into() };
        assert!(!runtime.evaluate(&f, &post).unwrap().matched);
    }

    #[test]
    fn llm_leaf_with_on_error_include_matches_despite_failure() {
        let runtime = FilterRuntime::new(&NullCollaborators);
        let post = sample_post();
        let f = FilterAst::Llm { prompt: "is this spam?".into(), min_confidence: 0.5, on_error: OnError::Include };
        assert!(runtime.evaluate(&f, &post).unwrap().matched);
    }

    #[test]
    fn or_with_one_matching_clause_matches() {
        let runtime = FilterRuntime::new(&NullCollaborators);
        let post = sample_post();
        let f = FilterAst::Or {
            clauses: vec![FilterAst::IsReply, FilterAst::Contains { text: "world".into(), case_sensitive: false }],
        };
        assert!(runtime.evaluate(&f, &post).unwrap().matched);
    }
}
