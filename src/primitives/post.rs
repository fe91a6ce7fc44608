//! The canonical post record and its nested value types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ids::{AtUri, Cid, Did, Handle, Hashtag};

/// A reply pointer: the thread root and the immediate parent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reply {
    pub root_uri: AtUri,
    pub parent_uri: AtUri,
}

/// A single image in an `Embed::Images` variant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageItem {
    pub thumb: String,
    pub fullsize: String,
    #[serde(default)]
    pub alt: String,
}

/// Tagged embed variants. Encoded with an explicit `kind` tag so the wire
/// format round-trips without relying on field-shape inference.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum Embed {
    Images { items: Vec<ImageItem> },
    Video { thumb: Option<String>, playlist: Option<String> },
    External { uri: String, title: Option<String> },
    Record { uri: AtUri },
    RecordWithMedia { record: AtUri, media: Box<Embed> },
}

impl Embed {
    pub fn image_count(&self) -> usize {
        match self {
            Embed::Images { items } => items.len(),
            Embed::RecordWithMedia { media, .. } => media.image_count(),
            _ => 0,
        }
    }

    pub fn has_video(&self) -> bool {
        match self {
            Embed::Video { .. } => true,
            Embed::RecordWithMedia { media, .. } => media.has_video(),
            _ => false,
        }
    }

    pub fn is_quote(&self) -> bool {
        matches!(self, Embed::Record { .. } | Embed::RecordWithMedia { .. })
    }

    /// Concatenation of all alt text reachable from this embed, space-joined.
    pub fn alt_text(&self) -> String {
        match self {
            Embed::Images { items } => items
                .iter()
                .map(|i| i.alt.as_str())
                .filter(|a| !a.is_empty())
                .collect::<Vec<_>>()
                .join(" "),
            Embed::RecordWithMedia { media, .. } => media.alt_text(),
            _ => String::new(),
        }
    }
}

/// Engagement counters. All optional at the wire level; absent means unknown,
/// not zero, so callers use `.unwrap_or(0)` explicitly at the index boundary.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metrics {
    #[serde(default)]
    pub like_count: u64,
    #[serde(default)]
    pub repost_count: u64,
    #[serde(default)]
    pub reply_count: u64,
    #[serde(default)]
    pub quote_count: u64,
}

/// Present when this post is surfaced as someone else's repost.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Feed {
    pub reason: String,
}

/// The canonical, immutable post record.
///
/// `hashtags` is deduplicated at construction (`Post::new`); nothing else in
/// the core re-validates it, so code that builds a `Post` via struct-literal
/// syntax directly (tests, fixtures) is responsible for the invariant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Post {
    pub uri: AtUri,
    pub cid: Cid,
    pub author: Handle,
    pub author_did: Did,
    pub created_at: DateTime<Utc>,
    pub text: String,
    #[serde(default)]
    pub hashtags: Vec<Hashtag>,
    #[serde(default)]
    pub mentions: Vec<Handle>,
    #[serde(default)]
    pub links: Vec<String>,
    #[serde(default)]
    pub langs: Vec<String>,
    #[serde(default)]
    pub reply: Option<Reply>,
    #[serde(default)]
    pub embed: Option<Embed>,
    #[serde(default)]
    pub metrics: Option<Metrics>,
    #[serde(default)]
    pub feed: Option<Feed>,
}

impl Post {
    /// Normalizes the hashtag list: lowercases (already true for `Hashtag`)
    /// and removes duplicates while preserving first-seen order.
    pub fn dedup_hashtags(&mut self) {
        let mut seen = std::collections::HashSet::new();
        self.hashtags.retain(|tag| seen.insert(tag.clone()));
    }

    pub fn is_reply(&self) -> bool {
        self.reply.is_some()
    }

    pub fn is_quote(&self) -> bool {
        self.embed.as_ref().is_some_and(Embed::is_quote)
    }

    pub fn is_repost(&self) -> bool {
        self.feed.is_some()
    }

    pub fn is_original(&self) -> bool {
        !self.is_reply() && !self.is_repost()
    }

    pub fn has_links(&self) -> bool {
        !self.links.is_empty()
    }

    pub fn has_embed(&self) -> bool {
        self.embed.is_some()
    }

    pub fn has_media(&self) -> bool {
        matches!(
            self.embed,
            Some(Embed::Images { .. }) | Some(Embed::Video { .. })
        ) || self
            .embed
            .as_ref()
            .is_some_and(|e| matches!(e, Embed::RecordWithMedia { .. }))
    }

    pub fn has_images(&self) -> bool {
        self.image_count() > 0
    }

    pub fn image_count(&self) -> usize {
        self.embed.as_ref().map_or(0, Embed::image_count)
    }

    pub fn has_video(&self) -> bool {
        self.embed.as_ref().is_some_and(Embed::has_video)
    }

    pub fn alt_text(&self) -> String {
        self.embed.as_ref().map_or(String::new(), Embed::alt_text)
    }

    pub fn has_alt_text(&self) -> bool {
        !self.alt_text().is_empty()
    }

    pub fn primary_lang(&self) -> Option<&str> {
        self.langs.first().map(|s| s.as_str())
    }

    pub fn engagement_score(&self) -> u64 {
        let m = self.metrics.unwrap_or_default();
        m.like_count + 2 * m.repost_count + 3 * m.reply_count + 2 * m.quote_count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_post() -> Post {
        Post {
            uri: AtUri::from("at://did:plc:alice/app.bsky.feed.post/1"),
            cid: Cid("bafy1".into()),
            author: Handle::new("alice.bsky.social"),
            author_did: Did("did:plc:alice".into()),
            created_at: "2026-01-01T00:00:00Z".parse().unwrap(),
            text: "Hello #Effect #effect".into(),
            hashtags: vec![Hashtag::new("#Effect"), Hashtag::new("effect")],
            mentions: vec![],
            links: vec![],
            langs: vec!["en".into()],
            reply: None,
            embed: None,
            metrics: Some(Metrics {
                like_count: 1,
                repost_count: 2,
                reply_count: 3,
                quote_count: 4,
            }),
            feed: None,
        }
    }

    #[test]
    fn dedup_hashtags_removes_repeats() {
        let mut p = sample_post();
        p.dedup_hashtags();
        assert_eq!(p.hashtags.len(), 1);
    }

    #[test]
    fn is_original_when_no_reply_or_repost() {
        let p = sample_post();
        assert!(p.is_original());
        assert!(!p.is_reply());
        assert!(!p.is_repost());
    }

    #[test]
    fn engagement_score_matches_weighting() {
        let p = sample_post();
        // 1 + 2*2 + 3*3 + 2*4 = 1 + 4 + 9 + 8 = 22
        assert_eq!(p.engagement_score(), 22);
    }

    #[test]
    fn embed_image_count_and_alt_text() {
        let embed = Embed::Images {
            items: vec![
                ImageItem { thumb: "t1".into(), fullsize: "f1".into(), alt: "a cat".into() },
                ImageItem { thumb: "t2".into(), fullsize: "f2".into(), alt: "".into() },
            ],
        };
        assert_eq!(embed.image_count(), 2);
        assert_eq!(embed.alt_text(), "a cat");
    }
}
