//! Derived columns computed from a `Post` at apply time.

use crate::primitives::Post;

pub struct DerivedRow {
    pub lang: Option<String>,
    pub is_reply: bool,
    pub is_quote: bool,
    pub is_repost: bool,
    pub is_original: bool,
    pub has_links: bool,
    pub has_media: bool,
    pub has_embed: bool,
    pub has_images: bool,
    pub image_count: i64,
    pub alt_text: String,
    pub has_alt_text: bool,
    pub has_video: bool,
    pub like_count: i64,
    pub repost_count: i64,
    pub reply_count: i64,
    pub quote_count: i64,
    pub reply_root_uri: Option<String>,
    pub created_date: String,
}

impl DerivedRow {
    pub fn compute(post: &Post) -> Self {
        let metrics = post.metrics.unwrap_or_default();
        Self {
            lang: post.primary_lang().map(|s| s.to_string()),
            is_reply: post.is_reply(),
            is_quote: post.is_quote(),
            is_repost: post.is_repost(),
            is_original: post.is_original(),
            has_links: post.has_links(),
            has_media: post.has_media(),
            has_embed: post.has_embed(),
            has_images: post.has_images(),
            image_count: post.image_count() as i64,
            alt_text: post.alt_text(),
            has_alt_text: post.has_alt_text(),
            has_video: post.has_video(),
            like_count: metrics.like_count as i64,
            repost_count: metrics.repost_count as i64,
            reply_count: metrics.reply_count as i64,
            quote_count: metrics.quote_count as i64,
            reply_root_uri: post.reply.as_ref().map(|r| r.root_uri.as_str().to_string()),
            created_date: post.created_at.format("%Y-%m-%d").to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::primitives::{AtUri, Cid, Did, Handle, Metrics, Reply};

    #[test]
    fn derives_reply_root_and_date() {
        let post = Post {
            uri: AtUri::from("at://x/2"),
            cid: Cid("c2".into()),
            author: Handle::new("bob"),
            author_did: Did("did:plc:b".into()),
            created_at: "2026-03-04T12:00:00Z".parse().unwrap(),
            text: "reply text".into(),
            hashtags: vec![],
            mentions: vec![],
            links: vec![],
            langs: vec![],
            reply: Some(Reply { root_uri: AtUri::from("at://x/1"), parent_uri: AtUri::from("at://x/1") }),
            embed: None,
            metrics: Some(Metrics { like_count: 5, repost_count: 0, reply_count: 0, quote_count: 0 }),
            feed: None,
        };
        let derived = DerivedRow::compute(&post);
        assert_eq!(derived.reply_root_uri.as_deref(), Some("at://x/1"));
        assert_eq!(derived.created_date, "2026-03-04");
        assert!(derived.is_reply);
        assert_eq!(derived.like_count, 5);
    }
}
