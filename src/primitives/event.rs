//! Events: the only thing ever written to a store's log.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ids::{AtUri, Cid, EventSeq};
use super::post::Post;

/// Provenance attached to every event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventMeta {
    /// Fetch channel tag, e.g. `"timeline"`, `"feed:at://..."`, `"jetstream"`.
    pub source: String,
    /// Free-form provenance string (command line, derivation lineage, etc).
    pub command: String,
    #[serde(default)]
    pub filter_fingerprint: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl EventMeta {
    pub fn new(source: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            command: command.into(),
            filter_fingerprint: None,
            created_at: Utc::now(),
        }
    }

    pub fn with_fingerprint(mut self, fp: impl Into<String>) -> Self {
        self.filter_fingerprint = Some(fp.into());
        self
    }
}

/// The tagged event union. This is the only thing the event log ever stores.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event_tag")]
pub enum Event {
    PostUpsert { post: Post, meta: EventMeta },
    PostDelete {
        uri: AtUri,
        #[serde(default)]
        cid: Option<Cid>,
        meta: EventMeta,
    },
}

impl Event {
    pub fn uri(&self) -> &AtUri {
        match self {
            Event::PostUpsert { post, .. } => &post.uri,
            Event::PostDelete { uri, .. } => uri,
        }
    }

    pub fn meta(&self) -> &EventMeta {
        match self {
            Event::PostUpsert { meta, .. } => meta,
            Event::PostDelete { meta, .. } => meta,
        }
    }

    pub fn tag(&self) -> &'static str {
        match self {
            Event::PostUpsert { .. } => "PostUpsert",
            Event::PostDelete { .. } => "PostDelete",
        }
    }
}

/// What the log physically stores: a sequence number, a format version, and
/// the event itself. `version` is currently always `1`; it exists so a future
/// additive schema change can be detected at decode time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventRecord {
    pub seq: EventSeq,
    pub version: u32,
    pub event: Event,
}

pub const CURRENT_EVENT_VERSION: u32 = 1;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::primitives::ids::{Did, Handle};

    fn meta() -> EventMeta {
        EventMeta::new("timeline", "test")
    }

    #[test]
    fn event_uri_dispatches_on_variant() {
        let del = Event::PostDelete {
            uri: AtUri::from("at://x/1"),
            cid: None,
            meta: meta(),
        };
        assert_eq!(del.uri().as_str(), "at://x/1");
        assert_eq!(del.tag(), "PostDelete");
    }

    #[test]
    fn event_round_trips_through_json() {
        let post = Post {
            uri: AtUri::from("at://x/1"),
            cid: Cid("c1".into()),
            author: Handle::new("alice"),
            author_did: Did("did:plc:a".into()),
            created_at: "2026-01-01T00:00:00Z".parse().unwrap(),
            text: "hi".into(),
            hashtags: vec![],
            mentions: vec![],
            links: vec![],
            langs: vec![],
            reply: None,
            embed: None,
            metrics: None,
            feed: None,
        };
        let ev = Event::PostUpsert { post, meta: meta() };
        let json = serde_json::to_string(&ev).unwrap();
        let back: Event = serde_json::from_str(&json).unwrap();
        assert_eq!(ev, back);
    }
}
