//! Source adapters.
//!
//! Only `Fixture` is concretely implemented — the HTTP/Jetstream adapters
//! that back the other variants are external collaborators out of scope for
//! this core. The tagged `Source` enum still names every variant the sync
//! engine's CLI surface is expected to accept, even where only a subset of
//! producers exist in-tree.

use futures::stream::{self, BoxStream};
use serde::{Deserialize, Serialize};

use crate::error::AppResult;
use crate::primitives::{AtUri, Cid, Did, Handle, Post};

/// Opaque remote payload a source yields before it's parsed into a [`Post`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawPost {
    pub uri: AtUri,
    #[serde(default)]
    pub cid: Option<Cid>,
    #[serde(default)]
    pub author: Option<Handle>,
    #[serde(default)]
    pub author_did: Option<Did>,
    /// The opaque remote record. This crate's only concrete source
    /// (`Fixture`) stores an already-parsed `Post` here as JSON so `parse`
    /// is a pure decode with no network-specific shape to translate.
    pub record: serde_json::Value,
    #[serde(default)]
    pub indexed_at: Option<chrono::DateTime<chrono::Utc>>,
    /// Remote pagination marker, carried through so the sync engine can
    /// checkpoint at page granularity.
    #[serde(default)]
    pub page_cursor: Option<String>,
}

impl RawPost {
    /// Decodes `record` into a canonical [`Post`]. The `Fixture` source
    /// stores posts pre-parsed, so this is a direct deserialize; a real
    /// network adapter would translate its wire shape here instead.
    pub fn parse(&self) -> AppResult<Post> {
        Ok(serde_json::from_value(self.record.clone())?)
    }
}

/// A data source, tagged by channel. Only [`Source::Fixture`] has a concrete
/// [`SourceStream`] implementation in this crate.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum Source {
    Timeline { cursor: Option<String> },
    Feed { uri: AtUri, cursor: Option<String> },
    List { uri: AtUri, cursor: Option<String> },
    Notifications { cursor: Option<String> },
    Author { actor: Handle, filter: Option<String>, include_pins: bool, cursor: Option<String> },
    Thread { uri: AtUri, depth: Option<u32>, parent_height: Option<u32> },
    Jetstream {
        endpoint: Option<String>,
        collections: Vec<String>,
        dids: Vec<Did>,
        compress: bool,
        max_message_size: Option<usize>,
    },
    /// In-memory, pre-parsed source used by the bundled CLI's
    /// `sync --fixture` command and by tests.
    Fixture { posts: Vec<RawPost> },
}

impl Source {
    /// Stable key this source's checkpoint is filed under. `SyncCheckpoint`
    /// is keyed per `(store, source_key)`.
    pub fn source_key(&self) -> String {
        match self {
            Source::Timeline { .. } => "timeline".to_string(),
            Source::Feed { uri, .. } => format!("feed:{}", uri.as_str()),
            Source::List { uri, .. } => format!("list:{}", uri.as_str()),
            Source::Notifications { .. } => "notifications".to_string(),
            Source::Author { actor, .. } => format!("author:{}", actor.as_str()),
            Source::Thread { uri, .. } => format!("thread:{}", uri.as_str()),
            Source::Jetstream { .. } => "jetstream".to_string(),
            Source::Fixture { .. } => "fixture".to_string(),
        }
    }
}

/// A lazily-produced sequence of raw elements from a source.
pub trait SourceStream {
    fn stream(self) -> BoxStream<'static, AppResult<RawPost>>;
}

impl SourceStream for Source {
    fn stream(self) -> BoxStream<'static, AppResult<RawPost>> {
        match self {
            Source::Fixture { posts } => Box::pin(stream::iter(posts.into_iter().map(Ok))),
            other => {
                let key = other.source_key();
                Box::pin(stream::once(async move {
                    Err(crate::error::AppError::sync(
                        crate::error::SyncStage::Source,
                        format!("source `{key}` has no adapter in this core; use Fixture"),
                    ))
                }))
            }
        }
    }
}
