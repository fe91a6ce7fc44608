//! Typed identifiers and records shared by every other module.
//!
//! Nothing in here touches SQLite, the filesystem, or async runtimes — it is
//! pure data plus the small amount of logic (dedup, derived predicates) that
//! follows directly from the invariants in the data model.

pub mod event;
pub mod ids;
pub mod post;

pub use event::{Event, EventMeta, EventRecord, CURRENT_EVENT_VERSION};
pub use ids::{AtUri, Cid, Did, EventSeq, Handle, Hashtag};
pub use post::{Embed, Feed, ImageItem, Metrics, Post, Reply};
