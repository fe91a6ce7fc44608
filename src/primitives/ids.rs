//! Typed identifiers shared across the store engine.
//!
//! All of these are thin newtypes over `String`/`u64`. The point is not
//! abstraction for its own sake but to stop `uri` and `author` (both plain
//! strings on the wire) from being passed to the wrong parameter slot.

use serde::{Deserialize, Serialize};
use std::fmt;

/// `at://<did>/<collection>/<rkey>` — globally unique post identifier.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AtUri(pub String);

impl AtUri {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AtUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for AtUri {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for AtUri {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Opaque content hash of a record. Treated as an opaque string — the core
/// never interprets its bytes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Cid(pub String);

impl fmt::Display for Cid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A display handle, e.g. `alice.bsky.social`. Lowercased at construction so
/// equality and pushdown comparisons are case-insensitive without needing
/// `LOWER()` at query time.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Handle(String);

impl Handle {
    pub fn new(raw: impl AsRef<str>) -> Self {
        Self(raw.as_ref().to_lowercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A decentralized identifier, e.g. `did:plc:abc123`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Did(pub String);

impl fmt::Display for Did {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A hashtag, always lowercased and without a leading `#`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Hashtag(String);

impl Hashtag {
    pub fn new(raw: impl AsRef<str>) -> Self {
        let s = raw.as_ref();
        let s = s.strip_prefix('#').unwrap_or(s);
        Self(s.to_lowercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Hashtag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Monotonic, dense, per-store sequence number assigned at append time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventSeq(pub u64);

impl EventSeq {
    pub fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl fmt::Display for EventSeq {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handle_lowercases() {
        assert_eq!(Handle::new("Alice.Bsky.Social").as_str(), "alice.bsky.social");
    }

    #[test]
    fn hashtag_strips_hash_and_lowercases() {
        assert_eq!(Hashtag::new("#Effect").as_str(), "effect");
        assert_eq!(Hashtag::new("Effect").as_str(), "effect");
    }

    #[test]
    fn event_seq_next_increments() {
        assert_eq!(EventSeq(1).next(), EventSeq(2));
    }
}
