//! Per-`(store, source_key)` sync checkpoint, persisted in the store's KV tree.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::kv::KvStore;
use crate::primitives::EventSeq;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncCheckpoint {
    pub source: String,
    #[serde(default)]
    pub cursor: Option<String>,
    #[serde(default)]
    pub last_event_seq: Option<EventSeq>,
    #[serde(default)]
    pub filter_fingerprint: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl SyncCheckpoint {
    pub fn new(source: impl Into<String>, filter_fingerprint: Option<String>) -> Self {
        Self { source: source.into(), cursor: None, last_event_seq: None, filter_fingerprint, updated_at: Utc::now() }
    }

    fn kv_key(source_key: &str) -> String {
        format!("sync-checkpoint:{source_key}")
    }

    pub fn load(kv: &KvStore, source_key: &str) -> crate::error::AppResult<Option<Self>> {
        kv.get(&Self::kv_key(source_key))
    }

    pub fn save(&self, kv: &KvStore, source_key: &str) -> crate::error::AppResult<()> {
        kv.put(&Self::kv_key(source_key), self)
    }

    /// True iff this checkpoint can be resumed with `current_fingerprint`
    /// A sync refuses to resume on a mismatched fingerprint.
    pub fn compatible_with(&self, current_fingerprint: Option<&str>) -> bool {
        match (&self.filter_fingerprint, current_fingerprint) {
            (None, _) => true,
            (Some(saved), Some(current)) => saved == current,
            (Some(_), None) => false,
        }
    }
}
