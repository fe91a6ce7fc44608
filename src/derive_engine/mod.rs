//! Derivation engine: projects one store's events into another through a
//! filter.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::committer::Committer;
use crate::error::{AppError, AppResult};
use crate::filter::{fingerprint, Collaborators, FilterAst, FilterRuntime};
use crate::kv::KvStore;
use crate::log;
use crate::primitives::{Event, EventMeta, EventSeq};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeriveMode {
    /// Filter must be pure; evaluated deterministically, reproducible.
    EventTime,
    /// Filter may include side-effectful leaves; not guaranteed deterministic.
    DeriveTime,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DerivationCheckpoint {
    pub target_name: String,
    pub source_name: String,
    #[serde(default)]
    pub last_source_event_seq: Option<EventSeq>,
    pub mode: DeriveMode,
    pub filter_fingerprint: String,
    pub updated_at: DateTime<Utc>,
}

impl DerivationCheckpoint {
    fn kv_key(target_name: &str, source_name: &str) -> String {
        format!("derivation-checkpoint:{source_name}->{target_name}")
    }

    pub fn load(kv: &KvStore, target_name: &str, source_name: &str) -> AppResult<Option<Self>> {
        kv.get(&Self::kv_key(target_name, source_name))
    }

    pub fn save(&self, kv: &KvStore) -> AppResult<()> {
        kv.put(&Self::kv_key(&self.target_name, &self.source_name), self)
    }

    pub fn delete(kv: &KvStore, target_name: &str, source_name: &str) -> AppResult<()> {
        kv.remove(&Self::kv_key(target_name, source_name))
    }
}

/// A derived store's recorded provenance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LineageSource {
    pub store: String,
    pub filter_fingerprint: String,
    pub mode: DeriveMode,
    pub derived_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LineageEntry {
    pub target: String,
    pub derived: bool,
    pub sources: Vec<LineageSource>,
    pub updated_at: DateTime<Utc>,
}

impl LineageEntry {
    pub fn load(kv: &KvStore) -> AppResult<Option<Self>> {
        kv.get("lineage")
    }

    pub fn save(&self, kv: &KvStore) -> AppResult<()> {
        kv.put("lineage", self)
    }
}

pub struct DeriveOptions {
    pub mode: DeriveMode,
    pub reset: bool,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct DeriveResult {
    pub processed: u64,
    pub matched: u64,
    pub skipped: u64,
    pub deletes_propagated: u64,
}

/// Projects `source`'s event log into `target` through `filter`.
///
/// `source_conn`/`source_name` read the source store's log; `target`/
/// `target_name` is the committer writing into the destination store;
/// `target_kv` holds the target's checkpoints and lineage.
pub async fn derive(
    source_conn: &rusqlite::Connection,
    source_name: &str,
    target: &Committer,
    target_name: &str,
    target_kv: &KvStore,
    filter: FilterAst,
    collaborators: &dyn Collaborators,
    options: DeriveOptions,
) -> AppResult<DeriveResult> {
    if source_name == target_name {
        return Err(AppError::derivation("derivation source and target must differ"));
    }
    if options.mode == DeriveMode::EventTime && filter.is_side_effectful() {
        return Err(AppError::derivation("EventTime derivation requires a pure filter"));
    }

    let current_fp = fingerprint(&filter);
    let existing = DerivationCheckpoint::load(target_kv, target_name, source_name)?;

    let after_seq = if options.reset {
        target.reset().await?;
        DerivationCheckpoint::delete(target_kv, target_name, source_name)?;
        None
    } else {
        match &existing {
            Some(cp) if cp.filter_fingerprint == current_fp => cp.last_source_event_seq,
            Some(_) => {
                return Err(AppError::derivation(format!(
                    "checkpoint for `{source_name}` -> `{target_name}` was built from a different filter; use reset=true"
                )))
            }
            None => {
                let target_has_rows: i64 = target_conn(target)?.query_row("SELECT COUNT(*) FROM posts", [], |r| r.get(0))?;
                if target_has_rows > 0 {
                    return Err(AppError::derivation(format!(
                        "target `{target_name}` is non-empty and has no matching checkpoint for `{source_name}`"
                    )));
                }
                None
            }
        }
    };

    let runtime = FilterRuntime::new(collaborators);
    let mut result = DeriveResult::default();
    let mut seen = std::collections::HashSet::new();
    let mut last_seq = after_seq;

    let derive_result = async {
        let mut after = after_seq;
        loop {
            let page = log::stream_page(source_conn, after, log::DEFAULT_PAGE_SIZE)?;
            if page.is_empty() {
                break;
            }
            for record in page {
                last_seq = Some(record.seq);
                result.processed += 1;
                match record.event {
                    Event::PostUpsert { post, .. } => {
                        let outcome = runtime.evaluate(&filter, &post)?;
                        if !outcome.matched {
                            result.skipped += 1;
                            continue;
                        }
                        result.matched += 1;
                        if !seen.insert(post.uri.clone()) {
                            continue;
                        }
                        let event = Event::PostUpsert {
                            post,
                            meta: EventMeta::new(source_name, "derive").with_fingerprint(current_fp.clone()),
                        };
                        target.append_upsert_if_missing(event).await?;
                    }
                    Event::PostDelete { uri, cid, .. } => {
                        result.deletes_propagated += 1;
                        let event = Event::PostDelete {
                            uri,
                            cid,
                            meta: EventMeta::new(source_name, "derive").with_fingerprint(current_fp.clone()),
                        };
                        target.append_delete(event).await?;
                    }
                }
            }
            after = last_seq;
        }
        Ok::<(), AppError>(())
    }
    .await;

    let checkpoint = DerivationCheckpoint {
        target_name: target_name.to_string(),
        source_name: source_name.to_string(),
        last_source_event_seq: last_seq,
        mode: options.mode,
        filter_fingerprint: current_fp.clone(),
        updated_at: Utc::now(),
    };

    if let Err(e) = derive_result {
        return Err(e);
    }
    checkpoint.save(target_kv)?;

    let mut lineage = LineageEntry::load(target_kv)?.unwrap_or_else(|| LineageEntry {
        target: target_name.to_string(),
        derived: true,
        sources: Vec::new(),
        updated_at: Utc::now(),
    });
    lineage.derived = true;
    lineage.sources.retain(|s| s.store != source_name);
    lineage.sources.push(LineageSource {
        store: source_name.to_string(),
        filter_fingerprint: current_fp,
        mode: options.mode,
        derived_at: Utc::now(),
    });
    lineage.updated_at = Utc::now();
    lineage.save(target_kv)?;

    Ok(result)
}

fn target_conn(
    target: &Committer,
) -> AppResult<r2d2::PooledConnection<r2d2_sqlite::SqliteConnectionManager>> {
    Ok(target.index().pool().get()?)
}
