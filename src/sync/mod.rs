//! Sync engine: ingests a source into a store through a filter.

pub mod checkpoint;
pub mod jetstream;
pub mod progress;

use std::time::{Duration, Instant};

use futures::StreamExt;
use serde::Serialize;

use crate::committer::Committer;
use crate::error::{AppError, AppResult, SyncStage};
use crate::filter::{fingerprint, Collaborators, FilterAst, FilterRuntime};
use crate::kv::KvStore;
use crate::primitives::{Event, EventMeta};
use crate::source::{Source, SourceStream};

pub use checkpoint::SyncCheckpoint;
pub use progress::{Progress, ProgressReporter, ProgressTracker, TracingProgressReporter};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncPolicy {
    Dedupe,
    Refresh,
}

pub struct SyncOptions {
    pub policy: SyncPolicy,
    pub limit: Option<usize>,
    pub dry_run: bool,
    pub checkpoint_every: usize,
    pub checkpoint_interval: Duration,
    /// Report progress every `progress_every` events or `progress_interval`,
    /// whichever comes first.
    pub progress_every: u64,
    pub progress_interval: Duration,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            policy: SyncPolicy::Dedupe,
            limit: None,
            dry_run: false,
            checkpoint_every: 100,
            checkpoint_interval: Duration::from_secs(5),
            progress_every: 100,
            progress_interval: Duration::from_secs(5),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SyncErrorEntry {
    pub stage: String,
    pub message: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct SyncResult {
    pub processed: u64,
    pub added: u64,
    pub skipped: u64,
    pub errors: Vec<SyncErrorEntry>,
    pub cursor: Option<String>,
}

/// One pass of ingesting `source` into the store behind `committer`,
/// through `filter`.
pub async fn sync(
    committer: &Committer,
    kv: &KvStore,
    source: Source,
    filter: FilterAst,
    collaborators: &dyn Collaborators,
    options: SyncOptions,
) -> AppResult<SyncResult> {
    let source_key = source.source_key();
    let current_fp = fingerprint(&filter);

    let existing = SyncCheckpoint::load(kv, &source_key)?;
    if let Some(cp) = &existing {
        if !cp.compatible_with(Some(&current_fp)) {
            return Err(AppError::sync(
                SyncStage::Source,
                format!("checkpoint for `{source_key}` was built from a different filter; refusing to resume"),
            ));
        }
    }
    let mut checkpoint = existing.unwrap_or_else(|| SyncCheckpoint::new(&source_key, Some(current_fp.clone())));
    checkpoint.filter_fingerprint = Some(current_fp);

    let runtime = FilterRuntime::new(collaborators);
    let mut result = SyncResult::default();
    let mut tracker = ProgressTracker::new(options.progress_every, options.progress_interval, options.limit);
    let reporter = TracingProgressReporter;
    let mut seen = std::collections::HashSet::new();

    let mut last_checkpoint_at = Instant::now();
    let mut stream = source.stream();

    while let Some(item) = stream.next().await {
        if let Some(limit) = options.limit {
            if result.processed as usize >= limit {
                break;
            }
        }

        let raw = match item {
            Ok(raw) => raw,
            Err(e) => {
                result.errors.push(SyncErrorEntry { stage: "source".into(), message: e.to_string() });
                result.processed += 1;
                continue;
            }
        };

        if let Some(cursor) = &raw.page_cursor {
            checkpoint.cursor = Some(cursor.clone());
        }

        let post = match raw.parse() {
            Ok(post) => post,
            Err(e) => {
                result.errors.push(SyncErrorEntry { stage: "parse".into(), message: e.to_string() });
                result.processed += 1;
                continue;
            }
        };

        let outcome = match runtime.evaluate(&filter, &post) {
            Ok(outcome) => outcome,
            Err(e) => {
                result.errors.push(SyncErrorEntry { stage: "filter".into(), message: e.to_string() });
                result.processed += 1;
                continue;
            }
        };

        if !outcome.matched {
            result.skipped += 1;
            result.processed += 1;
        } else {
            let uri = post.uri.clone();
            let event = Event::PostUpsert {
                post,
                meta: EventMeta::new(source_key.clone(), "sync").with_fingerprint(
                    checkpoint.filter_fingerprint.clone().unwrap_or_default(),
                ),
            };

            if options.dry_run {
                let already_seen = seen.contains(&uri) || committer.index().has_uri(&committer_conn(committer)?, uri.as_str())?;
                if options.policy == SyncPolicy::Dedupe && already_seen {
                    result.skipped += 1;
                } else {
                    seen.insert(uri);
                    result.added += 1;
                }
            } else {
                match options.policy {
                    SyncPolicy::Dedupe => match committer.append_upsert_if_missing(event).await? {
                        Some(seq) => {
                            checkpoint.last_event_seq = Some(seq);
                            result.added += 1;
                        }
                        None => result.skipped += 1,
                    },
                    SyncPolicy::Refresh => {
                        let seq = committer.append_upsert(event).await?;
                        checkpoint.last_event_seq = Some(seq);
                        result.added += 1;
                    }
                }
            }
            result.processed += 1;
        }

        if let Some(progress) = tracker.maybe_report(result.processed, result.added, result.skipped, result.errors.len() as u64) {
            reporter.report(&progress);
        }

        let due_by_count = options.checkpoint_every > 0 && result.processed as usize % options.checkpoint_every == 0;
        let due_by_time = last_checkpoint_at.elapsed() >= options.checkpoint_interval;
        if !options.dry_run && (due_by_count || due_by_time) {
            checkpoint.updated_at = chrono::Utc::now();
            checkpoint.save(kv, &source_key)?;
            last_checkpoint_at = Instant::now();
        }
    }

    if !options.dry_run {
        checkpoint.updated_at = chrono::Utc::now();
        checkpoint.save(kv, &source_key)?;
    }
    result.cursor = checkpoint.cursor.clone();

    Ok(result)
}

/// Reads a connection from the committer's index pool for the `has_uri`
/// dry-run probe. The committer itself never exposes its writer
/// connection for reads; dry-run only needs the reader pool.
fn committer_conn(committer: &Committer) -> AppResult<r2d2::PooledConnection<r2d2_sqlite::SqliteConnectionManager>> {
    Ok(committer.index().pool().get()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::NullCollaborators;
    use crate::index::Index;

    fn raw(uri: &str) -> crate::source::RawPost {
        crate::source::RawPost {
            uri: crate::primitives::AtUri::from(uri),
            cid: None,
            author: None,
            author_did: None,
            record: serde_json::json!({
                "uri": uri,
                "cid": "c1",
                "author": "alice",
                "author_did": "did:plc:a",
                "created_at": "2026-01-01T00:00:00Z",
                "text": "hello #effect",
                "hashtags": ["effect"],
            }),
            indexed_at: None,
            page_cursor: None,
        }
    }

    async fn setup() -> (tempfile::TempDir, Committer, KvStore) {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("i.sqlite3");
        let writer = crate::index::schema::open_writer(&db_path).unwrap();
        let index = Index::open(&db_path).unwrap();
        let kv = KvStore::new(dir.path().join("kv"));
        (dir, Committer::new(writer, index), kv)
    }

    #[tokio::test]
    async fn basic_ingest_adds_one_post() {
        let (_dir, committer, kv) = setup().await;
        let source = Source::Fixture { posts: vec![raw("at://x/1")] };
        let result = sync(&committer, &kv, source, FilterAst::All, &NullCollaborators, SyncOptions::default())
            .await
            .unwrap();
        assert_eq!(result.added, 1);
        assert_eq!(result.skipped, 0);
        assert!(result.errors.is_empty());
    }

    #[tokio::test]
    async fn second_run_dedupes() {
        let (_dir, committer, kv) = setup().await;
        let source = || Source::Fixture { posts: vec![raw("at://x/1")] };
        sync(&committer, &kv, source(), FilterAst::All, &NullCollaborators, SyncOptions::default()).await.unwrap();
        let second =
            sync(&committer, &kv, source(), FilterAst::All, &NullCollaborators, SyncOptions::default()).await.unwrap();
        assert_eq!(second.added, 0);
        assert_eq!(second.skipped, 1);
    }

    #[tokio::test]
    async fn mismatched_fingerprint_refuses_to_resume() {
        let (_dir, committer, kv) = setup().await;
        let source = || Source::Fixture { posts: vec![raw("at://x/1")] };
        sync(
            &committer,
            &kv,
            source(),
            FilterAst::Author { handle: crate::primitives::Handle::new("alice") },
            &NullCollaborators,
            SyncOptions::default(),
        )
        .await
        .unwrap();
        let err = sync(&committer, &kv, source(), FilterAst::All, &NullCollaborators, SyncOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::SyncError { .. }));
    }

    #[tokio::test]
    async fn dry_run_does_not_persist_checkpoint_or_write_events() {
        let (_dir, committer, kv) = setup().await;
        let source = Source::Fixture { posts: vec![raw("at://x/1")] };
        let mut options = SyncOptions::default();
        options.dry_run = true;
        let result = sync(&committer, &kv, source, FilterAst::All, &NullCollaborators, options).await.unwrap();
        assert_eq!(result.added, 1);
        assert!(SyncCheckpoint::load(&kv, "fixture").unwrap().is_none());
        let conn = committer.index().pool().get().unwrap();
        assert!(!committer.index().has_uri(&conn, "at://x/1").unwrap());
    }
}
