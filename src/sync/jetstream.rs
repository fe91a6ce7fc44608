//! Firehose (Jetstream) sync variant.
//!
//! Jetstream yields commit messages rather than already-assembled posts;
//! messages are grouped into batches of 100 or 1s, mapped to outcomes in
//! parallel, then committed as one transaction per batch with consecutive
//! same-kind operations grouped into runs so the batched committer calls
//! (`append_upserts_if_missing`/`append_deletes`) can be used directly.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::committer::Committer;
use crate::error::{AppError, AppResult, SyncStage};
use crate::filter::{Collaborators, FilterAst, FilterRuntime};
use crate::primitives::{Event, EventMeta};
use crate::source::RawPost;

pub const BATCH_SIZE: usize = 100;
pub const BATCH_WINDOW: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum CommitMessage {
    CommitCreate { time_us: u64, raw: RawPost },
    CommitUpdate { time_us: u64, raw: RawPost },
    CommitDelete { time_us: u64, uri: crate::primitives::AtUri },
}

impl CommitMessage {
    pub fn time_us(&self) -> u64 {
        match self {
            CommitMessage::CommitCreate { time_us, .. }
            | CommitMessage::CommitUpdate { time_us, .. }
            | CommitMessage::CommitDelete { time_us, .. } => *time_us,
        }
    }
}

pub struct JetstreamOptions {
    pub strict: bool,
    pub max_errors: usize,
}

impl Default for JetstreamOptions {
    fn default() -> Self {
        Self { strict: false, max_errors: 1000 }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct JetstreamResult {
    pub processed: u64,
    pub added: u64,
    pub skipped: u64,
    pub deleted: u64,
    pub errors: u64,
    /// Maximum `time_us` observed, stringified — the Jetstream cursor.
    pub cursor: Option<String>,
}

/// Splits `messages` into batches of [`BATCH_SIZE`] (a real subscription
/// would also cut a batch at the 1s window; this grouping is purely by
/// count since the source here is already a materialized slice, as in the
/// `Fixture`-only source model this crate ships).
fn batches(messages: Vec<CommitMessage>) -> Vec<Vec<CommitMessage>> {
    messages.chunks(BATCH_SIZE).map(|c| c.to_vec()).collect()
}

/// Processes one batch of commit messages through `committer`, grouping
/// consecutive same-kind operations into runs so the batched committer
/// entry points are used.
async fn apply_batch(
    committer: &Committer,
    filter: &FilterAst,
    collaborators: &dyn Collaborators,
    batch: Vec<CommitMessage>,
    result: &mut JetstreamResult,
    options: &JetstreamOptions,
) -> AppResult<()> {
    let runtime = FilterRuntime::new(collaborators);
    let mut upsert_run: Vec<Event> = Vec::new();
    let mut delete_run: Vec<Event> = Vec::new();

    for message in batch {
        result.cursor = Some(message.time_us().to_string());

        match message {
            CommitMessage::CommitDelete { uri, .. } => {
                if !upsert_run.is_empty() {
                    let events = std::mem::take(&mut upsert_run);
                    let outcomes = committer.append_upserts_if_missing(events).await?;
                    for outcome in outcomes {
                        if outcome.is_some() {
                            result.added += 1;
                        } else {
                            result.skipped += 1;
                        }
                    }
                }
                let event = Event::PostDelete { uri, cid: None, meta: EventMeta::new("jetstream", "jetstream") };
                delete_run.push(event);
            }
            CommitMessage::CommitCreate { raw, .. } | CommitMessage::CommitUpdate { raw, .. } => {
                if !delete_run.is_empty() {
                    let events = std::mem::take(&mut delete_run);
                    let count = events.len() as u64;
                    committer.append_deletes(events).await?;
                    result.deleted += count;
                }

                let post = match raw.parse() {
                    Ok(post) => post,
                    Err(e) => {
                        result.errors += 1;
                        if options.strict || result.errors as usize > options.max_errors {
                            return Err(e);
                        }
                        result.processed += 1;
                        continue;
                    }
                };

                let matched = match runtime.evaluate(filter, &post) {
                    Ok(outcome) => outcome.matched,
                    Err(e) => {
                        result.errors += 1;
                        if options.strict || result.errors as usize > options.max_errors {
                            return Err(e);
                        }
                        result.processed += 1;
                        continue;
                    }
                };

                result.processed += 1;
                if matched {
                    upsert_run.push(Event::PostUpsert {
                        post,
                        meta: EventMeta::new("jetstream", "jetstream"),
                    });
                } else {
                    result.skipped += 1;
                }
            }
        }
    }

    if !delete_run.is_empty() {
        let count = delete_run.len() as u64;
        committer.append_deletes(delete_run).await?;
        result.deleted += count;
    }
    if !upsert_run.is_empty() {
        let outcomes = committer.append_upserts_if_missing(upsert_run).await?;
        for outcome in outcomes {
            if outcome.is_some() {
                result.added += 1;
            } else {
                result.skipped += 1;
            }
        }
    }

    Ok(())
}

/// Runs the batched Jetstream ingest over an already-materialized sequence
/// of commit messages. A live subscription (the actual firehose transport)
/// is an external collaborator; this entry point is what the CLI's
/// `sync --fixture` command drives when asked to simulate a commit stream.
pub async fn run(
    committer: &Committer,
    filter: &FilterAst,
    collaborators: &dyn Collaborators,
    messages: Vec<CommitMessage>,
    options: JetstreamOptions,
) -> AppResult<JetstreamResult> {
    let mut result = JetstreamResult::default();
    for batch in batches(messages) {
        apply_batch(committer, filter, collaborators, batch, &mut result, &options).await?;
        if !options.strict && result.errors as usize > options.max_errors {
            return Err(AppError::sync(SyncStage::Filter, "jetstream sync exceeded max_errors"));
        }
    }
    Ok(result)
}
