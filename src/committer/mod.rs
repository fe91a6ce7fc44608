//! Transactional append+apply bundle.
//!
//! Wraps `log::append_batch` and `index::apply` in one SQL transaction so the
//! log-then-index invariant survives a crash between the two writes. A
//! single dedicated writer `Connection` is held behind a mutex and framed
//! with explicit `BEGIN`/`COMMIT` rather than relying on implicit
//! transactions, so a panic mid-batch can't leave the log and index
//! disagreeing about what was committed.

use std::sync::{Arc, Mutex};

use rusqlite::Connection;

use crate::error::AppResult;
use crate::index::{self, Index};
use crate::log;
use crate::primitives::{Event, EventSeq};

/// The only path allowed to write to a store's event log or index.
#[derive(Clone)]
pub struct Committer {
    writer: Arc<Mutex<Connection>>,
    index: Index,
}

impl Committer {
    pub fn new(writer: Connection, index: Index) -> Self {
        Self { writer: Arc::new(Mutex::new(writer)), index }
    }

    pub fn index(&self) -> &Index {
        &self.index
    }

    /// Appends `event` unconditionally.
    pub async fn append_upsert(&self, event: Event) -> AppResult<EventSeq> {
        let writer = self.writer.clone();
        run_blocking(move || {
            let conn = writer.lock().expect("writer connection poisoned");
            with_transaction(&conn, || {
                let seq = log::append_batch(&conn, std::slice::from_ref(&event))?[0];
                index::apply(&conn, seq, &event)?;
                Ok(seq)
            })
        })
        .await
    }

    /// Appends `event` only if no row with its URI exists yet in `posts`.
    /// Returns `None` without appending if one already does.
    pub async fn append_upsert_if_missing(&self, event: Event) -> AppResult<Option<EventSeq>> {
        let writer = self.writer.clone();
        run_blocking(move || {
            let conn = writer.lock().expect("writer connection poisoned");
            with_transaction(&conn, || {
                if index::has_uri(&conn, event.uri().as_str())? {
                    return Ok(None);
                }
                let seq = log::append_batch(&conn, std::slice::from_ref(&event))?[0];
                index::apply(&conn, seq, &event)?;
                Ok(Some(seq))
            })
        })
        .await
    }

    /// Batched form of [`Self::append_upsert_if_missing`], preserving input
    /// order. All events are applied inside one transaction; an event later
    /// in `events` sees the effect of earlier ones in the same batch.
    pub async fn append_upserts_if_missing(&self, events: Vec<Event>) -> AppResult<Vec<Option<EventSeq>>> {
        let writer = self.writer.clone();
        run_blocking(move || {
            let conn = writer.lock().expect("writer connection poisoned");
            with_transaction(&conn, || {
                let mut out = Vec::with_capacity(events.len());
                for event in &events {
                    if index::has_uri(&conn, event.uri().as_str())? {
                        out.push(None);
                        continue;
                    }
                    let seq = log::append_batch(&conn, std::slice::from_ref(event))?[0];
                    index::apply(&conn, seq, event)?;
                    out.push(Some(seq));
                }
                Ok(out)
            })
        })
        .await
    }

    pub async fn append_delete(&self, event: Event) -> AppResult<EventSeq> {
        self.append_upsert(event).await
    }

    /// Wipes both the index and the event log in one transaction — a full
    /// store reset, not the index-only rebuild-from-log `index::clear` is
    /// meant for.
    pub async fn reset(&self) -> AppResult<()> {
        let writer = self.writer.clone();
        run_blocking(move || {
            let conn = writer.lock().expect("writer connection poisoned");
            with_transaction(&conn, || {
                index::clear(&conn)?;
                log::clear(&conn)?;
                Ok(())
            })
        })
        .await
    }

    pub async fn append_deletes(&self, events: Vec<Event>) -> AppResult<Vec<EventSeq>> {
        let writer = self.writer.clone();
        run_blocking(move || {
            let conn = writer.lock().expect("writer connection poisoned");
            with_transaction(&conn, || {
                let mut out = Vec::with_capacity(events.len());
                for event in &events {
                    let seq = log::append_batch(&conn, std::slice::from_ref(event))?[0];
                    index::apply(&conn, seq, event)?;
                    out.push(seq);
                }
                Ok(out)
            })
        })
        .await
    }
}

fn with_transaction<T>(conn: &Connection, f: impl FnOnce() -> AppResult<T>) -> AppResult<T> {
    conn.execute_batch("BEGIN")?;
    match f() {
        Ok(value) => {
            conn.execute_batch("COMMIT")?;
            Ok(value)
        }
        Err(e) => {
            if let Err(rollback_err) = conn.execute_batch("ROLLBACK") {
                tracing::warn!(error = %rollback_err, "rollback failed after commit error");
            }
            Err(e)
        }
    }
}

async fn run_blocking<T: Send + 'static>(f: impl FnOnce() -> AppResult<T> + Send + 'static) -> AppResult<T> {
    match tokio::task::spawn_blocking(f).await {
        Ok(result) => result,
        Err(join_err) => Err(crate::error::AppError::store_io(format!("writer task panicked: {join_err}"))),
    }
}
