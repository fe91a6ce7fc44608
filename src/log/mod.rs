//! Per-store append-only event log.
//!
//! The log lives in the same SQLite file as the index: a store is a single
//! SQLite database plus a key-value tree. These functions operate on
//! whatever connection the caller hands them so the committer can append to
//! the log and apply to the index inside one transaction.

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};

use crate::error::AppResult;
use crate::primitives::{Event, EventRecord, EventSeq, CURRENT_EVENT_VERSION};

/// Default page size for `stream_from`.
pub const DEFAULT_PAGE_SIZE: usize = 500;

/// Appends every event in `events` inside a transaction the caller already
/// opened on `conn`, returning assigned sequence numbers in input order.
pub fn append_batch(conn: &Connection, events: &[Event]) -> AppResult<Vec<EventSeq>> {
    let mut stmt = conn.prepare_cached(
        "INSERT INTO event_log (event_tag, payload_json, created_at) VALUES (?1, ?2, ?3)",
    )?;
    let mut seqs = Vec::with_capacity(events.len());
    for event in events {
        let payload = serde_json::to_string(event)?;
        stmt.execute(params![event.tag(), payload, Utc::now().to_rfc3339()])?;
        seqs.push(EventSeq(conn.last_insert_rowid() as u64));
    }
    Ok(seqs)
}

/// Returns up to `page_size` events with `seq > after_seq`, in ascending
/// `seq` order. Callers page through the whole log by repeatedly advancing
/// `after_seq` to the last returned `seq`.
pub fn stream_page(
    conn: &Connection,
    after_seq: Option<EventSeq>,
    page_size: usize,
) -> AppResult<Vec<EventRecord>> {
    let after = after_seq.map(|s| s.0 as i64).unwrap_or(0);
    let mut stmt = conn.prepare_cached(
        "SELECT seq, payload_json FROM event_log WHERE seq > ?1 ORDER BY seq ASC LIMIT ?2",
    )?;
    let rows = stmt.query_map(params![after, page_size as i64], |row| {
        let seq: i64 = row.get(0)?;
        let payload: String = row.get(1)?;
        Ok((seq, payload))
    })?;

    let mut records = Vec::with_capacity(page_size);
    for row in rows {
        let (seq, payload) = row?;
        let event: Event = serde_json::from_str(&payload)?;
        records.push(EventRecord { seq: EventSeq(seq as u64), version: CURRENT_EVENT_VERSION, event });
    }
    Ok(records)
}

/// Current maximum `seq`, or `None` if the log is empty.
pub fn last_seq(conn: &Connection) -> AppResult<Option<EventSeq>> {
    let max: Option<i64> = conn
        .query_row("SELECT MAX(seq) FROM event_log", [], |row| row.get(0))
        .optional()?
        .flatten();
    Ok(max.map(|s| EventSeq(s as u64)))
}

/// Total number of events ever appended.
pub fn event_count(conn: &Connection) -> AppResult<u64> {
    let count: i64 = conn.query_row("SELECT COUNT(*) FROM event_log", [], |row| row.get(0))?;
    Ok(count as u64)
}

/// Deletes every row in the log. Callers that also need the index cleared
/// (a full store reset, as opposed to an index rebuild) must pair this with
/// `index::clear` in the same transaction.
pub fn clear(conn: &Connection) -> AppResult<()> {
    conn.execute("DELETE FROM event_log", [])?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::primitives::{AtUri, EventMeta};

    fn conn() -> Connection {
        let c = Connection::open_in_memory().unwrap();
        crate::index::schema::init_for_tests(&c);
        c
    }

    fn delete_event() -> Event {
        Event::PostDelete { uri: AtUri::from("at://x/1"), cid: None, meta: EventMeta::new("timeline", "test") }
    }

    #[test]
    fn append_batch_assigns_increasing_seqs() {
        let conn = conn();
        let seqs = append_batch(&conn, &[delete_event(), delete_event()]).unwrap();
        assert_eq!(seqs, vec![EventSeq(1), EventSeq(2)]);
        assert_eq!(last_seq(&conn).unwrap(), Some(EventSeq(2)));
    }

    #[test]
    fn stream_page_respects_after_seq_and_limit() {
        let conn = conn();
        append_batch(&conn, &[delete_event(), delete_event(), delete_event()]).unwrap();
        let page = stream_page(&conn, Some(EventSeq(1)), 1).unwrap();
        assert_eq!(page.len(), 1);
        assert_eq!(page[0].seq, EventSeq(2));
    }

    #[test]
    fn empty_log_has_no_last_seq() {
        let conn = conn();
        assert_eq!(last_seq(&conn).unwrap(), None);
        assert_eq!(event_count(&conn).unwrap(), 0);
    }
}
