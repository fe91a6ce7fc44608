//! End-to-end scenarios over the public engine surface (committer, sync,
//! derivation, query, search), exercising a store the way the CLI would.

use chrono::Utc;
use postkeep::committer::Committer;
use postkeep::derive_engine::{self, DeriveMode, DeriveOptions};
use postkeep::filter::{FilterAst, NullCollaborators};
use postkeep::index::{self, query::SortBy, query::SortOrder, Index, QuerySpec, SearchSpec};
use postkeep::kv::KvStore;
use postkeep::primitives::{AtUri, Cid, Did, Handle, Hashtag, Post};
use postkeep::source::{RawPost, Source};
use postkeep::sync::{self, SyncOptions, SyncPolicy};

fn raw_post(uri: &str, author: &str, text: &str, hashtags: &[&str], created_at: &str) -> RawPost {
    RawPost {
        uri: AtUri::from(uri),
        cid: None,
        author: None,
        author_did: None,
        record: serde_json::json!({
            "uri": uri,
            "cid": "c1",
            "author": author,
            "author_did": format!("did:plc:{author}"),
            "created_at": created_at,
            "text": text,
            "hashtags": hashtags,
        }),
        indexed_at: None,
        page_cursor: None,
    }
}

async fn new_store() -> (tempfile::TempDir, Committer, KvStore) {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("index.sqlite3");
    let writer = index::open_writer(&db_path).unwrap();
    let index = Index::open(&db_path).unwrap();
    let kv = KvStore::new(dir.path().join("kv"));
    (dir, Committer::new(writer, index), kv)
}

#[tokio::test]
async fn s1_basic_ingest() {
    let (_dir, committer, kv) = new_store().await;
    let source = Source::Fixture {
        posts: vec![raw_post("at://x/1", "alice.bsky", "Hello #effect", &["effect"], "2026-01-01T00:00:00Z")],
    };
    let result = sync::sync(&committer, &kv, source, FilterAst::All, &NullCollaborators, SyncOptions::default())
        .await
        .unwrap();
    assert_eq!(result.added, 1);
    assert_eq!(result.skipped, 0);
    assert!(result.errors.is_empty());

    let conn = committer.index().pool().get().unwrap();
    assert!(committer.index().has_uri(&conn, "at://x/1").unwrap());

    let mut spec = QuerySpec::new(SortBy::CreatedAt, SortOrder::Asc);
    spec.filter = Some(FilterAst::Hashtag { tag: Hashtag::new("effect") });
    let page = index::run_query(committer.index().pool(), &spec).unwrap();
    assert_eq!(page.posts.len(), 1);
    assert_eq!(page.posts[0].uri.as_str(), "at://x/1");
}

#[tokio::test]
async fn s2_dedupe_on_second_run() {
    let (_dir, committer, kv) = new_store().await;
    let make_source =
        || Source::Fixture { posts: vec![raw_post("at://x/1", "alice", "hi", &[], "2026-01-01T00:00:00Z")] };

    sync::sync(&committer, &kv, make_source(), FilterAst::All, &NullCollaborators, SyncOptions::default())
        .await
        .unwrap();
    let second = sync::sync(&committer, &kv, make_source(), FilterAst::All, &NullCollaborators, SyncOptions::default())
        .await
        .unwrap();

    assert_eq!(second.added, 0);
    assert_eq!(second.skipped, 1);
}

#[tokio::test]
async fn s3_pushdown_author_and_hashtag() {
    let (_dir, committer, kv) = new_store().await;
    let source = Source::Fixture {
        posts: vec![
            raw_post("at://x/1", "alice", "p1", &["effect"], "2026-01-01T00:00:00Z"),
            raw_post("at://x/2", "bob", "p2", &["later"], "2026-01-03T00:00:00Z"),
        ],
    };
    sync::sync(&committer, &kv, source, FilterAst::All, &NullCollaborators, SyncOptions::default())
        .await
        .unwrap();

    let mut by_author = QuerySpec::new(SortBy::CreatedAt, SortOrder::Asc);
    by_author.filter = Some(FilterAst::Author { handle: Handle::new("alice") });
    let page = index::run_query(committer.index().pool(), &by_author).unwrap();
    assert_eq!(page.posts.iter().map(|p| p.uri.as_str()).collect::<Vec<_>>(), vec!["at://x/1"]);

    let mut by_tag = QuerySpec::new(SortBy::CreatedAt, SortOrder::Asc);
    by_tag.filter = Some(FilterAst::Hashtag { tag: Hashtag::new("later") });
    let page = index::run_query(committer.index().pool(), &by_tag).unwrap();
    assert_eq!(page.posts.iter().map(|p| p.uri.as_str()).collect::<Vec<_>>(), vec!["at://x/2"]);
}

#[tokio::test]
async fn s4_or_with_unpushable_clause_falls_back_to_in_memory() {
    let (_dir, committer, kv) = new_store().await;
    let source = Source::Fixture {
        posts: vec![
            raw_post("at://x/1", "alice", "plain text", &[], "2026-01-01T00:00:00Z"),
            raw_post("at://x/2", "bob", "a smiling face \u{1F642}", &[], "2026-01-02T00:00:00Z"),
        ],
    };
    let filter = FilterAst::Or {
        clauses: vec![
            FilterAst::Author { handle: Handle::new("alice") },
            FilterAst::Contains { text: "\u{1F642}".into(), case_sensitive: false },
        ],
    };
    let result = sync::sync(&committer, &kv, source, filter, &NullCollaborators, SyncOptions::default())
        .await
        .unwrap();
    assert_eq!(result.added, 2);
}

#[tokio::test]
async fn s5_derivation_idempotence() {
    let (_source_dir, source_committer, _source_kv) = new_store().await;
    let source = Source::Fixture {
        posts: vec![
            raw_post("at://x/1", "alice", "p1", &[], "2026-01-01T00:00:00Z"),
            raw_post("at://x/2", "alice", "p2", &[], "2026-01-02T00:00:00Z"),
            raw_post("at://x/3", "alice", "p3", &[], "2026-01-03T00:00:00Z"),
        ],
    };
    sync::sync(
        &source_committer,
        &KvStore::new(_source_dir.path().join("kv")),
        source,
        FilterAst::All,
        &NullCollaborators,
        SyncOptions::default(),
    )
    .await
    .unwrap();

    let target_dir = tempfile::tempdir().unwrap();
    let target_db = target_dir.path().join("index.sqlite3");
    let target_writer = index::open_writer(&target_db).unwrap();
    let target_index = Index::open(&target_db).unwrap();
    let target_committer = Committer::new(target_writer, target_index);
    let target_kv = KvStore::new(target_dir.path().join("kv"));

    let source_conn = source_committer.index().pool().get().unwrap();

    let first = derive_engine::derive(
        &source_conn,
        "source",
        &target_committer,
        "target",
        &target_kv,
        FilterAst::All,
        &NullCollaborators,
        DeriveOptions { mode: DeriveMode::EventTime, reset: false },
    )
    .await
    .unwrap();
    assert_eq!(first.processed, 3);
    assert_eq!(first.matched, 3);

    let second = derive_engine::derive(
        &source_conn,
        "source",
        &target_committer,
        "target",
        &target_kv,
        FilterAst::All,
        &NullCollaborators,
        DeriveOptions { mode: DeriveMode::EventTime, reset: false },
    )
    .await
    .unwrap();
    assert_eq!(second.processed, 0);
    assert_eq!(second.matched, 0);

    let target_conn = target_committer.index().pool().get().unwrap();
    for uri in ["at://x/1", "at://x/2", "at://x/3"] {
        assert!(target_committer.index().has_uri(&target_conn, uri).unwrap());
    }
}

#[tokio::test]
async fn s6_derivation_propagates_deletes_even_when_unmatched() {
    let (_dir, committer, _kv) = new_store().await;
    let post = Post {
        uri: AtUri::from("at://x/1"),
        cid: Cid("c1".into()),
        author: Handle::new("alice"),
        author_did: Did("did:plc:alice".into()),
        created_at: Utc::now(),
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
    use postkeep::primitives::{Event, EventMeta};
    committer.append_upsert(Event::PostUpsert { post, meta: EventMeta::new("s", "t") }).await.unwrap();
    committer
        .append_delete(Event::PostDelete { uri: AtUri::from("at://x/1"), cid: None, meta: EventMeta::new("s", "t") })
        .await
        .unwrap();

    let target_dir = tempfile::tempdir().unwrap();
    let target_db = target_dir.path().join("index.sqlite3");
    let target_writer = index::open_writer(&target_db).unwrap();
    let target_index = Index::open(&target_db).unwrap();
    let target_committer = Committer::new(target_writer, target_index);
    let target_kv = KvStore::new(target_dir.path().join("kv"));
    let source_conn = committer.index().pool().get().unwrap();

    let result = derive_engine::derive(
        &source_conn,
        "source",
        &target_committer,
        "target",
        &target_kv,
        FilterAst::Author { handle: Handle::new("nobody") },
        &NullCollaborators,
        DeriveOptions { mode: DeriveMode::EventTime, reset: false },
    )
    .await
    .unwrap();

    assert_eq!(result.processed, 2);
    assert_eq!(result.matched, 0);
    assert_eq!(result.deletes_propagated, 1);
    let target_conn = target_committer.index().pool().get().unwrap();
    assert!(!target_committer.index().has_uri(&target_conn, "at://x/1").unwrap());
}

#[tokio::test]
async fn s7_fts_literal_query() {
    let (_dir, committer, kv) = new_store().await;
    let source = Source::Fixture {
        posts: vec![raw_post("at://x/1", "alice", "Kubernetes AND Docker tips", &[], "2026-01-01T00:00:00Z")],
    };
    sync::sync(&committer, &kv, source, FilterAst::All, &NullCollaborators, SyncOptions::default())
        .await
        .unwrap();

    let page = index::search_posts(committer.index().pool(), &SearchSpec::new("Kubernetes Docker")).unwrap();
    assert_eq!(page.posts.len(), 1);

    let page = index::search_posts(committer.index().pool(), &SearchSpec::new("\"Kubernetes\"")).unwrap();
    assert_eq!(page.posts.len(), 1);

    let page = index::search_posts(committer.index().pool(), &SearchSpec::new("golang")).unwrap();
    assert_eq!(page.posts.len(), 0);
}

#[tokio::test]
async fn invariant_5_mismatched_fingerprint_refuses_to_resume() {
    let (_dir, committer, kv) = new_store().await;
    let make_source = || Source::Fixture { posts: vec![raw_post("at://x/1", "alice", "hi", &[], "2026-01-01T00:00:00Z")] };

    sync::sync(
        &committer,
        &kv,
        make_source(),
        FilterAst::Author { handle: Handle::new("alice") },
        &NullCollaborators,
        SyncOptions::default(),
    )
    .await
    .unwrap();

    let err = sync::sync(&committer, &kv, make_source(), FilterAst::All, &NullCollaborators, SyncOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, postkeep::AppError::SyncError { .. }));
}

#[tokio::test]
async fn invariant_8_keyset_pagination_has_no_duplicates_across_pages() {
    let (_dir, committer, kv) = new_store().await;
    let posts = (0..5)
        .map(|i| raw_post(&format!("at://x/{i}"), "alice", "hi", &[], &format!("2026-01-0{}T00:00:00Z", i + 1)))
        .collect();
    sync::sync(&committer, &kv, Source::Fixture { posts }, FilterAst::All, &NullCollaborators, SyncOptions::default())
        .await
        .unwrap();

    let mut spec = QuerySpec::new(SortBy::CreatedAt, SortOrder::Asc);
    spec.page_size = 2;

    let mut seen = std::collections::HashSet::new();
    let mut cursor = None;
    loop {
        spec.cursor = cursor.clone();
        let page = index::run_query(committer.index().pool(), &spec).unwrap();
        if page.posts.is_empty() {
            break;
        }
        for post in &page.posts {
            assert!(seen.insert(post.uri.clone()), "duplicate across pages: {}", post.uri);
        }
        cursor = page.next_cursor;
        if cursor.is_none() {
            break;
        }
    }
    assert_eq!(seen.len(), 5);
}

#[tokio::test]
async fn dry_run_sync_does_not_write_or_checkpoint() {
    let (_dir, committer, kv) = new_store().await;
    let source = Source::Fixture { posts: vec![raw_post("at://x/1", "alice", "hi", &[], "2026-01-01T00:00:00Z")] };
    let mut options = SyncOptions::default();
    options.dry_run = true;
    options.policy = SyncPolicy::Dedupe;

    let result = sync::sync(&committer, &kv, source, FilterAst::All, &NullCollaborators, options).await.unwrap();
    assert_eq!(result.added, 1);

    let conn = committer.index().pool().get().unwrap();
    assert!(!committer.index().has_uri(&conn, "at://x/1").unwrap());
    assert!(kv.keys().unwrap().is_empty());
}
