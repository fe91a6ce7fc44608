//! Thin clap binary over the core engine.
//!
//! Every command prints exactly one JSON object to stdout: the result on
//! success, or `{"error": {kind, message}}` on failure, with the process
//! exit code following `AppError::exit_code`. No NDJSON/table/tree
//! rendering and no remote source adapters live here — those are the
//! external CLI's job; this binary exists to exercise the core directly.

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use serde_json::json;

use crate::committer::Committer;
use crate::config::EngineConfig;
use crate::derive_engine::{self, DeriveMode, DeriveOptions};
use crate::error::{AppError, AppResult};
use crate::filter::{FilterAst, NullCollaborators};
use crate::index::{self, query::SortBy, query::SortOrder, Index, QuerySpec, SearchSort, SearchSpec};
use crate::kv::KvStore;
use crate::source::{RawPost, Source, SourceStream};
use crate::store::StoreRef;
use crate::sync::{self, SyncOptions, SyncPolicy};

#[derive(Parser)]
#[command(name = "postkeep")]
#[command(version)]
#[command(about = "Local-first ingestion and query engine for social posts", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Create, list, inspect, or clear stores
    Store {
        #[command(subcommand)]
        action: StoreAction,
    },
    /// One-shot ingest from a fixture file into a store
    Sync {
        store: String,
        /// JSON file containing an array of RawPost objects
        #[arg(long)]
        fixture: PathBuf,
        /// JSON filter AST file; defaults to `All` when omitted
        #[arg(long)]
        filter_file: Option<PathBuf>,
        #[arg(long, value_enum, default_value = "dedupe")]
        policy: PolicyArg,
        #[arg(long)]
        limit: Option<usize>,
        #[arg(long)]
        dry_run: bool,
    },
    /// Paginated, filtered query over a store's index
    Query {
        store: String,
        #[arg(long)]
        filter_file: Option<PathBuf>,
        #[arg(long, value_enum, default_value = "created-at")]
        sort_by: SortByArg,
        #[arg(long, value_enum, default_value = "desc")]
        order: OrderArg,
        #[arg(long)]
        cursor: Option<String>,
        #[arg(long, default_value_t = 50)]
        page_size: usize,
    },
    /// Full-text search over a store's index
    Search {
        store: String,
        query: String,
        #[arg(long, default_value_t = 25)]
        limit: usize,
        #[arg(long)]
        cursor: Option<usize>,
        #[arg(long, value_enum, default_value = "relevance")]
        sort: SearchSortArg,
    },
    /// Project one store's events into another through a filter
    Derive {
        source: String,
        target: String,
        #[arg(long)]
        filter_file: Option<PathBuf>,
        #[arg(long, value_enum, default_value = "event-time")]
        mode: DeriveModeArg,
        #[arg(long)]
        reset: bool,
    },
}

#[derive(Subcommand)]
pub enum StoreAction {
    Init { name: String },
    List,
    Info { name: String },
    Clear { name: String },
}

#[derive(Clone, Copy, ValueEnum)]
pub enum PolicyArg {
    Dedupe,
    Refresh,
}

impl From<PolicyArg> for SyncPolicy {
    fn from(v: PolicyArg) -> Self {
        match v {
            PolicyArg::Dedupe => SyncPolicy::Dedupe,
            PolicyArg::Refresh => SyncPolicy::Refresh,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
pub enum SortByArg {
    CreatedAt,
    LikeCount,
    RepostCount,
    ReplyCount,
    QuoteCount,
    Engagement,
}

impl From<SortByArg> for SortBy {
    fn from(v: SortByArg) -> Self {
        match v {
            SortByArg::CreatedAt => SortBy::CreatedAt,
            SortByArg::LikeCount => SortBy::LikeCount,
            SortByArg::RepostCount => SortBy::RepostCount,
            SortByArg::ReplyCount => SortBy::ReplyCount,
            SortByArg::QuoteCount => SortBy::QuoteCount,
            SortByArg::Engagement => SortBy::Engagement,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
pub enum OrderArg {
    Asc,
    Desc,
}

impl From<OrderArg> for SortOrder {
    fn from(v: OrderArg) -> Self {
        match v {
            OrderArg::Asc => SortOrder::Asc,
            OrderArg::Desc => SortOrder::Desc,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
pub enum SearchSortArg {
    Relevance,
    Newest,
    Oldest,
}

impl From<SearchSortArg> for SearchSort {
    fn from(v: SearchSortArg) -> Self {
        match v {
            SearchSortArg::Relevance => SearchSort::Relevance,
            SearchSortArg::Newest => SearchSort::Newest,
            SearchSortArg::Oldest => SearchSort::Oldest,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
pub enum DeriveModeArg {
    EventTime,
    DeriveTime,
}

impl From<DeriveModeArg> for DeriveMode {
    fn from(v: DeriveModeArg) -> Self {
        match v {
            DeriveModeArg::EventTime => DeriveMode::EventTime,
            DeriveModeArg::DeriveTime => DeriveMode::DeriveTime,
        }
    }
}

/// Top-level entry point. Prints exactly one JSON object and returns the
/// process exit code the caller should use.
pub async fn run() -> i32 {
    let cli = Cli::parse();
    let config = EngineConfig::from_env();

    match dispatch(cli.command, &config).await {
        Ok(value) => {
            println!("{}", serde_json::to_string(&value).expect("result always serializes"));
            0
        }
        Err(e) => {
            let envelope = json!({ "error": { "kind": e.kind(), "message": e.to_string() } });
            println!("{}", envelope);
            e.exit_code()
        }
    }
}

async fn dispatch(command: Commands, config: &EngineConfig) -> AppResult<serde_json::Value> {
    match command {
        Commands::Store { action } => store_action(action, config),
        Commands::Sync { store, fixture, filter_file, policy, limit, dry_run } => {
            sync_command(&store, &fixture, filter_file.as_deref(), policy.into(), limit, dry_run, config).await
        }
        Commands::Query { store, filter_file, sort_by, order, cursor, page_size } => {
            query_command(&store, filter_file.as_deref(), sort_by.into(), order.into(), cursor, page_size, config)
        }
        Commands::Search { store, query, limit, cursor, sort } => {
            search_command(&store, &query, limit, cursor, sort.into(), config)
        }
        Commands::Derive { source, target, filter_file, mode, reset } => {
            derive_command(&source, &target, filter_file.as_deref(), mode.into(), reset, config).await
        }
    }
}

fn load_filter(path: Option<&std::path::Path>) -> AppResult<FilterAst> {
    match path {
        None => Ok(FilterAst::All),
        Some(path) => {
            let contents = std::fs::read_to_string(path)?;
            serde_json::from_str(&contents)
                .map_err(|e| AppError::CliInputError { message: format!("invalid filter file: {e}") })
        }
    }
}

fn store_action(action: StoreAction, config: &EngineConfig) -> AppResult<serde_json::Value> {
    match action {
        StoreAction::Init { name } => {
            let store = StoreRef::new(config, &name);
            store.create()?;
            index::schema::open_writer(&store.db_path())?;
            Ok(json!({ "store": name, "created": true }))
        }
        StoreAction::List => {
            let names = StoreRef::list(config)?;
            Ok(json!({ "stores": names }))
        }
        StoreAction::Info { name } => {
            let store = StoreRef::open_existing(config, &name)?;
            let index = Index::open(&store.db_path())?;
            let conn = index.pool().get()?;
            let checkpoint = index.checkpoint(&conn)?;
            Ok(json!({ "store": name, "checkpoint": checkpoint }))
        }
        StoreAction::Clear { name } => {
            let store = StoreRef::open_existing(config, &name)?;
            let _guard = store.lock(config).acquire(&name)?;
            let writer = index::schema::open_writer(&store.db_path())?;
            index::clear(&writer)?;
            Ok(json!({ "store": name, "cleared": true }))
        }
    }
}

async fn sync_command(
    store_name: &str,
    fixture: &std::path::Path,
    filter_file: Option<&std::path::Path>,
    policy: SyncPolicy,
    limit: Option<usize>,
    dry_run: bool,
    config: &EngineConfig,
) -> AppResult<serde_json::Value> {
    let store = StoreRef::open_existing(config, store_name)?;
    let _guard = store.lock(config).acquire(store_name)?;

    let writer = index::schema::open_writer(&store.db_path())?;
    let index = Index::open(&store.db_path())?;
    let committer = Committer::new(writer, index);
    let kv = KvStore::new(store.kv_dir());

    let filter = load_filter(filter_file)?;
    let contents = std::fs::read_to_string(fixture)?;
    let posts: Vec<RawPost> = serde_json::from_str(&contents)
        .map_err(|e| AppError::CliInputError { message: format!("invalid fixture file: {e}") })?;
    let source = Source::Fixture { posts };

    let mut options = SyncOptions { policy, dry_run, ..SyncOptions::default() };
    options.limit = limit;

    let result = sync::sync(&committer, &kv, source, filter, &NullCollaborators, options).await?;
    Ok(serde_json::to_value(result)?)
}

fn query_command(
    store_name: &str,
    filter_file: Option<&std::path::Path>,
    sort_by: SortBy,
    order: SortOrder,
    cursor: Option<String>,
    page_size: usize,
    config: &EngineConfig,
) -> AppResult<serde_json::Value> {
    let store = StoreRef::open_existing(config, store_name)?;
    let index = Index::open(&store.db_path())?;

    let mut spec = QuerySpec::new(sort_by, order);
    spec.filter = match filter_file {
        None => None,
        Some(path) => Some(load_filter(Some(path))?),
    };
    spec.cursor = cursor;
    spec.page_size = page_size;

    let page = index::run_query(index.pool(), &spec)?;
    Ok(json!({ "posts": page.posts, "next_cursor": page.next_cursor }))
}

fn search_command(
    store_name: &str,
    query: &str,
    limit: usize,
    cursor: Option<usize>,
    sort: SearchSort,
    config: &EngineConfig,
) -> AppResult<serde_json::Value> {
    let store = StoreRef::open_existing(config, store_name)?;
    let index = Index::open(&store.db_path())?;

    let mut spec = SearchSpec::new(query);
    spec.limit = limit;
    spec.cursor = cursor;
    spec.sort = sort;

    let page = index::search_posts(index.pool(), &spec)?;
    Ok(json!({ "posts": page.posts, "next_cursor": page.next_cursor }))
}

async fn derive_command(
    source_name: &str,
    target_name: &str,
    filter_file: Option<&std::path::Path>,
    mode: DeriveMode,
    reset: bool,
    config: &EngineConfig,
) -> AppResult<serde_json::Value> {
    let source_store = StoreRef::open_existing(config, source_name)?;
    let target_store = StoreRef::open_existing(config, target_name)?;
    let _target_guard = target_store.lock(config).acquire(target_name)?;

    let source_conn = index::schema::open_writer(&source_store.db_path())?;
    let target_writer = index::schema::open_writer(&target_store.db_path())?;
    let target_index = Index::open(&target_store.db_path())?;
    let committer = Committer::new(target_writer, target_index);
    let target_kv = KvStore::new(target_store.kv_dir());

    let filter = load_filter(filter_file)?;
    let options = DeriveOptions { mode, reset };

    let result = derive_engine::derive(
        &source_conn,
        source_name,
        &committer,
        target_name,
        &target_kv,
        filter,
        &NullCollaborators,
        options,
    )
    .await?;
    Ok(serde_json::to_value(result)?)
}
