//! Engine configuration.
//!
//! Loaded in order of precedence:
//! 1. Environment variables (highest priority)
//! 2. Config file (`<data_root>/config.json`)
//! 3. Built-in defaults (lowest priority)

use serde::Deserialize;
use std::path::PathBuf;

/// Effective engine configuration.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Root directory under which every store gets its own subdirectory.
    pub data_root: PathBuf,
    /// Page size used by `stream_from`, index rebuild, and query pagination.
    pub page_size: usize,
    /// Persist a sync/derivation checkpoint after this many processed events...
    pub checkpoint_every: usize,
    /// ...or after this many milliseconds, whichever comes first.
    pub checkpoint_interval_ms: u64,
    /// FTS5 tokenizer spec used for `posts_fts`.
    pub fts_tokenizer: String,
    /// Default `scan_limit` when a query doesn't specify one.
    pub scan_limit_default: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            data_root: default_data_root(),
            page_size: 500,
            checkpoint_every: 100,
            checkpoint_interval_ms: 5_000,
            fts_tokenizer: "porter unicode61".to_string(),
            scan_limit_default: 10_000,
        }
    }
}

fn default_data_root() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("postkeep")
}

/// Config file structure (subset of `EngineConfig` that makes sense to
/// persist). All-`Option` so a partial file only overrides what it names.
#[derive(Debug, Deserialize, Default)]
pub(crate) struct FileEngineConfig {
    pub data_root: Option<String>,
    pub page_size: Option<usize>,
    pub checkpoint_every: Option<usize>,
    pub checkpoint_interval_ms: Option<u64>,
    pub fts_tokenizer: Option<String>,
    pub scan_limit_default: Option<usize>,
}

impl EngineConfig {
    /// Path to the config file, if the data root can be determined.
    pub fn config_path() -> Option<PathBuf> {
        Some(default_data_root().join("config.json"))
    }

    /// Loads configuration following env > file > default precedence.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Some(path) = Self::config_path() {
            if let Ok(contents) = std::fs::read_to_string(&path) {
                if let Ok(file_config) = serde_json::from_str::<FileEngineConfig>(&contents) {
                    config.merge_file(file_config);
                } else {
                    tracing::warn!("Failed to parse config file at {}; ignoring", path.display());
                }
            }
        }

        config.merge_env();
        config
    }

    fn merge_file(&mut self, file: FileEngineConfig) {
        if let Some(v) = file.data_root {
            self.data_root = PathBuf::from(v);
        }
        if let Some(v) = file.page_size {
            self.page_size = v;
        }
        if let Some(v) = file.checkpoint_every {
            self.checkpoint_every = v;
        }
        if let Some(v) = file.checkpoint_interval_ms {
            self.checkpoint_interval_ms = v;
        }
        if let Some(v) = file.fts_tokenizer {
            self.fts_tokenizer = v;
        }
        if let Some(v) = file.scan_limit_default {
            self.scan_limit_default = v;
        }
    }

    fn merge_env(&mut self) {
        if let Ok(v) = std::env::var("POSTKEEP_DATA_ROOT") {
            self.data_root = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var("POSTKEEP_PAGE_SIZE") {
            if let Ok(n) = v.parse() {
                self.page_size = n;
            }
        }
        if let Ok(v) = std::env::var("POSTKEEP_CHECKPOINT_EVERY") {
            if let Ok(n) = v.parse() {
                self.checkpoint_every = n;
            }
        }
        if let Ok(v) = std::env::var("POSTKEEP_CHECKPOINT_INTERVAL_MS") {
            if let Ok(n) = v.parse() {
                self.checkpoint_interval_ms = n;
            }
        }
    }

    pub fn store_dir(&self, store_name: &str) -> PathBuf {
        self.data_root.join("stores").join(store_name)
    }

    pub fn locks_dir(&self) -> PathBuf {
        self.data_root.join("locks")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_page_size_matches_spec() {
        assert_eq!(EngineConfig::default().page_size, 500);
    }

    #[test]
    fn store_dir_is_nested_under_data_root() {
        let mut cfg = EngineConfig::default();
        cfg.data_root = PathBuf::from("/tmp/pk");
        assert_eq!(cfg.store_dir("alice"), PathBuf::from("/tmp/pk/stores/alice"));
    }

    #[test]
    fn merge_env_overrides_page_size() {
        std::env::set_var("POSTKEEP_PAGE_SIZE", "250");
        let mut cfg = EngineConfig::default();
        cfg.merge_env();
        assert_eq!(cfg.page_size, 250);
        std::env::remove_var("POSTKEEP_PAGE_SIZE");
    }
}
