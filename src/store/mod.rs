//! Store identity and on-disk layout.
//!
//! A store is a name plus a directory under the configured data root. This
//! module owns nothing but the layout; the event log, index, and KV tree each
//! open their own files inside `StoreRef::root`.

pub mod lock;

use std::path::PathBuf;

use crate::config::EngineConfig;
use crate::error::{AppError, AppResult};

pub use lock::StoreLock;

/// A cheap, copyable handle to a store's location on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreRef {
    pub name: String,
    pub root: PathBuf,
}

impl StoreRef {
    pub fn new(config: &EngineConfig, name: impl Into<String>) -> Self {
        let name = name.into();
        let root = config.store_dir(&name);
        Self { name, root }
    }

    pub fn db_path(&self) -> PathBuf {
        self.root.join("index.sqlite3")
    }

    pub fn kv_dir(&self) -> PathBuf {
        self.root.join("kv")
    }

    pub fn exists(&self) -> bool {
        self.root.is_dir()
    }

    /// Creates the store's directory tree. Fails if it already exists.
    pub fn create(&self) -> AppResult<()> {
        if self.exists() {
            return Err(AppError::StoreAlreadyExists { name: self.name.clone() });
        }
        std::fs::create_dir_all(&self.root)?;
        std::fs::create_dir_all(self.kv_dir())?;
        Ok(())
    }

    /// Returns this store's ref, requiring the directory to already exist.
    pub fn open_existing(config: &EngineConfig, name: impl Into<String>) -> AppResult<Self> {
        let store = Self::new(config, name);
        if !store.exists() {
            return Err(AppError::StoreNotFound { name: store.name });
        }
        Ok(store)
    }

    /// Lists every store name currently present under the data root.
    pub fn list(config: &EngineConfig) -> AppResult<Vec<String>> {
        let stores_dir = config.data_root.join("stores");
        if !stores_dir.is_dir() {
            return Ok(Vec::new());
        }
        let mut names = Vec::new();
        for entry in std::fs::read_dir(&stores_dir)? {
            let entry = entry?;
            if entry.file_type()?.is_dir() {
                if let Some(name) = entry.file_name().to_str() {
                    names.push(name.to_string());
                }
            }
        }
        names.sort();
        Ok(names)
    }

    pub fn lock(&self, config: &EngineConfig) -> StoreLock {
        StoreLock::new(config.locks_dir().join(format!("store-{}", self.name)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg(root: &std::path::Path) -> EngineConfig {
        let mut c = EngineConfig::default();
        c.data_root = root.to_path_buf();
        c
    }

    #[test]
    fn create_then_open_existing_roundtrips() {
        let dir = tempfile::tempdir().unwrap();
        let config = cfg(dir.path());
        let store = StoreRef::new(&config, "alice");
        store.create().unwrap();
        assert!(StoreRef::open_existing(&config, "alice").is_ok());
    }

    #[test]
    fn create_twice_fails() {
        let dir = tempfile::tempdir().unwrap();
        let config = cfg(dir.path());
        let store = StoreRef::new(&config, "alice");
        store.create().unwrap();
        let err = store.create().unwrap_err();
        assert!(matches!(err, AppError::StoreAlreadyExists { .. }));
    }

    #[test]
    fn open_missing_store_fails() {
        let dir = tempfile::tempdir().unwrap();
        let config = cfg(dir.path());
        let err = StoreRef::open_existing(&config, "ghost").unwrap_err();
        assert!(matches!(err, AppError::StoreNotFound { .. }));
    }

    #[test]
    fn list_reports_created_stores() {
        let dir = tempfile::tempdir().unwrap();
        let config = cfg(dir.path());
        StoreRef::new(&config, "b").create().unwrap();
        StoreRef::new(&config, "a").create().unwrap();
        assert_eq!(StoreRef::list(&config).unwrap(), vec!["a".to_string(), "b".to_string()]);
    }
}
