//! File-per-key JSON key-value store.
//!
//! Used for `SyncCheckpoint`, `DerivationCheckpoint`, and `LineageEntry` —
//! small, infrequently-written singletons that don't warrant a SQLite table
//! of their own: one file per logical unit, written with
//! `create(true).truncate(true)` and flushed immediately so state is visible
//! even if the process crashes right after.
//!
//! Keys are turned into filenames by replacing any byte outside
//! `[a-zA-Z0-9_.-]` with `_`, so a source key like `feed:at://did:plc:x/y`
//! becomes a safe single path component.

use std::fs;
use std::path::PathBuf;

use serde::{de::DeserializeOwned, Serialize};

use crate::error::AppResult;

#[derive(Debug, Clone)]
pub struct KvStore {
    dir: PathBuf,
}

impl KvStore {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    fn path_for(&self, key: &str) -> PathBuf {
        let safe: String = key
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-') { c } else { '_' })
            .collect();
        self.dir.join(format!("{safe}.json"))
    }

    pub fn get<T: DeserializeOwned>(&self, key: &str) -> AppResult<Option<T>> {
        let path = self.path_for(key);
        match fs::read_to_string(&path) {
            Ok(contents) => Ok(Some(serde_json::from_str(&contents)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub fn put<T: Serialize>(&self, key: &str, value: &T) -> AppResult<()> {
        fs::create_dir_all(&self.dir)?;
        let path = self.path_for(key);
        let tmp_path = path.with_extension("json.tmp");
        let json = serde_json::to_string_pretty(value)?;
        fs::write(&tmp_path, json)?;
        fs::rename(&tmp_path, &path)?;
        tracing::trace!(key, path = %path.display(), "kv entry written");
        Ok(())
    }

    pub fn remove(&self, key: &str) -> AppResult<()> {
        let path = self.path_for(key);
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Lists every key currently present (derived from file stems).
    pub fn keys(&self) -> AppResult<Vec<String>> {
        if !self.dir.is_dir() {
            return Ok(Vec::new());
        }
        let mut keys = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) == Some("json") {
                if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                    keys.push(stem.to_string());
                }
            }
        }
        keys.sort();
        Ok(keys)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Sample {
        n: u64,
    }

    #[test]
    fn put_then_get_roundtrips() {
        let dir = tempfile::tempdir().unwrap();
        let kv = KvStore::new(dir.path().to_path_buf());
        kv.put("lineage", &Sample { n: 7 }).unwrap();
        let back: Option<Sample> = kv.get("lineage").unwrap();
        assert_eq!(back, Some(Sample { n: 7 }));
    }

    #[test]
    fn get_missing_key_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let kv = KvStore::new(dir.path().to_path_buf());
        let back: Option<Sample> = kv.get("nope").unwrap();
        assert_eq!(back, None);
    }

    #[test]
    fn key_with_special_chars_is_sanitized_to_a_single_file() {
        let dir = tempfile::tempdir().unwrap();
        let kv = KvStore::new(dir.path().to_path_buf());
        kv.put("feed:at://did:plc:x/y", &Sample { n: 1 }).unwrap();
        assert_eq!(kv.keys().unwrap().len(), 1);
    }

    #[test]
    fn remove_then_get_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let kv = KvStore::new(dir.path().to_path_buf());
        kv.put("k", &Sample { n: 1 }).unwrap();
        kv.remove("k").unwrap();
        let back: Option<Sample> = kv.get("k").unwrap();
        assert_eq!(back, None);
    }
}
