//! Per-store exclusive writer lock.
//!
//! Implemented as a directory created with exclusive semantics:
//! `std::fs::create_dir` fails with `AlreadyExists` if another process (or an
//! earlier, un-released guard) holds it. Release removes the directory and
//! runs unconditionally on scope exit via `Drop`.

use std::path::PathBuf;

use crate::error::AppError;

#[derive(Debug, Clone)]
pub struct StoreLock {
    path: PathBuf,
}

impl StoreLock {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    /// Acquires the lock, returning a guard that releases it on drop.
    pub fn acquire(&self, store_name: &str) -> Result<StoreLockGuard, AppError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| AppError::StoreLockError {
                name: store_name.to_string(),
                message: format!("failed to prepare locks directory: {e}"),
            })?;
        }
        match std::fs::create_dir(&self.path) {
            Ok(()) => {
                tracing::debug!(store = store_name, path = %self.path.display(), "store lock acquired");
                Ok(StoreLockGuard { path: self.path.clone(), name: store_name.to_string() })
            }
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                Err(AppError::StoreLockError {
                    name: store_name.to_string(),
                    message: "store is busy (another writer holds the lock)".to_string(),
                })
            }
            Err(e) => Err(AppError::StoreLockError {
                name: store_name.to_string(),
                message: format!("failed to acquire lock: {e}"),
            }),
        }
    }
}

/// Held while a write operation is in progress. Dropping it releases the lock.
pub struct StoreLockGuard {
    path: PathBuf,
    name: String,
}

impl Drop for StoreLockGuard {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_dir(&self.path) {
            tracing::warn!(store = %self.name, path = %self.path.display(), error = %e, "failed to release store lock");
        } else {
            tracing::debug!(store = %self.name, "store lock released");
        }
    }
}
