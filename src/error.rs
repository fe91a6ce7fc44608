//! Tagged error kinds for the store engine.
//!
//! A plain enum with a manual `Display`/`Error` impl rather than `thiserror`.
//! Each variant carries enough to build the CLI's
//! `{error: {kind, message, cause}}` envelope and to map to a stable exit
//! code.

use std::fmt;

/// The stage at which a per-event sync failure occurred.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncStage {
    Source,
    Parse,
    Filter,
    Store,
}

impl fmt::Display for SyncStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SyncStage::Source => "source",
            SyncStage::Parse => "parse",
            SyncStage::Filter => "filter",
            SyncStage::Store => "store",
        };
        f.write_str(s)
    }
}

/// How a side-effectful filter leaf behaves when its collaborator fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OnError {
    /// Treat the post as not matching.
    #[default]
    Exclude,
    /// Treat the post as matching.
    Include,
}

#[derive(Debug)]
pub enum AppError {
    CliInputError {
        message: String,
    },
    StoreNotFound {
        name: String,
    },
    StoreAlreadyExists {
        name: String,
    },
    StoreIoError {
        message: String,
        cause: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
    StoreLockError {
        name: String,
        message: String,
    },
    StoreIndexError {
        message: String,
        cause: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
    SyncError {
        stage: SyncStage,
        message: String,
        cause: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
    DerivationError {
        message: String,
    },
    FilterEvalError {
        message: String,
    },
}

impl AppError {
    pub fn store_io(message: impl Into<String>) -> Self {
        AppError::StoreIoError { message: message.into(), cause: None }
    }

    pub fn store_index(message: impl Into<String>) -> Self {
        AppError::StoreIndexError { message: message.into(), cause: None }
    }

    pub fn sync(stage: SyncStage, message: impl Into<String>) -> Self {
        AppError::SyncError { stage, message: message.into(), cause: None }
    }

    pub fn derivation(message: impl Into<String>) -> Self {
        AppError::DerivationError { message: message.into() }
    }

    pub fn filter_eval(message: impl Into<String>) -> Self {
        AppError::FilterEvalError { message: message.into() }
    }

    /// Short machine-readable tag, used as the `kind` field in the CLI's
    /// `{error: {...}}` envelope.
    pub fn kind(&self) -> &'static str {
        match self {
            AppError::CliInputError { .. } => "cli_input_error",
            AppError::StoreNotFound { .. } => "store_not_found",
            AppError::StoreAlreadyExists { .. } => "store_already_exists",
            AppError::StoreIoError { .. } => "store_io_error",
            AppError::StoreLockError { .. } => "store_lock_error",
            AppError::StoreIndexError { .. } => "store_index_error",
            AppError::SyncError { .. } => "sync_error",
            AppError::DerivationError { .. } => "derivation_error",
            AppError::FilterEvalError { .. } => "filter_eval_error",
        }
    }

    /// Stable numeric exit code mapping for the CLI.
    pub fn exit_code(&self) -> i32 {
        match self {
            AppError::CliInputError { .. } => 2,
            AppError::StoreNotFound { .. } => 3,
            AppError::StoreAlreadyExists { .. } => 3,
            AppError::StoreLockError { .. } => 4,
            AppError::SyncError { stage: SyncStage::Source, .. } => 5,
            AppError::SyncError { stage: SyncStage::Parse, .. } => 6,
            AppError::SyncError { stage: SyncStage::Filter, .. } => 7,
            AppError::SyncError { stage: SyncStage::Store, .. } => 8,
            AppError::StoreIoError { .. } => 8,
            AppError::StoreIndexError { .. } => 8,
            AppError::DerivationError { .. } => 9,
            AppError::FilterEvalError { .. } => 7,
        }
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::CliInputError { message } => write!(f, "invalid input: {message}"),
            AppError::StoreNotFound { name } => write!(f, "store not found: {name}"),
            AppError::StoreAlreadyExists { name } => write!(f, "store already exists: {name}"),
            AppError::StoreIoError { message, .. } => write!(f, "store I/O error: {message}"),
            AppError::StoreLockError { name, message } => {
                write!(f, "store busy ({name}): {message}")
            }
            AppError::StoreIndexError { message, .. } => write!(f, "index error: {message}"),
            AppError::SyncError { stage, message, .. } => {
                write!(f, "sync error at {stage} stage: {message}")
            }
            AppError::DerivationError { message } => write!(f, "derivation error: {message}"),
            AppError::FilterEvalError { message } => write!(f, "filter evaluation error: {message}"),
        }
    }
}

impl std::error::Error for AppError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            AppError::StoreIoError { cause, .. }
            | AppError::StoreIndexError { cause, .. }
            | AppError::SyncError { cause, .. } => {
                cause.as_ref().map(|c| c.as_ref() as &(dyn std::error::Error + 'static))
            }
            _ => None,
        }
    }
}

impl From<rusqlite::Error> for AppError {
    fn from(e: rusqlite::Error) -> Self {
        AppError::StoreIndexError { message: e.to_string(), cause: Some(Box::new(e)) }
    }
}

impl From<r2d2::Error> for AppError {
    fn from(e: r2d2::Error) -> Self {
        AppError::StoreIoError { message: e.to_string(), cause: Some(Box::new(e)) }
    }
}

impl From<std::io::Error> for AppError {
    fn from(e: std::io::Error) -> Self {
        AppError::StoreIoError { message: e.to_string(), cause: Some(Box::new(e)) }
    }
}

impl From<serde_json::Error> for AppError {
    fn from(e: serde_json::Error) -> Self {
        AppError::StoreIndexError { message: e.to_string(), cause: Some(Box::new(e)) }
    }
}

pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_codes_are_stable() {
        assert_eq!(AppError::CliInputError { message: "x".into() }.exit_code(), 2);
        assert_eq!(AppError::StoreNotFound { name: "s".into() }.exit_code(), 3);
        assert_eq!(
            AppError::sync(SyncStage::Parse, "bad").exit_code(),
            6
        );
    }

    #[test]
    fn display_includes_message() {
        let e = AppError::store_io("disk full");
        assert!(e.to_string().contains("disk full"));
    }
}
