use std::path::PathBuf;
use thiserror::Error;

/// Fatal engine errors.
///
/// Only unrecoverable environment problems are expressed as errors:
/// missing reference data at startup, or an unreadable capture directory.
/// Everything else (DNS failures, lookup misses, corrupt caches, malformed
/// capture files) degrades to a safe empty answer inside the component
/// that hit it, so analysis of the remaining sites proceeds.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("filter directory not found: {0}")]
    FilterDirMissing(PathBuf),

    #[error("no filter rules were loaded from {0}")]
    NoFilterRules(PathBuf),

    #[error("public suffix list unavailable (no cached copy, fetch failed: {reason})")]
    PublicSuffixUnavailable { reason: String },

    #[error("capture directory not found: {0}")]
    CaptureDirMissing(PathBuf),

    #[error("{path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed capture record {path}: {source}")]
    MalformedRecord {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

impl EngineError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io { path: path.into(), source }
    }
}
