//! Error taxonomy for the duplicate-retrieval engine.
//!
//! Collaborator failures (tracker, completion backend, embedding backend)
//! arrive as [`anyhow::Error`] and are wrapped into the variant naming the
//! stage that failed, so callers can tell a bad input from a failed
//! backend call without string matching.

use std::path::PathBuf;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, DedupError>;

#[derive(Error, Debug)]
pub enum DedupError {
    /// Bad or missing required input.
    #[error("validation error: {0}")]
    Validation(String),

    /// The normalization backend failed or returned unusable output.
    #[error("normalization failed: {message}")]
    Normalization {
        message: String,
        #[source]
        source: Option<anyhow::Error>,
    },

    /// Save attempted with nothing to save.
    #[error("empty database: {0}")]
    EmptyDatabase(String),

    /// A snapshot path or named snapshot does not exist.
    #[error("not found: {}", .0.display())]
    NotFound(PathBuf),

    /// Query attempted before an index was built or loaded.
    #[error("not ready: {0}")]
    NotReady(String),

    /// The distance metric cannot be turned into a `[0, 1]` similarity.
    #[error("distance metric '{0}' is unbounded; similarity = 1 - distance requires a metric in [0, 1]")]
    UnboundedMetric(String),

    /// Vectors, texts, and records failed positional or dimensional checks.
    #[error("index error: {0}")]
    Index(String),

    #[error("embedding failed: {0:#}")]
    Embedding(#[source] anyhow::Error),

    #[error("ticket source failed: {0:#}")]
    Source(#[source] anyhow::Error),

    /// A snapshot file decoded to something structurally inconsistent.
    #[error("corrupt snapshot {}: {message}", .path.display())]
    Snapshot { path: PathBuf, message: String },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl DedupError {
    pub fn normalization(message: impl Into<String>) -> Self {
        DedupError::Normalization {
            message: message.into(),
            source: None,
        }
    }

    pub fn backend(err: anyhow::Error) -> Self {
        DedupError::Normalization {
            message: format!("backend call failed: {:#}", err),
            source: Some(err),
        }
    }
}
