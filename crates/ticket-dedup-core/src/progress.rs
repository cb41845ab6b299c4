//! Progress events emitted during ingestion and index build.
//!
//! The finder reports through a [`ProgressReporter`]; the app decides
//! whether that means human lines on stderr, JSON lines, or nothing.

/// A single progress event.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ProgressEvent {
    /// Paging through the tracker. `fetched` tickets so far, total unknown.
    Fetching { fetched: u64 },
    /// `n` tickets normalized out of `total`.
    Normalizing { n: u64, total: u64 },
    /// Embedding batch `batch` of `batches` finished.
    Embedding { batch: u64, batches: u64 },
}

pub trait ProgressReporter: Send + Sync {
    fn report(&self, event: ProgressEvent);
}

/// No-op reporter when progress is disabled.
pub struct NoProgress;

impl ProgressReporter for NoProgress {
    fn report(&self, _event: ProgressEvent) {}
}
