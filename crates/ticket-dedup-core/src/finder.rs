//! The duplicate-retrieval engine.
//!
//! [`DuplicateFinder`] owns a [`Catalog`] and a [`VectorIndex`] and drives
//! them through ingestion, index build, persistence, and query. The issue
//! tracker, the normalizer, and the embedding backend are injected.
//!
//! # Lifecycle
//!
//! ```text
//! Empty ──ingest──▶ Ingesting ──▶ Indexed ──build_index──▶ Queryable ──save──▶ Persisted
//!   │                                                          ▲
//!   └──────────────────────────load──▶ Loaded ─────────────────┘ (queryable)
//! ```
//!
//! # Scoring
//!
//! The index returns ascending distances. A match's similarity is
//! `1 - distance`, which is only meaningful for a metric bounded in
//! `[0, 1]`; the finder refuses unbounded metrics at construction and at
//! load. Matches below `similarity_threshold` are dropped; the rest keep
//! the index's order.
//!
//! # Partial failure
//!
//! A ticket that fails normalization during ingestion is logged and
//! skipped. Records with no canonical text are skipped during index build.
//! Both are reported back in [`IngestReport`] / [`BuildReport`]. Embedding,
//! index, and persistence failures are never swallowed.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::catalog::Catalog;
use crate::chunk::{chunk_text, ChunkingParams};
use crate::embedding::EmbeddingProvider;
use crate::error::{DedupError, Result};
use crate::index::{DistanceMetric, VectorIndex};
use crate::models::{format_percent, DuplicateMatch, Ticket, TicketRecord};
use crate::normalize::Normalizer;
use crate::progress::{NoProgress, ProgressEvent, ProgressReporter};
use crate::snapshot;
use crate::source::TicketSource;

pub const DEFAULT_PAGE_SIZE: usize = 100;
pub const DEFAULT_MAX_RESULTS: usize = 5000;
pub const DEFAULT_BATCH_SIZE: usize = 500;
pub const DEFAULT_BATCH_DELAY: Duration = Duration::from_secs(2);
pub const DEFAULT_K: usize = 5;
pub const DEFAULT_SIMILARITY_THRESHOLD: f32 = 0.85;

/// Ingestion and index-build tuning.
#[derive(Debug, Clone)]
pub struct FinderOptions {
    /// Tickets requested per tracker page.
    pub page_size: usize,
    /// Upper bound on tickets ingested per run.
    pub max_results: usize,
    /// Catalog records embedded per provider call.
    pub batch_size: usize,
    /// Pause between embedding batches.
    pub batch_delay: Duration,
    pub metric: DistanceMetric,
    /// Split over-length texts into overlapping chunks. `None` disables.
    pub chunking: Option<ChunkingParams>,
}

impl Default for FinderOptions {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
            max_results: DEFAULT_MAX_RESULTS,
            batch_size: DEFAULT_BATCH_SIZE,
            batch_delay: DEFAULT_BATCH_DELAY,
            metric: DistanceMetric::Cosine,
            chunking: None,
        }
    }
}

/// Per-query parameters.
#[derive(Debug, Clone)]
pub struct QueryOptions {
    /// Maximum neighbours fetched from the index.
    pub k: usize,
    /// Minimum similarity for a neighbour to be reported.
    pub similarity_threshold: f32,
    /// Only consider tickets whose status is in this set. Empty means no restriction.
    pub status_filter: Option<HashSet<String>>,
    /// Never report this key (the query ticket itself).
    pub exclude_key: Option<String>,
}

impl Default for QueryOptions {
    fn default() -> Self {
        Self {
            k: DEFAULT_K,
            similarity_threshold: DEFAULT_SIMILARITY_THRESHOLD,
            status_filter: None,
            exclude_key: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum FinderState {
    Empty,
    Ingesting,
    /// Catalog populated, no index built yet.
    Indexed,
    Queryable,
    Persisted,
    Loaded,
}

impl FinderState {
    pub fn is_queryable(&self) -> bool {
        matches!(
            self,
            FinderState::Queryable | FinderState::Persisted | FinderState::Loaded
        )
    }
}

/// A ticket or record left out of an operation, and why.
#[derive(Debug, Clone, Serialize)]
pub struct SkippedItem {
    pub key: String,
    pub reason: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct IngestReport {
    pub attempted: usize,
    pub succeeded: usize,
    pub skipped: Vec<SkippedItem>,
}

impl IngestReport {
    pub fn skipped_count(&self) -> usize {
        self.skipped.len()
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct BuildReport {
    /// True when an existing index was kept (no rebuild requested).
    pub reused_existing: bool,
    /// Catalog records considered.
    pub attempted: usize,
    /// Records that received at least one vector.
    pub inserted: usize,
    pub skipped: Vec<SkippedItem>,
    /// Index entries written (greater than `inserted` when chunking splits texts).
    pub vectors: usize,
    pub batches: usize,
}

/// Catalog/index correspondence after a build or load.
#[derive(Debug, Clone, Serialize)]
pub struct AlignmentReport {
    pub records: usize,
    pub vectors: usize,
    /// Catalog keys with no vector.
    pub unindexed: Vec<String>,
}

impl AlignmentReport {
    /// Exactly one vector per record.
    pub fn is_one_to_one(&self) -> bool {
        self.unindexed.is_empty() && self.records == self.vectors
    }
}

/// Result of querying by an existing ticket.
#[derive(Debug, Clone, Serialize)]
pub struct TicketQuery {
    pub key: String,
    pub canonical_text: String,
    pub matches: Vec<DuplicateMatch>,
}

pub struct DuplicateFinder {
    source: Arc<dyn TicketSource>,
    normalizer: Arc<dyn Normalizer>,
    embedder: Arc<dyn EmbeddingProvider>,
    progress: Arc<dyn ProgressReporter>,
    options: FinderOptions,
    catalog: Catalog,
    index: Option<VectorIndex>,
    last_update: Option<DateTime<Utc>>,
    state: FinderState,
}

impl DuplicateFinder {
    /// Create a finder in the `Empty` state.
    ///
    /// Fails with [`DedupError::UnboundedMetric`] when `options.metric`
    /// cannot be converted to a `[0, 1]` similarity, and with
    /// [`DedupError::Validation`] for zero page or batch sizes.
    pub fn new(
        source: Arc<dyn TicketSource>,
        normalizer: Arc<dyn Normalizer>,
        embedder: Arc<dyn EmbeddingProvider>,
        options: FinderOptions,
    ) -> Result<Self> {
        ensure_bounded(options.metric)?;
        if options.page_size == 0 {
            return Err(DedupError::Validation("page_size must be >= 1".into()));
        }
        if options.batch_size == 0 {
            return Err(DedupError::Validation("batch_size must be >= 1".into()));
        }
        if let Some(params) = &options.chunking {
            if params.chunk_size == 0 || params.overlap >= params.chunk_size {
                return Err(DedupError::Validation(
                    "chunking requires chunk_size > overlap".into(),
                ));
            }
        }
        Ok(Self {
            source,
            normalizer,
            embedder,
            progress: Arc::new(NoProgress),
            options,
            catalog: Catalog::new(),
            index: None,
            last_update: None,
            state: FinderState::Empty,
        })
    }

    pub fn with_progress(mut self, progress: Arc<dyn ProgressReporter>) -> Self {
        self.progress = progress;
        self
    }

    pub fn state(&self) -> FinderState {
        self.state
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn index(&self) -> Option<&VectorIndex> {
        self.index.as_ref()
    }

    pub fn last_update(&self) -> Option<DateTime<Utc>> {
        self.last_update
    }

    pub fn options(&self) -> &FinderOptions {
        &self.options
    }

    // ─── Ingestion ───────────────────────────────────────────────────

    /// Page through the tracker for `filter`, up to `max_results` tickets.
    pub async fn fetch_all(&self, filter: &str) -> Result<Vec<Ticket>> {
        let page_size = self.options.page_size;
        let max_results = self.options.max_results;
        let mut all = Vec::new();

        loop {
            let page = self
                .source
                .search(filter, all.len(), page_size)
                .await
                .map_err(DedupError::Source)?;
            let got = page.len();
            all.extend(page);
            debug!(fetched = all.len(), page = got, "fetched tracker page");
            self.progress.report(ProgressEvent::Fetching {
                fetched: all.len() as u64,
            });

            if got < page_size || all.len() >= max_results {
                break;
            }
        }

        all.truncate(max_results);
        Ok(all)
    }

    /// Fetch all tickets matching `filter` and normalize them into a new catalog.
    ///
    /// The new catalog replaces the current one and discards any index.
    /// Tracker errors propagate; per-ticket normalization errors are
    /// skipped and reported.
    pub async fn ingest(&mut self, filter: &str) -> Result<IngestReport> {
        let previous = self.state;
        self.state = FinderState::Ingesting;
        let tickets = match self.fetch_all(filter).await {
            Ok(t) => t,
            Err(e) => {
                self.state = previous;
                return Err(e);
            }
        };
        info!(count = tickets.len(), "fetched tickets");
        Ok(self.ingest_tickets(tickets).await)
    }

    /// Normalize already-fetched tickets into a new catalog.
    pub async fn ingest_tickets(&mut self, tickets: Vec<Ticket>) -> IngestReport {
        self.state = FinderState::Ingesting;
        let total = tickets.len();
        let mut report = IngestReport {
            attempted: total,
            ..Default::default()
        };
        let mut catalog = Catalog::new();

        for (i, ticket) in tickets.iter().enumerate() {
            match self.normalize_ticket(ticket).await {
                Ok(text) => match catalog.push(TicketRecord::from_ticket(ticket, text)) {
                    Ok(_) => report.succeeded += 1,
                    Err(e) => skip(&mut report.skipped, &ticket.key, &e),
                },
                Err(e) => skip(&mut report.skipped, &ticket.key, &e),
            }
            self.progress.report(ProgressEvent::Normalizing {
                n: (i + 1) as u64,
                total: total as u64,
            });
        }

        if !report.skipped.is_empty() {
            warn!(
                attempted = report.attempted,
                succeeded = report.succeeded,
                skipped = report.skipped.len(),
                "ingestion finished with skipped tickets"
            );
        }

        self.set_catalog(catalog);
        self.last_update = Some(Utc::now());
        report
    }

    /// Replace the catalog. Any existing index is discarded.
    pub fn set_catalog(&mut self, catalog: Catalog) {
        self.state = if catalog.is_empty() {
            FinderState::Empty
        } else {
            FinderState::Indexed
        };
        self.catalog = catalog;
        self.index = None;
    }

    async fn normalize_ticket(&self, ticket: &Ticket) -> Result<String> {
        self.normalizer
            .normalize(&ticket.summary, &ticket.description, &ticket.extra_fields)
            .await
    }

    // ─── Index build ─────────────────────────────────────────────────

    /// Embed the catalog into a fresh index.
    ///
    /// A no-op when an index exists and `force_rebuild` is false. The new
    /// index only replaces the old one once every batch has succeeded.
    pub async fn build_index(&mut self, force_rebuild: bool) -> Result<BuildReport> {
        if let Some(index) = &self.index {
            if !force_rebuild {
                return Ok(BuildReport {
                    reused_existing: true,
                    attempted: self.catalog.len(),
                    inserted: index.parent_keys().len(),
                    vectors: index.len(),
                    ..Default::default()
                });
            }
        }
        if self.catalog.is_empty() {
            return Err(DedupError::EmptyDatabase(
                "catalog has no records to index".into(),
            ));
        }

        let mut index = VectorIndex::new(self.options.metric);
        let mut report = BuildReport {
            attempted: self.catalog.len(),
            ..Default::default()
        };
        let batches: Vec<&[Arc<TicketRecord>]> =
            self.catalog.records().chunks(self.options.batch_size).collect();
        let batch_count = batches.len();

        for (i, batch) in batches.into_iter().enumerate() {
            let mut texts = Vec::new();
            let mut records = Vec::new();
            let mut chunk_indices = Vec::new();

            for record in batch {
                if record.normalized_text.trim().is_empty() {
                    warn!(key = %record.key, "skipping record with no canonical text");
                    report.skipped.push(SkippedItem {
                        key: record.key.clone(),
                        reason: "missing canonical text".into(),
                    });
                    continue;
                }
                for (chunk_index, text) in self.embedding_texts(record) {
                    texts.push(text);
                    chunk_indices.push(chunk_index);
                    records.push(record.clone());
                }
                report.inserted += 1;
            }

            if !texts.is_empty() {
                let vectors = self
                    .embedder
                    .embed_batch(&texts)
                    .await
                    .map_err(DedupError::Embedding)?;
                if vectors.len() != texts.len() {
                    return Err(DedupError::Index(format!(
                        "embedding provider returned {} vectors for {} texts",
                        vectors.len(),
                        texts.len()
                    )));
                }
                report.vectors += index.insert_chunks(texts, vectors, records, chunk_indices)?;
            }

            report.batches += 1;
            info!(batch = i + 1, batches = batch_count, vectors = index.len(), "embedded batch");
            self.progress.report(ProgressEvent::Embedding {
                batch: (i + 1) as u64,
                batches: batch_count as u64,
            });

            if i + 1 < batch_count && !self.options.batch_delay.is_zero() {
                tokio::time::sleep(self.options.batch_delay).await;
            }
        }

        if !report.skipped.is_empty() {
            warn!(
                skipped = report.skipped.len(),
                inserted = report.inserted,
                "index build skipped records"
            );
        }

        self.index = Some(index);
        self.state = FinderState::Queryable;
        Ok(report)
    }

    /// `(chunk_index, text)` pairs to embed for one record.
    fn embedding_texts(&self, record: &TicketRecord) -> Vec<(usize, String)> {
        match &self.options.chunking {
            Some(params) => chunk_text(&record.key, &record.normalized_text, params)
                .into_iter()
                .map(|c| (c.index, c.text))
                .collect(),
            None => vec![(0, record.normalized_text.clone())],
        }
    }

    /// Compare catalog keys against index parent keys.
    ///
    /// An index entry whose key is not in the catalog is an error; catalog
    /// records without vectors are listed in the report.
    pub fn verify_alignment(&self) -> Result<AlignmentReport> {
        let index = self.require_index()?;
        let indexed = index.parent_keys();
        if let Some(orphan) = indexed.iter().find(|k| !self.catalog.contains(k)) {
            return Err(DedupError::Index(format!(
                "index entry for {} has no catalog record",
                orphan
            )));
        }
        let unindexed = self
            .catalog
            .iter()
            .filter(|r| !indexed.contains(r.key.as_str()))
            .map(|r| r.key.clone())
            .collect();
        Ok(AlignmentReport {
            records: self.catalog.len(),
            vectors: index.len(),
            unindexed,
        })
    }

    // ─── Persistence ─────────────────────────────────────────────────

    /// Write a new snapshot under `directory` and return its path.
    pub fn save(&mut self, directory: &Path) -> Result<PathBuf> {
        let index = match &self.index {
            Some(index) if !index.is_empty() => index,
            _ => {
                return Err(DedupError::EmptyDatabase(
                    "no index to save; build the index first".into(),
                ))
            }
        };
        if self.catalog.is_empty() {
            return Err(DedupError::EmptyDatabase("no ticket records to save".into()));
        }

        let path = snapshot::write_snapshot(
            directory,
            &self.catalog,
            index,
            self.last_update,
            self.embedder.model_name(),
        )?;
        info!(
            path = %path.display(),
            records = self.catalog.len(),
            vectors = index.len(),
            "saved snapshot"
        );
        self.state = FinderState::Persisted;
        Ok(path)
    }

    /// Replace catalog and index with the snapshot at `path`.
    pub fn load(&mut self, path: &Path) -> Result<()> {
        if !path.exists() {
            return Err(DedupError::NotFound(path.to_path_buf()));
        }
        let snap = snapshot::read_snapshot(path)?;
        ensure_bounded(snap.index.metric())?;
        if snap.embedding_model != self.embedder.model_name() {
            warn!(
                snapshot_model = %snap.embedding_model,
                provider_model = %self.embedder.model_name(),
                "snapshot was built with a different embedding model; similarities may be meaningless"
            );
        }
        if let (Some(d), dims) = (snap.index.dims(), self.embedder.dims()) {
            if dims != 0 && d != dims {
                return Err(DedupError::Index(format!(
                    "snapshot vectors have {} dims, embedding provider produces {}",
                    d, dims
                )));
            }
        }

        info!(
            path = %path.display(),
            records = snap.catalog.len(),
            vectors = snap.index.len(),
            "loaded snapshot"
        );
        self.catalog = snap.catalog;
        self.index = Some(snap.index);
        self.last_update = snap.last_update;
        self.state = FinderState::Loaded;
        Ok(())
    }

    // ─── Query ───────────────────────────────────────────────────────

    /// Find likely duplicates of `text`.
    ///
    /// `text` is embedded as given; pass it through
    /// [`canonicalize`](Self::canonicalize) first when it is raw ticket
    /// prose rather than a canonical summary.
    pub async fn query(&self, text: &str, options: &QueryOptions) -> Result<Vec<DuplicateMatch>> {
        let index = self.require_index()?;
        if text.trim().is_empty() {
            return Err(DedupError::Validation("query text is empty".into()));
        }
        let threshold = options.similarity_threshold;
        if !(0.0..=1.0).contains(&threshold) {
            return Err(DedupError::Validation(format!(
                "similarity_threshold must be in [0, 1], got {}",
                threshold
            )));
        }

        let vector = self
            .embedder
            .embed_query(text)
            .await
            .map_err(DedupError::Embedding)?;

        let statuses = options.status_filter.as_ref().filter(|s| !s.is_empty());
        let exclude = options.exclude_key.as_deref();
        let filter = |r: &TicketRecord| -> bool {
            statuses.map_or(true, |s| s.contains(&r.status)) && exclude != Some(r.key.as_str())
        };
        let hits = index.search(&vector, options.k, Some(&filter))?;

        let matches = hits
            .into_iter()
            .filter_map(|hit| {
                let similarity = 1.0 - hit.distance;
                (similarity >= threshold).then(|| to_match(&hit.record, similarity))
            })
            .collect();
        Ok(matches)
    }

    /// Normalize free query text into canonical form.
    pub async fn canonicalize(&self, text: &str) -> Result<String> {
        self.normalizer.normalize(text, text, &[]).await
    }

    /// Fetch ticket `key`, normalize it, and find its likely duplicates.
    ///
    /// The ticket itself is excluded from the results.
    pub async fn query_ticket(&self, key: &str, options: &QueryOptions) -> Result<TicketQuery> {
        self.require_index()?;
        let ticket = self.source.fetch(key).await.map_err(DedupError::Source)?;
        let canonical_text = self.normalize_ticket(&ticket).await?;
        let options = QueryOptions {
            exclude_key: Some(ticket.key.clone()),
            ..options.clone()
        };
        let matches = self.query(&canonical_text, &options).await?;
        Ok(TicketQuery {
            key: ticket.key,
            canonical_text,
            matches,
        })
    }

    fn require_index(&self) -> Result<&VectorIndex> {
        match &self.index {
            Some(index) if self.state.is_queryable() => Ok(index),
            _ => Err(DedupError::NotReady(format!(
                "no index in state {:?}; build or load one first",
                self.state
            ))),
        }
    }
}

fn ensure_bounded(metric: DistanceMetric) -> Result<()> {
    if metric.is_unit_bounded() {
        Ok(())
    } else {
        Err(DedupError::UnboundedMetric(metric.to_string()))
    }
}

fn skip(skipped: &mut Vec<SkippedItem>, key: &str, err: &DedupError) {
    warn!(key = %key, error = %err, "skipping ticket");
    skipped.push(SkippedItem {
        key: key.to_string(),
        reason: err.to_string(),
    });
}

fn to_match(record: &TicketRecord, similarity: f32) -> DuplicateMatch {
    DuplicateMatch {
        key: record.key.clone(),
        summary: record.summary.clone(),
        status: record.status.clone(),
        priority: record.priority.clone(),
        created_at: record.created_at,
        updated_at: record.updated_at,
        labels: record.labels.clone(),
        similarity,
        similarity_display: format_percent(similarity),
        text_length: record.normalized_text.chars().count(),
    }
}
