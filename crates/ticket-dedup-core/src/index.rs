//! Flat nearest-neighbour index over ticket embeddings.
//!
//! Holds `(vector, record)` pairs as [`VectorEntry`]s and answers top-k
//! queries by brute-force scan. Each entry carries an explicit
//! `parent_key` so a ticket split into several chunks maps to several
//! entries sharing that key.
//!
//! Distances are ascending: closer means smaller. The metric is fixed for
//! the life of one index.

use std::cmp::Ordering;
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::embedding::{cosine_similarity, squared_l2};
use crate::error::{DedupError, Result};
use crate::models::TicketRecord;

/// Distance metric used by a [`VectorIndex`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DistanceMetric {
    /// `1 - cos(a, b)`, clamped to `[0, 1]`.
    Cosine,
    /// `‖a - b‖²`. Not bounded; cannot back a `1 - distance` similarity.
    SquaredL2,
}

impl DistanceMetric {
    pub fn distance(&self, a: &[f32], b: &[f32]) -> f32 {
        match self {
            DistanceMetric::Cosine => (1.0 - cosine_similarity(a, b)).clamp(0.0, 1.0),
            DistanceMetric::SquaredL2 => squared_l2(a, b),
        }
    }

    /// Whether every distance this metric produces lies in `[0, 1]`.
    pub fn is_unit_bounded(&self) -> bool {
        matches!(self, DistanceMetric::Cosine)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DistanceMetric::Cosine => "cosine",
            DistanceMetric::SquaredL2 => "squared_l2",
        }
    }
}

impl fmt::Display for DistanceMetric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DistanceMetric {
    type Err = DedupError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "cosine" => Ok(DistanceMetric::Cosine),
            "squared_l2" | "l2" => Ok(DistanceMetric::SquaredL2),
            other => Err(DedupError::Validation(format!(
                "unknown distance metric: '{}'. Must be cosine or squared_l2.",
                other
            ))),
        }
    }
}

/// One indexed vector and the record it represents.
#[derive(Debug, Clone)]
pub struct VectorEntry {
    /// Join key back to the catalog.
    pub parent_key: String,
    /// Position of this chunk within its parent (0 when unchunked).
    pub chunk_index: usize,
    /// The exact text that was embedded.
    pub text: String,
    pub vector: Vec<f32>,
    pub record: Arc<TicketRecord>,
}

/// A search hit: the matched record and its distance to the query.
#[derive(Debug, Clone)]
pub struct SearchHit {
    pub record: Arc<TicketRecord>,
    pub chunk_index: usize,
    pub distance: f32,
}

#[derive(Debug, Clone)]
pub struct VectorIndex {
    metric: DistanceMetric,
    dims: Option<usize>,
    entries: Vec<VectorEntry>,
}

impl VectorIndex {
    pub fn new(metric: DistanceMetric) -> Self {
        Self {
            metric,
            dims: None,
            entries: Vec::new(),
        }
    }

    pub fn metric(&self) -> DistanceMetric {
        self.metric
    }

    /// Vector dimensionality, fixed by the first insert.
    pub fn dims(&self) -> Option<usize> {
        self.dims
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[VectorEntry] {
        &self.entries
    }

    /// Distinct parent keys present in the index.
    pub fn parent_keys(&self) -> HashSet<&str> {
        self.entries.iter().map(|e| e.parent_key.as_str()).collect()
    }

    /// Append position-aligned texts, vectors, and records.
    ///
    /// The whole call is validated before anything is appended: on error
    /// the index is unchanged.
    pub fn insert(
        &mut self,
        texts: Vec<String>,
        vectors: Vec<Vec<f32>>,
        records: Vec<Arc<TicketRecord>>,
    ) -> Result<usize> {
        let chunk_indices = vec![0; texts.len()];
        self.insert_chunks(texts, vectors, records, chunk_indices)
    }

    /// Like [`insert`](Self::insert), with an explicit chunk index per entry.
    pub fn insert_chunks(
        &mut self,
        texts: Vec<String>,
        vectors: Vec<Vec<f32>>,
        records: Vec<Arc<TicketRecord>>,
        chunk_indices: Vec<usize>,
    ) -> Result<usize> {
        if texts.len() != vectors.len()
            || texts.len() != records.len()
            || texts.len() != chunk_indices.len()
        {
            return Err(DedupError::Index(format!(
                "misaligned insert: {} texts, {} vectors, {} records",
                texts.len(),
                vectors.len(),
                records.len()
            )));
        }

        let mut dims = self.dims;
        for (vector, record) in vectors.iter().zip(records.iter()) {
            if vector.is_empty() {
                return Err(DedupError::Index(format!(
                    "empty vector for {}",
                    record.key
                )));
            }
            match dims {
                Some(d) if d != vector.len() => {
                    return Err(DedupError::Index(format!(
                        "dimension mismatch for {}: expected {}, got {}",
                        record.key,
                        d,
                        vector.len()
                    )));
                }
                Some(_) => {}
                None => dims = Some(vector.len()),
            }
            if vector.iter().any(|v| !v.is_finite()) {
                return Err(DedupError::Index(format!(
                    "non-finite value in vector for {}",
                    record.key
                )));
            }
        }

        let inserted = texts.len();
        self.dims = dims;
        for (((text, vector), record), chunk_index) in texts
            .into_iter()
            .zip(vectors)
            .zip(records)
            .zip(chunk_indices)
        {
            self.entries.push(VectorEntry {
                parent_key: record.key.clone(),
                chunk_index,
                text,
                vector,
                record,
            });
        }
        Ok(inserted)
    }

    /// Return up to `k` entries nearest to `query`, ascending by distance.
    ///
    /// `filter` restricts the candidate set before ranking, so a
    /// restrictive filter still yields up to `k` hits when enough entries
    /// pass it. Ties keep insertion order.
    pub fn search(
        &self,
        query: &[f32],
        k: usize,
        filter: Option<&dyn Fn(&TicketRecord) -> bool>,
    ) -> Result<Vec<SearchHit>> {
        if k == 0 || self.entries.is_empty() {
            return Ok(Vec::new());
        }
        if let Some(d) = self.dims {
            if query.len() != d {
                return Err(DedupError::Index(format!(
                    "query dimension mismatch: index has {}, query has {}",
                    d,
                    query.len()
                )));
            }
        }

        let mut hits: Vec<SearchHit> = self
            .entries
            .iter()
            .filter(|e| filter.map_or(true, |f| f(&e.record)))
            .map(|e| SearchHit {
                record: e.record.clone(),
                chunk_index: e.chunk_index,
                distance: self.metric.distance(query, &e.vector),
            })
            .collect();

        // Stable sort keeps insertion order among equal distances.
        hits.sort_by(|a, b| {
            a.distance
                .partial_cmp(&b.distance)
                .unwrap_or(Ordering::Equal)
        });
        hits.truncate(k);
        Ok(hits)
    }

    /// Rebuild an index from persisted `(text, chunk_index, vector, record)` parts.
    pub(crate) fn from_parts(
        metric: DistanceMetric,
        entries: Vec<(String, usize, Vec<f32>, Arc<TicketRecord>)>,
    ) -> Result<Self> {
        let mut index = Self::new(metric);
        let mut texts = Vec::with_capacity(entries.len());
        let mut vectors = Vec::with_capacity(entries.len());
        let mut records = Vec::with_capacity(entries.len());
        let mut chunk_indices = Vec::with_capacity(entries.len());
        for (text, chunk_index, vector, record) in entries {
            texts.push(text);
            chunk_indices.push(chunk_index);
            vectors.push(vector);
            records.push(record);
        }
        index.insert_chunks(texts, vectors, records, chunk_indices)?;
        Ok(index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn record(key: &str, status: &str) -> Arc<TicketRecord> {
        let now = Utc::now();
        Arc::new(TicketRecord {
            key: key.to_string(),
            summary: key.to_string(),
            raw_description: String::new(),
            normalized_text: format!("Shows {}", key),
            status: status.to_string(),
            priority: "Minor".to_string(),
            labels: vec![],
            created_at: now,
            updated_at: now,
        })
    }

    fn sample_index() -> VectorIndex {
        let mut index = VectorIndex::new(DistanceMetric::Cosine);
        index
            .insert(
                vec!["a".into(), "b".into(), "c".into()],
                vec![vec![1.0, 0.0], vec![0.7, 0.7], vec![0.0, 1.0]],
                vec![
                    record("BUG-1", "Open"),
                    record("BUG-2", "Closed"),
                    record("BUG-3", "Open"),
                ],
            )
            .unwrap();
        index
    }

    #[test]
    fn test_search_ascending_distance() {
        let index = sample_index();
        let hits = index.search(&[1.0, 0.1], 3, None).unwrap();
        let keys: Vec<&str> = hits.iter().map(|h| h.record.key.as_str()).collect();
        assert_eq!(keys, vec!["BUG-1", "BUG-2", "BUG-3"]);
        for pair in hits.windows(2) {
            assert!(pair[0].distance <= pair[1].distance);
        }
    }

    #[test]
    fn test_ties_keep_insertion_order() {
        let mut index = VectorIndex::new(DistanceMetric::Cosine);
        index
            .insert(
                vec!["x".into(), "y".into(), "z".into()],
                vec![vec![0.0, 1.0], vec![2.0, 0.0], vec![1.0, 0.0]],
                vec![record("BUG-7", "Open"), record("BUG-8", "Open"), record("BUG-9", "Open")],
            )
            .unwrap();
        let hits = index.search(&[1.0, 0.0], 3, None).unwrap();
        let keys: Vec<&str> = hits.iter().map(|h| h.record.key.as_str()).collect();
        assert_eq!(keys, vec!["BUG-8", "BUG-9", "BUG-7"]);
    }

    #[test]
    fn test_search_respects_k() {
        let index = sample_index();
        assert_eq!(index.search(&[1.0, 0.0], 2, None).unwrap().len(), 2);
        assert_eq!(index.search(&[1.0, 0.0], 10, None).unwrap().len(), 3);
        assert!(index.search(&[1.0, 0.0], 0, None).unwrap().is_empty());
    }

    #[test]
    fn test_filter_applies_before_top_k() {
        let index = sample_index();
        let only_open = |r: &TicketRecord| r.status == "Open";
        let hits = index.search(&[0.7, 0.7], 2, Some(&only_open)).unwrap();
        assert_eq!(hits.len(), 2);
        assert!(hits.iter().all(|h| h.record.status == "Open"));
    }

    #[test]
    fn test_cosine_distance_bounded() {
        let m = DistanceMetric::Cosine;
        assert!((m.distance(&[1.0, 0.0], &[1.0, 0.0])).abs() < 1e-6);
        assert_eq!(m.distance(&[1.0, 0.0], &[-1.0, 0.0]), 1.0);
        assert!(m.is_unit_bounded());
        assert!(!DistanceMetric::SquaredL2.is_unit_bounded());
    }

    #[test]
    fn test_misaligned_insert_rejected() {
        let mut index = VectorIndex::new(DistanceMetric::Cosine);
        let err = index
            .insert(vec!["a".into()], vec![], vec![record("BUG-1", "Open")])
            .unwrap_err();
        assert!(matches!(err, DedupError::Index(_)));
        assert!(index.is_empty());
    }

    #[test]
    fn test_dimension_mismatch_leaves_index_unchanged() {
        let mut index = sample_index();
        let err = index
            .insert(
                vec!["d".into(), "e".into()],
                vec![vec![1.0, 0.0], vec![1.0, 0.0, 0.0]],
                vec![record("BUG-4", "Open"), record("BUG-5", "Open")],
            )
            .unwrap_err();
        assert!(matches!(err, DedupError::Index(_)));
        assert_eq!(index.len(), 3);
    }

    #[test]
    fn test_incremental_insert_appends() {
        let mut index = sample_index();
        index
            .insert(
                vec!["d".into()],
                vec![vec![0.5, 0.5]],
                vec![record("BUG-4", "Open")],
            )
            .unwrap();
        assert_eq!(index.len(), 4);
        assert_eq!(index.entries()[0].parent_key, "BUG-1");
        assert_eq!(index.entries()[3].parent_key, "BUG-4");
    }

    #[test]
    fn test_query_dimension_checked() {
        let index = sample_index();
        assert!(index.search(&[1.0, 0.0, 0.0], 1, None).is_err());
    }

    #[test]
    fn test_metric_parse() {
        assert_eq!("cosine".parse::<DistanceMetric>().unwrap(), DistanceMetric::Cosine);
        assert_eq!("l2".parse::<DistanceMetric>().unwrap(), DistanceMetric::SquaredL2);
        assert!("manhattan".parse::<DistanceMetric>().is_err());
    }
}
