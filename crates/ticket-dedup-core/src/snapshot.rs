//! On-disk snapshots of a catalog and its vector index.
//!
//! Each snapshot is a self-contained directory named after the moment it
//! was written (`db_YYYYMMDD_HHMMSS`). Snapshots are never overwritten or
//! merged; a newer snapshot simply supersedes older ones.
//!
//! # Layout
//!
//! | File | Content |
//! |------|---------|
//! | `index.json` | format version, metric, dims, embedding model, per-entry join keys and texts |
//! | `vectors.bin` | every vector as little-endian f32, in entry order |
//! | `catalog.json` | `last_update` and all ticket records |
//! | `summaries.json` | key, title, canonical summary, status, and timestamps per record, for manual inspection |
//!
//! Loading trusts the files: there is no checksum or signature, only the
//! structural checks needed to decode them.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::catalog::Catalog;
use crate::embedding::{blob_to_vec, vec_to_blob};
use crate::error::{DedupError, Result};
use crate::index::{DistanceMetric, VectorIndex};
use crate::models::TicketRecord;

pub const INDEX_FILE: &str = "index.json";
pub const VECTORS_FILE: &str = "vectors.bin";
pub const CATALOG_FILE: &str = "catalog.json";
pub const SUMMARIES_FILE: &str = "summaries.json";

const FORMAT_VERSION: u32 = 1;
const DIR_PREFIX: &str = "db_";

#[derive(Debug, Serialize, Deserialize)]
struct IndexManifest {
    format_version: u32,
    metric: DistanceMetric,
    dims: usize,
    embedding_model: String,
    entries: Vec<EntryManifest>,
}

#[derive(Debug, Serialize, Deserialize)]
struct EntryManifest {
    parent_key: String,
    chunk_index: usize,
    text: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct CatalogFile {
    last_update: Option<DateTime<Utc>>,
    records: Vec<TicketRecord>,
}

#[derive(Debug, Serialize)]
struct SummaryRow<'a> {
    key: &'a str,
    title: &'a str,
    normalized_text: &'a str,
    status: &'a str,
    created: DateTime<Utc>,
    updated: DateTime<Utc>,
}

/// A fully decoded snapshot.
#[derive(Debug)]
pub struct Snapshot {
    pub catalog: Catalog,
    pub index: VectorIndex,
    pub last_update: Option<DateTime<Utc>>,
    pub embedding_model: String,
}

/// Lightweight description of a snapshot directory.
#[derive(Debug, Clone, Serialize)]
pub struct SnapshotInfo {
    pub path: PathBuf,
    pub name: String,
    pub records: usize,
    pub vectors: usize,
    pub metric: DistanceMetric,
    pub embedding_model: String,
    pub last_update: Option<DateTime<Utc>>,
}

/// Write a new snapshot directory under `parent` and return its path.
pub fn write_snapshot(
    parent: &Path,
    catalog: &Catalog,
    index: &VectorIndex,
    last_update: Option<DateTime<Utc>>,
    embedding_model: &str,
) -> Result<PathBuf> {
    fs::create_dir_all(parent)?;
    let dir = create_unique_dir(parent, Utc::now())?;

    if let Err(e) = write_files(&dir, catalog, index, last_update, embedding_model) {
        let _ = fs::remove_dir_all(&dir);
        return Err(e);
    }
    Ok(dir)
}

fn write_files(
    dir: &Path,
    catalog: &Catalog,
    index: &VectorIndex,
    last_update: Option<DateTime<Utc>>,
    embedding_model: &str,
) -> Result<()> {
    let dims = index.dims().unwrap_or(0);
    let mut blob = Vec::with_capacity(index.len() * dims * 4);
    let mut entries = Vec::with_capacity(index.len());
    for entry in index.entries() {
        blob.extend_from_slice(&vec_to_blob(&entry.vector));
        entries.push(EntryManifest {
            parent_key: entry.parent_key.clone(),
            chunk_index: entry.chunk_index,
            text: entry.text.clone(),
        });
    }

    let manifest = IndexManifest {
        format_version: FORMAT_VERSION,
        metric: index.metric(),
        dims,
        embedding_model: embedding_model.to_string(),
        entries,
    };
    fs::write(dir.join(INDEX_FILE), serde_json::to_vec(&manifest)?)?;
    fs::write(dir.join(VECTORS_FILE), blob)?;

    let catalog_file = CatalogFile {
        last_update,
        records: catalog.iter().map(|r| r.as_ref().clone()).collect(),
    };
    fs::write(dir.join(CATALOG_FILE), serde_json::to_vec(&catalog_file)?)?;

    let summaries: Vec<SummaryRow<'_>> = catalog
        .iter()
        .map(|r| SummaryRow {
            key: &r.key,
            title: &r.summary,
            normalized_text: &r.normalized_text,
            status: &r.status,
            created: r.created_at,
            updated: r.updated_at,
        })
        .collect();
    fs::write(
        dir.join(SUMMARIES_FILE),
        serde_json::to_string_pretty(&summaries)?,
    )?;
    Ok(())
}

/// Create `db_<timestamp>` under `parent`, adding `_1`, `_2`, … if taken.
fn create_unique_dir(parent: &Path, now: DateTime<Utc>) -> Result<PathBuf> {
    let base = format!("{}{}", DIR_PREFIX, now.format("%Y%m%d_%H%M%S"));
    let mut attempt = 0u32;
    loop {
        let name = if attempt == 0 {
            base.clone()
        } else {
            format!("{}_{}", base, attempt)
        };
        let candidate = parent.join(name);
        match fs::create_dir(&candidate) {
            Ok(()) => return Ok(candidate),
            Err(e) if e.kind() == ErrorKind::AlreadyExists => attempt += 1,
            Err(e) => return Err(e.into()),
        }
    }
}

/// Read and decode the snapshot at `dir`.
pub fn read_snapshot(dir: &Path) -> Result<Snapshot> {
    if !dir.exists() {
        return Err(DedupError::NotFound(dir.to_path_buf()));
    }

    let manifest: IndexManifest = read_json(&dir.join(INDEX_FILE))?;
    if manifest.format_version != FORMAT_VERSION {
        return Err(corrupt(
            dir,
            format!("unsupported format version {}", manifest.format_version),
        ));
    }

    let catalog_file: CatalogFile = read_json(&dir.join(CATALOG_FILE))?;
    let catalog =
        Catalog::from_records(catalog_file.records).map_err(|e| corrupt(dir, e.to_string()))?;

    if manifest.dims == 0 && !manifest.entries.is_empty() {
        return Err(corrupt(dir, "entries present but dims is 0".to_string()));
    }

    let blob = read_file(&dir.join(VECTORS_FILE))?;
    let expected = manifest.entries.len() * manifest.dims * 4;
    if blob.len() != expected {
        return Err(corrupt(
            dir,
            format!(
                "{} holds {} bytes, expected {} ({} entries × {} dims)",
                VECTORS_FILE,
                blob.len(),
                expected,
                manifest.entries.len(),
                manifest.dims
            ),
        ));
    }

    let mut parts: Vec<(String, usize, Vec<f32>, Arc<TicketRecord>)> =
        Vec::with_capacity(manifest.entries.len());
    if manifest.dims > 0 {
        for (entry, bytes) in manifest
            .entries
            .into_iter()
            .zip(blob.chunks_exact(manifest.dims * 4))
        {
            let record = catalog.get(&entry.parent_key).cloned().ok_or_else(|| {
                corrupt(
                    dir,
                    format!("vector entry references unknown ticket {}", entry.parent_key),
                )
            })?;
            parts.push((entry.text, entry.chunk_index, blob_to_vec(bytes), record));
        }
    }

    let index = VectorIndex::from_parts(manifest.metric, parts)
        .map_err(|e| corrupt(dir, e.to_string()))?;

    Ok(Snapshot {
        catalog,
        index,
        last_update: catalog_file.last_update,
        embedding_model: manifest.embedding_model,
    })
}

/// Describe the snapshot at `dir` without decoding its vectors.
pub fn snapshot_info(dir: &Path) -> Result<SnapshotInfo> {
    if !dir.exists() {
        return Err(DedupError::NotFound(dir.to_path_buf()));
    }
    let manifest: IndexManifest = read_json(&dir.join(INDEX_FILE))?;
    let catalog_file: CatalogFile = read_json(&dir.join(CATALOG_FILE))?;
    Ok(SnapshotInfo {
        path: dir.to_path_buf(),
        name: dir
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default(),
        records: catalog_file.records.len(),
        vectors: manifest.entries.len(),
        metric: manifest.metric,
        embedding_model: manifest.embedding_model,
        last_update: catalog_file.last_update,
    })
}

/// All snapshot directories under `parent`, oldest first.
///
/// A missing `parent` yields an empty list.
pub fn list_snapshots(parent: &Path) -> Result<Vec<PathBuf>> {
    if !parent.exists() {
        return Ok(Vec::new());
    }
    let mut dirs: Vec<PathBuf> = fs::read_dir(parent)?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| {
            p.is_dir()
                && p.join(CATALOG_FILE).is_file()
                && p
                    .file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|n| n.starts_with(DIR_PREFIX))
        })
        .collect();
    dirs.sort();
    Ok(dirs)
}

/// The newest snapshot under `parent`.
pub fn latest_snapshot(parent: &Path) -> Result<PathBuf> {
    list_snapshots(parent)?
        .pop()
        .ok_or_else(|| DedupError::NotFound(parent.to_path_buf()))
}

fn read_file(path: &Path) -> Result<Vec<u8>> {
    fs::read(path).map_err(|e| match e.kind() {
        ErrorKind::NotFound => DedupError::NotFound(path.to_path_buf()),
        _ => e.into(),
    })
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let bytes = read_file(path)?;
    serde_json::from_slice(&bytes).map_err(|e| DedupError::Snapshot {
        path: path.to_path_buf(),
        message: e.to_string(),
    })
}

fn corrupt(dir: &Path, message: String) -> DedupError {
    DedupError::Snapshot {
        path: dir.to_path_buf(),
        message,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn record(key: &str) -> TicketRecord {
        let now = Utc::now();
        TicketRecord {
            key: key.to_string(),
            summary: format!("{} title", key),
            raw_description: "desc".to_string(),
            normalized_text: format!("Displays wrong data for {}", key),
            status: "Open".to_string(),
            priority: "Major".to_string(),
            labels: vec!["nav".to_string()],
            created_at: now,
            updated_at: now,
        }
    }

    fn sample() -> (Catalog, VectorIndex) {
        let catalog = Catalog::from_records(vec![record("BUG-1"), record("BUG-2")]).unwrap();
        let mut index = VectorIndex::new(DistanceMetric::Cosine);
        index
            .insert(
                catalog.iter().map(|r| r.normalized_text.clone()).collect(),
                vec![vec![0.25, -1.5, 3.0], vec![1.0, 0.0, 0.125]],
                catalog.records().to_vec(),
            )
            .unwrap();
        (catalog, index)
    }

    #[test]
    fn test_write_then_read() {
        let tmp = TempDir::new().unwrap();
        let (catalog, index) = sample();
        let now = Utc::now();
        let dir = write_snapshot(tmp.path(), &catalog, &index, Some(now), "test-model").unwrap();

        for file in [INDEX_FILE, VECTORS_FILE, CATALOG_FILE, SUMMARIES_FILE] {
            assert!(dir.join(file).is_file(), "{} missing", file);
        }

        let snap = read_snapshot(&dir).unwrap();
        assert_eq!(snap.catalog.len(), 2);
        assert_eq!(snap.index.len(), 2);
        assert_eq!(snap.index.dims(), Some(3));
        assert_eq!(snap.index.entries()[0].vector, vec![0.25, -1.5, 3.0]);
        assert_eq!(snap.index.entries()[1].parent_key, "BUG-2");
        assert_eq!(snap.last_update, Some(now));
        assert_eq!(snap.embedding_model, "test-model");
    }

    #[test]
    fn test_never_overwrites() {
        let tmp = TempDir::new().unwrap();
        let now = Utc::now();
        let a = create_unique_dir(tmp.path(), now).unwrap();
        let b = create_unique_dir(tmp.path(), now).unwrap();
        assert_ne!(a, b);
        assert!(b.file_name().unwrap().to_str().unwrap().ends_with("_1"));
    }

    #[test]
    fn test_missing_dir_is_not_found() {
        let tmp = TempDir::new().unwrap();
        let err = read_snapshot(&tmp.path().join("db_nope")).unwrap_err();
        assert!(matches!(err, DedupError::NotFound(_)));
    }

    #[test]
    fn test_truncated_vectors_rejected() {
        let tmp = TempDir::new().unwrap();
        let (catalog, index) = sample();
        let dir = write_snapshot(tmp.path(), &catalog, &index, None, "m").unwrap();
        fs::write(dir.join(VECTORS_FILE), [0u8; 7]).unwrap();
        let err = read_snapshot(&dir).unwrap_err();
        assert!(matches!(err, DedupError::Snapshot { .. }));
    }

    #[test]
    fn test_list_and_latest() {
        let tmp = TempDir::new().unwrap();
        assert!(list_snapshots(&tmp.path().join("absent")).unwrap().is_empty());
        assert!(matches!(
            latest_snapshot(tmp.path()),
            Err(DedupError::NotFound(_))
        ));

        let (catalog, index) = sample();
        let first = write_snapshot(tmp.path(), &catalog, &index, None, "m").unwrap();
        let second = write_snapshot(tmp.path(), &catalog, &index, None, "m").unwrap();
        fs::create_dir(tmp.path().join("unrelated")).unwrap();

        let all = list_snapshots(tmp.path()).unwrap();
        assert_eq!(all, vec![first, second.clone()]);
        assert_eq!(latest_snapshot(tmp.path()).unwrap(), second);

        let info = snapshot_info(&second).unwrap();
        assert_eq!(info.records, 2);
        assert_eq!(info.vectors, 2);
        assert_eq!(info.metric, DistanceMetric::Cosine);
    }
}
