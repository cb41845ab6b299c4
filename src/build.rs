//! `tdup build`: fetch, normalize, embed, and save a new snapshot.
//!
//! Pipeline:
//!
//! ```text
//! tracker ──page──▶ normalizer ──▶ catalog ──batch──▶ embedder ──▶ index ──▶ db_YYYYMMDD_HHMMSS/
//! ```
//!
//! Tickets that fail normalization are skipped and counted; any tracker,
//! embedding, or write failure aborts the build without leaving a partial
//! snapshot behind.

use anyhow::{bail, Context, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

use ticket_dedup_core::finder::{DuplicateFinder, FinderOptions};
use ticket_dedup_core::progress::ProgressReporter;

use crate::config::Config;
use crate::embedding::create_provider;
use crate::llm::create_normalizer;
use crate::tracker::create_source;

/// Wire a finder from configuration.
pub fn create_finder(
    config: &Config,
    options: FinderOptions,
    progress: Arc<dyn ProgressReporter>,
) -> Result<DuplicateFinder> {
    let source = create_source(&config.tracker)?;
    let normalizer = create_normalizer(&config.normalizer)?;
    let embedder = create_provider(&config.embedding)?;
    let finder = DuplicateFinder::new(source, normalizer, embedder, options)?;
    Ok(finder.with_progress(progress))
}

pub async fn run_build(
    config: &Config,
    filter: &str,
    max_results: Option<usize>,
    dir: Option<PathBuf>,
    progress: Arc<dyn ProgressReporter>,
) -> Result<()> {
    if filter.trim().is_empty() {
        bail!("A non-empty ticket filter (JQL) is required");
    }
    if !config.embedding.is_enabled() {
        bail!(
            "Building a database requires an embedding provider. Set [embedding] provider in config."
        );
    }
    if max_results == Some(0) {
        bail!("--max-results must be >= 1");
    }

    let mut options = config.finder_options()?;
    if let Some(max) = max_results {
        options.max_results = max;
    }
    let dir = dir.unwrap_or_else(|| config.database.dir.clone());

    let mut finder = create_finder(config, options, progress)?;

    let ingest = finder
        .ingest(filter)
        .await
        .with_context(|| format!("Failed to ingest tickets for filter: {}", filter))?;
    if ingest.succeeded == 0 {
        bail!(
            "No tickets were ingested ({} fetched, {} skipped); nothing to build",
            ingest.attempted,
            ingest.skipped_count()
        );
    }

    let build = finder.build_index(false).await.context("Failed to build index")?;
    let alignment = finder.verify_alignment()?;
    let path = save(&mut finder, &dir)?;
    info!(path = %path.display(), "build complete");

    println!("build {}", filter);
    println!("  fetched: {} tickets", ingest.attempted);
    println!("  normalized: {}", ingest.succeeded);
    if !ingest.skipped.is_empty() {
        println!("  skipped (normalization): {}", ingest.skipped_count());
        for item in &ingest.skipped {
            println!("    {}: {}", item.key, item.reason);
        }
    }
    println!(
        "  embedded: {} records, {} vectors in {} batches",
        build.inserted, build.vectors, build.batches
    );
    if !alignment.unindexed.is_empty() {
        println!("  without vectors: {}", alignment.unindexed.join(", "));
    }
    println!("  snapshot: {}", path.display());
    println!("ok");

    Ok(())
}

fn save(finder: &mut DuplicateFinder, dir: &Path) -> Result<PathBuf> {
    finder
        .save(dir)
        .with_context(|| format!("Failed to save snapshot under {}", dir.display()))
}
