//! `tdup list` and `tdup inspect`: look at saved snapshots without
//! touching any remote service.

use anyhow::{Context, Result};
use std::collections::BTreeMap;
use std::path::PathBuf;

use ticket_dedup_core::snapshot::{list_snapshots, read_snapshot, snapshot_info};

use crate::config::Config;
use crate::query::resolve_snapshot;

pub fn run_list(config: &Config, dir: Option<PathBuf>) -> Result<()> {
    let dir = dir.unwrap_or_else(|| config.database.dir.clone());
    let snapshots = list_snapshots(&dir)
        .with_context(|| format!("Failed to list snapshots in {}", dir.display()))?;

    if snapshots.is_empty() {
        println!("No snapshots in {}.", dir.display());
        return Ok(());
    }

    println!(
        "{:<28} {:>8} {:>8}  {:<24} LAST UPDATE",
        "SNAPSHOT", "RECORDS", "VECTORS", "MODEL"
    );
    for path in snapshots {
        let info = snapshot_info(&path)?;
        let last = info
            .last_update
            .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{:<28} {:>8} {:>8}  {:<24} {}",
            info.name, info.records, info.vectors, info.embedding_model, last
        );
    }
    Ok(())
}

pub fn run_inspect(config: &Config, db: Option<PathBuf>, limit: Option<usize>) -> Result<()> {
    let path = resolve_snapshot(config, db)?;
    let info = snapshot_info(&path)?;
    let snap = read_snapshot(&path)
        .with_context(|| format!("Failed to read snapshot {}", path.display()))?;

    println!("Snapshot: {}", info.path.display());
    println!("  Records:      {}", info.records);
    println!("  Vectors:      {}", info.vectors);
    println!("  Dimensions:   {}", snap.index.dims().unwrap_or(0));
    println!("  Metric:       {}", info.metric);
    println!("  Model:        {}", info.embedding_model);
    match info.last_update {
        Some(t) => println!("  Last update:  {}", t.to_rfc3339()),
        None => println!("  Last update:  -"),
    }
    println!();

    let mut by_status: BTreeMap<&str, usize> = BTreeMap::new();
    for record in snap.catalog.iter() {
        *by_status.entry(record.status.as_str()).or_default() += 1;
    }
    if !by_status.is_empty() {
        println!("Status distribution:");
        for (status, count) in &by_status {
            println!("  {:<20} {:>6}", status, count);
        }
        println!();
    }

    if let Some(sample) = snap.catalog.iter().next() {
        println!("Sample ticket:");
        println!("  Key:      {}", sample.key);
        println!("  Summary:  {}", sample.summary);
        println!("  Status:   {}", sample.status);
        println!("  Created:  {}", sample.created_at.to_rfc3339());
        println!();
    }

    let shown = limit.unwrap_or(usize::MAX);
    for record in snap.catalog.iter().take(shown) {
        println!("{}  [{}]  {}", record.key, record.status, record.summary);
        println!("    {}", record.normalized_text);
    }
    if snap.catalog.len() > shown {
        println!("... {} more", snap.catalog.len() - shown);
    }
    Ok(())
}
