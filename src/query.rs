//! `tdup query`: look up likely duplicates in a saved snapshot.
//!
//! The query is either free text (`--text`, optionally canonicalized with
//! `--normalize`) or an existing ticket (`--ticket`), which is fetched,
//! normalized, and excluded from its own results. `--interactive` loads the
//! snapshot once and answers one free-text query per stdin line until
//! `quit`, `exit`, or end of input.

use anyhow::{bail, Context, Result};
use std::collections::HashSet;
use std::io::Write;
use std::path::{Component, PathBuf};
use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};

use ticket_dedup_core::finder::{DuplicateFinder, QueryOptions};
use ticket_dedup_core::models::{format_percent, DuplicateMatch};
use ticket_dedup_core::snapshot::latest_snapshot;
use ticket_dedup_core::source::TicketSource;

use crate::config::{Config, NormalizerConfig};
use crate::embedding::create_provider;
use crate::llm::create_normalizer;
use crate::tracker::{create_source, DisabledSource};

/// What to search for.
pub enum QueryInput {
    Text { text: String, normalize: bool },
    Ticket(String),
    /// One text query per stdin line.
    Interactive { normalize: bool },
}

pub struct QueryArgs {
    pub db: Option<PathBuf>,
    pub input: QueryInput,
    pub k: Option<usize>,
    pub threshold: Option<f32>,
    pub statuses: Vec<String>,
}

/// Resolve `--db`, or fall back to the newest snapshot under `[database] dir`.
///
/// A bare name such as `db_20240301_093000` that does not exist relative to
/// the working directory is looked up under `[database] dir`.
pub fn resolve_snapshot(config: &Config, db: Option<PathBuf>) -> Result<PathBuf> {
    match db {
        Some(path) => {
            let bare = matches!(
                path.components().collect::<Vec<_>>().as_slice(),
                [Component::Normal(_)]
            );
            if bare && !path.exists() {
                let named = config.database.dir.join(&path);
                if named.exists() {
                    return Ok(named);
                }
            }
            Ok(path)
        }
        None => latest_snapshot(&config.database.dir).with_context(|| {
            format!(
                "No snapshot found under {}. Run `tdup build` first.",
                config.database.dir.display()
            )
        }),
    }
}

pub async fn run_query(config: &Config, args: QueryArgs) -> Result<()> {
    let mut options = config.query_options();
    if let Some(k) = args.k {
        if k == 0 {
            bail!("--k must be >= 1");
        }
        options.k = k;
    }
    if let Some(t) = args.threshold {
        if !(0.0..=1.0).contains(&t) {
            bail!("--threshold must be in [0.0, 1.0]");
        }
        options.similarity_threshold = t;
    } else if matches!(args.input, QueryInput::Interactive { .. }) {
        options.similarity_threshold = config.query.interactive_threshold;
    }
    if !args.statuses.is_empty() {
        options.status_filter = Some(args.statuses.into_iter().collect::<HashSet<_>>());
    }

    let path = resolve_snapshot(config, args.db)?;

    // Raw-text queries never reach the tracker, and only use the
    // normalizer when asked to.
    let (needs_source, needs_normalizer) = match &args.input {
        QueryInput::Text { normalize, .. } | QueryInput::Interactive { normalize } => {
            (false, *normalize)
        }
        QueryInput::Ticket(_) => (true, true),
    };
    let source: Arc<dyn TicketSource> = if needs_source {
        create_source(&config.tracker)?
    } else {
        Arc::new(DisabledSource)
    };
    let normalizer_config = if needs_normalizer {
        config.normalizer.clone()
    } else {
        NormalizerConfig::default()
    };
    let mut finder = DuplicateFinder::new(
        source,
        create_normalizer(&normalizer_config)?,
        create_provider(&config.embedding)?,
        config.finder_options()?,
    )?;
    finder
        .load(&path)
        .with_context(|| format!("Failed to load snapshot {}", path.display()))?;

    let (canonical, matches) = match args.input {
        QueryInput::Text { text, normalize } => {
            search_text(&finder, &text, normalize, &options).await?
        }
        QueryInput::Ticket(key) => {
            let result = finder
                .query_ticket(&key, &options)
                .await
                .with_context(|| format!("Failed to query by ticket {}", key))?;
            println!("ticket: {}", result.key);
            (Some(result.canonical_text), result.matches)
        }
        QueryInput::Interactive { normalize } => {
            println!("snapshot: {}", path.display());
            println!("Loaded {} tickets", finder.catalog().len());
            let stdin = BufReader::new(tokio::io::stdin());
            run_session(&finder, &options, normalize, stdin).await?;
            return Ok(());
        }
    };

    println!("snapshot: {}", path.display());
    print_matches(canonical.as_deref(), &matches, options.similarity_threshold);
    Ok(())
}

async fn search_text(
    finder: &DuplicateFinder,
    text: &str,
    normalize: bool,
    options: &QueryOptions,
) -> Result<(Option<String>, Vec<DuplicateMatch>)> {
    if normalize {
        let canonical = finder
            .canonicalize(text)
            .await
            .context("Failed to normalize query")?;
        let matches = finder.query(&canonical, options).await?;
        Ok((Some(canonical), matches))
    } else {
        Ok((None, finder.query(text, options).await?))
    }
}

/// Answer one query per line of `input` against an already loaded finder.
///
/// A failed query is reported on stderr and the session continues. Returns
/// the number of queries answered.
pub async fn run_session<R>(
    finder: &DuplicateFinder,
    options: &QueryOptions,
    normalize: bool,
    input: R,
) -> Result<usize>
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = input.lines();
    let mut answered = 0;
    loop {
        println!();
        println!("Enter bug description (or 'quit' to exit):");
        print!("> ");
        std::io::stdout().flush()?;

        let Some(line) = lines.next_line().await? else {
            println!();
            break;
        };
        let query = line.trim();
        if query.eq_ignore_ascii_case("quit") || query.eq_ignore_ascii_case("exit") {
            break;
        }
        if query.is_empty() {
            continue;
        }

        match search_text(finder, query, normalize, options).await {
            Ok((canonical, matches)) => {
                answered += 1;
                print_matches(canonical.as_deref(), &matches, options.similarity_threshold);
            }
            Err(e) => eprintln!("error: {:#}", e),
        }
    }
    Ok(answered)
}

fn print_matches(canonical: Option<&str>, matches: &[DuplicateMatch], threshold: f32) {
    if let Some(text) = canonical {
        println!("canonical: {}", text);
    }
    println!();

    if matches.is_empty() {
        println!("No likely duplicates at or above {}.", format_percent(threshold));
        return;
    }

    for (i, m) in matches.iter().enumerate() {
        println!(
            "{}. {}  {}  [{}]  {}",
            i + 1,
            m.key,
            m.similarity_display,
            m.status,
            m.priority
        );
        println!("    title: {}", m.summary);
        println!(
            "    created: {}  updated: {}",
            m.created_at.format("%Y-%m-%d"),
            m.updated_at.format("%Y-%m-%d")
        );
        if !m.labels.is_empty() {
            println!("    labels: {}", m.labels.join(", "));
        }
        println!("    summary length: {} chars", m.text_length);
        println!();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::parse_config;

    #[test]
    fn test_resolve_snapshot_by_name() {
        let tmp = tempfile::TempDir::new().unwrap();
        let dir = tmp.path().join("bug_database");
        std::fs::create_dir_all(dir.join("db_20240301_093000")).unwrap();
        let config =
            parse_config(&format!("[database]\ndir = \"{}\"", dir.display())).unwrap();

        let named = resolve_snapshot(&config, Some(PathBuf::from("db_20240301_093000"))).unwrap();
        assert_eq!(named, dir.join("db_20240301_093000"));

        // Paths with a separator, and unknown names, are taken as given.
        let relative = PathBuf::from("elsewhere/db_20240301_093000");
        assert_eq!(
            resolve_snapshot(&config, Some(relative.clone())).unwrap(),
            relative
        );
        let unknown = PathBuf::from("db_19700101_000000");
        assert_eq!(resolve_snapshot(&config, Some(unknown.clone())).unwrap(), unknown);
    }
}
