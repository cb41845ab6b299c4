//! # Ticket Dedup CLI (`tdup`)
//!
//! Builds snapshots of normalized, embedded bug tickets and queries them
//! for likely duplicates.
//!
//! ## Usage
//!
//! ```bash
//! tdup --config ./config/tdup.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `tdup build "<jql>"` | Fetch, normalize, embed, and save a new snapshot |
//! | `tdup query --text "<text>"` | Find duplicates of free text |
//! | `tdup query --ticket KEY` | Find duplicates of an existing ticket |
//! | `tdup query --interactive` | Load a snapshot once and query it line by line from stdin |
//! | `tdup list` | List saved snapshots |
//! | `tdup inspect` | Show a snapshot's records and canonical summaries |

use clap::{ArgGroup, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

use ticket_dedup::progress::ProgressMode;
use ticket_dedup::query::{QueryArgs, QueryInput};
use ticket_dedup::{build, config, logging, query, snapshots};

/// Ticket Dedup CLI: find likely duplicate bug tickets by canonical
/// summary similarity.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/tdup.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "tdup",
    about = "Find likely duplicate bug tickets by canonical summary similarity",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/tdup.toml")]
    config: PathBuf,

    /// Log filter (e.g. `info`, `debug`, `ticket_dedup=debug`). `RUST_LOG` takes precedence.
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// Progress output on stderr.
    #[arg(long, global = true, value_enum, default_value_t = ProgressArg::Auto)]
    progress: ProgressArg,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum ProgressArg {
    /// Human progress when stderr is a terminal, otherwise none.
    Auto,
    Off,
    Human,
    Json,
}

impl ProgressArg {
    fn mode(self) -> ProgressMode {
        match self {
            ProgressArg::Auto => ProgressMode::default_for_tty(),
            ProgressArg::Off => ProgressMode::Off,
            ProgressArg::Human => ProgressMode::Human,
            ProgressArg::Json => ProgressMode::Json,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Build a new snapshot from the tickets matching a filter.
    ///
    /// Pages through the tracker, normalizes every ticket into a canonical
    /// summary, embeds the summaries, and writes a new timestamped
    /// snapshot directory. Existing snapshots are never modified.
    Build {
        /// Tracker filter (JQL), e.g. `project = NAV AND type = Bug`.
        filter: String,

        /// Maximum number of tickets to ingest (overrides `[tracker] max_results`).
        #[arg(long)]
        max_results: Option<usize>,

        /// Parent directory for the snapshot (overrides `[database] dir`).
        #[arg(long)]
        dir: Option<PathBuf>,
    },

    /// Find likely duplicates in a snapshot.
    #[command(group(
        ArgGroup::new("input")
            .required(true)
            .args(["text", "ticket", "interactive"])
    ))]
    Query {
        /// Snapshot directory, or a snapshot name under `[database] dir`.
        /// Defaults to the newest snapshot.
        #[arg(long)]
        db: Option<PathBuf>,

        /// Free text to search for.
        #[arg(long)]
        text: Option<String>,

        /// Canonicalize text queries with the normalizer before searching.
        #[arg(long, conflicts_with = "ticket")]
        normalize: bool,

        /// Existing ticket key; the ticket is fetched and excluded from results.
        #[arg(long)]
        ticket: Option<String>,

        /// Read one query per stdin line until `quit`, `exit`, or end of input.
        ///
        /// Uses `[query] interactive_threshold` unless `--threshold` is given.
        #[arg(long)]
        interactive: bool,

        /// Maximum number of neighbours (overrides `[query] k`).
        #[arg(long)]
        k: Option<usize>,

        /// Minimum similarity in [0, 1] (overrides `[query] similarity_threshold`).
        #[arg(long)]
        threshold: Option<f32>,

        /// Only report tickets with this status. Repeatable.
        #[arg(long = "status")]
        statuses: Vec<String>,
    },

    /// List saved snapshots.
    List {
        /// Parent directory (overrides `[database] dir`).
        #[arg(long)]
        dir: Option<PathBuf>,
    },

    /// Show a snapshot's metadata and canonical summaries.
    Inspect {
        /// Snapshot directory, or a snapshot name under `[database] dir`.
        /// Defaults to the newest snapshot.
        #[arg(long)]
        db: Option<PathBuf>,

        /// Show at most this many records.
        #[arg(long)]
        limit: Option<usize>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let cfg = config::load_config(&cli.config)?;
    let level = cli.log_level.as_deref().unwrap_or(&cfg.logging.level);
    logging::init_logging(level);

    match cli.command {
        Commands::Build {
            filter,
            max_results,
            dir,
        } => {
            let progress = cli.progress.mode().reporter();
            build::run_build(&cfg, &filter, max_results, dir, progress).await?;
        }
        Commands::Query {
            db,
            text,
            normalize,
            ticket,
            interactive,
            k,
            threshold,
            statuses,
        } => {
            let input = match (text, ticket, interactive) {
                (Some(text), None, false) => QueryInput::Text { text, normalize },
                (None, Some(key), false) => QueryInput::Ticket(key),
                (None, None, true) => QueryInput::Interactive { normalize },
                _ => anyhow::bail!("Exactly one of --text, --ticket, or --interactive is required"),
            };
            query::run_query(
                &cfg,
                QueryArgs {
                    db,
                    input,
                    k,
                    threshold,
                    statuses,
                },
            )
            .await?;
        }
        Commands::List { dir } => {
            snapshots::run_list(&cfg, dir)?;
        }
        Commands::Inspect { db, limit } => {
            snapshots::run_inspect(&cfg, db, limit)?;
        }
    }

    Ok(())
}
