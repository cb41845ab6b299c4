//! TOML configuration for `tdup`.
//!
//! Every section is optional; missing sections and keys take the defaults
//! listed on each field. [`load_config`] parses and validates in one step,
//! so the rest of the app can assume a consistent [`Config`].
//!
//! Secrets never live in the file: the tracker token and the API keys are
//! read from the environment by the clients that need them.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use ticket_dedup_core::chunk::ChunkingParams;
use ticket_dedup_core::finder::{FinderOptions, QueryOptions};
use ticket_dedup_core::index::DistanceMetric;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub tracker: TrackerConfig,
    #[serde(default)]
    pub normalizer: NormalizerConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub index: IndexConfig,
    #[serde(default)]
    pub query: QueryConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    /// Parent directory holding `db_YYYYMMDD_HHMMSS` snapshots.
    #[serde(default = "default_database_dir")]
    pub dir: PathBuf,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            dir: default_database_dir(),
        }
    }
}

fn default_database_dir() -> PathBuf {
    PathBuf::from("./bug_database")
}

#[derive(Debug, Deserialize, Clone)]
pub struct TrackerConfig {
    #[serde(default = "default_tracker_provider")]
    pub provider: String,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default = "default_page_size")]
    pub page_size: usize,
    #[serde(default = "default_max_results")]
    pub max_results: usize,
    #[serde(default = "default_tracker_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_tracker_retries")]
    pub max_retries: u32,
    /// Custom fields passed to the normalizer, in order.
    #[serde(default)]
    pub extra_fields: Vec<ExtraFieldConfig>,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            provider: default_tracker_provider(),
            base_url: None,
            email: None,
            page_size: default_page_size(),
            max_results: default_max_results(),
            timeout_secs: default_tracker_timeout(),
            max_retries: default_tracker_retries(),
            extra_fields: Vec::new(),
        }
    }
}

#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct ExtraFieldConfig {
    /// Tracker field id (e.g. `customfield_10357`).
    pub field: String,
    /// Label shown to the normalizer (e.g. `Analysis Findings`).
    pub label: String,
}

fn default_tracker_provider() -> String {
    "disabled".to_string()
}
fn default_page_size() -> usize {
    100
}
fn default_max_results() -> usize {
    5000
}
fn default_tracker_timeout() -> u64 {
    30
}
fn default_tracker_retries() -> u32 {
    3
}

#[derive(Debug, Deserialize, Clone)]
pub struct NormalizerConfig {
    #[serde(default = "default_disabled")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    /// Azure resource endpoint, e.g. `https://my-resource.openai.azure.com`.
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default = "default_api_version")]
    pub api_version: String,
    #[serde(default = "default_normalizer_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_normalizer_retries")]
    pub max_retries: u32,
}

impl Default for NormalizerConfig {
    fn default() -> Self {
        Self {
            provider: default_disabled(),
            model: None,
            endpoint: None,
            api_version: default_api_version(),
            timeout_secs: default_normalizer_timeout(),
            max_retries: default_normalizer_retries(),
        }
    }
}

fn default_disabled() -> String {
    "disabled".to_string()
}
fn default_api_version() -> String {
    "2024-10-21".to_string()
}
fn default_normalizer_timeout() -> u64 {
    60
}
fn default_normalizer_retries() -> u32 {
    3
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_disabled")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    /// Azure resource endpoint, or the Ollama base URL.
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default = "default_api_version")]
    pub api_version: String,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_batch_delay_ms")]
    pub batch_delay_ms: u64,
    #[serde(default = "default_embedding_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_embedding_retries")]
    pub max_retries: u32,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_disabled(),
            model: None,
            dims: None,
            endpoint: None,
            api_version: default_api_version(),
            batch_size: default_batch_size(),
            batch_delay_ms: default_batch_delay_ms(),
            timeout_secs: default_embedding_timeout(),
            max_retries: default_embedding_retries(),
        }
    }
}

fn default_batch_size() -> usize {
    500
}
fn default_batch_delay_ms() -> u64 {
    2000
}
fn default_embedding_timeout() -> u64 {
    30
}
fn default_embedding_retries() -> u32 {
    5
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct IndexConfig {
    #[serde(default = "default_metric")]
    pub metric: String,
    #[serde(default)]
    pub chunking: bool,
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap: usize,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            metric: default_metric(),
            chunking: false,
            chunk_size: default_chunk_size(),
            chunk_overlap: default_chunk_overlap(),
        }
    }
}

fn default_metric() -> String {
    "cosine".to_string()
}
fn default_chunk_size() -> usize {
    1000
}
fn default_chunk_overlap() -> usize {
    200
}

#[derive(Debug, Deserialize, Clone)]
pub struct QueryConfig {
    #[serde(default = "default_k")]
    pub k: usize,
    #[serde(default = "default_threshold")]
    pub similarity_threshold: f32,
    /// Threshold for `tdup query --interactive` sessions.
    #[serde(default = "default_interactive_threshold")]
    pub interactive_threshold: f32,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            k: default_k(),
            similarity_threshold: default_threshold(),
            interactive_threshold: default_interactive_threshold(),
        }
    }
}

fn default_k() -> usize {
    5
}
fn default_threshold() -> f32 {
    0.85
}
fn default_interactive_threshold() -> f32 {
    0.5
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "warn".to_string()
}

impl Config {
    pub fn metric(&self) -> Result<DistanceMetric> {
        self.index
            .metric
            .parse::<DistanceMetric>()
            .map_err(|e| anyhow::anyhow!("index.metric: {}", e))
    }

    /// Finder tuning derived from `[tracker]`, `[embedding]`, and `[index]`.
    pub fn finder_options(&self) -> Result<FinderOptions> {
        Ok(FinderOptions {
            page_size: self.tracker.page_size,
            max_results: self.tracker.max_results,
            batch_size: self.embedding.batch_size,
            batch_delay: Duration::from_millis(self.embedding.batch_delay_ms),
            metric: self.metric()?,
            chunking: self.index.chunking.then(|| ChunkingParams {
                chunk_size: self.index.chunk_size,
                overlap: self.index.chunk_overlap,
            }),
        })
    }

    pub fn query_options(&self) -> QueryOptions {
        QueryOptions {
            k: self.query.k,
            similarity_threshold: self.query.similarity_threshold,
            ..QueryOptions::default()
        }
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    parse_config(&content)
}

/// Parse and validate a config from TOML text.
pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    // Tracker
    match config.tracker.provider.as_str() {
        "disabled" => {}
        "jira" => {
            if config.tracker.base_url.is_none() {
                bail!("tracker.base_url must be set when provider is 'jira'");
            }
        }
        other => bail!(
            "Unknown tracker provider: '{}'. Must be jira or disabled.",
            other
        ),
    }
    if config.tracker.page_size == 0 {
        bail!("tracker.page_size must be >= 1");
    }
    if config.tracker.max_results == 0 {
        bail!("tracker.max_results must be >= 1");
    }

    // Normalizer
    match config.normalizer.provider.as_str() {
        "disabled" => {}
        "openai" | "azure" => {
            if config.normalizer.model.is_none() {
                bail!(
                    "normalizer.model must be specified when provider is '{}'",
                    config.normalizer.provider
                );
            }
            if config.normalizer.provider == "azure" && config.normalizer.endpoint.is_none() {
                bail!("normalizer.endpoint must be set when provider is 'azure'");
            }
        }
        other => bail!(
            "Unknown normalizer provider: '{}'. Must be openai, azure, or disabled.",
            other
        ),
    }

    // Embedding
    match config.embedding.provider.as_str() {
        "disabled" | "openai" | "azure" | "ollama" => {}
        other => bail!(
            "Unknown embedding provider: '{}'. Must be disabled, openai, azure, or ollama.",
            other
        ),
    }
    if config.embedding.is_enabled() {
        if config.embedding.dims.is_none() || config.embedding.dims == Some(0) {
            bail!(
                "embedding.dims must be > 0 when provider is '{}'",
                config.embedding.provider
            );
        }
        if config.embedding.model.is_none() {
            bail!(
                "embedding.model must be specified when provider is '{}'",
                config.embedding.provider
            );
        }
        if config.embedding.provider == "azure" && config.embedding.endpoint.is_none() {
            bail!("embedding.endpoint must be set when provider is 'azure'");
        }
    }
    if config.embedding.batch_size == 0 {
        bail!("embedding.batch_size must be >= 1");
    }

    // Index
    let metric = config.metric()?;
    if !metric.is_unit_bounded() {
        bail!(
            "index.metric '{}' is unbounded; similarity scoring requires cosine",
            metric
        );
    }
    if config.index.chunking {
        if config.index.chunk_size == 0 {
            bail!("index.chunk_size must be > 0");
        }
        if config.index.chunk_overlap >= config.index.chunk_size {
            bail!("index.chunk_overlap must be < index.chunk_size");
        }
    }

    // Query
    if config.query.k == 0 {
        bail!("query.k must be >= 1");
    }
    if !(0.0..=1.0).contains(&config.query.similarity_threshold) {
        bail!("query.similarity_threshold must be in [0.0, 1.0]");
    }
    if !(0.0..=1.0).contains(&config.query.interactive_threshold) {
        bail!("query.interactive_threshold must be in [0.0, 1.0]");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_config_uses_defaults() {
        let cfg = parse_config("").unwrap();
        assert_eq!(cfg.database.dir, PathBuf::from("./bug_database"));
        assert_eq!(cfg.tracker.page_size, 100);
        assert_eq!(cfg.tracker.max_results, 5000);
        assert_eq!(cfg.embedding.batch_size, 500);
        assert_eq!(cfg.embedding.batch_delay_ms, 2000);
        assert_eq!(cfg.query.k, 5);
        assert!((cfg.query.similarity_threshold - 0.85).abs() < f32::EPSILON);
        assert!((cfg.query.interactive_threshold - 0.5).abs() < f32::EPSILON);
        assert_eq!(cfg.logging.level, "warn");

        let opts = cfg.finder_options().unwrap();
        assert_eq!(opts.batch_delay, Duration::from_secs(2));
        assert_eq!(opts.metric, DistanceMetric::Cosine);
        assert!(opts.chunking.is_none());
    }

    #[test]
    fn test_full_config() {
        let cfg = parse_config(
            r#"
[database]
dir = "/var/lib/tdup"

[tracker]
provider = "jira"
base_url = "https://example.atlassian.net"
email = "qa@example.com"
page_size = 50

[[tracker.extra_fields]]
field = "customfield_10357"
label = "Analysis Findings"

[[tracker.extra_fields]]
field = "customfield_10356"
label = "Additional Information"

[normalizer]
provider = "azure"
model = "gpt-4o"
endpoint = "https://res.openai.azure.com"

[embedding]
provider = "azure"
model = "dep-embed-ada"
dims = 1536
endpoint = "https://res.openai.azure.com"

[index]
chunking = true
chunk_size = 800
chunk_overlap = 100

[query]
k = 10
similarity_threshold = 0.8
"#,
        )
        .unwrap();

        assert_eq!(cfg.tracker.extra_fields.len(), 2);
        assert_eq!(cfg.tracker.extra_fields[1].label, "Additional Information");
        assert_eq!(cfg.normalizer.api_version, "2024-10-21");

        let opts = cfg.finder_options().unwrap();
        assert_eq!(opts.page_size, 50);
        let chunking = opts.chunking.unwrap();
        assert_eq!(chunking.chunk_size, 800);
        assert_eq!(chunking.overlap, 100);

        let q = cfg.query_options();
        assert_eq!(q.k, 10);
        assert!(q.status_filter.is_none());
    }

    #[test]
    fn test_rejects_invalid_values() {
        let cases = [
            "[tracker]\npage_size = 0",
            "[tracker]\nprovider = \"github\"",
            "[tracker]\nprovider = \"jira\"",
            "[normalizer]\nprovider = \"openai\"",
            "[normalizer]\nprovider = \"azure\"\nmodel = \"gpt-4o\"",
            "[embedding]\nprovider = \"openai\"\nmodel = \"m\"",
            "[embedding]\nprovider = \"openai\"\ndims = 8",
            "[embedding]\nprovider = \"bert\"",
            "[embedding]\nbatch_size = 0",
            "[index]\nmetric = \"squared_l2\"",
            "[index]\nmetric = \"manhattan\"",
            "[index]\nchunking = true\nchunk_size = 100\nchunk_overlap = 100",
            "[query]\nk = 0",
            "[query]\nsimilarity_threshold = 1.2",
            "[query]\ninteractive_threshold = -0.1",
        ];
        for case in cases {
            assert!(parse_config(case).is_err(), "accepted: {}", case);
        }
    }

    #[test]
    fn test_example_config_parses() {
        let cfg = parse_config(include_str!("../config/tdup.example.toml")).unwrap();
        assert_eq!(cfg.tracker.provider, "jira");
        assert_eq!(cfg.embedding.dims, Some(1536));
    }

    #[test]
    fn test_overlap_ignored_without_chunking() {
        let cfg = parse_config("[index]\nchunk_size = 10\nchunk_overlap = 50").unwrap();
        assert!(cfg.finder_options().unwrap().chunking.is_none());
    }
}
