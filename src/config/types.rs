use serde::Deserialize;
use std::time::Duration;

/// Main configuration structure for Shelf-Ripple
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub crawler: CrawlerConfig,
    pub http: HttpConfig,
    pub writer: WriterConfig,
    #[serde(default)]
    pub split: SplitConfig,
    pub store: StoreConfig,
    pub output: OutputConfig,
}

/// Fetch-side behavior: worker pool, pagination and stall detection
#[derive(Debug, Clone, Deserialize)]
pub struct CrawlerConfig {
    /// Number of concurrent fetch workers
    #[serde(rename = "worker-count")]
    pub worker_count: usize,

    /// Capacity of the bounded record channel between workers and the writer
    #[serde(rename = "queue-capacity")]
    pub queue_capacity: usize,

    /// Pagination window size (`_from`..`_from + page_size - 1`)
    #[serde(rename = "page-size")]
    pub page_size: u32,

    /// Consecutive empty pages that end a partition cleanly
    #[serde(rename = "empty-threshold")]
    pub empty_threshold: u32,

    /// Consecutive non-empty pages without new identities that mark a partition stalled
    #[serde(rename = "stagnation-threshold")]
    pub stagnation_threshold: u32,

    /// Offset past which the remote API stops enumerating
    #[serde(rename = "max-offset")]
    pub max_offset: u32,

    /// Maximum split levels below a root partition
    #[serde(rename = "max-escalation-depth")]
    pub max_escalation_depth: u8,
}

/// Per-request HTTP behavior
#[derive(Debug, Clone, Deserialize)]
pub struct HttpConfig {
    #[serde(rename = "user-agent")]
    pub user_agent: String,

    #[serde(rename = "timeout-secs")]
    pub timeout_secs: u64,

    /// Retries for transient failures before a page degrades to empty
    #[serde(rename = "max-retries")]
    pub max_retries: u32,

    /// Base delay of the exponential backoff (milliseconds)
    #[serde(rename = "backoff-base-ms")]
    pub backoff_base_ms: u64,
}

impl HttpConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn backoff_base(&self) -> Duration {
        Duration::from_millis(self.backoff_base_ms)
    }
}

/// Ingestion writer batching and row-level retry budget
#[derive(Debug, Clone, Deserialize)]
pub struct WriterConfig {
    #[serde(rename = "batch-size")]
    pub batch_size: usize,

    /// Maximum time a partially filled batch waits before being committed
    #[serde(rename = "commit-interval-ms")]
    pub commit_interval_ms: u64,

    #[serde(rename = "max-row-retries")]
    pub max_row_retries: u32,

    #[serde(rename = "row-backoff-ms")]
    pub row_backoff_ms: u64,

    #[serde(rename = "row-jitter-ms", default)]
    pub row_jitter_ms: u64,
}

impl WriterConfig {
    pub fn commit_interval(&self) -> Duration {
        Duration::from_millis(self.commit_interval_ms)
    }
}

/// Facet values used when a stalled partition is split
#[derive(Debug, Clone, Deserialize)]
pub struct SplitConfig {
    /// Sales channels; the first is the primary channel, the rest are alternates
    #[serde(rename = "sales-channels", default = "default_sales_channels")]
    pub sales_channels: Vec<String>,

    /// Fulltext token alphabet for prefix faceting
    #[serde(default = "default_tokens")]
    pub tokens: Vec<String>,

    /// Ascending `[low, high]` price buckets
    #[serde(rename = "price-ranges", default = "default_price_ranges")]
    pub price_ranges: Vec<[u64; 2]>,
}

impl Default for SplitConfig {
    fn default() -> Self {
        Self {
            sales_channels: default_sales_channels(),
            tokens: default_tokens(),
            price_ranges: default_price_ranges(),
        }
    }
}

fn default_sales_channels() -> Vec<String> {
    vec!["1".to_string()]
}

fn default_tokens() -> Vec<String> {
    ('a'..='z')
        .chain("ñáéíóúü".chars())
        .chain('0'..='9')
        .map(|c| c.to_string())
        .collect()
}

fn default_price_ranges() -> Vec<[u64; 2]> {
    vec![
        [0, 500],
        [500, 1_000],
        [1_000, 2_000],
        [2_000, 5_000],
        [5_000, 10_000],
        [10_000, 20_000],
        [20_000, 50_000],
        [50_000, 999_999_999],
    ]
}

/// The retailer being crawled
#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    /// Unique store code used to resolve the store row
    pub code: String,

    #[serde(rename = "display-name")]
    pub display_name: String,

    /// Base URL of the catalog API and of relative listing links
    #[serde(rename = "base-url")]
    pub base_url: String,

    /// Depth requested from the category tree endpoint
    #[serde(rename = "tree-depth", default = "default_tree_depth")]
    pub tree_depth: u32,
}

fn default_tree_depth() -> u32 {
    4
}

/// Output configuration
#[derive(Debug, Clone, Deserialize)]
pub struct OutputConfig {
    /// Path to the SQLite database file
    #[serde(rename = "database-path")]
    pub database_path: String,
}
