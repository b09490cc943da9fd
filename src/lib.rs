//! Shelf-Ripple: a catalog price-ingestion crawler
//!
//! This crate walks a retailer's paginated catalog API partition by partition,
//! splits partitions whose enumeration stalls, and streams the observed
//! listings through a bounded channel into a single writer that resolves
//! product identities and appends timestamped price snapshots.

pub mod catalog;
pub mod config;
pub mod crawler;
pub mod ingest;
pub mod output;
pub mod record;
pub mod sites;
pub mod storage;

use thiserror::Error;

/// Main error type for Shelf-Ripple operations
#[derive(Debug, Error)]
pub enum CrawlError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Storage error: {0}")]
    Storage(#[from] storage::StorageError),

    #[error("Catalog source error: {0}")]
    Source(#[from] crawler::SourceError),

    #[error("Normalizer error: {0}")]
    Normalize(#[from] crawler::NormalizeError),

    #[error("URL error: {0}")]
    UrlError(#[from] UrlError),

    #[error("HTTP client error: {0}")]
    Reqwest(#[from] reqwest::Error),

    #[error("Task failed: {0}")]
    Join(#[from] tokio::task::JoinError),

    #[error("Run aborted: {0}")]
    Aborted(String),

    /// A fatal error ended a run after its row and counters were finalized
    #[error("Run {} failed: {source}", .report.run_id)]
    RunFailed {
        report: Box<output::RunReport>,
        #[source]
        source: Box<CrawlError>,
    },
}

/// Configuration-specific errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid URL in config: {0}")]
    InvalidUrl(String),
}

/// URL-specific errors
#[derive(Debug, Error)]
pub enum UrlError {
    #[error("Failed to parse URL: {0}")]
    Parse(String),

    #[error("Invalid URL scheme: {0}")]
    InvalidScheme(String),

    #[error("Missing domain in URL")]
    MissingDomain,
}

/// Result type alias for Shelf-Ripple operations
pub type Result<T> = std::result::Result<T, CrawlError>;

/// Result type alias for configuration operations
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

// Re-export commonly used types
pub use catalog::{Facet, Partition, PartitionPlanner, TaxonomyNode};
pub use config::Config;
pub use crawler::{crawl, CrawlOrchestrator, PagedFetcher};
pub use ingest::{EntityResolver, IngestionWriter, RetryPolicy};
pub use output::RunReport;
pub use record::Record;
