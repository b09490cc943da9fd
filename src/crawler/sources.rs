//! Collaborator interfaces between the crawler and a concrete catalog site
//!
//! The crawler never branches on site identity. Everything site-specific
//! (endpoints, payload shapes, field extraction) lives behind these traits.

use crate::catalog::{Partition, TaxonomyNode};
use crate::record::Record;
use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

/// Errors reported by a remote catalog source
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SourceError {
    #[error("HTTP status {0}")]
    Status(u16),

    #[error("Request timed out")]
    Timeout,

    #[error("Network error: {0}")]
    Network(String),

    #[error("Failed to decode response: {0}")]
    Decode(String),
}

impl SourceError {
    /// Whether the same request may succeed if retried
    ///
    /// Timeouts, connection failures, 429 and 5xx are transient. Other
    /// client errors and undecodable payloads are not.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Status(code) => *code == 429 || (500..=599).contains(code),
            Self::Timeout | Self::Network(_) => true,
            Self::Decode(_) => false,
        }
    }
}

impl From<reqwest::Error> for SourceError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Self::Timeout
        } else if let Some(status) = e.status() {
            Self::Status(status.as_u16())
        } else if e.is_decode() {
            Self::Decode(e.to_string())
        } else {
            Self::Network(e.to_string())
        }
    }
}

/// A raw catalog entry, opaque to the crawler
#[derive(Debug, Clone, PartialEq)]
pub struct RawEntry {
    pub payload: Value,
    /// Category path of the partition the entry was listed under
    pub path: Vec<String>,
}

/// One available value of a facet, with its result count when known
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FacetValue {
    pub value: String,
    pub count: Option<u64>,
}

/// Supplies the store's category tree
#[async_trait]
pub trait TaxonomySource: Send + Sync {
    async fn load_taxonomy(&self) -> Result<Vec<TaxonomyNode>, SourceError>;
}

/// Supplies one pagination window of a partition
#[async_trait]
pub trait ListingSource: Send + Sync {
    /// Fetches entries `from..=to` of a partition
    ///
    /// A single call is one request attempt; retries are the caller's
    /// concern.
    async fn fetch_window(
        &self,
        partition: &Partition,
        from: u32,
        to: u32,
    ) -> Result<Vec<RawEntry>, SourceError>;
}

/// Supplies facet values used to split stalled partitions
#[async_trait]
pub trait FacetSource: Send + Sync {
    async fn brands(&self, partition: &Partition) -> Result<Vec<FacetValue>, SourceError>;
}

/// Errors raised by a record normalizer
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum NormalizeError {
    #[error("Missing field: {0}")]
    MissingField(String),

    #[error("Unexpected payload shape: {0}")]
    Shape(String),
}

/// Converts a raw entry into a canonical record
///
/// Implementations must be pure: the same entry always yields the same
/// record and nothing outside the return value is touched.
pub trait RecordNormalizer: Send + Sync {
    fn normalize(&self, entry: &RawEntry) -> Result<Record, NormalizeError>;
}
