//! Storage module for persisting catalog and price data
//!
//! This module handles all database operations for the ingestion side, including:
//! - SQLite database initialization and schema management
//! - Store, catalog entry and store listing resolution
//! - Price snapshot upserts
//! - Batch transactions with per-record savepoints
//! - Run bookkeeping

mod schema;
mod sqlite;
mod traits;

pub use sqlite::SqliteStorage;
pub use traits::{Storage, StorageError, StorageResult};

use std::path::Path;

/// Opens (or creates) the SQLite database at `path`
///
/// # Arguments
///
/// * `path` - Path to the SQLite database file
///
/// # Returns
///
/// * `Ok(SqliteStorage)` - Successfully initialized storage
/// * `Err(StorageError)` - Failed to open the database or apply the schema
pub fn open_storage(path: &Path) -> StorageResult<SqliteStorage> {
    SqliteStorage::new(path)
}

/// Descriptive fields written to a catalog entry
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NewCatalogEntry {
    pub primary_identity: Option<String>,
    pub name: Option<String>,
    pub brand: Option<String>,
    pub manufacturer: Option<String>,
    pub category: Option<String>,
    pub subcategory: Option<String>,
}

/// A catalog entry ("product") as stored
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogEntryRecord {
    pub id: i64,
    pub primary_identity: Option<String>,
    pub name: Option<String>,
    pub brand: Option<String>,
    pub manufacturer: Option<String>,
    pub category: Option<String>,
    pub subcategory: Option<String>,
}

/// Natural key a store listing is resolved by
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ListingKey {
    Sku(String),
    RecordId(String),
    /// URL-derived key for listings with no store-issued identity
    Synthetic(String),
}

/// A store listing to insert
///
/// Every store-issued identifier the record carries is kept, not only the
/// one the listing was looked up by.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NewListing {
    pub store_id: i64,
    pub catalog_entry_id: i64,
    pub store_sku: Option<String>,
    pub store_record_id: Option<String>,
    /// Only set when the listing has neither store identifier
    pub synthetic_key: Option<String>,
    pub url: Option<String>,
    pub listing_name: Option<String>,
    pub low_confidence: bool,
}

/// Values filled into an existing listing where it has none
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ListingRefresh<'a> {
    pub store_sku: Option<&'a str>,
    pub store_record_id: Option<&'a str>,
    pub url: Option<&'a str>,
    pub listing_name: Option<&'a str>,
}

/// A store listing as stored
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListingRecord {
    pub id: i64,
    pub store_id: i64,
    pub catalog_entry_id: i64,
    pub store_sku: Option<String>,
    pub store_record_id: Option<String>,
    pub synthetic_key: Option<String>,
    pub url: Option<String>,
    pub listing_name: Option<String>,
    pub low_confidence: bool,
}

/// One timestamped price observation; prices are two-decimal text
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PriceSnapshot {
    pub store_id: i64,
    pub store_listing_id: i64,
    pub captured_at: String,
    pub list_price: Option<String>,
    pub offer_price: Option<String>,
    pub offer_label: Option<String>,
}

/// Represents an ingestion run
#[derive(Debug, Clone)]
pub struct RunRecord {
    pub id: i64,
    pub started_at: String,
    pub finished_at: Option<String>,
    pub captured_at: String,
    pub config_hash: String,
    pub status: RunStatus,
    pub records_written: u64,
    pub records_skipped: u64,
    pub partitions_lossy: u64,
}

/// Counters stored with a finished run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub records_written: u64,
    pub records_skipped: u64,
    pub partitions_lossy: u64,
}

/// Status of an ingestion run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Running,
    Completed,
    Cancelled,
    Failed,
}

impl RunStatus {
    pub fn to_db_string(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
            Self::Failed => "failed",
        }
    }

    pub fn from_db_string(s: &str) -> Option<Self> {
        match s {
            "running" => Some(Self::Running),
            "completed" => Some(Self::Completed),
            "cancelled" => Some(Self::Cancelled),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

/// Row counts per table
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreCounts {
    pub stores: u64,
    pub catalog_entries: u64,
    pub listings: u64,
    pub low_confidence_listings: u64,
    pub snapshots: u64,
}
