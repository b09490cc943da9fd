//! Storage traits and error types
//!
//! This module defines the trait interface for storage backends and
//! associated error types.

use crate::storage::{
    CatalogEntryRecord, ListingKey, ListingRecord, ListingRefresh, NewCatalogEntry, NewListing, PriceSnapshot,
    RunRecord, RunStatus, RunSummary, StoreCounts,
};
use rusqlite::ErrorCode;
use thiserror::Error;

/// Errors that can occur during storage operations
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Run not found: {0}")]
    RunNotFound(i64),

    #[error("Invalid savepoint name: {0}")]
    InvalidSavepoint(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl StorageError {
    /// Classification hook for the row-level retry controller
    ///
    /// Lock contention (`SQLITE_BUSY`, `SQLITE_LOCKED`) is transient; every
    /// other failure is fatal for the record that caused it.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Sqlite(rusqlite::Error::SqliteFailure(e, _)) => matches!(
                e.code,
                ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked
            ),
            _ => false,
        }
    }
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Trait for storage backend implementations
///
/// This trait defines every database operation needed by the ingestion
/// writer. A storage value is owned by exactly one writer at a time.
pub trait Storage {
    // ===== Transactions =====

    /// Opens the transaction that groups one micro-batch
    fn begin_batch(&mut self) -> StorageResult<()>;

    fn commit_batch(&mut self) -> StorageResult<()>;

    fn rollback_batch(&mut self) -> StorageResult<()>;

    /// Creates a named rollback point inside the open batch
    fn savepoint(&mut self, name: &str) -> StorageResult<()>;

    /// Undoes everything since the named savepoint, keeping the savepoint open
    fn rollback_to_savepoint(&mut self, name: &str) -> StorageResult<()>;

    fn release_savepoint(&mut self, name: &str) -> StorageResult<()>;

    /// Pings the connection and reopens it if the ping fails
    fn reconnect(&mut self) -> StorageResult<()>;

    // ===== Stores =====

    /// Resolves a store by code, creating it if absent
    ///
    /// # Returns
    ///
    /// The store ID (either newly created or existing)
    fn upsert_store(&mut self, code: &str, display_name: &str) -> StorageResult<i64>;

    // ===== Catalog Entries =====

    fn find_catalog_entry_by_primary(&self, primary_identity: &str) -> StorageResult<Option<i64>>;

    /// Looks up a catalog entry by (name, brand)
    ///
    /// # Arguments
    ///
    /// * `name` - Product name, matched exactly
    /// * `brand` - Brand; `None` matches entries with a NULL or empty brand
    /// * `without_primary` - Only consider entries that have no primary identity
    fn find_catalog_entry_by_secondary(
        &self,
        name: &str,
        brand: Option<&str>,
        without_primary: bool,
    ) -> StorageResult<Option<i64>>;

    fn insert_catalog_entry(&mut self, entry: &NewCatalogEntry) -> StorageResult<i64>;

    /// Fills descriptive fields that are NULL or empty; never overwrites
    fn merge_catalog_entry(&mut self, id: i64, entry: &NewCatalogEntry) -> StorageResult<()>;

    /// Sets the primary identity of an entry that has none
    fn backfill_primary_identity(&mut self, id: i64, primary_identity: &str) -> StorageResult<()>;

    fn get_catalog_entry(&self, id: i64) -> StorageResult<Option<CatalogEntryRecord>>;

    // ===== Store Listings =====

    fn find_listing(&self, store_id: i64, key: &ListingKey) -> StorageResult<Option<ListingRecord>>;

    fn insert_listing(&mut self, listing: &NewListing) -> StorageResult<i64>;

    /// Fills identifiers that are NULL, and `url` and `listing_name` where NULL or empty
    ///
    /// The listing's catalog entry is never touched.
    fn refresh_listing(&mut self, listing_id: i64, refresh: &ListingRefresh<'_>) -> StorageResult<()>;

    fn get_listing(&self, id: i64) -> StorageResult<Option<ListingRecord>>;

    // ===== Price Snapshots =====

    /// Inserts a snapshot or overwrites the prices of the one with the same key
    fn upsert_price_snapshot(&mut self, snapshot: &PriceSnapshot) -> StorageResult<()>;

    fn get_price_snapshot(
        &self,
        store_listing_id: i64,
        captured_at: &str,
    ) -> StorageResult<Option<PriceSnapshot>>;

    // ===== Run Management =====

    /// Creates a new ingestion run
    ///
    /// # Arguments
    ///
    /// * `config_hash` - Hash of the configuration file
    /// * `captured_at` - Timestamp shared by every snapshot of the run
    ///
    /// # Returns
    ///
    /// The ID of the newly created run
    fn create_run(&mut self, config_hash: &str, captured_at: &str) -> StorageResult<i64>;

    /// Stores the final status and counters of a run
    fn finish_run(&mut self, run_id: i64, status: RunStatus, summary: &RunSummary)
        -> StorageResult<()>;

    fn get_run(&self, run_id: i64) -> StorageResult<RunRecord>;

    /// Most recent runs, newest first
    fn get_latest_runs(&self, limit: usize) -> StorageResult<Vec<RunRecord>>;

    // ===== Statistics =====

    fn count_rows(&self) -> StorageResult<StoreCounts>;
}
