//! Integration tests for the ingestion writer
//!
//! A fault-injecting storage wrapper around SQLite checks per-record
//! isolation, row retries and batch commit recovery.

use shelf_ripple::ingest::{EntityResolver, IngestReport, IngestionWriter, ResolveContext, RetryPolicy};
use shelf_ripple::record::{parse_price, Record, SecondaryIdentity};
use shelf_ripple::storage::{
    CatalogEntryRecord, ListingKey, ListingRecord, ListingRefresh, NewCatalogEntry, NewListing, PriceSnapshot,
    RunRecord, RunStatus, RunSummary, SqliteStorage, Storage, StorageError, StorageResult,
    StoreCounts,
};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

const CAPTURED_AT: &str = "2024-05-01T10:00:00+00:00";

fn sqlite_failure(code: i32, message: &str) -> StorageError {
    StorageError::Sqlite(rusqlite::Error::SqliteFailure(
        rusqlite::ffi::Error::new(code),
        Some(message.to_string()),
    ))
}

/// SQLite storage that fails on demand
struct FaultyStorage {
    inner: SqliteStorage,
    /// Listings with these SKUs fail with a constraint error
    fatal_skus: Vec<String>,
    /// Remaining lock errors per SKU
    busy_skus: HashMap<String, u32>,
    /// Remaining commit failures
    failing_commits: u32,
    reconnects: u32,
}

impl FaultyStorage {
    fn new() -> Self {
        Self {
            inner: SqliteStorage::new_in_memory().unwrap(),
            fatal_skus: Vec::new(),
            busy_skus: HashMap::new(),
            failing_commits: 0,
            reconnects: 0,
        }
    }
}

impl Storage for FaultyStorage {
    fn begin_batch(&mut self) -> StorageResult<()> {
        self.inner.begin_batch()
    }

    fn commit_batch(&mut self) -> StorageResult<()> {
        if self.failing_commits > 0 {
            self.failing_commits -= 1;
            return Err(sqlite_failure(rusqlite::ffi::SQLITE_IOERR, "injected commit failure"));
        }
        self.inner.commit_batch()
    }

    fn rollback_batch(&mut self) -> StorageResult<()> {
        self.inner.rollback_batch()
    }

    fn savepoint(&mut self, name: &str) -> StorageResult<()> {
        self.inner.savepoint(name)
    }

    fn rollback_to_savepoint(&mut self, name: &str) -> StorageResult<()> {
        self.inner.rollback_to_savepoint(name)
    }

    fn release_savepoint(&mut self, name: &str) -> StorageResult<()> {
        self.inner.release_savepoint(name)
    }

    fn reconnect(&mut self) -> StorageResult<()> {
        self.reconnects += 1;
        self.inner.reconnect()
    }

    fn upsert_store(&mut self, code: &str, display_name: &str) -> StorageResult<i64> {
        self.inner.upsert_store(code, display_name)
    }

    fn find_catalog_entry_by_primary(&self, primary_identity: &str) -> StorageResult<Option<i64>> {
        self.inner.find_catalog_entry_by_primary(primary_identity)
    }

    fn find_catalog_entry_by_secondary(
        &self,
        name: &str,
        brand: Option<&str>,
        without_primary: bool,
    ) -> StorageResult<Option<i64>> {
        self.inner
            .find_catalog_entry_by_secondary(name, brand, without_primary)
    }

    fn insert_catalog_entry(&mut self, entry: &NewCatalogEntry) -> StorageResult<i64> {
        self.inner.insert_catalog_entry(entry)
    }

    fn merge_catalog_entry(&mut self, id: i64, entry: &NewCatalogEntry) -> StorageResult<()> {
        self.inner.merge_catalog_entry(id, entry)
    }

    fn backfill_primary_identity(&mut self, id: i64, primary_identity: &str) -> StorageResult<()> {
        self.inner.backfill_primary_identity(id, primary_identity)
    }

    fn get_catalog_entry(&self, id: i64) -> StorageResult<Option<CatalogEntryRecord>> {
        self.inner.get_catalog_entry(id)
    }

    fn find_listing(&self, store_id: i64, key: &ListingKey) -> StorageResult<Option<ListingRecord>> {
        self.inner.find_listing(store_id, key)
    }

    fn insert_listing(&mut self, listing: &NewListing) -> StorageResult<i64> {
        if let Some(sku) = &listing.store_sku {
            if self.fatal_skus.contains(sku) {
                return Err(sqlite_failure(rusqlite::ffi::SQLITE_CONSTRAINT, "injected constraint"));
            }
            if let Some(remaining) = self.busy_skus.get_mut(sku) {
                if *remaining > 0 {
                    *remaining -= 1;
                    return Err(sqlite_failure(rusqlite::ffi::SQLITE_BUSY, "injected lock wait"));
                }
            }
        }
        self.inner.insert_listing(listing)
    }

    fn refresh_listing(&mut self, listing_id: i64, refresh: &ListingRefresh<'_>) -> StorageResult<()> {
        self.inner.refresh_listing(listing_id, refresh)
    }

    fn get_listing(&self, id: i64) -> StorageResult<Option<ListingRecord>> {
        self.inner.get_listing(id)
    }

    fn upsert_price_snapshot(&mut self, snapshot: &PriceSnapshot) -> StorageResult<()> {
        self.inner.upsert_price_snapshot(snapshot)
    }

    fn get_price_snapshot(
        &self,
        store_listing_id: i64,
        captured_at: &str,
    ) -> StorageResult<Option<PriceSnapshot>> {
        self.inner.get_price_snapshot(store_listing_id, captured_at)
    }

    fn create_run(&mut self, config_hash: &str, captured_at: &str) -> StorageResult<i64> {
        self.inner.create_run(config_hash, captured_at)
    }

    fn finish_run(&mut self, run_id: i64, status: RunStatus, summary: &RunSummary) -> StorageResult<()> {
        self.inner.finish_run(run_id, status, summary)
    }

    fn get_run(&self, run_id: i64) -> StorageResult<RunRecord> {
        self.inner.get_run(run_id)
    }

    fn get_latest_runs(&self, limit: usize) -> StorageResult<Vec<RunRecord>> {
        self.inner.get_latest_runs(limit)
    }

    fn count_rows(&self) -> StorageResult<StoreCounts> {
        self.inner.count_rows()
    }
}

fn record(sku: &str, primary: Option<&str>, name: &str) -> Record {
    Record {
        primary_identity: primary.map(String::from),
        secondary_identity: SecondaryIdentity {
            name: Some(name.to_string()),
            brand: Some("Marolio".to_string()),
        },
        store_sku: Some(sku.to_string()),
        list_price: parse_price("1.250,00"),
        offer_price: parse_price("999,90"),
        offer_label: Some("Oferta".to_string()),
        url: format!("https://www.hiperlibertad.com.ar/{}/p", sku),
        listing_name: Some(name.to_string()),
        ..Default::default()
    }
}

/// Runs a writer over `records` and returns its storage and counters
async fn ingest<S: Storage>(storage: S, batch_size: usize, records: Vec<Record>) -> (S, IngestReport) {
    let writer = IngestionWriter::new(
        storage,
        EntityResolver::new(ResolveContext {
            store_code: "hiperlibertad".to_string(),
            store_name: "Hiper Libertad".to_string(),
            captured_at: CAPTURED_AT.to_string(),
        }),
        RetryPolicy::new(2, Duration::from_millis(1), Duration::from_millis(2)),
        batch_size,
        Duration::from_secs(60),
    );

    let (tx, rx) = mpsc::channel(records.len().max(1));
    for record in records {
        tx.send(record).await.unwrap();
    }
    drop(tx);

    writer.run(rx, CancellationToken::new()).await
}

#[tokio::test]
async fn test_listing_identity_does_not_drift() {
    let records = vec![
        record("123", Some("7791234567890"), "Aceite Girasol 900ml"),
        record("123", None, "Aceite Girasol 900 ml"),
        record("123", Some("7790000000001"), "Otro producto"),
    ];

    let (mut storage, report) = ingest(SqliteStorage::new_in_memory().unwrap(), 10, records).await;
    assert_eq!(report.records_written, 3);

    let store_id = storage.upsert_store("hiperlibertad", "Hiper Libertad").unwrap();
    let listing = storage
        .find_listing(store_id, &ListingKey::Sku("123".to_string()))
        .unwrap()
        .unwrap();
    let expected = storage
        .find_catalog_entry_by_primary("7791234567890")
        .unwrap()
        .unwrap();

    assert_eq!(listing.catalog_entry_id, expected);
    assert_eq!(storage.count_rows().unwrap().listings, 1);
}

#[tokio::test]
async fn test_single_bad_record_is_isolated() {
    let mut storage = FaultyStorage::new();
    storage.fatal_skus.push("bad".to_string());

    let records = vec![
        record("1", Some("7790000000011"), "Arroz"),
        record("2", Some("7790000000012"), "Fideos"),
        record("bad", Some("7790000000013"), "Harina"),
        record("4", Some("7790000000014"), "Yerba"),
        record("5", Some("7790000000015"), "Azucar"),
    ];

    let (storage, report) = ingest(storage, 10, records).await;

    assert_eq!(report.records_written, 4);
    assert_eq!(report.skipped.fatal_storage, 1);
    assert_eq!(report.skipped.total(), 1);
    assert_eq!(report.batches_committed, 1);

    let counts = storage.count_rows().unwrap();
    assert_eq!(counts.listings, 4);
    assert_eq!(counts.snapshots, 4);
    // the failed record's catalog entry was rolled back with it
    assert_eq!(counts.catalog_entries, 4);
    assert!(storage
        .find_catalog_entry_by_primary("7790000000013")
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn test_lock_contention_is_retried() {
    let mut storage = FaultyStorage::new();
    storage.busy_skus.insert("busy".to_string(), 2);

    let records = vec![
        record("1", Some("7790000000011"), "Arroz"),
        record("busy", Some("7790000000012"), "Fideos"),
    ];

    let (storage, report) = ingest(storage, 10, records).await;

    assert_eq!(report.records_written, 2);
    assert_eq!(report.row_retries, 2);
    assert_eq!(report.skipped.total(), 0);
    assert_eq!(storage.reconnects, 2);
    assert_eq!(storage.count_rows().unwrap().catalog_entries, 2);
}

#[tokio::test]
async fn test_exhausted_retries_skip_the_record() {
    let mut storage = FaultyStorage::new();
    storage.busy_skus.insert("busy".to_string(), 10);

    let records = vec![
        record("busy", Some("7790000000012"), "Fideos"),
        record("2", Some("7790000000011"), "Arroz"),
    ];

    let (storage, report) = ingest(storage, 10, records).await;

    assert_eq!(report.records_written, 1);
    assert_eq!(report.skipped.transient_exhausted, 1);
    assert_eq!(report.row_retries, 2);
    assert_eq!(storage.count_rows().unwrap().listings, 1);
}

#[tokio::test]
async fn test_commit_failure_discards_only_that_batch() {
    let mut storage = FaultyStorage::new();
    storage.failing_commits = 1;

    let records = vec![
        record("1", Some("7790000000011"), "Arroz"),
        record("2", Some("7790000000012"), "Fideos"),
        record("3", Some("7790000000013"), "Harina"),
        record("4", Some("7790000000014"), "Yerba"),
    ];

    let (storage, report) = ingest(storage, 2, records).await;

    assert_eq!(report.batches_failed, 1);
    assert_eq!(report.batches_committed, 1);
    assert_eq!(report.skipped.batch_commit_failed, 2);
    assert_eq!(report.records_written, 2);

    let counts = storage.count_rows().unwrap();
    assert_eq!(counts.listings, 2);
    assert!(storage
        .find_catalog_entry_by_primary("7790000000011")
        .unwrap()
        .is_none());
    assert!(storage
        .find_catalog_entry_by_primary("7790000000013")
        .unwrap()
        .is_some());
}
