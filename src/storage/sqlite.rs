//! SQLite storage implementation
//!
//! This module provides a SQLite-based implementation of the Storage trait.

use crate::storage::schema::initialize_schema;
use crate::storage::traits::{Storage, StorageError, StorageResult};
use crate::storage::{
    CatalogEntryRecord, ListingKey, ListingRecord, ListingRefresh, NewCatalogEntry, NewListing, PriceSnapshot,
    RunRecord, RunStatus, RunSummary, StoreCounts,
};
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::{Path, PathBuf};
use std::time::Duration;

const LISTING_COLUMNS: &str = "id, store_id, catalog_entry_id, store_sku, store_record_id, \
     synthetic_key, url, listing_name, low_confidence";

const RUN_COLUMNS: &str = "id, started_at, finished_at, captured_at, config_hash, status, \
     records_written, records_skipped, partitions_lossy";

/// SQLite storage backend
pub struct SqliteStorage {
    conn: Connection,
    /// `None` for in-memory databases, which cannot be reopened
    path: Option<PathBuf>,
}

impl SqliteStorage {
    /// Creates a new SqliteStorage instance
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the SQLite database file
    ///
    /// # Returns
    ///
    /// * `Ok(SqliteStorage)` - Successfully opened/created database
    /// * `Err(StorageError)` - Failed to open database
    pub fn new(path: &Path) -> StorageResult<Self> {
        let conn = open_connection(path)?;
        Ok(Self {
            conn,
            path: Some(path.to_path_buf()),
        })
    }

    /// Creates an in-memory database (tests and dry runs)
    pub fn new_in_memory() -> StorageResult<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        initialize_schema(&conn)?;
        Ok(Self { conn, path: None })
    }
}

fn open_connection(path: &Path) -> rusqlite::Result<Connection> {
    let conn = Connection::open(path)?;

    conn.execute_batch(
        "
        PRAGMA journal_mode = WAL;
        PRAGMA synchronous = NORMAL;
        PRAGMA foreign_keys = ON;
        PRAGMA temp_store = MEMORY;
    ",
    )?;
    // lock waits longer than this surface as SQLITE_BUSY
    conn.busy_timeout(Duration::from_secs(5))?;

    initialize_schema(&conn)?;
    Ok(conn)
}

/// Savepoint names are interpolated into SQL, so only identifiers are allowed
fn checked_savepoint(name: &str) -> StorageResult<&str> {
    let valid = !name.is_empty()
        && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
        && !name.starts_with(|c: char| c.is_ascii_digit());
    if valid {
        Ok(name)
    } else {
        Err(StorageError::InvalidSavepoint(name.to_string()))
    }
}

fn listing_from_row(row: &Row<'_>) -> rusqlite::Result<ListingRecord> {
    Ok(ListingRecord {
        id: row.get(0)?,
        store_id: row.get(1)?,
        catalog_entry_id: row.get(2)?,
        store_sku: row.get(3)?,
        store_record_id: row.get(4)?,
        synthetic_key: row.get(5)?,
        url: row.get(6)?,
        listing_name: row.get(7)?,
        low_confidence: row.get::<_, i64>(8)? != 0,
    })
}

fn run_from_row(row: &Row<'_>) -> rusqlite::Result<RunRecord> {
    Ok(RunRecord {
        id: row.get(0)?,
        started_at: row.get(1)?,
        finished_at: row.get(2)?,
        captured_at: row.get(3)?,
        config_hash: row.get(4)?,
        status: RunStatus::from_db_string(&row.get::<_, String>(5)?).unwrap_or(RunStatus::Failed),
        records_written: row.get::<_, i64>(6)? as u64,
        records_skipped: row.get::<_, i64>(7)? as u64,
        partitions_lossy: row.get::<_, i64>(8)? as u64,
    })
}

impl Storage for SqliteStorage {
    // ===== Transactions =====

    fn begin_batch(&mut self) -> StorageResult<()> {
        self.conn.execute_batch("BEGIN IMMEDIATE")?;
        Ok(())
    }

    fn commit_batch(&mut self) -> StorageResult<()> {
        self.conn.execute_batch("COMMIT")?;
        Ok(())
    }

    fn rollback_batch(&mut self) -> StorageResult<()> {
        if !self.conn.is_autocommit() {
            self.conn.execute_batch("ROLLBACK")?;
        }
        Ok(())
    }

    fn savepoint(&mut self, name: &str) -> StorageResult<()> {
        let name = checked_savepoint(name)?;
        self.conn.execute_batch(&format!("SAVEPOINT {}", name))?;
        Ok(())
    }

    fn rollback_to_savepoint(&mut self, name: &str) -> StorageResult<()> {
        let name = checked_savepoint(name)?;
        self.conn
            .execute_batch(&format!("ROLLBACK TO SAVEPOINT {}", name))?;
        Ok(())
    }

    fn release_savepoint(&mut self, name: &str) -> StorageResult<()> {
        let name = checked_savepoint(name)?;
        self.conn.execute_batch(&format!("RELEASE SAVEPOINT {}", name))?;
        Ok(())
    }

    fn reconnect(&mut self) -> StorageResult<()> {
        let ping = self
            .conn
            .query_row("SELECT 1", [], |row| row.get::<_, i64>(0));

        match (ping, &self.path) {
            (Ok(_), _) => Ok(()),
            (Err(e), None) => Err(e.into()),
            (Err(e), Some(path)) => {
                tracing::warn!("Storage ping failed ({}); reopening {}", e, path.display());
                self.conn = open_connection(path)?;
                Ok(())
            }
        }
    }

    // ===== Stores =====

    fn upsert_store(&mut self, code: &str, display_name: &str) -> StorageResult<i64> {
        self.conn.execute(
            "INSERT INTO stores (code, display_name) VALUES (?1, ?2)
             ON CONFLICT(code) DO NOTHING",
            params![code, display_name],
        )?;

        let id = self.conn.query_row(
            "SELECT id FROM stores WHERE code = ?1",
            params![code],
            |row| row.get(0),
        )?;
        Ok(id)
    }

    // ===== Catalog Entries =====

    fn find_catalog_entry_by_primary(&self, primary_identity: &str) -> StorageResult<Option<i64>> {
        let id = self
            .conn
            .query_row(
                "SELECT id FROM catalog_entries WHERE primary_identity = ?1",
                params![primary_identity],
                |row| row.get(0),
            )
            .optional()?;
        Ok(id)
    }

    fn find_catalog_entry_by_secondary(
        &self,
        name: &str,
        brand: Option<&str>,
        without_primary: bool,
    ) -> StorageResult<Option<i64>> {
        let id = self
            .conn
            .query_row(
                "SELECT id FROM catalog_entries
                 WHERE name = ?1
                   AND IFNULL(brand, '') = IFNULL(?2, '')
                   AND (?3 = 0 OR primary_identity IS NULL)
                 ORDER BY id
                 LIMIT 1",
                params![name, brand, without_primary],
                |row| row.get(0),
            )
            .optional()?;
        Ok(id)
    }

    fn insert_catalog_entry(&mut self, entry: &NewCatalogEntry) -> StorageResult<i64> {
        self.conn.execute(
            "INSERT INTO catalog_entries
                (primary_identity, name, brand, manufacturer, category, subcategory)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                entry.primary_identity,
                entry.name,
                entry.brand,
                entry.manufacturer,
                entry.category,
                entry.subcategory
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    fn merge_catalog_entry(&mut self, id: i64, entry: &NewCatalogEntry) -> StorageResult<()> {
        self.conn.execute(
            "UPDATE catalog_entries SET
                name = COALESCE(NULLIF(name, ''), ?2),
                brand = COALESCE(NULLIF(brand, ''), ?3),
                manufacturer = COALESCE(NULLIF(manufacturer, ''), ?4),
                category = COALESCE(NULLIF(category, ''), ?5),
                subcategory = COALESCE(NULLIF(subcategory, ''), ?6)
             WHERE id = ?1",
            params![
                id,
                entry.name,
                entry.brand,
                entry.manufacturer,
                entry.category,
                entry.subcategory
            ],
        )?;
        Ok(())
    }

    fn backfill_primary_identity(&mut self, id: i64, primary_identity: &str) -> StorageResult<()> {
        self.conn.execute(
            "UPDATE catalog_entries SET primary_identity = ?2
             WHERE id = ?1 AND primary_identity IS NULL",
            params![id, primary_identity],
        )?;
        Ok(())
    }

    fn get_catalog_entry(&self, id: i64) -> StorageResult<Option<CatalogEntryRecord>> {
        let entry = self
            .conn
            .query_row(
                "SELECT id, primary_identity, name, brand, manufacturer, category, subcategory
                 FROM catalog_entries WHERE id = ?1",
                params![id],
                |row| {
                    Ok(CatalogEntryRecord {
                        id: row.get(0)?,
                        primary_identity: row.get(1)?,
                        name: row.get(2)?,
                        brand: row.get(3)?,
                        manufacturer: row.get(4)?,
                        category: row.get(5)?,
                        subcategory: row.get(6)?,
                    })
                },
            )
            .optional()?;
        Ok(entry)
    }

    // ===== Store Listings =====

    fn find_listing(&self, store_id: i64, key: &ListingKey) -> StorageResult<Option<ListingRecord>> {
        let (filter, value) = match key {
            ListingKey::Sku(sku) => ("store_sku = ?2", sku),
            ListingKey::RecordId(rid) => ("store_record_id = ?2", rid),
            ListingKey::Synthetic(key) => (
                "store_sku IS NULL AND store_record_id IS NULL AND synthetic_key = ?2",
                key,
            ),
        };

        // several SKUs of one product may share a record id; the oldest listing wins
        let sql = format!(
            "SELECT {} FROM store_listings WHERE store_id = ?1 AND {} ORDER BY id LIMIT 1",
            LISTING_COLUMNS, filter
        );
        let listing = self
            .conn
            .query_row(&sql, params![store_id, value], listing_from_row)
            .optional()?;
        Ok(listing)
    }

    fn insert_listing(&mut self, listing: &NewListing) -> StorageResult<i64> {
        self.conn.execute(
            "INSERT INTO store_listings
                (store_id, catalog_entry_id, store_sku, store_record_id, synthetic_key,
                 url, listing_name, low_confidence)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                listing.store_id,
                listing.catalog_entry_id,
                listing.store_sku,
                listing.store_record_id,
                listing.synthetic_key,
                listing.url,
                listing.listing_name,
                listing.low_confidence
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    fn refresh_listing(&mut self, listing_id: i64, refresh: &ListingRefresh<'_>) -> StorageResult<()> {
        self.conn.execute(
            "UPDATE store_listings SET
                store_sku = COALESCE(store_sku, ?2),
                store_record_id = COALESCE(store_record_id, ?3),
                url = COALESCE(NULLIF(url, ''), ?4),
                listing_name = COALESCE(NULLIF(listing_name, ''), ?5)
             WHERE id = ?1",
            params![
                listing_id,
                refresh.store_sku,
                refresh.store_record_id,
                refresh.url,
                refresh.listing_name
            ],
        )?;
        Ok(())
    }

    fn get_listing(&self, id: i64) -> StorageResult<Option<ListingRecord>> {
        let sql = format!("SELECT {} FROM store_listings WHERE id = ?1", LISTING_COLUMNS);
        let listing = self
            .conn
            .query_row(&sql, params![id], listing_from_row)
            .optional()?;
        Ok(listing)
    }

    // ===== Price Snapshots =====

    fn upsert_price_snapshot(&mut self, snapshot: &PriceSnapshot) -> StorageResult<()> {
        self.conn.execute(
            "INSERT INTO price_snapshots
                (store_id, store_listing_id, captured_at, list_price, offer_price, offer_label)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(store_id, store_listing_id, captured_at) DO UPDATE SET
                list_price = excluded.list_price,
                offer_price = excluded.offer_price,
                offer_label = excluded.offer_label",
            params![
                snapshot.store_id,
                snapshot.store_listing_id,
                snapshot.captured_at,
                snapshot.list_price,
                snapshot.offer_price,
                snapshot.offer_label
            ],
        )?;
        Ok(())
    }

    fn get_price_snapshot(
        &self,
        store_listing_id: i64,
        captured_at: &str,
    ) -> StorageResult<Option<PriceSnapshot>> {
        let snapshot = self
            .conn
            .query_row(
                "SELECT store_id, store_listing_id, captured_at, list_price, offer_price, offer_label
                 FROM price_snapshots
                 WHERE store_listing_id = ?1 AND captured_at = ?2",
                params![store_listing_id, captured_at],
                |row| {
                    Ok(PriceSnapshot {
                        store_id: row.get(0)?,
                        store_listing_id: row.get(1)?,
                        captured_at: row.get(2)?,
                        list_price: row.get(3)?,
                        offer_price: row.get(4)?,
                        offer_label: row.get(5)?,
                    })
                },
            )
            .optional()?;
        Ok(snapshot)
    }

    // ===== Run Management =====

    fn create_run(&mut self, config_hash: &str, captured_at: &str) -> StorageResult<i64> {
        let now = Utc::now().to_rfc3339();
        self.conn.execute(
            "INSERT INTO runs (started_at, captured_at, config_hash, status) VALUES (?1, ?2, ?3, ?4)",
            params![now, captured_at, config_hash, RunStatus::Running.to_db_string()],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    fn finish_run(
        &mut self,
        run_id: i64,
        status: RunStatus,
        summary: &RunSummary,
    ) -> StorageResult<()> {
        let now = Utc::now().to_rfc3339();
        let updated = self.conn.execute(
            "UPDATE runs SET status = ?1, finished_at = ?2,
                records_written = ?3, records_skipped = ?4, partitions_lossy = ?5
             WHERE id = ?6",
            params![
                status.to_db_string(),
                now,
                summary.records_written as i64,
                summary.records_skipped as i64,
                summary.partitions_lossy as i64,
                run_id
            ],
        )?;

        if updated == 0 {
            return Err(StorageError::RunNotFound(run_id));
        }
        Ok(())
    }

    fn get_run(&self, run_id: i64) -> StorageResult<RunRecord> {
        let sql = format!("SELECT {} FROM runs WHERE id = ?1", RUN_COLUMNS);
        self.conn
            .query_row(&sql, params![run_id], run_from_row)
            .optional()?
            .ok_or(StorageError::RunNotFound(run_id))
    }

    fn get_latest_runs(&self, limit: usize) -> StorageResult<Vec<RunRecord>> {
        let sql = format!("SELECT {} FROM runs ORDER BY id DESC LIMIT ?1", RUN_COLUMNS);
        let mut stmt = self.conn.prepare(&sql)?;
        let runs = stmt
            .query_map(params![limit as i64], run_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(runs)
    }

    // ===== Statistics =====

    fn count_rows(&self) -> StorageResult<StoreCounts> {
        let count = |sql: &str| -> StorageResult<u64> {
            let n: i64 = self.conn.query_row(sql, [], |row| row.get(0))?;
            Ok(n as u64)
        };

        Ok(StoreCounts {
            stores: count("SELECT COUNT(*) FROM stores")?,
            catalog_entries: count("SELECT COUNT(*) FROM catalog_entries")?,
            listings: count("SELECT COUNT(*) FROM store_listings")?,
            low_confidence_listings: count(
                "SELECT COUNT(*) FROM store_listings WHERE low_confidence = 1",
            )?,
            snapshots: count("SELECT COUNT(*) FROM price_snapshots")?,
        })
    }
}
