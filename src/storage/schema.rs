//! Database schema definitions
//!
//! This module contains all SQL schema definitions for the Shelf-Ripple database.

/// SQL schema for the database
pub const SCHEMA_SQL: &str = r#"
-- Track ingestion runs
CREATE TABLE IF NOT EXISTS runs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    started_at TEXT NOT NULL,
    finished_at TEXT,
    captured_at TEXT NOT NULL,
    config_hash TEXT NOT NULL,
    status TEXT NOT NULL,
    records_written INTEGER NOT NULL DEFAULT 0,
    records_skipped INTEGER NOT NULL DEFAULT 0,
    partitions_lossy INTEGER NOT NULL DEFAULT 0
);

-- Retailers
CREATE TABLE IF NOT EXISTS stores (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    code TEXT NOT NULL UNIQUE,
    display_name TEXT NOT NULL
);

-- Store-independent products
CREATE TABLE IF NOT EXISTS catalog_entries (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    primary_identity TEXT UNIQUE,
    name TEXT,
    brand TEXT,
    manufacturer TEXT,
    category TEXT,
    subcategory TEXT
);

CREATE INDEX IF NOT EXISTS idx_catalog_entries_name_brand
    ON catalog_entries(name, brand);

-- Per-store binding of a product to the store's own identifiers
CREATE TABLE IF NOT EXISTS store_listings (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    store_id INTEGER NOT NULL REFERENCES stores(id),
    catalog_entry_id INTEGER NOT NULL REFERENCES catalog_entries(id),
    store_sku TEXT,
    store_record_id TEXT,
    synthetic_key TEXT,
    url TEXT,
    listing_name TEXT,
    low_confidence INTEGER NOT NULL DEFAULT 0
);

CREATE UNIQUE INDEX IF NOT EXISTS idx_store_listings_sku
    ON store_listings(store_id, store_sku)
    WHERE store_sku IS NOT NULL;

-- a record id repeats across the SKUs of one product
CREATE UNIQUE INDEX IF NOT EXISTS idx_store_listings_record_id
    ON store_listings(store_id, store_record_id)
    WHERE store_sku IS NULL AND store_record_id IS NOT NULL;

CREATE UNIQUE INDEX IF NOT EXISTS idx_store_listings_synthetic
    ON store_listings(store_id, synthetic_key)
    WHERE store_sku IS NULL AND store_record_id IS NULL AND synthetic_key IS NOT NULL;

CREATE INDEX IF NOT EXISTS idx_store_listings_entry
    ON store_listings(catalog_entry_id);

-- Timestamped price observations
CREATE TABLE IF NOT EXISTS price_snapshots (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    store_id INTEGER NOT NULL REFERENCES stores(id),
    store_listing_id INTEGER NOT NULL REFERENCES store_listings(id),
    captured_at TEXT NOT NULL,
    list_price TEXT,
    offer_price TEXT,
    offer_label TEXT,
    UNIQUE(store_id, store_listing_id, captured_at)
);
"#;

/// Initializes the database schema
///
/// Safe to call on an existing database; every statement is `IF NOT EXISTS`.
pub fn initialize_schema(conn: &rusqlite::Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(SCHEMA_SQL)?;
    Ok(())
}
