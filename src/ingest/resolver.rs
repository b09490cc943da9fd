//! Entity resolution: Record -> Store, CatalogEntry, StoreListing, PriceSnapshot

use crate::record::{format_price, non_blank, Record};
use crate::storage::{
    ListingKey, ListingRecord, ListingRefresh, NewCatalogEntry, NewListing, PriceSnapshot, Storage,
    StorageResult,
};
use tracing::debug;

/// Run-wide values every record is resolved against
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolveContext {
    pub store_code: String,
    pub store_name: String,
    /// Timestamp shared by every snapshot of the run
    pub captured_at: String,
}

/// Result of writing one record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteOutcome {
    pub store_id: i64,
    pub catalog_entry_id: i64,
    pub listing_id: i64,
    /// The listing could only be keyed by its URL, or not at all
    pub low_confidence: bool,
}

/// Maps records onto stored entities, preferring update-in-place over new rows
///
/// Resolution never repoints an existing listing to another catalog entry:
/// once a natural key is bound to a product, later records carrying the same
/// key only fill in missing descriptive fields.
#[derive(Debug, Clone)]
pub struct EntityResolver {
    context: ResolveContext,
}

impl EntityResolver {
    pub fn new(context: ResolveContext) -> Self {
        Self { context }
    }

    /// Resolves one record and upserts its price snapshot
    ///
    /// All writes happen on `storage`; the caller owns transaction and
    /// savepoint boundaries.
    pub fn resolve_and_write<S: Storage + ?Sized>(
        &self,
        storage: &mut S,
        record: &Record,
    ) -> StorageResult<WriteOutcome> {
        let store_id = storage.upsert_store(&self.context.store_code, &self.context.store_name)?;

        let store_sku = non_blank(&record.store_sku);
        let store_record_id = non_blank(&record.store_record_id);
        let low_confidence = store_sku.is_none() && store_record_id.is_none();
        let synthetic_key = if low_confidence { record.synthetic_key() } else { None };

        let existing = find_existing_listing(
            storage,
            store_id,
            store_sku,
            store_record_id,
            synthetic_key.as_deref(),
        )?;

        let url = Some(record.url.trim()).filter(|u| !u.is_empty());
        let listing_name = non_blank(&record.listing_name);
        let catalog_entry_id = resolve_catalog_entry(storage, record, existing.as_ref())?;
        let listing_id = match existing {
            Some(listing) => {
                storage.refresh_listing(
                    listing.id,
                    &ListingRefresh {
                        store_sku,
                        store_record_id,
                        url,
                        listing_name,
                    },
                )?;
                listing.id
            }
            None => {
                let id = storage.insert_listing(&NewListing {
                    store_id,
                    catalog_entry_id,
                    store_sku: store_sku.map(String::from),
                    store_record_id: store_record_id.map(String::from),
                    synthetic_key,
                    url: url.map(String::from),
                    listing_name: listing_name.map(String::from),
                    low_confidence,
                })?;
                debug!("Created listing {} for {}", id, record.natural_keys());
                id
            }
        };

        storage.upsert_price_snapshot(&PriceSnapshot {
            store_id,
            store_listing_id: listing_id,
            captured_at: self.context.captured_at.clone(),
            list_price: record.list_price.as_ref().map(format_price),
            offer_price: record.offer_price.as_ref().map(format_price),
            offer_label: non_blank(&record.offer_label).map(String::from),
        })?;

        Ok(WriteOutcome {
            store_id,
            catalog_entry_id,
            listing_id,
            low_confidence,
        })
    }
}

/// Finds the listing a record's natural keys are bound to
///
/// The SKU is tried first, then the record id. A listing found by record id
/// that already carries another SKU belongs to a sibling item of the same
/// product and is not reused.
fn find_existing_listing<S: Storage + ?Sized>(
    storage: &S,
    store_id: i64,
    store_sku: Option<&str>,
    store_record_id: Option<&str>,
    synthetic_key: Option<&str>,
) -> StorageResult<Option<ListingRecord>> {
    if let Some(sku) = store_sku {
        if let Some(listing) = storage.find_listing(store_id, &ListingKey::Sku(sku.to_string()))? {
            return Ok(Some(listing));
        }
    }

    if let Some(rid) = store_record_id {
        let listing = storage.find_listing(store_id, &ListingKey::RecordId(rid.to_string()))?;
        return Ok(listing.filter(|l| store_sku.is_none() || l.store_sku.is_none()));
    }

    match synthetic_key {
        Some(key) => storage.find_listing(store_id, &ListingKey::Synthetic(key.to_string())),
        None => Ok(None),
    }
}

/// Finds or creates the catalog entry for a record
///
/// Order: primary identity (merge), then (name, brand) with a primary
/// identity backfill, then the entry of an already-bound listing, then insert.
fn resolve_catalog_entry<S: Storage + ?Sized>(
    storage: &mut S,
    record: &Record,
    existing_listing: Option<&ListingRecord>,
) -> StorageResult<i64> {
    let primary = non_blank(&record.primary_identity);
    let fields = NewCatalogEntry {
        primary_identity: primary.map(String::from),
        name: non_blank(&record.secondary_identity.name).map(String::from),
        brand: non_blank(&record.secondary_identity.brand).map(String::from),
        manufacturer: non_blank(&record.manufacturer).map(String::from),
        category: non_blank(&record.category).map(String::from),
        subcategory: non_blank(&record.subcategory).map(String::from),
    };

    if let Some(primary) = primary {
        if let Some(id) = storage.find_catalog_entry_by_primary(primary)? {
            storage.merge_catalog_entry(id, &fields)?;
            return Ok(id);
        }
    }

    if let Some(name) = fields.name.as_deref() {
        // an entry that already carries a different primary identity is another product
        let matched =
            storage.find_catalog_entry_by_secondary(name, fields.brand.as_deref(), primary.is_some())?;
        if let Some(id) = matched {
            if let Some(primary) = primary {
                storage.backfill_primary_identity(id, primary)?;
            }
            storage.merge_catalog_entry(id, &fields)?;
            return Ok(id);
        }
    }

    if let Some(listing) = existing_listing {
        storage.merge_catalog_entry(listing.catalog_entry_id, &fields)?;
        return Ok(listing.catalog_entry_id);
    }

    let id = storage.insert_catalog_entry(&fields)?;
    debug!("Created catalog entry {} for {}", id, record.natural_keys());
    Ok(id)
}
