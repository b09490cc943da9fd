//! Canonical catalog records
//!
//! A [`Record`] is one observation of a product at a store, independent of
//! the site it was scraped from. Normalizers produce records; the crawler
//! deduplicates them and the ingestion writer persists them.

mod price;

pub use price::{format_price, parse_price, price_from_f64, price_from_json, MAX_PRICE};

use crate::catalog::normalize_url;
use bigdecimal::BigDecimal;

/// Store-independent fallback identity of a product
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SecondaryIdentity {
    pub name: Option<String>,
    pub brand: Option<String>,
}

/// One (product, store) observation candidate
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Record {
    /// Global product identity such as an EAN barcode
    pub primary_identity: Option<String>,
    pub secondary_identity: SecondaryIdentity,
    pub manufacturer: Option<String>,
    pub store_sku: Option<String>,
    pub store_record_id: Option<String>,
    pub category: Option<String>,
    pub subcategory: Option<String>,
    pub list_price: Option<BigDecimal>,
    pub offer_price: Option<BigDecimal>,
    pub offer_label: Option<String>,
    pub url: String,
    pub listing_name: Option<String>,
}

impl Record {
    /// Key used by the crawler's seen set
    ///
    /// Preference order: primary identity, store SKU, store record id, then
    /// the normalized listing URL. Returns `None` when the record carries
    /// nothing usable at all.
    pub fn dedup_key(&self) -> Option<String> {
        if let Some(pid) = non_blank(&self.primary_identity) {
            return Some(format!("pid:{}", pid));
        }
        if let Some(sku) = non_blank(&self.store_sku) {
            return Some(format!("sku:{}", sku));
        }
        if let Some(rid) = non_blank(&self.store_record_id) {
            return Some(format!("rid:{}", rid));
        }
        self.synthetic_key()
    }

    /// URL-derived key for records lacking every natural identity
    pub fn synthetic_key(&self) -> Option<String> {
        let url = self.url.trim();
        if url.is_empty() {
            return None;
        }
        let normalized = normalize_url(url)
            .map(|u| u.to_string())
            .unwrap_or_else(|_| url.to_string());
        Some(format!("url:{}", normalized))
    }

    /// Human-readable natural keys, for log lines about this record
    pub fn natural_keys(&self) -> String {
        format!(
            "primary={} sku={} record_id={} url={}",
            self.primary_identity.as_deref().unwrap_or("-"),
            self.store_sku.as_deref().unwrap_or("-"),
            self.store_record_id.as_deref().unwrap_or("-"),
            self.url
        )
    }
}

/// Returns the trimmed value if it is present and not blank
pub(crate) fn non_blank(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|s| !s.is_empty())
}
