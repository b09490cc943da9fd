//! VTEX catalog collaborator
//!
//! Talks to the public `catalog_system` API that VTEX storefronts expose:
//! - `GET /api/catalog_system/pub/category/tree/{depth}` for the taxonomy
//! - `GET /api/catalog_system/pub/products/search/{path}` for listing windows
//! - `GET /api/catalog_system/pub/facets/search/{path}` for brand facets

use crate::catalog::{resolve_listing_url, Facet, Partition, TaxonomyNode};
use crate::config::Config;
use crate::crawler::{
    FacetSource, FacetValue, ListingSource, NormalizeError, RawEntry, RecordNormalizer,
    SourceError, TaxonomySource,
};
use crate::record::{price_from_json, Record, SecondaryIdentity};
use crate::UrlError;
use async_trait::async_trait;
use bigdecimal::BigDecimal;
use reqwest::header::ACCEPT;
use reqwest::Client;
use serde_json::{json, Map, Value};
use url::Url;

const CATEGORY_TREE: &str = "/api/catalog_system/pub/category/tree";
const PRODUCT_SEARCH: &str = "/api/catalog_system/pub/products/search";
const FACET_SEARCH: &str = "/api/catalog_system/pub/facets/search";

/// `referenceId` keys that carry a barcode
const EAN_REFERENCE_KEYS: &[&str] = &["EAN", "EAN13", "COD_EAN", "COD.EAN"];

const OFFER_LABEL: &str = "Oferta";

/// HTTP client for one VTEX storefront
#[derive(Debug, Clone)]
pub struct VtexClient {
    client: Client,
    base_url: Url,
    tree_depth: u32,
    /// Sales channel used when a partition does not select one
    default_channel: Option<String>,
}

impl VtexClient {
    pub fn new(client: Client, base_url: Url, tree_depth: u32, default_channel: Option<String>) -> Self {
        Self {
            client,
            base_url,
            tree_depth,
            default_channel,
        }
    }

    /// Builds a client for the store and primary sales channel in `config`
    pub fn from_config(client: Client, config: &Config) -> Result<Self, UrlError> {
        let base_url =
            Url::parse(&config.store.base_url).map_err(|e| UrlError::Parse(e.to_string()))?;
        Ok(Self::new(
            client,
            base_url,
            config.store.tree_depth,
            config.split.sales_channels.first().cloned(),
        ))
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// `{base}{endpoint}/{segments...}` with the segments kept as given
    fn endpoint(&self, endpoint: &str, segments: &[String]) -> Url {
        let mut url = self.base_url.clone();
        let mut path = endpoint.to_string();
        for segment in segments {
            path.push('/');
            path.push_str(segment);
        }
        url.set_path(&path);
        url.set_query(None);
        url.set_fragment(None);
        url
    }

    /// Adds `map=c,c,...` for a category path
    fn category_map(url: &mut Url, path: &[String]) {
        if !path.is_empty() {
            url.query_pairs_mut()
                .append_pair("map", &vec!["c"; path.len()].join(","));
        }
    }

    async fn get_json(&self, url: Url) -> Result<Value, SourceError> {
        tracing::debug!("GET {}", url);
        let response = self
            .client
            .get(url)
            .header(ACCEPT, "application/json")
            .send()
            .await?;

        // search windows past the first page come back as 206
        let status = response.status();
        if !status.is_success() {
            return Err(SourceError::Status(status.as_u16()));
        }

        let body = response.text().await?;
        serde_json::from_str(&body).map_err(|e| SourceError::Decode(e.to_string()))
    }
}

#[async_trait]
impl TaxonomySource for VtexClient {
    async fn load_taxonomy(&self) -> Result<Vec<TaxonomyNode>, SourceError> {
        let url = self.endpoint(CATEGORY_TREE, &[self.tree_depth.to_string()]);
        let tree = self.get_json(url).await?;
        let roots = tree
            .as_array()
            .ok_or_else(|| SourceError::Decode("category tree is not an array".to_string()))?;

        let nodes: Vec<TaxonomyNode> = roots.iter().map(taxonomy_node).collect();
        tracing::info!("Loaded {} top-level categories", nodes.len());
        Ok(nodes)
    }
}

#[async_trait]
impl ListingSource for VtexClient {
    async fn fetch_window(
        &self,
        partition: &Partition,
        from: u32,
        to: u32,
    ) -> Result<Vec<RawEntry>, SourceError> {
        let mut url = self.endpoint(PRODUCT_SEARCH, &partition.path);
        Self::category_map(&mut url, &partition.path);
        {
            let mut query = url.query_pairs_mut();
            query
                .append_pair("_from", &from.to_string())
                .append_pair("_to", &to.to_string());

            for facet in partition.filters() {
                if matches!(facet, Facet::SalesChannel(_)) {
                    continue;
                }
                let (key, value) = facet.query_param();
                query.append_pair(key, &value);
            }

            let channel = partition
                .sales_channel()
                .map(String::from)
                .or_else(|| self.default_channel.clone());
            if let Some(channel) = channel {
                query.append_pair("sc", &channel);
            }
        }

        let body = self.get_json(url).await?;
        let products = body
            .as_array()
            .ok_or_else(|| SourceError::Decode("search response is not an array".to_string()))?;

        Ok(products
            .iter()
            .flat_map(|product| item_entries(product, &partition.path))
            .collect())
    }
}

#[async_trait]
impl FacetSource for VtexClient {
    async fn brands(&self, partition: &Partition) -> Result<Vec<FacetValue>, SourceError> {
        let mut url = self.endpoint(FACET_SEARCH, &partition.path);
        Self::category_map(&mut url, &partition.path);

        let body = self.get_json(url).await?;
        let brands = body
            .get("Brands")
            .and_then(Value::as_array)
            .map(|brands| {
                brands
                    .iter()
                    .filter_map(|brand| {
                        let value = json_text(brand.get("Id")?)?;
                        Some(FacetValue {
                            value,
                            count: brand.get("Quantity").and_then(Value::as_u64),
                        })
                    })
                    .collect()
            })
            .unwrap_or_default();

        Ok(brands)
    }
}

fn taxonomy_node(value: &Value) -> TaxonomyNode {
    let path = value
        .get("url")
        .and_then(Value::as_str)
        .map(path_segments)
        .unwrap_or_default();
    let name = value
        .get("name")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .trim()
        .to_string();
    let children = value
        .get("children")
        .and_then(Value::as_array)
        .map(|children| children.iter().map(taxonomy_node).collect())
        .unwrap_or_default();

    TaxonomyNode {
        path,
        name,
        children,
    }
}

/// Lowercased path segments of a category link, absolute or relative
fn path_segments(link: &str) -> Vec<String> {
    let path = match Url::parse(link) {
        Ok(url) => url.path().to_string(),
        Err(_) => link.split(['?', '#']).next().unwrap_or_default().to_string(),
    };
    path.split('/')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_lowercase)
        .collect()
}

/// One raw entry per SKU item of a product
fn item_entries(product: &Value, path: &[String]) -> Vec<RawEntry> {
    let mut product = product.clone();
    let items = match product.as_object_mut().and_then(|p| p.remove("items")) {
        Some(Value::Array(items)) => items,
        _ => return Vec::new(),
    };

    items
        .into_iter()
        .map(|item| RawEntry {
            payload: json!({ "product": product, "item": item }),
            path: path.to_vec(),
        })
        .collect()
}

/// Turns VTEX search items into records
#[derive(Debug, Clone)]
pub struct VtexNormalizer {
    base_url: Url,
}

impl VtexNormalizer {
    pub fn new(base_url: Url) -> Self {
        Self { base_url }
    }

    fn listing_url(&self, product: &Map<String, Value>) -> String {
        let href = match text(product, "linkText") {
            Some(slug) => format!("/{}/p", slug),
            None => match text(product, "link") {
                Some(link) => link,
                None => return String::new(),
            },
        };
        resolve_listing_url(&self.base_url, &href)
            .map(|url| url.to_string())
            .unwrap_or(href)
    }
}

impl RecordNormalizer for VtexNormalizer {
    fn normalize(&self, entry: &RawEntry) -> Result<Record, NormalizeError> {
        let product = entry
            .payload
            .get("product")
            .and_then(Value::as_object)
            .ok_or_else(|| NormalizeError::Shape("entry has no product object".to_string()))?;
        let item = entry
            .payload
            .get("item")
            .and_then(Value::as_object)
            .ok_or_else(|| NormalizeError::Shape("entry has no item object".to_string()))?;

        let (list_price, offer_price) = commercial_prices(item);
        let offer_label = match (&list_price, &offer_price) {
            (Some(list), Some(offer)) if offer < list => Some(OFFER_LABEL.to_string()),
            _ => None,
        };

        let (category, subcategory) = categories(product, &entry.path);
        let name = text(product, "productName");
        let brand = text(product, "brand");

        Ok(Record {
            primary_identity: ean(item),
            manufacturer: text(product, "Manufacturer").or_else(|| brand.clone()),
            secondary_identity: SecondaryIdentity {
                name: name.clone(),
                brand,
            },
            store_sku: text(item, "itemId"),
            store_record_id: text(product, "productReference").or_else(|| text(product, "productId")),
            category,
            subcategory,
            list_price,
            offer_price,
            offer_label,
            url: self.listing_url(product),
            listing_name: text(item, "nameComplete").or(name),
        })
    }
}

/// Non-empty trimmed text of a string or number field
fn text(object: &Map<String, Value>, key: &str) -> Option<String> {
    object.get(key).and_then(json_text)
}

fn json_text(value: &Value) -> Option<String> {
    let text = match value {
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => n.to_string(),
        Value::Array(values) => return values.first().and_then(json_text),
        _ => return None,
    };
    Some(text).filter(|t| !t.is_empty())
}

fn ean(item: &Map<String, Value>) -> Option<String> {
    if let Some(ean) = text(item, "ean") {
        return Some(ean);
    }

    item.get("referenceId")
        .and_then(Value::as_array)?
        .iter()
        .filter_map(Value::as_object)
        .find(|reference| {
            reference
                .get("Key")
                .and_then(Value::as_str)
                .map(|key| {
                    EAN_REFERENCE_KEYS
                        .iter()
                        .any(|k| k.eq_ignore_ascii_case(key.trim()))
                })
                .unwrap_or(false)
        })
        .and_then(|reference| text(reference, "Value"))
}

/// List and offer price of the first seller; zero means unavailable
fn commercial_prices(item: &Map<String, Value>) -> (Option<BigDecimal>, Option<BigDecimal>) {
    let offer = item
        .get("sellers")
        .and_then(Value::as_array)
        .and_then(|sellers| sellers.first())
        .and_then(|seller| seller.get("commertialOffer"));

    let price = |key: &str| {
        offer
            .and_then(|o| o.get(key))
            .and_then(price_from_json)
            .filter(|p| *p > BigDecimal::from(0))
    };

    (price("ListPrice"), price("Price"))
}

/// First two segments of the product's first category path, else the partition path
fn categories(product: &Map<String, Value>, path: &[String]) -> (Option<String>, Option<String>) {
    let from_product: Option<Vec<String>> = product
        .get("categories")
        .and_then(Value::as_array)
        .and_then(|c| c.first())
        .and_then(Value::as_str)
        .map(|full| {
            full.split('/')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect()
        });

    let segments = match from_product {
        Some(segments) if !segments.is_empty() => segments,
        _ => path.to_vec(),
    };
    (segments.first().cloned(), segments.get(1).cloned())
}
