//! Site collaborators
//!
//! Each supported storefront platform provides its taxonomy, listing and
//! facet sources plus a [`RecordNormalizer`](crate::crawler::RecordNormalizer).

mod vtex;

pub use vtex::{VtexClient, VtexNormalizer};

use crate::config::Config;
use crate::crawler::{build_http_client, CatalogSources};
use crate::Result;
use std::sync::Arc;

/// Wires the VTEX collaborators for the store in `config`
pub fn vtex_sources(config: &Config) -> Result<CatalogSources> {
    let http = build_http_client(&config.http)?;
    let client = Arc::new(VtexClient::from_config(http, config)?);
    let normalizer = Arc::new(VtexNormalizer::new(client.base_url().clone()));

    Ok(CatalogSources {
        taxonomy: client.clone(),
        listing: client.clone(),
        facets: Some(client),
        normalizer,
    })
}
