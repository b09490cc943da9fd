//! Listing URL normalization
//!
//! Listing URLs double as the identity of last resort, so two spellings of
//! the same product page must normalize to the same string.

use crate::UrlError;
use url::Url;

/// Query parameters that never identify a product
const TRACKING_PARAMS: &[&str] = &["fbclid", "gclid", "mc_eid", "srsltid", "_gl"];

/// Normalizes a listing URL
///
/// The scheme is forced to `https`, the host is lowercased and loses its
/// `www.` prefix, dot segments and repeated or trailing slashes are removed,
/// the fragment and tracking parameters are dropped and the remaining query
/// parameters are sorted by key.
///
/// # Examples
///
/// ```
/// use shelf_ripple::catalog::normalize_url;
///
/// let url = normalize_url("http://WWW.Tienda.com/gaseosa-cola/p/?utm_source=x").unwrap();
/// assert_eq!(url.as_str(), "https://tienda.com/gaseosa-cola/p");
/// ```
pub fn normalize_url(url_str: &str) -> Result<Url, UrlError> {
    let mut url = Url::parse(url_str.trim()).map_err(|e| UrlError::Parse(e.to_string()))?;

    match url.scheme() {
        "http" | "https" => {}
        other => return Err(UrlError::InvalidScheme(other.to_string())),
    }

    let host = url
        .host_str()
        .map(|h| h.to_lowercase())
        .ok_or(UrlError::MissingDomain)?;
    let host = host.strip_prefix("www.").unwrap_or(&host).to_string();
    url.set_host(Some(&host))
        .map_err(|e| UrlError::Parse(e.to_string()))?;

    // http -> https never fails for special schemes
    let _ = url.set_scheme("https");

    let path = collapse_path(url.path());
    url.set_path(&path);
    url.set_fragment(None);

    let mut params: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(key, _)| !is_tracking_param(key))
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    params.sort();

    if params.is_empty() {
        url.set_query(None);
    } else {
        url.query_pairs_mut().clear().extend_pairs(params);
    }

    Ok(url)
}

/// Resolves a possibly relative listing link against the store base URL
pub fn resolve_listing_url(base: &Url, href: &str) -> Result<Url, UrlError> {
    base.join(href.trim())
        .map_err(|e| UrlError::Parse(format!("{}: {}", href, e)))
}

fn collapse_path(path: &str) -> String {
    let mut segments: Vec<&str> = Vec::new();
    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop();
            }
            s => segments.push(s),
        }
    }
    format!("/{}", segments.join("/"))
}

fn is_tracking_param(key: &str) -> bool {
    key.starts_with("utm_") || TRACKING_PARAMS.contains(&key)
}
