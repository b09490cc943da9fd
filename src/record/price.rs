//! Price parsing and formatting
//!
//! Catalog prices arrive as JSON numbers or as locale-formatted strings.
//! Anything that cannot be read as a finite, plausible amount becomes
//! `None`; a price is never coerced to zero.

use bigdecimal::BigDecimal;
use serde_json::Value;
use std::str::FromStr;

/// Largest magnitude accepted as a real price
pub const MAX_PRICE: i64 = 999_999_999;

/// Parses a price from free text
///
/// Currency symbols and whitespace are dropped. When both `.` and `,` are
/// present the dot is the thousands separator (`"1.234,56"`); a lone comma is
/// the decimal separator (`"1,5"`).
///
/// # Examples
///
/// ```
/// use shelf_ripple::record::parse_price;
///
/// assert_eq!(parse_price("$ 1.234,56").unwrap().to_string(), "1234.56");
/// assert!(parse_price("n/a").is_none());
/// ```
pub fn parse_price(text: &str) -> Option<BigDecimal> {
    let cleaned: String = text
        .trim()
        .chars()
        .filter(|c| c.is_ascii_digit() || matches!(c, ',' | '.' | '-'))
        .collect();

    if cleaned.is_empty() {
        return None;
    }

    let normalized = if cleaned.contains(',') && cleaned.contains('.') {
        cleaned.replace('.', "").replace(',', ".")
    } else if cleaned.contains(',') {
        cleaned.replace(',', ".")
    } else {
        cleaned
    };

    BigDecimal::from_str(&normalized).ok().and_then(bounded)
}

/// Converts a float into a price, rejecting NaN and infinities
pub fn price_from_f64(value: f64) -> Option<BigDecimal> {
    if !value.is_finite() {
        return None;
    }
    // Display for f64 never switches to exponent notation
    BigDecimal::from_str(&value.to_string()).ok().and_then(bounded)
}

/// Reads a price out of a JSON value (number or string)
pub fn price_from_json(value: &Value) -> Option<BigDecimal> {
    match value {
        Value::Number(n) => n.as_f64().and_then(price_from_f64),
        Value::String(s) => parse_price(s),
        _ => None,
    }
}

/// Formats a price as text with two decimals
pub fn format_price(value: &BigDecimal) -> String {
    value.round(2).with_scale(2).to_string()
}

fn bounded(value: BigDecimal) -> Option<BigDecimal> {
    if value.abs() > BigDecimal::from(MAX_PRICE) {
        None
    } else {
        Some(value)
    }
}
