//! Provider records into domain records.
//!
//! Every raw field is optional and decoded leniently: a number may arrive as a
//! JSON string, and anything of the wrong shape decodes as absent. Defaults are
//! applied once here so the rest of the crate never sees provider quirks.

use serde::{Deserialize, Deserializer};
use serde_json::Value;

use crate::models::{Quote, SearchResult};
use crate::utils::now_secs;

const DEFAULT_CURRENCY: &str = "USD";

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct RawSearchHit {
    #[serde(deserialize_with = "lenient_string")]
    symbol: Option<String>,
    #[serde(deserialize_with = "lenient_string")]
    name: Option<String>,
    #[serde(deserialize_with = "lenient_string")]
    currency: Option<String>,
    #[serde(deserialize_with = "lenient_string")]
    exchange_short_name: Option<String>,
    #[serde(deserialize_with = "lenient_string")]
    exchange: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct RawQuote {
    #[serde(deserialize_with = "lenient_string")]
    symbol: Option<String>,
    #[serde(deserialize_with = "lenient_string")]
    name: Option<String>,
    #[serde(deserialize_with = "lenient_f64")]
    price: Option<f64>,
    #[serde(deserialize_with = "lenient_f64")]
    change: Option<f64>,
    #[serde(deserialize_with = "lenient_f64", alias = "changePercentage")]
    changes_percentage: Option<f64>,
    #[serde(deserialize_with = "lenient_f64")]
    day_low: Option<f64>,
    #[serde(deserialize_with = "lenient_f64")]
    day_high: Option<f64>,
    #[serde(deserialize_with = "lenient_f64")]
    year_low: Option<f64>,
    #[serde(deserialize_with = "lenient_f64")]
    year_high: Option<f64>,
    #[serde(deserialize_with = "lenient_f64")]
    market_cap: Option<f64>,
    #[serde(deserialize_with = "lenient_f64")]
    volume: Option<f64>,
    #[serde(deserialize_with = "lenient_f64")]
    avg_volume: Option<f64>,
    #[serde(deserialize_with = "lenient_f64")]
    open: Option<f64>,
    #[serde(deserialize_with = "lenient_f64")]
    previous_close: Option<f64>,
    #[serde(deserialize_with = "lenient_f64")]
    pe: Option<f64>,
    #[serde(deserialize_with = "lenient_f64")]
    eps: Option<f64>,
    #[serde(deserialize_with = "lenient_string")]
    exchange: Option<String>,
    #[serde(deserialize_with = "lenient_i64")]
    timestamp: Option<i64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct RawProfile {
    #[serde(deserialize_with = "lenient_string")]
    symbol: Option<String>,
    #[serde(deserialize_with = "lenient_string")]
    company_name: Option<String>,
    #[serde(deserialize_with = "lenient_f64")]
    price: Option<f64>,
    #[serde(deserialize_with = "lenient_f64")]
    change: Option<f64>,
    #[serde(deserialize_with = "lenient_f64")]
    change_percentage: Option<f64>,
    #[serde(deserialize_with = "lenient_f64")]
    volume: Option<f64>,
    #[serde(deserialize_with = "lenient_f64")]
    average_volume: Option<f64>,
    #[serde(deserialize_with = "lenient_f64")]
    market_cap: Option<f64>,
    #[serde(deserialize_with = "lenient_string")]
    range: Option<String>,
    #[serde(deserialize_with = "lenient_string")]
    exchange: Option<String>,
}

fn decode<T: Default + for<'de> Deserialize<'de>>(raw: &Value) -> T {
    if raw.is_object() {
        T::deserialize(raw).unwrap_or_default()
    } else {
        T::default()
    }
}

fn map_array<T>(raw: &Value, map: impl Fn(&Value) -> T) -> Vec<T> {
    raw.as_array()
        .map(|records| records.iter().map(map).collect())
        .unwrap_or_default()
}

pub fn map_search_result(raw: &Value) -> SearchResult {
    let hit: RawSearchHit = decode(raw);
    SearchResult {
        symbol: hit.symbol.unwrap_or_default(),
        name: hit.name.unwrap_or_default(),
        currency: hit.currency.unwrap_or_else(|| DEFAULT_CURRENCY.to_string()),
        exchange: hit.exchange_short_name.or(hit.exchange).unwrap_or_default(),
    }
}

pub fn map_search_results(raw: &Value) -> Vec<SearchResult> {
    map_array(raw, map_search_result)
}

pub fn map_quote(raw: &Value) -> Quote {
    let quote: RawQuote = decode(raw);
    Quote {
        symbol: quote.symbol.unwrap_or_default(),
        name: quote.name.unwrap_or_default(),
        price: quote.price.unwrap_or_default(),
        change: quote.change.unwrap_or_default(),
        change_percent: quote.changes_percentage.unwrap_or_default(),
        day_low: quote.day_low.unwrap_or_default(),
        day_high: quote.day_high.unwrap_or_default(),
        year_low: quote.year_low.unwrap_or_default(),
        year_high: quote.year_high.unwrap_or_default(),
        market_cap: quote.market_cap.unwrap_or_default(),
        volume: quote.volume.unwrap_or_default(),
        avg_volume: quote.avg_volume.unwrap_or_default(),
        open: quote.open.unwrap_or_default(),
        previous_close: quote.previous_close.unwrap_or_default(),
        pe: quote.pe,
        eps: quote.eps,
        exchange: quote.exchange.unwrap_or_default(),
        timestamp: quote.timestamp.unwrap_or_else(now_secs),
    }
}

pub fn map_quotes(raw: &Value) -> Vec<Quote> {
    map_array(raw, map_quote)
}

/// Profiles carry no day range, open, previous close or ratios.
pub fn map_profile(raw: &Value) -> Quote {
    let profile: RawProfile = decode(raw);
    let (year_low, year_high) = profile
        .range
        .as_deref()
        .and_then(parse_range)
        .unwrap_or_default();

    Quote {
        symbol: profile.symbol.unwrap_or_default(),
        name: profile.company_name.unwrap_or_default(),
        price: profile.price.unwrap_or_default(),
        change: profile.change.unwrap_or_default(),
        change_percent: profile.change_percentage.unwrap_or_default(),
        day_low: 0.0,
        day_high: 0.0,
        year_low,
        year_high,
        market_cap: profile.market_cap.unwrap_or_default(),
        volume: profile.volume.unwrap_or_default(),
        avg_volume: profile.average_volume.unwrap_or_default(),
        open: 0.0,
        previous_close: 0.0,
        pe: None,
        eps: None,
        exchange: profile.exchange.unwrap_or_default(),
        timestamp: now_secs(),
    }
}

pub fn map_profiles(raw: &Value) -> Vec<Quote> {
    map_array(raw, map_profile)
}

/// Parse a `"low-high"` 52-week range such as `"96.43-160.27"`.
pub fn parse_range(range: &str) -> Option<(f64, f64)> {
    let (low, high) = range.trim().split_once('-')?;
    let low = low.trim().parse::<f64>().ok()?;
    let high = high.trim().parse::<f64>().ok()?;
    Some((low, high))
}

fn lenient_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<Value>::deserialize(deserializer)? {
        Some(Value::String(s)) => Some(s),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}

fn lenient_f64<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<Value>::deserialize(deserializer)? {
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
    .filter(|value| value.is_finite()))
}

fn lenient_i64<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(lenient_f64(deserializer)?.map(|value| value as i64))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn empty_search_hit_gets_defaults() {
        let result = map_search_result(&json!({}));
        assert_eq!(
            result,
            SearchResult {
                symbol: String::new(),
                name: String::new(),
                currency: "USD".to_string(),
                exchange: String::new(),
            }
        );
        assert_eq!(map_search_result(&Value::Null).currency, "USD");
    }

    #[test]
    fn search_hit_prefers_short_exchange_name() {
        let result = map_search_result(&json!({
            "symbol": "AAPL",
            "name": "Apple Inc.",
            "currency": "USD",
            "exchangeShortName": "NASDAQ",
            "exchange": "NASDAQ Global Select"
        }));
        assert_eq!(result.exchange, "NASDAQ");

        let fallback = map_search_result(&json!({ "symbol": "AAPL", "exchange": "NASDAQ" }));
        assert_eq!(fallback.exchange, "NASDAQ");
    }

    #[test]
    fn non_array_inputs_yield_empty_lists() {
        assert!(map_search_results(&json!({ "symbol": "AAPL" })).is_empty());
        assert!(map_quotes(&Value::Null).is_empty());
        assert!(map_profiles(&json!("oops")).is_empty());
    }

    #[test]
    fn missing_pe_stays_absent_while_zero_is_kept() {
        let quotes = map_quotes(&json!([
            { "symbol": "AAPL", "price": 190.5, "timestamp": 1_700_000_000 },
            { "symbol": "ZERO", "pe": 0, "eps": "0.0" }
        ]));

        assert_eq!(quotes[0].pe, None);
        assert_eq!(quotes[0].eps, None);
        assert_eq!(quotes[0].price, 190.5);
        assert_eq!(quotes[0].timestamp, 1_700_000_000);
        assert_eq!(quotes[1].pe, Some(0.0));
        assert_eq!(quotes[1].eps, Some(0.0));
        assert_eq!(quotes[1].volume, 0.0);
    }

    #[test]
    fn quote_without_timestamp_is_stamped_now() {
        let before = now_secs();
        let quote = map_quote(&json!({ "symbol": "MSFT" }));
        assert!(quote.timestamp >= before);
    }

    #[test]
    fn wrongly_typed_fields_fall_back_to_defaults() {
        let quote = map_quote(&json!({
            "symbol": "IBM",
            "price": "171.2",
            "volume": { "nested": true },
            "pe": null,
            "changesPercentage": 1.25
        }));
        assert_eq!(quote.price, 171.2);
        assert_eq!(quote.volume, 0.0);
        assert_eq!(quote.pe, None);
        assert_eq!(quote.change_percent, 1.25);
    }

    #[test]
    fn profile_range_fills_year_bounds() {
        let quote = map_profile(&json!({
            "symbol": "AAPL",
            "companyName": "Apple Inc.",
            "price": 150.0,
            "changePercentage": -0.5,
            "averageVolume": 52_000_000,
            "range": "96.43-160.27",
            "exchange": "NASDAQ"
        }));
        assert_eq!(quote.name, "Apple Inc.");
        assert_eq!(quote.year_low, 96.43);
        assert_eq!(quote.year_high, 160.27);
        assert_eq!(quote.avg_volume, 52_000_000.0);
        assert_eq!(quote.change_percent, -0.5);
        assert_eq!(quote.pe, None);

        let unparsed = map_profile(&json!({ "symbol": "X", "range": "n/a" }));
        assert_eq!((unparsed.year_low, unparsed.year_high), (0.0, 0.0));
    }
}
