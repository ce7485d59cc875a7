use serde::{Deserialize, Serialize};

/// One hit from a symbol search, already normalised away from the provider's shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchResult {
    pub symbol: String,
    pub name: String,
    pub currency: String,
    pub exchange: String,
}

/// Canonical quote record consumed by the watchlist and detail views.
///
/// `pe` and `eps` stay `None` when the provider does not report them; zero is a
/// legitimate value for both and must not be used as a placeholder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Quote {
    pub symbol: String,
    pub name: String,
    pub price: f64,
    pub change: f64,
    pub change_percent: f64,
    pub day_low: f64,
    pub day_high: f64,
    pub year_low: f64,
    pub year_high: f64,
    pub market_cap: f64,
    pub volume: f64,
    pub avg_volume: f64,
    pub open: f64,
    pub previous_close: f64,
    pub pe: Option<f64>,
    pub eps: Option<f64>,
    pub exchange: String,
    /// Provider timestamp in epoch seconds.
    pub timestamp: i64,
}

/// Persisted watchlist membership record. `symbol` is the primary key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WatchlistItem {
    pub symbol: String,
    #[serde(default)]
    pub name: String,
    /// Epoch milliseconds at which the symbol was added.
    #[serde(default)]
    pub added_at: i64,
}

impl WatchlistItem {
    pub fn new(symbol: impl Into<String>, name: impl Into<String>, added_at: i64) -> Self {
        Self {
            symbol: symbol.into(),
            name: name.into(),
            added_at,
        }
    }
}
