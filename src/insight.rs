//! One-line takeaways for the quote detail view.

use serde::Serialize;

use crate::models::Quote;
use crate::utils::{format_epoch_secs, format_market_cap, format_volume, signed};

const NEAR_HIGH_PCT: f64 = 90.0;
const NEAR_LOW_PCT: f64 = 10.0;
const UNUSUAL_VOLUME_RATIO: f64 = 1.5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum InsightKind {
    NearYearHigh,
    NearYearLow,
    UnusualVolume,
    RangePosition,
    MarketData,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Insight {
    pub kind: InsightKind,
    pub title: String,
    pub description: String,
}

/// Position of `price` inside the 52-week range, in percent. `None` for an empty range.
pub fn range_position(quote: &Quote) -> Option<f64> {
    let range = quote.year_high - quote.year_low;
    (range > 0.0).then(|| (quote.price - quote.year_low) / range * 100.0)
}

pub fn compute(quote: &Quote) -> Insight {
    let Some(position) = range_position(quote) else {
        return Insight {
            kind: InsightKind::MarketData,
            title: "Market Data".to_string(),
            description: format!(
                "Last price ${:.2}, {} on the day.",
                quote.price,
                signed_dollars(quote.change)
            ),
        };
    };

    let bounds = format!("${:.2} to ${:.2}", quote.year_low, quote.year_high);

    if position > NEAR_HIGH_PCT {
        return Insight {
            kind: InsightKind::NearYearHigh,
            title: "Near 52-Week High".to_string(),
            description: format!(
                "At {position:.0}% of its 52-week range ({bounds}); close to the yearly high."
            ),
        };
    }

    if position < NEAR_LOW_PCT {
        return Insight {
            kind: InsightKind::NearYearLow,
            title: "Near 52-Week Low".to_string(),
            description: format!(
                "At {position:.0}% of its 52-week range ({bounds}); close to the yearly low."
            ),
        };
    }

    if quote.avg_volume > 0.0 {
        let ratio = quote.volume / quote.avg_volume;
        if ratio > UNUSUAL_VOLUME_RATIO {
            return Insight {
                kind: InsightKind::UnusualVolume,
                title: "Unusual Volume".to_string(),
                description: format!(
                    "Volume of {} is {ratio:.1}x the {} average.",
                    format_volume(quote.volume),
                    format_volume(quote.avg_volume)
                ),
            };
        }
    }

    Insight {
        kind: InsightKind::RangePosition,
        title: "52-Week Range Position".to_string(),
        description: format!(
            "At {position:.0}% of its 52-week range ({bounds}). Day change {} ({}%).",
            signed_dollars(quote.change),
            signed(quote.change_percent, 2)
        ),
    }
}

/// Display strings for the detail stats grid.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyStats {
    pub price: String,
    pub change: String,
    pub market_cap: String,
    pub pe: String,
    pub year_range: String,
    pub day_range: String,
    pub volume: String,
    pub avg_volume: String,
    pub as_of: String,
}

pub fn key_stats(quote: &Quote) -> KeyStats {
    KeyStats {
        price: format!("${:.2}", quote.price),
        change: format!(
            "{} ({}%)",
            signed_dollars(quote.change),
            signed(quote.change_percent, 2)
        ),
        market_cap: format_market_cap(quote.market_cap),
        pe: quote
            .pe
            .map_or_else(|| "N/A".to_string(), |pe| format!("{pe:.2}")),
        year_range: format!("${:.2} - ${:.2}", quote.year_low, quote.year_high),
        day_range: format!("${:.2} - ${:.2}", quote.day_low, quote.day_high),
        volume: format_volume(quote.volume),
        avg_volume: format_volume(quote.avg_volume),
        as_of: format_epoch_secs(quote.timestamp),
    }
}

fn signed_dollars(value: f64) -> String {
    if value >= 0.0 {
        format!("+${:.2}", value)
    } else {
        format!("-${:.2}", value.abs())
    }
}
