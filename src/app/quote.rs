use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::cache::{CacheEntry, CancelSignal, QueryCache, QueryKey, QueryOptions, Subscription};
use crate::config::Config;
use crate::error::{AppError, ErrorInfo, Result};
use crate::fetch::SharedProvider;
use crate::models::Quote;

pub const QUOTE_ROOT: &str = "quote";

pub fn quote_key(symbol: &str) -> QueryKey {
    QueryKey::new(QUOTE_ROOT).with(symbol)
}

/// Detail view of one symbol.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QuoteView {
    pub symbol: String,
    /// `None` when the provider does not know the symbol or nothing arrived yet.
    pub quote: Option<Quote>,
    pub is_loading: bool,
    pub is_refreshing: bool,
    pub error: Option<ErrorInfo>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl QuoteView {
    pub fn from_entry(symbol: &str, entry: &CacheEntry<Option<Quote>>) -> Self {
        Self {
            symbol: symbol.to_string(),
            quote: entry.value.clone().flatten(),
            is_loading: entry.is_loading(),
            is_refreshing: entry.is_refreshing(),
            error: if entry.is_error() {
                entry.error.clone()
            } else {
                None
            },
            updated_at: entry.updated_at,
        }
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

/// Single-symbol quote queries keyed `["quote", symbol]`.
#[derive(Clone)]
pub struct QuoteCoordinator {
    cache: QueryCache,
    provider: SharedProvider,
    options: QueryOptions,
}

impl QuoteCoordinator {
    pub fn new(cache: QueryCache, provider: SharedProvider, config: &Config) -> Self {
        Self {
            cache,
            provider,
            options: config.quote_options(),
        }
    }

    /// Observe `symbol`; refetch through [`Subscription::refetch`].
    pub fn watch(&self, symbol: &str) -> Result<Subscription<Option<Quote>>> {
        let symbol = symbol.trim().to_string();
        if symbol.is_empty() {
            return Err(AppError::message("symbol must not be empty"));
        }

        let provider = self.provider.clone();
        let requested = symbol.clone();
        let fetch = move |signal: CancelSignal| {
            let provider = provider.clone();
            let symbol = requested.clone();
            async move {
                tokio::select! {
                    biased;
                    _ = signal.cancelled() => Err(AppError::Cancelled),
                    quote = provider.get_quote(&symbol) => quote,
                }
            }
        };

        self.cache
            .subscribe(quote_key(&symbol), fetch, self.options.clone())
    }

    /// Subscribe, wait for the fetch to settle and return the view.
    pub async fn load(&self, symbol: &str) -> Result<QuoteView> {
        let mut subscription = self.watch(symbol)?;
        let entry = subscription.settled().await;
        Ok(QuoteView::from_entry(symbol.trim(), &entry))
    }
}
