use std::sync::Arc;

use async_trait::async_trait;

use crate::error::Result;
use crate::models::{Quote, SearchResult};

/// Remote source of search hits and quotes.
#[async_trait]
pub trait QuoteProvider: Send + Sync {
    /// Symbol and name search, merged and deduplicated by symbol, at most `limit` hits.
    async fn search_symbol(&self, query: &str, limit: usize) -> Result<Vec<SearchResult>>;
    /// `None` when the provider knows nothing about `symbol`.
    async fn get_quote(&self, symbol: &str) -> Result<Option<Quote>>;
    async fn get_batch_quotes(&self, symbols: &[String]) -> Result<Vec<Quote>>;
}

pub type SharedProvider = Arc<dyn QuoteProvider>;
