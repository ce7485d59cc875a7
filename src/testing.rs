//! Scripted collaborators shared by unit tests.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures::future::BoxFuture;
use reqwest::Url;

use crate::error::{AppError, Result};
use crate::fetch::{HttpResponse, HttpTransport, QuoteProvider};
use crate::models::{Quote, SearchResult};

#[derive(Debug, Clone)]
pub(crate) enum StubReply {
    Json(String),
    Status(u16),
    Fail(String),
    Hang,
}

#[derive(Debug, Clone)]
struct Route {
    path: String,
    param: Option<(String, String)>,
    reply: StubReply,
}

/// Transport answering from a route table keyed by path and one optional query pair.
#[derive(Debug, Default)]
pub(crate) struct StubTransport {
    routes: Vec<Route>,
    calls: Mutex<Vec<Url>>,
}

impl StubTransport {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn route(mut self, path: &str, reply: StubReply) -> Self {
        self.routes.push(Route {
            path: path.to_string(),
            param: None,
            reply,
        });
        self
    }

    pub(crate) fn route_param(mut self, path: &str, key: &str, value: &str, reply: StubReply) -> Self {
        self.routes.push(Route {
            path: path.to_string(),
            param: Some((key.to_string(), value.to_string())),
            reply,
        });
        self
    }

    pub(crate) fn calls(&self) -> Vec<Url> {
        self.calls.lock().unwrap().clone()
    }

    pub(crate) fn paths(&self) -> Vec<String> {
        self.calls().iter().map(|url| url.path().to_string()).collect()
    }

    fn find(&self, url: &Url) -> Option<StubReply> {
        let matches_param = |route: &Route| match &route.param {
            None => true,
            Some((key, value)) => url
                .query_pairs()
                .any(|(k, v)| k == key.as_str() && v == value.as_str()),
        };

        // Routes with a query pair are more specific and win over bare paths.
        self.routes
            .iter()
            .filter(|route| url.path().ends_with(&route.path) && matches_param(route))
            .max_by_key(|route| route.param.is_some())
            .map(|route| route.reply.clone())
    }
}

impl HttpTransport for StubTransport {
    fn get<'a>(&'a self, url: &'a Url) -> BoxFuture<'a, Result<HttpResponse>> {
        self.calls.lock().unwrap().push(url.clone());
        let reply = self.find(url).unwrap_or(StubReply::Status(404));
        Box::pin(async move {
            match reply {
                StubReply::Json(body) => Ok(HttpResponse::ok_json(body)),
                StubReply::Status(status) => Ok(HttpResponse {
                    status,
                    body: String::new(),
                }),
                StubReply::Fail(message) => Err(AppError::Network(message)),
                StubReply::Hang => futures::future::pending().await,
            }
        })
    }
}

pub(crate) fn search_hit(symbol: &str, name: &str) -> SearchResult {
    SearchResult {
        symbol: symbol.to_string(),
        name: name.to_string(),
        currency: "USD".to_string(),
        exchange: "NASDAQ".to_string(),
    }
}

pub(crate) fn quote(symbol: &str, price: f64) -> Quote {
    Quote {
        symbol: symbol.to_string(),
        name: format!("{symbol} Corp"),
        price,
        change: 0.0,
        change_percent: 0.0,
        day_low: 0.0,
        day_high: 0.0,
        year_low: 0.0,
        year_high: 0.0,
        market_cap: 0.0,
        volume: 0.0,
        avg_volume: 0.0,
        open: 0.0,
        previous_close: 0.0,
        pe: None,
        eps: None,
        exchange: "NASDAQ".to_string(),
        timestamp: 1_700_000_000,
    }
}

/// In-memory provider with scripted answers, latency and call counters.
#[derive(Debug, Default)]
pub(crate) struct MockProvider {
    search_results: Mutex<HashMap<String, Vec<SearchResult>>>,
    search_error: Mutex<Option<String>>,
    quotes: Mutex<HashMap<String, Quote>>,
    failing: Mutex<HashSet<String>>,
    batch_error: Mutex<Option<u16>>,
    latency: Mutex<Duration>,
    search_calls: Mutex<Vec<String>>,
    batch_calls: Mutex<Vec<Vec<String>>>,
    quote_calls: AtomicUsize,
}

impl MockProvider {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub(crate) fn with_search(&self, query: &str, results: Vec<SearchResult>) {
        self.search_results
            .lock()
            .unwrap()
            .insert(query.to_string(), results);
    }

    pub(crate) fn fail_search(&self, message: &str) {
        *self.search_error.lock().unwrap() = Some(message.to_string());
    }

    pub(crate) fn heal_search(&self) {
        *self.search_error.lock().unwrap() = None;
    }

    pub(crate) fn with_quote(&self, quote: Quote) {
        self.quotes
            .lock()
            .unwrap()
            .insert(quote.symbol.clone(), quote);
    }

    pub(crate) fn fail_symbol(&self, symbol: &str) {
        self.failing.lock().unwrap().insert(symbol.to_string());
    }

    pub(crate) fn fail_batch(&self, status: u16) {
        *self.batch_error.lock().unwrap() = Some(status);
    }

    pub(crate) fn heal_symbol(&self, symbol: &str) {
        self.failing.lock().unwrap().remove(symbol);
    }

    pub(crate) fn set_latency(&self, latency: Duration) {
        *self.latency.lock().unwrap() = latency;
    }

    pub(crate) fn search_calls(&self) -> Vec<String> {
        self.search_calls.lock().unwrap().clone()
    }

    pub(crate) fn batch_calls(&self) -> Vec<Vec<String>> {
        self.batch_calls.lock().unwrap().clone()
    }

    pub(crate) fn quote_calls(&self) -> usize {
        self.quote_calls.load(Ordering::SeqCst)
    }

    async fn wait(&self) {
        let latency = *self.latency.lock().unwrap();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
    }
}

#[async_trait]
impl QuoteProvider for MockProvider {
    async fn search_symbol(&self, query: &str, limit: usize) -> Result<Vec<SearchResult>> {
        self.search_calls.lock().unwrap().push(query.to_string());
        self.wait().await;
        let scripted_error = self.search_error.lock().unwrap().clone();
        if let Some(message) = scripted_error {
            return Err(AppError::Network(message));
        }
        let mut results = self
            .search_results
            .lock()
            .unwrap()
            .get(query)
            .cloned()
            .unwrap_or_default();
        results.truncate(limit);
        Ok(results)
    }

    async fn get_quote(&self, symbol: &str) -> Result<Option<Quote>> {
        self.quote_calls.fetch_add(1, Ordering::SeqCst);
        self.wait().await;
        if self.failing.lock().unwrap().contains(symbol) {
            return Err(AppError::HttpStatus { status: 500 });
        }
        Ok(self.quotes.lock().unwrap().get(symbol).cloned())
    }

    async fn get_batch_quotes(&self, symbols: &[String]) -> Result<Vec<Quote>> {
        self.batch_calls.lock().unwrap().push(symbols.to_vec());
        self.wait().await;
        let scripted_status = *self.batch_error.lock().unwrap();
        if let Some(status) = scripted_status {
            return Err(AppError::HttpStatus { status });
        }
        let quotes = self.quotes.lock().unwrap();
        let failing = self.failing.lock().unwrap();
        Ok(symbols
            .iter()
            .filter(|symbol| !failing.contains(*symbol))
            .filter_map(|symbol| quotes.get(symbol).cloned())
            .collect())
    }
}
