use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use log::{debug, warn};
use serde_json::Value;

use crate::config::{ProviderConfig, QuoteBackend};
use crate::error::{AppError, Result};
use crate::models::{Quote, SearchResult};

use super::decode::{decode_payload, first_record};
use super::normalize::{map_profile, map_quote, map_quotes, map_search_results};
use super::provider::QuoteProvider;
use super::request::{build_url, redact};
use super::transport::{HttpTransport, ReqwestTransport};
use super::ensure_concurrency_limit;

/// Financial Modeling Prep client for the `stable` API family.
pub struct FmpClient {
    transport: Arc<dyn HttpTransport>,
    base_url: String,
    api_key: String,
    timeout: Duration,
    backend: QuoteBackend,
    concurrency_limit: usize,
}

impl FmpClient {
    pub fn new(config: &ProviderConfig) -> Result<Self> {
        let transport = ReqwestTransport::new(config.timeout)?;
        Ok(Self::with_transport(config, Arc::new(transport)))
    }

    pub fn with_transport(config: &ProviderConfig, transport: Arc<dyn HttpTransport>) -> Self {
        Self {
            transport,
            base_url: config.base_url.clone(),
            api_key: config.api_key.clone(),
            timeout: config.timeout,
            backend: config.backend,
            concurrency_limit: ensure_concurrency_limit(config.concurrency_limit),
        }
    }

    async fn request(&self, path: &str, params: &[(&str, &str)]) -> Result<Value> {
        let url = build_url(&self.base_url, path, params, &self.api_key)?;
        debug!("GET {}", redact(&url));

        let response = tokio::time::timeout(self.timeout, self.transport.get(&url))
            .await
            .map_err(|_| AppError::Timeout)??;

        decode_payload(&response)
    }

    async fn search_endpoint(&self, path: &str, query: &str, limit: &str) -> Vec<SearchResult> {
        match self
            .request(path, &[("query", query), ("limit", limit)])
            .await
        {
            Ok(payload) => map_search_results(&payload),
            Err(err) => {
                warn!("{} for `{}` failed, treating as empty: {}", path, query, err);
                Vec::new()
            }
        }
    }

    async fn fetch_profile(&self, symbol: &str) -> Result<Option<Quote>> {
        let payload = self.request("/profile", &[("symbol", symbol)]).await?;
        Ok(first_record(&payload).map(map_profile))
    }
}

#[async_trait]
impl QuoteProvider for FmpClient {
    async fn search_symbol(&self, query: &str, limit: usize) -> Result<Vec<SearchResult>> {
        let limit_param = limit.to_string();
        let (by_symbol, by_name) = tokio::join!(
            self.search_endpoint("/search-symbol", query, &limit_param),
            self.search_endpoint("/search-name", query, &limit_param),
        );

        Ok(merge_search_results(by_symbol, by_name, limit))
    }

    async fn get_quote(&self, symbol: &str) -> Result<Option<Quote>> {
        match self.backend {
            QuoteBackend::Batch => {
                let payload = self.request("/quote", &[("symbol", symbol)]).await?;
                Ok(first_record(&payload).map(map_quote))
            }
            QuoteBackend::Profile => self.fetch_profile(symbol).await,
        }
    }

    async fn get_batch_quotes(&self, symbols: &[String]) -> Result<Vec<Quote>> {
        if symbols.is_empty() {
            return Ok(Vec::new());
        }

        match self.backend {
            QuoteBackend::Batch => {
                let joined = symbols.join(",");
                let payload = self
                    .request("/batch-quote", &[("symbols", joined.as_str())])
                    .await?;
                Ok(map_quotes(&payload))
            }
            QuoteBackend::Profile => {
                // One profile call per symbol; a failing symbol is left out of the result.
                let quotes: Vec<Option<Quote>> = stream::iter(symbols.iter().cloned())
                    .map(|symbol| async move {
                        match self.fetch_profile(&symbol).await {
                            Ok(quote) => quote,
                            Err(err) => {
                                warn!("profile fetch for {} dropped: {}", symbol, err);
                                None
                            }
                        }
                    })
                    .buffered(self.concurrency_limit)
                    .collect()
                    .await;

                Ok(quotes.into_iter().flatten().collect())
            }
        }
    }
}

/// Concatenate symbol hits before name hits, keep the first hit per symbol, cap at `limit`.
pub fn merge_search_results(
    by_symbol: Vec<SearchResult>,
    by_name: Vec<SearchResult>,
    limit: usize,
) -> Vec<SearchResult> {
    let mut seen = HashSet::new();
    by_symbol
        .into_iter()
        .chain(by_name)
        .filter(|result| seen.insert(result.symbol.clone()))
        .take(limit)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::error::ErrorKind;
    use crate::testing::{search_hit, StubReply, StubTransport};

    fn client(backend: QuoteBackend, transport: Arc<StubTransport>) -> FmpClient {
        let mut config = Config::builtin().provider;
        config.api_key = "test-key".to_string();
        config.backend = backend;
        FmpClient::with_transport(&config, transport)
    }

    fn json(body: &str) -> StubReply {
        StubReply::Json(body.to_string())
    }

    #[test]
    fn merge_prefers_symbol_hits_and_caps() {
        let merged = merge_search_results(
            vec![search_hit("AAPL", "Apple Inc."), search_hit("APLE", "Apple Hospitality")],
            vec![search_hit("AAPL", "Apple (name match)"), search_hit("APPL", "Appl")],
            3,
        );
        let symbols: Vec<_> = merged.iter().map(|r| r.symbol.as_str()).collect();
        assert_eq!(symbols, ["AAPL", "APLE", "APPL"]);
        assert_eq!(merged[0].name, "Apple Inc.");

        assert_eq!(merge_search_results(merged, vec![], 1).len(), 1);
    }

    #[tokio::test]
    async fn search_survives_one_failing_endpoint() {
        let transport = Arc::new(
            StubTransport::new()
                .route(
                    "/search-symbol",
                    json(r#"[{"symbol":"AAPL","name":"Apple Inc.","currency":"USD","exchange":"NASDAQ"}]"#),
                )
                .route("/search-name", StubReply::Status(500)),
        );
        let client = client(QuoteBackend::Batch, Arc::clone(&transport));

        let results = client.search_symbol("AAPL", 10).await.expect("search succeeds");
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].symbol, "AAPL");
        assert_eq!(results[0].exchange, "NASDAQ");

        let calls = transport.calls();
        assert_eq!(calls.len(), 2);
        assert!(calls
            .iter()
            .all(|url| url.query_pairs().any(|(k, v)| k == "apikey" && v == "test-key")));
    }

    #[tokio::test]
    async fn search_with_both_endpoints_failing_is_empty() {
        let transport = Arc::new(
            StubTransport::new()
                .route("/search-symbol", StubReply::Fail("dns".into()))
                .route("/search-name", json(r#"{"Error Message":"Limit reached"}"#)),
        );
        let results = client(QuoteBackend::Batch, transport)
            .search_symbol("ZZZ", 10)
            .await
            .expect("search still succeeds");
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn single_quote_reports_absent_and_payload_errors() {
        let transport = Arc::new(
            StubTransport::new()
                .route_param("/quote", "symbol", "NOPE", json("[]"))
                .route_param("/quote", "symbol", "MSFT", json(r#"[{"symbol":"MSFT","price":410.2}]"#))
                .route_param("/quote", "symbol", "KEY", json(r#"{"Error Message":"Invalid API KEY."}"#)),
        );
        let client = client(QuoteBackend::Batch, transport);

        assert_eq!(client.get_quote("NOPE").await.unwrap(), None);
        let msft = client.get_quote("MSFT").await.unwrap().expect("quote present");
        assert_eq!(msft.price, 410.2);
        assert_eq!(msft.pe, None);

        let err = client.get_quote("KEY").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ProviderPayload);
        assert_eq!(err.to_string(), "Invalid API KEY.");
    }

    #[tokio::test]
    async fn batch_backend_issues_one_call() {
        let transport = Arc::new(StubTransport::new().route(
            "/batch-quote",
            json(r#"[{"symbol":"AAPL","price":1},{"symbol":"MSFT","price":2}]"#),
        ));
        let client = client(QuoteBackend::Batch, Arc::clone(&transport));

        let quotes = client
            .get_batch_quotes(&["AAPL".to_string(), "MSFT".to_string()])
            .await
            .unwrap();
        assert_eq!(quotes.len(), 2);

        let calls = transport.calls();
        assert_eq!(calls.len(), 1);
        assert!(calls[0]
            .query_pairs()
            .any(|(k, v)| k == "symbols" && v == "AAPL,MSFT"));
    }

    #[tokio::test]
    async fn profile_backend_drops_failing_symbols() {
        let transport = Arc::new(
            StubTransport::new()
                .route_param(
                    "/profile",
                    "symbol",
                    "AAPL",
                    json(r#"[{"symbol":"AAPL","companyName":"Apple Inc.","price":190,"range":"150-200"}]"#),
                )
                .route_param("/profile", "symbol", "BAD", StubReply::Status(500)),
        );
        let client = client(QuoteBackend::Profile, Arc::clone(&transport));

        let quotes = client
            .get_batch_quotes(&["AAPL".to_string(), "BAD".to_string()])
            .await
            .expect("partial failure is not an error");
        assert_eq!(quotes.len(), 1);
        assert_eq!(quotes[0].symbol, "AAPL");
        assert_eq!(quotes[0].year_high, 200.0);
        assert_eq!(transport.paths().len(), 2);
    }

    #[tokio::test]
    async fn empty_symbol_set_skips_the_network() {
        let transport = Arc::new(StubTransport::new());
        let quotes = client(QuoteBackend::Batch, Arc::clone(&transport))
            .get_batch_quotes(&[])
            .await
            .unwrap();
        assert!(quotes.is_empty());
        assert!(transport.calls().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn hung_request_times_out_as_timeout_kind() {
        let transport = Arc::new(StubTransport::new().route("/quote", StubReply::Hang));
        let client = client(QuoteBackend::Batch, transport);

        let started = tokio::time::Instant::now();
        let err = client.get_quote("AAPL").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Timeout);
        assert!(started.elapsed() >= Duration::from_secs(10));
    }
}
