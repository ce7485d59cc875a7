use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::cache::{CacheEntry, CancelSignal, FetchToken, QueryCache, QueryKey, QueryOptions, RetryPolicy, Subscription};
use crate::config::Config;
use crate::error::{AppError, ErrorInfo, Result};
use crate::fetch::SharedProvider;
use crate::models::{Quote, WatchlistItem};
use crate::storage::WatchlistStore;

pub const WATCHLIST_ITEMS_ROOT: &str = "watchlistItems";
pub const BATCH_QUOTES_ROOT: &str = "batchQuotes";

/// Quotes by symbol.
pub type QuoteMap = BTreeMap<String, Quote>;

pub fn items_key() -> QueryKey {
    QueryKey::new(WATCHLIST_ITEMS_ROOT)
}

/// Key for a symbol set: sorted, deduplicated and comma-joined.
pub fn batch_quotes_key(symbols: &[String]) -> QueryKey {
    QueryKey::new(BATCH_QUOTES_ROOT).with(normalize_symbols(symbols).join(","))
}

fn normalize_symbols(symbols: &[String]) -> Vec<String> {
    symbols
        .iter()
        .cloned()
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WatchlistRow {
    pub item: WatchlistItem,
    pub quote: Option<Quote>,
    /// Not loading and still no quote for this symbol.
    pub stale: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WatchlistSnapshot {
    pub items: Vec<WatchlistItem>,
    pub quotes: QuoteMap,
    pub is_loading: bool,
    pub is_refreshing: bool,
    pub error: Option<ErrorInfo>,
    pub last_updated: Option<DateTime<Utc>>,
}

impl WatchlistSnapshot {
    fn from_entries(
        items: Option<CacheEntry<Vec<WatchlistItem>>>,
        quotes: Option<CacheEntry<QuoteMap>>,
    ) -> Self {
        let items = items.and_then(|entry| entry.value).unwrap_or_default();
        let Some(quotes) = quotes else {
            return Self {
                items,
                ..Self::default()
            };
        };

        Self {
            items,
            is_loading: quotes.is_loading(),
            is_refreshing: quotes.is_refreshing(),
            error: if quotes.is_error() {
                quotes.error.clone()
            } else {
                None
            },
            last_updated: quotes.updated_at,
            quotes: quotes.value.unwrap_or_default(),
        }
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }

    pub fn is_stale(&self, symbol: &str) -> bool {
        !self.is_loading && !self.quotes.contains_key(symbol)
    }

    pub fn rows(&self) -> Vec<WatchlistRow> {
        self.items
            .iter()
            .map(|item| WatchlistRow {
                item: item.clone(),
                quote: self.quotes.get(&item.symbol).cloned(),
                stale: self.is_stale(&item.symbol),
            })
            .collect()
    }
}

struct WatchlistInner {
    cache: QueryCache,
    provider: SharedProvider,
    store: Arc<WatchlistStore>,
    items_options: QueryOptions,
    quote_options: QueryOptions,
    items: Mutex<Option<Subscription<Vec<WatchlistItem>>>>,
    quotes: Mutex<Option<Subscription<QuoteMap>>>,
}

impl WatchlistInner {
    fn items_slot(&self) -> MutexGuard<'_, Option<Subscription<Vec<WatchlistItem>>>> {
        self.items.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn quotes_slot(&self) -> MutexGuard<'_, Option<Subscription<QuoteMap>>> {
        self.quotes.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn refetch_quotes(&self) -> Option<FetchToken> {
        self.quotes_slot().as_ref().and_then(|sub| sub.refetch())
    }

    fn subscribe_quotes(&self, symbols: &[String]) -> Result<Subscription<QuoteMap>> {
        let symbols = normalize_symbols(symbols);
        let provider = self.provider.clone();
        let requested = symbols.clone();
        let fetch = move |signal: CancelSignal| {
            let provider = provider.clone();
            let symbols = requested.clone();
            async move {
                if symbols.is_empty() {
                    return Ok(QuoteMap::new());
                }
                let quotes = tokio::select! {
                    biased;
                    _ = signal.cancelled() => return Err(AppError::Cancelled),
                    quotes = provider.get_batch_quotes(&symbols) => quotes?,
                };
                Ok(quotes
                    .into_iter()
                    .map(|quote| (quote.symbol.clone(), quote))
                    .collect::<QuoteMap>())
            }
        };

        self.cache
            .subscribe(batch_quotes_key(&symbols), fetch, self.quote_options.clone())
    }

    /// Observe the quotes key for `items`. Returns true when the key changed.
    fn track(&self, items: &[WatchlistItem]) -> Result<bool> {
        let symbols: Vec<String> = items.iter().map(|item| item.symbol.clone()).collect();
        let key = batch_quotes_key(&symbols);

        let mut slot = self.quotes_slot();
        if slot.as_ref().is_some_and(|sub| sub.key() == &key) {
            return Ok(false);
        }
        slot.take();
        *slot = Some(self.subscribe_quotes(&symbols)?);
        debug!("watchlist tracking {}", key);
        Ok(true)
    }

    /// Re-track against the shared membership list, which another coordinator
    /// may have changed since this one last looked.
    fn follow_membership(&self) -> bool {
        if self.items_slot().is_none() {
            return false;
        }
        let Some(items) = self.cache.get_data::<Vec<WatchlistItem>>(&items_key()) else {
            return false;
        };
        match self.track(&items) {
            Ok(switched) => switched,
            Err(err) => {
                warn!("watchlist could not follow membership: {err}");
                false
            }
        }
    }
}

/// Watchlist membership plus the batch quotes for every watched symbol.
///
/// Membership lives under `["watchlistItems"]`, never goes stale and is never
/// evicted. Quotes live under `["batchQuotes", "<sorted,joined symbols>"]`; the
/// coordinator keeps exactly one quotes key observed, switching keys when the
/// membership changes.
pub struct WatchlistCoordinator {
    inner: Arc<WatchlistInner>,
}

impl WatchlistCoordinator {
    pub fn new(
        cache: QueryCache,
        provider: SharedProvider,
        store: Arc<WatchlistStore>,
        config: &Config,
    ) -> Self {
        let items_options = QueryOptions::default()
            .never_stale()
            .retain_forever()
            .with_retry(RetryPolicy::none());

        Self {
            inner: Arc::new(WatchlistInner {
                cache,
                provider,
                store,
                items_options,
                quote_options: config.quote_options(),
                items: Mutex::new(None),
                quotes: Mutex::new(None),
            }),
        }
    }

    /// Current membership, read through the cache from the store on first use.
    pub async fn list(&self) -> Result<Vec<WatchlistItem>> {
        let mut rx = {
            let mut slot = self.inner.items_slot();
            if slot.is_none() {
                let store = Arc::clone(&self.inner.store);
                let fetch = move |_signal: CancelSignal| {
                    let store = Arc::clone(&store);
                    async move { Ok(store.get_all().await) }
                };
                *slot = Some(self.inner.cache.subscribe(
                    items_key(),
                    fetch,
                    self.inner.items_options.clone(),
                )?);
            }
            match slot.as_ref() {
                Some(subscription) => subscription.receiver(),
                None => return Ok(Vec::new()),
            }
        };

        let entry = match rx.wait_for(|entry| !entry.is_fetching).await {
            Ok(entry) => entry.clone(),
            Err(_) => return Err(AppError::message("watchlist cache entry was dropped")),
        };
        Ok(entry.value.unwrap_or_default())
    }

    /// Observe quotes for `symbols`. An empty set resolves to an empty map
    /// without calling the provider.
    pub fn quotes_for(&self, symbols: &[String]) -> Result<Subscription<QuoteMap>> {
        self.inner.subscribe_quotes(symbols)
    }

    /// Load membership and start observing the matching quotes key.
    pub async fn sync(&self) -> Result<()> {
        let items = self.list().await?;
        self.inner.track(&items)?;
        Ok(())
    }

    /// Add `symbol` unless already watched; returns the resulting list.
    pub async fn add(&self, symbol: &str, name: &str) -> Result<Vec<WatchlistItem>> {
        let current = self.list().await?;
        if current.iter().any(|item| item.symbol == symbol) {
            return Ok(current);
        }

        let updated = self.inner.store.add_item(symbol, name).await?;
        info!("added {} to watchlist", symbol);
        self.apply_membership(&updated)?;
        Ok(updated)
    }

    /// Remove `symbol` if watched; returns the resulting list.
    pub async fn remove(&self, symbol: &str) -> Result<Vec<WatchlistItem>> {
        let current = self.list().await?;
        if !current.iter().any(|item| item.symbol == symbol) {
            return Ok(current);
        }

        let updated = self.inner.store.remove_item(symbol).await?;
        info!("removed {} from watchlist", symbol);
        self.apply_membership(&updated)?;
        Ok(updated)
    }

    fn apply_membership(&self, items: &[WatchlistItem]) -> Result<()> {
        self.inner.cache.set_data(items_key(), items.to_vec())?;

        // Release the old quotes key first so the invalidation below only
        // marks it; the next key is then fetched exactly once.
        self.inner.quotes_slot().take();
        self.inner
            .cache
            .invalidate(&QueryKey::new(BATCH_QUOTES_ROOT));
        self.inner.track(items)?;
        Ok(())
    }

    /// Synchronous membership check against the cached list.
    pub fn is_in_watchlist(&self, symbol: &str) -> bool {
        self.inner
            .cache
            .get_data::<Vec<WatchlistItem>>(&items_key())
            .is_some_and(|items| items.iter().any(|item| item.symbol == symbol))
    }

    /// Refetch the tracked quotes now, ignoring staleness.
    pub async fn refresh(&self) -> Result<()> {
        self.sync().await?;
        let already_fetching = self
            .inner
            .quotes_slot()
            .as_ref()
            .is_some_and(|sub| sub.snapshot().is_fetching);
        if !already_fetching {
            self.inner.refetch_quotes();
        }
        Ok(())
    }

    pub fn snapshot(&self) -> WatchlistSnapshot {
        self.inner.follow_membership();
        let items = self
            .inner
            .items_slot()
            .as_ref()
            .map(|sub| sub.snapshot());
        let quotes = self
            .inner
            .quotes_slot()
            .as_ref()
            .map(|sub| sub.snapshot());
        WatchlistSnapshot::from_entries(items, quotes)
    }

    /// Wait until the tracked quotes have no fetch in flight.
    pub async fn settled(&self) -> WatchlistSnapshot {
        self.inner.follow_membership();
        let rx = self
            .inner
            .quotes_slot()
            .as_ref()
            .map(|sub| sub.receiver());
        if let Some(mut rx) = rx {
            let _ = rx.wait_for(|entry| !entry.is_fetching).await;
        }
        self.snapshot()
    }

    /// Refresh the tracked quotes every `period` until the coordinator is dropped.
    pub fn spawn_auto_refresh(&self, period: Duration) -> JoinHandle<()> {
        let inner: Weak<WatchlistInner> = Arc::downgrade(&self.inner);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(inner) = inner.upgrade() else {
                    break;
                };
                if inner.follow_membership() {
                    continue;
                }
                if let Some(token) = inner.refetch_quotes() {
                    debug!("scheduled watchlist refresh issued fetch {:?}", token);
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::sleep;

    use crate::error::ErrorKind;
    use crate::storage::MemoryStore;
    use crate::testing::{quote, MockProvider};

    struct Harness {
        provider: Arc<MockProvider>,
        store: Arc<WatchlistStore>,
        watchlist: WatchlistCoordinator,
    }

    fn harness() -> Harness {
        let config = Config::builtin();
        let provider = MockProvider::new();
        let store = Arc::new(WatchlistStore::new(
            Arc::new(MemoryStore::new()),
            config.storage.watchlist_key.clone(),
        ));
        let watchlist = WatchlistCoordinator::new(
            QueryCache::new(config.cache_defaults()),
            provider.clone(),
            Arc::clone(&store),
            &config,
        );
        Harness {
            provider,
            store,
            watchlist,
        }
    }

    #[test]
    fn batch_key_is_order_insensitive() {
        let a = batch_quotes_key(&["MSFT".into(), "AAPL".into()]);
        let b = batch_quotes_key(&["AAPL".into(), "MSFT".into(), "AAPL".into()]);
        assert_eq!(a, b);
        assert_eq!(a.to_string(), r#"["batchQuotes", "AAPL,MSFT"]"#);
    }

    #[tokio::test(start_paused = true)]
    async fn add_twice_keeps_one_entry() {
        let h = harness();
        h.watchlist.add("AAPL", "Apple Inc.").await.unwrap();
        let again = h.watchlist.add("AAPL", "Apple Inc.").await.unwrap();

        assert_eq!(again.len(), 1);
        assert_eq!(h.store.get_all().await.len(), 1);
        assert!(h.watchlist.is_in_watchlist("AAPL"));
        assert!(!h.watchlist.is_in_watchlist("MSFT"));
    }

    #[tokio::test(start_paused = true)]
    async fn removing_absent_symbol_changes_nothing() {
        let h = harness();
        let before = h.watchlist.add("AAPL", "Apple Inc.").await.unwrap();
        h.watchlist.settled().await;
        let calls = h.provider.batch_calls().len();

        let after = h.watchlist.remove("TSLA").await.unwrap();
        assert_eq!(after, before);
        h.watchlist.settled().await;
        assert_eq!(h.provider.batch_calls().len(), calls);
    }

    #[tokio::test(start_paused = true)]
    async fn empty_watchlist_never_calls_the_provider() {
        let h = harness();
        h.watchlist.sync().await.unwrap();
        let snapshot = h.watchlist.settled().await;

        assert!(snapshot.items.is_empty());
        assert!(snapshot.quotes.is_empty());
        assert!(h.provider.batch_calls().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn mutations_refetch_quotes_for_new_symbol_set() {
        let h = harness();
        h.provider.with_quote(quote("AAPL", 190.0));
        h.provider.with_quote(quote("MSFT", 410.0));

        h.watchlist.add("AAPL", "Apple Inc.").await.unwrap();
        let first = h.watchlist.settled().await;
        assert_eq!(first.quotes.len(), 1);
        assert!(first.last_updated.is_some());

        h.watchlist.add("MSFT", "Microsoft").await.unwrap();
        let second = h.watchlist.settled().await;
        assert_eq!(second.quotes.len(), 2);
        assert_eq!(
            h.provider.batch_calls(),
            vec![
                vec!["AAPL".to_string()],
                vec!["AAPL".to_string(), "MSFT".to_string()]
            ]
        );

        h.watchlist.remove("AAPL").await.unwrap();
        let third = h.watchlist.settled().await;
        assert_eq!(third.quotes.keys().collect::<Vec<_>>(), ["MSFT"]);
        assert_eq!(h.provider.batch_calls().len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn missing_quote_marks_row_stale_once_loaded() {
        let h = harness();
        h.provider.set_latency(Duration::from_millis(200));
        h.provider.with_quote(quote("AAPL", 190.0));
        h.provider.fail_symbol("BAD");
        h.store.add_item("AAPL", "Apple Inc.").await.unwrap();
        h.store.add_item("BAD", "Broken").await.unwrap();

        h.watchlist.sync().await.unwrap();
        let loading = h.watchlist.snapshot();
        assert!(loading.is_loading);
        assert!(loading.rows().iter().all(|row| !row.stale));

        let rows = h.watchlist.settled().await.rows();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].item.symbol, "AAPL");
        assert!(!rows[0].stale);
        assert!(rows[0].quote.is_some());
        assert_eq!(rows[1].item.symbol, "BAD");
        assert!(rows[1].stale);
        assert!(rows[1].quote.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn refresh_bypasses_staleness_and_reports_refreshing() {
        let h = harness();
        h.provider.with_quote(quote("AAPL", 190.0));
        h.watchlist.add("AAPL", "Apple Inc.").await.unwrap();
        h.watchlist.settled().await;
        assert_eq!(h.provider.batch_calls().len(), 1);

        h.provider.set_latency(Duration::from_millis(100));
        h.watchlist.refresh().await.unwrap();
        let during = h.watchlist.snapshot();
        assert!(during.is_refreshing);
        assert!(!during.is_loading);
        assert_eq!(during.quotes.len(), 1);

        h.watchlist.settled().await;
        assert_eq!(h.provider.batch_calls().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn auto_refresh_fires_on_interval() {
        let h = harness();
        h.provider.with_quote(quote("AAPL", 190.0));
        h.watchlist.add("AAPL", "Apple Inc.").await.unwrap();
        h.watchlist.settled().await;

        let handle = h.watchlist.spawn_auto_refresh(Duration::from_secs(60));
        sleep(Duration::from_secs(59)).await;
        assert_eq!(h.provider.batch_calls().len(), 1);
        sleep(Duration::from_secs(2)).await;
        h.watchlist.settled().await;
        assert_eq!(h.provider.batch_calls().len(), 2);

        handle.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn batch_failure_surfaces_error_after_retries() {
        let h = harness();
        h.provider.fail_batch(503);
        h.watchlist.add("AAPL", "Apple Inc.").await.unwrap();

        let snapshot = h.watchlist.settled().await;
        assert!(snapshot.is_error());
        assert_eq!(
            snapshot.error.map(|e| e.kind),
            Some(ErrorKind::HttpStatus(503))
        );
        assert_eq!(h.provider.batch_calls().len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn membership_is_read_from_the_store() {
        let h = harness();
        h.store.add_item("NVDA", "NVIDIA").await.unwrap();

        let items = h.watchlist.list().await.unwrap();
        assert_eq!(items[0].symbol, "NVDA");
        assert!(h.watchlist.is_in_watchlist("NVDA"));

        let emptied = h.watchlist.remove("NVDA").await.unwrap();
        assert!(emptied.is_empty());
        assert!(h.store.get_all().await.is_empty());
        assert!(!h.watchlist.is_in_watchlist("NVDA"));
    }
}
