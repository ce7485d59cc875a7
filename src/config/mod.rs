use std::path::PathBuf;
use std::time::Duration;

use crate::cache::{QueryOptions, RetryPolicy, DEFAULT_GC_TIME};
use crate::fetch::PROFILE_CONCURRENCY_LIMIT;

pub mod loader;
pub mod validator;

pub use loader::expand_env_vars;
pub use validator::validate_config;

pub const DEFAULT_BASE_URL: &str = "https://financialmodelingprep.com/stable";
pub const WATCHLIST_STORAGE_KEY: &str = "@stocks_watchlist";

/// Which family of provider endpoints serves quotes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuoteBackend {
    /// `/quote` and `/batch-quote`: one call for the whole symbol set.
    Batch,
    /// `/profile` only: symbols are fetched one by one and failures dropped.
    Profile,
}

#[derive(Debug, Clone)]
pub struct ProviderConfig {
    pub base_url: String,
    pub api_key: String,
    pub timeout: Duration,
    pub backend: QuoteBackend,
    pub concurrency_limit: usize,
}

#[derive(Debug, Clone)]
pub struct SearchConfig {
    pub debounce: Duration,
    pub limit: usize,
    pub stale_time: Duration,
    pub retry: RetryPolicy,
}

#[derive(Debug, Clone)]
pub struct QuotesConfig {
    pub stale_time: Duration,
    pub retry: RetryPolicy,
    pub refresh_interval: Duration,
}

#[derive(Debug, Clone)]
pub struct StorageConfig {
    pub dir: PathBuf,
    pub watchlist_key: String,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub provider: ProviderConfig,
    pub search: SearchConfig,
    pub quotes: QuotesConfig,
    pub gc_time: Duration,
    pub storage: StorageConfig,
}

impl Config {
    pub fn builtin() -> Self {
        let backoff = |retries| {
            RetryPolicy::new(retries).with_backoff(Duration::from_secs(1), Duration::from_secs(10))
        };

        Config {
            provider: ProviderConfig {
                base_url: DEFAULT_BASE_URL.to_string(),
                api_key: String::new(),
                timeout: Duration::from_secs(10),
                backend: QuoteBackend::Profile,
                concurrency_limit: PROFILE_CONCURRENCY_LIMIT,
            },
            search: SearchConfig {
                debounce: Duration::from_millis(400),
                limit: 10,
                stale_time: Duration::from_secs(30),
                retry: backoff(1),
            },
            quotes: QuotesConfig {
                stale_time: Duration::from_secs(30),
                retry: backoff(2),
                refresh_interval: Duration::from_secs(60),
            },
            gc_time: DEFAULT_GC_TIME,
            storage: StorageConfig {
                dir: PathBuf::from(".watchlist"),
                watchlist_key: WATCHLIST_STORAGE_KEY.to_string(),
            },
        }
    }

    /// Cache defaults shared by every query that does not override them.
    pub fn cache_defaults(&self) -> QueryOptions {
        QueryOptions::default()
            .with_stale_time(self.quotes.stale_time)
            .with_gc_time(self.gc_time)
            .with_retry(self.quotes.retry)
    }

    pub fn search_options(&self) -> QueryOptions {
        QueryOptions::default()
            .with_stale_time(self.search.stale_time)
            .with_gc_time(self.gc_time)
            .with_retry(self.search.retry)
    }

    pub fn quote_options(&self) -> QueryOptions {
        self.cache_defaults()
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::builtin()
    }
}
