use std::sync::Arc;

use log::info;

use crate::app::{QuoteCoordinator, SearchCoordinator, WatchlistCoordinator};
use crate::cache::QueryCache;
use crate::config::Config;
use crate::error::Result;
use crate::fetch::{FmpClient, SharedProvider};
use crate::storage::{FileStore, MemoryStore, SharedStore, WatchlistStore};

/// Application root: owns the one query cache and hands out coordinators
/// that share it together with the provider and the watchlist store.
pub struct App {
    config: Config,
    cache: QueryCache,
    provider: SharedProvider,
    watchlist_store: Arc<WatchlistStore>,
}

impl App {
    pub fn new(config: Config, provider: SharedProvider, store: SharedStore) -> Self {
        let cache = QueryCache::new(config.cache_defaults());
        let watchlist_store = Arc::new(WatchlistStore::new(
            store,
            config.storage.watchlist_key.clone(),
        ));
        Self {
            config,
            cache,
            provider,
            watchlist_store,
        }
    }

    /// Wire the FMP client and a file store (or a memory store when `ephemeral`).
    pub fn from_config(config: Config, ephemeral: bool) -> Result<Self> {
        let provider: SharedProvider = Arc::new(FmpClient::new(&config.provider)?);
        let store: SharedStore = if ephemeral {
            info!("using in-memory watchlist storage");
            Arc::new(MemoryStore::new())
        } else {
            info!("watchlist storage at {}", config.storage.dir.display());
            Arc::new(FileStore::new(config.storage.dir.clone()))
        };
        Ok(Self::new(config, provider, store))
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn cache(&self) -> &QueryCache {
        &self.cache
    }

    pub fn search(&self) -> SearchCoordinator {
        SearchCoordinator::new(self.cache.clone(), self.provider.clone(), &self.config)
    }

    pub fn quotes(&self) -> QuoteCoordinator {
        QuoteCoordinator::new(self.cache.clone(), self.provider.clone(), &self.config)
    }

    pub fn watchlist(&self) -> WatchlistCoordinator {
        WatchlistCoordinator::new(
            self.cache.clone(),
            self.provider.clone(),
            Arc::clone(&self.watchlist_store),
            &self.config,
        )
    }
}
