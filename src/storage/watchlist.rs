use log::{debug, warn};
use tokio::sync::Mutex;

use crate::error::{AppError, Result};
use crate::models::WatchlistItem;
use crate::utils::now_millis;

use super::SharedStore;

/// Persisted watchlist: a JSON array of [`WatchlistItem`] under one key.
///
/// Reads never fail; a missing or corrupt blob reads as an empty list. Every
/// mutation re-reads, edits and rewrites the full list while holding an
/// in-process writer lock, so concurrent callers sharing one store do not lose
/// updates.
pub struct WatchlistStore {
    store: SharedStore,
    key: String,
    writer: Mutex<()>,
}

impl WatchlistStore {
    pub fn new(store: SharedStore, key: impl Into<String>) -> Self {
        Self {
            store,
            key: key.into(),
            writer: Mutex::new(()),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub async fn get_all(&self) -> Vec<WatchlistItem> {
        let raw = match self.store.get(&self.key).await {
            Ok(Some(raw)) => raw,
            Ok(None) => return Vec::new(),
            Err(err) => {
                warn!("failed to read watchlist `{}`: {}", self.key, err);
                return Vec::new();
            }
        };

        match serde_json::from_str::<Vec<WatchlistItem>>(&raw) {
            Ok(items) => items,
            Err(err) => {
                let err = AppError::StorageCorrupt(err.to_string());
                warn!("watchlist `{}` unreadable, starting empty: {}", self.key, err);
                Vec::new()
            }
        }
    }

    pub async fn save(&self, items: &[WatchlistItem]) -> Result<()> {
        let json = serde_json::to_string(items)?;
        self.store.set(&self.key, &json).await
    }

    /// Append `symbol` unless already present; returns the resulting list.
    pub async fn add_item(&self, symbol: &str, name: &str) -> Result<Vec<WatchlistItem>> {
        let _writer = self.writer.lock().await;
        let mut items = self.get_all().await;
        if items.iter().any(|item| item.symbol == symbol) {
            return Ok(items);
        }

        items.push(WatchlistItem::new(symbol, name, now_millis()));
        self.save(&items).await?;
        debug!("watchlist: added {}", symbol);
        Ok(items)
    }

    /// Drop `symbol` if present; returns the resulting list.
    pub async fn remove_item(&self, symbol: &str) -> Result<Vec<WatchlistItem>> {
        let _writer = self.writer.lock().await;
        let mut items = self.get_all().await;
        let before = items.len();
        items.retain(|item| item.symbol != symbol);
        if items.len() == before {
            return Ok(items);
        }

        self.save(&items).await?;
        debug!("watchlist: removed {}", symbol);
        Ok(items)
    }

    pub async fn has_item(&self, symbol: &str) -> bool {
        self.get_all()
            .await
            .iter()
            .any(|item| item.symbol == symbol)
    }

    pub async fn clear(&self) -> Result<()> {
        let _writer = self.writer.lock().await;
        self.store.remove(&self.key).await
    }
}
