use std::sync::Arc;

use async_trait::async_trait;

use crate::error::Result;

pub mod file;
pub mod memory;
pub mod watchlist;

pub use file::FileStore;
pub use memory::MemoryStore;
pub use watchlist::WatchlistStore;

/// Durable string blobs addressed by key.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;
    async fn set(&self, key: &str, value: &str) -> Result<()>;
    async fn remove(&self, key: &str) -> Result<()>;
}

pub type SharedStore = Arc<dyn KeyValueStore>;
