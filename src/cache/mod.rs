//! Reactive query cache: keyed async results with staleness, retry,
//! in-flight de-duplication and cancellation.

pub mod cancel;
pub mod entry;
pub mod key;
pub mod query_cache;
pub mod retry;

pub use cancel::CancelSignal;
pub use entry::{CacheEntry, FetchToken, QueryStatus};
pub use key::{KeyPart, QueryKey};
pub use query_cache::{QueryCache, QueryOptions, QueryValue, Subscription, DEFAULT_GC_TIME};
pub use retry::RetryPolicy;
