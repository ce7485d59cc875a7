pub mod decode;
pub mod fmp;
pub mod normalize;
pub mod provider;
pub mod request;
pub mod transport;

pub use fmp::{merge_search_results, FmpClient};
pub use provider::{QuoteProvider, SharedProvider};
pub use transport::{HttpResponse, HttpTransport, ReqwestTransport};

/// Default fan-out applied when the profile backend fetches symbols one by one.
pub const PROFILE_CONCURRENCY_LIMIT: usize = 5;

#[inline]
pub fn ensure_concurrency_limit(limit: usize) -> usize {
    limit.max(1)
}
