pub mod bootstrap;
pub mod quote;
pub mod search;
pub mod watchlist;

pub use bootstrap::App;
pub use quote::{quote_key, QuoteCoordinator, QuoteView};
pub use search::{search_key, SearchCoordinator, SearchPhase, SearchState};
pub use watchlist::{
    batch_quotes_key, items_key, QuoteMap, WatchlistCoordinator, WatchlistRow, WatchlistSnapshot,
};
