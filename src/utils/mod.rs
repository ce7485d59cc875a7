pub mod text;
pub mod time;

pub use text::{format_market_cap, format_volume, sanitize_key, signed};
pub use time::{format_epoch_secs, format_local_time, now_millis, now_secs};
