use log::warn;

use crate::cache::RetryPolicy;
use crate::error::{AppError, Result};

use super::Config;

/// Validate a fully merged config and surface every problem at once.
pub fn validate_config(config: &Config) -> Result<()> {
    let mut issues = Vec::new();

    validate_provider(config, &mut issues);
    validate_search(config, &mut issues);
    validate_retry("search.retry", &config.search.retry, &mut issues);
    validate_retry("quotes.retry", &config.quotes.retry, &mut issues);
    validate_storage(config, &mut issues);

    if config.quotes.refresh_interval.is_zero() {
        issues.push("quotes.refresh_interval must be greater than zero".to_string());
    }

    if issues.is_empty() {
        Ok(())
    } else {
        Err(AppError::message(format!(
            "config invalid:\n  - {}",
            issues.join("\n  - ")
        )))
    }
}

fn validate_provider(config: &Config, issues: &mut Vec<String>) {
    let provider = &config.provider;
    let base_url = provider.base_url.trim();
    if base_url.is_empty() {
        issues.push("provider.base_url must not be empty".to_string());
    } else if !(base_url.starts_with("http://") || base_url.starts_with("https://")) {
        issues.push(format!(
            "provider.base_url `{}` must start with http:// or https://",
            base_url
        ));
    }
    if provider.timeout.is_zero() {
        issues.push("provider.timeout must be greater than zero".to_string());
    }
    if provider.concurrency_limit == 0 {
        issues.push("provider.concurrency_limit must be at least 1".to_string());
    }
    if provider.api_key.trim().is_empty() {
        warn!("provider.api_key is empty; every provider request will be rejected");
    }
}

fn validate_search(config: &Config, issues: &mut Vec<String>) {
    if config.search.limit == 0 {
        issues.push("search.limit must be at least 1".to_string());
    }
}

fn validate_retry(label: &str, retry: &RetryPolicy, issues: &mut Vec<String>) {
    if retry.max_delay < retry.base_delay {
        issues.push(format!(
            "{label}: max delay {:?} is below base delay {:?}",
            retry.max_delay, retry.base_delay
        ));
    }
}

fn validate_storage(config: &Config, issues: &mut Vec<String>) {
    if config.storage.watchlist_key.trim().is_empty() {
        issues.push("storage.watchlist_key must not be empty".to_string());
    }
    if config.storage.dir.as_os_str().is_empty() {
        issues.push("storage.dir must not be empty".to_string());
    }
}
