use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use log::warn;
use serde::Deserialize;

use crate::error::{AppError, Context, Result};

use super::{validator, Config, QuoteBackend};

impl Config {
    /// Builtin defaults overlaid with the JSON file at `path` and the environment.
    pub fn load(path: &Path) -> Result<Self> {
        let json = fs::read_to_string(path)
            .with_context(|| format!("failed to read config JSON at {}", path.display()))?;
        let mut config = Self::from_json_str(&json)
            .with_context(|| format!("failed to parse config JSON at {}", path.display()))?;
        config.apply_env();
        validator::validate_config(&config)?;
        Ok(config)
    }

    /// Builtin defaults overlaid with the environment only.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::builtin();
        config.apply_env();
        validator::validate_config(&config)?;
        Ok(config)
    }

    pub fn from_json_str(json: &str) -> Result<Self> {
        let raw: RawConfig = serde_json::from_str(json)?;
        let mut config = Self::builtin();
        raw.apply(&mut config, |name| std::env::var(name).ok())?;
        Ok(config)
    }

    pub fn apply_env(&mut self) {
        self.apply_env_with(|name| std::env::var(name).ok());
    }

    pub fn apply_env_with(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(key) = lookup("FMP_API_KEY").filter(|key| !key.trim().is_empty()) {
            self.provider.api_key = key;
        }
        if let Some(url) = lookup("FMP_BASE_URL").filter(|url| !url.trim().is_empty()) {
            self.provider.base_url = url;
        }
        if let Some(dir) = lookup("WATCHLIST_DIR").filter(|dir| !dir.trim().is_empty()) {
            self.storage.dir = PathBuf::from(dir);
        }
        if self.provider.api_key.is_empty() {
            warn!("FMP API key is not configured. Set the FMP_API_KEY env variable.");
        }
    }
}

/// Expand `${NAME}` placeholders using `lookup`.
pub fn expand_env_vars(value: &str, lookup: impl Fn(&str) -> Option<String>) -> Result<String> {
    let mut result = String::with_capacity(value.len());
    let mut chars = value.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && matches!(chars.peek(), Some('{')) {
            chars.next();
            let mut name = String::new();
            let mut closed = false;
            for next in chars.by_ref() {
                if next == '}' {
                    closed = true;
                    break;
                }
                name.push(next);
            }

            if name.is_empty() {
                return Err(AppError::message(
                    "Encountered empty environment placeholder in config value",
                ));
            }

            if !closed {
                return Err(AppError::message(
                    "Unterminated environment placeholder in config value",
                ));
            }

            let value = lookup(&name).ok_or_else(|| {
                AppError::message(format!(
                    "Environment variable {} required by config is not set",
                    name
                ))
            })?;
            result.push_str(&value);
        } else {
            result.push(ch);
        }
    }

    Ok(result)
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct RawConfig {
    provider: RawProvider,
    search: RawSearch,
    quotes: RawQuotes,
    backoff: RawBackoff,
    gc_ms: Option<u64>,
    storage: RawStorage,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct RawProvider {
    base_url: Option<String>,
    api_key: Option<String>,
    timeout_ms: Option<u64>,
    backend: Option<RawBackend>,
    concurrency_limit: Option<usize>,
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "lowercase")]
enum RawBackend {
    Batch,
    Profile,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct RawSearch {
    debounce_ms: Option<u64>,
    limit: Option<usize>,
    stale_ms: Option<u64>,
    retries: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct RawQuotes {
    stale_ms: Option<u64>,
    retries: Option<u32>,
    refresh_interval_ms: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct RawBackoff {
    base_ms: Option<u64>,
    max_ms: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct RawStorage {
    dir: Option<PathBuf>,
    watchlist_key: Option<String>,
}

fn millis(value: Option<u64>) -> Option<Duration> {
    value.map(Duration::from_millis)
}

impl RawConfig {
    fn apply(self, config: &mut Config, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        let provider = &mut config.provider;
        if let Some(base_url) = self.provider.base_url {
            provider.base_url = base_url;
        }
        if let Some(api_key) = self.provider.api_key {
            provider.api_key = expand_env_vars(&api_key, &lookup)?;
        }
        if let Some(timeout) = millis(self.provider.timeout_ms) {
            provider.timeout = timeout;
        }
        if let Some(backend) = self.provider.backend {
            provider.backend = match backend {
                RawBackend::Batch => QuoteBackend::Batch,
                RawBackend::Profile => QuoteBackend::Profile,
            };
        }
        if let Some(limit) = self.provider.concurrency_limit {
            provider.concurrency_limit = limit;
        }

        let search = &mut config.search;
        if let Some(debounce) = millis(self.search.debounce_ms) {
            search.debounce = debounce;
        }
        if let Some(limit) = self.search.limit {
            search.limit = limit;
        }
        if let Some(stale) = millis(self.search.stale_ms) {
            search.stale_time = stale;
        }
        if let Some(retries) = self.search.retries {
            search.retry.max_retries = retries;
        }

        let quotes = &mut config.quotes;
        if let Some(stale) = millis(self.quotes.stale_ms) {
            quotes.stale_time = stale;
        }
        if let Some(retries) = self.quotes.retries {
            quotes.retry.max_retries = retries;
        }
        if let Some(interval) = millis(self.quotes.refresh_interval_ms) {
            quotes.refresh_interval = interval;
        }

        for retry in [&mut config.search.retry, &mut config.quotes.retry] {
            if let Some(base) = millis(self.backoff.base_ms) {
                retry.base_delay = base;
            }
            if let Some(max) = millis(self.backoff.max_ms) {
                retry.max_delay = max;
            }
        }

        if let Some(gc_time) = millis(self.gc_ms) {
            config.gc_time = gc_time;
        }
        if let Some(dir) = self.storage.dir {
            config.storage.dir = dir;
        }
        if let Some(key) = self.storage.watchlist_key {
            config.storage.watchlist_key = key;
        }

        Ok(())
    }
}
