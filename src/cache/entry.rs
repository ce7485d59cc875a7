use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::time::Instant;

use crate::error::ErrorInfo;

use super::QueryKey;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum QueryStatus {
    Idle,
    Loading,
    Success,
    Error,
}

/// Identifies one issued fetch. Only the most recently issued token for a key
/// may write its result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FetchToken(pub(crate) u64);

/// Observable state of one cache key.
///
/// `status` is `Loading` only while the first value is being fetched; a
/// background refetch keeps the previous status and raises `is_fetching`.
#[derive(Debug, Clone)]
pub struct CacheEntry<T> {
    pub key: QueryKey,
    pub status: QueryStatus,
    pub value: Option<T>,
    pub error: Option<ErrorInfo>,
    pub fetched_at: Option<Instant>,
    pub updated_at: Option<DateTime<Utc>>,
    pub is_fetching: bool,
    pub is_invalidated: bool,
    pub failure_count: u32,
    pub in_flight: Option<FetchToken>,
}

impl<T> CacheEntry<T> {
    pub fn new(key: QueryKey) -> Self {
        Self {
            key,
            status: QueryStatus::Idle,
            value: None,
            error: None,
            fetched_at: None,
            updated_at: None,
            is_fetching: false,
            is_invalidated: false,
            failure_count: 0,
            in_flight: None,
        }
    }

    pub fn is_loading(&self) -> bool {
        self.status == QueryStatus::Loading
    }

    pub fn is_success(&self) -> bool {
        self.status == QueryStatus::Success
    }

    pub fn is_error(&self) -> bool {
        self.status == QueryStatus::Error
    }

    /// True while a refetch runs on top of an already available value.
    pub fn is_refreshing(&self) -> bool {
        self.is_fetching && self.value.is_some()
    }

    /// `stale_time` of `None` means a fetched value never goes stale on its own.
    pub fn is_stale(&self, stale_time: Option<Duration>, now: Instant) -> bool {
        if self.is_invalidated {
            return true;
        }
        match (self.fetched_at, stale_time) {
            (None, _) => true,
            (Some(_), None) => false,
            (Some(at), Some(window)) => now.saturating_duration_since(at) >= window,
        }
    }

    pub(crate) fn settle_status(&mut self) {
        self.status = if self.value.is_some() {
            QueryStatus::Success
        } else if self.error.is_some() {
            QueryStatus::Error
        } else {
            QueryStatus::Idle
        };
    }
}
