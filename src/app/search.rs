use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use log::debug;
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::sleep;

use crate::cache::{CacheEntry, CancelSignal, QueryCache, QueryKey, QueryOptions, QueryStatus};
use crate::config::Config;
use crate::error::{AppError, ErrorInfo};
use crate::fetch::SharedProvider;
use crate::models::SearchResult;

pub const SEARCH_ROOT: &str = "search";

pub fn search_key(query: &str) -> QueryKey {
    QueryKey::new(SEARCH_ROOT).with(query)
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum SearchPhase {
    /// Empty input.
    #[default]
    Idle,
    /// Input pending; nothing has been sent.
    Debouncing,
    Fetching,
    Success,
    Error,
}

impl SearchPhase {
    pub fn is_settled(self) -> bool {
        matches!(self, Self::Idle | Self::Success | Self::Error)
    }
}

/// Snapshot handed to the search screen.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchState {
    pub query: String,
    pub phase: SearchPhase,
    pub results: Vec<SearchResult>,
    pub is_loading: bool,
    pub error: Option<ErrorInfo>,
    pub has_searched: bool,
}

impl SearchState {
    fn for_input(query: &str, phase: SearchPhase) -> Self {
        Self {
            query: query.to_string(),
            phase,
            ..Self::default()
        }
    }

    pub fn is_error(&self) -> bool {
        self.phase == SearchPhase::Error
    }

    fn apply(&mut self, entry: &CacheEntry<Vec<SearchResult>>) {
        self.phase = match entry.status {
            QueryStatus::Idle if entry.is_fetching => SearchPhase::Fetching,
            QueryStatus::Idle => SearchPhase::Idle,
            QueryStatus::Loading => SearchPhase::Fetching,
            QueryStatus::Success => SearchPhase::Success,
            QueryStatus::Error => SearchPhase::Error,
        };
        self.results = entry.value.clone().unwrap_or_default();
        self.is_loading = entry.is_loading();
        self.error = if entry.is_error() {
            entry.error.clone()
        } else {
            None
        };
        self.has_searched = true;
    }
}

struct Pending {
    generation: u64,
    query: String,
    task: Option<JoinHandle<()>>,
}

struct SearchInner {
    cache: QueryCache,
    provider: SharedProvider,
    options: QueryOptions,
    debounce: Duration,
    limit: usize,
    state: watch::Sender<SearchState>,
    pending: Mutex<Pending>,
}

impl SearchInner {
    fn lock(&self) -> MutexGuard<'_, Pending> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Apply `update` unless newer input has replaced `generation`.
    fn publish(&self, generation: u64, update: impl FnOnce(&mut SearchState)) -> bool {
        let pending = self.lock();
        if pending.generation != generation {
            return false;
        }
        self.state.send_modify(update);
        true
    }
}

/// Debounced symbol search on top of the query cache.
///
/// Each input change bumps a generation counter, cancels the fetch for the
/// previous text and restarts the debounce timer. Only the task holding the current generation
/// may publish, so a superseded search can never overwrite newer state.
/// Methods spawn onto the ambient Tokio runtime.
pub struct SearchCoordinator {
    inner: Arc<SearchInner>,
}

impl SearchCoordinator {
    pub fn new(cache: QueryCache, provider: SharedProvider, config: &Config) -> Self {
        let (state, _) = watch::channel(SearchState::default());
        Self {
            inner: Arc::new(SearchInner {
                cache,
                provider,
                options: config.search_options(),
                debounce: config.search.debounce,
                limit: config.search.limit,
                state,
                pending: Mutex::new(Pending {
                    generation: 0,
                    query: String::new(),
                    task: None,
                }),
            }),
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<SearchState> {
        self.inner.state.subscribe()
    }

    pub fn state(&self) -> SearchState {
        self.inner.state.borrow().clone()
    }

    pub fn query(&self) -> String {
        self.inner.lock().query.clone()
    }

    /// Record new input. Unchanged text is ignored.
    pub fn set_query(&self, text: &str) {
        let mut pending = self.inner.lock();
        if pending.query == text {
            return;
        }
        self.restart(&mut pending, text);
    }

    /// Back to idle, dropping any pending debounce and in-flight result.
    pub fn clear(&self) {
        let mut pending = self.inner.lock();
        self.restart(&mut pending, "");
    }

    /// Fetch the current query again, ignoring staleness.
    pub fn retry(&self) {
        let query = self.inner.lock().query.trim().to_string();
        if query.is_empty() {
            return;
        }
        self.inner.cache.refetch(&search_key(&query));
    }

    /// Wait until the coordinator is idle or the current search has settled.
    pub async fn settled(&self) -> SearchState {
        let mut rx = self.subscribe();
        let settled = match rx.wait_for(|state| state.phase.is_settled()).await {
            Ok(state) => Some(state.clone()),
            Err(_) => None,
        };
        settled.unwrap_or_else(|| self.state())
    }

    fn restart(&self, pending: &mut MutexGuard<'_, Pending>, text: &str) {
        let previous = std::mem::replace(&mut pending.query, text.to_string());
        pending.generation += 1;
        if let Some(task) = pending.task.take() {
            task.abort();
        }

        let trimmed = text.trim();
        let previous = previous.trim();
        if !previous.is_empty() && previous != trimmed {
            self.inner.cache.cancel(&search_key(previous));
        }

        if trimmed.is_empty() {
            self.inner
                .state
                .send_replace(SearchState::for_input(text, SearchPhase::Idle));
            return;
        }

        self.inner
            .state
            .send_replace(SearchState::for_input(text, SearchPhase::Debouncing));
        let generation = pending.generation;
        pending.task = Some(tokio::spawn(run_search(
            Arc::clone(&self.inner),
            generation,
            trimmed.to_string(),
        )));
    }
}

impl Drop for SearchCoordinator {
    fn drop(&mut self) {
        let mut pending = self.inner.lock();
        pending.generation += 1;
        if let Some(task) = pending.task.take() {
            task.abort();
        }
    }
}

async fn run_search(inner: Arc<SearchInner>, generation: u64, query: String) {
    sleep(inner.debounce).await;
    debug!("search debounced: {query}");

    let provider = Arc::clone(&inner.provider);
    let limit = inner.limit;
    let text = query.clone();
    let fetch = move |signal: CancelSignal| {
        let provider = Arc::clone(&provider);
        let text = text.clone();
        async move {
            tokio::select! {
                biased;
                _ = signal.cancelled() => Err(AppError::Cancelled),
                results = provider.search_symbol(&text, limit) => results,
            }
        }
    };

    let mut subscription =
        match inner
            .cache
            .subscribe(search_key(&query), fetch, inner.options.clone())
        {
            Ok(subscription) => subscription,
            Err(err) => {
                inner.publish(generation, |state| {
                    state.phase = SearchPhase::Error;
                    state.error = Some(ErrorInfo::from(&err));
                    state.has_searched = true;
                });
                return;
            }
        };

    // Mirror the entry into the search state until newer input aborts this task.
    loop {
        let entry = subscription.snapshot();
        if !inner.publish(generation, |state| state.apply(&entry)) {
            return;
        }
        if subscription.changed().await.is_err() {
            return;
        }
    }
}
