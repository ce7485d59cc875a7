use std::any::Any;
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use chrono::Utc;
use futures::future::BoxFuture;
use log::{debug, warn};
use tokio::sync::watch;
use tokio::time::{sleep, Instant};

use crate::error::{AppError, ErrorInfo, Result};

use super::cancel::{cancel_pair, CancelHandle, CancelSignal};
use super::{CacheEntry, FetchToken, QueryKey, QueryStatus, RetryPolicy};

/// Default retention for entries nobody observes any more.
pub const DEFAULT_GC_TIME: Duration = Duration::from_secs(5 * 60);

/// Values that can live in the cache.
pub trait QueryValue: Clone + Send + Sync + 'static {}

impl<T: Clone + Send + Sync + 'static> QueryValue for T {}

pub type FetchFn<T> = Arc<dyn Fn(CancelSignal) -> BoxFuture<'static, Result<T>> + Send + Sync>;

/// Per-key behaviour supplied on subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryOptions {
    /// Freshness window. `None` keeps a fetched value fresh until invalidated.
    pub stale_time: Option<Duration>,
    /// Retention after the last subscriber leaves. `None` retains forever.
    pub gc_time: Option<Duration>,
    pub retry: RetryPolicy,
}

impl Default for QueryOptions {
    fn default() -> Self {
        Self {
            stale_time: Some(Duration::ZERO),
            gc_time: Some(DEFAULT_GC_TIME),
            retry: RetryPolicy::default(),
        }
    }
}

impl QueryOptions {
    pub fn with_stale_time(mut self, stale_time: Duration) -> Self {
        self.stale_time = Some(stale_time);
        self
    }

    pub fn never_stale(mut self) -> Self {
        self.stale_time = None;
        self
    }

    pub fn with_gc_time(mut self, gc_time: Duration) -> Self {
        self.gc_time = Some(gc_time);
        self
    }

    pub fn retain_forever(mut self) -> Self {
        self.gc_time = None;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }
}

struct SlotState<T> {
    generation: u64,
    cancel: Option<CancelHandle>,
    fetcher: Option<FetchFn<T>>,
    options: QueryOptions,
    subscribers: usize,
    idle_since: Option<Instant>,
}

/// Storage for one key. The watch channel is the observable entry; the mutex
/// guards fetch bookkeeping and is always taken before touching the channel.
struct Slot<T> {
    key: QueryKey,
    tx: watch::Sender<CacheEntry<T>>,
    state: Mutex<SlotState<T>>,
    cache: Weak<CacheInner>,
}

trait ErasedSlot: Send + Sync {
    fn key(&self) -> &QueryKey;
    fn invalidate(self: Arc<Self>);
    fn refetch(self: Arc<Self>);
    fn cancel(&self);
    fn is_evictable(&self, now: Instant) -> bool;
    fn as_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;
}

impl<T: QueryValue> Slot<T> {
    fn new(key: QueryKey, options: QueryOptions, cache: Weak<CacheInner>) -> Self {
        let (tx, _) = watch::channel(CacheEntry::new(key.clone()));
        Self {
            key,
            tx,
            state: Mutex::new(SlotState {
                generation: 0,
                cancel: None,
                fetcher: None,
                options,
                subscribers: 0,
                idle_since: Some(Instant::now()),
            }),
            cache,
        }
    }

    fn lock(&self) -> MutexGuard<'_, SlotState<T>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Issue a new fetch, superseding whatever is in flight for this key.
    fn start_fetch(self: &Arc<Self>) -> Option<FetchToken> {
        let (token, signal, fetcher, retry) = {
            let mut state = self.lock();
            let fetcher = state.fetcher.clone()?;
            if let Some(previous) = state.cancel.take() {
                previous.cancel();
            }
            state.generation += 1;
            let token = FetchToken(state.generation);
            let (handle, signal) = cancel_pair();
            state.cancel = Some(handle);

            self.tx.send_modify(|entry| {
                entry.is_fetching = true;
                entry.in_flight = Some(token);
                entry.failure_count = 0;
                if entry.value.is_none() {
                    entry.status = QueryStatus::Loading;
                    entry.error = None;
                }
            });
            (token, signal, fetcher, state.options.retry)
        };

        debug!("fetch {} issued for {}", token.0, self.key);
        let slot = Arc::clone(self);
        tokio::spawn(async move { slot.run_fetch(token, signal, fetcher, retry).await });
        Some(token)
    }

    async fn run_fetch(
        self: Arc<Self>,
        token: FetchToken,
        signal: CancelSignal,
        fetcher: FetchFn<T>,
        retry: RetryPolicy,
    ) {
        let mut attempt = 0;
        loop {
            if signal.is_cancelled() {
                return;
            }

            match fetcher(signal.clone()).await {
                Ok(value) => {
                    self.commit(token, Ok(value), attempt);
                    return;
                }
                Err(err) if err.is_cancelled() => {
                    debug!("fetch {} for {} cancelled", token.0, self.key);
                    return;
                }
                Err(err) if attempt < retry.max_retries && !signal.is_cancelled() => {
                    let delay = retry.delay_for_attempt(attempt);
                    attempt += 1;
                    warn!(
                        "fetch for {} failed (attempt {attempt}), retrying in {:?}: {err}",
                        self.key, delay
                    );
                    self.tx.send_if_modified(|entry| {
                        if entry.in_flight != Some(token) {
                            return false;
                        }
                        entry.failure_count = attempt;
                        true
                    });
                    tokio::select! {
                        _ = sleep(delay) => {}
                        _ = signal.cancelled() => return,
                    }
                }
                Err(err) => {
                    self.commit(token, Err(err), attempt);
                    return;
                }
            }
        }
    }

    /// Write a fetch outcome unless a later fetch, a cancel or a direct write
    /// has superseded `token`.
    fn commit(&self, token: FetchToken, result: Result<T>, retries: u32) -> bool {
        let unobserved_gc = {
            let mut state = self.lock();
            if state.generation != token.0 {
                debug!("discarding superseded fetch {} for {}", token.0, self.key);
                return false;
            }
            state.cancel = None;

            self.tx.send_modify(|entry| {
                entry.is_fetching = false;
                entry.in_flight = None;
                match result {
                    Ok(value) => {
                        entry.value = Some(value);
                        entry.status = QueryStatus::Success;
                        entry.error = None;
                        entry.fetched_at = Some(Instant::now());
                        entry.updated_at = Some(Utc::now());
                        entry.is_invalidated = false;
                        entry.failure_count = 0;
                    }
                    Err(err) => {
                        warn!("fetch for {} failed after {retries} retries: {err}", self.key);
                        entry.status = QueryStatus::Error;
                        entry.error = Some(ErrorInfo::from(&err));
                        entry.failure_count = retries + 1;
                    }
                }
            });
            unobserved_gc(&state)
        };

        if let Some(gc_time) = unobserved_gc {
            schedule_gc(self.cache.clone(), gc_time);
        }
        true
    }

    fn set_value(&self, value: T) {
        let unobserved_gc = {
            let mut state = self.lock();
            if let Some(previous) = state.cancel.take() {
                previous.cancel();
            }
            state.generation += 1;
            self.tx.send_modify(|entry| {
                entry.value = Some(value);
                entry.status = QueryStatus::Success;
                entry.error = None;
                entry.fetched_at = Some(Instant::now());
                entry.updated_at = Some(Utc::now());
                entry.is_fetching = false;
                entry.is_invalidated = false;
                entry.in_flight = None;
                entry.failure_count = 0;
            });
            unobserved_gc(&state)
        };

        if let Some(gc_time) = unobserved_gc {
            schedule_gc(self.cache.clone(), gc_time);
        }
    }

    fn attach(&self, fetcher: FetchFn<T>, options: QueryOptions) -> bool {
        let mut state = self.lock();
        state.fetcher = Some(fetcher);
        state.options = options;
        state.subscribers += 1;
        state.idle_since = None;

        let entry = self.tx.borrow();
        let needs_fetch =
            !entry.is_fetching && entry.is_stale(state.options.stale_time, Instant::now());
        needs_fetch
    }

    fn detach(&self) {
        let unobserved_gc = {
            let mut state = self.lock();
            state.subscribers = state.subscribers.saturating_sub(1);
            if state.subscribers == 0 {
                state.idle_since = Some(Instant::now());
            }
            unobserved_gc(&state)
        };

        if let Some(gc_time) = unobserved_gc {
            schedule_gc(self.cache.clone(), gc_time);
        }
    }
}

fn unobserved_gc<T>(state: &SlotState<T>) -> Option<Duration> {
    if state.subscribers == 0 {
        state.options.gc_time
    } else {
        None
    }
}

impl<T: QueryValue> ErasedSlot for Slot<T> {
    fn key(&self) -> &QueryKey {
        &self.key
    }

    fn invalidate(self: Arc<Self>) {
        let observed = {
            let state = self.lock();
            self.tx.send_modify(|entry| entry.is_invalidated = true);
            state.subscribers > 0
        };
        if observed {
            self.start_fetch();
        }
    }

    fn refetch(self: Arc<Self>) {
        self.start_fetch();
    }

    fn cancel(&self) {
        let mut state = self.lock();
        let Some(handle) = state.cancel.take() else {
            return;
        };
        handle.cancel();
        state.generation += 1;
        debug!("cancelled in-flight fetch for {}", self.key);
        self.tx.send_modify(|entry| {
            entry.is_fetching = false;
            entry.in_flight = None;
            entry.settle_status();
        });
    }

    fn is_evictable(&self, now: Instant) -> bool {
        let state = self.lock();
        if state.subscribers > 0 || self.tx.borrow().is_fetching {
            return false;
        }
        match (state.options.gc_time, state.idle_since) {
            (Some(gc_time), Some(since)) => now.saturating_duration_since(since) >= gc_time,
            _ => false,
        }
    }

    fn as_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}

struct CacheInner {
    slots: Mutex<HashMap<QueryKey, Arc<dyn ErasedSlot>>>,
    defaults: QueryOptions,
}

impl CacheInner {
    fn slots(&self) -> MutexGuard<'_, HashMap<QueryKey, Arc<dyn ErasedSlot>>> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn evict_idle(&self) -> usize {
        let now = Instant::now();
        let mut slots = self.slots();
        let before = slots.len();
        slots.retain(|key, slot| {
            let evict = slot.is_evictable(now);
            if evict {
                debug!("evicting unobserved cache entry {key}");
            }
            !evict
        });
        before - slots.len()
    }
}

fn schedule_gc(cache: Weak<CacheInner>, delay: Duration) {
    let Ok(handle) = tokio::runtime::Handle::try_current() else {
        return;
    };
    handle.spawn(async move {
        sleep(delay).await;
        if let Some(inner) = cache.upgrade() {
            inner.evict_idle();
        }
    });
}

/// Keyed cache of async results with one in-flight fetch per key.
///
/// Cheap to clone; clones share the same entries. Fetches run on the ambient
/// Tokio runtime, so subscribing, invalidating and refetching must happen
/// inside one.
#[derive(Clone)]
pub struct QueryCache {
    inner: Arc<CacheInner>,
}

impl Default for QueryCache {
    fn default() -> Self {
        Self::new(QueryOptions::default())
    }
}

impl QueryCache {
    pub fn new(defaults: QueryOptions) -> Self {
        Self {
            inner: Arc::new(CacheInner {
                slots: Mutex::new(HashMap::new()),
                defaults,
            }),
        }
    }

    /// Register interest in `key`. Triggers `fetch` when the key has no value
    /// or the value is stale, unless a fetch is already in flight, in which
    /// case the subscriber shares it.
    pub fn subscribe<T, F, Fut>(
        &self,
        key: QueryKey,
        fetch: F,
        options: QueryOptions,
    ) -> Result<Subscription<T>>
    where
        T: QueryValue,
        F: Fn(CancelSignal) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        let fetcher: FetchFn<T> =
            Arc::new(move |signal: CancelSignal| -> BoxFuture<'static, Result<T>> {
                Box::pin(fetch(signal))
            });
        let slot = self.slot_for::<T>(&key)?;
        if slot.attach(fetcher, options) {
            slot.start_fetch();
        }
        let rx = slot.tx.subscribe();
        Ok(Subscription { slot, rx })
    }

    /// Mark every entry under `prefix` stale. Values stay readable; observed
    /// entries refetch right away, unobserved ones on their next subscription.
    pub fn invalidate(&self, prefix: &QueryKey) {
        for slot in self.matching(prefix) {
            debug!("invalidating {}", slot.key());
            slot.invalidate();
        }
    }

    /// Force a fetch for every entry under `prefix`, ignoring staleness.
    pub fn refetch(&self, prefix: &QueryKey) {
        for slot in self.matching(prefix) {
            slot.refetch();
        }
    }

    /// Cancel in-flight fetches under `prefix`; their results are discarded.
    pub fn cancel(&self, prefix: &QueryKey) {
        for slot in self.matching(prefix) {
            slot.cancel();
        }
    }

    /// Install `value` as fresh data for `key` without fetching. Supersedes any
    /// in-flight fetch for that key.
    pub fn set_data<T: QueryValue>(&self, key: QueryKey, value: T) -> Result<()> {
        self.slot_for::<T>(&key)?.set_value(value);
        Ok(())
    }

    pub fn get_data<T: QueryValue>(&self, key: &QueryKey) -> Option<T> {
        self.entry::<T>(key).and_then(|entry| entry.value)
    }

    pub fn entry<T: QueryValue>(&self, key: &QueryKey) -> Option<CacheEntry<T>> {
        let slot = self.inner.slots().get(key).cloned()?;
        let slot = slot.as_any().downcast::<Slot<T>>().ok()?;
        let entry = slot.tx.borrow().clone();
        Some(entry)
    }

    pub fn contains(&self, key: &QueryKey) -> bool {
        self.inner.slots().contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.inner.slots().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Evict every unobserved entry whose retention window has elapsed.
    pub fn collect_garbage(&self) -> usize {
        self.inner.evict_idle()
    }

    fn slot_for<T: QueryValue>(&self, key: &QueryKey) -> Result<Arc<Slot<T>>> {
        let mut slots = self.inner.slots();
        if let Some(existing) = slots.get(key) {
            return Arc::clone(existing)
                .as_any()
                .downcast::<Slot<T>>()
                .map_err(|_| AppError::CacheTypeMismatch {
                    key: key.to_string(),
                });
        }

        let slot = Arc::new(Slot::<T>::new(
            key.clone(),
            self.inner.defaults.clone(),
            Arc::downgrade(&self.inner),
        ));
        slots.insert(key.clone(), Arc::clone(&slot) as Arc<dyn ErasedSlot>);
        Ok(slot)
    }

    fn matching(&self, prefix: &QueryKey) -> Vec<Arc<dyn ErasedSlot>> {
        self.inner
            .slots()
            .values()
            .filter(|slot| slot.key().starts_with(prefix))
            .cloned()
            .collect()
    }
}

/// Live view of one cache entry. Dropping it releases interest in the key and
/// starts the entry's retention countdown once nobody else observes it.
pub struct Subscription<T: QueryValue> {
    slot: Arc<Slot<T>>,
    rx: watch::Receiver<CacheEntry<T>>,
}

impl<T: QueryValue> Subscription<T> {
    pub fn key(&self) -> &QueryKey {
        &self.slot.key
    }

    pub fn snapshot(&self) -> CacheEntry<T> {
        self.rx.borrow().clone()
    }

    pub fn data(&self) -> Option<T> {
        self.rx.borrow().value.clone()
    }

    pub fn receiver(&self) -> watch::Receiver<CacheEntry<T>> {
        self.rx.clone()
    }

    /// Wait for the next state transition of the entry.
    pub async fn changed(&mut self) -> Result<()> {
        self.rx
            .changed()
            .await
            .map_err(|_| AppError::message(format!("cache entry {} was dropped", self.key())))
    }

    /// Wait until no fetch is in flight and return the settled entry.
    pub async fn settled(&mut self) -> CacheEntry<T> {
        if let Ok(entry) = self.rx.wait_for(|entry| !entry.is_fetching).await {
            return entry.clone();
        }
        self.snapshot()
    }

    /// Fetch again regardless of staleness, superseding any in-flight fetch.
    pub fn refetch(&self) -> Option<FetchToken> {
        self.slot.start_fetch()
    }
}

impl<T: QueryValue> Drop for Subscription<T> {
    fn drop(&mut self) {
        self.slot.detach();
    }
}
