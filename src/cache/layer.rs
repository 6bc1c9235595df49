//! Request cache that orchestrates deduplication, staleness and refresh around
//! remote fetches.

use std::any::Any;
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::{BoxFuture, FutureExt, Shared};
use serde::Serialize;
use sha2::{Digest, Sha256};
use tokio::sync::broadcast;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::entry::{
  CacheEntry, CacheEvent, CacheEventKind, CacheOptions, CacheResult, EntryState,
  InvalidateTarget,
};
use super::key::CacheKey;
use crate::config::CacheConfig;
use crate::error::FetchError;

/// A get that keeps losing its fetch to cancellation gives up after this many tries.
const MAX_ATTEMPTS: usize = 3;
const EVENT_CAPACITY: usize = 64;

type Payload = Arc<dyn Any + Send + Sync>;

#[derive(Clone)]
struct Fetched {
  payload: Payload,
  digest: String,
}

type FetchFuture = BoxFuture<'static, Result<Fetched, FetchError>>;
type ErasedFetcher = Arc<dyn Fn() -> FetchFuture + Send + Sync>;

struct InFlight {
  id: u64,
  shared: Shared<FetchFuture>,
  token: CancellationToken,
}

struct Slot {
  payload: Option<Payload>,
  digest: Option<String>,
  fetched_at: Option<Instant>,
  fetched_at_utc: Option<DateTime<Utc>>,
  options: CacheOptions,
  invalidated: bool,
  failed: bool,
  last_error: Option<FetchError>,
  inflight: Option<InFlight>,
  fetcher: Option<ErasedFetcher>,
  subscribers: usize,
  /// The last subscriber left while a fetch was in flight
  abandoned: bool,
  timer: Option<CancellationToken>,
  revision: u64,
  last_access: Instant,
}

impl Slot {
  fn new(options: CacheOptions, now: Instant) -> Self {
    Self {
      payload: None,
      digest: None,
      fetched_at: None,
      fetched_at_utc: None,
      options,
      invalidated: false,
      failed: false,
      last_error: None,
      inflight: None,
      fetcher: None,
      subscribers: 0,
      abandoned: false,
      timer: None,
      revision: 0,
      last_access: now,
    }
  }

  fn is_stale(&self, now: Instant) -> bool {
    if self.invalidated {
      return true;
    }
    match self.fetched_at {
      Some(at) => now.duration_since(at) >= self.options.stale_time,
      None => true,
    }
  }

  /// `None` while nothing has ever been committed for the key.
  fn state(&self, now: Instant) -> Option<EntryState> {
    if self.inflight.is_some() {
      Some(EntryState::Fetching)
    } else if self.failed {
      Some(EntryState::Failed)
    } else if self.payload.is_some() {
      Some(if self.is_stale(now) {
        EntryState::Stale
      } else {
        EntryState::Fresh
      })
    } else {
      None
    }
  }

  fn evictable(&self) -> bool {
    self.subscribers == 0 && self.inflight.is_none()
  }
}

enum Lookup {
  Hit {
    payload: Payload,
    fetched_at: Option<DateTime<Utc>>,
    stale: bool,
  },
  Wait(Shared<FetchFuture>),
}

struct Inner {
  slots: Mutex<HashMap<CacheKey, Slot>>,
  events: broadcast::Sender<CacheEvent>,
  next_fetch_id: AtomicU64,
  max_entries: usize,
  idle_ttl: Duration,
}

/// Keyed, deduplicated cache of remote calls.
///
/// - Fresh entries are served without calling the fetcher.
/// - Stale entries are served immediately while one background refresh runs.
/// - Absent or failed entries are fetched; concurrent callers for the same
///   key share a single outstanding fetch.
///
/// The cache is an explicitly constructed, cheaply clonable handle; every
/// clone shares the same entries. It must be used from within a tokio runtime.
#[derive(Clone)]
pub struct RequestCache {
  inner: Arc<Inner>,
}

impl Default for RequestCache {
  fn default() -> Self {
    Self::new(&CacheConfig::default())
  }
}

impl RequestCache {
  pub fn new(config: &CacheConfig) -> Self {
    Self::with_limits(config.max_entries, config.idle_ttl())
  }

  /// Create a cache holding at most `max_entries` keys, dropping keys nobody
  /// has touched for `idle_ttl`.
  pub fn with_limits(max_entries: usize, idle_ttl: Duration) -> Self {
    let (events, _rx) = broadcast::channel(EVENT_CAPACITY);
    Self {
      inner: Arc::new(Inner {
        slots: Mutex::new(HashMap::new()),
        events,
        next_fetch_id: AtomicU64::new(1),
        max_entries: max_entries.max(1),
        idle_ttl,
      }),
    }
  }

  /// Resolve `key`, calling `fetcher` only when the entry is absent, failed or
  /// stale.
  ///
  /// The fetcher is kept for background refreshes (staleness, invalidation,
  /// refetch intervals) until a later `get` for the same key replaces it. It
  /// must not call back into the cache synchronously.
  pub async fn get<T, F, Fut>(
    &self,
    key: &CacheKey,
    options: CacheOptions,
    fetcher: F,
  ) -> Result<CacheResult<T>, FetchError>
  where
    T: Serialize + Send + Sync + 'static,
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<T, FetchError>> + Send + 'static,
  {
    let fetcher = erase(fetcher);

    for _ in 0..MAX_ATTEMPTS {
      let shared = match self.inner.lookup(key, options, &fetcher) {
        Lookup::Hit {
          payload,
          fetched_at,
          stale,
        } => {
          let data = downcast::<T>(key, payload)?;
          return Ok(CacheResult::from_cache(data, fetched_at, stale));
        }
        Lookup::Wait(shared) => shared,
      };

      match shared.await {
        Ok(fetched) => {
          let data = downcast::<T>(key, fetched.payload)?;
          return Ok(CacheResult::from_network(data, Some(Utc::now())));
        }
        Err(FetchError::Cancelled) if self.inner.is_abandoned(key) => {
          debug!(key = %key, "fetch abandoned by its last subscriber");
          return Err(FetchError::Cancelled);
        }
        Err(FetchError::Cancelled) => {
          debug!(key = %key, "fetch was cancelled under a waiting caller, retrying");
        }
        Err(e) => return Err(e),
      }
    }

    Err(FetchError::Cancelled)
  }

  /// Mark matching entries stale and cancel their in-flight fetches. Entries
  /// with subscribers are refetched right away. Returns how many matched.
  pub fn invalidate(&self, target: InvalidateTarget) -> usize {
    self.inner.invalidate(&target)
  }

  /// Start a background fetch for `key` unless one is already running.
  /// Returns `false` when the key has never been fetched.
  pub fn refetch(&self, key: &CacheKey) -> bool {
    self.inner.refresh(key)
  }

  /// Register interest in `key`. While at least one subscription is alive the
  /// key keeps its refetch interval timer and cannot be evicted; when the last
  /// one drops, its in-flight fetch is abandoned.
  pub fn subscribe(&self, key: &CacheKey, options: CacheOptions) -> Subscription {
    self.inner.attach(key, options);
    Subscription {
      inner: Arc::clone(&self.inner),
      key: key.clone(),
    }
  }

  /// Notifications for refreshed, failed and invalidated keys.
  pub fn events(&self) -> broadcast::Receiver<CacheEvent> {
    self.inner.events.subscribe()
  }

  /// Snapshot of an entry, or `None` when nothing was ever stored for `key`.
  pub fn peek<T: Send + Sync + 'static>(&self, key: &CacheKey) -> Option<CacheEntry<T>> {
    let now = Instant::now();
    let slots = self.inner.lock();
    let slot = slots.get(key)?;
    let state = slot.state(now)?;
    let stale_after = slot.fetched_at_utc.and_then(|at| {
      chrono::Duration::from_std(slot.options.stale_time)
        .ok()
        .map(|ttl| at + ttl)
    });

    Some(CacheEntry {
      key: key.clone(),
      payload: slot
        .payload
        .clone()
        .and_then(|p| p.downcast::<T>().ok()),
      fetched_at: slot.fetched_at_utc,
      stale_after,
      state,
      last_error: slot.last_error.clone(),
      revision: slot.revision,
      subscribers: slot.subscribers,
    })
  }

  pub fn len(&self) -> usize {
    self.inner.lock().len()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }
}

/// Consumer interest in one key. Dropping it releases the interest.
pub struct Subscription {
  inner: Arc<Inner>,
  key: CacheKey,
}

impl Subscription {
  pub fn key(&self) -> &CacheKey {
    &self.key
  }
}

impl Drop for Subscription {
  fn drop(&mut self) {
    self.inner.detach(&self.key);
  }
}

impl Inner {
  fn lock(&self) -> MutexGuard<'_, HashMap<CacheKey, Slot>> {
    self.slots.lock().unwrap_or_else(PoisonError::into_inner)
  }

  fn slot<'a>(
    &self,
    slots: &'a mut HashMap<CacheKey, Slot>,
    key: &CacheKey,
    options: CacheOptions,
    now: Instant,
  ) -> &'a mut Slot {
    if !slots.contains_key(key) {
      self.evict(slots, now);
    }
    slots
      .entry(key.clone())
      .or_insert_with(|| Slot::new(options, now))
  }

  fn lookup(self: &Arc<Self>, key: &CacheKey, options: CacheOptions, fetcher: &ErasedFetcher) -> Lookup {
    let now = Instant::now();
    let mut slots = self.lock();
    let slot = self.slot(&mut slots, key, options, now);

    slot.last_access = now;
    slot.options = options;
    slot.fetcher = Some(Arc::clone(fetcher));

    if !slot.failed {
      if let Some(payload) = slot.payload.clone() {
        let stale = slot.is_stale(now);
        if stale && slot.inflight.is_none() {
          debug!(key = %key, "serving stale payload, revalidating in background");
          self.start_fetch(key, slot, Arc::clone(fetcher));
        } else if !stale {
          debug!(key = %key, "cache hit");
        }
        return Lookup::Hit {
          payload,
          fetched_at: slot.fetched_at_utc,
          stale,
        };
      }
    }

    let shared = match &slot.inflight {
      Some(inflight) => {
        debug!(key = %key, "joining in-flight fetch");
        inflight.shared.clone()
      }
      None => {
        debug!(key = %key, "cache miss");
        self.start_fetch(key, slot, Arc::clone(fetcher))
      }
    };
    Lookup::Wait(shared)
  }

  /// Launch a fetch driven by its own task so it completes (and commits) even
  /// if every awaiting caller goes away.
  fn start_fetch(
    self: &Arc<Self>,
    key: &CacheKey,
    slot: &mut Slot,
    fetcher: ErasedFetcher,
  ) -> Shared<FetchFuture> {
    let id = self.next_fetch_id.fetch_add(1, Ordering::Relaxed);
    let token = CancellationToken::new();

    let inner = Arc::clone(self);
    let commit_key = key.clone();
    let commit_token = token.clone();
    let future: FetchFuture = async move {
      let result = tokio::select! {
        biased;
        _ = commit_token.cancelled() => Err(FetchError::Cancelled),
        result = fetcher() => result,
      };
      inner.commit(&commit_key, id, &commit_token, &result);
      result
    }
    .boxed();

    let shared = future.shared();
    tokio::spawn(shared.clone());
    slot.abandoned = false;
    slot.inflight = Some(InFlight {
      id,
      shared: shared.clone(),
      token,
    });
    shared
  }

  fn commit(
    &self,
    key: &CacheKey,
    id: u64,
    token: &CancellationToken,
    result: &Result<Fetched, FetchError>,
  ) {
    let mut slots = self.lock();
    let Some(slot) = slots.get_mut(key) else {
      debug!(key = %key, "entry evicted before fetch landed");
      return;
    };
    if slot.inflight.as_ref().map(|f| f.id) != Some(id) {
      debug!(key = %key, "discarding superseded fetch");
      return;
    }
    slot.inflight = None;
    if token.is_cancelled() {
      return;
    }

    match result {
      Ok(fetched) => {
        let changed = slot.digest.as_deref() != Some(fetched.digest.as_str());
        slot.payload = Some(Arc::clone(&fetched.payload));
        slot.digest = Some(fetched.digest.clone());
        slot.fetched_at = Some(Instant::now());
        slot.fetched_at_utc = Some(Utc::now());
        slot.invalidated = false;
        slot.failed = false;
        slot.last_error = None;

        if changed {
          slot.revision += 1;
          debug!(key = %key, revision = slot.revision, "payload updated");
          let _ = self.events.send(CacheEvent {
            key: key.clone(),
            kind: CacheEventKind::Updated {
              revision: slot.revision,
            },
          });
        } else {
          debug!(key = %key, "payload unchanged");
          let _ = self.events.send(CacheEvent {
            key: key.clone(),
            kind: CacheEventKind::Refreshed {
              revision: slot.revision,
            },
          });
        }
      }
      Err(FetchError::Cancelled) => {}
      Err(e) => {
        warn!(key = %key, error = %e, "fetch failed");
        slot.failed = true;
        slot.last_error = Some(e.clone());
        let _ = self.events.send(CacheEvent {
          key: key.clone(),
          kind: CacheEventKind::Failed(e.clone()),
        });
      }
    }
  }

  /// Whether the key's last fetch was dropped because nobody watches it any
  /// more, with no newer fetch started since.
  fn is_abandoned(&self, key: &CacheKey) -> bool {
    self
      .lock()
      .get(key)
      .is_some_and(|slot| slot.abandoned && slot.inflight.is_none())
  }

  fn refresh(self: &Arc<Self>, key: &CacheKey) -> bool {
    let mut slots = self.lock();
    let Some(slot) = slots.get_mut(key) else {
      return false;
    };
    let Some(fetcher) = slot.fetcher.clone() else {
      return false;
    };
    if slot.inflight.is_none() {
      self.start_fetch(key, slot, fetcher);
    }
    true
  }

  fn invalidate(self: &Arc<Self>, target: &InvalidateTarget) -> usize {
    let mut slots = self.lock();
    let mut matched = 0;

    for (key, slot) in slots.iter_mut().filter(|(k, _)| target.matches(k)) {
      matched += 1;
      slot.invalidated = true;
      if let Some(inflight) = slot.inflight.take() {
        inflight.token.cancel();
      }
      let _ = self.events.send(CacheEvent {
        key: key.clone(),
        kind: CacheEventKind::Invalidated,
      });
      if slot.subscribers > 0 {
        if let Some(fetcher) = slot.fetcher.clone() {
          self.start_fetch(key, slot, fetcher);
        }
      }
    }

    info!(matcher = ?target, matched, "cache invalidated");
    matched
  }

  fn attach(self: &Arc<Self>, key: &CacheKey, options: CacheOptions) {
    let now = Instant::now();
    let mut slots = self.lock();
    let slot = self.slot(&mut slots, key, options, now);
    slot.subscribers += 1;
    slot.options = options;
    slot.last_access = now;

    if let (Some(period), None) = (options.refetch_interval, &slot.timer) {
      slot.timer = Some(self.start_timer(key, period));
    }
  }

  fn detach(&self, key: &CacheKey) {
    let mut slots = self.lock();
    let Some(slot) = slots.get_mut(key) else {
      return;
    };
    slot.subscribers = slot.subscribers.saturating_sub(1);
    slot.last_access = Instant::now();
    if slot.subscribers > 0 {
      return;
    }

    if let Some(inflight) = slot.inflight.take() {
      debug!(key = %key, "last subscriber gone, abandoning in-flight fetch");
      inflight.token.cancel();
      slot.abandoned = true;
    }
    if let Some(timer) = slot.timer.take() {
      timer.cancel();
    }
  }

  fn start_timer(self: &Arc<Self>, key: &CacheKey, period: Duration) -> CancellationToken {
    let token = CancellationToken::new();
    let stop = token.clone();
    let weak = Arc::downgrade(self);
    let key = key.clone();

    tokio::spawn(async move {
      let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
      ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
      loop {
        tokio::select! {
          _ = stop.cancelled() => break,
          _ = ticker.tick() => {
            let Some(inner) = weak.upgrade() else { break };
            debug!(key = %key, "refetch interval elapsed");
            inner.refresh(&key);
          }
        }
      }
    });

    token
  }

  /// Drop idle entries, then the least recently used ones until there is room
  /// for one more. Entries with subscribers or an in-flight fetch are kept.
  fn evict(&self, slots: &mut HashMap<CacheKey, Slot>, now: Instant) {
    let idle_ttl = self.idle_ttl;
    slots.retain(|key, slot| {
      let keep = !slot.evictable() || now.duration_since(slot.last_access) < idle_ttl;
      if !keep {
        debug!(key = %key, "evicting idle entry");
      }
      keep
    });

    while slots.len() >= self.max_entries {
      let victim = slots
        .iter()
        .filter(|(_, slot)| slot.evictable())
        .min_by_key(|(_, slot)| slot.last_access)
        .map(|(key, _)| key.clone());
      match victim {
        Some(key) => {
          debug!(key = %key, "evicting least recently used entry");
          slots.remove(&key);
        }
        None => break,
      }
    }
  }
}

fn erase<T, F, Fut>(fetcher: F) -> ErasedFetcher
where
  T: Serialize + Send + Sync + 'static,
  F: Fn() -> Fut + Send + Sync + 'static,
  Fut: Future<Output = Result<T, FetchError>> + Send + 'static,
{
  Arc::new(move || {
    let request = fetcher();
    async move {
      let value = request.await?;
      let digest = digest(&value);
      let payload: Payload = Arc::new(value);
      Ok(Fetched { payload, digest })
    }
    .boxed()
  })
}

/// Content digest used to tell whether a refresh changed anything.
fn digest<T: Serialize>(value: &T) -> String {
  static UNHASHABLE: AtomicU64 = AtomicU64::new(0);

  match serde_json::to_vec(value) {
    Ok(bytes) => hex::encode(Sha256::digest(&bytes)),
    Err(e) => {
      warn!(error = %e, "payload could not be digested, treating as changed");
      format!("unhashable-{}", UNHASHABLE.fetch_add(1, Ordering::Relaxed))
    }
  }
}

fn downcast<T: Send + Sync + 'static>(key: &CacheKey, payload: Payload) -> Result<Arc<T>, FetchError> {
  payload
    .downcast::<T>()
    .map_err(|_| FetchError::TypeMismatch(key.to_string()))
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::sync::atomic::AtomicUsize;
  use tokio::time::sleep;

  type Counter = Arc<AtomicUsize>;

  fn counting(
    counter: &Counter,
    delay: Duration,
  ) -> impl Fn() -> BoxFuture<'static, Result<usize, FetchError>> + Clone + Send + Sync + 'static {
    let counter = Arc::clone(counter);
    move || {
      let counter = Arc::clone(&counter);
      async move {
        let call = counter.fetch_add(1, Ordering::SeqCst) + 1;
        sleep(delay).await;
        Ok(call)
      }
      .boxed()
    }
  }

  fn key(endpoint: &str) -> CacheKey {
    CacheKey::new(endpoint).with_param("limit", "25")
  }

  fn options() -> CacheOptions {
    CacheOptions::new(Duration::from_secs(30))
  }

  fn calls(counter: &Counter) -> usize {
    counter.load(Ordering::SeqCst)
  }

  #[tokio::test(start_paused = true)]
  async fn test_fresh_entry_skips_fetcher() {
    let cache = RequestCache::default();
    let counter = Counter::default();
    let k = key("insights/top_pains");

    let first = cache.get(&k, options(), counting(&counter, Duration::ZERO)).await.unwrap();
    let second = cache.get(&k, options(), counting(&counter, Duration::ZERO)).await.unwrap();

    assert_eq!(first.source, crate::cache::CacheSource::Network);
    assert_eq!(second.source, crate::cache::CacheSource::CacheFresh);
    assert_eq!(*second.data, 1);
    assert_eq!(calls(&counter), 1);
    assert_eq!(cache.peek::<usize>(&k).unwrap().state, EntryState::Fresh);
  }

  #[tokio::test(start_paused = true)]
  async fn test_concurrent_gets_share_one_fetch() {
    let cache = RequestCache::default();
    let counter = Counter::default();
    let k = key("verticals");
    let fetch = counting(&counter, Duration::from_millis(50));

    let (a, b) = tokio::join!(
      cache.get(&k, options(), fetch.clone()),
      cache.get(&k, options(), fetch),
    );

    assert_eq!(calls(&counter), 1);
    assert_eq!(*a.unwrap().data, 1);
    assert_eq!(*b.unwrap().data, 1);
  }

  #[tokio::test(start_paused = true)]
  async fn test_stale_entry_is_served_and_refreshed_once() {
    let cache = RequestCache::default();
    let counter = Counter::default();
    let k = key("insights/emerging_opportunities");

    cache.get(&k, options(), counting(&counter, Duration::ZERO)).await.unwrap();
    sleep(Duration::from_secs(31)).await;

    let stale = cache.get(&k, options(), counting(&counter, Duration::ZERO)).await.unwrap();
    assert!(stale.is_stale());
    assert_eq!(*stale.data, 1);

    let again = cache.get(&k, options(), counting(&counter, Duration::ZERO)).await.unwrap();
    assert!(again.is_stale());

    sleep(Duration::from_millis(1)).await;
    assert_eq!(calls(&counter), 2);

    let fresh = cache.get(&k, options(), counting(&counter, Duration::ZERO)).await.unwrap();
    assert_eq!(fresh.source, crate::cache::CacheSource::CacheFresh);
    assert_eq!(*fresh.data, 2);
  }

  #[tokio::test(start_paused = true)]
  async fn test_failed_entry_is_refetched_on_next_get() {
    let cache = RequestCache::default();
    let k = key("ops/queues");

    let err = cache
      .get(&k, options(), || async {
        Err::<usize, _>(FetchError::transport("ops/queues", "connection refused"))
      })
      .await
      .unwrap_err();
    assert!(err.is_transport());

    let entry = cache.peek::<usize>(&k).unwrap();
    assert_eq!(entry.state, EntryState::Failed);
    assert!(entry.last_error.is_some());

    let ok = cache.get(&k, options(), || async { Ok(7usize) }).await.unwrap();
    assert_eq!(*ok.data, 7);
    assert_eq!(cache.peek::<usize>(&k).unwrap().state, EntryState::Fresh);
  }

  #[tokio::test(start_paused = true)]
  async fn test_invalidate_by_endpoint_prefix() {
    let cache = RequestCache::default();
    let counter = Counter::default();
    let page1 = CacheKey::new("insights/top_pains").with_param("offset", "0");
    let page2 = CacheKey::new("insights/top_pains").with_param("offset", "25");
    let other = CacheKey::new("verticals");

    for k in [&page1, &page2, &other] {
      cache.get(k, options(), counting(&counter, Duration::ZERO)).await.unwrap();
    }

    let matched = cache.invalidate(InvalidateTarget::endpoint("insights/top_pains"));
    assert_eq!(matched, 2);
    assert_eq!(cache.peek::<usize>(&page1).unwrap().state, EntryState::Stale);
    assert_eq!(cache.peek::<usize>(&page2).unwrap().state, EntryState::Stale);
    assert_eq!(cache.peek::<usize>(&other).unwrap().state, EntryState::Fresh);

    let served = cache.get(&page2, options(), counting(&counter, Duration::ZERO)).await.unwrap();
    assert!(served.is_stale());
    sleep(Duration::from_millis(1)).await;
    assert_eq!(calls(&counter), 4);
  }

  #[tokio::test(start_paused = true)]
  async fn test_dropping_last_subscription_discards_in_flight_result() {
    let cache = RequestCache::default();
    let counter = Counter::default();
    let k = key("insights/declining_risks");

    cache.get(&k, options(), counting(&counter, Duration::from_millis(100))).await.unwrap();

    let sub = cache.subscribe(&k, options());
    cache.invalidate(InvalidateTarget::Key(k.clone()));
    sleep(Duration::from_millis(10)).await;
    assert_eq!(cache.peek::<usize>(&k).unwrap().state, EntryState::Fetching);

    drop(sub);
    sleep(Duration::from_millis(200)).await;

    let entry = cache.peek::<usize>(&k).unwrap();
    assert_eq!(entry.state, EntryState::Stale);
    assert_eq!(entry.payload.as_deref(), Some(&1));
    assert_eq!(entry.revision, 1);
  }

  #[tokio::test(start_paused = true)]
  async fn test_waiting_get_gives_up_when_key_is_abandoned() {
    let cache = RequestCache::default();
    let counter = Counter::default();
    let k = key("insights/top_pains");

    let sub = cache.subscribe(&k, options());
    let waiter = tokio::spawn({
      let cache = cache.clone();
      let k = k.clone();
      let fetch = counting(&counter, Duration::from_millis(100));
      async move { cache.get(&k, options(), fetch).await }
    });
    sleep(Duration::from_millis(10)).await;
    drop(sub);

    assert_eq!(waiter.await.unwrap().unwrap_err(), FetchError::Cancelled);
    sleep(Duration::from_millis(200)).await;
    assert_eq!(calls(&counter), 1);
    assert!(cache.peek::<usize>(&k).is_none());
  }

  #[tokio::test(start_paused = true)]
  async fn test_refetch_interval_runs_while_subscribed() {
    let cache = RequestCache::default();
    let counter = Counter::default();
    let k = key("ops/queues");
    let opts = CacheOptions::new(Duration::from_secs(10))
      .with_refetch_interval(Duration::from_secs(15));

    let sub = cache.subscribe(&k, opts);
    cache.get(&k, opts, counting(&counter, Duration::ZERO)).await.unwrap();

    sleep(Duration::from_secs(46)).await;
    assert_eq!(calls(&counter), 4);

    drop(sub);
    sleep(Duration::from_secs(60)).await;
    assert_eq!(calls(&counter), 4);
  }

  #[tokio::test(start_paused = true)]
  async fn test_updated_event_only_when_payload_changes() {
    let cache = RequestCache::default();
    let mut events = cache.events();
    let k = key("verticals");

    cache.get(&k, options(), || async { Ok("same".to_string()) }).await.unwrap();
    cache.refetch(&k);
    sleep(Duration::from_millis(1)).await;

    let event = events.try_recv().unwrap();
    assert!(matches!(event.kind, CacheEventKind::Updated { revision: 1 }));
    let event = events.try_recv().unwrap();
    assert!(matches!(event.kind, CacheEventKind::Refreshed { revision: 1 }));
    assert!(events.try_recv().is_err());
    assert_eq!(cache.peek::<String>(&k).unwrap().revision, 1);
  }

  #[tokio::test(start_paused = true)]
  async fn test_bounded_size_evicts_least_recently_used() {
    let cache = RequestCache::with_limits(2, Duration::from_secs(300));

    for (i, endpoint) in ["a", "b", "c"].into_iter().enumerate() {
      cache
        .get(&CacheKey::new(endpoint), options(), move || async move { Ok(i) })
        .await
        .unwrap();
      sleep(Duration::from_millis(5)).await;
    }

    assert_eq!(cache.len(), 2);
    assert!(cache.peek::<usize>(&CacheKey::new("a")).is_none());
    assert!(cache.peek::<usize>(&CacheKey::new("c")).is_some());
  }

  #[tokio::test(start_paused = true)]
  async fn test_idle_entries_are_evicted() {
    let cache = RequestCache::with_limits(100, Duration::from_secs(60));
    cache.get(&CacheKey::new("old"), options(), || async { Ok(1u8) }).await.unwrap();
    sleep(Duration::from_secs(61)).await;
    cache.get(&CacheKey::new("new"), options(), || async { Ok(2u8) }).await.unwrap();

    assert_eq!(cache.len(), 1);
    assert!(cache.peek::<u8>(&CacheKey::new("old")).is_none());
  }

  #[tokio::test(start_paused = true)]
  async fn test_type_mismatch_is_reported() {
    let cache = RequestCache::default();
    let k = key("verticals");
    cache.get(&k, options(), || async { Ok(1u32) }).await.unwrap();

    let err = cache.get(&k, options(), || async { Ok("x".to_string()) }).await.unwrap_err();
    assert!(matches!(err, FetchError::TypeMismatch(_)));
  }
}
