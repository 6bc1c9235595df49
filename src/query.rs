//! Poll-driven handle a view uses to read one remote resource.
//!
//! Inspired by TanStack Query: a `RemoteView<T>` exposes loading, success and
//! error states for one cache key. Fetches go through the shared
//! [`RequestCache`], so two views on the same key share one request, and the
//! view holds a cache subscription for as long as it lives.
//!
//! # Example
//!
//! ```ignore
//! let mut view = ctx.opportunities(Endpoint::TopPains, &state);
//!
//! // In event loop tick
//! if view.poll() {
//!     // State changed, trigger re-render
//! }
//!
//! // In render
//! match view.state() {
//!     QueryState::Loading => render_spinner(),
//!     QueryState::Success(page) => render_page(page),
//!     QueryState::Error(e) => render_retry(e.user_message()),
//!     QueryState::Idle => {}
//! }
//! ```

use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use serde::Serialize;
use tokio::sync::broadcast::error::TryRecvError as EventRecvError;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::debug;

use crate::cache::{
  CacheEvent, CacheEventKind, CacheKey, CacheOptions, CacheResult, CacheSource, InvalidateTarget, RequestCache,
  Subscription,
};
use crate::error::FetchError;

/// The state of a view's data
#[derive(Debug, Clone)]
pub enum QueryState<T> {
  /// Nothing requested yet
  Idle,
  /// First fetch in progress
  Loading,
  /// Data available
  Success(Arc<T>),
  /// Last fetch failed
  Error(FetchError),
}

impl<T> QueryState<T> {
  pub fn is_loading(&self) -> bool {
    matches!(self, QueryState::Loading)
  }

  pub fn is_success(&self) -> bool {
    matches!(self, QueryState::Success(_))
  }

  pub fn is_error(&self) -> bool {
    matches!(self, QueryState::Error(_))
  }

  pub fn error(&self) -> Option<&FetchError> {
    match self {
      QueryState::Error(e) => Some(e),
      _ => None,
    }
  }
}

type Fetcher<T> = Arc<dyn Fn() -> BoxFuture<'static, Result<T, FetchError>> + Send + Sync>;
type Outcome<T> = Result<CacheResult<T>, FetchError>;

/// One cache key as seen by one consumer.
pub struct RemoteView<T> {
  key: CacheKey,
  options: CacheOptions,
  cache: RequestCache,
  fetcher: Fetcher<T>,
  state: QueryState<T>,
  /// Last good data, kept across later failures and reloads
  data: Option<Arc<T>>,
  source: Option<CacheSource>,
  fetched_at: Option<DateTime<Utc>>,
  receiver: Option<mpsc::UnboundedReceiver<Outcome<T>>>,
  /// Task resolving the pending read; aborted when the view goes away
  task: Option<JoinHandle<()>>,
  /// The cache changed while a read was pending; read again once it lands
  reread: bool,
  events: broadcast::Receiver<CacheEvent>,
  _subscription: Subscription,
}

impl<T: Serialize + Send + Sync + 'static> RemoteView<T> {
  /// Subscribe to `key` and start resolving it.
  pub fn new<F>(cache: RequestCache, key: CacheKey, options: CacheOptions, fetcher: F) -> Self
  where
    F: Fn() -> BoxFuture<'static, Result<T, FetchError>> + Send + Sync + 'static,
  {
    let events = cache.events();
    let subscription = cache.subscribe(&key, options);
    let mut view = Self {
      key,
      options,
      cache,
      fetcher: Arc::new(fetcher),
      state: QueryState::Idle,
      data: None,
      source: None,
      fetched_at: None,
      receiver: None,
      task: None,
      reread: false,
      events,
      _subscription: subscription,
    };
    view.fetch();
    view
  }

  pub fn key(&self) -> &CacheKey {
    &self.key
  }

  pub fn state(&self) -> &QueryState<T> {
    &self.state
  }

  /// Latest data, including data still shown while a failed refresh is
  /// reported through [`error`](Self::error).
  pub fn data(&self) -> Option<&T> {
    self.data.as_deref()
  }

  pub fn data_arc(&self) -> Option<Arc<T>> {
    self.data.clone()
  }

  pub fn is_loading(&self) -> bool {
    self.state.is_loading()
  }

  pub fn is_error(&self) -> bool {
    self.state.is_error()
  }

  pub fn error(&self) -> Option<&FetchError> {
    self.state.error()
  }

  /// Whether the data shown was served stale from the cache.
  pub fn is_stale(&self) -> bool {
    self.source == Some(CacheSource::CacheStale)
  }

  pub fn fetched_at(&self) -> Option<DateTime<Utc>> {
    self.fetched_at
  }

  /// Resolve the key unless a resolution is already pending.
  pub fn fetch(&mut self) {
    if self.receiver.is_some() {
      return;
    }
    self.start_fetch();
  }

  /// Drop the cached value and fetch again (the retry affordance).
  pub fn refetch(&mut self) {
    self.receiver = None;
    self.reread = false;
    self.cache.invalidate(InvalidateTarget::Key(self.key.clone()));
    self.start_fetch();
  }

  /// Apply finished fetches and cache notifications for this key.
  ///
  /// Returns `true` if the state changed. Call this in your event loop tick.
  pub fn poll(&mut self) -> bool {
    let mut changed = self.drain_events();

    let Some(receiver) = &mut self.receiver else {
      return changed;
    };
    match receiver.try_recv() {
      Ok(outcome) => {
        self.receiver = None;
        self.apply(outcome);
        changed = true;
        if std::mem::take(&mut self.reread) {
          self.start_fetch();
        }
      }
      Err(mpsc::error::TryRecvError::Empty) => {}
      Err(mpsc::error::TryRecvError::Disconnected) => {
        self.receiver = None;
        self.apply(Err(FetchError::Cancelled));
        changed = true;
      }
    }
    changed
  }

  /// Wait for the pending resolution, if any, and return the current data.
  pub async fn settle(&mut self) -> Result<Arc<T>, FetchError> {
    if let Some(mut receiver) = self.receiver.take() {
      let outcome = receiver.recv().await.unwrap_or(Err(FetchError::Cancelled));
      self.apply(outcome);
    }
    match (&self.state, &self.data) {
      (QueryState::Error(e), _) => Err(e.clone()),
      (_, Some(data)) => Ok(Arc::clone(data)),
      _ => Err(FetchError::Cancelled),
    }
  }

  fn drain_events(&mut self) -> bool {
    let mut changed = false;
    loop {
      match self.events.try_recv() {
        Ok(event) if event.key == self.key => match event.kind {
          CacheEventKind::Updated { revision } => {
            debug!(key = %self.key, revision, "cached value changed, re-reading");
            self.follow_refresh();
          }
          // Same payload, but a stale view becomes fresh again
          CacheEventKind::Refreshed { .. } if self.receiver.is_some() || self.is_stale() => {
            self.follow_refresh();
          }
          CacheEventKind::Refreshed { .. } => {}
          CacheEventKind::Failed(error) => {
            // A pending read reports the same failure itself
            if self.receiver.is_none() {
              self.state = QueryState::Error(error);
              changed = true;
            }
          }
          CacheEventKind::Invalidated => {}
        },
        Ok(_) => {}
        Err(EventRecvError::Lagged(skipped)) => {
          debug!(key = %self.key, skipped, "missed cache events, re-reading");
          self.fetch();
        }
        Err(EventRecvError::Empty) | Err(EventRecvError::Closed) => break,
      }
    }
    changed
  }

  fn follow_refresh(&mut self) {
    if self.receiver.is_some() {
      self.reread = true;
    } else {
      self.start_fetch();
    }
  }

  fn apply(&mut self, outcome: Outcome<T>) {
    match outcome {
      Ok(result) => {
        self.source = Some(result.source);
        self.fetched_at = result.fetched_at;
        self.data = Some(Arc::clone(&result.data));
        self.state = QueryState::Success(result.data);
      }
      Err(FetchError::Cancelled) if self.data.is_some() => {}
      Err(error) => self.state = QueryState::Error(error),
    }
  }

  fn start_fetch(&mut self) {
    let (tx, rx) = mpsc::unbounded_channel();
    self.receiver = Some(rx);
    if self.data.is_none() {
      self.state = QueryState::Loading;
    }

    let cache = self.cache.clone();
    let key = self.key.clone();
    let options = self.options;
    let fetcher = Arc::clone(&self.fetcher);
    let task = tokio::spawn(async move {
      let result = cache.get(&key, options, move || fetcher()).await;
      // Ignore send errors - the view may have been dropped
      let _ = tx.send(result);
    });
    if let Some(previous) = self.task.replace(task) {
      previous.abort();
    }
  }
}

impl<T> Drop for RemoteView<T> {
  fn drop(&mut self) {
    if let Some(task) = self.task.take() {
      task.abort();
    }
  }
}

impl<T: std::fmt::Debug> std::fmt::Debug for RemoteView<T> {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("RemoteView")
      .field("key", &self.key)
      .field("state", &self.state)
      .field("source", &self.source)
      .finish_non_exhaustive()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use futures::FutureExt;
  use std::sync::atomic::{AtomicU32, Ordering};
  use std::time::Duration;

  fn counter_fetcher(
    counter: Arc<AtomicU32>,
  ) -> impl Fn() -> BoxFuture<'static, Result<u32, FetchError>> + Send + Sync + 'static {
    move || {
      let counter = counter.clone();
      async move {
        tokio::time::sleep(Duration::from_millis(10)).await;
        Ok(counter.fetch_add(1, Ordering::SeqCst))
      }
      .boxed()
    }
  }

  #[tokio::test(start_paused = true)]
  async fn test_view_success() {
    let cache = RequestCache::default();
    let counter = Arc::new(AtomicU32::new(7));
    let mut view = RemoteView::new(cache, CacheKey::new("ops/queues"), CacheOptions::default(), counter_fetcher(counter));

    assert!(view.is_loading());
    tokio::time::sleep(Duration::from_millis(20)).await;

    assert!(view.poll());
    assert!(view.state().is_success());
    assert_eq!(view.data(), Some(&7));
  }

  #[tokio::test(start_paused = true)]
  async fn test_view_error() {
    let cache = RequestCache::default();
    let mut view: RemoteView<u32> = RemoteView::new(cache, CacheKey::new("ops/runs"), CacheOptions::default(), || {
      async { Err(FetchError::transport("/ops/runs", "connection refused")) }.boxed()
    });

    let err = view.settle().await.unwrap_err();
    assert!(err.is_transport());
    assert!(view.is_error());
    assert!(view.error().unwrap().user_message().contains("unreachable"));
  }

  #[tokio::test(start_paused = true)]
  async fn test_views_share_one_fetch() {
    let cache = RequestCache::default();
    let counter = Arc::new(AtomicU32::new(0));
    let key = CacheKey::new("verticals");
    let mut a = RemoteView::new(cache.clone(), key.clone(), CacheOptions::default(), counter_fetcher(counter.clone()));
    let mut b = RemoteView::new(cache, key, CacheOptions::default(), counter_fetcher(counter.clone()));

    assert_eq!(*a.settle().await.unwrap(), 0);
    assert_eq!(*b.settle().await.unwrap(), 0);
    assert_eq!(counter.load(Ordering::SeqCst), 1);
  }

  #[tokio::test(start_paused = true)]
  async fn test_refetch_picks_up_new_value() {
    let cache = RequestCache::default();
    let counter = Arc::new(AtomicU32::new(0));
    let mut view = RemoteView::new(cache, CacheKey::new("overview"), CacheOptions::default(), counter_fetcher(counter));
    assert_eq!(*view.settle().await.unwrap(), 0);

    view.refetch();
    // Old data stays visible while the refresh runs
    assert_eq!(view.data(), Some(&0));
    tokio::time::sleep(Duration::from_millis(50)).await;
    view.poll();
    tokio::time::sleep(Duration::from_millis(10)).await;
    view.poll();
    assert_eq!(view.data(), Some(&1));
  }

  #[tokio::test(start_paused = true)]
  async fn test_view_follows_refetch_interval() {
    let cache = RequestCache::default();
    let counter = Arc::new(AtomicU32::new(0));
    let options = CacheOptions::new(Duration::from_secs(10)).with_refetch_interval(Duration::from_secs(15));
    let mut view = RemoteView::new(cache, CacheKey::new("ops/queues"), options, counter_fetcher(counter));
    assert_eq!(*view.settle().await.unwrap(), 0);

    tokio::time::sleep(Duration::from_secs(16)).await;
    view.poll();
    tokio::time::sleep(Duration::from_millis(10)).await;
    view.poll();
    assert_eq!(view.data(), Some(&1));
  }

  #[tokio::test(start_paused = true)]
  async fn test_unmount_mid_fetch_leaves_cache_untouched() {
    let cache = RequestCache::default();
    let calls = Arc::new(AtomicU32::new(0));
    let key = CacheKey::new("insights/top_pains");
    let counted = calls.clone();
    let view = RemoteView::new(cache.clone(), key.clone(), CacheOptions::default(), move || {
      counted.fetch_add(1, Ordering::SeqCst);
      async {
        tokio::time::sleep(Duration::from_millis(100)).await;
        Ok::<_, FetchError>(1u32)
      }
      .boxed()
    });

    tokio::time::sleep(Duration::from_millis(10)).await;
    drop(view);
    tokio::time::sleep(Duration::from_millis(500)).await;

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(cache.peek::<u32>(&key).is_none());
  }

  #[tokio::test(start_paused = true)]
  async fn test_unchanged_refetch_clears_staleness() {
    let cache = RequestCache::default();
    let mut view = RemoteView::new(cache, CacheKey::new("verticals"), CacheOptions::default(), || {
      async {
        tokio::time::sleep(Duration::from_millis(10)).await;
        Ok::<_, FetchError>(5u32)
      }
      .boxed()
    });
    view.settle().await.unwrap();

    view.refetch();
    tokio::time::sleep(Duration::from_millis(50)).await;
    view.poll();
    tokio::time::sleep(Duration::from_millis(10)).await;
    view.poll();

    assert_eq!(view.data(), Some(&5));
    assert!(!view.is_stale());
  }
}
