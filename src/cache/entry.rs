//! Core types for the request cache: entry states, options, results and events.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};

use super::key::CacheKey;
use crate::error::FetchError;

/// Lifecycle state of a cache entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryState {
  /// Payload present and younger than its stale time
  Fresh,
  /// Payload present but past its stale time or invalidated
  Stale,
  /// A fetch for this key is outstanding
  Fetching,
  /// The last fetch failed
  Failed,
}

/// Point-in-time view of one entry.
#[derive(Debug, Clone)]
pub struct CacheEntry<T> {
  pub key: CacheKey,
  pub payload: Option<Arc<T>>,
  pub fetched_at: Option<DateTime<Utc>>,
  pub stale_after: Option<DateTime<Utc>>,
  pub state: EntryState,
  pub last_error: Option<FetchError>,
  /// Bumped each time a fetch lands a payload that differs from the previous one
  pub revision: u64,
  pub subscribers: usize,
}

/// Per-key fetch options.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheOptions {
  /// How long a payload is served without revalidation
  pub stale_time: Duration,
  /// Periodic re-fetch while the key has subscribers, independent of staleness
  pub refetch_interval: Option<Duration>,
}

impl Default for CacheOptions {
  fn default() -> Self {
    Self {
      stale_time: Duration::from_secs(30),
      refetch_interval: None,
    }
  }
}

impl CacheOptions {
  pub fn new(stale_time: Duration) -> Self {
    Self {
      stale_time,
      refetch_interval: None,
    }
  }

  pub fn with_refetch_interval(mut self, interval: Duration) -> Self {
    self.refetch_interval = Some(interval);
    self
  }
}

/// Result of a cache lookup, including where the data came from.
#[derive(Debug, Clone)]
pub struct CacheResult<T> {
  pub data: Arc<T>,
  pub source: CacheSource,
  pub fetched_at: Option<DateTime<Utc>>,
}

impl<T> CacheResult<T> {
  pub fn from_network(data: Arc<T>, fetched_at: Option<DateTime<Utc>>) -> Self {
    Self {
      data,
      source: CacheSource::Network,
      fetched_at,
    }
  }

  pub fn from_cache(data: Arc<T>, fetched_at: Option<DateTime<Utc>>, is_stale: bool) -> Self {
    Self {
      data,
      source: if is_stale {
        CacheSource::CacheStale
      } else {
        CacheSource::CacheFresh
      },
      fetched_at,
    }
  }

  pub fn is_stale(&self) -> bool {
    self.source == CacheSource::CacheStale
  }
}

/// Indicates where returned data came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheSource {
  /// Fetched for this call (or a call it was deduplicated with)
  Network,
  /// From cache, still fresh
  CacheFresh,
  /// From cache, stale; a background refresh is running
  CacheStale,
}

/// Notification about a key, broadcast to anyone listening.
#[derive(Debug, Clone)]
pub struct CacheEvent {
  pub key: CacheKey,
  pub kind: CacheEventKind,
}

#[derive(Debug, Clone)]
pub enum CacheEventKind {
  /// A fetch landed a payload different from the previous one
  Updated { revision: u64 },
  /// A fetch landed the same payload again; the entry is fresh once more
  Refreshed { revision: u64 },
  /// A fetch failed
  Failed(FetchError),
  /// The key was invalidated and will be refetched
  Invalidated,
}

/// What [`super::RequestCache::invalidate`] should match.
#[derive(Debug, Clone)]
pub enum InvalidateTarget {
  Key(CacheKey),
  /// Every key whose endpoint identifier starts with this prefix
  Endpoint(String),
}

impl InvalidateTarget {
  pub fn endpoint(prefix: impl Into<String>) -> Self {
    InvalidateTarget::Endpoint(prefix.into())
  }

  pub(crate) fn matches(&self, key: &CacheKey) -> bool {
    match self {
      InvalidateTarget::Key(k) => k == key,
      InvalidateTarget::Endpoint(prefix) => key.matches_endpoint(prefix),
    }
  }
}
