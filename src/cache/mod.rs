//! Request caching for remote calls.
//!
//! This module provides an endpoint-agnostic caching mechanism that:
//! - Keys entries by endpoint plus a normalized, order-independent parameter set
//! - Deduplicates concurrent fetches of the same key
//! - Serves stale entries while revalidating them in the background
//! - Supports invalidation by key or endpoint prefix, refetch intervals and
//!   cancellation when the last consumer goes away

mod entry;
mod key;
mod layer;

pub use entry::{
  CacheEntry, CacheEvent, CacheEventKind, CacheOptions, CacheResult, CacheSource, EntryState,
  InvalidateTarget,
};
pub use key::CacheKey;
pub use layer::{RequestCache, Subscription};
