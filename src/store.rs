//! Canonical current view state, kept in sync with the shareable locator.

use std::sync::{Arc, Mutex};

use tokio::sync::watch;
use tracing::debug;

use crate::locator::{self, clamp_limit, Locator, SortKey, ViewState};

/// Two-way binding between a locator string and an addressable view.
///
/// Calls are fire-and-forget from the store's perspective: the store never
/// awaits, retries, or reads state back from the navigator after mounting.
pub trait Navigator: Send + Sync {
  /// Locator of the view being mounted.
  fn current(&self) -> String;

  /// Reflect a new locator, adding a history entry.
  fn push(&self, locator: &str);

  /// Drop the locator entirely.
  fn clear(&self);
}

/// In-memory navigator that keeps every pushed locator.
#[derive(Debug, Default)]
pub struct MemoryNavigator {
  history: Mutex<Vec<String>>,
}

impl MemoryNavigator {
  pub fn new(initial: impl Into<String>) -> Self {
    Self {
      history: Mutex::new(vec![initial.into()]),
    }
  }

  pub fn history(&self) -> Vec<String> {
    self
      .history
      .lock()
      .map(|h| h.clone())
      .unwrap_or_default()
  }
}

impl Navigator for MemoryNavigator {
  fn current(&self) -> String {
    self
      .history
      .lock()
      .ok()
      .and_then(|h| h.last().cloned())
      .unwrap_or_default()
  }

  fn push(&self, locator: &str) {
    if let Ok(mut history) = self.history.lock() {
      history.push(locator.to_string());
    }
  }

  fn clear(&self) {
    self.push("");
  }
}

/// Partial update of a [`ViewState`].
///
/// Optional fields use a nested `Option` so they can be cleared explicitly:
/// `vertical: Some(None)` removes the filter, `vertical: None` leaves it alone.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ViewPatch {
  pub free_text: Option<String>,
  pub vertical: Option<Option<String>>,
  pub tier: Option<Option<String>>,
  pub emerging_only: Option<bool>,
  pub sort: Option<SortKey>,
  pub limit: Option<u32>,
  pub offset: Option<u32>,
  pub inspect: Option<Option<String>>,
}

impl ViewPatch {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn free_text(mut self, text: impl Into<String>) -> Self {
    self.free_text = Some(text.into());
    self
  }

  pub fn vertical(mut self, vertical: Option<&str>) -> Self {
    self.vertical = Some(vertical.map(String::from));
    self
  }

  pub fn tier(mut self, tier: Option<&str>) -> Self {
    self.tier = Some(tier.map(String::from));
    self
  }

  pub fn emerging_only(mut self, on: bool) -> Self {
    self.emerging_only = Some(on);
    self
  }

  pub fn sort(mut self, sort: SortKey) -> Self {
    self.sort = Some(sort);
    self
  }

  pub fn limit(mut self, limit: u32) -> Self {
    self.limit = Some(limit);
    self
  }

  pub fn offset(mut self, offset: u32) -> Self {
    self.offset = Some(offset);
    self
  }

  pub fn inspect(mut self, id: Option<&str>) -> Self {
    self.inspect = Some(id.map(String::from));
    self
  }

  /// Apply to `state`, producing the next state.
  ///
  /// Changing a filter or the sort order without an explicit offset returns
  /// to the first page.
  pub fn apply(&self, state: &ViewState) -> ViewState {
    let mut next = state.clone();

    if let Some(text) = &self.free_text {
      next.free_text = text.clone();
    }
    if let Some(vertical) = &self.vertical {
      next.vertical = normalize_optional(vertical);
    }
    if let Some(tier) = &self.tier {
      next.tier = normalize_optional(tier);
    }
    if let Some(on) = self.emerging_only {
      next.emerging_only = on;
    }
    if let Some(sort) = self.sort {
      next.sort = sort;
    }
    if let Some(limit) = self.limit {
      next.limit = clamp_limit(limit);
    }
    if let Some(inspect) = &self.inspect {
      next.inspect = normalize_optional(inspect);
    }

    let filters_changed = next.free_text != state.free_text
      || next.vertical != state.vertical
      || next.tier != state.tier
      || next.emerging_only != state.emerging_only
      || next.sort != state.sort;

    match self.offset {
      Some(offset) => next.offset = offset,
      None if filters_changed => next.offset = 0,
      None => {}
    }

    next
  }
}

fn normalize_optional(value: &Option<String>) -> Option<String> {
  value.as_deref().filter(|v| !v.is_empty()).map(String::from)
}

/// Consistent pair of state and its minimal locator.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Snapshot {
  pub state: ViewState,
  pub locator: Locator,
}

/// Holds the current view state of one mounted view.
///
/// Every transition replaces the whole [`Snapshot`] at once, so subscribers
/// never observe a half-applied patch.
pub struct ViewStateStore {
  tx: watch::Sender<Snapshot>,
  navigator: Arc<dyn Navigator>,
}

impl ViewStateStore {
  /// Mount a view: decode whatever locator the navigator currently holds.
  pub fn mount(navigator: Arc<dyn Navigator>) -> Self {
    let state = locator::decode(&Locator::parse(&navigator.current()));
    let locator = locator::encode(&state);
    let (tx, _rx) = watch::channel(Snapshot { state, locator });
    Self { tx, navigator }
  }

  pub fn current_state(&self) -> ViewState {
    self.tx.borrow().state.clone()
  }

  pub fn locator(&self) -> Locator {
    self.tx.borrow().locator.clone()
  }

  /// Receive every state transition.
  pub fn subscribe(&self) -> watch::Receiver<Snapshot> {
    self.tx.subscribe()
  }

  /// Merge `patch` into the current state.
  ///
  /// The navigator is only told about the new locator when it differs from
  /// the previous one, so re-applying the same patch adds no history entry.
  pub fn patch(&self, patch: ViewPatch) {
    let mut pushed = None;
    self.tx.send_if_modified(|snapshot| {
      let state = patch.apply(&snapshot.state);
      if state == snapshot.state {
        return false;
      }
      let locator = locator::encode(&state);
      if locator != snapshot.locator {
        pushed = Some(locator.to_query_string());
      }
      *snapshot = Snapshot { state, locator };
      true
    });

    if let Some(query) = pushed {
      debug!(locator = %query, "view state patched");
      self.navigator.push(&query);
    }
  }

  /// Restore every field to its default and clear the locator.
  pub fn reset(&self) {
    let changed = self.tx.send_if_modified(|snapshot| {
      if snapshot.state.is_default() {
        return false;
      }
      *snapshot = Snapshot::default();
      true
    });

    if changed {
      debug!("view state reset");
      self.navigator.clear();
    }
  }
}
