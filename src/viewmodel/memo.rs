use std::sync::Arc;

/// Single-slot memo for derived view models.
///
/// The slot is keyed by the revision of the entity set it was computed from
/// plus the view inputs (usually a [`ViewState`](crate::locator::ViewState)),
/// so a render with unchanged inputs reuses the last value.
#[derive(Debug)]
pub struct Memo<K, V> {
  slot: Option<(u64, K, Arc<V>)>,
}

impl<K, V> Default for Memo<K, V> {
  fn default() -> Self {
    Self { slot: None }
  }
}

impl<K: PartialEq + Clone, V> Memo<K, V> {
  pub fn new() -> Self {
    Self::default()
  }

  /// The value for (`revision`, `key`), computing it on a miss.
  pub fn get_or_compute(&mut self, revision: u64, key: &K, compute: impl FnOnce() -> V) -> Arc<V> {
    match &self.slot {
      Some((rev, k, value)) if *rev == revision && k == key => Arc::clone(value),
      _ => {
        let value = Arc::new(compute());
        self.slot = Some((revision, key.clone(), Arc::clone(&value)));
        value
      }
    }
  }

  pub fn clear(&mut self) {
    self.slot = None;
  }
}
