//! Locally persisted user preferences: the starred watchlist and the tracked
//! portfolio.
//!
//! Both are sets of cluster ids with the time each was added, stored as a
//! versioned JSON document under a fixed key in a small SQLite key-value
//! table. An unreadable or foreign document resets that set instead of
//! failing.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, TimeZone, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::PreferenceError;

const FORMAT_VERSION: u64 = 1;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS preferences (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL,
    updated_at TEXT NOT NULL DEFAULT (datetime('now'))
);
"#;

/// Which preference set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Namespace {
  Watchlist,
  Portfolio,
}

impl Namespace {
  pub fn storage_key(&self) -> &'static str {
    match self {
      Namespace::Watchlist => "sense.watchlist.v1",
      Namespace::Portfolio => "sense.portfolio.v1",
    }
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreferenceRecord {
  pub id: String,
  pub added_at: DateTime<Utc>,
}

/// id -> added_at (ms since epoch)
type IdSet = BTreeMap<String, i64>;

#[derive(Serialize)]
struct StoredSet<'a> {
  version: u64,
  ids: &'a IdSet,
}

/// SQLite-backed key-value store shared by all preference sets.
pub struct PreferenceStore {
  conn: Mutex<Connection>,
}

impl PreferenceStore {
  /// Open or create the store at `path`, creating parent directories.
  pub fn open(path: &Path) -> Result<Self, PreferenceError> {
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)?;
    }
    debug!(path = %path.display(), "Opening preference store");
    Self::with_connection(Connection::open(path)?)
  }

  /// Store that lives only as long as the process.
  pub fn in_memory() -> Result<Self, PreferenceError> {
    Self::with_connection(Connection::open_in_memory()?)
  }

  fn with_connection(conn: Connection) -> Result<Self, PreferenceError> {
    conn.execute_batch(SCHEMA)?;
    Ok(Self {
      conn: Mutex::new(conn),
    })
  }

  fn lock(&self) -> MutexGuard<'_, Connection> {
    self.conn.lock().unwrap_or_else(PoisonError::into_inner)
  }

  fn load(conn: &Connection, namespace: Namespace) -> Result<IdSet, PreferenceError> {
    let raw: Option<String> = conn
      .query_row(
        "SELECT value FROM preferences WHERE key = ?",
        params![namespace.storage_key()],
        |row| row.get(0),
      )
      .optional()?;

    Ok(match raw {
      Some(raw) => parse_set(namespace, &raw),
      None => IdSet::new(),
    })
  }

  fn save(conn: &Connection, namespace: Namespace, ids: &IdSet) -> Result<(), PreferenceError> {
    let value = serde_json::to_string(&StoredSet {
      version: FORMAT_VERSION,
      ids,
    })?;
    conn.execute(
      "INSERT OR REPLACE INTO preferences (key, value, updated_at) VALUES (?, ?, datetime('now'))",
      params![namespace.storage_key(), value],
    )?;
    Ok(())
  }

  /// Load, modify and save one set under the connection lock. `change`
  /// returns whether it modified the set; unchanged sets are not written.
  fn update<R>(&self, namespace: Namespace, change: impl FnOnce(&mut IdSet) -> (bool, R)) -> Result<R, PreferenceError> {
    let conn = self.lock();
    let mut ids = Self::load(&conn, namespace)?;
    let (changed, result) = change(&mut ids);
    if changed {
      Self::save(&conn, namespace, &ids)?;
    }
    Ok(result)
  }

  fn snapshot(&self, namespace: Namespace) -> Result<IdSet, PreferenceError> {
    Self::load(&self.lock(), namespace)
  }
}

/// Decode a stored document. Anything but a version-1 object resets the set.
fn parse_set(namespace: Namespace, raw: &str) -> IdSet {
  let reset = |reason: &str| {
    warn!(key = namespace.storage_key(), reason, "Resetting unreadable preference set");
    IdSet::new()
  };

  let Ok(value) = serde_json::from_str::<Value>(raw) else {
    return reset("not JSON");
  };
  match value.get("version").and_then(Value::as_u64) {
    Some(FORMAT_VERSION) => {}
    Some(_) => return reset("unsupported version"),
    None => return reset("missing version"),
  }
  let Some(ids) = value.get("ids").and_then(Value::as_object) else {
    return reset("missing ids");
  };

  // Entries whose timestamp is not a number are skipped, not fatal
  ids
    .iter()
    .filter_map(|(id, at)| Some((id.clone(), at.as_f64()? as i64)))
    .collect()
}

/// One named preference set over a shared [`PreferenceStore`].
#[derive(Clone)]
pub struct PreferenceSet {
  store: Arc<PreferenceStore>,
  namespace: Namespace,
}

impl PreferenceSet {
  pub fn new(store: Arc<PreferenceStore>, namespace: Namespace) -> Self {
    Self { store, namespace }
  }

  pub fn namespace(&self) -> Namespace {
    self.namespace
  }

  pub fn contains(&self, id: &str) -> Result<bool, PreferenceError> {
    Ok(self.store.snapshot(self.namespace)?.contains_key(id))
  }

  /// Add `id` if absent, remove it if present. Returns whether it is now in
  /// the set.
  pub fn toggle(&self, id: &str) -> Result<bool, PreferenceError> {
    let now = Utc::now().timestamp_millis();
    self.store.update(self.namespace, |ids| {
      if ids.remove(id).is_some() {
        (true, false)
      } else {
        ids.insert(id.to_string(), now);
        (true, true)
      }
    })
  }

  /// Returns `false` when `id` was already present; its timestamp is kept.
  pub fn add(&self, id: &str) -> Result<bool, PreferenceError> {
    self.insert_at(id, Utc::now())
  }

  fn insert_at(&self, id: &str, at: DateTime<Utc>) -> Result<bool, PreferenceError> {
    self.store.update(self.namespace, |ids| {
      if ids.contains_key(id) {
        return (false, false);
      }
      ids.insert(id.to_string(), at.timestamp_millis());
      (true, true)
    })
  }

  /// Returns `false` when `id` was not present.
  pub fn remove(&self, id: &str) -> Result<bool, PreferenceError> {
    self.store.update(self.namespace, |ids| {
      let removed = ids.remove(id).is_some();
      (removed, removed)
    })
  }

  /// Members, most recently added first (ties by id).
  pub fn items(&self) -> Result<Vec<PreferenceRecord>, PreferenceError> {
    let mut items: Vec<PreferenceRecord> = self
      .store
      .snapshot(self.namespace)?
      .into_iter()
      .map(|(id, ms)| PreferenceRecord {
        id,
        added_at: Utc.timestamp_millis_opt(ms).single().unwrap_or_default(),
      })
      .collect();
    items.sort_by(|a, b| b.added_at.cmp(&a.added_at).then_with(|| a.id.cmp(&b.id)));
    Ok(items)
  }

  pub fn ids(&self) -> Result<std::collections::HashSet<String>, PreferenceError> {
    Ok(self.store.snapshot(self.namespace)?.into_keys().collect())
  }

  pub fn count(&self) -> Result<usize, PreferenceError> {
    Ok(self.store.snapshot(self.namespace)?.len())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn watchlist() -> PreferenceSet {
    PreferenceSet::new(Arc::new(PreferenceStore::in_memory().unwrap()), Namespace::Watchlist)
  }

  #[test]
  fn test_toggle() {
    let set = watchlist();
    assert!(set.toggle("c-1").unwrap());
    assert!(set.contains("c-1").unwrap());
    assert!(!set.toggle("c-1").unwrap());
    assert!(!set.contains("c-1").unwrap());
    assert_eq!(set.count().unwrap(), 0);
  }

  #[test]
  fn test_add_and_remove_are_idempotent() {
    let set = watchlist();
    assert!(set.add("c-1").unwrap());
    assert!(!set.add("c-1").unwrap());
    assert!(set.remove("c-1").unwrap());
    assert!(!set.remove("c-1").unwrap());
  }

  #[test]
  fn test_items_newest_first() {
    let set = watchlist();
    let t0 = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
    set.insert_at("old", t0).unwrap();
    set.insert_at("new", t0 + chrono::Duration::hours(1)).unwrap();
    set.insert_at("also-old", t0).unwrap();

    let ids: Vec<String> = set.items().unwrap().into_iter().map(|r| r.id).collect();
    assert_eq!(ids, vec!["new", "also-old", "old"]);
  }

  #[test]
  fn test_namespaces_are_independent() {
    let store = Arc::new(PreferenceStore::in_memory().unwrap());
    let watchlist = PreferenceSet::new(store.clone(), Namespace::Watchlist);
    let portfolio = PreferenceSet::new(store, Namespace::Portfolio);
    watchlist.add("c-1").unwrap();
    assert!(!portfolio.contains("c-1").unwrap());
  }

  #[test]
  fn test_persists_across_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("preferences.db");
    {
      let set = PreferenceSet::new(Arc::new(PreferenceStore::open(&path).unwrap()), Namespace::Portfolio);
      set.add("c-9").unwrap();
    }
    let set = PreferenceSet::new(Arc::new(PreferenceStore::open(&path).unwrap()), Namespace::Portfolio);
    assert!(set.contains("c-9").unwrap());
  }

  #[test]
  fn test_stored_format() {
    let store = Arc::new(PreferenceStore::in_memory().unwrap());
    PreferenceSet::new(store.clone(), Namespace::Watchlist).add("c-1").unwrap();
    let raw: String = store
      .lock()
      .query_row("SELECT value FROM preferences WHERE key = 'sense.watchlist.v1'", [], |row| row.get(0))
      .unwrap();
    let value: Value = serde_json::from_str(&raw).unwrap();
    assert_eq!(value["version"], 1);
    assert!(value["ids"]["c-1"].is_i64());
  }

  #[test]
  fn test_foreign_documents_reset() {
    for raw in ["{", r#"{"version":2,"ids":{"a":1}}"#, r#"{"ids":{"a":1}}"#, r#"{"version":1,"ids":[]}"#] {
      assert!(parse_set(Namespace::Watchlist, raw).is_empty(), "{raw}");
    }
    let ids = parse_set(Namespace::Watchlist, r#"{"version":1,"ids":{"a":5,"b":"x"}}"#);
    assert_eq!(ids.len(), 1);
    assert_eq!(ids["a"], 5);
  }

  #[test]
  fn test_reset_set_is_writable() {
    let store = Arc::new(PreferenceStore::in_memory().unwrap());
    store
      .lock()
      .execute(
        "INSERT INTO preferences (key, value) VALUES ('sense.watchlist.v1', 'garbage')",
        [],
      )
      .unwrap();
    let set = PreferenceSet::new(store, Namespace::Watchlist);
    assert_eq!(set.count().unwrap(), 0);
    assert!(set.add("c-1").unwrap());
    assert_eq!(set.count().unwrap(), 1);
  }
}
