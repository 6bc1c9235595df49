//! Shareable locator encoding of the current view.
//!
//! A [`Locator`] is a flat string-keyed map, written as a query string. Fields
//! equal to their default never appear in it, so every view has exactly one
//! minimal locator and the all-defaults view has the empty one.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

pub const DEFAULT_LIMIT: u32 = 25;
pub const MAX_LIMIT: u32 = 200;

const KEY_QUERY: &str = "q";
const KEY_VERTICAL: &str = "vertical";
const KEY_TIER: &str = "tier";
const KEY_EMERGING: &str = "emerging";
const KEY_SORT: &str = "sort";
const KEY_LIMIT: &str = "limit";
const KEY_OFFSET: &str = "offset";
const KEY_INSPECT: &str = "inspect";

/// Sort order of ranked tables. All orders are descending.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortKey {
  #[default]
  ScoreDesc,
  BreakoutDesc,
  ConfidenceDesc,
  SeverityDesc,
  RecentDesc,
}

impl SortKey {
  pub const ALL: &'static [SortKey] = &[
    SortKey::ScoreDesc,
    SortKey::BreakoutDesc,
    SortKey::ConfidenceDesc,
    SortKey::SeverityDesc,
    SortKey::RecentDesc,
  ];

  pub fn as_str(self) -> &'static str {
    match self {
      SortKey::ScoreDesc => "score_desc",
      SortKey::BreakoutDesc => "breakout_desc",
      SortKey::ConfidenceDesc => "confidence_desc",
      SortKey::SeverityDesc => "severity_desc",
      SortKey::RecentDesc => "recent_desc",
    }
  }
}

impl FromStr for SortKey {
  type Err = ();

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    SortKey::ALL
      .iter()
      .copied()
      .find(|k| k.as_str() == s)
      .ok_or(())
  }
}

impl fmt::Display for SortKey {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

/// The visible state of a dashboard view.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ViewState {
  pub free_text: String,
  pub vertical: Option<String>,
  pub tier: Option<String>,
  pub emerging_only: bool,
  pub sort: SortKey,
  pub limit: u32,
  pub offset: u32,
  /// Record opened in the inspect drawer
  pub inspect: Option<String>,
}

impl Default for ViewState {
  fn default() -> Self {
    Self {
      free_text: String::new(),
      vertical: None,
      tier: None,
      emerging_only: false,
      sort: SortKey::default(),
      limit: DEFAULT_LIMIT,
      offset: 0,
      inspect: None,
    }
  }
}

impl ViewState {
  pub fn is_default(&self) -> bool {
    *self == ViewState::default()
  }
}

/// Flat string-keyed form of a view, as carried in a shareable address.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Locator {
  params: BTreeMap<String, String>,
}

impl Locator {
  pub fn new() -> Self {
    Self::default()
  }

  /// Parse a query string. A leading `?` is accepted; malformed pairs are
  /// kept as-is and left for [`decode`] to ignore.
  pub fn parse(query: &str) -> Self {
    let query = query.trim().trim_start_matches('?');
    let params = url::form_urlencoded::parse(query.as_bytes())
      .filter(|(k, _)| !k.is_empty())
      .map(|(k, v)| (k.into_owned(), v.into_owned()))
      .collect();
    Self { params }
  }

  /// Serialize to a query string with keys in sorted order.
  pub fn to_query_string(&self) -> String {
    url::form_urlencoded::Serializer::new(String::new())
      .extend_pairs(self.params.iter())
      .finish()
  }

  pub fn get(&self, key: &str) -> Option<&str> {
    self.params.get(key).map(String::as_str)
  }

  pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
    self.params.insert(key.into(), value.into());
  }

  pub fn is_empty(&self) -> bool {
    self.params.is_empty()
  }

  pub fn len(&self) -> usize {
    self.params.len()
  }

  pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
    self.params.iter().map(|(k, v)| (k.as_str(), v.as_str()))
  }
}

impl fmt::Display for Locator {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.to_query_string())
  }
}

/// Encode a view into its minimal locator.
pub fn encode(state: &ViewState) -> Locator {
  let defaults = ViewState::default();
  let mut locator = Locator::new();

  if state.free_text != defaults.free_text {
    locator.set(KEY_QUERY, state.free_text.as_str());
  }
  if let Some(vertical) = non_empty(&state.vertical) {
    locator.set(KEY_VERTICAL, vertical);
  }
  if let Some(tier) = non_empty(&state.tier) {
    locator.set(KEY_TIER, tier);
  }
  if state.emerging_only != defaults.emerging_only {
    locator.set(KEY_EMERGING, if state.emerging_only { "true" } else { "false" });
  }
  if state.sort != defaults.sort {
    locator.set(KEY_SORT, state.sort.as_str());
  }
  if state.limit != defaults.limit {
    locator.set(KEY_LIMIT, state.limit.to_string());
  }
  if state.offset != defaults.offset {
    locator.set(KEY_OFFSET, state.offset.to_string());
  }
  if let Some(inspect) = non_empty(&state.inspect) {
    locator.set(KEY_INSPECT, inspect);
  }

  locator
}

/// Decode a locator. Never fails: unknown keys are ignored and malformed
/// values fall back to their defaults.
pub fn decode(locator: &Locator) -> ViewState {
  let defaults = ViewState::default();

  ViewState {
    free_text: locator
      .get(KEY_QUERY)
      .map(String::from)
      .unwrap_or(defaults.free_text),
    vertical: optional_text(locator.get(KEY_VERTICAL)),
    tier: optional_text(locator.get(KEY_TIER)),
    emerging_only: locator
      .get(KEY_EMERGING)
      .and_then(parse_flag)
      .unwrap_or(defaults.emerging_only),
    sort: locator
      .get(KEY_SORT)
      .and_then(|s| s.parse().ok())
      .unwrap_or(defaults.sort),
    limit: locator
      .get(KEY_LIMIT)
      .and_then(|s| s.trim().parse::<u32>().ok())
      .map(clamp_limit)
      .unwrap_or(defaults.limit),
    offset: locator
      .get(KEY_OFFSET)
      .and_then(|s| s.trim().parse::<u32>().ok())
      .unwrap_or(defaults.offset),
    inspect: optional_text(locator.get(KEY_INSPECT)),
  }
}

/// Keep page sizes within what the remote service accepts.
pub fn clamp_limit(limit: u32) -> u32 {
  limit.clamp(1, MAX_LIMIT)
}

fn non_empty(value: &Option<String>) -> Option<&str> {
  value.as_deref().filter(|v| !v.is_empty())
}

fn optional_text(value: Option<&str>) -> Option<String> {
  value.filter(|v| !v.is_empty()).map(String::from)
}

fn parse_flag(value: &str) -> Option<bool> {
  match value.trim().to_ascii_lowercase().as_str() {
    "true" | "1" | "yes" => Some(true),
    "false" | "0" | "no" => Some(false),
    _ => None,
  }
}
