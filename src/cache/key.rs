//! Canonical cache keys.

use std::collections::BTreeMap;
use std::fmt;
use std::hash::{Hash, Hasher};

/// Endpoint identifier plus a normalized, order-independent parameter set.
///
/// The canonical form is `endpoint?k1=v1&k2=v2` with keys sorted, so two keys
/// built from the same parameters in any order compare equal.
#[derive(Clone, Debug)]
pub struct CacheKey {
  endpoint: String,
  params: BTreeMap<String, String>,
  canonical: String,
}

impl CacheKey {
  pub fn new(endpoint: impl Into<String>) -> Self {
    let endpoint = normalize_endpoint(&endpoint.into());
    let canonical = endpoint.clone();
    Self {
      endpoint,
      params: BTreeMap::new(),
      canonical,
    }
  }

  /// Build a key from an endpoint and arbitrary parameters.
  pub fn from_params<I, K, V>(endpoint: impl Into<String>, params: I) -> Self
  where
    I: IntoIterator<Item = (K, V)>,
    K: Into<String>,
    V: Into<String>,
  {
    params
      .into_iter()
      .fold(Self::new(endpoint), |key, (k, v)| key.with_param(k, v))
  }

  /// Add a parameter. Empty values are dropped so an unset filter and an
  /// absent one share a key.
  pub fn with_param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
    let name = name.into().trim().to_string();
    let value = value.into().trim().to_string();
    if name.is_empty() || value.is_empty() {
      return self;
    }
    self.params.insert(name, value);
    self.canonical = render(&self.endpoint, &self.params);
    self
  }

  pub fn endpoint(&self) -> &str {
    &self.endpoint
  }

  pub fn params(&self) -> &BTreeMap<String, String> {
    &self.params
  }

  pub fn as_str(&self) -> &str {
    &self.canonical
  }

  /// Whether this key belongs to the endpoint identifier `prefix`, whatever
  /// its parameters.
  pub fn matches_endpoint(&self, prefix: &str) -> bool {
    let prefix = normalize_endpoint(prefix);
    if prefix.is_empty() {
      return true;
    }
    self.endpoint == prefix
      || self
        .endpoint
        .strip_prefix(&prefix)
        .is_some_and(|rest| rest.starts_with('/'))
  }
}

impl PartialEq for CacheKey {
  fn eq(&self, other: &Self) -> bool {
    self.canonical == other.canonical
  }
}

impl Eq for CacheKey {}

impl Hash for CacheKey {
  fn hash<H: Hasher>(&self, state: &mut H) {
    self.canonical.hash(state);
  }
}

impl fmt::Display for CacheKey {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.canonical)
  }
}

/// Strip surrounding slashes and whitespace: `/insights/top_pains/` and
/// `insights/top_pains` name the same endpoint.
fn normalize_endpoint(endpoint: &str) -> String {
  endpoint.trim().trim_matches('/').to_string()
}

fn render(endpoint: &str, params: &BTreeMap<String, String>) -> String {
  if params.is_empty() {
    return endpoint.to_string();
  }
  let query = url::form_urlencoded::Serializer::new(String::new())
    .extend_pairs(params.iter())
    .finish();
  format!("{endpoint}?{query}")
}
