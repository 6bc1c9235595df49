//! Field probing over untyped JSON.
//!
//! Every remote field is treated as optional at the wire level. A field is
//! looked up under each of its known aliases in priority order, and the first
//! value of the expected type wins. Aliases may be dotted paths into nested
//! objects (`build_signal.recommendation`).

use chrono::{DateTime, NaiveDate, Utc};
use serde_json::{Map, Value};

/// One place a numeric field may live, with the divisor that brings it onto
/// the canonical scale (e.g. a 0..100 confidence onto 0..1).
#[derive(Debug, Clone, Copy)]
pub struct Alias {
  pub path: &'static str,
  pub divisor: f64,
}

impl Alias {
  pub const fn plain(path: &'static str) -> Self {
    Self { path, divisor: 1.0 }
  }

  pub const fn scaled(path: &'static str, divisor: f64) -> Self {
    Self { path, divisor }
  }
}

/// Resolve a dotted path inside `value`.
pub fn lookup<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
  path
    .split('.')
    .try_fold(value, |current, segment| current.as_object()?.get(segment))
}

/// First non-blank string.
pub fn text(value: &Value, aliases: &[&str]) -> Option<String> {
  aliases.iter().find_map(|path| {
    lookup(value, path)
      .and_then(Value::as_str)
      .map(str::trim)
      .filter(|s| !s.is_empty())
      .map(String::from)
  })
}

/// First finite number, divided onto the canonical scale.
pub fn number(value: &Value, aliases: &[Alias]) -> Option<f64> {
  aliases.iter().find_map(|alias| {
    lookup(value, alias.path)
      .and_then(Value::as_f64)
      .filter(|n| n.is_finite())
      .map(|n| n / alias.divisor)
  })
}

/// Shorthand for [`number`] when no alias needs scaling.
pub fn plain_number(value: &Value, aliases: &[&'static str]) -> Option<f64> {
  aliases.iter().find_map(|path| number(value, &[Alias::plain(path)]))
}

/// Identifier that may be sent as a string or an integer.
pub fn identifier(value: &Value, aliases: &[&str]) -> Option<String> {
  aliases.iter().find_map(|path| match lookup(value, path)? {
    Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
    Value::Number(n) if n.is_i64() || n.is_u64() => Some(n.to_string()),
    _ => None,
  })
}

pub fn flag(value: &Value, aliases: &[&str]) -> Option<bool> {
  aliases
    .iter()
    .find_map(|path| lookup(value, path).and_then(Value::as_bool))
}

/// First array found; non-string members are skipped.
pub fn text_list(value: &Value, aliases: &[&str]) -> Option<Vec<String>> {
  aliases.iter().find_map(|path| {
    lookup(value, path).and_then(Value::as_array).map(|items| {
      items
        .iter()
        .filter_map(Value::as_str)
        .map(String::from)
        .collect()
    })
  })
}

pub fn number_list(value: &Value, aliases: &[&str]) -> Option<Vec<f64>> {
  aliases.iter().find_map(|path| {
    lookup(value, path).and_then(Value::as_array).map(|items| {
      items
        .iter()
        .filter_map(Value::as_f64)
        .filter(|n| n.is_finite())
        .collect()
    })
  })
}

/// RFC 3339 timestamp or bare `YYYY-MM-DD` date (taken as midnight UTC).
pub fn timestamp(value: &Value, aliases: &[&str]) -> Option<DateTime<Utc>> {
  aliases.iter().find_map(|path| {
    let raw = lookup(value, path)?.as_str()?.trim();
    DateTime::parse_from_rfc3339(raw)
      .map(|dt| dt.with_timezone(&Utc))
      .ok()
      .or_else(|| {
        NaiveDate::parse_from_str(raw, "%Y-%m-%d")
          .ok()
          .and_then(|d| d.and_hms_opt(0, 0, 0))
          .map(|dt| dt.and_utc())
      })
  })
}

/// Array under `path`, or an empty slice.
pub fn records<'a>(value: &'a Value, path: &str) -> &'a [Value] {
  lookup(value, path)
    .and_then(Value::as_array)
    .map(Vec::as_slice)
    .unwrap_or_default()
}

pub fn clamp(value: f64, min: f64, max: f64) -> f64 {
  value.clamp(min, max)
}

/// Fields of `object` that none of the `known` aliases account for.
///
/// Only the top-level segment of a dotted alias counts as known.
pub fn extras(object: &Map<String, Value>, known: &[&str]) -> Map<String, Value> {
  object
    .iter()
    .filter(|(name, _)| {
      !known
        .iter()
        .any(|alias| alias.split('.').next() == Some(name.as_str()))
    })
    .map(|(name, value)| (name.clone(), value.clone()))
    .collect()
}

/// Whether `object` carries any of `fields` with a non-null value.
pub fn has_any(object: &Map<String, Value>, fields: &[&str]) -> bool {
  fields
    .iter()
    .any(|f| object.get(*f).is_some_and(|v| !v.is_null()))
}
