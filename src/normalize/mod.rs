//! Contract normalizer: raw service payloads in, canonical entities out.
//!
//! The remote contract drifts between releases, so every kind probes a closed
//! set of known shapes and aliases instead of deserializing one fixed schema.
//! Required fields are enforced per record; everything else falls back to a
//! documented default.

pub mod cluster;
pub mod ops;
pub mod opportunity;
pub mod overview;
pub mod probe;
pub mod trends;
pub mod vertical;

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use crate::error::ContractError;

pub use cluster::{ClusterDetail, RepresentativeSignal, ScoreBreakdown, TimelineKind, TimelinePoint};
pub use ops::{OpsQueue, OpsRun};
pub use opportunity::{BuildSignal, Opportunity, OpportunityPage, WindowStatus};
pub use overview::{Breakout, HeatmapCell, Overview, OverviewKpi};
pub use trends::{SparkPoint, TrendItem};
pub use vertical::Vertical;

/// Which contract a payload is expected to satisfy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SchemaKind {
  Opportunities,
  Verticals,
  ClusterDetail,
  Overview,
  Trends,
  OpsQueues,
  OpsRuns,
}

impl SchemaKind {
  pub fn as_str(&self) -> &'static str {
    match self {
      SchemaKind::Opportunities => "opportunities",
      SchemaKind::Verticals => "verticals",
      SchemaKind::ClusterDetail => "cluster detail",
      SchemaKind::Overview => "overview",
      SchemaKind::Trends => "trends",
      SchemaKind::OpsQueues => "ops queues",
      SchemaKind::OpsRuns => "ops runs",
    }
  }
}

impl fmt::Display for SchemaKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

/// One contract: a raw payload shape family and the canonical type it
/// normalizes into.
pub trait Contract: 'static {
  type Output: Serialize + Send + Sync + 'static;

  const KIND: SchemaKind;

  fn normalize(raw: &Value) -> Result<Self::Output, ContractError>;
}

/// Output of [`normalize`], tagged by kind.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
pub enum Normalized {
  Opportunities(OpportunityPage),
  Verticals(Vec<Vertical>),
  ClusterDetail(ClusterDetail),
  Overview(Overview),
  Trends(Vec<TrendItem>),
  OpsQueues(Vec<OpsQueue>),
  OpsRuns(Vec<OpsRun>),
}

/// Dispatch a raw payload to the contract for `kind`.
pub fn normalize(kind: SchemaKind, raw: &Value) -> Result<Normalized, ContractError> {
  Ok(match kind {
    SchemaKind::Opportunities => Normalized::Opportunities(opportunity::OpportunityList::normalize(raw)?),
    SchemaKind::Verticals => Normalized::Verticals(vertical::VerticalList::normalize(raw)?),
    SchemaKind::ClusterDetail => Normalized::ClusterDetail(cluster::ClusterDetailContract::normalize(raw)?),
    SchemaKind::Overview => Normalized::Overview(overview::OverviewContract::normalize(raw)?),
    SchemaKind::Trends => Normalized::Trends(trends::TrendList::normalize(raw)?),
    SchemaKind::OpsQueues => Normalized::OpsQueues(ops::QueueList::normalize(raw)?),
    SchemaKind::OpsRuns => Normalized::OpsRuns(ops::RunList::normalize(raw)?),
  })
}

// ============================================================================
// List envelopes
// ============================================================================

/// The list wrappers the service has used across releases.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Envelope {
  /// `[...]`
  Bare,
  /// `{ "items": [...] }`
  Items,
  /// `{ "data": { "items": [...] } }`
  NestedItems,
  /// `{ "results": [...] }`
  Results,
}

/// Records of a list payload plus whatever metadata the envelope carried.
#[derive(Debug)]
pub(crate) struct ListPayload<'a> {
  pub envelope: Envelope,
  pub records: &'a [Value],
  pub generated_at: Option<DateTime<Utc>>,
  pub total: Option<u64>,
}

/// Unwrap a list payload. `null` counts as an empty bare list.
pub(crate) fn unwrap_list<'a>(
  kind: SchemaKind,
  raw: &'a Value,
  accepted: &[Envelope],
) -> Result<ListPayload<'a>, ContractError> {
  let found = match raw {
    Value::Null => Some((Envelope::Bare, &[][..])),
    Value::Array(items) => Some((Envelope::Bare, items.as_slice())),
    Value::Object(_) => [
      (Envelope::Items, "items"),
      (Envelope::NestedItems, "data.items"),
      (Envelope::Results, "results"),
    ]
    .into_iter()
    .find_map(|(envelope, path)| {
      probe::lookup(raw, path)
        .and_then(Value::as_array)
        .map(|items| (envelope, items.as_slice()))
    }),
    _ => None,
  };

  let (envelope, records) = found
    .filter(|(envelope, _)| accepted.contains(envelope))
    .ok_or_else(|| ContractError::new(kind, format!("unrecognized list envelope ({})", shape_name(raw))))?;

  let meta = match envelope {
    Envelope::NestedItems => probe::lookup(raw, "data").unwrap_or(raw),
    _ => raw,
  };

  Ok(ListPayload {
    envelope,
    records,
    generated_at: probe::timestamp(meta, &["generated_at", "updated_at"]),
    total: meta
      .get("total")
      .and_then(Value::as_u64),
  })
}

/// Normalize each record, dropping (and logging) the ones that fail their
/// required-field checks. Returns the survivors and the rejected count.
pub(crate) fn collect_records<T>(
  kind: SchemaKind,
  records: &[Value],
  mut record: impl FnMut(&Value) -> Result<T, ContractError>,
) -> (Vec<T>, usize) {
  let mut rejected = 0;
  let items = records
    .iter()
    .enumerate()
    .filter_map(|(index, raw)| match record(raw) {
      Ok(item) => Some(item),
      Err(e) => {
        rejected += 1;
        warn!(%kind, index, reason = %e.reason, "Dropping malformed record");
        None
      }
    })
    .collect();
  (items, rejected)
}

fn shape_name(raw: &Value) -> &'static str {
  match raw {
    Value::Null => "null",
    Value::Bool(_) => "boolean",
    Value::Number(_) => "number",
    Value::String(_) => "string",
    Value::Array(_) => "array",
    Value::Object(_) => "object without a known list field",
  }
}
