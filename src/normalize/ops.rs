//! Pipeline transparency feeds: queue depths and recent ingestion runs.
//!
//! Both are diagnostic views, so nothing is required. A queue without a name
//! or a run without an id still renders with a placeholder label.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::probe;
use super::{collect_records, unwrap_list, Contract, Envelope, SchemaKind};
use crate::error::ContractError;

const UNNAMED: &str = "—";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpsQueue {
  pub name: String,
  pub depth: u64,
  pub lag_seconds: Option<f64>,
  pub oldest_age_seconds: Option<f64>,
  #[serde(default, skip_serializing_if = "Map::is_empty")]
  pub extra: Map<String, Value>,
}

impl OpsQueue {
  fn from_raw(raw: &Value) -> Result<Self, ContractError> {
    const KNOWN: &[&str] = &["name", "queue", "depth", "size", "lag_seconds", "oldest_age_seconds"];
    let object = raw
      .as_object()
      .ok_or_else(|| ContractError::new(SchemaKind::OpsQueues, "record is not an object"))?;
    Ok(Self {
      name: probe::text(raw, &["name", "queue"]).unwrap_or_else(|| UNNAMED.to_string()),
      depth: probe::plain_number(raw, &["depth", "size"])
        .filter(|d| *d >= 0.0)
        .map(|d| d as u64)
        .unwrap_or(0),
      lag_seconds: probe::plain_number(raw, &["lag_seconds"]),
      oldest_age_seconds: probe::plain_number(raw, &["oldest_age_seconds"]),
      extra: probe::extras(object, KNOWN),
    })
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpsRun {
  pub id: String,
  pub status: String,
  pub started_at: Option<DateTime<Utc>>,
  pub finished_at: Option<DateTime<Utc>>,
  pub day: Option<String>,
  pub vertical_id: Option<String>,
  #[serde(default, skip_serializing_if = "Map::is_empty")]
  pub extra: Map<String, Value>,
}

impl OpsRun {
  fn from_raw(raw: &Value) -> Result<Self, ContractError> {
    const KNOWN: &[&str] = &["run_id", "id", "status", "started_at", "finished_at", "day", "vertical_id"];
    let object = raw
      .as_object()
      .ok_or_else(|| ContractError::new(SchemaKind::OpsRuns, "record is not an object"))?;
    Ok(Self {
      id: probe::identifier(raw, &["run_id", "id"]).unwrap_or_else(|| UNNAMED.to_string()),
      status: probe::text(raw, &["status"])
        .map(|s| s.to_ascii_lowercase())
        .unwrap_or_else(|| "unknown".to_string()),
      started_at: probe::timestamp(raw, &["started_at"]),
      finished_at: probe::timestamp(raw, &["finished_at"]),
      day: probe::text(raw, &["day"]),
      vertical_id: probe::identifier(raw, &["vertical_id"]),
      extra: probe::extras(object, KNOWN),
    })
  }

  /// Wall-clock duration once the run has finished.
  pub fn duration(&self) -> Option<chrono::Duration> {
    Some(self.finished_at? - self.started_at?)
  }
}

pub struct QueueList;

impl Contract for QueueList {
  type Output = Vec<OpsQueue>;

  const KIND: SchemaKind = SchemaKind::OpsQueues;

  fn normalize(raw: &Value) -> Result<Vec<OpsQueue>, ContractError> {
    let list = unwrap_list(Self::KIND, raw, &[Envelope::Bare, Envelope::Items])?;
    Ok(collect_records(Self::KIND, list.records, OpsQueue::from_raw).0)
  }
}

pub struct RunList;

impl Contract for RunList {
  type Output = Vec<OpsRun>;

  const KIND: SchemaKind = SchemaKind::OpsRuns;

  fn normalize(raw: &Value) -> Result<Vec<OpsRun>, ContractError> {
    let list = unwrap_list(Self::KIND, raw, &[Envelope::Bare, Envelope::Items])?;
    Ok(collect_records(Self::KIND, list.records, OpsRun::from_raw).0)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[test]
  fn test_queues_are_permissive() {
    let queues = QueueList::normalize(&json!({ "items": [{ "name": "ingest", "depth": 42, "lag_seconds": 3.5 }, {}] })).unwrap();
    assert_eq!(queues.len(), 2);
    assert_eq!(queues[0].depth, 42);
    assert_eq!(queues[1].name, UNNAMED);
    assert_eq!(queues[1].depth, 0);
  }

  #[test]
  fn test_runs() {
    let runs = RunList::normalize(&json!([{
      "run_id": "r-1",
      "status": "SUCCEEDED",
      "started_at": "2025-04-01T10:00:00Z",
      "finished_at": "2025-04-01T10:05:00Z",
      "vertical_id": 4,
      "rows": 900
    }]))
    .unwrap();
    let run = &runs[0];
    assert_eq!(run.status, "succeeded");
    assert_eq!(run.vertical_id.as_deref(), Some("4"));
    assert_eq!(run.duration(), Some(chrono::Duration::minutes(5)));
    assert_eq!(run.extra.get("rows"), Some(&json!(900)));
  }

  #[test]
  fn test_results_envelope_is_not_accepted() {
    assert!(RunList::normalize(&json!({ "results": [] })).is_err());
  }
}
