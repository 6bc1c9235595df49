use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::probe;
use super::{collect_records, unwrap_list, Contract, Envelope, SchemaKind};
use crate::error::ContractError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SparkPoint {
  pub date: Option<String>,
  pub value: f64,
  pub breakout: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrendItem {
  pub id: String,
  pub title: String,
  pub score: Option<f64>,
  pub breakout: Option<f64>,
  pub sparkline: Vec<SparkPoint>,
  #[serde(default, skip_serializing_if = "Map::is_empty")]
  pub extra: Map<String, Value>,
}

impl TrendItem {
  /// Only an id is needed to plot a trend line.
  pub fn from_raw(raw: &Value) -> Result<Self, ContractError> {
    const KNOWN: &[&str] = &[
      "cluster_id",
      "id",
      "cluster_summary",
      "title",
      "exploitability_score",
      "score",
      "breakout_score",
      "sparkline",
    ];
    let object = raw
      .as_object()
      .ok_or_else(|| ContractError::new(SchemaKind::Trends, "record is not an object"))?;
    let id = probe::identifier(raw, &["cluster_id", "id"])
      .ok_or_else(|| ContractError::new(SchemaKind::Trends, "missing required field `id`"))?;

    Ok(Self {
      title: probe::text(raw, &["cluster_summary", "title"]).unwrap_or_else(|| id.clone()),
      score: probe::plain_number(raw, &["exploitability_score", "score"]).map(|s| probe::clamp(s, 0.0, 100.0)),
      breakout: probe::plain_number(raw, &["breakout_score"]).map(|s| probe::clamp(s, 0.0, 100.0)),
      sparkline: probe::records(raw, "sparkline")
        .iter()
        .filter_map(|point| {
          let value = probe::plain_number(point, &["value", "volume", "velocity"])?;
          Some(SparkPoint {
            date: probe::text(point, &["date"]),
            value,
            breakout: probe::flag(point, &["breakout_flag"]).unwrap_or(false),
          })
        })
        .collect(),
      extra: probe::extras(object, KNOWN),
      id,
    })
  }
}

pub struct TrendList;

impl Contract for TrendList {
  type Output = Vec<TrendItem>;

  const KIND: SchemaKind = SchemaKind::Trends;

  fn normalize(raw: &Value) -> Result<Vec<TrendItem>, ContractError> {
    let list = unwrap_list(Self::KIND, raw, &[Envelope::Bare, Envelope::Items])?;
    Ok(collect_records(Self::KIND, list.records, TrendItem::from_raw).0)
  }
}
