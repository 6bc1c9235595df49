//! Aggregate overview: KPI strip, breakout leaderboard and the
//! industry × function heatmap.
//!
//! The overview must never leave the landing page blank. An empty or
//! unreadable payload normalizes to [`Overview::placeholder`] rather than an
//! error.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use super::opportunity::WindowStatus;
use super::probe;
use super::{collect_records, Contract, SchemaKind};
use crate::error::ContractError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OverviewKpi {
  pub key: String,
  pub label: String,
  pub value: f64,
  pub delta_7d: Option<f64>,
  pub sparkline: Vec<f64>,
}

impl OverviewKpi {
  fn from_raw(raw: &Value) -> Result<Self, ContractError> {
    let key = probe::text(raw, &["key", "id"])
      .ok_or_else(|| ContractError::new(SchemaKind::Overview, "kpi without `key`"))?;
    Ok(Self {
      label: probe::text(raw, &["label", "name"]).unwrap_or_else(|| key.clone()),
      value: probe::plain_number(raw, &["value"]).unwrap_or(0.0),
      delta_7d: probe::plain_number(raw, &["delta_7d", "delta"]),
      sparkline: probe::number_list(raw, &["sparkline"]).unwrap_or_default(),
      key,
    })
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Breakout {
  pub rank: u32,
  pub vertical_id: String,
  pub vertical_label: String,
  /// 0..=100
  pub score: f64,
  /// -100..=100
  pub momentum_7d: f64,
  /// 0..=1
  pub confidence: f64,
  pub tier: Option<String>,
  pub status: WindowStatus,
}

impl Breakout {
  fn from_raw(position: usize, raw: &Value) -> Result<Self, ContractError> {
    let vertical_id = probe::identifier(raw, &["vertical_id", "id"])
      .ok_or_else(|| ContractError::new(SchemaKind::Overview, "breakout without `vertical_id`"))?;
    Ok(Self {
      rank: probe::plain_number(raw, &["rank"])
        .filter(|r| *r >= 1.0)
        .map(|r| r as u32)
        .unwrap_or(position as u32 + 1),
      vertical_label: probe::text(raw, &["vertical_label", "label", "name"]).unwrap_or_else(|| vertical_id.clone()),
      score: probe::clamp(probe::plain_number(raw, &["score"]).unwrap_or(0.0), 0.0, 100.0),
      momentum_7d: probe::clamp(probe::plain_number(raw, &["momentum_7d"]).unwrap_or(0.0), -100.0, 100.0),
      confidence: probe::clamp(probe::plain_number(raw, &["confidence"]).unwrap_or(0.0), 0.0, 1.0),
      tier: probe::text(raw, &["tier"]),
      status: probe::text(raw, &["status"])
        .and_then(|s| s.parse().ok())
        .unwrap_or_default(),
      vertical_id,
    })
  }
}

/// One (industry, function) intensity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HeatmapCell {
  pub row: String,
  pub col: String,
  pub value: f64,
  pub top_vertical: Option<String>,
  pub avg_score: Option<f64>,
}

impl HeatmapCell {
  fn from_raw(raw: &Value) -> Result<Self, ContractError> {
    let row = probe::text(raw, &["industry", "row"]);
    let col = probe::text(raw, &["function", "col"]);
    let (Some(row), Some(col)) = (row, col) else {
      return Err(ContractError::new(SchemaKind::Overview, "heatmap cell without row/col"));
    };
    Ok(Self {
      row,
      col,
      value: probe::plain_number(raw, &["value"]).unwrap_or(0.0),
      top_vertical: probe::text(raw, &["top_vertical_label", "top_vertical_id"]),
      avg_score: probe::plain_number(raw, &["avg_score"]),
    })
  }
}

/// The two heatmap encodings the service has shipped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HeatmapShape {
  /// `[{industry, function, value}, ...]`
  Cells,
  /// `{rows: [{row, cells: [{col, value}]}], cols: [...]}`
  Grid,
}

impl HeatmapShape {
  fn detect(raw: &Value) -> Option<Self> {
    match raw {
      Value::Array(_) => Some(HeatmapShape::Cells),
      Value::Object(o) if o.get("rows").is_some_and(Value::is_array) => Some(HeatmapShape::Grid),
      _ => None,
    }
  }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Overview {
  pub updated_at: Option<DateTime<Utc>>,
  pub kpis: Vec<OverviewKpi>,
  pub breakouts: Vec<Breakout>,
  pub heatmap: Vec<HeatmapCell>,
  /// Row labels in first-appearance order
  pub heatmap_rows: Vec<String>,
  /// Column labels; the declared order when the grid shape lists them
  pub heatmap_cols: Vec<String>,
  pub is_placeholder: bool,
}

impl Overview {
  /// Fixed, labelled stand-in for when the service has nothing usable.
  pub fn placeholder() -> Self {
    let kpi = |key: &str, label: &str| OverviewKpi {
      key: key.to_string(),
      label: format!("{label} (no data)"),
      value: 0.0,
      delta_7d: None,
      sparkline: Vec::new(),
    };
    Self {
      updated_at: None,
      kpis: vec![
        kpi("clusters_surfaced", "Clusters surfaced"),
        kpi("emerging_share", "Emerging"),
        kpi("declining_share", "Declining"),
        kpi("avg_exploitability", "Avg exploitability"),
        kpi("sources_active", "Sources active"),
      ],
      breakouts: Vec::new(),
      heatmap: Vec::new(),
      heatmap_rows: Vec::new(),
      heatmap_cols: Vec::new(),
      is_placeholder: true,
    }
  }

  fn heatmap_from_raw(raw: &Value) -> (Vec<HeatmapCell>, Vec<String>) {
    match HeatmapShape::detect(raw) {
      Some(HeatmapShape::Cells) => {
        let records = raw.as_array().map(Vec::as_slice).unwrap_or_default();
        (collect_records(SchemaKind::Overview, records, HeatmapCell::from_raw).0, Vec::new())
      }
      Some(HeatmapShape::Grid) => {
        let mut cells = Vec::new();
        for row in raw.get("rows").and_then(Value::as_array).into_iter().flatten() {
          let Some(label) = probe::text(row, &["row", "label"]) else {
            continue;
          };
          for cell in row.get("cells").and_then(Value::as_array).into_iter().flatten() {
            if let Some(col) = probe::text(cell, &["col", "function"]) {
              cells.push(HeatmapCell {
                row: label.clone(),
                col,
                value: probe::plain_number(cell, &["value"]).unwrap_or(0.0),
                top_vertical: probe::text(cell, &["top_vertical_label", "top_vertical_id"]),
                avg_score: probe::plain_number(cell, &["avg_score"]),
              });
            }
          }
        }
        (cells, probe::text_list(raw, &["cols"]).unwrap_or_default())
      }
      None => {
        if !raw.is_null() {
          warn!("Ignoring heatmap in an unrecognized shape");
        }
        (Vec::new(), Vec::new())
      }
    }
  }
}

fn first_appearance<'a>(labels: impl Iterator<Item = &'a String>, seed: Vec<String>) -> Vec<String> {
  labels.fold(seed, |mut acc, label| {
    if !acc.contains(label) {
      acc.push(label.clone());
    }
    acc
  })
}

pub struct OverviewContract;

impl Contract for OverviewContract {
  type Output = Overview;

  const KIND: SchemaKind = SchemaKind::Overview;

  fn normalize(raw: &Value) -> Result<Overview, ContractError> {
    if !raw.is_object() {
      warn!("Overview payload is not an object, using placeholder");
      return Ok(Overview::placeholder());
    }

    let kpis = collect_records(Self::KIND, probe::records(raw, "kpis"), OverviewKpi::from_raw).0;
    // Default ranks follow accepted breakouts only
    let mut accepted = 0;
    let breakouts = collect_records(Self::KIND, probe::records(raw, "breakouts"), |b| {
      let breakout = Breakout::from_raw(accepted, b);
      if breakout.is_ok() {
        accepted += 1;
      }
      breakout
    })
    .0;
    let (heatmap, declared_cols) = Overview::heatmap_from_raw(raw.get("heatmap").unwrap_or(&Value::Null));

    if kpis.is_empty() && breakouts.is_empty() && heatmap.is_empty() {
      warn!("Overview payload carried no usable data, using placeholder");
      return Ok(Overview::placeholder());
    }

    Ok(Overview {
      updated_at: probe::timestamp(raw, &["updated_at", "generated_at"]),
      heatmap_rows: first_appearance(heatmap.iter().map(|c| &c.row), Vec::new()),
      heatmap_cols: first_appearance(heatmap.iter().map(|c| &c.col), declared_cols),
      kpis,
      breakouts,
      heatmap,
      is_placeholder: false,
    })
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[test]
  fn test_cell_list_heatmap() {
    let raw = json!({
      "updated_at": "2025-06-01T00:00:00Z",
      "kpis": [{ "key": "clusters", "label": "Clusters", "value": 120, "delta_7d": 4, "sparkline": [1, 2, 3] }],
      "breakouts": [{ "rank": 1, "vertical_id": "fintech", "vertical_label": "Fintech", "score": 88, "momentum_7d": 12, "confidence": 0.8, "status": "hot" }],
      "heatmap": [
        { "industry": "Retail", "function": "Finance", "value": 0.4 },
        { "industry": "Health", "function": "Ops", "value": 0.9 },
        { "function": "Ops", "value": 0.1 }
      ]
    });
    let overview = OverviewContract::normalize(&raw).unwrap();
    assert!(!overview.is_placeholder);
    assert_eq!(overview.kpis[0].sparkline, vec![1.0, 2.0, 3.0]);
    assert_eq!(overview.breakouts[0].status, WindowStatus::Peak);
    assert_eq!(overview.heatmap.len(), 2);
    assert_eq!(overview.heatmap_rows, vec!["Retail", "Health"]);
    assert_eq!(overview.heatmap_cols, vec!["Finance", "Ops"]);
  }

  #[test]
  fn test_grid_heatmap_keeps_declared_columns() {
    let raw = json!({
      "heatmap": {
        "rows": [{ "row": "Retail", "cells": [{ "col": "Ops", "value": 0.7 }] }],
        "cols": ["Finance", "Ops", "Sales"]
      }
    });
    let overview = OverviewContract::normalize(&raw).unwrap();
    assert_eq!(overview.heatmap.len(), 1);
    assert_eq!(overview.heatmap[0].row, "Retail");
    assert_eq!(overview.heatmap_cols, vec!["Finance", "Ops", "Sales"]);
  }

  #[test]
  fn test_empty_or_malformed_payload_is_placeholder() {
    for raw in [Value::Null, json!([]), json!({}), json!({ "kpis": "broken", "heatmap": 3 })] {
      let overview = OverviewContract::normalize(&raw).unwrap();
      assert!(overview.is_placeholder);
      assert_eq!(overview.kpis.len(), 5);
    }
  }

  #[test]
  fn test_breakout_rank_defaults_to_position() {
    let raw = json!({ "breakouts": [{ "vertical_id": "a" }, { "vertical_id": "b", "confidence": 4 }] });
    let overview = OverviewContract::normalize(&raw).unwrap();
    assert_eq!(overview.breakouts[1].rank, 2);
    assert_eq!(overview.breakouts[1].confidence, 1.0);
    assert_eq!(overview.breakouts[0].vertical_label, "a");
  }

  #[test]
  fn test_rejected_breakout_does_not_skip_a_rank() {
    let raw = json!({ "breakouts": [{ "vertical_id": "a" }, { "label": "no id" }, { "vertical_id": "c" }] });
    let overview = OverviewContract::normalize(&raw).unwrap();
    let ranks: Vec<(u32, &str)> = overview.breakouts.iter().map(|b| (b.rank, b.vertical_id.as_str())).collect();
    assert_eq!(ranks, vec![(1, "a"), (2, "c")]);
  }
}
