//! Ranked opportunity records (top pains, emerging, declining lists).

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::probe::{self, Alias};
use super::{collect_records, unwrap_list, Contract, Envelope, SchemaKind};
use crate::error::ContractError;

const ID: &[&str] = &["cluster_id", "id", "cluster.id"];
const SCORE: &[&str] = &["exploitability_score", "score", "exploitability.score"];
const TITLE: &[&str] = &["cluster_summary", "title", "summary", "name"];
const TIER: &[&str] = &["exploitability_tier", "tier", "exploitability.tier"];
const SEVERITY: &[&str] = &["severity_score", "severity"];
const BREAKOUT: &[&str] = &["breakout_score", "breakout"];
const CONFIDENCE: &[Alias] = &[Alias::plain("confidence"), Alias::scaled("confidence_score", 100.0)];
const SATURATION: &[&str] = &["saturation_score", "saturation"];
const WINDOW: &[&str] = &["opportunity_window_status", "window_status", "status"];
const PERSONA: &[&str] = &["dominant_persona", "persona"];
const VERTICAL: &[&str] = &["vertical_id", "vertical", "vertical.id"];
const UPDATED_AT: &[&str] = &["updated_at", "last_seen_at"];
const BUILD_SIGNAL: &str = "build_signal";

pub const UNKNOWN_TIER: &str = "UNKNOWN";

/// Where a cluster sits in its market window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WindowStatus {
  Early,
  Peak,
  Stable,
  Saturating,
  Declining,
  #[default]
  Unknown,
}

impl WindowStatus {
  pub fn as_str(&self) -> &'static str {
    match self {
      WindowStatus::Early => "EARLY",
      WindowStatus::Peak => "PEAK",
      WindowStatus::Stable => "STABLE",
      WindowStatus::Saturating => "SATURATING",
      WindowStatus::Declining => "DECLINING",
      WindowStatus::Unknown => "UNKNOWN",
    }
  }

  pub fn is_emerging(&self) -> bool {
    matches!(self, WindowStatus::Early)
  }

  pub fn is_declining(&self) -> bool {
    matches!(self, WindowStatus::Declining)
  }
}

impl FromStr for WindowStatus {
  type Err = std::convert::Infallible;

  /// Never fails: older releases used `EMERGING`/`HOT`/`SATURATED`, and
  /// anything unrecognized is `Unknown`.
  fn from_str(s: &str) -> Result<Self, Self::Err> {
    Ok(match s.trim().to_ascii_uppercase().as_str() {
      "EARLY" | "EMERGING" => WindowStatus::Early,
      "PEAK" | "HOT" => WindowStatus::Peak,
      "STABLE" => WindowStatus::Stable,
      "SATURATING" | "SATURATED" => WindowStatus::Saturating,
      "DECLINING" => WindowStatus::Declining,
      _ => WindowStatus::Unknown,
    })
  }
}

impl fmt::Display for WindowStatus {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

/// Model-produced build recommendation attached to an opportunity.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct BuildSignal {
  pub recommendation: String,
  pub reasoning_summary: String,
  pub positive_factors: Vec<String>,
  pub risk_factors: Vec<String>,
}

impl BuildSignal {
  fn from_raw(raw: &Value) -> Option<Self> {
    let recommendation = probe::text(raw, &["recommendation"])?;
    Some(Self {
      recommendation,
      reasoning_summary: probe::text(raw, &["reasoning_summary", "summary"]).unwrap_or_default(),
      positive_factors: probe::text_list(raw, &["top_positive_factors", "positive_factors"]).unwrap_or_default(),
      risk_factors: probe::text_list(raw, &["top_risk_factors", "risk_factors"]).unwrap_or_default(),
    })
  }
}

/// Canonical opportunity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Opportunity {
  pub id: String,
  pub title: String,
  /// Exploitability, 0..=100
  pub score: f64,
  pub tier: String,
  pub severity: f64,
  pub breakout: f64,
  /// 0..=1
  pub confidence: f64,
  pub saturation: f64,
  pub window: WindowStatus,
  pub persona: Option<String>,
  pub vertical: Option<String>,
  pub updated_at: Option<DateTime<Utc>>,
  pub build_signal: Option<BuildSignal>,
  #[serde(default, skip_serializing_if = "Map::is_empty")]
  pub extra: Map<String, Value>,
}

impl Opportunity {
  /// Normalize one record. Only `id` and `score` are required.
  pub fn from_raw(raw: &Value) -> Result<Self, ContractError> {
    let kind = SchemaKind::Opportunities;
    let object = raw
      .as_object()
      .ok_or_else(|| ContractError::new(kind, "record is not an object"))?;
    let id = probe::identifier(raw, ID).ok_or_else(|| ContractError::new(kind, "missing required field `id`"))?;
    let score =
      probe::plain_number(raw, SCORE).ok_or_else(|| ContractError::new(kind, format!("record {id} is missing required field `score`")))?;

    let known: Vec<&str> = [ID, SCORE, TITLE, TIER, SEVERITY, BREAKOUT, SATURATION, WINDOW, PERSONA, VERTICAL, UPDATED_AT]
      .concat()
      .into_iter()
      .chain(CONFIDENCE.iter().map(|a| a.path))
      .chain([BUILD_SIGNAL])
      .collect();

    Ok(Self {
      title: probe::text(raw, TITLE).unwrap_or_else(|| id.clone()),
      score: probe::clamp(score, 0.0, 100.0),
      tier: probe::text(raw, TIER).unwrap_or_else(|| UNKNOWN_TIER.to_string()),
      severity: probe::clamp(probe::plain_number(raw, SEVERITY).unwrap_or(0.0), 0.0, 100.0),
      breakout: probe::clamp(probe::plain_number(raw, BREAKOUT).unwrap_or(0.0), 0.0, 100.0),
      confidence: probe::clamp(probe::number(raw, CONFIDENCE).unwrap_or(0.0), 0.0, 1.0),
      saturation: probe::clamp(probe::plain_number(raw, SATURATION).unwrap_or(0.0), 0.0, 100.0),
      window: probe::text(raw, WINDOW)
        .and_then(|s| s.parse().ok())
        .unwrap_or_default(),
      persona: probe::text(raw, PERSONA),
      vertical: probe::identifier(raw, VERTICAL),
      updated_at: probe::timestamp(raw, UPDATED_AT),
      build_signal: probe::lookup(raw, BUILD_SIGNAL).and_then(BuildSignal::from_raw),
      extra: probe::extras(object, &known),
      id,
    })
  }
}

/// One page of an opportunity list as the service returned it.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct OpportunityPage {
  pub items: Vec<Opportunity>,
  pub generated_at: Option<DateTime<Utc>>,
  /// Server-side total when the envelope reports one
  pub total: Option<u64>,
  /// Records dropped for missing required fields
  pub rejected: usize,
}

pub struct OpportunityList;

impl Contract for OpportunityList {
  type Output = OpportunityPage;

  const KIND: SchemaKind = SchemaKind::Opportunities;

  fn normalize(raw: &Value) -> Result<OpportunityPage, ContractError> {
    let list = unwrap_list(
      Self::KIND,
      raw,
      &[Envelope::Bare, Envelope::Items, Envelope::NestedItems, Envelope::Results],
    )?;
    let (items, rejected) = collect_records(Self::KIND, list.records, Opportunity::from_raw);
    Ok(OpportunityPage {
      items,
      generated_at: list.generated_at,
      total: list.total,
      rejected,
    })
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  fn top_pain() -> Value {
    json!({
      "cluster_id": "c-101",
      "cluster_summary": "Manual invoice matching in mid-size wholesalers",
      "exploitability_score": 82,
      "exploitability_tier": "PRIME",
      "severity_score": 74,
      "breakout_score": 61,
      "opportunity_window_status": "EARLY",
      "confidence_score": 70,
      "dominant_persona": "AP clerk",
      "build_signal": {
        "recommendation": "BUILD",
        "reasoning_summary": "Recurring pain, no incumbent",
        "top_positive_factors": ["recurrence"],
        "top_risk_factors": []
      },
      "vertical_id": 7,
      "updated_at": "2025-05-02T10:00:00Z",
      "novelty_score": 12
    })
  }

  #[test]
  fn test_full_record() {
    let opp = Opportunity::from_raw(&top_pain()).unwrap();
    assert_eq!(opp.id, "c-101");
    assert_eq!(opp.score, 82.0);
    assert_eq!(opp.tier, "PRIME");
    assert_eq!(opp.confidence, 0.7);
    assert_eq!(opp.window, WindowStatus::Early);
    assert_eq!(opp.vertical.as_deref(), Some("7"));
    assert_eq!(opp.build_signal.as_ref().unwrap().positive_factors, vec!["recurrence"]);
    assert_eq!(opp.extra.get("novelty_score"), Some(&json!(12)));
    assert!(!opp.extra.contains_key("build_signal"));
  }

  #[test]
  fn test_missing_required_field_rejects() {
    let mut raw = top_pain();
    raw.as_object_mut().unwrap().remove("exploitability_score");
    let err = Opportunity::from_raw(&raw).unwrap_err();
    assert!(err.reason.contains("score"));

    let mut raw = top_pain();
    raw.as_object_mut().unwrap().remove("cluster_id");
    assert!(Opportunity::from_raw(&raw).is_err());
  }

  #[test]
  fn test_missing_optional_field_uses_default() {
    let opp = Opportunity::from_raw(&json!({ "id": "c-9", "score": 40 })).unwrap();
    assert_eq!(opp.title, "c-9");
    assert_eq!(opp.tier, UNKNOWN_TIER);
    assert_eq!(opp.saturation, 0.0);
    assert_eq!(opp.confidence, 0.0);
    assert_eq!(opp.window, WindowStatus::Unknown);
    assert!(opp.build_signal.is_none());
  }

  #[test]
  fn test_values_are_clamped() {
    let opp = Opportunity::from_raw(&json!({ "id": "c", "score": 140, "confidence": 3.2, "severity": -5 })).unwrap();
    assert_eq!(opp.score, 100.0);
    assert_eq!(opp.confidence, 1.0);
    assert_eq!(opp.severity, 0.0);
  }

  #[test]
  fn test_nested_score_alias() {
    let opp = Opportunity::from_raw(&json!({ "id": "c", "exploitability": { "score": 55, "tier": "GOOD" } })).unwrap();
    assert_eq!(opp.score, 55.0);
    assert_eq!(opp.tier, "GOOD");
  }

  #[test]
  fn test_legacy_window_names() {
    assert_eq!("hot".parse::<WindowStatus>().unwrap(), WindowStatus::Peak);
    assert_eq!("EMERGING".parse::<WindowStatus>().unwrap(), WindowStatus::Early);
    assert_eq!("SATURATED".parse::<WindowStatus>().unwrap(), WindowStatus::Saturating);
    assert_eq!("whatever".parse::<WindowStatus>().unwrap(), WindowStatus::Unknown);
  }

  #[test]
  fn test_list_drops_and_counts_bad_records() {
    let raw = json!({ "items": [top_pain(), { "cluster_id": "broken" }, "nope"], "total": 3 });
    let page = OpportunityList::normalize(&raw).unwrap();
    assert_eq!(page.items.len(), 1);
    assert_eq!(page.rejected, 2);
    assert_eq!(page.total, Some(3));
  }
}
