//! Cluster deep-dive records.
//!
//! Two releases of the detail payload are in the wild:
//!
//! - *narrative* (older): `title`, `status`, `score`, a `breakdown` object,
//!   `why_now` bullet points and a `timeline` of `{label, at, kind}` milestones;
//! - *scored* (current): `cluster_id`, `exploitability_score_v2` and the other
//!   flat `*_score` fields, `representative_signals`, `key_phrases` and a
//!   daily `timeline` of `{date, volume, growth_rate, velocity, breakout_flag}`.
//!
//! The shape is picked from which fields are present. A payload with neither
//! (non-object or `{}`) yields a placeholder record so the drawer always has
//! something to render.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::opportunity::WindowStatus;
use super::probe::{self, Alias};
use super::{Contract, SchemaKind};
use crate::error::ContractError;

const PLACEHOLDER_TEXT: &str = "—";
const PLACEHOLDER_BREAKDOWN: f64 = 40.0;

/// Fields only the scored shape carries.
const SCORED_MARKERS: &[&str] = &[
  "cluster_id",
  "exploitability_score_v2",
  "exploitability_score",
  "representative_signals",
  "key_phrases",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DetailShape {
  Narrative,
  Scored,
}

impl DetailShape {
  fn detect(object: &Map<String, Value>) -> Option<Self> {
    if object.is_empty() {
      None
    } else if probe::has_any(object, SCORED_MARKERS) {
      Some(DetailShape::Scored)
    } else {
      Some(DetailShape::Narrative)
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ScoreBreakdown {
  pub severity: f64,
  pub recurrence: f64,
  pub exploitability: f64,
  pub competition: f64,
  pub freshness: f64,
}

impl ScoreBreakdown {
  fn uniform(value: f64) -> Self {
    Self {
      severity: value,
      recurrence: value,
      exploitability: value,
      competition: value,
      freshness: value,
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimelineKind {
  Emerging,
  Breakout,
  Declining,
  #[default]
  Info,
}

impl TimelineKind {
  fn parse(s: &str) -> Self {
    match s {
      "emerging" => TimelineKind::Emerging,
      "breakout" => TimelineKind::Breakout,
      "declining" => TimelineKind::Declining,
      _ => TimelineKind::Info,
    }
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimelinePoint {
  pub label: String,
  pub at: Option<String>,
  pub kind: TimelineKind,
  pub volume: Option<f64>,
  pub growth_rate: Option<f64>,
  pub velocity: Option<f64>,
}

impl TimelinePoint {
  fn milestone(label: &str) -> Self {
    Self {
      label: label.to_string(),
      at: None,
      kind: TimelineKind::Info,
      volume: None,
      growth_rate: None,
      velocity: None,
    }
  }

  fn narrative(raw: &Value) -> Self {
    Self {
      label: probe::text(raw, &["label"]).unwrap_or_else(|| PLACEHOLDER_TEXT.to_string()),
      at: probe::text(raw, &["at"]),
      kind: probe::text(raw, &["kind"])
        .map(|k| TimelineKind::parse(&k))
        .unwrap_or_default(),
      volume: None,
      growth_rate: None,
      velocity: None,
    }
  }

  fn daily(raw: &Value) -> Self {
    let date = probe::text(raw, &["date", "at"]);
    let breakout = probe::flag(raw, &["breakout_flag"]).unwrap_or(false);
    Self {
      label: date.clone().unwrap_or_else(|| PLACEHOLDER_TEXT.to_string()),
      at: date,
      kind: if breakout { TimelineKind::Breakout } else { TimelineKind::Info },
      volume: probe::plain_number(raw, &["volume"]),
      growth_rate: probe::plain_number(raw, &["growth_rate"]),
      velocity: probe::plain_number(raw, &["velocity"]),
    }
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepresentativeSignal {
  pub id: String,
  pub text: String,
  pub url: Option<String>,
  pub title: Option<String>,
}

impl RepresentativeSignal {
  fn from_raw(raw: &Value) -> Option<Self> {
    Some(Self {
      id: probe::identifier(raw, &["id"])?,
      text: probe::text(raw, &["text", "body"])?,
      url: probe::text(raw, &["url"]),
      title: probe::text(raw, &["title"]),
    })
  }
}

/// Canonical cluster detail, whichever shape it came from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterDetail {
  pub id: String,
  pub title: String,
  pub subtitle: String,
  pub status: WindowStatus,
  /// 0..=100
  pub score: f64,
  /// 0..=100
  pub percentile: f64,
  /// -100..=100 (%)
  pub momentum_7d: f64,
  pub tier: String,
  /// 0..=1
  pub confidence: f64,
  /// Scoring model version, when the service reports one
  pub scoring_version: Option<String>,
  pub why_now: Vec<String>,
  pub breakdown: ScoreBreakdown,
  pub key_phrases: Vec<String>,
  pub signals: Vec<RepresentativeSignal>,
  pub timeline: Vec<TimelinePoint>,
  pub is_placeholder: bool,
  #[serde(default, skip_serializing_if = "Map::is_empty")]
  pub extra: Map<String, Value>,
}

impl ClusterDetail {
  /// Labelled stand-in shown while the service has nothing for `id`.
  pub fn placeholder(id: &str) -> Self {
    Self {
      id: id.to_string(),
      title: PLACEHOLDER_TEXT.to_string(),
      subtitle: format!("cluster={id}"),
      status: WindowStatus::Unknown,
      score: 0.0,
      percentile: 0.0,
      momentum_7d: 0.0,
      tier: PLACEHOLDER_TEXT.to_string(),
      confidence: 0.0,
      scoring_version: None,
      why_now: vec![
        "Waiting for data...".to_string(),
        "API not connected or empty payload.".to_string(),
      ],
      breakdown: ScoreBreakdown::uniform(PLACEHOLDER_BREAKDOWN),
      key_phrases: Vec::new(),
      signals: Vec::new(),
      timeline: ["Emerging", "Breakout", "Declining"]
        .into_iter()
        .map(TimelinePoint::milestone)
        .collect(),
      is_placeholder: true,
      extra: Map::new(),
    }
  }

  /// Normalize a detail payload fetched for `id`.
  pub fn from_raw(id: &str, raw: &Value) -> Result<Self, ContractError> {
    let Some(object) = raw.as_object() else {
      return Ok(Self::placeholder(id));
    };
    match DetailShape::detect(object) {
      None => Ok(Self::placeholder(id)),
      Some(DetailShape::Narrative) => Ok(Self::narrative(id, raw, object)),
      Some(DetailShape::Scored) => Self::scored(id, raw, object),
    }
  }

  fn narrative(id: &str, raw: &Value, object: &Map<String, Value>) -> Self {
    const KNOWN: &[&str] = &[
      "id", "title", "subtitle", "status", "score", "percentile", "momentum_7d", "tier", "confidence", "why_now",
      "breakdown", "timeline",
    ];
    let base = Self::placeholder(id);
    let part = |name: &'static str| {
      probe::plain_number(raw, &[name])
        .map(|n| probe::clamp(n, 0.0, 100.0))
        .unwrap_or(PLACEHOLDER_BREAKDOWN)
    };

    Self {
      title: probe::text(raw, &["title"]).unwrap_or(base.title),
      subtitle: probe::text(raw, &["subtitle"]).unwrap_or(base.subtitle),
      status: status(raw, &["status"]),
      score: probe::clamp(probe::plain_number(raw, &["score"]).unwrap_or(0.0), 0.0, 100.0),
      percentile: probe::clamp(probe::plain_number(raw, &["percentile"]).unwrap_or(0.0), 0.0, 100.0),
      momentum_7d: probe::clamp(probe::plain_number(raw, &["momentum_7d"]).unwrap_or(0.0), -100.0, 100.0),
      tier: probe::text(raw, &["tier"]).unwrap_or(base.tier),
      confidence: probe::clamp(probe::plain_number(raw, &["confidence"]).unwrap_or(0.0), 0.0, 1.0),
      why_now: probe::text_list(raw, &["why_now"]).unwrap_or(base.why_now),
      breakdown: ScoreBreakdown {
        severity: part("breakdown.severity"),
        recurrence: part("breakdown.recurrence"),
        exploitability: part("breakdown.exploitability"),
        competition: part("breakdown.competition"),
        freshness: part("breakdown.freshness"),
      },
      timeline: probe::records(raw, "timeline")
        .iter()
        .filter(|t| t.is_object())
        .map(TimelinePoint::narrative)
        .collect(),
      is_placeholder: false,
      extra: probe::extras(object, KNOWN),
      ..base
    }
  }

  fn scored(id: &str, raw: &Value, object: &Map<String, Value>) -> Result<Self, ContractError> {
    const SCORE: &[&str] = &["exploitability_score_v2", "exploitability_score"];
    const TIER: &[&str] = &["exploitability_tier_v2", "exploitability_tier"];
    const CONFIDENCE: &[Alias] = &[Alias::scaled("confidence_score", 100.0), Alias::plain("confidence")];
    const KNOWN: &[&str] = &[
      "cluster_id",
      "id",
      "cluster_summary",
      "exploitability_score_v2",
      "exploitability_score",
      "exploitability_tier_v2",
      "exploitability_tier",
      "exploitability_version_v2",
      "opportunity_window_status",
      "severity_score",
      "recurrence_score",
      "competitive_heat_score",
      "breakout_score",
      "freshness_score",
      "confidence_score",
      "confidence",
      "percentile",
      "momentum_7d",
      "why_now",
      "key_phrases",
      "representative_signals",
      "timeline",
    ];

    let score = probe::plain_number(raw, SCORE).ok_or_else(|| {
      ContractError::new(SchemaKind::ClusterDetail, format!("cluster {id} is missing required field `score`"))
    })?;
    let id = probe::identifier(raw, &["cluster_id", "id"]).unwrap_or_else(|| id.to_string());

    Ok(Self {
      title: probe::text(raw, &["cluster_summary", "title"]).unwrap_or_else(|| id.clone()),
      subtitle: format!("cluster={id}"),
      status: status(raw, &["opportunity_window_status", "status"]),
      score: probe::clamp(score, 0.0, 100.0),
      percentile: percent(raw, &["percentile"]),
      momentum_7d: probe::clamp(probe::plain_number(raw, &["momentum_7d"]).unwrap_or(0.0), -100.0, 100.0),
      tier: probe::text(raw, TIER).unwrap_or_else(|| PLACEHOLDER_TEXT.to_string()),
      confidence: probe::clamp(probe::number(raw, CONFIDENCE).unwrap_or(0.0), 0.0, 1.0),
      scoring_version: probe::text(raw, &["exploitability_version_v2"]),
      why_now: probe::text_list(raw, &["why_now"]).unwrap_or_default(),
      breakdown: ScoreBreakdown {
        severity: percent(raw, &["severity_score"]),
        recurrence: percent(raw, &["recurrence_score"]),
        exploitability: probe::clamp(score, 0.0, 100.0),
        competition: percent(raw, &["competitive_heat_score"]),
        freshness: percent(raw, &["freshness_score", "breakout_score"]),
      },
      key_phrases: probe::text_list(raw, &["key_phrases"]).unwrap_or_default(),
      signals: probe::records(raw, "representative_signals")
        .iter()
        .filter_map(RepresentativeSignal::from_raw)
        .collect(),
      timeline: probe::records(raw, "timeline")
        .iter()
        .filter(|t| t.is_object())
        .map(TimelinePoint::daily)
        .collect(),
      is_placeholder: false,
      extra: probe::extras(object, KNOWN),
      id,
    })
  }
}

fn status(raw: &Value, aliases: &[&str]) -> WindowStatus {
  probe::text(raw, aliases)
    .and_then(|s| s.parse().ok())
    .unwrap_or_default()
}

fn percent(raw: &Value, aliases: &[&'static str]) -> f64 {
  probe::clamp(probe::plain_number(raw, aliases).unwrap_or(0.0), 0.0, 100.0)
}

pub struct ClusterDetailContract;

impl Contract for ClusterDetailContract {
  type Output = ClusterDetail;

  const KIND: SchemaKind = SchemaKind::ClusterDetail;

  /// Without a request path to take the id from, the payload's own id is
  /// used, or `unknown`.
  fn normalize(raw: &Value) -> Result<ClusterDetail, ContractError> {
    let id = probe::identifier(raw, &["cluster_id", "id"]).unwrap_or_else(|| "unknown".to_string());
    ClusterDetail::from_raw(&id, raw)
  }
}
