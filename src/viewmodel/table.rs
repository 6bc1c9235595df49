//! Ranked opportunity tables: local filtering, ordering and paging over the
//! fetch window.

use std::cmp::Ordering;
use std::collections::HashSet;

use serde::Serialize;

use crate::locator::{SortKey, ViewState};
use crate::normalize::Opportunity;

/// Entities matching every active filter of `state`.
///
/// Free text matches title, id and persona case-insensitively. An unset
/// filter matches everything.
pub fn filter<'a>(entities: &'a [Opportunity], state: &ViewState) -> Vec<&'a Opportunity> {
  let needle = state.free_text.trim().to_lowercase();
  entities
    .iter()
    .filter(|o| needle.is_empty() || matches_text(o, &needle))
    .filter(|o| match &state.vertical {
      Some(vertical) => o.vertical.as_deref() == Some(vertical.as_str()),
      None => true,
    })
    .filter(|o| match &state.tier {
      Some(tier) => o.tier.eq_ignore_ascii_case(tier),
      None => true,
    })
    .filter(|o| !state.emerging_only || o.window.is_emerging())
    .collect()
}

fn matches_text(o: &Opportunity, needle: &str) -> bool {
  o.title.to_lowercase().contains(needle)
    || o.id.to_lowercase().contains(needle)
    || o.persona.as_deref().is_some_and(|p| p.to_lowercase().contains(needle))
}

/// Order descending by `key`. Ties fall back to breakout for score sorts and
/// to score otherwise, then to id ascending.
pub fn sort(entities: &mut [&Opportunity], key: SortKey) {
  entities.sort_by(|a, b| compare(a, b, key));
}

fn compare(a: &Opportunity, b: &Opportunity, key: SortKey) -> Ordering {
  let desc = |x: f64, y: f64| y.total_cmp(&x);
  let primary = match key {
    SortKey::ScoreDesc => desc(a.score, b.score),
    SortKey::BreakoutDesc => desc(a.breakout, b.breakout),
    SortKey::ConfidenceDesc => desc(a.confidence, b.confidence),
    SortKey::SeverityDesc => desc(a.severity, b.severity),
    // Undated records sort last
    SortKey::RecentDesc => b.updated_at.cmp(&a.updated_at),
  };
  let secondary = match key {
    SortKey::ScoreDesc => desc(a.breakout, b.breakout),
    _ => desc(a.score, b.score),
  };
  primary.then(secondary).then_with(|| a.id.cmp(&b.id))
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RankedRow {
  /// 1-based position across the whole filtered set
  pub rank: usize,
  pub starred: bool,
  pub item: Opportunity,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RankedPage {
  pub rows: Vec<RankedRow>,
  /// Matches before paging
  pub total: usize,
  pub offset: u32,
  pub limit: u32,
}

impl RankedPage {
  pub fn has_next(&self) -> bool {
    (self.offset as usize) + self.rows.len() < self.total
  }

  pub fn has_previous(&self) -> bool {
    self.offset > 0
  }
}

/// Filter, sort and slice `entities` for the table view.
pub fn ranked_page(entities: &[Opportunity], state: &ViewState, starred: &HashSet<String>) -> RankedPage {
  let mut matched = filter(entities, state);
  sort(&mut matched, state.sort);
  let total = matched.len();

  let offset = state.offset as usize;
  let rows = matched
    .into_iter()
    .enumerate()
    .skip(offset)
    .take(state.limit as usize)
    .map(|(i, item)| RankedRow {
      rank: i + 1,
      starred: starred.contains(&item.id),
      item: item.clone(),
    })
    .collect();

  RankedPage {
    rows,
    total,
    offset: state.offset,
    limit: state.limit,
  }
}

#[cfg(test)]
pub(crate) mod tests {
  use super::*;
  use crate::normalize::WindowStatus;
  use serde_json::json;

  pub(crate) fn opportunity(id: &str, score: f64, breakout: f64) -> Opportunity {
    Opportunity::from_raw(&json!({
      "cluster_id": id,
      "exploitability_score": score,
      "breakout_score": breakout,
    }))
    .unwrap()
  }

  fn ids(rows: &[&Opportunity]) -> Vec<String> {
    rows.iter().map(|o| o.id.clone()).collect()
  }

  #[test]
  fn test_filter_is_a_conjunction() {
    let mut a = opportunity("a", 50.0, 0.0);
    a.title = "Invoice reconciliation".into();
    a.tier = "prime".into();
    a.window = WindowStatus::Early;
    let mut b = opportunity("b", 60.0, 0.0);
    b.title = "Invoice chasing".into();
    b.tier = "SOLID".into();
    let mut c = opportunity("c", 70.0, 0.0);
    c.persona = Some("Finance ops".into());
    c.tier = "PRIME".into();
    let items = vec![a, b, c];

    let text = ViewState {
      free_text: "INVOICE".into(),
      ..ViewState::default()
    };
    assert_eq!(ids(&filter(&items, &text)), vec!["a", "b"]);

    let tier = ViewState {
      tier: Some("Prime".into()),
      ..ViewState::default()
    };
    assert_eq!(ids(&filter(&items, &tier)), vec!["a", "c"]);

    let both = ViewState {
      free_text: "invoice".into(),
      tier: Some("PRIME".into()),
      emerging_only: true,
      ..ViewState::default()
    };
    assert_eq!(ids(&filter(&items, &both)), vec!["a"]);

    let persona = ViewState {
      free_text: "finance".into(),
      ..ViewState::default()
    };
    assert_eq!(ids(&filter(&items, &persona)), vec!["c"]);
    assert_eq!(filter(&items, &ViewState::default()).len(), 3);
  }

  #[test]
  fn test_sort_ties() {
    let items = vec![
      opportunity("b", 80.0, 10.0),
      opportunity("a", 80.0, 10.0),
      opportunity("c", 80.0, 40.0),
      opportunity("d", 90.0, 0.0),
    ];
    let mut rows: Vec<&Opportunity> = items.iter().collect();
    sort(&mut rows, SortKey::ScoreDesc);
    assert_eq!(ids(&rows), vec!["d", "c", "a", "b"]);

    sort(&mut rows, SortKey::BreakoutDesc);
    assert_eq!(ids(&rows), vec!["c", "a", "b", "d"]);
  }

  #[test]
  fn test_recent_sort_puts_undated_last() {
    let mut dated = opportunity("dated", 10.0, 0.0);
    dated.updated_at = Some(chrono::Utc::now());
    let items = vec![opportunity("undated", 90.0, 0.0), dated];
    let mut rows: Vec<&Opportunity> = items.iter().collect();
    sort(&mut rows, SortKey::RecentDesc);
    assert_eq!(ids(&rows), vec!["dated", "undated"]);
  }

  #[test]
  fn test_ranked_page() {
    let items: Vec<Opportunity> = (0..30).map(|i| opportunity(&format!("c-{i:02}"), i as f64, 0.0)).collect();
    let starred = HashSet::from(["c-27".to_string()]);
    let state = ViewState {
      limit: 5,
      offset: 1,
      ..ViewState::default()
    };

    let page = ranked_page(&items, &state, &starred);
    assert_eq!(page.total, 30);
    assert_eq!(page.rows.len(), 5);
    assert_eq!(page.rows[0].rank, 2);
    assert_eq!(page.rows[0].item.id, "c-28");
    assert!(page.rows[1].starred);
    assert!(page.has_next());
    assert!(page.has_previous());

    let past_end = ViewState {
      offset: 40,
      ..state
    };
    let page = ranked_page(&items, &past_end, &starred);
    assert!(page.rows.is_empty());
    assert_eq!(page.total, 30);
    assert!(!page.has_next());
  }
}
