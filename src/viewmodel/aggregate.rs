//! Aggregates behind the overview: KPI tiles, score histograms, the
//! industry × function heatmap and tier counts.

use std::collections::{BTreeMap, HashMap};
use std::ops::RangeInclusive;

use serde::Serialize;

use crate::normalize::{HeatmapCell, Opportunity, Overview};

// ============================================================================
// KPI tiles
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct KpiTile {
  pub key: String,
  pub label: String,
  pub value: f64,
  /// `value` formatted for display
  pub display: String,
  pub delta_7d: Option<f64>,
}

impl KpiTile {
  fn new(key: &str, label: &str, value: f64, display: String) -> Self {
    Self {
      key: key.to_string(),
      label: label.to_string(),
      value,
      display,
      delta_7d: None,
    }
  }
}

fn percent(share: f64) -> String {
  format!("{}%", (share * 100.0).round())
}

/// Tiles computed from the surfaced opportunities. Shares are fractions of
/// the surfaced set; an empty set yields zeros.
pub fn kpi_tiles(entities: &[Opportunity]) -> Vec<KpiTile> {
  let total = entities.len();
  let share = |count: usize| if total == 0 { 0.0 } else { count as f64 / total as f64 };
  let emerging = share(entities.iter().filter(|o| o.window.is_emerging()).count());
  let declining = share(entities.iter().filter(|o| o.window.is_declining()).count());
  let avg_score = if total == 0 {
    0.0
  } else {
    entities.iter().map(|o| o.score).sum::<f64>() / total as f64
  };

  vec![
    KpiTile::new("clusters_surfaced", "Clusters surfaced", total as f64, total.to_string()),
    KpiTile::new("emerging_share", "% emerging (in surfaced)", emerging, percent(emerging)),
    KpiTile::new("declining_share", "% declining (in surfaced)", declining, percent(declining)),
    KpiTile::new("avg_exploitability", "Avg exploitability", avg_score, format!("{avg_score:.1}")),
  ]
}

/// Backend-computed KPIs, passed through as tiles.
pub fn overview_tiles(overview: &Overview) -> Vec<KpiTile> {
  overview
    .kpis
    .iter()
    .map(|kpi| {
      let display = if kpi.value.fract() == 0.0 {
        format!("{}", kpi.value)
      } else {
        format!("{:.1}", kpi.value)
      };
      KpiTile {
        delta_7d: kpi.delta_7d,
        ..KpiTile::new(&kpi.key, &kpi.label, kpi.value, display)
      }
    })
    .collect()
}

// ============================================================================
// Histogram
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Bucket {
  pub lower: f64,
  /// Exclusive, except for the last bucket
  pub upper: f64,
  pub count: usize,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct Histogram {
  pub buckets: Vec<Bucket>,
  /// Values that were non-finite or outside the domain
  pub skipped: usize,
}

impl Histogram {
  pub fn total(&self) -> usize {
    self.buckets.iter().map(|b| b.count).sum()
  }
}

/// Widths that would need more buckets than this yield an empty histogram.
pub const MAX_BUCKETS: usize = 10_000;

/// Fixed-width buckets over `domain`. The domain maximum belongs to the last
/// bucket; non-finite and out-of-domain values are skipped.
pub fn histogram(values: impl IntoIterator<Item = f64>, domain: RangeInclusive<f64>, width: f64) -> Histogram {
  let (lo, hi) = (*domain.start(), *domain.end());
  let span = ((hi - lo) / width).ceil();
  let usable = width > 0.0 && lo.is_finite() && hi.is_finite() && hi > lo;
  if !usable || !(span >= 1.0 && span <= MAX_BUCKETS as f64) {
    return Histogram {
      buckets: Vec::new(),
      skipped: values.into_iter().count(),
    };
  }

  let n = span as usize;
  let mut buckets: Vec<Bucket> = (0..n)
    .map(|i| Bucket {
      lower: lo + i as f64 * width,
      upper: (lo + (i + 1) as f64 * width).min(hi),
      count: 0,
    })
    .collect();

  let mut skipped = 0;
  for value in values {
    if !value.is_finite() || !domain.contains(&value) {
      skipped += 1;
      continue;
    }
    let index = (((value - lo) / width).floor() as usize).min(n - 1);
    buckets[index].count += 1;
  }
  Histogram { buckets, skipped }
}

// ============================================================================
// Heatmap
// ============================================================================

#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct HeatmapGrid {
  pub rows: Vec<String>,
  pub cols: Vec<String>,
  /// `values[row][col]`, always `rows.len()` × `cols.len()`
  pub values: Vec<Vec<f64>>,
  /// Largest value, for intensity scaling
  pub max: f64,
}

impl HeatmapGrid {
  pub fn value(&self, row: &str, col: &str) -> Option<f64> {
    let r = self.rows.iter().position(|x| x == row)?;
    let c = self.cols.iter().position(|x| x == col)?;
    Some(self.values[r][c])
  }

  /// 0..=1 intensity of a cell relative to the grid maximum.
  pub fn intensity(&self, row: usize, col: usize) -> f64 {
    match self.values.get(row).and_then(|r| r.get(col)) {
      Some(v) if self.max > 0.0 => (v / self.max).clamp(0.0, 1.0),
      _ => 0.0,
    }
  }

  pub fn cell_count(&self) -> usize {
    self.rows.len() * self.cols.len()
  }
}

/// Complete rows × cols grid. Declared combinations without a cell are 0;
/// cells outside the declared axes are ignored.
pub fn heatmap(rows: &[String], cols: &[String], cells: &[HeatmapCell]) -> HeatmapGrid {
  let supplied: HashMap<(&str, &str), f64> = cells
    .iter()
    .filter(|c| c.value.is_finite())
    .map(|c| ((c.row.as_str(), c.col.as_str()), c.value))
    .collect();

  let values: Vec<Vec<f64>> = rows
    .iter()
    .map(|r| {
      cols
        .iter()
        .map(|c| supplied.get(&(r.as_str(), c.as_str())).copied().unwrap_or(0.0))
        .collect()
    })
    .collect();
  let max = values.iter().flatten().copied().fold(0.0, f64::max);

  HeatmapGrid {
    rows: rows.to_vec(),
    cols: cols.to_vec(),
    values,
    max,
  }
}

/// The overview's heatmap on its own axes.
pub fn overview_heatmap(overview: &Overview) -> HeatmapGrid {
  heatmap(&overview.heatmap_rows, &overview.heatmap_cols, &overview.heatmap)
}

// ============================================================================
// Tier distribution
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TierCount {
  pub tier: String,
  pub count: usize,
}

/// Opportunities per tier, most populated first, ties by name.
pub fn tier_distribution(entities: &[Opportunity]) -> Vec<TierCount> {
  let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
  for o in entities {
    *counts.entry(o.tier.as_str()).or_default() += 1;
  }
  let mut tiers: Vec<TierCount> = counts
    .into_iter()
    .map(|(tier, count)| TierCount {
      tier: tier.to_string(),
      count,
    })
    .collect();
  // BTreeMap order is by name, so a stable sort keeps ties alphabetical
  tiers.sort_by(|a, b| b.count.cmp(&a.count));
  tiers
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::normalize::WindowStatus;
  use crate::viewmodel::table::tests::opportunity;

  fn cell(row: &str, col: &str, value: f64) -> HeatmapCell {
    HeatmapCell {
      row: row.to_string(),
      col: col.to_string(),
      value,
      top_vertical: None,
      avg_score: None,
    }
  }

  fn labels(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
  }

  #[test]
  fn test_missing_heatmap_cells_are_zero() {
    let grid = heatmap(&labels(&["A", "B"]), &labels(&["X", "Y"]), &[cell("A", "X", 0.7)]);
    assert_eq!(grid.cell_count(), 4);
    let all: Vec<f64> = grid.values.iter().flatten().copied().collect();
    assert_eq!(all.len(), 4);
    assert_eq!(all.iter().filter(|v| **v == 0.0).count(), 3);
    assert_eq!(grid.value("A", "X"), Some(0.7));
    assert_eq!(grid.max, 0.7);
    assert_eq!(grid.intensity(0, 0), 1.0);
  }

  #[test]
  fn test_heatmap_ignores_undeclared_cells() {
    let grid = heatmap(&labels(&["A"]), &labels(&["X"]), &[cell("Z", "X", 9.0), cell("A", "X", 1.0)]);
    assert_eq!(grid.values, vec![vec![1.0]]);
    assert_eq!(grid.max, 1.0);
  }

  #[test]
  fn test_domain_maximum_lands_in_last_bucket() {
    let h = histogram([100.0], 0.0..=100.0, 20.0);
    assert_eq!(h.buckets.len(), 5);
    assert_eq!(h.buckets[4].count, 1);
    assert_eq!(h.total(), 1);
  }

  #[test]
  fn test_histogram_boundaries() {
    let h = histogram([0.0, 19.99, 20.0, 55.0, f64::NAN, 120.0, -1.0], 0.0..=100.0, 20.0);
    let counts: Vec<usize> = h.buckets.iter().map(|b| b.count).collect();
    assert_eq!(counts, vec![2, 1, 1, 0, 0]);
    assert_eq!(h.skipped, 3);
    assert_eq!(h.buckets[4].upper, 100.0);
  }

  #[test]
  fn test_histogram_rejects_degenerate_domain() {
    let h = histogram([1.0, 2.0], 5.0..=5.0, 1.0);
    assert!(h.buckets.is_empty());
    assert_eq!(h.skipped, 2);
  }

  #[test]
  fn test_histogram_rejects_too_narrow_width() {
    let h = histogram([1.0, 50.0], 0.0..=100.0, 1e-300);
    assert!(h.buckets.is_empty());
    assert_eq!(h.skipped, 2);

    // 12800 buckets
    assert!(histogram([1.0], 0.0..=100.0, 1.0 / 128.0).buckets.is_empty());

    let h = histogram([1.0, 100.0], 0.0..=100.0, 1.0 / 64.0);
    assert_eq!(h.buckets.len(), 6400);
    assert_eq!(h.buckets[6399].count, 1);
    assert_eq!(h.total(), 2);
  }

  #[test]
  fn test_kpi_tiles() {
    let mut a = opportunity("a", 80.0, 0.0);
    a.window = WindowStatus::Early;
    let mut b = opportunity("b", 40.0, 0.0);
    b.window = WindowStatus::Declining;
    let tiles = kpi_tiles(&[a, b, opportunity("c", 30.0, 0.0), opportunity("d", 50.0, 0.0)]);

    assert_eq!(tiles[0].value, 4.0);
    assert_eq!(tiles[1].display, "25%");
    assert_eq!(tiles[2].value, 0.25);
    assert_eq!(tiles[3].display, "50.0");

    let empty = kpi_tiles(&[]);
    assert!(empty.iter().all(|t| t.value == 0.0));
  }

  #[test]
  fn test_overview_tiles_pass_through() {
    let tiles = overview_tiles(&Overview::placeholder());
    assert_eq!(tiles.len(), 5);
    assert!(tiles[0].label.contains("(no data)"));
    assert_eq!(tiles[0].display, "0");
  }

  #[test]
  fn test_tier_distribution() {
    let mut items = vec![
      opportunity("a", 1.0, 0.0),
      opportunity("b", 1.0, 0.0),
      opportunity("c", 1.0, 0.0),
      opportunity("d", 1.0, 0.0),
    ];
    items[0].tier = "SOLID".into();
    items[1].tier = "PRIME".into();
    items[2].tier = "PRIME".into();
    items[3].tier = "EMERGING".into();

    let tiers = tier_distribution(&items);
    let flat: Vec<(&str, usize)> = tiers.iter().map(|t| (t.tier.as_str(), t.count)).collect();
    assert_eq!(flat, vec![("PRIME", 2), ("EMERGING", 1), ("SOLID", 1)]);
  }
}
