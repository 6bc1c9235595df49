//! Pure builders that turn canonical entities and the current view state
//! into what a view renders.
//!
//! Nothing here is cached by the request cache. Callers that render often
//! wrap a builder in a [`Memo`].

pub mod aggregate;
pub mod memo;
pub mod table;

pub use aggregate::{
  heatmap, histogram, kpi_tiles, overview_heatmap, overview_tiles, tier_distribution, Bucket, HeatmapGrid, Histogram,
  KpiTile, TierCount,
};
pub use memo::Memo;
pub use table::{filter, ranked_page, sort, RankedPage, RankedRow};
