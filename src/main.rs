use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use serde::Serialize;
use serde_json::json;
use tracing::{error, info};

use sense_dash::config::Config;
use sense_dash::error::FetchError;
use sense_dash::preferences::PreferenceSet;
use sense_dash::query::RemoteView;
use sense_dash::remote::Endpoint;
use sense_dash::store::{MemoryNavigator, ViewStateStore};
use sense_dash::viewmodel;
use sense_dash::{logging, DashboardContext};

#[derive(Parser, Debug)]
#[command(name = "sense-dash")]
#[command(about = "Query the Sense analytics service and print dashboard view models")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/sense-dash/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  /// View locator, e.g. "q=invoice&tier=PRIME&sort=breakout_desc"
  #[arg(short, long, default_value = "")]
  locator: String,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Print the view model of one dashboard view as JSON
  View {
    #[command(subcommand)]
    view: View,
  },
  /// Add a cluster to the watchlist
  Star { id: String },
  /// Remove a cluster from the watchlist
  Unstar { id: String },
  /// List the watchlist, newest first
  Starred,
}

#[derive(Subcommand, Debug)]
enum View {
  /// Top pains table
  Opportunities,
  /// Emerging opportunities table
  Emerging,
  /// Declining risks table
  Declining,
  Overview,
  Verticals,
  /// Trending clusters with sparklines
  Trending,
  /// One cluster's deep dive
  Cluster { id: String },
  /// Pipeline queues and recent runs
  Ops,
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();
  let _guard = logging::init()?;

  let config = Config::load(args.config.as_deref())?;
  let ctx = DashboardContext::from_config(config)?;

  match args.command {
    Command::View { view } => {
      let output = render(&ctx, &args.locator, view).await?;
      println!("{}", serde_json::to_string_pretty(&output)?);
    }
    Command::Star { id } => {
      let added = ctx.watchlist().add(&id)?;
      info!(%id, added, "Star");
      println!("{}", if added { format!("starred {id}") } else { format!("{id} already starred") });
    }
    Command::Unstar { id } => {
      let removed = ctx.watchlist().remove(&id)?;
      info!(%id, removed, "Unstar");
      println!("{}", if removed { format!("unstarred {id}") } else { format!("{id} was not starred") });
    }
    Command::Starred => print_starred(ctx.watchlist())?,
  }

  Ok(())
}

async fn render(ctx: &DashboardContext, locator: &str, view: View) -> Result<serde_json::Value> {
  let store = ViewStateStore::mount(Arc::new(MemoryNavigator::new(locator)));
  let state = store.current_state();

  let endpoint = match view {
    View::Opportunities => Endpoint::TopPains,
    View::Emerging => Endpoint::EmergingOpportunities,
    View::Declining => Endpoint::DecliningRisks,
    View::Overview => {
      let overview = settle(ctx.overview()).await?;
      return Ok(json!({
        "placeholder": overview.is_placeholder,
        "updated_at": overview.updated_at,
        "tiles": viewmodel::overview_tiles(&overview),
        "breakouts": overview.breakouts,
        "heatmap": viewmodel::overview_heatmap(&overview),
      }));
    }
    View::Verticals => return to_json(&*settle(ctx.verticals()).await?),
    View::Trending => return to_json(&*settle(ctx.trending(&state)).await?),
    View::Cluster { id } => {
      let detail = settle(ctx.cluster_detail(&id)).await?;
      let starred = ctx.watchlist().contains(&detail.id)?;
      return Ok(json!({ "starred": starred, "detail": &*detail }));
    }
    View::Ops => {
      let mut queues = ctx.ops_queues();
      let mut runs = ctx.ops_runs();
      let (queues, runs) = tokio::join!(queues.settle(), runs.settle());
      return Ok(json!({ "queues": &*queues.map_err(report)?, "runs": &*runs.map_err(report)? }));
    }
  };

  let page = settle(ctx.opportunities(endpoint, &state)).await?;
  let starred = ctx.watchlist().ids()?;
  Ok(json!({
    "locator": store.locator().to_query_string(),
    "state": state,
    "rejected": page.rejected,
    "tiles": viewmodel::kpi_tiles(&page.items),
    "tiers": viewmodel::tier_distribution(&page.items),
    "score_histogram": viewmodel::histogram(page.items.iter().map(|o| o.score), 0.0..=100.0, 20.0),
    "table": viewmodel::ranked_page(&page.items, &state, &starred),
  }))
}

async fn settle<T: Serialize + Send + Sync + 'static>(mut view: RemoteView<T>) -> Result<Arc<T>> {
  view.settle().await.map_err(report)
}

fn report(e: FetchError) -> color_eyre::Report {
  error!(error = %e, "Fetch failed");
  eyre!("{}", e.user_message())
}

fn to_json<T: Serialize>(value: &T) -> Result<serde_json::Value> {
  Ok(serde_json::to_value(value)?)
}

fn print_starred(watchlist: &PreferenceSet) -> Result<()> {
  let items = watchlist.items()?;
  if items.is_empty() {
    println!("watchlist is empty");
  }
  for item in items {
    println!("{}\t{}", item.added_at.to_rfc3339(), item.id);
  }
  Ok(())
}
