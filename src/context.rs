//! The dashboard's data context: one explicitly constructed owner of the
//! request cache, the remote source and the preference sets.
//!
//! Views receive the context (or clones of its handles) instead of reaching
//! for process-wide state. Dropping the context, and every view created from
//! it, releases the cache.

use std::collections::BTreeMap;
use std::sync::Arc;

use color_eyre::{eyre::eyre, Result};
use futures::future::BoxFuture;
use futures::FutureExt;
use serde::Serialize;
use serde_json::Value;
use tracing::info;

use crate::cache::{CacheResult, InvalidateTarget, RequestCache};
use crate::config::Config;
use crate::error::{ContractError, FetchError};
use crate::locator::ViewState;
use crate::normalize::{
  ClusterDetail, Contract, OpportunityPage, OpsQueue, OpsRun, Overview, TrendItem, Vertical,
};
use crate::normalize::{ops, opportunity, overview, trends, vertical};
use crate::preferences::{Namespace, PreferenceSet, PreferenceStore};
use crate::query::RemoteView;
use crate::remote::{Endpoint, HttpRemote, RemoteSource};

type Normalizer<T> = Arc<dyn Fn(&Value) -> Result<T, ContractError> + Send + Sync>;

pub struct DashboardContext {
  config: Config,
  cache: RequestCache,
  remote: Arc<dyn RemoteSource>,
  watchlist: PreferenceSet,
  portfolio: PreferenceSet,
}

impl DashboardContext {
  pub fn new(config: Config, remote: Arc<dyn RemoteSource>, preferences: Arc<PreferenceStore>) -> Self {
    Self {
      cache: RequestCache::new(&config.cache),
      remote,
      watchlist: PreferenceSet::new(Arc::clone(&preferences), Namespace::Watchlist),
      portfolio: PreferenceSet::new(preferences, Namespace::Portfolio),
      config,
    }
  }

  /// Build the production context: HTTP remote and on-disk preferences.
  pub fn from_config(config: Config) -> Result<Self> {
    let remote = HttpRemote::new(&config.api)?;
    let path = config.preferences.resolved_path()?;
    let preferences = PreferenceStore::open(&path)
      .map_err(|e| eyre!("Failed to open preferences at {}: {}", path.display(), e))?;
    info!(base_url = %config.api.base_url, preferences = %path.display(), "Dashboard context ready");
    Ok(Self::new(config, Arc::new(remote), Arc::new(preferences)))
  }

  pub fn config(&self) -> &Config {
    &self.config
  }

  pub fn cache(&self) -> &RequestCache {
    &self.cache
  }

  pub fn watchlist(&self) -> &PreferenceSet {
    &self.watchlist
  }

  pub fn portfolio(&self) -> &PreferenceSet {
    &self.portfolio
  }

  /// View of `endpoint` with explicit query parameters, normalized through
  /// contract `C`.
  pub fn remote_view<C: Contract>(&self, endpoint: &Endpoint, params: BTreeMap<String, String>) -> RemoteView<C::Output> {
    self.view(endpoint, params, Arc::new(C::normalize))
  }

  /// Resolve `endpoint` once, without keeping a subscription.
  pub async fn load<C: Contract>(
    &self,
    endpoint: &Endpoint,
    params: BTreeMap<String, String>,
  ) -> Result<CacheResult<C::Output>, FetchError> {
    let key = endpoint.cache_key(&params);
    let fetcher = self.fetcher(endpoint, params, Arc::new(C::normalize));
    self.cache.get(&key, endpoint.options(), move || fetcher()).await
  }

  // ==========================================================================
  // Typed views
  // ==========================================================================

  /// One of the three opportunity lists (top pains, emerging, declining)
  /// for the current filters.
  pub fn opportunities(&self, endpoint: Endpoint, state: &ViewState) -> RemoteView<OpportunityPage> {
    let params = endpoint.params(state);
    self.remote_view::<opportunity::OpportunityList>(&endpoint, params)
  }

  pub fn verticals(&self) -> RemoteView<Vec<Vertical>> {
    self.remote_view::<vertical::VerticalList>(&Endpoint::Verticals, BTreeMap::new())
  }

  /// Deep dive for one cluster. The requested id labels the placeholder
  /// when the service has nothing for it.
  pub fn cluster_detail(&self, id: &str) -> RemoteView<ClusterDetail> {
    let requested = id.to_string();
    self.view(
      &Endpoint::ClusterDetail(id.to_string()),
      BTreeMap::new(),
      Arc::new(move |raw: &Value| ClusterDetail::from_raw(&requested, raw)),
    )
  }

  pub fn overview(&self) -> RemoteView<Overview> {
    self.remote_view::<overview::OverviewContract>(&Endpoint::Overview, BTreeMap::new())
  }

  pub fn trending(&self, state: &ViewState) -> RemoteView<Vec<TrendItem>> {
    self.remote_view::<trends::TrendList>(&Endpoint::Trending, Endpoint::Trending.params(state))
  }

  pub fn ops_queues(&self) -> RemoteView<Vec<OpsQueue>> {
    self.remote_view::<ops::QueueList>(&Endpoint::OpsQueues, BTreeMap::new())
  }

  pub fn ops_runs(&self) -> RemoteView<Vec<OpsRun>> {
    self.remote_view::<ops::RunList>(&Endpoint::OpsRuns, BTreeMap::new())
  }

  /// Mark every cached parameterization of `endpoint` stale.
  pub fn invalidate(&self, endpoint: &Endpoint) -> usize {
    self.cache.invalidate(InvalidateTarget::endpoint(endpoint.prefix()))
  }

  fn view<T>(&self, endpoint: &Endpoint, params: BTreeMap<String, String>, normalize: Normalizer<T>) -> RemoteView<T>
  where
    T: Serialize + Send + Sync + 'static,
  {
    let key = endpoint.cache_key(&params);
    let fetcher = self.fetcher(endpoint, params, normalize);
    RemoteView::new(self.cache.clone(), key, endpoint.options(), move || fetcher())
  }

  /// remote -> normalize, as a re-callable fetcher for the cache.
  fn fetcher<T>(
    &self,
    endpoint: &Endpoint,
    params: BTreeMap<String, String>,
    normalize: Normalizer<T>,
  ) -> Arc<dyn Fn() -> BoxFuture<'static, Result<T, FetchError>> + Send + Sync>
  where
    T: Send + 'static,
  {
    let remote = Arc::clone(&self.remote);
    let path = endpoint.path();
    Arc::new(move || {
      let request = remote.get_json(&path, &params);
      let normalize = Arc::clone(&normalize);
      async move {
        let raw = request.await?;
        Ok(normalize(&raw)?)
      }
      .boxed()
    })
  }
}
