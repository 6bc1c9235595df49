//! Remote analytics service: the transport seam and the endpoint catalogue.

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use color_eyre::{eyre::eyre, Result};
use futures::future::BoxFuture;
use futures::FutureExt;
use serde_json::Value;
use tracing::debug;
use url::Url;

use crate::cache::{CacheKey, CacheOptions};
use crate::config::ApiConfig;
use crate::error::FetchError;
use crate::locator::ViewState;
use crate::normalize::SchemaKind;

/// Something that can answer `GET path?query` with a JSON document.
///
/// The returned future is `'static` so the cache can drive it from a
/// spawned task after the caller has gone away.
pub trait RemoteSource: Send + Sync {
  fn get_json(&self, path: &str, query: &BTreeMap<String, String>) -> BoxFuture<'static, Result<Value, FetchError>>;
}

/// [`RemoteSource`] over HTTP.
#[derive(Clone)]
pub struct HttpRemote {
  client: reqwest::Client,
  base: Url,
}

impl HttpRemote {
  pub fn new(config: &ApiConfig) -> Result<Self> {
    let mut base =
      Url::parse(config.base_url.trim()).map_err(|e| eyre!("Invalid API base URL {}: {}", config.base_url, e))?;
    // Url::join would drop the last segment of a base path without this
    if !base.path().ends_with('/') {
      let path = format!("{}/", base.path());
      base.set_path(&path);
    }

    let client = reqwest::Client::builder()
      .timeout(config.timeout())
      .build()
      .map_err(|e| eyre!("Failed to create HTTP client: {}", e))?;

    Ok(Self { client, base })
  }

  fn url(&self, path: &str, query: &BTreeMap<String, String>) -> Result<Url, FetchError> {
    let mut url = self
      .base
      .join(path.trim_start_matches('/'))
      .map_err(|e| FetchError::transport(path, format!("invalid endpoint path: {e}")))?;
    if !query.is_empty() {
      url.query_pairs_mut().extend_pairs(query.iter());
    }
    Ok(url)
  }
}

impl RemoteSource for HttpRemote {
  fn get_json(&self, path: &str, query: &BTreeMap<String, String>) -> BoxFuture<'static, Result<Value, FetchError>> {
    let client = self.client.clone();
    let endpoint = path.to_string();
    let url = self.url(path, query);

    async move {
      let url = url?;
      debug!(%url, "GET");
      let response = client
        .get(url)
        .header(reqwest::header::ACCEPT, "application/json")
        .send()
        .await
        .map_err(|e| FetchError::Transport {
          endpoint: endpoint.clone(),
          message: e.to_string(),
          status: e.status().map(|s| s.as_u16()),
        })?;

      let status = response.status();
      if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        let message = match body.trim() {
          "" => status.to_string(),
          text => format!("{status}: {}", text.chars().take(200).collect::<String>()),
        };
        return Err(FetchError::Transport {
          endpoint,
          message,
          status: Some(status.as_u16()),
        });
      }

      response
        .json::<Value>()
        .await
        .map_err(|e| FetchError::transport(endpoint, format!("response body is not JSON: {e}")))
    }
    .boxed()
  }
}

// ============================================================================
// Endpoint catalogue
// ============================================================================

/// Opportunity lists are fetched as one wide window and ranked locally, so
/// sorting and paging never cost a round trip.
pub const FETCH_WINDOW: u32 = 200;

const TRENDING_LIMIT: u32 = 20;
const SPARKLINE_DAYS: u32 = 30;

/// Every endpoint the dashboard reads.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Endpoint {
  TopPains,
  EmergingOpportunities,
  DecliningRisks,
  ClusterDetail(String),
  Verticals,
  Trending,
  OpsQueues,
  OpsRuns,
  Overview,
}

impl Endpoint {
  /// Request path, as the service routes it.
  pub fn path(&self) -> String {
    match self {
      Endpoint::TopPains => "/insights/top_pains".to_string(),
      Endpoint::EmergingOpportunities => "/insights/emerging_opportunities".to_string(),
      Endpoint::DecliningRisks => "/insights/declining_risks".to_string(),
      Endpoint::ClusterDetail(id) => {
        // form encoding writes spaces as '+', which a path would keep literally
        let encoded: String = url::form_urlencoded::byte_serialize(id.as_bytes()).collect();
        format!("/insights/{}", encoded.replace('+', "%20"))
      }
      Endpoint::Verticals => "/verticals/".to_string(),
      Endpoint::Trending => "/trending".to_string(),
      Endpoint::OpsQueues => "/ops/queues".to_string(),
      Endpoint::OpsRuns => "/ops/runs".to_string(),
      Endpoint::Overview => "/overview".to_string(),
    }
  }

  pub fn schema(&self) -> SchemaKind {
    match self {
      Endpoint::TopPains | Endpoint::EmergingOpportunities | Endpoint::DecliningRisks => SchemaKind::Opportunities,
      Endpoint::ClusterDetail(_) => SchemaKind::ClusterDetail,
      Endpoint::Verticals => SchemaKind::Verticals,
      Endpoint::Trending => SchemaKind::Trends,
      Endpoint::OpsQueues => SchemaKind::OpsQueues,
      Endpoint::OpsRuns => SchemaKind::OpsRuns,
      Endpoint::Overview => SchemaKind::Overview,
    }
  }

  pub fn options(&self) -> CacheOptions {
    match self {
      Endpoint::Verticals => CacheOptions::new(Duration::from_secs(60)),
      Endpoint::OpsQueues => CacheOptions::new(Duration::from_secs(10)).with_refetch_interval(Duration::from_secs(15)),
      Endpoint::OpsRuns => CacheOptions::new(Duration::from_secs(10)).with_refetch_interval(Duration::from_secs(30)),
      _ => CacheOptions::new(Duration::from_secs(30)),
    }
  }

  /// Server-side query parameters for the current view.
  ///
  /// Only filters the service applies itself are sent. Free text, sort and
  /// paging are applied locally by the view-model builders.
  pub fn params(&self, state: &ViewState) -> BTreeMap<String, String> {
    let mut params = BTreeMap::new();
    let mut set = |name: &str, value: String| {
      params.insert(name.to_string(), value);
    };
    match self {
      Endpoint::TopPains => {
        if let Some(vertical) = &state.vertical {
          set("vertical_id", vertical.clone());
        }
        if let Some(tier) = &state.tier {
          set("tier", tier.clone());
        }
        if state.emerging_only {
          set("emerging_only", "true".to_string());
        }
        set("limit", FETCH_WINDOW.to_string());
        set("offset", "0".to_string());
      }
      Endpoint::EmergingOpportunities | Endpoint::DecliningRisks => {
        if let Some(vertical) = &state.vertical {
          set("vertical_id", vertical.clone());
        }
        set("limit", FETCH_WINDOW.to_string());
        set("offset", "0".to_string());
      }
      Endpoint::Trending => {
        if let Some(vertical) = &state.vertical {
          set("vertical_id", vertical.clone());
        }
        set("limit", TRENDING_LIMIT.to_string());
        set("offset", "0".to_string());
        set("sparkline_days", SPARKLINE_DAYS.to_string());
      }
      _ => {}
    }
    params
  }

  pub fn cache_key(&self, params: &BTreeMap<String, String>) -> CacheKey {
    CacheKey::from_params(self.path(), params.iter().map(|(k, v)| (k.as_str(), v.as_str())))
  }

  /// Cache-key prefix covering every parameterization of this endpoint.
  pub fn prefix(&self) -> String {
    self.path()
  }
}

impl fmt::Display for Endpoint {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.path())
  }
}

#[cfg(test)]
pub(crate) mod testing {
  use super::*;
  use std::sync::atomic::{AtomicUsize, Ordering};
  use std::sync::{Arc, Mutex};

  type Responder = Box<dyn Fn(&str, &BTreeMap<String, String>) -> Result<Value, FetchError> + Send + Sync>;

  /// In-process remote that answers from a closure and counts its calls.
  pub struct FakeRemote {
    responder: Responder,
    calls: AtomicUsize,
    paths: Mutex<Vec<String>>,
    delay: Duration,
  }

  impl FakeRemote {
    pub fn new(
      responder: impl Fn(&str, &BTreeMap<String, String>) -> Result<Value, FetchError> + Send + Sync + 'static,
    ) -> Arc<Self> {
      Arc::new(Self {
        responder: Box::new(responder),
        calls: AtomicUsize::new(0),
        paths: Mutex::new(Vec::new()),
        delay: Duration::from_millis(10),
      })
    }

    pub fn calls(&self) -> usize {
      self.calls.load(Ordering::SeqCst)
    }

    pub fn paths(&self) -> Vec<String> {
      self.paths.lock().unwrap().clone()
    }
  }

  impl RemoteSource for FakeRemote {
    fn get_json(&self, path: &str, query: &BTreeMap<String, String>) -> BoxFuture<'static, Result<Value, FetchError>> {
      self.calls.fetch_add(1, Ordering::SeqCst);
      self.paths.lock().unwrap().push(path.to_string());
      let result = (self.responder)(path, query);
      let delay = self.delay;
      async move {
        tokio::time::sleep(delay).await;
        result
      }
      .boxed()
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_url_joins_base_path() {
    let remote = HttpRemote::new(&ApiConfig {
      base_url: "https://sense.example.com/api".to_string(),
      timeout_secs: 5,
    })
    .unwrap();
    let query = BTreeMap::from([("limit".to_string(), "200".to_string())]);
    let url = remote.url("/insights/top_pains", &query).unwrap();
    assert_eq!(url.as_str(), "https://sense.example.com/api/insights/top_pains?limit=200");
  }

  #[test]
  fn test_invalid_base_url() {
    let config = ApiConfig {
      base_url: "not a url".to_string(),
      timeout_secs: 5,
    };
    assert!(HttpRemote::new(&config).is_err());
  }

  #[test]
  fn test_list_params_ignore_local_concerns() {
    let state = ViewState {
      free_text: "invoice".into(),
      tier: Some("PRIME".into()),
      offset: 50,
      ..ViewState::default()
    };
    let params = Endpoint::TopPains.params(&state);
    assert_eq!(params.get("tier").map(String::as_str), Some("PRIME"));
    assert_eq!(params.get("offset").map(String::as_str), Some("0"));
    assert!(!params.contains_key("q"));

    let moved = ViewState { offset: 75, ..state.clone() };
    assert_eq!(
      Endpoint::TopPains.cache_key(&params),
      Endpoint::TopPains.cache_key(&Endpoint::TopPains.params(&moved))
    );
  }

  #[test]
  fn test_timings() {
    assert_eq!(Endpoint::Verticals.options().stale_time, Duration::from_secs(60));
    assert_eq!(Endpoint::OpsQueues.options().refetch_interval, Some(Duration::from_secs(15)));
    assert_eq!(Endpoint::OpsRuns.options().refetch_interval, Some(Duration::from_secs(30)));
    assert!(Endpoint::TopPains.options().refetch_interval.is_none());
  }

  #[test]
  fn test_cluster_id_is_escaped() {
    assert_eq!(Endpoint::ClusterDetail("a/b c".into()).path(), "/insights/a%2Fb%20c");
    assert_eq!(Endpoint::ClusterDetail("c-1".into()).schema(), SchemaKind::ClusterDetail);
  }
}
