//! Strategy router: classifies each request by path and applies the
//! matching cache/network policy.
//!
//! Classification is an ordered list of predicate/strategy rules; the
//! static set is checked before the API prefixes, so a path declared in
//! both is served cache-first. Anything unmatched gets the default
//! network-only strategy.

use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::cache::{CacheEntry, Fingerprint, RegionStore};
use crate::lifecycle::{ActiveCell, ActiveVersion};
use crate::net::{NetworkClient, Request, Response};
use crate::queue::{QueueStore, WriteQueue};

/// The cache/network ordering policy applied to a request class.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
  /// Static assets: cache hit wins, network fills misses
  CacheFirst,
  /// API data: network wins, cache is the stale fallback
  NetworkFirst,
  /// Everything else: network, with a best-effort cache fallback
  NetworkOnly,
}

/// A classification predicate over the request path.
#[derive(Debug, Clone)]
enum Matcher {
  /// Exact membership in a declared path set
  PathSet(Vec<String>),
  /// Prefix match against declared API namespaces
  Prefix(Vec<String>),
}

impl Matcher {
  fn matches(&self, path: &str) -> bool {
    match self {
      Self::PathSet(paths) => paths.iter().any(|p| p == path),
      Self::Prefix(prefixes) => prefixes.iter().any(|p| path.starts_with(p.as_str())),
    }
  }
}

/// Ordered predicate/strategy pairs, evaluated in fixed priority order.
#[derive(Debug, Clone)]
pub struct Classifier {
  rules: Vec<(Matcher, Strategy)>,
}

impl Classifier {
  pub fn new(static_paths: Vec<String>, api_prefixes: Vec<String>) -> Self {
    // Static before dynamic: the tie-break is part of the contract
    Self {
      rules: vec![
        (Matcher::PathSet(static_paths), Strategy::CacheFirst),
        (Matcher::Prefix(api_prefixes), Strategy::NetworkFirst),
      ],
    }
  }

  pub fn classify(&self, path: &str) -> Strategy {
    self
      .rules
      .iter()
      .find(|(matcher, _)| matcher.matches(path))
      .map(|(_, strategy)| *strategy)
      .unwrap_or(Strategy::NetworkOnly)
  }
}

/// Where a routed response came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseSource {
  /// Fresh from the remote API
  Network,
  /// Served from a cache region; offline staleness is unbounded by design
  Cache,
  /// Synthesized because neither network nor cache had anything usable
  OfflineFallback,
  /// Mutating request accepted into the write queue; carries the queue id
  Queued(i64),
}

/// A routed response plus where it came from.
#[derive(Debug, Clone)]
pub struct RouteResult {
  pub response: Response,
  pub source: ResponseSource,
  /// When the served snapshot was stored, for cache-served responses
  pub cached_at: Option<DateTime<Utc>>,
}

impl RouteResult {
  fn from_network(response: Response) -> Self {
    Self {
      response,
      source: ResponseSource::Network,
      cached_at: None,
    }
  }

  fn from_cache(entry: CacheEntry) -> Self {
    Self {
      response: entry.response,
      source: ResponseSource::Cache,
      cached_at: Some(entry.stored_at),
    }
  }

  fn offline(response: Response, cached_at: Option<DateTime<Utc>>) -> Self {
    Self {
      response,
      source: ResponseSource::OfflineFallback,
      cached_at,
    }
  }

  fn queued(id: i64) -> Self {
    Self {
      response: Response::queued(id),
      source: ResponseSource::Queued(id),
      cached_at: None,
    }
  }
}

/// Routes logical requests through cache and network according to the
/// configured strategy rules.
pub struct StrategyRouter<S, N>
where
  S: RegionStore + QueueStore,
  N: NetworkClient,
{
  store: Arc<S>,
  network: Arc<N>,
  queue: Arc<WriteQueue<S>>,
  classifier: Classifier,
  active: ActiveCell,
  offline_landing: String,
}

impl<S, N> StrategyRouter<S, N>
where
  S: RegionStore + QueueStore,
  N: NetworkClient,
{
  pub fn new(
    store: Arc<S>,
    network: Arc<N>,
    queue: Arc<WriteQueue<S>>,
    classifier: Classifier,
    active: ActiveCell,
    offline_landing: impl Into<String>,
  ) -> Self {
    Self {
      store,
      network,
      queue,
      classifier,
      active,
      offline_landing: offline_landing.into(),
    }
  }

  /// Route a request. Reads always terminate in a real, cached, or
  /// synthetic response (except the default class, which propagates
  /// network failure when no cache entry exists anywhere); writes either
  /// reach the remote or come back as a queue confirmation.
  pub async fn route(&self, request: &Request) -> Result<RouteResult> {
    let active = self
      .active
      .get()
      .ok_or_else(|| eyre!("No active cache version; install and activate first"))?;

    if request.method.is_mutating() {
      return self.route_write(request).await;
    }

    match self.classifier.classify(&request.path()) {
      Strategy::CacheFirst => self.cache_first(&active, request).await,
      Strategy::NetworkFirst => self.network_first(&active, request).await,
      Strategy::NetworkOnly => self.network_only(&active, request).await,
    }
  }

  /// Cache-First: static region hit short-circuits the network entirely.
  async fn cache_first(&self, active: &ActiveVersion, request: &Request) -> Result<RouteResult> {
    let key = Fingerprint::of(request);

    if let Some(entry) = self.store.get(&active.static_region, &key)? {
      return Ok(RouteResult::from_cache(entry));
    }

    match self.network.send(request).await {
      Ok(response) if response.is_success() => {
        self.store.put(&active.static_region, request, &response)?;
        Ok(RouteResult::from_network(response))
      }
      // The server answered with a failure status: hand it back uncached
      Ok(response) => Ok(RouteResult::from_network(response)),
      Err(err) => {
        debug!(url = %request.url, "static fetch failed offline: {err}");
        self.offline_static_fallback(active, request)
      }
    }
  }

  /// Total static failure: documents fall back to the offline landing
  /// entry; anything else gets the synthetic placeholder.
  fn offline_static_fallback(
    &self,
    active: &ActiveVersion,
    request: &Request,
  ) -> Result<RouteResult> {
    if request.expects_document() {
      let landing_key = Fingerprint::of(&Request::get(&self.offline_landing));
      if let Some(entry) = self.store.get(&active.static_region, &landing_key)? {
        warn!(url = %request.url, "serving offline landing page");
        return Ok(RouteResult::offline(entry.response, Some(entry.stored_at)));
      }
    }
    Ok(RouteResult::offline(Response::offline_placeholder(), None))
  }

  /// Network-First: a fresh success always overwrites the snapshot; any
  /// failure falls back to whatever snapshot exists, however stale.
  async fn network_first(&self, active: &ActiveVersion, request: &Request) -> Result<RouteResult> {
    let key = Fingerprint::of(request);

    let failure_response = match self.network.send(request).await {
      Ok(response) if response.is_success() => {
        self.store.put(&active.dynamic_region, request, &response)?;
        return Ok(RouteResult::from_network(response));
      }
      Ok(response) => Some(response),
      Err(err) => {
        debug!(url = %request.url, "api fetch failed offline: {err}");
        None
      }
    };

    if let Some(entry) = self.store.get(&active.dynamic_region, &key)? {
      warn!(url = %request.url, stored_at = %entry.stored_at, "serving stale api snapshot");
      return Ok(RouteResult::from_cache(entry));
    }

    match failure_response {
      // The server's own failure answer beats a fabricated one
      Some(response) => Ok(RouteResult::from_network(response)),
      None => Ok(RouteResult::offline(Response::offline_placeholder(), None)),
    }
  }

  /// Default: network, then a best-effort lookup across both regions, then
  /// the original failure.
  async fn network_only(&self, active: &ActiveVersion, request: &Request) -> Result<RouteResult> {
    match self.network.send(request).await {
      Ok(response) => Ok(RouteResult::from_network(response)),
      Err(err) => {
        let key = Fingerprint::of(request);
        for region in [&active.static_region, &active.dynamic_region] {
          if let Some(entry) = self.store.get(region, &key)? {
            return Ok(RouteResult::from_cache(entry));
          }
        }
        Err(err.wrap_err(format!("Request to {} failed with no cached fallback", request.url)))
      }
    }
  }

  /// Mutating requests never touch the cache. A transport failure turns
  /// into a queued write plus a confirmation response; a server answer of
  /// any status goes straight back to the caller.
  async fn route_write(&self, request: &Request) -> Result<RouteResult> {
    match self.network.send(request).await {
      Ok(response) => Ok(RouteResult::from_network(response)),
      Err(err) => {
        debug!(url = %request.url, "write failed offline, queueing: {err}");
        let id = self.queue.enqueue(request)?;
        Ok(RouteResult::queued(id))
      }
    }
  }
}
