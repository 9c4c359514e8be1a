//! The engine context: one object owning the store, the network client,
//! and every component of the offline layer, with an explicit init
//! lifecycle instead of ambient globals.

use chrono::{DateTime, Utc};
use color_eyre::Result;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::cache::RegionStore;
use crate::config::Config;
use crate::event::EngineEvent;
use crate::lifecycle::{ActiveCell, ActiveVersion, LifecycleController};
use crate::net::{NetworkClient, Request};
use crate::notify::{ActionOutcome, NotificationScheduler};
use crate::queue::{DrainReport, QueueStore, WriteQueue};
use crate::router::{Classifier, RouteResult, StrategyRouter};

/// Offline cache & sync engine.
///
/// The application layer calls `route` for every logical request; the
/// background loop calls `drain`/`refresh_dynamic` on connectivity and
/// timer triggers. Nothing is served until a cache version has been
/// installed and activated.
pub struct SyncEngine<S, N>
where
  S: RegionStore + QueueStore + 'static,
  N: NetworkClient + 'static,
{
  store: Arc<S>,
  network: Arc<N>,
  router: StrategyRouter<S, N>,
  queue: Arc<WriteQueue<S>>,
  scheduler: NotificationScheduler,
  lifecycle: LifecycleController<S>,
  active: ActiveCell,
  version: String,
  static_paths: Vec<String>,
  refresh_prefixes: Vec<String>,
}

impl<S, N> SyncEngine<S, N>
where
  S: RegionStore + QueueStore + 'static,
  N: NetworkClient + 'static,
{
  pub fn new(
    config: &Config,
    store: Arc<S>,
    network: Arc<N>,
    events: mpsc::UnboundedSender<EngineEvent>,
  ) -> Self {
    let active = ActiveCell::new();
    let queue = Arc::new(WriteQueue::new(store.clone()));

    let classifier = Classifier::new(config.static_paths.clone(), config.api_prefixes.clone());
    let router = StrategyRouter::new(
      store.clone(),
      network.clone(),
      queue.clone(),
      classifier,
      active.clone(),
      config.offline_landing.clone(),
    );

    let scheduler = NotificationScheduler::new(
      events,
      Duration::from_secs(config.reminders.defer_minutes * 60),
      config.reminders.open_path.clone(),
    );

    let lifecycle = LifecycleController::new(store.clone(), active.clone());

    Self {
      store,
      network,
      router,
      queue,
      scheduler,
      lifecycle,
      active,
      version: config.version.clone(),
      static_paths: config.static_paths.clone(),
      refresh_prefixes: config.refresh_prefixes.clone(),
    }
  }

  /// Install the configured version and activate it. On install failure
  /// the previously active version (if any) keeps serving.
  pub async fn install_and_activate(&self) -> Result<ActiveVersion> {
    let installed = self
      .lifecycle
      .install(&self.version, &self.static_paths, self.network.as_ref())
      .await?;
    self.lifecycle.activate(installed)
  }

  /// Route a logical request through the strategy layer.
  pub async fn route(&self, request: &Request) -> Result<RouteResult> {
    self.router.route(request).await
  }

  /// Replay queued writes against the network.
  pub async fn drain(&self) -> Result<DrainReport> {
    self.queue.drain(self.network.as_ref()).await
  }

  /// Number of writes waiting for replay.
  pub fn pending_writes(&self) -> Result<usize> {
    self.queue.pending()
  }

  /// Re-fetch cached dynamic snapshots under the configured refresh
  /// prefixes, overwriting each on success. Stale snapshots stay in place
  /// when their fetch fails. Returns how many were refreshed.
  pub async fn refresh_dynamic(&self) -> Result<usize> {
    let Some(active) = self.active.get() else {
      return Ok(0);
    };

    let mut refreshed = 0;
    for entry in self.store.entries(&active.dynamic_region)? {
      let request = Request::get(&entry.url);
      if !entry.method.is_mutating()
        && self
          .refresh_prefixes
          .iter()
          .any(|p| request.path().starts_with(p.as_str()))
      {
        match self.network.send(&request).await {
          Ok(response) if response.is_success() => {
            self.store.put(&active.dynamic_region, &request, &response)?;
            refreshed += 1;
          }
          Ok(response) => {
            debug!(url = %entry.url, status = response.status, "refresh rejected, keeping snapshot");
          }
          Err(err) => {
            debug!(url = %entry.url, "refresh failed, keeping snapshot: {err}");
          }
        }
      }
    }

    if refreshed > 0 {
      info!(refreshed, "dynamic cache refreshed");
    }
    Ok(refreshed)
  }

  /// Schedule a study reminder with the default payload and actions.
  pub fn schedule_reminder(&self, fire_at: DateTime<Utc>) -> u64 {
    self.scheduler.schedule_reminder(fire_at)
  }

  /// Cancel a pending reminder.
  pub fn cancel_reminder(&self, id: u64) -> bool {
    self.scheduler.cancel(id)
  }

  /// Resolve the user's response to a fired reminder ("study" opens the
  /// session path, "later" schedules a fresh reminder).
  pub fn handle_notification_action(&self, action: &str) -> ActionOutcome {
    self.scheduler.handle_action(action)
  }

  /// Identifier of the currently serving version, if any.
  pub fn active_version(&self) -> Option<String> {
    self.active.get().map(|v| v.version)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::{Fingerprint, SqliteStore};
  use crate::net::client::mock::MockNetwork;
  use crate::net::Response;
  use crate::router::ResponseSource;

  fn config() -> Config {
    serde_yaml::from_str(
      r#"
version: "1.0.0"
remote:
  url: https://api.medstudy.example
static_paths:
  - /
  - /manifest.json
"#,
    )
    .unwrap()
  }

  fn fixture() -> (
    SyncEngine<SqliteStore, MockNetwork>,
    Arc<MockNetwork>,
    Arc<SqliteStore>,
  ) {
    let (tx, _rx) = mpsc::unbounded_channel();
    let store = Arc::new(SqliteStore::open_in_memory().unwrap());
    let network = Arc::new(MockNetwork::new());
    network.respond("/", Response::new(200, "<html>shell</html>"));
    network.respond("/manifest.json", Response::new(200, "{}"));

    let engine = SyncEngine::new(&config(), store.clone(), network.clone(), tx);
    (engine, network, store)
  }

  #[tokio::test]
  async fn test_install_activate_then_serve_static_offline() {
    let (engine, network, _store) = fixture();
    engine.install_and_activate().await.unwrap();
    assert_eq!(engine.active_version().as_deref(), Some("1.0.0"));

    // Connectivity gone: the pre-populated shell still serves
    network.set_offline(true);
    let result = engine.route(&Request::get("/manifest.json")).await.unwrap();
    assert_eq!(result.source, ResponseSource::Cache);
  }

  #[tokio::test]
  async fn test_offline_write_then_drain_replays_exactly_once() {
    let (engine, network, _store) = fixture();
    engine.install_and_activate().await.unwrap();

    network.set_offline(true);
    let result = engine
      .route(&Request::post("/api/questions/answer", r#"{"id":7}"#))
      .await
      .unwrap();
    let id = match result.source {
      ResponseSource::Queued(id) => id,
      other => panic!("expected queued write, got {:?}", other),
    };
    assert_eq!(engine.pending_writes().unwrap(), 1);

    // Connectivity returns; the drain delivers the submission once
    network.set_offline(false);
    network.respond("/api/questions/answer", Response::new(200, "recorded"));
    let report = engine.drain().await.unwrap();
    assert_eq!(report.succeeded, vec![id]);
    assert_eq!(engine.pending_writes().unwrap(), 0);

    // One failed attempt while offline plus exactly one replay
    assert_eq!(network.calls_to("/api/questions/answer"), 2);

    // A second drain has nothing left to send
    engine.drain().await.unwrap();
    assert_eq!(network.calls_to("/api/questions/answer"), 2);
  }

  #[tokio::test]
  async fn test_failed_reinstall_keeps_serving_old_version() {
    let (engine, network, store) = fixture();
    engine.install_and_activate().await.unwrap();

    // A redeploy whose shell fetch breaks must not take over the shared store
    let (tx, _rx) = mpsc::unbounded_channel();
    let mut next_config = config();
    next_config.version = "2.0.0".to_string();
    let next_engine = SyncEngine::new(&next_config, store, network.clone(), tx);
    network.fail("/manifest.json");

    assert!(next_engine.install_and_activate().await.is_err());
    assert_eq!(engine.active_version().as_deref(), Some("1.0.0"));

    // The old version's regions were never collected; it serves offline
    network.set_offline(true);
    let result = engine.route(&Request::get("/manifest.json")).await.unwrap();
    assert_eq!(result.source, ResponseSource::Cache);
  }

  #[tokio::test]
  async fn test_refresh_dynamic_honors_prefixes() {
    let (engine, network, store) = fixture();
    engine.install_and_activate().await.unwrap();

    network.respond("/api/progress/stats", Response::new(200, "day1"));
    network.respond("/api/flashcards/due", Response::new(200, "cards"));
    engine.route(&Request::get("/api/progress/stats")).await.unwrap();
    engine.route(&Request::get("/api/flashcards/due")).await.unwrap();

    network.respond("/api/progress/stats", Response::new(200, "day2"));
    network.respond("/api/flashcards/due", Response::new(200, "more-cards"));

    let refreshed = engine.refresh_dynamic().await.unwrap();
    assert_eq!(refreshed, 1);

    let dynamic = store.open("dynamic-1.0.0").unwrap();
    let stats = store
      .get(&dynamic, &Fingerprint::of(&Request::get("/api/progress/stats")))
      .unwrap()
      .unwrap();
    let cards = store
      .get(&dynamic, &Fingerprint::of(&Request::get("/api/flashcards/due")))
      .unwrap()
      .unwrap();
    assert_eq!(stats.response.body, b"day2".to_vec());
    assert_eq!(cards.response.body, b"cards".to_vec());
  }
}
