//! Cache version lifecycle: install, activate, supersede.
//!
//! A version moves `Installing -> Waiting -> Active`; the previously
//! active version becomes `Superseded` the moment a newer one activates.
//! Installation pre-populates the version's static region and is
//! all-or-nothing: one failed resource fails the whole install and the
//! prior active version keeps serving. Entries staged into a region that
//! never activates are swept by the next successful activation barrier.

use color_eyre::{eyre::eyre, Result};
use futures::future::try_join_all;
use std::sync::{Arc, RwLock};
use tracing::info;

use crate::cache::{RegionHandle, RegionKind, RegionStore};
use crate::net::{NetworkClient, Request};

/// Lifecycle states of a cache version.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VersionState {
  Installing,
  Waiting,
  Active,
  Superseded,
}

/// Region name for one of a version's partitions.
pub fn region_name(kind: RegionKind, version: &str) -> String {
  match kind {
    RegionKind::Static => format!("static-{}", version),
    RegionKind::Dynamic => format!("dynamic-{}", version),
  }
}

/// A version whose static region is fully populated, waiting to activate.
#[derive(Debug, Clone)]
pub struct InstalledVersion {
  pub version: String,
  pub static_region: RegionHandle,
  pub dynamic_region: RegionHandle,
}

/// The version currently serving requests.
#[derive(Debug, Clone)]
pub struct ActiveVersion {
  pub version: String,
  pub static_region: RegionHandle,
  pub dynamic_region: RegionHandle,
}

/// Shared cell holding the active version. The router reads it on every
/// request; the lifecycle controller swaps it at the activation barrier.
#[derive(Clone, Default)]
pub struct ActiveCell(Arc<RwLock<Option<ActiveVersion>>>);

impl ActiveCell {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn get(&self) -> Option<ActiveVersion> {
    self.0.read().unwrap_or_else(|e| e.into_inner()).clone()
  }

  pub(crate) fn swap(&self, next: ActiveVersion) -> Option<ActiveVersion> {
    let mut guard = self.0.write().unwrap_or_else(|e| e.into_inner());
    guard.replace(next)
  }
}

/// Drives versions through the lifecycle state machine.
pub struct LifecycleController<S: RegionStore> {
  store: Arc<S>,
  active: ActiveCell,
}

impl<S: RegionStore> LifecycleController<S> {
  pub fn new(store: Arc<S>, active: ActiveCell) -> Self {
    Self { store, active }
  }

  /// Install a version: fetch every static resource and stage it into the
  /// version's static region. Fails as a whole if any resource cannot be
  /// fetched with a success-class status; nothing activates in that case.
  pub async fn install<N>(
    &self,
    version: &str,
    static_paths: &[String],
    network: &N,
  ) -> Result<InstalledVersion>
  where
    N: NetworkClient + ?Sized,
  {
    info!(version, state = ?VersionState::Installing, "installing cache version");

    let static_region = self.store.open(&region_name(RegionKind::Static, version))?;
    let dynamic_region = self.store.open(&region_name(RegionKind::Dynamic, version))?;

    // Fetch the whole static set before writing anything
    let fetches = static_paths.iter().map(|path| {
      let request = Request::get(path);
      async move {
        let response = network
          .send(&request)
          .await
          .map_err(|e| eyre!("Install of {} failed fetching {}: {}", version, path, e))?;
        if !response.is_success() {
          return Err(eyre!(
            "Install of {} failed: {} returned status {}",
            version,
            path,
            response.status
          ));
        }
        Ok((request, response))
      }
    });
    let fetched = try_join_all(fetches).await?;

    for (request, response) in &fetched {
      self.store.put(&static_region, request, response)?;
    }

    info!(
      version,
      resources = fetched.len(),
      state = ?VersionState::Waiting,
      "cache version installed"
    );
    Ok(InstalledVersion {
      version: version.to_string(),
      static_region,
      dynamic_region,
    })
  }

  /// Activation barrier: garbage-collect every region outside the new
  /// version's keep-set, then swap it in as the serving version. The
  /// previous version is superseded the instant the swap happens.
  pub fn activate(&self, installed: InstalledVersion) -> Result<ActiveVersion> {
    let keep = [
      installed.static_region.clone(),
      installed.dynamic_region.clone(),
    ];
    self.store.delete_regions_except(&keep)?;

    let next = ActiveVersion {
      version: installed.version,
      static_region: installed.static_region,
      dynamic_region: installed.dynamic_region,
    };

    if let Some(previous) = self.active.swap(next.clone()) {
      info!(
        superseded = %previous.version,
        active = %next.version,
        state = ?VersionState::Active,
        "cache version activated"
      );
    } else {
      info!(active = %next.version, state = ?VersionState::Active, "cache version activated");
    }

    Ok(next)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::{Fingerprint, SqliteStore};
  use crate::net::client::mock::MockNetwork;
  use crate::net::Response;

  fn fixture() -> (Arc<SqliteStore>, ActiveCell, MockNetwork) {
    let store = Arc::new(SqliteStore::open_in_memory().unwrap());
    let network = MockNetwork::new();
    network.respond("/", Response::new(200, "<html>shell</html>"));
    network.respond("/static/js/bundle.js", Response::new(200, "js"));
    network.respond("/manifest.json", Response::new(200, "{}"));
    (store, ActiveCell::new(), network)
  }

  fn static_set() -> Vec<String> {
    vec![
      "/".to_string(),
      "/static/js/bundle.js".to_string(),
      "/manifest.json".to_string(),
    ]
  }

  #[tokio::test]
  async fn test_install_populates_static_region() {
    let (store, active, network) = fixture();
    let controller = LifecycleController::new(store.clone(), active);

    let installed = controller.install("v1", &static_set(), &network).await.unwrap();

    for path in static_set() {
      let key = Fingerprint::of(&Request::get(&path));
      assert!(
        store.get(&installed.static_region, &key).unwrap().is_some(),
        "missing pre-populated entry for {}",
        path
      );
    }
  }

  #[tokio::test]
  async fn test_failed_install_keeps_prior_version_active() {
    let (store, active, network) = fixture();
    let controller = LifecycleController::new(store.clone(), active.clone());

    let v1 = controller.install("v1", &static_set(), &network).await.unwrap();
    controller.activate(v1).unwrap();

    // v2's bundle cannot be fetched
    network.fail("/static/js/bundle.js");
    let result = controller.install("v2", &static_set(), &network).await;

    assert!(result.is_err());
    assert_eq!(active.get().unwrap().version, "v1");
  }

  #[tokio::test]
  async fn test_activation_supersedes_and_collects_old_regions() {
    let (store, active, network) = fixture();
    let controller = LifecycleController::new(store.clone(), active.clone());

    let v1 = controller.install("v1", &static_set(), &network).await.unwrap();
    let v1_static = v1.static_region.clone();
    controller.activate(v1).unwrap();

    let v2 = controller.install("v2", &static_set(), &network).await.unwrap();
    controller.activate(v2).unwrap();

    assert_eq!(active.get().unwrap().version, "v2");
    // v1's regions were reclaimed at the activation barrier
    let key = Fingerprint::of(&Request::get("/"));
    assert!(store.get(&v1_static, &key).unwrap().is_none());
  }

  #[tokio::test]
  async fn test_install_requires_success_class_status() {
    let (store, active, network) = fixture();
    let controller = LifecycleController::new(store, active);

    network.respond("/manifest.json", Response::new(404, "gone"));
    let result = controller.install("v1", &static_set(), &network).await;

    assert!(result.is_err());
  }
}
