//! Offline write queue: durable log of mutating requests that failed on
//! connectivity, replayed in insertion order once the network returns.

use chrono::{DateTime, Utc};
use color_eyre::Result;
use std::sync::Arc;
use tracing::{info, warn};

use crate::net::{NetworkClient, Request};

/// A mutating request captured while the network was unavailable.
#[derive(Debug, Clone)]
pub struct QueuedWrite {
  pub id: i64,
  pub request: Request,
  pub enqueued_at: DateTime<Utc>,
  /// Failed replay count. There is no retry cap: an entry stays queued
  /// until a replay returns a success-class status.
  pub attempts: i64,
}

/// Trait for durable queue storage backends.
///
/// Ids are assigned by the backend and never reused, so an entry replayed
/// by an in-progress drain can never collide with one enqueued mid-drain.
pub trait QueueStore: Send + Sync {
  /// Append a request to the queue, returning its id.
  fn enqueue(&self, request: &Request) -> Result<i64>;

  /// The queue contents at this instant, in insertion order.
  fn snapshot(&self) -> Result<Vec<QueuedWrite>>;

  /// Remove an entry after a confirmed successful replay.
  fn remove(&self, id: i64) -> Result<()>;

  /// Increment an entry's attempt counter after a failed replay.
  fn record_failure(&self, id: i64) -> Result<()>;

  /// Number of entries currently queued.
  fn pending(&self) -> Result<usize>;
}

/// Outcome of a drain pass.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DrainReport {
  pub succeeded: Vec<i64>,
  pub failed: Vec<i64>,
}

/// The write queue: enqueue on write failure, drain on a reconnection or
/// background trigger.
pub struct WriteQueue<S: QueueStore> {
  store: Arc<S>,
  /// Serializes drains so overlapping triggers cannot replay an entry twice
  drain_lock: tokio::sync::Mutex<()>,
}

impl<S: QueueStore> WriteQueue<S> {
  pub fn new(store: Arc<S>) -> Self {
    Self {
      store,
      drain_lock: tokio::sync::Mutex::new(()),
    }
  }

  /// Capture a mutating request that failed at the network stage.
  pub fn enqueue(&self, request: &Request) -> Result<i64> {
    let id = self.store.enqueue(request)?;
    info!(id, url = %request.url, "queued offline write");
    Ok(id)
  }

  pub fn pending(&self) -> Result<usize> {
    self.store.pending()
  }

  /// Replay all currently-queued writes against the network.
  ///
  /// The queue is snapshotted at entry: writes enqueued while the drain is
  /// running wait for the next trigger. Entries are removed only on a
  /// success-class replay; anything else stays queued with `attempts`
  /// incremented.
  pub async fn drain<N: NetworkClient + ?Sized>(&self, network: &N) -> Result<DrainReport> {
    let _guard = self.drain_lock.lock().await;

    let snapshot = self.store.snapshot()?;
    let mut report = DrainReport::default();

    for write in snapshot {
      match network.send(&write.request).await {
        Ok(response) if response.is_success() => {
          self.store.remove(write.id)?;
          report.succeeded.push(write.id);
        }
        Ok(response) => {
          self.store.record_failure(write.id)?;
          report.failed.push(write.id);
          warn!(
            id = write.id,
            url = %write.request.url,
            status = response.status,
            attempts = write.attempts + 1,
            "replay rejected, write stays queued"
          );
        }
        Err(err) => {
          self.store.record_failure(write.id)?;
          report.failed.push(write.id);
          warn!(
            id = write.id,
            url = %write.request.url,
            attempts = write.attempts + 1,
            "replay failed: {err}"
          );
        }
      }
    }

    info!(
      succeeded = report.succeeded.len(),
      failed = report.failed.len(),
      "drain complete"
    );
    Ok(report)
  }
}
