use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::debug;

use crate::net::{NetworkClient, Request};
use crate::notify::ScheduledNotification;

/// Engine events
#[derive(Debug)]
pub enum EngineEvent {
  /// Connectivity came back after an offline period; drain the write queue
  Online,
  /// Periodic background trigger
  Tick,
  /// A scheduled reminder fired
  NotificationFired {
    id: u64,
    notification: ScheduledNotification,
  },
}

/// Event handler that produces engine events from a tick timer and a
/// connectivity probe, and carries notification fires from the scheduler
pub struct EventHandler {
  rx: mpsc::UnboundedReceiver<EngineEvent>,
  tx: mpsc::UnboundedSender<EngineEvent>,
}

impl EventHandler {
  /// Create a new event handler with the given tick rate
  pub fn new(tick_rate: Duration) -> Self {
    let (tx, rx) = mpsc::unbounded_channel();

    // Spawn tick producer
    let tick_tx = tx.clone();
    tokio::spawn(async move {
      loop {
        tokio::time::sleep(tick_rate).await;
        if tick_tx.send(EngineEvent::Tick).is_err() {
          break;
        }
      }
    });

    Self { rx, tx }
  }

  /// Sender handle for other event producers (the notification scheduler)
  pub fn sender(&self) -> mpsc::UnboundedSender<EngineEvent> {
    self.tx.clone()
  }

  /// Spawn a connectivity probe that emits `Online` on offline-to-online
  /// edges. Starts in the offline state so a reachable network on boot
  /// drains any writes left over from the previous run.
  pub fn spawn_probe<N>(&self, network: Arc<N>, probe: Request, interval: Duration)
  where
    N: NetworkClient + 'static,
  {
    let tx = self.tx.clone();
    tokio::spawn(async move {
      let mut was_online = false;
      loop {
        let online = network.send(&probe).await.is_ok();
        if online && !was_online {
          debug!("connectivity restored");
          if tx.send(EngineEvent::Online).is_err() {
            break;
          }
        }
        was_online = online;
        tokio::time::sleep(interval).await;
      }
    });
  }

  /// Receive the next event
  pub async fn next(&mut self) -> Option<EngineEvent> {
    self.rx.recv().await
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::net::client::mock::MockNetwork;
  use crate::net::Response;

  #[tokio::test]
  async fn test_tick_events_arrive() {
    let mut events = EventHandler::new(Duration::from_millis(5));
    let event = tokio::time::timeout(Duration::from_millis(100), events.next())
      .await
      .unwrap();
    assert!(matches!(event, Some(EngineEvent::Tick)));
  }

  #[tokio::test]
  async fn test_probe_emits_online_edge_once() {
    let mut events = EventHandler::new(Duration::from_secs(60));
    let network = Arc::new(MockNetwork::new());
    network.respond("/api/auth/me", Response::new(200, "{}"));

    events.spawn_probe(
      network.clone(),
      Request::get("/api/auth/me"),
      Duration::from_millis(5),
    );

    let event = tokio::time::timeout(Duration::from_millis(200), events.next())
      .await
      .unwrap();
    assert!(matches!(event, Some(EngineEvent::Online)));

    // Still online: no second edge
    tokio::time::sleep(Duration::from_millis(30)).await;
    let followup = tokio::time::timeout(Duration::from_millis(20), events.next()).await;
    assert!(followup.is_err(), "expected no event while connectivity holds");
  }
}
