//! Study reminder scheduling.
//!
//! A side channel next to the request path: reminders are scheduled with a
//! fire time, surface a payload plus a fixed pair of actions when they
//! fire, and are gone afterwards. Choosing "later" schedules a brand-new
//! reminder a fixed delay out; no history is kept.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::event::EngineEvent;

/// Action id for "start a study session now".
pub const ACTION_STUDY: &str = "study";
/// Action id for "remind me later".
pub const ACTION_LATER: &str = "later";

/// An action surfaced alongside a fired reminder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationAction {
  pub id: String,
  pub label: String,
}

/// What the user sees when a reminder fires.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationPayload {
  pub title: String,
  pub body: String,
  /// Where the app should navigate if the notification itself is tapped
  pub open_path: String,
}

/// A reminder waiting to fire.
#[derive(Debug, Clone)]
pub struct ScheduledNotification {
  pub fire_at: DateTime<Utc>,
  pub payload: NotificationPayload,
  pub actions: Vec<NotificationAction>,
}

/// What handling a notification action resolved to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionOutcome {
  /// Open the app at a path
  Open(String),
  /// A replacement reminder was scheduled; carries its id
  Deferred(u64),
}

/// The fixed action vocabulary every reminder carries.
pub fn default_actions() -> Vec<NotificationAction> {
  vec![
    NotificationAction {
      id: ACTION_STUDY.to_string(),
      label: "Study now".to_string(),
    },
    NotificationAction {
      id: ACTION_LATER.to_string(),
      label: "Remind later".to_string(),
    },
  ]
}

/// Schedules reminders and delivers fires as engine events.
pub struct NotificationScheduler {
  events: mpsc::UnboundedSender<EngineEvent>,
  timers: Arc<Mutex<HashMap<u64, JoinHandle<()>>>>,
  next_id: AtomicU64,
  defer_delay: Duration,
  open_path: String,
}

impl NotificationScheduler {
  pub fn new(
    events: mpsc::UnboundedSender<EngineEvent>,
    defer_delay: Duration,
    open_path: impl Into<String>,
  ) -> Self {
    Self {
      events,
      timers: Arc::new(Mutex::new(HashMap::new())),
      next_id: AtomicU64::new(1),
      defer_delay,
      open_path: open_path.into(),
    }
  }

  /// Default reminder payload.
  pub fn reminder_payload(&self) -> NotificationPayload {
    NotificationPayload {
      title: "MedStudy".to_string(),
      body: "Time to study!".to_string(),
      open_path: self.open_path.clone(),
    }
  }

  /// Payload used when a reminder was deferred.
  fn deferred_payload(&self) -> NotificationPayload {
    NotificationPayload {
      title: "MedStudy".to_string(),
      body: "How about a quick study session?".to_string(),
      open_path: self.open_path.clone(),
    }
  }

  /// Schedule a reminder. Returns an id usable with `cancel`.
  pub fn schedule(&self, notification: ScheduledNotification) -> u64 {
    let id = self.next_id.fetch_add(1, Ordering::SeqCst);
    let delay = (notification.fire_at - Utc::now())
      .to_std()
      .unwrap_or(Duration::ZERO);

    let events = self.events.clone();
    let timers = Arc::clone(&self.timers);
    let handle = tokio::spawn(async move {
      tokio::time::sleep(delay).await;
      let _ = events.send(EngineEvent::NotificationFired {
        id,
        notification,
      });
      timers.lock().unwrap_or_else(|e| e.into_inner()).remove(&id);
    });

    self
      .timers
      .lock()
      .unwrap_or_else(|e| e.into_inner())
      .insert(id, handle);
    debug!(id, "scheduled reminder");
    id
  }

  /// Schedule a reminder with the default payload and action set.
  pub fn schedule_reminder(&self, fire_at: DateTime<Utc>) -> u64 {
    self.schedule(ScheduledNotification {
      fire_at,
      payload: self.reminder_payload(),
      actions: default_actions(),
    })
  }

  /// Cancel a pending reminder. A cancelled reminder never fires.
  /// Returns false if it already fired or never existed.
  pub fn cancel(&self, id: u64) -> bool {
    match self
      .timers
      .lock()
      .unwrap_or_else(|e| e.into_inner())
      .remove(&id)
    {
      Some(handle) => {
        handle.abort();
        debug!(id, "cancelled reminder");
        true
      }
      None => false,
    }
  }

  /// Push the reminder out by the configured delay. A new notification is
  /// scheduled; the fired one is already gone.
  pub fn defer(&self) -> u64 {
    let fire_at =
      Utc::now() + chrono::Duration::from_std(self.defer_delay).unwrap_or_else(|_| chrono::Duration::zero());
    self.schedule(ScheduledNotification {
      fire_at,
      payload: self.deferred_payload(),
      actions: default_actions(),
    })
  }

  /// Resolve a user's response to a fired reminder.
  pub fn handle_action(&self, action: &str) -> ActionOutcome {
    match action {
      ACTION_STUDY => ActionOutcome::Open(self.open_path.clone()),
      ACTION_LATER => ActionOutcome::Deferred(self.defer()),
      _ => ActionOutcome::Open("/".to_string()),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn scheduler() -> (NotificationScheduler, mpsc::UnboundedReceiver<EngineEvent>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let scheduler = NotificationScheduler::new(tx, Duration::from_secs(30 * 60), "/questions");
    (scheduler, rx)
  }

  #[tokio::test]
  async fn test_due_reminder_fires_with_actions() {
    let (scheduler, mut rx) = scheduler();
    let id = scheduler.schedule_reminder(Utc::now());

    let event = tokio::time::timeout(Duration::from_millis(200), rx.recv())
      .await
      .unwrap()
      .unwrap();

    match event {
      EngineEvent::NotificationFired {
        id: fired,
        notification,
      } => {
        assert_eq!(fired, id);
        assert_eq!(notification.payload.open_path, "/questions");
        let ids: Vec<&str> = notification.actions.iter().map(|a| a.id.as_str()).collect();
        assert_eq!(ids, vec![ACTION_STUDY, ACTION_LATER]);
      }
      other => panic!("unexpected event: {:?}", other),
    }
  }

  #[tokio::test]
  async fn test_cancelled_reminder_never_fires() {
    let (scheduler, mut rx) = scheduler();
    let id = scheduler.schedule_reminder(Utc::now() + chrono::Duration::milliseconds(100));

    assert!(scheduler.cancel(id));
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(rx.try_recv().is_err());

    // Second cancel is a no-op
    assert!(!scheduler.cancel(id));
  }

  #[tokio::test]
  async fn test_later_action_schedules_a_new_reminder() {
    let (tx, _rx) = mpsc::unbounded_channel();
    let scheduler = NotificationScheduler::new(tx, Duration::from_secs(1800), "/questions");
    let first = scheduler.schedule_reminder(Utc::now());

    match scheduler.handle_action(ACTION_LATER) {
      ActionOutcome::Deferred(id) => assert_ne!(id, first),
      other => panic!("unexpected outcome: {:?}", other),
    }
  }

  #[tokio::test]
  async fn test_study_action_opens_session_path() {
    let (scheduler, _rx) = scheduler();
    assert_eq!(
      scheduler.handle_action(ACTION_STUDY),
      ActionOutcome::Open("/questions".to_string())
    );
    assert_eq!(
      scheduler.handle_action("dismiss"),
      ActionOutcome::Open("/".to_string())
    );
  }
}
