//! Background loop that turns due reminders into notifications.
//!
//! Each tick finds owners with due reminders, hands every reminder to a
//! [`NotificationSink`] and acknowledges the ones the sink accepted. A failed
//! cycle is logged and retried on the next tick. Stopping the loop never
//! touches reminder state.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::db::Db;
use crate::reminders::{acknowledge, due, due_owners, snooze_pending};
use crate::time::now_ms;
use crate::AppResult;

pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, PartialEq)]
pub struct DueNotification {
    pub owner_id: i64,
    pub reminder_id: i64,
    pub title: String,
    pub reminder: Value,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SinkError {
    #[error("notification receiver has gone away")]
    Closed,
    #[error("notification queue is full")]
    Full,
}

/// Presentation channel for due reminders.
pub trait NotificationSink: Send + Sync + 'static {
    fn deliver(&self, notification: &DueNotification) -> Result<(), SinkError>;
}

/// Writes each notification to the log.
#[derive(Debug, Default)]
pub struct LogSink;

impl NotificationSink for LogSink {
    fn deliver(&self, notification: &DueNotification) -> Result<(), SinkError> {
        tracing::info!(
            target: "kinboard",
            event = "reminder_due",
            owner_id = notification.owner_id,
            reminder_id = notification.reminder_id,
            title = %notification.title
        );
        Ok(())
    }
}

/// Forwards notifications over a bounded channel.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::Sender<DueNotification>,
}

impl ChannelSink {
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<DueNotification>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }
}

impl NotificationSink for ChannelSink {
    fn deliver(&self, notification: &DueNotification) -> Result<(), SinkError> {
        self.tx
            .try_send(notification.clone())
            .map_err(|err| match err {
                mpsc::error::TrySendError::Full(_) => SinkError::Full,
                mpsc::error::TrySendError::Closed(_) => SinkError::Closed,
            })
    }
}

fn to_notification(owner_id: i64, reminder: Value) -> Option<DueNotification> {
    let reminder_id = reminder.get("id").and_then(Value::as_i64)?;
    let title = reminder
        .get("title")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    Some(DueNotification {
        owner_id,
        reminder_id,
        title,
        reminder,
    })
}

async fn deliver_for_owner(
    db: &Db,
    sink: &dyn NotificationSink,
    owner_id: i64,
    now: i64,
) -> AppResult<usize> {
    let mut delivered = 0;
    for reminder in due(db, owner_id, now).await? {
        if snooze_pending(&reminder, now) {
            continue;
        }
        let Some(notification) = to_notification(owner_id, reminder) else {
            continue;
        };
        match sink.deliver(&notification) {
            Ok(()) => {
                acknowledge(db, owner_id, notification.reminder_id, now).await?;
                delivered += 1;
            }
            Err(err) => {
                tracing::warn!(
                    target: "kinboard",
                    event = "reminder_delivery_failed",
                    owner_id,
                    reminder_id = notification.reminder_id,
                    error = %err
                );
            }
        }
    }
    Ok(delivered)
}

/// One poll pass. Returns the number of notifications delivered.
pub async fn run_cycle(db: &Db, sink: &dyn NotificationSink, now: i64) -> AppResult<usize> {
    let mut delivered = 0;
    for owner_id in due_owners(db, now).await? {
        match deliver_for_owner(db, sink, owner_id, now).await {
            Ok(count) => delivered += count,
            Err(err) => tracing::warn!(
                target: "kinboard",
                event = "reminder_poll_owner_failed",
                owner_id,
                code = err.code(),
                error = %err
            ),
        }
    }
    Ok(delivered)
}

pub struct PollerHandle {
    stop_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl PollerHandle {
    /// Signal the loop and wait for the current cycle to finish.
    pub async fn stop(self) {
        let _ = self.stop_tx.send(true);
        if let Err(err) = self.task.await {
            tracing::warn!(target: "kinboard", event = "reminder_poller_join_failed", error = %err);
        }
        tracing::info!(target: "kinboard", event = "reminder_poller_stopped");
    }
}

pub fn spawn(db: Db, sink: Arc<dyn NotificationSink>, interval: Duration) -> PollerHandle {
    let (stop_tx, mut stop_rx) = watch::channel(false);
    let task = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tracing::info!(
            target: "kinboard",
            event = "reminder_poller_started",
            interval_ms = interval.as_millis() as u64
        );
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match run_cycle(&db, sink.as_ref(), now_ms()).await {
                        Ok(delivered) => tracing::debug!(
                            target: "kinboard",
                            event = "reminder_poll_cycle",
                            delivered
                        ),
                        Err(err) => tracing::warn!(
                            target: "kinboard",
                            event = "reminder_poll_failed",
                            code = err.code(),
                            error = %err
                        ),
                    }
                }
                changed = stop_rx.changed() => {
                    if changed.is_err() || *stop_rx.borrow() {
                        break;
                    }
                }
            }
        }
    });
    PollerHandle { stop_tx, task }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn channel_sink_reports_full_and_closed() {
        let (sink, rx) = ChannelSink::new(1);
        let n = to_notification(1, json!({"id": 4, "title": "Renew"})).unwrap();
        assert_eq!(sink.deliver(&n), Ok(()));
        assert_eq!(sink.deliver(&n), Err(SinkError::Full));
        drop(rx);
        assert_eq!(sink.deliver(&n), Err(SinkError::Closed));
    }

    #[test]
    fn notifications_need_an_id() {
        assert!(to_notification(1, json!({"title": "no id"})).is_none());
        let n = to_notification(2, json!({"id": 9})).unwrap();
        assert_eq!(n.title, "");
    }
}
