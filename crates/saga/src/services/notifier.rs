//! Notifications sent to operators and customers.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use common::EntityId;
use serde::Serialize;

use crate::error::{Result, SagaError};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Notification {
    pub recipient: EntityId,
    pub template: &'static str,
    pub data: serde_json::Value,
}

impl Notification {
    pub fn new(recipient: EntityId, template: &'static str, data: serde_json::Value) -> Self {
        Self {
            recipient,
            template,
            data,
        }
    }
}

/// Delivers notifications. Delivery never affects a saga's outcome.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, notification: Notification) -> Result<()>;
}

/// Writes notifications to the log.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingNotifier;

#[async_trait]
impl Notifier for TracingNotifier {
    async fn notify(&self, notification: Notification) -> Result<()> {
        tracing::info!(
            recipient = %notification.recipient,
            template = notification.template,
            data = %notification.data,
            "notification"
        );
        Ok(())
    }
}

#[derive(Debug, Default)]
struct InMemoryNotifierState {
    sent: Vec<Notification>,
    fail: bool,
}

/// In-memory notifier for testing.
#[derive(Debug, Clone, Default)]
pub struct InMemoryNotifier {
    state: Arc<Mutex<InMemoryNotifierState>>,
}

impl InMemoryNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, InMemoryNotifierState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn set_fail(&self, fail: bool) {
        self.lock().fail = fail;
    }

    pub fn sent(&self) -> Vec<Notification> {
        self.lock().sent.clone()
    }

    pub fn sent_count(&self, template: &str) -> usize {
        self.lock()
            .sent
            .iter()
            .filter(|n| n.template == template)
            .count()
    }
}

#[async_trait]
impl Notifier for InMemoryNotifier {
    async fn notify(&self, notification: Notification) -> Result<()> {
        let mut state = self.lock();
        if state.fail {
            return Err(SagaError::Gateway("notification channel down".to_string()));
        }
        state.sent.push(notification);
        Ok(())
    }
}

/// Sends a notification, logging and swallowing any failure.
pub(crate) async fn notify_best_effort(notifier: &dyn Notifier, notification: Notification) {
    let template = notification.template;
    if let Err(e) = notifier.notify(notification).await {
        metrics::counter!("notifications_failed_total").increment(1);
        tracing::warn!(template, error = %e, "notification_failed");
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[tokio::test]
    async fn test_records_notifications() {
        let notifier = InMemoryNotifier::new();
        notifier
            .notify(Notification::new(EntityId::new(), "payout_sent", json!({})))
            .await
            .unwrap();

        assert_eq!(notifier.sent_count("payout_sent"), 1);
        assert_eq!(notifier.sent_count("booking_assigned"), 0);
    }

    #[tokio::test]
    async fn test_best_effort_swallows_failure() {
        let notifier = InMemoryNotifier::new();
        notifier.set_fail(true);

        notify_best_effort(
            &notifier,
            Notification::new(EntityId::new(), "payout_sent", json!({})),
        )
        .await;

        assert!(notifier.sent().is_empty());
    }
}
