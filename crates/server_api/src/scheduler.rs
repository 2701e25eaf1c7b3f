use std::{
    collections::HashMap,
    sync::{Arc, Weak},
    time::Duration,
};

use notify::{Notification, Notifier};
use shared::domain::MessageId;
use storage::Storage;
use tokio::{sync::Mutex, task::JoinHandle};
use tracing::{debug, info, warn};

/// Per-message deferred reminders. One timer per message id; the timer table lives here
/// and nowhere else.
#[derive(Clone)]
pub struct NotificationScheduler {
    inner: Arc<SchedulerInner>,
}

struct SchedulerInner {
    storage: Storage,
    notifier: Arc<dyn Notifier>,
    grace_period: Duration,
    client_url: Option<String>,
    pending: Mutex<HashMap<MessageId, JoinHandle<()>>>,
}

impl NotificationScheduler {
    pub fn new(storage: Storage, notifier: Arc<dyn Notifier>, grace_period: Duration) -> Self {
        Self::build(storage, notifier, grace_period, None)
    }

    fn build(
        storage: Storage,
        notifier: Arc<dyn Notifier>,
        grace_period: Duration,
        client_url: Option<String>,
    ) -> Self {
        Self {
            inner: Arc::new(SchedulerInner {
                storage,
                notifier,
                grace_period,
                client_url,
                pending: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Returns a scheduler that links reminders to the client portal. Intended for startup,
    /// before any timer is armed.
    pub fn with_client_url(self, client_url: Option<String>) -> Self {
        Self::build(
            self.inner.storage.clone(),
            self.inner.notifier.clone(),
            self.inner.grace_period,
            client_url,
        )
    }

    pub fn grace_period(&self) -> Duration {
        self.inner.grace_period
    }

    /// Schedules the reminder for a freshly created message.
    pub async fn arm(&self, message_id: MessageId) {
        let mut pending = self.inner.pending.lock().await;
        let weak: Weak<SchedulerInner> = Arc::downgrade(&self.inner);
        let grace_period = self.inner.grace_period;
        let handle = tokio::spawn(async move {
            tokio::time::sleep(grace_period).await;
            let Some(inner) = weak.upgrade() else {
                return;
            };
            inner.pending.lock().await.remove(&message_id);
            inner.fire(message_id).await;
        });
        if let Some(previous) = pending.insert(message_id, handle) {
            previous.abort();
        }
        debug!(%message_id, ?grace_period, "notification timer armed");
    }

    /// Drops the pending timer, if any. Returns whether a timer was actually cancelled.
    pub async fn cancel(&self, message_id: MessageId) -> bool {
        let removed = self.inner.pending.lock().await.remove(&message_id);
        match removed {
            Some(handle) => {
                handle.abort();
                debug!(%message_id, "notification timer cancelled");
                true
            }
            None => false,
        }
    }

    pub async fn is_armed(&self, message_id: MessageId) -> bool {
        self.inner.pending.lock().await.contains_key(&message_id)
    }

    pub async fn pending_count(&self) -> usize {
        self.inner.pending.lock().await.len()
    }
}

impl SchedulerInner {
    async fn fire(&self, message_id: MessageId) {
        // The viewed flag captured at arm time is stale by now; ask the store.
        let target = match self.storage.notification_target(message_id).await {
            Ok(Some(target)) => target,
            Ok(None) => {
                debug!(%message_id, "message gone before reminder fired");
                return;
            }
            Err(err) => {
                warn!(%message_id, error = %err, "could not load reminder target");
                return;
            }
        };
        if target.viewed {
            debug!(%message_id, "reminder suppressed, message already viewed");
            return;
        }
        let Some(email) = target.receiver_email.as_deref() else {
            info!(
                %message_id,
                client_id = %target.receiver_client_id,
                "reminder skipped, receiver has no email"
            );
            return;
        };

        let notification = Notification::unread_message(
            email,
            &target.receiver_first_name,
            &target.case_title,
            &target.content,
            self.client_url.as_deref(),
        );
        match self.notifier.send(notification).await {
            Ok(()) => info!(%message_id, tenant_id = %target.tenant_id, "unread reminder sent"),
            Err(err) => warn!(%message_id, error = %err, "unread reminder delivery failed"),
        }
    }
}

#[cfg(test)]
#[path = "tests/scheduler_tests.rs"]
mod tests;
