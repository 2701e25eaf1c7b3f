use std::sync::Arc;

use chrono::Duration;
use notify::Notifier;
use shared::error::{ApiError, ErrorCode};
use storage::Storage;
use tracing::error;

pub mod cases;
pub mod directory;
pub mod guard;
pub mod identity;
pub mod invites;
pub mod messages;
pub mod scheduler;
pub mod validation;

pub use guard::{Actor, CaseAccess};
pub use identity::{Identity, TokenService};
pub use scheduler::NotificationScheduler;

/// Everything the core operations need, built once at startup and shared by reference.
#[derive(Clone)]
pub struct ApiContext {
    pub storage: Storage,
    pub tokens: TokenService,
    pub notifier: Arc<dyn Notifier>,
    pub scheduler: NotificationScheduler,
    pub client_url: Option<String>,
    pub invite_ttl: Duration,
}

impl ApiContext {
    pub fn new(
        storage: Storage,
        tokens: TokenService,
        notifier: Arc<dyn Notifier>,
        grace_period: std::time::Duration,
    ) -> Self {
        let scheduler = NotificationScheduler::new(storage.clone(), notifier.clone(), grace_period);
        Self {
            storage,
            tokens,
            notifier,
            scheduler,
            client_url: None,
            invite_ttl: Duration::hours(24),
        }
    }

    pub fn with_client_url(mut self, client_url: Option<String>) -> Self {
        self.scheduler = self.scheduler.with_client_url(client_url.clone());
        self.client_url = client_url;
        self
    }

    pub fn with_invite_ttl(mut self, invite_ttl: Duration) -> Self {
        self.invite_ttl = invite_ttl;
        self
    }
}

/// Storage failures never leak their detail to callers.
pub(crate) fn internal(err: anyhow::Error) -> ApiError {
    error!(error = %err, "storage operation failed");
    ApiError::new(ErrorCode::Internal, "internal error")
}

/// Like [`internal`], but uniqueness violations become `Conflict`.
pub(crate) fn conflict_or_internal(err: anyhow::Error, message: &str) -> ApiError {
    if storage::is_unique_violation(&err) {
        ApiError::conflict(message)
    } else {
        internal(err)
    }
}

#[cfg(test)]
#[path = "tests/support.rs"]
pub(crate) mod test_support;
