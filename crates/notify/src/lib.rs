use std::sync::Arc;

use anyhow::{anyhow, Context};
use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::info;
use url::Url;

/// An outbound email-style notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notification {
    pub to: String,
    pub subject: String,
    pub body: String,
}

impl Notification {
    /// Reminder sent when a client leaves a message unread past the grace period.
    pub fn unread_message(
        to: &str,
        first_name: &str,
        case_title: &str,
        content: &str,
        client_url: Option<&str>,
    ) -> Self {
        let mut body = format!(
            "Hi {first_name},\n\nYou have an unread message on \"{case_title}\":\n\n{content}\n"
        );
        if let Some(url) = client_url {
            body.push_str(&format!("\nOpen your case portal: {url}\n"));
        }
        Self {
            to: to.to_string(),
            subject: format!("New message on {case_title}"),
            body,
        }
    }

    /// Email carrying a registration link for an invited client.
    pub fn case_invite(to: &str, case_title: &str, register_url: &str) -> Self {
        Self {
            to: to.to_string(),
            subject: format!("You have been invited to {case_title}"),
            body: format!(
                "You have been invited to follow \"{case_title}\".\n\nComplete your registration: {register_url}\n"
            ),
        }
    }
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, notification: Notification) -> anyhow::Result<()>;
}

/// Writes notifications to the log instead of delivering them.
#[derive(Debug, Default, Clone)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send(&self, notification: Notification) -> anyhow::Result<()> {
        info!(
            to = %notification.to,
            subject = %notification.subject,
            "notify: delivery skipped, no relay configured"
        );
        Ok(())
    }
}

#[derive(Serialize)]
struct RelayPayload<'a> {
    from: &'a str,
    to: &'a str,
    subject: &'a str,
    text: &'a str,
}

/// Posts notifications as JSON to an HTTP mail relay.
#[derive(Clone)]
pub struct HttpRelayNotifier {
    http: reqwest::Client,
    endpoint: Url,
    from: String,
}

impl HttpRelayNotifier {
    pub fn new(endpoint: &str, from: impl Into<String>) -> anyhow::Result<Self> {
        let endpoint = Url::parse(endpoint)
            .with_context(|| format!("invalid notification relay url '{endpoint}'"))?;
        if !matches!(endpoint.scheme(), "http" | "https") {
            return Err(anyhow!(
                "notification relay url must start with http:// or https://"
            ));
        }
        Ok(Self {
            http: reqwest::Client::new(),
            endpoint,
            from: from.into(),
        })
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }
}

#[async_trait]
impl Notifier for HttpRelayNotifier {
    async fn send(&self, notification: Notification) -> anyhow::Result<()> {
        self.http
            .post(self.endpoint.clone())
            .json(&RelayPayload {
                from: &self.from,
                to: &notification.to,
                subject: &notification.subject,
                text: &notification.body,
            })
            .send()
            .await?
            .error_for_status()?;
        info!(to = %notification.to, "notify: relayed notification");
        Ok(())
    }
}

/// Keeps every notification in memory; used by tests and local tooling.
#[derive(Debug, Default, Clone)]
pub struct MemoryNotifier {
    sent: Arc<Mutex<Vec<Notification>>>,
    fail: bool,
}

impl MemoryNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// A notifier whose every send fails after recording the attempt.
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub async fn sent(&self) -> Vec<Notification> {
        self.sent.lock().await.clone()
    }
}

#[async_trait]
impl Notifier for MemoryNotifier {
    async fn send(&self, notification: Notification) -> anyhow::Result<()> {
        self.sent.lock().await.push(notification);
        if self.fail {
            return Err(anyhow!("memory notifier configured to fail"));
        }
        Ok(())
    }
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
