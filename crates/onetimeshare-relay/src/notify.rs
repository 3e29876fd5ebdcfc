//! Burn notifications
//!
//! Invoked once per secret, after the read that exhausted its budget. Delivery
//! is fire-and-forget: failures are logged here and never reach the reader.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use hmac::{Hmac, Mac};
use serde::Serialize;
use sha2::Sha256;
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::NotifyConfig;
use crate::token::redact;

type HmacSha256 = Hmac<Sha256>;

/// Event name carried by burn notifications
pub const EVENT_SECRET_BURNED: &str = "secret.burned";

/// Notification errors
#[derive(Debug, Error)]
pub enum NotifyError {
    /// Delivery attempt failed
    #[error("delivery failed: {0}")]
    Delivery(String),

    /// Receiver answered with a non-success status
    #[error("receiver rejected notification with status {0}")]
    Rejected(u16),

    /// Delivery did not finish in time
    #[error("delivery timed out")]
    Timeout,
}

/// Receives `(target, token)` when a secret is burned
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Deliver one burn notification
    async fn notify(&self, target: &str, token: &str) -> Result<(), NotifyError>;
}

/// Notifier that only records the burn in the log
#[derive(Clone, Debug, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, target: &str, token: &str) -> Result<(), NotifyError> {
        info!(target_contact = %target, token = %redact(token), "secret burned");
        Ok(())
    }
}

/// Payload POSTed by [`WebhookNotifier`]
#[derive(Debug, Clone, Serialize)]
pub struct BurnEvent {
    /// Always [`EVENT_SECRET_BURNED`]
    pub event: String,
    /// Contact supplied at creation
    pub target: String,
    /// Token of the burned secret
    pub token: String,
    /// Unix timestamp (seconds) of the burn
    pub timestamp: i64,
}

/// Notifier that POSTs a signed JSON event to a webhook, typically a mail
/// gateway that turns it into a confirmation email
#[derive(Clone)]
pub struct WebhookNotifier {
    client: reqwest::Client,
    url: String,
    signing_secret: Option<String>,
}

impl WebhookNotifier {
    /// Create a notifier for `url`
    pub fn new(
        url: impl Into<String>,
        signing_secret: Option<String>,
        timeout: Duration,
    ) -> Result<Self, NotifyError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| NotifyError::Delivery(e.to_string()))?;

        Ok(Self {
            client,
            url: url.into(),
            signing_secret,
        })
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn notify(&self, target: &str, token: &str) -> Result<(), NotifyError> {
        let event = BurnEvent {
            event: EVENT_SECRET_BURNED.to_string(),
            target: target.to_string(),
            token: token.to_string(),
            timestamp: chrono::Utc::now().timestamp(),
        };
        let body =
            serde_json::to_string(&event).map_err(|e| NotifyError::Delivery(e.to_string()))?;

        let mut request = self
            .client
            .post(&self.url)
            .header("Content-Type", "application/json");
        if let Some(secret) = &self.signing_secret {
            request = request.header(
                "X-OTS-Signature",
                format!("sha256={}", compute_signature(secret, &body)),
            );
        }

        let response = request
            .body(body)
            .send()
            .await
            .map_err(|e| NotifyError::Delivery(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(NotifyError::Rejected(status.as_u16()));
        }
        debug!(url = %self.url, status = %status, "burn notification delivered");
        Ok(())
    }
}

/// Compute the hex HMAC-SHA256 of `body` under `secret`
pub fn compute_signature(secret: &str, body: &str) -> String {
    // HMAC accepts keys of any length, so this cannot fail.
    let mut mac = match HmacSha256::new_from_slice(secret.as_bytes()) {
        Ok(mac) => mac,
        Err(_) => return String::new(),
    };
    mac.update(body.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

/// Runs notifications off the caller's critical path
#[derive(Clone)]
pub struct NotificationDispatcher {
    notifier: Arc<dyn Notifier>,
    timeout: Duration,
}

impl NotificationDispatcher {
    /// Wrap a notifier; each delivery is bounded by `timeout`
    pub fn new(notifier: Arc<dyn Notifier>, timeout: Duration) -> Self {
        Self { notifier, timeout }
    }

    /// Build the dispatcher a configuration asks for
    pub fn from_config(config: &NotifyConfig) -> Result<Self, NotifyError> {
        let notifier: Arc<dyn Notifier> = match &config.webhook_url {
            Some(url) => Arc::new(WebhookNotifier::new(
                url.clone(),
                config.signing_secret.clone(),
                config.timeout(),
            )?),
            None => Arc::new(LogNotifier),
        };
        Ok(Self::new(notifier, config.timeout()))
    }

    /// Spawn one delivery and return immediately.
    ///
    /// The handle is only useful to tests; production callers drop it.
    pub fn dispatch(&self, target: String, token: String) -> JoinHandle<()> {
        let notifier = Arc::clone(&self.notifier);
        let timeout = self.timeout;
        tokio::spawn(async move {
            let outcome = tokio::time::timeout(timeout, notifier.notify(&target, &token))
                .await
                .unwrap_or(Err(NotifyError::Timeout));
            if let Err(e) = outcome {
                warn!(token = %redact(&token), error = %e, "burn notification failed");
            }
        })
    }
}

impl Default for NotificationDispatcher {
    fn default() -> Self {
        Self::new(Arc::new(LogNotifier), Duration::from_secs(5))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockall::predicate::eq;

    #[test]
    fn test_signature_is_deterministic() {
        let sig1 = compute_signature("my-secret", r#"{"event":"secret.burned"}"#);
        let sig2 = compute_signature("my-secret", r#"{"event":"secret.burned"}"#);
        assert_eq!(sig1, sig2);
        assert_eq!(sig1.len(), 64);
    }

    #[test]
    fn test_different_secrets_produce_different_signatures() {
        assert_ne!(
            compute_signature("secret-a", "body"),
            compute_signature("secret-b", "body")
        );
    }

    #[tokio::test]
    async fn test_dispatch_invokes_notifier_once() {
        let mut mock = MockNotifier::new();
        mock.expect_notify()
            .with(eq("ops@example.com"), eq("tok"))
            .times(1)
            .returning(|_, _| Ok(()));

        let dispatcher = NotificationDispatcher::new(Arc::new(mock), Duration::from_secs(1));
        dispatcher
            .dispatch("ops@example.com".into(), "tok".into())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_dispatch_swallows_failures() {
        let mut mock = MockNotifier::new();
        mock.expect_notify()
            .times(1)
            .returning(|_, _| Err(NotifyError::Rejected(500)));

        let dispatcher = NotificationDispatcher::new(Arc::new(mock), Duration::from_secs(1));
        assert!(dispatcher
            .dispatch("ops@example.com".into(), "tok".into())
            .await
            .is_ok());
    }

    struct StalledNotifier;

    #[async_trait]
    impl Notifier for StalledNotifier {
        async fn notify(&self, _target: &str, _token: &str) -> Result<(), NotifyError> {
            std::future::pending().await
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_dispatch_gives_up_after_timeout() {
        let dispatcher =
            NotificationDispatcher::new(Arc::new(StalledNotifier), Duration::from_secs(5));
        let handle = dispatcher.dispatch("ops@example.com".into(), "tok".into());
        assert!(handle.await.is_ok());
    }

    #[test]
    fn test_from_config_without_webhook_logs_only() {
        let dispatcher = NotificationDispatcher::from_config(&NotifyConfig::default());
        assert!(dispatcher.is_ok());
    }
}
