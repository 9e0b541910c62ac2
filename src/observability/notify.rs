//! Health-transition notifications.
//!
//! Transitions are funneled through [`NotificationSink`]; delivery runs on
//! a spawned task so health bookkeeping never waits on a webhook.

use std::fmt::Debug;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;

/// A backend health or circuit-breaker transition.
#[derive(Debug, Clone, Serialize)]
pub struct HealthEvent {
    pub hostname: String,
    pub pool_id: String,
    pub backend_id: String,
    pub healthy: bool,
    pub reason: String,
    /// RFC3339 timestamp.
    pub ts: String,
}

/// Receiver for health transitions.
#[async_trait]
pub trait NotificationSink: Send + Sync + Debug {
    async fn notify(&self, event: HealthEvent);
}

/// Discards events.
#[derive(Debug, Default)]
pub struct NoopSink;

#[async_trait]
impl NotificationSink for NoopSink {
    async fn notify(&self, _event: HealthEvent) {}
}

/// POSTs each event as JSON to a webhook.
#[derive(Debug)]
pub struct WebhookSink {
    url: String,
    client: reqwest::Client,
}

impl WebhookSink {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl NotificationSink for WebhookSink {
    async fn notify(&self, event: HealthEvent) {
        if let Err(e) = self.client.post(&self.url).json(&event).send().await {
            tracing::warn!(
                url = %self.url,
                backend = %event.backend_id,
                error = %e,
                "health notification delivery failed"
            );
        }
    }
}

/// Fire-and-forget delivery.
pub fn dispatch(sink: &Arc<dyn NotificationSink>, event: HealthEvent) {
    let sink = Arc::clone(sink);
    tokio::spawn(async move {
        sink.notify(event).await;
    });
}
