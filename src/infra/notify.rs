//! Notification sinks: log line, webhook, in-memory capture.

use std::time::Duration;

use parking_lot::Mutex;
use reqwest::Client;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::core::notify::{Notification, NotificationKind, NotificationSink};
use crate::util::telemetry::human_error;

/// Writes every notification as a structured log line.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl NotificationSink for TracingSink {
    fn notify(&self, notification: Notification) {
        info!(
            job_id = notification.job_id,
            kind = ?notification.kind,
            resource = notification.resource.as_deref().unwrap_or(""),
            "notification: {}",
            notification.render().replace('\n', " | ")
        );
    }
}

#[derive(Serialize)]
struct WebhookPayload<'a> {
    event: NotificationKind,
    text: String,
    data: &'a Notification,
}

/// POSTs `{event, text, data}` to a message gateway. Delivery is spawned and
/// failures are only logged.
#[derive(Debug, Clone)]
pub struct WebhookSink {
    client: Client,
    url: String,
}

impl WebhookSink {
    /// Sink posting to `url`.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be constructed.
    pub fn new(url: &str, timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            url: url.to_string(),
        })
    }
}

impl NotificationSink for WebhookSink {
    fn notify(&self, notification: Notification) {
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            warn!(job_id = notification.job_id, "no runtime, webhook notification dropped");
            return;
        };
        let client = self.client.clone();
        let url = self.url.clone();
        handle.spawn(async move {
            let payload = WebhookPayload {
                event: notification.kind,
                text: notification.render(),
                data: &notification,
            };
            match client.post(&url).json(&payload).send().await {
                Ok(resp) if resp.status().is_success() => {
                    debug!(job_id = notification.job_id, kind = ?notification.kind, "webhook delivered");
                }
                Ok(resp) => warn!(
                    job_id = notification.job_id,
                    status = resp.status().as_u16(),
                    "webhook rejected notification"
                ),
                Err(err) => warn!(
                    job_id = notification.job_id,
                    error = %human_error(&err),
                    "webhook delivery failed"
                ),
            }
        });
    }
}

/// Keeps every notification; for tests and dry runs.
#[derive(Debug, Default)]
pub struct MemorySink {
    sent: Mutex<Vec<Notification>>,
}

impl MemorySink {
    /// Empty sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Everything received so far.
    #[must_use]
    pub fn sent(&self) -> Vec<Notification> {
        self.sent.lock().clone()
    }

    /// Count of one kind.
    #[must_use]
    pub fn count(&self, kind: NotificationKind) -> usize {
        self.sent.lock().iter().filter(|n| n.kind == kind).count()
    }
}

impl NotificationSink for MemorySink {
    fn notify(&self, notification: Notification) {
        self.sent.lock().push(notification);
    }
}

/// Fans one notification out to several sinks.
pub struct FanoutSink {
    sinks: Vec<std::sync::Arc<dyn NotificationSink>>,
}

impl std::fmt::Debug for FanoutSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FanoutSink").field("sinks", &self.sinks.len()).finish()
    }
}

impl FanoutSink {
    /// Fan out to `sinks`, in order.
    #[must_use]
    pub fn new(sinks: Vec<std::sync::Arc<dyn NotificationSink>>) -> Self {
        Self { sinks }
    }
}

impl NotificationSink for FanoutSink {
    fn notify(&self, notification: Notification) {
        if let Some((last, rest)) = self.sinks.split_last() {
            for sink in rest {
                sink.notify(notification.clone());
            }
            last.notify(notification);
        }
    }
}
