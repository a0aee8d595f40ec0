use crate::types::AlertKind;
use async_trait::async_trait;
use serde::Serialize;
use std::time::Duration;

/// Delivery boundary for fired alerts.
///
/// The engine calls this at most once per fired, non-debounced condition.
/// Delivery failures are the implementation's concern; none of them may
/// propagate back into the ingestion pipeline.
#[async_trait]
pub trait AlertDispatcher: Send + Sync {
    async fn notify(&self, device_id: &str, kind: AlertKind, message: &str);
}

/// Default dispatcher: alerts land in the process log.
pub struct LogDispatcher;

#[async_trait]
impl AlertDispatcher for LogDispatcher {
    async fn notify(&self, device_id: &str, kind: AlertKind, message: &str) {
        log::warn!("[ALERT] {} for {}: {}", kind, device_id, message);
    }
}

#[derive(Serialize)]
struct WebhookPayload<'a> {
    device_id: &'a str,
    kind: String,
    message: &'a str,
}

/// POSTs fired alerts as JSON to a configured endpoint (push-notification
/// relay, chat bridge, etc.). Failures are logged and swallowed.
pub struct WebhookDispatcher {
    client: reqwest::Client,
    url: String,
}

impl WebhookDispatcher {
    pub fn new(url: &str) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .user_agent("Fleet Tracker RS/0.1.0")
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        WebhookDispatcher {
            client,
            url: url.to_string(),
        }
    }
}

#[async_trait]
impl AlertDispatcher for WebhookDispatcher {
    async fn notify(&self, device_id: &str, kind: AlertKind, message: &str) {
        let payload = WebhookPayload {
            device_id,
            kind: kind.to_string(),
            message,
        };

        match self.client.post(&self.url).json(&payload).send().await {
            Ok(response) if response.status().is_success() => {
                log::info!("Alert delivered for {}: {}", device_id, kind);
            }
            Ok(response) => {
                log::error!(
                    "Alert webhook returned {} for {}: {}",
                    response.status(),
                    device_id,
                    kind
                );
            }
            Err(e) => {
                log::error!("Alert webhook failed for {}: {}", device_id, e);
            }
        }
    }
}
