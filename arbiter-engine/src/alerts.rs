//! Webhook alerting for failed orders and fatal conditions.

use std::sync::Mutex;

use reqwest::Client;
use serde_json::json;
use tracing::{error, warn};

/// Posts `{title, message}` payloads to a configured webhook. Without a
/// webhook the alert is still logged at warn level.
#[derive(Clone)]
pub struct AlertDispatcher {
    client: Client,
    webhook: Option<String>,
}

impl AlertDispatcher {
    #[must_use]
    pub fn new(webhook: Option<String>) -> Self {
        Self {
            client: Client::new(),
            webhook,
        }
    }

    pub async fn notify(&self, title: &str, message: &str) {
        warn!(%title, %message, "alert raised");
        let Some(url) = self.webhook.as_ref() else {
            return;
        };
        let payload = json!({ "title": title, "message": message });
        if let Err(err) = self.client.post(url).json(&payload).send().await {
            error!(error = %err, "failed to send alert webhook");
        }
    }
}

/// Tracks consecutive order failures and alerts when the configured
/// limit is reached, then resets the streak.
pub struct AlertManager {
    dispatcher: AlertDispatcher,
    max_order_failures: u32,
    consecutive_failures: Mutex<u32>,
}

impl AlertManager {
    #[must_use]
    pub fn new(dispatcher: AlertDispatcher, max_order_failures: u32) -> Self {
        Self {
            dispatcher,
            max_order_failures: max_order_failures.max(1),
            consecutive_failures: Mutex::new(0),
        }
    }

    pub async fn notify(&self, title: &str, message: &str) {
        self.dispatcher.notify(title, message).await;
    }

    pub async fn order_failure(&self, reason: &str) {
        let tripped = {
            let mut failures = self.consecutive_failures.lock().unwrap();
            *failures += 1;
            if *failures >= self.max_order_failures {
                *failures = 0;
                true
            } else {
                false
            }
        };
        if tripped {
            self.dispatcher
                .notify(
                    "Execution failures",
                    &format!(
                        "{} consecutive order failures ({reason})",
                        self.max_order_failures
                    ),
                )
                .await;
        }
    }

    pub fn reset_order_failures(&self) {
        *self.consecutive_failures.lock().unwrap() = 0;
    }
}
