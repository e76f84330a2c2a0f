//! Alert sinks — where failure and review notifications go.
//!
//! Sinks are fire-and-forget: a dead webhook must never fail or slow down a
//! worker, so delivery happens on a detached task and errors only get logged.

use std::sync::Arc;

use seopilot_core::{AlertConfig, AlertEvent, AlertSink};

/// Log-only sink, used when no webhook is configured.
pub struct TracingAlerts;

impl AlertSink for TracingAlerts {
    fn send_alert(&self, event: AlertEvent) {
        tracing::warn!(
            kind = %event.kind,
            task_id = %event.task_id,
            agent = %event.agent_name,
            detail = %event.detail,
            "alert"
        );
    }
}

/// POSTs each event as JSON to a configured webhook.
pub struct WebhookAlerts {
    client: reqwest::Client,
    url: String,
    headers: Vec<(String, String)>,
}

impl WebhookAlerts {
    pub fn new(url: String, headers: Vec<(String, String)>) -> Self {
        Self {
            client: reqwest::Client::new(),
            url,
            headers,
        }
    }
}

impl AlertSink for WebhookAlerts {
    fn send_alert(&self, event: AlertEvent) {
        let client = self.client.clone();
        let url = self.url.clone();
        let headers = self.headers.clone();
        tokio::spawn(async move {
            let mut req = client.post(&url).json(&event);
            for (name, value) in &headers {
                req = req.header(name, value);
            }
            match req.send().await {
                Ok(resp) if !resp.status().is_success() => {
                    tracing::warn!(status = %resp.status(), %url, "alert webhook returned an error");
                }
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!(error = %e, %url, "alert webhook unreachable");
                }
            }
        });
    }
}

/// Pick a sink from config: webhook when a URL is set, log otherwise.
pub fn sink_from_config(cfg: &AlertConfig) -> Arc<dyn AlertSink> {
    if cfg.webhook_url.is_empty() {
        Arc::new(TracingAlerts)
    } else {
        Arc::new(WebhookAlerts::new(
            cfg.webhook_url.clone(),
            cfg.headers.clone(),
        ))
    }
}
