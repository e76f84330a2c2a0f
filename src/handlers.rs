//! Agent handlers shipped with the binary.
//!
//! These are deliberately small: the interesting SEO logic lives in external
//! handler crates registered the same way. `site-probe` gives the scheduler
//! fanout something real to do; `webhook-notify` pushes a task's context to an
//! operator-supplied endpoint.

use std::time::Instant;

use async_trait::async_trait;
use seopilot_core::{Result, SeoPilotError};
use seopilot_pool::{AgentHandler, CheckpointRecorder, HandlerContext, HandlerOutcome};

/// Fetches a site URL and reports status, latency, and size.
pub struct SiteProbeHandler {
    client: reqwest::Client,
}

impl SiteProbeHandler {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }
}

impl Default for SiteProbeHandler {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AgentHandler for SiteProbeHandler {
    async fn run(&self, ctx: HandlerContext, sink: CheckpointRecorder) -> Result<HandlerOutcome> {
        let url = ctx
            .context
            .get("url")
            .and_then(|v| v.as_str())
            .ok_or_else(|| SeoPilotError::permanent("site-probe requires a 'url' context key"))?
            .to_string();

        sink.record("thinking", &format!("probing {url}"))?;
        if sink.is_cancelled() {
            return Ok(HandlerOutcome::Complete(serde_json::json!({
                "url": url, "skipped": "cancelled",
            })));
        }

        let started = Instant::now();
        let resp = self
            .client
            .get(&url)
            .send()
            .await
            // Unreachable hosts and timeouts are worth retrying.
            .map_err(|e| SeoPilotError::transient(format!("probe of {url} failed: {e}")))?;
        let status = resp.status();
        let body = resp
            .bytes()
            .await
            .map_err(|e| SeoPilotError::transient(format!("probe of {url} failed mid-body: {e}")))?;
        let elapsed_ms = started.elapsed().as_millis() as u64;

        if status.is_server_error() {
            return Err(SeoPilotError::transient(format!(
                "{url} answered {status}"
            )));
        }

        sink.record(
            "tool_use",
            &format!("{url} answered {status} in {elapsed_ms}ms"),
        )?;
        Ok(HandlerOutcome::Complete(serde_json::json!({
            "url": url,
            "status": status.as_u16(),
            "ok": status.is_success(),
            "elapsed_ms": elapsed_ms,
            "content_length": body.len(),
        })))
    }
}

/// POSTs the task context as JSON to the `webhook_url` context key.
pub struct WebhookNotifyHandler {
    client: reqwest::Client,
}

impl WebhookNotifyHandler {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }
}

impl Default for WebhookNotifyHandler {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AgentHandler for WebhookNotifyHandler {
    async fn run(&self, ctx: HandlerContext, sink: CheckpointRecorder) -> Result<HandlerOutcome> {
        let url = ctx
            .context
            .get("webhook_url")
            .and_then(|v| v.as_str())
            .ok_or_else(|| {
                SeoPilotError::permanent("webhook-notify requires a 'webhook_url' context key")
            })?
            .to_string();

        sink.record("tool_use", &format!("delivering payload to {url}"))?;
        let resp = self
            .client
            .post(&url)
            .json(&ctx.context)
            .send()
            .await
            .map_err(|e| SeoPilotError::transient(format!("webhook {url} unreachable: {e}")))?;

        let status = resp.status();
        if status.is_server_error() || status.as_u16() == 429 {
            return Err(SeoPilotError::transient(format!(
                "webhook {url} answered {status}"
            )));
        }
        if !status.is_success() {
            return Err(SeoPilotError::permanent(format!(
                "webhook {url} answered {status}"
            )));
        }
        Ok(HandlerOutcome::Complete(serde_json::json!({
            "delivered_to": url,
            "status": status.as_u16(),
        })))
    }
}
