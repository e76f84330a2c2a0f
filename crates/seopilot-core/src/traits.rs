//! Collaborator interfaces the orchestration core consumes.
//!
//! Implementations live at the edges (pool crate ships webhook/tracing
//! defaults); the core only ever calls through these traits.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// An event worth alerting a human about.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertEvent {
    /// "task_failed" or "task_needs_review".
    pub kind: String,
    pub task_id: String,
    pub agent_name: String,
    pub detail: String,
    pub timestamp: DateTime<Utc>,
}

impl AlertEvent {
    pub fn task_failed(task_id: &str, agent_name: &str, error: &str) -> Self {
        Self {
            kind: "task_failed".into(),
            task_id: task_id.into(),
            agent_name: agent_name.into(),
            detail: error.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn needs_review(task_id: &str, agent_name: &str) -> Self {
        Self {
            kind: "task_needs_review".into(),
            task_id: task_id.into(),
            agent_name: agent_name.into(),
            detail: "task is waiting for human review".into(),
            timestamp: Utc::now(),
        }
    }
}

/// Fire-and-forget notification sink. Invoked on terminal `failed` status and
/// on `requires_review` entry. Must never block or fail the caller.
pub trait AlertSink: Send + Sync {
    fn send_alert(&self, event: AlertEvent);
}

/// A compliance-trail entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    /// "approved", "rejected", "completed", "failed", "cancelled".
    pub action: String,
    pub task_id: String,
    /// Human actor for approve/reject; None for worker-driven transitions.
    pub actor: Option<String>,
    pub detail: String,
    pub timestamp: DateTime<Utc>,
}

impl AuditEvent {
    pub fn new(action: &str, task_id: &str, actor: Option<&str>, detail: &str) -> Self {
        Self {
            action: action.into(),
            task_id: task_id.into(),
            actor: actor.map(String::from),
            detail: detail.into(),
            timestamp: Utc::now(),
        }
    }
}

/// Append-only audit trail. Invoked on every approve/reject and every terminal
/// transition.
pub trait AuditLog: Send + Sync {
    fn append(&self, event: AuditEvent);
}
