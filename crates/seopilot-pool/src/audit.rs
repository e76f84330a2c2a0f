//! Audit trail implementations.

use std::sync::Mutex;

use seopilot_core::{AuditEvent, AuditLog};

/// Default trail: structured log lines. Ops pipe these into whatever retention
/// the deployment requires.
pub struct TracingAuditLog;

impl AuditLog for TracingAuditLog {
    fn append(&self, event: AuditEvent) {
        tracing::info!(
            target: "seopilot::audit",
            action = %event.action,
            task_id = %event.task_id,
            actor = event.actor.as_deref().unwrap_or("-"),
            detail = %event.detail,
            "audit"
        );
    }
}

/// In-memory trail for tests.
pub struct MemoryAuditLog {
    events: Mutex<Vec<AuditEvent>>,
}

impl MemoryAuditLog {
    pub fn new() -> Self {
        Self {
            events: Mutex::new(Vec::new()),
        }
    }

    pub fn events(&self) -> Vec<AuditEvent> {
        self.events.lock().unwrap().clone()
    }
}

impl Default for MemoryAuditLog {
    fn default() -> Self {
        Self::new()
    }
}

impl AuditLog for MemoryAuditLog {
    fn append(&self, event: AuditEvent) {
        self.events.lock().unwrap().push(event);
    }
}
