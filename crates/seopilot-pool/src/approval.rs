//! Human approval gate for review-parked tasks.
//!
//! Only tasks sitting in `requires_review` are eligible. Approval sends the
//! task back through the normal dispatch path (`pending` then re-enqueue), so
//! an approved run is indistinguishable from a fresh one apart from the
//! approval stamp. Rejection is terminal.

use std::sync::Arc;

use chrono::Utc;
use seopilot_core::{
    ApprovalConfig, AuditEvent, AuditLog, Result, SeoPilotError, Task, TaskStatus,
};

use crate::queue::TaskQueue;
use crate::store::TaskStore;

/// Losing the review-state CAS means the task is simply not awaiting review;
/// the conflict variant stays internal to the dispatcher.
fn not_awaiting_review(e: SeoPilotError) -> SeoPilotError {
    match e {
        SeoPilotError::ConcurrencyConflict(msg) => SeoPilotError::InvalidStateTransition(msg),
        other => other,
    }
}

pub struct ApprovalGate {
    store: Arc<TaskStore>,
    queue: Arc<TaskQueue>,
    audit: Arc<dyn AuditLog>,
    approvals: ApprovalConfig,
}

impl ApprovalGate {
    pub fn new(
        store: Arc<TaskStore>,
        queue: Arc<TaskQueue>,
        audit: Arc<dyn AuditLog>,
        approvals: ApprovalConfig,
    ) -> Self {
        Self {
            store,
            queue,
            audit,
            approvals,
        }
    }

    fn check_permitted(&self, approver: &str) -> Result<()> {
        if approver.is_empty() {
            return Err(SeoPilotError::Validation("approver must not be empty".into()));
        }
        if !self.approvals.is_permitted(approver) {
            return Err(SeoPilotError::Unauthorized(format!(
                "'{approver}' is not a configured approver"
            )));
        }
        Ok(())
    }

    /// Approve a review-parked task: stamp the approver and put the task back
    /// in line at its original priority.
    pub fn approve(&self, task_id: &str, approver: &str) -> Result<Task> {
        self.check_permitted(approver)?;

        let task = self
            .store
            .cas_apply(
                task_id,
                TaskStatus::RequiresReview,
                TaskStatus::Pending,
                |t| {
                    t.approved_by = Some(approver.to_string());
                    t.approved_at = Some(Utc::now());
                    // The gate has been consumed; re-dispatch runs the handler.
                    t.requires_approval = false;
                },
            )
            .map_err(not_awaiting_review)?;

        self.store
            .transition(task_id, TaskStatus::Pending, TaskStatus::Queued)?;
        self.queue.push(task_id, task.priority);

        tracing::info!(task_id = %task_id, approver = %approver, "task approved");
        self.audit.append(AuditEvent::new(
            "approved",
            task_id,
            Some(approver),
            &format!("re-enqueued at priority {}", task.priority),
        ));
        self.store.get(task_id)
    }

    /// Reject a review-parked task with a mandatory reason. Terminal.
    pub fn reject(&self, task_id: &str, approver: &str, reason: &str) -> Result<Task> {
        self.check_permitted(approver)?;
        if reason.trim().is_empty() {
            return Err(SeoPilotError::Validation(
                "rejection reason must not be empty".into(),
            ));
        }

        let task = self
            .store
            .cas_apply(
                task_id,
                TaskStatus::RequiresReview,
                TaskStatus::Cancelled,
                |t| {
                    t.rejected_by = Some(approver.to_string());
                    t.rejected_at = Some(Utc::now());
                    t.rejection_reason = Some(reason.to_string());
                },
            )
            .map_err(not_awaiting_review)?;

        tracing::info!(task_id = %task_id, approver = %approver, "task rejected");
        self.audit.append(AuditEvent::new(
            "rejected",
            task_id,
            Some(approver),
            reason,
        ));
        Ok(task)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::MemoryAuditLog;
    use crate::registry::{AgentHandler, HandlerContext, HandlerOutcome, HandlerRegistry};
    use async_trait::async_trait;
    use seopilot_core::TaskSpec;

    struct NoopHandler;

    #[async_trait]
    impl AgentHandler for NoopHandler {
        async fn run(
            &self,
            _ctx: HandlerContext,
            _sink: crate::checkpoint::CheckpointRecorder,
        ) -> Result<HandlerOutcome> {
            Ok(HandlerOutcome::Complete(serde_json::Value::Null))
        }
    }

    fn fixture() -> (Arc<TaskStore>, Arc<TaskQueue>, Arc<MemoryAuditLog>) {
        let registry = Arc::new(HandlerRegistry::new());
        registry.register("seo-audit", Arc::new(NoopHandler));
        (
            Arc::new(TaskStore::new(registry)),
            Arc::new(TaskQueue::new()),
            Arc::new(MemoryAuditLog::new()),
        )
    }

    fn parked_task(store: &TaskStore) -> String {
        let task = store
            .create_task(TaskSpec {
                agent_name: "seo-audit".into(),
                requires_approval: true,
                ..Default::default()
            })
            .unwrap();
        store
            .transition(&task.id, TaskStatus::Pending, TaskStatus::Queued)
            .unwrap();
        let (_, lease) = store.claim(&task.id).unwrap();
        store.mark_review(&task.id, lease, None).unwrap();
        task.id
    }

    #[test]
    fn test_approve_re_enqueues_and_stamps() {
        let (store, queue, audit) = fixture();
        let id = parked_task(&store);
        let gate = ApprovalGate::new(
            store.clone(),
            queue.clone(),
            audit.clone(),
            ApprovalConfig::default(),
        );

        let task = gate.approve(&id, "ops@example.com").unwrap();
        assert_eq!(task.status, TaskStatus::Queued);
        assert_eq!(task.approved_by.as_deref(), Some("ops@example.com"));
        assert!(task.approved_at.is_some());
        assert!(!task.requires_approval);
        assert_eq!(queue.pop().as_deref(), Some(id.as_str()));
        assert_eq!(audit.events()[0].action, "approved");
    }

    #[test]
    fn test_reject_is_terminal_and_needs_reason() {
        let (store, queue, audit) = fixture();
        let id = parked_task(&store);
        let gate = ApprovalGate::new(store.clone(), queue, audit, ApprovalConfig::default());

        let err = gate.reject(&id, "ops@example.com", "  ").unwrap_err();
        assert!(matches!(err, SeoPilotError::Validation(_)));

        let task = gate.reject(&id, "ops@example.com", "scope too broad").unwrap();
        assert_eq!(task.status, TaskStatus::Cancelled);
        assert_eq!(task.rejection_reason.as_deref(), Some("scope too broad"));

        // Terminal: a second decision is rejected.
        let err = gate.approve(&id, "ops@example.com").unwrap_err();
        assert!(matches!(err, SeoPilotError::InvalidStateTransition(_)));
    }

    #[test]
    fn test_approve_requires_review_state() {
        let (store, queue, audit) = fixture();
        let task = store
            .create_task(TaskSpec {
                agent_name: "seo-audit".into(),
                ..Default::default()
            })
            .unwrap();
        let gate = ApprovalGate::new(store, queue, audit, ApprovalConfig::default());

        let err = gate.approve(&task.id, "ops@example.com").unwrap_err();
        assert!(matches!(err, SeoPilotError::InvalidStateTransition(_)));
    }

    #[test]
    fn test_unlisted_approver_is_unauthorized() {
        let (store, queue, audit) = fixture();
        let id = parked_task(&store);
        let gate = ApprovalGate::new(
            store,
            queue,
            audit,
            ApprovalConfig {
                approvers: vec!["ops@example.com".into()],
            },
        );

        let err = gate.approve(&id, "stranger@example.com").unwrap_err();
        assert!(matches!(err, SeoPilotError::Unauthorized(_)));
    }
}
