//! Authoritative task store — pure data plus atomic state transitions.
//!
//! Every mutation goes through one compare-and-swap primitive guarded by the
//! store mutex. Workers never share mutable task objects; they hold a lease
//! token issued on claim and present it for every subsequent write. Losing the
//! CAS is a `ConcurrencyConflict`, which callers treat as "someone else got it".

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{Duration, Utc};
use seopilot_core::{
    Checkpoint, Result, SeoPilotError, Task, TaskSpec, TaskStatus, ToolCall,
};

use crate::registry::HandlerRegistry;

/// Result of a cancel request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelOutcome {
    /// Task was pending/queued; it is now `Cancelled` and no handler will run.
    Cancelled,
    /// Task was in progress; the cooperative flag is set and the worker will
    /// finalize the cancellation when the handler yields.
    CancelRequested,
}

/// Counts by status, for the pool stats surface.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct StoreStats {
    pub pending: usize,
    pub queued: usize,
    pub in_progress: usize,
    pub requires_review: usize,
    pub completed: usize,
    pub failed: usize,
    pub cancelled: usize,
}

pub struct TaskStore {
    registry: Arc<HandlerRegistry>,
    tasks: Mutex<HashMap<String, Task>>,
    lease_counter: AtomicU64,
}

impl TaskStore {
    pub fn new(registry: Arc<HandlerRegistry>) -> Self {
        Self {
            registry,
            tasks: Mutex::new(HashMap::new()),
            lease_counter: AtomicU64::new(1),
        }
    }

    /// Create a task in `Pending`. Rejects unregistered agent names.
    pub fn create_task(&self, spec: TaskSpec) -> Result<Task> {
        if spec.agent_name.is_empty() {
            return Err(SeoPilotError::Validation("agent_name must not be empty".into()));
        }
        if !self.registry.contains(&spec.agent_name) {
            return Err(SeoPilotError::Validation(format!(
                "no handler registered for agent '{}'",
                spec.agent_name
            )));
        }
        let task = Task::from_spec(spec);
        tracing::debug!(task_id = %task.id, agent = %task.agent_name, "task created");
        self.tasks
            .lock()
            .unwrap()
            .insert(task.id.clone(), task.clone());
        Ok(task)
    }

    /// Snapshot of a task.
    pub fn get(&self, id: &str) -> Result<Task> {
        self.tasks
            .lock()
            .unwrap()
            .get(id)
            .cloned()
            .ok_or_else(|| SeoPilotError::NotFound(format!("task '{id}'")))
    }

    /// Snapshots, optionally filtered by the `workspace_id` context key.
    pub fn list(&self, workspace: Option<&str>) -> Vec<Task> {
        let tasks = self.tasks.lock().unwrap();
        let mut out: Vec<Task> = tasks
            .values()
            .filter(|t| match workspace {
                Some(ws) => t
                    .context
                    .get("workspace_id")
                    .and_then(|v| v.as_str())
                    .is_some_and(|v| v == ws),
                None => true,
            })
            .cloned()
            .collect();
        out.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        out
    }

    pub fn stats(&self) -> StoreStats {
        let tasks = self.tasks.lock().unwrap();
        let mut s = StoreStats::default();
        for t in tasks.values() {
            match t.status {
                TaskStatus::Pending => s.pending += 1,
                TaskStatus::Queued => s.queued += 1,
                TaskStatus::InProgress => s.in_progress += 1,
                TaskStatus::RequiresReview => s.requires_review += 1,
                TaskStatus::Completed => s.completed += 1,
                TaskStatus::Failed => s.failed += 1,
                TaskStatus::Cancelled => s.cancelled += 1,
            }
        }
        s
    }

    /// Core of the CAS: legality checks plus status side effects, applied to a
    /// task already under the store lock. Fails without side effects.
    fn cas_locked(
        lease_counter: &AtomicU64,
        task: &mut Task,
        from: TaskStatus,
        to: TaskStatus,
    ) -> Result<()> {
        if from.is_terminal() || !from.can_transition_to(to) {
            return Err(SeoPilotError::InvalidStateTransition(format!(
                "task '{}': {from} -> {to} is not a legal transition",
                task.id
            )));
        }
        if task.status != from {
            if task.status.is_terminal() {
                return Err(SeoPilotError::InvalidStateTransition(format!(
                    "task '{}' is terminal ({})",
                    task.id, task.status
                )));
            }
            return Err(SeoPilotError::ConcurrencyConflict(format!(
                "task '{}' is {}, expected {from}",
                task.id, task.status
            )));
        }

        task.status = to;
        match to {
            TaskStatus::InProgress => {
                if task.started_at.is_none() {
                    task.started_at = Some(Utc::now());
                }
                task.lease = Some(lease_counter.fetch_add(1, Ordering::Relaxed));
            }
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled => {
                task.completed_at = Some(Utc::now());
                task.lease = None;
            }
            _ => {
                task.lease = None;
            }
        }
        tracing::debug!(task_id = %task.id, %from, %to, "task transition");
        Ok(())
    }

    /// The sole mutation primitive: update only if the stored status equals
    /// `from`, applying `apply` to the task inside the same critical section.
    pub(crate) fn cas_apply(
        &self,
        id: &str,
        from: TaskStatus,
        to: TaskStatus,
        apply: impl FnOnce(&mut Task),
    ) -> Result<Task> {
        let mut tasks = self.tasks.lock().unwrap();
        let task = tasks
            .get_mut(id)
            .ok_or_else(|| SeoPilotError::NotFound(format!("task '{id}'")))?;
        Self::cas_locked(&self.lease_counter, task, from, to)?;
        apply(task);
        Ok(task.clone())
    }

    /// Public CAS without side payload.
    pub fn transition(&self, id: &str, from: TaskStatus, to: TaskStatus) -> Result<()> {
        self.cas_apply(id, from, to, |_| {}).map(|_| ())
    }

    /// Claim a queued task for execution: `Queued -> InProgress`, issuing a
    /// fresh lease. Exactly one caller can win this per dispatch.
    pub fn claim(&self, id: &str) -> Result<(Task, u64)> {
        let task = self.cas_apply(id, TaskStatus::Queued, TaskStatus::InProgress, |_| {})?;
        let lease = task.lease.ok_or_else(|| {
            SeoPilotError::ConcurrencyConflict(format!("task '{id}' lost its lease during claim"))
        })?;
        Ok((task, lease))
    }

    fn check_lease(task: &Task, lease: u64) -> Result<()> {
        if task.lease != Some(lease) {
            return Err(SeoPilotError::ConcurrencyConflict(format!(
                "task '{}': lease {lease} is no longer current",
                task.id
            )));
        }
        Ok(())
    }

    /// Lease-checked CAS used by the worker finalization paths.
    fn cas_with_lease(
        &self,
        id: &str,
        lease: u64,
        from: TaskStatus,
        to: TaskStatus,
        apply: impl FnOnce(&mut Task),
    ) -> Result<Task> {
        let mut tasks = self.tasks.lock().unwrap();
        let task = tasks
            .get_mut(id)
            .ok_or_else(|| SeoPilotError::NotFound(format!("task '{id}'")))?;
        Self::check_lease(task, lease)?;
        Self::cas_locked(&self.lease_counter, task, from, to)?;
        apply(task);
        Ok(task.clone())
    }

    /// Finish successfully, storing the result.
    pub fn complete(&self, id: &str, lease: u64, result: serde_json::Value) -> Result<()> {
        self.cas_with_lease(id, lease, TaskStatus::InProgress, TaskStatus::Completed, |t| {
            t.result = Some(result);
        })
        .map(|_| ())
    }

    /// Finish with a terminal failure, recording the last error verbatim.
    pub fn fail(&self, id: &str, lease: u64, error: String) -> Result<()> {
        self.cas_with_lease(id, lease, TaskStatus::InProgress, TaskStatus::Failed, |t| {
            t.error = Some(error);
        })
        .map(|_| ())
    }

    /// Park the task for human review, retaining any partial result.
    pub fn mark_review(
        &self,
        id: &str,
        lease: u64,
        result: Option<serde_json::Value>,
    ) -> Result<()> {
        self.cas_with_lease(
            id,
            lease,
            TaskStatus::InProgress,
            TaskStatus::RequiresReview,
            |t| {
                if result.is_some() {
                    t.result = result;
                }
            },
        )
        .map(|_| ())
    }

    /// Finalize a cooperative cancellation observed by the worker.
    pub fn finish_cancelled(
        &self,
        id: &str,
        lease: u64,
        result: Option<serde_json::Value>,
    ) -> Result<()> {
        self.cas_with_lease(id, lease, TaskStatus::InProgress, TaskStatus::Cancelled, |t| {
            if result.is_some() {
                t.result = result;
            }
        })
        .map(|_| ())
    }

    /// Cancel a task. Pending/queued tasks cancel synchronously; in-progress
    /// tasks get the cooperative flag set instead (best-effort, the handler
    /// polls it between checkpoints). Any other state is rejected.
    pub fn cancel(&self, id: &str) -> Result<CancelOutcome> {
        let status = self.get(id)?.status;
        match status {
            TaskStatus::Pending | TaskStatus::Queued => {
                match self.cas_apply(id, status, TaskStatus::Cancelled, |_| {}) {
                    Ok(_) => Ok(CancelOutcome::Cancelled),
                    // Lost the race (e.g. a worker claimed it between the read
                    // and the CAS) — retry once against the new state.
                    Err(SeoPilotError::ConcurrencyConflict(_)) => self.cancel(id),
                    Err(e) => Err(e),
                }
            }
            TaskStatus::InProgress => {
                let mut tasks = self.tasks.lock().unwrap();
                let task = tasks
                    .get_mut(id)
                    .ok_or_else(|| SeoPilotError::NotFound(format!("task '{id}'")))?;
                task.cancel_requested = true;
                tracing::info!(task_id = %id, "cooperative cancellation requested");
                Ok(CancelOutcome::CancelRequested)
            }
            other => Err(SeoPilotError::InvalidStateTransition(format!(
                "task '{id}' cannot be cancelled from {other}"
            ))),
        }
    }

    /// Whether a cooperative cancel has been requested.
    pub fn cancel_requested(&self, id: &str) -> bool {
        self.tasks
            .lock()
            .unwrap()
            .get(id)
            .map(|t| t.cancel_requested)
            .unwrap_or(false)
    }

    /// Append a progress checkpoint. Only the current lease holder may append;
    /// timestamps are strictly increasing (bumped by 1ms if the clock stalls).
    pub fn append_checkpoint(
        &self,
        id: &str,
        lease: u64,
        state: &str,
        content: &str,
        tool_calls: Vec<ToolCall>,
    ) -> Result<()> {
        let mut tasks = self.tasks.lock().unwrap();
        let task = tasks
            .get_mut(id)
            .ok_or_else(|| SeoPilotError::NotFound(format!("task '{id}'")))?;
        if task.status != TaskStatus::InProgress {
            return Err(SeoPilotError::InvalidStateTransition(format!(
                "task '{id}' is {}; checkpoints require in_progress",
                task.status
            )));
        }
        Self::check_lease(task, lease)?;

        let mut timestamp = Utc::now();
        if let Some(last) = task.checkpoints.last() {
            if timestamp <= last.timestamp {
                timestamp = last.timestamp + Duration::milliseconds(1);
            }
        }
        task.checkpoints.push(Checkpoint {
            id: uuid::Uuid::new_v4().to_string(),
            timestamp,
            state: state.to_string(),
            content: content.to_string(),
            tool_calls,
        });
        Ok(())
    }
}
