//! Bounded worker pool pulling the shared priority queue.
//!
//! N homogeneous workers race on claims; the store's CAS guarantees one winner
//! per task, so losing a claim is routine and logged at debug. Workers own the
//! whole attempt loop for a claimed task: approval parking, timeout
//! enforcement, retries with backoff, and the terminal transition.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use seopilot_core::{
    AlertEvent, AlertSink, AuditEvent, AuditLog, PoolConfig, Result, SeoPilotError, Task, TaskSpec,
};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::timeout;

use crate::checkpoint::CheckpointRecorder;
use crate::queue::TaskQueue;
use crate::registry::{HandlerContext, HandlerOutcome, HandlerRegistry};
use crate::retry::RetryPolicy;
use crate::store::{CancelOutcome, StoreStats, TaskStore};

/// Point-in-time pool counters for the stats surface.
#[derive(Debug, Clone, serde::Serialize)]
pub struct PoolStats {
    pub max_workers: usize,
    pub queue_depth: usize,
    pub agents: Vec<String>,
    pub tasks: StoreStats,
}

pub struct AgentPool {
    store: Arc<TaskStore>,
    queue: Arc<TaskQueue>,
    registry: Arc<HandlerRegistry>,
    retry: RetryPolicy,
    handler_timeout: Duration,
    max_workers: usize,
    alerts: Arc<dyn AlertSink>,
    audit: Arc<dyn AuditLog>,
    shutdown: watch::Sender<bool>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl AgentPool {
    pub fn new(
        cfg: &PoolConfig,
        registry: Arc<HandlerRegistry>,
        store: Arc<TaskStore>,
        queue: Arc<TaskQueue>,
        alerts: Arc<dyn AlertSink>,
        audit: Arc<dyn AuditLog>,
    ) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            store,
            queue,
            registry,
            retry: RetryPolicy::from_config(cfg),
            handler_timeout: Duration::from_secs(cfg.handler_timeout_secs),
            max_workers: cfg.max_workers.max(1),
            alerts,
            audit,
            shutdown,
            workers: Mutex::new(Vec::new()),
        }
    }

    pub fn store(&self) -> Arc<TaskStore> {
        self.store.clone()
    }

    pub fn queue(&self) -> Arc<TaskQueue> {
        self.queue.clone()
    }

    /// Create a task and enqueue it for dispatch.
    pub fn submit(&self, spec: TaskSpec) -> Result<Task> {
        let task = self.store.create_task(spec)?;
        self.store.transition(
            &task.id,
            seopilot_core::TaskStatus::Pending,
            seopilot_core::TaskStatus::Queued,
        )?;
        self.queue.push(&task.id, task.priority);
        tracing::info!(task_id = %task.id, agent = %task.agent_name, priority = %task.priority, "task enqueued");
        self.store.get(&task.id)
    }

    /// Cancel a task. Goes through the pool rather than the store directly so
    /// a synchronous cancel of a pending/queued task lands in the audit log;
    /// cooperative cancellations are audited by the worker when finalized.
    pub fn cancel(&self, task_id: &str) -> Result<CancelOutcome> {
        let outcome = self.store.cancel(task_id)?;
        if outcome == CancelOutcome::Cancelled {
            self.audit.append(AuditEvent::new(
                "cancelled",
                task_id,
                None,
                "cancelled before dispatch",
            ));
        }
        Ok(outcome)
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            max_workers: self.max_workers,
            queue_depth: self.queue.len(),
            agents: self.registry.agent_names(),
            tasks: self.store.stats(),
        }
    }

    /// Spawn the worker set. Idempotent per pool instance; call once.
    pub fn start(self: &Arc<Self>) {
        let mut workers = self.workers.lock().unwrap();
        if !workers.is_empty() {
            return;
        }
        for worker_id in 0..self.max_workers {
            let pool = self.clone();
            workers.push(tokio::spawn(async move {
                pool.worker_loop(worker_id).await;
            }));
        }
        tracing::info!(workers = self.max_workers, "agent pool started");
    }

    /// Stop accepting work and wait for in-flight tasks to finish.
    pub async fn stop(&self) {
        let _ = self.shutdown.send(true);
        self.queue.wake_all();
        let handles: Vec<_> = self.workers.lock().unwrap().drain(..).collect();
        for handle in handles {
            let _ = handle.await;
        }
        tracing::info!("agent pool stopped");
    }

    async fn worker_loop(&self, worker_id: usize) {
        let mut shutdown = self.shutdown.subscribe();
        tracing::debug!(worker_id, "worker up");
        loop {
            if *shutdown.borrow() {
                break;
            }
            match self.queue.pop() {
                Some(task_id) => self.run_task(worker_id, &task_id).await,
                None => {
                    tokio::select! {
                        _ = self.queue.wait() => {}
                        _ = shutdown.changed() => {}
                    }
                }
            }
        }
        tracing::debug!(worker_id, "worker down");
    }

    /// Drive one claimed task to a parked or terminal state.
    async fn run_task(&self, worker_id: usize, task_id: &str) {
        let (task, lease) = match self.store.claim(task_id) {
            Ok(claimed) => claimed,
            // Routine: cancelled while queued, or another worker won.
            Err(SeoPilotError::ConcurrencyConflict(_))
            | Err(SeoPilotError::InvalidStateTransition(_)) => {
                tracing::debug!(worker_id, task_id, "claim lost, skipping");
                return;
            }
            Err(e) => {
                tracing::warn!(worker_id, task_id, error = %e, "claim failed");
                return;
            }
        };

        // Approval gate: park before the handler ever runs. The approve path
        // clears the flag, so a re-dispatched task falls through.
        if task.requires_approval && task.approved_by.is_none() {
            if let Err(e) = self.store.mark_review(task_id, lease, None) {
                tracing::warn!(worker_id, task_id, error = %e, "failed to park task for review");
                return;
            }
            tracing::info!(worker_id, task_id, agent = %task.agent_name, "task parked for approval");
            self.alerts
                .send_alert(AlertEvent::needs_review(task_id, &task.agent_name));
            return;
        }

        let handler = match self.registry.resolve(&task.agent_name) {
            Ok(h) => h,
            Err(e) => {
                // Registered at creation but gone now; nothing to retry.
                let _ = self.store.fail(task_id, lease, e.to_string());
                self.finish_failed(&task, &e.to_string());
                return;
            }
        };

        let mut attempt: u32 = 1;
        loop {
            if self.store.cancel_requested(task_id) {
                if self.store.finish_cancelled(task_id, lease, None).is_ok() {
                    tracing::info!(worker_id, task_id, "task cancelled before attempt {attempt}");
                    self.audit.append(AuditEvent::new(
                        "cancelled",
                        task_id,
                        None,
                        "cooperative cancellation honored",
                    ));
                }
                return;
            }

            let ctx = HandlerContext {
                task_id: task_id.to_string(),
                agent_name: task.agent_name.clone(),
                context: task.context.clone(),
                attempt,
            };
            let sink = CheckpointRecorder::new(self.store.clone(), task_id.to_string(), lease);

            let outcome = match timeout(self.handler_timeout, handler.run(ctx, sink)).await {
                Ok(result) => result,
                Err(_) => Err(SeoPilotError::Timeout(self.handler_timeout.as_secs())),
            };

            match outcome {
                Ok(HandlerOutcome::Complete(value)) => {
                    // A cancel that landed mid-run wins; the result is kept on
                    // the task for diagnostics.
                    if self.store.cancel_requested(task_id) {
                        if self
                            .store
                            .finish_cancelled(task_id, lease, Some(value))
                            .is_ok()
                        {
                            tracing::info!(worker_id, task_id, "task cancelled during final attempt");
                            self.audit.append(AuditEvent::new(
                                "cancelled",
                                task_id,
                                None,
                                "cooperative cancellation honored",
                            ));
                        }
                        return;
                    }
                    let _ = self.store.append_checkpoint(
                        task_id,
                        lease,
                        "result",
                        &format!("attempt {attempt} succeeded"),
                        vec![],
                    );
                    if let Err(e) = self.store.complete(task_id, lease, value) {
                        tracing::warn!(worker_id, task_id, error = %e, "completion lost");
                        return;
                    }
                    tracing::info!(worker_id, task_id, agent = %task.agent_name, attempt, "task completed");
                    self.audit.append(AuditEvent::new(
                        "completed",
                        task_id,
                        None,
                        &format!("succeeded on attempt {attempt}"),
                    ));
                    return;
                }
                Ok(HandlerOutcome::NeedsReview(value)) => {
                    // A pending cancel wins over parking; otherwise the flag
                    // would survive into review and instantly cancel a later
                    // approved run.
                    if self.store.cancel_requested(task_id) {
                        if self
                            .store
                            .finish_cancelled(task_id, lease, Some(value))
                            .is_ok()
                        {
                            tracing::info!(worker_id, task_id, "task cancelled instead of parking for review");
                            self.audit.append(AuditEvent::new(
                                "cancelled",
                                task_id,
                                None,
                                "cooperative cancellation honored",
                            ));
                        }
                        return;
                    }
                    if let Err(e) = self.store.mark_review(task_id, lease, Some(value)) {
                        tracing::warn!(worker_id, task_id, error = %e, "review parking lost");
                        return;
                    }
                    tracing::info!(worker_id, task_id, agent = %task.agent_name, "handler requested review");
                    self.alerts
                        .send_alert(AlertEvent::needs_review(task_id, &task.agent_name));
                    return;
                }
                Err(e) => {
                    let _ = self.store.append_checkpoint(
                        task_id,
                        lease,
                        "error",
                        &format!("attempt {attempt} failed: {e}"),
                        vec![],
                    );

                    if self.store.cancel_requested(task_id) {
                        if self.store.finish_cancelled(task_id, lease, None).is_ok() {
                            tracing::info!(worker_id, task_id, "task cancelled after failed attempt");
                            self.audit.append(AuditEvent::new(
                                "cancelled",
                                task_id,
                                None,
                                "cooperative cancellation honored",
                            ));
                        }
                        return;
                    }

                    if self.retry.should_retry(&e, attempt) {
                        let delay = self.retry.backoff(attempt + 1);
                        tracing::warn!(
                            worker_id, task_id, attempt, error = %e,
                            delay_ms = delay.as_millis() as u64,
                            "transient failure, backing off"
                        );
                        tokio::time::sleep(delay).await;
                        attempt += 1;
                        continue;
                    }

                    if self.store.fail(task_id, lease, e.to_string()).is_err() {
                        tracing::warn!(worker_id, task_id, "failure transition lost");
                        return;
                    }
                    tracing::error!(worker_id, task_id, agent = %task.agent_name, attempt, error = %e, "task failed");
                    self.finish_failed(&task, &e.to_string());
                    return;
                }
            }
        }
    }

    fn finish_failed(&self, task: &Task, error: &str) {
        self.alerts
            .send_alert(AlertEvent::task_failed(&task.id, &task.agent_name, error));
        self.audit
            .append(AuditEvent::new("failed", &task.id, None, error));
    }
}
