//! End-to-end pool behavior: dispatch, retries, approvals, cancellation.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use seopilot_core::{
    AlertEvent, AlertSink, ApprovalConfig, PoolConfig, Result, SeoPilotError, Task, TaskPriority,
    TaskSpec, TaskStatus,
};
use seopilot_pool::{
    AgentHandler, AgentPool, ApprovalGate, CancelOutcome, CheckpointRecorder, HandlerContext,
    HandlerOutcome, HandlerRegistry, MemoryAuditLog, TaskQueue, TaskStore,
};

struct MemoryAlerts {
    events: std::sync::Mutex<Vec<AlertEvent>>,
}

impl MemoryAlerts {
    fn new() -> Self {
        Self {
            events: std::sync::Mutex::new(Vec::new()),
        }
    }

    fn kinds(&self) -> Vec<String> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .map(|e| e.kind.clone())
            .collect()
    }
}

impl AlertSink for MemoryAlerts {
    fn send_alert(&self, event: AlertEvent) {
        self.events.lock().unwrap().push(event);
    }
}

struct Fixture {
    pool: Arc<AgentPool>,
    store: Arc<TaskStore>,
    queue: Arc<TaskQueue>,
    alerts: Arc<MemoryAlerts>,
    audit: Arc<MemoryAuditLog>,
}

fn fixture_with(cfg: PoolConfig, agents: Vec<(&str, Arc<dyn AgentHandler>)>) -> Fixture {
    let registry = Arc::new(HandlerRegistry::new());
    for (name, handler) in agents {
        registry.register(name, handler);
    }
    let store = Arc::new(TaskStore::new(registry.clone()));
    let queue = Arc::new(TaskQueue::new());
    let alerts = Arc::new(MemoryAlerts::new());
    let audit = Arc::new(MemoryAuditLog::new());
    let pool = Arc::new(AgentPool::new(
        &cfg,
        registry,
        store.clone(),
        queue.clone(),
        alerts.clone(),
        audit.clone(),
    ));
    Fixture {
        pool,
        store,
        queue,
        alerts,
        audit,
    }
}

fn quick_config() -> PoolConfig {
    PoolConfig {
        max_workers: 2,
        handler_timeout_secs: 5,
        max_attempts: 3,
        base_backoff_ms: 10,
    }
}

fn spec(agent: &str) -> TaskSpec {
    TaskSpec {
        agent_name: agent.into(),
        priority: TaskPriority::Medium,
        context: HashMap::new(),
        requires_approval: false,
    }
}

async fn wait_for_status(store: &TaskStore, id: &str, status: TaskStatus) -> Task {
    for _ in 0..500 {
        let task = store.get(id).unwrap();
        if task.status == status {
            return task;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!(
        "task {id} never reached {status:?}, stuck at {:?}",
        store.get(id).unwrap().status
    );
}

struct EchoHandler;

#[async_trait]
impl AgentHandler for EchoHandler {
    async fn run(&self, ctx: HandlerContext, sink: CheckpointRecorder) -> Result<HandlerOutcome> {
        sink.record("thinking", "starting")?;
        Ok(HandlerOutcome::Complete(serde_json::json!({
            "agent": ctx.agent_name,
        })))
    }
}

#[tokio::test]
async fn test_submit_runs_to_completion() {
    let fx = fixture_with(quick_config(), vec![("echo", Arc::new(EchoHandler))]);
    fx.pool.start();

    let task = fx.pool.submit(spec("echo")).unwrap();
    assert_eq!(task.status, TaskStatus::Queued);

    let done = wait_for_status(&fx.store, &task.id, TaskStatus::Completed).await;
    assert_eq!(done.result.unwrap()["agent"], "echo");
    assert!(done.started_at.is_some());
    assert!(done.completed_at.is_some());
    // Handler checkpoint plus the worker's success checkpoint.
    assert_eq!(done.checkpoints.len(), 2);
    assert_eq!(done.checkpoints[0].state, "thinking");
    assert_eq!(done.checkpoints[1].state, "result");

    assert!(fx.audit.events().iter().any(|e| e.action == "completed"));
    fx.pool.stop().await;
}

struct FlakyHandler {
    calls: AtomicU32,
    fail_first: u32,
}

#[async_trait]
impl AgentHandler for FlakyHandler {
    async fn run(&self, _ctx: HandlerContext, _sink: CheckpointRecorder) -> Result<HandlerOutcome> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if call <= self.fail_first {
            Err(SeoPilotError::transient(format!("503 on call {call}")))
        } else {
            Ok(HandlerOutcome::Complete(serde_json::json!({"call": call})))
        }
    }
}

#[tokio::test]
async fn test_transient_failures_retry_then_succeed() {
    let handler = Arc::new(FlakyHandler {
        calls: AtomicU32::new(0),
        fail_first: 2,
    });
    let fx = fixture_with(quick_config(), vec![("flaky", handler.clone())]);
    fx.pool.start();

    let task = fx.pool.submit(spec("flaky")).unwrap();
    let done = wait_for_status(&fx.store, &task.id, TaskStatus::Completed).await;

    assert_eq!(handler.calls.load(Ordering::SeqCst), 3);
    assert_eq!(done.result.unwrap()["call"], 3);
    // One checkpoint per attempt: two failures, one success.
    assert_eq!(done.checkpoints.len(), 3);
    assert_eq!(done.checkpoints[0].state, "error");
    assert_eq!(done.checkpoints[1].state, "error");
    assert_eq!(done.checkpoints[2].state, "result");
    fx.pool.stop().await;
}

#[tokio::test]
async fn test_transient_budget_exhaustion_fails() {
    let handler = Arc::new(FlakyHandler {
        calls: AtomicU32::new(0),
        fail_first: 10,
    });
    let fx = fixture_with(quick_config(), vec![("flaky", handler.clone())]);
    fx.pool.start();

    let task = fx.pool.submit(spec("flaky")).unwrap();
    let done = wait_for_status(&fx.store, &task.id, TaskStatus::Failed).await;

    assert_eq!(handler.calls.load(Ordering::SeqCst), 3);
    assert!(done.error.unwrap().contains("503"));
    assert_eq!(fx.alerts.kinds(), vec!["task_failed".to_string()]);
    assert!(fx.audit.events().iter().any(|e| e.action == "failed"));
    fx.pool.stop().await;
}

struct BrokenHandler;

#[async_trait]
impl AgentHandler for BrokenHandler {
    async fn run(&self, _ctx: HandlerContext, _sink: CheckpointRecorder) -> Result<HandlerOutcome> {
        Err(SeoPilotError::permanent("config is invalid"))
    }
}

#[tokio::test]
async fn test_permanent_failure_skips_retries() {
    let fx = fixture_with(quick_config(), vec![("broken", Arc::new(BrokenHandler))]);
    fx.pool.start();

    let task = fx.pool.submit(spec("broken")).unwrap();
    let done = wait_for_status(&fx.store, &task.id, TaskStatus::Failed).await;

    // A single attempt, a single error checkpoint.
    assert_eq!(done.checkpoints.len(), 1);
    assert!(done.error.unwrap().contains("config is invalid"));
    fx.pool.stop().await;
}

struct GatedInvocations {
    invocations: AtomicU32,
}

#[async_trait]
impl AgentHandler for GatedInvocations {
    async fn run(&self, _ctx: HandlerContext, _sink: CheckpointRecorder) -> Result<HandlerOutcome> {
        self.invocations.fetch_add(1, Ordering::SeqCst);
        Ok(HandlerOutcome::Complete(serde_json::json!({"ran": true})))
    }
}

#[tokio::test]
async fn test_approval_gate_parks_then_approve_runs() {
    let handler = Arc::new(GatedInvocations {
        invocations: AtomicU32::new(0),
    });
    let fx = fixture_with(quick_config(), vec![("gated", handler.clone())]);
    fx.pool.start();

    let mut s = spec("gated");
    s.requires_approval = true;
    let task = fx.pool.submit(s).unwrap();

    let parked = wait_for_status(&fx.store, &task.id, TaskStatus::RequiresReview).await;
    // Parked before the handler ever ran.
    assert_eq!(handler.invocations.load(Ordering::SeqCst), 0);
    assert!(parked.approved_by.is_none());
    assert_eq!(fx.alerts.kinds(), vec!["task_needs_review".to_string()]);

    let gate = ApprovalGate::new(
        fx.store.clone(),
        fx.queue.clone(),
        fx.audit.clone(),
        ApprovalConfig::default(),
    );
    gate.approve(&task.id, "ops@example.com").unwrap();

    let done = wait_for_status(&fx.store, &task.id, TaskStatus::Completed).await;
    assert_eq!(handler.invocations.load(Ordering::SeqCst), 1);
    assert_eq!(done.approved_by.as_deref(), Some("ops@example.com"));
    fx.pool.stop().await;
}

#[tokio::test]
async fn test_rejection_is_terminal() {
    let fx = fixture_with(
        quick_config(),
        vec![(
            "gated",
            Arc::new(GatedInvocations {
                invocations: AtomicU32::new(0),
            }) as Arc<dyn AgentHandler>,
        )],
    );
    fx.pool.start();

    let mut s = spec("gated");
    s.requires_approval = true;
    let task = fx.pool.submit(s).unwrap();
    wait_for_status(&fx.store, &task.id, TaskStatus::RequiresReview).await;

    let gate = ApprovalGate::new(
        fx.store.clone(),
        fx.queue.clone(),
        fx.audit.clone(),
        ApprovalConfig::default(),
    );
    let rejected = gate
        .reject(&task.id, "ops@example.com", "not this quarter")
        .unwrap();
    assert_eq!(rejected.status, TaskStatus::Cancelled);
    assert_eq!(rejected.rejected_by.as_deref(), Some("ops@example.com"));

    let err = fx.store.cancel(&task.id).unwrap_err();
    assert!(matches!(err, SeoPilotError::InvalidStateTransition(_)));
    fx.pool.stop().await;
}

struct LoopingHandler {
    entered: Arc<AtomicBool>,
}

#[async_trait]
impl AgentHandler for LoopingHandler {
    async fn run(&self, _ctx: HandlerContext, sink: CheckpointRecorder) -> Result<HandlerOutcome> {
        self.entered.store(true, Ordering::SeqCst);
        for i in 0..1000 {
            if sink.is_cancelled() {
                return Ok(HandlerOutcome::Complete(serde_json::json!({
                    "stopped_at": i,
                })));
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        Ok(HandlerOutcome::Complete(serde_json::Value::Null))
    }
}

#[tokio::test]
async fn test_cooperative_cancellation_of_running_task() {
    let entered = Arc::new(AtomicBool::new(false));
    let fx = fixture_with(
        quick_config(),
        vec![(
            "looper",
            Arc::new(LoopingHandler {
                entered: entered.clone(),
            }) as Arc<dyn AgentHandler>,
        )],
    );
    fx.pool.start();

    let task = fx.pool.submit(spec("looper")).unwrap();
    // Let the handler get going before cancelling.
    for _ in 0..200 {
        if entered.load(Ordering::SeqCst) {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert!(entered.load(Ordering::SeqCst));

    fx.store.cancel(&task.id).unwrap();
    let done = wait_for_status(&fx.store, &task.id, TaskStatus::Cancelled).await;
    assert!(done.completed_at.is_some());
    fx.pool.stop().await;
}

#[tokio::test]
async fn test_cancel_before_dispatch_is_audited() {
    let fx = fixture_with(quick_config(), vec![("echo", Arc::new(EchoHandler))]);

    // No workers: the task stays queued.
    let task = fx.pool.submit(spec("echo")).unwrap();
    let outcome = fx.pool.cancel(&task.id).unwrap();
    assert_eq!(outcome, CancelOutcome::Cancelled);
    assert_eq!(
        fx.store.get(&task.id).unwrap().status,
        TaskStatus::Cancelled
    );
    assert!(fx.audit.events().iter().any(|e| e.action == "cancelled"));
}

struct ReviewAfterCancel {
    entered: Arc<AtomicBool>,
}

#[async_trait]
impl AgentHandler for ReviewAfterCancel {
    async fn run(&self, _ctx: HandlerContext, sink: CheckpointRecorder) -> Result<HandlerOutcome> {
        self.entered.store(true, Ordering::SeqCst);
        for _ in 0..1000 {
            if sink.is_cancelled() {
                return Ok(HandlerOutcome::NeedsReview(serde_json::json!({
                    "draft": true,
                })));
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        Ok(HandlerOutcome::NeedsReview(serde_json::Value::Null))
    }
}

#[tokio::test]
async fn test_cancel_wins_over_review_parking() {
    let entered = Arc::new(AtomicBool::new(false));
    let fx = fixture_with(
        quick_config(),
        vec![(
            "drafter",
            Arc::new(ReviewAfterCancel {
                entered: entered.clone(),
            }) as Arc<dyn AgentHandler>,
        )],
    );
    fx.pool.start();

    let task = fx.pool.submit(spec("drafter")).unwrap();
    for _ in 0..200 {
        if entered.load(Ordering::SeqCst) {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert!(entered.load(Ordering::SeqCst));

    assert_eq!(
        fx.pool.cancel(&task.id).unwrap(),
        CancelOutcome::CancelRequested
    );
    let done = wait_for_status(&fx.store, &task.id, TaskStatus::Cancelled).await;
    // The draft result is kept for diagnostics; the task never parks.
    assert_eq!(done.result.unwrap()["draft"], true);
    assert!(fx.alerts.kinds().is_empty());
    assert!(fx.audit.events().iter().any(|e| e.action == "cancelled"));
    fx.pool.stop().await;
}

struct SlowHandler;

#[async_trait]
impl AgentHandler for SlowHandler {
    async fn run(&self, _ctx: HandlerContext, _sink: CheckpointRecorder) -> Result<HandlerOutcome> {
        tokio::time::sleep(Duration::from_secs(30)).await;
        Ok(HandlerOutcome::Complete(serde_json::Value::Null))
    }
}

#[tokio::test]
async fn test_handler_timeout_fails_task() {
    let cfg = PoolConfig {
        handler_timeout_secs: 1,
        ..quick_config()
    };
    let fx = fixture_with(cfg, vec![("slow", Arc::new(SlowHandler))]);
    fx.pool.start();

    let task = fx.pool.submit(spec("slow")).unwrap();
    let done = wait_for_status(&fx.store, &task.id, TaskStatus::Failed).await;
    assert!(done.error.unwrap().contains("timed out"));
    fx.pool.stop().await;
}

struct ConcurrencyProbe {
    active: AtomicUsize,
    peak: AtomicUsize,
}

#[async_trait]
impl AgentHandler for ConcurrencyProbe {
    async fn run(&self, _ctx: HandlerContext, _sink: CheckpointRecorder) -> Result<HandlerOutcome> {
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(30)).await;
        self.active.fetch_sub(1, Ordering::SeqCst);
        Ok(HandlerOutcome::Complete(serde_json::Value::Null))
    }
}

#[tokio::test]
async fn test_concurrency_never_exceeds_worker_bound() {
    let probe = Arc::new(ConcurrencyProbe {
        active: AtomicUsize::new(0),
        peak: AtomicUsize::new(0),
    });
    let fx = fixture_with(quick_config(), vec![("probe", probe.clone())]);
    fx.pool.start();

    let ids: Vec<String> = (0..8)
        .map(|_| fx.pool.submit(spec("probe")).unwrap().id)
        .collect();
    for id in &ids {
        wait_for_status(&fx.store, id, TaskStatus::Completed).await;
    }
    assert!(probe.peak.load(Ordering::SeqCst) <= 2);
    fx.pool.stop().await;
}

struct OrderProbe {
    seen: std::sync::Mutex<Vec<String>>,
}

#[async_trait]
impl AgentHandler for OrderProbe {
    async fn run(&self, ctx: HandlerContext, _sink: CheckpointRecorder) -> Result<HandlerOutcome> {
        let label = ctx
            .context
            .get("label")
            .and_then(|v| v.as_str())
            .unwrap_or("?")
            .to_string();
        self.seen.lock().unwrap().push(label);
        Ok(HandlerOutcome::Complete(serde_json::Value::Null))
    }
}

#[tokio::test]
async fn test_priority_order_with_single_worker() {
    let probe = Arc::new(OrderProbe {
        seen: std::sync::Mutex::new(Vec::new()),
    });
    let cfg = PoolConfig {
        max_workers: 1,
        ..quick_config()
    };
    let fx = fixture_with(cfg, vec![("probe", probe.clone())]);

    // Enqueue everything before any worker exists so dispatch order is pure
    // queue order.
    let mut ids = Vec::new();
    for (label, priority) in [
        ("low-1", TaskPriority::Low),
        ("critical-1", TaskPriority::Critical),
        ("medium-1", TaskPriority::Medium),
        ("critical-2", TaskPriority::Critical),
        ("high-1", TaskPriority::High),
    ] {
        let mut s = spec("probe");
        s.priority = priority;
        s.context
            .insert("label".into(), serde_json::json!(label));
        ids.push(fx.pool.submit(s).unwrap().id);
    }
    fx.pool.start();

    for id in &ids {
        wait_for_status(&fx.store, id, TaskStatus::Completed).await;
    }
    assert_eq!(
        *probe.seen.lock().unwrap(),
        vec!["critical-1", "critical-2", "high-1", "medium-1", "low-1"]
    );
    fx.pool.stop().await;
}

#[tokio::test]
async fn test_cancel_queued_task_never_runs() {
    let handler = Arc::new(GatedInvocations {
        invocations: AtomicU32::new(0),
    });
    let fx = fixture_with(quick_config(), vec![("gated", handler.clone())]);

    // No workers yet: the task stays queued.
    let task = fx.pool.submit(spec("gated")).unwrap();
    fx.store.cancel(&task.id).unwrap();
    assert_eq!(
        fx.store.get(&task.id).unwrap().status,
        TaskStatus::Cancelled
    );

    fx.pool.start();
    tokio::time::sleep(Duration::from_millis(100)).await;
    // The stale queue entry was discarded on claim.
    assert_eq!(handler.invocations.load(Ordering::SeqCst), 0);
    fx.pool.stop().await;
}

#[tokio::test]
async fn test_stats_reflect_store_and_queue() {
    let fx = fixture_with(quick_config(), vec![("echo", Arc::new(EchoHandler))]);

    fx.pool.submit(spec("echo")).unwrap();
    fx.pool.submit(spec("echo")).unwrap();
    let stats = fx.pool.stats();
    assert_eq!(stats.max_workers, 2);
    assert_eq!(stats.queue_depth, 2);
    assert_eq!(stats.tasks.queued, 2);
    assert_eq!(stats.agents, vec!["echo".to_string()]);
}
