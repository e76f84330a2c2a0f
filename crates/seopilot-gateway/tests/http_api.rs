//! API behavior tests against a live server on an ephemeral port.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use seopilot_core::{ApprovalConfig, PoolConfig, Result, SchedulerConfig};
use seopilot_gateway::{AppState, build_router};
use seopilot_pool::{
    AgentHandler, AgentPool, ApprovalGate, CheckpointRecorder, HandlerContext, HandlerOutcome,
    HandlerRegistry, MemoryAuditLog, TaskQueue, TaskStore, TracingAlerts,
};
use seopilot_scheduler::{JobContext, JobHandler, JobScheduler, SchedulerDb};

struct EchoHandler;

#[async_trait]
impl AgentHandler for EchoHandler {
    async fn run(&self, _ctx: HandlerContext, _sink: CheckpointRecorder) -> Result<HandlerOutcome> {
        Ok(HandlerOutcome::Complete(serde_json::json!({"ok": true})))
    }
}

struct SleepyJob;

#[async_trait]
impl JobHandler for SleepyJob {
    async fn run(&self, ctx: JobContext) -> Result<()> {
        ctx.log("sleeping");
        tokio::time::sleep(Duration::from_secs(5)).await;
        Ok(())
    }
}

async fn spawn_server(start_workers: bool) -> String {
    let registry = Arc::new(HandlerRegistry::new());
    registry.register("seo-audit", Arc::new(EchoHandler));
    let store = Arc::new(TaskStore::new(registry.clone()));
    let queue = Arc::new(TaskQueue::new());
    let audit = Arc::new(MemoryAuditLog::new());
    let pool = Arc::new(AgentPool::new(
        &PoolConfig {
            max_workers: 2,
            handler_timeout_secs: 5,
            max_attempts: 3,
            base_backoff_ms: 10,
        },
        registry,
        store.clone(),
        queue.clone(),
        Arc::new(TracingAlerts),
        audit.clone(),
    ));
    if start_workers {
        pool.start();
    }
    let gate = Arc::new(ApprovalGate::new(
        store,
        queue,
        audit,
        ApprovalConfig::default(),
    ));

    let db = Arc::new(SchedulerDb::open_in_memory().unwrap());
    let scheduler = Arc::new(
        JobScheduler::new(
            &SchedulerConfig {
                check_interval_secs: 60,
                db_path: String::new(),
            },
            db,
        )
        .unwrap(),
    );
    scheduler
        .register_job("nightly-audit", "0 2 * * *", Arc::new(SleepyJob))
        .unwrap();

    let router = build_router(AppState::new(pool, gate, scheduler));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    format!("http://{addr}")
}

async fn wait_for_task_status(client: &reqwest::Client, base: &str, id: &str, status: &str) {
    for _ in 0..500 {
        let task: serde_json::Value = client
            .get(format!("{base}/api/tasks/{id}"))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        if task["status"] == status {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("task {id} never reached {status}");
}

#[tokio::test]
async fn test_health() {
    let base = spawn_server(false).await;
    let resp = reqwest::get(format!("{base}/health")).await.unwrap();
    assert_eq!(resp.status(), 200);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["status"], "ok");
    assert_eq!(body["service"], "seopilot-gateway");
}

#[tokio::test]
async fn test_task_lifecycle_over_http() {
    let base = spawn_server(true).await;
    let client = reqwest::Client::new();

    let resp = client
        .post(format!("{base}/api/tasks"))
        .json(&serde_json::json!({
            "agent_name": "seo-audit",
            "priority": "high",
            "context": {"workspace_id": "ws-1"},
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 201);
    let task: serde_json::Value = resp.json().await.unwrap();
    let id = task["id"].as_str().unwrap().to_string();
    assert_eq!(task["status"], "queued");

    wait_for_task_status(&client, &base, &id, "completed").await;

    // Workspace filter.
    let listed: Vec<serde_json::Value> = client
        .get(format!("{base}/api/tasks?workspace=ws-1"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(listed.len(), 1);
    let empty: Vec<serde_json::Value> = client
        .get(format!("{base}/api/tasks?workspace=other"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert!(empty.is_empty());
}

#[tokio::test]
async fn test_validation_and_not_found_statuses() {
    let base = spawn_server(false).await;
    let client = reqwest::Client::new();

    let resp = client
        .post(format!("{base}/api/tasks"))
        .json(&serde_json::json!({"agent_name": "no-such-agent"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert!(body["error"].as_str().unwrap().contains("no-such-agent"));

    let resp = client
        .get(format!("{base}/api/tasks/does-not-exist"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);
}

#[tokio::test]
async fn test_approval_flow_over_http() {
    let base = spawn_server(true).await;
    let client = reqwest::Client::new();

    let task: serde_json::Value = client
        .post(format!("{base}/api/tasks"))
        .json(&serde_json::json!({
            "agent_name": "seo-audit",
            "requires_approval": true,
        }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let id = task["id"].as_str().unwrap().to_string();

    wait_for_task_status(&client, &base, &id, "requires_review").await;

    let resp = client
        .post(format!("{base}/api/tasks/{id}/approve"))
        .json(&serde_json::json!({"approver": "ops@example.com"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let approved: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(approved["approved_by"], "ops@example.com");

    wait_for_task_status(&client, &base, &id, "completed").await;

    // Approving a finished task is a state conflict.
    let resp = client
        .post(format!("{base}/api/tasks/{id}/approve"))
        .json(&serde_json::json!({"approver": "ops@example.com"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 409);
}

#[tokio::test]
async fn test_reject_requires_reason() {
    let base = spawn_server(true).await;
    let client = reqwest::Client::new();

    let task: serde_json::Value = client
        .post(format!("{base}/api/tasks"))
        .json(&serde_json::json!({
            "agent_name": "seo-audit",
            "requires_approval": true,
        }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let id = task["id"].as_str().unwrap().to_string();
    wait_for_task_status(&client, &base, &id, "requires_review").await;

    let resp = client
        .post(format!("{base}/api/tasks/{id}/reject"))
        .json(&serde_json::json!({"approver": "ops@example.com"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);

    let resp = client
        .post(format!("{base}/api/tasks/{id}/reject"))
        .json(&serde_json::json!({"approver": "ops@example.com", "reason": "out of scope"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let rejected: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(rejected["status"], "cancelled");
    assert_eq!(rejected["rejection_reason"], "out of scope");
}

#[tokio::test]
async fn test_cancel_queued_task() {
    // No workers: the task stays queued and cancels immediately.
    let base = spawn_server(false).await;
    let client = reqwest::Client::new();

    let task: serde_json::Value = client
        .post(format!("{base}/api/tasks"))
        .json(&serde_json::json!({"agent_name": "seo-audit"}))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let id = task["id"].as_str().unwrap();

    let resp = client
        .delete(format!("{base}/api/tasks/{id}"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["outcome"], "cancelled");
    assert_eq!(body["task"]["status"], "cancelled");

    // Cancelling again conflicts.
    let resp = client
        .delete(format!("{base}/api/tasks/{id}"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 409);
}

#[tokio::test]
async fn test_scheduler_status_and_control() {
    let base = spawn_server(false).await;
    let client = reqwest::Client::new();

    let status: serde_json::Value = client
        .get(format!("{base}/api/scheduler/status"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(status["running"], false);
    assert_eq!(status["jobs"][0]["name"], "nightly-audit");
    assert_eq!(status["jobs"][0]["cron"], "0 2 * * *");

    let resp = client
        .post(format!("{base}/api/scheduler/control"))
        .json(&serde_json::json!({"action": "start"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);

    // Manual trigger: first wins, second hits single-flight.
    let resp = client
        .post(format!("{base}/api/scheduler/control"))
        .json(&serde_json::json!({"action": "trigger", "job": "nightly-audit"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["execution"]["status"], "running");

    let resp = client
        .post(format!("{base}/api/scheduler/control"))
        .json(&serde_json::json!({"action": "trigger", "job": "nightly-audit"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 409);

    let resp = client
        .post(format!("{base}/api/scheduler/control"))
        .json(&serde_json::json!({"action": "trigger", "job": "ghost"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);

    let resp = client
        .post(format!("{base}/api/scheduler/control"))
        .json(&serde_json::json!({"action": "reboot"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);

    let resp = client
        .post(format!("{base}/api/scheduler/control"))
        .json(&serde_json::json!({"action": "stop"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
}

#[tokio::test]
async fn test_pool_stats_endpoint() {
    let base = spawn_server(false).await;
    let client = reqwest::Client::new();

    client
        .post(format!("{base}/api/tasks"))
        .json(&serde_json::json!({"agent_name": "seo-audit"}))
        .send()
        .await
        .unwrap();

    let stats: serde_json::Value = client
        .get(format!("{base}/api/pool/stats"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(stats["max_workers"], 2);
    assert_eq!(stats["queue_depth"], 1);
    assert_eq!(stats["tasks"]["queued"], 1);
    assert_eq!(stats["agents"][0], "seo-audit");
}
