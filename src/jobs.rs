//! Built-in scheduled jobs: each fire fans out pool tasks.

use std::sync::Arc;

use async_trait::async_trait;
use seopilot_core::{Result, TaskPriority, TaskSpec};
use seopilot_pool::AgentPool;
use seopilot_scheduler::{JobContext, JobHandler};

/// Submits one agent task per company in the firing schedule's scope.
/// For the named built-in jobs (no schedule attached) it submits a single
/// task tagged with the job name.
pub struct FanoutJob {
    pool: Arc<AgentPool>,
    agent_name: String,
    priority: TaskPriority,
}

impl FanoutJob {
    pub fn new(pool: Arc<AgentPool>, agent_name: &str, priority: TaskPriority) -> Self {
        Self {
            pool,
            agent_name: agent_name.to_string(),
            priority,
        }
    }
}

#[async_trait]
impl JobHandler for FanoutJob {
    async fn run(&self, ctx: JobContext) -> Result<()> {
        match &ctx.schedule {
            Some(schedule) => {
                if schedule.companies.is_empty() {
                    ctx.log("schedule has no companies in scope, nothing to do");
                    return Ok(());
                }
                for company in &schedule.companies {
                    let mut spec = TaskSpec {
                        agent_name: self.agent_name.clone(),
                        priority: self.priority,
                        ..Default::default()
                    };
                    spec.context
                        .insert("company_id".into(), serde_json::json!(company));
                    spec.context
                        .insert("schedule_id".into(), serde_json::json!(schedule.id));
                    spec.context.insert(
                        "schedule_type".into(),
                        serde_json::json!(schedule.schedule_type.to_string()),
                    );
                    if !schedule.config.is_null() {
                        if let Some(obj) = schedule.config.as_object() {
                            for (k, v) in obj {
                                spec.context.entry(k.clone()).or_insert_with(|| v.clone());
                            }
                        }
                    }
                    let task = self.pool.submit(spec)?;
                    ctx.log(format!(
                        "enqueued {} task {} for company {company}",
                        self.agent_name, task.id
                    ));
                }
            }
            None => {
                let mut spec = TaskSpec {
                    agent_name: self.agent_name.clone(),
                    priority: self.priority,
                    ..Default::default()
                };
                spec.context
                    .insert("job".into(), serde_json::json!(ctx.job_name));
                let task = self.pool.submit(spec)?;
                ctx.log(format!("enqueued {} task {}", self.agent_name, task.id));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use seopilot_core::{Frequency, PoolConfig, Schedule, ScheduleType, TaskStatus};
    use seopilot_pool::{
        AgentHandler, CheckpointRecorder, HandlerContext, HandlerOutcome, HandlerRegistry,
        MemoryAuditLog, TaskQueue, TaskStore, TracingAlerts,
    };

    struct NoopHandler;

    #[async_trait]
    impl AgentHandler for NoopHandler {
        async fn run(
            &self,
            _ctx: HandlerContext,
            _sink: CheckpointRecorder,
        ) -> Result<HandlerOutcome> {
            Ok(HandlerOutcome::Complete(serde_json::Value::Null))
        }
    }

    fn pool() -> Arc<AgentPool> {
        let registry = Arc::new(HandlerRegistry::new());
        registry.register("site-probe", Arc::new(NoopHandler));
        let store = Arc::new(TaskStore::new(registry.clone()));
        Arc::new(AgentPool::new(
            &PoolConfig::default(),
            registry,
            store,
            Arc::new(TaskQueue::new()),
            Arc::new(TracingAlerts),
            Arc::new(MemoryAuditLog::new()),
        ))
    }

    #[tokio::test]
    async fn test_fanout_per_company() {
        let pool = pool();
        let job = FanoutJob::new(pool.clone(), "site-probe", TaskPriority::Medium);

        let mut schedule = Schedule::new(ScheduleType::Audit, Frequency::Daily);
        schedule.companies = vec!["acme".into(), "globex".into()];
        schedule.config = serde_json::json!({"url": "https://example.com"});

        let ctx = JobContext::new("schedule:test", Some(schedule));
        job.run(ctx).await.unwrap();

        let tasks = pool.store().list(None);
        assert_eq!(tasks.len(), 2);
        for task in &tasks {
            assert_eq!(task.status, TaskStatus::Queued);
            assert_eq!(task.agent_name, "site-probe");
            assert_eq!(task.context["url"], "https://example.com");
        }
    }

    #[tokio::test]
    async fn test_named_job_submits_one_task() {
        let pool = pool();
        let job = FanoutJob::new(pool.clone(), "site-probe", TaskPriority::Low);

        job.run(JobContext::new("audit-runner", None)).await.unwrap();
        let tasks = pool.store().list(None);
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].context["job"], "audit-runner");
    }
}
