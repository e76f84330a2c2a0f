//! Cron evaluation loop, job registry, and schedule materialization.
//!
//! Two kinds of jobs share one dispatch path: named built-ins registered at
//! startup, and operator schedules materialized as `schedule:{id}` jobs. The
//! tick loop fires due jobs; an overlapping tick skips and logs, it never
//! queues a backlog.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use seopilot_core::{
    Frequency, JobExecution, Result, Schedule, SchedulerConfig, ScheduleType, SeoPilotError,
};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::cron;
use crate::executions::ExecutionLog;
use crate::jobs::{JobContext, JobHandler};
use crate::persistence::SchedulerDb;

struct JobEntry {
    cron: String,
    handler: Arc<dyn JobHandler>,
    schedule: Option<Schedule>,
}

/// Point-in-time view of one registered job.
#[derive(Debug, Clone, serde::Serialize)]
pub struct JobStatus {
    pub name: String,
    pub cron: String,
    pub last_run: Option<DateTime<Utc>>,
    pub next_run: Option<DateTime<Utc>>,
    pub running: bool,
}

/// Status surface for the gateway.
#[derive(Debug, Clone, serde::Serialize)]
pub struct SchedulerStatus {
    pub running: bool,
    pub check_interval_secs: u64,
    pub jobs: Vec<JobStatus>,
    pub recent_executions: Vec<JobExecution>,
}

pub struct JobScheduler {
    db: Arc<SchedulerDb>,
    log: Arc<ExecutionLog>,
    jobs: Mutex<HashMap<String, JobEntry>>,
    type_handlers: Mutex<HashMap<ScheduleType, Arc<dyn JobHandler>>>,
    next_runs: Mutex<HashMap<String, DateTime<Utc>>>,
    last_runs: Mutex<HashMap<String, DateTime<Utc>>>,
    check_interval: Duration,
    shutdown: watch::Sender<bool>,
    loop_handle: Mutex<Option<JoinHandle<()>>>,
}

impl JobScheduler {
    /// Build the scheduler. Stale `running` executions from a previous process
    /// are closed here, before any new job can fire.
    pub fn new(cfg: &SchedulerConfig, db: Arc<SchedulerDb>) -> Result<Self> {
        db.close_interrupted()?;
        let (shutdown, _) = watch::channel(false);
        Ok(Self {
            log: Arc::new(ExecutionLog::new(db.clone())),
            db,
            jobs: Mutex::new(HashMap::new()),
            type_handlers: Mutex::new(HashMap::new()),
            next_runs: Mutex::new(HashMap::new()),
            last_runs: Mutex::new(HashMap::new()),
            check_interval: Duration::from_secs(cfg.check_interval_secs.max(1)),
            shutdown,
            loop_handle: Mutex::new(None),
        })
    }

    pub fn execution_log(&self) -> Arc<ExecutionLog> {
        self.log.clone()
    }

    /// Register a named background job.
    pub fn register_job(
        &self,
        name: &str,
        cron_expr: &str,
        handler: Arc<dyn JobHandler>,
    ) -> Result<()> {
        if !cron::validate(cron_expr) {
            return Err(SeoPilotError::Validation(format!(
                "invalid cron expression '{cron_expr}'"
            )));
        }
        self.jobs.lock().unwrap().insert(
            name.to_string(),
            JobEntry {
                cron: cron_expr.to_string(),
                handler,
                schedule: None,
            },
        );
        if let Some(next) = cron::next_run_from_cron(cron_expr, Utc::now()) {
            self.next_runs.lock().unwrap().insert(name.to_string(), next);
            tracing::info!(job = %name, cron = %cron_expr, next_run = %next, "job registered");
        }
        Ok(())
    }

    /// Register the handler that runs schedules of the given type.
    pub fn register_schedule_handler(&self, schedule_type: ScheduleType, handler: Arc<dyn JobHandler>) {
        self.type_handlers
            .lock()
            .unwrap()
            .insert(schedule_type, handler);
    }

    // ─── Schedule CRUD ──────────────────────────────────────

    /// Persist a new schedule and, when enabled, materialize its job.
    pub fn create_schedule(&self, schedule: Schedule) -> Result<Schedule> {
        self.validate_schedule(&schedule)?;
        self.db.save_schedule(&schedule)?;
        if schedule.enabled {
            self.materialize(&schedule)?;
        }
        tracing::info!(schedule_id = %schedule.id, schedule_type = %schedule.schedule_type, "schedule created");
        Ok(schedule)
    }

    pub fn get_schedule(&self, id: &str) -> Result<Schedule> {
        self.db
            .load_schedules()?
            .into_iter()
            .find(|s| s.id == id)
            .ok_or_else(|| SeoPilotError::NotFound(format!("schedule '{id}'")))
    }

    pub fn list_schedules(&self) -> Result<Vec<Schedule>> {
        self.db.load_schedules()
    }

    /// Enable or disable a schedule. Disabling removes the materialized job;
    /// it is the only way to suppress a schedule without deleting it.
    pub fn set_schedule_enabled(&self, id: &str, enabled: bool) -> Result<Schedule> {
        let mut schedule = self.get_schedule(id)?;
        schedule.enabled = enabled;
        schedule.updated_at = Utc::now();
        self.db.save_schedule(&schedule)?;

        let job_name = schedule_job_name(id);
        if enabled {
            self.materialize(&schedule)?;
        } else {
            self.jobs.lock().unwrap().remove(&job_name);
            self.next_runs.lock().unwrap().remove(&job_name);
            self.last_runs.lock().unwrap().remove(&job_name);
        }
        Ok(schedule)
    }

    pub fn delete_schedule(&self, id: &str) -> Result<()> {
        if !self.db.delete_schedule(id)? {
            return Err(SeoPilotError::NotFound(format!("schedule '{id}'")));
        }
        let job_name = schedule_job_name(id);
        self.jobs.lock().unwrap().remove(&job_name);
        self.next_runs.lock().unwrap().remove(&job_name);
        self.last_runs.lock().unwrap().remove(&job_name);
        tracing::info!(schedule_id = %id, "schedule deleted");
        Ok(())
    }

    /// Materialize all enabled persisted schedules. Called once at startup,
    /// after the schedule handlers are registered.
    pub fn rehydrate(&self) -> Result<usize> {
        let mut count = 0;
        for schedule in self.db.load_schedules()? {
            if !schedule.enabled {
                continue;
            }
            match self.materialize(&schedule) {
                Ok(()) => count += 1,
                Err(e) => {
                    tracing::warn!(schedule_id = %schedule.id, error = %e, "schedule not rehydrated");
                }
            }
        }
        tracing::info!(count, "schedules rehydrated");
        Ok(count)
    }

    fn validate_schedule(&self, schedule: &Schedule) -> Result<()> {
        if schedule.frequency == Frequency::Custom {
            match &schedule.cron_expression {
                Some(expr) if cron::validate(expr) => {}
                Some(expr) => {
                    return Err(SeoPilotError::Validation(format!(
                        "invalid cron expression '{expr}'"
                    )));
                }
                None => {
                    return Err(SeoPilotError::Validation(
                        "custom frequency requires a cron_expression".into(),
                    ));
                }
            }
        }
        if !self
            .type_handlers
            .lock()
            .unwrap()
            .contains_key(&schedule.schedule_type)
        {
            return Err(SeoPilotError::Validation(format!(
                "no handler registered for schedule type '{}'",
                schedule.schedule_type
            )));
        }
        Ok(())
    }

    fn materialize(&self, schedule: &Schedule) -> Result<()> {
        let handler = self
            .type_handlers
            .lock()
            .unwrap()
            .get(&schedule.schedule_type)
            .cloned()
            .ok_or_else(|| {
                SeoPilotError::Validation(format!(
                    "no handler registered for schedule type '{}'",
                    schedule.schedule_type
                ))
            })?;
        let cron_expr = schedule.cron().ok_or_else(|| {
            SeoPilotError::Validation("custom frequency requires a cron_expression".into())
        })?;

        let job_name = schedule_job_name(&schedule.id);
        self.jobs.lock().unwrap().insert(
            job_name.clone(),
            JobEntry {
                cron: cron_expr.clone(),
                handler,
                schedule: Some(schedule.clone()),
            },
        );
        if let Some(next) = cron::next_run_from_cron(&cron_expr, Utc::now()) {
            self.next_runs.lock().unwrap().insert(job_name, next);
        }
        Ok(())
    }

    // ─── Execution ──────────────────────────────────────

    /// Fire a job now. Single-flight: a second trigger while the first run is
    /// still going fails with `AlreadyRunning`. Returns the `Running` record.
    pub fn trigger(self: &Arc<Self>, name: &str) -> Result<JobExecution> {
        let (handler, schedule) = {
            let jobs = self.jobs.lock().unwrap();
            let entry = jobs
                .get(name)
                .ok_or_else(|| SeoPilotError::NotFound(format!("job '{name}'")))?;
            (entry.handler.clone(), entry.schedule.clone())
        };

        let exec = self.log.begin(name)?;
        self.last_runs
            .lock()
            .unwrap()
            .insert(name.to_string(), exec.started_at);
        tracing::info!(job = %name, execution_id = %exec.id, "job started");

        let log = self.log.clone();
        let ctx = JobContext::new(name, schedule);
        let exec_for_task = exec.clone();
        tokio::spawn(async move {
            let result = handler.run(ctx.clone()).await;
            let lines = ctx.take_lines();
            match result {
                Ok(()) => {
                    tracing::info!(job = %exec_for_task.job_name, "job completed");
                    log.finish(&exec_for_task, lines, None);
                }
                Err(e) => {
                    tracing::error!(job = %exec_for_task.job_name, error = %e, "job failed");
                    log.finish(&exec_for_task, lines, Some(e.to_string()));
                }
            }
        });

        Ok(exec)
    }

    /// One pass of the cron loop: fire every due job, advance its next-run
    /// time, skip (and log) jobs still running from a previous fire.
    pub fn tick(self: &Arc<Self>) {
        let now = Utc::now();
        let due_names: Vec<String> = self
            .next_runs
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, next)| **next <= now)
            .map(|(name, _)| name.clone())
            .collect();
        let due: Vec<(String, String)> = {
            let jobs = self.jobs.lock().unwrap();
            due_names
                .into_iter()
                .filter_map(|name| {
                    jobs.get(&name)
                        .map(|entry| (name.clone(), entry.cron.clone()))
                })
                .collect()
        };

        for (name, cron_expr) in due {
            if let Some(next) = cron::next_run_from_cron(&cron_expr, now) {
                self.next_runs.lock().unwrap().insert(name.clone(), next);
            }
            match self.trigger(&name) {
                Ok(_) => {}
                Err(SeoPilotError::AlreadyRunning(_)) => {
                    tracing::warn!(job = %name, "previous run still in flight, skipping this fire");
                }
                Err(e) => {
                    tracing::warn!(job = %name, error = %e, "scheduled fire failed");
                }
            }
        }
    }

    /// Start the tick loop. Idempotent.
    pub fn start(self: &Arc<Self>) {
        let mut handle = self.loop_handle.lock().unwrap();
        if handle.is_some() {
            return;
        }
        let _ = self.shutdown.send(false);
        let scheduler = self.clone();
        let mut shutdown = self.shutdown.subscribe();
        *handle = Some(tokio::spawn(async move {
            let mut interval = tokio::time::interval(scheduler.check_interval);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = interval.tick() => scheduler.tick(),
                    _ = shutdown.changed() => {
                        if *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }
            tracing::info!("scheduler loop stopped");
        }));
        tracing::info!(
            check_interval_secs = self.check_interval.as_secs(),
            "scheduler started"
        );
    }

    /// Stop the tick loop. In-flight job executions are left to finish.
    pub async fn stop(&self) {
        let _ = self.shutdown.send(true);
        let handle = self.loop_handle.lock().unwrap().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }

    pub fn is_running(&self) -> bool {
        self.loop_handle.lock().unwrap().is_some()
    }

    pub fn status(&self) -> SchedulerStatus {
        let next_runs = self.next_runs.lock().unwrap().clone();
        let last_runs = self.last_runs.lock().unwrap().clone();
        let mut jobs: Vec<JobStatus> = self
            .jobs
            .lock()
            .unwrap()
            .iter()
            .map(|(name, entry)| JobStatus {
                name: name.clone(),
                cron: entry.cron.clone(),
                last_run: last_runs.get(name).copied(),
                next_run: next_runs.get(name).copied(),
                running: self.log.is_running(name),
            })
            .collect();
        jobs.sort_by(|a, b| a.name.cmp(&b.name));
        SchedulerStatus {
            running: self.is_running(),
            check_interval_secs: self.check_interval.as_secs(),
            jobs,
            recent_executions: self.log.history(20),
        }
    }
}

fn schedule_job_name(id: &str) -> String {
    format!("schedule:{id}")
}
