//! Job execution log with the single-flight guard.
//!
//! One mutex covers both the "is this job running" check and the insertion of
//! the `Running` record, so two concurrent triggers of the same job can never
//! both acquire it. The in-memory view keeps the most recent entries; the
//! database keeps all of them.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use chrono::Utc;
use seopilot_core::{ExecutionStatus, JobExecution, Result, SeoPilotError};

use crate::persistence::SchedulerDb;

/// In-memory history bound, matching the operator dashboard view.
const MAX_HISTORY: usize = 100;

struct LogInner {
    /// job_name -> execution id currently holding the single-flight slot.
    running: HashMap<String, String>,
    /// Newest entries at the back, trimmed to `MAX_HISTORY`.
    history: VecDeque<JobExecution>,
}

pub struct ExecutionLog {
    inner: Mutex<LogInner>,
    db: Arc<SchedulerDb>,
}

impl ExecutionLog {
    pub fn new(db: Arc<SchedulerDb>) -> Self {
        Self {
            inner: Mutex::new(LogInner {
                running: HashMap::new(),
                history: VecDeque::new(),
            }),
            db,
        }
    }

    /// Acquire the single-flight slot for `job_name` and record a `Running`
    /// execution. Fails with `AlreadyRunning` if the slot is taken; check and
    /// insert happen under one lock.
    pub fn begin(&self, job_name: &str) -> Result<JobExecution> {
        let mut inner = self.inner.lock().unwrap();
        if inner.running.contains_key(job_name) {
            return Err(SeoPilotError::AlreadyRunning(job_name.to_string()));
        }
        let exec = JobExecution::begin(job_name);
        inner.running.insert(job_name.to_string(), exec.id.clone());
        inner.history.push_back(exec.clone());
        while inner.history.len() > MAX_HISTORY {
            inner.history.pop_front();
        }
        drop(inner);

        if let Err(e) = self.db.insert_execution(&exec) {
            // Release the slot, otherwise the job reads as running until
            // restart with no `finish` ever coming.
            let mut inner = self.inner.lock().unwrap();
            inner.running.remove(job_name);
            inner.history.retain(|h| h.id != exec.id);
            return Err(e);
        }
        Ok(exec)
    }

    /// Release the slot and finalize the record. `error = None` means success.
    pub fn finish(&self, exec: &JobExecution, logs: Vec<String>, error: Option<String>) {
        let mut done = exec.clone();
        done.status = if error.is_none() {
            ExecutionStatus::Completed
        } else {
            ExecutionStatus::Failed
        };
        done.completed_at = Some(Utc::now());
        done.logs = logs;
        done.error = error;

        let mut inner = self.inner.lock().unwrap();
        if inner.running.get(&done.job_name) == Some(&done.id) {
            inner.running.remove(&done.job_name);
        }
        if let Some(entry) = inner.history.iter_mut().find(|e| e.id == done.id) {
            *entry = done.clone();
        }
        drop(inner);

        if let Err(e) = self.db.update_execution(&done) {
            tracing::warn!(execution_id = %done.id, error = %e, "failed to persist execution result");
        }
    }

    pub fn is_running(&self, job_name: &str) -> bool {
        self.inner.lock().unwrap().running.contains_key(job_name)
    }

    pub fn running_jobs(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .inner
            .lock()
            .unwrap()
            .running
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }

    /// Recent executions, newest first, from the in-memory view.
    pub fn history(&self, limit: usize) -> Vec<JobExecution> {
        self.inner
            .lock()
            .unwrap()
            .history
            .iter()
            .rev()
            .take(limit)
            .cloned()
            .collect()
    }
}
