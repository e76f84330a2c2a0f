//! Job handler contract.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use seopilot_core::{Result, Schedule};

/// Passed to a job run. Log lines accumulate on the execution record and
/// survive a failed run.
#[derive(Clone)]
pub struct JobContext {
    pub job_name: String,
    /// Present when the job was materialized from an operator schedule.
    pub schedule: Option<Schedule>,
    lines: Arc<Mutex<Vec<String>>>,
}

impl JobContext {
    pub fn new(job_name: &str, schedule: Option<Schedule>) -> Self {
        Self {
            job_name: job_name.to_string(),
            schedule,
            lines: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn log(&self, line: impl Into<String>) {
        let line = line.into();
        tracing::info!(job = %self.job_name, "{line}");
        self.lines.lock().unwrap().push(line);
    }

    pub(crate) fn take_lines(&self) -> Vec<String> {
        std::mem::take(&mut self.lines.lock().unwrap())
    }
}

/// A background job body. Errors are recorded on the execution and never stop
/// the scheduler loop.
#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn run(&self, ctx: JobContext) -> Result<()>;
}
