//! SeoPilot job scheduling: lightweight cron, operator schedules, and the
//! single-flight job execution log backed by SQLite.

pub mod cron;
pub mod engine;
pub mod executions;
pub mod jobs;
pub mod persistence;

pub use engine::{JobScheduler, JobStatus, SchedulerStatus};
pub use executions::ExecutionLog;
pub use jobs::{JobContext, JobHandler};
pub use persistence::SchedulerDb;
