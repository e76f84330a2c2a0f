//! # SeoPilot Core
//!
//! Shared foundation for the orchestration crates: configuration, the error
//! taxonomy, the task/schedule data model, and the collaborator traits
//! (alerts, audit) the core consumes but does not implement.

pub mod config;
pub mod error;
pub mod traits;
pub mod types;

pub use config::{
    AlertConfig, ApprovalConfig, GatewayConfig, PoolConfig, SchedulerConfig, SeoPilotConfig,
};
pub use error::{Result, SeoPilotError};
pub use traits::{AlertEvent, AlertSink, AuditEvent, AuditLog};
pub use types::{
    Checkpoint, ExecutionStatus, Frequency, JobExecution, Schedule, ScheduleType, Task,
    TaskPriority, TaskSpec, TaskStatus, ToolCall,
};
