//! Core data model: tasks, checkpoints, schedules, and job executions.
//!
//! `TaskStatus` is the authoritative lifecycle vocabulary. `requires_approval`
//! on a task is a creation-time hint only — the status a gated task parks in is
//! `RequiresReview`, entered through the normal state machine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Dispatch priority. Critical first; ties broken FIFO by enqueue order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskPriority {
    Critical,
    High,
    Medium,
    Low,
}

impl TaskPriority {
    /// Queue rank (lower = dispatched first).
    pub fn rank(&self) -> u8 {
        match self {
            TaskPriority::Critical => 0,
            TaskPriority::High => 1,
            TaskPriority::Medium => 2,
            TaskPriority::Low => 3,
        }
    }
}

impl Default for TaskPriority {
    fn default() -> Self {
        TaskPriority::Medium
    }
}

impl std::fmt::Display for TaskPriority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskPriority::Critical => write!(f, "critical"),
            TaskPriority::High => write!(f, "high"),
            TaskPriority::Medium => write!(f, "medium"),
            TaskPriority::Low => write!(f, "low"),
        }
    }
}

/// Task lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Queued,
    InProgress,
    RequiresReview,
    Completed,
    Failed,
    Cancelled,
}

impl TaskStatus {
    /// Terminal states admit no further transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled
        )
    }

    /// Whether `self -> to` is an edge of the task state machine.
    pub fn can_transition_to(&self, to: TaskStatus) -> bool {
        use TaskStatus::*;
        match (self, to) {
            (Pending, Queued) | (Pending, Cancelled) => true,
            (Queued, InProgress) | (Queued, Cancelled) => true,
            (InProgress, Completed)
            | (InProgress, Failed)
            | (InProgress, RequiresReview)
            | (InProgress, Cancelled) => true,
            (RequiresReview, Pending) | (RequiresReview, Cancelled) => true,
            _ => false,
        }
    }
}

// Display mirrors the snake_case serde names so logs and wire agree.
impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Queued => "queued",
            TaskStatus::InProgress => "in_progress",
            TaskStatus::RequiresReview => "requires_review",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
            TaskStatus::Cancelled => "cancelled",
        };
        write!(f, "{s}")
    }
}

/// A side-effecting call the handler made, recorded for audit/replay.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    pub tool: String,
    pub input: serde_json::Value,
    pub output: serde_json::Value,
}

/// An append-only progress snapshot recorded during task execution.
/// Never mutated after append; timestamps are strictly increasing per task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    /// Handler-defined label ("thinking", "tool_use", "attempt", "result", ...).
    pub state: String,
    pub content: String,
    #[serde(default)]
    pub tool_calls: Vec<ToolCall>,
}

/// Creation request for a task.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskSpec {
    pub agent_name: String,
    #[serde(default)]
    pub priority: TaskPriority,
    /// Opaque key-value context (workspace/company ids etc.). Passed to the
    /// handler, never interpreted by the core.
    #[serde(default)]
    pub context: HashMap<String, serde_json::Value>,
    #[serde(default)]
    pub requires_approval: bool,
}

/// One unit of orchestrated background work.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub agent_name: String,
    pub priority: TaskPriority,
    pub status: TaskStatus,
    #[serde(default)]
    pub context: HashMap<String, serde_json::Value>,
    pub requires_approval: bool,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    /// Set iff status is terminal.
    pub completed_at: Option<DateTime<Utc>>,
    pub result: Option<serde_json::Value>,
    pub error: Option<String>,
    #[serde(default)]
    pub checkpoints: Vec<Checkpoint>,
    pub approved_by: Option<String>,
    pub approved_at: Option<DateTime<Utc>>,
    pub rejected_by: Option<String>,
    pub rejected_at: Option<DateTime<Utc>>,
    pub rejection_reason: Option<String>,
    /// Cooperative-cancellation flag, polled by the handler between checkpoints.
    #[serde(default)]
    pub cancel_requested: bool,
    /// Current lease generation. Present while one worker holds the task.
    #[serde(skip)]
    pub lease: Option<u64>,
}

impl Task {
    pub fn from_spec(spec: TaskSpec) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            agent_name: spec.agent_name,
            priority: spec.priority,
            status: TaskStatus::Pending,
            context: spec.context,
            requires_approval: spec.requires_approval,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            result: None,
            error: None,
            checkpoints: Vec::new(),
            approved_by: None,
            approved_at: None,
            rejected_by: None,
            rejected_at: None,
            rejection_reason: None,
            cancel_requested: false,
            lease: None,
        }
    }
}

/// What kind of automation a schedule drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScheduleType {
    Audit,
    Content,
    Technical,
    Rankings,
}

impl std::fmt::Display for ScheduleType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ScheduleType::Audit => write!(f, "audit"),
            ScheduleType::Content => write!(f, "content"),
            ScheduleType::Technical => write!(f, "technical"),
            ScheduleType::Rankings => write!(f, "rankings"),
        }
    }
}

/// How often a schedule fires.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Frequency {
    Daily,
    Weekly,
    Custom,
}

/// A recurring automation rule created by an operator.
/// `enabled = false` is the only way to suppress a schedule without deleting it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Schedule {
    pub id: String,
    pub schedule_type: ScheduleType,
    pub frequency: Frequency,
    /// Required when frequency is `Custom`.
    pub cron_expression: Option<String>,
    pub enabled: bool,
    /// Company ids in scope.
    #[serde(default)]
    pub companies: Vec<String>,
    /// Handler-specific options, passed through opaque.
    #[serde(default)]
    pub config: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Schedule {
    pub fn new(schedule_type: ScheduleType, frequency: Frequency) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            schedule_type,
            frequency,
            cron_expression: None,
            enabled: true,
            companies: Vec::new(),
            config: serde_json::Value::Null,
            created_at: now,
            updated_at: now,
        }
    }

    /// Effective cron expression for this schedule.
    /// Daily audits run off-peak at 02:00, weekly rollups Monday 08:00
    /// (matching the shipped job defaults).
    pub fn cron(&self) -> Option<String> {
        match self.frequency {
            Frequency::Daily => Some("0 2 * * *".to_string()),
            Frequency::Weekly => Some("0 8 * * 1".to_string()),
            Frequency::Custom => self.cron_expression.clone(),
        }
    }
}

/// Job execution status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStatus {
    Running,
    Completed,
    Failed,
}

/// One historical run record of a scheduled or manually triggered job.
/// Append-only; never deleted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobExecution {
    pub id: String,
    pub job_name: String,
    pub status: ExecutionStatus,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub logs: Vec<String>,
    pub error: Option<String>,
}

impl JobExecution {
    pub fn begin(job_name: &str) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            job_name: job_name.to_string(),
            status: ExecutionStatus::Running,
            started_at: Utc::now(),
            completed_at: None,
            logs: Vec::new(),
            error: None,
        }
    }
}
