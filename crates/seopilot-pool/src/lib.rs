//! SeoPilot task orchestration: authoritative task store, priority dispatch
//! pool, approval gate, and the checkpoint/audit/alert plumbing around them.

pub mod approval;
pub mod audit;
pub mod checkpoint;
pub mod notify;
pub mod pool;
pub mod queue;
pub mod registry;
pub mod retry;
pub mod store;

pub use approval::ApprovalGate;
pub use audit::{MemoryAuditLog, TracingAuditLog};
pub use checkpoint::CheckpointRecorder;
pub use notify::{TracingAlerts, WebhookAlerts, sink_from_config};
pub use pool::{AgentPool, PoolStats};
pub use queue::TaskQueue;
pub use registry::{AgentHandler, HandlerContext, HandlerOutcome, HandlerRegistry};
pub use retry::RetryPolicy;
pub use store::{CancelOutcome, StoreStats, TaskStore};
