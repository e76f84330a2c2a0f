//! Checkpoint recorder — the handler's window into the task store.
//!
//! Bound to one (task, lease) pair; appends go through the store's lease
//! check, so a recorder outliving its lease can no longer write.

use std::sync::Arc;

use seopilot_core::{Result, ToolCall};

use crate::store::TaskStore;

/// Handle given to a handler for appending progress snapshots and polling
/// cooperative cancellation.
#[derive(Clone)]
pub struct CheckpointRecorder {
    store: Arc<TaskStore>,
    task_id: String,
    lease: u64,
}

impl CheckpointRecorder {
    pub(crate) fn new(store: Arc<TaskStore>, task_id: String, lease: u64) -> Self {
        Self {
            store,
            task_id,
            lease,
        }
    }

    pub fn task_id(&self) -> &str {
        &self.task_id
    }

    /// Append a checkpoint with a handler-defined state label.
    pub fn record(&self, state: &str, content: &str) -> Result<()> {
        self.store
            .append_checkpoint(&self.task_id, self.lease, state, content, vec![])
    }

    /// Append a checkpoint carrying the tool calls made since the last one.
    pub fn record_tool_calls(
        &self,
        state: &str,
        content: &str,
        tool_calls: Vec<ToolCall>,
    ) -> Result<()> {
        self.store
            .append_checkpoint(&self.task_id, self.lease, state, content, tool_calls)
    }

    /// Cooperative cancellation: handlers should poll this between
    /// checkpoints and return early when it flips.
    pub fn is_cancelled(&self) -> bool {
        self.store.cancel_requested(&self.task_id)
    }
}
