//! Handler registry — maps agent names to statically-typed handlers.
//!
//! Populated once at process start. The dispatcher looks handlers up by name
//! and task creation fails fast with a validation error on an unregistered
//! name; there is no runtime string dispatch beyond this table.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use seopilot_core::{Result, SeoPilotError};

use crate::checkpoint::CheckpointRecorder;

/// What a handler run produced.
#[derive(Debug, Clone)]
pub enum HandlerOutcome {
    /// Work finished; value is stored as the task result.
    Complete(serde_json::Value),
    /// Work needs a human decision before the task may proceed.
    /// The partial result is retained on the task.
    NeedsReview(serde_json::Value),
}

/// Read-only view of the task handed to a handler.
#[derive(Debug, Clone)]
pub struct HandlerContext {
    pub task_id: String,
    pub agent_name: String,
    /// Opaque workspace/company identifiers and options from task creation.
    pub context: HashMap<String, serde_json::Value>,
    /// 1-based attempt number (> 1 on retries).
    pub attempt: u32,
}

/// An externally-supplied agent implementation.
///
/// Handlers signal failure through `SeoPilotError::transient` (retried with
/// backoff) or `SeoPilotError::permanent` (fails the task immediately). They
/// are expected to poll `sink.is_cancelled()` between checkpoints.
#[async_trait]
pub trait AgentHandler: Send + Sync {
    async fn run(&self, ctx: HandlerContext, sink: CheckpointRecorder) -> Result<HandlerOutcome>;
}

impl std::fmt::Debug for dyn AgentHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("AgentHandler")
    }
}

/// Name → handler table.
pub struct HandlerRegistry {
    handlers: RwLock<HashMap<String, Arc<dyn AgentHandler>>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self {
            handlers: RwLock::new(HashMap::new()),
        }
    }

    /// Register a handler under an agent name. Last registration wins.
    pub fn register(&self, agent_name: &str, handler: Arc<dyn AgentHandler>) {
        tracing::info!("Agent handler registered: '{agent_name}'");
        self.handlers
            .write()
            .unwrap()
            .insert(agent_name.to_string(), handler);
    }

    pub fn contains(&self, agent_name: &str) -> bool {
        self.handlers.read().unwrap().contains_key(agent_name)
    }

    /// Resolve a handler or fail with a validation error.
    pub fn resolve(&self, agent_name: &str) -> Result<Arc<dyn AgentHandler>> {
        self.handlers
            .read()
            .unwrap()
            .get(agent_name)
            .cloned()
            .ok_or_else(|| {
                SeoPilotError::Validation(format!("no handler registered for agent '{agent_name}'"))
            })
    }

    pub fn agent_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.handlers.read().unwrap().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.handlers.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for HandlerRegistry {
    fn default() -> Self {
        Self::new()
    }
}
