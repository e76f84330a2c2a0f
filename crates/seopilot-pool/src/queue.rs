//! Shared priority queue feeding the worker pool.
//!
//! Ordering: priority rank strictly dominates, ties broken FIFO by an
//! enqueue sequence number. Entries are task ids only — workers re-read
//! authoritative state from the store on claim, so a stale entry (cancelled
//! while queued) is harmlessly discarded when its CAS loses.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};

use seopilot_core::TaskPriority;
use tokio::sync::Notify;

#[derive(Debug, Clone, PartialEq, Eq)]
struct QueueEntry {
    rank: u8,
    seq: u64,
    task_id: String,
}

impl Ord for QueueEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // BinaryHeap is a max-heap: "greater" pops first, so invert both keys.
        other
            .rank
            .cmp(&self.rank)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for QueueEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Priority queue with an async wakeup for idle workers.
pub struct TaskQueue {
    heap: Mutex<BinaryHeap<QueueEntry>>,
    seq: AtomicU64,
    notify: Notify,
}

impl TaskQueue {
    pub fn new() -> Self {
        Self {
            heap: Mutex::new(BinaryHeap::new()),
            seq: AtomicU64::new(0),
            notify: Notify::new(),
        }
    }

    /// Enqueue a task id at the given priority and wake one worker.
    pub fn push(&self, task_id: &str, priority: TaskPriority) {
        let seq = self.seq.fetch_add(1, AtomicOrdering::Relaxed);
        self.heap.lock().unwrap().push(QueueEntry {
            rank: priority.rank(),
            seq,
            task_id: task_id.to_string(),
        });
        self.notify.notify_one();
    }

    /// Pop the highest-priority entry, if any.
    pub fn pop(&self) -> Option<String> {
        self.heap.lock().unwrap().pop().map(|e| e.task_id)
    }

    pub fn len(&self) -> usize {
        self.heap.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Wait until a push wakes us. `Notify` stores one permit, so a push that
    /// raced this call is not lost.
    pub async fn wait(&self) {
        self.notify.notified().await;
    }

    /// Wake all waiters (used on shutdown so workers can observe the flag).
    pub fn wake_all(&self) {
        self.notify.notify_waiters();
    }
}

impl Default for TaskQueue {
    fn default() -> Self {
        Self::new()
    }
}
