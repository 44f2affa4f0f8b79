//! Diagnostic views of scheduler state.

use std::collections::BTreeMap;

use serde::Serialize;

use slicewise_core::RequestCategory;

use crate::queue::QueuedRequest;

/// Two-state lifecycle of the admission loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SchedulerPhase {
    /// Nothing queued, nothing in flight, no pass scheduled.
    Idle,
    /// Work is queued or in flight.
    Awake,
}

/// Lifetime counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SchedulerStats {
    pub submitted: u64,
    pub dispatched: u64,
    /// Work items whose future resolved `Ok`.
    pub completed: u64,
    /// Work items that resolved `Err`, panicked, or were aborted.
    pub failed: u64,
    /// Queued items dropped by `filter` or `clear`.
    pub discarded: u64,
    pub admission_passes: u64,
}

impl SchedulerStats {
    /// Dispatched items that have not reported back.
    pub fn outstanding(&self) -> u64 {
        self.dispatched
            .saturating_sub(self.completed)
            .saturating_sub(self.failed)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CategorySnapshot {
    pub category: RequestCategory,
    /// A work item that never completes stays counted here forever.
    pub in_flight: usize,
    /// Ceiling computed by the most recent admission pass.
    pub capacity: usize,
    pub buckets: BTreeMap<i32, Vec<QueuedRequest>>,
}

impl CategorySnapshot {
    pub fn queued(&self) -> usize {
        self.buckets.values().map(Vec::len).sum()
    }

    /// Queued requests in dispatch order.
    pub fn requests(&self) -> impl Iterator<Item = &QueuedRequest> {
        self.buckets.values().flatten()
    }
}

/// Detached copy of the queues. Mutating it has no effect on the scheduler.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueueSnapshot {
    pub phase: SchedulerPhase,
    pub categories: Vec<CategorySnapshot>,
    pub stats: SchedulerStats,
}

impl QueueSnapshot {
    pub fn category(&self, category: RequestCategory) -> &CategorySnapshot {
        &self.categories[category.index()]
    }

    pub fn total_queued(&self) -> usize {
        self.categories.iter().map(CategorySnapshot::queued).sum()
    }

    pub fn total_in_flight(&self) -> usize {
        self.categories.iter().map(|c| c.in_flight).sum()
    }
}
