//! Per-category request queue.
//!
//! A category queue maps sub-priority to a FIFO bucket. Buckets are created
//! on first insertion and stay around (possibly empty) until the queue is
//! cleared, at which point only an empty bucket 0 remains.

use std::collections::{BTreeMap, VecDeque};

use serde::Serialize;

use slicewise_core::{RequestCategory, RequestMetadata};

use crate::request::PendingRequest;

/// Read-only copy of a queued request, used in snapshots.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueuedRequest {
    pub sequence: u64,
    pub category: RequestCategory,
    pub sub_priority: i32,
    pub metadata: RequestMetadata,
}

impl From<&PendingRequest> for QueuedRequest {
    fn from(pending: &PendingRequest) -> Self {
        Self {
            sequence: pending.sequence(),
            category: pending.category(),
            sub_priority: pending.sub_priority(),
            metadata: pending.metadata().clone(),
        }
    }
}

#[derive(Debug)]
pub(crate) struct CategoryQueue {
    buckets: BTreeMap<i32, VecDeque<PendingRequest>>,
}

impl CategoryQueue {
    pub fn new() -> Self {
        let mut buckets = BTreeMap::new();
        buckets.insert(0, VecDeque::new());
        Self { buckets }
    }

    /// Append to the tail of the request's sub-priority bucket.
    pub fn push(&mut self, request: PendingRequest) {
        self.buckets
            .entry(request.sub_priority())
            .or_default()
            .push_back(request);
    }

    /// Pop the head of the lowest-numbered non-empty bucket.
    pub fn pop_next(&mut self) -> Option<PendingRequest> {
        self.buckets
            .values_mut()
            .find(|bucket| !bucket.is_empty())
            .and_then(VecDeque::pop_front)
    }

    /// Evaluate `keep` for every queued request without moving anything.
    ///
    /// The mask lines up with the buckets in ascending sub-priority order, so
    /// a panicking predicate leaves the queue untouched.
    pub fn keep_mask<F>(&self, keep: &mut F) -> Vec<Vec<bool>>
    where
        F: FnMut(&PendingRequest) -> bool,
    {
        self.buckets
            .values()
            .map(|bucket| bucket.iter().map(|request| keep(request)).collect())
            .collect()
    }

    /// Remove the requests `mask` marks as rejected, handing them back.
    ///
    /// `mask` must come from [`keep_mask`](Self::keep_mask) on the unchanged
    /// queue.
    pub fn remove_rejected(&mut self, mask: Vec<Vec<bool>>) -> Vec<PendingRequest> {
        let mut removed = Vec::new();
        for (bucket, keep) in self.buckets.values_mut().zip(mask) {
            let mut kept = VecDeque::with_capacity(bucket.len());
            for (request, keep) in bucket.drain(..).zip(keep) {
                if keep {
                    kept.push_back(request);
                } else {
                    removed.push(request);
                }
            }
            *bucket = kept;
        }
        removed
    }

    /// Reset to a single empty bucket 0, handing back everything that was
    /// queued.
    pub fn clear(&mut self) -> Vec<PendingRequest> {
        std::mem::take(self)
            .buckets
            .into_values()
            .flatten()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.buckets.values().map(VecDeque::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.values().all(VecDeque::is_empty)
    }

    pub fn view(&self) -> BTreeMap<i32, Vec<QueuedRequest>> {
        self.buckets
            .iter()
            .map(|(priority, bucket)| (*priority, bucket.iter().map(QueuedRequest::from).collect()))
            .collect()
    }
}

impl Default for CategoryQueue {
    fn default() -> Self {
        Self::new()
    }
}
