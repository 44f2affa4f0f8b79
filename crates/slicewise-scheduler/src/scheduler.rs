//! Scheduler — bounded, category-prioritised admission of async requests.
//!
//! The `Scheduler` buffers submitted requests in per-category queues and
//! admits them through admission passes:
//! - Capacity is recomputed every pass from the [`CapacitySignal`]
//! - A pass dispatches at most `M - in_flight` requests
//! - Categories are visited in strict precedence order, sub-priority
//!   buckets in ascending order, requests within a bucket FIFO
//! - Every completion schedules one debounced pass; completions that land
//!   while a pass is already pending coalesce into it
//!
//! The loop sleeps when nothing is queued or in flight and the next
//! submission wakes it with an immediate pass.

use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use slicewise_core::{CapacityPolicy, RequestCategory, RequestMetadata, SchedulerConfig};

use crate::capacity::{CapacitySignal, SharedCapacity};
use crate::error::{SchedulerError, SchedulerResult};
use crate::queue::CategoryQueue;
use crate::request::{PendingRequest, Request};
use crate::snapshot::{CategorySnapshot, QueueSnapshot, SchedulerPhase, SchedulerStats};

/// Handle to a request scheduler.
///
/// Clones share the same queues and counters, so a single instance can be
/// handed to every collaborator that needs to submit work.
#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<Inner>,
}

struct Inner {
    /// The whole mutable state sits behind this one lock.
    state: Mutex<SchedulerState>,
    signal: Box<dyn CapacitySignal>,
    policy: CapacityPolicy,
    debounce: Duration,
    runtime: Handle,
}

struct SchedulerState {
    /// Indexed by `RequestCategory::index`.
    queues: [CategoryQueue; 3],
    in_flight: [usize; 3],
    capacity: [usize; 3],
    phase: SchedulerPhase,
    /// The debounced pass, if one is waiting to fire.
    pending_pass: Option<JoinHandle<()>>,
    shut_down: bool,
    next_sequence: u64,
    stats: SchedulerStats,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PassTrigger {
    Wake,
    Debounce,
}

impl SchedulerState {
    fn total_in_flight(&self) -> usize {
        self.in_flight.iter().sum()
    }

    fn total_queued(&self) -> usize {
        self.queues.iter().map(CategoryQueue::len).sum()
    }

    fn is_drained(&self) -> bool {
        self.total_in_flight() == 0 && self.queues.iter().all(CategoryQueue::is_empty)
    }

    /// Pop the next admissible request.
    ///
    /// A category is only skipped when its own in-flight count has reached
    /// its capacity.
    fn next_admissible(&mut self) -> Option<PendingRequest> {
        for category in RequestCategory::ALL {
            let i = category.index();
            if self.in_flight[i] >= self.capacity[i] {
                continue;
            }
            if let Some(request) = self.queues[i].pop_next() {
                return Some(request);
            }
        }
        None
    }
}

impl Scheduler {
    /// Create a scheduler on the current tokio runtime.
    pub fn new(
        config: &SchedulerConfig,
        signal: impl CapacitySignal + 'static,
    ) -> SchedulerResult<Self> {
        let runtime = Handle::try_current().map_err(|_| SchedulerError::NoRuntime)?;
        Self::with_runtime(config, signal, runtime)
    }

    /// Create a scheduler with the default policy and debounce.
    pub fn with_defaults(signal: impl CapacitySignal + 'static) -> SchedulerResult<Self> {
        Self::new(&SchedulerConfig::default(), signal)
    }

    /// Create a scheduler whose ceiling starts at
    /// `config.max_simultaneous_requests` and can be adjusted through the
    /// returned handle.
    pub fn from_config(config: &SchedulerConfig) -> SchedulerResult<(Self, SharedCapacity)> {
        let capacity = SharedCapacity::new(config.max_simultaneous_requests);
        let scheduler = Self::new(config, capacity.clone())?;
        Ok((scheduler, capacity))
    }

    /// Create a scheduler that spawns work onto `runtime`.
    pub fn with_runtime(
        config: &SchedulerConfig,
        signal: impl CapacitySignal + 'static,
        runtime: Handle,
    ) -> SchedulerResult<Self> {
        let debounce = config.debounce_duration()?;
        let policy = config.capacity;
        let capacity = policy.capacities(signal.max_simultaneous_requests().max(1));

        let state = SchedulerState {
            queues: Default::default(),
            in_flight: [0; 3],
            capacity,
            phase: SchedulerPhase::Idle,
            pending_pass: None,
            shut_down: false,
            next_sequence: 0,
            stats: SchedulerStats::default(),
        };

        debug!(?debounce, ?policy, "scheduler created");
        Ok(Self {
            inner: Arc::new(Inner {
                state: Mutex::new(state),
                signal: Box::new(signal),
                policy,
                debounce,
                runtime,
            }),
        })
    }

    /// Queue `work` at the tail of its `(category, sub_priority)` bucket.
    ///
    /// If the scheduler is idle this runs an admission pass before
    /// returning, so the request may already be dispatched. If it is awake
    /// the request waits for the next pass.
    pub fn submit<F, Fut>(
        &self,
        category: RequestCategory,
        metadata: RequestMetadata,
        sub_priority: i32,
        work: F,
    ) where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.submit_request(
            Request::new(category, work)
                .with_sub_priority(sub_priority)
                .with_metadata(metadata),
        );
    }

    /// Like [`submit`](Self::submit) with the category given by name.
    ///
    /// Unknown names fail with [`SchedulerError::InvalidCategory`] and leave
    /// the queues untouched.
    pub fn submit_named<F, Fut>(
        &self,
        category: &str,
        metadata: RequestMetadata,
        sub_priority: i32,
        work: F,
    ) -> SchedulerResult<()>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let category = parse_category(category)?;
        self.submit(category, metadata, sub_priority, work);
        Ok(())
    }

    pub fn submit_request(&self, request: Request) {
        self.submit_all(std::iter::once(request));
    }

    /// Queue several requests at once.
    ///
    /// They are all queued before any admission pass runs, so a batch
    /// submitted to an idle scheduler is admitted by precedence rather than
    /// by submission order.
    pub fn submit_all<I>(&self, requests: I)
    where
        I: IntoIterator<Item = Request>,
    {
        let requests: Vec<Request> = requests.into_iter().collect();
        if requests.is_empty() {
            return;
        }

        let wake = {
            let mut state = self.inner.lock();
            for request in requests {
                let sequence = state.next_sequence;
                state.next_sequence += 1;
                trace!(
                    category = %request.category(),
                    sub_priority = request.sub_priority(),
                    sequence,
                    "request queued"
                );
                let pending = request.into_pending(sequence);
                state.queues[pending.category().index()].push(pending);
                state.stats.submitted += 1;
            }

            let was_idle = state.phase == SchedulerPhase::Idle;
            state.phase = SchedulerPhase::Awake;
            was_idle && !state.shut_down
        };

        if wake {
            debug!("scheduler waking");
            self.inner.run_pass(PassTrigger::Wake);
        }
    }

    /// Drop every queued request for which `keep` returns false.
    ///
    /// In-flight requests are unaffected. Returns the number discarded.
    /// `keep` runs under the scheduler lock and must not call back into the
    /// scheduler. If it panics, nothing is removed.
    pub fn filter<F>(&self, mut keep: F) -> usize
    where
        F: FnMut(&PendingRequest) -> bool,
    {
        let removed: Vec<PendingRequest> = {
            let mut state = self.inner.lock();
            // Every predicate call happens before any queue is touched.
            let masks: Vec<Vec<Vec<bool>>> = state
                .queues
                .iter()
                .map(|queue| queue.keep_mask(&mut keep))
                .collect();
            let removed: Vec<PendingRequest> = state
                .queues
                .iter_mut()
                .zip(masks)
                .flat_map(|(queue, mask)| queue.remove_rejected(mask))
                .collect();
            state.stats.discarded += removed.len() as u64;
            removed
        };

        debug!(removed = removed.len(), "queued requests filtered");
        removed.len()
    }

    /// Reset `category`'s queue to a single empty bucket 0.
    ///
    /// In-flight requests of that category run to completion. Returns the
    /// number discarded.
    pub fn clear(&self, category: RequestCategory) -> usize {
        let removed = {
            let mut state = self.inner.lock();
            let removed = state.queues[category.index()].clear();
            state.stats.discarded += removed.len() as u64;
            removed
        };

        debug!(%category, removed = removed.len(), "category queue cleared");
        removed.len()
    }

    /// Like [`clear`](Self::clear) with the category given by name.
    pub fn clear_named(&self, category: &str) -> SchedulerResult<usize> {
        let category = parse_category(category)?;
        Ok(self.clear(category))
    }

    /// Copy of the current queues, counters and capacities.
    pub fn snapshot(&self) -> QueueSnapshot {
        let state = self.inner.lock();
        let categories = RequestCategory::ALL
            .iter()
            .map(|&category| {
                let i = category.index();
                CategorySnapshot {
                    category,
                    in_flight: state.in_flight[i],
                    capacity: state.capacity[i],
                    buckets: state.queues[i].view(),
                }
            })
            .collect();

        QueueSnapshot {
            phase: state.phase,
            categories,
            stats: state.stats.clone(),
        }
    }

    pub fn stats(&self) -> SchedulerStats {
        self.inner.lock().stats.clone()
    }

    pub fn phase(&self) -> SchedulerPhase {
        self.inner.lock().phase
    }

    pub fn is_awake(&self) -> bool {
        self.phase() == SchedulerPhase::Awake
    }

    pub fn in_flight(&self, category: RequestCategory) -> usize {
        self.inner.lock().in_flight[category.index()]
    }

    /// Number of queued, not yet dispatched, requests.
    pub fn pending(&self) -> usize {
        self.inner.lock().total_queued()
    }

    /// Stop running admission passes.
    ///
    /// A pending debounced pass is aborted. Queued requests stay queued and
    /// in-flight requests still settle their accounting.
    pub fn shutdown(&self) {
        let mut state = self.inner.lock();
        state.shut_down = true;
        if let Some(handle) = state.pending_pass.take() {
            handle.abort();
        }
        info!(
            queued = state.total_queued(),
            in_flight = state.total_in_flight(),
            "scheduler shut down"
        );
    }
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, SchedulerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// One admission pass.
    ///
    /// Selection happens entirely under the lock; work callables are invoked
    /// after it is released, so anything they submit lands in a later pass.
    fn run_pass(self: &Arc<Self>, trigger: PassTrigger) {
        let admitted = {
            let mut state = self.lock();
            if trigger == PassTrigger::Debounce {
                // This task is the pending pass.
                state.pending_pass = None;
            }
            if state.shut_down {
                return;
            }

            let max = self.signal.max_simultaneous_requests().max(1);
            state.capacity = self.policy.capacities(max);
            state.stats.admission_passes += 1;

            let slots = max.saturating_sub(state.total_in_flight());
            let mut admitted = Vec::new();
            while admitted.len() < slots {
                let Some(request) = state.next_admissible() else {
                    break;
                };
                state.in_flight[request.category().index()] += 1;
                trace!(
                    category = %request.category(),
                    sub_priority = request.sub_priority(),
                    sequence = request.sequence(),
                    "request dispatched"
                );
                admitted.push(request);
            }
            state.stats.dispatched += admitted.len() as u64;

            trace!(?trigger, max, slots, admitted = admitted.len(), "admission pass");

            if state.is_drained() {
                state.phase = SchedulerPhase::Idle;
                if let Some(handle) = state.pending_pass.take() {
                    handle.abort();
                }
                debug!("scheduler idle");
            }
            admitted
        };

        let dispatches: Vec<(CompletionGuard, PendingRequest)> = admitted
            .into_iter()
            .map(|request| (CompletionGuard::new(self, request.category()), request))
            .collect();

        for (guard, request) in dispatches {
            let category = request.category();
            let sequence = request.sequence();
            // A callable that panics is settled as failed on its own; the
            // rest of the pass still dispatches.
            match panic::catch_unwind(AssertUnwindSafe(request.into_work())) {
                Ok(work) => {
                    self.runtime.spawn(async move {
                        let result = work.await;
                        guard.finish(result.is_ok());
                    });
                }
                Err(_) => {
                    warn!(%category, sequence, "request panicked while starting");
                    drop(guard);
                }
            }
        }
    }

    /// Release one in-flight slot and schedule the follow-up pass.
    fn complete(self: &Arc<Self>, category: RequestCategory, succeeded: bool) {
        let mut state = self.lock();
        let i = category.index();
        state.in_flight[i] = state.in_flight[i].saturating_sub(1);
        if succeeded {
            state.stats.completed += 1;
        } else {
            state.stats.failed += 1;
        }
        trace!(%category, in_flight = state.in_flight[i], succeeded, "request settled");

        if state.shut_down || state.pending_pass.is_some() {
            return;
        }

        let inner = Arc::downgrade(self);
        let debounce = self.debounce;
        state.pending_pass = Some(self.runtime.spawn(async move {
            tokio::time::sleep(debounce).await;
            if let Some(inner) = inner.upgrade() {
                inner.run_pass(PassTrigger::Debounce);
            }
        }));
    }
}

/// Releases a dispatched request's slot exactly once, however its task ends.
///
/// A task that panics or is aborted drops the guard without `finish` and is
/// counted as failed.
struct CompletionGuard {
    inner: Arc<Inner>,
    category: RequestCategory,
    succeeded: bool,
}

impl CompletionGuard {
    fn new(inner: &Arc<Inner>, category: RequestCategory) -> Self {
        Self {
            inner: Arc::clone(inner),
            category,
            succeeded: false,
        }
    }

    fn finish(mut self, succeeded: bool) {
        self.succeeded = succeeded;
    }
}

impl Drop for CompletionGuard {
    fn drop(&mut self) {
        self.inner.complete(self.category, self.succeeded);
    }
}

fn parse_category(name: &str) -> SchedulerResult<RequestCategory> {
    name.parse()
        .map_err(|_| SchedulerError::InvalidCategory(name.to_string()))
}
