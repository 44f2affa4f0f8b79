//! Capacity signals — where the global concurrency ceiling comes from.
//!
//! The scheduler reads the signal fresh on every admission pass, so a value
//! that changes at runtime takes effect on the next pass without a restart.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Source of the "max simultaneous requests" ceiling.
pub trait CapacitySignal: Send + Sync {
    fn max_simultaneous_requests(&self) -> usize;
}

impl<F> CapacitySignal for F
where
    F: Fn() -> usize + Send + Sync,
{
    fn max_simultaneous_requests(&self) -> usize {
        self()
    }
}

/// A ceiling that never changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixedCapacity(pub usize);

impl CapacitySignal for FixedCapacity {
    fn max_simultaneous_requests(&self) -> usize {
        self.0
    }
}

/// A ceiling callers can adjust at runtime, e.g. from observed network
/// throughput.
///
/// Clones share the same value. Reads and writes are lock-free.
#[derive(Debug, Clone)]
pub struct SharedCapacity {
    value: Arc<AtomicUsize>,
}

impl SharedCapacity {
    pub fn new(initial: usize) -> Self {
        Self {
            value: Arc::new(AtomicUsize::new(initial)),
        }
    }

    pub fn set(&self, value: usize) {
        self.value.store(value, Ordering::Relaxed);
    }

    pub fn get(&self) -> usize {
        self.value.load(Ordering::Relaxed)
    }
}

impl CapacitySignal for SharedCapacity {
    fn max_simultaneous_requests(&self) -> usize {
        self.get()
    }
}
