//! slicewise-scheduler — bounded admission of async image-load requests.
//!
//! Accepts a bursty stream of load requests (interactive slice fetches,
//! thumbnails, background volume prefetch) and runs only a bounded number
//! at once, honouring category precedence and sub-priority order.
//!
//! # Architecture
//!
//! ```text
//! Scheduler (cloneable handle)
//!   ├── CapacitySignal (read every pass → M)
//!   ├── CapacityPolicy (M → per-category ceilings)
//!   └── Mutex<SchedulerState>
//!       ├── CategoryQueue × 3 (sub-priority → FIFO bucket)
//!       ├── in-flight count × 3
//!       ├── Idle / Awake phase
//!       └── pending debounced pass (JoinHandle)
//! ```
//!
//! # Example
//!
//! ```
//! use slicewise_core::{RequestCategory, RequestMetadata};
//! use slicewise_scheduler::{FixedCapacity, Scheduler};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> anyhow::Result<()> {
//! let scheduler = Scheduler::with_defaults(FixedCapacity(6))?;
//!
//! scheduler.submit(
//!     RequestCategory::Prefetch,
//!     RequestMetadata::new().with("volumeId", "ct-1").with("sliceIndex", 0),
//!     0,
//!     || async { Ok(()) },
//! );
//!
//! // Drop everything still queued for the volume.
//! scheduler.filter(|r| !r.metadata().matches("volumeId", "ct-1"));
//! # Ok(())
//! # }
//! ```

pub mod capacity;
pub mod error;
pub mod queue;
pub mod request;
pub mod scheduler;
pub mod snapshot;

pub use capacity::{CapacitySignal, FixedCapacity, SharedCapacity};
pub use error::{SchedulerError, SchedulerResult};
pub use queue::QueuedRequest;
pub use request::{PendingRequest, Request};
pub use scheduler::Scheduler;
pub use snapshot::{CategorySnapshot, QueueSnapshot, SchedulerPhase, SchedulerStats};
