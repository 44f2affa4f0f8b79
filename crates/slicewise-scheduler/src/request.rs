//! Requests — deferred async work tagged with a category.

use std::fmt;
use std::future::Future;
use std::pin::Pin;

use slicewise_core::{RequestCategory, RequestMetadata};

/// The future a work item produces once dispatched.
///
/// `Ok` and `Err` are both "done" for accounting purposes.
pub type WorkFuture = Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send>>;

/// A zero-argument action that starts the work when invoked.
pub type Work = Box<dyn FnOnce() -> WorkFuture + Send>;

/// A request ready for submission.
///
/// ```
/// use slicewise_core::{RequestCategory, RequestMetadata};
/// use slicewise_scheduler::Request;
///
/// let request = Request::new(RequestCategory::Prefetch, || async { Ok(()) })
///     .with_sub_priority(-1)
///     .with_metadata(RequestMetadata::new().with("volumeId", "ct-1"));
/// assert_eq!(request.sub_priority(), -1);
/// ```
pub struct Request {
    category: RequestCategory,
    sub_priority: i32,
    metadata: RequestMetadata,
    work: Work,
}

impl Request {
    pub fn new<F, Fut>(category: RequestCategory, work: F) -> Self
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        Self {
            category,
            sub_priority: 0,
            metadata: RequestMetadata::new(),
            work: Box::new(move || Box::pin(work()) as WorkFuture),
        }
    }

    /// Lower values dispatch first within the category.
    pub fn with_sub_priority(mut self, sub_priority: i32) -> Self {
        self.sub_priority = sub_priority;
        self
    }

    pub fn with_metadata(mut self, metadata: RequestMetadata) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn category(&self) -> RequestCategory {
        self.category
    }

    pub fn sub_priority(&self) -> i32 {
        self.sub_priority
    }

    pub fn metadata(&self) -> &RequestMetadata {
        &self.metadata
    }

    pub(crate) fn into_pending(self, sequence: u64) -> PendingRequest {
        PendingRequest {
            sequence,
            category: self.category,
            sub_priority: self.sub_priority,
            metadata: self.metadata,
            work: self.work,
        }
    }
}

impl fmt::Debug for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Request")
            .field("category", &self.category)
            .field("sub_priority", &self.sub_priority)
            .field("metadata", &self.metadata)
            .finish()
    }
}

/// A queued request that has not been dispatched yet.
///
/// Filter predicates receive these by reference.
pub struct PendingRequest {
    sequence: u64,
    category: RequestCategory,
    sub_priority: i32,
    metadata: RequestMetadata,
    work: Work,
}

impl PendingRequest {
    /// Submission order across the whole scheduler.
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn category(&self) -> RequestCategory {
        self.category
    }

    pub fn sub_priority(&self) -> i32 {
        self.sub_priority
    }

    pub fn metadata(&self) -> &RequestMetadata {
        &self.metadata
    }

    pub(crate) fn into_work(self) -> Work {
        self.work
    }
}

impl fmt::Debug for PendingRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingRequest")
            .field("sequence", &self.sequence)
            .field("category", &self.category)
            .field("sub_priority", &self.sub_priority)
            .field("metadata", &self.metadata)
            .finish()
    }
}
