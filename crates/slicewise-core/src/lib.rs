//! slicewise-core — shared vocabulary for the slicewise request scheduler.
//!
//! Holds the request categories, the opaque metadata payload that travels
//! with every scheduled request, the capacity policy that turns a single
//! "max simultaneous requests" signal into per-category ceilings, and the
//! `slicewise.toml` configuration format.

pub mod config;
pub mod error;
pub mod types;

pub use config::{CapacityPolicy, SchedulerConfig, SlicewiseConfig};
pub use error::{CoreError, CoreResult};
pub use types::*;
