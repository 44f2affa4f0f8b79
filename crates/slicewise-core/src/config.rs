//! slicewise.toml configuration parser.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult};
use crate::types::RequestCategory;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SlicewiseConfig {
    #[serde(default)]
    pub scheduler: SchedulerConfig,
}

/// Scheduler tuning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Initial value of the global concurrency ceiling.
    pub max_simultaneous_requests: usize,
    /// Delay between a completion and the admission pass it triggers,
    /// e.g. `"5ms"`.
    pub debounce: String,
    pub capacity: CapacityPolicy,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_simultaneous_requests: 6,
            debounce: "5ms".to_string(),
            capacity: CapacityPolicy::default(),
        }
    }
}

impl SchedulerConfig {
    pub fn debounce_duration(&self) -> CoreResult<Duration> {
        parse_duration(&self.debounce)
    }
}

/// Per-category capacity derived from the global ceiling `M`.
///
/// `capacity(c) = max(M - offset(c), floor)`. The floor is never below 1, so
/// no category can be starved by a small `M`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CapacityPolicy {
    pub interaction_offset: usize,
    pub thumbnail_offset: usize,
    pub prefetch_offset: usize,
    pub floor: usize,
}

impl Default for CapacityPolicy {
    fn default() -> Self {
        Self {
            interaction_offset: 0,
            thumbnail_offset: 2,
            prefetch_offset: 1,
            floor: 1,
        }
    }
}

impl CapacityPolicy {
    pub fn offset(&self, category: RequestCategory) -> usize {
        match category {
            RequestCategory::Interaction => self.interaction_offset,
            RequestCategory::Thumbnail => self.thumbnail_offset,
            RequestCategory::Prefetch => self.prefetch_offset,
        }
    }

    pub fn capacity_for(&self, category: RequestCategory, max_simultaneous: usize) -> usize {
        max_simultaneous
            .saturating_sub(self.offset(category))
            .max(self.floor.max(1))
    }

    /// Capacities for every category, indexed by [`RequestCategory::index`].
    pub fn capacities(&self, max_simultaneous: usize) -> [usize; 3] {
        RequestCategory::ALL.map(|c| self.capacity_for(c, max_simultaneous))
    }
}

impl SlicewiseConfig {
    pub fn from_file(path: &Path) -> CoreResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> CoreResult<Self> {
        let config: SlicewiseConfig = toml::from_str(content)?;
        // Surface a bad duration at load time rather than on first use.
        config.scheduler.debounce_duration()?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> CoreResult<String> {
        Ok(toml::to_string_pretty(self)?)
    }
}

/// Parse `"<n>ms"` or `"<n>s"`.
pub fn parse_duration(s: &str) -> CoreResult<Duration> {
    let s = s.trim();
    let invalid = || CoreError::InvalidDuration(s.to_string());
    if let Some(ms) = s.strip_suffix("ms") {
        ms.trim().parse::<u64>().map(Duration::from_millis).map_err(|_| invalid())
    } else if let Some(secs) = s.strip_suffix('s') {
        secs.trim().parse::<u64>().map(Duration::from_secs).map_err(|_| invalid())
    } else {
        Err(invalid())
    }
}
