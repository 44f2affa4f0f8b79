//! Shared types used across slicewise crates.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::CoreError;

/// Coarse priority class for scheduled requests.
///
/// The set is closed. Precedence is absolute and follows declaration order:
/// an `Interaction` request always outranks any `Thumbnail` or `Prefetch`
/// request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestCategory {
    /// A fetch the user is actively waiting on (the slice on screen).
    Interaction,
    /// A thumbnail fetch for series browsing.
    Thumbnail,
    /// Background volume prefetch.
    Prefetch,
}

impl RequestCategory {
    /// All categories, in admission precedence order.
    pub const ALL: [RequestCategory; 3] = [
        RequestCategory::Interaction,
        RequestCategory::Thumbnail,
        RequestCategory::Prefetch,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RequestCategory::Interaction => "interaction",
            RequestCategory::Thumbnail => "thumbnail",
            RequestCategory::Prefetch => "prefetch",
        }
    }

    /// Position in precedence order, usable as an array index.
    pub fn index(&self) -> usize {
        match self {
            RequestCategory::Interaction => 0,
            RequestCategory::Thumbnail => 1,
            RequestCategory::Prefetch => 2,
        }
    }
}

impl fmt::Display for RequestCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for RequestCategory {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "interaction" => Ok(RequestCategory::Interaction),
            "thumbnail" => Ok(RequestCategory::Thumbnail),
            "prefetch" => Ok(RequestCategory::Prefetch),
            other => Err(CoreError::InvalidCategory(other.to_string())),
        }
    }
}

/// Opaque key/value payload carried by a request.
///
/// The scheduler never interprets it. Callers use it to recognise their own
/// requests later, e.g. to drop every queued slice of a volume that was
/// just closed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestMetadata(Map<String, Value>);

impl RequestMetadata {
    pub fn new() -> Self {
        Self(Map::new())
    }

    /// Builder-style insert.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.0.insert(key.into(), value.into())
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(Value::as_str)
    }

    pub fn get_i64(&self, key: &str) -> Option<i64> {
        self.0.get(key).and_then(Value::as_i64)
    }

    /// True when `key` is present and equal to `value`.
    pub fn matches(&self, key: &str, value: impl Into<Value>) -> bool {
        self.0.get(key) == Some(&value.into())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}
