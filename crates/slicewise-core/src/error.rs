//! Core error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("invalid request category: {0}")]
    InvalidCategory(String),

    #[error("invalid duration: {0}")]
    InvalidDuration(String),

    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),
}

pub type CoreResult<T> = Result<T, CoreError>;
