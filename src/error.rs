//! Error types shared by the collector, the flattener and the CLI layer.

use std::time::Duration;
use thiserror::Error;

/// A rule record that cannot be turned into report rows.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FlattenError {
    #[error("malformed rule: field `{field}` {detail}")]
    DataShape { field: &'static str, detail: String },
}

impl FlattenError {
    pub fn missing(field: &'static str) -> Self {
        FlattenError::DataShape {
            field,
            detail: "is missing".to_string(),
        }
    }

    pub fn invalid(field: &'static str, detail: impl Into<String>) -> Self {
        FlattenError::DataShape {
            field,
            detail: detail.into(),
        }
    }
}

/// Failures talking to the provider.
#[derive(Debug, Error)]
pub enum CollectError {
    #[error("{operation} timed out after {after:?}")]
    Timeout {
        operation: String,
        after: Duration,
    },

    #[error("{operation} failed: {message}")]
    Provider { operation: String, message: String },

    #[error("failed to run the aws CLI: {0}")]
    Spawn(#[from] std::io::Error),

    #[error("unreadable provider response: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Shape(#[from] FlattenError),
}

/// Invalid option values.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("concurrency must be at least 1, got {0}")]
    InvalidConcurrency(usize),

    #[error("concurrency must be at most {max}, got {value}")]
    ConcurrencyTooHigh { value: usize, max: usize },

    #[error("timeout must be at least 1 second, got {0}")]
    InvalidTimeout(u64),

    #[error("invalid region code: {0:?}")]
    InvalidRegion(String),
}
