//! Error types for the battle analytics core

use crate::coverage::TimeRange;
use thiserror::Error;

/// Result type alias for analytics operations
pub type Result<T> = std::result::Result<T, AnalyticsError>;

/// Errors that can occur in the analytics core
#[derive(Error, Debug)]
pub enum AnalyticsError {
    /// The external fetch collaborator rejected a request
    #[error("Fetch failed for partition {key} over {range}: {source}")]
    Fetch {
        key: String,
        range: TimeRange,
        #[source]
        source: anyhow::Error,
    },

    /// A load that is not scoped to a time range (seasons, master statistics) failed
    #[error("Loading {target} failed: {source}")]
    Load {
        target: String,
        #[source]
        source: anyhow::Error,
    },

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Malformed partition key text
    #[error("Invalid partition key: {0}")]
    InvalidPartition(String),

    /// I/O errors (config and fixture files)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON decoding errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// TOML decoding errors
    #[error("Config parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),

    /// TOML encoding errors
    #[error("Config encode error: {0}")]
    ConfigEncode(#[from] toml::ser::Error),
}

impl AnalyticsError {
    /// Create a new fetch error for a partition and range
    pub fn fetch(key: impl ToString, range: TimeRange, source: anyhow::Error) -> Self {
        Self::Fetch { key: key.to_string(), range, source }
    }

    /// Create a new load error
    pub fn load(target: impl Into<String>, source: anyhow::Error) -> Self {
        Self::Load { target: target.into(), source }
    }

    /// Create a new configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a new invalid partition error
    pub fn invalid_partition(msg: impl Into<String>) -> Self {
        Self::InvalidPartition(msg.into())
    }

    /// Whether this error came from an external collaborator
    pub fn is_fetch(&self) -> bool {
        matches!(self, Self::Fetch { .. } | Self::Load { .. })
    }
}
