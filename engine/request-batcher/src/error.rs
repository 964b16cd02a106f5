//! Error types for the request batcher

use std::sync::Arc;
use thiserror::Error;

/// Result type alias for batcher operations
pub type Result<T> = std::result::Result<T, BatchError>;

/// Errors delivered to queued requests and configuration loaders.
///
/// Cloneable so one dispatch failure can be handed to every item of its batch.
#[derive(Error, Debug, Clone)]
pub enum BatchError {
    /// At least one request in the batch was rejected by the dispatcher
    #[error("Batch dispatch failed: {0}")]
    Dispatch(Arc<anyhow::Error>),

    /// The batcher was dropped before the request settled
    #[error("Batcher closed before the request settled")]
    Closed,

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),
}

impl BatchError {
    /// Wrap a dispatcher failure
    pub fn dispatch(source: anyhow::Error) -> Self {
        Self::Dispatch(Arc::new(source))
    }

    /// Create a new configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dispatch_error_is_shared_between_clones() {
        let err = BatchError::dispatch(anyhow::anyhow!("backend unavailable"));
        let copy = err.clone();
        match (&err, &copy) {
            (BatchError::Dispatch(a), BatchError::Dispatch(b)) => assert!(Arc::ptr_eq(a, b)),
            _ => panic!("expected dispatch errors"),
        }
        assert_eq!(copy.to_string(), "Batch dispatch failed: backend unavailable");
    }
}
