//! Matching engine error types

use thiserror::Error;

use crate::depth::DepthError;
use crate::store::StoreError;

/// Errors that can occur while matching or running an engine pipeline
#[derive(Error, Debug)]
pub enum MatchingError {
    /// Order rejected at ingestion
    #[error("Invalid order: {0}")]
    InvalidOrder(String),

    /// Book bookkeeping broke; the book can no longer be trusted
    #[error("Order book invariant violated: {0}")]
    Invariant(String),

    /// Log batch could not be persisted
    #[error("Log sink failure: {0}")]
    LogSink(#[source] StoreError),

    /// Snapshot store failure
    #[error("Snapshot store failure: {0}")]
    SnapshotStore(#[source] StoreError),

    /// Committed logs could not be read back during replay
    #[error("Log reader failure: {0}")]
    LogReader(#[source] StoreError),

    /// A log sequence was skipped during replay
    #[error("Log sequence gap for {product_id}: expected {expected}, got {actual}")]
    SequenceGap {
        product_id: String,
        expected: u64,
        actual: u64,
    },

    /// No engine runs for the product
    #[error("Unknown product: {0}")]
    UnknownProduct(String),

    /// The engine has shut down and no longer answers requests
    #[error("Engine for {0} is stopped")]
    EngineStopped(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl MatchingError {
    /// Errors after which the engine must stop instead of retrying.
    ///
    /// Snapshot store failures are only fatal when raised while loading the
    /// initial state; the snapshot stage handles its own failures.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            MatchingError::Invariant(_)
                | MatchingError::LogSink(_)
                | MatchingError::SnapshotStore(_)
                | MatchingError::SequenceGap { .. }
                | MatchingError::Internal(_)
        )
    }
}

impl From<DepthError> for MatchingError {
    fn from(err: DepthError) -> Self {
        MatchingError::Invariant(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatal_kinds() {
        assert!(MatchingError::Invariant("x".into()).is_fatal());
        assert!(MatchingError::LogSink(StoreError::Closed).is_fatal());
        assert!(!MatchingError::InvalidOrder("x".into()).is_fatal());
        assert!(!MatchingError::LogReader(StoreError::Other("x".into())).is_fatal());
        assert!(!MatchingError::EngineStopped("ART-USD".into()).is_fatal());
        assert!(!MatchingError::UnknownProduct("ART-EUR".into()).is_fatal());
    }

    #[test]
    fn test_depth_error_is_invariant() {
        let err: MatchingError = DepthError::NotFound(7).into();
        assert!(matches!(err, MatchingError::Invariant(_)));
        assert!(err.to_string().contains('7'));
    }
}
