//! Store traits for the Matching Engine
//!
//! The engine reads orders from an [`OrderSource`], appends logs to a
//! [`LogSink`] and persists snapshots to a [`SnapshotStore`]. Expiry and
//! external cancellation re-enter the pipeline through an [`OrderWriter`]
//! writing to the same stream the source reads.

use async_trait::async_trait;

use crate::domain::Order;
use crate::log::LogRecord;
use crate::snapshot::Snapshot;

/// Errors that can occur in a store
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Redis error: {0}")]
    Redis(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Store closed")]
    Closed,

    #[error("Store error: {0}")]
    Other(String),
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Serialization(err.to_string())
    }
}

impl From<redis::RedisError> for StoreError {
    fn from(err: redis::RedisError) -> Self {
        StoreError::Redis(err.to_string())
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Offset-addressed stream of inbound orders for one product
#[async_trait]
pub trait OrderSource: Send {
    /// Position the reader so the next fetched order has an offset >= `offset`
    async fn set_offset(&mut self, offset: i64) -> StoreResult<()>;

    /// Wait for the next order
    async fn fetch_order(&mut self) -> StoreResult<(i64, Order)>;
}

/// Write side of the order stream
#[async_trait]
pub trait OrderWriter: Send + Sync {
    async fn submit_order(&self, order: &Order) -> StoreResult<()>;
}

/// Append-only destination of committed logs
#[async_trait]
pub trait LogSink: Send + Sync {
    async fn store(&self, logs: &[LogRecord]) -> StoreResult<()>;
}

#[async_trait]
pub trait SnapshotStore: Send + Sync {
    async fn store(&self, snapshot: &Snapshot) -> StoreResult<()>;

    /// Latest stored snapshot, `None` on first start
    async fn get_latest(&self) -> StoreResult<Option<Snapshot>>;
}

/// Offset-addressed stream of committed logs, read by downstream consumers
#[async_trait]
pub trait LogReader: Send {
    async fn set_offset(&mut self, offset: i64) -> StoreResult<()>;

    async fn fetch_log(&mut self) -> StoreResult<(i64, LogRecord)>;
}
