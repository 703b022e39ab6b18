//! Order Matching Engine
//!
//! Matches orders per product with price/time priority and emits a gapless,
//! strictly increasing stream of log records per product. Each product runs
//! its own [`Engine`] pipeline (fetch, apply, commit, snapshot, expire) and
//! recovers from the latest snapshot plus the tail of its order stream.
//!
//! # Example
//!
//! ```no_run
//! use matching_engine::{Engine, EngineSettings, Product};
//! use matching_engine::store::{InMemoryLogStore, InMemoryOrderQueue, InMemorySnapshotStore};
//! use std::sync::Arc;
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn run(product: Product) -> matching_engine::Result<()> {
//! let queue = InMemoryOrderQueue::new();
//! let engine = Engine::new(
//!     product,
//!     EngineSettings::default(),
//!     Box::new(queue.reader()),
//!     Arc::new(queue.clone()),
//!     Arc::new(InMemoryLogStore::new()),
//!     Arc::new(InMemorySnapshotStore::new()),
//! )
//! .await?;
//! let handle = engine.start(CancellationToken::new());
//! handle.wait_for_sequence(1).await?;
//! # Ok(())
//! # }
//! ```

pub mod backoff;
pub mod depth;
pub mod domain;
pub mod engine;
pub mod error;
mod expiry;
pub mod log;
pub mod metrics;
pub mod order_book;
pub mod query;
pub mod registry;
pub mod replay;
pub mod snapshot;
pub mod store;
pub mod window;

pub use domain::{
    BookOrder, DoneReason, Order, OrderStatus, OrderType, Product, Side, MAX_ORDER_AMOUNT, NEVER_EXPIRES,
};
pub use engine::{Engine, EngineHandle, EngineSettings};
pub use error::MatchingError;
pub use log::{DoneLog, LogRecord, MatchLog, OpenLog, PendingLog};
pub use metrics::EngineMetrics;
pub use order_book::{BookDepth, Estimate, LastTrade, OrderBook};
pub use query::BookQuery;
pub use registry::{EngineRegistry, EngineStores, InMemoryStoreFactory, StoreFactory};
pub use replay::{LogObserver, LogReplayer};
pub use snapshot::{OrderBookSnapshot, Snapshot};
pub use window::Window;

/// Result type for matching operations
pub type Result<T> = std::result::Result<T, MatchingError>;
