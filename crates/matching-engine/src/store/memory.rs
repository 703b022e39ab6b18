//! In-memory stores
//!
//! Single-partition append logs with integer offsets starting at 1, used by
//! `matchd simulate`, in-process deployments and tests.

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{Notify, RwLock};
use tracing::debug;

use crate::domain::Order;
use crate::log::LogRecord;
use crate::snapshot::Snapshot;
use crate::store::traits::{
    LogReader, LogSink, OrderSource, OrderWriter, SnapshotStore, StoreError, StoreResult,
};

/// Append log shared by writers and any number of offset readers
#[derive(Debug)]
struct AppendLog<T> {
    entries: RwLock<Vec<T>>,
    notify: Notify,
    closed: AtomicBool,
}

impl<T: Clone> AppendLog<T> {
    fn new() -> Self {
        Self {
            entries: RwLock::new(Vec::new()),
            notify: Notify::new(),
            closed: AtomicBool::new(false),
        }
    }

    async fn append(&self, items: impl IntoIterator<Item = T>) -> StoreResult<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(StoreError::Closed);
        }
        self.entries.write().await.extend(items);
        self.notify.notify_waiters();
        Ok(())
    }

    /// Wait for the entry at zero-based `index`
    async fn wait_for(&self, index: usize) -> StoreResult<T> {
        loop {
            // register before checking so an append in between is not lost
            let notified = self.notify.notified();
            if let Some(entry) = self.entries.read().await.get(index) {
                return Ok(entry.clone());
            }
            if self.closed.load(Ordering::Acquire) {
                return Err(StoreError::Closed);
            }
            notified.await;
        }
    }

    fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.notify.notify_waiters();
    }
}

/// Offset -> zero-based index; offsets start at 1
fn start_index(offset: i64) -> usize {
    (offset.max(1) - 1) as usize
}

// ============================================================================
// Order queue
// ============================================================================

/// In-memory order stream of one product
#[derive(Debug, Clone)]
pub struct InMemoryOrderQueue {
    log: Arc<AppendLog<Order>>,
}

impl InMemoryOrderQueue {
    pub fn new() -> Self {
        Self {
            log: Arc::new(AppendLog::new()),
        }
    }

    /// A reader positioned at the first order
    pub fn reader(&self) -> InMemoryOrderReader {
        InMemoryOrderReader {
            log: Arc::clone(&self.log),
            next: 0,
        }
    }

    pub async fn len(&self) -> usize {
        self.log.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Reject further submissions; readers fail once they drain the queue
    pub fn close(&self) {
        self.log.close();
    }
}

impl Default for InMemoryOrderQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl OrderWriter for InMemoryOrderQueue {
    async fn submit_order(&self, order: &Order) -> StoreResult<()> {
        debug!(order_id = order.id, product = %order.product_id, status = ?order.status, "Order submitted");
        self.log.append([order.clone()]).await
    }
}

pub struct InMemoryOrderReader {
    log: Arc<AppendLog<Order>>,
    next: usize,
}

#[async_trait]
impl OrderSource for InMemoryOrderReader {
    async fn set_offset(&mut self, offset: i64) -> StoreResult<()> {
        self.next = start_index(offset);
        Ok(())
    }

    async fn fetch_order(&mut self) -> StoreResult<(i64, Order)> {
        let order = self.log.wait_for(self.next).await?;
        self.next += 1;
        Ok((self.next as i64, order))
    }
}

// ============================================================================
// Log store
// ============================================================================

/// In-memory log sink with offset readers for replay
#[derive(Debug, Clone)]
pub struct InMemoryLogStore {
    log: Arc<AppendLog<LogRecord>>,
}

impl InMemoryLogStore {
    pub fn new() -> Self {
        Self {
            log: Arc::new(AppendLog::new()),
        }
    }

    /// Every record stored so far
    pub async fn records(&self) -> Vec<LogRecord> {
        self.log.entries.read().await.clone()
    }

    pub fn reader(&self) -> InMemoryLogReader {
        InMemoryLogReader {
            log: Arc::clone(&self.log),
            next: 0,
        }
    }

    pub fn close(&self) {
        self.log.close();
    }
}

impl Default for InMemoryLogStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LogSink for InMemoryLogStore {
    async fn store(&self, logs: &[LogRecord]) -> StoreResult<()> {
        self.log.append(logs.iter().cloned()).await
    }
}

pub struct InMemoryLogReader {
    log: Arc<AppendLog<LogRecord>>,
    next: usize,
}

#[async_trait]
impl LogReader for InMemoryLogReader {
    async fn set_offset(&mut self, offset: i64) -> StoreResult<()> {
        self.next = start_index(offset);
        Ok(())
    }

    async fn fetch_log(&mut self) -> StoreResult<(i64, LogRecord)> {
        let record = self.log.wait_for(self.next).await?;
        self.next += 1;
        Ok((self.next as i64, record))
    }
}

// ============================================================================
// Snapshot store
// ============================================================================

/// Keeps only the latest snapshot
#[derive(Debug, Default)]
pub struct InMemorySnapshotStore {
    latest: RwLock<Option<Snapshot>>,
}

impl InMemorySnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_snapshot(snapshot: Snapshot) -> Self {
        Self {
            latest: RwLock::new(Some(snapshot)),
        }
    }
}

#[async_trait]
impl SnapshotStore for InMemorySnapshotStore {
    async fn store(&self, snapshot: &Snapshot) -> StoreResult<()> {
        *self.latest.write().await = Some(snapshot.clone());
        Ok(())
    }

    async fn get_latest(&self) -> StoreResult<Option<Snapshot>> {
        Ok(self.latest.read().await.clone())
    }
}
