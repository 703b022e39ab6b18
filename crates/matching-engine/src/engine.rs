//! Per-product matching pipeline.
//!
//! An [`Engine`] owns one order book and runs five stages as tokio tasks
//! connected by bounded channels:
//!
//! ```text
//! source -> fetch -> apply -> commit -> log sink
//!             |        ^  \      |
//!             v        |   \     v (approved snapshots)
//!           expire ----+    snapshot -> snapshot store
//! ```
//!
//! Only the apply stage touches the book. Logs are committed in the order
//! apply emitted them, and a snapshot is only persisted once every log it
//! reflects has been accepted by the sink.

use rust_decimal::Decimal;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, watch};
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use crate::backoff::Backoff;
use crate::domain::{Order, OrderStatus, OrderType, Product, Side, NEVER_EXPIRES};
use crate::error::MatchingError;
use crate::expiry::ExpiryTimer;
use crate::log::LogRecord;
use crate::metrics::EngineMetrics;
use crate::order_book::{BookDepth, Estimate, LastTrade, OrderBook};
use crate::query::{BookQuery, BookRequest};
use crate::snapshot::Snapshot;
use crate::store::{LogSink, OrderSource, OrderWriter, SnapshotStore};
use crate::Result;

// ============================================================================
// Settings
// ============================================================================

/// Pipeline tunables of one engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineSettings {
    pub order_channel_capacity: usize,
    pub log_channel_capacity: usize,
    pub expiry_channel_capacity: usize,
    pub snapshot_channel_capacity: usize,
    pub request_channel_capacity: usize,
    pub commit_batch_size: usize,
    pub snapshot_interval: Duration,
    /// Applied offsets required since the last stored snapshot
    pub snapshot_min_offset_delta: i64,
    pub order_id_window_capacity: u64,
    pub expiry_tick: Duration,
    pub fetch_backoff_initial: Duration,
    pub fetch_backoff_max: Duration,
}

impl From<&config::MatchingConfig> for EngineSettings {
    fn from(cfg: &config::MatchingConfig) -> Self {
        Self {
            order_channel_capacity: cfg.order_channel_capacity,
            log_channel_capacity: cfg.log_channel_capacity,
            expiry_channel_capacity: cfg.expiry_channel_capacity,
            snapshot_channel_capacity: cfg.snapshot_channel_capacity,
            request_channel_capacity: cfg.request_channel_capacity,
            commit_batch_size: cfg.commit_batch_size,
            snapshot_interval: Duration::from_secs(cfg.snapshot_interval_seconds),
            snapshot_min_offset_delta: cfg.snapshot_min_offset_delta,
            order_id_window_capacity: cfg.order_id_window_capacity,
            expiry_tick: Duration::from_millis(cfg.expiry_tick_millis),
            fetch_backoff_initial: Duration::from_millis(cfg.fetch_backoff_initial_millis),
            fetch_backoff_max: Duration::from_millis(cfg.fetch_backoff_max_millis),
        }
    }
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self::from(&config::MatchingConfig::default())
    }
}

/// Ask apply for a snapshot if it moved past `order_offset`
#[derive(Debug, Clone, Copy)]
struct SnapshotRequest {
    order_offset: i64,
}

/// Send unless the engine is shutting down. False when the item was not delivered.
async fn send_or_stop<T>(tx: &mpsc::Sender<T>, item: T, shutdown: &CancellationToken) -> bool {
    tokio::select! {
        _ = shutdown.cancelled() => false,
        sent = tx.send(item) => sent.is_ok(),
    }
}

fn spawn_stage<F>(
    stage: &'static str,
    product_id: String,
    shutdown: CancellationToken,
    fut: F,
) -> JoinHandle<Result<()>>
where
    F: Future<Output = Result<()>> + Send + 'static,
{
    tokio::spawn(async move {
        // a panicking stage still takes the rest of the engine down
        let _guard = shutdown.clone().drop_guard();
        info!(product = %product_id, stage, "Stage started");
        let result = fut.await;
        match &result {
            Ok(()) => info!(product = %product_id, stage, "Stage stopped"),
            Err(err) => {
                error!(product = %product_id, stage, %err, fatal = err.is_fatal(), "Stage failed, stopping engine");
                shutdown.cancel();
            }
        }
        result
    })
}

// ============================================================================
// Engine
// ============================================================================

pub struct Engine {
    product: Product,
    settings: EngineSettings,
    book: OrderBook,
    source: Box<dyn OrderSource>,
    writer: Arc<dyn OrderWriter>,
    log_sink: Arc<dyn LogSink>,
    snapshot_store: Arc<dyn SnapshotStore>,
    restored_offset: i64,
    dangling: Vec<Order>,
    metrics: EngineMetrics,
}

impl Engine {
    /// Build an engine and restore its book from the latest snapshot.
    ///
    /// Failing to read the latest snapshot is fatal: the engine cannot tell
    /// where to resume.
    pub async fn new(
        product: Product,
        settings: EngineSettings,
        source: Box<dyn OrderSource>,
        writer: Arc<dyn OrderWriter>,
        log_sink: Arc<dyn LogSink>,
        snapshot_store: Arc<dyn SnapshotStore>,
    ) -> Result<Self> {
        let mut book = OrderBook::new(product.clone(), settings.order_id_window_capacity);
        let mut restored_offset = 0;
        let mut dangling = Vec::new();

        match snapshot_store
            .get_latest()
            .await
            .map_err(MatchingError::SnapshotStore)?
        {
            Some(snapshot) => {
                dangling = book.restore(&snapshot.order_book_snapshot);
                restored_offset = snapshot.order_offset;
                info!(
                    product = %product.id,
                    offset = restored_offset,
                    log_seq = book.log_seq(),
                    trade_seq = book.trade_seq(),
                    orders = dangling.len(),
                    "Engine restored from snapshot"
                );
            }
            None => info!(product = %product.id, "No snapshot found, starting with an empty book"),
        }

        let metrics = EngineMetrics::new(&product.id);
        Ok(Self {
            product,
            settings,
            book,
            source,
            writer,
            log_sink,
            snapshot_store,
            restored_offset,
            dangling,
            metrics,
        })
    }

    pub fn product(&self) -> &Product {
        &self.product
    }

    /// Source offset the restored snapshot was taken at
    pub fn restored_offset(&self) -> i64 {
        self.restored_offset
    }

    pub fn log_seq(&self) -> u64 {
        self.book.log_seq()
    }

    /// Spawn the pipeline. Cancelling `shutdown` stops every stage; a fatal
    /// stage error stops only this engine.
    pub fn start(self, shutdown: CancellationToken) -> EngineHandle {
        let token = shutdown.child_token();
        let s = &self.settings;
        let product_id = self.product.id.clone();

        let (order_tx, order_rx) = mpsc::channel(s.order_channel_capacity.max(1));
        let (log_tx, log_rx) = mpsc::channel(s.log_channel_capacity.max(1));
        let (expiry_tx, expiry_rx) = mpsc::channel(s.expiry_channel_capacity.max(1));
        let (snapshot_req_tx, snapshot_req_rx) = mpsc::channel(s.snapshot_channel_capacity.max(1));
        let (approve_tx, approve_rx) = mpsc::channel(s.snapshot_channel_capacity.max(1));
        let (snapshot_tx, snapshot_rx) = mpsc::channel(s.snapshot_channel_capacity.max(1));
        let (request_tx, request_rx) = mpsc::channel(s.request_channel_capacity.max(1));
        let (committed_tx, committed_rx) = watch::channel(self.book.log_seq());
        let query = BookQuery::new(product_id.clone(), request_tx);

        let fetch = FetchStage {
            product_id: product_id.clone(),
            source: self.source,
            start_offset: self.restored_offset,
            order_tx,
            backoff: Backoff::new(s.fetch_backoff_initial, s.fetch_backoff_max),
            metrics: self.metrics.clone(),
            shutdown: token.clone(),
        };
        let commit = CommitStage {
            product_id: product_id.clone(),
            log_sink: self.log_sink,
            last_seq: self.book.log_seq(),
            committed_seq: self.book.log_seq(),
            batch: Vec::with_capacity(s.commit_batch_size),
            batch_size: s.commit_batch_size.max(1),
            pending: None,
            log_rx,
            approve_rx,
            snapshot_tx,
            committed_tx,
            metrics: self.metrics.clone(),
            shutdown: token.clone(),
        };
        let snapshot = SnapshotStage {
            product_id: product_id.clone(),
            store: self.snapshot_store,
            last_offset: self.restored_offset,
            interval: s.snapshot_interval,
            request_tx: snapshot_req_tx,
            snapshot_rx,
            metrics: self.metrics.clone(),
            shutdown: token.clone(),
        };
        let expire = ExpireStage {
            expiry_rx,
            tick: s.expiry_tick,
            backoff: Backoff::new(s.fetch_backoff_initial, s.fetch_backoff_max),
            writer: self.writer,
            query: query.clone(),
            metrics: self.metrics.clone(),
            shutdown: token.clone(),
        };
        let apply = ApplyStage {
            product_id: product_id.clone(),
            applied_offset: self.restored_offset,
            min_delta: s.snapshot_min_offset_delta,
            book: self.book,
            dangling: self.dangling,
            order_rx,
            snapshot_req_rx,
            request_rx,
            log_tx,
            expiry_tx,
            approve_tx,
            metrics: self.metrics,
            shutdown: token.clone(),
        };

        let tasks = vec![
            ("fetch", spawn_stage("fetch", product_id.clone(), token.clone(), fetch.run())),
            ("apply", spawn_stage("apply", product_id.clone(), token.clone(), apply.run())),
            ("commit", spawn_stage("commit", product_id.clone(), token.clone(), commit.run())),
            ("snapshot", spawn_stage("snapshot", product_id.clone(), token.clone(), snapshot.run())),
            ("expire", spawn_stage("expire", product_id.clone(), token.clone(), expire.run())),
        ];

        info!(product = %product_id, "Engine started");
        EngineHandle {
            product_id,
            query,
            committed: committed_rx,
            shutdown: token,
            tasks,
        }
    }
}

// ============================================================================
// Handle
// ============================================================================

/// Running engine: read API, commit progress and shutdown
pub struct EngineHandle {
    product_id: String,
    query: BookQuery,
    committed: watch::Receiver<u64>,
    shutdown: CancellationToken,
    tasks: Vec<(&'static str, JoinHandle<Result<()>>)>,
}

impl EngineHandle {
    pub fn product_id(&self) -> &str {
        &self.product_id
    }

    pub fn query(&self) -> BookQuery {
        self.query.clone()
    }

    pub async fn depth(&self, art: i64) -> Result<BookDepth> {
        self.query.depth(art).await
    }

    pub async fn estimate(&self, art: i64, side: Side, size: Decimal) -> Result<Estimate> {
        self.query.estimate(art, side, size).await
    }

    pub async fn last_trade(&self, art: i64) -> Result<Option<LastTrade>> {
        self.query.last_trade(art).await
    }

    /// Last log sequence accepted by the log sink
    pub fn committed_sequence(&self) -> u64 {
        *self.committed.borrow()
    }

    pub fn subscribe_committed(&self) -> watch::Receiver<u64> {
        self.committed.clone()
    }

    /// Wait until the sink accepted every log up to `sequence`
    pub async fn wait_for_sequence(&self, sequence: u64) -> Result<()> {
        let mut rx = self.committed.clone();
        rx.wait_for(|committed| *committed >= sequence)
            .await
            .map(|_| ())
            .map_err(|_| MatchingError::EngineStopped(self.product_id.clone()))
    }

    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    pub fn is_stopped(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Wait for every stage; returns the first stage error
    pub async fn join(self) -> Result<()> {
        let mut first_error = None;
        for (stage, task) in self.tasks {
            let result = match task.await {
                Ok(result) => result,
                Err(err) => Err(MatchingError::Internal(format!("{} stage aborted: {}", stage, err))),
            };
            if let Err(err) = result {
                first_error.get_or_insert(err);
            }
        }
        info!(product = %self.product_id, "Engine stopped");
        first_error.map_or(Ok(()), Err)
    }
}

// ============================================================================
// Fetch
// ============================================================================

struct FetchStage {
    product_id: String,
    source: Box<dyn OrderSource>,
    start_offset: i64,
    order_tx: mpsc::Sender<(i64, Order)>,
    backoff: Backoff,
    metrics: EngineMetrics,
    shutdown: CancellationToken,
}

impl FetchStage {
    async fn run(mut self) -> Result<()> {
        let offset = if self.start_offset > 0 {
            self.start_offset + 1
        } else {
            0
        };

        while let Err(err) = self.source.set_offset(offset).await {
            warn!(product = %self.product_id, offset, %err, "Failed to position order source");
            if !self.pause().await {
                return Ok(());
            }
        }
        self.backoff.reset();
        debug!(product = %self.product_id, offset, "Order source positioned");

        loop {
            let fetched = tokio::select! {
                _ = self.shutdown.cancelled() => return Ok(()),
                fetched = self.source.fetch_order() => fetched,
            };

            let (offset, mut order) = match fetched {
                Ok(item) => {
                    self.backoff.reset();
                    item
                }
                Err(err) => {
                    self.metrics.fetch_errors.increment(1);
                    warn!(product = %self.product_id, %err, attempt = self.backoff.attempt(), "Failed to fetch order");
                    if !self.pause().await {
                        return Ok(());
                    }
                    continue;
                }
            };

            if order.product_id != self.product_id {
                self.metrics.orders_rejected.increment(1);
                warn!(product = %self.product_id, offset, order_id = order.id, other = %order.product_id, "Order for another product skipped");
                continue;
            }
            if let Err(err) = order.validate() {
                self.metrics.orders_rejected.increment(1);
                warn!(product = %self.product_id, offset, order_id = order.id, %err, "Order rejected");
                continue;
            }

            match order.order_type {
                // armed by apply once the order rests
                OrderType::Limit if order.arms_expiry() => {}
                OrderType::Limit => {
                    // a limit order without a countdown asks for cancellation
                    if !order.is_cancelling() && order.expires_in != NEVER_EXPIRES {
                        order.status = OrderStatus::Cancelling;
                    }
                }
                OrderType::Market => order.expires_in = 0,
            }

            trace!(product = %self.product_id, offset, order_id = order.id, status = ?order.status, "Order fetched");
            if !send_or_stop(&self.order_tx, (offset, order), &self.shutdown).await {
                return Ok(());
            }
        }
    }

    /// Sleep for the next backoff delay. False when shutting down.
    async fn pause(&mut self) -> bool {
        let delay = self.backoff.next_delay();
        tokio::select! {
            _ = self.shutdown.cancelled() => false,
            _ = tokio::time::sleep(delay) => true,
        }
    }
}

// ============================================================================
// Apply
// ============================================================================

struct ApplyStage {
    product_id: String,
    book: OrderBook,
    /// Resting orders restored from the snapshot whose countdown must resume
    dangling: Vec<Order>,
    applied_offset: i64,
    min_delta: i64,
    order_rx: mpsc::Receiver<(i64, Order)>,
    snapshot_req_rx: mpsc::Receiver<SnapshotRequest>,
    request_rx: mpsc::Receiver<BookRequest>,
    log_tx: mpsc::Sender<LogRecord>,
    expiry_tx: mpsc::Sender<Order>,
    approve_tx: mpsc::Sender<Snapshot>,
    metrics: EngineMetrics,
    shutdown: CancellationToken,
}

impl ApplyStage {
    async fn run(mut self) -> Result<()> {
        for order in std::mem::take(&mut self.dangling) {
            if order.arms_expiry() && !send_or_stop(&self.expiry_tx, order, &self.shutdown).await {
                return Ok(());
            }
        }

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => return Ok(()),
                Some((offset, order)) = self.order_rx.recv() => {
                    let logs = if order.is_cancelling() {
                        self.book.cancel_order(&order)?
                    } else {
                        self.book.apply_order(&order)?
                    };
                    self.metrics.orders_applied.increment(1);

                    // the countdown starts once the order rests, never before
                    let rests = order.arms_expiry() && logs.iter().any(|log| {
                        matches!(log, LogRecord::Open(open) if open.order_id == order.id)
                    });

                    for log in logs {
                        if !send_or_stop(&self.log_tx, log, &self.shutdown).await {
                            return Ok(());
                        }
                    }
                    self.applied_offset = offset;

                    if rests && !send_or_stop(&self.expiry_tx, order, &self.shutdown).await {
                        return Ok(());
                    }
                }
                Some(request) = self.snapshot_req_rx.recv() => {
                    let delta = self.applied_offset - request.order_offset;
                    if delta > self.min_delta {
                        let snapshot = Snapshot {
                            order_book_snapshot: self.book.snapshot(),
                            order_offset: self.applied_offset,
                        };
                        info!(
                            product = %self.product_id,
                            from = request.order_offset,
                            to = self.applied_offset,
                            log_seq = snapshot.log_seq(),
                            "Snapshot taken, awaiting commit"
                        );
                        if !send_or_stop(&self.approve_tx, snapshot, &self.shutdown).await {
                            return Ok(());
                        }
                    } else {
                        trace!(product = %self.product_id, delta, "Snapshot skipped, too few new orders");
                    }
                }
                Some(request) = self.request_rx.recv() => request.answer(&mut self.book),
                else => return Ok(()),
            }
        }
    }
}

// ============================================================================
// Commit
// ============================================================================

struct CommitStage {
    product_id: String,
    log_sink: Arc<dyn LogSink>,
    /// Highest sequence accepted into a batch
    last_seq: u64,
    /// Highest sequence the sink acknowledged
    committed_seq: u64,
    batch: Vec<LogRecord>,
    batch_size: usize,
    pending: Option<Snapshot>,
    log_rx: mpsc::Receiver<LogRecord>,
    approve_rx: mpsc::Receiver<Snapshot>,
    snapshot_tx: mpsc::Sender<Snapshot>,
    committed_tx: watch::Sender<u64>,
    metrics: EngineMetrics,
    shutdown: CancellationToken,
}

impl CommitStage {
    async fn run(mut self) -> Result<()> {
        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => return Ok(()),
                Some(log) = self.log_rx.recv() => {
                    self.buffer(log);
                    while self.batch.len() < self.batch_size {
                        match self.log_rx.try_recv() {
                            Ok(log) => self.buffer(log),
                            Err(_) => break,
                        }
                    }
                    self.flush().await?;

                    let ready = self
                        .pending
                        .as_ref()
                        .is_some_and(|p| self.committed_seq >= p.log_seq());
                    if ready {
                        if let Some(snapshot) = self.pending.take() {
                            if !self.approve(snapshot).await {
                                return Ok(());
                            }
                        }
                    }
                }
                Some(snapshot) = self.approve_rx.recv() => {
                    if self.committed_seq >= snapshot.log_seq() {
                        self.pending = None;
                        if !self.approve(snapshot).await {
                            return Ok(());
                        }
                    } else {
                        if let Some(old) = &self.pending {
                            debug!(
                                product = %self.product_id,
                                old_seq = old.log_seq(),
                                new_seq = snapshot.log_seq(),
                                "Pending snapshot superseded"
                            );
                        }
                        self.pending = Some(snapshot);
                    }
                }
                else => return Ok(()),
            }
        }
    }

    fn buffer(&mut self, log: LogRecord) {
        let seq = log.sequence();
        if seq <= self.last_seq {
            debug!(product = %self.product_id, seq, last = self.last_seq, "Duplicate log discarded");
            return;
        }
        self.last_seq = seq;
        self.batch.push(log);
    }

    async fn flush(&mut self) -> Result<()> {
        if self.batch.is_empty() {
            return Ok(());
        }

        let started = Instant::now();
        self.log_sink
            .store(&self.batch)
            .await
            .map_err(MatchingError::LogSink)?;

        self.committed_seq = self.last_seq;
        self.metrics
            .record_commit(self.batch.len(), started.elapsed(), self.committed_seq);
        trace!(product = %self.product_id, records = self.batch.len(), seq = self.committed_seq, "Logs committed");
        self.batch.clear();
        self.committed_tx.send_replace(self.committed_seq);
        Ok(())
    }

    async fn approve(&self, snapshot: Snapshot) -> bool {
        debug!(product = %self.product_id, log_seq = snapshot.log_seq(), "Snapshot approved");
        send_or_stop(&self.snapshot_tx, snapshot, &self.shutdown).await
    }
}

// ============================================================================
// Snapshot
// ============================================================================

struct SnapshotStage {
    product_id: String,
    store: Arc<dyn SnapshotStore>,
    /// Offset of the last stored snapshot
    last_offset: i64,
    interval: Duration,
    request_tx: mpsc::Sender<SnapshotRequest>,
    snapshot_rx: mpsc::Receiver<Snapshot>,
    metrics: EngineMetrics,
    shutdown: CancellationToken,
}

impl SnapshotStage {
    async fn run(mut self) -> Result<()> {
        let period = self.interval.max(Duration::from_millis(1));
        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => return Ok(()),
                _ = ticker.tick() => {
                    let request = SnapshotRequest { order_offset: self.last_offset };
                    match self.request_tx.try_send(request) {
                        Ok(()) => {}
                        Err(mpsc::error::TrySendError::Full(_)) => {
                            trace!(product = %self.product_id, "Snapshot request queue full, skipping tick");
                        }
                        Err(mpsc::error::TrySendError::Closed(_)) => return Ok(()),
                    }
                }
                Some(snapshot) = self.snapshot_rx.recv() => {
                    match self.store.store(&snapshot).await {
                        Ok(()) => {
                            self.metrics.snapshots_stored.increment(1);
                            self.last_offset = snapshot.order_offset;
                            info!(
                                product = %self.product_id,
                                offset = snapshot.order_offset,
                                log_seq = snapshot.log_seq(),
                                orders = snapshot.order_book_snapshot.orders.len(),
                                "Snapshot stored"
                            );
                        }
                        Err(err) => {
                            self.metrics.snapshots_failed.increment(1);
                            warn!(product = %self.product_id, %err, "Failed to store snapshot, retrying next interval");
                        }
                    }
                }
            }
        }
    }
}

// ============================================================================
// Expire
// ============================================================================

struct ExpireStage {
    expiry_rx: mpsc::Receiver<Order>,
    tick: Duration,
    backoff: Backoff,
    writer: Arc<dyn OrderWriter>,
    query: BookQuery,
    metrics: EngineMetrics,
    shutdown: CancellationToken,
}

impl ExpireStage {
    async fn run(mut self) -> Result<()> {
        let mut timers = JoinSet::new();

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                Some(order) = self.expiry_rx.recv() => {
                    debug!(order_id = order.id, expires_in = order.expires_in, "Expiry timer armed");
                    let timer = ExpiryTimer {
                        order,
                        tick: self.tick,
                        backoff: self.backoff.clone(),
                        writer: Arc::clone(&self.writer),
                        query: self.query.clone(),
                        metrics: self.metrics.clone(),
                        shutdown: self.shutdown.clone(),
                    };
                    timers.spawn(timer.run());
                }
                Some(_) = timers.join_next(), if !timers.is_empty() => {}
                else => break,
            }
        }

        while timers.join_next().await.is_some() {}
        Ok(())
    }
}
