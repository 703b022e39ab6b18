//! Replay of committed logs for downstream consumers.
//!
//! Consumers track `(offset, sequence)` per product. The log sink is
//! at-least-once, so records at or below the last seen sequence are
//! dropped; a skipped sequence means the stream is broken and replay stops.

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::error::MatchingError;
use crate::log::{DoneLog, LogRecord, MatchLog, OpenLog, PendingLog};
use crate::store::{LogReader, StoreError};
use crate::Result;

/// Receives replayed records together with their source offset
pub trait LogObserver: Send {
    fn on_open(&mut self, log: &OpenLog, offset: i64);

    fn on_match(&mut self, log: &MatchLog, offset: i64);

    fn on_done(&mut self, log: &DoneLog, offset: i64);

    fn on_pending(&mut self, log: &PendingLog, offset: i64);
}

pub struct LogReplayer<R, O> {
    product_id: String,
    reader: R,
    observer: O,
    last_seq: u64,
}

impl<R: LogReader, O: LogObserver> LogReplayer<R, O> {
    pub fn new(product_id: impl Into<String>, reader: R, observer: O) -> Self {
        Self {
            product_id: product_id.into(),
            reader,
            observer,
            last_seq: 0,
        }
    }

    /// Resume after `sequence`, reading from `offset`
    pub async fn start_from(&mut self, sequence: u64, offset: i64) -> Result<()> {
        self.last_seq = sequence;
        self.reader
            .set_offset(offset)
            .await
            .map_err(MatchingError::LogReader)?;
        info!(product = %self.product_id, seq = sequence, offset, "Log replay positioned");
        Ok(())
    }

    pub fn last_sequence(&self) -> u64 {
        self.last_seq
    }

    pub fn observer(&self) -> &O {
        &self.observer
    }

    /// Read one record. Returns false when it was a duplicate.
    pub async fn poll(&mut self) -> Result<bool> {
        let (offset, record) = self
            .reader
            .fetch_log()
            .await
            .map_err(MatchingError::LogReader)?;
        self.dispatch(offset, record)
    }

    fn dispatch(&mut self, offset: i64, record: LogRecord) -> Result<bool> {
        let seq = record.sequence();
        if seq <= self.last_seq {
            debug!(product = %self.product_id, seq, last = self.last_seq, offset, "Duplicate log discarded");
            return Ok(false);
        }
        if self.last_seq > 0 && seq != self.last_seq + 1 {
            error!(product = %self.product_id, seq, last = self.last_seq, offset, "Log sequence gap");
            return Err(MatchingError::SequenceGap {
                product_id: self.product_id.clone(),
                expected: self.last_seq + 1,
                actual: seq,
            });
        }

        match &record {
            LogRecord::Open(log) => self.observer.on_open(log, offset),
            LogRecord::Match(log) => self.observer.on_match(log, offset),
            LogRecord::Done(log) => self.observer.on_done(log, offset),
            LogRecord::Pending(log) => self.observer.on_pending(log, offset),
        }
        self.last_seq = seq;
        Ok(true)
    }

    /// Replay until cancelled or the log is closed, then hand back the observer
    pub async fn run(mut self, shutdown: CancellationToken) -> Result<O> {
        loop {
            let fetched = tokio::select! {
                _ = shutdown.cancelled() => break,
                fetched = self.reader.fetch_log() => fetched,
            };
            match fetched {
                Ok((offset, record)) => {
                    self.dispatch(offset, record)?;
                }
                Err(StoreError::Closed) => break,
                Err(err) => return Err(MatchingError::LogReader(err)),
            }
        }
        info!(product = %self.product_id, seq = self.last_seq, "Log replay stopped");
        Ok(self.observer)
    }
}
