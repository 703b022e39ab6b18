//! Sequenced book-state transitions.
//!
//! Every mutation of an order book emits one or more [`LogRecord`]s. Each
//! record carries the product's next log sequence, so the records of one
//! product form a gapless, strictly increasing stream that downstream
//! consumers replay to rebuild fills and trades.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::{DoneReason, OrderType, Side};

/// An order started resting on the book
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpenLog {
    pub sequence: u64,
    pub product_id: String,
    pub time: DateTime<Utc>,
    pub order_id: u64,
    pub remaining_size: Decimal,
    pub price: Decimal,
    pub side: Side,
    pub expires_in: i64,
    pub backend_order_id: String,
    pub art: i64,
}

/// A taker executed against a maker at the maker's price
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchLog {
    pub sequence: u64,
    pub product_id: String,
    pub time: DateTime<Utc>,
    pub trade_id: u64,
    pub taker_order_id: u64,
    pub maker_order_id: u64,
    /// Side of the maker
    pub side: Side,
    pub price: Decimal,
    pub size: Decimal,
    pub taker_client_oid: String,
    pub maker_client_oid: String,
    pub taker_expires_in: i64,
    pub maker_expires_in: i64,
    pub taker_backend_order_id: String,
    pub maker_backend_order_id: String,
    pub art: i64,
}

/// An order left the book, or a taker finished without resting
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DoneLog {
    pub sequence: u64,
    pub product_id: String,
    pub time: DateTime<Utc>,
    pub order_id: u64,
    pub price: Decimal,
    pub remaining_size: Decimal,
    pub reason: DoneReason,
    pub side: Side,
    pub order_type: OrderType,
    pub expires_in: i64,
    pub backend_order_id: String,
    pub art: i64,
    /// Quote value executed by this order as taker
    pub executed_value: Decimal,
    /// Base size executed by this order as taker
    pub filled_size: Decimal,
}

/// Precedes a partial-cancel `Done`: records the size that was still resting
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingLog {
    pub sequence: u64,
    pub product_id: String,
    pub time: DateTime<Utc>,
    pub order_id: u64,
    pub order_type: OrderType,
    pub art: i64,
    pub remaining_size: Decimal,
    pub side: Side,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum LogRecord {
    Open(OpenLog),
    Match(MatchLog),
    Done(DoneLog),
    Pending(PendingLog),
}

impl LogRecord {
    pub fn sequence(&self) -> u64 {
        match self {
            LogRecord::Open(log) => log.sequence,
            LogRecord::Match(log) => log.sequence,
            LogRecord::Done(log) => log.sequence,
            LogRecord::Pending(log) => log.sequence,
        }
    }

    pub fn product_id(&self) -> &str {
        match self {
            LogRecord::Open(log) => &log.product_id,
            LogRecord::Match(log) => &log.product_id,
            LogRecord::Done(log) => &log.product_id,
            LogRecord::Pending(log) => &log.product_id,
        }
    }

    pub fn time(&self) -> DateTime<Utc> {
        match self {
            LogRecord::Open(log) => log.time,
            LogRecord::Match(log) => log.time,
            LogRecord::Done(log) => log.time,
            LogRecord::Pending(log) => log.time,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            LogRecord::Open(_) => "open",
            LogRecord::Match(_) => "match",
            LogRecord::Done(_) => "done",
            LogRecord::Pending(_) => "pending",
        }
    }
}
