use serde::{Deserialize, Serialize};

use crate::domain::BookOrder;
use crate::window::Window;

/// Point-in-time state of one product's order book
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderBookSnapshot {
    pub product_id: String,
    pub orders: Vec<BookOrder>,
    pub trade_seq: u64,
    pub log_seq: u64,
    /// Absent in snapshots taken before deduplication was enabled
    #[serde(default)]
    pub order_id_window: Option<Window>,
}

/// Book state plus the source offset it is valid up to.
///
/// Restoring from a snapshot resumes the order source right after
/// `order_offset`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub order_book_snapshot: OrderBookSnapshot,
    pub order_offset: i64,
}

impl Snapshot {
    pub fn log_seq(&self) -> u64 {
        self.order_book_snapshot.log_seq
    }
}
