//! Per-product order book.
//!
//! The book is partitioned by `art`; every art has its own pair of depths
//! and matching never crosses arts. The book owns the trade and log
//! sequence counters and the order id window, and it is only ever touched
//! by one writer.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use tracing::{debug, trace};

use crate::depth::{Depth, PriceLevel};
use crate::domain::{BookOrder, DoneReason, Order, OrderType, Product, Side};
use crate::error::MatchingError;
use crate::log::{DoneLog, LogRecord, MatchLog, OpenLog, PendingLog};
use crate::snapshot::OrderBookSnapshot;
use crate::window::Window;
use crate::Result;

/// Bid and ask depths of one art
#[derive(Debug, Clone)]
struct ArtDepth {
    bids: Depth,
    asks: Depth,
}

impl ArtDepth {
    fn new() -> Self {
        Self {
            bids: Depth::new(Side::Buy),
            asks: Depth::new(Side::Sell),
        }
    }

    fn side(&self, side: Side) -> &Depth {
        match side {
            Side::Buy => &self.bids,
            Side::Sell => &self.asks,
        }
    }

    fn side_mut(&mut self, side: Side) -> &mut Depth {
        match side {
            Side::Buy => &mut self.bids,
            Side::Sell => &mut self.asks,
        }
    }
}

/// Most recent execution within an art
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LastTrade {
    pub price: Decimal,
    pub maker_order_id: u64,
    pub taker_order_id: u64,
    pub time: DateTime<Utc>,
}

/// Aggregated book of one art
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookDepth {
    pub art: i64,
    pub asks: Vec<PriceLevel>,
    pub bids: Vec<PriceLevel>,
    /// Best ask minus best bid, when both sides are present
    pub spread: Option<Decimal>,
}

/// What a hypothetical order of a given size would get right now
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Estimate {
    /// Quote value of the fillable part
    pub cost: Decimal,
    pub best_price: Option<Decimal>,
    pub average_price: Option<Decimal>,
    /// Part of the requested size the opposite depth can absorb
    pub fillable_size: Decimal,
    /// Total size resting on the opposite depth
    pub available_size: Decimal,
}

pub struct OrderBook {
    product: Product,
    art_depths: BTreeMap<i64, ArtDepth>,
    trade_seq: u64,
    log_seq: u64,
    order_id_window: Window,
    window_capacity: u64,
    last_trades: HashMap<i64, LastTrade>,
}

impl OrderBook {
    pub fn new(product: Product, window_capacity: u64) -> Self {
        Self {
            product,
            art_depths: BTreeMap::new(),
            trade_seq: 0,
            log_seq: 0,
            order_id_window: Window::with_capacity(window_capacity),
            window_capacity,
            last_trades: HashMap::new(),
        }
    }

    pub fn product(&self) -> &Product {
        &self.product
    }

    pub fn log_seq(&self) -> u64 {
        self.log_seq
    }

    pub fn trade_seq(&self) -> u64 {
        self.trade_seq
    }

    pub fn window(&self) -> &Window {
        &self.order_id_window
    }

    fn next_log_seq(&mut self) -> u64 {
        self.log_seq += 1;
        self.log_seq
    }

    fn next_trade_seq(&mut self) -> u64 {
        self.trade_seq += 1;
        self.trade_seq
    }

    fn depth_mut(&mut self, art: i64, side: Side) -> &mut Depth {
        self.art_depths
            .entry(art)
            .or_insert_with(ArtDepth::new)
            .side_mut(side)
    }

    fn depth(&self, art: i64, side: Side) -> Option<&Depth> {
        self.art_depths.get(&art).map(|d| d.side(side))
    }

    /// Look up a resting order
    pub fn order(&self, art: i64, side: Side, order_id: u64) -> Option<&BookOrder> {
        self.depth(art, side).and_then(|d| d.get(order_id))
    }

    /// Number of resting orders across all arts
    pub fn order_count(&self) -> usize {
        self.art_depths
            .values()
            .map(|d| d.bids.len() + d.asks.len())
            .sum()
    }

    // ========================================================================
    // Matching
    // ========================================================================

    /// Match an incoming order against the opposite depth of its art.
    ///
    /// Returns the match logs followed by either an `Open` (limit remainder
    /// rests) or a `Done` for the taker. Ids the window rejects produce no
    /// logs.
    pub fn apply_order(&mut self, order: &Order) -> Result<Vec<LogRecord>> {
        if let Err(err) = self.order_id_window.put(order.id) {
            debug!(product = %self.product.id, order_id = order.id, %err, "Order discarded by window");
            return Ok(Vec::new());
        }

        let mut taker = BookOrder::from(order);
        let is_market = taker.order_type == OrderType::Market;
        let market_buy = is_market && taker.side.is_buy();
        // a market buy without size is bounded by funds alone
        let size_bounded = !market_buy || taker.size > Decimal::ZERO;

        if is_market {
            taker.price = match taker.side {
                Side::Buy => Decimal::MAX,
                Side::Sell => Decimal::ZERO,
            };
        }

        let art = taker.art;
        let maker_side = taker.side.opposite();
        let now = Utc::now();
        let mut logs = Vec::new();
        let mut executed_value = Decimal::ZERO;
        let mut filled_size = Decimal::ZERO;
        let mut exhausted = false;

        loop {
            let maker = match self.depth_mut(art, maker_side).best() {
                Some(maker) => maker.clone(),
                None => break,
            };

            let crosses = match taker.side {
                Side::Buy => taker.price >= maker.price,
                Side::Sell => taker.price <= maker.price,
            };
            if !crosses {
                break;
            }

            let price = maker.price;
            let size = if market_buy {
                if taker.funds.is_zero() {
                    exhausted = true;
                    break;
                }
                let budget = taker
                    .funds
                    .checked_div(price)
                    .ok_or_else(|| {
                        MatchingError::Invariant(format!(
                            "resting order {} has unusable price {}",
                            maker.order_id, price
                        ))
                    })?
                    .trunc_with_scale(self.product.base_scale);
                let mut size = budget.min(maker.size);
                if size_bounded {
                    size = size.min(taker.size);
                }
                if size.is_zero() {
                    exhausted = true;
                    break;
                }
                taker.funds -= notional(size, price)?;
                if size_bounded {
                    taker.size -= size;
                }
                size
            } else {
                if taker.size.is_zero() {
                    exhausted = true;
                    break;
                }
                let size = taker.size.min(maker.size);
                taker.size -= size;
                size
            };

            executed_value = executed_value
                .checked_add(notional(size, price)?)
                .ok_or_else(|| overflow("executed value", taker.order_id))?;
            filled_size += size;

            self.depth_mut(art, maker_side).decr_size(maker.order_id, size)?;
            let maker_remaining = maker.size - size;

            let trade_id = self.next_trade_seq();
            let sequence = self.next_log_seq();
            trace!(
                product = %self.product.id,
                trade_id,
                taker = taker.order_id,
                maker = maker.order_id,
                %price,
                %size,
                "Matched"
            );
            logs.push(LogRecord::Match(MatchLog {
                sequence,
                product_id: self.product.id.clone(),
                time: now,
                trade_id,
                taker_order_id: taker.order_id,
                maker_order_id: maker.order_id,
                side: maker.side,
                price,
                size,
                taker_client_oid: taker.client_oid.clone(),
                maker_client_oid: maker.client_oid.clone(),
                taker_expires_in: taker.expires_in,
                maker_expires_in: maker.expires_in,
                taker_backend_order_id: taker.backend_order_id.clone(),
                maker_backend_order_id: maker.backend_order_id.clone(),
                art,
            }));
            self.last_trades.insert(
                art,
                LastTrade {
                    price,
                    maker_order_id: maker.order_id,
                    taker_order_id: taker.order_id,
                    time: now,
                },
            );

            if maker_remaining.is_zero() {
                let sequence = self.next_log_seq();
                // the book does not track a maker's cumulative fills
                logs.push(self.done_log(
                    sequence,
                    &maker,
                    maker.price,
                    Decimal::ZERO,
                    DoneReason::Filled,
                    Decimal::ZERO,
                    Decimal::ZERO,
                ));
            } else {
                // the maker outlived the taker
                exhausted = true;
                break;
            }
        }

        if !size_bounded {
            exhausted = exhausted || taker.funds.is_zero();
        } else {
            exhausted = exhausted || taker.size.is_zero();
        }

        if taker.order_type == OrderType::Limit && taker.size > Decimal::ZERO {
            let sequence = self.next_log_seq();
            logs.push(LogRecord::Open(OpenLog {
                sequence,
                product_id: self.product.id.clone(),
                time: now,
                order_id: taker.order_id,
                remaining_size: taker.size,
                price: taker.price,
                side: taker.side,
                expires_in: taker.expires_in,
                backend_order_id: taker.backend_order_id.clone(),
                art,
            }));
            self.depth_mut(art, taker.side).add(taker);
            return Ok(logs);
        }

        let (price, remaining, reason) = if is_market {
            let reason = if filled_size.is_zero() {
                DoneReason::Cancelled
            } else if exhausted {
                DoneReason::Filled
            } else {
                DoneReason::Partial
            };
            (Decimal::ZERO, Decimal::ZERO, reason)
        } else {
            (taker.price, taker.size, DoneReason::Filled)
        };

        let sequence = self.next_log_seq();
        logs.push(self.done_log(
            sequence,
            &taker,
            price,
            remaining,
            reason,
            executed_value,
            filled_size,
        ));

        debug!(
            product = %self.product.id,
            order_id = order.id,
            logs = logs.len(),
            ?reason,
            "Taker done"
        );
        Ok(logs)
    }

    #[allow(clippy::too_many_arguments)]
    fn done_log(
        &self,
        sequence: u64,
        order: &BookOrder,
        price: Decimal,
        remaining_size: Decimal,
        reason: DoneReason,
        executed_value: Decimal,
        filled_size: Decimal,
    ) -> LogRecord {
        LogRecord::Done(DoneLog {
            sequence,
            product_id: self.product.id.clone(),
            time: Utc::now(),
            order_id: order.order_id,
            price,
            remaining_size,
            reason,
            side: order.side,
            order_type: order.order_type,
            expires_in: order.expires_in,
            backend_order_id: order.backend_order_id.clone(),
            art: order.art,
            executed_value,
            filled_size,
        })
    }

    // ========================================================================
    // Cancellation
    // ========================================================================

    /// Remove a resting order.
    ///
    /// The id was admitted when the order was placed, so the window verdict
    /// is ignored. Unknown ids are a no-op.
    pub fn cancel_order(&mut self, order: &Order) -> Result<Vec<LogRecord>> {
        let _ = self.order_id_window.put(order.id);

        let resting = match self.order(order.art, order.side, order.id) {
            Some(resting) => resting.clone(),
            None => {
                debug!(product = %self.product.id, order_id = order.id, "Cancel target not on book");
                return Ok(Vec::new());
            }
        };

        self.depth_mut(order.art, order.side)
            .decr_size(order.id, resting.size)?;

        let mut logs = Vec::with_capacity(2);
        let reason = if order.size > resting.size {
            let sequence = self.next_log_seq();
            logs.push(LogRecord::Pending(PendingLog {
                sequence,
                product_id: self.product.id.clone(),
                time: Utc::now(),
                order_id: resting.order_id,
                order_type: resting.order_type,
                art: resting.art,
                remaining_size: resting.size,
                side: resting.side,
            }));
            DoneReason::Partial
        } else {
            DoneReason::Cancelled
        };

        let sequence = self.next_log_seq();
        logs.push(self.done_log(
            sequence,
            &resting,
            resting.price,
            resting.size,
            reason,
            Decimal::ZERO,
            Decimal::ZERO,
        ));

        debug!(product = %self.product.id, order_id = order.id, ?reason, "Order cancelled");
        Ok(logs)
    }

    /// Store the remaining expiry of a resting order; false once it left the book
    pub fn update_expiry(&mut self, art: i64, side: Side, order_id: u64, remaining: i64) -> bool {
        match self.art_depths.get_mut(&art) {
            Some(depths) => depths.side_mut(side).update_expiry(order_id, remaining),
            None => false,
        }
    }

    // ========================================================================
    // Snapshot / Restore
    // ========================================================================

    /// Capture every resting order, arts ascending, asks before bids, each
    /// depth in priority order.
    pub fn snapshot(&self) -> OrderBookSnapshot {
        let orders = self
            .art_depths
            .values()
            .flat_map(|d| d.asks.iter().chain(d.bids.iter()))
            .cloned()
            .collect();

        OrderBookSnapshot {
            product_id: self.product.id.clone(),
            orders,
            trade_seq: self.trade_seq,
            log_seq: self.log_seq,
            order_id_window: Some(self.order_id_window.clone()),
        }
    }

    /// Replace the book's state with `snapshot`.
    ///
    /// Returns one open order per restored resting order so their expiry
    /// timers can be re-armed.
    pub fn restore(&mut self, snapshot: &OrderBookSnapshot) -> Vec<Order> {
        self.log_seq = snapshot.log_seq;
        self.trade_seq = snapshot.trade_seq;
        self.order_id_window = match &snapshot.order_id_window {
            Some(window) if window.cap > 0 => window.clone(),
            _ => Window::with_capacity(self.window_capacity),
        };
        self.art_depths.clear();
        self.last_trades.clear();

        let mut dangling = Vec::with_capacity(snapshot.orders.len());
        for order in &snapshot.orders {
            dangling.push(order.to_open_order(&self.product.id));
            self.depth_mut(order.art, order.side).add(order.clone());
        }

        debug!(
            product = %self.product.id,
            orders = dangling.len(),
            log_seq = self.log_seq,
            trade_seq = self.trade_seq,
            "Order book restored"
        );
        dangling
    }

    // ========================================================================
    // Queries
    // ========================================================================

    pub fn book_depth(&self, art: i64) -> BookDepth {
        let asks = self
            .depth(art, Side::Sell)
            .map(Depth::levels)
            .unwrap_or_default();
        let bids = self
            .depth(art, Side::Buy)
            .map(Depth::levels)
            .unwrap_or_default();
        let spread = match (asks.first(), bids.first()) {
            (Some(ask), Some(bid)) => Some(ask.price - bid.price),
            _ => None,
        };

        BookDepth {
            art,
            asks,
            bids,
            spread,
        }
    }

    /// Walk the depth opposite to `side` as if an order of `size` arrived.
    pub fn estimate(&self, art: i64, side: Side, size: Decimal) -> Estimate {
        let mut estimate = Estimate {
            cost: Decimal::ZERO,
            best_price: None,
            average_price: None,
            fillable_size: Decimal::ZERO,
            available_size: Decimal::ZERO,
        };

        let Some(depth) = self.depth(art, side.opposite()) else {
            return estimate;
        };

        estimate.best_price = depth.best().map(|o| o.price);
        let mut wanted = size;
        for order in depth.iter() {
            estimate.available_size = estimate.available_size.saturating_add(order.size);
            if wanted > Decimal::ZERO {
                let fill = wanted.min(order.size);
                wanted -= fill;
                estimate.fillable_size += fill;
                estimate.cost = estimate.cost.saturating_add(fill.saturating_mul(order.price));
            }
        }

        if !estimate.fillable_size.is_zero() {
            estimate.average_price = estimate.cost.checked_div(estimate.fillable_size);
        }
        estimate
    }

    pub fn last_trade(&self, art: i64) -> Option<LastTrade> {
        self.last_trades.get(&art).cloned()
    }
}

/// Quote value of a fill. Validated orders never overflow here.
fn notional(size: Decimal, price: Decimal) -> Result<Decimal> {
    size.checked_mul(price)
        .ok_or_else(|| MatchingError::Invariant(format!("notional of {} at {} overflows", size, price)))
}

fn overflow(what: &str, order_id: u64) -> MatchingError {
    MatchingError::Invariant(format!("{} of order {} overflows", what, order_id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::tests::{limit, market};
    use crate::domain::OrderStatus;
    use assert_matches::assert_matches;
    use rust_decimal::dec;

    fn product() -> Product {
        Product {
            id: "ART-USD".to_string(),
            base_currency: "ART".to_string(),
            quote_currency: "USD".to_string(),
            base_scale: 4,
            quote_scale: 2,
        }
    }

    fn book() -> OrderBook {
        OrderBook::new(product(), 10_000)
    }

    fn sequences(logs: &[LogRecord]) -> Vec<u64> {
        logs.iter().map(LogRecord::sequence).collect()
    }

    fn cancel(order: &Order) -> Order {
        Order {
            status: OrderStatus::Cancelling,
            ..order.clone()
        }
    }

    #[test]
    fn test_limit_rests_with_open_log() {
        let mut book = book();
        let logs = book.apply_order(&limit(1, Side::Buy, dec!(100), dec!(10))).unwrap();

        assert_eq!(logs.len(), 1);
        assert_matches!(&logs[0], LogRecord::Open(open) => {
            assert_eq!(open.sequence, 1);
            assert_eq!(open.remaining_size, dec!(10));
            assert_eq!(open.art, 1);
        });
        assert_eq!(book.order_count(), 1);
    }

    #[test]
    fn test_partial_cross_leaves_resting_buy() {
        let mut book = book();
        book.apply_order(&limit(1, Side::Buy, dec!(100), dec!(10))).unwrap();
        let logs = book.apply_order(&limit(2, Side::Sell, dec!(100), dec!(4))).unwrap();

        assert_eq!(logs.len(), 2);
        assert_matches!(&logs[0], LogRecord::Match(m) => {
            assert_eq!(m.size, dec!(4));
            assert_eq!(m.price, dec!(100));
            assert_eq!(m.maker_order_id, 1);
            assert_eq!(m.taker_order_id, 2);
            assert_eq!(m.side, Side::Buy);
            assert_eq!(m.trade_id, 1);
        });
        assert_matches!(&logs[1], LogRecord::Done(d) => {
            assert_eq!(d.order_id, 2);
            assert_eq!(d.reason, DoneReason::Filled);
            assert_eq!(d.filled_size, dec!(4));
            assert_eq!(d.executed_value, dec!(400));
        });
        assert_eq!(book.order(1, Side::Buy, 1).map(|o| o.size), Some(dec!(6)));
        assert_eq!(sequences(&logs), vec![2, 3]);
    }

    #[test]
    fn test_full_cross_drains_smaller_side() {
        let mut book = book();
        book.apply_order(&limit(1, Side::Sell, dec!(50), dec!(3))).unwrap();
        let logs = book.apply_order(&limit(2, Side::Buy, dec!(55), dec!(8))).unwrap();

        let kinds: Vec<&str> = logs.iter().map(LogRecord::kind).collect();
        assert_eq!(kinds, vec!["match", "done", "open"]);
        assert_matches!(&logs[0], LogRecord::Match(m) => assert_eq!(m.price, dec!(50)));
        assert_matches!(&logs[1], LogRecord::Done(d) => {
            assert_eq!(d.order_id, 1);
            assert_eq!(d.reason, DoneReason::Filled);
        });
        assert_matches!(&logs[2], LogRecord::Open(o) => {
            assert_eq!(o.order_id, 2);
            assert_eq!(o.remaining_size, dec!(5));
        });
        assert!(book.order(1, Side::Sell, 1).is_none());
    }

    #[test]
    fn test_no_cross_below_ask() {
        let mut book = book();
        book.apply_order(&limit(1, Side::Sell, dec!(101), dec!(1))).unwrap();
        let logs = book.apply_order(&limit(2, Side::Buy, dec!(100), dec!(1))).unwrap();

        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].kind(), "open");
        assert_eq!(book.order_count(), 2);
    }

    #[test]
    fn test_price_time_priority() {
        let mut book = book();
        book.apply_order(&limit(1, Side::Sell, dec!(101), dec!(1))).unwrap();
        book.apply_order(&limit(2, Side::Sell, dec!(100), dec!(1))).unwrap();
        book.apply_order(&limit(3, Side::Sell, dec!(100), dec!(1))).unwrap();

        let logs = book.apply_order(&limit(4, Side::Buy, dec!(101), dec!(3))).unwrap();
        let makers: Vec<u64> = logs
            .iter()
            .filter_map(|l| match l {
                LogRecord::Match(m) => Some(m.maker_order_id),
                _ => None,
            })
            .collect();
        assert_eq!(makers, vec![2, 3, 1]);
    }

    #[test]
    fn test_arts_do_not_cross() {
        let mut book = book();
        book.apply_order(&limit(1, Side::Sell, dec!(100), dec!(1))).unwrap();
        let mut other_art = limit(2, Side::Buy, dec!(100), dec!(1));
        other_art.art = 2;
        let logs = book.apply_order(&other_art).unwrap();

        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].kind(), "open");
    }

    #[test]
    fn test_replayed_id_is_ignored() {
        let mut book = book();
        let order = limit(1, Side::Buy, dec!(100), dec!(10));
        book.apply_order(&order).unwrap();
        let logs = book.apply_order(&order).unwrap();

        assert!(logs.is_empty());
        assert_eq!(book.log_seq(), 1);
        assert_eq!(book.order(1, Side::Buy, 1).map(|o| o.size), Some(dec!(10)));
    }

    #[test]
    fn test_market_buy_funds_fill() {
        let mut book = book();
        book.apply_order(&limit(1, Side::Sell, dec!(5), dec!(10))).unwrap();
        let logs = book.apply_order(&market(2, Side::Buy, dec!(0), dec!(50))).unwrap();

        assert_eq!(logs.len(), 3);
        assert_matches!(&logs[0], LogRecord::Match(m) => {
            assert_eq!(m.size, dec!(10));
            assert_eq!(m.price, dec!(5));
        });
        assert_matches!(&logs[1], LogRecord::Done(d) => assert_eq!(d.order_id, 1));
        assert_matches!(&logs[2], LogRecord::Done(d) => {
            assert_eq!(d.order_id, 2);
            assert_eq!(d.reason, DoneReason::Filled);
            assert_eq!(d.price, Decimal::ZERO);
            assert_eq!(d.executed_value, dec!(50));
            assert_eq!(d.filled_size, dec!(10));
        });
        assert_eq!(book.order_count(), 0);
    }

    #[test]
    fn test_market_buy_budget_truncated_to_base_scale() {
        let mut book = book();
        book.apply_order(&limit(1, Side::Sell, dec!(3), dec!(100))).unwrap();
        let logs = book.apply_order(&market(2, Side::Buy, dec!(0), dec!(10))).unwrap();

        assert_matches!(&logs[0], LogRecord::Match(m) => assert_eq!(m.size, dec!(3.3333)));
        assert_matches!(&logs[1], LogRecord::Done(d) => {
            assert_eq!(d.order_id, 2);
            assert_eq!(d.reason, DoneReason::Filled);
        });
        assert_eq!(book.order(1, Side::Sell, 1).map(|o| o.size), Some(dec!(96.6667)));
    }

    #[test]
    fn test_market_buy_partial_when_book_runs_out() {
        let mut book = book();
        book.apply_order(&limit(1, Side::Sell, dec!(5), dec!(2))).unwrap();
        let logs = book.apply_order(&market(2, Side::Buy, dec!(0), dec!(50))).unwrap();

        assert_matches!(logs.last(), Some(LogRecord::Done(d)) => {
            assert_eq!(d.reason, DoneReason::Partial);
            assert_eq!(d.filled_size, dec!(2));
            assert_eq!(d.executed_value, dec!(10));
        });
    }

    #[test]
    fn test_market_buy_size_bound() {
        let mut book = book();
        book.apply_order(&limit(1, Side::Sell, dec!(5), dec!(10))).unwrap();
        let logs = book.apply_order(&market(2, Side::Buy, dec!(4), dec!(1000))).unwrap();

        assert_matches!(&logs[0], LogRecord::Match(m) => assert_eq!(m.size, dec!(4)));
        assert_matches!(&logs[1], LogRecord::Done(d) => assert_eq!(d.reason, DoneReason::Filled));
        assert_eq!(book.order(1, Side::Sell, 1).map(|o| o.size), Some(dec!(6)));
    }

    #[test]
    fn test_market_orders_on_empty_book_are_cancelled() {
        let mut book = book();
        let buy = book.apply_order(&market(1, Side::Buy, dec!(0), dec!(50))).unwrap();
        let sell = book.apply_order(&market(2, Side::Sell, dec!(3), dec!(0))).unwrap();

        assert_matches!(&buy[..], [LogRecord::Done(d)] => assert_eq!(d.reason, DoneReason::Cancelled));
        assert_matches!(&sell[..], [LogRecord::Done(d)] => assert_eq!(d.reason, DoneReason::Cancelled));
        assert_eq!(book.order_count(), 0);
    }

    #[test]
    fn test_market_sell_partial_and_filled() {
        let mut book = book();
        book.apply_order(&limit(1, Side::Buy, dec!(10), dec!(2))).unwrap();
        book.apply_order(&limit(2, Side::Buy, dec!(9), dec!(2))).unwrap();

        let logs = book.apply_order(&market(3, Side::Sell, dec!(3), dec!(0))).unwrap();
        assert_matches!(logs.last(), Some(LogRecord::Done(d)) => {
            assert_eq!(d.reason, DoneReason::Filled);
            assert_eq!(d.executed_value, dec!(29));
        });

        let logs = book.apply_order(&market(4, Side::Sell, dec!(5), dec!(0))).unwrap();
        assert_matches!(logs.last(), Some(LogRecord::Done(d)) => {
            assert_eq!(d.reason, DoneReason::Partial);
            assert_eq!(d.filled_size, dec!(1));
        });
    }

    #[test]
    fn test_cancel_resting_order() {
        let mut book = book();
        let order = limit(1, Side::Sell, dec!(10), dec!(5));
        book.apply_order(&order).unwrap();

        let logs = book.cancel_order(&cancel(&order)).unwrap();
        assert_matches!(&logs[..], [LogRecord::Done(d)] => {
            assert_eq!(d.reason, DoneReason::Cancelled);
            assert_eq!(d.remaining_size, dec!(5));
            assert_eq!(d.sequence, 2);
        });
        assert_eq!(book.order_count(), 0);
    }

    #[test]
    fn test_cancel_partially_filled_order() {
        let mut book = book();
        let order = limit(1, Side::Sell, dec!(10), dec!(5));
        book.apply_order(&order).unwrap();
        book.apply_order(&limit(2, Side::Buy, dec!(10), dec!(2))).unwrap();

        let logs = book.cancel_order(&cancel(&order)).unwrap();
        assert_eq!(logs.len(), 2);
        assert_matches!(&logs[0], LogRecord::Pending(p) => {
            assert_eq!(p.order_id, 1);
            assert_eq!(p.remaining_size, dec!(3));
        });
        assert_matches!(&logs[1], LogRecord::Done(d) => {
            assert_eq!(d.reason, DoneReason::Partial);
            assert_eq!(d.remaining_size, dec!(3));
        });
        assert_eq!(sequences(&logs), vec![4, 5]);
    }

    #[test]
    fn test_cancel_unknown_is_noop() {
        let mut book = book();
        let logs = book
            .cancel_order(&cancel(&limit(7, Side::Buy, dec!(1), dec!(1))))
            .unwrap();
        assert!(logs.is_empty());
        assert_eq!(book.log_seq(), 0);
    }

    #[test]
    fn test_update_expiry() {
        let mut book = book();
        book.apply_order(&limit(1, Side::Buy, dec!(10), dec!(1))).unwrap();

        assert!(book.update_expiry(1, Side::Buy, 1, 3));
        assert_eq!(book.order(1, Side::Buy, 1).map(|o| o.expires_in), Some(3));
        assert!(!book.update_expiry(1, Side::Sell, 1, 3));
        assert!(!book.update_expiry(9, Side::Buy, 1, 3));
    }

    #[test]
    fn test_snapshot_restore_identity() {
        let mut book = book();
        book.apply_order(&limit(1, Side::Sell, dec!(101), dec!(2))).unwrap();
        book.apply_order(&limit(2, Side::Sell, dec!(100), dec!(2))).unwrap();
        book.apply_order(&limit(3, Side::Buy, dec!(99), dec!(1))).unwrap();
        let mut other = limit(4, Side::Buy, dec!(50), dec!(1));
        other.art = 0;
        other.expires_in = 30;
        book.apply_order(&other).unwrap();
        book.apply_order(&limit(5, Side::Buy, dec!(100), dec!(1))).unwrap();

        let snapshot = book.snapshot();
        let ids: Vec<u64> = snapshot.orders.iter().map(|o| o.order_id).collect();
        assert_eq!(ids, vec![4, 2, 1, 3]);

        let mut restored = OrderBook::new(product(), 10_000);
        let dangling = restored.restore(&snapshot);

        assert_eq!(restored.snapshot(), snapshot);
        assert_eq!(restored.log_seq(), book.log_seq());
        assert_eq!(restored.trade_seq(), book.trade_seq());
        assert_eq!(restored.window(), book.window());
        assert_eq!(dangling.len(), 4);
        assert!(dangling.iter().all(|o| o.status == OrderStatus::Open));
        assert_eq!(dangling[0].expires_in, 30);

        // the restored window still rejects ids seen before the snapshot
        assert!(restored.apply_order(&limit(3, Side::Buy, dec!(1), dec!(1))).unwrap().is_empty());
    }

    #[test]
    fn test_restore_without_window_creates_one() {
        let mut book = book();
        let snapshot = OrderBookSnapshot {
            product_id: "ART-USD".to_string(),
            orders: Vec::new(),
            trade_seq: 3,
            log_seq: 9,
            order_id_window: None,
        };
        book.restore(&snapshot);

        assert_eq!(book.window().cap, 10_000);
        let logs = book.apply_order(&limit(1, Side::Buy, dec!(1), dec!(1))).unwrap();
        assert_eq!(sequences(&logs), vec![10]);
    }

    #[test]
    fn test_depth_estimate_and_last_trade() {
        let mut book = book();
        book.apply_order(&limit(1, Side::Sell, dec!(10), dec!(2))).unwrap();
        book.apply_order(&limit(2, Side::Sell, dec!(12), dec!(3))).unwrap();
        book.apply_order(&limit(3, Side::Buy, dec!(8), dec!(1))).unwrap();

        let depth = book.book_depth(1);
        assert_eq!(depth.asks.len(), 2);
        assert_eq!(depth.bids.len(), 1);
        assert_eq!(depth.spread, Some(dec!(2)));

        let estimate = book.estimate(1, Side::Buy, dec!(4));
        assert_eq!(estimate.best_price, Some(dec!(10)));
        assert_eq!(estimate.fillable_size, dec!(4));
        assert_eq!(estimate.cost, dec!(44));
        assert_eq!(estimate.average_price, Some(dec!(11)));
        assert_eq!(estimate.available_size, dec!(5));

        assert!(book.last_trade(1).is_none());
        book.apply_order(&limit(4, Side::Buy, dec!(10), dec!(1))).unwrap();
        assert_matches!(book.last_trade(1), Some(t) => {
            assert_eq!(t.price, dec!(10));
            assert_eq!(t.maker_order_id, 1);
            assert_eq!(t.taker_order_id, 4);
        });

        let empty = book.estimate(42, Side::Sell, dec!(1));
        assert_eq!(empty.available_size, Decimal::ZERO);
        assert!(empty.best_price.is_none());
    }

    #[test]
    fn test_overflowing_fill_is_an_invariant_error() {
        let mut book = book();
        let huge = dec!(1_000_000_000_000_000);
        book.apply_order(&limit(1, Side::Sell, huge, huge)).unwrap();

        let estimate = book.estimate(1, Side::Buy, huge);
        assert_eq!(estimate.fillable_size, huge);
        assert_eq!(estimate.cost, Decimal::MAX);

        assert_matches!(
            book.apply_order(&limit(2, Side::Buy, huge, huge)),
            Err(MatchingError::Invariant(_))
        );
        assert_eq!(book.book_depth(1).asks.len(), 1);
    }
}
