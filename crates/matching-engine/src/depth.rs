//! One side of one sub-market's book.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use thiserror::Error;

use crate::domain::{BookOrder, Side};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DepthError {
    #[error("order {0} not found on book")]
    NotFound(u64),

    #[error("order {order_id} size {size} less than {requested}")]
    InsufficientSize {
        order_id: u64,
        size: Decimal,
        requested: Decimal,
    },
}

/// Index key whose natural order is matching priority.
///
/// `rank` is the price for asks and the negated price for bids, so the
/// smallest key is always the best price, oldest id first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct PriceKey {
    rank: Decimal,
    order_id: u64,
}

/// Aggregated size at one price
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceLevel {
    pub price: Decimal,
    pub size: Decimal,
    pub order_count: usize,
}

#[derive(Debug, Clone)]
pub struct Depth {
    side: Side,
    orders: HashMap<u64, BookOrder>,
    queue: BTreeSet<PriceKey>,
}

impl Depth {
    pub fn new(side: Side) -> Self {
        Self {
            side,
            orders: HashMap::new(),
            queue: BTreeSet::new(),
        }
    }

    pub fn side(&self) -> Side {
        self.side
    }

    fn key(&self, price: Decimal, order_id: u64) -> PriceKey {
        let rank = match self.side {
            Side::Sell => price,
            Side::Buy => -price,
        };
        PriceKey { rank, order_id }
    }

    /// Insert a resting order. Re-adding an id replaces the old entry.
    pub fn add(&mut self, order: BookOrder) {
        if let Some(old) = self.orders.remove(&order.order_id) {
            let key = self.key(old.price, old.order_id);
            self.queue.remove(&key);
        }
        self.queue.insert(self.key(order.price, order.order_id));
        self.orders.insert(order.order_id, order);
    }

    /// Reduce the resting size of `order_id`, removing it at zero.
    pub fn decr_size(&mut self, order_id: u64, amount: Decimal) -> Result<(), DepthError> {
        let order = self
            .orders
            .get_mut(&order_id)
            .ok_or(DepthError::NotFound(order_id))?;

        if order.size < amount {
            return Err(DepthError::InsufficientSize {
                order_id,
                size: order.size,
                requested: amount,
            });
        }

        order.size -= amount;
        if order.size.is_zero() {
            let price = order.price;
            self.orders.remove(&order_id);
            let key = self.key(price, order_id);
            self.queue.remove(&key);
        }
        Ok(())
    }

    /// Store the remaining expiry of a resting order.
    ///
    /// Returns false when the order is no longer on the book.
    pub fn update_expiry(&mut self, order_id: u64, remaining: i64) -> bool {
        match self.orders.get_mut(&order_id) {
            Some(order) => {
                order.expires_in = remaining;
                true
            }
            None => false,
        }
    }

    pub fn get(&self, order_id: u64) -> Option<&BookOrder> {
        self.orders.get(&order_id)
    }

    /// Best order by price/time priority
    pub fn best(&self) -> Option<&BookOrder> {
        self.queue
            .first()
            .and_then(|key| self.orders.get(&key.order_id))
    }

    /// Resting orders in matching priority
    pub fn iter(&self) -> impl Iterator<Item = &BookOrder> + '_ {
        self.queue
            .iter()
            .filter_map(move |key| self.orders.get(&key.order_id))
    }

    /// Size aggregated by price, best level first
    pub fn levels(&self) -> Vec<PriceLevel> {
        let mut levels: Vec<PriceLevel> = Vec::new();
        for order in self.iter() {
            match levels.last_mut() {
                Some(level) if level.price == order.price => {
                    level.size += order.size;
                    level.order_count += 1;
                }
                _ => levels.push(PriceLevel {
                    price: order.price,
                    size: order.size,
                    order_count: 1,
                }),
            }
        }
        levels
    }

    pub fn len(&self) -> usize {
        self.orders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.orders.is_empty()
    }

    /// Index and map hold the same ids
    #[cfg(test)]
    pub(crate) fn is_consistent(&self) -> bool {
        self.queue.len() == self.orders.len()
            && self.queue.iter().all(|k| self.orders.contains_key(&k.order_id))
    }
}
