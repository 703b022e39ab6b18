//! Domain types for the Matching Engine
//!
//! Inbound [`Order`] commands, the [`BookOrder`] subset kept while an order
//! rests, and the [`Product`] an engine is bound to.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::MatchingError;

/// `expires_in` value for orders that never expire
pub const NEVER_EXPIRES: i64 = -1;

/// Largest accepted price, size or funds (1e14).
///
/// Keeps every product of two amounts, and every sum of fills a taker can
/// accumulate, inside the range of [`Decimal`].
pub const MAX_ORDER_AMOUNT: Decimal = Decimal::from_parts(0x107A_4000, 0x5AF3, 0, false, 0);

// ============================================================================
// Order Side
// ============================================================================

/// Order side (buy or sell)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    /// Returns the opposite side
    pub fn opposite(&self) -> Self {
        match self {
            Side::Buy => Side::Sell,
            Side::Sell => Side::Buy,
        }
    }

    pub fn is_buy(&self) -> bool {
        matches!(self, Side::Buy)
    }
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Side::Buy => write!(f, "buy"),
            Side::Sell => write!(f, "sell"),
        }
    }
}

// ============================================================================
// Order Type / Status
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderType {
    Limit,
    Market,
}

impl std::fmt::Display for OrderType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OrderType::Limit => write!(f, "limit"),
            OrderType::Market => write!(f, "market"),
        }
    }
}

/// Lifecycle status carried by an inbound order.
///
/// Only `Cancelling` changes how the engine routes an order; every other
/// status is treated as a request to match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    #[default]
    New,
    Open,
    Cancelling,
    Cancelled,
    Filled,
    Partial,
}

/// Why an order left the book
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DoneReason {
    Filled,
    Cancelled,
    Partial,
}

// ============================================================================
// Product
// ============================================================================

/// A tradable product. One engine and one order book exist per product.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Product {
    pub id: String,
    pub base_currency: String,
    pub quote_currency: String,
    /// Scale market-buy size budgets are truncated to
    pub base_scale: u32,
    pub quote_scale: u32,
}

impl From<&config::ProductConfig> for Product {
    fn from(cfg: &config::ProductConfig) -> Self {
        Self {
            id: cfg.id.clone(),
            base_currency: cfg.base_currency.clone(),
            quote_currency: cfg.quote_currency.clone(),
            base_scale: cfg.base_scale,
            quote_scale: cfg.quote_scale,
        }
    }
}

// ============================================================================
// Order
// ============================================================================

/// Inbound order command as delivered by the order source
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub id: u64,
    pub product_id: String,
    #[serde(default)]
    pub user_id: u64,
    #[serde(default)]
    pub client_oid: String,
    #[serde(default)]
    pub backend_order_id: String,
    pub side: Side,
    #[serde(rename = "type")]
    pub order_type: OrderType,
    #[serde(default)]
    pub price: Decimal,
    #[serde(default)]
    pub size: Decimal,
    /// Quote-currency budget of a market buy
    #[serde(default)]
    pub funds: Decimal,
    #[serde(default)]
    pub status: OrderStatus,
    /// Seconds until auto-cancel. 0 = none, -1 = never expires
    #[serde(default)]
    pub expires_in: i64,
    /// Sub-market key; matching only happens within one art
    #[serde(default)]
    pub art: i64,
}

impl Order {
    pub fn is_cancelling(&self) -> bool {
        self.status == OrderStatus::Cancelling
    }

    /// Limit orders with a positive countdown get an expiry timer
    pub fn arms_expiry(&self) -> bool {
        self.order_type == OrderType::Limit && !self.is_cancelling() && self.expires_in > 0
    }

    /// Reject orders the matcher cannot execute.
    ///
    /// Cancellations only need to identify the resting order, so their
    /// price and size are not checked.
    pub fn validate(&self) -> Result<(), MatchingError> {
        if self.is_cancelling() {
            return Ok(());
        }

        if self.size.is_sign_negative() || self.funds.is_sign_negative() {
            return Err(MatchingError::InvalidOrder(format!(
                "order {} has negative size or funds",
                self.id
            )));
        }

        for (field, value) in [("price", self.price), ("size", self.size), ("funds", self.funds)] {
            if value > MAX_ORDER_AMOUNT {
                return Err(MatchingError::InvalidOrder(format!(
                    "order {} {} {} exceeds {}",
                    self.id, field, value, MAX_ORDER_AMOUNT
                )));
            }
        }

        match (self.order_type, self.side) {
            (OrderType::Limit, _) => {
                if self.price <= Decimal::ZERO || self.size <= Decimal::ZERO {
                    return Err(MatchingError::InvalidOrder(format!(
                        "limit order {} needs a positive price and size",
                        self.id
                    )));
                }
            }
            (OrderType::Market, Side::Buy) => {
                if self.funds.is_zero() && self.size.is_zero() {
                    return Err(MatchingError::InvalidOrder(format!(
                        "market buy {} has neither funds nor size",
                        self.id
                    )));
                }
            }
            (OrderType::Market, Side::Sell) => {
                if self.size.is_zero() {
                    return Err(MatchingError::InvalidOrder(format!(
                        "market sell {} has no size",
                        self.id
                    )));
                }
            }
        }

        Ok(())
    }
}

// ============================================================================
// Book Order
// ============================================================================

/// The part of an order kept while it rests in a depth
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookOrder {
    pub order_id: u64,
    /// Remaining size
    pub size: Decimal,
    pub funds: Decimal,
    pub price: Decimal,
    pub side: Side,
    #[serde(rename = "type")]
    pub order_type: OrderType,
    pub client_oid: String,
    /// Remaining seconds until auto-cancel
    pub expires_in: i64,
    pub backend_order_id: String,
    pub art: i64,
    pub user_id: u64,
}

impl From<&Order> for BookOrder {
    fn from(order: &Order) -> Self {
        Self {
            order_id: order.id,
            size: order.size,
            funds: order.funds,
            price: order.price,
            side: order.side,
            order_type: order.order_type,
            client_oid: order.client_oid.clone(),
            expires_in: order.expires_in,
            backend_order_id: order.backend_order_id.clone(),
            art: order.art,
            user_id: order.user_id,
        }
    }
}

impl BookOrder {
    /// Rebuild the order a resting book order came from, marked open.
    pub fn to_open_order(&self, product_id: &str) -> Order {
        Order {
            id: self.order_id,
            product_id: product_id.to_string(),
            user_id: self.user_id,
            client_oid: self.client_oid.clone(),
            backend_order_id: self.backend_order_id.clone(),
            side: self.side,
            order_type: self.order_type,
            price: self.price,
            size: self.size,
            funds: self.funds,
            status: OrderStatus::Open,
            expires_in: self.expires_in,
            art: self.art,
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use rust_decimal::dec;

    pub(crate) fn art_usd() -> Product {
        Product {
            id: "ART-USD".to_string(),
            base_currency: "ART".to_string(),
            quote_currency: "USD".to_string(),
            base_scale: 4,
            quote_scale: 2,
        }
    }

    pub(crate) fn limit(id: u64, side: Side, price: Decimal, size: Decimal) -> Order {
        Order {
            id,
            product_id: "ART-USD".to_string(),
            user_id: 1,
            client_oid: format!("c-{}", id),
            backend_order_id: String::new(),
            side,
            order_type: OrderType::Limit,
            price,
            size,
            funds: Decimal::ZERO,
            status: OrderStatus::New,
            expires_in: 0,
            art: 1,
        }
    }

    pub(crate) fn market(id: u64, side: Side, size: Decimal, funds: Decimal) -> Order {
        Order {
            order_type: OrderType::Market,
            price: Decimal::ZERO,
            funds,
            ..limit(id, side, Decimal::ZERO, size)
        }
    }

    #[test]
    fn test_side_opposite() {
        assert_eq!(Side::Buy.opposite(), Side::Sell);
        assert_eq!(Side::Sell.opposite(), Side::Buy);
        assert!(Side::Buy.is_buy());
    }

    #[test]
    fn test_validate_limit() {
        assert!(limit(1, Side::Buy, dec!(100), dec!(1)).validate().is_ok());
        assert!(limit(1, Side::Buy, dec!(0), dec!(1)).validate().is_err());
        assert!(limit(1, Side::Sell, dec!(100), dec!(0)).validate().is_err());
        assert!(limit(1, Side::Sell, dec!(100), dec!(-1)).validate().is_err());
    }

    #[test]
    fn test_validate_market() {
        assert!(market(1, Side::Buy, dec!(0), dec!(50)).validate().is_ok());
        assert!(market(1, Side::Buy, dec!(2), dec!(0)).validate().is_ok());
        assert!(market(1, Side::Buy, dec!(0), dec!(0)).validate().is_err());
        assert!(market(1, Side::Sell, dec!(0), dec!(50)).validate().is_err());
        assert!(market(1, Side::Sell, dec!(3), dec!(0)).validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_oversized_amounts() {
        assert_eq!(MAX_ORDER_AMOUNT, dec!(100_000_000_000_000));
        assert!(limit(1, Side::Buy, MAX_ORDER_AMOUNT, MAX_ORDER_AMOUNT).validate().is_ok());

        let huge = dec!(1_000_000_000_000_000);
        assert_matches!(
            limit(1, Side::Sell, huge, huge).validate(),
            Err(MatchingError::InvalidOrder(_))
        );
        assert!(limit(1, Side::Buy, dec!(100), huge).validate().is_err());
        assert!(market(1, Side::Buy, dec!(0), huge).validate().is_err());
    }

    #[test]
    fn test_cancelling_skips_checks() {
        let mut order = limit(1, Side::Buy, dec!(0), dec!(0));
        order.status = OrderStatus::Cancelling;
        assert!(order.validate().is_ok());
        assert!(!order.arms_expiry());
    }

    #[test]
    fn test_arms_expiry() {
        let mut order = limit(1, Side::Buy, dec!(1), dec!(1));
        order.expires_in = 5;
        assert!(order.arms_expiry());
        order.expires_in = NEVER_EXPIRES;
        assert!(!order.arms_expiry());
        assert!(!market(2, Side::Sell, dec!(1), dec!(0)).arms_expiry());
    }

    #[test]
    fn test_order_json_accepts_numbers_and_defaults() {
        let json = r#"{"id":3,"product_id":"ART-USD","side":"sell","type":"limit","price":"101.5","size":2,"art":4}"#;
        let order: Order = serde_json::from_str(json).unwrap();
        assert_eq!(order.price, dec!(101.5));
        assert_eq!(order.size, dec!(2));
        assert_eq!(order.status, OrderStatus::New);
        assert_eq!(order.expires_in, 0);
        assert_eq!(order.art, 4);
    }

    #[test]
    fn test_book_order_round_trip_to_open_order() {
        let mut order = limit(9, Side::Sell, dec!(5), dec!(3));
        order.expires_in = 12;
        let book = BookOrder::from(&order);
        let back = book.to_open_order("ART-USD");
        assert_eq!(back.status, OrderStatus::Open);
        assert_eq!(back.expires_in, 12);
        assert_eq!(back.size, dec!(3));
        assert_eq!(back.client_oid, "c-9");
    }
}
