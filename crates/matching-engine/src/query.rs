//! Requests answered by the apply stage.
//!
//! The apply stage is the only owner of the order book. Readers and expiry
//! timers send a [`BookRequest`] and wait for the reply on a oneshot
//! channel, so no lock guards the book.

use rust_decimal::Decimal;
use tokio::sync::{mpsc, oneshot};

use crate::domain::Side;
use crate::error::MatchingError;
use crate::order_book::{BookDepth, Estimate, LastTrade, OrderBook};
use crate::Result;

#[derive(Debug)]
pub enum BookRequest {
    Depth {
        art: i64,
        reply: oneshot::Sender<BookDepth>,
    },
    Estimate {
        art: i64,
        side: Side,
        size: Decimal,
        reply: oneshot::Sender<Estimate>,
    },
    LastTrade {
        art: i64,
        reply: oneshot::Sender<Option<LastTrade>>,
    },
    UpdateExpiry {
        art: i64,
        side: Side,
        order_id: u64,
        remaining: i64,
        reply: oneshot::Sender<bool>,
    },
}

impl BookRequest {
    /// Answer the request from `book`. A dropped requester is not an error.
    pub(crate) fn answer(self, book: &mut OrderBook) {
        match self {
            BookRequest::Depth { art, reply } => {
                let _ = reply.send(book.book_depth(art));
            }
            BookRequest::Estimate {
                art,
                side,
                size,
                reply,
            } => {
                let _ = reply.send(book.estimate(art, side, size));
            }
            BookRequest::LastTrade { art, reply } => {
                let _ = reply.send(book.last_trade(art));
            }
            BookRequest::UpdateExpiry {
                art,
                side,
                order_id,
                remaining,
                reply,
            } => {
                let _ = reply.send(book.update_expiry(art, side, order_id, remaining));
            }
        }
    }
}

/// Cloneable sender side of the apply stage's request queue
#[derive(Debug, Clone)]
pub struct BookQuery {
    product_id: String,
    tx: mpsc::Sender<BookRequest>,
}

impl BookQuery {
    pub(crate) fn new(product_id: String, tx: mpsc::Sender<BookRequest>) -> Self {
        Self { product_id, tx }
    }

    async fn ask<T>(&self, build: impl FnOnce(oneshot::Sender<T>) -> BookRequest) -> Result<T> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(build(reply))
            .await
            .map_err(|_| MatchingError::EngineStopped(self.product_id.clone()))?;
        rx.await
            .map_err(|_| MatchingError::EngineStopped(self.product_id.clone()))
    }

    pub async fn depth(&self, art: i64) -> Result<BookDepth> {
        self.ask(|reply| BookRequest::Depth { art, reply }).await
    }

    pub async fn estimate(&self, art: i64, side: Side, size: Decimal) -> Result<Estimate> {
        self.ask(|reply| BookRequest::Estimate {
            art,
            side,
            size,
            reply,
        })
        .await
    }

    pub async fn last_trade(&self, art: i64) -> Result<Option<LastTrade>> {
        self.ask(|reply| BookRequest::LastTrade { art, reply }).await
    }

    /// Write back a countdown; false once the order left the book
    pub async fn update_expiry(
        &self,
        art: i64,
        side: Side,
        order_id: u64,
        remaining: i64,
    ) -> Result<bool> {
        self.ask(|reply| BookRequest::UpdateExpiry {
            art,
            side,
            order_id,
            remaining,
            reply,
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::tests::limit;
    use crate::domain::Product;
    use assert_matches::assert_matches;
    use rust_decimal::dec;

    #[tokio::test]
    async fn test_requests_answered_by_owner() {
        let (tx, mut rx) = mpsc::channel(4);
        let query = BookQuery::new("ART-USD".to_string(), tx);

        let owner = tokio::spawn(async move {
            let product = Product {
                id: "ART-USD".to_string(),
                base_currency: "ART".to_string(),
                quote_currency: "USD".to_string(),
                base_scale: 4,
                quote_scale: 2,
            };
            let mut book = OrderBook::new(product, 100);
            book.apply_order(&limit(1, Side::Sell, dec!(10), dec!(2))).unwrap();
            while let Some(request) = rx.recv().await {
                request.answer(&mut book);
            }
        });

        let depth = query.depth(1).await.unwrap();
        assert_eq!(depth.asks.len(), 1);
        assert!(query.update_expiry(1, Side::Sell, 1, 9).await.unwrap());
        assert!(!query.update_expiry(1, Side::Buy, 1, 9).await.unwrap());

        drop(query);
        owner.await.unwrap();
    }

    #[tokio::test]
    async fn test_stopped_owner() {
        let (tx, rx) = mpsc::channel(4);
        drop(rx);
        let query = BookQuery::new("ART-USD".to_string(), tx);
        assert_matches!(query.depth(1).await, Err(MatchingError::EngineStopped(_)));
    }
}
