//! Expiry countdowns for resting limit orders.
//!
//! One task per armed order. Each tick the remaining time is written back
//! to the book through the apply stage; at zero the order is resubmitted
//! as a cancellation so it re-enters the pipeline like any other order.
//! A failed resubmission is retried until it lands or the engine stops.

use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval_at, sleep, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::backoff::Backoff;
use crate::domain::{Order, OrderStatus};
use crate::metrics::EngineMetrics;
use crate::query::BookQuery;
use crate::store::OrderWriter;

pub(crate) struct ExpiryTimer {
    pub order: Order,
    pub tick: Duration,
    pub backoff: Backoff,
    pub writer: Arc<dyn OrderWriter>,
    pub query: BookQuery,
    pub metrics: EngineMetrics,
    pub shutdown: CancellationToken,
}

impl ExpiryTimer {
    pub async fn run(self) {
        let ExpiryTimer {
            mut order,
            tick,
            mut backoff,
            writer,
            query,
            metrics,
            shutdown,
        } = self;

        metrics.timer_started();
        let mut ticker = interval_at(Instant::now() + tick, tick);
        let mut remaining = order.expires_in;

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {}
            }

            remaining -= 1;
            if remaining <= 0 {
                order.status = OrderStatus::Cancelling;
                order.expires_in = 0;
                info!(order_id = order.id, product = %order.product_id, "Order expired");
                while let Err(err) = writer.submit_order(&order).await {
                    let delay = backoff.next_delay();
                    warn!(order_id = order.id, %err, attempt = backoff.attempt(), ?delay, "Failed to submit expiry cancellation, retrying");
                    tokio::select! {
                        _ = shutdown.cancelled() => break,
                        _ = sleep(delay) => {}
                    }
                }
                break;
            }

            match query
                .update_expiry(order.art, order.side, order.id, remaining)
                .await
            {
                Ok(true) => {}
                Ok(false) => {
                    debug!(order_id = order.id, "Order left the book, timer stopped");
                    break;
                }
                Err(_) => break,
            }
        }

        metrics.timer_stopped();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::tests::limit;
    use crate::domain::Side;
    use crate::store::{StoreError, StoreResult};
    use async_trait::async_trait;
    use mockall::mock;
    use rust_decimal::dec;
    use tokio::sync::mpsc;

    mock! {
        pub Writer {}

        #[async_trait]
        impl OrderWriter for Writer {
            async fn submit_order(&self, order: &Order) -> StoreResult<()>;
        }
    }

    fn expiring_timer(writer: MockWriter, shutdown: CancellationToken) -> (ExpiryTimer, mpsc::Receiver<crate::query::BookRequest>) {
        let (tx, rx) = mpsc::channel(4);
        let mut order = limit(1, Side::Sell, dec!(10), dec!(1));
        order.expires_in = 1;
        let timer = ExpiryTimer {
            order,
            tick: Duration::from_secs(1),
            backoff: Backoff::from_millis(10, 40),
            writer: Arc::new(writer),
            query: BookQuery::new("ART-USD".to_string(), tx),
            metrics: EngineMetrics::new("ART-USD"),
            shutdown,
        };
        (timer, rx)
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_retried_until_accepted() {
        let mut writer = MockWriter::new();
        let mut calls = 0;
        writer
            .expect_submit_order()
            .withf(|order| order.status == OrderStatus::Cancelling && order.expires_in == 0)
            .times(3)
            .returning(move |_| {
                calls += 1;
                if calls < 3 {
                    Err(StoreError::Other("queue unavailable".to_string()))
                } else {
                    Ok(())
                }
            });

        let (timer, _requests) = expiring_timer(writer, CancellationToken::new());
        let started = Instant::now();
        timer.run().await;
        // one tick plus two backoff delays
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_millis(1030), "{:?}", elapsed);
        assert!(elapsed < Duration::from_secs(2), "{:?}", elapsed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_stops_on_shutdown() {
        let mut writer = MockWriter::new();
        writer
            .expect_submit_order()
            .returning(|_| Err(StoreError::Closed));

        let shutdown = CancellationToken::new();
        let (timer, _requests) = expiring_timer(writer, shutdown.clone());
        let task = tokio::spawn(timer.run());

        sleep(Duration::from_secs(5)).await;
        assert!(!task.is_finished());
        shutdown.cancel();
        task.await.unwrap();
    }
}
