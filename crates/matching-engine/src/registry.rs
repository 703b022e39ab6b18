//! One engine per product, addressed by product id.

use async_trait::async_trait;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::domain::{Product, Side};
use crate::engine::{Engine, EngineHandle, EngineSettings};
use crate::error::MatchingError;
use crate::order_book::{BookDepth, Estimate};
use crate::store::{
    create_snapshot_store, InMemoryLogStore, InMemoryOrderQueue, LogSink, OrderSource,
    OrderWriter, SnapshotStore,
};
use crate::Result;

/// Everything an engine reads from and writes to
pub struct EngineStores {
    pub source: Box<dyn OrderSource>,
    pub writer: Arc<dyn OrderWriter>,
    pub log_sink: Arc<dyn LogSink>,
    pub snapshot_store: Arc<dyn SnapshotStore>,
}

/// Builds the stores of a product's engine
#[async_trait]
pub trait StoreFactory: Send + Sync {
    async fn create(&self, product: &Product) -> Result<EngineStores>;
}

/// In-memory order queue and log store per product, snapshot store from config
pub struct InMemoryStoreFactory {
    store_config: config::OrderbookStoreConfig,
    queues: HashMap<String, InMemoryOrderQueue>,
    logs: HashMap<String, InMemoryLogStore>,
}

impl InMemoryStoreFactory {
    pub fn new(products: &[Product], store_config: config::OrderbookStoreConfig) -> Self {
        let queues = products
            .iter()
            .map(|p| (p.id.clone(), InMemoryOrderQueue::new()))
            .collect();
        let logs = products
            .iter()
            .map(|p| (p.id.clone(), InMemoryLogStore::new()))
            .collect();

        Self {
            store_config,
            queues,
            logs,
        }
    }

    /// Order queue of a product, used to submit orders
    pub fn queue(&self, product_id: &str) -> Option<InMemoryOrderQueue> {
        self.queues.get(product_id).cloned()
    }

    /// Committed logs of a product
    pub fn log_store(&self, product_id: &str) -> Option<InMemoryLogStore> {
        self.logs.get(product_id).cloned()
    }
}

#[async_trait]
impl StoreFactory for InMemoryStoreFactory {
    async fn create(&self, product: &Product) -> Result<EngineStores> {
        let queue = self
            .queue(&product.id)
            .ok_or_else(|| MatchingError::UnknownProduct(product.id.clone()))?;
        let log_store = self
            .log_store(&product.id)
            .ok_or_else(|| MatchingError::UnknownProduct(product.id.clone()))?;
        let snapshot_store = create_snapshot_store(&product.id, &self.store_config)
            .await
            .map_err(MatchingError::SnapshotStore)?;

        Ok(EngineStores {
            source: Box::new(queue.reader()),
            writer: Arc::new(queue),
            log_sink: Arc::new(log_store),
            snapshot_store,
        })
    }
}

pub struct EngineRegistry {
    engines: HashMap<String, EngineHandle>,
}

impl EngineRegistry {
    /// Restore and start one engine per product.
    ///
    /// If any engine fails to start, the ones already running are stopped.
    pub async fn start(
        products: &[Product],
        settings: &EngineSettings,
        factory: &dyn StoreFactory,
        shutdown: CancellationToken,
    ) -> Result<Self> {
        let mut registry = Self {
            engines: HashMap::with_capacity(products.len()),
        };

        for product in products {
            if registry.engines.contains_key(&product.id) {
                warn!(product = %product.id, "Product listed twice, starting one engine");
                continue;
            }
            match Self::start_engine(product, settings, factory, &shutdown).await {
                Ok(handle) => {
                    registry.engines.insert(product.id.clone(), handle);
                }
                Err(err) => {
                    registry.shutdown();
                    return Err(err);
                }
            }
        }

        info!(engines = registry.engines.len(), "Engine registry started");
        Ok(registry)
    }

    async fn start_engine(
        product: &Product,
        settings: &EngineSettings,
        factory: &dyn StoreFactory,
        shutdown: &CancellationToken,
    ) -> Result<EngineHandle> {
        let stores = factory.create(product).await?;
        let engine = Engine::new(
            product.clone(),
            settings.clone(),
            stores.source,
            stores.writer,
            stores.log_sink,
            stores.snapshot_store,
        )
        .await?;
        Ok(engine.start(shutdown.clone()))
    }

    pub fn get(&self, product_id: &str) -> Option<&EngineHandle> {
        self.engines.get(product_id)
    }

    fn handle(&self, product_id: &str) -> Result<&EngineHandle> {
        self.get(product_id)
            .ok_or_else(|| MatchingError::UnknownProduct(product_id.to_string()))
    }

    pub fn product_ids(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.engines.keys().map(String::as_str).collect();
        ids.sort_unstable();
        ids
    }

    pub fn len(&self) -> usize {
        self.engines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.engines.is_empty()
    }

    pub async fn estimate(
        &self,
        product_id: &str,
        art: i64,
        side: Side,
        size: Decimal,
    ) -> Result<Estimate> {
        self.handle(product_id)?.estimate(art, side, size).await
    }

    pub async fn depth(&self, product_id: &str, art: i64) -> Result<BookDepth> {
        self.handle(product_id)?.depth(art).await
    }

    pub fn shutdown(&self) {
        for handle in self.engines.values() {
            handle.shutdown();
        }
    }

    /// Wait for every engine; returns the first error
    pub async fn join_all(self) -> Result<()> {
        let mut first_error = None;
        for (product_id, handle) in self.engines {
            if let Err(err) = handle.join().await {
                warn!(product = %product_id, %err, "Engine stopped with error");
                first_error.get_or_insert(err);
            }
        }
        first_error.map_or(Ok(()), Err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::tests::{art_usd, limit};
    use crate::domain::NEVER_EXPIRES;
    use assert_matches::assert_matches;
    use rust_decimal::dec;

    fn art_usdt() -> Product {
        Product {
            id: "ART-USDT".to_string(),
            quote_currency: "USDT".to_string(),
            ..art_usd()
        }
    }

    #[tokio::test]
    async fn test_orders_reach_their_own_engine() {
        let products = vec![art_usd(), art_usdt()];
        let factory = InMemoryStoreFactory::new(&products, config::OrderbookStoreConfig::default());
        let shutdown = CancellationToken::new();
        let registry = EngineRegistry::start(
            &products,
            &EngineSettings::default(),
            &factory,
            shutdown.clone(),
        )
        .await
        .unwrap();
        assert_eq!(registry.product_ids(), vec!["ART-USD", "ART-USDT"]);

        let mut order = limit(1, Side::Sell, dec!(10), dec!(2));
        order.expires_in = NEVER_EXPIRES;
        factory.queue("ART-USD").unwrap().submit_order(&order).await.unwrap();
        registry.get("ART-USD").unwrap().wait_for_sequence(1).await.unwrap();

        let depth = registry.depth("ART-USD", 1).await.unwrap();
        assert_eq!(depth.asks.len(), 1);
        let other = registry.depth("ART-USDT", 1).await.unwrap();
        assert!(other.asks.is_empty());
        assert_eq!(factory.log_store("ART-USDT").unwrap().records().await.len(), 0);

        assert_matches!(
            registry.depth("ART-EUR", 1).await,
            Err(MatchingError::UnknownProduct(_))
        );

        shutdown.cancel();
        registry.join_all().await.unwrap();
    }

    #[tokio::test]
    async fn test_missing_stores_fail_start() {
        let factory = InMemoryStoreFactory::new(&[art_usd()], config::OrderbookStoreConfig::default());
        let result = EngineRegistry::start(
            &[art_usd(), art_usdt()],
            &EngineSettings::default(),
            &factory,
            CancellationToken::new(),
        )
        .await;
        match result {
            Err(MatchingError::UnknownProduct(id)) => assert_eq!(id, "ART-USDT"),
            Err(err) => panic!("unexpected error: {}", err),
            Ok(_) => panic!("registry started without stores"),
        }
    }
}
