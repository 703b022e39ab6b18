//! Store module for the Matching Engine
//!
//! This module provides the store traits and their implementations.

mod memory;
mod redis;
mod traits;

pub use memory::{
    InMemoryLogReader, InMemoryLogStore, InMemoryOrderQueue, InMemoryOrderReader,
    InMemorySnapshotStore,
};
pub use self::redis::{snapshot_key, RedisSnapshotStore};
pub use traits::*;

use std::sync::Arc;
use tracing::info;

/// Snapshot backend selection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreType {
    /// In-memory store (fast, non-persistent)
    InMemory,
    /// Redis store (persistent)
    Redis,
}

impl StoreType {
    /// Parse store type from string
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "inmemory" | "in_memory" | "memory" => Some(StoreType::InMemory),
            "redis" => Some(StoreType::Redis),
            _ => None,
        }
    }
}

/// Create the snapshot store of one product from configuration
pub async fn create_snapshot_store(
    product_id: &str,
    config: &config::OrderbookStoreConfig,
) -> StoreResult<Arc<dyn SnapshotStore>> {
    let store_type = StoreType::parse(&config.store_type).ok_or_else(|| {
        StoreError::Other(format!("unknown orderbook store type '{}'", config.store_type))
    })?;

    match store_type {
        StoreType::InMemory => {
            info!(product = product_id, "Creating in-memory snapshot store");
            Ok(Arc::new(InMemorySnapshotStore::new()))
        }
        StoreType::Redis => {
            let redis_config = config.redis.as_ref().ok_or_else(|| {
                StoreError::Other("Redis config required for Redis store".to_string())
            })?;
            info!(product = product_id, "Creating Redis snapshot store");
            Ok(Arc::new(
                RedisSnapshotStore::new(product_id, redis_config).await?,
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    impl std::fmt::Debug for dyn SnapshotStore {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            f.write_str("dyn SnapshotStore")
        }
    }

    #[test]
    fn test_store_type_parse() {
        assert_eq!(StoreType::parse("memory"), Some(StoreType::InMemory));
        assert_eq!(StoreType::parse("In_Memory"), Some(StoreType::InMemory));
        assert_eq!(StoreType::parse("redis"), Some(StoreType::Redis));
        assert_eq!(StoreType::parse("kafka"), None);
    }

    #[tokio::test]
    async fn test_create_memory_store() {
        let store = create_snapshot_store("ART-USD", &config::OrderbookStoreConfig::default())
            .await
            .unwrap();
        assert!(store.get_latest().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_redis_without_section_fails() {
        let cfg = config::OrderbookStoreConfig {
            store_type: "redis".to_string(),
            redis: None,
        };
        assert_matches!(
            create_snapshot_store("ART-USD", &cfg).await,
            Err(StoreError::Other(_))
        );
    }
}
