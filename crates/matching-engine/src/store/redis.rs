//! Redis snapshot store
//!
//! Keeps the latest snapshot of each product as one JSON value under
//! `matching_snapshot_<product>`, written with a TTL so snapshots of
//! retired products age out.

use async_trait::async_trait;
use redis::AsyncCommands;
use std::sync::Arc;
use tracing::{debug, info};

use crate::snapshot::Snapshot;
use crate::store::traits::{SnapshotStore, StoreError, StoreResult};
use config::RedisConfig;

const KEY_PREFIX: &str = "matching_snapshot_";

pub struct RedisSnapshotStore {
    /// Redis connection (wrapped in Mutex for mutable access)
    redis: Arc<tokio::sync::Mutex<redis::aio::ConnectionManager>>,
    key: String,
    ttl_seconds: u64,
}

impl RedisSnapshotStore {
    pub async fn new(product_id: &str, config: &RedisConfig) -> StoreResult<Self> {
        info!(host = %config.host, port = config.port, db = config.db_index, product = product_id, "Connecting to Redis");

        let client = redis::Client::open(config.url())?;
        let connection_manager = client.get_connection_manager().await?;

        Ok(Self {
            redis: Arc::new(tokio::sync::Mutex::new(connection_manager)),
            key: snapshot_key(product_id),
            ttl_seconds: config.snapshot_ttl_seconds,
        })
    }
}

pub fn snapshot_key(product_id: &str) -> String {
    format!("{}{}", KEY_PREFIX, product_id)
}

#[async_trait]
impl SnapshotStore for RedisSnapshotStore {
    async fn store(&self, snapshot: &Snapshot) -> StoreResult<()> {
        let json = serde_json::to_string(snapshot)?;

        let mut redis = self.redis.lock().await;
        redis::cmd("SET")
            .arg(&self.key)
            .arg(json)
            .arg("EX")
            .arg(self.ttl_seconds)
            .query_async::<_, ()>(&mut *redis)
            .await
            .map_err(|e| StoreError::Redis(e.to_string()))?;

        debug!(key = %self.key, offset = snapshot.order_offset, log_seq = snapshot.log_seq(), "Snapshot written to Redis");
        Ok(())
    }

    async fn get_latest(&self) -> StoreResult<Option<Snapshot>> {
        let mut redis = self.redis.lock().await;
        let result: Option<String> = redis.get(&self.key).await?;

        match result {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }
}
