//! Master configuration for the matching service.
//!
//! The configuration is a single YAML document with four sections:
//! `service`, `products`, `matching` and `orderbook_store`. Every tunable
//! in `matching` has a default in [`defaults`] so a minimal file only needs
//! to list the products.

use serde::{Deserialize, Serialize};

pub mod defaults;
pub mod parser;
pub mod substitution;
pub mod validator;

pub use defaults::*;
pub use parser::*;
pub use substitution::*;
pub use validator::*;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MasterConfig {
    #[serde(default)]
    pub service: ServiceConfig,
    pub products: Vec<ProductConfig>,
    #[serde(default)]
    pub matching: MatchingConfig,
    #[serde(default)]
    pub orderbook_store: OrderbookStoreConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServiceConfig {
    #[serde(default = "default_service_name")]
    pub name: String,
    /// One of `pretty`, `json`, `compact`
    #[serde(rename = "log_format")]
    #[serde(default = "default_log_format")]
    pub log_format: String,
    #[serde(rename = "metrics_port")]
    #[serde(default)]
    pub metrics_port: Option<u16>,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: default_service_name(),
            log_format: default_log_format(),
            metrics_port: None,
        }
    }
}

/// A tradable product. Each product gets its own engine.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ProductConfig {
    pub id: String,
    #[serde(rename = "base_currency")]
    pub base_currency: String,
    #[serde(rename = "quote_currency")]
    pub quote_currency: String,
    /// Decimal places kept when converting market-buy funds into size
    #[serde(rename = "base_scale")]
    pub base_scale: u32,
    #[serde(rename = "quote_scale")]
    pub quote_scale: u32,
}

/// Engine pipeline tunables.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct MatchingConfig {
    #[serde(rename = "order_channel_capacity")]
    #[serde(default = "default_order_channel_capacity")]
    pub order_channel_capacity: usize,
    #[serde(rename = "log_channel_capacity")]
    #[serde(default = "default_log_channel_capacity")]
    pub log_channel_capacity: usize,
    #[serde(rename = "expiry_channel_capacity")]
    #[serde(default = "default_expiry_channel_capacity")]
    pub expiry_channel_capacity: usize,
    #[serde(rename = "snapshot_channel_capacity")]
    #[serde(default = "default_snapshot_channel_capacity")]
    pub snapshot_channel_capacity: usize,
    #[serde(rename = "request_channel_capacity")]
    #[serde(default = "default_request_channel_capacity")]
    pub request_channel_capacity: usize,
    #[serde(rename = "commit_batch_size")]
    #[serde(default = "default_commit_batch_size")]
    pub commit_batch_size: usize,
    #[serde(rename = "snapshot_interval_seconds")]
    #[serde(default = "default_snapshot_interval")]
    pub snapshot_interval_seconds: u64,
    /// Minimum number of applied offsets between two snapshots
    #[serde(rename = "snapshot_min_offset_delta")]
    #[serde(default = "default_snapshot_min_offset_delta")]
    pub snapshot_min_offset_delta: i64,
    #[serde(rename = "order_id_window_capacity")]
    #[serde(default = "default_order_id_window_capacity")]
    pub order_id_window_capacity: u64,
    #[serde(rename = "expiry_tick_millis")]
    #[serde(default = "default_expiry_tick_millis")]
    pub expiry_tick_millis: u64,
    #[serde(rename = "fetch_backoff_initial_millis")]
    #[serde(default = "default_fetch_backoff_initial_millis")]
    pub fetch_backoff_initial_millis: u64,
    #[serde(rename = "fetch_backoff_max_millis")]
    #[serde(default = "default_fetch_backoff_max_millis")]
    pub fetch_backoff_max_millis: u64,
}

impl Default for MatchingConfig {
    fn default() -> Self {
        Self {
            order_channel_capacity: default_order_channel_capacity(),
            log_channel_capacity: default_log_channel_capacity(),
            expiry_channel_capacity: default_expiry_channel_capacity(),
            snapshot_channel_capacity: default_snapshot_channel_capacity(),
            request_channel_capacity: default_request_channel_capacity(),
            commit_batch_size: default_commit_batch_size(),
            snapshot_interval_seconds: default_snapshot_interval(),
            snapshot_min_offset_delta: default_snapshot_min_offset_delta(),
            order_id_window_capacity: default_order_id_window_capacity(),
            expiry_tick_millis: default_expiry_tick_millis(),
            fetch_backoff_initial_millis: default_fetch_backoff_initial_millis(),
            fetch_backoff_max_millis: default_fetch_backoff_max_millis(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct OrderbookStoreConfig {
    /// `memory` or `redis`
    #[serde(rename = "type")]
    #[serde(default = "default_store_type")]
    pub store_type: String,
    #[serde(default)]
    pub redis: Option<RedisConfig>,
}

impl Default for OrderbookStoreConfig {
    fn default() -> Self {
        Self {
            store_type: default_store_type(),
            redis: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RedisConfig {
    pub host: String,
    #[serde(default = "default_redis_port")]
    pub port: u16,
    #[serde(default)]
    pub password: String,
    #[serde(rename = "db_index")]
    #[serde(default)]
    pub db_index: u8,
    #[serde(rename = "snapshot_ttl_seconds")]
    #[serde(default = "default_snapshot_ttl")]
    pub snapshot_ttl_seconds: u64,
}

impl RedisConfig {
    /// Connection URL in the form accepted by `redis::Client::open`
    pub fn url(&self) -> String {
        if self.password.is_empty() {
            format!("redis://{}:{}/{}", self.host, self.port, self.db_index)
        } else {
            format!(
                "redis://:{}@{}:{}/{}",
                self.password, self.host, self.port, self.db_index
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_yaml_uses_defaults() {
        let yaml = r#"
products:
  - id: ART-USD
    base_currency: ART
    quote_currency: USD
    base_scale: 4
    quote_scale: 2
"#;
        let config: MasterConfig = serde_yaml::from_str(yaml).unwrap();

        assert_eq!(config.products.len(), 1);
        assert_eq!(config.products[0].base_scale, 4);
        assert_eq!(config.matching, MatchingConfig::default());
        assert_eq!(config.matching.snapshot_min_offset_delta, 1000);
        assert_eq!(config.orderbook_store.store_type, "memory");
        assert_eq!(config.service.log_format, "pretty");
    }

    #[test]
    fn test_redis_url() {
        let mut redis = RedisConfig {
            host: "localhost".to_string(),
            port: 6379,
            password: String::new(),
            db_index: 2,
            snapshot_ttl_seconds: 60,
        };
        assert_eq!(redis.url(), "redis://localhost:6379/2");

        redis.password = "secret".to_string();
        assert_eq!(redis.url(), "redis://:secret@localhost:6379/2");
    }
}
