use crate::*;
use std::collections::HashSet;
use thiserror::Error;

/// Largest scale a `rust_decimal::Decimal` can carry
const MAX_DECIMAL_SCALE: u32 = 28;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("At least one product must be configured")]
    NoProducts,

    #[error("Product id is required")]
    MissingProductId,

    #[error("Duplicate product id '{0}'")]
    DuplicateProduct(String),

    #[error("Product {id}: {message}")]
    InvalidProduct { id: String, message: String },

    #[error("{field} must be a positive integer")]
    InvalidPositiveInteger { field: String },

    #[error("Matching: {message}")]
    InvalidMatching { message: String },

    #[error("Orderbook store: {message}")]
    InvalidStore { message: String },

    #[error("Invalid log format: {0}. Must be one of: pretty, json, compact")]
    InvalidLogFormat(String),

    #[error("Environment variable '{var}' is missing or invalid: {message}")]
    InvalidEnvVar { var: String, message: String },
}

#[derive(Debug, Clone)]
pub struct ValidationWarning {
    pub field: String,
    pub message: String,
}

#[derive(Debug, Clone)]
pub struct DefaultApplied {
    pub field: String,
    pub value: String,
}

#[derive(Debug, Clone)]
pub struct ValidationReport {
    pub errors: Vec<ValidationError>,
    pub warnings: Vec<ValidationWarning>,
    pub defaults_applied: Vec<DefaultApplied>,
}

impl ValidationReport {
    pub fn new() -> Self {
        Self {
            errors: Vec::new(),
            warnings: Vec::new(),
            defaults_applied: Vec::new(),
        }
    }

    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn add_error(&mut self, error: ValidationError) {
        self.errors.push(error);
    }

    pub fn add_warning(&mut self, field: &str, message: &str) {
        self.warnings.push(ValidationWarning {
            field: field.to_string(),
            message: message.to_string(),
        });
    }

    pub fn add_default(&mut self, field: &str, value: &str) {
        self.defaults_applied.push(DefaultApplied {
            field: field.to_string(),
            value: value.to_string(),
        });
    }
}

impl Default for ValidationReport {
    fn default() -> Self {
        Self::new()
    }
}

pub fn validate_config(config: &MasterConfig) -> ValidationReport {
    let mut report = ValidationReport::new();

    validate_service(&config.service, &mut report);
    validate_products(&config.products, &mut report);
    validate_matching(&config.matching, &mut report);
    validate_store(&config.orderbook_store, &mut report);

    report
}

fn validate_service(service: &ServiceConfig, report: &mut ValidationReport) {
    if !["pretty", "json", "compact"].contains(&service.log_format.to_lowercase().as_str()) {
        report.add_error(ValidationError::InvalidLogFormat(service.log_format.clone()));
    }

    if service.metrics_port.is_none() {
        report.add_default("service.metrics_port", "disabled");
    }
}

fn validate_products(products: &[ProductConfig], report: &mut ValidationReport) {
    if products.is_empty() {
        report.add_error(ValidationError::NoProducts);
        return;
    }

    let mut seen = HashSet::new();
    for product in products {
        if product.id.trim().is_empty() {
            report.add_error(ValidationError::MissingProductId);
            continue;
        }

        if !seen.insert(product.id.as_str()) {
            report.add_error(ValidationError::DuplicateProduct(product.id.clone()));
        }

        if has_unresolved_env_vars(&product.id) {
            report.add_error(ValidationError::InvalidEnvVar {
                var: product.id.clone(),
                message: "product id was not substituted".to_string(),
            });
        }

        if product.base_currency.is_empty() || product.quote_currency.is_empty() {
            report.add_error(ValidationError::InvalidProduct {
                id: product.id.clone(),
                message: "base_currency and quote_currency are required".to_string(),
            });
        }

        if product.base_scale > MAX_DECIMAL_SCALE || product.quote_scale > MAX_DECIMAL_SCALE {
            report.add_error(ValidationError::InvalidProduct {
                id: product.id.clone(),
                message: format!("scales must not exceed {}", MAX_DECIMAL_SCALE),
            });
        }
    }
}

fn validate_matching(matching: &MatchingConfig, report: &mut ValidationReport) {
    let positive = [
        ("matching.order_channel_capacity", matching.order_channel_capacity as u64),
        ("matching.log_channel_capacity", matching.log_channel_capacity as u64),
        ("matching.expiry_channel_capacity", matching.expiry_channel_capacity as u64),
        ("matching.snapshot_channel_capacity", matching.snapshot_channel_capacity as u64),
        ("matching.request_channel_capacity", matching.request_channel_capacity as u64),
        ("matching.commit_batch_size", matching.commit_batch_size as u64),
        ("matching.snapshot_interval_seconds", matching.snapshot_interval_seconds),
        ("matching.order_id_window_capacity", matching.order_id_window_capacity),
        ("matching.expiry_tick_millis", matching.expiry_tick_millis),
        ("matching.fetch_backoff_initial_millis", matching.fetch_backoff_initial_millis),
    ];

    for (field, value) in positive {
        if value == 0 {
            report.add_error(ValidationError::InvalidPositiveInteger {
                field: field.to_string(),
            });
        }
    }

    if matching.fetch_backoff_initial_millis > matching.fetch_backoff_max_millis {
        report.add_error(ValidationError::InvalidMatching {
            message: "fetch_backoff_initial_millis must not exceed fetch_backoff_max_millis"
                .to_string(),
        });
    }

    if matching.snapshot_min_offset_delta < 0 {
        report.add_error(ValidationError::InvalidMatching {
            message: "snapshot_min_offset_delta must not be negative".to_string(),
        });
    } else if matching.snapshot_min_offset_delta < 10 {
        report.add_warning(
            "matching.snapshot_min_offset_delta",
            "Very small delta will snapshot after almost every order",
        );
    }

    if matching.snapshot_interval_seconds > 0 && matching.snapshot_interval_seconds < 5 {
        report.add_warning(
            "matching.snapshot_interval_seconds",
            "Snapshot interval under 5 seconds puts load on the snapshot store",
        );
    }
}

fn validate_store(store: &OrderbookStoreConfig, report: &mut ValidationReport) {
    match store.store_type.to_lowercase().as_str() {
        "memory" => {
            if store.redis.is_some() {
                report.add_warning(
                    "orderbook_store.redis",
                    "Redis section is ignored when type is memory",
                );
            }
            report.add_warning(
                "orderbook_store.type",
                "In-memory snapshots do not survive a restart",
            );
        }
        "redis" => match &store.redis {
            Some(redis) => validate_redis(redis, report),
            None => report.add_error(ValidationError::InvalidStore {
                message: "type is redis but the redis section is missing".to_string(),
            }),
        },
        other => report.add_error(ValidationError::InvalidStore {
            message: format!("unknown type '{}'. Must be one of: memory, redis", other),
        }),
    }
}

fn validate_redis(redis: &RedisConfig, report: &mut ValidationReport) {
    if redis.host.is_empty() {
        report.add_error(ValidationError::InvalidStore {
            message: "redis.host is required".to_string(),
        });
    }

    for (field, value) in [("redis.host", &redis.host), ("redis.password", &redis.password)] {
        if has_unresolved_env_vars(value) {
            report.add_error(ValidationError::InvalidEnvVar {
                var: value.clone(),
                message: format!("{} was not substituted", field),
            });
        }
    }

    if redis.snapshot_ttl_seconds == 0 {
        report.add_error(ValidationError::InvalidPositiveInteger {
            field: "orderbook_store.redis.snapshot_ttl_seconds".to_string(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn product(id: &str) -> ProductConfig {
        ProductConfig {
            id: id.to_string(),
            base_currency: "ART".to_string(),
            quote_currency: "USD".to_string(),
            base_scale: 4,
            quote_scale: 2,
        }
    }

    fn config() -> MasterConfig {
        MasterConfig {
            service: ServiceConfig::default(),
            products: vec![product("ART-USD")],
            matching: MatchingConfig::default(),
            orderbook_store: OrderbookStoreConfig::default(),
        }
    }

    #[test]
    fn test_default_config_is_valid() {
        let report = validate_config(&generate_default_config());
        assert!(report.is_valid(), "{:?}", report.errors);
        assert!(report
            .warnings
            .iter()
            .any(|w| w.field == "orderbook_store.type"));
    }

    #[test]
    fn test_no_products() {
        let mut cfg = config();
        cfg.products.clear();
        let report = validate_config(&cfg);
        assert_eq!(report.errors, vec![ValidationError::NoProducts]);
    }

    #[test]
    fn test_duplicate_and_blank_products() {
        let mut cfg = config();
        cfg.products.push(product("ART-USD"));
        cfg.products.push(product(" "));
        let report = validate_config(&cfg);
        assert!(report
            .errors
            .contains(&ValidationError::DuplicateProduct("ART-USD".to_string())));
        assert!(report.errors.contains(&ValidationError::MissingProductId));
    }

    #[test]
    fn test_scale_too_large() {
        let mut cfg = config();
        cfg.products[0].base_scale = 29;
        let report = validate_config(&cfg);
        assert!(!report.is_valid());
    }

    #[test]
    fn test_zero_capacity_and_backoff_order() {
        let mut cfg = config();
        cfg.matching.commit_batch_size = 0;
        cfg.matching.fetch_backoff_initial_millis = 10_000;
        let report = validate_config(&cfg);
        assert!(report.errors.contains(&ValidationError::InvalidPositiveInteger {
            field: "matching.commit_batch_size".to_string()
        }));
        assert!(report
            .errors
            .iter()
            .any(|e| matches!(e, ValidationError::InvalidMatching { .. })));
    }

    #[test]
    fn test_redis_store_requires_section() {
        let mut cfg = config();
        cfg.orderbook_store.store_type = "redis".to_string();
        let report = validate_config(&cfg);
        assert!(!report.is_valid());

        cfg.orderbook_store.redis = Some(RedisConfig {
            host: "${MATCHD_UNSET_REDIS_HOST}".to_string(),
            port: 6379,
            password: String::new(),
            db_index: 0,
            snapshot_ttl_seconds: 60,
        });
        let report = validate_config(&cfg);
        assert!(report
            .errors
            .iter()
            .any(|e| matches!(e, ValidationError::InvalidEnvVar { .. })));
    }

    #[test]
    fn test_small_snapshot_delta_warns() {
        let mut cfg = config();
        cfg.matching.snapshot_min_offset_delta = 0;
        let report = validate_config(&cfg);
        assert!(report.is_valid());
        assert!(report
            .warnings
            .iter()
            .any(|w| w.field == "matching.snapshot_min_offset_delta"));
    }
}
