use crate::*;
use anyhow::{Context, Result};
use std::fs;
use std::path::Path;
use tracing::{debug, info, instrument};

#[instrument(skip(path))]
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<MasterConfig> {
    let path = path.as_ref();
    info!("Loading configuration from: {:?}", path);

    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {:?}", path))?;

    debug!("Config file content length: {} bytes", content.len());
    parse_config(&content)
}

/// Parse a YAML document after environment substitution
pub fn parse_config(content: &str) -> Result<MasterConfig> {
    let substituted = substitution::substitute_env_vars(content)?;
    debug!("Environment variable substitution completed");

    let config: MasterConfig = serde_yaml::from_str(&substituted)
        .with_context(|| "Failed to parse YAML configuration")?;

    info!(products = config.products.len(), "Configuration loaded successfully");
    Ok(config)
}

#[instrument]
pub fn generate_default_config() -> MasterConfig {
    MasterConfig {
        service: ServiceConfig::default(),
        products: vec![
            ProductConfig {
                id: "ART-USD".to_string(),
                base_currency: "ART".to_string(),
                quote_currency: "USD".to_string(),
                base_scale: 4,
                quote_scale: 2,
            },
            ProductConfig {
                id: "ART-USDT".to_string(),
                base_currency: "ART".to_string(),
                quote_currency: "USDT".to_string(),
                base_scale: 4,
                quote_scale: 6,
            },
        ],
        matching: MatchingConfig::default(),
        orderbook_store: OrderbookStoreConfig::default(),
    }
}

#[instrument]
pub fn save_config<P: AsRef<Path> + std::fmt::Debug>(config: &MasterConfig, path: P) -> Result<()> {
    let path = path.as_ref();
    info!("Saving configuration to: {:?}", path);

    let yaml = serde_yaml::to_string(config)
        .with_context(|| "Failed to serialize configuration to YAML")?;

    fs::write(path, yaml)
        .with_context(|| format!("Failed to write config file: {:?}", path))?;

    info!("Configuration saved successfully");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_round_trips_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("matchd.yaml");

        let config = generate_default_config();
        save_config(&config, &path).unwrap();
        let loaded = load_config(&path).unwrap();

        assert_eq!(loaded.products, config.products);
        assert_eq!(loaded.matching, config.matching);
        assert!(validate_config(&loaded).is_valid());
    }

    #[test]
    fn test_missing_file_is_an_error() {
        let err = load_config("/definitely/not/here.yaml").unwrap_err();
        assert!(err.to_string().contains("Failed to read config file"));
    }

    #[test]
    fn test_parse_redis_section() {
        let yaml = r#"
products:
  - id: ART-USD
    base_currency: ART
    quote_currency: USD
    base_scale: 4
    quote_scale: 2
orderbook_store:
  type: redis
  redis:
    host: localhost
"#;
        let config = parse_config(yaml).unwrap();
        let redis = config.orderbook_store.redis.unwrap();
        assert_eq!(config.orderbook_store.store_type, "redis");
        assert_eq!(redis.port, 6379);
        assert_eq!(redis.snapshot_ttl_seconds, 604_800);
    }
}
