//! matchd CLI and engine daemon
//!
//! Entry point for running the matching engines, replaying a batch of
//! orders offline, and managing the configuration file.

use anyhow::{Context, Result};
use cli::{Cli, Commands};
use config::{generate_default_config, load_config, save_config, validate_config, MasterConfig};
use matching_engine::store::{InMemoryLogStore, InMemoryOrderQueue, InMemorySnapshotStore, OrderWriter};
use matching_engine::{
    Engine, EngineMetrics, EngineRegistry, EngineSettings, InMemoryStoreFactory, Order, Product,
};
use observability::{init_logging, init_metrics, LogFormat};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Quiet period after which a simulation is considered drained
const SIMULATE_SETTLE: Duration = Duration::from_millis(500);

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse_args();

    match cli.command {
        Commands::Start {
            config,
            metrics_port,
            orders,
        } => start_command(config, metrics_port, orders).await,
        Commands::Simulate {
            config,
            orders,
            product,
        } => simulate_command(config, orders, product).await,
        Commands::Validate { config } => {
            init_logging("matchd", LogFormat::Pretty)?;
            validate_command(config).await
        }
        Commands::Init { output } => {
            init_logging("matchd", LogFormat::Pretty)?;
            init_command(output).await
        }
    }
}

/// Load the config, install logging in its format and refuse invalid configs
fn load_checked_config(path: &Path) -> Result<MasterConfig> {
    let config = load_config(path)?;
    let format = LogFormat::parse(&config.service.log_format).unwrap_or_default();
    init_logging(&config.service.name, format)?;
    debug!(?path, "Configuration loaded");

    let report = validate_config(&config);
    for warning in &report.warnings {
        warn!(field = %warning.field, message = %warning.message, "Configuration warning");
    }
    if !report.is_valid() {
        for err in &report.errors {
            error!("{}", err);
        }
        anyhow::bail!(
            "Configuration has {} error(s), run 'matchd validate' for details",
            report.errors.len()
        );
    }

    Ok(config)
}

/// Read a JSON array of orders
fn read_orders(path: &Path) -> Result<Vec<Order>> {
    let content =
        std::fs::read_to_string(path).with_context(|| format!("Failed to read orders: {:?}", path))?;
    serde_json::from_str(&content).with_context(|| format!("Failed to parse orders: {:?}", path))
}

async fn start_command<P: AsRef<Path>>(
    config_path: P,
    metrics_port: Option<u16>,
    orders_path: Option<PathBuf>,
) -> Result<()> {
    let config = load_checked_config(config_path.as_ref())?;

    if let Some(port) = metrics_port.or(config.service.metrics_port) {
        init_metrics(port)?;
        EngineMetrics::describe();
        info!(port, "Metrics exporter listening");
    }

    let products: Vec<Product> = config.products.iter().map(Product::from).collect();
    let settings = EngineSettings::from(&config.matching);
    let factory = InMemoryStoreFactory::new(&products, config.orderbook_store.clone());
    let shutdown = CancellationToken::new();

    let registry = EngineRegistry::start(&products, &settings, &factory, shutdown.clone())
        .await
        .context("Failed to start matching engines")?;
    info!(
        service = %config.service.name,
        products = ?registry.product_ids(),
        store = %config.orderbook_store.store_type,
        "Matching engines running, press Ctrl+C to stop"
    );
    warn!("Order queues are in-process only; orders arrive solely from --orders and expiry cancellations");

    if let Some(path) = orders_path {
        let orders = read_orders(&path)?;
        let mut queued = 0usize;
        for order in &orders {
            match factory.queue(&order.product_id) {
                Some(queue) => {
                    queue.submit_order(order).await?;
                    queued += 1;
                }
                None => {
                    warn!(order_id = order.id, product = %order.product_id, "Order for unconfigured product skipped")
                }
            }
        }
        info!(?path, queued, skipped = orders.len() - queued, "Startup orders enqueued");
    }

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl+C")?;
    info!("Shutdown signal received, stopping engines");

    shutdown.cancel();
    registry
        .join_all()
        .await
        .context("Matching engine stopped with an error")?;

    info!("All engines stopped");
    Ok(())
}

async fn simulate_command<P: AsRef<Path>>(
    config_path: P,
    orders_path: P,
    product_id: Option<String>,
) -> Result<()> {
    let config = load_checked_config(config_path.as_ref())?;

    let product_config = match &product_id {
        Some(id) => config
            .products
            .iter()
            .find(|p| &p.id == id)
            .with_context(|| format!("Product {} is not configured", id))?,
        None => config
            .products
            .first()
            .context("No products configured")?,
    };
    let product = Product::from(product_config);

    let orders = read_orders(orders_path.as_ref())?;
    info!(product = %product.id, orders = orders.len(), "Simulating");

    // snapshots stay in memory so a simulation never touches a shared store
    let queue = InMemoryOrderQueue::new();
    let logs = InMemoryLogStore::new();
    let engine = Engine::new(
        product.clone(),
        EngineSettings::from(&config.matching),
        Box::new(queue.reader()),
        Arc::new(queue.clone()),
        Arc::new(logs.clone()),
        Arc::new(InMemorySnapshotStore::new()),
    )
    .await?;
    let handle = engine.start(CancellationToken::new());

    for order in &orders {
        queue.submit_order(order).await?;
    }

    let mut committed = handle.subscribe_committed();
    loop {
        match tokio::time::timeout(SIMULATE_SETTLE, committed.changed()).await {
            Ok(Ok(())) => continue,
            Ok(Err(_)) | Err(_) => break,
        }
    }

    let committed_seq = handle.committed_sequence();
    handle.shutdown();
    handle.join().await.context("Simulation failed")?;

    for record in logs.records().await {
        println!("{}", serde_json::to_string(&record)?);
    }
    info!(product = %product.id, committed_seq, "Simulation finished");
    Ok(())
}

async fn validate_command<P: AsRef<Path>>(config_path: P) -> Result<()> {
    info!(path = ?config_path.as_ref(), "Validating configuration");

    let config = match load_config(&config_path) {
        Ok(c) => c,
        Err(e) => {
            error!(%e, "Failed to load configuration");
            anyhow::bail!(e);
        }
    };

    let report = validate_config(&config);

    println!("\n=== Configuration Validation Report ===\n");

    if !report.defaults_applied.is_empty() {
        println!("Defaults Applied ({}):", report.defaults_applied.len());
        for default in &report.defaults_applied {
            println!("  [info] {} = {}", default.field, default.value);
        }
        println!();
    }

    if !report.warnings.is_empty() {
        println!("Warnings ({}):", report.warnings.len());
        for warning in &report.warnings {
            println!("  [warn] [{}] {}", warning.field, warning.message);
        }
        println!();
    }

    if !report.errors.is_empty() {
        println!("Errors ({}):", report.errors.len());
        for err in &report.errors {
            println!("  [error] {}", err);
        }
        println!();
        anyhow::bail!("Configuration validation failed");
    }

    println!("[ok] Configuration is valid!");
    println!();
    println!("Service: {}", config.service.name);
    println!("Snapshot store: {}", config.orderbook_store.store_type);
    println!("Products ({}):", config.products.len());
    for product in &config.products {
        println!(
            "  {} ({}/{}, scales {}/{})",
            product.id,
            product.base_currency,
            product.quote_currency,
            product.base_scale,
            product.quote_scale
        );
    }

    Ok(())
}

async fn init_command<P: AsRef<Path>>(output_path: P) -> Result<()> {
    let output_path = output_path.as_ref();
    info!(?output_path, "Initializing new configuration file");

    let config = generate_default_config();

    if let Some(parent) = output_path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory: {:?}", parent))?;
    }

    save_config(&config, output_path)?;

    println!("[ok] Configuration file created successfully!");
    println!();
    println!("Location: {:?}", output_path);
    println!();
    let product_ids: Vec<&str> = config.products.iter().map(|p| p.id.as_str()).collect();
    println!("This configuration includes:");
    println!("  - {} products ({})", product_ids.len(), product_ids.join(", "));
    println!("  - In-memory snapshot store");
    println!();
    println!("Next steps:");
    println!("  1. Edit the products and pipeline settings");
    println!("  2. Switch orderbook_store to redis and set REDIS_HOST for durable snapshots");
    println!(
        "  3. Run 'matchd validate --config {:?}' to check configuration",
        output_path
    );
    println!(
        "  4. Run 'matchd start --config {:?}' to start the engines",
        output_path
    );

    Ok(())
}
