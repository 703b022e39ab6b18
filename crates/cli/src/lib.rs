use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "matchd")]
#[command(about = "matchd - multi-product order matching engine")]
#[command(version = "0.1.0")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start one matching engine per configured product
    ///
    /// Order streams are in-process queues: no external producer can reach
    /// them. Orders enter only through --orders at startup and through
    /// expiry cancellations; use `simulate` to replay a batch offline.
    Start {
        /// Path to the configuration file
        #[arg(short, long, default_value = "matchd.yaml", env = "MATCHD_CONFIG")]
        config: PathBuf,

        /// Override the metrics port from the configuration
        #[arg(long)]
        metrics_port: Option<u16>,

        /// JSON array of orders to enqueue at startup, routed by product_id
        #[arg(short, long)]
        orders: Option<PathBuf>,
    },

    /// Run a batch of orders through a full pipeline and print the committed logs
    Simulate {
        /// Path to the configuration file
        #[arg(short, long, default_value = "matchd.yaml", env = "MATCHD_CONFIG")]
        config: PathBuf,

        /// JSON array of orders
        #[arg(short, long)]
        orders: PathBuf,

        /// Product to simulate; defaults to the first configured product
        #[arg(short, long)]
        product: Option<String>,
    },

    /// Validate configuration without starting any engine
    Validate {
        /// Path to the configuration file
        #[arg(short, long, default_value = "matchd.yaml", env = "MATCHD_CONFIG")]
        config: PathBuf,
    },

    /// Initialize a new configuration file with all defaults
    Init {
        /// Output path for the new configuration file
        #[arg(short, long, default_value = "matchd.yaml")]
        output: PathBuf,
    },
}

impl Cli {
    pub fn parse_args() -> Self {
        Self::parse()
    }
}
