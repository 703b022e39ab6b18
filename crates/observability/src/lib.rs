//! Observability bootstrap for the matching service
//!
//! ```ignore
//! use observability::{init_logging, LogFormat};
//!
//! init_logging("matchd", LogFormat::Json)?;
//! observability::init_metrics(9100)?;
//! ```

pub mod logging;
pub mod metrics;

pub use logging::{init_logging, LogFormat};
pub use metrics::init_metrics;
