//! # Utility Modules
//!
//! Supporting utilities for logging and observability.
//!
//! ## Components
//! - **Logging**: `tracing-subscriber` setup driven by `LoggingConfig`
//! - **Metrics**: relay counters with snapshots

pub mod logging;
pub mod metrics;

pub use metrics::{MetricsSnapshot, RelayMetrics};
