//! Velroute Observability
//!
//! This crate provides observability features:
//! - Structured logging setup (tracing-subscriber)
//! - Metrics collection (Prometheus)

pub mod logging;
pub mod metrics;

pub use logging::{LoggingConfig, init_logging};
pub use metrics::{CircuitBreakerState, Metrics};
