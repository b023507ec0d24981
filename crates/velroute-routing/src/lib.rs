//! Velroute Routing Engine
//!
//! This crate provides the hybrid routing logic for Velroute:
//! - Validated routing table keyed by entity and operation
//! - Circuit breakers per tenant and remote resource
//! - Bounded retry policy with exponential backoff
//! - Response cache for remote reads
//! - Local fallback and reconciliation of half-applied writes
//! - Dispatcher composing all of the above

pub mod cache;
pub mod circuit_breaker;
pub mod dispatcher;
pub mod fallback;
pub mod retry;
pub mod routing_table;

// Re-export commonly used types
pub use cache::ResponseCache;
pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitPermit, CircuitState};
pub use dispatcher::{DataSource, DispatchOutcome, DispatchPolicy, DispatchRequest, Dispatcher};
pub use fallback::{
    FallbackCoordinator, PendingReconciliation, PendingSide, ReconciliationQueue,
    ReconciliationSink,
};
pub use retry::RetryPolicy;
pub use routing_table::{Destination, RoutingRule, RoutingTable, RuleConfig};
