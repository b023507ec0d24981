//! Metrics collection with Prometheus
//!
//! This module provides Prometheus metrics for Velroute:
//! - Dispatch counts by entity, operation, source and outcome
//! - Dispatch latency histograms
//! - Remote failures by error kind, and retry counts
//! - Circuit breaker state and transitions per target
//! - Fallbacks, pending reconciliations and cache hits

use prometheus::{CounterVec, Gauge, GaugeVec, HistogramOpts, HistogramVec, Opts, Registry};
use std::sync::Arc;

/// Metrics collector for Velroute
#[derive(Clone)]
pub struct Metrics {
    /// Prometheus registry
    registry: Arc<Registry>,

    /// Dispatches by entity, operation, source (remote/local/cache) and outcome
    pub dispatch_total: CounterVec,
    /// End-to-end dispatch duration
    pub dispatch_duration_seconds: HistogramVec,

    /// Remote failures by error kind
    pub remote_failures_total: CounterVec,
    /// Retries performed (not counting first attempts)
    pub retries_total: CounterVec,

    /// Circuit breaker state (0=closed, 1=open, 2=half-open)
    pub circuit_breaker_state: GaugeVec,
    /// Circuit breaker state changes
    pub circuit_breaker_transitions: CounterVec,

    /// Local fallbacks served in place of a failed remote call
    pub fallback_triggered: CounterVec,
    /// Writes waiting for reconciliation
    pub reconciliation_pending: Gauge,

    /// Reads answered from the response cache
    pub cache_hits_total: CounterVec,
}

impl Metrics {
    /// Create a new metrics collector
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let dispatch_total = CounterVec::new(
            Opts::new("velroute_dispatch_total", "Total number of dispatches"),
            &["entity", "operation", "source", "outcome"],
        )?;

        let dispatch_duration_seconds = HistogramVec::new(
            HistogramOpts::new(
                "velroute_dispatch_duration_seconds",
                "Dispatch duration in seconds",
            )
            .buckets(vec![
                0.005, 0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0,
            ]),
            &["entity", "operation"],
        )?;

        let remote_failures_total = CounterVec::new(
            Opts::new(
                "velroute_remote_failures_total",
                "Total number of failed remote calls",
            ),
            &["entity", "error_kind"],
        )?;

        let retries_total = CounterVec::new(
            Opts::new("velroute_retries_total", "Total number of remote retries"),
            &["entity", "operation"],
        )?;

        let circuit_breaker_state = GaugeVec::new(
            Opts::new(
                "velroute_circuit_breaker_state",
                "Circuit breaker state (0=closed, 1=open, 2=half-open)",
            ),
            &["tenant", "resource"],
        )?;

        let circuit_breaker_transitions = CounterVec::new(
            Opts::new(
                "velroute_circuit_breaker_transitions_total",
                "Total number of circuit breaker state transitions",
            ),
            &["tenant", "resource", "from_state", "to_state"],
        )?;

        let fallback_triggered = CounterVec::new(
            Opts::new(
                "velroute_fallback_triggered_total",
                "Total number of local fallbacks",
            ),
            &["entity", "operation", "reason"],
        )?;

        let reconciliation_pending = Gauge::with_opts(Opts::new(
            "velroute_reconciliation_pending",
            "Writes waiting for reconciliation",
        ))?;

        let cache_hits_total = CounterVec::new(
            Opts::new("velroute_cache_hits_total", "Total number of cache hits"),
            &["entity"],
        )?;

        registry.register(Box::new(dispatch_total.clone()))?;
        registry.register(Box::new(dispatch_duration_seconds.clone()))?;
        registry.register(Box::new(remote_failures_total.clone()))?;
        registry.register(Box::new(retries_total.clone()))?;
        registry.register(Box::new(circuit_breaker_state.clone()))?;
        registry.register(Box::new(circuit_breaker_transitions.clone()))?;
        registry.register(Box::new(fallback_triggered.clone()))?;
        registry.register(Box::new(reconciliation_pending.clone()))?;
        registry.register(Box::new(cache_hits_total.clone()))?;

        Ok(Self {
            registry: Arc::new(registry),
            dispatch_total,
            dispatch_duration_seconds,
            remote_failures_total,
            retries_total,
            circuit_breaker_state,
            circuit_breaker_transitions,
            fallback_triggered,
            reconciliation_pending,
            cache_hits_total,
        })
    }

    /// Get the Prometheus registry for exporting metrics
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Record a completed dispatch
    pub fn record_dispatch(
        &self,
        entity: &str,
        operation: &str,
        source: &str,
        outcome: &str,
        duration_secs: f64,
    ) {
        self.dispatch_total
            .with_label_values(&[entity, operation, source, outcome])
            .inc();
        self.dispatch_duration_seconds
            .with_label_values(&[entity, operation])
            .observe(duration_secs);
    }

    /// Record a failed remote call
    pub fn record_remote_failure(&self, entity: &str, error_kind: &str) {
        self.remote_failures_total
            .with_label_values(&[entity, error_kind])
            .inc();
    }

    /// Record one retry
    pub fn record_retry(&self, entity: &str, operation: &str) {
        self.retries_total
            .with_label_values(&[entity, operation])
            .inc();
    }

    /// Update circuit breaker state
    pub fn update_circuit_breaker_state(
        &self,
        tenant: &str,
        resource: &str,
        state: CircuitBreakerState,
    ) {
        self.circuit_breaker_state
            .with_label_values(&[tenant, resource])
            .set(state as i64 as f64);
    }

    /// Record circuit breaker transition
    pub fn record_circuit_breaker_transition(
        &self,
        tenant: &str,
        resource: &str,
        from: CircuitBreakerState,
        to: CircuitBreakerState,
    ) {
        self.circuit_breaker_transitions
            .with_label_values(&[tenant, resource, from.as_str(), to.as_str()])
            .inc();
        self.update_circuit_breaker_state(tenant, resource, to);
    }

    /// Record fallback trigger
    pub fn record_fallback(&self, entity: &str, operation: &str, reason: &str) {
        self.fallback_triggered
            .with_label_values(&[entity, operation, reason])
            .inc();
    }

    /// Set the number of writes waiting for reconciliation
    pub fn set_reconciliation_pending(&self, count: usize) {
        self.reconciliation_pending.set(count as f64);
    }

    /// Record a cache hit
    pub fn record_cache_hit(&self, entity: &str) {
        self.cache_hits_total.with_label_values(&[entity]).inc();
    }
}

/// Circuit breaker state for metrics
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum CircuitBreakerState {
    Closed = 0,
    Open = 1,
    HalfOpen = 2,
}

impl CircuitBreakerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Closed => "closed",
            Self::Open => "open",
            Self::HalfOpen => "half_open",
        }
    }
}
