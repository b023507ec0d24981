//! End-to-end test harness for Velroute
//!
//! Wires the real Velneo connector to a wiremock server, an in-memory local
//! store and a dispatcher, so tests exercise the full routing path over HTTP.

use std::sync::Arc;
use std::time::Duration;
use velroute_core::memory::MemoryLocalGateway;
use velroute_core::tenant::StaticTenantConfigProvider;
use velroute_core::{TenantConfiguration, TenantId};
use velroute_egress::{VelneoConfig, VelneoConnector};
use velroute_observability::Metrics;
use velroute_routing::{
    CircuitBreakerConfig, DispatchPolicy, Dispatcher, ReconciliationQueue, RetryPolicy,
    RoutingRule, RoutingTable,
};
use wiremock::MockServer;

pub const API_KEY: &str = "test-key";

pub fn tenant_id(id: &str) -> TenantId {
    TenantId::from_string(id).unwrap()
}

pub fn tenant_config(id: &str, base_url: String) -> TenantConfiguration {
    TenantConfiguration {
        tenant_id: tenant_id(id),
        base_url,
        api_key: API_KEY.to_string(),
        timeout_seconds: 0,
    }
}

/// Short timeouts so failure paths finish in milliseconds
pub fn fast_policy() -> DispatchPolicy {
    DispatchPolicy {
        retry: RetryPolicy::disabled(),
        circuit_breaker: Some(CircuitBreakerConfig {
            failure_threshold: 5,
            timeout: Duration::from_secs(60),
        }),
        fallback_enabled: true,
        default_timeout: Duration::from_secs(10),
        remote_timeout: Duration::from_millis(200),
        local_timeout: Duration::from_secs(1),
        audit: true,
        cache_ttl: None,
    }
}

pub struct Harness {
    pub server: MockServer,
    pub dispatcher: Dispatcher,
    pub local: Arc<MemoryLocalGateway>,
    pub reconciliation: Arc<ReconciliationQueue>,
    pub metrics: Arc<Metrics>,
}

impl Harness {
    /// Tenant `acme` pointing at a fresh mock server
    pub async fn start(rules: Vec<RoutingRule>, policy: DispatchPolicy) -> Self {
        let server = MockServer::start().await;
        let tenants = vec![tenant_config("acme", server.uri())];
        Self::with_tenants(server, tenants, rules, policy)
    }

    pub fn with_tenants(
        server: MockServer,
        tenants: Vec<TenantConfiguration>,
        rules: Vec<RoutingRule>,
        policy: DispatchPolicy,
    ) -> Self {
        let local = Arc::new(MemoryLocalGateway::new());
        let reconciliation = Arc::new(ReconciliationQueue::new());
        let metrics = Arc::new(Metrics::new().unwrap());

        let dispatcher = Dispatcher::new(
            RoutingTable::from_rules(rules),
            Arc::new(VelneoConnector::new(VelneoConfig::new()).unwrap()),
            local.clone(),
            Arc::new(StaticTenantConfigProvider::new(tenants)),
            policy,
        )
        .with_reconciliation_sink(reconciliation.clone())
        .with_metrics(metrics.clone());

        Self {
            server,
            dispatcher,
            local,
            reconciliation,
            metrics,
        }
    }

    /// Requests the mock Velneo server has received so far
    pub async fn remote_requests(&self) -> usize {
        self.server
            .received_requests()
            .await
            .map(|requests| requests.len())
            .unwrap_or(0)
    }

    /// Current value of a labelled counter, summed over label sets
    pub fn counter(&self, name: &str) -> f64 {
        self.metrics
            .registry()
            .gather()
            .iter()
            .filter(|family| family.name() == name)
            .flat_map(|family| family.metric.iter())
            .filter_map(|metric| metric.counter.as_ref().and_then(|c| c.value))
            .sum()
    }
}
