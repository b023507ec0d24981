use super::*;
use crate::circuit_breaker::CircuitBreakerConfig;
use crate::routing_table::{Destination, RoutingRule, RoutingTable};
use async_trait::async_trait;
use mockall::mock;
use serde_json::json;
use velroute_core::memory::MemoryLocalGateway;
use velroute_core::tenant::StaticTenantConfigProvider;

mock! {
    pub Remote {}

    #[async_trait]
    impl RemoteGateway for Remote {
        async fn call(&self, tenant: &TenantConfiguration, request: &RemoteRequest) -> Result<RecordSet>;
    }
}

fn tenant(id: &str) -> TenantId {
    TenantId::from_string(id).unwrap()
}

fn tenant_config(id: &str) -> TenantConfiguration {
    TenantConfiguration {
        tenant_id: tenant(id),
        base_url: format!("https://{}.velneo.test", id),
        api_key: "secret".to_string(),
        timeout_seconds: 0,
    }
}

fn policy() -> DispatchPolicy {
    DispatchPolicy {
        retry: RetryPolicy::disabled(),
        circuit_breaker: Some(CircuitBreakerConfig {
            failure_threshold: 3,
            timeout: Duration::from_secs(60),
        }),
        fallback_enabled: true,
        default_timeout: Duration::from_secs(30),
        remote_timeout: Duration::from_secs(5),
        local_timeout: Duration::from_secs(5),
        audit: true,
        cache_ttl: None,
    }
}

fn unavailable() -> Error {
    Error::TransientRemote {
        status: Some(503),
        message: "Service Unavailable".to_string(),
    }
}

fn not_found() -> Error {
    Error::PermanentRemote {
        status: 404,
        message: "Cliente no encontrado".to_string(),
    }
}

fn rule(entity: EntityKind, operation: OperationKind, destination: Destination) -> RoutingRule {
    RoutingRule::new(entity, operation, destination)
}

fn build(
    rules: Vec<RoutingRule>,
    remote: MockRemote,
    local: Arc<MemoryLocalGateway>,
    policy: DispatchPolicy,
) -> Dispatcher {
    let tenants = StaticTenantConfigProvider::new(vec![tenant_config("acme"), tenant_config("globex")]);
    Dispatcher::new(
        RoutingTable::from_rules(rules),
        Arc::new(remote),
        local,
        Arc::new(tenants),
        policy,
    )
}

fn seeded_local() -> Arc<MemoryLocalGateway> {
    let local = Arc::new(MemoryLocalGateway::new());
    local.seed(
        &tenant("acme"),
        EntityKind::Client,
        vec![
            json!({"id": "1", "nombre": "Ana (local)"}),
            json!({"id": "2", "nombre": "Luis (local)"}),
        ],
    );
    local
}

fn get_client(id: &str) -> DispatchRequest {
    DispatchRequest::new(tenant("acme"), EntityKind::Client, OperationKind::Get).with_id(id)
}

#[tokio::test]
async fn test_local_destination_never_calls_remote() {
    let mut remote = MockRemote::new();
    remote.expect_call().never();

    let local = seeded_local();
    let dispatcher = build(
        vec![rule(EntityKind::Client, OperationKind::Get, Destination::Local)],
        remote,
        local.clone(),
        policy(),
    );

    let outcome = dispatcher.execute(get_client("1")).await.unwrap();
    assert_eq!(outcome.source, DataSource::Local);
    assert_eq!(outcome.records.records[0]["nombre"], "Ana (local)");
    assert!(!outcome.fallback);
    assert_eq!(local.call_count(), 1);
}

#[tokio::test]
async fn test_unconfigured_operation_defaults_to_local() {
    let mut remote = MockRemote::new();
    remote.expect_call().never();

    let dispatcher = build(vec![], remote, seeded_local(), policy());
    let outcome = dispatcher
        .execute(DispatchRequest::new(
            tenant("acme"),
            EntityKind::Client,
            OperationKind::Get,
        ))
        .await
        .unwrap();

    assert_eq!(outcome.source, DataSource::Local);
    assert_eq!(outcome.records.len(), 2);
}

#[tokio::test]
async fn test_remote_destination_returns_remote_records() {
    let mut remote = MockRemote::new();
    remote
        .expect_call()
        .withf(|tenant, request| {
            tenant.tenant_id.as_str() == "acme"
                && request.entity == EntityKind::Client
                && request.payload.id.as_deref() == Some("1")
        })
        .times(1)
        .returning(|_, _| Ok(RecordSet::new(vec![json!({"id": "1", "nombre": "Ana"})])));

    let local = seeded_local();
    let dispatcher = build(
        vec![rule(EntityKind::Client, OperationKind::Get, Destination::Remote)],
        remote,
        local.clone(),
        policy(),
    );

    let outcome = dispatcher.execute(get_client("1")).await.unwrap();
    assert_eq!(outcome.source, DataSource::Remote);
    assert_eq!(outcome.records.records[0]["nombre"], "Ana");
    assert!(!outcome.degraded);
    assert_eq!(local.call_count(), 0);
}

#[tokio::test]
async fn test_remote_read_falls_back_when_rule_requires_it() {
    let mut remote = MockRemote::new();
    remote.expect_call().times(1).returning(|_, _| Err(unavailable()));

    let dispatcher = build(
        vec![rule(EntityKind::Client, OperationKind::Get, Destination::Remote).with_fallback(true)],
        remote,
        seeded_local(),
        policy(),
    );

    let outcome = dispatcher.execute(get_client("1")).await.unwrap();
    assert_eq!(outcome.source, DataSource::Local);
    assert!(outcome.fallback);
    assert!(outcome.degraded);
    assert!(outcome.remote_error.unwrap().contains("503"));
    assert_eq!(outcome.records.records[0]["nombre"], "Ana (local)");
}

#[tokio::test]
async fn test_remote_failure_without_fallback_surfaces_error() {
    let mut remote = MockRemote::new();
    remote.expect_call().times(1).returning(|_, _| Err(unavailable()));

    let local = seeded_local();
    let dispatcher = build(
        vec![rule(EntityKind::Client, OperationKind::Get, Destination::Remote)],
        remote,
        local.clone(),
        policy(),
    );

    let err = dispatcher.execute(get_client("1")).await.unwrap_err();
    assert!(matches!(err, Error::TransientRemote { status: Some(503), .. }));
    assert_eq!(local.call_count(), 0);
}

#[tokio::test]
async fn test_fallback_disabled_globally() {
    let mut remote = MockRemote::new();
    remote.expect_call().times(1).returning(|_, _| Err(unavailable()));

    let local = seeded_local();
    let dispatcher = build(
        vec![rule(EntityKind::Client, OperationKind::Get, Destination::Remote).with_fallback(true)],
        remote,
        local.clone(),
        DispatchPolicy {
            fallback_enabled: false,
            ..policy()
        },
    );

    let err = dispatcher.execute(get_client("1")).await.unwrap_err();
    assert!(matches!(err, Error::TransientRemote { .. }));
    assert_eq!(local.call_count(), 0);
}

#[tokio::test]
async fn test_client_error_under_both_is_not_masked() {
    let mut remote = MockRemote::new();
    remote.expect_call().times(1).returning(|_, _| Err(not_found()));

    let local = seeded_local();
    let dispatcher = build(
        vec![rule(EntityKind::Client, OperationKind::Get, Destination::Both).with_fallback(true)],
        remote,
        local.clone(),
        policy(),
    );

    let err = dispatcher.execute(get_client("1")).await.unwrap_err();
    assert!(matches!(err, Error::PermanentRemote { status: 404, .. }));
    assert_eq!(local.call_count(), 0);
}

#[tokio::test]
async fn test_both_without_fallback_reports_exhausted() {
    let mut remote = MockRemote::new();
    remote.expect_call().times(1).returning(|_, _| Err(unavailable()));

    let local = seeded_local();
    let dispatcher = build(
        vec![rule(EntityKind::Client, OperationKind::Get, Destination::Both)],
        remote,
        local.clone(),
        policy(),
    );

    let err = dispatcher.execute(get_client("1")).await.unwrap_err();
    match err {
        Error::FallbackExhausted { remote, local: None } => {
            assert!(matches!(*remote, Error::TransientRemote { .. }));
        }
        other => panic!("unexpected error: {:?}", other),
    }
    assert_eq!(local.call_count(), 0);
}

#[tokio::test]
async fn test_both_fallback_with_local_failure_reports_both_errors() {
    let mut remote = MockRemote::new();
    remote.expect_call().times(1).returning(|_, _| Err(unavailable()));

    let local = seeded_local();
    local.set_unavailable(true);
    let dispatcher = build(
        vec![rule(EntityKind::Client, OperationKind::Get, Destination::Both).with_fallback(true)],
        remote,
        local,
        policy(),
    );

    let err = dispatcher.execute(get_client("1")).await.unwrap_err();
    match err {
        Error::FallbackExhausted {
            local: Some(local), ..
        } => assert!(matches!(*local, Error::Local(_))),
        other => panic!("unexpected error: {:?}", other),
    }
}

#[tokio::test]
async fn test_both_create_writes_through_remote_echo() {
    let mut remote = MockRemote::new();
    remote
        .expect_call()
        .withf(|_, request| {
            request.operation == OperationKind::Create
                && request.payload.body.as_ref().map(|b| b["nombre"] == "Eva") == Some(true)
        })
        .times(1)
        .returning(|_, _| Ok(RecordSet::new(vec![json!({"id": "77", "nombre": "Eva"})])));

    let local = Arc::new(MemoryLocalGateway::new());
    let dispatcher = build(
        vec![rule(EntityKind::Client, OperationKind::Create, Destination::Both)],
        remote,
        local.clone(),
        policy(),
    );

    let outcome = dispatcher
        .execute(
            DispatchRequest::new(tenant("acme"), EntityKind::Client, OperationKind::Create)
                .with_body(json!({"nombre": "Eva"})),
        )
        .await
        .unwrap();

    assert_eq!(outcome.source, DataSource::Remote);
    assert!(!outcome.degraded);
    assert!(outcome.reconciliation.is_none());
    let mirrored = local.get(&tenant("acme"), EntityKind::Client, "77").unwrap();
    assert_eq!(mirrored["nombre"], "Eva");
}

#[tokio::test]
async fn test_write_through_disabled_skips_local() {
    let mut remote = MockRemote::new();
    remote
        .expect_call()
        .times(1)
        .returning(|_, _| Ok(RecordSet::new(vec![json!({"id": "77"})])));

    let local = Arc::new(MemoryLocalGateway::new());
    let dispatcher = build(
        vec![
            rule(EntityKind::Client, OperationKind::Create, Destination::Both)
                .with_write_through(false),
        ],
        remote,
        local.clone(),
        policy(),
    );

    dispatcher
        .execute(
            DispatchRequest::new(tenant("acme"), EntityKind::Client, OperationKind::Create)
                .with_body(json!({"nombre": "Eva"})),
        )
        .await
        .unwrap();

    assert_eq!(local.call_count(), 0);
}

#[tokio::test]
async fn test_write_through_failure_is_recorded_for_local_side() {
    let mut remote = MockRemote::new();
    remote
        .expect_call()
        .times(1)
        .returning(|_, _| Ok(RecordSet::new(vec![json!({"id": "5", "nombre": "Nuevo"})])));

    let local = seeded_local();
    local.set_unavailable(true);
    let queue = Arc::new(ReconciliationQueue::new());
    let dispatcher = build(
        vec![rule(EntityKind::Client, OperationKind::Update, Destination::Both)],
        remote,
        local,
        policy(),
    )
    .with_reconciliation_sink(queue.clone());

    let outcome = dispatcher
        .execute(
            DispatchRequest::new(tenant("acme"), EntityKind::Client, OperationKind::Update)
                .with_id("5")
                .with_body(json!({"nombre": "Nuevo"})),
        )
        .await
        .unwrap();

    assert_eq!(outcome.source, DataSource::Remote);
    assert!(outcome.degraded);
    assert!(!outcome.fallback);

    let pending = queue.pending();
    assert_eq!(pending.len(), 1);
    assert_eq!(Some(pending[0].id), outcome.reconciliation);
    assert_eq!(pending[0].pending_side, PendingSide::Local);
    assert_eq!(pending[0].payload.id.as_deref(), Some("5"));
}

#[tokio::test]
async fn test_remote_write_failure_applies_locally_and_records_remote_side() {
    let mut remote = MockRemote::new();
    remote.expect_call().times(1).returning(|_, _| Err(unavailable()));

    let local = seeded_local();
    let queue = Arc::new(ReconciliationQueue::new());
    let dispatcher = build(
        vec![rule(EntityKind::Client, OperationKind::Update, Destination::Both).with_fallback(true)],
        remote,
        local.clone(),
        policy(),
    )
    .with_reconciliation_sink(queue.clone());

    let outcome = dispatcher
        .execute(
            DispatchRequest::new(tenant("acme"), EntityKind::Client, OperationKind::Update)
                .with_id("1")
                .with_body(json!({"nombre": "Ana María"})),
        )
        .await
        .unwrap();

    assert_eq!(outcome.source, DataSource::Local);
    assert!(outcome.fallback);
    assert!(outcome.degraded);

    let stored = local.get(&tenant("acme"), EntityKind::Client, "1").unwrap();
    assert_eq!(stored["nombre"], "Ana María");

    let pending = queue.drain();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].pending_side, PendingSide::Remote);
    assert_eq!(Some(pending[0].id), outcome.reconciliation);
}

#[tokio::test]
async fn test_remote_write_without_fallback_does_not_touch_local() {
    let mut remote = MockRemote::new();
    remote.expect_call().times(1).returning(|_, _| Err(unavailable()));

    let local = seeded_local();
    let dispatcher = build(
        vec![rule(EntityKind::Client, OperationKind::Delete, Destination::Remote).with_fallback(true)],
        remote,
        local.clone(),
        policy(),
    );

    let err = dispatcher
        .execute(
            DispatchRequest::new(tenant("acme"), EntityKind::Client, OperationKind::Delete)
                .with_id("1"),
        )
        .await
        .unwrap_err();

    assert!(matches!(err, Error::TransientRemote { .. }));
    assert_eq!(local.len(&tenant("acme"), EntityKind::Client), 2);
}

#[tokio::test]
async fn test_circuit_opens_after_threshold() {
    let mut remote = MockRemote::new();
    remote.expect_call().times(3).returning(|_, _| Err(unavailable()));

    let dispatcher = build(
        vec![rule(EntityKind::Client, OperationKind::Get, Destination::Remote)],
        remote,
        seeded_local(),
        policy(),
    );

    for _ in 0..3 {
        let err = dispatcher.execute(get_client("1")).await.unwrap_err();
        assert!(matches!(err, Error::TransientRemote { .. }));
    }
    assert_eq!(
        dispatcher.circuit_state(&tenant("acme"), EntityKind::Client),
        Some(CircuitState::Open)
    );

    let err = dispatcher.execute(get_client("1")).await.unwrap_err();
    match err {
        Error::CircuitOpen { target } => assert_eq!(target, "acme/v1/clientes"),
        other => panic!("unexpected error: {:?}", other),
    }
}

#[tokio::test]
async fn test_open_circuit_still_serves_fallback() {
    let mut remote = MockRemote::new();
    remote.expect_call().times(3).returning(|_, _| Err(unavailable()));

    let dispatcher = build(
        vec![rule(EntityKind::Client, OperationKind::Get, Destination::Both).with_fallback(true)],
        remote,
        seeded_local(),
        policy(),
    );

    for _ in 0..5 {
        let outcome = dispatcher.execute(get_client("2")).await.unwrap();
        assert!(outcome.fallback);
        assert_eq!(outcome.records.records[0]["nombre"], "Luis (local)");
    }

    let outcome = dispatcher.execute(get_client("2")).await.unwrap();
    assert!(outcome.remote_error.unwrap().contains("Circuit breaker open"));
}

#[tokio::test]
async fn test_circuit_breakers_are_per_tenant() {
    let mut remote = MockRemote::new();
    remote.expect_call().times(4).returning(|_, _| Err(unavailable()));

    let dispatcher = build(
        vec![rule(EntityKind::Client, OperationKind::Get, Destination::Remote)],
        remote,
        seeded_local(),
        policy(),
    );

    for _ in 0..3 {
        let _ = dispatcher.execute(get_client("1")).await;
    }

    let err = dispatcher
        .execute(
            DispatchRequest::new(tenant("globex"), EntityKind::Client, OperationKind::Get)
                .with_id("1"),
        )
        .await
        .unwrap_err();

    assert!(matches!(err, Error::TransientRemote { .. }));
    assert_eq!(
        dispatcher.circuit_state(&tenant("acme"), EntityKind::Client),
        Some(CircuitState::Open)
    );
    assert_eq!(
        dispatcher.circuit_state(&tenant("globex"), EntityKind::Client),
        Some(CircuitState::Closed)
    );
}

#[tokio::test]
async fn test_client_errors_do_not_trip_circuit() {
    let mut remote = MockRemote::new();
    remote.expect_call().times(5).returning(|_, _| Err(not_found()));

    let dispatcher = build(
        vec![rule(EntityKind::Client, OperationKind::Get, Destination::Remote)],
        remote,
        seeded_local(),
        policy(),
    );

    for _ in 0..5 {
        let err = dispatcher.execute(get_client("404")).await.unwrap_err();
        assert!(matches!(err, Error::PermanentRemote { .. }));
    }
    assert_eq!(
        dispatcher.circuit_state(&tenant("acme"), EntityKind::Client),
        Some(CircuitState::Closed)
    );
}

#[tokio::test]
async fn test_disabled_circuit_breaker_keeps_calling_remote() {
    let mut remote = MockRemote::new();
    remote.expect_call().times(6).returning(|_, _| Err(unavailable()));

    let dispatcher = build(
        vec![rule(EntityKind::Client, OperationKind::Get, Destination::Remote)],
        remote,
        seeded_local(),
        DispatchPolicy {
            circuit_breaker: None,
            ..policy()
        },
    );

    for _ in 0..6 {
        let err = dispatcher.execute(get_client("1")).await.unwrap_err();
        assert!(matches!(err, Error::TransientRemote { .. }));
    }
    assert_eq!(dispatcher.circuit_state(&tenant("acme"), EntityKind::Client), None);
}

#[tokio::test]
async fn test_unknown_tenant_is_rejected_before_remote_call() {
    let mut remote = MockRemote::new();
    remote.expect_call().never();

    let dispatcher = build(
        vec![rule(EntityKind::Client, OperationKind::Get, Destination::Remote)],
        remote,
        seeded_local(),
        policy(),
    );

    let err = dispatcher
        .execute(
            DispatchRequest::new(tenant("initech"), EntityKind::Client, OperationKind::Get)
                .with_id("1"),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, Error::TenantNotFound(ref t) if t == "initech"));
}

#[tokio::test]
async fn test_cancelled_request_does_nothing() {
    let mut remote = MockRemote::new();
    remote.expect_call().never();

    let local = seeded_local();
    let dispatcher = build(
        vec![rule(EntityKind::Client, OperationKind::Get, Destination::Both).with_fallback(true)],
        remote,
        local.clone(),
        policy(),
    );

    let token = CancellationToken::new();
    token.cancel();
    let err = dispatcher
        .execute(get_client("1").with_cancellation(token))
        .await
        .unwrap_err();

    assert!(matches!(err, Error::Cancelled));
    assert_eq!(local.call_count(), 0);
}

#[tokio::test]
async fn test_cache_serves_reads_and_writes_invalidate() {
    let mut remote = MockRemote::new();
    remote
        .expect_call()
        .withf(|_, request| request.operation == OperationKind::Get)
        .times(2)
        .returning(|_, _| Ok(RecordSet::new(vec![json!({"id": "1", "nombre": "Ana"})])));
    remote
        .expect_call()
        .withf(|_, request| request.operation == OperationKind::Update)
        .times(1)
        .returning(|_, _| Ok(RecordSet::new(vec![json!({"id": "1", "nombre": "Ana B."})])));

    let dispatcher = build(
        vec![
            rule(EntityKind::Client, OperationKind::Get, Destination::Remote),
            rule(EntityKind::Client, OperationKind::Update, Destination::Remote),
        ],
        remote,
        seeded_local(),
        DispatchPolicy {
            cache_ttl: Some(Duration::from_secs(60)),
            ..policy()
        },
    );

    let first = dispatcher.execute(get_client("1")).await.unwrap();
    let second = dispatcher.execute(get_client("1")).await.unwrap();
    assert_eq!(first.source, DataSource::Remote);
    assert_eq!(second.source, DataSource::Cache);
    assert_eq!(first.records, second.records);

    dispatcher
        .execute(
            DispatchRequest::new(tenant("acme"), EntityKind::Client, OperationKind::Update)
                .with_id("1")
                .with_body(json!({"nombre": "Ana B."})),
        )
        .await
        .unwrap();

    let third = dispatcher.execute(get_client("1")).await.unwrap();
    assert_eq!(third.source, DataSource::Remote);
}

#[tokio::test]
async fn test_metrics_are_recorded() {
    let mut remote = MockRemote::new();
    remote.expect_call().times(1).returning(|_, _| Err(unavailable()));

    let metrics = Arc::new(Metrics::new().unwrap());
    let dispatcher = build(
        vec![rule(EntityKind::Client, OperationKind::Get, Destination::Both).with_fallback(true)],
        remote,
        seeded_local(),
        policy(),
    )
    .with_metrics(metrics.clone());

    dispatcher.execute(get_client("1")).await.unwrap();

    let gathered = metrics.registry().gather();
    let dispatches = gathered
        .iter()
        .find(|m| m.name() == "velroute_dispatch_total")
        .expect("dispatch_total metric not found");
    assert_eq!(dispatches.metric[0].counter.as_ref().unwrap().value.unwrap(), 1.0);

    let fallbacks = gathered
        .iter()
        .find(|m| m.name() == "velroute_fallback_triggered_total")
        .expect("fallback_triggered metric not found");
    assert_eq!(fallbacks.metric[0].counter.as_ref().unwrap().value.unwrap(), 1.0);
}

#[test]
fn test_policy_from_settings() {
    let settings = HybridSettings {
        enable_circuit_breaker: false,
        enable_local_caching: true,
        cache_expiration_minutes: 2,
        ..HybridSettings::default()
    };
    let policy = DispatchPolicy::from(&settings);

    assert!(policy.circuit_breaker.is_none());
    assert_eq!(policy.cache_ttl, Some(Duration::from_secs(120)));
    assert_eq!(policy.remote_timeout, settings.velneo_timeout());
}
