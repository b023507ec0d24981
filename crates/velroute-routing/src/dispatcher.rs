//! Dispatcher
//!
//! Composes the routing table, circuit breakers, retry policy, response
//! cache and fallback coordinator into a single entry point:
//!
//! - `Local`: local gateway only
//! - `Remote`: remote gateway; reads may fall back to local when the rule
//!   requires it
//! - `Both`: remote is the source of truth; successful writes are mirrored
//!   locally, and a failed remote side is recorded for reconciliation

use crate::{
    cache::{CacheKey, ResponseCache},
    circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState},
    fallback::{FallbackCoordinator, PendingSide, ReconciliationQueue, ReconciliationSink},
    retry::RetryPolicy,
    routing_table::{Destination, RoutingRule, RoutingTable},
};
use dashmap::DashMap;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;
use velroute_core::{
    EntityKind, Error, HybridSettings, LocalGateway, OperationKind, OperationPayload, RecordSet,
    RemoteGateway, RemoteRequest, Result, TenantConfigProvider, TenantConfiguration, TenantId,
};
use velroute_observability::{Metrics, logging::AUDIT_TARGET};

/// Resilience knobs in runtime form
#[derive(Debug, Clone, PartialEq)]
pub struct DispatchPolicy {
    pub retry: RetryPolicy,
    /// `None` disables circuit breaking
    pub circuit_breaker: Option<CircuitBreakerConfig>,
    /// Global fallback switch; rules still opt in with `require_fallback`
    pub fallback_enabled: bool,
    /// Overall deadline when the caller gives none
    pub default_timeout: Duration,
    /// Per-attempt remote timeout when neither rule nor tenant overrides it
    pub remote_timeout: Duration,
    pub local_timeout: Duration,
    /// Emit audit events for writes
    pub audit: bool,
    /// `None` disables the response cache
    pub cache_ttl: Option<Duration>,
}

impl From<&HybridSettings> for DispatchPolicy {
    fn from(settings: &HybridSettings) -> Self {
        Self {
            retry: RetryPolicy::from(settings),
            circuit_breaker: settings
                .enable_circuit_breaker
                .then(|| CircuitBreakerConfig::from(settings)),
            fallback_enabled: settings.enable_velneo_fallback,
            default_timeout: settings.default_timeout(),
            remote_timeout: settings.velneo_timeout(),
            local_timeout: settings.azure_timeout(),
            audit: settings.enable_local_audit,
            cache_ttl: settings
                .enable_local_caching
                .then(|| settings.cache_expiration()),
        }
    }
}

impl Default for DispatchPolicy {
    fn default() -> Self {
        Self::from(&HybridSettings::default())
    }
}

/// One entity operation on behalf of a tenant
#[derive(Debug, Clone)]
pub struct DispatchRequest {
    pub tenant: TenantId,
    pub entity: EntityKind,
    pub operation: OperationKind,
    pub payload: OperationPayload,
    /// Overall deadline for all attempts
    pub deadline: Option<Duration>,
    pub cancellation: CancellationToken,
}

impl DispatchRequest {
    pub fn new(tenant: TenantId, entity: EntityKind, operation: OperationKind) -> Self {
        Self {
            tenant,
            entity,
            operation,
            payload: OperationPayload::default(),
            deadline: None,
            cancellation: CancellationToken::new(),
        }
    }

    pub fn with_payload(mut self, payload: OperationPayload) -> Self {
        self.payload = payload;
        self
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.payload.id = Some(id.into());
        self
    }

    pub fn with_query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.payload.query.insert(key.into(), value.into());
        self
    }

    pub fn with_body(mut self, body: Value) -> Self {
        self.payload.body = Some(body);
        self
    }

    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn with_cancellation(mut self, cancellation: CancellationToken) -> Self {
        self.cancellation = cancellation;
        self
    }
}

/// Which store answered a dispatch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DataSource {
    Remote,
    Local,
    Cache,
}

impl DataSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            DataSource::Remote => "remote",
            DataSource::Local => "local",
            DataSource::Cache => "cache",
        }
    }
}

/// Result of a dispatch
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DispatchOutcome {
    pub records: RecordSet,
    pub source: DataSource,
    /// Local data served in place of a failed remote call; possibly stale
    pub fallback: bool,
    /// Served from a fallback or left a write pending reconciliation
    pub degraded: bool,
    /// Text of the remote error behind a fallback
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remote_error: Option<String>,
    /// Marker recorded for a half-applied write
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reconciliation: Option<Uuid>,
}

impl DispatchOutcome {
    fn new(records: RecordSet, source: DataSource) -> Self {
        Self {
            records,
            source,
            fallback: false,
            degraded: false,
            remote_error: None,
            reconciliation: None,
        }
    }

    fn fallback(records: RecordSet, remote_error: &Error) -> Self {
        Self {
            records,
            source: DataSource::Local,
            fallback: true,
            degraded: true,
            remote_error: Some(remote_error.to_string()),
            reconciliation: None,
        }
    }
}

type BreakerKey = (TenantId, String);

/// Hybrid dispatcher, shared behind `Arc` and called concurrently
pub struct Dispatcher {
    table: RoutingTable,
    remote: Arc<dyn RemoteGateway>,
    local: Arc<dyn LocalGateway>,
    tenants: Arc<dyn TenantConfigProvider>,
    policy: DispatchPolicy,

    /// Circuit breakers per (tenant, resource) (uses DashMap for lock-free concurrent access)
    circuit_breakers: DashMap<BreakerKey, Arc<CircuitBreaker>>,

    fallback: FallbackCoordinator,
    cache: Option<ResponseCache>,
    metrics: Option<Arc<Metrics>>,
}

impl Dispatcher {
    /// Create a dispatcher with an in-memory reconciliation queue
    pub fn new(
        table: RoutingTable,
        remote: Arc<dyn RemoteGateway>,
        local: Arc<dyn LocalGateway>,
        tenants: Arc<dyn TenantConfigProvider>,
        policy: DispatchPolicy,
    ) -> Self {
        let fallback =
            FallbackCoordinator::new(policy.fallback_enabled, Arc::new(ReconciliationQueue::new()));
        let cache = policy.cache_ttl.map(ResponseCache::new);

        Self {
            table,
            remote,
            local,
            tenants,
            policy,
            circuit_breakers: DashMap::new(),
            fallback,
            cache,
            metrics: None,
        }
    }

    pub fn with_reconciliation_sink(mut self, sink: Arc<dyn ReconciliationSink>) -> Self {
        self.fallback = FallbackCoordinator::new(self.policy.fallback_enabled, sink);
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn routing_table(&self) -> &RoutingTable {
        &self.table
    }

    pub fn policy(&self) -> &DispatchPolicy {
        &self.policy
    }

    /// Breaker state for a tenant's entity; `None` until the first remote call
    pub fn circuit_state(&self, tenant: &TenantId, entity: EntityKind) -> Option<CircuitState> {
        let key = (tenant.clone(), self.remote.resource(entity));
        self.circuit_breakers.get(&key).map(|breaker| breaker.state())
    }

    /// Route and execute one request
    pub async fn execute(&self, request: DispatchRequest) -> Result<DispatchOutcome> {
        let started = Instant::now();
        let deadline = started + request.deadline.unwrap_or(self.policy.default_timeout);
        let rule = self
            .table
            .rule(request.entity, request.operation)
            .cloned()
            .unwrap_or_else(|| {
                RoutingRule::new(request.entity, request.operation, Destination::Local)
            });

        debug!(
            tenant = %request.tenant,
            entity = %request.entity,
            operation = %request.operation,
            destination = %rule.destination,
            "Dispatching request"
        );

        let result = if request.cancellation.is_cancelled() {
            Err(Error::Cancelled)
        } else {
            match rule.destination {
                Destination::Local => self
                    .call_local(&request, &request.payload)
                    .await
                    .map(|records| DispatchOutcome::new(records, DataSource::Local)),
                Destination::Remote => self.dispatch_remote(&request, &rule, deadline).await,
                Destination::Both => self.dispatch_both(&request, &rule, deadline).await,
            }
        };

        if request.operation.is_write()
            && result.is_ok()
            && let Some(cache) = &self.cache
        {
            cache.invalidate_entity(&request.tenant, request.entity);
        }

        self.record_dispatch(&request, &result, started.elapsed());
        if self.policy.audit && request.operation.is_write() {
            audit(&request, &rule, &result);
        }

        result
    }

    async fn dispatch_remote(
        &self,
        request: &DispatchRequest,
        rule: &RoutingRule,
        deadline: Instant,
    ) -> Result<DispatchOutcome> {
        if let Some(hit) = self.cached(request) {
            return Ok(hit);
        }

        match self.call_remote(request, rule, deadline).await {
            Ok(records) => {
                self.store(request, &records);
                Ok(DispatchOutcome::new(records, DataSource::Remote))
            }
            Err(err) if request.operation.is_read() && self.fallback.allows(rule, &err) => {
                self.serve_stale(request, err).await
            }
            Err(err) => Err(err),
        }
    }

    async fn dispatch_both(
        &self,
        request: &DispatchRequest,
        rule: &RoutingRule,
        deadline: Instant,
    ) -> Result<DispatchOutcome> {
        if let Some(hit) = self.cached(request) {
            return Ok(hit);
        }

        match self.call_remote(request, rule, deadline).await {
            Ok(records) => {
                self.store(request, &records);
                let mut outcome = DispatchOutcome::new(records, DataSource::Remote);

                if request.operation.is_write() && rule.write_through {
                    let payload = write_through_payload(request, &outcome.records);
                    if let Err(local_err) = self.call_local(request, &payload).await {
                        let id = self
                            .record_pending(request, &payload, PendingSide::Local, &local_err)
                            .await?;
                        outcome.degraded = true;
                        outcome.reconciliation = Some(id);
                    }
                }

                Ok(outcome)
            }
            Err(err) if self.fallback.allows(rule, &err) => {
                if request.operation.is_read() {
                    return self.serve_stale(request, err).await;
                }

                self.record_fallback(request, &err);
                match self.call_local(request, &request.payload).await {
                    Ok(records) => {
                        let id = self
                            .record_pending(request, &request.payload, PendingSide::Remote, &err)
                            .await?;
                        let mut outcome = DispatchOutcome::fallback(records, &err);
                        outcome.reconciliation = Some(id);
                        Ok(outcome)
                    }
                    Err(Error::Cancelled) => Err(Error::Cancelled),
                    Err(local_err) => Err(Error::FallbackExhausted {
                        remote: Box::new(err),
                        local: Some(Box::new(local_err)),
                    }),
                }
            }
            Err(err) if err.permits_fallback() => Err(Error::FallbackExhausted {
                remote: Box::new(err),
                local: None,
            }),
            Err(err) => Err(err),
        }
    }

    /// Answer a read from local storage after the remote side failed
    async fn serve_stale(&self, request: &DispatchRequest, remote_err: Error) -> Result<DispatchOutcome> {
        self.record_fallback(request, &remote_err);

        match self.call_local(request, &request.payload).await {
            Ok(records) => {
                warn!(
                    tenant = %request.tenant,
                    entity = %request.entity,
                    operation = %request.operation,
                    error = %remote_err,
                    "Serving possibly stale local data"
                );
                Ok(DispatchOutcome::fallback(records, &remote_err))
            }
            Err(Error::Cancelled) => Err(Error::Cancelled),
            Err(local_err) => Err(Error::FallbackExhausted {
                remote: Box::new(remote_err),
                local: Some(Box::new(local_err)),
            }),
        }
    }

    async fn call_remote(
        &self,
        request: &DispatchRequest,
        rule: &RoutingRule,
        deadline: Instant,
    ) -> Result<RecordSet> {
        let result = self.remote_attempts(request, rule, deadline).await;

        if let Err(err) = &result {
            warn!(
                tenant = %request.tenant,
                entity = %request.entity,
                operation = %request.operation,
                error_kind = err.kind(),
                error = %err,
                "Remote call failed"
            );
            if let Some(metrics) = &self.metrics {
                metrics.record_remote_failure(request.entity.as_str(), err.kind());
            }
        }

        result
    }

    async fn remote_attempts(
        &self,
        request: &DispatchRequest,
        rule: &RoutingRule,
        deadline: Instant,
    ) -> Result<RecordSet> {
        let tenant = self.tenants.tenant_config(&request.tenant).await?;
        let per_attempt = self.attempt_timeout(rule, &tenant);
        let resource = self.remote.resource(request.entity);

        let permit = match self.circuit_breaker(&request.tenant, &resource) {
            Some(breaker) => match breaker.try_acquire() {
                Some(permit) => Some(permit),
                None => {
                    return Err(Error::CircuitOpen {
                        target: format!("{}/{}", request.tenant, resource),
                    });
                }
            },
            None => None,
        };

        let remote_request = RemoteRequest {
            entity: request.entity,
            operation: request.operation,
            payload: request.payload.clone(),
        };

        let result = self
            .policy
            .retry
            .run(
                request.operation,
                deadline,
                per_attempt,
                &request.cancellation,
                |retry, delay, err| {
                    warn!(
                        tenant = %request.tenant,
                        entity = %request.entity,
                        operation = %request.operation,
                        retry,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "Retrying remote call"
                    );
                    if let Some(metrics) = &self.metrics {
                        metrics.record_retry(request.entity.as_str(), request.operation.as_str());
                    }
                },
                || self.remote.call(&tenant, &remote_request),
            )
            .await;

        if let Some(permit) = permit {
            match &result {
                Ok(_) => permit.succeed(),
                Err(err) if err.is_availability_failure() => permit.fail(),
                // Neither proves anything about the remote; a probe goes back to Open
                Err(Error::Cancelled | Error::DeadlineExceeded { .. }) => drop(permit),
                // Reachable but unhappy (4xx, unparseable payload)
                Err(_) => permit.succeed(),
            }
        }

        result
    }

    /// Rule override, then tenant override, then the global remote timeout
    fn attempt_timeout(&self, rule: &RoutingRule, tenant: &TenantConfiguration) -> Duration {
        if rule.timeout_seconds > 0 {
            Duration::from_secs(rule.timeout_seconds)
        } else if tenant.timeout_seconds > 0 {
            Duration::from_secs(tenant.timeout_seconds)
        } else {
            self.policy.remote_timeout
        }
    }

    async fn call_local(
        &self,
        request: &DispatchRequest,
        payload: &OperationPayload,
    ) -> Result<RecordSet> {
        let limit = self.policy.local_timeout;
        let call = tokio::time::timeout(
            limit,
            self.local
                .execute(&request.tenant, request.entity, request.operation, payload),
        );

        tokio::select! {
            biased;
            _ = request.cancellation.cancelled() => Err(Error::Cancelled),
            result = call => result.unwrap_or_else(|_| {
                Err(Error::Local(format!("Local call timed out after {:?}", limit)))
            }),
        }
    }

    /// Get or create circuit breaker for a target (lock-free with DashMap)
    fn circuit_breaker(&self, tenant: &TenantId, resource: &str) -> Option<Arc<CircuitBreaker>> {
        let config = self.policy.circuit_breaker.as_ref()?;

        let breaker = self
            .circuit_breakers
            .entry((tenant.clone(), resource.to_string()))
            .or_insert_with(|| {
                let mut breaker = CircuitBreaker::new(config.clone());
                if let Some(metrics) = self.metrics.clone() {
                    let tenant = tenant.to_string();
                    let resource = resource.to_string();
                    breaker = breaker.with_transition_hook(Arc::new(move |from, to| {
                        metrics.record_circuit_breaker_transition(
                            &tenant,
                            &resource,
                            from.into(),
                            to.into(),
                        );
                    }));
                }
                Arc::new(breaker)
            })
            .clone();

        Some(breaker)
    }

    fn cached(&self, request: &DispatchRequest) -> Option<DispatchOutcome> {
        if !request.operation.is_read() {
            return None;
        }
        let cache = self.cache.as_ref()?;
        let records = cache.get(&CacheKey::new(
            &request.tenant,
            request.entity,
            request.operation,
            &request.payload,
        ))?;

        if let Some(metrics) = &self.metrics {
            metrics.record_cache_hit(request.entity.as_str());
        }
        Some(DispatchOutcome::new(records, DataSource::Cache))
    }

    fn store(&self, request: &DispatchRequest, records: &RecordSet) {
        if let Some(cache) = &self.cache
            && request.operation.is_read()
        {
            cache.insert(
                CacheKey::new(
                    &request.tenant,
                    request.entity,
                    request.operation,
                    &request.payload,
                ),
                records.clone(),
            );
        }
    }

    async fn record_pending(
        &self,
        request: &DispatchRequest,
        payload: &OperationPayload,
        side: PendingSide,
        reason: &Error,
    ) -> Result<Uuid> {
        let id = self
            .fallback
            .record_pending(
                &request.tenant,
                request.entity,
                request.operation,
                payload,
                side,
                reason,
            )
            .await?;

        if let (Some(metrics), Some(count)) = (&self.metrics, self.fallback.pending_count()) {
            metrics.set_reconciliation_pending(count);
        }
        Ok(id)
    }

    fn record_fallback(&self, request: &DispatchRequest, err: &Error) {
        if let Some(metrics) = &self.metrics {
            metrics.record_fallback(request.entity.as_str(), request.operation.as_str(), err.kind());
        }
    }

    fn record_dispatch(
        &self,
        request: &DispatchRequest,
        result: &Result<DispatchOutcome>,
        elapsed: Duration,
    ) {
        let Some(metrics) = &self.metrics else {
            return;
        };

        let (source, outcome) = match result {
            Ok(outcome) if outcome.degraded => (outcome.source.as_str(), "degraded"),
            Ok(outcome) => (outcome.source.as_str(), "success"),
            Err(err) => ("none", err.kind()),
        };
        metrics.record_dispatch(
            request.entity.as_str(),
            request.operation.as_str(),
            source,
            outcome,
            elapsed.as_secs_f64(),
        );
    }
}

/// Payload mirrored into local storage after a successful remote write.
///
/// A CREATE echo carries the remote-assigned id, so it replaces the request body.
fn write_through_payload(request: &DispatchRequest, remote: &RecordSet) -> OperationPayload {
    match (request.operation, remote.records.as_slice()) {
        (OperationKind::Create, [echo]) if echo.is_object() => {
            request.payload.clone().with_body(echo.clone())
        }
        _ => request.payload.clone(),
    }
}

fn audit(request: &DispatchRequest, rule: &RoutingRule, result: &Result<DispatchOutcome>) {
    let record_id = request.payload.id.as_deref().unwrap_or("");
    match result {
        Ok(outcome) => info!(
            target: AUDIT_TARGET,
            tenant = %request.tenant,
            entity = %request.entity,
            operation = %request.operation,
            destination = %rule.destination,
            record_id,
            source = outcome.source.as_str(),
            degraded = outcome.degraded,
            reconciliation = ?outcome.reconciliation,
            "Write dispatched"
        ),
        Err(err) => warn!(
            target: AUDIT_TARGET,
            tenant = %request.tenant,
            entity = %request.entity,
            operation = %request.operation,
            destination = %rule.destination,
            record_id,
            error = %err,
            "Write failed"
        ),
    }
}

#[cfg(test)]
mod tests;
