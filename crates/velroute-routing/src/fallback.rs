//! Local fallback and write reconciliation
//!
//! When the remote side fails, reads may be served from local storage as
//! possibly-stale data. Writes that landed on only one side are never
//! dropped: the losing side is recorded as a `PendingReconciliation` for an
//! operator or a background job to replay.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use uuid::Uuid;
use velroute_core::{EntityKind, Error, OperationKind, OperationPayload, Result, TenantId};

use crate::routing_table::RoutingRule;

/// The side that still has to apply a write
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PendingSide {
    Local,
    Remote,
}

/// A write applied on one side only
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingReconciliation {
    pub id: Uuid,
    pub tenant: TenantId,
    pub entity: EntityKind,
    pub operation: OperationKind,
    pub pending_side: PendingSide,
    pub payload: OperationPayload,
    /// Error text of the failed side
    pub reason: String,
    pub recorded_at: DateTime<Utc>,
}

impl PendingReconciliation {
    pub fn new(
        tenant: TenantId,
        entity: EntityKind,
        operation: OperationKind,
        pending_side: PendingSide,
        payload: OperationPayload,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            tenant,
            entity,
            operation,
            pending_side,
            payload,
            reason: reason.into(),
            recorded_at: Utc::now(),
        }
    }
}

/// Destination for reconciliation markers
#[async_trait]
pub trait ReconciliationSink: Send + Sync {
    async fn record(&self, entry: PendingReconciliation) -> Result<()>;

    /// Entries not yet drained, when the sink can tell
    fn pending_count(&self) -> Option<usize> {
        None
    }
}

/// In-memory FIFO of pending reconciliations
#[derive(Debug, Default)]
pub struct ReconciliationQueue {
    entries: Mutex<VecDeque<PendingReconciliation>>,
}

impl ReconciliationQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of pending entries, oldest first
    pub fn pending(&self) -> Vec<PendingReconciliation> {
        self.lock().iter().cloned().collect()
    }

    /// Remove and return every pending entry
    pub fn drain(&self) -> Vec<PendingReconciliation> {
        self.lock().drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<PendingReconciliation>> {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl ReconciliationSink for ReconciliationQueue {
    async fn record(&self, entry: PendingReconciliation) -> Result<()> {
        self.lock().push_back(entry);
        Ok(())
    }

    fn pending_count(&self) -> Option<usize> {
        Some(self.len())
    }
}

/// Decides when local fallback applies and records half-applied writes
#[derive(Clone)]
pub struct FallbackCoordinator {
    /// Global switch (`EnableVelneoFallback`)
    enabled: bool,
    sink: Arc<dyn ReconciliationSink>,
}

impl FallbackCoordinator {
    pub fn new(enabled: bool, sink: Arc<dyn ReconciliationSink>) -> Self {
        Self { enabled, sink }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Whether `err` from the remote side may be answered from local storage under `rule`
    pub fn allows(&self, rule: &RoutingRule, err: &Error) -> bool {
        self.enabled && rule.require_fallback && err.permits_fallback()
    }

    /// Record a write that still has to reach `pending_side`
    pub async fn record_pending(
        &self,
        tenant: &TenantId,
        entity: EntityKind,
        operation: OperationKind,
        payload: &OperationPayload,
        pending_side: PendingSide,
        reason: &Error,
    ) -> Result<Uuid> {
        let entry = PendingReconciliation::new(
            tenant.clone(),
            entity,
            operation,
            pending_side,
            payload.clone(),
            reason.to_string(),
        );
        let id = entry.id;

        tracing::warn!(
            tenant = %tenant,
            entity = %entity,
            operation = %operation,
            pending_side = ?pending_side,
            reconciliation_id = %id,
            reason = %reason,
            "Write applied on one side only, recorded for reconciliation"
        );

        self.sink.record(entry).await?;
        Ok(id)
    }

    pub fn pending_count(&self) -> Option<usize> {
        self.sink.pending_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routing_table::Destination;
    use serde_json::json;

    fn tenant() -> TenantId {
        TenantId::from_string("acme").unwrap()
    }

    fn timeout() -> Error {
        Error::UpstreamTimeout { secs: 30 }
    }

    #[test]
    fn test_allows_requires_rule_switch_and_error_kind() {
        let sink = Arc::new(ReconciliationQueue::new());
        let coordinator = FallbackCoordinator::new(true, sink.clone());

        let with_fallback = RoutingRule::new(EntityKind::Client, OperationKind::Get, Destination::Both)
            .with_fallback(true);
        let without = RoutingRule::new(EntityKind::Client, OperationKind::Get, Destination::Both);

        assert!(coordinator.allows(&with_fallback, &timeout()));
        assert!(!coordinator.allows(&without, &timeout()));
        assert!(!coordinator.allows(
            &with_fallback,
            &Error::PermanentRemote {
                status: 400,
                message: "bad".to_string()
            }
        ));
        assert!(!coordinator.allows(&with_fallback, &Error::Cancelled));

        let disabled = FallbackCoordinator::new(false, sink);
        assert!(!disabled.allows(&with_fallback, &timeout()));
    }

    #[tokio::test]
    async fn test_record_pending_lands_in_queue() {
        let queue = Arc::new(ReconciliationQueue::new());
        let coordinator = FallbackCoordinator::new(true, queue.clone());
        let payload = OperationPayload::new().with_body(json!({"nombre": "Ana"}));

        let id = coordinator
            .record_pending(
                &tenant(),
                EntityKind::Client,
                OperationKind::Create,
                &payload,
                PendingSide::Remote,
                &timeout(),
            )
            .await
            .unwrap();

        assert_eq!(coordinator.pending_count(), Some(1));
        let pending = queue.pending();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, id);
        assert_eq!(pending[0].pending_side, PendingSide::Remote);
        assert_eq!(pending[0].payload, payload);
        assert!(pending[0].reason.contains("timeout"));
    }

    #[tokio::test]
    async fn test_drain_empties_queue_in_order() {
        let queue = ReconciliationQueue::new();
        for side in [PendingSide::Local, PendingSide::Remote] {
            queue
                .record(PendingReconciliation::new(
                    tenant(),
                    EntityKind::Poliza,
                    OperationKind::Update,
                    side,
                    OperationPayload::by_id("P-1"),
                    "failed",
                ))
                .await
                .unwrap();
        }

        let drained = queue.drain();
        assert_eq!(drained.len(), 2);
        assert_eq!(drained[0].pending_side, PendingSide::Local);
        assert_eq!(drained[1].pending_side, PendingSide::Remote);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_pending_entry_serializes() {
        let entry = PendingReconciliation::new(
            tenant(),
            EntityKind::Broker,
            OperationKind::Delete,
            PendingSide::Local,
            OperationPayload::by_id("9"),
            "local store unavailable",
        );
        let value = serde_json::to_value(&entry).unwrap();
        assert_eq!(value["tenant"], "acme");
        assert_eq!(value["entity"], "Broker");
        assert_eq!(value["operation"], "DELETE");
        assert_eq!(value["pending_side"], "local");
    }
}
