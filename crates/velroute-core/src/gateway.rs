//! Gateway trait definitions
//!
//! The dispatcher talks to two backends through these seams: the local
//! repository layer and the remote system of record. Records travel as
//! `serde_json::Value`; mapping them into DTOs belongs to the caller.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use crate::{EntityKind, OperationKind, Result, TenantConfiguration, TenantId};

/// Arguments of one entity operation
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OperationPayload {
    /// Record identifier for GET/UPDATE/DELETE of a single record
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Search filters, sent as query parameters
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub query: BTreeMap<String, String>,
    /// Body for CREATE/UPDATE
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<Value>,
}

impl OperationPayload {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn by_id(id: impl Into<String>) -> Self {
        Self {
            id: Some(id.into()),
            ..Self::default()
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.insert(key.into(), value.into());
        self
    }

    pub fn with_body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    /// Stable textual identity of the payload, used for cache keys
    ///
    /// Encoded as a JSON `[id, query]` pair so separators inside values stay
    /// unambiguous.
    pub fn cache_key(&self) -> String {
        serde_json::json!([self.id, self.query]).to_string()
    }
}

/// Which upstream response shape produced a record set
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PayloadShape {
    /// `{ "count": n, "total_count": n, "<collection>": [...] }`
    Wrapper,
    /// Bare JSON array
    Array,
    /// A single record object (GET by id, write echoes)
    Single,
    /// Empty body (e.g. 204 No Content)
    Empty,
}

/// Records returned by either gateway
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RecordSet {
    pub records: Vec<Value>,
    /// Upstream `total_count` (or `count`) metadata when the wrapper carried it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_count: Option<u64>,
    /// Upstream shape; `None` for local results
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shape: Option<PayloadShape>,
}

impl RecordSet {
    pub fn new(records: Vec<Value>) -> Self {
        Self {
            records,
            total_count: None,
            shape: None,
        }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// One remote operation, before tenant-specific URL construction
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteRequest {
    pub entity: EntityKind,
    pub operation: OperationKind,
    pub payload: OperationPayload,
}

/// The remote system of record
#[async_trait]
pub trait RemoteGateway: Send + Sync {
    /// Execute a single attempt. Retries, deadlines and circuit breaking are the caller's job.
    async fn call(&self, tenant: &TenantConfiguration, request: &RemoteRequest) -> Result<RecordSet>;

    /// Name of the remote resource backing an entity, used to key circuit breakers
    fn resource(&self, entity: EntityKind) -> String {
        entity.default_endpoint().to_string()
    }
}

/// The existing repository layer
#[async_trait]
pub trait LocalGateway: Send + Sync {
    async fn execute(
        &self,
        tenant: &TenantId,
        entity: EntityKind,
        operation: OperationKind,
        payload: &OperationPayload,
    ) -> Result<RecordSet>;
}
