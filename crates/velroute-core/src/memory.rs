//! In-memory local gateway
//!
//! Stands in for the repository layer in tests and in the CLI. Records are
//! keyed by their `id` field (string or number) per tenant and entity.

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use crate::{EntityKind, Error, LocalGateway, OperationKind, OperationPayload, RecordSet, Result, TenantId};

type Table = BTreeMap<String, Value>;

#[derive(Debug, Default)]
pub struct MemoryLocalGateway {
    tables: DashMap<(TenantId, EntityKind), Table>,
    unavailable: AtomicBool,
    calls: AtomicUsize,
}

impl MemoryLocalGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert records, replacing any with the same id
    pub fn seed(&self, tenant: &TenantId, entity: EntityKind, records: impl IntoIterator<Item = Value>) {
        let mut table = self.tables.entry((tenant.clone(), entity)).or_default();
        for record in records {
            if let Some(id) = record_id(&record) {
                table.insert(id, record);
            }
        }
    }

    /// Make every subsequent call fail with `Error::Local`
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Number of `execute` calls received
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn get(&self, tenant: &TenantId, entity: EntityKind, id: &str) -> Option<Value> {
        self.tables
            .get(&(tenant.clone(), entity))
            .and_then(|table| table.get(id).cloned())
    }

    pub fn len(&self, tenant: &TenantId, entity: EntityKind) -> usize {
        self.tables
            .get(&(tenant.clone(), entity))
            .map(|table| table.len())
            .unwrap_or(0)
    }
}

fn record_id(record: &Value) -> Option<String> {
    match record.get("id")? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn field_matches(record: &Value, key: &str, expected: &str) -> bool {
    match record.get(key) {
        Some(Value::String(s)) => s.eq_ignore_ascii_case(expected),
        Some(Value::Null) | None => false,
        Some(other) => other.to_string() == expected,
    }
}

fn require_id(payload: &OperationPayload, operation: OperationKind) -> Result<&str> {
    payload
        .id
        .as_deref()
        .ok_or_else(|| Error::InvalidRequest(format!("{} requires a record id", operation)))
}

#[async_trait]
impl LocalGateway for MemoryLocalGateway {
    async fn execute(
        &self,
        tenant: &TenantId,
        entity: EntityKind,
        operation: OperationKind,
        payload: &OperationPayload,
    ) -> Result<RecordSet> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        if self.unavailable.load(Ordering::SeqCst) {
            return Err(Error::Local("local store unavailable".to_string()));
        }

        let key = (tenant.clone(), entity);
        match operation {
            OperationKind::Get => {
                let table = self.tables.get(&key);
                let records = match (&payload.id, table) {
                    (Some(id), Some(table)) => table.get(id).cloned().into_iter().collect(),
                    (None, Some(table)) => table.values().cloned().collect(),
                    (_, None) => Vec::new(),
                };
                Ok(RecordSet::new(records))
            }
            OperationKind::Search => {
                let records = self
                    .tables
                    .get(&key)
                    .map(|table| {
                        table
                            .values()
                            .filter(|record| {
                                payload
                                    .query
                                    .iter()
                                    .all(|(k, v)| field_matches(record, k, v))
                            })
                            .cloned()
                            .collect()
                    })
                    .unwrap_or_default();
                Ok(RecordSet::new(records))
            }
            OperationKind::Create => {
                let mut record = payload
                    .body
                    .clone()
                    .ok_or_else(|| Error::InvalidRequest("CREATE requires a body".to_string()))?;
                let id = match payload.id.clone().or_else(|| record_id(&record)) {
                    Some(id) => id,
                    None => {
                        let id = uuid::Uuid::new_v4().to_string();
                        if let Value::Object(map) = &mut record {
                            map.insert("id".to_string(), Value::String(id.clone()));
                        }
                        id
                    }
                };
                self.tables.entry(key).or_default().insert(id, record.clone());
                Ok(RecordSet::new(vec![record]))
            }
            OperationKind::Update => {
                let id = require_id(payload, operation)?;
                let body = payload
                    .body
                    .clone()
                    .ok_or_else(|| Error::InvalidRequest("UPDATE requires a body".to_string()))?;
                let mut table = self.tables.entry(key).or_default();
                let record = table.entry(id.to_string()).or_insert_with(|| Value::Object(Default::default()));
                match (record.as_object_mut(), body) {
                    (Some(existing), Value::Object(changes)) => {
                        existing.extend(changes);
                    }
                    (_, replacement) => *record = replacement,
                }
                Ok(RecordSet::new(vec![record.clone()]))
            }
            OperationKind::Delete => {
                let id = require_id(payload, operation)?;
                let removed = self
                    .tables
                    .get_mut(&key)
                    .and_then(|mut table| table.remove(id));
                Ok(RecordSet::new(removed.into_iter().collect()))
            }
        }
    }
}
