//! In-process cache of remote read results

use dashmap::DashMap;
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;
use velroute_core::{EntityKind, OperationKind, OperationPayload, RecordSet, TenantId};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub tenant: TenantId,
    pub entity: EntityKind,
    pub operation: OperationKind,
    pub payload: String,
}

impl CacheKey {
    pub fn new(
        tenant: &TenantId,
        entity: EntityKind,
        operation: OperationKind,
        payload: &OperationPayload,
    ) -> Self {
        Self {
            tenant: tenant.clone(),
            entity,
            operation,
            payload: payload.cache_key(),
        }
    }
}

#[derive(Debug, Clone)]
struct CacheEntry {
    records: RecordSet,
    expires_at: Instant,
}

/// TTL cache keyed by tenant, entity, operation and payload
///
/// Expired entries are dropped when looked up, and swept from the whole map
/// on insert at most once per TTL.
#[derive(Debug)]
pub struct ResponseCache {
    entries: DashMap<CacheKey, CacheEntry>,
    ttl: Duration,
    last_sweep: Mutex<Instant>,
}

impl ResponseCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
            last_sweep: Mutex::new(Instant::now()),
        }
    }

    /// Fresh entry for `key`; expired entries are evicted on lookup
    pub fn get(&self, key: &CacheKey) -> Option<RecordSet> {
        let now = Instant::now();
        {
            let entry = self.entries.get(key)?;
            if entry.expires_at > now {
                return Some(entry.records.clone());
            }
        }
        // Shard guard released above; remove_if takes the write lock
        self.entries.remove_if(key, |_, entry| entry.expires_at <= now);
        None
    }

    pub fn insert(&self, key: CacheKey, records: RecordSet) {
        let now = Instant::now();
        self.sweep_expired(now);
        self.entries.insert(
            key,
            CacheEntry {
                records,
                expires_at: now + self.ttl,
            },
        );
    }

    fn sweep_expired(&self, now: Instant) {
        {
            let mut last_sweep = self
                .last_sweep
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            if now.duration_since(*last_sweep) < self.ttl {
                return;
            }
            *last_sweep = now;
        }
        self.entries.retain(|_, entry| entry.expires_at > now);
    }

    /// Drop every entry of one tenant's entity, after a write
    pub fn invalidate_entity(&self, tenant: &TenantId, entity: EntityKind) {
        self.entries
            .retain(|key, _| !(key.tenant == *tenant && key.entity == entity));
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
