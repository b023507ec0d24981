//! Wiring of the dispatcher from a loaded configuration

use anyhow::{Context, Result};
use serde_json::Value;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tracing::info;
use velroute_core::memory::MemoryLocalGateway;
use velroute_core::{EntityKind, TenantId};
use velroute_egress::VelneoConnector;
use velroute_observability::Metrics;
use velroute_routing::{Dispatcher, ReconciliationQueue};

use crate::config::VelrouteConfig;

/// A ready-to-use dispatcher and the handles an operator needs around it
pub struct App {
    pub dispatcher: Arc<Dispatcher>,
    pub local: Arc<MemoryLocalGateway>,
    pub reconciliation: Arc<ReconciliationQueue>,
}

/// Build the dispatcher from a validated configuration
pub fn build(config: &VelrouteConfig) -> Result<App> {
    let table = config
        .routing_table()
        .validated()
        .context("Routing table is incomplete")?;

    let remote = VelneoConnector::new(config.velneo_config())
        .context("Failed to create Velneo connector")?;
    let local = Arc::new(MemoryLocalGateway::new());
    let reconciliation = Arc::new(ReconciliationQueue::new());
    let metrics = Arc::new(
        Metrics::new().map_err(|e| anyhow::anyhow!("Failed to register metrics: {}", e))?,
    );

    let dispatcher = Dispatcher::new(
        table,
        Arc::new(remote),
        local.clone(),
        Arc::new(config.tenant_provider()),
        config.dispatch_policy(),
    )
    .with_reconciliation_sink(reconciliation.clone())
    .with_metrics(metrics);

    info!(
        tenants = config.tenants.len(),
        entity_overrides = config.entities.len(),
        "Dispatcher ready"
    );

    Ok(App {
        dispatcher: Arc::new(dispatcher),
        local,
        reconciliation,
    })
}

/// Seed the in-memory local store from a JSON file
///
/// The file maps entity names to record arrays: `{"Client": [{"id": "1", ...}]}`.
pub fn seed_local(local: &MemoryLocalGateway, tenant: &TenantId, path: &Path) -> Result<usize> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read seed file {}", path.display()))?;
    let seed: HashMap<EntityKind, Vec<Value>> = serde_json::from_str(&contents)
        .with_context(|| format!("Invalid seed file {}", path.display()))?;

    let mut total = 0;
    for (entity, records) in seed {
        total += records.len();
        local.seed(tenant, entity, records);
    }
    Ok(total)
}
