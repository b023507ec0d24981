//! Velroute command-line front end
//!
//! Loads the hybrid routing configuration, validates it at boot and runs
//! single dispatches against the configured Velneo tenants.
//!
//! Usage:
//! ```bash
//! # Check that every Entity.OPERATION key is routed
//! velroute --config velroute.yaml validate
//!
//! # Show where a key goes
//! velroute --config velroute.yaml route Poliza CREATE
//!
//! # One dispatch, local side seeded from a JSON file
//! VELNEO_API_KEY=secret velroute --config velroute.yaml \
//!   fetch --tenant acme Client GET --id 42 --seed local.json
//! ```

mod app;
mod config;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use config::VelrouteConfig;
use std::path::PathBuf;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use velroute_core::{EntityKind, OperationKind, TenantId};
use velroute_observability::init_logging;
use velroute_routing::DispatchRequest;

/// Velroute - hybrid Local/Velneo data routing
#[derive(Parser)]
#[command(name = "velroute")]
#[command(about = "Routes entity operations between local storage and Velneo", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to configuration file (YAML or TOML)
    #[arg(short, long, value_name = "FILE", env = "VELROUTE_CONFIG", global = true)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate the configuration, listing every missing routing key
    Validate,
    /// Print the destination and rule for an entity operation
    Route {
        /// Entity name (Client, Broker, Currency, Company, Poliza, Document)
        entity: String,
        /// Operation (GET, CREATE, UPDATE, DELETE, SEARCH)
        operation: String,
    },
    /// Run one dispatch and print the outcome as JSON
    Fetch {
        /// Tenant to act for
        #[arg(long, env = "VELROUTE_TENANT")]
        tenant: String,

        entity: String,

        operation: String,

        /// Record id for GET/UPDATE/DELETE
        #[arg(long)]
        id: Option<String>,

        /// Search filter, repeatable
        #[arg(long = "query", value_name = "KEY=VALUE")]
        query: Vec<String>,

        /// JSON body for CREATE/UPDATE
        #[arg(long)]
        body: Option<String>,

        /// JSON file seeding the in-memory local store
        #[arg(long, value_name = "FILE")]
        seed: Option<PathBuf>,

        /// Overall deadline in seconds (defaults to DefaultTimeoutSeconds)
        #[arg(long)]
        deadline_secs: Option<u64>,
    },
}

fn load_config(path: Option<&PathBuf>) -> Result<VelrouteConfig> {
    let mut config = match path {
        Some(path) => VelrouteConfig::from_file(path)
            .with_context(|| format!("Failed to load configuration from {}", path.display()))?,
        None => bail!("No configuration file given (use --config or VELROUTE_CONFIG)"),
    };
    config.merge_env();
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = load_config(cli.config.as_ref())?;

    init_logging(&config.logging).context("Failed to initialize logging")?;

    match cli.command {
        Commands::Validate => validate(&config),
        Commands::Route { entity, operation } => route(&config, &entity, &operation),
        Commands::Fetch {
            tenant,
            entity,
            operation,
            id,
            query,
            body,
            seed,
            deadline_secs,
        } => {
            let tenant = TenantId::from_string(&tenant)?;
            let entity: EntityKind = entity.parse()?;
            let operation: OperationKind = operation.parse()?;

            let mut request = DispatchRequest::new(tenant.clone(), entity, operation);
            if let Some(id) = id {
                request = request.with_id(id);
            }
            for filter in query {
                let Some((key, value)) = filter.split_once('=') else {
                    bail!("Invalid --query '{}', expected KEY=VALUE", filter);
                };
                request = request.with_query(key, value);
            }
            if let Some(body) = body {
                let body = serde_json::from_str(&body).context("--body is not valid JSON")?;
                request = request.with_body(body);
            }
            if let Some(secs) = deadline_secs {
                request = request.with_deadline(Duration::from_secs(secs));
            }

            fetch(&config, request, seed).await
        }
    }
}

fn validate(config: &VelrouteConfig) -> Result<()> {
    let missing = config.routing_table().missing_keys();
    for key in &missing {
        println!("missing routing key: {}", key);
    }

    config.validate()?;

    println!(
        "configuration OK: {} routing keys, {} tenants",
        config.routing.len(),
        config.tenants.len()
    );
    Ok(())
}

fn route(config: &VelrouteConfig, entity: &str, operation: &str) -> Result<()> {
    let entity: EntityKind = entity.parse()?;
    let operation: OperationKind = operation.parse()?;
    let table = config.routing_table();

    match table.rule(entity, operation) {
        Some(rule) => println!(
            "{} -> {} (fallback: {}, timeout: {}, write-through: {})",
            rule.key(),
            rule.destination,
            rule.require_fallback,
            match rule.timeout_seconds {
                0 => "default".to_string(),
                secs => format!("{}s", secs),
            },
            rule.write_through
        ),
        None => println!(
            "{}.{} -> {} (not configured)",
            entity,
            operation,
            table.destination(entity, operation)
        ),
    }
    Ok(())
}

async fn fetch(
    config: &VelrouteConfig,
    request: DispatchRequest,
    seed: Option<PathBuf>,
) -> Result<()> {
    config.validate()?;
    let app = app::build(config)?;

    if let Some(path) = seed {
        let seeded = app::seed_local(&app.local, &request.tenant, &path)?;
        info!(records = seeded, "Seeded local store");
    }

    // Ctrl-C cancels the in-flight dispatch
    let cancellation = CancellationToken::new();
    let request = request.with_cancellation(cancellation.clone());
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, cancelling dispatch");
            cancellation.cancel();
        }
    });

    let outcome = app.dispatcher.execute(request).await?;
    println!("{}", serde_json::to_string_pretty(&outcome)?);

    for pending in app.reconciliation.drain() {
        eprintln!(
            "pending reconciliation {}: {} {} on {} side ({})",
            pending.id,
            pending.entity,
            pending.operation,
            match pending.pending_side {
                velroute_routing::PendingSide::Local => "local",
                velroute_routing::PendingSide::Remote => "remote",
            },
            pending.reason
        );
    }
    Ok(())
}
