//! Server configuration
//!
//! Loaded from YAML (default) or TOML by file extension, then overridden by
//! environment variables.
//!
//! ```yaml
//! logging:
//!   level: info
//! hybrid:
//!   EnableVelneoFallback: true
//!   VelneoTimeoutSeconds: 30
//! tenants:
//!   - tenant_id: acme
//!     base_url: https://acme.velneo.example/api
//!     api_key: ""          # filled from VELNEO_API_KEY
//! entities:
//!   Poliza: { endpoint: v1/contratos, collection: contratos }
//! routing:
//!   Client.GET: { destination: Both, require_fallback: true }
//!   Client.CREATE: { destination: Both }
//! ```

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::Path;
use thiserror::Error;
use velroute_core::tenant::StaticTenantConfigProvider;
use velroute_core::{EntityKind, HybridSettings, RoutingKey, TenantConfiguration};
use velroute_egress::{EntityEndpoint, VelneoConfig, client::HttpClientConfig};
use velroute_observability::LoggingConfig;
use velroute_routing::{DispatchPolicy, RoutingTable, RuleConfig};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read {path}: {source}")]
    FileRead {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("YAML parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Invalid tenant configuration: {0}")]
    Tenant(String),

    #[error(transparent)]
    Invalid(#[from] velroute_core::Error),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VelrouteConfig {
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Resilience options, PascalCase keys
    #[serde(default)]
    pub hybrid: HybridSettings,

    #[serde(default)]
    pub http_client: HttpClientConfig,

    #[serde(default)]
    pub tenants: Vec<TenantConfiguration>,

    /// Endpoint and collection overrides per entity
    #[serde(default)]
    pub entities: HashMap<EntityKind, EntityEndpoint>,

    /// Routing key (`Entity.OPERATION`) to rule
    #[serde(default)]
    pub routing: HashMap<RoutingKey, RuleConfig>,
}

impl VelrouteConfig {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::FileRead {
            path: path.display().to_string(),
            source,
        })?;

        let config = if path.extension().and_then(|s| s.to_str()) == Some("toml") {
            toml::from_str(&contents)?
        } else {
            // Default to YAML
            serde_yaml::from_str(&contents)?
        };

        Ok(config)
    }

    /// Merge environment variables into config (env vars take precedence)
    pub fn merge_env(&mut self) {
        if let Ok(val) = std::env::var("VELROUTE_LOG_LEVEL") {
            self.logging.level = val;
        }

        if let Ok(val) = std::env::var("VELROUTE_LOG_JSON") {
            match val.parse::<bool>() {
                Ok(json) => self.logging.json = json,
                Err(_) => eprintln!("Warning: Invalid VELROUTE_LOG_JSON '{}', ignoring", val),
            }
        }

        // Shared key for tenants configured without one
        if let Ok(api_key) = std::env::var("VELNEO_API_KEY") {
            for tenant in self.tenants.iter_mut().filter(|t| t.api_key.is_empty()) {
                tenant.api_key = api_key.clone();
            }
        }
    }

    /// Check the configuration before anything is served
    ///
    /// # Errors
    /// - `Error::Configuration` listing every missing routing key
    /// - `Error::Config` for out-of-range hybrid options
    /// - `ConfigError::Tenant` for duplicate or incomplete tenants
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.routing_table().validate_configuration()?;
        self.hybrid.validate()?;
        self.validate_tenants()
    }

    fn validate_tenants(&self) -> Result<(), ConfigError> {
        let mut seen = HashSet::new();
        for tenant in &self.tenants {
            if !seen.insert(&tenant.tenant_id) {
                return Err(ConfigError::Tenant(format!(
                    "tenant '{}' is configured more than once",
                    tenant.tenant_id
                )));
            }
            if !(tenant.base_url.starts_with("http://") || tenant.base_url.starts_with("https://"))
            {
                return Err(ConfigError::Tenant(format!(
                    "tenant '{}' has invalid base_url '{}'",
                    tenant.tenant_id, tenant.base_url
                )));
            }
            if tenant.api_key.trim().is_empty() {
                return Err(ConfigError::Tenant(format!(
                    "tenant '{}' has no api_key (set it in the file or via VELNEO_API_KEY)",
                    tenant.tenant_id
                )));
            }
        }
        Ok(())
    }

    pub fn routing_table(&self) -> RoutingTable {
        RoutingTable::from_config(self.routing.clone())
    }

    pub fn tenant_provider(&self) -> StaticTenantConfigProvider {
        StaticTenantConfigProvider::new(self.tenants.clone())
    }

    pub fn velneo_config(&self) -> VelneoConfig {
        self.entities.iter().fold(
            VelneoConfig::new().with_client_config(self.http_client.clone()),
            |config, (entity, endpoint)| config.with_endpoint(*entity, endpoint.clone()),
        )
    }

    pub fn dispatch_policy(&self) -> DispatchPolicy {
        DispatchPolicy::from(&self.hybrid)
    }
}
