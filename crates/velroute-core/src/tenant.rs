//! Tenant types and the configuration provider seam

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use crate::{Error, Result};

/// Identifier of a configured customer context.
///
/// Each tenant is bound to its own remote base URL, API key and timeouts.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TenantId(String);

impl TenantId {
    /// Parse a tenant ID, rejecting empty or whitespace-bearing values
    pub fn from_string(s: &str) -> Result<Self> {
        let trimmed = s.trim();
        if trimmed.is_empty() {
            return Err(Error::InvalidTenant("Tenant ID must not be empty".to_string()));
        }
        if trimmed.chars().any(char::is_whitespace) {
            return Err(Error::InvalidTenant(format!(
                "Tenant ID '{}' must not contain whitespace",
                trimmed
            )));
        }
        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TenantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for TenantId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::from_string(s)
    }
}

/// Remote connection settings for one tenant. Owned by the provider; read-only here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TenantConfiguration {
    pub tenant_id: TenantId,
    pub base_url: String,
    pub api_key: String,
    /// Per-attempt timeout for this tenant's remote calls (0 = use the global default)
    #[serde(default)]
    pub timeout_seconds: u64,
}

/// Resolves remote connection settings for the caller's tenant
#[async_trait]
pub trait TenantConfigProvider: Send + Sync {
    /// # Errors
    /// - `Error::TenantNotFound` if the tenant is not configured
    async fn tenant_config(&self, tenant_id: &TenantId) -> Result<TenantConfiguration>;
}

/// Provider backed by a fixed map, built once from the configuration file
#[derive(Debug, Default, Clone)]
pub struct StaticTenantConfigProvider {
    tenants: HashMap<TenantId, TenantConfiguration>,
}

impl StaticTenantConfigProvider {
    pub fn new(tenants: impl IntoIterator<Item = TenantConfiguration>) -> Self {
        Self {
            tenants: tenants
                .into_iter()
                .map(|t| (t.tenant_id.clone(), t))
                .collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.tenants.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tenants.is_empty()
    }
}

#[async_trait]
impl TenantConfigProvider for StaticTenantConfigProvider {
    async fn tenant_config(&self, tenant_id: &TenantId) -> Result<TenantConfiguration> {
        self.tenants
            .get(tenant_id)
            .cloned()
            .ok_or_else(|| Error::TenantNotFound(tenant_id.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tenant(id: &str) -> TenantConfiguration {
        TenantConfiguration {
            tenant_id: TenantId::from_string(id).unwrap(),
            base_url: format!("https://{}.velneo.example", id),
            api_key: format!("{}-key", id),
            timeout_seconds: 0,
        }
    }

    #[test]
    fn test_tenant_id_from_string() {
        let id = TenantId::from_string("  acme ").unwrap();
        assert_eq!(id.as_str(), "acme");
        assert_eq!(id.to_string(), "acme");
    }

    #[test]
    fn test_tenant_id_invalid_string() {
        assert!(TenantId::from_string("").is_err());
        assert!(TenantId::from_string("   ").is_err());
        assert!(TenantId::from_string("two words").is_err());
    }

    #[tokio::test]
    async fn test_static_provider_lookup() {
        let provider = StaticTenantConfigProvider::new(vec![tenant("acme"), tenant("globex")]);
        assert_eq!(provider.len(), 2);

        let config = provider
            .tenant_config(&TenantId::from_string("globex").unwrap())
            .await
            .unwrap();
        assert_eq!(config.api_key, "globex-key");
    }

    #[tokio::test]
    async fn test_static_provider_unknown_tenant() {
        let provider = StaticTenantConfigProvider::new(vec![tenant("acme")]);
        let err = provider
            .tenant_config(&TenantId::from_string("initech").unwrap())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::TenantNotFound(ref t) if t == "initech"));
    }
}
