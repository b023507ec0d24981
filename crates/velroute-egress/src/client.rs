//! Shared HTTP client utilities

use crate::{EgressError, Result};
use reqwest::{Client, ClientBuilder};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// HTTP client configuration
///
/// Per-attempt deadlines are enforced by the dispatcher; `timeout_secs` is
/// only the outer bound for a single request on this client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpClientConfig {
    /// Request timeout in seconds
    pub timeout_secs: u64,

    /// Connection timeout in seconds
    pub connect_timeout_secs: u64,

    /// Maximum number of idle connections per host
    pub pool_max_idle_per_host: usize,

    /// Seconds before an idle pooled connection is dropped
    pub pool_idle_timeout_secs: u64,

    /// User agent string
    pub user_agent: String,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 120,
            connect_timeout_secs: 10,
            pool_max_idle_per_host: 16,
            // Expire idle connections before the upstream closes them
            pool_idle_timeout_secs: 90,
            user_agent: format!("Velroute/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

/// Create a configured HTTP client with connection pooling
pub fn create_client(config: &HttpClientConfig) -> Result<Client> {
    if config.timeout_secs == 0 {
        return Err(EgressError::ConfigError(
            "HTTP client timeout must be greater than 0".to_string(),
        ));
    }

    ClientBuilder::new()
        .timeout(Duration::from_secs(config.timeout_secs))
        .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
        .pool_max_idle_per_host(config.pool_max_idle_per_host)
        .pool_idle_timeout(Duration::from_secs(config.pool_idle_timeout_secs))
        .user_agent(&config.user_agent)
        .tcp_keepalive(Duration::from_secs(60))
        .build()
        .map_err(|e| EgressError::ConfigError(format!("Failed to create HTTP client: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = HttpClientConfig::default();
        assert_eq!(config.timeout_secs, 120);
        assert_eq!(config.connect_timeout_secs, 10);
        assert_eq!(config.pool_idle_timeout_secs, 90);
        assert!(config.user_agent.starts_with("Velroute/"));
    }

    #[test]
    fn test_create_client() {
        let config = HttpClientConfig::default();
        assert!(create_client(&config).is_ok());
    }

    #[test]
    fn test_zero_timeout_rejected() {
        let config = HttpClientConfig {
            timeout_secs: 0,
            ..Default::default()
        };
        assert!(matches!(
            create_client(&config),
            Err(EgressError::ConfigError(_))
        ));
    }

    #[test]
    fn test_partial_config_deserializes() {
        let config: HttpClientConfig =
            serde_json::from_str(r#"{"timeout_secs": 45}"#).unwrap();
        assert_eq!(config.timeout_secs, 45);
        assert_eq!(config.pool_max_idle_per_host, 16);
    }
}
