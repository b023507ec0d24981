//! Hybrid resilience settings
//!
//! These are the recognized options of the `hybrid` configuration section.
//! Keys are PascalCase on the wire (`EnableRetryPolicy`, `MaxRetries`, ...)
//! and every option has a default, so a partial section is valid.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::{Error, Result};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct HybridSettings {
    /// Emit audit events for write dispatches
    pub enable_local_audit: bool,
    /// Global switch for per-rule `require_fallback`
    pub enable_velneo_fallback: bool,
    /// Cache fresh remote reads in-process
    pub enable_local_caching: bool,
    pub cache_expiration_minutes: u64,

    pub enable_retry_policy: bool,
    /// Retries after the first attempt
    pub max_retries: u32,
    pub base_delay_seconds: u64,
    pub max_delay_seconds: u64,
    pub use_exponential_backoff: bool,

    /// Overall deadline for one dispatch when the caller supplies none
    pub default_timeout_seconds: u64,
    /// Per-attempt timeout for remote calls without a more specific override
    pub velneo_timeout_seconds: u64,
    /// Timeout for local repository calls
    pub azure_timeout_seconds: u64,

    pub enable_circuit_breaker: bool,
    pub circuit_breaker_failure_threshold: u32,
    pub circuit_breaker_timeout_seconds: u64,
}

impl Default for HybridSettings {
    fn default() -> Self {
        Self {
            enable_local_audit: true,
            enable_velneo_fallback: true,
            enable_local_caching: false,
            cache_expiration_minutes: 5,
            enable_retry_policy: true,
            max_retries: 3,
            base_delay_seconds: 1,
            max_delay_seconds: 30,
            use_exponential_backoff: true,
            default_timeout_seconds: 120,
            velneo_timeout_seconds: 30,
            azure_timeout_seconds: 15,
            enable_circuit_breaker: true,
            circuit_breaker_failure_threshold: 5,
            circuit_breaker_timeout_seconds: 60,
        }
    }
}

impl HybridSettings {
    /// Validate option values
    ///
    /// Returns every problem found, joined into one `Error::Config`.
    pub fn validate(&self) -> Result<()> {
        let mut problems = Vec::new();

        if self.circuit_breaker_failure_threshold == 0 {
            problems.push("CircuitBreakerFailureThreshold must be at least 1");
        }
        if self.circuit_breaker_timeout_seconds == 0 {
            problems.push("CircuitBreakerTimeoutSeconds must be greater than 0");
        }
        if self.base_delay_seconds > self.max_delay_seconds {
            problems.push("BaseDelaySeconds must not exceed MaxDelaySeconds");
        }
        if self.default_timeout_seconds == 0 {
            problems.push("DefaultTimeoutSeconds must be greater than 0");
        }
        if self.velneo_timeout_seconds == 0 {
            problems.push("VelneoTimeoutSeconds must be greater than 0");
        }
        if self.default_timeout_seconds < self.velneo_timeout_seconds {
            problems.push("DefaultTimeoutSeconds must not be less than VelneoTimeoutSeconds");
        }
        if self.azure_timeout_seconds == 0 {
            problems.push("AzureTimeoutSeconds must be greater than 0");
        }
        if self.enable_local_caching && self.cache_expiration_minutes == 0 {
            problems.push("CacheExpirationMinutes must be greater than 0 when caching is enabled");
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(Error::Config(problems.join("; ")))
        }
    }

    pub fn default_timeout(&self) -> Duration {
        Duration::from_secs(self.default_timeout_seconds)
    }

    pub fn velneo_timeout(&self) -> Duration {
        Duration::from_secs(self.velneo_timeout_seconds)
    }

    pub fn azure_timeout(&self) -> Duration {
        Duration::from_secs(self.azure_timeout_seconds)
    }

    pub fn base_delay(&self) -> Duration {
        Duration::from_secs(self.base_delay_seconds)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_secs(self.max_delay_seconds)
    }

    pub fn circuit_breaker_timeout(&self) -> Duration {
        Duration::from_secs(self.circuit_breaker_timeout_seconds)
    }

    pub fn cache_expiration(&self) -> Duration {
        Duration::from_secs(self.cache_expiration_minutes * 60)
    }
}
