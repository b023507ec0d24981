//! Error types for Velroute Core

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // Configuration errors
    #[error("Routing configuration incomplete, missing keys: {}", missing.join(", "))]
    Configuration { missing: Vec<String> },

    #[error("Configuration error: {0}")]
    Config(String),

    // Tenant errors
    #[error("Invalid tenant: {0}")]
    InvalidTenant(String),

    #[error("Tenant not found: {0}")]
    TenantNotFound(String),

    // Remote (system of record) errors
    #[error("Transient upstream error{}: {message}", status.map(|s| format!(" ({})", s)).unwrap_or_default())]
    TransientRemote { status: Option<u16>, message: String },

    #[error("Upstream timeout after {secs}s")]
    UpstreamTimeout { secs: u64 },

    #[error("Upstream rejected request ({status}): {message}")]
    PermanentRemote { status: u16, message: String },

    #[error("Upstream payload could not be parsed: {0}")]
    UpstreamFormat(String),

    #[error("Circuit breaker open for '{target}'")]
    CircuitOpen { target: String },

    #[error("Retries exhausted after {attempts} attempts: {last}")]
    RetryExhausted { attempts: u32, last: Box<Error> },

    #[error("Overall deadline exceeded after {attempts} attempts")]
    DeadlineExceeded { attempts: u32 },

    #[error("Request cancelled by caller")]
    Cancelled,

    // Local repository errors
    #[error("Local gateway error: {0}")]
    Local(String),

    #[error("Fallback exhausted: remote failed ({remote}){}", local.as_ref().map(|l| format!(", local failed ({})", l)).unwrap_or_else(|| ", no local fallback configured".to_string()))]
    FallbackExhausted {
        remote: Box<Error>,
        local: Option<Box<Error>>,
    },

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Timeouts, connection failures and 5xx responses. The only errors a retry loop may retry.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Error::TransientRemote { .. } | Error::UpstreamTimeout { .. }
        )
    }

    /// Whether this failure says the remote is unavailable, as opposed to reachable but unhappy.
    ///
    /// Circuit breakers only count these.
    pub fn is_availability_failure(&self) -> bool {
        match self {
            Error::RetryExhausted { .. } => true,
            other => other.is_transient(),
        }
    }

    /// Whether a local fallback may be served in place of this remote failure
    pub fn permits_fallback(&self) -> bool {
        matches!(
            self,
            Error::TransientRemote { .. }
                | Error::UpstreamTimeout { .. }
                | Error::CircuitOpen { .. }
                | Error::RetryExhausted { .. }
                | Error::UpstreamFormat(_)
        )
    }

    /// Short stable label used for metrics and structured logs
    pub fn kind(&self) -> &'static str {
        match self {
            Error::Serialization(_) => "serialization",
            Error::Configuration { .. } | Error::Config(_) => "configuration",
            Error::InvalidTenant(_) | Error::TenantNotFound(_) => "tenant",
            Error::TransientRemote { .. } => "transient_remote",
            Error::UpstreamTimeout { .. } => "upstream_timeout",
            Error::PermanentRemote { .. } => "permanent_remote",
            Error::UpstreamFormat(_) => "upstream_format",
            Error::CircuitOpen { .. } => "circuit_open",
            Error::RetryExhausted { .. } => "retry_exhausted",
            Error::DeadlineExceeded { .. } => "deadline_exceeded",
            Error::Cancelled => "cancelled",
            Error::Local(_) => "local",
            Error::FallbackExhausted { .. } => "fallback_exhausted",
            Error::InvalidRequest(_) => "invalid_request",
            Error::Internal(_) => "internal",
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_configuration_error_lists_every_key() {
        let err = Error::Configuration {
            missing: vec!["Client.GET".to_string(), "Poliza.SEARCH".to_string()],
        };
        let msg = err.to_string();
        assert!(msg.contains("Client.GET"));
        assert!(msg.contains("Poliza.SEARCH"));
    }

    #[test]
    fn test_transient_classification() {
        assert!(Error::UpstreamTimeout { secs: 5 }.is_transient());
        assert!(
            Error::TransientRemote {
                status: Some(503),
                message: "unavailable".to_string()
            }
            .is_transient()
        );
        assert!(
            !Error::PermanentRemote {
                status: 404,
                message: "not found".to_string()
            }
            .is_transient()
        );
        assert!(!Error::CircuitOpen { target: "t".to_string() }.is_transient());
        assert!(!Error::Cancelled.is_transient());
    }

    #[test]
    fn test_fallback_classification() {
        assert!(Error::CircuitOpen { target: "t".to_string() }.permits_fallback());
        assert!(Error::UpstreamFormat("bad".to_string()).permits_fallback());
        assert!(
            Error::RetryExhausted {
                attempts: 4,
                last: Box::new(Error::UpstreamTimeout { secs: 1 })
            }
            .permits_fallback()
        );
        assert!(
            !Error::PermanentRemote {
                status: 400,
                message: "bad request".to_string()
            }
            .permits_fallback()
        );
        assert!(!Error::Cancelled.permits_fallback());
        assert!(!Error::DeadlineExceeded { attempts: 2 }.permits_fallback());
    }

    #[test]
    fn test_availability_failure_excludes_format_errors() {
        assert!(!Error::UpstreamFormat("bad".to_string()).is_availability_failure());
        assert!(
            Error::RetryExhausted {
                attempts: 2,
                last: Box::new(Error::UpstreamTimeout { secs: 1 })
            }
            .is_availability_failure()
        );
    }

    #[test]
    fn test_error_display_formatting() {
        let err = Error::TransientRemote {
            status: Some(502),
            message: "bad gateway".to_string(),
        };
        assert_eq!(err.to_string(), "Transient upstream error (502): bad gateway");

        let err = Error::TransientRemote {
            status: None,
            message: "connection refused".to_string(),
        };
        assert_eq!(err.to_string(), "Transient upstream error: connection refused");

        let err = Error::FallbackExhausted {
            remote: Box::new(Error::CircuitOpen {
                target: "acme/v1/clientes".to_string(),
            }),
            local: None,
        };
        assert!(err.to_string().contains("no local fallback configured"));
    }
}
