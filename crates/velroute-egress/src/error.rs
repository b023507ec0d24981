//! Egress error types

use thiserror::Error;

#[derive(Debug, Error)]
pub enum EgressError {
    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("Request timed out after {0}s")]
    Timeout(u64),

    #[error("Upstream returned status {status_code}: {message}")]
    UpstreamStatus { status_code: u16, message: String },

    #[error("Failed to parse upstream payload: {0}")]
    ParseError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),
}

pub type Result<T> = std::result::Result<T, EgressError>;

impl EgressError {
    /// Statuses that say "try again later" rather than "this request is wrong"
    pub fn is_transient_status(status_code: u16) -> bool {
        matches!(status_code, 408 | 429) || (500..=599).contains(&status_code)
    }
}

impl From<EgressError> for velroute_core::Error {
    fn from(err: EgressError) -> Self {
        use velroute_core::Error;

        match err {
            EgressError::HttpError(e) => {
                let status = e.status().map(|s| s.as_u16());
                match status {
                    Some(code) if !EgressError::is_transient_status(code) => Error::PermanentRemote {
                        status: code,
                        message: e.to_string(),
                    },
                    _ => Error::TransientRemote {
                        status,
                        message: e.to_string(),
                    },
                }
            }
            EgressError::Timeout(secs) => Error::UpstreamTimeout { secs },
            EgressError::UpstreamStatus {
                status_code,
                message,
            } => {
                if EgressError::is_transient_status(status_code) {
                    Error::TransientRemote {
                        status: Some(status_code),
                        message,
                    }
                } else {
                    Error::PermanentRemote {
                        status: status_code,
                        message,
                    }
                }
            }
            EgressError::ParseError(msg) => Error::UpstreamFormat(msg),
            EgressError::ConfigError(msg) => Error::Config(msg),
        }
    }
}
