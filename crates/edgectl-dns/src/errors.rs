//! DNS provider error types

use std::time::Duration;
use thiserror::Error;

/// DNS provider errors
#[derive(Error, Debug)]
pub enum DnsError {
    #[error("Record already exists: {0}")]
    Conflict(String),

    #[error("Record not found: {0}")]
    NotFound(String),

    #[error("Authentication failed: {0}")]
    AuthFailed(String),

    #[error("Rate limited by provider{}", retry_hint(.retry_after))]
    RateLimited { retry_after: Option<Duration> },

    #[error("Network error: {0}")]
    Network(String),

    #[error("Zone not found: {0}")]
    ZoneNotFound(String),

    #[error("Invalid credentials: {0}")]
    InvalidCredentials(String),

    #[error("Invalid provider type: {0}")]
    InvalidProviderType(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

fn retry_hint(retry_after: &Option<Duration>) -> String {
    match retry_after {
        Some(d) => format!(" (retry after {}s)", d.as_secs()),
        None => String::new(),
    }
}

impl DnsError {
    /// Only rate limiting is worth retrying automatically.
    pub fn is_retryable(&self) -> bool {
        matches!(self, DnsError::RateLimited { .. })
    }
}

impl From<reqwest::Error> for DnsError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            DnsError::Network(format!("request timed out: {}", e))
        } else if e.is_connect() || e.is_request() {
            DnsError::Network(e.to_string())
        } else {
            DnsError::Api {
                status: e.status().map(|s| s.as_u16()).unwrap_or(0),
                message: e.to_string(),
            }
        }
    }
}
