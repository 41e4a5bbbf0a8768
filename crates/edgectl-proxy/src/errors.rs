//! Proxy error types

use edgectl_core::FileError;
use std::time::Duration;
use thiserror::Error;

/// Configuration rendering errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RenderError {
    #[error("Template variable '{0}' has no value")]
    MissingVariable(String),

    #[error("Malformed proxy configuration: {0}")]
    Malformed(String),
}

/// Proxy process lifecycle errors
#[derive(Error, Debug)]
pub enum ProcessError {
    #[error("Proxy is already running (pid {pid})")]
    AlreadyRunning { pid: u32 },

    #[error("Proxy is not running")]
    NotRunning,

    #[error("Proxy rejected the configuration: {0}")]
    InvalidConfig(String),

    #[error("Proxy (pid {pid}) did not become healthy within {}s; left running for diagnosis", waited.as_secs())]
    HealthCheckTimeout { pid: u32, waited: Duration },

    #[error("Proxy (pid {pid}) exited during startup")]
    Exited { pid: u32 },

    #[error("Failed to launch proxy: {0}")]
    Spawn(String),

    #[error("Failed to signal proxy: {0}")]
    Signal(String),

    #[error("Process state error: {0}")]
    State(#[from] FileError),
}
