use async_trait::async_trait;
use std::path::Path;
use std::time::Duration;

use crate::errors::ProcessError;

/// A freshly launched proxy process
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessHandle {
    pub pid: u32,
}

/// Operating-system side of the proxy lifecycle.
///
/// The controller owns the state machine and the persisted identity; a
/// backend only knows how to run one particular proxy binary.
#[async_trait]
pub trait ProxyBackend: Send + Sync {
    fn name(&self) -> &str;

    /// Check a configuration file without applying it.
    /// Rejection is reported as [`ProcessError::InvalidConfig`].
    async fn validate(&self, config_path: &Path) -> Result<(), ProcessError>;

    /// Launch a detached process serving `config_path`.
    async fn spawn(&self, config_path: &Path) -> Result<ProcessHandle, ProcessError>;

    /// Make the running process load `config_path`.
    async fn reload(&self, pid: u32, config_path: &Path) -> Result<(), ProcessError>;

    /// Ask the process to exit, killing it after `grace`.
    async fn terminate(&self, pid: u32, grace: Duration) -> Result<(), ProcessError>;

    fn is_alive(&self, pid: u32) -> bool;

    /// One bounded health check.
    async fn check_health(&self) -> bool;
}
