//! Deployment error types

use edgectl_core::FileError;
use edgectl_dns::DnsError;
use edgectl_proxy::{ProcessError, RenderError};
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

use crate::model::DeploymentState;

/// Input rejected before anything external is touched
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Invalid subdomain '{value}': {reason}")]
    BadSubdomain { value: String, reason: String },

    #[error("Invalid target '{value}': {reason}")]
    BadTarget { value: String, reason: String },

    #[error("'{subdomain}' is already taken by {existing}; use overwrite to replace it")]
    Conflict { subdomain: String, existing: String },
}

#[derive(Error, Debug)]
pub enum StateError {
    #[error("Deployment store {} is corrupt: {reason}", path.display())]
    CorruptStore { path: PathBuf, reason: String },

    #[error("No deployment named '{0}'")]
    NotFound(String),

    #[error("Deployment '{subdomain}' cannot move from {from} to {to}")]
    InvalidTransition {
        subdomain: String,
        from: DeploymentState,
        to: DeploymentState,
    },

    #[error("Deployment store I/O failed: {0}")]
    Io(FileError),

    #[error("Deployment store is locked: {0}")]
    Lock(FileError),
}

impl From<FileError> for StateError {
    fn from(err: FileError) -> Self {
        match err {
            FileError::Corrupt { path, source } => StateError::CorruptStore {
                path,
                reason: source.to_string(),
            },
            err @ FileError::LockTimeout { .. } => StateError::Lock(err),
            err => StateError::Io(err),
        }
    }
}

#[derive(Error, Debug)]
pub enum PublicIpError {
    #[error("Failed to create HTTP client: {0}")]
    Client(String),

    #[error("No IP service answered ({0})")]
    Unavailable(String),
}

/// The externally visible resources a deployment is made of
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resource {
    Dns,
    Config,
    Process,
    State,
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Resource::Dns => write!(f, "DNS record"),
            Resource::Config => write!(f, "proxy config"),
            Resource::Process => write!(f, "proxy process"),
            Resource::State => write!(f, "state store"),
        }
    }
}

/// What an operation left each resource in
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum ResourceState {
    #[default]
    Untouched,
    /// Already as desired
    Unchanged,
    Created,
    Updated,
    Removed,
    Reloaded,
    Started,
    /// Written, but no proxy was running to load it
    NotRunning,
    RolledBack,
    Failed(String),
}

impl ResourceState {
    pub fn is_failed(&self) -> bool {
        matches!(self, ResourceState::Failed(_))
    }
}

impl fmt::Display for ResourceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResourceState::Untouched => write!(f, "untouched"),
            ResourceState::Unchanged => write!(f, "unchanged"),
            ResourceState::Created => write!(f, "created"),
            ResourceState::Updated => write!(f, "updated"),
            ResourceState::Removed => write!(f, "removed"),
            ResourceState::Reloaded => write!(f, "reloaded"),
            ResourceState::Started => write!(f, "started"),
            ResourceState::NotRunning => write!(f, "written, proxy not running"),
            ResourceState::RolledBack => write!(f, "rolled back"),
            ResourceState::Failed(reason) => write!(f, "FAILED ({})", reason),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResourceReport {
    pub dns: ResourceState,
    pub config: ResourceState,
    pub process: ResourceState,
}

impl ResourceReport {
    pub fn get(&self, resource: Resource) -> Option<&ResourceState> {
        match resource {
            Resource::Dns => Some(&self.dns),
            Resource::Config => Some(&self.config),
            Resource::Process => Some(&self.process),
            Resource::State => None,
        }
    }
}

impl fmt::Display for ResourceReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "DNS: {}; config: {}; process: {}",
            self.dns, self.config, self.process
        )
    }
}

/// Underlying cause of a failed step
#[derive(Error, Debug)]
pub enum ResourceError {
    #[error(transparent)]
    Dns(#[from] DnsError),

    #[error(transparent)]
    Render(#[from] RenderError),

    #[error(transparent)]
    Process(#[from] ProcessError),

    #[error(transparent)]
    File(#[from] FileError),

    #[error(transparent)]
    State(#[from] StateError),
}

/// A teardown that could not finish every step
#[derive(Error, Debug)]
#[error("Removal of '{subdomain}' incomplete ({report})")]
pub struct TeardownError {
    pub subdomain: String,
    pub report: ResourceReport,
    pub failures: Vec<(Resource, ResourceError)>,
}

impl TeardownError {
    pub fn failed_resources(&self) -> Vec<Resource> {
        self.failures.iter().map(|(resource, _)| *resource).collect()
    }
}

#[derive(Error, Debug)]
pub enum ReconcileError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Render(#[from] RenderError),

    #[error(transparent)]
    State(#[from] StateError),

    #[error(transparent)]
    PublicIp(#[from] PublicIpError),

    #[error("DNS provider error: {0}")]
    Dns(#[from] DnsError),

    #[error("Deploy of '{subdomain}' failed at the {step}: {source} ({report})")]
    Failed {
        subdomain: String,
        step: Resource,
        #[source]
        source: ResourceError,
        report: ResourceReport,
    },

    #[error(transparent)]
    Teardown(#[from] TeardownError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_file_errors_map_to_state_errors() {
        let err: StateError = FileError::LockTimeout {
            path: PathBuf::from("/tmp/x.lock"),
            waited_ms: 10,
        }
        .into();
        assert!(matches!(err, StateError::Lock(_)));

        let source = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        let err: StateError = FileError::Corrupt {
            path: PathBuf::from("/tmp/x.json"),
            source,
        }
        .into();
        assert!(matches!(err, StateError::CorruptStore { .. }));
    }

    #[test]
    fn test_report_names_every_resource() {
        let report = ResourceReport {
            dns: ResourceState::Created,
            config: ResourceState::RolledBack,
            process: ResourceState::Failed("invalid config".to_string()),
        };
        assert_eq!(
            report.to_string(),
            "DNS: created; config: rolled back; process: FAILED (invalid config)"
        );
    }

    #[test]
    fn test_failed_deploy_message() {
        let err = ReconcileError::Failed {
            subdomain: "app".to_string(),
            step: Resource::Dns,
            source: DnsError::RateLimited {
                retry_after: Some(Duration::from_secs(3)),
            }
            .into(),
            report: ResourceReport {
                dns: ResourceState::Failed("rate limited".to_string()),
                ..ResourceReport::default()
            },
        };
        let message = err.to_string();
        assert!(message.contains("failed at the DNS record"));
        assert!(message.contains("config: untouched"));
    }
}
