use edgectl_core::FileError;
use edgectl_dns::DnsError;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    #[error("Missing required setting '{field}'. Run 'edgectl init' or set {env}")]
    Missing { field: &'static str, env: &'static str },

    #[error("Invalid setting '{field}': {reason}")]
    Invalid { field: &'static str, reason: String },

    #[error("No credentials configured for {provider}: {hint}")]
    MissingCredentials {
        provider: String,
        hint: &'static str,
    },

    #[error("Invalid DNS credentials: {0}")]
    Credentials(#[from] DnsError),

    #[error("Configuration file {} already exists (use --force to replace it)", .0.display())]
    AlreadyExists(PathBuf),

    #[error("Failed to serialize configuration: {0}")]
    Serialization(#[from] serde_yaml::Error),

    #[error(transparent)]
    File(#[from] FileError),
}
