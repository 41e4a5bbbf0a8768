//! Deployment data model

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::{IpAddr, Ipv6Addr};
use std::str::FromStr;

use crate::errors::{StateError, ValidationError};

const LABEL_MAX_LEN: usize = 63;
const HOSTNAME_MAX_LEN: usize = 253;
const GENERATED_LEN: usize = 8;
const GENERATED_CHARSET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";

/// A single DNS label under the managed domain, always lowercase
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Subdomain(String);

impl Subdomain {
    pub fn parse(input: &str) -> Result<Self, ValidationError> {
        let value = input.trim().to_ascii_lowercase();
        let bad = |reason: &str| ValidationError::BadSubdomain {
            value: input.to_string(),
            reason: reason.to_string(),
        };

        if value.is_empty() {
            return Err(bad("must not be empty"));
        }
        if value.len() > LABEL_MAX_LEN {
            return Err(bad("must be at most 63 characters"));
        }
        if !value
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
        {
            return Err(bad("only letters, digits and '-' are allowed"));
        }
        if value.starts_with('-') || value.ends_with('-') {
            return Err(bad("must not start or end with '-'"));
        }
        Ok(Self(value))
    }

    /// Random 8-character label
    pub fn generate() -> Self {
        let mut rng = rand::thread_rng();
        let value = (0..GENERATED_LEN)
            .map(|_| GENERATED_CHARSET[rng.gen_range(0..GENERATED_CHARSET.len())] as char)
            .collect();
        Self(value)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Subdomain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for Subdomain {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for Subdomain {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<Subdomain> for String {
    fn from(value: Subdomain) -> Self {
        value.0
    }
}

/// Local service a subdomain forwards to
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Target {
    host: String,
    port: u16,
}

impl Target {
    /// Parse `host:port` or `[ipv6]:port`
    pub fn parse(input: &str) -> Result<Self, ValidationError> {
        let value = input.trim();
        let bad = |reason: &str| ValidationError::BadTarget {
            value: input.to_string(),
            reason: reason.to_string(),
        };

        let (host, port) = if let Some(rest) = value.strip_prefix('[') {
            let (host, port) = rest
                .split_once("]:")
                .ok_or_else(|| bad("expected [address]:port"))?;
            host.parse::<Ipv6Addr>()
                .map_err(|_| bad("invalid IPv6 address"))?;
            (host, port)
        } else {
            let (host, port) = value
                .rsplit_once(':')
                .ok_or_else(|| bad("expected host:port"))?;
            if host.contains(':') {
                return Err(bad("IPv6 addresses must be written as [address]:port"));
            }
            if host.parse::<IpAddr>().is_err() && !is_hostname(host) {
                return Err(bad("invalid host"));
            }
            (host, port)
        };

        let port: u16 = port
            .parse()
            .map_err(|_| bad("port must be a number between 1 and 65535"))?;
        if port == 0 {
            return Err(bad("port must be a number between 1 and 65535"));
        }

        Ok(Self {
            host: host.to_ascii_lowercase(),
            port,
        })
    }

    pub fn localhost(port: u16) -> Result<Self, ValidationError> {
        Self::parse(&format!("localhost:{}", port))
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }
}

fn is_hostname(host: &str) -> bool {
    !host.is_empty()
        && host.len() <= HOSTNAME_MAX_LEN
        && host.split('.').all(|label| {
            !label.is_empty()
                && label.len() <= LABEL_MAX_LEN
                && !label.starts_with('-')
                && !label.ends_with('-')
                && label.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
        })
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

impl FromStr for Target {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for Target {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<Target> for String {
    fn from(value: Target) -> Self {
        value.to_string()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DeploymentState {
    /// Intent recorded, resources not (all) provisioned
    Pending,
    Active,
    /// Teardown started
    PendingDelete,
}

impl DeploymentState {
    pub fn can_transition_to(self, to: DeploymentState) -> bool {
        use DeploymentState::*;
        matches!(
            (self, to),
            (Pending, _) | (Active, _) | (PendingDelete, PendingDelete) | (PendingDelete, Pending)
        )
    }
}

impl fmt::Display for DeploymentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeploymentState::Pending => write!(f, "PENDING"),
            DeploymentState::Active => write!(f, "ACTIVE"),
            DeploymentState::PendingDelete => write!(f, "PENDING_DELETE"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Deployment {
    pub subdomain: Subdomain,
    pub target: Target,
    /// Provider id of the DNS record backing this deployment
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub record_id: Option<String>,
    pub proxied: bool,
    pub state: DeploymentState,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Deployment {
    pub fn new(subdomain: Subdomain, target: Target, proxied: bool) -> Self {
        let now = Utc::now();
        Self {
            subdomain,
            target,
            record_id: None,
            proxied,
            state: DeploymentState::Pending,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_active(&self) -> bool {
        self.state == DeploymentState::Active
    }

    /// Move to `to`. `Active` requires a record id.
    pub fn transition(&mut self, to: DeploymentState) -> Result<(), StateError> {
        let allowed = self.state.can_transition_to(to)
            && (to != DeploymentState::Active || self.record_id.is_some());
        if !allowed {
            return Err(StateError::InvalidTransition {
                subdomain: self.subdomain.to_string(),
                from: self.state,
                to,
            });
        }
        self.state = to;
        self.updated_at = Utc::now();
        Ok(())
    }
}
