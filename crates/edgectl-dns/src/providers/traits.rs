//! DNS provider trait definitions
//!
//! This module defines the capability every vendor implementation exposes.
//! Auth mode and zone are fixed when a provider is constructed, so every call
//! only names the record it operates on.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::net::IpAddr;

use crate::errors::DnsError;

/// TTL value meaning "let the provider decide"
pub const AUTOMATIC_TTL: u32 = 1;

/// Supported DNS provider types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DnsProviderType {
    /// Cloudflare DNS (API Token, Global API Key + Email, or Zone + DNS tokens)
    Cloudflare,
    /// DigitalOcean DNS (API Token)
    DigitalOcean,
    /// In-process records, used by tests
    Memory,
}

impl std::fmt::Display for DnsProviderType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DnsProviderType::Cloudflare => write!(f, "cloudflare"),
            DnsProviderType::DigitalOcean => write!(f, "digitalocean"),
            DnsProviderType::Memory => write!(f, "memory"),
        }
    }
}

impl DnsProviderType {
    pub fn from_str(s: &str) -> Result<Self, DnsError> {
        match s.to_lowercase().as_str() {
            "cloudflare" | "cf" => Ok(DnsProviderType::Cloudflare),
            "digitalocean" | "do" => Ok(DnsProviderType::DigitalOcean),
            "memory" => Ok(DnsProviderType::Memory),
            _ => Err(DnsError::InvalidProviderType(s.to_string())),
        }
    }
}

/// DNS record types managed by edgectl
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DnsRecordType {
    A,
    AAAA,
    CNAME,
}

impl std::fmt::Display for DnsRecordType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl DnsRecordType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DnsRecordType::A => "A",
            DnsRecordType::AAAA => "AAAA",
            DnsRecordType::CNAME => "CNAME",
        }
    }

    /// Parse a vendor type string; unmanaged types (TXT, MX, ...) yield `None`.
    pub fn from_api(s: &str) -> Option<Self> {
        match s.to_uppercase().as_str() {
            "A" => Some(DnsRecordType::A),
            "AAAA" => Some(DnsRecordType::AAAA),
            "CNAME" => Some(DnsRecordType::CNAME),
            _ => None,
        }
    }

    /// Record type implied by a content value: A for IPv4, AAAA for IPv6,
    /// CNAME for anything else.
    pub fn for_content(content: &str) -> Self {
        match content.parse::<IpAddr>() {
            Ok(IpAddr::V4(_)) => DnsRecordType::A,
            Ok(IpAddr::V6(_)) => DnsRecordType::AAAA,
            Err(_) => DnsRecordType::CNAME,
        }
    }
}

/// A DNS record as reported by the provider
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DnsRecord {
    /// Provider-assigned record id
    pub id: String,
    /// Fully qualified name (e.g., "app.example.com")
    pub name: String,
    #[serde(rename = "type")]
    pub record_type: DnsRecordType,
    /// IP address or CNAME target
    pub content: String,
    /// Routed through the provider's edge network
    pub proxied: bool,
    /// TTL in seconds, `AUTOMATIC_TTL` for provider default
    pub ttl: u32,
}

impl DnsRecord {
    /// Whether the record already carries the desired content and proxy flag.
    pub fn matches(&self, content: &str, proxied: bool) -> bool {
        self.content == content && self.proxied == proxied
    }
}

/// Capabilities of a DNS provider
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DnsProviderCapabilities {
    /// Supports proxying (like Cloudflare)
    pub proxy: bool,
    /// Accepts `AUTOMATIC_TTL`
    pub automatic_ttl: bool,
}

/// Restricts the records returned by [`DnsProvider::list`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecordFilter {
    /// Exact fully-qualified name
    pub name: Option<String>,
    /// Empty means every managed type
    pub record_types: Vec<DnsRecordType>,
}

impl RecordFilter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn by_name(fqdn: impl Into<String>) -> Self {
        Self {
            name: Some(fqdn.into()),
            record_types: Vec::new(),
        }
    }

    pub fn with_types(mut self, types: &[DnsRecordType]) -> Self {
        self.record_types = types.to_vec();
        self
    }

    pub fn matches(&self, record: &DnsRecord) -> bool {
        let name_ok = self
            .name
            .as_deref()
            .map(|n| n.eq_ignore_ascii_case(&record.name))
            .unwrap_or(true);
        let type_ok =
            self.record_types.is_empty() || self.record_types.contains(&record.record_type);
        name_ok && type_ok
    }
}

/// Core DNS provider trait
///
/// All DNS providers implement this trait to provide a unified interface
/// for managing the records of a single zone.
#[async_trait]
pub trait DnsProvider: Send + Sync {
    /// Get the provider type
    fn provider_type(&self) -> DnsProviderType;

    /// Get provider capabilities
    fn capabilities(&self) -> DnsProviderCapabilities;

    /// The zone apex this provider manages (e.g., "example.com")
    fn domain(&self) -> &str;

    /// Fully qualified name for `subdomain` inside the managed zone
    fn fqdn(&self, subdomain: &str) -> String {
        format!("{}.{}", subdomain, self.domain())
    }

    /// Check credentials and zone access without changing anything
    async fn verify(&self) -> Result<(), DnsError>;

    /// Look up the record for `subdomain` by exact name; `None` when absent.
    async fn find(&self, subdomain: &str) -> Result<Option<DnsRecord>, DnsError>;

    /// Create a record. Fails with `Conflict` if one with the same name and
    /// type exists; callers are expected to `find` first.
    async fn create(
        &self,
        subdomain: &str,
        record_type: DnsRecordType,
        content: &str,
        proxied: bool,
        ttl: u32,
    ) -> Result<DnsRecord, DnsError>;

    /// Update an existing record. Fails with `NotFound` if the id is gone.
    async fn update(
        &self,
        record_id: &str,
        content: &str,
        proxied: bool,
        ttl: u32,
    ) -> Result<DnsRecord, DnsError>;

    /// Delete a record; `Ok(false)` if it was already absent.
    async fn delete(&self, record_id: &str) -> Result<bool, DnsError>;

    /// Every managed record in the zone matching `filter`, across all pages.
    async fn list(&self, filter: &RecordFilter) -> Result<Vec<DnsRecord>, DnsError>;
}
