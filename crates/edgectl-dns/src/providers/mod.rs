//! DNS provider implementations
//!
//! This module contains the DNS provider trait definitions and the
//! Cloudflare and DigitalOcean implementations.

pub mod cloudflare;
pub mod credentials;
pub mod digitalocean;
#[cfg(any(test, feature = "test-utils"))]
pub mod memory;
pub mod traits;

// Re-export commonly used types
pub use cloudflare::CloudflareProvider;
pub use credentials::{CloudflareCredentials, DigitalOceanCredentials, ProviderCredentials};
pub use digitalocean::DigitalOceanProvider;
#[cfg(any(test, feature = "test-utils"))]
pub use memory::{MemoryDnsProvider, Operation};
pub use traits::{
    DnsProvider, DnsProviderCapabilities, DnsProviderType, DnsRecord, DnsRecordType,
    RecordFilter, AUTOMATIC_TTL,
};
