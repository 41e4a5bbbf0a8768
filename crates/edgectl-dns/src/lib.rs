//! DNS record management
//!
//! A single [`DnsProvider`] capability with one implementation per vendor,
//! selected from configuration by [`create_provider`].

pub mod errors;
pub mod factory;
pub mod providers;
pub mod retry;

pub use errors::DnsError;
pub use factory::{create_provider, DnsProviderConfig};
pub use providers::*;
pub use retry::{RetryPolicy, RetryingProvider};
