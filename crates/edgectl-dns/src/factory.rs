//! Provider construction from configuration

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use crate::errors::DnsError;
use crate::providers::{CloudflareProvider, DigitalOceanProvider, DnsProvider, ProviderCredentials};
use crate::retry::{RetryPolicy, RetryingProvider};

/// Everything needed to build a provider for one zone
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DnsProviderConfig {
    pub credentials: ProviderCredentials,
    /// Zone apex, e.g. "example.com"
    pub domain: String,
    pub request_timeout: Duration,
    pub retry: RetryPolicy,
}

/// Build the provider selected by `config`, wrapped in rate-limit retries.
pub fn create_provider(config: &DnsProviderConfig) -> Result<Arc<dyn DnsProvider>, DnsError> {
    if config.domain.trim().is_empty() {
        return Err(DnsError::Validation("domain must not be empty".to_string()));
    }
    config.credentials.validate()?;

    let provider: Arc<dyn DnsProvider> = match &config.credentials {
        ProviderCredentials::Cloudflare(creds) => {
            info!(
                "Using Cloudflare {} authentication for {}",
                creds.mode(),
                config.domain
            );
            Arc::new(CloudflareProvider::new(
                creds.clone(),
                config.domain.clone(),
                config.request_timeout,
            )?)
        }
        ProviderCredentials::DigitalOcean(creds) => {
            info!("Using DigitalOcean DNS for {}", config.domain);
            Arc::new(DigitalOceanProvider::new(
                creds.clone(),
                config.domain.clone(),
                config.request_timeout,
            )?)
        }
    };

    if config.retry.max_retries == 0 {
        return Ok(provider);
    }
    Ok(Arc::new(RetryingProvider::new(provider, config.retry.clone())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::{CloudflareCredentials, DigitalOceanCredentials, DnsProviderType};

    fn config(credentials: ProviderCredentials) -> DnsProviderConfig {
        DnsProviderConfig {
            credentials,
            domain: "example.com".to_string(),
            request_timeout: Duration::from_secs(10),
            retry: RetryPolicy::default(),
        }
    }

    #[test]
    fn test_create_cloudflare_provider() {
        let provider = create_provider(&config(ProviderCredentials::Cloudflare(
            CloudflareCredentials::ApiToken {
                api_token: "token".to_string(),
            },
        )))
        .unwrap();
        assert_eq!(provider.provider_type(), DnsProviderType::Cloudflare);
        assert_eq!(provider.domain(), "example.com");
        assert!(provider.capabilities().proxy);
    }

    #[test]
    fn test_create_digitalocean_provider() {
        let provider = create_provider(&config(ProviderCredentials::DigitalOcean(
            DigitalOceanCredentials {
                api_token: "token".to_string(),
            },
        )))
        .unwrap();
        assert_eq!(provider.provider_type(), DnsProviderType::DigitalOcean);
        assert!(!provider.capabilities().proxy);
    }

    #[test]
    fn test_rejects_missing_domain_and_credentials() {
        let mut cfg = config(ProviderCredentials::Cloudflare(
            CloudflareCredentials::ApiToken {
                api_token: "token".to_string(),
            },
        ));
        cfg.domain = String::new();
        assert!(matches!(create_provider(&cfg), Err(DnsError::Validation(_))));

        let cfg = config(ProviderCredentials::Cloudflare(
            CloudflareCredentials::ApiToken {
                api_token: String::new(),
            },
        ));
        assert!(matches!(
            create_provider(&cfg),
            Err(DnsError::InvalidCredentials(_))
        ));
    }
}
