//! DNS provider credentials
//!
//! Credential structures for each supported provider, plus the environment
//! variables the reverse proxy's DNS-challenge module reads the same secrets
//! from.

use serde::{Deserialize, Serialize};

use super::traits::DnsProviderType;
use crate::errors::DnsError;

/// Cloudflare credentials
///
/// Cloudflare supports three authentication methods:
/// 1. API Token (recommended) - Scoped token with Zone:DNS:Edit
/// 2. Global API Key + Email (legacy)
/// 3. Zone token + DNS token - least privilege split between zone lookup
///    (Zone:Read) and record edits (DNS:Edit)
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "auth", rename_all = "snake_case")]
pub enum CloudflareCredentials {
    ApiToken { api_token: String },
    GlobalKey { email: String, api_key: String },
    ScopedTokens { zone_token: String, dns_token: String },
}

impl std::fmt::Debug for CloudflareCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CloudflareCredentials::ApiToken { .. } => f.write_str("ApiToken(***)"),
            CloudflareCredentials::GlobalKey { email, .. } => {
                write!(f, "GlobalKey({}, ***)", email)
            }
            CloudflareCredentials::ScopedTokens { .. } => f.write_str("ScopedTokens(***, ***)"),
        }
    }
}

impl CloudflareCredentials {
    /// Human readable auth mode
    pub fn mode(&self) -> &'static str {
        match self {
            CloudflareCredentials::ApiToken { .. } => "API token",
            CloudflareCredentials::GlobalKey { .. } => "global API key",
            CloudflareCredentials::ScopedTokens { .. } => "zone and DNS tokens",
        }
    }

    pub fn validate(&self) -> Result<(), DnsError> {
        let missing = match self {
            CloudflareCredentials::ApiToken { api_token } if api_token.is_empty() => {
                Some("api_token")
            }
            CloudflareCredentials::GlobalKey { email, .. } if email.is_empty() => Some("email"),
            CloudflareCredentials::GlobalKey { api_key, .. } if api_key.is_empty() => {
                Some("api_key")
            }
            CloudflareCredentials::ScopedTokens { zone_token, .. } if zone_token.is_empty() => {
                Some("zone_token")
            }
            CloudflareCredentials::ScopedTokens { dns_token, .. } if dns_token.is_empty() => {
                Some("dns_token")
            }
            _ => None,
        };
        match missing {
            Some(field) => Err(DnsError::InvalidCredentials(format!(
                "Cloudflare {} is empty",
                field
            ))),
            None => Ok(()),
        }
    }
}

/// DigitalOcean credentials
///
/// DigitalOcean uses a simple API token for authentication.
/// Create at: https://cloud.digitalocean.com/account/api/tokens
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DigitalOceanCredentials {
    /// Personal Access Token with read/write scope
    pub api_token: String,
}

impl std::fmt::Debug for DigitalOceanCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("DigitalOceanCredentials(***)")
    }
}

/// Unified provider credentials enum
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ProviderCredentials {
    Cloudflare(CloudflareCredentials),
    DigitalOcean(DigitalOceanCredentials),
}

impl ProviderCredentials {
    pub fn provider_type(&self) -> DnsProviderType {
        match self {
            ProviderCredentials::Cloudflare(_) => DnsProviderType::Cloudflare,
            ProviderCredentials::DigitalOcean(_) => DnsProviderType::DigitalOcean,
        }
    }

    pub fn validate(&self) -> Result<(), DnsError> {
        match self {
            ProviderCredentials::Cloudflare(creds) => creds.validate(),
            ProviderCredentials::DigitalOcean(creds) if creds.api_token.is_empty() => Err(
                DnsError::InvalidCredentials("DigitalOcean api_token is empty".to_string()),
            ),
            ProviderCredentials::DigitalOcean(_) => Ok(()),
        }
    }

    /// Name of the proxy's DNS-challenge module for this provider
    pub fn challenge_module(&self) -> &'static str {
        match self {
            ProviderCredentials::Cloudflare(_) => "cloudflare",
            ProviderCredentials::DigitalOcean(_) => "digitalocean",
        }
    }

    /// Environment variables the DNS-challenge module reads, in the order its
    /// directive expects them, with their secret values.
    pub fn challenge_env(&self) -> Vec<(&'static str, String)> {
        match self {
            ProviderCredentials::Cloudflare(CloudflareCredentials::ApiToken { api_token }) => {
                vec![("CLOUDFLARE_API_TOKEN", api_token.clone())]
            }
            ProviderCredentials::Cloudflare(CloudflareCredentials::GlobalKey {
                email,
                api_key,
            }) => vec![
                ("CLOUDFLARE_API_KEY", api_key.clone()),
                ("CLOUDFLARE_EMAIL", email.clone()),
            ],
            ProviderCredentials::Cloudflare(CloudflareCredentials::ScopedTokens {
                dns_token,
                ..
            }) => vec![("CLOUDFLARE_DNS_TOKEN", dns_token.clone())],
            ProviderCredentials::DigitalOcean(creds) => {
                vec![("DO_AUTH_TOKEN", creds.api_token.clone())]
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_credentials_tagged_shape() {
        let creds: ProviderCredentials = serde_json::from_value(serde_json::json!({
            "type": "cloudflare",
            "auth": "scoped_tokens",
            "zone_token": "z",
            "dns_token": "d"
        }))
        .unwrap();
        assert_eq!(
            creds,
            ProviderCredentials::Cloudflare(CloudflareCredentials::ScopedTokens {
                zone_token: "z".to_string(),
                dns_token: "d".to_string(),
            })
        );
    }

    #[test]
    fn test_debug_masks_secrets() {
        let creds = CloudflareCredentials::GlobalKey {
            email: "ops@example.com".to_string(),
            api_key: "super-secret-key".to_string(),
        };
        let debug = format!("{:?}", creds);
        assert!(debug.contains("ops@example.com"));
        assert!(!debug.contains("super-secret-key"));

        let creds = DigitalOceanCredentials {
            api_token: "dop_v1_secret".to_string(),
        };
        assert!(!format!("{:?}", creds).contains("dop_v1_secret"));
    }

    #[test]
    fn test_validate_rejects_empty_fields() {
        let creds = ProviderCredentials::Cloudflare(CloudflareCredentials::GlobalKey {
            email: "ops@example.com".to_string(),
            api_key: String::new(),
        });
        assert!(matches!(
            creds.validate(),
            Err(DnsError::InvalidCredentials(msg)) if msg.contains("api_key")
        ));

        let creds = ProviderCredentials::DigitalOcean(DigitalOceanCredentials {
            api_token: String::new(),
        });
        assert!(creds.validate().is_err());
    }

    #[test]
    fn test_challenge_env_per_auth_mode() {
        let token = ProviderCredentials::Cloudflare(CloudflareCredentials::ApiToken {
            api_token: "t".to_string(),
        });
        assert_eq!(token.challenge_module(), "cloudflare");
        assert_eq!(
            token.challenge_env(),
            vec![("CLOUDFLARE_API_TOKEN", "t".to_string())]
        );

        let global = ProviderCredentials::Cloudflare(CloudflareCredentials::GlobalKey {
            email: "e".to_string(),
            api_key: "k".to_string(),
        });
        let names: Vec<_> = global.challenge_env().into_iter().map(|(n, _)| n).collect();
        assert_eq!(names, vec!["CLOUDFLARE_API_KEY", "CLOUDFLARE_EMAIL"]);

        let scoped = ProviderCredentials::Cloudflare(CloudflareCredentials::ScopedTokens {
            zone_token: "z".to_string(),
            dns_token: "d".to_string(),
        });
        assert_eq!(
            scoped.challenge_env(),
            vec![("CLOUDFLARE_DNS_TOKEN", "d".to_string())]
        );

        let digitalocean = ProviderCredentials::DigitalOcean(DigitalOceanCredentials {
            api_token: "x".to_string(),
        });
        assert_eq!(digitalocean.challenge_module(), "digitalocean");
        assert_eq!(digitalocean.challenge_env()[0].0, "DO_AUTH_TOKEN");
    }
}
