//! Cloudflare DNS provider implementation
//!
//! Talks to the Cloudflare v4 REST API directly. Supports API tokens, the
//! legacy global API key, and split zone/DNS tokens.
//!
//! Create tokens at: https://dash.cloudflare.com/profile/api-tokens

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::OnceCell;
use tracing::{debug, info};

use super::credentials::CloudflareCredentials;
use super::traits::{
    DnsProvider, DnsProviderCapabilities, DnsProviderType, DnsRecord, DnsRecordType, RecordFilter,
};
use crate::errors::DnsError;

const CF_API_BASE: &str = "https://api.cloudflare.com/client/v4";
const PER_PAGE: u32 = 100;

/// "Record already exists" family of API error codes
const CONFLICT_CODES: &[i64] = &[81053, 81057, 81058];
const RECORD_MISSING_CODE: i64 = 81044;
const AUTH_ERROR_CODES: &[i64] = &[9103, 9109, 10000];

/// Which credential a request is made with when tokens are split
#[derive(Debug, Clone, Copy)]
enum Scope {
    Zone,
    Dns,
}

/// Cloudflare DNS provider
pub struct CloudflareProvider {
    client: Client,
    credentials: CloudflareCredentials,
    domain: String,
    base_url: String,
    zone_id: OnceCell<String>,
}

/// Cloudflare API response structures
#[derive(Debug, Deserialize)]
struct CfEnvelope<T> {
    success: bool,
    #[serde(default)]
    errors: Vec<CfMessage>,
    result: Option<T>,
    result_info: Option<CfResultInfo>,
}

#[derive(Debug, Default, Deserialize)]
struct CfErrorBody {
    #[serde(default)]
    errors: Vec<CfMessage>,
}

#[derive(Debug, Clone, Deserialize)]
struct CfMessage {
    code: i64,
    message: String,
}

#[derive(Debug, Deserialize)]
struct CfResultInfo {
    total_pages: u32,
}

#[derive(Debug, Deserialize)]
struct CfZone {
    id: String,
    name: String,
}

#[derive(Debug, Deserialize)]
struct CfRecord {
    id: String,
    #[serde(rename = "type")]
    record_type: String,
    name: String,
    content: String,
    #[serde(default)]
    proxied: bool,
    ttl: u32,
}

#[derive(Debug, Deserialize)]
struct CfDeleted {
    #[allow(dead_code)]
    id: String,
}

/// Request to create/update a DNS record
#[derive(Debug, Serialize)]
struct CfRecordBody<'a> {
    #[serde(rename = "type")]
    record_type: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    name: Option<&'a str>,
    content: &'a str,
    proxied: bool,
    ttl: u32,
}

impl CfRecord {
    fn into_record(self) -> Option<DnsRecord> {
        let record_type = DnsRecordType::from_api(&self.record_type)?;
        Some(DnsRecord {
            id: self.id,
            name: self.name,
            record_type,
            content: self.content,
            proxied: self.proxied,
            ttl: self.ttl,
        })
    }
}

impl CloudflareProvider {
    /// Create a new Cloudflare provider for `domain`
    pub fn new(
        credentials: CloudflareCredentials,
        domain: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, DnsError> {
        Self::build(credentials, domain.into(), timeout, CF_API_BASE.to_string())
    }

    /// Create a provider with a custom base URL (for testing)
    #[cfg(test)]
    pub fn with_base_url(
        credentials: CloudflareCredentials,
        domain: impl Into<String>,
        base_url: String,
    ) -> Result<Self, DnsError> {
        Self::build(credentials, domain.into(), Duration::from_secs(5), base_url)
    }

    fn build(
        credentials: CloudflareCredentials,
        domain: String,
        timeout: Duration,
        base_url: String,
    ) -> Result<Self, DnsError> {
        credentials.validate()?;

        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| DnsError::Network(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            credentials,
            domain,
            base_url,
            zone_id: OnceCell::new(),
        })
    }

    fn authorize(&self, request: RequestBuilder, scope: Scope) -> RequestBuilder {
        match (&self.credentials, scope) {
            (CloudflareCredentials::ApiToken { api_token }, _) => request.bearer_auth(api_token),
            (CloudflareCredentials::GlobalKey { email, api_key }, _) => request
                .header("X-Auth-Email", email)
                .header("X-Auth-Key", api_key),
            (CloudflareCredentials::ScopedTokens { zone_token, .. }, Scope::Zone) => {
                request.bearer_auth(zone_token)
            }
            (CloudflareCredentials::ScopedTokens { dns_token, .. }, Scope::Dns) => {
                request.bearer_auth(dns_token)
            }
        }
    }

    /// Send an authenticated request and unwrap the Cloudflare envelope
    async fn send<T: DeserializeOwned>(
        &self,
        request: RequestBuilder,
        scope: Scope,
        context: &str,
    ) -> Result<CfEnvelope<T>, DnsError> {
        let response = self.authorize(request, scope).send().await?;
        let status = response.status();
        let retry_after = response
            .headers()
            .get(reqwest::header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok())
            .map(Duration::from_secs);
        let body = response.text().await?;

        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(DnsError::RateLimited { retry_after });
        }

        if status.is_success() {
            let envelope: CfEnvelope<T> =
                serde_json::from_str(&body).map_err(|e| DnsError::Api {
                    status: status.as_u16(),
                    message: format!("Failed to parse response: {}", e),
                })?;
            if envelope.success {
                return Ok(envelope);
            }
            return Err(Self::classify(status, &envelope.errors, context, &body));
        }

        let errors = serde_json::from_str::<CfErrorBody>(&body)
            .unwrap_or_default()
            .errors;
        Err(Self::classify(status, &errors, context, &body))
    }

    /// Map an unsuccessful response onto the provider error taxonomy
    fn classify(status: StatusCode, errors: &[CfMessage], context: &str, body: &str) -> DnsError {
        let has_code = |codes: &[i64]| errors.iter().any(|e| codes.contains(&e.code));
        let message = if errors.is_empty() {
            body.chars().take(200).collect::<String>()
        } else {
            errors
                .iter()
                .map(|e| format!("{}: {}", e.code, e.message))
                .collect::<Vec<_>>()
                .join("; ")
        };

        if status == StatusCode::UNAUTHORIZED
            || status == StatusCode::FORBIDDEN
            || has_code(AUTH_ERROR_CODES)
        {
            DnsError::AuthFailed(message)
        } else if status == StatusCode::CONFLICT || has_code(CONFLICT_CODES) {
            DnsError::Conflict(context.to_string())
        } else if status == StatusCode::NOT_FOUND || has_code(&[RECORD_MISSING_CODE]) {
            DnsError::NotFound(context.to_string())
        } else {
            DnsError::Api {
                status: status.as_u16(),
                message,
            }
        }
    }

    /// Resolve and cache the zone id for the managed domain
    async fn zone_id(&self) -> Result<&str, DnsError> {
        let id = self
            .zone_id
            .get_or_try_init(|| async {
                let request = self
                    .client
                    .get(format!("{}/zones", self.base_url))
                    .query(&[("name", self.domain.as_str())]);
                let envelope: CfEnvelope<Vec<CfZone>> =
                    self.send(request, Scope::Zone, &self.domain).await?;

                let zone = envelope
                    .result
                    .unwrap_or_default()
                    .into_iter()
                    .find(|z| z.name.eq_ignore_ascii_case(&self.domain))
                    .ok_or_else(|| DnsError::ZoneNotFound(self.domain.clone()))?;

                debug!("Resolved Cloudflare zone {} -> {}", self.domain, zone.id);
                Ok::<_, DnsError>(zone.id)
            })
            .await?;
        Ok(id.as_str())
    }

    fn records_url(&self, zone_id: &str) -> String {
        format!("{}/zones/{}/dns_records", self.base_url, zone_id)
    }
}

#[async_trait]
impl DnsProvider for CloudflareProvider {
    fn provider_type(&self) -> DnsProviderType {
        DnsProviderType::Cloudflare
    }

    fn capabilities(&self) -> DnsProviderCapabilities {
        DnsProviderCapabilities {
            proxy: true,
            automatic_ttl: true,
        }
    }

    fn domain(&self) -> &str {
        &self.domain
    }

    async fn verify(&self) -> Result<(), DnsError> {
        let zone_id = self.zone_id().await?;
        let request = self
            .client
            .get(self.records_url(zone_id))
            .query(&[("per_page", "5")]);
        let _: CfEnvelope<Vec<CfRecord>> = self.send(request, Scope::Dns, "verify").await?;

        info!(
            "Cloudflare credentials ({}) can manage {}",
            self.credentials.mode(),
            self.domain
        );
        Ok(())
    }

    async fn find(&self, subdomain: &str) -> Result<Option<DnsRecord>, DnsError> {
        let records = self.list(&RecordFilter::by_name(self.fqdn(subdomain))).await?;
        Ok(records.into_iter().next())
    }

    async fn create(
        &self,
        subdomain: &str,
        record_type: DnsRecordType,
        content: &str,
        proxied: bool,
        ttl: u32,
    ) -> Result<DnsRecord, DnsError> {
        let zone_id = self.zone_id().await?;
        let fqdn = self.fqdn(subdomain);
        let body = CfRecordBody {
            record_type: record_type.as_str(),
            name: Some(&fqdn),
            content,
            proxied,
            ttl,
        };

        let request = self.client.post(self.records_url(zone_id)).json(&body);
        let envelope: CfEnvelope<CfRecord> = self.send(request, Scope::Dns, &fqdn).await?;
        let record = envelope
            .result
            .and_then(CfRecord::into_record)
            .ok_or_else(|| DnsError::Api {
                status: 200,
                message: format!("Cloudflare returned no record for {}", fqdn),
            })?;

        info!(
            "Created DNS record {} {} -> {} (id {}, proxied {})",
            record.record_type, record.name, record.content, record.id, record.proxied
        );
        Ok(record)
    }

    async fn update(
        &self,
        record_id: &str,
        content: &str,
        proxied: bool,
        ttl: u32,
    ) -> Result<DnsRecord, DnsError> {
        let zone_id = self.zone_id().await?;
        let body = CfRecordBody {
            record_type: DnsRecordType::for_content(content).as_str(),
            name: None,
            content,
            proxied,
            ttl,
        };

        let url = format!("{}/{}", self.records_url(zone_id), record_id);
        let request = self.client.patch(url).json(&body);
        let envelope: CfEnvelope<CfRecord> = self.send(request, Scope::Dns, record_id).await?;
        let record = envelope
            .result
            .and_then(CfRecord::into_record)
            .ok_or_else(|| DnsError::Api {
                status: 200,
                message: format!("Cloudflare returned no record for id {}", record_id),
            })?;

        info!(
            "Updated DNS record {} -> {} (id {}, proxied {})",
            record.name, record.content, record.id, record.proxied
        );
        Ok(record)
    }

    async fn delete(&self, record_id: &str) -> Result<bool, DnsError> {
        let zone_id = self.zone_id().await?;
        let url = format!("{}/{}", self.records_url(zone_id), record_id);

        match self
            .send::<CfDeleted>(self.client.delete(url), Scope::Dns, record_id)
            .await
        {
            Ok(_) => {
                info!("Deleted DNS record {} from {}", record_id, self.domain);
                Ok(true)
            }
            Err(DnsError::NotFound(_)) => {
                debug!("DNS record {} already absent", record_id);
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    async fn list(&self, filter: &RecordFilter) -> Result<Vec<DnsRecord>, DnsError> {
        let zone_id = self.zone_id().await?;
        let url = self.records_url(zone_id);
        let mut records = Vec::new();
        let mut page = 1u32;

        loop {
            let mut query = vec![
                ("page", page.to_string()),
                ("per_page", PER_PAGE.to_string()),
            ];
            if let Some(name) = &filter.name {
                query.push(("name", name.clone()));
            }
            if let [only] = filter.record_types.as_slice() {
                query.push(("type", only.to_string()));
            }

            let request = self.client.get(&url).query(&query);
            let envelope: CfEnvelope<Vec<CfRecord>> =
                self.send(request, Scope::Dns, "list records").await?;
            let total_pages = envelope
                .result_info
                .as_ref()
                .map(|info| info.total_pages)
                .unwrap_or(1);

            records.extend(
                envelope
                    .result
                    .unwrap_or_default()
                    .into_iter()
                    .filter_map(CfRecord::into_record)
                    .filter(|r| filter.matches(r)),
            );

            if page >= total_pages {
                break;
            }
            page += 1;
        }

        debug!("Listed {} DNS records in {}", records.len(), self.domain);
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn token() -> CloudflareCredentials {
        CloudflareCredentials::ApiToken {
            api_token: "test_token".to_string(),
        }
    }

    #[test]
    fn test_provider_type() {
        let provider = CloudflareProvider::new(token(), "example.com", Duration::from_secs(5))
            .unwrap();
        assert_eq!(provider.provider_type(), DnsProviderType::Cloudflare);
        assert_eq!(provider.fqdn("app"), "app.example.com");
    }

    #[test]
    fn test_capabilities() {
        let provider = CloudflareProvider::new(token(), "example.com", Duration::from_secs(5))
            .unwrap();
        let caps = provider.capabilities();
        assert!(caps.proxy);
        assert!(caps.automatic_ttl);
    }

    #[test]
    fn test_rejects_empty_credentials() {
        let creds = CloudflareCredentials::ApiToken {
            api_token: String::new(),
        };
        assert!(matches!(
            CloudflareProvider::new(creds, "example.com", Duration::from_secs(5)),
            Err(DnsError::InvalidCredentials(_))
        ));
    }

    #[test]
    fn test_classify_conflict_codes() {
        let errors = vec![CfMessage {
            code: 81057,
            message: "Record already exists.".to_string(),
        }];
        let err = CloudflareProvider::classify(
            StatusCode::BAD_REQUEST,
            &errors,
            "app.example.com",
            "",
        );
        assert!(matches!(err, DnsError::Conflict(name) if name == "app.example.com"));
    }

    #[test]
    fn test_classify_auth_and_not_found() {
        let err = CloudflareProvider::classify(StatusCode::FORBIDDEN, &[], "x", "denied");
        assert!(matches!(err, DnsError::AuthFailed(msg) if msg == "denied"));

        let errors = vec![CfMessage {
            code: 81044,
            message: "Record does not exist.".to_string(),
        }];
        let err = CloudflareProvider::classify(StatusCode::BAD_REQUEST, &errors, "rec1", "");
        assert!(matches!(err, DnsError::NotFound(_)));
    }

    #[test]
    fn test_classify_other_errors_keep_status() {
        let errors = vec![CfMessage {
            code: 1004,
            message: "DNS Validation Error".to_string(),
        }];
        let err = CloudflareProvider::classify(StatusCode::BAD_REQUEST, &errors, "x", "");
        match err {
            DnsError::Api { status, message } => {
                assert_eq!(status, 400);
                assert_eq!(message, "1004: DNS Validation Error");
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }
}
