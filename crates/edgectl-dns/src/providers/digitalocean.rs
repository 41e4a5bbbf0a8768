//! DigitalOcean DNS provider implementation
//!
//! This provider uses the DigitalOcean API to manage DNS records.
//! It requires a Personal Access Token with read/write scope.
//! DigitalOcean has no edge proxy, so records are always DNS-only.
//!
//! Create token at: https://cloud.digitalocean.com/account/api/tokens

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info, warn};

use super::credentials::DigitalOceanCredentials;
use super::traits::{
    DnsProvider, DnsProviderCapabilities, DnsProviderType, DnsRecord, DnsRecordType,
    RecordFilter, AUTOMATIC_TTL,
};
use crate::errors::DnsError;

const DO_API_BASE: &str = "https://api.digitalocean.com/v2";
const PER_PAGE: u32 = 200;
/// DigitalOcean's default TTL, used when the caller asks for automatic
const DEFAULT_TTL: u32 = 1800;
const MIN_TTL: u32 = 30;

/// DigitalOcean DNS provider
pub struct DigitalOceanProvider {
    client: Client,
    credentials: DigitalOceanCredentials,
    domain: String,
    base_url: String,
}

/// DigitalOcean API response structures
#[derive(Debug, Deserialize)]
struct DomainResponse {
    domain: DoDomain,
}

#[derive(Debug, Deserialize)]
struct DoDomain {
    name: String,
}

#[derive(Debug, Deserialize)]
struct DomainRecordsResponse {
    domain_records: Vec<DoDomainRecord>,
    #[serde(default)]
    links: DoLinks,
}

#[derive(Debug, Default, Deserialize)]
struct DoLinks {
    #[serde(default)]
    pages: Option<DoPages>,
}

#[derive(Debug, Deserialize)]
struct DoPages {
    next: Option<String>,
}

#[derive(Debug, Deserialize)]
struct DomainRecordResponse {
    domain_record: DoDomainRecord,
}

#[derive(Debug, Clone, Deserialize)]
struct DoDomainRecord {
    id: i64,
    #[serde(rename = "type")]
    record_type: String,
    name: String,
    data: String,
    ttl: u32,
}

/// Request to create/update a domain record
#[derive(Debug, Serialize)]
struct RecordRequest<'a> {
    #[serde(rename = "type")]
    record_type: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    name: Option<&'a str>,
    data: String,
    ttl: u32,
}

#[derive(Debug, Deserialize)]
struct DoErrorResponse {
    id: String,
    message: String,
}

impl DigitalOceanProvider {
    /// Create a new DigitalOcean provider with the given credentials
    pub fn new(
        credentials: DigitalOceanCredentials,
        domain: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, DnsError> {
        Self::build(credentials, domain.into(), timeout, DO_API_BASE.to_string())
    }

    /// Create a provider with a custom base URL (for testing)
    #[cfg(test)]
    pub fn with_base_url(
        credentials: DigitalOceanCredentials,
        domain: impl Into<String>,
        base_url: String,
    ) -> Result<Self, DnsError> {
        Self::build(credentials, domain.into(), Duration::from_secs(5), base_url)
    }

    fn build(
        credentials: DigitalOceanCredentials,
        domain: String,
        timeout: Duration,
        base_url: String,
    ) -> Result<Self, DnsError> {
        if credentials.api_token.is_empty() {
            return Err(DnsError::InvalidCredentials(
                "DigitalOcean api_token is empty".to_string(),
            ));
        }

        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| DnsError::Network(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            credentials,
            domain,
            base_url,
        })
    }

    fn records_path(&self) -> String {
        format!("{}/domains/{}/records", self.base_url, self.domain)
    }

    /// Make an authenticated request to DigitalOcean API
    async fn api_request<T: DeserializeOwned>(
        &self,
        request: RequestBuilder,
        context: &str,
    ) -> Result<T, DnsError> {
        let body = self.execute(request, context).await?;
        serde_json::from_str(&body).map_err(|e| DnsError::Api {
            status: 200,
            message: format!("Failed to parse response: {} - Body: {}", e, body),
        })
    }

    /// Send the request, returning the raw body on success
    async fn execute(&self, request: RequestBuilder, context: &str) -> Result<String, DnsError> {
        let response = request
            .bearer_auth(&self.credentials.api_token)
            .header("Content-Type", "application/json")
            .send()
            .await?;

        let status = response.status();
        let retry_after = response
            .headers()
            .get(reqwest::header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok())
            .map(Duration::from_secs);
        let body = response.text().await?;

        if status.is_success() {
            return Ok(body);
        }

        let (error_id, message) = match serde_json::from_str::<DoErrorResponse>(&body) {
            Ok(error) => (error.id, error.message),
            Err(_) => (String::new(), body.clone()),
        };

        Err(match status {
            StatusCode::TOO_MANY_REQUESTS => DnsError::RateLimited { retry_after },
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => DnsError::AuthFailed(message),
            StatusCode::NOT_FOUND => DnsError::NotFound(context.to_string()),
            StatusCode::CONFLICT => DnsError::Conflict(context.to_string()),
            StatusCode::UNPROCESSABLE_ENTITY if message.to_lowercase().contains("already") => {
                DnsError::Conflict(context.to_string())
            }
            _ => DnsError::Api {
                status: status.as_u16(),
                message: if error_id.is_empty() {
                    message
                } else {
                    format!("{} ({})", message, error_id)
                },
            },
        })
    }

    /// Convert DigitalOcean record to our DnsRecord type
    fn convert_record(record: DoDomainRecord, domain: &str) -> Option<DnsRecord> {
        let record_type = DnsRecordType::from_api(&record.record_type)?;

        let name = if record.name == "@" {
            domain.to_string()
        } else {
            format!("{}.{}", record.name, domain)
        };

        let content = match record_type {
            DnsRecordType::CNAME => record.data.trim_end_matches('.').to_string(),
            _ => record.data,
        };

        Some(DnsRecord {
            id: record.id.to_string(),
            name,
            record_type,
            content,
            proxied: false,
            ttl: record.ttl,
        })
    }

    fn effective_ttl(ttl: u32) -> u32 {
        if ttl == AUTOMATIC_TTL {
            DEFAULT_TTL
        } else {
            ttl.max(MIN_TTL)
        }
    }

    fn record_data(record_type: DnsRecordType, content: &str) -> String {
        match record_type {
            DnsRecordType::CNAME => format!("{}.", content.trim_end_matches('.')),
            _ => content.to_string(),
        }
    }

    fn warn_if_proxied(proxied: bool) {
        if proxied {
            warn!("DigitalOcean does not proxy traffic; creating a DNS-only record");
        }
    }
}

#[async_trait]
impl DnsProvider for DigitalOceanProvider {
    fn provider_type(&self) -> DnsProviderType {
        DnsProviderType::DigitalOcean
    }

    fn capabilities(&self) -> DnsProviderCapabilities {
        DnsProviderCapabilities {
            proxy: false,
            automatic_ttl: false,
        }
    }

    fn domain(&self) -> &str {
        &self.domain
    }

    async fn verify(&self) -> Result<(), DnsError> {
        let url = format!("{}/domains/{}", self.base_url, self.domain);
        let response: DomainResponse = match self.api_request(self.client.get(url), &self.domain).await
        {
            Err(DnsError::NotFound(_)) => return Err(DnsError::ZoneNotFound(self.domain.clone())),
            other => other?,
        };

        info!(
            "DigitalOcean API connection test successful for {}",
            response.domain.name
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
        Self::warn_if_proxied(proxied);
        let fqdn = self.fqdn(subdomain);
        let body = RecordRequest {
            record_type: record_type.as_str(),
            name: Some(subdomain),
            data: Self::record_data(record_type, content),
            ttl: Self::effective_ttl(ttl),
        };

        let response: DomainRecordResponse = self
            .api_request(self.client.post(self.records_path()).json(&body), &fqdn)
            .await?;
        let record = Self::convert_record(response.domain_record, &self.domain).ok_or_else(|| {
            DnsError::Api {
                status: 200,
                message: "Failed to convert created record".to_string(),
            }
        })?;

        info!(
            "Created DNS record {} {} -> {} (id {})",
            record.record_type, record.name, record.content, record.id
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
        Self::warn_if_proxied(proxied);
        let record_type = DnsRecordType::for_content(content);
        let body = RecordRequest {
            record_type: record_type.as_str(),
            name: None,
            data: Self::record_data(record_type, content),
            ttl: Self::effective_ttl(ttl),
        };

        let url = format!("{}/{}", self.records_path(), record_id);
        let response: DomainRecordResponse = self
            .api_request(self.client.patch(url).json(&body), record_id)
            .await?;
        let record = Self::convert_record(response.domain_record, &self.domain).ok_or_else(|| {
            DnsError::Api {
                status: 200,
                message: "Failed to convert updated record".to_string(),
            }
        })?;

        info!(
            "Updated DNS record {} -> {} (id {})",
            record.name, record.content, record.id
        );
        Ok(record)
    }

    async fn delete(&self, record_id: &str) -> Result<bool, DnsError> {
        let url = format!("{}/{}", self.records_path(), record_id);
        match self.execute(self.client.delete(url), record_id).await {
            Ok(_) => {
                info!("Deleted DNS record {} from domain {}", record_id, self.domain);
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

            let response: DomainRecordsResponse = self
                .api_request(
                    self.client.get(self.records_path()).query(&query),
                    &self.domain,
                )
                .await?;

            records.extend(
                response
                    .domain_records
                    .into_iter()
                    .filter_map(|r| Self::convert_record(r, &self.domain))
                    .filter(|r| filter.matches(r)),
            );

            let has_next = response
                .links
                .pages
                .as_ref()
                .and_then(|p| p.next.as_ref())
                .is_some();
            if !has_next {
                break;
            }
            page += 1;
        }

        debug!("Listed {} DNS records in {}", records.len(), self.domain);
        Ok(records)
    }
}
