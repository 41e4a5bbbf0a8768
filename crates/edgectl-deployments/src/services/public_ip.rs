//! Public address detection
//!
//! The DNS record of every deployment points at this host's public
//! address; the proxy does the port-level forwarding.

use async_trait::async_trait;
use reqwest::Client;
use std::net::IpAddr;
use std::time::Duration;
use tracing::{debug, info};

use crate::errors::PublicIpError;

/// Plain-text "what is my IP" endpoints, tried in order
pub const DEFAULT_IP_SERVICES: &[&str] = &[
    "https://api.ipify.org",
    "https://ipinfo.io/ip",
    "https://ifconfig.me/ip",
    "https://icanhazip.com",
];

const SERVICE_TIMEOUT: Duration = Duration::from_secs(5);

#[async_trait]
pub trait PublicIpResolver: Send + Sync {
    async fn resolve(&self) -> Result<IpAddr, PublicIpError>;
}

/// A fixed, operator-supplied address
#[derive(Debug, Clone, Copy)]
pub struct StaticIp(pub IpAddr);

#[async_trait]
impl PublicIpResolver for StaticIp {
    async fn resolve(&self) -> Result<IpAddr, PublicIpError> {
        Ok(self.0)
    }
}

pub struct HttpIpResolver {
    client: Client,
    services: Vec<String>,
}

impl HttpIpResolver {
    pub fn new() -> Result<Self, PublicIpError> {
        Self::with_services(
            DEFAULT_IP_SERVICES.iter().map(|s| s.to_string()).collect(),
            SERVICE_TIMEOUT,
        )
    }

    pub fn with_services(services: Vec<String>, timeout: Duration) -> Result<Self, PublicIpError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| PublicIpError::Client(e.to_string()))?;
        Ok(Self { client, services })
    }

    async fn query(&self, url: &str) -> Result<IpAddr, String> {
        let response = self.client.get(url).send().await.map_err(|e| e.to_string())?;
        if !response.status().is_success() {
            return Err(format!("HTTP {}", response.status()));
        }
        let body = response.text().await.map_err(|e| e.to_string())?;
        body.trim()
            .parse()
            .map_err(|_| format!("unexpected answer '{}'", body.trim()))
    }
}

#[async_trait]
impl PublicIpResolver for HttpIpResolver {
    async fn resolve(&self) -> Result<IpAddr, PublicIpError> {
        let mut failures = Vec::new();
        for url in &self.services {
            match self.query(url).await {
                Ok(ip) => {
                    info!("Detected public IP {} via {}", ip, url);
                    return Ok(ip);
                }
                Err(reason) => {
                    debug!("IP service {} failed: {}", url, reason);
                    failures.push(format!("{}: {}", url, reason));
                }
            }
        }
        Err(PublicIpError::Unavailable(failures.join("; ")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_static_ip() {
        let ip: IpAddr = "203.0.113.7".parse().unwrap();
        assert_eq!(StaticIp(ip).resolve().await.unwrap(), ip);
    }

    #[tokio::test]
    async fn test_falls_through_to_next_service() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/broken"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/garbage"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>"))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/ip"))
            .respond_with(ResponseTemplate::new(200).set_body_string("2001:db8::42\n"))
            .mount(&server)
            .await;

        let resolver = HttpIpResolver::with_services(
            vec![
                format!("{}/broken", server.uri()),
                format!("{}/garbage", server.uri()),
                format!("{}/ip", server.uri()),
            ],
            Duration::from_secs(2),
        )
        .unwrap();

        let ip = resolver.resolve().await.unwrap();
        assert_eq!(ip, "2001:db8::42".parse::<IpAddr>().unwrap());
    }

    #[tokio::test]
    async fn test_all_services_failing() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let resolver =
            HttpIpResolver::with_services(vec![server.uri()], Duration::from_secs(2)).unwrap();
        let err = resolver.resolve().await.unwrap_err();
        assert!(matches!(err, PublicIpError::Unavailable(msg) if msg.contains("503")));
    }
}
