//! Bounded retry for rate-limited provider calls
//!
//! Only `DnsError::RateLimited` is retried. Every other error surfaces on the
//! first attempt.

use async_trait::async_trait;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

use crate::errors::DnsError;
use crate::providers::{
    DnsProvider, DnsProviderCapabilities, DnsProviderType, DnsRecord, DnsRecordType, RecordFilter,
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 500,
            max_delay_ms: 30_000,
        }
    }
}

impl RetryPolicy {
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    /// Exponential backoff with 0-10% jitter; `attempt` starts at 1.
    pub fn backoff(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::from_millis(0);
        }

        let exponential_base = 2u64.saturating_pow(attempt - 1);
        let delay_ms = self.base_delay_ms.saturating_mul(exponential_base);
        let capped_delay = delay_ms.min(self.max_delay_ms);

        let jitter_range = capped_delay / 10;
        let jitter = if jitter_range > 0 {
            rand::thread_rng().gen_range(0..jitter_range)
        } else {
            0
        };

        Duration::from_millis(capped_delay + jitter)
    }

    /// Delay before retry number `attempt`, preferring the provider's hint
    fn delay_for(&self, attempt: u32, retry_after: Option<Duration>) -> Duration {
        let max = Duration::from_millis(self.max_delay_ms);
        match retry_after {
            Some(hint) => hint.min(max),
            None => self.backoff(attempt),
        }
    }
}

/// Wraps a provider and retries rate-limited calls
pub struct RetryingProvider {
    inner: Arc<dyn DnsProvider>,
    policy: RetryPolicy,
}

impl RetryingProvider {
    pub fn new(inner: Arc<dyn DnsProvider>, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }

    async fn with_retry<T, F, Fut>(&self, operation: &str, mut call: F) -> Result<T, DnsError>
    where
        T: Send,
        F: FnMut() -> Fut + Send,
        Fut: Future<Output = Result<T, DnsError>> + Send,
    {
        let mut attempt = 0u32;
        loop {
            match call().await {
                Err(DnsError::RateLimited { retry_after }) if attempt < self.policy.max_retries => {
                    attempt += 1;
                    let delay = self.policy.delay_for(attempt, retry_after);
                    warn!(
                        "{} {} rate limited, retry {}/{} in {}ms",
                        self.inner.provider_type(),
                        operation,
                        attempt,
                        self.policy.max_retries,
                        delay.as_millis()
                    );
                    tokio::time::sleep(delay).await;
                }
                other => return other,
            }
        }
    }
}

#[async_trait]
impl DnsProvider for RetryingProvider {
    fn provider_type(&self) -> DnsProviderType {
        self.inner.provider_type()
    }

    fn capabilities(&self) -> DnsProviderCapabilities {
        self.inner.capabilities()
    }

    fn domain(&self) -> &str {
        self.inner.domain()
    }

    async fn verify(&self) -> Result<(), DnsError> {
        self.with_retry("verify", move || self.inner.verify()).await
    }

    async fn find(&self, subdomain: &str) -> Result<Option<DnsRecord>, DnsError> {
        self.with_retry("find", move || self.inner.find(subdomain))
            .await
    }

    async fn create(
        &self,
        subdomain: &str,
        record_type: DnsRecordType,
        content: &str,
        proxied: bool,
        ttl: u32,
    ) -> Result<DnsRecord, DnsError> {
        self.with_retry("create", move || {
            self.inner
                .create(subdomain, record_type, content, proxied, ttl)
        })
        .await
    }

    async fn update(
        &self,
        record_id: &str,
        content: &str,
        proxied: bool,
        ttl: u32,
    ) -> Result<DnsRecord, DnsError> {
        self.with_retry("update", move || {
            self.inner.update(record_id, content, proxied, ttl)
        })
        .await
    }

    async fn delete(&self, record_id: &str) -> Result<bool, DnsError> {
        self.with_retry("delete", move || self.inner.delete(record_id))
            .await
    }

    async fn list(&self, filter: &RecordFilter) -> Result<Vec<DnsRecord>, DnsError> {
        self.with_retry("list", move || self.inner.list(filter)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::{MemoryDnsProvider, Operation};

    fn fast_policy(max_retries: u32) -> RetryPolicy {
        RetryPolicy {
            max_retries,
            base_delay_ms: 1,
            max_delay_ms: 5,
        }
    }

    #[test]
    fn test_backoff_grows_and_caps() {
        let policy = RetryPolicy {
            max_retries: 5,
            base_delay_ms: 100,
            max_delay_ms: 1000,
        };
        assert_eq!(policy.backoff(0), Duration::from_millis(0));
        assert!(policy.backoff(1) >= Duration::from_millis(100));
        assert!(policy.backoff(2) >= Duration::from_millis(200));
        let capped = policy.backoff(10);
        assert!(capped >= Duration::from_millis(1000));
        assert!(capped < Duration::from_millis(1100));
    }

    #[test]
    fn test_retry_after_hint_is_capped() {
        let policy = fast_policy(1);
        assert_eq!(
            policy.delay_for(1, Some(Duration::from_secs(60))),
            Duration::from_millis(5)
        );
    }

    #[tokio::test]
    async fn test_rate_limited_call_is_retried() {
        let memory = Arc::new(MemoryDnsProvider::new("example.com"));
        memory.fail_next(Operation::Find, DnsError::RateLimited { retry_after: None });
        memory.fail_next(Operation::Find, DnsError::RateLimited { retry_after: None });

        let provider = RetryingProvider::new(memory.clone(), fast_policy(3));
        assert!(provider.find("app").await.unwrap().is_none());
        assert_eq!(memory.call_count(Operation::Find), 3);
    }

    #[tokio::test]
    async fn test_retries_are_bounded() {
        let memory = Arc::new(MemoryDnsProvider::new("example.com"));
        for _ in 0..3 {
            memory.fail_next(
                Operation::Delete,
                DnsError::RateLimited {
                    retry_after: Some(Duration::from_millis(1)),
                },
            );
        }

        let provider = RetryingProvider::new(memory.clone(), fast_policy(2));
        let err = provider.delete("rec-1").await.unwrap_err();
        assert!(matches!(err, DnsError::RateLimited { .. }));
        assert_eq!(memory.call_count(Operation::Delete), 3);
    }

    #[tokio::test]
    async fn test_other_errors_are_not_retried() {
        let memory = Arc::new(MemoryDnsProvider::new("example.com"));
        memory.fail_next(Operation::Create, DnsError::Network("reset".into()));

        let provider = RetryingProvider::new(memory.clone(), fast_policy(3));
        let err = provider
            .create("app", DnsRecordType::A, "203.0.113.9", false, 1)
            .await
            .unwrap_err();
        assert!(matches!(err, DnsError::Network(_)));
        assert_eq!(memory.call_count(Operation::Create), 1);
    }
}
