//! In-memory DNS provider for tests
//!
//! Behaves like a real zone (ids, conflicts, idempotent delete) and lets a
//! test queue failures for specific operations.

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};

use super::traits::{
    DnsProvider, DnsProviderCapabilities, DnsProviderType, DnsRecord, DnsRecordType,
    RecordFilter,
};
use crate::errors::DnsError;

/// Provider operations that can be observed or made to fail
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Verify,
    Find,
    Create,
    Update,
    Delete,
    List,
}

#[derive(Default)]
struct MemoryState {
    records: BTreeMap<String, DnsRecord>,
    next_id: u64,
    failures: HashMap<Operation, VecDeque<DnsError>>,
    calls: HashMap<Operation, usize>,
}

pub struct MemoryDnsProvider {
    domain: String,
    capabilities: DnsProviderCapabilities,
    state: Mutex<MemoryState>,
}

impl MemoryDnsProvider {
    /// A zone whose provider supports proxying, like Cloudflare
    pub fn new(domain: impl Into<String>) -> Self {
        Self {
            domain: domain.into(),
            capabilities: DnsProviderCapabilities {
                proxy: true,
                automatic_ttl: true,
            },
            state: Mutex::new(MemoryState::default()),
        }
    }

    /// A zone without edge proxying, like DigitalOcean
    pub fn without_proxy(domain: impl Into<String>) -> Self {
        let mut provider = Self::new(domain);
        provider.capabilities.proxy = false;
        provider
    }

    fn state(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Make the next call to `operation` fail with `error`
    pub fn fail_next(&self, operation: Operation, error: DnsError) {
        self.state()
            .failures
            .entry(operation)
            .or_default()
            .push_back(error);
    }

    pub fn call_count(&self, operation: Operation) -> usize {
        self.state().calls.get(&operation).copied().unwrap_or(0)
    }

    pub fn records(&self) -> Vec<DnsRecord> {
        self.state().records.values().cloned().collect()
    }

    pub fn get(&self, record_id: &str) -> Option<DnsRecord> {
        self.state().records.get(record_id).cloned()
    }

    /// Add a record directly, as if created outside edgectl
    pub fn seed(&self, name: &str, record_type: DnsRecordType, content: &str) -> DnsRecord {
        let mut state = self.state();
        state.next_id += 1;
        let record = DnsRecord {
            id: format!("seed-{}", state.next_id),
            name: name.to_string(),
            record_type,
            content: content.to_string(),
            proxied: false,
            ttl: 300,
        };
        state.records.insert(record.id.clone(), record.clone());
        record
    }

    /// Count the call and pop a queued failure, if any
    fn enter(&self, operation: Operation) -> Result<MutexGuard<'_, MemoryState>, DnsError> {
        let mut state = self.state();
        *state.calls.entry(operation).or_default() += 1;
        if let Some(error) = state
            .failures
            .get_mut(&operation)
            .and_then(|queue| queue.pop_front())
        {
            return Err(error);
        }
        Ok(state)
    }
}

#[async_trait]
impl DnsProvider for MemoryDnsProvider {
    fn provider_type(&self) -> DnsProviderType {
        DnsProviderType::Memory
    }

    fn capabilities(&self) -> DnsProviderCapabilities {
        self.capabilities.clone()
    }

    fn domain(&self) -> &str {
        &self.domain
    }

    async fn verify(&self) -> Result<(), DnsError> {
        self.enter(Operation::Verify).map(|_| ())
    }

    async fn find(&self, subdomain: &str) -> Result<Option<DnsRecord>, DnsError> {
        let fqdn = self.fqdn(subdomain);
        let state = self.enter(Operation::Find)?;
        let filter = RecordFilter::by_name(fqdn);
        Ok(state.records.values().find(|r| filter.matches(r)).cloned())
    }

    async fn create(
        &self,
        subdomain: &str,
        record_type: DnsRecordType,
        content: &str,
        proxied: bool,
        ttl: u32,
    ) -> Result<DnsRecord, DnsError> {
        let fqdn = self.fqdn(subdomain);
        let proxied = proxied && self.capabilities.proxy;
        let mut state = self.enter(Operation::Create)?;

        if state
            .records
            .values()
            .any(|r| r.name.eq_ignore_ascii_case(&fqdn) && r.record_type == record_type)
        {
            return Err(DnsError::Conflict(fqdn));
        }

        state.next_id += 1;
        let record = DnsRecord {
            id: format!("rec-{}", state.next_id),
            name: fqdn,
            record_type,
            content: content.to_string(),
            proxied,
            ttl,
        };
        state.records.insert(record.id.clone(), record.clone());
        Ok(record)
    }

    async fn update(
        &self,
        record_id: &str,
        content: &str,
        proxied: bool,
        ttl: u32,
    ) -> Result<DnsRecord, DnsError> {
        let proxied = proxied && self.capabilities.proxy;
        let mut state = self.enter(Operation::Update)?;
        let record = state
            .records
            .get_mut(record_id)
            .ok_or_else(|| DnsError::NotFound(record_id.to_string()))?;

        record.record_type = DnsRecordType::for_content(content);
        record.content = content.to_string();
        record.proxied = proxied;
        record.ttl = ttl;
        Ok(record.clone())
    }

    async fn delete(&self, record_id: &str) -> Result<bool, DnsError> {
        let mut state = self.enter(Operation::Delete)?;
        Ok(state.records.remove(record_id).is_some())
    }

    async fn list(&self, filter: &RecordFilter) -> Result<Vec<DnsRecord>, DnsError> {
        let state = self.enter(Operation::List)?;
        Ok(state
            .records
            .values()
            .filter(|r| filter.matches(r))
            .cloned()
            .collect())
    }
}
