//! Reconciliation of a deployment's DNS record, proxy configuration and
//! proxy process with the declared intent

use chrono::Utc;
use edgectl_core::{AtomicFile, FileError, FileLock};
use edgectl_dns::{DnsProvider, DnsRecord, DnsRecordType, RecordFilter};
use edgectl_proxy::{
    ConfigRenderer, GlobalSettings, ProcessController, ProcessError, ProxyDocument, SiteConfig,
    TlsCredentialsRef,
};
use std::collections::HashSet;
use std::net::IpAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use super::public_ip::PublicIpResolver;
use super::store::DeploymentStore;
use crate::errors::{
    ReconcileError, Resource, ResourceError, ResourceReport, ResourceState, TeardownError,
    ValidationError,
};
use crate::model::{Deployment, DeploymentState, Subdomain, Target};

const LISTED_TYPES: &[DnsRecordType] = &[
    DnsRecordType::A,
    DnsRecordType::AAAA,
    DnsRecordType::CNAME,
];

#[derive(Debug, Clone)]
pub struct EngineSettings {
    /// TTL for created records, `AUTOMATIC_TTL` for the provider default
    pub ttl: u32,
    pub global: GlobalSettings,
    /// How the proxy obtains DNS-challenge credentials
    pub tls: TlsCredentialsRef,
    /// Scratch file a new document is written to before the controller
    /// validates and promotes it
    pub candidate_path: PathBuf,
    /// Held from reading the live document until it is replaced
    pub document_lock: PathBuf,
    /// Bounds the wait for another invocation's deploy or teardown
    pub lock_timeout: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeployRequest {
    pub subdomain: String,
    pub target: String,
    /// Route through the provider's edge network when it has one
    pub proxied: bool,
    /// Replace an existing mapping or adopt an unmanaged record
    pub overwrite: bool,
    /// Skip public IP detection
    pub public_ip: Option<IpAddr>,
}

impl DeployRequest {
    pub fn new(subdomain: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            subdomain: subdomain.into(),
            target: target.into(),
            proxied: true,
            overwrite: false,
            public_ip: None,
        }
    }

    pub fn proxied(mut self, proxied: bool) -> Self {
        self.proxied = proxied;
        self
    }

    pub fn overwrite(mut self, overwrite: bool) -> Self {
        self.overwrite = overwrite;
        self
    }

    pub fn public_ip(mut self, ip: IpAddr) -> Self {
        self.public_ip = Some(ip);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ListEntry {
    Managed(Deployment),
    /// A record under the domain that edgectl does not track
    Unmanaged(DnsRecord),
}

impl ListEntry {
    pub fn is_owned(&self) -> bool {
        matches!(self, ListEntry::Managed(_))
    }
}

pub struct ReconciliationEngine {
    dns: Arc<dyn DnsProvider>,
    store: DeploymentStore,
    renderer: ConfigRenderer,
    controller: ProcessController,
    ip: Arc<dyn PublicIpResolver>,
    settings: EngineSettings,
}

impl ReconciliationEngine {
    pub fn new(
        dns: Arc<dyn DnsProvider>,
        store: DeploymentStore,
        renderer: ConfigRenderer,
        controller: ProcessController,
        ip: Arc<dyn PublicIpResolver>,
        settings: EngineSettings,
    ) -> Self {
        Self {
            dns,
            store,
            renderer,
            controller,
            ip,
            settings,
        }
    }

    pub fn store(&self) -> &DeploymentStore {
        &self.store
    }

    pub fn controller(&self) -> &ProcessController {
        &self.controller
    }

    /// Expose `request.target` under `request.subdomain`.
    ///
    /// Safe to repeat: an unchanged deployment keeps its record and its
    /// fragment. If the proxy cannot load the new configuration the
    /// fragment is rolled back, the DNS record stays, and the deployment is
    /// left `Pending` for a retry.
    pub async fn deploy(&self, request: DeployRequest) -> Result<Deployment, ReconcileError> {
        let subdomain = Subdomain::parse(&request.subdomain)?;
        let target = Target::parse(&request.target)?;
        let _document = self
            .lock_document()
            .map_err(|e| failure(&subdomain, Resource::Config, e, ResourceReport::default()))?;
        let existing = self.store.get(&subdomain)?;

        if let Some(current) = &existing {
            if current.is_active() && current.target != target && !request.overwrite {
                return Err(ValidationError::Conflict {
                    subdomain: subdomain.to_string(),
                    existing: format!("a deployment forwarding to {}", current.target),
                }
                .into());
            }
        }

        // Render and merge up front so a template problem never leaves a
        // half-applied deployment behind
        let previous = self
            .read_live()
            .map_err(|e| failure(&subdomain, Resource::Config, e, ResourceReport::default()))?;
        let current_doc = ProxyDocument::parse(previous.as_deref().unwrap_or(""))?;
        let site = self.renderer.render_site(
            &SiteConfig::new(subdomain.as_str(), target.to_string()),
            &self.settings.tls,
        )?;
        let global = self.renderer.render_global(&self.settings.global)?;
        let document = current_doc
            .clone()
            .set_global(&global)?
            .merge(subdomain.as_str(), &site)?;

        let ip = match request.public_ip {
            Some(ip) => ip,
            None => self.ip.resolve().await?,
        };
        let content = ip.to_string();
        let record_type = DnsRecordType::for_content(&content);
        let proxied = request.proxied && self.dns.capabilities().proxy;
        if request.proxied && !proxied {
            info!(
                "{} has no edge proxy; {} will resolve directly to {}",
                self.dns.provider_type(),
                self.dns.fqdn(subdomain.as_str()),
                content
            );
        }

        let found = self
            .dns
            .find(subdomain.as_str())
            .await
            .map_err(|e| failure(&subdomain, Resource::Dns, e, ResourceReport::default()))?;

        if let Some(record) = &found {
            let owned = existing.as_ref().and_then(|d| d.record_id.as_deref())
                == Some(record.id.as_str());
            // A record created by an attempt that died before saving its id
            let interrupted = existing
                .as_ref()
                .map(|d| d.state == DeploymentState::Pending && d.record_id.is_none())
                .unwrap_or(false);
            if !owned && !interrupted && !request.overwrite {
                return Err(ValidationError::Conflict {
                    subdomain: subdomain.to_string(),
                    existing: format!(
                        "an unmanaged {} record pointing at {}",
                        record.record_type.as_str(),
                        record.content
                    ),
                }
                .into());
            }
        }

        let record_stale = match &found {
            Some(record) => {
                record.record_type != record_type || !record.matches(&content, proxied)
            }
            None => true,
        };
        let mut deployment = match existing {
            Some(mut current) => {
                let changed =
                    current.target != target || current.proxied != proxied || record_stale;
                current.target = target;
                if changed || !current.is_active() {
                    current.transition(DeploymentState::Pending)?;
                }
                current
            }
            None => Deployment::new(subdomain.clone(), target, proxied),
        };
        self.store.put(&deployment)?;

        let mut report = ResourceReport::default();
        let ttl = self.settings.ttl;
        let applied = match found {
            None => self
                .dns
                .create(subdomain.as_str(), record_type, &content, proxied, ttl)
                .await
                .map(|r| (r, ResourceState::Created)),
            Some(record) if !record_stale => Ok((record, ResourceState::Unchanged)),
            Some(record) => self
                .dns
                .update(&record.id, &content, proxied, ttl)
                .await
                .map(|r| (r, ResourceState::Updated)),
        };
        let (record, dns_state) = match applied {
            Ok(applied) => applied,
            Err(e) => {
                self.demote(&mut deployment);
                return Err(failure(&subdomain, Resource::Dns, e, report));
            }
        };
        report.dns = dns_state;
        debug!("DNS record {} for {}: {}", record.id, record.name, report.dns);

        deployment.record_id = Some(record.id.clone());
        deployment.proxied = record.proxied;
        deployment.updated_at = Utc::now();
        if let Err(e) = self.store.put(&deployment) {
            self.demote(&mut deployment);
            return Err(failure(&subdomain, Resource::State, e, report));
        }

        report.config = match current_doc.site(subdomain.as_str()) {
            None => ResourceState::Created,
            Some(old) if document.site(subdomain.as_str()) == Some(old) => ResourceState::Unchanged,
            Some(_) => ResourceState::Updated,
        };
        match self.apply(&document).await {
            Ok(process_state) => report.process = process_state,
            Err((step, source)) => {
                let rolled_back = self.rollback(previous.as_deref());
                if step == Resource::Config {
                    report.process = ResourceState::Unchanged;
                } else {
                    report.config = rolled_back;
                }
                self.demote(&mut deployment);
                return Err(failure(&subdomain, step, source, report));
            }
        }

        deployment
            .transition(DeploymentState::Active)
            .map_err(|e| failure(&subdomain, Resource::State, e, report.clone()))?;
        self.store
            .put(&deployment)
            .map_err(|e| failure(&subdomain, Resource::State, e, report.clone()))?;

        info!(
            "Deployed {} -> {} ({})",
            record.name, deployment.target, report
        );
        Ok(deployment)
    }

    /// Tear a deployment down. Every step is attempted; failures are
    /// collected into a [`TeardownError`]. Returns `false` if there was
    /// nothing to remove.
    pub async fn remove(&self, subdomain: &str) -> Result<bool, ReconcileError> {
        let subdomain = Subdomain::parse(subdomain)?;
        let Some(mut deployment) = self.store.get(&subdomain)? else {
            debug!("No deployment named {}", subdomain);
            return Ok(false);
        };

        deployment.transition(DeploymentState::PendingDelete)?;
        self.store.put(&deployment)?;

        let mut report = ResourceReport::default();
        let mut failures: Vec<(Resource, ResourceError)> = Vec::new();

        self.strip(&subdomain, &mut report, &mut failures).await;

        // Without a saved id the deploy died between creating the record
        // and recording it; clean up whatever it left at the name
        let record_id = match &deployment.record_id {
            Some(record_id) => Ok(Some(record_id.clone())),
            None => self.dns.find(subdomain.as_str()).await.map(|found| {
                found.map(|record| {
                    info!(
                        "Cleaning up {} record {} left by an interrupted deploy",
                        record.record_type.as_str(),
                        record.name
                    );
                    record.id
                })
            }),
        };
        let deleted = match record_id {
            Ok(Some(record_id)) => self.dns.delete(&record_id).await.map_err(|e| {
                warn!("Failed to delete DNS record {}: {}", record_id, e);
                e
            }),
            Ok(None) => Ok(false),
            Err(e) => Err(e),
        };
        match deleted {
            Ok(true) => report.dns = ResourceState::Removed,
            Ok(false) => report.dns = ResourceState::Unchanged,
            Err(e) => {
                report.dns = ResourceState::Failed(e.to_string());
                failures.push((Resource::Dns, e.into()));
            }
        }

        // Keep the PENDING_DELETE entry and its record id so a retry can
        // finish the DNS or config side
        if !report.dns.is_failed() && !report.config.is_failed() {
            if let Err(e) = self.store.remove(&subdomain) {
                failures.push((Resource::State, e.into()));
            }
        }

        if failures.is_empty() {
            info!("Removed {} ({})", subdomain, report);
            Ok(true)
        } else {
            Err(TeardownError {
                subdomain: subdomain.to_string(),
                report,
                failures,
            }
            .into())
        }
    }

    /// Managed deployments, plus untracked A/AAAA/CNAME records under the
    /// domain when `all` is set
    pub async fn list(&self, all: bool) -> Result<Vec<ListEntry>, ReconcileError> {
        let deployments = self.store.list()?;
        let mut entries: Vec<ListEntry> =
            deployments.iter().cloned().map(ListEntry::Managed).collect();
        if !all {
            return Ok(entries);
        }

        let tracked: HashSet<&str> = deployments
            .iter()
            .filter_map(|d| d.record_id.as_deref())
            .collect();
        let apex = self.dns.domain().trim_end_matches('.').to_ascii_lowercase();
        let suffix = format!(".{}", apex);

        let records = self
            .dns
            .list(&RecordFilter::all().with_types(LISTED_TYPES))
            .await?;
        entries.extend(
            records
                .into_iter()
                .filter(|r| {
                    let name = r.name.trim_end_matches('.').to_ascii_lowercase();
                    name != apex && name.ends_with(&suffix) && !tracked.contains(r.id.as_str())
                })
                .map(ListEntry::Unmanaged),
        );
        Ok(entries)
    }

    fn lock_document(&self) -> Result<FileLock, FileError> {
        FileLock::acquire(&self.settings.document_lock, self.settings.lock_timeout)
    }

    /// Record a failed deploy as `Pending` so it is never left `Active`
    /// with resources out of step.
    fn demote(&self, deployment: &mut Deployment) {
        if deployment.state == DeploymentState::Pending {
            return;
        }
        if let Err(e) = deployment.transition(DeploymentState::Pending) {
            error!("{}", e);
            return;
        }
        if let Err(e) = self.store.put(deployment) {
            error!("Failed to mark {} pending: {}", deployment.subdomain, e);
        }
    }

    fn read_live(&self) -> Result<Option<String>, ResourceError> {
        Ok(AtomicFile::new(self.controller.config_path()).read_to_string()?)
    }

    /// Stage `document` and have the controller load it, starting the
    /// proxy if it is not running.
    async fn apply(
        &self,
        document: &ProxyDocument,
    ) -> Result<ResourceState, (Resource, ResourceError)> {
        let candidate = AtomicFile::new(&self.settings.candidate_path);
        candidate
            .write(document.render().as_bytes())
            .map_err(|e| (Resource::Config, ResourceError::from(e)))?;

        let outcome = match self.controller.reload(candidate.path()).await {
            Ok(true) => Ok(ResourceState::Reloaded),
            Ok(false) => self
                .controller
                .start(self.controller.config_path())
                .await
                .map(|_| ResourceState::Started),
            Err(e) => Err(e),
        };

        match outcome {
            Ok(state) => {
                if let Err(e) = candidate.remove() {
                    debug!("Could not clean up {}: {}", candidate.path().display(), e);
                }
                Ok(state)
            }
            Err(e @ ProcessError::InvalidConfig(_)) => Err((Resource::Config, e.into())),
            Err(e) => Err((Resource::Process, e.into())),
        }
    }

    /// Put the live document back to what it was before this deploy.
    fn rollback(&self, previous: Option<&str>) -> ResourceState {
        let live = AtomicFile::new(self.controller.config_path());
        let result = match previous {
            Some(text) => live.write(text.as_bytes()),
            None => live.remove().map(|_| ()),
        };
        match result {
            Ok(()) => ResourceState::RolledBack,
            Err(e) => {
                error!("Failed to roll back {}: {}", live.path().display(), e);
                ResourceState::Failed(format!("rollback failed: {}", e))
            }
        }
    }

    async fn strip(
        &self,
        subdomain: &Subdomain,
        report: &mut ResourceReport,
        failures: &mut Vec<(Resource, ResourceError)>,
    ) {
        let _document = match self.lock_document() {
            Ok(lock) => lock,
            Err(e) => {
                report.config = ResourceState::Failed(e.to_string());
                failures.push((Resource::Config, e.into()));
                return;
            }
        };
        let document = match self.read_live().and_then(|text| {
            ProxyDocument::parse(text.as_deref().unwrap_or("")).map_err(ResourceError::from)
        }) {
            Ok(document) => document,
            Err(e) => {
                report.config = ResourceState::Failed(e.to_string());
                failures.push((Resource::Config, e));
                return;
            }
        };

        if !document.contains(subdomain.as_str()) {
            report.config = ResourceState::Unchanged;
            report.process = ResourceState::Unchanged;
            return;
        }

        let text = document.remove(subdomain.as_str()).render();
        let candidate = AtomicFile::new(&self.settings.candidate_path);
        if let Err(e) = candidate.write(text.as_bytes()) {
            report.config = ResourceState::Failed(e.to_string());
            failures.push((Resource::Config, e.into()));
            return;
        }

        match self.controller.reload(candidate.path()).await {
            Ok(reloaded) => {
                report.config = ResourceState::Removed;
                report.process = if reloaded {
                    ResourceState::Reloaded
                } else {
                    ResourceState::NotRunning
                };
                if let Err(e) = candidate.remove() {
                    debug!("Could not clean up {}: {}", candidate.path().display(), e);
                }
            }
            Err(e) => {
                warn!("Proxy reload without {} failed: {}", subdomain, e);
                // The site must not come back on the next start
                match AtomicFile::new(self.controller.config_path()).write(text.as_bytes()) {
                    Ok(()) => report.config = ResourceState::Removed,
                    Err(write_err) => {
                        report.config = ResourceState::Failed(write_err.to_string());
                        failures.push((Resource::Config, write_err.into()));
                    }
                }
                report.process = ResourceState::Failed(e.to_string());
                failures.push((Resource::Process, e.into()));
            }
        }
    }
}

fn failure(
    subdomain: &Subdomain,
    step: Resource,
    source: impl Into<ResourceError>,
    mut report: ResourceReport,
) -> ReconcileError {
    let source = source.into();
    let state = ResourceState::Failed(source.to_string());
    match step {
        Resource::Dns => report.dns = state,
        Resource::Config => report.config = state,
        Resource::Process => report.process = state,
        Resource::State => {}
    }
    warn!("Deploy of {} failed at the {}: {}", subdomain, step, source);
    ReconcileError::Failed {
        subdomain: subdomain.to_string(),
        step,
        source,
        report,
    }
}
