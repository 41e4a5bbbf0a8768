//! End-to-end reconciliation against the in-memory DNS provider and the
//! scripted proxy backend

use edgectl_core::{AtomicFile, FileLock};
use edgectl_deployments::{
    DeployRequest, Deployment, DeploymentState, DeploymentStore, EngineSettings, ListEntry,
    ReconcileError, ReconciliationEngine, Resource, ResourceState, StaticIp, Subdomain, Target,
    ValidationError,
};
use edgectl_dns::{DnsError, DnsRecordType, MemoryDnsProvider, Operation, AUTOMATIC_TTL};
use edgectl_proxy::{
    ConfigRenderer, ControllerSettings, FakeBackend, GlobalSettings, ProcessController,
    ProxyDocument, ProxyStatus, RenderError, TlsCredentialsRef,
};
use std::net::IpAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

const DOMAIN: &str = "example.com";
const PUBLIC_IP: &str = "203.0.113.10";

struct Harness {
    dir: TempDir,
    dns: Arc<MemoryDnsProvider>,
    backend: Arc<FakeBackend>,
    engine: ReconciliationEngine,
}

impl Harness {
    fn new() -> Self {
        Self::build(MemoryDnsProvider::new(DOMAIN), "ops@example.com")
    }

    fn build(dns: MemoryDnsProvider, email: &str) -> Self {
        let dir = TempDir::new().unwrap();
        let dns = Arc::new(dns);
        let backend = Arc::new(FakeBackend::new());
        let proxy_dir = dir.path().join("proxy");

        let mut controller_settings = ControllerSettings::new(
            proxy_dir.join("Caddyfile"),
            proxy_dir.join("process.json"),
        );
        controller_settings.health_timeout = Duration::from_millis(200);
        controller_settings.health_interval = Duration::from_millis(20);

        let settings = EngineSettings {
            ttl: AUTOMATIC_TTL,
            global: GlobalSettings {
                email: email.to_string(),
                trusted_proxies: Vec::new(),
                storage_path: proxy_dir.join("certificates"),
                admin_disabled: false,
                admin_address: "localhost:2019".to_string(),
            },
            tls: TlsCredentialsRef::new("cloudflare", ["CLOUDFLARE_API_TOKEN"]),
            candidate_path: proxy_dir.join("Caddyfile.next"),
            document_lock: proxy_dir.join("Caddyfile.lock"),
            lock_timeout: Duration::from_millis(300),
        };

        let engine = ReconciliationEngine::new(
            dns.clone(),
            DeploymentStore::new(dir.path().join("deployments.json")),
            ConfigRenderer::new(DOMAIN, proxy_dir.join("logs")),
            ProcessController::new(backend.clone(), controller_settings),
            Arc::new(StaticIp(PUBLIC_IP.parse().unwrap())),
            settings,
        );

        Self {
            dir,
            dns,
            backend,
            engine,
        }
    }

    fn live_path(&self) -> PathBuf {
        self.dir.path().join("proxy").join("Caddyfile")
    }

    fn live(&self) -> ProxyDocument {
        let text = std::fs::read_to_string(self.live_path()).unwrap_or_default();
        ProxyDocument::parse(&text).unwrap()
    }

    async fn loaded(&self) -> String {
        let report = self.engine.controller().status().await.unwrap();
        let pid = report.identity.and_then(|i| i.pid).unwrap();
        self.backend.loaded_config(pid).unwrap()
    }

    fn hold_document_lock(&self) -> FileLock {
        FileLock::acquire(
            self.dir.path().join("proxy").join("Caddyfile.lock"),
            Duration::from_secs(1),
        )
        .unwrap()
    }

    fn stored(&self, name: &str) -> Option<Deployment> {
        self.engine
            .store()
            .get(&Subdomain::parse(name).unwrap())
            .unwrap()
    }
}

// ==================== Deploy tests ====================

#[tokio::test]
async fn test_deploy_provisions_all_resources() {
    let h = Harness::new();
    let deployment = h
        .engine
        .deploy(DeployRequest::new("app", "127.0.0.1:3000"))
        .await
        .unwrap();

    assert_eq!(deployment.state, DeploymentState::Active);
    assert!(deployment.proxied);

    let record = h.dns.get(deployment.record_id.as_deref().unwrap()).unwrap();
    assert_eq!(record.name, "app.example.com");
    assert_eq!(record.record_type, DnsRecordType::A);
    assert_eq!(record.content, PUBLIC_IP);

    let live = h.live();
    assert!(live.global().unwrap().contains("email ops@example.com"));
    assert!(live.site("app").unwrap().contains("reverse_proxy 127.0.0.1:3000"));
    assert_eq!(
        h.engine.controller().status().await.unwrap().status,
        ProxyStatus::Running
    );
    assert!(h.loaded().await.contains("app.example.com {"));
    assert_eq!(h.stored("app"), Some(deployment));
}

#[tokio::test]
async fn test_deploy_is_idempotent() {
    let h = Harness::new();
    let request = DeployRequest::new("app", "127.0.0.1:3000").proxied(true);

    let first = h.engine.deploy(request.clone()).await.unwrap();
    let second = h.engine.deploy(request).await.unwrap();

    assert_eq!(first.record_id, second.record_id);
    assert_eq!(first.target, second.target);
    assert_eq!(h.dns.records().len(), 1);
    assert_eq!(h.dns.call_count(Operation::Create), 1);
    assert_eq!(h.dns.call_count(Operation::Update), 0);

    let text = std::fs::read_to_string(h.live_path()).unwrap();
    assert_eq!(text.matches("# >>> edgectl site: app").count(), 1);
    assert_eq!(h.backend.spawn_count(), 1);
}

#[tokio::test]
async fn test_changed_target_without_overwrite_is_rejected() {
    let h = Harness::new();
    let original = h
        .engine
        .deploy(DeployRequest::new("app", "localhost:3000"))
        .await
        .unwrap();

    let err = h
        .engine
        .deploy(DeployRequest::new("app", "localhost:4000"))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        ReconcileError::Validation(ValidationError::Conflict { .. })
    ));

    assert_eq!(h.stored("app"), Some(original));
    assert!(h.live().site("app").unwrap().contains("localhost:3000"));
    assert_eq!(h.dns.call_count(Operation::Find), 1);

    let replaced = h
        .engine
        .deploy(DeployRequest::new("app", "localhost:4000").overwrite(true))
        .await
        .unwrap();
    assert_eq!(replaced.state, DeploymentState::Active);
    assert!(h.live().site("app").unwrap().contains("localhost:4000"));
    assert!(h.loaded().await.contains("localhost:4000"));
    assert_eq!(h.dns.records().len(), 1);
}

#[tokio::test]
async fn test_merge_isolation_between_similar_names() {
    let h = Harness::new();
    h.engine
        .deploy(DeployRequest::new("a", "localhost:3000"))
        .await
        .unwrap();
    h.engine
        .deploy(DeployRequest::new("b", "a.internal:4000"))
        .await
        .unwrap();
    let a_block = h.live().site("a").unwrap().to_string();

    h.engine
        .deploy(DeployRequest::new("b", "a.example.com:5000").overwrite(true))
        .await
        .unwrap();
    assert_eq!(h.live().site("a"), Some(a_block.as_str()));

    assert!(h.engine.remove("b").await.unwrap());
    let live = h.live();
    assert_eq!(live.site("a"), Some(a_block.as_str()));
    assert!(!live.contains("b"));
}

#[tokio::test]
async fn test_deploy_starts_stopped_proxy() {
    let h = Harness::new();
    h.engine
        .deploy(DeployRequest::new("app", "localhost:3000"))
        .await
        .unwrap();
    assert!(h.engine.controller().stop().await.unwrap());

    h.engine
        .deploy(DeployRequest::new("app", "localhost:3000"))
        .await
        .unwrap();
    assert_eq!(h.backend.spawn_count(), 2);
    assert_eq!(
        h.engine.controller().status().await.unwrap().status,
        ProxyStatus::Running
    );
}

#[tokio::test]
async fn test_provider_without_proxy_resolves_directly() {
    let h = Harness::build(MemoryDnsProvider::without_proxy(DOMAIN), "ops@example.com");
    let deployment = h
        .engine
        .deploy(DeployRequest::new("app", "localhost:3000").proxied(true))
        .await
        .unwrap();
    assert!(!deployment.proxied);
}

#[tokio::test]
async fn test_ipv6_override_creates_aaaa_record() {
    let h = Harness::new();
    let ip: IpAddr = "2001:db8::10".parse().unwrap();
    let deployment = h
        .engine
        .deploy(DeployRequest::new("v6", "[::1]:8080").public_ip(ip))
        .await
        .unwrap();

    let record = h.dns.get(deployment.record_id.as_deref().unwrap()).unwrap();
    assert_eq!(record.record_type, DnsRecordType::AAAA);
    assert_eq!(record.content, "2001:db8::10");
    assert!(h.live().site("v6").unwrap().contains("reverse_proxy [::1]:8080"));
}

// ==================== Validation tests ====================

#[tokio::test]
async fn test_invalid_input_touches_nothing() {
    let h = Harness::new();

    let err = h
        .engine
        .deploy(DeployRequest::new("bad_name", "localhost:3000"))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        ReconcileError::Validation(ValidationError::BadSubdomain { .. })
    ));

    let err = h
        .engine
        .deploy(DeployRequest::new("app", "localhost:99999"))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        ReconcileError::Validation(ValidationError::BadTarget { .. })
    ));

    assert_eq!(h.dns.call_count(Operation::Find), 0);
    assert!(!h.dir.path().join("deployments.json").exists());
    assert!(!h.live_path().exists());
}

#[tokio::test]
async fn test_missing_template_value_fails_before_provider_calls() {
    let h = Harness::build(MemoryDnsProvider::new(DOMAIN), "");

    let err = h
        .engine
        .deploy(DeployRequest::new("app", "localhost:3000"))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        ReconcileError::Render(RenderError::MissingVariable(ref name)) if name == "email"
    ));
    assert_eq!(h.dns.call_count(Operation::Find), 0);
    assert!(h.engine.store().list().unwrap().is_empty());
}

#[tokio::test]
async fn test_unmanaged_record_requires_overwrite() {
    let h = Harness::new();
    let seeded = h.dns.seed("app.example.com", DnsRecordType::A, "198.51.100.1");

    let err = h
        .engine
        .deploy(DeployRequest::new("app", "localhost:3000"))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        ReconcileError::Validation(ValidationError::Conflict { .. })
    ));
    assert!(h.stored("app").is_none());
    assert_eq!(h.dns.get(&seeded.id).unwrap().content, "198.51.100.1");

    let adopted = h
        .engine
        .deploy(DeployRequest::new("app", "localhost:3000").overwrite(true))
        .await
        .unwrap();
    assert_eq!(adopted.record_id.as_deref(), Some(seeded.id.as_str()));
    assert_eq!(h.dns.get(&seeded.id).unwrap().content, PUBLIC_IP);
    assert_eq!(h.dns.records().len(), 1);
}

// ==================== Failure and rollback tests ====================

#[tokio::test]
async fn test_rejected_config_keeps_running_proxy_intact() {
    let h = Harness::new();
    h.engine
        .deploy(DeployRequest::new("app", "localhost:3000"))
        .await
        .unwrap();
    h.backend.reject_configs_containing("bad.internal");

    let err = h
        .engine
        .deploy(DeployRequest::new("broken", "bad.internal:80"))
        .await
        .unwrap_err();
    match err {
        ReconcileError::Failed { step, report, .. } => {
            assert_eq!(step, Resource::Config);
            assert_eq!(report.dns, ResourceState::Created);
            assert!(report.config.is_failed());
            assert_eq!(report.process, ResourceState::Unchanged);
        }
        other => panic!("unexpected {:?}", other),
    }

    assert_eq!(
        h.engine.controller().status().await.unwrap().status,
        ProxyStatus::Running
    );
    let loaded = h.loaded().await;
    assert!(loaded.contains("app.example.com {"));
    assert!(!loaded.contains("broken"));
    let live = h.live();
    assert!(live.contains("app"));
    assert!(!live.contains("broken"));

    // DNS stays in place for the retry
    let pending = h.stored("broken").unwrap();
    assert_eq!(pending.state, DeploymentState::Pending);
    assert!(h.dns.get(pending.record_id.as_deref().unwrap()).is_some());
}

#[tokio::test]
async fn test_failed_reload_rolls_back_and_retry_succeeds() {
    let h = Harness::new();
    h.engine
        .deploy(DeployRequest::new("app", "localhost:3000"))
        .await
        .unwrap();
    h.backend.fail_next_reload();

    let err = h
        .engine
        .deploy(DeployRequest::new("second", "localhost:4000"))
        .await
        .unwrap_err();
    match err {
        ReconcileError::Failed { step, report, .. } => {
            assert_eq!(step, Resource::Process);
            assert_eq!(report.config, ResourceState::RolledBack);
            assert!(report.process.is_failed());
        }
        other => panic!("unexpected {:?}", other),
    }
    assert!(!h.live().contains("second"));
    assert!(!h.loaded().await.contains("second"));
    let pending = h.stored("second").unwrap();
    assert_eq!(pending.state, DeploymentState::Pending);

    let deployed = h
        .engine
        .deploy(DeployRequest::new("second", "localhost:4000"))
        .await
        .unwrap();
    assert_eq!(deployed.state, DeploymentState::Active);
    assert_eq!(deployed.record_id, pending.record_id);
    assert_eq!(h.dns.call_count(Operation::Create), 2);
    assert!(h.loaded().await.contains("second.example.com {"));
}

#[tokio::test]
async fn test_failed_dns_update_on_redeploy_leaves_pending() {
    let h = Harness::new();
    let original = h
        .engine
        .deploy(DeployRequest::new("app", "localhost:3000"))
        .await
        .unwrap();
    h.dns
        .fail_next(Operation::Update, DnsError::Network("connection reset".into()));

    let moved: IpAddr = "203.0.113.20".parse().unwrap();
    let err = h
        .engine
        .deploy(DeployRequest::new("app", "localhost:3000").public_ip(moved))
        .await
        .unwrap_err();
    assert!(matches!(err, ReconcileError::Failed { step: Resource::Dns, .. }));

    let pending = h.stored("app").unwrap();
    assert_eq!(pending.state, DeploymentState::Pending);
    assert_eq!(pending.record_id, original.record_id);
    let record_id = original.record_id.as_deref().unwrap();
    assert_eq!(h.dns.get(record_id).unwrap().content, PUBLIC_IP);

    let retried = h
        .engine
        .deploy(DeployRequest::new("app", "localhost:3000").public_ip(moved))
        .await
        .unwrap();
    assert_eq!(retried.state, DeploymentState::Active);
    assert_eq!(h.dns.get(record_id).unwrap().content, "203.0.113.20");
}

#[tokio::test]
async fn test_failed_proxy_start_on_redeploy_leaves_pending() {
    let h = Harness::new();
    h.engine
        .deploy(DeployRequest::new("app", "localhost:3000"))
        .await
        .unwrap();
    assert!(h.engine.controller().stop().await.unwrap());
    h.backend.set_exit_on_spawn(true);

    let err = h
        .engine
        .deploy(DeployRequest::new("app", "localhost:3000"))
        .await
        .unwrap_err();
    assert!(matches!(err, ReconcileError::Failed { step: Resource::Process, .. }));
    assert_eq!(h.stored("app").unwrap().state, DeploymentState::Pending);
    assert_eq!(
        h.engine.controller().status().await.unwrap().status,
        ProxyStatus::Stopped
    );

    h.backend.set_exit_on_spawn(false);
    let retried = h
        .engine
        .deploy(DeployRequest::new("app", "localhost:3000"))
        .await
        .unwrap();
    assert_eq!(retried.state, DeploymentState::Active);
}

#[tokio::test]
async fn test_deploy_waits_for_document_lock() {
    let h = Harness::new();
    let held = h.hold_document_lock();

    let err = h
        .engine
        .deploy(DeployRequest::new("app", "localhost:3000"))
        .await
        .unwrap_err();
    assert!(matches!(err, ReconcileError::Failed { step: Resource::Config, .. }));
    assert_eq!(h.dns.call_count(Operation::Find), 0);
    assert!(h.stored("app").is_none());

    drop(held);
    h.engine
        .deploy(DeployRequest::new("app", "localhost:3000"))
        .await
        .unwrap();
    assert!(h.live().contains("app"));
}

#[tokio::test]
async fn test_dns_failure_leaves_pending_without_config() {
    let h = Harness::new();
    h.dns.fail_next(
        Operation::Create,
        DnsError::RateLimited { retry_after: None },
    );

    let err = h
        .engine
        .deploy(DeployRequest::new("app", "localhost:3000"))
        .await
        .unwrap_err();
    match err {
        ReconcileError::Failed { step, report, .. } => {
            assert_eq!(step, Resource::Dns);
            assert_eq!(report.config, ResourceState::Untouched);
            assert_eq!(report.process, ResourceState::Untouched);
        }
        other => panic!("unexpected {:?}", other),
    }
    let pending = h.stored("app").unwrap();
    assert_eq!(pending.state, DeploymentState::Pending);
    assert!(pending.record_id.is_none());
    assert!(!h.live_path().exists());

    // Aborting a pending deployment cleans up its entry
    assert!(h.engine.remove("app").await.unwrap());
    assert!(h.stored("app").is_none());
}

// ==================== Teardown tests ====================

#[tokio::test]
async fn test_teardown_continues_past_dns_failure() {
    let h = Harness::new();
    let deployment = h
        .engine
        .deploy(DeployRequest::new("app", "localhost:3000"))
        .await
        .unwrap();
    h.dns
        .fail_next(Operation::Delete, DnsError::Network("connection reset".into()));

    let err = h.engine.remove("app").await.unwrap_err();
    let teardown = match err {
        ReconcileError::Teardown(teardown) => teardown,
        other => panic!("unexpected {:?}", other),
    };
    assert_eq!(teardown.failed_resources(), vec![Resource::Dns]);
    assert_eq!(teardown.report.config, ResourceState::Removed);
    assert_eq!(teardown.report.process, ResourceState::Reloaded);
    assert!(teardown.report.dns.is_failed());

    assert!(!h.live().contains("app"));
    assert!(!h.loaded().await.contains("app.example.com"));
    let retained = h.stored("app").unwrap();
    assert_eq!(retained.state, DeploymentState::PendingDelete);
    assert_eq!(retained.record_id, deployment.record_id);

    let reloads = h.backend.reload_count();
    assert!(h.engine.remove("app").await.unwrap());
    assert_eq!(h.backend.reload_count(), reloads);
    assert!(h.dns.records().is_empty());
    assert!(h.stored("app").is_none());

    assert!(!h.engine.remove("app").await.unwrap());
}

#[tokio::test]
async fn test_remove_pending_cleans_up_interrupted_record() {
    let h = Harness::new();
    // A deploy that created its record but died before saving the id
    let interrupted = Deployment::new(
        Subdomain::parse("app").unwrap(),
        Target::parse("localhost:3000").unwrap(),
        true,
    );
    h.engine.store().put(&interrupted).unwrap();
    h.dns.seed("app.example.com", DnsRecordType::A, PUBLIC_IP);
    let unrelated = h.dns.seed("other.example.com", DnsRecordType::A, PUBLIC_IP);

    assert!(h.engine.remove("app").await.unwrap());
    assert_eq!(h.dns.records(), vec![unrelated]);
    assert!(h.stored("app").is_none());
}

#[tokio::test]
async fn test_teardown_keeps_entry_while_document_is_locked() {
    let h = Harness::new();
    h.engine
        .deploy(DeployRequest::new("app", "localhost:3000"))
        .await
        .unwrap();
    let held = h.hold_document_lock();

    let teardown = match h.engine.remove("app").await.unwrap_err() {
        ReconcileError::Teardown(teardown) => teardown,
        other => panic!("unexpected {:?}", other),
    };
    assert_eq!(teardown.failed_resources(), vec![Resource::Config]);
    assert_eq!(teardown.report.dns, ResourceState::Removed);
    assert!(h.live().contains("app"));
    assert_eq!(h.stored("app").unwrap().state, DeploymentState::PendingDelete);

    drop(held);
    assert!(h.engine.remove("app").await.unwrap());
    assert!(!h.live().contains("app"));
    assert!(h.stored("app").is_none());
}

#[tokio::test]
async fn test_remove_unknown_is_noop() {
    let h = Harness::new();
    assert!(!h.engine.remove("ghost").await.unwrap());
    assert_eq!(h.dns.call_count(Operation::Delete), 0);
}

// ==================== State and listing tests ====================

#[tokio::test]
async fn test_interrupted_store_write_keeps_previous_set() {
    let h = Harness::new();
    h.engine
        .deploy(DeployRequest::new("app", "localhost:3000"))
        .await
        .unwrap();

    // Crash after the temporary write, before the rename
    let staged = AtomicFile::new(h.dir.path().join("deployments.json"))
        .stage(b"{\"version\": 1, \"deployments\": {\"other\": {\"subd")
        .unwrap();
    std::mem::forget(staged);

    let entries = h.engine.list(false).await.unwrap();
    assert_eq!(entries.len(), 1);
    assert!(matches!(&entries[0], ListEntry::Managed(d) if d.subdomain.as_str() == "app"));
}

#[tokio::test]
async fn test_list_all_tags_unmanaged_records() {
    let h = Harness::new();
    h.engine
        .deploy(DeployRequest::new("app", "localhost:3000"))
        .await
        .unwrap();
    h.dns.seed("example.com", DnsRecordType::A, "198.51.100.1");
    h.dns
        .seed("legacy.example.com", DnsRecordType::CNAME, "elsewhere.net");
    h.dns.seed("app.other.org", DnsRecordType::A, "198.51.100.2");

    let managed = h.engine.list(false).await.unwrap();
    assert_eq!(managed.len(), 1);
    assert!(managed[0].is_owned());

    let all = h.engine.list(true).await.unwrap();
    assert_eq!(all.len(), 2);
    assert!(all[0].is_owned());
    match &all[1] {
        ListEntry::Unmanaged(record) => assert_eq!(record.name, "legacy.example.com"),
        other => panic!("unexpected {:?}", other),
    }
}
