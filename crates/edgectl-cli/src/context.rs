//! Builds the library components a command needs from the configuration

use anyhow::Context;
use edgectl_config::{Config, Layout};
use edgectl_core::{AtomicFile, FileLock};
use edgectl_deployments::{
    DeploymentStore, EngineSettings, HttpIpResolver, PublicIpResolver, ReconciliationEngine,
    StaticIp,
};
use edgectl_dns::{create_provider, DnsProvider, ProviderCredentials};
use edgectl_proxy::{
    CaddyBackend, CaddySettings, ConfigRenderer, ControllerSettings, GlobalSettings,
    ProcessController, ProxyDocument, TlsCredentialsRef,
};
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Long enough for another invocation's full deploy, health wait included
const DOCUMENT_LOCK_TIMEOUT: Duration = Duration::from_secs(120);

pub struct AppContext {
    pub config: Config,
    pub layout: Layout,
}

impl AppContext {
    /// Load and validate the configuration, creating the working directories
    pub fn load(config_path: Option<&Path>) -> anyhow::Result<Self> {
        let config = Config::load(config_path).context("Failed to load configuration")?;
        config.validate()?;
        Self::from_config(config)
    }

    pub fn from_config(config: Config) -> anyhow::Result<Self> {
        let layout = config.layout();
        layout.ensure_dirs()?;
        debug!(
            "Using data directory {} and config directory {}",
            layout.data_dir.display(),
            layout.config_dir.display()
        );
        Ok(Self { config, layout })
    }

    pub fn credentials(&self) -> anyhow::Result<ProviderCredentials> {
        Ok(self.config.dns.credentials()?)
    }

    pub fn dns_provider(&self) -> anyhow::Result<Arc<dyn DnsProvider>> {
        Ok(create_provider(&self.config.dns_provider_config()?)?)
    }

    /// The proxy reads DNS-challenge secrets from its environment; the
    /// Caddyfile only names the variables.
    pub fn tls_credentials(&self) -> anyhow::Result<TlsCredentialsRef> {
        let credentials = self.credentials()?;
        Ok(TlsCredentialsRef::new(
            credentials.challenge_module(),
            credentials
                .challenge_env()
                .into_iter()
                .map(|(name, _)| name),
        ))
    }

    pub fn global_settings(&self) -> GlobalSettings {
        GlobalSettings {
            email: self.config.email.clone(),
            trusted_proxies: self.config.proxy.trusted_proxies.clone(),
            storage_path: self.layout.certificates_dir(),
            admin_disabled: self.config.proxy.admin_disabled,
            admin_address: self.config.proxy.admin_address.clone(),
        }
    }

    pub fn renderer(&self) -> ConfigRenderer {
        ConfigRenderer::new(self.config.domain.trim(), self.layout.logs_dir())
    }

    pub fn controller(&self) -> anyhow::Result<ProcessController> {
        let proxy = &self.config.proxy;
        let env = self
            .credentials()?
            .challenge_env()
            .into_iter()
            .map(|(name, value)| (name.to_string(), value))
            .collect();

        let backend = CaddyBackend::new(CaddySettings {
            binary: proxy.binary.clone(),
            admin_address: proxy.admin().map(str::to_string),
            https_address: proxy.https_address.clone(),
            log_file: self.layout.process_log_path(),
            env,
            ..CaddySettings::default()
        })?;

        let mut settings =
            ControllerSettings::new(self.layout.live_config_path(), self.layout.identity_path());
        settings.health_timeout = proxy.health_timeout();
        settings.health_interval = proxy.health_interval();
        settings.stop_grace = proxy.stop_grace();

        Ok(ProcessController::new(Arc::new(backend), settings))
    }

    /// `override_ip` first, then the configured address, then detection
    pub fn ip_resolver(
        &self,
        override_ip: Option<IpAddr>,
    ) -> anyhow::Result<Arc<dyn PublicIpResolver>> {
        match override_ip.or(self.config.public_ip()?) {
            Some(ip) => Ok(Arc::new(StaticIp(ip))),
            None => Ok(Arc::new(HttpIpResolver::new()?)),
        }
    }

    pub fn engine(&self) -> anyhow::Result<ReconciliationEngine> {
        let tls = self.tls_credentials()?;
        let settings = EngineSettings {
            ttl: self.config.dns.ttl,
            global: self.global_settings(),
            tls,
            candidate_path: self.layout.candidate_config_path(),
            document_lock: self.layout.document_lock_path(),
            lock_timeout: DOCUMENT_LOCK_TIMEOUT,
        };
        Ok(ReconciliationEngine::new(
            self.dns_provider()?,
            DeploymentStore::new(self.layout.state_path()),
            self.renderer(),
            self.controller()?,
            self.ip_resolver(None)?,
            settings,
        ))
    }

    /// Exclusive access to the live document, shared with deploy and remove
    pub fn lock_document(&self) -> anyhow::Result<FileLock> {
        FileLock::acquire(self.layout.document_lock_path(), DOCUMENT_LOCK_TIMEOUT)
            .context("Another edgectl command is changing the proxy configuration")
    }

    /// Render the live document with a fresh global block into the
    /// candidate file, returning the candidate's path.
    pub fn stage_refreshed_document(&self) -> anyhow::Result<PathBuf> {
        let live = AtomicFile::new(self.layout.live_config_path());
        let document = match live.read_to_string()? {
            Some(text) => ProxyDocument::parse(&text)
                .with_context(|| format!("Failed to parse {}", live.path().display()))?,
            None => ProxyDocument::new(),
        };

        let global = self.renderer().render_global(&self.global_settings())?;
        let document = document.set_global(&global)?;

        let candidate = AtomicFile::new(self.layout.candidate_config_path());
        candidate.write(document.render().as_bytes())?;
        Ok(candidate.path().to_path_buf())
    }
}
