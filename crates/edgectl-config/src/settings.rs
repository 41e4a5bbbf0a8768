//! edgectl settings
//!
//! Values are layered: built-in defaults, then the YAML file, then
//! `EDGECTL_*` environment variables (`__` separates nested keys), then the
//! vendor variables (`CLOUDFLARE_API_TOKEN`, `DIGITALOCEAN_TOKEN`, ...) that
//! other Caddy and DNS tooling already reads.

use config::{Environment, File, FileFormat};
use edgectl_core::{mask_sensitive, AtomicFile, FileError};
use edgectl_dns::{
    CloudflareCredentials, DigitalOceanCredentials, DnsProviderConfig, DnsProviderType,
    ProviderCredentials, RetryPolicy,
};
use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

use crate::errors::ConfigError;

pub const APP_DIR_NAME: &str = "edgectl";
pub const CONFIG_FILE_NAME: &str = "config.yaml";
pub const ENV_PREFIX: &str = "EDGECTL";

// Well-known paths relative to data_dir / config_dir
pub const STATE_FILE_NAME: &str = "deployments.json";
pub const PROXY_DIR_NAME: &str = "proxy";
pub const IDENTITY_FILE_NAME: &str = "process.json";
pub const CERTIFICATES_DIR_NAME: &str = "certificates";
pub const LOGS_DIR_NAME: &str = "logs";
pub const PROCESS_LOG_NAME: &str = "caddy.log";
pub const LIVE_CONFIG_NAME: &str = "Caddyfile";
pub const CANDIDATE_CONFIG_NAME: &str = "Caddyfile.next";
pub const DOCUMENT_LOCK_NAME: &str = "Caddyfile.lock";

/// Default location of the configuration file
pub fn default_config_file() -> PathBuf {
    default_config_dir().join(CONFIG_FILE_NAME)
}

fn default_config_dir() -> PathBuf {
    dirs::config_dir()
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_DIR_NAME)
}

fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_DIR_NAME)
}

#[derive(Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DnsSettings {
    /// `cloudflare` (alias `cf`) or `digitalocean` (alias `do`)
    pub provider: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub zone_token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dns_token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub digitalocean_token: Option<String>,
    /// Record TTL in seconds; 1 lets the provider choose
    pub ttl: u32,
    pub request_timeout_secs: u64,
    pub max_retries: u32,
}

impl Default for DnsSettings {
    fn default() -> Self {
        Self {
            provider: DnsProviderType::Cloudflare.to_string(),
            api_token: None,
            api_key: None,
            api_email: None,
            zone_token: None,
            dns_token: None,
            digitalocean_token: None,
            ttl: edgectl_dns::AUTOMATIC_TTL,
            request_timeout_secs: 30,
            max_retries: 3,
        }
    }
}

impl std::fmt::Debug for DnsSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let masked = |v: &Option<String>| v.as_deref().map(mask_sensitive);
        f.debug_struct("DnsSettings")
            .field("provider", &self.provider)
            .field("api_token", &masked(&self.api_token))
            .field("api_key", &masked(&self.api_key))
            .field("api_email", &self.api_email)
            .field("zone_token", &masked(&self.zone_token))
            .field("dns_token", &masked(&self.dns_token))
            .field("digitalocean_token", &masked(&self.digitalocean_token))
            .field("ttl", &self.ttl)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .field("max_retries", &self.max_retries)
            .finish()
    }
}

impl DnsSettings {
    /// Settings holding exactly the given credentials
    pub fn from_credentials(credentials: &ProviderCredentials) -> Self {
        let mut settings = Self {
            provider: credentials.provider_type().to_string(),
            ..Self::default()
        };
        match credentials {
            ProviderCredentials::Cloudflare(CloudflareCredentials::ApiToken { api_token }) => {
                settings.api_token = Some(api_token.clone());
            }
            ProviderCredentials::Cloudflare(CloudflareCredentials::GlobalKey {
                email,
                api_key,
            }) => {
                settings.api_key = Some(api_key.clone());
                settings.api_email = Some(email.clone());
            }
            ProviderCredentials::Cloudflare(CloudflareCredentials::ScopedTokens {
                zone_token,
                dns_token,
            }) => {
                settings.zone_token = Some(zone_token.clone());
                settings.dns_token = Some(dns_token.clone());
            }
            ProviderCredentials::DigitalOcean(creds) => {
                settings.digitalocean_token = Some(creds.api_token.clone());
            }
        }
        settings
    }

    pub fn provider_type(&self) -> Result<DnsProviderType, ConfigError> {
        match DnsProviderType::from_str(&self.provider)? {
            DnsProviderType::Memory => Err(ConfigError::Invalid {
                field: "dns.provider",
                reason: "the in-memory provider cannot be configured".to_string(),
            }),
            provider => Ok(provider),
        }
    }

    /// Select the auth mode from whichever secrets are present.
    ///
    /// Cloudflare prefers the zone and DNS token pair, then an API token,
    /// then the global key with its account email.
    pub fn credentials(&self) -> Result<ProviderCredentials, ConfigError> {
        fn present(v: &Option<String>) -> Option<&str> {
            v.as_deref().filter(|s| !s.trim().is_empty())
        }

        match self.provider_type()? {
            DnsProviderType::Cloudflare => {
                let creds = match (
                    present(&self.zone_token),
                    present(&self.dns_token),
                    present(&self.api_token),
                    present(&self.api_key),
                    present(&self.api_email),
                ) {
                    (Some(zone), Some(dns), _, _, _) => CloudflareCredentials::ScopedTokens {
                        zone_token: zone.to_string(),
                        dns_token: dns.to_string(),
                    },
                    (_, _, Some(token), _, _) => CloudflareCredentials::ApiToken {
                        api_token: token.to_string(),
                    },
                    (_, _, None, Some(key), Some(email)) => CloudflareCredentials::GlobalKey {
                        email: email.to_string(),
                        api_key: key.to_string(),
                    },
                    _ => {
                        return Err(ConfigError::MissingCredentials {
                            provider: "cloudflare".to_string(),
                            hint: "set dns.api_token, dns.api_key with dns.api_email, \
                                   or dns.zone_token with dns.dns_token",
                        })
                    }
                };
                Ok(ProviderCredentials::Cloudflare(creds))
            }
            _ => match present(&self.digitalocean_token) {
                Some(token) => Ok(ProviderCredentials::DigitalOcean(DigitalOceanCredentials {
                    api_token: token.to_string(),
                })),
                None => Err(ConfigError::MissingCredentials {
                    provider: "digitalocean".to_string(),
                    hint: "set dns.digitalocean_token or DIGITALOCEAN_TOKEN",
                }),
            },
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            ..RetryPolicy::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProxySettings {
    pub binary: PathBuf,
    pub admin_address: String,
    pub admin_disabled: bool,
    /// Checked over TCP when the admin endpoint is disabled
    pub https_address: String,
    /// CIDRs (or `private_ranges`) whose forwarding headers are trusted
    pub trusted_proxies: Vec<String>,
    pub health_timeout_secs: u64,
    pub health_interval_ms: u64,
    pub stop_grace_secs: u64,
}

impl Default for ProxySettings {
    fn default() -> Self {
        Self {
            binary: PathBuf::from("caddy"),
            admin_address: "localhost:2019".to_string(),
            admin_disabled: false,
            https_address: "127.0.0.1:443".to_string(),
            trusted_proxies: Vec::new(),
            health_timeout_secs: 30,
            health_interval_ms: 500,
            stop_grace_secs: 10,
        }
    }
}

impl ProxySettings {
    /// Admin listener, or `None` when the endpoint is disabled
    pub fn admin(&self) -> Option<&str> {
        (!self.admin_disabled).then_some(self.admin_address.as_str())
    }

    pub fn health_timeout(&self) -> Duration {
        Duration::from_secs(self.health_timeout_secs)
    }

    pub fn health_interval(&self) -> Duration {
        Duration::from_millis(self.health_interval_ms)
    }

    pub fn stop_grace(&self) -> Duration {
        Duration::from_secs(self.stop_grace_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Zone apex, e.g. "example.com"
    pub domain: String,
    /// ACME account email
    pub email: String,
    /// Fixed address for DNS records instead of auto-detection
    #[serde(skip_serializing_if = "Option::is_none")]
    pub public_ip: Option<String>,
    pub dns: DnsSettings,
    pub proxy: ProxySettings,
    pub data_dir: PathBuf,
    pub config_dir: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            domain: String::new(),
            email: String::new(),
            public_ip: None,
            dns: DnsSettings::default(),
            proxy: ProxySettings::default(),
            data_dir: default_data_dir(),
            config_dir: default_config_dir(),
        }
    }
}

impl Config {
    pub fn new(
        domain: impl Into<String>,
        email: impl Into<String>,
        credentials: &ProviderCredentials,
    ) -> Self {
        Self {
            domain: domain.into(),
            email: email.into(),
            dns: DnsSettings::from_credentials(credentials),
            ..Self::default()
        }
    }

    /// Load from `path`, or the default location when none is given.
    ///
    /// A missing file is not an error; [`Config::validate`] reports what the
    /// remaining layers failed to provide.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let path = path
            .map(Path::to_path_buf)
            .unwrap_or_else(default_config_file);
        Self::load_with_env(&path, None)
    }

    /// Load with an explicit environment instead of the process's own
    pub fn load_with_env(
        path: &Path,
        env: Option<config::Map<String, String>>,
    ) -> Result<Self, ConfigError> {
        debug!("Loading configuration from {}", path.display());

        let defaults = config::Config::try_from(&Config::default())?;
        let layered = config::Config::builder()
            .add_source(defaults)
            .add_source(
                File::from(path)
                    .format(FileFormat::Yaml)
                    .required(false),
            )
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("proxy.trusted_proxies")
                    .source(env.clone()),
            )
            .build()?;

        let mut config: Config = layered.try_deserialize()?;
        match env {
            Some(vars) => config.apply_vendor_env(|name| vars.get(name).cloned()),
            None => config.apply_vendor_env(|name| std::env::var(name).ok()),
        }
        Ok(config)
    }

    /// Apply the vendor variables; empty values are ignored.
    pub fn apply_vendor_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        if let Some(token) = get("CLOUDFLARE_API_TOKEN") {
            self.dns.api_token = Some(token);
        }
        if let Some(key) = get("CLOUDFLARE_API_KEY") {
            self.dns.api_key = Some(key);
        }
        if let Some(email) = get("CLOUDFLARE_EMAIL") {
            if self.email.is_empty() {
                self.email = email.clone();
            }
            self.dns.api_email = Some(email);
        }
        if let Some(token) = get("CLOUDFLARE_ZONE_TOKEN") {
            self.dns.zone_token = Some(token);
        }
        if let Some(token) = get("CLOUDFLARE_DNS_TOKEN") {
            self.dns.dns_token = Some(token);
        }
        if let Some(domain) = get("CLOUDFLARE_DOMAIN") {
            self.domain = domain;
        }
        if let Some(ip) = get("CLOUDFLARE_PUBLIC_IP") {
            self.public_ip = Some(ip);
        }
        if let Some(token) = get("DIGITALOCEAN_TOKEN") {
            self.dns.digitalocean_token = Some(token);
        }
    }

    /// Check everything a command needs before it touches external resources.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let domain = self.domain.trim();
        if domain.is_empty() {
            return Err(ConfigError::Missing {
                field: "domain",
                env: "EDGECTL_DOMAIN",
            });
        }
        if domain.contains("://") || domain.contains('/') || !domain.contains('.') {
            return Err(ConfigError::Invalid {
                field: "domain",
                reason: format!("'{}' is not a bare domain name", domain),
            });
        }

        if self.email.trim().is_empty() {
            return Err(ConfigError::Missing {
                field: "email",
                env: "EDGECTL_EMAIL",
            });
        }
        if !self.email.contains('@') {
            return Err(ConfigError::Invalid {
                field: "email",
                reason: format!("'{}' is not an email address", self.email),
            });
        }

        self.public_ip()?;
        self.dns.credentials()?.validate()?;

        if self.dns.ttl == 0 {
            return Err(ConfigError::Invalid {
                field: "dns.ttl",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.proxy.binary.as_os_str().is_empty() {
            return Err(ConfigError::Missing {
                field: "proxy.binary",
                env: "EDGECTL_PROXY__BINARY",
            });
        }
        if self.proxy.admin().is_some_and(|addr| addr.trim().is_empty()) {
            return Err(ConfigError::Missing {
                field: "proxy.admin_address",
                env: "EDGECTL_PROXY__ADMIN_ADDRESS",
            });
        }
        if self.proxy.https_address.trim().is_empty() {
            return Err(ConfigError::Missing {
                field: "proxy.https_address",
                env: "EDGECTL_PROXY__HTTPS_ADDRESS",
            });
        }
        if self.proxy.health_interval_ms == 0 {
            return Err(ConfigError::Invalid {
                field: "proxy.health_interval_ms",
                reason: "must be greater than zero".to_string(),
            });
        }
        Ok(())
    }

    /// The configured address override, if any
    pub fn public_ip(&self) -> Result<Option<IpAddr>, ConfigError> {
        match self.public_ip.as_deref().map(str::trim) {
            None | Some("") => Ok(None),
            Some(raw) => raw.parse().map(Some).map_err(|_| ConfigError::Invalid {
                field: "public_ip",
                reason: format!("'{}' is not an IP address", raw),
            }),
        }
    }

    pub fn dns_provider_config(&self) -> Result<DnsProviderConfig, ConfigError> {
        Ok(DnsProviderConfig {
            credentials: self.dns.credentials()?,
            domain: self.domain.trim().to_string(),
            request_timeout: self.dns.request_timeout(),
            retry: self.dns.retry_policy(),
        })
    }

    pub fn layout(&self) -> Layout {
        Layout {
            data_dir: self.data_dir.clone(),
            config_dir: self.config_dir.clone(),
        }
    }

    /// Write the configuration to `path` with owner-only permissions.
    pub fn save(&self, path: &Path, overwrite: bool) -> Result<(), ConfigError> {
        self.validate()?;
        let yaml = serde_yaml::to_string(self)?;
        let file = AtomicFile::new(path);

        if overwrite {
            file.write(yaml.as_bytes())?;
        } else if !file.create_new(yaml.as_bytes())? {
            return Err(ConfigError::AlreadyExists(path.to_path_buf()));
        }

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600)).map_err(
                |source| FileError::Io {
                    path: path.to_path_buf(),
                    source,
                },
            )?;
        }

        debug!("Wrote configuration to {}", path.display());
        Ok(())
    }
}

/// Filesystem locations derived from the data and config directories
#[derive(Debug, Clone, PartialEq)]
pub struct Layout {
    pub data_dir: PathBuf,
    pub config_dir: PathBuf,
}

impl Layout {
    pub fn state_path(&self) -> PathBuf {
        self.data_dir.join(STATE_FILE_NAME)
    }

    pub fn proxy_data_dir(&self) -> PathBuf {
        self.data_dir.join(PROXY_DIR_NAME)
    }

    pub fn identity_path(&self) -> PathBuf {
        self.proxy_data_dir().join(IDENTITY_FILE_NAME)
    }

    /// ACME storage root
    pub fn certificates_dir(&self) -> PathBuf {
        self.proxy_data_dir().join(CERTIFICATES_DIR_NAME)
    }

    /// Per-site access logs live here as `<subdomain>.log`
    pub fn logs_dir(&self) -> PathBuf {
        self.proxy_data_dir().join(LOGS_DIR_NAME)
    }

    pub fn process_log_path(&self) -> PathBuf {
        self.logs_dir().join(PROCESS_LOG_NAME)
    }

    pub fn proxy_config_dir(&self) -> PathBuf {
        self.config_dir.join(PROXY_DIR_NAME)
    }

    pub fn live_config_path(&self) -> PathBuf {
        self.proxy_config_dir().join(LIVE_CONFIG_NAME)
    }

    /// Scratch document validated before it replaces the live one
    pub fn candidate_config_path(&self) -> PathBuf {
        self.proxy_config_dir().join(CANDIDATE_CONFIG_NAME)
    }

    /// Serializes read-modify-replace cycles on the live document
    pub fn document_lock_path(&self) -> PathBuf {
        self.proxy_config_dir().join(DOCUMENT_LOCK_NAME)
    }

    /// Create every directory the proxy writes into
    pub fn ensure_dirs(&self) -> Result<(), ConfigError> {
        for dir in [
            self.data_dir.clone(),
            self.certificates_dir(),
            self.logs_dir(),
            self.proxy_config_dir(),
        ] {
            std::fs::create_dir_all(&dir).map_err(|source| FileError::Io {
                path: dir.clone(),
                source,
            })?;
        }
        Ok(())
    }
}
