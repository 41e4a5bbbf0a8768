//! Caddyfile fragment rendering
//!
//! Produces the global options block and one site block per subdomain from
//! embedded templates. Output is a pure function of the inputs.

use ipnet::IpNet;
use std::net::IpAddr;
use std::path::{Path, PathBuf};

use crate::errors::RenderError;
use crate::template::{self, Vars};

const GLOBAL_TEMPLATE: &str = include_str!("../templates/global.caddy");
const SITE_TEMPLATE: &str = include_str!("../templates/site.caddy");

/// Reference to DNS-challenge credentials by environment variable name.
///
/// Secrets never appear in the rendered file; Caddy resolves
/// `{env.NAME}` when it loads the configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlsCredentialsRef {
    module: String,
    env_vars: Vec<String>,
}

impl TlsCredentialsRef {
    pub fn new<I, S>(module: impl Into<String>, env_vars: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            module: module.into(),
            env_vars: env_vars.into_iter().map(Into::into).collect(),
        }
    }

    pub fn module(&self) -> &str {
        &self.module
    }

    pub fn env_vars(&self) -> &[String] {
        &self.env_vars
    }

    /// Arguments of a site's `dns` directive, e.g.
    /// `cloudflare {env.CLOUDFLARE_API_TOKEN}`
    pub fn directive_args(&self) -> Result<String, RenderError> {
        if !is_identifier(&self.module) {
            return Err(RenderError::Malformed(format!(
                "invalid DNS challenge module '{}'",
                self.module
            )));
        }
        let mut args = self.module.clone();
        for var in &self.env_vars {
            if !is_identifier(var) {
                return Err(RenderError::Malformed(format!(
                    "invalid environment variable name '{}'",
                    var
                )));
            }
            args.push_str(&format!(" {{env.{}}}", var));
        }
        Ok(args)
    }
}

/// Inputs of the global options block
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GlobalSettings {
    /// ACME account email
    pub email: String,
    /// CIDRs (or `private_ranges`) whose forwarding headers are trusted
    pub trusted_proxies: Vec<String>,
    /// Certificate storage directory
    pub storage_path: PathBuf,
    pub admin_disabled: bool,
    pub admin_address: String,
}

/// One exposed subdomain
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SiteConfig {
    pub subdomain: String,
    /// Upstream `host:port`
    pub target: String,
}

impl SiteConfig {
    pub fn new(subdomain: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            subdomain: subdomain.into(),
            target: target.into(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ConfigRenderer {
    domain: String,
    log_dir: PathBuf,
    global_template: String,
    site_template: String,
}

impl ConfigRenderer {
    pub fn new(domain: impl Into<String>, log_dir: impl Into<PathBuf>) -> Self {
        Self::with_templates(domain, log_dir, GLOBAL_TEMPLATE, SITE_TEMPLATE)
    }

    pub fn with_templates(
        domain: impl Into<String>,
        log_dir: impl Into<PathBuf>,
        global_template: impl Into<String>,
        site_template: impl Into<String>,
    ) -> Self {
        Self {
            domain: domain.into(),
            log_dir: log_dir.into(),
            global_template: global_template.into(),
            site_template: site_template.into(),
        }
    }

    pub fn domain(&self) -> &str {
        &self.domain
    }

    pub fn fqdn(&self, subdomain: &str) -> String {
        format!("{}.{}", subdomain, self.domain)
    }

    /// Access log written by the site block of `subdomain`
    pub fn site_log_path(&self, subdomain: &str) -> PathBuf {
        self.log_dir.join(format!("{}.log", subdomain))
    }

    pub fn render_global(&self, settings: &GlobalSettings) -> Result<String, RenderError> {
        let mut vars = Vars::new();
        bind_required(&mut vars, "email", &settings.email);
        bind_required(&mut vars, "storage_path", &path_token(&settings.storage_path));

        let admin = if settings.admin_disabled {
            "admin off".to_string()
        } else if settings.admin_address.trim().is_empty() {
            return Err(RenderError::MissingVariable("admin_address".to_string()));
        } else {
            format!("admin {}", token(&settings.admin_address)?)
        };
        bind_optional(&mut vars, "admin_directive", admin);

        let servers = if settings.trusted_proxies.is_empty() {
            String::new()
        } else {
            for cidr in &settings.trusted_proxies {
                validate_cidr(cidr)?;
            }
            format!(
                "servers {{\n\t\ttrusted_proxies static {}\n\t}}",
                settings.trusted_proxies.join(" ")
            )
        };
        bind_optional(&mut vars, "servers_block", servers);

        template::render(&self.global_template, &vars)
    }

    pub fn render_site(
        &self,
        site: &SiteConfig,
        tls: &TlsCredentialsRef,
    ) -> Result<String, RenderError> {
        let mut vars = Vars::new();
        if !site.subdomain.is_empty() {
            bind_required(&mut vars, "fqdn", &token(&self.fqdn(&site.subdomain))?);
        }
        if !site.target.is_empty() {
            bind_required(&mut vars, "target", &token(&site.target)?);
        }
        bind_required(&mut vars, "dns_challenge", &tls.directive_args()?);
        bind_required(
            &mut vars,
            "log_path",
            &path_token(&self.site_log_path(&site.subdomain)),
        );

        template::render(&self.site_template, &vars)
    }
}

/// Empty values stay unbound so the template reports them as missing
fn bind_required(vars: &mut Vars, name: &str, value: &str) {
    if !value.trim().is_empty() {
        vars.insert(name.to_string(), value.to_string());
    }
}

fn bind_optional(vars: &mut Vars, name: &str, value: String) {
    vars.insert(name.to_string(), value);
}

/// A single Caddyfile token; anything that could open a block or start a
/// new directive is rejected.
fn token(value: &str) -> Result<String, RenderError> {
    if value
        .chars()
        .any(|c| c.is_whitespace() || matches!(c, '{' | '}' | '"' | '#'))
    {
        return Err(RenderError::Malformed(format!(
            "'{}' is not a valid Caddyfile token",
            value
        )));
    }
    Ok(value.to_string())
}

fn path_token(path: &Path) -> String {
    let text = path.display().to_string();
    if text.chars().any(char::is_whitespace) {
        format!("\"{}\"", text.replace('"', "\\\""))
    } else {
        text
    }
}

fn is_identifier(value: &str) -> bool {
    !value.is_empty()
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// A CIDR, a bare address, or Caddy's `private_ranges` shorthand
fn validate_cidr(value: &str) -> Result<(), RenderError> {
    if value == "private_ranges" {
        return Ok(());
    }
    let parsed = value
        .parse::<IpNet>()
        .or_else(|_| value.parse::<IpAddr>().map(IpNet::from));
    match parsed {
        Ok(_) => Ok(()),
        Err(_) => Err(RenderError::Malformed(format!(
            "invalid trusted proxy CIDR '{}'",
            value
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn renderer() -> ConfigRenderer {
        ConfigRenderer::new("example.com", "/var/lib/edgectl/proxy/logs")
    }

    fn cloudflare() -> TlsCredentialsRef {
        TlsCredentialsRef::new("cloudflare", ["CLOUDFLARE_API_TOKEN"])
    }

    fn global() -> GlobalSettings {
        GlobalSettings {
            email: "ops@example.com".to_string(),
            trusted_proxies: Vec::new(),
            storage_path: PathBuf::from("/var/lib/edgectl/proxy/certificates"),
            admin_disabled: false,
            admin_address: "localhost:2019".to_string(),
        }
    }

    // ==================== Site tests ====================

    #[test]
    fn test_site_block_contents() {
        let out = renderer()
            .render_site(&SiteConfig::new("app", "localhost:3000"), &cloudflare())
            .unwrap();

        assert!(out.starts_with("app.example.com {\n"));
        assert!(out.contains("reverse_proxy localhost:3000 {"));
        assert!(out.contains("header_up Host {host}"));
        assert!(out.contains("dns cloudflare {env.CLOUDFLARE_API_TOKEN}"));
        assert!(out.contains("output file /var/lib/edgectl/proxy/logs/app.log {"));
        assert!(out.contains("format json"));
        assert!(out.contains("X-Content-Type-Options \"nosniff\""));
        assert!(out.trim_end().ends_with('}'));
    }

    #[test]
    fn test_site_rendering_is_deterministic() {
        let site = SiteConfig::new("app", "127.0.0.1:8080");
        let a = renderer().render_site(&site, &cloudflare()).unwrap();
        let b = renderer().render_site(&site, &cloudflare()).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_empty_target_is_missing() {
        let err = renderer()
            .render_site(&SiteConfig::new("app", ""), &cloudflare())
            .unwrap_err();
        assert_eq!(err, RenderError::MissingVariable("target".to_string()));
    }

    #[test]
    fn test_target_cannot_inject_directives() {
        let err = renderer()
            .render_site(
                &SiteConfig::new("app", "localhost:1 }\nevil.com {"),
                &cloudflare(),
            )
            .unwrap_err();
        assert!(matches!(err, RenderError::Malformed(_)));
    }

    #[test]
    fn test_multi_variable_challenge() {
        let creds = TlsCredentialsRef::new("cloudflare", ["CLOUDFLARE_API_KEY", "CLOUDFLARE_EMAIL"]);
        assert_eq!(
            creds.directive_args().unwrap(),
            "cloudflare {env.CLOUDFLARE_API_KEY} {env.CLOUDFLARE_EMAIL}"
        );
        let bad = TlsCredentialsRef::new("cloud flare", Vec::<String>::new());
        assert!(bad.directive_args().is_err());
    }

    // ==================== Global tests ====================

    #[test]
    fn test_global_block_with_admin_address() {
        let out = renderer().render_global(&global()).unwrap();
        assert_eq!(
            out,
            "{\n\temail ops@example.com\n\tadmin localhost:2019\n\tstorage file_system {\n\t\troot /var/lib/edgectl/proxy/certificates\n\t}\n}\n"
        );
    }

    #[test]
    fn test_global_block_optional_sections() {
        let mut settings = global();
        settings.admin_disabled = true;
        settings.trusted_proxies = vec!["173.245.48.0/20".to_string(), "2400:cb00::/32".to_string()];

        let out = renderer().render_global(&settings).unwrap();
        assert!(out.contains("\tadmin off\n"));
        assert!(out.contains(
            "\tservers {\n\t\ttrusted_proxies static 173.245.48.0/20 2400:cb00::/32\n\t}\n"
        ));
    }

    #[test]
    fn test_empty_email_is_missing() {
        let mut settings = global();
        settings.email = String::new();
        assert_eq!(
            renderer().render_global(&settings).unwrap_err(),
            RenderError::MissingVariable("email".to_string())
        );
    }

    #[test]
    fn test_invalid_cidr_is_rejected() {
        for cidr in ["10.0.0.0/33", "not-an-ip", "::1/129", "10.0.0.0/x"] {
            let mut settings = global();
            settings.trusted_proxies = vec![cidr.to_string()];
            assert!(
                matches!(renderer().render_global(&settings), Err(RenderError::Malformed(_))),
                "{} should be rejected",
                cidr
            );
        }
    }

    #[test]
    fn test_trusted_proxy_forms() {
        let mut settings = global();
        settings.trusted_proxies = vec![
            "private_ranges".to_string(),
            "10.0.0.0/8".to_string(),
            "192.0.2.7".to_string(),
            "fd00::/8".to_string(),
        ];
        let out = renderer().render_global(&settings).unwrap();
        assert!(out.contains("trusted_proxies static private_ranges 10.0.0.0/8 192.0.2.7 fd00::/8"));
    }

    #[test]
    fn test_dns_challenge_only_in_site_block() {
        let global = renderer().render_global(&global()).unwrap();
        assert!(!global.contains("dns"));
        let site = renderer()
            .render_site(&SiteConfig::new("app", "localhost:3000"), &cloudflare())
            .unwrap();
        assert_eq!(site.matches("dns cloudflare").count(), 1);
    }

    #[test]
    fn test_storage_path_with_spaces_is_quoted() {
        let mut settings = global();
        settings.storage_path = PathBuf::from("/srv/edge ctl/certs");
        let out = renderer().render_global(&settings).unwrap();
        assert!(out.contains("root \"/srv/edge ctl/certs\""));
    }
}
