//! Non-interactive configuration setup

use clap::{ArgGroup, Args};
use colored::Colorize;
use edgectl_config::{default_config_file, Config};
use edgectl_dns::{CloudflareCredentials, DigitalOceanCredentials, ProviderCredentials};
use std::net::IpAddr;
use std::path::PathBuf;

#[derive(Args)]
#[command(group(
    ArgGroup::new("credentials")
        .required(true)
        .args(["api_token", "api_key", "zone_token", "digitalocean_token"])
))]
pub struct InitCommand {
    /// Domain the subdomains are created under (e.g., "example.com")
    #[arg(long, short = 'd')]
    pub domain: String,

    /// Email address for the ACME account
    #[arg(long, short = 'e')]
    pub email: String,

    /// Cloudflare API token with Zone:DNS:Edit
    #[arg(long)]
    pub api_token: Option<String>,

    /// Cloudflare global API key (legacy)
    #[arg(long, requires = "api_email")]
    pub api_key: Option<String>,

    /// Cloudflare account email for the global API key
    #[arg(long, requires = "api_key")]
    pub api_email: Option<String>,

    /// Cloudflare token with Zone:Read, used for zone lookup
    #[arg(long, requires = "dns_token")]
    pub zone_token: Option<String>,

    /// Cloudflare token with DNS:Edit, used for record changes
    #[arg(long, requires = "zone_token")]
    pub dns_token: Option<String>,

    /// DigitalOcean personal access token
    #[arg(long)]
    pub digitalocean_token: Option<String>,

    /// Fixed public address for DNS records (detected when omitted)
    #[arg(long)]
    pub public_ip: Option<IpAddr>,

    /// Replace an existing configuration file
    #[arg(long, default_value = "false")]
    pub force: bool,
}

impl InitCommand {
    fn credentials(&self) -> anyhow::Result<ProviderCredentials> {
        let credentials = match self {
            Self {
                zone_token: Some(zone_token),
                dns_token: Some(dns_token),
                ..
            } => ProviderCredentials::Cloudflare(CloudflareCredentials::ScopedTokens {
                zone_token: zone_token.clone(),
                dns_token: dns_token.clone(),
            }),
            Self {
                api_token: Some(api_token),
                ..
            } => ProviderCredentials::Cloudflare(CloudflareCredentials::ApiToken {
                api_token: api_token.clone(),
            }),
            Self {
                api_key: Some(api_key),
                api_email: Some(email),
                ..
            } => ProviderCredentials::Cloudflare(CloudflareCredentials::GlobalKey {
                email: email.clone(),
                api_key: api_key.clone(),
            }),
            Self {
                digitalocean_token: Some(token),
                ..
            } => ProviderCredentials::DigitalOcean(DigitalOceanCredentials {
                api_token: token.clone(),
            }),
            _ => anyhow::bail!("No DNS provider credentials given"),
        };
        Ok(credentials)
    }

    fn config(&self) -> anyhow::Result<Config> {
        let mut config = Config::new(
            self.domain.trim(),
            self.email.trim(),
            &self.credentials()?,
        );
        config.public_ip = self.public_ip.map(|ip| ip.to_string());
        Ok(config)
    }

    pub fn execute(self, config_path: Option<PathBuf>) -> anyhow::Result<()> {
        let path = config_path.unwrap_or_else(default_config_file);
        let config = self.config()?;

        config.save(&path, self.force)?;
        config.layout().ensure_dirs()?;

        println!();
        println!(
            "{} {}",
            "✓".bright_green(),
            "Configuration written".bright_white().bold()
        );
        println!("  {} {}", "File:".bright_white(), path.display());
        println!(
            "  {} {}",
            "Domain:".bright_white(),
            config.domain.bright_cyan()
        );
        println!(
            "  {} {}",
            "DNS provider:".bright_white(),
            config.dns.provider.bright_cyan()
        );
        println!(
            "  {} {}",
            "Data directory:".bright_white(),
            config.data_dir.display()
        );
        println!();
        println!("{}", "Next steps:".bright_white().bold());
        println!("  {} edgectl doctor", "→".bright_blue());
        println!("  {} edgectl deploy --port 3000", "→".bright_blue());
        println!();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[derive(Parser)]
    struct Harness {
        #[command(flatten)]
        init: InitCommand,
    }

    fn parse(args: &[&str]) -> Result<InitCommand, clap::Error> {
        let mut argv = vec!["init", "--domain", "example.com", "--email", "ops@example.com"];
        argv.extend_from_slice(args);
        Harness::try_parse_from(argv).map(|h| h.init)
    }

    #[test]
    fn test_requires_some_credentials() {
        assert!(parse(&[]).is_err());
    }

    #[test]
    fn test_paired_flags_are_enforced() {
        assert!(parse(&["--api-key", "k"]).is_err());
        assert!(parse(&["--zone-token", "z"]).is_err());
    }

    #[test]
    fn test_scoped_tokens_win() {
        let cmd = parse(&["--zone-token", "z", "--dns-token", "d"]).unwrap();
        assert_eq!(
            cmd.credentials().unwrap(),
            ProviderCredentials::Cloudflare(CloudflareCredentials::ScopedTokens {
                zone_token: "z".to_string(),
                dns_token: "d".to_string(),
            })
        );
    }

    #[test]
    fn test_digitalocean_config() {
        let cmd = parse(&["--digitalocean-token", "dop_v1_x", "--public-ip", "203.0.113.4"])
            .unwrap();
        let config = cmd.config().unwrap();
        assert_eq!(config.dns.provider, "digitalocean");
        assert_eq!(config.public_ip.as_deref(), Some("203.0.113.4"));
        config.validate().unwrap();
    }
}
