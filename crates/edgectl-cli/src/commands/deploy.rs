//! Expose a local service under a subdomain

use clap::Args;
use colored::Colorize;
use edgectl_deployments::{DeployRequest, ReconcileError, Subdomain, Target};
use std::net::IpAddr;
use std::path::PathBuf;
use tracing::debug;

use super::{print_report, spinner};
use crate::context::AppContext;

#[derive(Args)]
pub struct DeployCommand {
    /// Subdomain to expose the service under (random when omitted)
    #[arg(long, short = 's')]
    pub subdomain: Option<String>,

    /// Local service address as HOST:PORT or [IPv6]:PORT
    #[arg(long, short = 't', conflicts_with = "port", required_unless_present = "port")]
    pub target: Option<String>,

    /// Shorthand for --target localhost:PORT
    #[arg(long, short = 'p')]
    pub port: Option<u16>,

    /// Do not route traffic through the DNS provider's edge proxy
    #[arg(long, default_value = "false")]
    pub no_proxy: bool,

    /// Replace an existing deployment or adopt an unmanaged DNS record
    #[arg(long, default_value = "false")]
    pub overwrite: bool,

    /// Point the DNS record at this address instead of detecting it
    #[arg(long)]
    pub public_ip: Option<IpAddr>,
}

impl DeployCommand {
    /// The deploy request this invocation describes
    fn request(&self) -> anyhow::Result<DeployRequest> {
        let target = match (&self.target, self.port) {
            (Some(target), _) => target.clone(),
            (None, Some(port)) => Target::localhost(port)?.to_string(),
            (None, None) => anyhow::bail!("Either --target or --port is required"),
        };
        let subdomain = match &self.subdomain {
            Some(subdomain) => subdomain.clone(),
            None => {
                let generated = Subdomain::generate();
                debug!("Generated subdomain {}", generated);
                generated.to_string()
            }
        };

        let mut request = DeployRequest::new(subdomain, target)
            .proxied(!self.no_proxy)
            .overwrite(self.overwrite);
        if let Some(ip) = self.public_ip {
            request = request.public_ip(ip);
        }
        Ok(request)
    }

    pub fn execute(self, config_path: Option<PathBuf>) -> anyhow::Result<()> {
        let request = self.request()?;
        let ctx = AppContext::load(config_path.as_deref())?;
        let engine = ctx.engine()?;
        let fqdn = ctx.renderer().fqdn(&request.subdomain);

        let rt = tokio::runtime::Runtime::new()?;
        let progress = spinner(format!("Deploying {}...", fqdn))?;
        let result = rt.block_on(engine.deploy(request));
        progress.finish_and_clear();

        let deployment = match result {
            Ok(deployment) => deployment,
            Err(e) => {
                if let ReconcileError::Failed { step, report, .. } = &e {
                    println!();
                    println!("{} Deploy failed at the {}", "✗".bright_red(), step);
                    print_report(report);
                    println!();
                }
                return Err(e.into());
            }
        };

        let fqdn = ctx.renderer().fqdn(deployment.subdomain.as_str());
        println!();
        println!(
            "{} {}",
            "✓".bright_green(),
            format!("Deployed https://{}", fqdn).bright_white().bold()
        );
        println!(
            "  {} {}",
            "Target:".bright_white(),
            deployment.target.to_string().bright_cyan()
        );
        if let Some(record_id) = &deployment.record_id {
            println!("  {} {}", "DNS record:".bright_white(), record_id);
        }
        println!(
            "  {} {}",
            "Proxied:".bright_white(),
            if deployment.proxied { "yes" } else { "no" }
        );
        println!(
            "  {} {}",
            "State:".bright_white(),
            deployment.state.to_string().bright_green()
        );
        println!();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn command(subdomain: Option<&str>, target: Option<&str>, port: Option<u16>) -> DeployCommand {
        DeployCommand {
            subdomain: subdomain.map(str::to_string),
            target: target.map(str::to_string),
            port,
            no_proxy: false,
            overwrite: false,
            public_ip: None,
        }
    }

    #[test]
    fn test_port_means_localhost() {
        let request = command(Some("app"), None, Some(3000)).request().unwrap();
        assert_eq!(request.subdomain, "app");
        assert_eq!(request.target, "localhost:3000");
        assert!(request.proxied);
    }

    #[test]
    fn test_missing_subdomain_is_generated() {
        let request = command(None, Some("10.0.0.5:8080"), None)
            .request()
            .unwrap();
        assert_eq!(request.subdomain.len(), 8);
        assert!(Subdomain::parse(&request.subdomain).is_ok());
    }

    #[test]
    fn test_flags_map_onto_request() {
        let mut cmd = command(Some("app"), Some("localhost:3000"), None);
        cmd.no_proxy = true;
        cmd.overwrite = true;
        cmd.public_ip = Some("203.0.113.10".parse().unwrap());

        let request = cmd.request().unwrap();
        assert!(!request.proxied);
        assert!(request.overwrite);
        assert_eq!(request.public_ip, Some("203.0.113.10".parse().unwrap()));
    }

    #[test]
    fn test_port_zero_is_rejected() {
        assert!(command(Some("app"), None, Some(0)).request().is_err());
    }
}
