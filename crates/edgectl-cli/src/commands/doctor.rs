//! Environment checks

use clap::Args;
use colored::Colorize;
use edgectl_config::Config;
use edgectl_core::mask_sensitive;
use edgectl_dns::ProviderCredentials;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;

use super::spinner;
use crate::context::AppContext;

const VERSION_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Args)]
pub struct DoctorCommand {}

struct Checks {
    failed: usize,
}

impl Checks {
    fn pass(&self, name: &str, detail: impl std::fmt::Display) {
        println!("{} {} {}", "✓".bright_green(), name.bright_white(), detail);
    }

    fn fail(&mut self, name: &str, detail: impl std::fmt::Display) {
        self.failed += 1;
        println!(
            "{} {} {}",
            "✗".bright_red(),
            name.bright_white(),
            detail.to_string().bright_red()
        );
    }
}

fn describe(credentials: &ProviderCredentials) -> String {
    let secret = credentials
        .challenge_env()
        .into_iter()
        .next()
        .map(|(_, value)| mask_sensitive(&value))
        .unwrap_or_default();
    match credentials {
        ProviderCredentials::Cloudflare(creds) => {
            format!("cloudflare, {} ({})", creds.mode(), secret)
        }
        ProviderCredentials::DigitalOcean(_) => format!("digitalocean ({})", secret),
    }
}

/// `<binary> version`, bounded
async fn proxy_version(binary: &Path) -> Result<String, String> {
    let run = Command::new(binary)
        .arg("version")
        .stdin(Stdio::null())
        .kill_on_drop(true)
        .output();
    match tokio::time::timeout(VERSION_TIMEOUT, run).await {
        Err(_) => Err(format!("timed out after {:?}", VERSION_TIMEOUT)),
        Ok(Err(e)) => Err(format!("cannot run {}: {}", binary.display(), e)),
        Ok(Ok(output)) if !output.status.success() => {
            Err(format!("{} exited with {}", binary.display(), output.status))
        }
        Ok(Ok(output)) => Ok(String::from_utf8_lossy(&output.stdout)
            .lines()
            .next()
            .unwrap_or_default()
            .trim()
            .to_string()),
    }
}

impl DoctorCommand {
    pub fn execute(self, config_path: Option<PathBuf>) -> anyhow::Result<()> {
        let mut checks = Checks { failed: 0 };
        println!();

        let config = match Config::load(config_path.as_deref()) {
            Ok(config) => config,
            Err(e) => {
                checks.fail("Configuration", e);
                println!();
                anyhow::bail!("Configuration could not be loaded");
            }
        };
        if let Err(e) = config.validate() {
            checks.fail("Configuration", e);
            println!();
            anyhow::bail!("Configuration is incomplete");
        }
        checks.pass("Configuration", format!("domain {}", config.domain));

        let ctx = AppContext::from_config(config)?;
        checks.pass("DNS credentials", describe(&ctx.credentials()?));

        let rt = tokio::runtime::Runtime::new()?;
        let provider = ctx.dns_provider()?;
        let resolver = ctx.ip_resolver(None)?;
        let controller = ctx.controller()?;

        let progress = spinner("Checking provider, public address and proxy...")?;
        let (zone, address, version, status) = rt.block_on(async {
            futures::join!(
                provider.verify(),
                resolver.resolve(),
                proxy_version(&ctx.config.proxy.binary),
                controller.status(),
            )
        });
        progress.finish_and_clear();

        match zone {
            Ok(()) => checks.pass("Zone access", provider.domain()),
            Err(e) => checks.fail("Zone access", e),
        }
        match address {
            Ok(ip) => checks.pass("Public address", ip),
            Err(e) => checks.fail("Public address", e),
        }
        match version {
            Ok(version) => checks.pass("Proxy binary", version),
            Err(e) => checks.fail("Proxy binary", e),
        }
        match status {
            Ok(report) => checks.pass("Proxy process", report.status),
            Err(e) => checks.fail("Proxy process", e),
        }

        println!();
        if checks.failed > 0 {
            anyhow::bail!("{} check(s) failed", checks.failed);
        }
        println!("{}", "All checks passed.".bright_green().bold());
        println!();
        Ok(())
    }
}
