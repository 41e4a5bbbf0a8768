use clap::Args;
use colored::Colorize;
use edgectl_deployments::{DeploymentState, ListEntry};
use std::path::PathBuf;

use crate::context::AppContext;

#[derive(Args)]
pub struct ListCommand {
    /// Also show DNS records under the domain that edgectl does not manage
    #[arg(long, default_value = "false")]
    pub all: bool,
}

impl ListCommand {
    pub fn execute(self, config_path: Option<PathBuf>) -> anyhow::Result<()> {
        let ctx = AppContext::load(config_path.as_deref())?;
        let engine = ctx.engine()?;
        let renderer = ctx.renderer();

        let rt = tokio::runtime::Runtime::new()?;
        let entries = rt.block_on(engine.list(self.all))?;

        if entries.is_empty() {
            println!();
            println!("{}", "No deployments found.".bright_yellow());
            println!();
            return Ok(());
        }

        println!();
        println!(
            "{}",
            format!(
                "{:<40} {:<28} {:<15} {:<8} {}",
                "NAME", "TARGET", "STATE", "PROXIED", "OWNER"
            )
            .bright_white()
            .bold()
        );

        for entry in &entries {
            match entry {
                ListEntry::Managed(deployment) => {
                    let state = format!("{:<15}", deployment.state.to_string());
                    let state = match deployment.state {
                        DeploymentState::Active => state.bright_green(),
                        DeploymentState::Pending => state.bright_yellow(),
                        DeploymentState::PendingDelete => state.bright_red(),
                    };
                    println!(
                        "{:<40} {:<28} {} {:<8} {}",
                        renderer.fqdn(deployment.subdomain.as_str()).bright_cyan(),
                        deployment.target.to_string(),
                        state,
                        if deployment.proxied { "yes" } else { "no" },
                        "edgectl".bright_green()
                    );
                }
                ListEntry::Unmanaged(record) => {
                    println!(
                        "{:<40} {:<28} {:<15} {:<8} {}",
                        record.name,
                        format!("{} {}", record.record_type, record.content),
                        "-",
                        if record.proxied { "yes" } else { "no" },
                        "not owned".bright_yellow()
                    );
                }
            }
        }

        let owned = entries.iter().filter(|e| e.is_owned()).count();
        println!();
        println!(
            "{} {}",
            "Managed deployments:".bright_white().bold(),
            owned.to_string().bright_cyan()
        );
        if self.all {
            println!(
                "{} {}",
                "Unmanaged records:".bright_white().bold(),
                (entries.len() - owned).to_string().bright_cyan()
            );
        }
        println!();
        Ok(())
    }
}
