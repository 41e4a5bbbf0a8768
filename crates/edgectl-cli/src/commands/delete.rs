use clap::Args;
use colored::Colorize;
use edgectl_deployments::ReconcileError;
use std::path::PathBuf;

use super::{print_report, spinner};
use crate::context::AppContext;

#[derive(Args)]
pub struct DeleteCommand {
    /// Subdomain of the deployment to remove
    pub subdomain: String,
}

impl DeleteCommand {
    pub fn execute(self, config_path: Option<PathBuf>) -> anyhow::Result<()> {
        let ctx = AppContext::load(config_path.as_deref())?;
        let engine = ctx.engine()?;
        let fqdn = ctx.renderer().fqdn(&self.subdomain);

        let rt = tokio::runtime::Runtime::new()?;
        let progress = spinner(format!("Removing {}...", fqdn))?;
        let result = rt.block_on(engine.remove(&self.subdomain));
        progress.finish_and_clear();

        match result {
            Ok(true) => {
                println!();
                println!("{} Removed {}", "✓".bright_green(), fqdn.bright_cyan());
                println!();
                Ok(())
            }
            Ok(false) => {
                println!();
                println!(
                    "{}",
                    format!("No deployment named '{}'.", self.subdomain).bright_yellow()
                );
                println!();
                Ok(())
            }
            Err(ReconcileError::Teardown(teardown)) => {
                println!();
                println!(
                    "{} Removal of {} is incomplete",
                    "✗".bright_red(),
                    fqdn.bright_cyan()
                );
                print_report(&teardown.report);
                for (resource, error) in &teardown.failures {
                    println!("  {} {}: {}", "→".bright_red(), resource, error);
                }
                println!();
                println!(
                    "{}",
                    "Run the same command again to retry the remaining steps.".bright_white()
                );
                println!();
                Err(teardown.into())
            }
            Err(e) => Err(e.into()),
        }
    }
}
