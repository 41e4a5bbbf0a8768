//! Reverse proxy lifecycle commands

use anyhow::Context;
use clap::{Args, Subcommand};
use colored::Colorize;
use edgectl_proxy::ProxyStatus;
use std::path::{Path, PathBuf};
use tracing::debug;

use super::spinner;
use crate::context::AppContext;

#[derive(Args)]
pub struct ProxyCommand {
    #[command(subcommand)]
    pub command: ProxySubcommand,
}

#[derive(Subcommand)]
pub enum ProxySubcommand {
    /// Start the proxy with the current configuration
    Start,
    /// Stop the proxy
    Stop,
    /// Show whether the proxy is running and healthy
    Status,
    /// Re-render the global settings and apply them to the running proxy
    Reload,
}

impl ProxyCommand {
    pub fn execute(self, config_path: Option<PathBuf>) -> anyhow::Result<()> {
        let ctx = AppContext::load(config_path.as_deref())?;
        let controller = ctx.controller()?;
        let rt = tokio::runtime::Runtime::new()?;

        match self.command {
            ProxySubcommand::Start => {
                let _document = ctx.lock_document()?;
                let candidate = ctx.stage_refreshed_document()?;
                let progress = spinner("Starting proxy...")?;
                let result = rt.block_on(controller.start(&candidate));
                progress.finish_and_clear();
                let handle = result.context("Failed to start the proxy")?;
                discard(&candidate);

                println!();
                println!(
                    "{} Proxy running (pid {})",
                    "✓".bright_green(),
                    handle.pid.to_string().bright_cyan()
                );
                println!(
                    "  {} {}",
                    "Config:".bright_white(),
                    controller.config_path().display()
                );
                println!(
                    "  {} {}",
                    "Log:".bright_white(),
                    ctx.layout.process_log_path().display()
                );
                println!();
            }
            ProxySubcommand::Stop => {
                let stopped = rt.block_on(controller.stop())?;
                println!();
                if stopped {
                    println!("{} Proxy stopped", "✓".bright_green());
                } else {
                    println!("{}", "Proxy is not running.".bright_yellow());
                }
                println!();
            }
            ProxySubcommand::Status => {
                let report = rt.block_on(controller.status())?;
                let status = match report.status {
                    ProxyStatus::Running => report.status.to_string().bright_green(),
                    ProxyStatus::Unhealthy => report.status.to_string().bright_red(),
                    ProxyStatus::Stopped => report.status.to_string().bright_yellow(),
                };

                println!();
                println!("{} {}", "Proxy:".bright_white().bold(), status);
                if let Some(identity) = report.identity {
                    println!(
                        "  {} {}",
                        "PID:".bright_white(),
                        identity.holder().to_string().bright_cyan()
                    );
                    println!("  {} {}", "State:".bright_white(), identity.state);
                    println!(
                        "  {} {}",
                        "Config:".bright_white(),
                        identity.config_path.display()
                    );
                    println!(
                        "  {} {}",
                        "Started:".bright_white(),
                        identity.started_at.format("%Y-%m-%d %H:%M:%S UTC")
                    );
                }
                println!();
            }
            ProxySubcommand::Reload => {
                let _document = ctx.lock_document()?;
                let candidate = ctx.stage_refreshed_document()?;
                let progress = spinner("Reloading proxy...")?;
                let result = rt.block_on(controller.reload(&candidate));
                progress.finish_and_clear();
                let reloaded = result.context("Failed to reload the proxy")?;
                discard(&candidate);

                println!();
                if reloaded {
                    println!("{} Proxy reloaded", "✓".bright_green());
                } else {
                    println!(
                        "{}",
                        "Proxy is not running; configuration updated for the next start."
                            .bright_yellow()
                    );
                }
                println!();
            }
        }
        Ok(())
    }
}

fn discard(candidate: &Path) {
    if let Err(e) = std::fs::remove_file(candidate) {
        debug!("Could not clean up {}: {}", candidate.display(), e);
    }
}
