pub mod delete;
pub mod deploy;
pub mod doctor;
pub mod init;
pub mod list;
pub mod proxy;

pub use delete::DeleteCommand;
pub use deploy::DeployCommand;
pub use doctor::DoctorCommand;
pub use init::InitCommand;
pub use list::ListCommand;
pub use proxy::ProxyCommand;

use colored::Colorize;
use edgectl_deployments::{Resource, ResourceReport, ResourceState};
use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;

/// Spinner shown while a long-running step is in flight
pub(crate) fn spinner(message: impl Into<String>) -> anyhow::Result<ProgressBar> {
    let bar = ProgressBar::new_spinner();
    bar.set_style(ProgressStyle::with_template("{spinner:.cyan} {msg}")?);
    bar.set_message(message.into());
    bar.enable_steady_tick(Duration::from_millis(100));
    Ok(bar)
}

/// One line per resource, colored by outcome
pub(crate) fn print_report(report: &ResourceReport) {
    for resource in [Resource::Dns, Resource::Config, Resource::Process] {
        let Some(state) = report.get(resource) else {
            continue;
        };
        let rendered = match state {
            ResourceState::Failed(_) | ResourceState::RolledBack => state.to_string().bright_red(),
            ResourceState::Untouched | ResourceState::Unchanged | ResourceState::NotRunning => {
                state.to_string().bright_yellow()
            }
            _ => state.to_string().bright_green(),
        };
        println!(
            "  {} {}",
            format!("{:<14}", format!("{}:", resource)).bright_white(),
            rendered
        );
    }
}
